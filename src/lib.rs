// src/lib.rs
//! Attractor
//!
//! Point particles pulled toward a moving target, stepped either by a pool of
//! CPU worker threads or by a wgpu compute pass over the same particle
//! storage, and drawn as instanced quads.

pub mod app;
pub mod config;
pub mod error;
pub mod gfx;
pub mod performance;
pub mod simulation;
pub mod wgpu_utils;

pub use app::AttractorApp;
pub use config::{AppConfig, SimulationConfig};
pub use error::{SimulationError, SimulationResult};
pub use simulation::{SimulationEngine, UpdateMode};
