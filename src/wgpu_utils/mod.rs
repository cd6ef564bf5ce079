// src/wgpu_utils/mod.rs
//! WGPU utility functions and helpers
//!
//! Typed buffer wrappers and binding helpers shared by the compute kernel and
//! the particle renderer.

pub mod binding_types;
pub mod uniform_buffer;

pub use uniform_buffer::{ArrayBuffer, UniformBuffer};
