//! # Graphics
//!
//! - [`render_engine`]: window surface and the device shared with the simulation
//! - [`particle_renderer`]: instanced quads drawn straight from a device mirror
//! - [`ui`]: imgui control panel

pub mod particle_renderer;
pub mod render_engine;
pub mod ui;

pub use particle_renderer::ParticleRenderer;
pub use render_engine::RenderEngine;
