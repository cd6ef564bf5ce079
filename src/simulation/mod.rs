//! Particle simulation core
//!
//! One population of independent particles pulled toward a shared target,
//! advanced either by a pool of CPU workers or by a compute shader. The
//! [`SimulationEngine`] owns both backends and the particle storage they share.

pub mod buffer;
pub mod cpu;
pub mod engine;
pub mod gpu;
pub mod mode_switch;
pub mod params;
pub mod particle;

pub use buffer::{MirrorSlot, ParticleBuffer};
pub use cpu::{partition, CpuWorkerPool, PartitionPolicy, StepSnapshot};
pub use engine::{EngineState, FrameView, SimulationEngine, StepContext, StepReport};
pub use gpu::{ComputeKernel, GpuContext};
pub use mode_switch::{ModeSwitch, SwitchPhase};
pub use params::{FrameUniforms, SimulationParameters, UpdateMode};
pub use particle::Particle;
