//! Simulation parameters and the records derived from them each step.

use std::fmt;
use std::str::FromStr;

/// Which backend advances the particles.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum UpdateMode {
    #[default]
    Cpu,
    Gpu,
}

impl UpdateMode {
    pub const ALL: [UpdateMode; 2] = [UpdateMode::Cpu, UpdateMode::Gpu];

    pub fn label(self) -> &'static str {
        match self {
            UpdateMode::Cpu => "CPU",
            UpdateMode::Gpu => "GPU",
        }
    }
}

impl fmt::Display for UpdateMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.label())
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ParseUpdateModeError(String);

impl fmt::Display for ParseUpdateModeError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "unknown update mode {:?}", self.0)
    }
}

impl std::error::Error for ParseUpdateModeError {}

impl FromStr for UpdateMode {
    type Err = ParseUpdateModeError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "cpu" => Ok(UpdateMode::Cpu),
            "gpu" => Ok(UpdateMode::Gpu),
            _ => Err(ParseUpdateModeError(s.to_string())),
        }
    }
}

/// Live parameters mutated by the control panel.
///
/// Values are not validated: a negative damping or power produces a strange
/// picture, never a crash.
#[derive(Debug, Clone, PartialEq)]
pub struct SimulationParameters {
    /// Attraction target in pixels, relative to the window centre.
    pub target: [f32; 2],
    pub power: f32,
    /// Fraction of velocity kept per step ("energy conservation").
    pub damping: f32,
    /// Held true by the window shell while the left mouse button is down.
    pub attraction_active: bool,
    pub color_origin: [f32; 4],
    pub color_fast: [f32; 4],
    pub alpha: f32,
    pub particle_size: f32,
}

impl Default for SimulationParameters {
    fn default() -> Self {
        Self {
            target: [0.0, 0.0],
            power: 10.0,
            damping: 0.998,
            attraction_active: false,
            color_origin: [1.0, 1.0, 0.0, 1.0],
            color_fast: [1.0, 0.0, 0.0, 1.0],
            alpha: 0.5,
            particle_size: 1.0,
        }
    }
}

impl SimulationParameters {
    /// Snapshot of the fields the physics kernels read.
    pub fn forces(&self) -> ForceParams {
        ForceParams {
            target: self.target,
            power: self.power,
            damping: self.damping,
            attraction_active: self.attraction_active,
        }
    }

    /// Builds the uniform record shared by the compute and render passes.
    pub fn frame_uniforms(&self, half_size: [f32; 2]) -> FrameUniforms {
        FrameUniforms {
            half_size,
            _padding0: [0.0; 2],
            color_origin: self.color_origin,
            color_fast: self.color_fast,
            target: self.target,
            alpha: self.alpha,
            particle_size: self.particle_size,
            power: self.power,
            damping: self.damping,
            attraction_active: self.attraction_active as u32,
            _padding1: 0,
        }
    }
}

/// Immutable copy of the physics inputs for one step.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ForceParams {
    pub target: [f32; 2],
    pub power: f32,
    pub damping: f32,
    pub attraction_active: bool,
}

/// Per-frame uniform record, laid out to match the WGSL `FrameUniforms`.
#[repr(C)]
#[derive(Debug, Copy, Clone, PartialEq, bytemuck::Pod, bytemuck::Zeroable)]
pub struct FrameUniforms {
    /// Half the canvas size; y is negated so +y points down like the cursor.
    pub half_size: [f32; 2],
    pub _padding0: [f32; 2],
    pub color_origin: [f32; 4],
    pub color_fast: [f32; 4],
    pub target: [f32; 2],
    pub alpha: f32,
    pub particle_size: f32,
    pub power: f32,
    pub damping: f32,
    pub attraction_active: u32,
    pub _padding1: u32,
}

/// Damping from the logarithmic panel slider, `g` in `[0, 1]`.
pub fn damping_from_slider(g: f32) -> f32 {
    1.0 - 0.5f32.powf(g * 10.0)
}

/// Attraction power from the logarithmic panel slider, `g` in `[0, 100]`.
pub fn power_from_slider(g: f32) -> f32 {
    10f32.powf(g / 20.0)
}

/// Inverse of [`damping_from_slider`].
pub fn slider_from_damping(damping: f32) -> f32 {
    let kept = (1.0 - damping).max(f32::MIN_POSITIVE);
    (-kept.log2() / 10.0).clamp(0.0, 1.0)
}

/// Inverse of [`power_from_slider`].
pub fn slider_from_power(power: f32) -> f32 {
    (20.0 * power.max(f32::MIN_POSITIVE).log10()).clamp(0.0, 100.0)
}
