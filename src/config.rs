//! Startup configuration
//!
//! Builder-style configuration for the simulation core and the window shell.
//! Defaults: about one million particles spread over a 1000×1000 square,
//! updated on the CPU.

use std::time::Duration;

use crate::simulation::{PartitionPolicy, UpdateMode};

/// Hard cap on the number of particles a buffer may hold.
pub const DEFAULT_MAX_PARTICLES: usize = 10_000_000;

/// Particle count used when nothing else is configured.
pub const DEFAULT_NUM_PARTICLES: usize = 1_048_576;

/// Side length of the square initial particles are scattered over.
pub const DEFAULT_SPAWN_EXTENT: f32 = 1_000.0;

/// Configuration consumed by [`SimulationEngine`](crate::simulation::SimulationEngine).
#[derive(Debug, Clone)]
pub struct SimulationConfig {
    pub num_particles: usize,
    pub max_particles: usize,
    pub num_threads: usize,
    pub mode: UpdateMode,
    pub spawn_extent: f32,
    pub partition: PartitionPolicy,
    /// `None` waits on the worker barrier forever.
    pub barrier_timeout: Option<Duration>,
    /// Seed for reproducible initial conditions.
    pub seed: Option<u64>,
}

impl Default for SimulationConfig {
    fn default() -> Self {
        Self {
            num_particles: DEFAULT_NUM_PARTICLES,
            max_particles: DEFAULT_MAX_PARTICLES,
            num_threads: num_cpus::get().max(1),
            mode: UpdateMode::Cpu,
            spawn_extent: DEFAULT_SPAWN_EXTENT,
            partition: PartitionPolicy::Balanced,
            barrier_timeout: Some(Duration::from_secs(5)),
            seed: None,
        }
    }
}

impl SimulationConfig {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_particles(mut self, num_particles: usize) -> Self {
        self.num_particles = num_particles;
        self
    }

    pub fn with_max_particles(mut self, max_particles: usize) -> Self {
        self.max_particles = max_particles;
        self
    }

    /// Thread count is clamped to at least one worker.
    pub fn with_threads(mut self, num_threads: usize) -> Self {
        self.num_threads = num_threads.max(1);
        self
    }

    pub fn with_mode(mut self, mode: UpdateMode) -> Self {
        self.mode = mode;
        self
    }

    pub fn with_spawn_extent(mut self, extent: f32) -> Self {
        self.spawn_extent = extent;
        self
    }

    pub fn with_partition(mut self, partition: PartitionPolicy) -> Self {
        self.partition = partition;
        self
    }

    pub fn with_barrier_timeout(mut self, timeout: Option<Duration>) -> Self {
        self.barrier_timeout = timeout;
        self
    }

    pub fn with_seed(mut self, seed: u64) -> Self {
        self.seed = Some(seed);
        self
    }

    /// Applies `ATTRACTOR_*` environment overrides on top of `self`.
    ///
    /// Values that fail to parse are reported and ignored.
    pub fn with_env_overrides(self) -> Self {
        self.with_overrides(|key| std::env::var(key).ok())
    }

    fn with_overrides(mut self, lookup: impl Fn(&str) -> Option<String>) -> Self {
        if let Some(raw) = lookup("ATTRACTOR_PARTICLES") {
            match raw.trim().parse::<usize>() {
                Ok(n) => self.num_particles = n,
                Err(_) => log::warn!("ignoring ATTRACTOR_PARTICLES={raw:?}: not a count"),
            }
        }
        if let Some(raw) = lookup("ATTRACTOR_THREADS") {
            match raw.trim().parse::<usize>() {
                Ok(n) => self = self.with_threads(n),
                Err(_) => log::warn!("ignoring ATTRACTOR_THREADS={raw:?}: not a count"),
            }
        }
        if let Some(raw) = lookup("ATTRACTOR_MODE") {
            match raw.trim().parse::<UpdateMode>() {
                Ok(mode) => self.mode = mode,
                Err(_) => log::warn!("ignoring ATTRACTOR_MODE={raw:?}: expected cpu or gpu"),
            }
        }
        if let Some(raw) = lookup("ATTRACTOR_SEED") {
            match raw.trim().parse::<u64>() {
                Ok(seed) => self.seed = Some(seed),
                Err(_) => log::warn!("ignoring ATTRACTOR_SEED={raw:?}: not an integer"),
            }
        }
        self
    }
}

/// Window shell configuration.
#[derive(Debug, Clone)]
pub struct AppConfig {
    pub title: String,
    pub width: u32,
    pub height: u32,
    pub simulation: SimulationConfig,
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            title: "Attractor".to_string(),
            width: 1280,
            height: 800,
            simulation: SimulationConfig::default(),
        }
    }
}

impl AppConfig {
    pub fn with_simulation(mut self, simulation: SimulationConfig) -> Self {
        self.simulation = simulation;
        self
    }

    pub fn with_size(mut self, width: u32, height: u32) -> Self {
        self.width = width;
        self.height = height;
        self
    }
}
