//! The per-tick step state machine.
//!
//! Each animation tick runs physics on the active backend and then hands the
//! authoritative mirror to a render consumer:
//!
//! ```text
//! Idle -> SteppingCpu | SteppingGpu -> Rendering -> Idle
//! ```
//!
//! Everything a step reads lives in [`StepContext`]; the control panel edits
//! it between ticks.

use std::time::{Duration, Instant};

use rand::rngs::StdRng;
use rand::SeedableRng;

use super::buffer::{MirrorSlot, ParticleBuffer};
use super::cpu::{CpuWorkerPool, StepSnapshot};
use super::gpu::{ComputeKernel, GpuContext};
use super::mode_switch::{ModeSwitch, SwitchPhase};
use super::params::{FrameUniforms, SimulationParameters, UpdateMode};
use super::particle::Particle;
use crate::config::SimulationConfig;
use crate::error::{SimulationError, SimulationResult};
use crate::performance::StepTimings;
use crate::wgpu_utils::UniformBuffer;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum EngineState {
    #[default]
    Idle,
    SteppingCpu,
    SteppingGpu,
    Rendering,
}

/// Inputs of a step. Owned by the engine, edited by the control panel.
#[derive(Debug, Clone, Default)]
pub struct StepContext {
    pub params: SimulationParameters,
    pub mode: UpdateMode,
    pub paused: bool,
    /// Set while a mode switch migrates state; no step may run.
    pub suspended: bool,
}

impl StepContext {
    pub fn new(mode: UpdateMode) -> Self {
        Self {
            mode,
            ..Default::default()
        }
    }

    pub fn runs_physics(&self) -> bool {
        !self.paused && !self.suspended
    }

    /// Fails with [`SimulationError::UpdatesSuspended`] while a mode switch
    /// owns the particle state.
    pub fn ensure_not_suspended(&self) -> SimulationResult<()> {
        if self.suspended {
            return Err(SimulationError::UpdatesSuspended);
        }
        Ok(())
    }
}

/// What one tick did.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct StepReport {
    pub ran_physics: bool,
    pub mode: UpdateMode,
    pub physics_time: Duration,
    pub render_time: Duration,
}

/// Everything a render consumer needs to draw the current state.
pub struct FrameView<'a> {
    pub gpu: &'a GpuContext,
    pub particles: &'a ParticleBuffer,
    pub uniforms: &'a UniformBuffer<FrameUniforms>,
    /// The mirror holding the state to draw.
    pub slot: MirrorSlot,
}

impl FrameView<'_> {
    pub fn num_particles(&self) -> usize {
        self.particles.len()
    }
}

pub struct SimulationEngine {
    gpu: GpuContext,
    particles: ParticleBuffer,
    kernel: ComputeKernel,
    uniforms: UniformBuffer<FrameUniforms>,
    pool: CpuWorkerPool,
    context: StepContext,
    mode_switch: ModeSwitch,
    state: EngineState,
    timings: StepTimings,
    half_size: [f32; 2],
    config: SimulationConfig,
    rng: StdRng,
}

impl SimulationEngine {
    pub fn new(gpu: GpuContext, config: SimulationConfig) -> SimulationResult<Self> {
        let mut rng = match config.seed {
            Some(seed) => StdRng::seed_from_u64(seed),
            None => StdRng::from_os_rng(),
        };

        let mut particles = ParticleBuffer::new(&gpu, config.num_particles, config.max_particles)?;
        particles.reset(&gpu, config.num_particles, config.spawn_extent, &mut rng)?;

        let kernel = ComputeKernel::new(gpu.device());
        let uniforms = UniformBuffer::new(gpu.device());
        let pool = CpuWorkerPool::new(config.num_threads.max(1), config.partition)?;

        log::info!(
            "Simulation engine ready: {} particles (max {}), {} workers, {} mode",
            particles.len(),
            particles.max_particles(),
            pool.num_threads(),
            config.mode
        );

        Ok(Self {
            gpu,
            particles,
            kernel,
            uniforms,
            pool,
            context: StepContext::new(config.mode),
            mode_switch: ModeSwitch::new(),
            state: EngineState::Idle,
            timings: StepTimings::default(),
            half_size: [0.0, 0.0],
            config,
            rng,
        })
    }

    /// Runs the physics half of a tick on the active backend.
    ///
    /// Paused or suspended ticks skip physics and report `ran_physics: false`.
    pub fn step(&mut self) -> SimulationResult<StepReport> {
        let mode = self.context.mode;
        if self.context.suspended {
            log::warn!("Skipping tick while a mode switch is in progress");
        }
        if !self.context.runs_physics() {
            return Ok(StepReport {
                ran_physics: false,
                mode,
                physics_time: Duration::ZERO,
                render_time: Duration::ZERO,
            });
        }

        let started = Instant::now();
        let result = match mode {
            UpdateMode::Cpu => self.step_cpu(),
            UpdateMode::Gpu => self.step_gpu(),
        };
        self.state = EngineState::Idle;
        result?;

        let physics_time = started.elapsed();
        self.timings.record_physics(physics_time);

        Ok(StepReport {
            ran_physics: true,
            mode,
            physics_time,
            render_time: Duration::ZERO,
        })
    }

    fn step_cpu(&mut self) -> SimulationResult<()> {
        self.state = EngineState::SteppingCpu;
        self.settle_pool()?;
        if self.particles.is_empty() {
            return Ok(());
        }

        self.pool.dispatch(StepSnapshot {
            particles: self.particles.share_host(),
            num_particles: self.particles.len(),
            forces: self.context.params.forces(),
        })?;
        self.settle_pool()
    }

    /// Waits out an outstanding dispatch and publishes its result to mirror
    /// A. A dispatch whose wait timed out stays outstanding until this
    /// succeeds.
    fn settle_pool(&mut self) -> SimulationResult<()> {
        if !self.pool.is_busy() {
            return Ok(());
        }
        self.pool.barrier_wait(self.config.barrier_timeout)?;

        self.particles.set_parity(MirrorSlot::A);
        self.particles.upload_host(&self.gpu, MirrorSlot::A)
    }

    fn step_gpu(&mut self) -> SimulationResult<()> {
        self.state = EngineState::SteppingGpu;
        if self.particles.is_empty() {
            return Ok(());
        }

        self.uniforms
            .update_content(self.gpu.queue(), self.context.params.frame_uniforms(self.half_size));

        let device = self.gpu.device();
        self.kernel.bind(device, &self.particles, &self.uniforms);

        let mut encoder = device.create_command_encoder(&wgpu::CommandEncoderDescriptor {
            label: Some("Particle Step Encoder"),
        });
        self.kernel.encode(
            &mut encoder,
            self.particles.current(),
            self.particles.len(),
            device.limits().max_compute_workgroups_per_dimension,
        );
        self.gpu.queue().submit(std::iter::once(encoder.finish()));

        self.gpu.wait_idle()?;
        self.particles.swap_parity();
        Ok(())
    }

    /// Writes this tick's uniform record. `half_size` is half the canvas in
    /// pixels.
    pub fn write_frame_uniforms(&mut self, half_size: [f32; 2]) {
        self.half_size = half_size;
        self.uniforms
            .update_content(self.gpu.queue(), self.context.params.frame_uniforms(half_size));
    }

    /// Hands the current mirror to `render` and records how long it took.
    pub fn render_with<R>(&mut self, render: impl FnOnce(FrameView<'_>) -> R) -> (R, Duration) {
        self.state = EngineState::Rendering;
        let started = Instant::now();

        let output = render(FrameView {
            gpu: &self.gpu,
            particles: &self.particles,
            uniforms: &self.uniforms,
            slot: self.particles.current(),
        });

        let render_time = started.elapsed();
        self.timings.record_render(render_time);
        self.state = EngineState::Idle;
        (output, render_time)
    }

    /// One full tick: physics, uniforms, render.
    pub fn frame<R>(
        &mut self,
        half_size: [f32; 2],
        render: impl FnOnce(FrameView<'_>) -> R,
    ) -> SimulationResult<(StepReport, R)> {
        let mut report = self.step()?;
        self.write_frame_uniforms(half_size);
        let (output, render_time) = self.render_with(render);
        report.render_time = render_time;
        Ok((report, output))
    }

    fn ensure_idle(&mut self) -> SimulationResult<()> {
        self.context.ensure_not_suspended()?;
        self.settle_pool()
    }

    /// Reallocates for `num_particles` and scatters a fresh population.
    ///
    /// On failure the previous particles stay in place.
    pub fn set_num_particles(&mut self, num_particles: usize) -> SimulationResult<()> {
        self.ensure_idle()?;
        self.particles
            .reset(&self.gpu, num_particles, self.config.spawn_extent, &mut self.rng)?;
        log::info!("Reset {num_particles} particles");
        Ok(())
    }

    pub fn mul2(&mut self) -> SimulationResult<()> {
        self.set_num_particles(self.num_particles().saturating_mul(2))
    }

    /// Halves the count, rounding half up.
    pub fn div2(&mut self) -> SimulationResult<()> {
        self.set_num_particles(self.num_particles().div_ceil(2))
    }

    pub fn reset(&mut self) -> SimulationResult<()> {
        self.set_num_particles(self.num_particles())
    }

    /// Replaces the particle state with `particles`, at the same count or a
    /// new one.
    pub fn load_particles(&mut self, particles: &[Particle]) -> SimulationResult<()> {
        self.ensure_idle()?;
        if particles.len() != self.particles.len() {
            self.particles.allocate(&self.gpu, particles.len())?;
        }
        self.particles.copy_into_host(particles)?;
        self.particles.upload_all(&self.gpu)?;
        self.particles.set_parity(MirrorSlot::A);
        Ok(())
    }

    /// Switches backend, migrating state first. A no-op for the active mode.
    pub fn set_mode(&mut self, mode: UpdateMode) -> SimulationResult<()> {
        self.ensure_idle()?;
        let switched = self
            .mode_switch
            .run(mode, &self.gpu, &mut self.particles, &mut self.context)?;
        if switched {
            self.timings.clear();
        }
        Ok(())
    }

    /// Clamped to at least one worker.
    pub fn set_thread_count(&mut self, num_threads: usize) -> SimulationResult<()> {
        if num_threads == 0 {
            log::warn!("Thread count 0 requested, using 1");
        }
        self.settle_pool()?;
        self.pool.set_thread_count(num_threads.max(1))?;
        self.config.num_threads = self.pool.num_threads();
        Ok(())
    }

    /// `None` waits on the worker barrier forever.
    pub fn set_barrier_timeout(&mut self, timeout: Option<Duration>) {
        self.config.barrier_timeout = timeout;
    }

    pub fn set_paused(&mut self, paused: bool) {
        self.context.paused = paused;
    }

    /// Synchronous copy of the authoritative mirror.
    pub fn read_back_current(&self) -> SimulationResult<Vec<Particle>> {
        self.particles.read_mirror(&self.gpu, self.particles.current())
    }

    /// Host array contents. Only meaningful in CPU mode or after a switch.
    pub fn host_particles(&mut self) -> SimulationResult<&[Particle]> {
        self.particles.host_particles()
    }

    pub fn num_particles(&self) -> usize {
        self.particles.len()
    }

    pub fn max_particles(&self) -> usize {
        self.particles.max_particles()
    }

    pub fn num_threads(&self) -> usize {
        self.pool.num_threads()
    }

    pub fn mode(&self) -> UpdateMode {
        self.context.mode
    }

    pub fn is_paused(&self) -> bool {
        self.context.paused
    }

    pub fn context(&self) -> &StepContext {
        &self.context
    }

    pub fn params(&self) -> &SimulationParameters {
        &self.context.params
    }

    pub fn params_mut(&mut self) -> &mut SimulationParameters {
        &mut self.context.params
    }

    pub fn state(&self) -> EngineState {
        self.state
    }

    pub fn switch_phase(&self) -> SwitchPhase {
        self.mode_switch.phase()
    }

    pub fn timings(&self) -> &StepTimings {
        &self.timings
    }

    pub fn particles(&self) -> &ParticleBuffer {
        &self.particles
    }

    pub fn current_mirror(&self) -> MirrorSlot {
        self.particles.current()
    }

    pub fn uniforms(&self) -> &UniformBuffer<FrameUniforms> {
        &self.uniforms
    }

    pub fn gpu(&self) -> &GpuContext {
        &self.gpu
    }
}
