//! Tests that need a real adapter. Each one returns early when no device is
//! available so the suite still passes on machines without a GPU.

use attractor::config::DEFAULT_MAX_PARTICLES;
use attractor::simulation::params::ForceParams;
use attractor::simulation::particle::{integrate_slice, Particle};
use std::time::Duration;

use attractor::simulation::{
    EngineState, GpuContext, MirrorSlot, ParticleBuffer, PartitionPolicy, SwitchPhase,
};
use attractor::{SimulationConfig, SimulationEngine, SimulationError, UpdateMode};
use rand::{rngs::StdRng, Rng, SeedableRng};

fn gpu() -> Option<GpuContext> {
    match pollster::block_on(GpuContext::headless()) {
        Ok(gpu) => Some(gpu),
        Err(e) => {
            eprintln!("skipping GPU test: {e}");
            None
        }
    }
}

fn engine(gpu: GpuContext, num_particles: usize, mode: UpdateMode) -> SimulationEngine {
    let config = SimulationConfig::new()
        .with_particles(num_particles)
        .with_threads(3)
        .with_mode(mode)
        .with_seed(7);
    SimulationEngine::new(gpu, config).unwrap()
}

fn fixture(n: usize, seed: u64) -> Vec<Particle> {
    let mut rng = StdRng::seed_from_u64(seed);
    (0..n)
        .map(|_| {
            Particle::new(
                [rng.random_range(-500.0..500.0), rng.random_range(-500.0..500.0)],
                [rng.random_range(-2.0..2.0), rng.random_range(-2.0..2.0)],
            )
        })
        .collect()
}

fn assert_close(actual: &[Particle], expected: &[Particle]) {
    assert_eq!(actual.len(), expected.len());
    let close = |a: f32, b: f32| (a - b).abs() <= 1e-5 * b.abs().max(1.0);
    for (i, (a, e)) in actual.iter().zip(expected).enumerate() {
        let fields = a.position.iter().chain(&a.velocity).zip(e.position.iter().chain(&e.velocity));
        for (x, y) in fields {
            assert!(close(*x, *y), "particle {i}: {a:?} vs {e:?}");
        }
    }
}

#[test]
fn reset_scatters_particles_at_rest_into_both_mirrors() {
    let Some(gpu) = gpu() else { return };
    let mut rng = StdRng::seed_from_u64(11);
    let mut buffer = ParticleBuffer::new(&gpu, 0, DEFAULT_MAX_PARTICLES).unwrap();

    for n in [0, 1, 1024, 1_048_576] {
        buffer.allocate(&gpu, n).unwrap();
        buffer.reset(&gpu, n, 1000.0, &mut rng).unwrap();
        assert_eq!(buffer.len(), n);
        assert_eq!(buffer.current(), MirrorSlot::A);

        let host = buffer.host_particles().unwrap().to_vec();
        assert_eq!(host.len(), n);
        assert!(host.iter().all(|p| p.velocity == [0.0, 0.0]));
        assert!(host
            .iter()
            .all(|p| p.position.iter().all(|c| (-500.0..500.0).contains(c))));

        assert_eq!(buffer.read_mirror(&gpu, MirrorSlot::A).unwrap(), host);
        assert_eq!(buffer.read_mirror(&gpu, MirrorSlot::B).unwrap(), host);
    }
}

#[test]
fn oversized_allocation_keeps_previous_storage() {
    let Some(gpu) = gpu() else { return };
    let mut buffer = ParticleBuffer::new(&gpu, 8, 100).unwrap();
    let generation = buffer.generation();

    let err = buffer.allocate(&gpu, 101).unwrap_err();
    assert!(matches!(err, SimulationError::Allocation { requested: 101, .. }));
    assert_eq!(buffer.len(), 8);
    assert_eq!(buffer.generation(), generation);
}

#[test]
fn cpu_and_gpu_steps_agree() {
    let Some(gpu) = gpu() else { return };
    let particles = fixture(4_096, 21);
    let mut engine = engine(gpu, particles.len(), UpdateMode::Cpu);
    engine.params_mut().target = [40.0, -25.0];
    engine.params_mut().attraction_active = true;

    engine.load_particles(&particles).unwrap();
    assert!(engine.step().unwrap().ran_physics);
    let cpu = engine.host_particles().unwrap().to_vec();
    assert_eq!(engine.read_back_current().unwrap(), cpu);

    engine.load_particles(&particles).unwrap();
    engine.set_mode(UpdateMode::Gpu).unwrap();
    let report = engine.step().unwrap();
    assert_eq!(report.mode, UpdateMode::Gpu);
    assert_eq!(engine.current_mirror(), MirrorSlot::B);
    let gpu_result = engine.read_back_current().unwrap();

    assert_close(&gpu_result, &cpu);
}

#[test]
fn mode_switch_round_trip_preserves_state() {
    let Some(gpu) = gpu() else { return };
    let mut engine = engine(gpu, 2_048, UpdateMode::Gpu);
    engine.params_mut().attraction_active = true;
    engine.load_particles(&fixture(2_048, 31)).unwrap();
    for _ in 0..3 {
        engine.step().unwrap();
    }
    assert_eq!(engine.current_mirror(), MirrorSlot::B);
    let before = engine.read_back_current().unwrap();

    engine.set_mode(UpdateMode::Cpu).unwrap();
    assert_eq!(engine.mode(), UpdateMode::Cpu);
    assert_eq!(engine.switch_phase(), SwitchPhase::Completed);
    assert!(!engine.context().suspended);
    assert_eq!(engine.current_mirror(), MirrorSlot::A);
    assert_eq!(engine.host_particles().unwrap(), before.as_slice());
    assert_eq!(engine.read_back_current().unwrap(), before);

    engine.set_mode(UpdateMode::Gpu).unwrap();
    assert_eq!(engine.read_back_current().unwrap(), before);

    engine.step().unwrap();
    let mut expected = before;
    integrate_slice(&mut expected, &engine.params().forces());
    assert_close(&engine.read_back_current().unwrap(), &expected);
}

#[test]
fn switching_to_the_active_mode_is_a_no_op() {
    let Some(gpu) = gpu() else { return };
    let mut engine = engine(gpu, 64, UpdateMode::Cpu);
    engine.set_mode(UpdateMode::Cpu).unwrap();
    assert_eq!(engine.switch_phase(), SwitchPhase::Stable);
}

#[test]
fn doubling_then_halving_restores_the_count() {
    let Some(gpu) = gpu() else { return };
    let config = SimulationConfig::new()
        .with_particles(1_000)
        .with_max_particles(2_500)
        .with_seed(3);
    let mut engine = SimulationEngine::new(gpu, config).unwrap();

    engine.mul2().unwrap();
    assert_eq!(engine.num_particles(), 2_000);
    engine.div2().unwrap();
    assert_eq!(engine.num_particles(), 1_000);

    engine.set_num_particles(1_001).unwrap();
    engine.div2().unwrap();
    assert_eq!(engine.num_particles(), 501);

    engine.set_num_particles(2_000).unwrap();
    let err = engine.mul2().unwrap_err();
    assert!(matches!(err, SimulationError::Allocation { requested: 4_000, .. }));
    assert_eq!(engine.num_particles(), 2_000);
    assert_eq!(engine.read_back_current().unwrap().len(), 2_000);
}

#[test]
fn paused_engine_skips_physics() {
    let Some(gpu) = gpu() else { return };
    let mut engine = engine(gpu, 256, UpdateMode::Gpu);
    let before = engine.read_back_current().unwrap();

    engine.set_paused(true);
    let report = engine.step().unwrap();
    assert!(!report.ran_physics);
    assert_eq!(engine.read_back_current().unwrap(), before);
}

#[test]
fn empty_population_steps_on_both_backends() {
    let Some(gpu) = gpu() else { return };
    let mut engine = engine(gpu, 0, UpdateMode::Cpu);
    engine.step().unwrap();
    engine.set_mode(UpdateMode::Gpu).unwrap();
    engine.step().unwrap();
    assert!(engine.read_back_current().unwrap().is_empty());
}

#[test]
fn frame_writes_uniforms_and_hands_over_the_current_mirror() {
    let Some(gpu) = gpu() else { return };
    let mut engine = engine(gpu, 128, UpdateMode::Gpu);

    let (report, (drawn, slot)) = engine
        .frame([640.0, -400.0], |frame| (frame.num_particles(), frame.slot))
        .unwrap();

    assert!(report.ran_physics);
    assert_eq!(drawn, 128);
    assert_eq!(slot, engine.current_mirror());
    assert_eq!(engine.state(), EngineState::Idle);

    let uniforms = engine.uniforms().content().unwrap();
    assert_eq!(uniforms.half_size, [640.0, -400.0]);
    assert_eq!(uniforms.power, engine.params().power);
}

#[test]
fn forces_snapshot_tracks_parameter_edits() {
    let Some(gpu) = gpu() else { return };
    let mut engine = engine(gpu, 16, UpdateMode::Cpu);
    engine.params_mut().attraction_active = true;
    engine.params_mut().damping = 0.5;

    let forces: ForceParams = engine.params().forces();
    assert!(forces.attraction_active);
    assert_eq!(forces.damping, 0.5);
}

#[test]
fn engine_recovers_after_a_barrier_timeout() {
    let Some(gpu) = gpu() else { return };
    let config = SimulationConfig::new()
        .with_particles(2_000_000)
        .with_threads(1)
        .with_barrier_timeout(Some(Duration::from_nanos(1)))
        .with_seed(13);
    let mut engine = SimulationEngine::new(gpu, config).unwrap();
    engine.params_mut().attraction_active = true;
    let before = engine.host_particles().unwrap().to_vec();

    match engine.step() {
        Err(SimulationError::WorkerTimeout { expected: 1, .. }) | Ok(_) => {}
        Err(other) => panic!("unexpected step error: {other}"),
    }
    std::thread::sleep(Duration::from_secs(2));

    // The finished dispatch is collected before the switch migrates state.
    engine.set_mode(UpdateMode::Gpu).unwrap();
    assert_eq!(engine.mode(), UpdateMode::Gpu);
    let mut expected = before;
    integrate_slice(&mut expected, &engine.params().forces());
    assert_eq!(engine.read_back_current().unwrap(), expected);
    assert!(engine.step().unwrap().ran_physics);

    engine.set_mode(UpdateMode::Cpu).unwrap();
    engine.set_barrier_timeout(Some(Duration::from_secs(30)));
    assert!(engine.step().unwrap().ran_physics);
    engine.set_thread_count(2).unwrap();
    engine.reset().unwrap();
}

#[test]
fn truncate_partition_is_selectable_from_the_config() {
    let Some(gpu) = gpu() else { return };
    let config = SimulationConfig::new()
        .with_particles(10)
        .with_threads(3)
        .with_partition(PartitionPolicy::Truncate)
        .with_seed(17);
    let mut engine = SimulationEngine::new(gpu, config).unwrap();
    engine.params_mut().attraction_active = true;

    let particles = fixture(10, 41);
    engine.load_particles(&particles).unwrap();
    engine.step().unwrap();

    let mut expected = particles.clone();
    integrate_slice(&mut expected[..9], &engine.params().forces());
    assert_eq!(engine.host_particles().unwrap(), expected.as_slice());
    assert_eq!(engine.read_back_current().unwrap()[9], particles[9]);
}

#[test]
fn spawn_extent_bounds_the_scatter() {
    let Some(gpu) = gpu() else { return };
    let config = SimulationConfig::new()
        .with_particles(4_096)
        .with_spawn_extent(10.0)
        .with_seed(19);
    let mut engine = SimulationEngine::new(gpu, config).unwrap();
    engine.reset().unwrap();

    let host = engine.host_particles().unwrap();
    assert!(host
        .iter()
        .all(|p| p.position.iter().all(|c| (-5.0..5.0).contains(c))));
}

#[test]
fn switching_backends_clears_the_timings() {
    let Some(gpu) = gpu() else { return };
    let mut engine = engine(gpu, 512, UpdateMode::Cpu);
    engine.step().unwrap();
    assert_eq!(engine.timings().physics_history_ms().len(), 1);

    engine.set_mode(UpdateMode::Gpu).unwrap();
    assert!(engine.timings().physics_history_ms().is_empty());
    assert_eq!(engine.timings().average_physics(), Duration::ZERO);
}

#[test]
fn device_keeps_the_adapter_texture_limit() {
    let instance = wgpu::Instance::new(&wgpu::InstanceDescriptor::default());
    let Ok(adapter) = pollster::block_on(instance.request_adapter(&wgpu::RequestAdapterOptions::default()))
    else {
        eprintln!("skipping GPU test: no adapter");
        return;
    };
    let gpu = pollster::block_on(GpuContext::request_device(&adapter)).unwrap();
    assert_eq!(
        gpu.device().limits().max_texture_dimension_2d,
        adapter.limits().max_texture_dimension_2d
    );
}
