use std::sync::Arc;
use std::time::Duration;

use attractor::simulation::buffer::ParticleArray;
use attractor::simulation::params::ForceParams;
use attractor::simulation::particle::{integrate_slice, Particle};
use attractor::simulation::{CpuWorkerPool, PartitionPolicy, StepSnapshot};
use attractor::SimulationError;
use rand::{rngs::StdRng, Rng, SeedableRng};

const WAIT: Option<Duration> = Some(Duration::from_secs(10));

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

fn forces() -> ForceParams {
    ForceParams {
        target: [12.0, -7.0],
        power: 10.0,
        damping: 0.998,
        attraction_active: true,
    }
}

fn serial_step(particles: &[Particle]) -> Vec<Particle> {
    let mut expected = particles.to_vec();
    integrate_slice(&mut expected, &forces());
    expected
}

fn pool_step(pool: &mut CpuWorkerPool, particles: &[Particle]) -> Vec<Particle> {
    let mut array = Arc::new(ParticleArray::from_particles(particles));
    pool.dispatch(StepSnapshot {
        particles: Arc::clone(&array),
        num_particles: particles.len(),
        forces: forces(),
    })
    .unwrap();
    pool.barrier_wait(WAIT).unwrap();

    Arc::get_mut(&mut array)
        .expect("workers still hold the particle array after the barrier")
        .as_slice()
        .to_vec()
}

#[test]
fn pool_step_matches_serial_integration() {
    let particles = fixture(10_007, 1);
    let mut pool = CpuWorkerPool::new(4, PartitionPolicy::Balanced).unwrap();
    assert_eq!(pool_step(&mut pool, &particles), serial_step(&particles));
}

#[test]
fn barrier_counts_every_worker_exactly_once() {
    let particles = fixture(1_000, 2);
    let mut pool = CpuWorkerPool::new(6, PartitionPolicy::Balanced).unwrap();

    for _ in 0..5 {
        pool_step(&mut pool, &particles);
        assert_eq!(pool.completed_count(), 6);
        assert!(!pool.is_busy());
    }
}

#[test]
fn truncate_policy_leaves_the_tail_untouched() {
    let particles = fixture(10, 3);
    let mut pool = CpuWorkerPool::new(3, PartitionPolicy::Truncate).unwrap();
    let stepped = pool_step(&mut pool, &particles);
    let expected = serial_step(&particles);

    assert_eq!(stepped[..9], expected[..9]);
    assert_eq!(stepped[9], particles[9]);
}

#[test]
fn resized_pool_still_covers_every_particle() {
    let particles = fixture(4_099, 4);
    let expected = serial_step(&particles);
    let mut pool = CpuWorkerPool::new(2, PartitionPolicy::Balanced).unwrap();

    for threads in [5, 1, 3] {
        pool.set_thread_count(threads).unwrap();
        assert_eq!(pool.num_threads(), threads);
        assert_eq!(pool_step(&mut pool, &particles), expected);
        assert_eq!(pool.completed_count(), threads);
    }
}

#[test]
fn resize_during_dispatch_is_rejected() {
    let particles = fixture(100_000, 5);
    let array = Arc::new(ParticleArray::from_particles(&particles));
    let mut pool = CpuWorkerPool::new(2, PartitionPolicy::Balanced).unwrap();

    pool.dispatch(StepSnapshot {
        particles: array,
        num_particles: particles.len(),
        forces: forces(),
    })
    .unwrap();

    assert!(matches!(pool.set_thread_count(4), Err(SimulationError::PoolBusy)));
    pool.barrier_wait(WAIT).unwrap();
    pool.set_thread_count(4).unwrap();
    assert_eq!(pool.num_threads(), 4);
}

#[test]
fn empty_pool_returns_from_the_barrier() {
    let particles = fixture(16, 6);
    let mut pool = CpuWorkerPool::new(0, PartitionPolicy::Balanced).unwrap();
    assert_eq!(pool_step(&mut pool, &particles), particles);
}

#[test]
fn timed_out_barrier_can_be_retried() {
    let particles = fixture(2_000_000, 7);
    let mut array = Arc::new(ParticleArray::from_particles(&particles));
    let mut pool = CpuWorkerPool::new(1, PartitionPolicy::Balanced).unwrap();

    pool.dispatch(StepSnapshot {
        particles: Arc::clone(&array),
        num_particles: particles.len(),
        forces: forces(),
    })
    .unwrap();

    match pool.barrier_wait(Some(Duration::from_nanos(1))) {
        Err(SimulationError::WorkerTimeout { expected: 1, .. }) => {
            assert!(pool.is_busy());
            assert!(matches!(
                pool.dispatch(StepSnapshot {
                    particles: Arc::clone(&array),
                    num_particles: particles.len(),
                    forces: forces(),
                }),
                Err(SimulationError::PoolBusy)
            ));
        }
        Ok(()) => {}
        Err(other) => panic!("unexpected barrier error: {other}"),
    }

    pool.barrier_wait(WAIT).unwrap();
    assert!(!pool.is_busy());
    assert_eq!(Arc::get_mut(&mut array).unwrap().as_slice(), serial_step(&particles).as_slice());
}

#[test]
fn policy_change_applies_to_the_next_dispatch() {
    let particles = fixture(10, 8);
    let expected = serial_step(&particles);
    let mut pool = CpuWorkerPool::new(3, PartitionPolicy::Balanced).unwrap();
    assert_eq!(pool.policy(), PartitionPolicy::Balanced);

    pool.set_policy(PartitionPolicy::Truncate).unwrap();
    assert_eq!(pool.policy(), PartitionPolicy::Truncate);
    let stepped = pool_step(&mut pool, &particles);
    assert_eq!(stepped[9], particles[9]);

    pool.set_policy(PartitionPolicy::Balanced).unwrap();
    assert_eq!(pool_step(&mut pool, &particles), expected);
}
