//! CPU execution path: a fixed set of long-lived worker threads stepping
//! disjoint index ranges of the shared host particle array.
//!
//! ## Synchronisation
//!
//! A dispatch resets the shared completion counter and sends every worker a
//! handle to the same [`StepSnapshot`]. Each worker integrates its partition,
//! drops its snapshot (releasing the host array), then increments the counter.
//! The worker whose increment reaches the worker count publishes the dispatch
//! generation under a mutex and notifies the condition variable the control
//! thread sleeps on in [`CpuWorkerPool::barrier_wait`].

use std::ops::Range;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::mpsc::{self, Receiver, Sender};
use std::sync::{Arc, Condvar, Mutex, MutexGuard, PoisonError};
use std::thread::JoinHandle;
use std::time::Duration;

use super::buffer::ParticleArray;
use super::params::ForceParams;
use super::particle::integrate_slice;
use crate::error::{SimulationError, SimulationResult};

/// How particles are split between workers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum PartitionPolicy {
    /// The first `n % total` workers take one extra particle; every index is
    /// covered.
    #[default]
    Balanced,
    /// Every worker takes `n / total` particles; the remainder past the last
    /// range is never updated.
    Truncate,
}

/// Index range stepped by worker `rank` out of `total`.
pub fn partition(num_particles: usize, rank: usize, total: usize, policy: PartitionPolicy) -> Range<usize> {
    if total == 0 || rank >= total {
        return 0..0;
    }

    let base = num_particles / total;
    match policy {
        PartitionPolicy::Truncate => base * rank..base * (rank + 1),
        PartitionPolicy::Balanced => {
            let extra = num_particles % total;
            let start = base * rank + rank.min(extra);
            let len = base + usize::from(rank < extra);
            start..start + len
        }
    }
}

/// Immutable inputs for one CPU step, shared by every worker.
#[derive(Clone)]
pub struct StepSnapshot {
    pub particles: Arc<ParticleArray>,
    pub num_particles: usize,
    pub forces: ForceParams,
}

enum WorkerMessage {
    Configure {
        rank: usize,
        total: usize,
        policy: PartitionPolicy,
    },
    Step {
        snapshot: StepSnapshot,
        generation: u64,
    },
    Shutdown,
}

struct DispatchSignal {
    completed: AtomicUsize,
    /// Generation of the most recent dispatch every worker finished.
    finished: Mutex<u64>,
    condvar: Condvar,
}

impl DispatchSignal {
    fn new() -> Self {
        Self {
            completed: AtomicUsize::new(0),
            finished: Mutex::new(0),
            condvar: Condvar::new(),
        }
    }

    fn finished(&self) -> MutexGuard<'_, u64> {
        self.finished.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn complete(&self, total: usize, generation: u64) {
        let done = self.completed.fetch_add(1, Ordering::AcqRel) + 1;
        if done == total {
            *self.finished() = generation;
            self.condvar.notify_all();
        }
    }
}

struct Worker {
    sender: Sender<WorkerMessage>,
    handle: Option<JoinHandle<()>>,
}

impl Worker {
    fn spawn(rank: usize, signal: Arc<DispatchSignal>) -> SimulationResult<Self> {
        let (sender, receiver) = mpsc::channel();
        let handle = std::thread::Builder::new()
            .name(format!("attractor-worker-{rank}"))
            .spawn(move || worker_loop(receiver, signal))?;

        Ok(Self {
            sender,
            handle: Some(handle),
        })
    }

    fn send(&self, message: WorkerMessage) {
        if self.sender.send(message).is_err() {
            log::warn!("Worker thread exited unexpectedly; message dropped");
        }
    }

    fn shutdown(mut self) {
        self.send(WorkerMessage::Shutdown);
        if let Some(handle) = self.handle.take() {
            if handle.join().is_err() {
                log::error!("Worker thread panicked");
            }
        }
    }
}

fn worker_loop(receiver: Receiver<WorkerMessage>, signal: Arc<DispatchSignal>) {
    let mut rank = 0;
    let mut total = 0;
    let mut policy = PartitionPolicy::default();

    while let Ok(message) = receiver.recv() {
        match message {
            WorkerMessage::Configure {
                rank: new_rank,
                total: new_total,
                policy: new_policy,
            } => {
                rank = new_rank;
                total = new_total;
                policy = new_policy;
            }
            WorkerMessage::Step {
                snapshot,
                generation,
            } => {
                let count = snapshot.num_particles.min(snapshot.particles.len());
                let range = partition(count, rank, total, policy);
                // SAFETY: ranks are unique and `partition` ranges for distinct
                // ranks never overlap; the control thread does not touch the
                // array until every worker has signalled completion.
                let particles = unsafe { snapshot.particles.partition_mut(range) };
                integrate_slice(particles, &snapshot.forces);

                // Release the host array before signalling.
                drop(snapshot);
                signal.complete(total, generation);
            }
            WorkerMessage::Shutdown => break,
        }
    }
}

/// Fixed-size pool of CPU workers with a completion barrier.
pub struct CpuWorkerPool {
    workers: Vec<Worker>,
    signal: Arc<DispatchSignal>,
    policy: PartitionPolicy,
    generation: u64,
    outstanding: Option<u64>,
}

impl CpuWorkerPool {
    pub fn new(num_threads: usize, policy: PartitionPolicy) -> SimulationResult<Self> {
        let mut pool = Self {
            workers: Vec::new(),
            signal: Arc::new(DispatchSignal::new()),
            policy,
            generation: 0,
            outstanding: None,
        };
        pool.set_thread_count(num_threads)?;
        Ok(pool)
    }

    pub fn num_threads(&self) -> usize {
        self.workers.len()
    }

    pub fn policy(&self) -> PartitionPolicy {
        self.policy
    }

    /// Whether a dispatch has not yet been waited on.
    pub fn is_busy(&self) -> bool {
        self.outstanding.is_some()
    }

    /// Workers that finished the current dispatch.
    pub fn completed_count(&self) -> usize {
        self.signal.completed.load(Ordering::Acquire)
    }

    /// Spawns or shuts down workers until exactly `num_threads` remain, then
    /// tells every worker its rank and the new total.
    ///
    /// If a spawn fails the workers that exist are reconfigured as a smaller
    /// pool before the error is returned.
    pub fn set_thread_count(&mut self, num_threads: usize) -> SimulationResult<()> {
        self.resize_with(num_threads, Worker::spawn)
    }

    fn resize_with(
        &mut self,
        num_threads: usize,
        mut spawn: impl FnMut(usize, Arc<DispatchSignal>) -> SimulationResult<Worker>,
    ) -> SimulationResult<()> {
        if self.is_busy() {
            return Err(SimulationError::PoolBusy);
        }

        while self.workers.len() > num_threads {
            if let Some(worker) = self.workers.pop() {
                worker.shutdown();
            }
        }
        while self.workers.len() < num_threads {
            match spawn(self.workers.len(), Arc::clone(&self.signal)) {
                Ok(worker) => self.workers.push(worker),
                Err(error) => {
                    // Keep whatever did spawn, with consistent ranks.
                    self.configure_workers();
                    log::error!(
                        "Worker spawn failed, pool left at {} threads: {error}",
                        self.workers.len()
                    );
                    return Err(error);
                }
            }
        }

        self.configure_workers();
        log::info!("Worker pool running {num_threads} threads");
        Ok(())
    }

    /// Changes how particles are split. Takes effect on the next dispatch.
    pub fn set_policy(&mut self, policy: PartitionPolicy) -> SimulationResult<()> {
        if self.is_busy() {
            return Err(SimulationError::PoolBusy);
        }
        self.policy = policy;
        self.configure_workers();
        Ok(())
    }

    fn configure_workers(&self) {
        let total = self.workers.len();
        for (rank, worker) in self.workers.iter().enumerate() {
            worker.send(WorkerMessage::Configure {
                rank,
                total,
                policy: self.policy,
            });
        }
    }

    /// Hands `snapshot` to every worker and returns without waiting.
    pub fn dispatch(&mut self, snapshot: StepSnapshot) -> SimulationResult<()> {
        if self.is_busy() {
            return Err(SimulationError::PoolBusy);
        }

        self.generation += 1;
        self.signal.completed.store(0, Ordering::Release);
        self.outstanding = Some(self.generation);

        log::debug!(
            "Dispatching {} particles to {} workers",
            snapshot.num_particles,
            self.workers.len()
        );

        for worker in &self.workers {
            worker.send(WorkerMessage::Step {
                snapshot: snapshot.clone(),
                generation: self.generation,
            });
        }
        Ok(())
    }

    /// Blocks until every worker has finished the outstanding dispatch.
    ///
    /// With `timeout == None` a worker that never finishes blocks forever.
    /// After a timeout the dispatch stays outstanding and the wait can be
    /// retried.
    pub fn barrier_wait(&mut self, timeout: Option<Duration>) -> SimulationResult<()> {
        let Some(generation) = self.outstanding else {
            return Ok(());
        };
        if self.workers.is_empty() {
            self.outstanding = None;
            return Ok(());
        }

        let finished = self.wait_for_generation(generation, timeout);
        if !finished {
            return Err(SimulationError::WorkerTimeout {
                completed: self.completed_count(),
                expected: self.workers.len(),
                timeout: timeout.unwrap_or_default(),
            });
        }

        self.outstanding = None;
        Ok(())
    }

    fn wait_for_generation(&self, generation: u64, timeout: Option<Duration>) -> bool {
        let guard = self.signal.finished();
        let pending = |finished: &mut u64| *finished < generation;

        let guard = match timeout {
            None => self
                .signal
                .condvar
                .wait_while(guard, pending)
                .unwrap_or_else(PoisonError::into_inner),
            Some(timeout) => {
                self.signal
                    .condvar
                    .wait_timeout_while(guard, timeout, pending)
                    .unwrap_or_else(PoisonError::into_inner)
                    .0
            }
        };
        *guard >= generation
    }
}

impl Drop for CpuWorkerPool {
    fn drop(&mut self) {
        for worker in self.workers.drain(..) {
            worker.shutdown();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::simulation::particle::Particle;

    fn ranges(n: usize, total: usize, policy: PartitionPolicy) -> Vec<Range<usize>> {
        (0..total).map(|rank| partition(n, rank, total, policy)).collect()
    }

    #[test]
    fn even_split_is_identical_for_both_policies() {
        let expected = vec![0..25, 25..50, 50..75, 75..100];
        assert_eq!(ranges(100, 4, PartitionPolicy::Truncate), expected);
        assert_eq!(ranges(100, 4, PartitionPolicy::Balanced), expected);
    }

    #[test]
    fn truncate_leaves_the_remainder_untouched() {
        assert_eq!(ranges(10, 3, PartitionPolicy::Truncate), vec![0..3, 3..6, 6..9]);
    }

    #[test]
    fn balanced_covers_every_index_once() {
        let parts = ranges(10, 3, PartitionPolicy::Balanced);
        assert_eq!(parts, vec![0..4, 4..7, 7..10]);

        for (n, total) in [(0, 4), (3, 8), (1_000_003, 7)] {
            let parts = ranges(n, total, PartitionPolicy::Balanced);
            let covered: usize = parts.iter().map(|r| r.len()).sum();
            assert_eq!(covered, n);
            assert!(parts.windows(2).all(|w| w[0].end == w[1].start));
        }
    }

    #[test]
    fn out_of_range_rank_gets_nothing() {
        assert_eq!(partition(10, 3, 3, PartitionPolicy::Balanced), 0..0);
        assert_eq!(partition(10, 0, 0, PartitionPolicy::Truncate), 0..0);
    }

    #[test]
    fn barrier_without_dispatch_returns_immediately() {
        let mut pool = CpuWorkerPool::new(2, PartitionPolicy::Balanced).unwrap();
        pool.barrier_wait(Some(Duration::from_millis(10))).unwrap();
        assert!(!pool.is_busy());
    }

    #[test]
    fn failed_spawn_leaves_a_consistent_smaller_pool() {
        let mut pool = CpuWorkerPool::new(1, PartitionPolicy::Balanced).unwrap();
        let err = pool
            .resize_with(4, |rank, signal| {
                if rank == 2 {
                    Err(std::io::Error::other("no threads left").into())
                } else {
                    Worker::spawn(rank, signal)
                }
            })
            .unwrap_err();
        assert!(matches!(err, SimulationError::WorkerSpawn(_)));
        assert_eq!(pool.num_threads(), 2);

        let particles: Vec<Particle> = (0..101)
            .map(|i| Particle::new([i as f32, -(i as f32)], [1.0, 0.5]))
            .collect();
        let forces = ForceParams {
            target: [3.0, 4.0],
            power: 10.0,
            damping: 0.99,
            attraction_active: true,
        };
        let mut expected = particles.clone();
        integrate_slice(&mut expected, &forces);

        let mut array = Arc::new(ParticleArray::from_particles(&particles));
        pool.dispatch(StepSnapshot {
            particles: Arc::clone(&array),
            num_particles: particles.len(),
            forces,
        })
        .unwrap();
        pool.barrier_wait(Some(Duration::from_secs(10))).unwrap();
        assert_eq!(pool.completed_count(), 2);
        assert_eq!(Arc::get_mut(&mut array).unwrap().as_slice(), expected.as_slice());
    }

    #[test]
    fn resize_shrinks_and_grows() {
        let mut pool = CpuWorkerPool::new(4, PartitionPolicy::Balanced).unwrap();
        pool.set_thread_count(1).unwrap();
        assert_eq!(pool.num_threads(), 1);
        pool.set_thread_count(3).unwrap();
        assert_eq!(pool.num_threads(), 3);
    }
}
