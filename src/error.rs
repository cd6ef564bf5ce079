//! Error types for the particle simulation core.
//!
//! Every fallible operation in the library returns [`SimulationResult`]. The
//! variants map onto the failure classes of the engine: allocation guards,
//! worker-pool synchronisation, and device access.

use std::time::Duration;

use thiserror::Error;

/// Errors raised by the particle buffer, the worker pool and the engine.
#[derive(Debug, Error)]
pub enum SimulationError {
    /// Requested particle count is above the configured cap.
    #[error("cannot allocate {requested} particles (limit is {max})")]
    Allocation { requested: usize, max: usize },

    /// The device could not back the requested particle storage.
    #[error("device could not allocate storage for {requested} particles: {reason}")]
    DeviceAllocation { requested: usize, reason: String },

    /// The worker-pool barrier did not complete within the configured timeout.
    #[error("worker barrier timed out after {timeout:?}: {completed}/{expected} workers completed")]
    WorkerTimeout {
        completed: usize,
        expected: usize,
        timeout: Duration,
    },

    /// The pool was asked to resize while a dispatch is still outstanding.
    #[error("worker pool is busy with an outstanding dispatch")]
    PoolBusy,

    /// The operating system refused to spawn a worker thread.
    #[error("failed to spawn worker thread: {0}")]
    WorkerSpawn(#[from] std::io::Error),

    /// No compatible adapter or device could be acquired.
    #[error("no compatible GPU device: {0}")]
    DeviceUnavailable(String),

    /// Mapping the readback buffer failed.
    #[error("failed to read particles back from the device: {0}")]
    Readback(String),

    /// Waiting for submitted device work failed.
    #[error("failed waiting for device queue: {0}")]
    DevicePoll(String),

    /// A step was requested while a mode switch holds the suspension flag.
    #[error("updates are suspended while a mode switch is in progress")]
    UpdatesSuspended,

    /// The host particle array is still referenced by a worker.
    #[error("host particle array is still shared with a worker thread")]
    HostArrayShared,
}

/// Result alias used throughout the crate.
pub type SimulationResult<T> = Result<T, SimulationError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn allocation_error_names_both_counts() {
        let err = SimulationError::Allocation {
            requested: 20_000_000,
            max: 10_000_000,
        };
        let message = err.to_string();
        assert!(message.contains("20000000"));
        assert!(message.contains("10000000"));
    }

    #[test]
    fn io_errors_convert_into_spawn_failures() {
        let io = std::io::Error::new(std::io::ErrorKind::Other, "no threads left");
        let err: SimulationError = io.into();
        assert!(matches!(err, SimulationError::WorkerSpawn(_)));
    }
}
