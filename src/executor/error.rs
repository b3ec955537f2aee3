//! Error types for worker dispatch

use thiserror::Error;

/// Errors a dispatch call can return.
///
/// `WorkerPanic` is a computation-level failure reported by the worker
/// itself; the other variants are infrastructure failures in orchestration
/// and propagate to the caller for its own retry/degrade policy.
#[derive(Error, Debug)]
pub enum ExecError {
    /// The worker did not respond within the deadline. The process has
    /// already been terminated and reaped when this is returned.
    #[error("Worker timed out after {timeout_ms}ms")]
    Timeout { timeout_ms: u64 },

    /// The worker caught its own failure and reported it across the
    /// channel as a serialized trace.
    #[error("Worker computation failed: {trace}")]
    WorkerPanic { trace: String },

    /// The worker process could not be created.
    #[error("Failed to spawn worker: {detail}")]
    SpawnFailed { detail: String },

    /// The channel broke before a response arrived (worker died silently,
    /// malformed frame, closed pipe).
    #[error("Worker channel error: {detail}")]
    Ipc { detail: String },
}
