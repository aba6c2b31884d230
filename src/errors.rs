//! Typed error hierarchy for forkcheck.
//!
//! Two enums cover the two failure domains:
//! - `PoolError`: invalid pool configuration
//! - `WorkerError`: a failed issues or dependencies worker call
//!
//! Worker failures never escape the orchestrator: they are routed to the
//! `error` hook and the job's outcome resolves to `None`.

use thiserror::Error;

/// Errors from the bounded concurrency pool.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum PoolError {
    #[error("Pool capacity must be at least 1, got {capacity}")]
    InvalidCapacity { capacity: usize },
}

/// Errors returned by an analysis worker.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum WorkerError {
    /// The worker could not be reached (process gone, channel closed).
    #[error("Worker is unavailable: {0}")]
    Unavailable(String),

    /// The worker ran and reported a failure.
    #[error("Worker failed: {message}")]
    Failed { message: String },

    /// The worker abandoned the request.
    #[error("Worker call was cancelled")]
    Cancelled,

    /// The dispatched job panicked or was aborted before settling.
    #[error("Worker job crashed: {message}")]
    Crashed { message: String },
}

impl WorkerError {
    pub fn failed(message: impl Into<String>) -> Self {
        WorkerError::Failed {
            message: message.into(),
        }
    }

    /// Whether a later call to the same worker might succeed.
    pub fn is_transient(&self) -> bool {
        matches!(self, WorkerError::Unavailable(_) | WorkerError::Cancelled)
    }
}

impl From<tokio::task::JoinError> for WorkerError {
    fn from(err: tokio::task::JoinError) -> Self {
        let message = if err.is_cancelled() {
            "job was aborted".to_string()
        } else {
            err.to_string()
        };
        WorkerError::Crashed { message }
    }
}
