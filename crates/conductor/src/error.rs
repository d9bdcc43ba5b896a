//! Error types shared across the orchestration core.

use std::time::Duration;
use thiserror::Error;

/// Errors produced by the core or propagated from the operations it runs.
#[derive(Debug, Error)]
pub enum TaskError {
    /// A caller supplied configuration the core cannot act on.
    #[error("invalid argument: {0}")]
    InvalidArgument(String),

    /// An operation reported a failure.
    #[error("{0}")]
    Failed(String),

    /// A batch escalated a single operation failure in fail-fast mode.
    #[error("operation {index} failed: {message}")]
    OperationFailed { index: usize, message: String },

    /// An operation exceeded its per-operation timeout.
    #[error("operation timed out after {timeout:?}")]
    Timeout { timeout: Duration },

    /// The outer cancellation signal fired before the work finished.
    #[error("operation was cancelled")]
    Cancelled,

    /// The scheduler reached a state a valid input cannot produce.
    #[error("invariant violation: {0}")]
    InvariantViolation(String),
}

impl TaskError {
    /// True for failures caused by a cancellation signal, including the
    /// per-operation timeout (an inner cancellation scoped to one operation).
    pub fn is_cancellation(&self) -> bool {
        matches!(self, TaskError::Cancelled | TaskError::Timeout { .. })
    }

    pub(crate) fn failed(message: impl Into<String>) -> Self {
        TaskError::Failed(message.into())
    }

    pub(crate) fn invalid_argument(message: impl Into<String>) -> Self {
        TaskError::InvalidArgument(message.into())
    }
}
