//! Aggregated results and progress reporting for batch runs.

use crate::error::TaskError;
use serde::Serialize;
use std::sync::Arc;
use std::time::Duration;

/// A failure recorded for one operation, tagged with its input index.
#[derive(Debug)]
pub struct ExecutionError {
    /// Index of the operation in the submitted sequence.
    pub operation_index: usize,
    /// The underlying failure.
    pub cause: TaskError,
    /// Human-readable short form of the cause.
    pub message: String,
}

impl ExecutionError {
    pub(crate) fn new(operation_index: usize, cause: TaskError) -> Self {
        let message = cause.to_string();
        Self {
            operation_index,
            cause,
            message,
        }
    }
}

/// Outcome of a batch run in continue-on-error mode.
///
/// Every submitted operation contributes exactly one entry to either
/// `successes` or `errors`; both lists are ordered by original input index.
#[derive(Debug)]
pub struct BatchResult<T> {
    /// Successful values ordered by original input index, gaps removed.
    pub successes: Vec<T>,
    /// Failures ordered by original input index.
    pub errors: Vec<ExecutionError>,
    /// Number of operations submitted.
    pub submitted: usize,
    /// Number of operations that succeeded.
    pub succeeded: usize,
    /// Wall-clock duration of the whole run.
    pub duration: Duration,
}

impl<T> BatchResult<T> {
    pub(crate) fn empty() -> Self {
        Self {
            successes: Vec::new(),
            errors: Vec::new(),
            submitted: 0,
            succeeded: 0,
            duration: Duration::ZERO,
        }
    }

    pub fn has_errors(&self) -> bool {
        !self.errors.is_empty()
    }

    pub fn all_succeeded(&self) -> bool {
        self.errors.is_empty()
    }

    /// Fraction of submitted operations that succeeded, in `[0, 1]`.
    /// An empty batch counts as fully successful.
    pub fn success_rate(&self) -> f64 {
        if self.submitted == 0 {
            1.0
        } else {
            self.succeeded as f64 / self.submitted as f64
        }
    }
}

/// Progress snapshot delivered after an operation resolves.
///
/// `completed` counts successes and failures and only grows; the terminal
/// update of a normally finishing batch has `completed == total`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct BatchProgress {
    pub total: usize,
    pub completed: usize,
    pub failed: usize,
}

/// Caller-supplied progress sink. Invoked synchronously by the batch while it
/// drains completions, so it must be non-blocking or cheaply blocking.
pub type BatchProgressSink = Arc<dyn Fn(BatchProgress) + Send + Sync>;

#[cfg(test)]
mod tests {
    use super::*;

    fn result_with(succeeded: usize, failed: usize) -> BatchResult<u32> {
        BatchResult {
            successes: (0..succeeded as u32).collect(),
            errors: (0..failed)
                .map(|i| ExecutionError::new(succeeded + i, TaskError::failed("boom")))
                .collect(),
            submitted: succeeded + failed,
            succeeded,
            duration: Duration::from_millis(5),
        }
    }

    #[test]
    fn empty_batch_is_fully_successful() {
        let result = BatchResult::<u32>::empty();
        assert!(result.all_succeeded());
        assert!(!result.has_errors());
        assert_eq!(result.success_rate(), 1.0);
        assert_eq!(result.duration, Duration::ZERO);
    }

    #[test]
    fn success_rate_reflects_the_split() {
        let result = result_with(2, 3);
        assert!(result.has_errors());
        assert!(!result.all_succeeded());
        assert_eq!(result.success_rate(), 0.4);
    }

    #[test]
    fn execution_error_keeps_the_cause_text() {
        let err = ExecutionError::new(7, TaskError::failed("exit status 1"));
        assert_eq!(err.operation_index, 7);
        assert_eq!(err.message, "exit status 1");
    }
}
