//! Configuration for a batch run.

use crate::error::TaskError;
use std::num::NonZeroUsize;
use std::time::Duration;

/// Recognized configuration for one [`BatchExecutor::run`] call.
///
/// [`BatchExecutor::run`]: crate::batch::BatchExecutor::run
///
/// # Examples
///
/// ```
/// use conductor::BatchOptions;
/// use std::time::Duration;
///
/// let options = BatchOptions::new()
///     .with_max_parallelism(4)
///     .with_per_op_timeout(Duration::from_secs(30))
///     .with_continue_on_error(false);
/// # let _ = options;
/// ```
#[derive(Debug, Clone)]
pub struct BatchOptions {
    /// Upper bound on operations running at once. `None` means the host's
    /// available parallelism.
    pub max_parallelism: Option<usize>,
    /// When false, the first operation failure aborts the whole batch.
    pub continue_on_error: bool,
    /// When set, each operation runs under a derived cancellation that fires
    /// after this duration in addition to the outer cancellation.
    pub per_op_timeout: Option<Duration>,
}

impl Default for BatchOptions {
    fn default() -> Self {
        Self::new()
    }
}

impl BatchOptions {
    /// Creates options with default values: hardware-derived parallelism,
    /// continue-on-error, no per-operation timeout.
    pub fn new() -> Self {
        Self {
            max_parallelism: None,
            continue_on_error: true,
            per_op_timeout: None,
        }
    }

    /// Sets the maximum number of operations running at once.
    pub fn with_max_parallelism(mut self, max: usize) -> Self {
        self.max_parallelism = Some(max);
        self
    }

    /// Sets whether individual failures are collected instead of aborting.
    pub fn with_continue_on_error(mut self, continue_on_error: bool) -> Self {
        self.continue_on_error = continue_on_error;
        self
    }

    /// Sets the per-operation timeout.
    pub fn with_per_op_timeout(mut self, timeout: Duration) -> Self {
        self.per_op_timeout = Some(timeout);
        self
    }

    /// Removes the per-operation timeout.
    pub fn with_no_timeout(mut self) -> Self {
        self.per_op_timeout = None;
        self
    }

    pub(crate) fn validate(&self) -> Result<(), TaskError> {
        if self.max_parallelism == Some(0) {
            return Err(TaskError::invalid_argument(
                "max_parallelism must be positive",
            ));
        }
        Ok(())
    }

    /// Effective fan-out width for `len` submitted operations.
    pub(crate) fn effective_parallelism(&self, len: usize) -> usize {
        self.max_parallelism
            .unwrap_or_else(default_parallelism)
            .min(len)
            .max(1)
    }
}

/// A sensible concurrency default tied to the host hardware.
pub(crate) fn default_parallelism() -> usize {
    std::thread::available_parallelism()
        .map(NonZeroUsize::get)
        .unwrap_or(4)
}
