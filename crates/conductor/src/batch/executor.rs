//! Bounded-parallel execution of an indexed operation sequence.

use crate::batch::{BatchOptions, BatchProgress, BatchProgressSink, BatchResult, ExecutionError};
use crate::error::TaskError;
use crate::operation::Operation;
use crate::throttle::Throttle;
use futures::FutureExt;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::Semaphore;
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

/// Runs a finite ordered sequence of independent operations with bounded
/// parallelism and aggregated semantics.
///
/// Output ordering is solely by original input index, regardless of
/// completion order; successes and errors are kept as two separate ordered
/// lists.
#[derive(Default, Clone)]
pub struct BatchExecutor {
    throttle: Option<Arc<Throttle>>,
}

impl BatchExecutor {
    pub fn new() -> Self {
        Self { throttle: None }
    }

    /// Routes every operation through `throttle`, so a process-wide capacity
    /// limit applies on top of the batch's own parallelism bound.
    pub fn with_throttle(throttle: Arc<Throttle>) -> Self {
        Self {
            throttle: Some(throttle),
        }
    }

    /// Executes `ops`, pairing each with its original index.
    ///
    /// With `continue_on_error` set, individual failures are collected into
    /// the result; otherwise the first failure stops the fan-out and is
    /// returned as [`TaskError::OperationFailed`]. Outer cancellation always
    /// wins and surfaces as [`TaskError::Cancelled`] with no partial result.
    pub async fn run<T>(
        &self,
        ops: Vec<Operation<T>>,
        options: BatchOptions,
        progress: Option<BatchProgressSink>,
        cancel: CancellationToken,
    ) -> Result<BatchResult<T>, TaskError>
    where
        T: Send + 'static,
    {
        options.validate()?;

        let total = ops.len();
        if total == 0 {
            return Ok(BatchResult::empty());
        }

        let start = Instant::now();
        let parallelism = options.effective_parallelism(total);
        debug!(total, parallelism, "starting batch");

        // Child of the outer token: cancelling it stops the fan-out without
        // touching the caller's scope.
        let stop = cancel.child_token();
        let gate = Arc::new(Semaphore::new(parallelism));

        let mut tasks: JoinSet<(usize, Result<T, TaskError>)> = JoinSet::new();
        for (index, op) in ops.into_iter().enumerate() {
            let gate = Arc::clone(&gate);
            let stop = stop.clone();
            let throttle = self.throttle.clone();
            let per_op_timeout = options.per_op_timeout;
            tasks.spawn(async move {
                // Hold a fan-out slot for the whole operation.
                let _slot = tokio::select! {
                    _ = stop.cancelled() => return (index, Err(TaskError::Cancelled)),
                    slot = gate.acquire_owned() => match slot {
                        Ok(slot) => slot,
                        Err(_closed) => return (index, Err(TaskError::Cancelled)),
                    },
                };
                let outcome =
                    match AssertUnwindSafe(run_one(op, throttle, per_op_timeout, &stop))
                        .catch_unwind()
                        .await
                    {
                        Ok(outcome) => outcome,
                        // A panicked operation still owes its index an entry.
                        Err(_panic) => Err(TaskError::failed("operation panicked")),
                    };
                (index, outcome)
            });
        }

        let mut successes: Vec<(usize, T)> = Vec::with_capacity(total);
        let mut errors: Vec<ExecutionError> = Vec::new();
        let mut completed = 0usize;
        let mut failed = 0usize;
        let mut first_failure: Option<(usize, String)> = None;

        while let Some(joined) = tasks.join_next().await {
            let (index, outcome) = match joined {
                Ok(tagged) => tagged,
                Err(join_error) => {
                    warn!(error = %join_error, "batch task was torn down before reporting");
                    continue;
                }
            };
            match outcome {
                Ok(value) => {
                    successes.push((index, value));
                    completed += 1;
                    emit(&progress, total, completed, failed);
                }
                Err(err) => {
                    // Failures caused by the batch winding down (outer
                    // cancellation or a fail-fast stop) are not
                    // per-operation results.
                    if err.is_cancellation() && stop.is_cancelled() {
                        continue;
                    }
                    completed += 1;
                    failed += 1;
                    if !options.continue_on_error && first_failure.is_none() {
                        first_failure = Some((index, err.to_string()));
                        stop.cancel();
                    }
                    errors.push(ExecutionError::new(index, err));
                    emit(&progress, total, completed, failed);
                }
            }
        }

        if cancel.is_cancelled() {
            return Err(TaskError::Cancelled);
        }
        if let Some((index, message)) = first_failure {
            return Err(TaskError::OperationFailed { index, message });
        }

        successes.sort_by_key(|(index, _)| *index);
        errors.sort_by_key(|err| err.operation_index);
        let succeeded = successes.len();
        debug!(total, succeeded, failed, "batch finished");

        Ok(BatchResult {
            successes: successes.into_iter().map(|(_, value)| value).collect(),
            errors,
            submitted: total,
            succeeded,
            duration: start.elapsed(),
        })
    }
}

/// Runs one operation under the optional shared throttle, composing the
/// per-operation timeout with the batch's stop token.
async fn run_one<T>(
    op: Operation<T>,
    throttle: Option<Arc<Throttle>>,
    per_op_timeout: Option<Duration>,
    stop: &CancellationToken,
) -> Result<T, TaskError> {
    let op_token = stop.child_token();
    let work = async move {
        match throttle {
            Some(throttle) => throttle.acquire_and_run(op, op_token).await,
            None => op(op_token).await,
        }
    };
    match per_op_timeout {
        Some(limit) => tokio::select! {
            _ = stop.cancelled() => Err(TaskError::Cancelled),
            timed = tokio::time::timeout(limit, work) => match timed {
                Ok(outcome) => outcome,
                Err(_elapsed) => Err(TaskError::Timeout { timeout: limit }),
            },
        },
        None => tokio::select! {
            _ = stop.cancelled() => Err(TaskError::Cancelled),
            outcome = work => outcome,
        },
    }
}

fn emit(progress: &Option<BatchProgressSink>, total: usize, completed: usize, failed: usize) {
    if let Some(sink) = progress {
        sink(BatchProgress {
            total,
            completed,
            failed,
        });
    }
}
