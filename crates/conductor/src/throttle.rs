//! Capacity management for concurrently executing operations.
//!
//! One [`Throttle`] instance is typically shared behind an `Arc` by every
//! component that executes work, making its capacity the single knob for
//! process-wide concurrency.

use crate::error::TaskError;
use crate::operation::Operation;
use futures::future::join_all;
use serde::Serialize;
use std::future::Future;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};
use tokio::sync::Semaphore;
use tokio_util::sync::CancellationToken;
use tracing::debug;

/// Point-in-time snapshot of a throttle's state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct ThrottleMetrics {
    /// Current permit limit.
    pub capacity: usize,
    /// Operations holding a permit right now.
    pub in_flight: usize,
    /// Operations completed, successfully or not.
    pub executed_total: u64,
    /// Operations completed with a failure.
    pub failed_total: u64,
    /// Mean wall-clock duration over all completed operations.
    pub mean_duration: Duration,
}

#[derive(Debug, Default)]
struct Counters {
    executed: u64,
    failed: u64,
    busy: Duration,
}

/// Bounds the number of operations executing concurrently and records
/// throughput counters.
///
/// Acquisition is cancel-aware: a waiter whose token fires returns
/// [`TaskError::Cancelled`] without having acquired. Capacity can be changed
/// while operations are in flight; holders complete normally and subsequent
/// acquisitions observe the new limit.
pub struct Throttle {
    semaphore: Mutex<Arc<Semaphore>>,
    capacity: AtomicUsize,
    in_flight: AtomicUsize,
    counters: Mutex<Counters>,
}

impl Throttle {
    /// Creates a throttle admitting at most `capacity` concurrent operations.
    pub fn new(capacity: usize) -> Result<Self, TaskError> {
        if capacity == 0 {
            return Err(TaskError::invalid_argument(
                "throttle capacity must be positive",
            ));
        }
        Ok(Self {
            semaphore: Mutex::new(Arc::new(Semaphore::new(capacity))),
            capacity: AtomicUsize::new(capacity),
            in_flight: AtomicUsize::new(0),
            counters: Mutex::new(Counters::default()),
        })
    }

    /// Waits for a permit, runs `op` with a token derived from `cancel`, and
    /// returns the operation's outcome unchanged.
    ///
    /// The permit is released on every exit path. Completion updates the
    /// executed/failed totals and the duration sample.
    pub async fn acquire_and_run<T, F, Fut>(
        &self,
        op: F,
        cancel: CancellationToken,
    ) -> Result<T, TaskError>
    where
        F: FnOnce(CancellationToken) -> Fut,
        Fut: Future<Output = Result<T, TaskError>>,
    {
        let permit = self.acquire(&cancel).await?;
        let start = Instant::now();
        let result = op(cancel.child_token()).await;
        self.record(start.elapsed(), result.is_err());
        drop(permit);
        result
    }

    /// Runs every operation through [`acquire_and_run`](Self::acquire_and_run)
    /// concurrently, preserving input order in the returned values.
    ///
    /// On failure, the earliest-index failure is propagated only after every
    /// operation has resolved; operations already running are not cancelled
    /// by a peer's failure.
    pub async fn acquire_and_run_batch<T>(
        &self,
        ops: Vec<Operation<T>>,
        cancel: CancellationToken,
    ) -> Result<Vec<T>, TaskError> {
        let runs = ops
            .into_iter()
            .map(|op| self.acquire_and_run(op, cancel.clone()));

        let mut values = Vec::new();
        let mut first_failure = None;
        for outcome in join_all(runs).await {
            match outcome {
                Ok(value) => values.push(value),
                Err(err) if first_failure.is_none() => first_failure = Some(err),
                Err(_) => {}
            }
        }
        match first_failure {
            Some(err) => Err(err),
            None => Ok(values),
        }
    }

    /// Atomically replaces the capacity with `capacity`.
    ///
    /// Operations already holding a permit complete normally; future
    /// acquisitions block against the new limit.
    pub fn set_capacity(&self, capacity: usize) -> Result<(), TaskError> {
        if capacity == 0 {
            return Err(TaskError::invalid_argument(
                "throttle capacity must be positive",
            ));
        }
        let retired = {
            let mut slot = self.semaphore.lock().expect("semaphore lock poisoned");
            std::mem::replace(&mut *slot, Arc::new(Semaphore::new(capacity)))
        };
        self.capacity.store(capacity, Ordering::SeqCst);
        // Closing wakes waiters parked on the retired semaphore so they
        // re-acquire against the replacement.
        retired.close();
        debug!(capacity, "throttle capacity changed");
        Ok(())
    }

    /// Current permit limit.
    pub fn capacity(&self) -> usize {
        self.capacity.load(Ordering::SeqCst)
    }

    /// Coherent snapshot of the throttle's counters and gauges.
    pub fn metrics(&self) -> ThrottleMetrics {
        let counters = self.counters.lock().expect("counter lock poisoned");
        let mean_duration = if counters.executed == 0 {
            Duration::ZERO
        } else {
            counters.busy / counters.executed as u32
        };
        ThrottleMetrics {
            capacity: self.capacity.load(Ordering::SeqCst),
            in_flight: self.in_flight.load(Ordering::SeqCst),
            executed_total: counters.executed,
            failed_total: counters.failed,
            mean_duration,
        }
    }

    async fn acquire(&self, cancel: &CancellationToken) -> Result<PermitGuard<'_>, TaskError> {
        loop {
            let semaphore = self.current_semaphore();
            tokio::select! {
                _ = cancel.cancelled() => return Err(TaskError::Cancelled),
                acquired = semaphore.acquire_owned() => match acquired {
                    Ok(permit) => {
                        // Releases go through the guard against whichever
                        // semaphore is current at completion time, so the
                        // permit itself must not release on drop.
                        permit.forget();
                        self.in_flight.fetch_add(1, Ordering::SeqCst);
                        return Ok(PermitGuard { throttle: self });
                    }
                    // The semaphore was swapped out by a capacity change;
                    // retry against its replacement.
                    Err(_closed) => continue,
                },
            }
        }
    }

    fn current_semaphore(&self) -> Arc<Semaphore> {
        self.semaphore
            .lock()
            .expect("semaphore lock poisoned")
            .clone()
    }

    fn record(&self, elapsed: Duration, failed: bool) {
        let mut counters = self.counters.lock().expect("counter lock poisoned");
        counters.executed += 1;
        if failed {
            counters.failed += 1;
        }
        counters.busy += elapsed;
    }
}

struct PermitGuard<'a> {
    throttle: &'a Throttle,
}

impl Drop for PermitGuard<'_> {
    fn drop(&mut self) {
        self.throttle.in_flight.fetch_sub(1, Ordering::SeqCst);
        self.throttle.current_semaphore().add_permits(1);
    }
}
