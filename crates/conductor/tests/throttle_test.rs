//! Integration tests for the throttle.
//!
//! These verify the capacity ceiling, the executed/failed counters, live
//! capacity changes under load, and the ordered batch helper.

use conductor::{TaskError, Throttle, operation};
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::{Duration, Instant};
use tokio_util::sync::CancellationToken;

/// Tracks the highest number of operations observed running at once.
#[derive(Default)]
struct ConcurrencyGauge {
    current: AtomicUsize,
    peak: AtomicUsize,
}

impl ConcurrencyGauge {
    fn enter(&self) {
        let now = self.current.fetch_add(1, Ordering::SeqCst) + 1;
        self.peak.fetch_max(now, Ordering::SeqCst);
    }

    fn exit(&self) {
        self.current.fetch_sub(1, Ordering::SeqCst);
    }

    fn peak(&self) -> usize {
        self.peak.load(Ordering::SeqCst)
    }
}

#[tokio::test]
async fn in_flight_never_exceeds_capacity() {
    let throttle = Arc::new(Throttle::new(2).unwrap());
    let gauge = Arc::new(ConcurrencyGauge::default());

    let runs = (0..8).map(|_| {
        let throttle = Arc::clone(&throttle);
        let gauge = Arc::clone(&gauge);
        async move {
            throttle
                .acquire_and_run(
                    move |_cancel| async move {
                        gauge.enter();
                        tokio::time::sleep(Duration::from_millis(20)).await;
                        gauge.exit();
                        Ok(())
                    },
                    CancellationToken::new(),
                )
                .await
        }
    });
    let outcomes = futures::future::join_all(runs).await;

    assert!(outcomes.iter().all(|outcome| outcome.is_ok()));
    assert!(
        gauge.peak() <= 2,
        "observed {} concurrent operations under capacity 2",
        gauge.peak()
    );

    let metrics = throttle.metrics();
    assert_eq!(metrics.executed_total, 8);
    assert_eq!(metrics.failed_total, 0);
    assert_eq!(metrics.in_flight, 0);
    assert!(metrics.mean_duration >= Duration::from_millis(15));
}

#[tokio::test]
async fn totals_split_successes_and_failures() {
    let throttle = Throttle::new(4).unwrap();

    for index in 0..5u32 {
        let result = throttle
            .acquire_and_run(
                move |_cancel| async move {
                    if index % 2 == 0 {
                        Ok(index)
                    } else {
                        Err(TaskError::Failed("odd input".to_string()))
                    }
                },
                CancellationToken::new(),
            )
            .await;
        assert_eq!(result.is_err(), index % 2 == 1);
    }

    let metrics = throttle.metrics();
    assert_eq!(metrics.executed_total, 5);
    assert_eq!(metrics.failed_total, 2);
}

#[tokio::test]
async fn cancelled_waiter_returns_without_acquiring() {
    let throttle = Arc::new(Throttle::new(1).unwrap());

    let blocker = {
        let throttle = Arc::clone(&throttle);
        tokio::spawn(async move {
            throttle
                .acquire_and_run(
                    |_cancel| async move {
                        tokio::time::sleep(Duration::from_millis(300)).await;
                        Ok(())
                    },
                    CancellationToken::new(),
                )
                .await
        })
    };
    // Let the blocker take the only permit.
    tokio::time::sleep(Duration::from_millis(30)).await;

    let cancel = CancellationToken::new();
    let trigger = cancel.clone();
    tokio::spawn(async move {
        tokio::time::sleep(Duration::from_millis(30)).await;
        trigger.cancel();
    });

    let started = Instant::now();
    let result: Result<(), TaskError> = throttle
        .acquire_and_run(|_cancel| async move { Ok(()) }, cancel)
        .await;
    assert!(matches!(result, Err(TaskError::Cancelled)));
    assert!(started.elapsed() < Duration::from_millis(250));

    blocker.await.unwrap().unwrap();
    // The cancelled waiter never acquired, so only the blocker is counted.
    assert_eq!(throttle.metrics().executed_total, 1);
}

#[tokio::test]
async fn resize_under_load_unblocks_waiters() {
    let throttle = Arc::new(Throttle::new(1).unwrap());
    let started = Instant::now();

    let mut handles = Vec::new();
    for _ in 0..3 {
        let throttle = Arc::clone(&throttle);
        handles.push(tokio::spawn(async move {
            throttle
                .acquire_and_run(
                    |_cancel| async move {
                        tokio::time::sleep(Duration::from_millis(100)).await;
                        Ok(())
                    },
                    CancellationToken::new(),
                )
                .await
        }));
    }

    tokio::time::sleep(Duration::from_millis(20)).await;
    throttle.set_capacity(3).unwrap();

    for handle in handles {
        handle.await.unwrap().unwrap();
    }

    // Serial execution under the old capacity would need ~300ms.
    assert!(
        started.elapsed() < Duration::from_millis(280),
        "waiters did not pick up the new capacity, took {:?}",
        started.elapsed()
    );
    let metrics = throttle.metrics();
    assert_eq!(metrics.capacity, 3);
    assert_eq!(metrics.executed_total, 3);
    assert_eq!(metrics.in_flight, 0);
}

#[tokio::test]
async fn batch_preserves_input_order_despite_completion_order() {
    let throttle = Throttle::new(5).unwrap();

    let ops = (0..5usize)
        .map(|index| {
            operation(move |_cancel| async move {
                // Later inputs finish first.
                tokio::time::sleep(Duration::from_millis(60 - index as u64 * 10)).await;
                Ok(index * 2)
            })
        })
        .collect();

    let values = throttle
        .acquire_and_run_batch(ops, CancellationToken::new())
        .await
        .unwrap();
    assert_eq!(values, vec![0, 2, 4, 6, 8]);
}

#[tokio::test]
async fn batch_failure_surfaces_after_all_operations_resolve() {
    let throttle = Throttle::new(4).unwrap();
    let completions = Arc::new(AtomicUsize::new(0));

    let ops = (0..4usize)
        .map(|index| {
            let completions = Arc::clone(&completions);
            operation(move |_cancel| async move {
                tokio::time::sleep(Duration::from_millis(10 * index as u64)).await;
                completions.fetch_add(1, Ordering::SeqCst);
                if index == 1 {
                    Err(TaskError::Failed("operation 1 gave up".to_string()))
                } else {
                    Ok(index)
                }
            })
        })
        .collect();

    let result = throttle
        .acquire_and_run_batch(ops, CancellationToken::new())
        .await;
    assert!(matches!(result, Err(TaskError::Failed(_))));
    // Peers are not cancelled by the failure.
    assert_eq!(completions.load(Ordering::SeqCst), 4);
    assert_eq!(throttle.metrics().failed_total, 1);
}
