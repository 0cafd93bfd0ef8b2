//! Unit tests for the worker-pool/future executor
//!
//! Futures must pair with their own tasks under arbitrary completion
//! interleavings, crashes must stay contained, and teardown must cancel
//! rather than lose work.

use std::sync::Arc;
use std::time::Duration;

use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use serde::{Deserialize, Serialize};
use thiserror::Error;

use epochflow::data::{BatchPlan, BatchTask, TaskOp};
use epochflow::metrics::PipelineMetrics;
use epochflow::pool::{Envelope, PoolConfig, SubmitError, TaskError, TaskRunner, WorkerPool};

#[derive(Debug, Error)]
#[error("task {0} failed on purpose")]
struct InducedFailure(u64);

/// Task payload with a controllable delay and failure mode.
#[derive(Debug, Clone, Serialize, Deserialize)]
struct SleepTask {
    marker: u64,
    delay_ms: u64,
    fail: bool,
    panic: bool,
}

impl SleepTask {
    fn ok(marker: u64, delay_ms: u64) -> Self {
        Self {
            marker,
            delay_ms,
            fail: false,
            panic: false,
        }
    }
}

struct SleepRunner;

impl TaskRunner for SleepRunner {
    type Task = SleepTask;
    type Output = u64;
    type Error = InducedFailure;

    fn run(&self, task: SleepTask) -> Result<u64, InducedFailure> {
        if task.panic {
            panic!("induced panic in task {}", task.marker);
        }
        if task.delay_ms > 0 {
            std::thread::sleep(Duration::from_millis(task.delay_ms));
        }
        if task.fail {
            return Err(InducedFailure(task.marker));
        }
        Ok(task.marker)
    }
}

fn pool_with(config: PoolConfig) -> (WorkerPool<SleepRunner>, Arc<PipelineMetrics>) {
    let metrics = Arc::new(PipelineMetrics::new());
    let pool = WorkerPool::new(Arc::new(SleepRunner), config, metrics.clone()).unwrap();
    (pool, metrics)
}

#[tokio::test]
async fn test_results_pair_with_their_own_tasks() {
    let (pool, _metrics) = pool_with(PoolConfig {
        workers: 4,
        queue_capacity: 8,
        respawn_after_crash: false,
    });

    // Random per-task delays scramble completion order relative to
    // submission order.
    let mut rng = StdRng::seed_from_u64(17);
    let mut handles = Vec::new();
    for marker in 0..48u64 {
        let delay_ms = rng.gen_range(0..12);
        let handle = pool.submit(SleepTask::ok(marker, delay_ms)).await.unwrap();
        handles.push((marker, handle));
    }

    for (marker, handle) in handles {
        assert_eq!(
            handle.get().await.unwrap(),
            marker,
            "Future resolved with another task's result"
        );
    }
    pool.shutdown().await;
}

#[tokio::test]
async fn test_task_failure_reaches_only_its_future() {
    let (pool, _metrics) = pool_with(PoolConfig {
        workers: 2,
        queue_capacity: 4,
        respawn_after_crash: false,
    });

    let good = pool.submit(SleepTask::ok(1, 0)).await.unwrap();
    let bad = pool
        .submit(SleepTask {
            marker: 7,
            delay_ms: 0,
            fail: true,
            panic: false,
        })
        .await
        .unwrap();
    let also_good = pool.submit(SleepTask::ok(2, 0)).await.unwrap();

    assert_eq!(good.get().await.unwrap(), 1);
    match bad.get().await {
        Err(TaskError::Task { source, .. }) => assert_eq!(source.0, 7),
        other => panic!("Expected task failure, got {other:?}"),
    }
    assert_eq!(also_good.get().await.unwrap(), 2);

    pool.shutdown().await;
}

#[tokio::test]
async fn test_crash_is_contained_with_respawn() {
    let (pool, metrics) = pool_with(PoolConfig {
        workers: 2,
        queue_capacity: 4,
        respawn_after_crash: true,
    });

    let doomed = pool
        .submit(SleepTask {
            marker: 99,
            delay_ms: 0,
            fail: false,
            panic: true,
        })
        .await
        .unwrap();

    let mut survivors = Vec::new();
    for marker in 0..8u64 {
        survivors.push(pool.submit(SleepTask::ok(marker, 1)).await.unwrap());
    }

    assert!(matches!(
        doomed.get().await,
        Err(TaskError::WorkerCrash { .. })
    ));
    for (marker, handle) in survivors.into_iter().enumerate() {
        assert_eq!(handle.get().await.unwrap(), marker as u64);
    }

    assert_eq!(pool.live_workers(), 2, "Crash should not retire workers");
    assert_eq!(metrics.tasks_crashed.get(), 1);
    pool.shutdown().await;
}

#[tokio::test]
async fn test_all_workers_dead_refuses_submissions() {
    let (pool, _metrics) = pool_with(PoolConfig {
        workers: 1,
        queue_capacity: 4,
        respawn_after_crash: false,
    });

    let doomed = pool
        .submit(SleepTask {
            marker: 1,
            delay_ms: 0,
            fail: false,
            panic: true,
        })
        .await
        .unwrap();
    assert!(matches!(
        doomed.get().await,
        Err(TaskError::WorkerCrash { .. })
    ));

    // The worker retires shortly after reporting the crash.
    for _ in 0..200 {
        if pool.is_exhausted() {
            break;
        }
        tokio::time::sleep(Duration::from_millis(5)).await;
    }
    assert!(pool.is_exhausted());

    let err = pool.submit(SleepTask::ok(2, 0)).await.unwrap_err();
    assert!(matches!(err, SubmitError::Exhausted { workers: 1 }));
    pool.shutdown().await;
}

#[tokio::test]
async fn test_get_timeout() {
    let (pool, _metrics) = pool_with(PoolConfig {
        workers: 1,
        queue_capacity: 2,
        respawn_after_crash: false,
    });

    let slow = pool.submit(SleepTask::ok(1, 500)).await.unwrap();
    let err = slow.get_timeout(Duration::from_millis(30)).await.unwrap_err();
    assert!(matches!(err, TaskError::Timeout { .. }));

    pool.shutdown().await;
}

#[tokio::test]
async fn test_shutdown_drains_in_flight_and_cancels_queued() {
    let (pool, metrics) = pool_with(PoolConfig {
        workers: 1,
        queue_capacity: 4,
        respawn_after_crash: false,
    });

    let in_flight = pool.submit(SleepTask::ok(1, 200)).await.unwrap();
    let queued = pool.submit(SleepTask::ok(2, 0)).await.unwrap();

    // Let the worker pick up the first task before teardown begins.
    tokio::time::sleep(Duration::from_millis(50)).await;
    pool.shutdown().await;

    assert_eq!(
        in_flight.get().await.unwrap(),
        1,
        "In-flight task should finish during drain"
    );
    assert!(matches!(
        queued.get().await,
        Err(TaskError::Cancelled { .. })
    ));
    assert_eq!(metrics.live_workers.get(), 0);
    assert_eq!(metrics.queue_depth.get(), 0);
    assert_eq!(metrics.tasks_cancelled.get(), 1);
}

#[test]
fn test_envelope_is_a_plain_wire_message() {
    let plan = BatchPlan {
        ordinal: 3,
        indices: vec![4, 8, 15],
    };
    let envelope = Envelope {
        id: 9,
        task: BatchTask::realize(&plan),
    };

    let wire = serde_json::to_string(&envelope).unwrap();
    let back: Envelope<BatchTask> = serde_json::from_str(&wire).unwrap();

    assert_eq!(back.id, 9);
    assert_eq!(back.task.op, TaskOp::RealizeBatch);
    assert_eq!(back.task.indices, vec![4, 8, 15]);
}
