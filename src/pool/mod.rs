//! Generic worker-pool/future executor
//!
//! P workers pull id-stamped task envelopes from a shared bounded queue,
//! execute them through a [`TaskRunner`], and push completions onto a
//! shared channel. A dispatcher routes each completion to the future
//! handle of its own task, so completion order never matters. Submission
//! backpressures on the bounded queue; shutdown drains in-flight work,
//! cancels whatever is still queued, and joins every worker.

pub mod handle;
pub mod shutdown;
pub mod task;

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::sync::Arc;

use parking_lot::Mutex;
use thiserror::Error;
use tokio::sync::{mpsc, oneshot, Mutex as AsyncMutex};
use tokio::task::JoinHandle;
use tracing::{debug, warn};

use crate::error::{PipelineError, Result};
use crate::metrics::PipelineMetrics;

pub use handle::{FutureHandle, TaskError};
pub use shutdown::ShutdownSignal;
pub use task::{Envelope, TaskId, TaskRunner};

use task::Completion;

/// Configuration for the worker pool
#[derive(Debug, Clone)]
pub struct PoolConfig {
    /// Number of workers pulling from the task queue
    pub workers: usize,
    /// Capacity of the bounded task queue
    pub queue_capacity: usize,
    /// Keep a worker in service after one of its tasks crashes
    pub respawn_after_crash: bool,
}

impl Default for PoolConfig {
    fn default() -> Self {
        Self {
            workers: num_cpus::get().clamp(1, 8),
            queue_capacity: crate::DEFAULT_QUEUE_CAPACITY,
            respawn_after_crash: false,
        }
    }
}

/// Why a submission was refused
#[derive(Debug, Error)]
pub enum SubmitError {
    /// The pool has begun shutting down
    #[error("pool is shut down and no longer accepts tasks")]
    Closed,

    /// Every worker has died and respawn is disabled
    #[error("all {workers} workers have died; pool refuses further tasks")]
    Exhausted { workers: usize },
}

type PendingMap<O, E> =
    Arc<Mutex<HashMap<TaskId, oneshot::Sender<std::result::Result<O, TaskError<E>>>>>>;

/// Fixed-size pool of workers executing tasks from a bounded queue.
///
/// Must be created from within a Tokio runtime; workers and the
/// dispatcher are spawned at construction.
pub struct WorkerPool<R: TaskRunner> {
    task_tx: Option<mpsc::Sender<Envelope<R::Task>>>,
    queue: Arc<AsyncMutex<mpsc::Receiver<Envelope<R::Task>>>>,
    pending: PendingMap<R::Output, R::Error>,
    next_id: AtomicU64,
    live_workers: Arc<AtomicUsize>,
    workers_total: usize,
    shutdown: ShutdownSignal,
    worker_handles: Vec<JoinHandle<()>>,
    dispatcher: Option<JoinHandle<()>>,
    metrics: Arc<PipelineMetrics>,
}

impl<R: TaskRunner> WorkerPool<R> {
    /// Spawn the workers and dispatcher for a new pool.
    pub fn new(runner: Arc<R>, config: PoolConfig, metrics: Arc<PipelineMetrics>) -> Result<Self> {
        if config.workers == 0 {
            return Err(PipelineError::InvalidConfig {
                reason: "worker pool needs at least one worker".into(),
            });
        }
        if config.queue_capacity == 0 {
            return Err(PipelineError::InvalidConfig {
                reason: "task queue capacity must be greater than zero".into(),
            });
        }

        let (task_tx, task_rx) = mpsc::channel(config.queue_capacity);
        let queue = Arc::new(AsyncMutex::new(task_rx));
        let (completion_tx, completion_rx) =
            mpsc::channel(config.queue_capacity + config.workers);
        let pending: PendingMap<R::Output, R::Error> = Arc::new(Mutex::new(HashMap::new()));
        let shutdown = ShutdownSignal::new();
        let live_workers = Arc::new(AtomicUsize::new(config.workers));
        metrics.live_workers.set(config.workers as i64);

        let mut worker_handles = Vec::with_capacity(config.workers);
        for worker_id in 0..config.workers {
            worker_handles.push(tokio::spawn(worker_loop(
                worker_id,
                runner.clone(),
                queue.clone(),
                completion_tx.clone(),
                shutdown.subscribe(),
                live_workers.clone(),
                config.respawn_after_crash,
                metrics.clone(),
            )));
        }
        // Workers hold the only completion senders; the dispatcher ends
        // when the last worker exits.
        drop(completion_tx);

        let dispatcher = tokio::spawn(dispatcher_loop(
            completion_rx,
            pending.clone(),
            metrics.clone(),
        ));

        debug!(
            "worker pool started: {} workers, queue capacity {}",
            config.workers, config.queue_capacity
        );

        Ok(Self {
            task_tx: Some(task_tx),
            queue,
            pending,
            next_id: AtomicU64::new(0),
            live_workers,
            workers_total: config.workers,
            shutdown,
            worker_handles,
            dispatcher: Some(dispatcher),
            metrics,
        })
    }

    /// Enqueue a task, blocking while the queue is full.
    ///
    /// Never drops work silently: either a handle is returned or the
    /// caller gets an error.
    pub async fn submit(
        &self,
        task: R::Task,
    ) -> std::result::Result<FutureHandle<R::Output, R::Error>, SubmitError> {
        if self.shutdown.is_triggered() {
            return Err(SubmitError::Closed);
        }
        if self.live_workers.load(Ordering::SeqCst) == 0 {
            return Err(SubmitError::Exhausted {
                workers: self.workers_total,
            });
        }
        let Some(task_tx) = self.task_tx.as_ref() else {
            return Err(SubmitError::Closed);
        };

        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        let (result_tx, result_rx) = oneshot::channel();
        self.pending.lock().insert(id, result_tx);

        if task_tx.send(Envelope { id, task }).await.is_err() {
            self.pending.lock().remove(&id);
            return Err(SubmitError::Closed);
        }
        self.metrics.queue_depth.inc();

        Ok(FutureHandle::new(id, result_rx))
    }

    /// Workers currently in service.
    pub fn live_workers(&self) -> usize {
        self.live_workers.load(Ordering::SeqCst)
    }

    /// Whether every worker has died.
    pub fn is_exhausted(&self) -> bool {
        self.live_workers() == 0
    }

    /// Graceful teardown: stop intake, let workers finish their current
    /// task, cancel everything still queued, join workers and dispatcher.
    ///
    /// Join failures are logged; they never replace the error that led
    /// here.
    pub async fn shutdown(mut self) {
        self.shutdown.trigger();
        self.task_tx = None;

        for handle in std::mem::take(&mut self.worker_handles) {
            if let Err(err) = handle.await {
                warn!("worker join failed during shutdown: {err}");
            }
        }
        if let Some(dispatcher) = self.dispatcher.take() {
            if let Err(err) = dispatcher.await {
                warn!("dispatcher join failed during shutdown: {err}");
            }
        }

        // Workers are gone; whatever is still queued will never run.
        let mut discarded = 0usize;
        if let Ok(mut queue) = self.queue.try_lock() {
            while queue.try_recv().is_ok() {
                discarded += 1;
            }
        }
        self.metrics.queue_depth.set(0);
        if discarded > 0 {
            debug!("discarded {discarded} queued tasks during shutdown");
        }
        debug!("worker pool shut down");
    }
}

impl<R: TaskRunner> Drop for WorkerPool<R> {
    fn drop(&mut self) {
        // Best-effort teardown for non-graceful exits: closing the queue
        // and signaling lets workers wind down on their own.
        if self.shutdown.trigger() {
            self.task_tx = None;
            debug!("worker pool dropped without explicit shutdown");
        }
    }
}

#[allow(clippy::too_many_arguments)]
async fn worker_loop<R: TaskRunner>(
    worker_id: usize,
    runner: Arc<R>,
    queue: Arc<AsyncMutex<mpsc::Receiver<Envelope<R::Task>>>>,
    completion_tx: mpsc::Sender<Completion<R::Output, R::Error>>,
    mut shutdown_rx: tokio::sync::broadcast::Receiver<()>,
    live_workers: Arc<AtomicUsize>,
    respawn_after_crash: bool,
    metrics: Arc<PipelineMetrics>,
) {
    debug!("worker {worker_id} started");
    loop {
        let envelope = tokio::select! {
            biased;
            _ = shutdown_rx.recv() => break,
            envelope = async { queue.lock().await.recv().await } => match envelope {
                Some(envelope) => envelope,
                None => break,
            },
        };

        metrics.queue_depth.dec();
        metrics.in_flight.inc();
        let id = envelope.id;

        // The task body runs on the blocking pool so a panic inside it
        // surfaces as a join error instead of killing this loop.
        let task_runner = runner.clone();
        let executed = tokio::task::spawn_blocking(move || task_runner.run(envelope.task)).await;
        metrics.in_flight.dec();

        let outcome = match executed {
            Ok(Ok(output)) => {
                metrics.tasks_executed.inc();
                Ok(output)
            }
            Ok(Err(source)) => {
                metrics.tasks_executed.inc();
                Err(TaskError::Task {
                    task_id: id,
                    source,
                })
            }
            Err(join_err) => {
                metrics.tasks_crashed.inc();
                if join_err.is_panic() {
                    warn!("worker {worker_id}: task {id} panicked");
                } else {
                    warn!("worker {worker_id}: task {id} was aborted mid-execution");
                }
                Err(TaskError::WorkerCrash { task_id: id })
            }
        };
        let crashed = matches!(outcome, Err(TaskError::WorkerCrash { .. }));

        if completion_tx
            .send(Completion { id, outcome })
            .await
            .is_err()
        {
            break;
        }

        if crashed && !respawn_after_crash {
            warn!("worker {worker_id} retiring after crash");
            break;
        }
    }

    live_workers.fetch_sub(1, Ordering::SeqCst);
    metrics.live_workers.dec();
    debug!("worker {worker_id} stopped");
}

async fn dispatcher_loop<O, E>(
    mut completion_rx: mpsc::Receiver<Completion<O, E>>,
    pending: PendingMap<O, E>,
    metrics: Arc<PipelineMetrics>,
) {
    while let Some(Completion { id, outcome }) = completion_rx.recv().await {
        let slot = pending.lock().remove(&id);
        match slot {
            Some(result_tx) => {
                if result_tx.send(outcome).is_err() {
                    debug!("result for task {id} discarded; its handle was dropped");
                }
            }
            None => debug!("no pending handle for task {id}"),
        }
    }

    // Every worker has exited; fail whatever never got a completion.
    let leftovers: Vec<_> = {
        let mut pending = pending.lock();
        pending.drain().collect()
    };
    if !leftovers.is_empty() {
        debug!("cancelling {} unresolved futures", leftovers.len());
    }
    for (id, result_tx) in leftovers {
        metrics.tasks_cancelled.inc();
        let _ = result_tx.send(Err(TaskError::Cancelled { task_id: id }));
    }
}
