//! Pipeline orchestration
//!
//! Wires sampling, batch planning, the shuffle stage, and the worker pool
//! into one per-epoch batch stream. The consumer sees a single suspension
//! point, [`Epoch::next_batch`], behind a sliding prefetch window: at most
//! `prefetch_depth` construction tasks run ahead of the batch currently
//! being waited on.

pub mod shuffle;

use std::collections::VecDeque;
use std::sync::Arc;

use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, warn};

use crate::config::{ErrorPolicy, PipelineConfig};
use crate::data::batching::{partition, BatchPlan, BatchRealizer, BatchTask};
use crate::data::dataset::{Dataset, Stackform, Transform};
use crate::data::sampling::{shuffle_seed, Sampler};
use crate::error::{PipelineError, Result};
use crate::metrics::PipelineMetrics;
use crate::pool::{FutureHandle, PoolConfig, SubmitError, TaskError, WorkerPool};

pub use shuffle::ShuffleBuffer;

/// A per-batch failure retained under the skip policy
#[derive(Debug, Clone)]
pub struct RecordedError {
    pub ordinal: u32,
    pub indices: Vec<usize>,
    pub message: String,
}

/// Epoch-based batch production pipeline.
///
/// Owns the capabilities and, when `num_workers > 0`, a persistent worker
/// pool reused across epochs. Must be created from within a Tokio runtime.
pub struct Pipeline<D, T, F>
where
    D: Dataset,
    T: Transform<D::Sample>,
    F: Stackform<T::Output>,
{
    config: PipelineConfig,
    sampler: Sampler,
    realizer: Arc<BatchRealizer<D, T, F>>,
    pool: Option<WorkerPool<BatchRealizer<D, T, F>>>,
    metrics: Arc<PipelineMetrics>,
    next_epoch: u64,
}

impl<D, T, F> Pipeline<D, T, F>
where
    D: Dataset,
    T: Transform<D::Sample>,
    F: Stackform<T::Output>,
{
    /// Validate the configuration and build the pipeline.
    pub fn new(dataset: D, transform: T, stackform: F, config: PipelineConfig) -> Result<Self> {
        config.validate()?;

        let dataset = Arc::new(dataset);
        let sampler = Sampler::new(dataset.len(), config.sampling.clone(), config.seed)?;
        let metrics = Arc::new(PipelineMetrics::new());
        let realizer = Arc::new(BatchRealizer::new(
            dataset,
            Arc::new(transform),
            Arc::new(stackform),
        ));

        let pool = if config.num_workers > 0 {
            Some(WorkerPool::new(
                realizer.clone(),
                PoolConfig {
                    workers: config.num_workers,
                    queue_capacity: config.queue_capacity,
                    respawn_after_crash: config.respawn_after_crash,
                },
                metrics.clone(),
            )?)
        } else {
            None
        };

        debug!(
            "pipeline ready: {} samples, batch size {}, {} workers",
            sampler.len(),
            config.batch_size,
            config.num_workers
        );

        Ok(Self {
            config,
            sampler,
            realizer,
            pool,
            metrics,
            next_epoch: 0,
        })
    }

    /// Start a fresh epoch.
    ///
    /// Each call produces a new index sequence and a new shuffle stage;
    /// the previous epoch must have been dropped or shut down first,
    /// which cancels whatever it still had outstanding.
    pub fn iterate_epoch(&mut self) -> Result<Epoch<'_, D, T, F>> {
        let ordinal = self.next_epoch;
        self.next_epoch += 1;

        let indices = self.sampler.epoch_indices(ordinal);
        let plans = partition(&indices, self.config.batch_size, self.config.last_batch);
        let batches_total = plans.len();
        debug!(
            "epoch {ordinal}: {batches_total} batches over {} indices",
            indices.len()
        );

        let (feed_tx, feed_rx) = mpsc::channel(1);
        let feeder = tokio::spawn(async move {
            for plan in plans {
                if feed_tx.send(plan).await.is_err() {
                    debug!("batch feeder: downstream dropped, stopping");
                    return;
                }
            }
        });

        let stage_seed = self.config.seed.map(|seed| shuffle_seed(seed, ordinal));
        let (shuffle_task, shuffled_rx) = ShuffleBuffer::spawn(
            feed_rx,
            self.config.shuffle_buffer_size,
            stage_seed,
            self.metrics.clone(),
        );

        Ok(Epoch {
            pipeline: &*self,
            ordinal,
            batches_total,
            shuffled_rx,
            feeder: Some(feeder),
            shuffle_task: Some(shuffle_task),
            window: VecDeque::new(),
            recorded: Vec::new(),
            emitted: 0,
            finished: false,
        })
    }

    /// Shared instrumentation for this pipeline.
    pub fn metrics(&self) -> Arc<PipelineMetrics> {
        self.metrics.clone()
    }

    pub fn config(&self) -> &PipelineConfig {
        &self.config
    }

    /// Tear down the worker pool. Runs on every exit path that consumes
    /// the pipeline; dropping without calling it still winds the pool
    /// down, just without waiting for the workers to finish.
    pub async fn shutdown(mut self) {
        if let Some(pool) = self.pool.take() {
            pool.shutdown().await;
        }
        debug!("pipeline shut down");
    }
}

struct InFlight<B> {
    plan: BatchPlan,
    handle: FutureHandle<B, PipelineError>,
}

/// One pass over the dataset, delivering every batch exactly once.
pub struct Epoch<'p, D, T, F>
where
    D: Dataset,
    T: Transform<D::Sample>,
    F: Stackform<T::Output>,
{
    pipeline: &'p Pipeline<D, T, F>,
    ordinal: u64,
    batches_total: usize,
    shuffled_rx: mpsc::Receiver<BatchPlan>,
    feeder: Option<JoinHandle<()>>,
    shuffle_task: Option<JoinHandle<()>>,
    window: VecDeque<InFlight<F::Batch>>,
    recorded: Vec<RecordedError>,
    emitted: u64,
    finished: bool,
}

impl<'p, D, T, F> Epoch<'p, D, T, F>
where
    D: Dataset,
    T: Transform<D::Sample>,
    F: Stackform<T::Output>,
{
    /// Deliver the next batch, or `Ok(None)` once the epoch is complete.
    ///
    /// This is the pipeline's sole suspension point: it blocks only while
    /// the next batch in line is not yet resolved (or, early in the
    /// epoch, while the window is still being primed).
    pub async fn next_batch(&mut self) -> Result<Option<F::Batch>> {
        if self.finished {
            return Ok(None);
        }

        loop {
            let (plan, outcome) = if self.pipeline.pool.is_some() {
                if let Err(err) = self.fill_window().await {
                    self.finished = true;
                    return Err(err);
                }
                let Some(InFlight { plan, handle }) = self.window.pop_front() else {
                    self.finish();
                    return Ok(None);
                };
                let outcome = match self.pipeline.config.batch_timeout {
                    Some(after) => handle.get_timeout(after).await,
                    None => handle.get().await,
                };
                let outcome = outcome.map_err(|err| task_error_for(err, &plan));
                (plan, outcome)
            } else {
                let Some(plan) = self.shuffled_rx.recv().await else {
                    self.finish();
                    return Ok(None);
                };
                let outcome = self.pipeline.realizer.realize(&plan.indices);
                (plan, outcome)
            };

            match outcome {
                Ok(batch) => {
                    self.emitted += 1;
                    self.pipeline.metrics.batches_emitted.inc();
                    return Ok(Some(batch));
                }
                Err(err) => match self.pipeline.config.on_batch_error {
                    ErrorPolicy::Stop => {
                        self.finished = true;
                        return Err(err);
                    }
                    ErrorPolicy::Skip => {
                        warn!("skipping failed batch {}: {err}", plan.ordinal);
                        self.recorded.push(RecordedError {
                            ordinal: plan.ordinal,
                            indices: plan.indices.clone(),
                            message: err.to_string(),
                        });
                        self.pipeline.metrics.errors_recorded.inc();
                    }
                    ErrorPolicy::RetryOnce => {
                        debug!("retrying batch {} on the caller: {err}", plan.ordinal);
                        match self.pipeline.realizer.realize(&plan.indices) {
                            Ok(batch) => {
                                self.emitted += 1;
                                self.pipeline.metrics.batches_emitted.inc();
                                return Ok(Some(batch));
                            }
                            Err(retry_err) => {
                                self.finished = true;
                                return Err(retry_err);
                            }
                        }
                    }
                },
            }
        }
    }

    /// Keep up to `prefetch_depth` construction tasks outstanding.
    async fn fill_window(&mut self) -> Result<()> {
        let Some(pool) = self.pipeline.pool.as_ref() else {
            return Ok(());
        };
        while self.window.len() < self.pipeline.config.prefetch_depth {
            let Some(plan) = self.shuffled_rx.recv().await else {
                break;
            };
            let handle = pool
                .submit(BatchTask::realize(&plan))
                .await
                .map_err(submit_error_for)?;
            self.window.push_back(InFlight { plan, handle });
        }
        Ok(())
    }

    fn finish(&mut self) {
        if !self.finished {
            self.finished = true;
            debug!(
                "epoch {} complete: {} batches emitted, {} errors recorded",
                self.ordinal,
                self.emitted,
                self.recorded.len()
            );
        }
    }

    /// Which epoch this is, counting from zero.
    pub fn ordinal(&self) -> u64 {
        self.ordinal
    }

    /// Batches this epoch was planned to emit.
    pub fn num_batches(&self) -> usize {
        self.batches_total
    }

    /// Batches delivered so far.
    pub fn emitted(&self) -> u64 {
        self.emitted
    }

    /// Errors recorded under the skip policy.
    pub fn recorded_errors(&self) -> &[RecordedError] {
        &self.recorded
    }

    /// Abandon the epoch: cancel outstanding futures and stop the feeder
    /// and shuffle stage, waiting for both to wind down.
    pub async fn shutdown(mut self) {
        self.window.clear();
        self.shuffled_rx.close();
        while self.shuffled_rx.try_recv().is_ok() {}

        if let Some(task) = self.shuffle_task.take() {
            if let Err(err) = task.await {
                warn!("shuffle stage join failed during epoch teardown: {err}");
            }
        }
        if let Some(task) = self.feeder.take() {
            if let Err(err) = task.await {
                warn!("batch feeder join failed during epoch teardown: {err}");
            }
        }
        debug!(
            "epoch {} torn down after {} batches",
            self.ordinal, self.emitted
        );
    }
}

impl<'p, D, T, F> Drop for Epoch<'p, D, T, F>
where
    D: Dataset,
    T: Transform<D::Sample>,
    F: Stackform<T::Output>,
{
    fn drop(&mut self) {
        // Closing the plan stream lets the feeder and shuffle stage wind
        // down on their own; outstanding futures cancel when the window
        // drops.
        self.shuffled_rx.close();
    }
}

fn submit_error_for(err: SubmitError) -> PipelineError {
    match err {
        SubmitError::Closed => PipelineError::Cancelled,
        SubmitError::Exhausted { workers } => PipelineError::ExecutorExhausted { workers },
    }
}

fn task_error_for(err: TaskError<PipelineError>, plan: &BatchPlan) -> PipelineError {
    match err {
        TaskError::Task { source, .. } => source,
        TaskError::WorkerCrash { .. } => PipelineError::WorkerCrash {
            indices: plan.indices.clone(),
        },
        TaskError::Cancelled { .. } => PipelineError::Cancelled,
        TaskError::Timeout { after, .. } => PipelineError::Timeout {
            indices: plan.indices.clone(),
            after,
        },
    }
}
