//! Pipeline configuration
//!
//! All knobs for one pipeline instance, validated up front so bad
//! parameters fail at construction rather than mid-epoch.

use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::data::batching::LastBatch;
use crate::data::sampling::SamplingPolicy;
use crate::error::{PipelineError, Result};
use crate::{DEFAULT_BATCH_SIZE, DEFAULT_PREFETCH_DEPTH, DEFAULT_QUEUE_CAPACITY, DEFAULT_SHUFFLE_BUFFER_SIZE};

/// What to do when a batch fails to realize
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ErrorPolicy {
    /// Abort the epoch and propagate the error
    Stop,
    /// Record the error, advance past the bad batch, keep going
    Skip,
    /// Rebuild the batch once on the caller before escalating
    RetryOnce,
}

/// Configuration for the batch pipeline
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PipelineConfig {
    /// Samples per batch
    pub batch_size: usize,
    /// Workers constructing batches (0 = synchronous, no pool)
    pub num_workers: usize,
    /// Slots in the shuffle buffer
    pub shuffle_buffer_size: usize,
    /// Batch-construction tasks allowed to run ahead of the consumer
    pub prefetch_depth: usize,
    /// Capacity of the pool's task queue
    pub queue_capacity: usize,
    /// Policy for the trailing partial batch
    pub last_batch: LastBatch,
    /// How the per-epoch index sequence is generated
    pub sampling: SamplingPolicy,
    /// Base seed; epochs derive their own streams from it
    pub seed: Option<u64>,
    /// Per-batch error handling
    pub on_batch_error: ErrorPolicy,
    /// Deadline for any single batch to resolve
    pub batch_timeout: Option<Duration>,
    /// Keep workers in service after a crash instead of retiring them
    pub respawn_after_crash: bool,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            batch_size: DEFAULT_BATCH_SIZE,
            num_workers: num_cpus::get().clamp(1, 8),
            shuffle_buffer_size: DEFAULT_SHUFFLE_BUFFER_SIZE,
            prefetch_depth: DEFAULT_PREFETCH_DEPTH,
            queue_capacity: DEFAULT_QUEUE_CAPACITY,
            last_batch: LastBatch::KeepShort,
            sampling: SamplingPolicy::Shuffled,
            seed: None,
            on_batch_error: ErrorPolicy::Stop,
            batch_timeout: None,
            respawn_after_crash: false,
        }
    }
}

impl PipelineConfig {
    pub fn batch_size(mut self, batch_size: usize) -> Self {
        self.batch_size = batch_size;
        self
    }

    pub fn num_workers(mut self, num_workers: usize) -> Self {
        self.num_workers = num_workers;
        self
    }

    pub fn shuffle_buffer_size(mut self, slots: usize) -> Self {
        self.shuffle_buffer_size = slots;
        self
    }

    pub fn prefetch_depth(mut self, depth: usize) -> Self {
        self.prefetch_depth = depth;
        self
    }

    pub fn queue_capacity(mut self, capacity: usize) -> Self {
        self.queue_capacity = capacity;
        self
    }

    pub fn last_batch(mut self, policy: LastBatch) -> Self {
        self.last_batch = policy;
        self
    }

    /// Boolean surface over [`LastBatch`]: `true` drops the trailing
    /// partial batch, `false` keeps it short.
    pub fn drop_last(mut self, drop: bool) -> Self {
        self.last_batch = if drop {
            LastBatch::Drop
        } else {
            LastBatch::KeepShort
        };
        self
    }

    pub fn sampling(mut self, policy: SamplingPolicy) -> Self {
        self.sampling = policy;
        self
    }

    pub fn seed(mut self, seed: u64) -> Self {
        self.seed = Some(seed);
        self
    }

    pub fn on_batch_error(mut self, policy: ErrorPolicy) -> Self {
        self.on_batch_error = policy;
        self
    }

    pub fn batch_timeout(mut self, timeout: Duration) -> Self {
        self.batch_timeout = Some(timeout);
        self
    }

    pub fn respawn_after_crash(mut self, respawn: bool) -> Self {
        self.respawn_after_crash = respawn;
        self
    }

    /// Reject parameters the pipeline cannot run with.
    pub fn validate(&self) -> Result<()> {
        if self.batch_size == 0 {
            return Err(PipelineError::InvalidConfig {
                reason: "batch_size must be greater than zero".into(),
            });
        }
        if self.shuffle_buffer_size == 0 {
            return Err(PipelineError::InvalidConfig {
                reason: "shuffle_buffer_size must be at least one".into(),
            });
        }
        if self.prefetch_depth == 0 {
            return Err(PipelineError::InvalidConfig {
                reason: "prefetch_depth must be at least one".into(),
            });
        }
        if self.queue_capacity == 0 {
            return Err(PipelineError::InvalidConfig {
                reason: "queue_capacity must be at least one".into(),
            });
        }
        Ok(())
    }
}
