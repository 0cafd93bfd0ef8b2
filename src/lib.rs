//! Epochflow - concurrent epoch-based batch production
//!
//! Feeds batches from a finite indexable dataset to a consumer:
//! - Index sampling (sequential, shuffled, weighted) per epoch
//! - Batch planning with drop/keep-short/pad trailing policies
//! - Constant-memory shuffle of delivery order
//! - A generic worker-pool/future executor with backpressure
//! - A sliding prefetch window serializing delivery to the caller

pub mod config;
pub mod data;
pub mod error;
pub mod metrics;
pub mod pipeline;
pub mod pool;

pub use config::{ErrorPolicy, PipelineConfig};
pub use data::batching::{BatchPlan, BatchTask, LastBatch};
pub use data::dataset::{Dataset, Stackform, Transform};
pub use data::sampling::SamplingPolicy;
pub use error::{PipelineError, Result, SourceError};
pub use metrics::PipelineMetrics;
pub use pipeline::{Epoch, Pipeline};
pub use pool::{FutureHandle, PoolConfig, TaskRunner, WorkerPool};

/// Default samples per batch
pub const DEFAULT_BATCH_SIZE: usize = 32;

/// Default shuffle buffer slots
pub const DEFAULT_SHUFFLE_BUFFER_SIZE: usize = 8;

/// Default prefetch window depth
pub const DEFAULT_PREFETCH_DEPTH: usize = 4;

/// Default task queue capacity
pub const DEFAULT_QUEUE_CAPACITY: usize = 16;
