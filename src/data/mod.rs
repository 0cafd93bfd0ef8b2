//! Dataset capabilities, index sampling, and batch planning
//!
//! Everything that decides which samples a batch covers and how a batch
//! value is built from them.

pub mod batching;
pub mod dataset;
pub mod sampling;

pub use batching::{num_batches, partition, BatchPlan, BatchRealizer, BatchTask, LastBatch, TaskOp};
pub use dataset::{
    Dataset, FnStack, FnTransform, IdentityTransform, InMemoryDataset, Stackform, Transform,
    VecStack,
};
pub use sampling::{Sampler, SamplingPolicy};
