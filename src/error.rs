//! Error types for the batch pipeline
//!
//! One taxonomy covering configuration, sampling, batch construction,
//! and executor failures.

use std::time::Duration;
use thiserror::Error;

/// Boxed error produced by dataset, transform, or stackform collaborators.
pub type SourceError = Box<dyn std::error::Error + Send + Sync>;

/// Primary error type for all pipeline operations
#[derive(Debug, Error)]
pub enum PipelineError {
    // ========== Construction Errors ==========

    /// Configuration rejected before the pipeline was built
    #[error("invalid configuration: {reason}")]
    InvalidConfig { reason: String },

    /// Index sampling could not be set up
    #[error("sampling failed: {reason}")]
    Sampling { reason: String },

    // ========== Per-Batch Errors ==========

    /// A dataset/transform/stackform call failed while realizing a batch
    #[error("batch construction failed for indices {indices:?}: {source}")]
    BatchConstruction {
        indices: Vec<usize>,
        #[source]
        source: SourceError,
    },

    /// The worker executing the batch died mid-task
    #[error("worker crashed while constructing batch {indices:?}")]
    WorkerCrash { indices: Vec<usize> },

    /// The batch did not resolve within the configured deadline
    #[error("timed out after {after:?} waiting for batch {indices:?}")]
    Timeout { indices: Vec<usize>, after: Duration },

    // ========== Executor Errors ==========

    /// The pipeline was shut down before the batch completed
    #[error("pipeline was shut down before the batch completed")]
    Cancelled,

    /// Every worker has died; the pool refuses further work
    #[error("all {workers} workers have died; the pipeline cannot continue")]
    ExecutorExhausted { workers: usize },
}

impl PipelineError {
    /// Returns true if the error cannot be recovered by skipping or
    /// retrying the affected batch.
    pub fn is_fatal(&self) -> bool {
        matches!(
            self,
            PipelineError::InvalidConfig { .. }
                | PipelineError::Cancelled
                | PipelineError::ExecutorExhausted { .. }
        )
    }

    /// The indices of the batch this error is tagged with, if any.
    pub fn batch_indices(&self) -> Option<&[usize]> {
        match self {
            PipelineError::BatchConstruction { indices, .. }
            | PipelineError::WorkerCrash { indices }
            | PipelineError::Timeout { indices, .. } => Some(indices),
            _ => None,
        }
    }
}

/// Result type alias for pipeline operations
pub type Result<T> = std::result::Result<T, PipelineError>;
