//! Batch planning and realization
//!
//! Partitions an index sequence into fixed-size batch plans, then turns a
//! plan into a batch value by running get -> apply per index, in index
//! order, followed by one combine. Realization is also the task body the
//! worker pool executes.

use std::sync::Arc;

use serde::{Deserialize, Serialize};

use super::dataset::{Dataset, Stackform, Transform};
use crate::error::{PipelineError, Result};
use crate::pool::TaskRunner;

/// Policy for the trailing batch when the index count is not a multiple
/// of the batch size
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum LastBatch {
    /// Discard the remainder
    Drop,
    /// Emit a smaller final batch
    KeepShort,
    /// Fill the final batch up to size with the given index
    Pad { index: usize },
}

/// An unrealized batch: its position in the epoch and the indices it covers
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BatchPlan {
    pub ordinal: u32,
    pub indices: Vec<usize>,
}

/// Operation identifier carried by every task message
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum TaskOp {
    RealizeBatch,
}

/// Self-contained unit of work shipped to a worker.
///
/// Carries everything the worker needs; no references to pipeline state
/// cross the submission boundary.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BatchTask {
    pub op: TaskOp,
    pub indices: Vec<usize>,
}

impl BatchTask {
    /// Build the realize task for a plan.
    pub fn realize(plan: &BatchPlan) -> Self {
        Self {
            op: TaskOp::RealizeBatch,
            indices: plan.indices.clone(),
        }
    }
}

/// Group an index sequence into batch plans of `batch_size`.
pub fn partition(indices: &[usize], batch_size: usize, policy: LastBatch) -> Vec<BatchPlan> {
    if batch_size == 0 {
        return Vec::new();
    }
    let mut plans = Vec::with_capacity(indices.len().div_ceil(batch_size));
    for (ordinal, chunk) in indices.chunks(batch_size).enumerate() {
        let mut batch = chunk.to_vec();
        if batch.len() < batch_size {
            match policy {
                LastBatch::Drop => break,
                LastBatch::KeepShort => {}
                LastBatch::Pad { index } => batch.resize(batch_size, index),
            }
        }
        plans.push(BatchPlan {
            ordinal: ordinal as u32,
            indices: batch,
        });
    }
    plans
}

/// Number of batches one epoch will emit for `len` indices.
pub fn num_batches(len: usize, batch_size: usize, policy: LastBatch) -> usize {
    match policy {
        LastBatch::Drop => len / batch_size,
        LastBatch::KeepShort | LastBatch::Pad { .. } => len.div_ceil(batch_size),
    }
}

/// Turns batch plans into batch values via the three capabilities.
pub struct BatchRealizer<D, T, F> {
    dataset: Arc<D>,
    transform: Arc<T>,
    stackform: Arc<F>,
}

impl<D, T, F> BatchRealizer<D, T, F>
where
    D: Dataset,
    T: Transform<D::Sample>,
    F: Stackform<T::Output>,
{
    pub fn new(dataset: Arc<D>, transform: Arc<T>, stackform: Arc<F>) -> Self {
        Self {
            dataset,
            transform,
            stackform,
        }
    }

    /// Realize one batch. Any collaborator failure aborts the whole batch
    /// and is tagged with its full index list; samples are never dropped
    /// silently.
    pub fn realize(&self, indices: &[usize]) -> Result<F::Batch> {
        let mut values = Vec::with_capacity(indices.len());
        for &index in indices {
            let sample =
                self.dataset
                    .get(index)
                    .map_err(|source| PipelineError::BatchConstruction {
                        indices: indices.to_vec(),
                        source,
                    })?;
            let value =
                self.transform
                    .apply(sample)
                    .map_err(|source| PipelineError::BatchConstruction {
                        indices: indices.to_vec(),
                        source,
                    })?;
            values.push(value);
        }
        self.stackform
            .combine(values)
            .map_err(|source| PipelineError::BatchConstruction {
                indices: indices.to_vec(),
                source,
            })
    }
}

impl<D, T, F> TaskRunner for BatchRealizer<D, T, F>
where
    D: Dataset,
    T: Transform<D::Sample>,
    F: Stackform<T::Output>,
{
    type Task = BatchTask;
    type Output = F::Batch;
    type Error = PipelineError;

    fn run(&self, task: BatchTask) -> Result<F::Batch> {
        match task.op {
            TaskOp::RealizeBatch => self.realize(&task.indices),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::data::dataset::{FnTransform, IdentityTransform, InMemoryDataset, VecStack};
    use crate::error::SourceError;

    fn plans_to_indices(plans: &[BatchPlan]) -> Vec<Vec<usize>> {
        plans.iter().map(|p| p.indices.clone()).collect()
    }

    #[test]
    fn test_partition_keep_short() {
        let indices: Vec<usize> = (0..10).collect();
        let plans = partition(&indices, 3, LastBatch::KeepShort);

        assert_eq!(
            plans_to_indices(&plans),
            vec![vec![0, 1, 2], vec![3, 4, 5], vec![6, 7, 8], vec![9]]
        );
    }

    #[test]
    fn test_partition_drop() {
        let indices: Vec<usize> = (0..10).collect();
        let plans = partition(&indices, 3, LastBatch::Drop);

        assert_eq!(plans.len(), 3);
        assert!(plans.iter().all(|p| p.indices.len() == 3));
        assert!(plans.iter().all(|p| !p.indices.contains(&9)));
    }

    #[test]
    fn test_partition_pad() {
        let indices: Vec<usize> = (0..10).collect();
        let plans = partition(&indices, 3, LastBatch::Pad { index: 0 });

        assert_eq!(plans.len(), 4);
        assert_eq!(plans[3].indices, vec![9, 0, 0]);
    }

    #[test]
    fn test_partition_exact_multiple() {
        let indices: Vec<usize> = (0..9).collect();
        for policy in [LastBatch::Drop, LastBatch::KeepShort, LastBatch::Pad { index: 0 }] {
            let plans = partition(&indices, 3, policy);
            assert_eq!(plans.len(), 3, "Policy {policy:?} altered a full batch");
        }
    }

    #[test]
    fn test_num_batches() {
        assert_eq!(num_batches(10, 3, LastBatch::Drop), 3);
        assert_eq!(num_batches(10, 3, LastBatch::KeepShort), 4);
        assert_eq!(num_batches(9, 3, LastBatch::Drop), 3);
    }

    #[test]
    fn test_realize_in_index_order() {
        let dataset = Arc::new(InMemoryDataset::new(vec![10u32, 20, 30, 40]));
        let realizer = BatchRealizer::new(dataset, Arc::new(IdentityTransform), Arc::new(VecStack));

        let batch = realizer.realize(&[3, 0, 2]).unwrap();
        assert_eq!(batch, vec![40, 10, 30]);
    }

    #[test]
    fn test_realize_tags_failing_batch() {
        let dataset = Arc::new(InMemoryDataset::new(vec![1u32, 2, 3]));
        let transform = Arc::new(FnTransform::new(
            |x: u32| -> std::result::Result<u32, SourceError> {
                if x == 2 {
                    Err("poisoned sample".into())
                } else {
                    Ok(x)
                }
            },
        ));
        let realizer = BatchRealizer::new(dataset, transform, Arc::new(VecStack));

        let err = realizer.realize(&[0, 1, 2]).unwrap_err();
        assert_eq!(err.batch_indices(), Some(&[0, 1, 2][..]));
        assert!(err.to_string().contains("poisoned sample"));
    }
}
