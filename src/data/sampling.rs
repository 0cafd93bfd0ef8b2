//! Per-epoch index sequences
//!
//! Each epoch gets a fresh sequence covering the dataset: sequential,
//! a seeded permutation, or weighted draws. Sequences are deterministic
//! only when a base seed is supplied.

use rand::distributions::{Distribution, WeightedIndex};
use rand::rngs::StdRng;
use rand::seq::SliceRandom;
use rand::SeedableRng;
use serde::{Deserialize, Serialize};

use crate::error::{PipelineError, Result};

/// How the per-epoch index sequence is generated
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum SamplingPolicy {
    /// Indices in ascending order
    Sequential,
    /// A fresh permutation of the index range each epoch
    Shuffled,
    /// Weighted draws with replacement; one weight per index
    Weighted(Vec<f64>),
}

enum SamplerKind {
    Sequential,
    Shuffled,
    Weighted(WeightedIndex<f64>),
}

/// Generates one index sequence per epoch over `[0, len)`.
pub struct Sampler {
    len: usize,
    kind: SamplerKind,
    base_seed: Option<u64>,
}

impl Sampler {
    /// Validate the policy against the dataset size and build a sampler.
    pub fn new(len: usize, policy: SamplingPolicy, base_seed: Option<u64>) -> Result<Self> {
        if len == 0 {
            return Err(PipelineError::InvalidConfig {
                reason: "dataset is empty".into(),
            });
        }

        let kind = match policy {
            SamplingPolicy::Sequential => SamplerKind::Sequential,
            SamplingPolicy::Shuffled => SamplerKind::Shuffled,
            SamplingPolicy::Weighted(weights) => {
                if weights.len() != len {
                    return Err(PipelineError::Sampling {
                        reason: format!(
                            "{} weights supplied for {} samples",
                            weights.len(),
                            len
                        ),
                    });
                }
                let dist = WeightedIndex::new(&weights).map_err(|err| PipelineError::Sampling {
                    reason: format!("invalid sample weights: {err}"),
                })?;
                SamplerKind::Weighted(dist)
            }
        };

        Ok(Self {
            len,
            kind,
            base_seed,
        })
    }

    /// Number of indices emitted per epoch.
    pub fn len(&self) -> usize {
        self.len
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    /// Produce the index sequence for `epoch`.
    ///
    /// With a base seed the sequence is reproducible across runs, and
    /// successive epochs derive distinct seeds so they differ from each
    /// other.
    pub fn epoch_indices(&self, epoch: u64) -> Vec<usize> {
        match &self.kind {
            SamplerKind::Sequential => (0..self.len).collect(),
            SamplerKind::Shuffled => {
                let mut indices: Vec<usize> = (0..self.len).collect();
                indices.shuffle(&mut self.rng_for_epoch(epoch));
                indices
            }
            SamplerKind::Weighted(dist) => {
                let mut rng = self.rng_for_epoch(epoch);
                (0..self.len).map(|_| dist.sample(&mut rng)).collect()
            }
        }
    }

    fn rng_for_epoch(&self, epoch: u64) -> StdRng {
        match self.base_seed {
            Some(seed) => StdRng::seed_from_u64(seed.wrapping_add(epoch)),
            None => StdRng::from_entropy(),
        }
    }
}

/// Derive the seed for the shuffle stage so it draws from a different
/// stream than the sampler in the same epoch.
pub(crate) fn shuffle_seed(base_seed: u64, epoch: u64) -> u64 {
    base_seed.wrapping_add(epoch) ^ 0x9E37_79B9_7F4A_7C15
}
