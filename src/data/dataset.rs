//! Capability contracts for batch production
//!
//! A pipeline is wired from three collaborators: a `Dataset` that serves
//! samples by index, a `Transform` that converts each sample, and a
//! `Stackform` that combines the converted values into one batch value.
//! All three must tolerate concurrent calls from distinct workers.

use crate::error::SourceError;

/// A finite, indexable sample source.
pub trait Dataset: Send + Sync + 'static {
    /// Payload produced for a single index.
    type Sample: Send + 'static;

    /// Total number of samples.
    fn len(&self) -> usize;

    /// Whether the dataset is empty.
    fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Retrieve the sample at `index`. Must be safe to call from
    /// multiple workers at once.
    fn get(&self, index: usize) -> std::result::Result<Self::Sample, SourceError>;
}

/// Per-sample conversion, assumed side-effect-free.
pub trait Transform<S>: Send + Sync + 'static {
    /// Converted payload.
    type Output: Send + 'static;

    fn apply(&self, sample: S) -> std::result::Result<Self::Output, SourceError>;
}

/// Combines per-sample values, in index order, into one batch value.
pub trait Stackform<V>: Send + Sync + 'static {
    /// Combined batch payload.
    type Batch: Send + 'static;

    fn combine(&self, values: Vec<V>) -> std::result::Result<Self::Batch, SourceError>;
}

/// Dataset backed by a `Vec` of pre-loaded samples.
#[derive(Debug, Clone)]
pub struct InMemoryDataset<S> {
    samples: Vec<S>,
}

impl<S> InMemoryDataset<S> {
    pub fn new(samples: Vec<S>) -> Self {
        Self { samples }
    }
}

impl<S> Dataset for InMemoryDataset<S>
where
    S: Clone + Send + Sync + 'static,
{
    type Sample = S;

    fn len(&self) -> usize {
        self.samples.len()
    }

    fn get(&self, index: usize) -> std::result::Result<S, SourceError> {
        self.samples.get(index).cloned().ok_or_else(|| {
            format!(
                "index {index} out of bounds for dataset of {} samples",
                self.samples.len()
            )
            .into()
        })
    }
}

/// Transform that passes samples through unchanged.
#[derive(Debug, Clone, Copy, Default)]
pub struct IdentityTransform;

impl<S: Send + 'static> Transform<S> for IdentityTransform {
    type Output = S;

    fn apply(&self, sample: S) -> std::result::Result<S, SourceError> {
        Ok(sample)
    }
}

/// Transform backed by a plain function or closure.
pub struct FnTransform<Func> {
    func: Func,
}

impl<Func> FnTransform<Func> {
    pub fn new(func: Func) -> Self {
        Self { func }
    }
}

impl<S, V, Func> Transform<S> for FnTransform<Func>
where
    S: Send + 'static,
    V: Send + 'static,
    Func: Fn(S) -> std::result::Result<V, SourceError> + Send + Sync + 'static,
{
    type Output = V;

    fn apply(&self, sample: S) -> std::result::Result<V, SourceError> {
        (self.func)(sample)
    }
}

/// Stackform that keeps the values as a `Vec` in index order.
#[derive(Debug, Clone, Copy, Default)]
pub struct VecStack;

impl<V: Send + 'static> Stackform<V> for VecStack {
    type Batch = Vec<V>;

    fn combine(&self, values: Vec<V>) -> std::result::Result<Vec<V>, SourceError> {
        Ok(values)
    }
}

/// Stackform backed by a plain function or closure.
pub struct FnStack<Func> {
    func: Func,
}

impl<Func> FnStack<Func> {
    pub fn new(func: Func) -> Self {
        Self { func }
    }
}

impl<V, B, Func> Stackform<V> for FnStack<Func>
where
    V: Send + 'static,
    B: Send + 'static,
    Func: Fn(Vec<V>) -> std::result::Result<B, SourceError> + Send + Sync + 'static,
{
    type Batch = B;

    fn combine(&self, values: Vec<V>) -> std::result::Result<B, SourceError> {
        (self.func)(values)
    }
}
