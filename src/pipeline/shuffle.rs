//! Constant-capacity shuffle stage
//!
//! Randomizes the order of a stream with O(K) memory: K slots are
//! prefilled from upstream, then each delivery takes a uniformly random
//! occupied slot and refills it from upstream (or leaves it vacant once
//! upstream ends). Every upstream item is emitted exactly once.
//!
//! The stage runs as its own task between two capacity-1 channels, so
//! the slot array is the only buffering: upstream blocks while all K
//! slots are occupied, downstream blocks while none are.

use std::sync::Arc;

use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::debug;

use crate::metrics::PipelineMetrics;

/// Fixed-size random-access buffer driving one shuffled stream.
pub struct ShuffleBuffer<T> {
    slots: Vec<Option<T>>,
    occupied: usize,
    rng: StdRng,
    metrics: Arc<PipelineMetrics>,
}

impl<T: Send + 'static> ShuffleBuffer<T> {
    /// Spawn the stage over `upstream`, returning its join handle and the
    /// shuffled output stream.
    ///
    /// A seed makes the emission order reproducible; without one the
    /// stage draws from entropy.
    pub fn spawn(
        upstream: mpsc::Receiver<T>,
        capacity: usize,
        seed: Option<u64>,
        metrics: Arc<PipelineMetrics>,
    ) -> (JoinHandle<()>, mpsc::Receiver<T>) {
        let (tx, rx) = mpsc::channel(1);
        let rng = match seed {
            Some(seed) => StdRng::seed_from_u64(seed),
            None => StdRng::from_entropy(),
        };
        let buffer = Self {
            slots: (0..capacity.max(1)).map(|_| None).collect(),
            occupied: 0,
            rng,
            metrics,
        };
        let handle = tokio::spawn(buffer.run(upstream, tx));
        (handle, rx)
    }

    async fn run(mut self, mut upstream: mpsc::Receiver<T>, downstream: mpsc::Sender<T>) {
        let capacity = self.slots.len();

        let mut upstream_open = true;
        while self.occupied < capacity {
            match upstream.recv().await {
                Some(item) => self.fill_first_vacant(item),
                None => {
                    upstream_open = false;
                    break;
                }
            }
        }
        debug!(
            "shuffle buffer primed with {} of {} slots",
            self.occupied, capacity
        );

        while self.occupied > 0 {
            let Some((slot, item)) = self.take_random() else {
                break;
            };
            if downstream.send(item).await.is_err() {
                debug!("shuffle buffer: consumer dropped, stopping");
                self.metrics.shuffle_occupancy.set(0);
                return;
            }
            if upstream_open {
                match upstream.recv().await {
                    Some(next) => self.place(slot, next),
                    None => upstream_open = false,
                }
            }
        }

        debug!("shuffle buffer drained");
    }

    /// Remove the item of a uniformly random occupied slot.
    fn take_random(&mut self) -> Option<(usize, T)> {
        if self.occupied == 0 {
            return None;
        }
        let target = self.rng.gen_range(0..self.occupied);
        let mut seen = 0;
        for (slot, entry) in self.slots.iter_mut().enumerate() {
            if entry.is_some() {
                if seen == target {
                    self.occupied -= 1;
                    self.metrics.shuffle_occupancy.dec();
                    return entry.take().map(|item| (slot, item));
                }
                seen += 1;
            }
        }
        None
    }

    fn place(&mut self, slot: usize, item: T) {
        debug_assert!(self.slots[slot].is_none());
        self.slots[slot] = Some(item);
        self.occupied += 1;
        self.metrics.shuffle_occupancy.inc();
    }

    fn fill_first_vacant(&mut self, item: T) {
        if let Some(slot) = self.slots.iter().position(Option::is_none) {
            self.place(slot, item);
        }
    }
}
