//! Pool teardown signaling
//!
//! Couples the pool's "no more submissions" flag with a broadcast so
//! every worker observes teardown even while parked on an empty queue.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use tokio::sync::broadcast;

/// Latched shutdown signal shared by the pool and its workers.
///
/// Triggering is idempotent: the first call latches the signal and wakes
/// every subscriber, later calls report that teardown was already
/// underway.
#[derive(Clone)]
pub struct ShutdownSignal {
    inner: Arc<Inner>,
}

struct Inner {
    triggered: AtomicBool,
    notify: broadcast::Sender<()>,
}

impl ShutdownSignal {
    pub fn new() -> Self {
        let (notify, _) = broadcast::channel(1);
        Self {
            inner: Arc::new(Inner {
                triggered: AtomicBool::new(false),
                notify,
            }),
        }
    }

    /// Latch the signal and wake every subscriber. Returns `true` for the
    /// call that actually initiated teardown.
    pub fn trigger(&self) -> bool {
        let first = !self.inner.triggered.swap(true, Ordering::SeqCst);
        if first {
            let _ = self.inner.notify.send(());
        }
        first
    }

    /// Whether teardown has begun.
    pub fn is_triggered(&self) -> bool {
        self.inner.triggered.load(Ordering::SeqCst)
    }

    /// Receiver for the teardown notification; subscribe before the
    /// signal can fire, one receiver per worker.
    pub fn subscribe(&self) -> broadcast::Receiver<()> {
        self.inner.notify.subscribe()
    }
}

impl Default for ShutdownSignal {
    fn default() -> Self {
        Self::new()
    }
}
