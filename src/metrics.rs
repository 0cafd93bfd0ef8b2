//! Pipeline instrumentation
//!
//! Atomic counters and gauges shared between the shuffle stage, the worker
//! pool, and the epoch loop. Gauges remember their peak so tests can check
//! occupancy bounds after the fact.

use std::sync::atomic::{AtomicI64, AtomicU64, Ordering};

/// Counter metric (monotonically increasing)
#[derive(Debug, Default)]
pub struct Counter {
    value: AtomicU64,
}

impl Counter {
    /// Create a new counter
    pub fn new() -> Self {
        Self::default()
    }

    /// Increment by 1
    pub fn inc(&self) {
        self.value.fetch_add(1, Ordering::Relaxed);
    }

    /// Increment by delta
    pub fn inc_by(&self, delta: u64) {
        self.value.fetch_add(delta, Ordering::Relaxed);
    }

    /// Get current value
    pub fn get(&self) -> u64 {
        self.value.load(Ordering::Relaxed)
    }
}

/// Gauge metric (can go up or down), with a high-water mark
#[derive(Debug, Default)]
pub struct Gauge {
    value: AtomicI64,
    peak: AtomicI64,
}

impl Gauge {
    /// Create a new gauge
    pub fn new() -> Self {
        Self::default()
    }

    /// Set value
    pub fn set(&self, val: i64) {
        self.value.store(val, Ordering::Relaxed);
        self.peak.fetch_max(val, Ordering::Relaxed);
    }

    /// Increment by 1
    pub fn inc(&self) {
        let val = self.value.fetch_add(1, Ordering::Relaxed) + 1;
        self.peak.fetch_max(val, Ordering::Relaxed);
    }

    /// Decrement by 1
    pub fn dec(&self) {
        self.value.fetch_sub(1, Ordering::Relaxed);
    }

    /// Get current value
    pub fn get(&self) -> i64 {
        self.value.load(Ordering::Relaxed)
    }

    /// Highest value the gauge has held
    pub fn peak(&self) -> i64 {
        self.peak.load(Ordering::Relaxed)
    }
}

/// Shared instrumentation for one pipeline instance
#[derive(Debug, Default)]
pub struct PipelineMetrics {
    /// Batches delivered to the consumer
    pub batches_emitted: Counter,
    /// Per-batch errors recorded under the skip policy
    pub errors_recorded: Counter,
    /// Tasks that ran to completion (ok or task-level error)
    pub tasks_executed: Counter,
    /// Tasks lost to a worker crash
    pub tasks_crashed: Counter,
    /// Futures resolved as cancelled during teardown
    pub tasks_cancelled: Counter,
    /// Occupied slots in the shuffle buffer
    pub shuffle_occupancy: Gauge,
    /// Tasks sitting in the submission queue
    pub queue_depth: Gauge,
    /// Tasks currently executing on a worker
    pub in_flight: Gauge,
    /// Workers still serving the pool
    pub live_workers: Gauge,
}

impl PipelineMetrics {
    /// Create a fresh bundle with everything at zero
    pub fn new() -> Self {
        Self::default()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_counter() {
        let counter = Counter::new();
        assert_eq!(counter.get(), 0);

        counter.inc();
        assert_eq!(counter.get(), 1);

        counter.inc_by(5);
        assert_eq!(counter.get(), 6);
    }

    #[test]
    fn test_gauge() {
        let gauge = Gauge::new();
        assert_eq!(gauge.get(), 0);

        gauge.set(10);
        assert_eq!(gauge.get(), 10);

        gauge.dec();
        assert_eq!(gauge.get(), 9);
    }

    #[test]
    fn test_gauge_peak() {
        let gauge = Gauge::new();
        gauge.inc();
        gauge.inc();
        gauge.inc();
        gauge.dec();
        gauge.dec();

        assert_eq!(gauge.get(), 1);
        assert_eq!(gauge.peak(), 3);
    }
}
