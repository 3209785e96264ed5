//! Global atomic counters for batch execution.
//!
//! Counters are bumped silently at the call site. [`Metrics::flush`] emits the
//! current values as one `tracing::info!` record, typically after each batch.

use std::sync::atomic::{AtomicU64, Ordering};

/// Global metrics singleton.
pub static METRICS: Metrics = Metrics::new();

/// Lock-free counters.
pub struct Metrics {
    batches_executed: AtomicU64,
    episodes_completed: AtomicU64,
    episodes_failed: AtomicU64,
    episodes_timed_out: AtomicU64,
    evaluations_computed: AtomicU64,
}

impl Default for Metrics {
    fn default() -> Self {
        Self::new()
    }
}

impl Metrics {
    pub const fn new() -> Self {
        Self {
            batches_executed: AtomicU64::new(0),
            episodes_completed: AtomicU64::new(0),
            episodes_failed: AtomicU64::new(0),
            episodes_timed_out: AtomicU64::new(0),
            evaluations_computed: AtomicU64::new(0),
        }
    }

    pub fn inc_batches(&self) {
        self.batches_executed.fetch_add(1, Ordering::Relaxed);
        tracing::trace!(metric = "batches_executed", "counter incremented");
    }

    pub fn inc_episodes_completed(&self) {
        self.episodes_completed.fetch_add(1, Ordering::Relaxed);
    }

    /// Counts every failed episode, timeouts included.
    pub fn inc_episodes_failed(&self) {
        self.episodes_failed.fetch_add(1, Ordering::Relaxed);
    }

    pub fn inc_episodes_timed_out(&self) {
        self.episodes_timed_out.fetch_add(1, Ordering::Relaxed);
    }

    /// Only fresh computations count; cache hits do not.
    pub fn inc_evaluations(&self) {
        self.evaluations_computed.fetch_add(1, Ordering::Relaxed);
        tracing::trace!(metric = "evaluations_computed", "counter incremented");
    }

    /// Emit all counter values as a single `info!` event.
    pub fn flush(&self) {
        tracing::info!(
            metric = "flush",
            batches_executed = self.batches_executed(),
            episodes_completed = self.episodes_completed(),
            episodes_failed = self.episodes_failed(),
            episodes_timed_out = self.episodes_timed_out(),
            evaluations_computed = self.evaluations_computed(),
        );
    }

    pub fn batches_executed(&self) -> u64 {
        self.batches_executed.load(Ordering::Relaxed)
    }

    pub fn episodes_completed(&self) -> u64 {
        self.episodes_completed.load(Ordering::Relaxed)
    }

    pub fn episodes_failed(&self) -> u64 {
        self.episodes_failed.load(Ordering::Relaxed)
    }

    pub fn episodes_timed_out(&self) -> u64 {
        self.episodes_timed_out.load(Ordering::Relaxed)
    }

    pub fn evaluations_computed(&self) -> u64 {
        self.evaluations_computed.load(Ordering::Relaxed)
    }

    /// Reset all counters to zero (useful in tests).
    pub fn reset(&self) {
        self.batches_executed.store(0, Ordering::Relaxed);
        self.episodes_completed.store(0, Ordering::Relaxed);
        self.episodes_failed.store(0, Ordering::Relaxed);
        self.episodes_timed_out.store(0, Ordering::Relaxed);
        self.evaluations_computed.store(0, Ordering::Relaxed);
    }
}
