//! Lock-free counters for a reservoir.
//!
//! Every recovered failure path (overflow, post-close add, unresolved
//! handler, saturation, handler error) increments a counter here in addition
//! to emitting a `tracing` event, so hosts and tests can observe data loss
//! without parsing logs.

use std::sync::atomic::{AtomicU64, Ordering};

/// Thread-safe counters shared by producers, the flush path and workers.
#[derive(Debug, Default)]
pub struct ReservoirMetrics {
    elements_added: AtomicU64,
    elements_rejected: AtomicU64,
    elements_overflowed: AtomicU64,
    batches_dispatched: AtomicU64,
    elements_dispatched: AtomicU64,
    batches_released: AtomicU64,
    batches_failed: AtomicU64,
    batches_unresolved: AtomicU64,
    batches_rejected: AtomicU64,
    elements_dropped: AtomicU64,
    timer_fires_skipped: AtomicU64,
}

/// Point-in-time copy of [`ReservoirMetrics`].
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct MetricsSnapshot {
    /// Elements accepted into the queue.
    pub elements_added: u64,
    /// Elements ignored because the reservoir was closed.
    pub elements_rejected: u64,
    /// Elements lost to a bounded queue's overflow policy.
    pub elements_overflowed: u64,
    /// Batches handed to the worker pool.
    pub batches_dispatched: u64,
    /// Elements in those batches.
    pub elements_dispatched: u64,
    /// Batches the handler completed successfully.
    pub batches_released: u64,
    /// Batches whose handler returned an error or panicked.
    pub batches_failed: u64,
    /// Batches dropped because the handler id did not resolve.
    pub batches_unresolved: u64,
    /// Batches the worker pool refused (saturated or shut down).
    pub batches_rejected: u64,
    /// Elements in unresolved or rejected batches.
    pub elements_dropped: u64,
    /// Timer fires that found a scheduled flush already running.
    pub timer_fires_skipped: u64,
}

impl MetricsSnapshot {
    /// Batches that reached a terminal state (released, failed, dropped).
    pub fn batches_settled(&self) -> u64 {
        self.batches_released + self.batches_failed + self.batches_unresolved + self.batches_rejected
    }
}

impl ReservoirMetrics {
    pub fn elements_added(&self) -> u64 {
        self.elements_added.load(Ordering::Relaxed)
    }

    pub fn batches_dispatched(&self) -> u64 {
        self.batches_dispatched.load(Ordering::Relaxed)
    }

    pub fn elements_dispatched(&self) -> u64 {
        self.elements_dispatched.load(Ordering::Relaxed)
    }

    pub fn batches_released(&self) -> u64 {
        self.batches_released.load(Ordering::Relaxed)
    }

    pub fn elements_dropped(&self) -> u64 {
        self.elements_dropped.load(Ordering::Relaxed)
    }

    /// Copies every counter.
    pub fn snapshot(&self) -> MetricsSnapshot {
        MetricsSnapshot {
            elements_added: self.elements_added.load(Ordering::Relaxed),
            elements_rejected: self.elements_rejected.load(Ordering::Relaxed),
            elements_overflowed: self.elements_overflowed.load(Ordering::Relaxed),
            batches_dispatched: self.batches_dispatched.load(Ordering::Relaxed),
            elements_dispatched: self.elements_dispatched.load(Ordering::Relaxed),
            batches_released: self.batches_released.load(Ordering::Relaxed),
            batches_failed: self.batches_failed.load(Ordering::Relaxed),
            batches_unresolved: self.batches_unresolved.load(Ordering::Relaxed),
            batches_rejected: self.batches_rejected.load(Ordering::Relaxed),
            elements_dropped: self.elements_dropped.load(Ordering::Relaxed),
            timer_fires_skipped: self.timer_fires_skipped.load(Ordering::Relaxed),
        }
    }

    pub(crate) fn record_added(&self) {
        self.elements_added.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn record_rejected(&self) {
        self.elements_rejected.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn record_overflowed(&self) {
        self.elements_overflowed.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn record_dispatched(&self, batch_size: u64) {
        self.elements_dispatched.fetch_add(batch_size, Ordering::Relaxed);
        self.batches_dispatched.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn record_released(&self) {
        self.batches_released.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn record_failed(&self) {
        self.batches_failed.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn record_unresolved(&self, batch_size: u64) {
        self.elements_dropped.fetch_add(batch_size, Ordering::Relaxed);
        self.batches_unresolved.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn record_rejected_batch(&self, batch_size: u64) {
        self.elements_dropped.fetch_add(batch_size, Ordering::Relaxed);
        self.batches_rejected.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn record_timer_skip(&self) {
        self.timer_fires_skipped.fetch_add(1, Ordering::Relaxed);
    }
}
