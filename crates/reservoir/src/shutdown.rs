//! Admission state for graceful close.
//!
//! `add` and `close` race: a producer may pass the closed check just before
//! `close` flips it. Producers therefore register themselves for the duration
//! of an `add` call, and `close` waits for that count to reach zero before
//! running the final flush. Nothing pushed by an admitted producer is left
//! behind in the queue.

use crossbeam_utils::{Backoff, CachePadded};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};

/// Closed flag plus the number of producers currently inside `add`.
#[derive(Debug, Default)]
pub(crate) struct ShutdownState {
    closed: CachePadded<AtomicBool>,
    active_producers: CachePadded<AtomicUsize>,
}

impl ShutdownState {
    pub(crate) fn new() -> Self {
        Self::default()
    }

    /// Admits a producer, or returns `None` once closing has begun.
    ///
    /// The counter is raised before the flag is read (both `SeqCst`), so a
    /// `close` that observes zero active producers can never miss one that
    /// was admitted.
    #[inline]
    pub(crate) fn enter(&self) -> Option<ProducerGuard<'_>> {
        self.active_producers.fetch_add(1, Ordering::SeqCst);
        if self.closed.load(Ordering::SeqCst) {
            self.active_producers.fetch_sub(1, Ordering::SeqCst);
            return None;
        }
        Some(ProducerGuard { state: self })
    }

    /// Marks the reservoir closed. Returns `true` only for the call that
    /// performed the transition.
    #[inline]
    pub(crate) fn close(&self) -> bool {
        !self.closed.swap(true, Ordering::SeqCst)
    }

    #[inline]
    pub(crate) fn is_closed(&self) -> bool {
        self.closed.load(Ordering::Acquire)
    }

    #[inline]
    pub(crate) fn active_producers(&self) -> usize {
        self.active_producers.load(Ordering::SeqCst)
    }

    /// Spins, then yields, until every admitted producer has left `add`.
    ///
    /// Only meaningful after [`close`](Self::close); admitted producers do a
    /// bounded amount of work (one push plus a trigger check).
    pub(crate) fn wait_for_producers(&self) {
        let backoff = Backoff::new();
        while self.active_producers() != 0 {
            backoff.snooze();
        }
    }
}

/// Keeps a producer registered as active until dropped.
pub(crate) struct ProducerGuard<'a> {
    state: &'a ShutdownState,
}

impl Drop for ProducerGuard<'_> {
    fn drop(&mut self) {
        self.state.active_producers.fetch_sub(1, Ordering::SeqCst);
    }
}
