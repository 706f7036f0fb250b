//! Debug assertion macros for batching invariants.
//!
//! These are only active in debug builds (`#[cfg(debug_assertions)]`), so
//! there is zero overhead in release builds.

// =============================================================================
// Bounded batches
// =============================================================================

/// Assert that a count-triggered batch never exceeds its bound.
///
/// **Invariant**: `0 < batch.len() ≤ max_count`
///
/// Used in: `FlushCoordinator::flush_bounded()` after each pop
macro_rules! debug_assert_bounded_batch {
    ($len:expr, $bound:expr) => {
        debug_assert!(
            $len > 0 && $len <= $bound,
            "bounded drain produced a batch of {} elements (bound {})",
            $len,
            $bound
        )
    };
}

// =============================================================================
// Exclusive drains
// =============================================================================

/// Assert that the drain lock is held while elements are popped.
///
/// **Invariant**: `drain ⇒ drain_lock held` (batches stay disjoint)
///
/// Used in: every drain path of `FlushCoordinator`
macro_rules! debug_assert_drain_locked {
    ($lock:expr) => {
        debug_assert!(
            $lock.is_locked(),
            "queue drained without holding the drain lock"
        )
    };
}

// =============================================================================
// Scheduled flush flag
// =============================================================================

/// Assert that the in-progress flag was set by the scheduled flush owning it.
///
/// **Invariant**: `scheduled flush running ⇒ flush_in_progress == true`
///
/// Used in: `FlushGuard::drop()` before clearing the flag
macro_rules! debug_assert_flag_owned {
    ($flag:expr) => {
        debug_assert!(
            $flag,
            "flush-in-progress flag cleared by a flush that did not own it"
        )
    };
}

// =============================================================================
// Dispatch
// =============================================================================

/// Assert that an empty batch is never handed to the dispatcher.
///
/// **Invariant**: `dispatch(batch) ⇒ !batch.is_empty()`
///
/// Used in: `FlushCoordinator::dispatch()`
macro_rules! debug_assert_nonempty_dispatch {
    ($len:expr) => {
        debug_assert!($len > 0, "attempted to dispatch an empty batch")
    };
}

// =============================================================================
// Close
// =============================================================================

/// Assert that no producer is still inside `add` when the final flush runs.
///
/// **Invariant**: `close() → active_producers == 0 → final drain`
///
/// Used in: `Reservoir::close()` before the forced flush
macro_rules! debug_assert_producers_quiesced {
    ($active:expr) => {
        debug_assert!(
            $active == 0,
            "final flush started with {} producers still adding",
            $active
        )
    };
}

// =============================================================================
// Re-exports for crate-internal use
// =============================================================================

pub(crate) use debug_assert_bounded_batch;
pub(crate) use debug_assert_drain_locked;
pub(crate) use debug_assert_flag_owned;
pub(crate) use debug_assert_nonempty_dispatch;
pub(crate) use debug_assert_producers_quiesced;
