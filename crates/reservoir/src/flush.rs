//! Flush coordinator: drains the queue into batches and dispatches them.
//!
//! Every drain runs under `drain_lock`, which is what keeps batches
//! disjoint. Two drain modes sit on top of it:
//!
//! - **bounded** (count trigger): blocking; a producer that finds the lock
//!   taken waits, then re-evaluates the queue length. Emits zero or more
//!   batches of exactly `bound` elements.
//! - **unconditional** (timer, close, on-demand): snapshot the length and
//!   drain that many elements into one batch. Producers adding concurrently
//!   are left for the next flush. Timer fires additionally go through the
//!   `flush_in_progress` flag: a fire that overlaps a running scheduled
//!   flush is skipped rather than queued.
//!
//! Dispatch resolves the handler on every batch. A missing handler or a
//! rejected submission drops the batch with an `error!` event and a metric;
//! nothing is ever reported back to producers.

#[cfg(debug_assertions)]
use crate::invariants::{
    debug_assert_bounded_batch, debug_assert_drain_locked, debug_assert_flag_owned,
    debug_assert_nonempty_dispatch,
};
use crate::batch::Batch;
use crate::dispatcher::Dispatcher;
use crate::handler::{HandlerId, HandlerRegistry};
use crate::metrics::ReservoirMetrics;
use crate::queue::ElementQueue;
use crossbeam_utils::CachePadded;
use parking_lot::Mutex;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use tracing::{error, trace};

pub(crate) struct FlushCoordinator<T> {
    queue: ElementQueue<T>,
    drain_lock: Mutex<()>,
    flush_in_progress: CachePadded<AtomicBool>,
    next_batch_id: AtomicU64,
    handler_id: HandlerId,
    registry: Arc<dyn HandlerRegistry<T>>,
    dispatcher: Dispatcher,
    metrics: Arc<ReservoirMetrics>,
}

/// Clears the in-progress flag on every exit path, unwinding included.
struct FlushGuard<'a> {
    flag: &'a AtomicBool,
}

impl Drop for FlushGuard<'_> {
    fn drop(&mut self) {
        let _was_set = self.flag.swap(false, Ordering::Release);
        #[cfg(debug_assertions)]
        debug_assert_flag_owned!(_was_set);
    }
}

impl<T: Send + 'static> FlushCoordinator<T> {
    pub(crate) fn new(
        queue: ElementQueue<T>,
        handler_id: HandlerId,
        registry: Arc<dyn HandlerRegistry<T>>,
        dispatcher: Dispatcher,
        metrics: Arc<ReservoirMetrics>,
    ) -> Self {
        Self {
            queue,
            drain_lock: Mutex::new(()),
            flush_in_progress: CachePadded::new(AtomicBool::new(false)),
            next_batch_id: AtomicU64::new(0),
            handler_id,
            registry,
            dispatcher,
            metrics,
        }
    }

    #[inline]
    pub(crate) fn queue(&self) -> &ElementQueue<T> {
        &self.queue
    }

    #[inline]
    pub(crate) fn dispatcher(&self) -> &Dispatcher {
        &self.dispatcher
    }

    #[inline]
    pub(crate) fn handler_id(&self) -> &HandlerId {
        &self.handler_id
    }

    /// Count-triggered flush. Returns the number of batches dispatched.
    pub(crate) fn flush_bounded(&self, bound: usize) -> usize {
        let _drain = self.drain_lock.lock();
        let mut batches = 0;

        while self.queue.len() >= bound {
            let items = self.queue.drain_up_to(bound);
            if items.is_empty() {
                break;
            }
            #[cfg(debug_assertions)]
            debug_assert_bounded_batch!(items.len(), bound);

            // A short pop means len() overshot; nothing is left to loop on.
            let short = items.len() < bound;
            self.dispatch(items);
            batches += 1;
            if short {
                break;
            }
        }
        batches
    }

    /// Timer-driven unconditional flush.
    ///
    /// Returns `None` when another scheduled flush was already running,
    /// otherwise the number of elements drained.
    pub(crate) fn flush_scheduled(&self) -> Option<usize> {
        if self
            .flush_in_progress
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .is_err()
        {
            self.metrics.record_timer_skip();
            trace!(handler_id = %self.handler_id, "scheduled flush already running; skipping fire");
            return None;
        }
        let _flag = FlushGuard {
            flag: &self.flush_in_progress,
        };
        Some(self.drain_snapshot())
    }

    /// Unconditional flush that never skips; waits for any running drain.
    pub(crate) fn flush_forced(&self) -> usize {
        self.drain_snapshot()
    }

    fn drain_snapshot(&self) -> usize {
        let _drain = self.drain_lock.lock();
        let pending = self.queue.len();
        if pending == 0 {
            return 0;
        }
        let items = self.queue.drain_up_to(pending);
        let drained = items.len();
        if drained > 0 {
            self.dispatch(items);
        }
        drained
    }

    /// Wraps drained elements into a batch and hands it to a worker.
    ///
    /// Caller holds `drain_lock`.
    fn dispatch(&self, items: Vec<T>) {
        #[cfg(debug_assertions)]
        {
            debug_assert_nonempty_dispatch!(items.len());
            debug_assert_drain_locked!(self.drain_lock);
        }

        let batch = Batch::new(self.next_batch_id.fetch_add(1, Ordering::Relaxed), items);
        let batch_id = batch.id();
        let batch_size = batch.len();

        let Some(handler) = self.registry.resolve(&self.handler_id) else {
            self.metrics.record_unresolved(batch_size as u64);
            error!(
                handler_id = %self.handler_id,
                batch_id,
                batch_size,
                "no handler registered; dropping batch"
            );
            return;
        };

        if let Err(e) = self
            .dispatcher
            .submit(batch, handler, Arc::clone(&self.metrics))
        {
            self.metrics.record_rejected_batch(batch_size as u64);
            error!(
                handler_id = %self.handler_id,
                batch_id,
                batch_size,
                error = %e,
                "dispatcher rejected batch; dropping it"
            );
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::DispatcherConfig;
    use crate::error::HandlerError;
    use crate::handler::{handler_fn, InMemoryRegistry};
    use std::sync::mpsc;
    use std::thread;
    use std::time::Duration;
    use tracing_test::traced_test;

    type Seen = Arc<parking_lot::Mutex<Vec<Vec<u32>>>>;

    fn coordinator(registry: Arc<InMemoryRegistry<u32>>) -> FlushCoordinator<u32> {
        FlushCoordinator::new(
            ElementQueue::unbounded(),
            HandlerId::from("collect"),
            registry,
            Dispatcher::new(&DispatcherConfig::small()).unwrap(),
            Arc::new(ReservoirMetrics::default()),
        )
    }

    fn collecting_registry() -> (Arc<InMemoryRegistry<u32>>, Seen) {
        let seen: Seen = Arc::default();
        let registry = Arc::new(InMemoryRegistry::new());
        let sink = Arc::clone(&seen);
        registry.register(
            "collect",
            handler_fn("collect", move |batch: Batch<u32>| {
                sink.lock().push(batch.into_items());
                Ok(())
            }),
        );
        (registry, seen)
    }

    #[test]
    fn test_bounded_flush_emits_exact_batches() {
        let (registry, seen) = collecting_registry();
        let coord = coordinator(registry);
        for i in 0..25 {
            coord.queue().push(i).unwrap();
        }

        assert_eq!(coord.flush_bounded(10), 2);
        assert_eq!(coord.queue().len(), 5);
        assert_eq!(coord.flush_bounded(10), 0);

        assert!(coord.dispatcher().shutdown());
        let mut batches = seen.lock().clone();
        batches.sort();
        assert_eq!(batches, vec![(0..10).collect::<Vec<_>>(), (10..20).collect()]);
    }

    #[test]
    fn test_unconditional_flush_takes_everything_once() {
        let (registry, seen) = collecting_registry();
        let coord = coordinator(registry);
        for i in 0..7 {
            coord.queue().push(i).unwrap();
        }

        assert_eq!(coord.flush_scheduled(), Some(7));
        assert_eq!(coord.flush_scheduled(), Some(0));
        assert_eq!(coord.flush_forced(), 0);

        assert!(coord.dispatcher().shutdown());
        assert_eq!(*seen.lock(), vec![(0..7).collect::<Vec<_>>()]);
        assert_eq!(coord.metrics.snapshot().batches_dispatched, 1);
    }

    #[test]
    fn test_scheduled_flush_skips_while_flag_held() {
        let (registry, _seen) = collecting_registry();
        let coord = coordinator(registry);
        coord.queue().push(1).unwrap();

        coord.flush_in_progress.store(true, Ordering::SeqCst);
        assert_eq!(coord.flush_scheduled(), None);
        assert_eq!(coord.metrics.snapshot().timer_fires_skipped, 1);
        assert_eq!(coord.queue().len(), 1, "skipped fire leaves elements queued");

        // The forced path ignores the advisory flag.
        assert_eq!(coord.flush_forced(), 1);
        coord.flush_in_progress.store(false, Ordering::SeqCst);
        coord.dispatcher().shutdown();
    }

    #[test]
    fn test_flag_released_after_handler_resolution_panics() {
        struct PanickingRegistry;
        impl HandlerRegistry<u32> for PanickingRegistry {
            fn resolve(&self, _: &HandlerId) -> Option<Arc<dyn crate::handler::BatchHandler<u32>>> {
                panic!("registry unavailable")
            }
        }

        let coord = Arc::new(FlushCoordinator::new(
            ElementQueue::unbounded(),
            HandlerId::from("any"),
            Arc::new(PanickingRegistry),
            Dispatcher::new(&DispatcherConfig::small()).unwrap(),
            Arc::new(ReservoirMetrics::default()),
        ));
        coord.queue().push(1).unwrap();

        let c = Arc::clone(&coord);
        let result = thread::spawn(move || c.flush_scheduled()).join();
        assert!(result.is_err());
        assert!(!coord.flush_in_progress.load(Ordering::SeqCst));
        assert!(!coord.drain_lock.is_locked());
        coord.dispatcher().shutdown();
    }

    #[test]
    #[traced_test]
    fn test_unresolved_handler_drops_batch_and_logs() {
        let registry = Arc::new(InMemoryRegistry::<u32>::new());
        let coord = coordinator(Arc::clone(&registry));
        for i in 0..3 {
            coord.queue().push(i).unwrap();
        }

        assert_eq!(coord.flush_forced(), 3);
        let snap = coord.metrics.snapshot();
        assert_eq!(snap.batches_unresolved, 1);
        assert_eq!(snap.elements_dropped, 3);
        assert!(logs_contain("no handler registered; dropping batch"));

        // Late registration is picked up by the next flush.
        let (tx, rx) = mpsc::channel();
        let tx = parking_lot::Mutex::new(tx);
        registry.register(
            "collect",
            handler_fn("late", move |batch: Batch<u32>| {
                tx.lock().send(batch.len()).map_err(|e| HandlerError::release(e.to_string()))
            }),
        );
        coord.queue().push(99).unwrap();
        assert_eq!(coord.flush_forced(), 1);
        assert_eq!(rx.recv_timeout(Duration::from_secs(2)), Ok(1));
        coord.dispatcher().shutdown();
    }

    #[test]
    fn test_saturated_dispatcher_drops_batch() {
        let (gate_tx, gate_rx) = mpsc::channel::<()>();
        let gate_rx = parking_lot::Mutex::new(gate_rx);
        let registry = Arc::new(InMemoryRegistry::new());
        registry.register(
            "collect",
            handler_fn("gated", move |_: Batch<u32>| {
                let _ = gate_rx.lock().recv();
                Ok(())
            }),
        );
        let coord = FlushCoordinator::new(
            ElementQueue::unbounded(),
            HandlerId::from("collect"),
            registry,
            Dispatcher::new(&DispatcherConfig::small().with_queue_capacity(1)).unwrap(),
            Arc::new(ReservoirMetrics::default()),
        );

        for i in 0..4 {
            coord.queue().push(i).unwrap();
        }
        assert_eq!(coord.flush_bounded(2), 2);

        let snap = coord.metrics.snapshot();
        assert_eq!(snap.batches_dispatched, 1);
        assert_eq!(snap.batches_rejected, 1);
        assert_eq!(snap.elements_dropped, 2);

        gate_tx.send(()).unwrap();
        assert!(coord.dispatcher().shutdown());
    }

    #[test]
    fn test_concurrent_bounded_flushes_are_disjoint() {
        let (registry, seen) = collecting_registry();
        let coord = Arc::new(coordinator(registry));

        let producers: Vec<_> = (0..4u32)
            .map(|p| {
                let coord = Arc::clone(&coord);
                thread::spawn(move || {
                    for seq in 0..500u32 {
                        coord.queue().push(p * 1000 + seq).unwrap();
                        if coord.queue().len() >= 8 {
                            coord.flush_bounded(8);
                        }
                    }
                })
            })
            .collect();
        for handle in producers {
            handle.join().unwrap();
        }
        coord.flush_forced();
        assert!(coord.dispatcher().shutdown());

        let batches = seen.lock().clone();
        let mut all: Vec<u32> = batches.iter().flatten().copied().collect();
        assert_eq!(all.len(), 2000);
        all.sort_unstable();
        all.dedup();
        assert_eq!(all.len(), 2000, "an element appeared in two batches");
    }
}
