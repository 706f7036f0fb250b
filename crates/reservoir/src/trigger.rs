//! Trigger evaluation: the count check run by producers and the periodic
//! flush timer.
//!
//! The timer is a single task on the dispatcher's async worker. Each tick
//! runs the scheduled flush inline: a drain plus a non-blocking submit, so
//! handlers occupying every blocking thread never hold a fire back. Ticks
//! that fall due while a flush is still running are skipped.

use crate::config::TriggerPolicy;
use crate::flush::FlushCoordinator;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::oneshot;
use tokio::task::JoinHandle;
use tokio::time::{self, Instant, MissedTickBehavior};
use tracing::debug;

/// Runs the count trigger after an element was enqueued.
///
/// Returns the number of batches dispatched (zero when below threshold or
/// for a pure time policy).
#[inline]
pub(crate) fn on_element_added<T: Send + 'static>(
    policy: &TriggerPolicy,
    coordinator: &FlushCoordinator<T>,
) -> usize {
    match policy.max_count() {
        Some(max_count) if coordinator.queue().len() >= max_count => {
            coordinator.flush_bounded(max_count)
        }
        _ => 0,
    }
}

/// Periodic unconditional flush.
pub(crate) struct FlushTimer {
    stop_tx: Option<oneshot::Sender<()>>,
    task: JoinHandle<()>,
}

impl FlushTimer {
    /// Starts the timer on the coordinator's dispatcher runtime.
    ///
    /// The first fire happens after `initial_delay`, then every `period`.
    /// Ticks missed while the runtime was busy are skipped, not replayed.
    pub(crate) fn start<T: Send + 'static>(
        coordinator: Arc<FlushCoordinator<T>>,
        period: Duration,
        initial_delay: Duration,
    ) -> Self {
        let (stop_tx, mut stop_rx) = oneshot::channel::<()>();
        let handle = coordinator.dispatcher().handle().clone();

        let task = handle.spawn(async move {
            let mut ticker = time::interval_at(Instant::now() + initial_delay, period);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);

            loop {
                tokio::select! {
                    biased;

                    _ = &mut stop_rx => break,

                    _ = ticker.tick() => {
                        coordinator.flush_scheduled();
                    }
                }
            }
            debug!(handler_id = %coordinator.handler_id(), "flush timer stopped");
        });

        Self {
            stop_tx: Some(stop_tx),
            task,
        }
    }

    /// Signals the timer to stop and returns its task for joining.
    pub(crate) fn stop(mut self) -> JoinHandle<()> {
        if let Some(tx) = self.stop_tx.take() {
            let _ = tx.send(());
        }
        self.task
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::batch::Batch;
    use crate::config::DispatcherConfig;
    use crate::dispatcher::Dispatcher;
    use crate::handler::{handler_fn, HandlerId, InMemoryRegistry};
    use crate::metrics::ReservoirMetrics;
    use crate::queue::ElementQueue;
    use std::sync::atomic::{AtomicUsize, Ordering};

    fn coordinator(batches: Arc<AtomicUsize>) -> Arc<FlushCoordinator<u32>> {
        let registry = Arc::new(InMemoryRegistry::new());
        registry.register(
            "count",
            handler_fn("count", move |_: Batch<u32>| {
                batches.fetch_add(1, Ordering::SeqCst);
                Ok(())
            }),
        );
        Arc::new(FlushCoordinator::new(
            ElementQueue::unbounded(),
            HandlerId::from("count"),
            registry,
            Dispatcher::new(&DispatcherConfig::small()).unwrap(),
            Arc::new(ReservoirMetrics::default()),
        ))
    }

    #[test]
    fn test_count_trigger_threshold() {
        let batches = Arc::new(AtomicUsize::new(0));
        let coord = coordinator(Arc::clone(&batches));
        let policy = TriggerPolicy::ByCount { max_count: 3 };

        coord.queue().push(1).unwrap();
        coord.queue().push(2).unwrap();
        assert_eq!(on_element_added(&policy, &coord), 0);
        coord.queue().push(3).unwrap();
        assert_eq!(on_element_added(&policy, &coord), 1);
        assert!(coord.queue().is_empty());

        let time_only = TriggerPolicy::ByTime {
            max_interval: Duration::from_secs(1),
        };
        for i in 0..10 {
            coord.queue().push(i).unwrap();
        }
        assert_eq!(on_element_added(&time_only, &coord), 0);
        assert_eq!(coord.queue().len(), 10);

        assert!(coord.dispatcher().shutdown());
        assert_eq!(batches.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_timer_flushes_and_stops() {
        let batches = Arc::new(AtomicUsize::new(0));
        let coord = coordinator(Arc::clone(&batches));
        let timer = FlushTimer::start(Arc::clone(&coord), Duration::from_millis(20), Duration::ZERO);

        coord.queue().push(1).unwrap();
        std::thread::sleep(Duration::from_millis(150));
        assert!(coord.queue().is_empty(), "timer should have drained the queue");

        let task = timer.stop();
        coord.dispatcher().block_on(async {
            task.await.unwrap();
        });

        coord.queue().push(2).unwrap();
        std::thread::sleep(Duration::from_millis(80));
        assert_eq!(coord.queue().len(), 1, "stopped timer must not flush");

        assert!(coord.dispatcher().shutdown());
        assert_eq!(batches.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_busy_handlers_do_not_hold_back_timer() {
        let registry = Arc::new(InMemoryRegistry::new());
        registry.register(
            "slow",
            handler_fn("slow", |_: Batch<u32>| {
                std::thread::sleep(Duration::from_millis(1500));
                Ok(())
            }),
        );
        let metrics = Arc::new(ReservoirMetrics::default());
        let config = DispatcherConfig::small()
            .with_workers(1, 1)
            .with_grace_period(Duration::from_millis(50));
        let coord = Arc::new(FlushCoordinator::new(
            ElementQueue::unbounded(),
            HandlerId::from("slow"),
            registry,
            Dispatcher::new(&config).unwrap(),
            Arc::clone(&metrics),
        ));
        let timer = FlushTimer::start(Arc::clone(&coord), Duration::from_millis(20), Duration::ZERO);

        // First batch occupies the only handler thread.
        coord.queue().push(1).unwrap();
        std::thread::sleep(Duration::from_millis(200));
        assert_eq!(metrics.snapshot().batches_dispatched, 1);

        coord.queue().push(2).unwrap();
        std::thread::sleep(Duration::from_millis(200));
        assert!(coord.queue().is_empty(), "timer fire waited behind a busy handler");
        assert_eq!(metrics.snapshot().batches_dispatched, 2);
        assert_eq!(metrics.snapshot().batches_released, 0);

        drop(timer);
        coord.dispatcher().shutdown_now();
    }
}
