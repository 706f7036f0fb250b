//! Worker pool that runs handlers against batches.
//!
//! Each reservoir owns one dedicated multi-thread tokio runtime:
//!
//! - one async worker drives the flush timer and never runs a handler;
//! - handlers run through `spawn_blocking`. `core_workers` handler threads
//!   are started with the dispatcher, more are grown lazily up to
//!   `max_workers`, and any thread idle for `keep_alive` is reclaimed;
//! - a [`Semaphore`] with `queue_capacity` permits bounds the number of
//!   outstanding batches (queued or running). A submission that finds no
//!   free permit is rejected immediately; the flush path never waits.
//!
//! Shutdown stops admission, waits until every permit is back or the grace
//! period elapses, then shuts the runtime down in the background. Handlers
//! still running at that point are detached.

use crate::batch::Batch;
use crate::config::DispatcherConfig;
use crate::error::{ConfigError, DispatchError, HandlerError};
use crate::handler::BatchHandler;
use crate::metrics::ReservoirMetrics;
use parking_lot::Mutex;
use std::any::Any;
use std::future::Future;
use std::panic::{self, AssertUnwindSafe};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Barrier};
use std::time::Duration;
use tokio::runtime::{Handle, Runtime};
use tokio::sync::Semaphore;
use tracing::{debug, error, warn};

/// Bounded-concurrency executor scoped to one reservoir.
pub struct Dispatcher {
    runtime: Mutex<Option<Runtime>>,
    handle: Handle,
    slots: Arc<Semaphore>,
    capacity: usize,
    accepting: AtomicBool,
    grace_period: Duration,
}

impl Dispatcher {
    /// Starts the worker runtime.
    pub fn new(config: &DispatcherConfig) -> Result<Self, ConfigError> {
        config.validate()?;

        let runtime = tokio::runtime::Builder::new_multi_thread()
            .worker_threads(1)
            .max_blocking_threads(config.max_workers)
            .thread_keep_alive(config.keep_alive)
            .thread_name(config.thread_name.clone())
            .enable_time()
            .build()
            .map_err(|e| ConfigError::Runtime(e.to_string()))?;
        let handle = runtime.handle().clone();
        prestart_handler_threads(&handle, config.core_workers);

        debug!(
            core_workers = config.core_workers,
            max_workers = config.max_workers,
            queue_capacity = config.queue_capacity,
            "dispatcher started"
        );

        Ok(Self {
            runtime: Mutex::new(Some(runtime)),
            handle,
            slots: Arc::new(Semaphore::new(config.queue_capacity)),
            capacity: config.queue_capacity,
            accepting: AtomicBool::new(true),
            grace_period: config.grace_period,
        })
    }

    /// Hands `batch` to a worker without blocking.
    ///
    /// The batch is consumed either way: on `Err` it has been dropped and the
    /// caller is expected to log and account for the loss.
    pub fn submit<T>(
        &self,
        batch: Batch<T>,
        handler: Arc<dyn BatchHandler<T>>,
        metrics: Arc<ReservoirMetrics>,
    ) -> Result<(), DispatchError>
    where
        T: Send + 'static,
    {
        if !self.accepting.load(Ordering::Acquire) {
            return Err(DispatchError::ShutDown);
        }

        let Ok(permit) = Arc::clone(&self.slots).try_acquire_owned() else {
            return Err(DispatchError::Saturated {
                capacity: self.capacity,
            });
        };

        metrics.record_dispatched(batch.len() as u64);
        self.handle.spawn_blocking(move || {
            run_handler(batch, handler.as_ref(), &metrics);
            drop(permit);
        });
        Ok(())
    }

    /// Batches submitted but not yet finished.
    pub fn in_flight(&self) -> usize {
        self.capacity - self.slots.available_permits()
    }

    /// Returns `false` once shutdown has begun.
    pub fn is_accepting(&self) -> bool {
        self.accepting.load(Ordering::Acquire)
    }

    /// Handle for spawning timer tasks onto the worker runtime.
    pub(crate) fn handle(&self) -> &Handle {
        &self.handle
    }

    /// Drives `future` to completion on the worker runtime.
    ///
    /// Returns `None` once the runtime is gone. Must not be called from
    /// inside an async context.
    pub(crate) fn block_on<F: Future>(&self, future: F) -> Option<F::Output> {
        let runtime = self.runtime.lock();
        runtime.as_ref().map(|rt| rt.block_on(future))
    }

    /// Stops admission and waits up to the grace period for outstanding
    /// batches.
    ///
    /// Returns `true` if every batch finished in time. Calling it again is a
    /// no-op that returns `true`.
    pub fn shutdown(&self) -> bool {
        self.accepting.store(false, Ordering::Release);

        let Some(runtime) = self.runtime.lock().take() else {
            return true;
        };

        // Every permit back means every batch finished.
        let permits = self.capacity as u32;
        let drained = runtime.block_on(async {
            tokio::time::timeout(self.grace_period, self.slots.acquire_many(permits))
                .await
                .is_ok()
        });

        if drained {
            debug!("dispatcher drained");
        } else {
            warn!(
                in_flight = self.in_flight(),
                grace_period = ?self.grace_period,
                "grace period elapsed with batches still running; detaching workers"
            );
        }

        runtime.shutdown_background();
        drained
    }

    /// Stops admission and tears the runtime down without waiting.
    ///
    /// Safe to call from within an async context.
    pub fn shutdown_now(&self) {
        self.accepting.store(false, Ordering::Release);
        let runtime = self.runtime.lock().take();
        if let Some(runtime) = runtime {
            runtime.shutdown_background();
        }
    }
}

impl Drop for Dispatcher {
    fn drop(&mut self) {
        self.shutdown_now();
    }
}

/// Starts `count` blocking threads up front.
///
/// Each placeholder task parks on a shared barrier, so no thread can pick up
/// a second one and the pool really grows to `count`.
fn prestart_handler_threads(handle: &Handle, count: usize) {
    let barrier = Arc::new(Barrier::new(count + 1));
    for _ in 0..count {
        let barrier = Arc::clone(&barrier);
        handle.spawn_blocking(move || {
            barrier.wait();
        });
    }
    barrier.wait();
}

fn run_handler<T>(batch: Batch<T>, handler: &dyn BatchHandler<T>, metrics: &ReservoirMetrics) {
    let batch_id = batch.id();
    let batch_size = batch.len();

    let outcome = panic::catch_unwind(AssertUnwindSafe(|| handler.release(batch)))
        .unwrap_or_else(|payload| Err(HandlerError::Panicked(panic_message(payload.as_ref()))));

    match outcome {
        Ok(()) => {
            metrics.record_released();
            debug!(batch_id, batch_size, handler = handler.name(), "batch released");
        }
        Err(e) => {
            metrics.record_failed();
            error!(
                batch_id,
                batch_size,
                handler = handler.name(),
                error = %e,
                "batch release failed"
            );
        }
    }
}

fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(msg) = payload.downcast_ref::<&str>() {
        (*msg).to_string()
    } else if let Some(msg) = payload.downcast_ref::<String>() {
        msg.clone()
    } else {
        "non-string panic payload".to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::handler::handler_fn;
    use std::sync::atomic::AtomicUsize;
    use std::sync::mpsc;
    use std::time::Instant;

    fn config() -> DispatcherConfig {
        DispatcherConfig::small().with_grace_period(Duration::from_secs(2))
    }

    #[test]
    fn test_submit_runs_handler() {
        let dispatcher = Dispatcher::new(&config()).unwrap();
        let metrics = Arc::new(ReservoirMetrics::default());
        let seen = Arc::new(AtomicUsize::new(0));

        let sink = Arc::clone(&seen);
        let handler: Arc<dyn BatchHandler<u32>> = Arc::new(handler_fn("count", move |b: Batch<u32>| {
            sink.fetch_add(b.len(), Ordering::SeqCst);
            Ok(())
        }));

        for id in 0..5 {
            dispatcher
                .submit(Batch::new(id, vec![1, 2, 3]), Arc::clone(&handler), Arc::clone(&metrics))
                .unwrap();
        }

        assert!(dispatcher.shutdown());
        assert_eq!(seen.load(Ordering::SeqCst), 15);
        let snap = metrics.snapshot();
        assert_eq!(snap.batches_dispatched, 5);
        assert_eq!(snap.batches_released, 5);
        assert_eq!(dispatcher.in_flight(), 0);
    }

    #[test]
    fn test_saturation_rejects_without_blocking() {
        let dispatcher = Dispatcher::new(&config().with_queue_capacity(1)).unwrap();
        let metrics = Arc::new(ReservoirMetrics::default());
        let (release_tx, release_rx) = mpsc::channel::<()>();
        let release_rx = parking_lot::Mutex::new(release_rx);

        let handler: Arc<dyn BatchHandler<u8>> = Arc::new(handler_fn("gate", move |_: Batch<u8>| {
            let _ = release_rx.lock().recv();
            Ok(())
        }));

        dispatcher
            .submit(Batch::new(0, vec![1]), Arc::clone(&handler), Arc::clone(&metrics))
            .unwrap();

        let start = Instant::now();
        let err = dispatcher
            .submit(Batch::new(1, vec![2]), Arc::clone(&handler), Arc::clone(&metrics))
            .unwrap_err();
        assert_eq!(err, DispatchError::Saturated { capacity: 1 });
        assert!(start.elapsed() < Duration::from_millis(100));
        assert_eq!(dispatcher.in_flight(), 1);

        release_tx.send(()).unwrap();
        assert!(dispatcher.shutdown());
        assert_eq!(metrics.snapshot().batches_dispatched, 1);
    }

    #[test]
    fn test_handler_panic_is_contained() {
        let dispatcher = Dispatcher::new(&config()).unwrap();
        let metrics = Arc::new(ReservoirMetrics::default());
        let handler: Arc<dyn BatchHandler<u8>> = Arc::new(handler_fn("explode", |_: Batch<u8>| {
            panic!("sink exploded")
        }));

        dispatcher
            .submit(Batch::new(0, vec![1]), Arc::clone(&handler), Arc::clone(&metrics))
            .unwrap();
        dispatcher
            .submit(Batch::new(1, vec![2]), handler, Arc::clone(&metrics))
            .unwrap();

        assert!(dispatcher.shutdown());
        let snap = metrics.snapshot();
        assert_eq!(snap.batches_failed, 2);
        assert_eq!(snap.batches_released, 0);
    }

    #[test]
    fn test_shutdown_bounded_by_grace_period() {
        let grace = Duration::from_millis(200);
        let dispatcher = Dispatcher::new(&config().with_grace_period(grace)).unwrap();
        let metrics = Arc::new(ReservoirMetrics::default());
        let handler: Arc<dyn BatchHandler<u8>> = Arc::new(handler_fn("stuck", |_: Batch<u8>| {
            std::thread::sleep(Duration::from_secs(5));
            Ok(())
        }));

        dispatcher
            .submit(Batch::new(0, vec![1]), handler, Arc::clone(&metrics))
            .unwrap();

        let start = Instant::now();
        assert!(!dispatcher.shutdown());
        assert!(start.elapsed() < Duration::from_secs(2));

        // Second call is a no-op.
        assert!(dispatcher.shutdown());
    }

    #[test]
    fn test_submit_after_shutdown() {
        let dispatcher = Dispatcher::new(&config()).unwrap();
        dispatcher.shutdown();
        assert!(!dispatcher.is_accepting());

        let handler: Arc<dyn BatchHandler<u8>> = Arc::new(handler_fn("noop", |_: Batch<u8>| Ok(())));
        let err = dispatcher
            .submit(Batch::new(0, vec![1]), handler, Arc::new(ReservoirMetrics::default()))
            .unwrap_err();
        assert!(err.is_terminal());
    }

    #[test]
    fn test_core_workers_run_handlers_not_timer_threads() {
        let dispatcher = Dispatcher::new(&config().with_workers(3, 3)).unwrap();
        assert_eq!(dispatcher.handle().metrics().num_workers(), 1);

        // All three core threads run handlers at once.
        let metrics = Arc::new(ReservoirMetrics::default());
        let barrier = Arc::new(Barrier::new(3));
        let handler: Arc<dyn BatchHandler<u8>> = Arc::new(handler_fn("meet", move |_: Batch<u8>| {
            barrier.wait();
            Ok(())
        }));
        for id in 0..3 {
            dispatcher
                .submit(Batch::new(id, vec![1]), Arc::clone(&handler), Arc::clone(&metrics))
                .unwrap();
        }
        assert!(dispatcher.shutdown());
        assert_eq!(metrics.snapshot().batches_released, 3);
    }

    #[test]
    fn test_invalid_config_is_rejected() {
        let err = Dispatcher::new(&DispatcherConfig::small().with_workers(2, 1)).err();
        assert_eq!(err, Some(ConfigError::WorkerBounds { core: 2, max: 1 }));
    }
}
