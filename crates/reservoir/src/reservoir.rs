//! The reservoir handle: what producers and the owning process touch.

#[cfg(debug_assertions)]
use crate::invariants::debug_assert_producers_quiesced;
use crate::config::{DispatcherConfig, QueueConfig, TriggerPolicy};
use crate::dispatcher::Dispatcher;
use crate::error::ConfigError;
use crate::flush::FlushCoordinator;
use crate::handler::{HandlerId, HandlerRegistry};
use crate::metrics::ReservoirMetrics;
use crate::queue::{ElementQueue, Overflow};
use crate::shutdown::ShutdownState;
use crate::trigger::{self, FlushTimer};
use parking_lot::{Mutex, Once};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, trace, warn};

/// Concurrent batching buffer.
///
/// Share it between producer threads with an `Arc`. `add` never blocks on a
/// handler and never fails; `close` flushes what is left and waits a bounded
/// grace period for workers.
pub struct Reservoir<T: Send + 'static> {
    coordinator: Arc<FlushCoordinator<T>>,
    policy: TriggerPolicy,
    state: ShutdownState,
    timer: Mutex<Option<FlushTimer>>,
    close_once: Once,
    metrics: Arc<ReservoirMetrics>,
}

impl<T: Send + 'static> Reservoir<T> {
    /// Reservoir with the default queue and dispatcher configuration.
    pub fn new(
        policy: TriggerPolicy,
        handler_id: impl Into<HandlerId>,
        registry: Arc<dyn HandlerRegistry<T>>,
    ) -> Result<Self, ConfigError> {
        Self::builder(policy, handler_id).registry(registry).build()
    }

    /// Starts a builder; a registry must be set before [`build`](ReservoirBuilder::build).
    pub fn builder(policy: TriggerPolicy, handler_id: impl Into<HandlerId>) -> ReservoirBuilder<T> {
        ReservoirBuilder {
            policy,
            handler_id: handler_id.into(),
            registry: None,
            dispatcher: DispatcherConfig::default(),
            queue: QueueConfig::default(),
            timer_initial_delay: None,
        }
    }

    /// Buffers `element`.
    ///
    /// After `close` has begun this is a silent no-op. A full bounded queue
    /// loses one element according to its overflow policy. Under a count
    /// policy the calling thread may run the bounded flush (drain and submit,
    /// never the handler itself).
    pub fn add(&self, element: T) {
        let Some(_active) = self.state.enter() else {
            self.metrics.record_rejected();
            trace!(handler_id = %self.coordinator.handler_id(), "add after close ignored");
            return;
        };

        match self.coordinator.queue().push(element) {
            Ok(()) => self.metrics.record_added(),
            Err(lost) => {
                if lost.pushed() {
                    self.metrics.record_added();
                }
                self.metrics.record_overflowed();
                let policy = match lost {
                    Overflow::Rejected(_) => "reject-newest",
                    Overflow::Evicted(_) => "drop-oldest",
                };
                warn!(
                    handler_id = %self.coordinator.handler_id(),
                    capacity = ?self.coordinator.queue().capacity(),
                    policy,
                    "queue full; element dropped"
                );
            }
        }

        trigger::on_element_added(&self.policy, &self.coordinator);
    }

    /// Flushes everything currently buffered as one batch.
    ///
    /// Waits for a concurrently running drain instead of skipping. Returns
    /// the number of elements handed to the dispatcher (or dropped, if the
    /// handler is unresolved or the pool saturated).
    pub fn flush(&self) -> usize {
        self.coordinator.flush_forced()
    }

    /// Stops admission, flushes the remainder and waits up to the grace
    /// period for dispatched batches.
    ///
    /// Idempotent. A call that overlaps a running close returns only once
    /// that close has finished. Blocking: must not be called from inside an
    /// async runtime.
    pub fn close(&self) {
        if self.close_once.state().done() {
            debug!(handler_id = %self.coordinator.handler_id(), "reservoir already closed");
            return;
        }
        self.close_once.call_once(|| self.close_gracefully());
    }

    fn close_gracefully(&self) {
        if !self.state.close() {
            return;
        }

        self.state.wait_for_producers();
        #[cfg(debug_assertions)]
        debug_assert_producers_quiesced!(self.state.active_producers());

        let timer = self.timer.lock().take();
        if let Some(timer) = timer {
            let task = timer.stop();
            self.coordinator.dispatcher().block_on(async {
                let _ = task.await;
            });
        }

        let remaining = self.coordinator.flush_forced();
        let drained = self.coordinator.dispatcher().shutdown();

        debug!(
            handler_id = %self.coordinator.handler_id(),
            remaining,
            drained,
            "reservoir closed"
        );
    }

    /// Approximate number of buffered elements.
    pub fn len(&self) -> usize {
        self.coordinator.queue().len()
    }

    pub fn is_empty(&self) -> bool {
        self.coordinator.queue().is_empty()
    }

    /// Returns `true` once `close` has begun (or the reservoir was dropped).
    pub fn is_closed(&self) -> bool {
        self.state.is_closed()
    }

    /// Batches dispatched but not yet finished by a handler.
    pub fn in_flight(&self) -> usize {
        self.coordinator.dispatcher().in_flight()
    }

    /// Counters shared with the flush path and the workers.
    pub fn metrics(&self) -> &Arc<ReservoirMetrics> {
        &self.metrics
    }

    /// Id looked up in the registry on every flush.
    pub fn handler_id(&self) -> &HandlerId {
        self.coordinator.handler_id()
    }

    pub fn policy(&self) -> TriggerPolicy {
        self.policy
    }
}

impl<T: Send + 'static> Drop for Reservoir<T> {
    fn drop(&mut self) {
        if !self.state.close() {
            return;
        }
        warn!(
            handler_id = %self.coordinator.handler_id(),
            pending = self.coordinator.queue().len(),
            "reservoir dropped without close(); flushing without waiting for workers"
        );
        // Dropping the timer drops its stop sender, which ends the task.
        drop(self.timer.get_mut().take());
        self.coordinator.flush_forced();
        self.coordinator.dispatcher().shutdown_now();
    }
}

/// Builder for [`Reservoir`]; every setting is validated in [`build`](Self::build).
pub struct ReservoirBuilder<T> {
    policy: TriggerPolicy,
    handler_id: HandlerId,
    registry: Option<Arc<dyn HandlerRegistry<T>>>,
    dispatcher: DispatcherConfig,
    queue: QueueConfig,
    timer_initial_delay: Option<Duration>,
}

impl<T: Send + 'static> ReservoirBuilder<T> {
    /// Registry consulted on every flush.
    pub fn registry(mut self, registry: Arc<dyn HandlerRegistry<T>>) -> Self {
        self.registry = Some(registry);
        self
    }

    /// Worker pool sizing; defaults to [`DispatcherConfig::default`].
    pub fn dispatcher(mut self, config: DispatcherConfig) -> Self {
        self.dispatcher = config;
        self
    }

    /// Element queue bound; unbounded unless set.
    pub fn queue(mut self, config: QueueConfig) -> Self {
        self.queue = config;
        self
    }

    /// Overrides the delay before the first timer fire.
    ///
    /// Defaults to zero for [`TriggerPolicy::ByTime`] and one interval for
    /// [`TriggerPolicy::ByCountOrTime`]; ignored for count-only policies.
    pub fn timer_initial_delay(mut self, delay: Duration) -> Self {
        self.timer_initial_delay = Some(delay);
        self
    }

    /// Validates the configuration, starts the worker pool and, for time
    /// policies, the flush timer.
    pub fn build(self) -> Result<Reservoir<T>, ConfigError> {
        self.policy.validate()?;
        self.queue.validate()?;
        self.dispatcher.validate()?;
        let registry = self.registry.ok_or(ConfigError::MissingRegistry)?;

        let metrics = Arc::new(ReservoirMetrics::default());
        let dispatcher = Dispatcher::new(&self.dispatcher)?;
        let coordinator = Arc::new(FlushCoordinator::new(
            ElementQueue::new(self.queue),
            self.handler_id,
            registry,
            dispatcher,
            Arc::clone(&metrics),
        ));

        let timer = match (self.policy.max_interval(), self.policy.default_initial_delay()) {
            (Some(period), Some(default_delay)) => Some(FlushTimer::start(
                Arc::clone(&coordinator),
                period,
                self.timer_initial_delay.unwrap_or(default_delay),
            )),
            _ => None,
        };

        debug!(
            handler_id = %coordinator.handler_id(),
            policy = ?self.policy,
            "reservoir started"
        );

        Ok(Reservoir {
            coordinator,
            policy: self.policy,
            state: ShutdownState::new(),
            timer: Mutex::new(timer),
            close_once: Once::new(),
            metrics,
        })
    }
}
