//! Configuration for triggers, the element queue and the dispatcher.
//!
//! Every type here is a plain value with a `validate()` method; the
//! reservoir builder calls them all before anything is started, so an
//! invalid configuration never spawns a thread.

use crate::error::ConfigError;
use std::num::NonZeroUsize;
use std::time::Duration;

/// Decides when buffered elements are flushed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub enum TriggerPolicy {
    /// Flush fixed-size batches whenever `max_count` elements are pending.
    ByCount {
        /// Exact size of every count-triggered batch.
        max_count: usize,
    },
    /// Flush everything pending once per `max_interval`.
    ByTime {
        /// Period of the flush timer.
        max_interval: Duration,
    },
    /// Count-triggered batches plus a periodic safety-net flush.
    ByCountOrTime {
        /// Exact size of every count-triggered batch.
        max_count: usize,
        /// Period of the flush timer.
        max_interval: Duration,
    },
}

impl TriggerPolicy {
    /// Validated [`TriggerPolicy::ByCount`].
    pub fn by_count(max_count: usize) -> Result<Self, ConfigError> {
        let policy = Self::ByCount { max_count };
        policy.validate()?;
        Ok(policy)
    }

    /// Validated [`TriggerPolicy::ByTime`].
    pub fn by_time(max_interval: Duration) -> Result<Self, ConfigError> {
        let policy = Self::ByTime { max_interval };
        policy.validate()?;
        Ok(policy)
    }

    /// Validated [`TriggerPolicy::ByCountOrTime`].
    pub fn by_count_or_time(max_count: usize, max_interval: Duration) -> Result<Self, ConfigError> {
        let policy = Self::ByCountOrTime {
            max_count,
            max_interval,
        };
        policy.validate()?;
        Ok(policy)
    }

    /// Checks thresholds: counts and intervals must be non-zero.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if let Some(0) = self.max_count() {
            return Err(ConfigError::ZeroMaxCount);
        }
        match self.max_interval() {
            Some(interval) if interval.is_zero() => Err(ConfigError::ZeroMaxInterval(interval)),
            _ => Ok(()),
        }
    }

    /// Count threshold, if this policy has one.
    #[inline]
    pub fn max_count(&self) -> Option<usize> {
        match *self {
            Self::ByCount { max_count } | Self::ByCountOrTime { max_count, .. } => Some(max_count),
            Self::ByTime { .. } => None,
        }
    }

    /// Timer period, if this policy has one.
    #[inline]
    pub fn max_interval(&self) -> Option<Duration> {
        match *self {
            Self::ByTime { max_interval } | Self::ByCountOrTime { max_interval, .. } => {
                Some(max_interval)
            }
            Self::ByCount { .. } => None,
        }
    }

    /// Delay before the first timer fire when none is configured explicitly.
    ///
    /// A pure time policy fires immediately; the mixed policy waits one full
    /// interval since the count trigger already covers bursts.
    pub(crate) fn default_initial_delay(&self) -> Option<Duration> {
        match *self {
            Self::ByCount { .. } => None,
            Self::ByTime { .. } => Some(Duration::ZERO),
            Self::ByCountOrTime { max_interval, .. } => Some(max_interval),
        }
    }
}

/// What a bounded queue does with an element that does not fit.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub enum OverflowPolicy {
    /// Drop the element being added.
    #[default]
    RejectNewest,
    /// Evict the oldest buffered element to make room.
    DropOldest,
}

/// Capacity of the element queue.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub enum QueueConfig {
    /// Grows without limit.
    #[default]
    Unbounded,
    /// Holds at most `capacity` elements; overflow follows `overflow`.
    Bounded {
        /// Maximum number of buffered elements.
        capacity: usize,
        /// Behavior once `capacity` is reached.
        overflow: OverflowPolicy,
    },
}

impl QueueConfig {
    /// Bounded queue that rejects the newest element on overflow.
    pub fn bounded(capacity: usize) -> Self {
        Self::Bounded {
            capacity,
            overflow: OverflowPolicy::RejectNewest,
        }
    }

    /// Sets the overflow policy (no effect on an unbounded queue).
    pub fn with_overflow(self, policy: OverflowPolicy) -> Self {
        match self {
            Self::Bounded { capacity, .. } => Self::Bounded {
                capacity,
                overflow: policy,
            },
            Self::Unbounded => Self::Unbounded,
        }
    }

    /// Rejects a bounded queue with zero capacity.
    pub fn validate(&self) -> Result<(), ConfigError> {
        match self {
            Self::Bounded { capacity: 0, .. } => Err(ConfigError::ZeroCapacity("queue")),
            _ => Ok(()),
        }
    }
}

/// Sizing and lifecycle of the worker pool that runs handlers.
#[derive(Debug, Clone, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct DispatcherConfig {
    /// Handler threads started with the dispatcher.
    ///
    /// A warm start, not a pinned floor: like grown threads, a core thread
    /// idle for `keep_alive` is reclaimed. The timer runs on a separate
    /// async worker and is not counted here.
    ///
    /// Default: available parallelism × 2
    pub core_workers: usize,

    /// Upper bound on threads running handlers; grown lazily under load.
    ///
    /// Default: `core_workers` × 4
    pub max_workers: usize,

    /// Maximum batches outstanding (queued or running) before submissions
    /// are rejected.
    ///
    /// Default: 1,000,000
    pub queue_capacity: usize,

    /// Idle time after which a grown handler thread is reclaimed.
    ///
    /// Default: 60 minutes
    pub keep_alive: Duration,

    /// How long `close()` waits for outstanding batches.
    ///
    /// Default: 2s
    pub grace_period: Duration,

    /// Name given to every pool thread.
    pub thread_name: String,
}

impl Default for DispatcherConfig {
    fn default() -> Self {
        let cores = std::thread::available_parallelism().map_or(1, NonZeroUsize::get);
        let core_workers = cores * 2;
        Self {
            core_workers,
            max_workers: core_workers * 4,
            queue_capacity: 1_000_000,
            keep_alive: Duration::from_secs(60 * 60),
            grace_period: Duration::from_secs(2),
            thread_name: "reservoir-worker".to_string(),
        }
    }
}

impl DispatcherConfig {
    /// A small pool for tests and low-volume reservoirs.
    pub fn small() -> Self {
        Self {
            core_workers: 1,
            max_workers: 4,
            queue_capacity: 1024,
            keep_alive: Duration::from_secs(10),
            ..Self::default()
        }
    }

    /// Sets the core and maximum worker counts.
    pub fn with_workers(mut self, core: usize, max: usize) -> Self {
        self.core_workers = core;
        self.max_workers = max;
        self
    }

    /// Sets the outstanding-batch capacity.
    pub fn with_queue_capacity(mut self, capacity: usize) -> Self {
        self.queue_capacity = capacity;
        self
    }

    /// Sets the idle keep-alive for grown threads.
    pub fn with_keep_alive(mut self, keep_alive: Duration) -> Self {
        self.keep_alive = keep_alive;
        self
    }

    /// Sets the shutdown grace period.
    pub fn with_grace_period(mut self, grace_period: Duration) -> Self {
        self.grace_period = grace_period;
        self
    }

    /// Sets the pool thread name.
    pub fn with_thread_name(mut self, name: impl Into<String>) -> Self {
        self.thread_name = name.into();
        self
    }

    /// Checks worker bounds and that the slot capacity is non-zero and fits
    /// the semaphore.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.core_workers == 0 {
            return Err(ConfigError::ZeroCoreWorkers);
        }
        if self.max_workers < self.core_workers {
            return Err(ConfigError::WorkerBounds {
                core: self.core_workers,
                max: self.max_workers,
            });
        }
        if self.queue_capacity == 0 {
            return Err(ConfigError::ZeroCapacity("dispatcher"));
        }
        if u32::try_from(self.queue_capacity).is_err() {
            return Err(ConfigError::CapacityTooLarge(self.queue_capacity));
        }
        Ok(())
    }
}
