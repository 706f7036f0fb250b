//! Error types for reservoir operations.

use std::time::Duration;
use thiserror::Error;

/// Invalid configuration, surfaced when a reservoir is built.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ConfigError {
    /// A count trigger was configured with `max_count == 0`.
    #[error("max_count must be greater than 0")]
    ZeroMaxCount,

    /// A time trigger was configured with a zero interval.
    #[error("max_interval must be greater than 0 (got {0:?})")]
    ZeroMaxInterval(Duration),

    /// The dispatcher needs at least one core worker.
    #[error("core_workers must be greater than 0")]
    ZeroCoreWorkers,

    /// `max_workers` is below `core_workers`.
    #[error("max_workers ({max}) must be at least core_workers ({core})")]
    WorkerBounds {
        /// Configured core worker count.
        core: usize,
        /// Configured maximum worker count.
        max: usize,
    },

    /// A capacity (dispatcher slots or bounded queue) was zero.
    #[error("{0} capacity must be greater than 0")]
    ZeroCapacity(&'static str),

    /// The dispatcher capacity does not fit the slot counter.
    #[error("dispatcher capacity {0} exceeds the maximum of 4294967295")]
    CapacityTooLarge(usize),

    /// The builder was finished without a handler registry.
    #[error("no handler registry configured")]
    MissingRegistry,

    /// The worker runtime could not be started.
    #[error("failed to start worker runtime: {0}")]
    Runtime(String),
}

/// Failure reported by (or synthesized for) a batch handler.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum HandlerError {
    /// The handler rejected or failed to process the batch.
    #[error("release failed: {0}")]
    Release(String),

    /// The handler panicked while processing the batch.
    #[error("handler panicked: {0}")]
    Panicked(String),
}

impl HandlerError {
    /// Convenience constructor for handler implementations.
    pub fn release(reason: impl Into<String>) -> Self {
        Self::Release(reason.into())
    }

    /// Returns `true` if the handler panicked rather than returning an error.
    #[inline]
    pub fn is_panic(&self) -> bool {
        matches!(self, Self::Panicked(_))
    }
}

/// Reasons a drained batch could not be handed to a worker.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum DispatchError {
    /// Every outstanding-batch slot is in use.
    #[error("dispatcher saturated ({capacity} batches outstanding)")]
    Saturated {
        /// Configured slot capacity.
        capacity: usize,
    },

    /// The dispatcher no longer accepts work.
    #[error("dispatcher has been shut down")]
    ShutDown,
}

impl DispatchError {
    /// Returns `true` if the rejection is load related and later submissions may succeed.
    #[inline]
    pub fn is_recoverable(&self) -> bool {
        matches!(self, Self::Saturated { .. })
    }

    /// Returns `true` if the dispatcher is permanently unusable.
    #[inline]
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::ShutDown)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_dispatch_error_classification() {
        let saturated = DispatchError::Saturated { capacity: 4 };
        assert!(saturated.is_recoverable());
        assert!(!saturated.is_terminal());
        assert!(DispatchError::ShutDown.is_terminal());
        assert_eq!(
            saturated.to_string(),
            "dispatcher saturated (4 batches outstanding)"
        );
    }

    #[test]
    fn test_config_error_messages() {
        let err = ConfigError::WorkerBounds { core: 8, max: 2 };
        assert_eq!(
            err.to_string(),
            "max_workers (2) must be at least core_workers (8)"
        );
        assert_eq!(
            ConfigError::ZeroCapacity("queue").to_string(),
            "queue capacity must be greater than 0"
        );
    }

    #[test]
    fn test_handler_error_helpers() {
        let err = HandlerError::release("sink offline");
        assert_eq!(err.to_string(), "release failed: sink offline");
        assert!(!err.is_panic());
        assert!(HandlerError::Panicked("boom".into()).is_panic());
    }
}
