//! Concurrent batching buffer.
//!
//! Many producer threads [`add`](Reservoir::add) elements; a trigger policy
//! decides when buffered elements are flushed as a [`Batch`] to a handler,
//! which runs on a bounded worker pool owned by the reservoir.
//!
//! # Features
//!
//! - **Non-blocking add**: a lock-free push plus, under a count policy, a
//!   threshold check. Handlers never run on producer threads
//! - **Count, time or both**: [`TriggerPolicy::ByCount`] emits batches of
//!   exactly `max_count`, [`TriggerPolicy::ByTime`] flushes everything
//!   periodically, [`TriggerPolicy::ByCountOrTime`] does both
//! - **Disjoint batches**: every element is delivered in at most one batch
//! - **Late binding**: the handler is looked up by [`HandlerId`] on every
//!   flush, so it can be registered after the reservoir is built
//! - **Graceful close**: [`close`](Reservoir::close) flushes the remainder
//!   and waits a bounded grace period for running handlers
//!
//! # Example
//!
//! ```
//! use reservoir::{handler_fn, Batch, InMemoryRegistry, Reservoir, TriggerPolicy};
//! use std::sync::Arc;
//!
//! let registry = Arc::new(InMemoryRegistry::new());
//! registry.register(
//!     "printer",
//!     handler_fn("printer", |batch: Batch<u64>| {
//!         println!("batch {} with {} elements", batch.id(), batch.len());
//!         Ok(())
//!     }),
//! );
//!
//! let policy = TriggerPolicy::by_count(100).unwrap();
//! let reservoir: Reservoir<u64> = Reservoir::new(policy, "printer", registry).unwrap();
//! for i in 0..250 {
//!     reservoir.add(i);
//! }
//! // Two batches of 100 are already out; close flushes the last 50.
//! reservoir.close();
//! assert_eq!(reservoir.metrics().snapshot().batches_dispatched, 3);
//! ```

mod batch;
mod config;
mod dispatcher;
mod error;
mod flush;
mod handler;
mod invariants;
mod metrics;
mod queue;
mod reservoir;
mod shutdown;
mod trigger;

pub use batch::Batch;
pub use config::{DispatcherConfig, OverflowPolicy, QueueConfig, TriggerPolicy};
pub use dispatcher::Dispatcher;
pub use error::{ConfigError, DispatchError, HandlerError};
pub use handler::{handler_fn, BatchHandler, FnHandler, HandlerId, HandlerRegistry, InMemoryRegistry};
pub use metrics::{MetricsSnapshot, ReservoirMetrics};
pub use queue::{ElementQueue, Overflow};
pub use reservoir::{Reservoir, ReservoirBuilder};
