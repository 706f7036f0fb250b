//! Release handlers and the registry that resolves them.
//!
//! A reservoir is constructed with a [`HandlerId`], not a handler. The id is
//! resolved through a [`HandlerRegistry`] on every flush, so a handler may be
//! registered (or replaced) after the reservoir starts. A missing handler is
//! a per-batch error, never a construction error.

use crate::batch::Batch;
use crate::error::HandlerError;
use parking_lot::RwLock;
use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

/// Opaque key under which a handler is registered.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct HandlerId(Arc<str>);

impl HandlerId {
    pub fn new(id: impl Into<Arc<str>>) -> Self {
        Self(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for HandlerId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for HandlerId {
    fn from(id: &str) -> Self {
        Self::new(id)
    }
}

impl From<String> for HandlerId {
    fn from(id: String) -> Self {
        Self::new(id)
    }
}

/// Consumes batches released by a reservoir.
///
/// Runs on a worker thread, never on a producer. Implementations may block
/// (network calls, disk writes); they hold one dispatcher slot while they do.
/// Retrying a failed batch is the handler's own business: an `Err` is logged
/// and counted, and the batch is gone.
pub trait BatchHandler<T>: Send + Sync {
    /// Processes one batch.
    fn release(&self, batch: Batch<T>) -> Result<(), HandlerError>;

    /// Returns the handler name for log events.
    fn name(&self) -> &str;
}

/// Closure-backed handler, see [`handler_fn`].
pub struct FnHandler<F> {
    name: String,
    f: F,
}

/// Wraps a closure as a named [`BatchHandler`].
///
/// ```
/// use reservoir::{handler_fn, Batch, HandlerId, HandlerRegistry, InMemoryRegistry};
///
/// let registry = InMemoryRegistry::<u32>::new();
/// registry.register(
///     "count",
///     handler_fn("count", |batch: Batch<u32>| {
///         assert!(!batch.is_empty());
///         Ok(())
///     }),
/// );
/// let handler = registry.resolve(&HandlerId::from("count")).unwrap();
/// assert_eq!(handler.name(), "count");
/// ```
pub fn handler_fn<T, F>(name: impl Into<String>, f: F) -> FnHandler<F>
where
    F: Fn(Batch<T>) -> Result<(), HandlerError> + Send + Sync,
{
    FnHandler {
        name: name.into(),
        f,
    }
}

impl<T, F> BatchHandler<T> for FnHandler<F>
where
    F: Fn(Batch<T>) -> Result<(), HandlerError> + Send + Sync,
{
    fn release(&self, batch: Batch<T>) -> Result<(), HandlerError> {
        (self.f)(batch)
    }

    fn name(&self) -> &str {
        &self.name
    }
}

/// Resolves handler ids to handlers at flush time.
pub trait HandlerRegistry<T>: Send + Sync {
    /// Returns the handler registered under `id`, if any.
    fn resolve(&self, id: &HandlerId) -> Option<Arc<dyn BatchHandler<T>>>;
}

/// Map-backed registry populated by the host application.
pub struct InMemoryRegistry<T> {
    handlers: RwLock<HashMap<HandlerId, Arc<dyn BatchHandler<T>>>>,
}

impl<T> InMemoryRegistry<T> {
    pub fn new() -> Self {
        Self {
            handlers: RwLock::new(HashMap::new()),
        }
    }

    /// Registers `handler` under `id`, returning the handler it replaced.
    pub fn register<H>(&self, id: impl Into<HandlerId>, handler: H) -> Option<Arc<dyn BatchHandler<T>>>
    where
        H: BatchHandler<T> + 'static,
    {
        self.register_arc(id, Arc::new(handler))
    }

    /// Registers an already shared handler.
    pub fn register_arc(
        &self,
        id: impl Into<HandlerId>,
        handler: Arc<dyn BatchHandler<T>>,
    ) -> Option<Arc<dyn BatchHandler<T>>> {
        self.handlers.write().insert(id.into(), handler)
    }

    /// Removes the handler registered under `id`.
    pub fn unregister(&self, id: &HandlerId) -> Option<Arc<dyn BatchHandler<T>>> {
        self.handlers.write().remove(id)
    }

    pub fn contains(&self, id: &HandlerId) -> bool {
        self.handlers.read().contains_key(id)
    }

    pub fn len(&self) -> usize {
        self.handlers.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.handlers.read().is_empty()
    }
}

impl<T> Default for InMemoryRegistry<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T> HandlerRegistry<T> for InMemoryRegistry<T> {
    fn resolve(&self, id: &HandlerId) -> Option<Arc<dyn BatchHandler<T>>> {
        self.handlers.read().get(id).cloned()
    }
}
