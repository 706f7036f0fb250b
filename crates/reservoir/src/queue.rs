//! Multi-producer element queue.
//!
//! Producers push concurrently without locks; the flush path pops. Pops are
//! serialized by the flush coordinator's drain lock, so from the queue's
//! point of view there is one logical consumer at a time.

use crate::config::{OverflowPolicy, QueueConfig};
use crossbeam_queue::{ArrayQueue, SegQueue};

/// An element lost to a full bounded queue.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Overflow<T> {
    /// The element being pushed was refused.
    Rejected(T),
    /// The pushed element was stored; this older one was evicted for it.
    Evicted(T),
}

impl<T> Overflow<T> {
    /// The lost element.
    pub fn into_inner(self) -> T {
        match self {
            Self::Rejected(item) | Self::Evicted(item) => item,
        }
    }

    /// Returns `true` if the pushed element made it into the queue.
    pub fn pushed(&self) -> bool {
        matches!(self, Self::Evicted(_))
    }
}

enum Storage<T> {
    Unbounded(SegQueue<T>),
    Bounded {
        queue: ArrayQueue<T>,
        overflow: OverflowPolicy,
    },
}

/// Concurrent queue of buffered elements.
///
/// `len()` is exact only when no push or pop is in flight; under
/// contention it is a heuristic and is used only to decide whether a flush
/// should run.
pub struct ElementQueue<T> {
    storage: Storage<T>,
}

impl<T> ElementQueue<T> {
    /// Creates a queue; the config must already be validated.
    pub fn new(config: QueueConfig) -> Self {
        let storage = match config {
            QueueConfig::Unbounded => Storage::Unbounded(SegQueue::new()),
            QueueConfig::Bounded { capacity, overflow } => Storage::Bounded {
                queue: ArrayQueue::new(capacity),
                overflow,
            },
        };
        Self { storage }
    }

    /// Unbounded queue.
    pub fn unbounded() -> Self {
        Self::new(QueueConfig::Unbounded)
    }

    /// Enqueues `item` without blocking.
    ///
    /// On a full bounded queue one element is lost and returned as `Err`:
    /// `item` itself under [`OverflowPolicy::RejectNewest`], the evicted
    /// oldest element under [`OverflowPolicy::DropOldest`].
    #[inline]
    pub fn push(&self, item: T) -> Result<(), Overflow<T>> {
        match &self.storage {
            Storage::Unbounded(queue) => {
                queue.push(item);
                Ok(())
            }
            Storage::Bounded {
                queue,
                overflow: OverflowPolicy::RejectNewest,
            } => queue.push(item).map_err(Overflow::Rejected),
            Storage::Bounded {
                queue,
                overflow: OverflowPolicy::DropOldest,
            } => match queue.force_push(item) {
                Some(evicted) => Err(Overflow::Evicted(evicted)),
                None => Ok(()),
            },
        }
    }

    /// Removes at most `max` elements in enqueue order.
    ///
    /// Returns fewer (possibly zero) when the queue runs dry first.
    pub fn drain_up_to(&self, max: usize) -> Vec<T> {
        let mut out = Vec::with_capacity(max.min(self.len()));
        while out.len() < max {
            match self.pop() {
                Some(item) => out.push(item),
                None => break,
            }
        }
        out
    }

    #[inline]
    fn pop(&self) -> Option<T> {
        match &self.storage {
            Storage::Unbounded(queue) => queue.pop(),
            Storage::Bounded { queue, .. } => queue.pop(),
        }
    }

    /// Approximate number of buffered elements.
    #[inline]
    pub fn len(&self) -> usize {
        match &self.storage {
            Storage::Unbounded(queue) => queue.len(),
            Storage::Bounded { queue, .. } => queue.len(),
        }
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Capacity of a bounded queue, `None` if unbounded.
    pub fn capacity(&self) -> Option<usize> {
        match &self.storage {
            Storage::Unbounded(_) => None,
            Storage::Bounded { queue, .. } => Some(queue.capacity()),
        }
    }
}

impl<T> Default for ElementQueue<T> {
    fn default() -> Self {
        Self::unbounded()
    }
}
