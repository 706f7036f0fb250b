//! Batches handed to release handlers.

use std::ops::Deref;

/// Elements drained together and released as one unit.
///
/// `id` increases monotonically per reservoir and identifies the batch in
/// log events; it carries no ordering guarantee across concurrent workers.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Batch<T> {
    id: u64,
    items: Vec<T>,
}

impl<T> Batch<T> {
    pub(crate) fn new(id: u64, items: Vec<T>) -> Self {
        Self { id, items }
    }

    /// Per-reservoir sequence number of this batch.
    #[inline]
    pub fn id(&self) -> u64 {
        self.id
    }

    /// Takes ownership of the elements.
    pub fn into_items(self) -> Vec<T> {
        self.items
    }
}

impl<T> Deref for Batch<T> {
    type Target = [T];

    fn deref(&self) -> &[T] {
        &self.items
    }
}

impl<T> IntoIterator for Batch<T> {
    type Item = T;
    type IntoIter = std::vec::IntoIter<T>;

    fn into_iter(self) -> Self::IntoIter {
        self.items.into_iter()
    }
}

impl<'a, T> IntoIterator for &'a Batch<T> {
    type Item = &'a T;
    type IntoIter = std::slice::Iter<'a, T>;

    fn into_iter(self) -> Self::IntoIter {
        self.items.iter()
    }
}
