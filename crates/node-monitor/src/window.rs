//! Capacity-limited sorted set that evicts its lowest key.

use std::collections::BTreeSet;

/// Sorted set of at most `capacity` keys.
///
/// Inserting past capacity evicts the lowest key, which makes the window a
/// sliding floor over key order rather than over insertion order. Inserting
/// a key that is already present leaves the window unchanged.
#[derive(Debug, Clone)]
pub struct BoundedSortedWindow<K> {
    capacity: usize,
    keys: BTreeSet<K>,
}

impl<K: Ord> BoundedSortedWindow<K> {
    pub fn new(capacity: usize) -> Self {
        Self {
            capacity,
            keys: BTreeSet::new(),
        }
    }

    /// Inserts `key` and returns the key evicted to stay within capacity, if
    /// any. The evicted key can be `key` itself when it is lower than every
    /// retained key of a full window.
    pub fn insert_and_evict(&mut self, key: K) -> Option<K> {
        self.keys.insert(key);
        if self.keys.len() > self.capacity {
            return self.keys.pop_first();
        }
        None
    }

    #[cfg(test)]
    fn contains(&self, key: &K) -> bool {
        self.keys.contains(key)
    }

    #[cfg(test)]
    fn lowest(&self) -> Option<&K> {
        self.keys.first()
    }

    #[cfg(test)]
    pub(crate) fn len(&self) -> usize {
        self.keys.len()
    }

    #[cfg(test)]
    fn capacity(&self) -> usize {
        self.capacity
    }
}
