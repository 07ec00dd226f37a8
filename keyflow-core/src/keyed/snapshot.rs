//! Live snapshots.
//!
//! [`LiveMap`] and [`LiveSet`] are immutable values. Folds keep their
//! accumulator behind an `Arc` and copy-on-write it with `Arc::make_mut`, so
//! emitting a snapshot is a pointer copy and consumers that hold on to an old
//! snapshot never see it change.
//!
//! The broadcast serving a fold always holds its latest snapshot, so the
//! accumulator is never uniquely owned when the next write arrives: every
//! write clones the whole map or set, O(n) in the number of active keys.
//! Writes happen on group start and end, on set membership changes, and on
//! every group value for [`collect_values`](super::values). Repeated verdicts
//! that leave membership unchanged do not write.

use std::fmt;
use std::hash::Hash;
use std::sync::Arc;

use indexmap::{IndexMap, IndexSet};

/// Snapshot of active keys and their values, in first-insertion order.
pub struct LiveMap<K, V> {
    entries: Arc<IndexMap<K, V>>,
}

impl<K: Hash + Eq, V> LiveMap<K, V> {
    pub(crate) fn from_shared(entries: Arc<IndexMap<K, V>>) -> Self {
        Self { entries }
    }

    /// Point lookup.
    pub fn get(&self, key: &K) -> Option<&V> {
        self.entries.get(key)
    }

    pub fn contains_key(&self, key: &K) -> bool {
        self.entries.contains_key(key)
    }

    pub fn keys(&self) -> impl Iterator<Item = &K> {
        self.entries.keys()
    }

    pub fn values(&self) -> impl Iterator<Item = &V> {
        self.entries.values()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&K, &V)> {
        self.entries.iter()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// The keys, cloned, in map order.
    pub fn key_vec(&self) -> Vec<K>
    where
        K: Clone,
    {
        self.entries.keys().cloned().collect()
    }
}

impl<K, V> Default for LiveMap<K, V> {
    fn default() -> Self {
        Self {
            entries: Arc::new(IndexMap::new()),
        }
    }
}

impl<K, V> Clone for LiveMap<K, V> {
    fn clone(&self) -> Self {
        Self {
            entries: Arc::clone(&self.entries),
        }
    }
}

impl<K: fmt::Debug, V: fmt::Debug> fmt::Debug for LiveMap<K, V> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_map().entries(self.entries.iter()).finish()
    }
}

/// Snapshot of the keys whose predicate currently holds.
pub struct LiveSet<K> {
    keys: Arc<IndexSet<K>>,
}

impl<K: Hash + Eq> LiveSet<K> {
    pub(crate) fn from_shared(keys: Arc<IndexSet<K>>) -> Self {
        Self { keys }
    }

    /// Membership query.
    pub fn contains(&self, key: &K) -> bool {
        self.keys.contains(key)
    }

    pub fn iter(&self) -> impl Iterator<Item = &K> {
        self.keys.iter()
    }

    pub fn len(&self) -> usize {
        self.keys.len()
    }

    pub fn is_empty(&self) -> bool {
        self.keys.is_empty()
    }

    pub fn to_vec(&self) -> Vec<K>
    where
        K: Clone,
    {
        self.keys.iter().cloned().collect()
    }
}

impl<K> Default for LiveSet<K> {
    fn default() -> Self {
        Self {
            keys: Arc::new(IndexSet::new()),
        }
    }
}

impl<K> Clone for LiveSet<K> {
    fn clone(&self) -> Self {
        Self {
            keys: Arc::clone(&self.keys),
        }
    }
}

impl<K: Hash + Eq> PartialEq for LiveSet<K> {
    /// Set equality; insertion order is ignored.
    fn eq(&self, other: &Self) -> bool {
        self.keys.len() == other.keys.len() && self.keys.iter().all(|k| other.keys.contains(k))
    }
}

impl<K: fmt::Debug> fmt::Debug for LiveSet<K> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_set().entries(self.keys.iter()).finish()
    }
}
