//! Groups and their handles.

use std::fmt;
use std::hash::Hash;
use std::sync::atomic::{AtomicU64, Ordering};

use crate::reactive::{Broadcast, Item, Observable, Observer, Subscription};

/// Keys that partition an event stream.
///
/// `Debug` is required so groups can be named in logs and in
/// [`StreamError::Group`](crate::StreamError::Group).
pub trait GroupKey: Item + Eq + Hash + fmt::Debug {}

impl<K> GroupKey for K where K: Item + Eq + Hash + fmt::Debug {}

/// Identity of one group incarnation.
///
/// A key whose group ended and later reappears gets a new group with a new
/// id. Folds compare ids, never keys, to decide whether a lifecycle event
/// still applies to what they hold.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct GroupId(u64);

impl GroupId {
    /// Generate a new unique group ID.
    pub fn new() -> Self {
        static COUNTER: AtomicU64 = AtomicU64::new(0);
        Self(COUNTER.fetch_add(1, Ordering::Relaxed))
    }

    /// Get the raw ID value.
    pub fn raw(&self) -> u64 {
        self.0
    }
}

impl Default for GroupId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for GroupId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "g{}", self.0)
    }
}

/// The `(key, output)` pair emitted once per group creation.
///
/// The output is a replay-latest [`Broadcast`], so whoever subscribes to it
/// (the aggregator, a set projector, a UI binding) gets the group's current
/// value immediately.
pub struct GroupHandle<K, V> {
    id: GroupId,
    key: K,
    stream: Broadcast<V>,
}

impl<K: GroupKey, V: Item> GroupHandle<K, V> {
    pub(crate) fn new(id: GroupId, key: K, stream: Broadcast<V>) -> Self {
        Self { id, key, stream }
    }

    pub fn id(&self) -> GroupId {
        self.id
    }

    pub fn key(&self) -> &K {
        &self.key
    }

    /// The group's output.
    pub fn stream(&self) -> &Broadcast<V> {
        &self.stream
    }

    /// The group's output as a plain observable.
    pub fn observable(&self) -> Observable<V> {
        self.stream.observable()
    }

    pub fn subscribe(&self, observer: Observer<V>) -> Subscription {
        self.stream.subscribe(observer)
    }

    /// Whether both handles came from the same group creation.
    pub fn same_group(&self, other: &Self) -> bool {
        self.id == other.id
    }
}

impl<K: Clone, V> Clone for GroupHandle<K, V> {
    fn clone(&self) -> Self {
        Self {
            id: self.id,
            key: self.key.clone(),
            stream: self.stream.clone(),
        }
    }
}

impl<K: fmt::Debug, V> fmt::Debug for GroupHandle<K, V> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("GroupHandle")
            .field("id", &self.id)
            .field("key", &self.key)
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn group_ids_are_unique() {
        let ids: Vec<GroupId> = (0..3).map(|_| GroupId::new()).collect();
        assert_ne!(ids[0], ids[1]);
        assert_ne!(ids[1], ids[2]);
        assert!(ids[0] < ids[2]);
    }

    #[test]
    fn handles_with_the_same_key_do_not_alias() {
        let stream = Observable::of(vec![1]).share_latest();
        let first = GroupHandle::new(GroupId::new(), "a", stream.clone());
        let second = GroupHandle::new(GroupId::new(), "a", stream);

        assert_eq!(first.key(), second.key());
        assert!(!first.same_group(&second));
        assert!(first.same_group(&first.clone()));
    }

    #[test]
    fn display_names_the_group() {
        let id = GroupId::new();
        assert_eq!(id.to_string(), format!("g{}", id.raw()));
    }
}
