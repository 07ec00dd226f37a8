//! SetProjector
//!
//! Folds a per-key boolean signal into a live set of the keys whose signal
//! currently holds.
//!
//! The predicate is attached exactly once per group, when its handle is
//! received. A key joins the set on `true` and leaves it on `false`, when its
//! signal completes, or when its group ends. Each signal is passed through
//! `distinct_until_changed`, so a predicate that keeps repeating itself costs
//! one snapshot per actual verdict change.
//!
//! Membership is owned by [`GroupId`]: a verdict or an end from an old group
//! never touches a newer group that reused the key.

use std::collections::{HashMap, HashSet};
use std::sync::{Arc, Weak};

use indexmap::IndexSet;
use parking_lot::Mutex;

use super::collect::GroupMap;
use super::fold::{complete_if_drained, group_failed, upstream_completed, FoldContext};
use super::group::{GroupHandle, GroupId, GroupKey};
use super::snapshot::LiveSet;
use crate::config::CollectConfig;
use crate::error::StreamError;
use crate::reactive::{Broadcast, Item, Notification, Observable, Observer, Subscription};

type Predicate<K, V> = dyn Fn(Observable<V>, &K) -> Observable<bool> + Send + Sync;

struct Membership<K> {
    members: Arc<IndexSet<K>>,
    owners: HashMap<K, GroupId>,
}

impl<K: GroupKey> Membership<K> {
    fn new() -> Self {
        Self {
            members: Arc::default(),
            owners: HashMap::new(),
        }
    }

    fn snapshot(&self) -> LiveSet<K> {
        LiveSet::from_shared(Arc::clone(&self.members))
    }

    fn admit(&mut self, key: &K, id: GroupId) {
        self.owners.insert(key.clone(), id);
        if !self.members.contains(key) {
            Arc::make_mut(&mut self.members).insert(key.clone());
        }
    }

    /// Remove `key` if `id` owns it. Returns whether the set changed.
    fn evict(&mut self, key: &K, id: GroupId) -> bool {
        if self.owners.get(key) != Some(&id) {
            return false;
        }
        self.owners.remove(key);
        Arc::make_mut(&mut self.members).shift_remove(key)
    }

    fn clear(&mut self) -> LiveSet<K> {
        self.owners.clear();
        self.members = Arc::default();
        self.snapshot()
    }
}

/// What a group's signals reported.
enum Signal {
    Verdict(bool),
    Ended(Option<StreamError>),
}

impl<K: GroupKey, V: Item> Observable<GroupHandle<K, V>> {
    /// Live set of keys whose `predicate` currently holds.
    ///
    /// `predicate` receives each group's output and key and returns the
    /// group's boolean signal.
    pub fn collect_keys<F>(&self, predicate: F) -> Broadcast<LiveSet<K>>
    where
        F: Fn(Observable<V>, &K) -> Observable<bool> + Send + Sync + 'static,
    {
        self.collect_keys_with(predicate, CollectConfig::default())
    }

    pub fn collect_keys_with<F>(&self, predicate: F, config: CollectConfig) -> Broadcast<LiveSet<K>>
    where
        F: Fn(Observable<V>, &K) -> Observable<bool> + Send + Sync + 'static,
    {
        project(self.clone(), Arc::new(predicate), config).share_latest()
    }
}

impl<K: GroupKey, V: Item> Broadcast<GroupMap<K, V>> {
    /// Handles of groups as they appear in the live map.
    ///
    /// A handle is emitted once, the first time its group is seen in a
    /// snapshot. Groups are told apart by [`GroupId`], so a key that leaves
    /// and comes back between two snapshots is still reported.
    pub fn arrivals(&self) -> Observable<GroupHandle<K, V>> {
        let maps = self.observable();
        Observable::new(move |observer: Observer<GroupHandle<K, V>>| {
            let seen: Mutex<HashSet<GroupId>> = Mutex::new(HashSet::new());
            maps.subscribe(Observer::new(move |notification: Notification<GroupMap<K, V>>| {
                match notification {
                    Notification::Next(snapshot) => {
                        let fresh: Vec<GroupHandle<K, V>> = {
                            let mut seen = seen.lock();
                            let fresh = snapshot
                                .values()
                                .filter(|handle| !seen.contains(&handle.id()))
                                .cloned()
                                .collect();
                            *seen = snapshot.values().map(GroupHandle::id).collect();
                            fresh
                        };
                        for handle in fresh {
                            observer.next(handle);
                        }
                    }
                    Notification::Error(error) => observer.error(error),
                    Notification::Complete => observer.complete(),
                }
            }))
        })
    }

    /// Live set of keys in this map whose `predicate` currently holds.
    pub fn filter_split<F>(&self, predicate: F) -> Broadcast<LiveSet<K>>
    where
        F: Fn(Observable<V>, &K) -> Observable<bool> + Send + Sync + 'static,
    {
        self.arrivals().collect_keys(predicate)
    }
}

fn project<K: GroupKey, V: Item>(
    handles: Observable<GroupHandle<K, V>>,
    predicate: Arc<Predicate<K, V>>,
    config: CollectConfig,
) -> Observable<LiveSet<K>> {
    Observable::new(move |observer: Observer<LiveSet<K>>| {
        let fold = FoldContext::new(Membership::new());
        observer.next(LiveSet::default());

        let receiving = Arc::clone(&fold);
        let downstream = observer.clone();
        let predicate = Arc::clone(&predicate);
        let upstream = handles.subscribe(Observer::new(move |notification| {
            let observer = downstream.clone();
            let predicate = Arc::clone(&predicate);
            receiving.run(move |fold| match notification {
                Notification::Next(handle) => watch(fold, handle, predicate.as_ref(), &observer, config),
                Notification::Error(error) => {
                    tracing::debug!(%error, "handle sequence failed, failing the live set");
                    observer.error(error);
                    fold.close();
                }
                Notification::Complete => {
                    upstream_completed(fold, config.on_complete, &observer, Membership::clear);
                }
            });
        }));

        Subscription::new(move || {
            upstream.unsubscribe();
            fold.close();
        })
    })
}

fn watch<K: GroupKey, V: Item>(
    fold: &Arc<FoldContext<Membership<K>>>,
    handle: GroupHandle<K, V>,
    predicate: &Predicate<K, V>,
    observer: &Observer<LiveSet<K>>,
    config: CollectConfig,
) {
    let id = handle.id();
    let key = handle.key().clone();
    let signals = Subscription::empty();
    fold.track(id, signals.clone());

    let report = {
        let weak: Weak<FoldContext<Membership<K>>> = Arc::downgrade(fold);
        let observer = observer.clone();
        let key = key.clone();
        move |signal: Signal| {
            if let Some(fold) = weak.upgrade() {
                let (key, observer) = (key.clone(), observer.clone());
                fold.run(move |fold| apply(fold, &key, id, signal, &observer, config));
            }
        }
    };

    let verdicts = predicate(handle.observable(), &key).distinct_until_changed();
    let on_verdict = report.clone();
    signals.add(verdicts.subscribe(Observer::new(move |notification| {
        on_verdict(match notification {
            Notification::Next(verdict) => Signal::Verdict(verdict),
            Notification::Error(error) => Signal::Ended(Some(error)),
            Notification::Complete => Signal::Ended(None),
        });
    })));

    signals.add(handle.subscribe(Observer::new(move |notification: Notification<V>| {
        match notification {
            Notification::Next(_) => {}
            Notification::Error(error) => report(Signal::Ended(Some(error))),
            Notification::Complete => report(Signal::Ended(None)),
        }
    })));
}

fn apply<K: GroupKey>(
    fold: &Arc<FoldContext<Membership<K>>>,
    key: &K,
    id: GroupId,
    signal: Signal,
    observer: &Observer<LiveSet<K>>,
    config: CollectConfig,
) {
    match signal {
        Signal::Verdict(verdict) => {
            if !fold.is_tracked(id) {
                return;
            }
            let snapshot = fold.with_acc(|membership| {
                if verdict {
                    membership.admit(key, id);
                } else {
                    membership.evict(key, id);
                }
                membership.snapshot()
            });
            observer.next(snapshot);
        }
        Signal::Ended(outcome) => {
            if !fold.untrack(id) {
                return;
            }
            if let Some(error) = outcome {
                if group_failed(config.group_errors, key, id, error, observer) {
                    fold.close();
                    return;
                }
            }
            let changed = fold.with_acc(|membership| membership.evict(key, id).then(|| membership.snapshot()));
            if let Some(snapshot) = changed {
                tracing::trace!(?key, group = %id, "group left the live set");
                observer.next(snapshot);
            }
            complete_if_drained(fold, observer);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::keyed::snapshot::LiveMap;
    use crate::reactive::Subject;
    use indexmap::IndexMap;

    type Event = (u32, bool);

    fn sets(live: &Broadcast<LiveSet<u32>>) -> (Subscription, Arc<Mutex<Vec<Vec<u32>>>>) {
        let log = Arc::new(Mutex::new(Vec::new()));
        let log_clone = log.clone();
        let subscription = live.subscribe_next(move |set| {
            let mut keys = set.to_vec();
            keys.sort_unstable();
            log_clone.lock().push(keys);
        });
        (subscription, log)
    }

    fn flagged(source: &Subject<Event>) -> Broadcast<LiveSet<u32>> {
        source
            .observable()
            .group_by(|e: &Event| e.0)
            .collect_keys(|events, _| events.map(|e| e.1))
    }

    #[test]
    fn every_verdict_produces_a_snapshot() {
        let source = Subject::new();
        let live = flagged(&source);
        let (_sub, log) = sets(&live);

        source.next((1, true)).unwrap();
        source.next((2, false)).unwrap();
        source.next((1, false)).unwrap();

        assert_eq!(*log.lock(), vec![vec![], vec![1], vec![1], vec![]]);
    }

    #[test]
    fn repeated_verdicts_are_collapsed() {
        let source = Subject::new();
        let live = flagged(&source);
        let (_sub, log) = sets(&live);

        source.next((1, true)).unwrap();
        source.next((1, true)).unwrap();
        source.next((1, true)).unwrap();

        assert_eq!(*log.lock(), vec![vec![], vec![1]]);
    }

    #[test]
    fn ending_group_leaves_the_set() {
        let source = Subject::new();
        let live = source
            .observable()
            .split(|e: &(u32, &'static str)| e.0, |events, _| events.take_while(|e| e.1 != "done"))
            .collect_keys(|events, _| events.map(|e| e.1 == "urgent"));
        let (_sub, log) = sets(&live);

        source.next((1, "urgent")).unwrap();
        source.next((1, "done")).unwrap();
        source.next((1, "later")).unwrap();

        assert_eq!(*log.lock(), vec![vec![], vec![1], vec![], vec![]]);
    }

    #[test]
    fn filter_split_follows_a_key_that_comes_back() {
        let source = Subject::new();
        let map = source
            .observable()
            .split(|e: &(u32, &'static str)| e.0, |events, _| events.take_while(|e| e.1 != "done"))
            .collect();
        let live = map.filter_split(|events, _| events.map(|e| e.1 != "done"));
        let (_sub, log) = sets(&live);

        source.next((1, "a")).unwrap();
        source.next((1, "done")).unwrap();
        source.next((1, "b")).unwrap();

        assert_eq!(log.lock().last(), Some(&vec![1]));
        assert_eq!(live.latest().map(|set| set.contains(&1)), Some(true));
    }

    fn idle_handle(key: u32) -> GroupHandle<u32, u32> {
        GroupHandle::new(GroupId::new(), key, Observable::never().share_latest())
    }

    fn map_of(handles: &[&GroupHandle<u32, u32>]) -> GroupMap<u32, u32> {
        let entries: IndexMap<u32, GroupHandle<u32, u32>> = handles
            .iter()
            .map(|handle| (*handle.key(), (*handle).clone()))
            .collect();
        LiveMap::from_shared(Arc::new(entries))
    }

    fn arrived_ids(maps: Vec<GroupMap<u32, u32>>) -> Vec<GroupId> {
        let ids = Arc::new(Mutex::new(Vec::new()));
        let ids_clone = ids.clone();
        let _sub = Observable::of(maps)
            .share_latest()
            .arrivals()
            .subscribe_next(move |handle| ids_clone.lock().push(handle.id()));
        let ids = ids.lock().clone();
        ids
    }

    #[test]
    fn arrivals_reports_a_swap_between_equal_sized_snapshots() {
        let (one, two) = (idle_handle(1), idle_handle(2));

        let ids = arrived_ids(vec![map_of(&[&one]), map_of(&[&two])]);

        assert_eq!(ids, vec![one.id(), two.id()]);
    }

    #[test]
    fn arrivals_reports_a_reused_key_with_a_new_group() {
        let (old, new) = (idle_handle(4), idle_handle(4));

        let ids = arrived_ids(vec![map_of(&[&old]), map_of(&[&new])]);

        assert_eq!(ids, vec![old.id(), new.id()]);
    }

    #[test]
    fn arrivals_replays_current_groups_to_a_late_subscriber() {
        let source = Subject::new();
        let map = source.observable().group_by(|e: &u32| *e).collect();
        let _keep = map.subscribe_next(|_| {});

        source.next(1).unwrap();
        source.next(2).unwrap();
        source.next(1).unwrap();

        let keys = Arc::new(Mutex::new(Vec::new()));
        let keys_clone = keys.clone();
        let _late = map
            .arrivals()
            .subscribe_next(move |handle| keys_clone.lock().push(*handle.key()));

        assert_eq!(*keys.lock(), vec![1, 2]);
    }

    #[test]
    fn failing_predicate_is_isolated() {
        let source = Subject::new();
        let live = source.observable().group_by(|e: &Event| e.0).collect_keys(|events, key| {
            if *key == 2 {
                Observable::fail(StreamError::transform("predicate broke"))
            } else {
                events.map(|e| e.1)
            }
        });
        let (_sub, log) = sets(&live);

        source.next((1, true)).unwrap();
        source.next((2, true)).unwrap();
        source.next((3, true)).unwrap();

        assert_eq!(log.lock().last(), Some(&vec![1, 3]));
        assert!(!live.is_terminated());
    }

    #[test]
    fn repeated_admission_does_not_copy_the_members() {
        let mut membership = Membership::new();
        let id = GroupId::new();
        membership.admit(&1, id);
        let held = Arc::clone(&membership.members);

        membership.admit(&1, id);
        assert!(Arc::ptr_eq(&held, &membership.members));

        membership.admit(&2, id);
        assert!(!Arc::ptr_eq(&held, &membership.members));
        assert_eq!(held.len(), 1);
    }

    #[test]
    fn membership_survives_an_old_group_ending_after_reuse() {
        let mut membership = Membership::new();
        let (old, new) = (GroupId::new(), GroupId::new());

        membership.admit(&5, old);
        membership.admit(&5, new);

        assert!(!membership.evict(&5, old));
        assert!(membership.snapshot().contains(&5));
        assert!(membership.evict(&5, new));
        assert!(membership.snapshot().is_empty());
    }
}
