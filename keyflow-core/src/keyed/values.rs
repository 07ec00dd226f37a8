//! Value collector
//!
//! Folds group handles into a live map from each active key to the latest
//! value its group emitted. A key appears with its group's first value and
//! disappears when the group ends.
//!
//! Every value copies the map (see [`snapshot`](super::snapshot)), so this
//! view suits groups whose values arrive at human pace.

use std::collections::HashMap;
use std::sync::{Arc, Weak};

use indexmap::IndexMap;

use super::fold::{complete_if_drained, group_failed, upstream_completed, FoldContext};
use super::group::{GroupHandle, GroupId, GroupKey};
use super::snapshot::LiveMap;
use crate::config::CollectConfig;
use crate::error::StreamError;
use crate::reactive::{Broadcast, Item, Notification, Observable, Observer, Subscription};

struct Latest<K, V> {
    values: Arc<IndexMap<K, V>>,
    owners: HashMap<K, GroupId>,
}

impl<K: GroupKey, V: Item> Latest<K, V> {
    fn new() -> Self {
        Self {
            values: Arc::default(),
            owners: HashMap::new(),
        }
    }

    fn snapshot(&self) -> LiveMap<K, V> {
        LiveMap::from_shared(Arc::clone(&self.values))
    }

    fn record(&mut self, key: &K, id: GroupId, value: V) -> LiveMap<K, V> {
        self.owners.insert(key.clone(), id);
        Arc::make_mut(&mut self.values).insert(key.clone(), value);
        self.snapshot()
    }

    fn forget(&mut self, key: &K, id: GroupId) -> Option<LiveMap<K, V>> {
        if self.owners.get(key) != Some(&id) {
            return None;
        }
        self.owners.remove(key);
        Arc::make_mut(&mut self.values).shift_remove(key);
        Some(self.snapshot())
    }

    fn clear(&mut self) -> LiveMap<K, V> {
        self.owners.clear();
        self.values = Arc::default();
        self.snapshot()
    }
}

impl<K: GroupKey, V: Item> Observable<GroupHandle<K, V>> {
    /// Live map from each active key to its group's latest value.
    pub fn collect_values(&self) -> Broadcast<LiveMap<K, V>> {
        self.collect_values_with(CollectConfig::default())
    }

    pub fn collect_values_with(&self, config: CollectConfig) -> Broadcast<LiveMap<K, V>> {
        fold_values(self.clone(), config).share_latest()
    }
}

fn fold_values<K: GroupKey, V: Item>(
    handles: Observable<GroupHandle<K, V>>,
    config: CollectConfig,
) -> Observable<LiveMap<K, V>> {
    Observable::new(move |observer: Observer<LiveMap<K, V>>| {
        let fold = FoldContext::new(Latest::new());
        observer.next(LiveMap::default());

        let receiving = Arc::clone(&fold);
        let downstream = observer.clone();
        let upstream = handles.subscribe(Observer::new(move |notification| {
            let observer = downstream.clone();
            receiving.run(move |fold| match notification {
                Notification::Next(handle) => follow(fold, handle, &observer, config),
                Notification::Error(error) => {
                    observer.error(error);
                    fold.close();
                }
                Notification::Complete => {
                    upstream_completed(fold, config.on_complete, &observer, Latest::clear);
                }
            });
        }));

        Subscription::new(move || {
            upstream.unsubscribe();
            fold.close();
        })
    })
}

fn follow<K: GroupKey, V: Item>(
    fold: &Arc<FoldContext<Latest<K, V>>>,
    handle: GroupHandle<K, V>,
    observer: &Observer<LiveMap<K, V>>,
    config: CollectConfig,
) {
    let id = handle.id();
    let key = handle.key().clone();
    let weak: Weak<FoldContext<Latest<K, V>>> = Arc::downgrade(fold);
    let downstream = observer.clone();

    let values = handle.subscribe(Observer::new(move |notification: Notification<V>| {
        if let Some(fold) = weak.upgrade() {
            let (key, observer) = (key.clone(), downstream.clone());
            fold.run(move |fold| match notification {
                Notification::Next(value) => {
                    if fold.is_tracked(id) {
                        let snapshot = fold.with_acc(|latest| latest.record(&key, id, value));
                        observer.next(snapshot);
                    }
                }
                Notification::Error(error) => end(fold, &key, id, Some(error), &observer, config),
                Notification::Complete => end(fold, &key, id, None, &observer, config),
            });
        }
    }));
    fold.track(id, values);
}

fn end<K: GroupKey, V: Item>(
    fold: &Arc<FoldContext<Latest<K, V>>>,
    key: &K,
    id: GroupId,
    outcome: Option<StreamError>,
    observer: &Observer<LiveMap<K, V>>,
    config: CollectConfig,
) {
    if !fold.untrack(id) {
        return;
    }
    if let Some(error) = outcome {
        if group_failed(config.group_errors, key, id, error, observer) {
            fold.close();
            return;
        }
    }
    if let Some(snapshot) = fold.with_acc(|latest| latest.forget(key, id)) {
        observer.next(snapshot);
    }
    complete_if_drained(fold, observer);
}
