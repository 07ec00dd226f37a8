//! Aggregator
//!
//! Folds a sequence of [`GroupHandle`]s into a live map from each active key
//! to its group's output.
//!
//! # How Aggregation Works
//!
//! 1. The fold emits an empty map as soon as it is subscribed.
//!
//! 2. Each handle is inserted under its key and the new snapshot emitted
//!    ("start").
//!
//! 3. Only then does the fold subscribe to the handle's output, purely to
//!    learn when the group ends. The output is replay-latest, so nothing the
//!    group emitted before this point is lost to anyone.
//!
//! 4. When a group ends, its entry is removed if it still belongs to that
//!    group and the new snapshot emitted ("end"). A newer group that reused
//!    the key is left alone.
//!
//! The fold runs once per pipeline instance. Its output is a [`Broadcast`],
//! so every subscriber shares it and a late subscriber starts from the
//! current snapshot.

use std::sync::{Arc, Weak};

use indexmap::IndexMap;

use super::fold::{complete_if_drained, group_failed, upstream_completed, FoldContext};
use super::group::{GroupHandle, GroupId, GroupKey};
use super::snapshot::LiveMap;
use crate::config::CollectConfig;
use crate::error::StreamError;
use crate::reactive::{Broadcast, Item, Notification, Observable, Observer, Subscription};

/// Live map from each active key to its group's handle.
pub type GroupMap<K, V> = LiveMap<K, GroupHandle<K, V>>;

type Entries<K, V> = Arc<IndexMap<K, GroupHandle<K, V>>>;

impl<K: GroupKey, V: Item> Observable<GroupHandle<K, V>> {
    /// Fold handles into a live map, with default policies.
    pub fn collect(&self) -> Broadcast<GroupMap<K, V>> {
        self.collect_with(CollectConfig::default())
    }

    pub fn collect_with(&self, config: CollectConfig) -> Broadcast<GroupMap<K, V>> {
        aggregate(self.clone(), config).share_latest()
    }
}

fn aggregate<K: GroupKey, V: Item>(
    handles: Observable<GroupHandle<K, V>>,
    config: CollectConfig,
) -> Observable<GroupMap<K, V>> {
    Observable::new(move |observer: Observer<GroupMap<K, V>>| {
        let fold = FoldContext::new(Entries::<K, V>::default());
        observer.next(LiveMap::default());

        let receiving = Arc::clone(&fold);
        let downstream = observer.clone();
        let upstream = handles.subscribe(Observer::new(move |notification| {
            let observer = downstream.clone();
            receiving.run(move |fold| match notification {
                Notification::Next(handle) => start(fold, handle, &observer, config),
                Notification::Error(error) => {
                    tracing::debug!(%error, "handle sequence failed, failing the live map");
                    observer.error(error);
                    fold.close();
                }
                Notification::Complete => {
                    upstream_completed(fold, config.on_complete, &observer, |entries| {
                        *entries = Entries::default();
                        LiveMap::from_shared(Arc::clone(entries))
                    });
                }
            });
        }));

        Subscription::new(move || {
            upstream.unsubscribe();
            fold.close();
        })
    })
}

fn start<K: GroupKey, V: Item>(
    fold: &Arc<FoldContext<Entries<K, V>>>,
    handle: GroupHandle<K, V>,
    observer: &Observer<GroupMap<K, V>>,
    config: CollectConfig,
) {
    let id = handle.id();
    let key = handle.key().clone();

    let snapshot = fold.with_acc(|entries| {
        Arc::make_mut(entries).insert(key.clone(), handle.clone());
        LiveMap::from_shared(Arc::clone(entries))
    });
    observer.next(snapshot);

    let weak: Weak<FoldContext<Entries<K, V>>> = Arc::downgrade(fold);
    let downstream = observer.clone();
    let lifecycle = handle.subscribe(Observer::new(move |notification: Notification<V>| {
        let outcome = match notification {
            Notification::Next(_) => return,
            Notification::Error(error) => Some(error),
            Notification::Complete => None,
        };
        if let Some(fold) = weak.upgrade() {
            let (key, observer) = (key.clone(), downstream.clone());
            fold.run(move |fold| end(fold, &key, id, outcome, &observer, config));
        }
    }));
    fold.track(id, lifecycle);
}

fn end<K: GroupKey, V: Item>(
    fold: &Arc<FoldContext<Entries<K, V>>>,
    key: &K,
    id: GroupId,
    outcome: Option<StreamError>,
    observer: &Observer<GroupMap<K, V>>,
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

    let snapshot = fold.with_acc(|entries| {
        let owned = entries.get(key).is_some_and(|handle| handle.id() == id);
        owned.then(|| {
            Arc::make_mut(entries).shift_remove(key);
            LiveMap::from_shared(Arc::clone(entries))
        })
    });
    match snapshot {
        Some(snapshot) => {
            tracing::trace!(?key, group = %id, "group left the live map");
            observer.next(snapshot);
        }
        None => tracing::trace!(?key, group = %id, "ended group was already replaced"),
    }
    complete_if_drained(fold, observer);
}
