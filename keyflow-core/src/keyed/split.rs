//! Demultiplexer
//!
//! Splits one event stream into independently-lived per-key groups.
//!
//! # How Splitting Works
//!
//! For every event the key selector picks a key:
//!
//! 1. If a live group exists for the key, the event goes to that group's
//!    input and nowhere else.
//!
//! 2. Otherwise a new group is created: a fresh input [`Subject`], the
//!    per-key transform applied to it, and the result wrapped in a
//!    replay-latest [`Broadcast`]. The registry subscribes to that broadcast
//!    first (to learn when the group ends), then the event is forwarded, then
//!    a [`GroupHandle`] is emitted downstream.
//!
//! 3. When a group's output completes or fails, the group is marked ended and
//!    dropped from the registry. The next event with that key creates a new
//!    group with a new [`GroupId`].
//!
//! # Termination
//!
//! - Source error: the handle stream fails first, then every live group's
//!   input fails with the same error. The registry is emptied.
//! - Source completion: the handle stream completes. Groups are left alive
//!   unless [`SourceCompletion::CompleteGroups`] is configured.
//! - Cancellation: the source subscription is released, and every live group
//!   has its watcher released and its input completed so transforms and
//!   external subscribers of group outputs terminate too.
//!
//! # Registry
//!
//! The registry is a [`DashMap`] owned by one subscription of the
//! demultiplexer, i.e. by one pipeline instance. Registry mutations run in the
//! instance's [`SerialQueue`]. Each record also carries an `ended` flag that
//! the group's watcher sets synchronously, so an event that races the
//! queued removal still starts a new group instead of reaching a dead one.

use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Weak};

use dashmap::DashMap;
use parking_lot::Mutex;

use super::group::{GroupHandle, GroupId, GroupKey};
use crate::config::{SourceCompletion, SplitConfig};
use crate::error::StreamError;
use crate::reactive::{Broadcast, Item, Notification, Observable, Observer, SerialQueue, Subject, Subscription};

type KeySelector<T, K> = dyn Fn(&T) -> K + Send + Sync;
type Transform<T, K, V> = dyn Fn(Observable<T>, &K) -> Observable<V> + Send + Sync;

/// Builder for a keyed split.
///
/// ```rust,ignore
/// let handles = Demultiplexer::new(|cmd: &Command| cmd.id)
///     .with_transform(|cmds, _id| cmds.take_while(|c| !c.is_delete()))
///     .split(&commands.observable());
/// ```
pub struct Demultiplexer<T, K, V> {
    key_selector: Arc<KeySelector<T, K>>,
    transform: Arc<Transform<T, K, V>>,
    config: SplitConfig,
}

impl<T: Item, K: GroupKey> Demultiplexer<T, K, T> {
    /// Split by key, with each group's output being its raw events.
    pub fn new<F>(key_selector: F) -> Self
    where
        F: Fn(&T) -> K + Send + Sync + 'static,
    {
        Self {
            key_selector: Arc::new(key_selector),
            transform: Arc::new(|events: Observable<T>, _: &K| events),
            config: SplitConfig::default(),
        }
    }
}

impl<T: Item, K: GroupKey, V: Item> Demultiplexer<T, K, V> {
    /// Derive each group's output from its input events.
    pub fn with_transform<W, F>(self, transform: F) -> Demultiplexer<T, K, W>
    where
        W: Item,
        F: Fn(Observable<T>, &K) -> Observable<W> + Send + Sync + 'static,
    {
        Demultiplexer {
            key_selector: self.key_selector,
            transform: Arc::new(transform),
            config: self.config,
        }
    }

    pub fn with_config(mut self, config: SplitConfig) -> Self {
        self.config = config;
        self
    }

    /// The stream of group handles for `source`.
    ///
    /// Cold: every subscription is an independent demultiplexer instance
    /// with its own registry.
    pub fn split(&self, source: &Observable<T>) -> Observable<GroupHandle<K, V>> {
        let source = source.clone();
        let key_selector = Arc::clone(&self.key_selector);
        let transform = Arc::clone(&self.transform);
        let config = self.config;

        Observable::new(move |downstream: Observer<GroupHandle<K, V>>| {
            let instance = Arc::new(SplitInstance {
                groups: DashMap::new(),
                queue: SerialQueue::new(),
                finished: Mutex::new(None),
                key_selector: Arc::clone(&key_selector),
                transform: Arc::clone(&transform),
                downstream,
                config,
            });

            let receiving = Arc::clone(&instance);
            let upstream = source.subscribe(Observer::new(move |notification| {
                let instance = Arc::clone(&receiving);
                receiving.queue.run(move || instance.receive(notification));
            }));

            Subscription::new(move || {
                upstream.unsubscribe();
                let disposing = Arc::clone(&instance);
                instance.queue.run(move || disposing.dispose());
            })
        })
    }
}

impl<T: Item> Observable<T> {
    /// Split into per-key groups, each transformed by `transform`.
    pub fn split<K, V, KF, TF>(&self, key_selector: KF, transform: TF) -> Observable<GroupHandle<K, V>>
    where
        K: GroupKey,
        V: Item,
        KF: Fn(&T) -> K + Send + Sync + 'static,
        TF: Fn(Observable<T>, &K) -> Observable<V> + Send + Sync + 'static,
    {
        Demultiplexer::new(key_selector).with_transform(transform).split(self)
    }

    /// Split into per-key groups of raw events.
    pub fn group_by<K, KF>(&self, key_selector: KF) -> Observable<GroupHandle<K, T>>
    where
        K: GroupKey,
        KF: Fn(&T) -> K + Send + Sync + 'static,
    {
        Demultiplexer::new(key_selector).split(self)
    }
}

/// One live group in the registry.
struct GroupRecord<T, V> {
    id: GroupId,
    input: Subject<T>,
    ended: Arc<AtomicBool>,
    watcher: Subscription,
    _output: Broadcast<V>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Finish {
    Completed,
    Failed,
}

/// State of one subscription to a demultiplexer.
struct SplitInstance<T, K, V> {
    groups: DashMap<K, GroupRecord<T, V>>,
    queue: SerialQueue,
    finished: Mutex<Option<Finish>>,
    key_selector: Arc<KeySelector<T, K>>,
    transform: Arc<Transform<T, K, V>>,
    downstream: Observer<GroupHandle<K, V>>,
    config: SplitConfig,
}

impl<T: Item, K: GroupKey, V: Item> SplitInstance<T, K, V> {
    fn receive(self: Arc<Self>, notification: Notification<T>) {
        match notification {
            Notification::Next(event) => self.route(event),
            Notification::Error(error) => self.fail(error),
            Notification::Complete => self.finish(),
        }
    }

    fn route(self: &Arc<Self>, event: T) {
        let key = (self.key_selector)(&event);

        let live_input = self.groups.get(&key).and_then(|record| {
            (!record.ended.load(Ordering::Acquire)).then(|| record.input.clone())
        });
        if let Some(input) = live_input {
            if let Err(error) = input.next(event) {
                tracing::debug!(?key, %error, "group input refused event");
            }
            return;
        }

        self.spawn(key, event);
    }

    fn spawn(self: &Arc<Self>, key: K, event: T) {
        let id = GroupId::new();
        let input = Subject::new();
        let output = (self.transform)(input.observable(), &key).share_latest();
        let ended = Arc::new(AtomicBool::new(false));

        // Subscribing the watcher connects the transform to the input before
        // the first event is pushed.
        let watcher = output.subscribe(self.watcher(id, key.clone(), Arc::clone(&ended)));

        let record = GroupRecord {
            id,
            input: input.clone(),
            ended,
            watcher,
            _output: output.clone(),
        };
        if let Some(previous) = self.groups.insert(key.clone(), record) {
            previous.watcher.unsubscribe();
        }
        tracing::trace!(?key, group = %id, "group created");

        if let Err(error) = input.next(event) {
            tracing::debug!(?key, group = %id, %error, "new group refused its first event");
        }
        self.downstream.next(GroupHandle::new(id, key, output));
    }

    /// Observer that retires a group when its output terminates.
    fn watcher(self: &Arc<Self>, id: GroupId, key: K, ended: Arc<AtomicBool>) -> Observer<V> {
        let instance: Weak<Self> = Arc::downgrade(self);
        Observer::new(move |notification: Notification<V>| {
            match &notification {
                Notification::Next(_) => return,
                Notification::Error(error) => {
                    tracing::debug!(?key, group = %id, %error, "group output failed");
                }
                Notification::Complete => {
                    tracing::trace!(?key, group = %id, "group output completed");
                }
            }
            ended.store(true, Ordering::Release);

            if let Some(instance) = instance.upgrade() {
                let retiring = Arc::clone(&instance);
                let key = key.clone();
                instance.queue.run(move || retiring.retire(&key, id));
            }
        })
    }

    fn retire(&self, key: &K, id: GroupId) {
        self.groups.remove_if(key, |_, record| record.id == id);
    }

    fn drain_groups(&self) -> Vec<GroupRecord<T, V>> {
        let keys: Vec<K> = self.groups.iter().map(|entry| entry.key().clone()).collect();
        keys.iter()
            .filter_map(|key| self.groups.remove(key).map(|(_, record)| record))
            .collect()
    }

    fn fail(&self, error: StreamError) {
        *self.finished.lock() = Some(Finish::Failed);
        let records = self.drain_groups();
        tracing::debug!(%error, groups = records.len(), "source failed, failing every group");

        self.downstream.error(error.clone());
        for record in records {
            if let Err(refused) = record.input.error(error.clone()) {
                tracing::debug!(group = %record.id, %refused, "group input already terminated");
            }
            record.watcher.unsubscribe();
        }
    }

    fn finish(&self) {
        *self.finished.lock() = Some(Finish::Completed);
        if self.config.on_source_complete == SourceCompletion::CompleteGroups {
            let records = self.drain_groups();
            tracing::debug!(groups = records.len(), "source completed, completing every group");
            for record in records {
                if let Err(refused) = record.input.complete() {
                    tracing::debug!(group = %record.id, %refused, "group input already terminated");
                }
                record.watcher.unsubscribe();
            }
        } else {
            tracing::debug!(groups = self.groups.len(), "source completed, groups stay alive");
        }
        self.downstream.complete();
    }

    /// Teardown of the instance, after completion, failure or cancellation.
    fn dispose(&self) {
        let finished = *self.finished.lock();
        let records = self.drain_groups();
        match finished {
            // Live groups keep running on whatever other subscribers they
            // have; the registry only lets go of them.
            Some(Finish::Completed) | Some(Finish::Failed) => {
                for record in records {
                    record.watcher.unsubscribe();
                }
            }
            None => {
                tracing::debug!(groups = records.len(), "split cancelled, closing every group");
                for record in records {
                    record.watcher.unsubscribe();
                    if let Err(refused) = record.input.complete() {
                        tracing::debug!(group = %record.id, %refused, "group input already terminated");
                    }
                }
            }
        }
    }
}

impl<T, K, V> fmt::Debug for Demultiplexer<T, K, V> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Demultiplexer")
            .field("config", &self.config)
            .finish_non_exhaustive()
    }
}
