//! Shared machinery of the keyed folds.
//!
//! The aggregator, the set projector and the value collector all follow the
//! same shape: one accumulator, one serial queue every mutation runs in, and
//! a per-group side subscription that reports the group's lifecycle back into
//! that queue. [`FoldContext`] owns those pieces for one pipeline instance.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use parking_lot::Mutex;

use super::group::{GroupId, GroupKey};
use crate::config::{GroupErrorPolicy, MapCompletion};
use crate::error::StreamError;
use crate::reactive::{Item, Observer, SerialQueue, Subscription};

pub(crate) struct FoldContext<A> {
    queue: SerialQueue,
    acc: Mutex<A>,
    tracked: Mutex<HashMap<GroupId, Subscription>>,
    upstream_done: AtomicBool,
    closed: AtomicBool,
}

impl<A: Send + 'static> FoldContext<A> {
    pub(crate) fn new(acc: A) -> Arc<Self> {
        Arc::new(Self {
            queue: SerialQueue::new(),
            acc: Mutex::new(acc),
            tracked: Mutex::new(HashMap::new()),
            upstream_done: AtomicBool::new(false),
            closed: AtomicBool::new(false),
        })
    }

    /// Run a fold step in the serialized context. Skipped once closed.
    pub(crate) fn run<F>(self: &Arc<Self>, step: F)
    where
        F: FnOnce(&Arc<Self>) + Send + 'static,
    {
        let fold = Arc::clone(self);
        self.queue.run(move || {
            if !fold.closed.load(Ordering::Acquire) {
                step(&fold);
            }
        });
    }

    pub(crate) fn with_acc<R>(&self, f: impl FnOnce(&mut A) -> R) -> R {
        f(&mut self.acc.lock())
    }

    /// Keep `subscription` until the group ends or the fold closes.
    pub(crate) fn track(&self, id: GroupId, subscription: Subscription) {
        if self.closed.load(Ordering::Acquire) {
            subscription.unsubscribe();
            return;
        }
        self.tracked.lock().insert(id, subscription);
    }

    /// Stop tracking a group. Returns `false` if it was not tracked, which
    /// means its end was already processed.
    pub(crate) fn untrack(&self, id: GroupId) -> bool {
        let subscription = self.tracked.lock().remove(&id);
        match subscription {
            Some(subscription) => {
                subscription.unsubscribe();
                true
            }
            None => false,
        }
    }

    pub(crate) fn is_tracked(&self, id: GroupId) -> bool {
        self.tracked.lock().contains_key(&id)
    }

    pub(crate) fn mark_upstream_done(&self) {
        self.upstream_done.store(true, Ordering::Release);
    }

    /// True once the handle sequence completed and every group has ended.
    pub(crate) fn is_drained(&self) -> bool {
        self.upstream_done.load(Ordering::Acquire) && self.tracked.lock().is_empty()
    }

    /// Stop the fold and release every side subscription.
    pub(crate) fn close(&self) {
        if self.closed.swap(true, Ordering::AcqRel) {
            return;
        }
        let subscriptions: Vec<Subscription> = self.tracked.lock().drain().map(|(_, s)| s).collect();
        for subscription in subscriptions {
            subscription.unsubscribe();
        }
    }
}

/// Apply the group error policy. Returns `true` if the fold must stop.
pub(crate) fn group_failed<K: GroupKey, S: Item>(
    policy: GroupErrorPolicy,
    key: &K,
    id: GroupId,
    error: StreamError,
    observer: &Observer<S>,
) -> bool {
    match policy {
        GroupErrorPolicy::Isolate => {
            tracing::warn!(?key, group = %id, %error, "group failed, dropping it from the live view");
            false
        }
        GroupErrorPolicy::Escalate => {
            tracing::debug!(?key, group = %id, %error, "group failed, failing the live view");
            observer.error(StreamError::Group {
                key: format!("{key:?}"),
                cause: Box::new(error),
            });
            true
        }
    }
}

/// Handle completion of the handle sequence. `empty` is the snapshot emitted
/// by the batch-scoped policy.
pub(crate) fn upstream_completed<A, S>(
    fold: &Arc<FoldContext<A>>,
    policy: MapCompletion,
    observer: &Observer<S>,
    clear: impl FnOnce(&mut A) -> S,
) where
    A: Send + 'static,
{
    fold.mark_upstream_done();
    match policy {
        MapCompletion::Clear => {
            let empty = fold.with_acc(clear);
            observer.next(empty);
            observer.complete();
            fold.close();
        }
        MapCompletion::Retain => complete_if_drained(fold, observer),
    }
}

/// Complete an open-ended view whose groups have all ended.
pub(crate) fn complete_if_drained<A, S>(fold: &Arc<FoldContext<A>>, observer: &Observer<S>)
where
    A: Send + 'static,
{
    if fold.is_drained() {
        observer.complete();
        fold.close();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn closed_fold_skips_steps_and_releases_subscriptions() {
        let fold = FoldContext::new(0u32);
        let side = Subscription::empty();
        fold.track(GroupId::new(), side.clone());

        fold.run(|fold| fold.with_acc(|acc| *acc += 1));
        fold.close();
        fold.run(|fold| fold.with_acc(|acc| *acc += 1));

        assert_eq!(fold.with_acc(|acc| *acc), 1);
        assert!(side.is_closed());

        let late = Subscription::empty();
        fold.track(GroupId::new(), late.clone());
        assert!(late.is_closed());
    }

    #[test]
    fn untrack_reports_whether_the_group_was_live() {
        let fold = FoldContext::new(());
        let id = GroupId::new();
        fold.track(id, Subscription::empty());

        assert!(fold.is_tracked(id));
        assert!(fold.untrack(id));
        assert!(!fold.untrack(id));
        assert!(!fold.is_tracked(id));
    }

    #[test]
    fn drained_needs_upstream_done_and_no_groups() {
        let fold = FoldContext::new(());
        let id = GroupId::new();
        fold.track(id, Subscription::empty());
        fold.mark_upstream_done();
        assert!(!fold.is_drained());

        fold.untrack(id);
        assert!(fold.is_drained());
    }
}
