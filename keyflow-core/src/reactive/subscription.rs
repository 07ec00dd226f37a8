//! Subscriptions
//!
//! A [`Subscription`] is the cancellation side of a stream. Unsubscribing runs
//! every registered teardown exactly once, in registration order, outside of
//! any lock. Child subscriptions can be attached so that cancelling an outer
//! subscription cancels everything it started.
//!
//! Subscriptions are cloneable handles and do nothing when dropped. Wrap one
//! in a [`SubscriptionGuard`] to tie cancellation to a scope.

use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use parking_lot::Mutex;
use smallvec::SmallVec;

type Teardown = Box<dyn FnOnce() + Send>;

/// Handle to a running stream subscription.
#[derive(Clone)]
pub struct Subscription {
    inner: Arc<Inner>,
}

struct Inner {
    closed: AtomicBool,
    teardowns: Mutex<SmallVec<[Teardown; 2]>>,
}

impl Subscription {
    /// A subscription that runs `teardown` when cancelled.
    pub fn new<F>(teardown: F) -> Self
    where
        F: FnOnce() + Send + 'static,
    {
        let subscription = Self::empty();
        subscription.add_teardown(teardown);
        subscription
    }

    /// A subscription with nothing to tear down yet.
    pub fn empty() -> Self {
        Self {
            inner: Arc::new(Inner {
                closed: AtomicBool::new(false),
                teardowns: Mutex::new(SmallVec::new()),
            }),
        }
    }

    /// Register a teardown. Runs it immediately if already unsubscribed.
    pub fn add_teardown<F>(&self, teardown: F)
    where
        F: FnOnce() + Send + 'static,
    {
        {
            let mut teardowns = self.inner.teardowns.lock();
            if !self.inner.closed.load(Ordering::Acquire) {
                teardowns.push(Box::new(teardown));
                return;
            }
        }
        teardown();
    }

    /// Cancel `child` together with this subscription.
    pub fn add(&self, child: Subscription) {
        if Arc::ptr_eq(&self.inner, &child.inner) {
            return;
        }
        self.add_teardown(move || child.unsubscribe());
    }

    /// Cancel the subscription. Idempotent.
    pub fn unsubscribe(&self) {
        let teardowns = {
            let mut teardowns = self.inner.teardowns.lock();
            if self.inner.closed.swap(true, Ordering::AcqRel) {
                return;
            }
            std::mem::take(&mut *teardowns)
        };
        for teardown in teardowns {
            teardown();
        }
    }

    /// Whether the subscription has been cancelled.
    pub fn is_closed(&self) -> bool {
        self.inner.closed.load(Ordering::Acquire)
    }

    /// Convert into a guard that unsubscribes when dropped.
    pub fn guard(self) -> SubscriptionGuard {
        SubscriptionGuard {
            subscription: self,
        }
    }
}

impl fmt::Debug for Subscription {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Subscription")
            .field("closed", &self.is_closed())
            .finish()
    }
}

/// Scope guard around a [`Subscription`].
///
/// Dropping this guard cancels the subscription.
#[derive(Debug)]
pub struct SubscriptionGuard {
    subscription: Subscription,
}

impl SubscriptionGuard {
    /// The guarded subscription.
    pub fn subscription(&self) -> &Subscription {
        &self.subscription
    }
}

impl Drop for SubscriptionGuard {
    fn drop(&mut self) {
        self.subscription.unsubscribe();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicI32;

    fn counter() -> (Arc<AtomicI32>, impl FnOnce() + Send + 'static) {
        let count = Arc::new(AtomicI32::new(0));
        let count_clone = count.clone();
        (count, move || {
            count_clone.fetch_add(1, Ordering::SeqCst);
        })
    }

    #[test]
    fn teardown_runs_once() {
        let (count, teardown) = counter();
        let subscription = Subscription::new(teardown);

        subscription.unsubscribe();
        subscription.unsubscribe();

        assert_eq!(count.load(Ordering::SeqCst), 1);
        assert!(subscription.is_closed());
    }

    #[test]
    fn children_are_cancelled_with_the_parent() {
        let (count, teardown) = counter();
        let parent = Subscription::empty();
        let child = Subscription::new(teardown);
        parent.add(child.clone());

        parent.unsubscribe();

        assert!(child.is_closed());
        assert_eq!(count.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn adding_to_a_closed_subscription_runs_immediately() {
        let parent = Subscription::empty();
        parent.unsubscribe();

        let (count, teardown) = counter();
        parent.add_teardown(teardown);
        assert_eq!(count.load(Ordering::SeqCst), 1);

        let child = Subscription::empty();
        parent.add(child.clone());
        assert!(child.is_closed());
    }

    #[test]
    fn teardown_may_unsubscribe_its_own_subscription() {
        let subscription = Subscription::empty();
        let reentrant = subscription.clone();
        subscription.add_teardown(move || reentrant.unsubscribe());

        subscription.unsubscribe();
        assert!(subscription.is_closed());
    }

    #[test]
    fn guard_unsubscribes_on_drop() {
        let (count, teardown) = counter();
        let subscription = Subscription::new(teardown);

        {
            let _guard = subscription.clone().guard();
            assert_eq!(count.load(Ordering::SeqCst), 0);
        }

        assert!(subscription.is_closed());
        assert_eq!(count.load(Ordering::SeqCst), 1);
    }
}
