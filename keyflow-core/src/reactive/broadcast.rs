//! Broadcast Implementation
//!
//! A Broadcast is a hot, replay-latest view of an upstream observable: one
//! upstream subscription, one remembered value, many listeners.
//!
//! # How Broadcasts Work
//!
//! 1. The first subscriber connects the upstream. Everything the upstream
//!    emits is remembered and fanned out.
//!
//! 2. Later subscribers are registered and immediately handed the remembered
//!    value, so they never wait for the next emission and never miss one
//!    that already happened.
//!
//! 3. When the last subscriber leaves, the upstream is disconnected and the
//!    remembered value forgotten. The next subscriber starts a fresh upstream
//!    instance.
//!
//! 4. When the upstream terminates, the terminal notification is delivered
//!    to every listener and kept. Late subscribers get the last value and the
//!    same terminal notification. A terminated broadcast never reconnects.
//!
//! # Ordering
//!
//! Registration, replay, upstream emissions and disconnection all run in the
//! broadcast's serial queue. A subscriber therefore sees the replayed value
//! strictly before any newer one, with no gap and no duplicate.
//!
//! When the queue is idle, as in a single-threaded host, `subscribe` delivers
//! the replay before it returns.

use std::fmt;
use std::sync::{Arc, Weak};

use parking_lot::Mutex;

use super::hub::Hub;
use super::observable::Observable;
use super::subscriber::{Notification, Observer, SubscriberId};
use super::subscription::Subscription;
use super::Item;

/// A shared, refcounted, replay-latest stream.
pub struct Broadcast<T> {
    shared: Arc<Shared<T>>,
}

struct Shared<T> {
    source: Observable<T>,
    hub: Hub<T>,
    link: Mutex<Link>,
}

/// The upstream connection.
///
/// `epoch` changes on every connect and disconnect so notifications from a
/// previous connection that are still queued are recognised and dropped.
#[derive(Default)]
struct Link {
    connection: Option<Subscription>,
    epoch: u64,
}

impl<T: Item> Broadcast<T> {
    /// Wrap `source`. Nothing happens until the first subscription.
    pub fn new(source: Observable<T>) -> Self {
        Self {
            shared: Arc::new(Shared {
                source,
                hub: Hub::new(true),
                link: Mutex::new(Link::default()),
            }),
        }
    }

    /// The broadcast as a stream.
    pub fn observable(&self) -> Observable<T> {
        let shared = Arc::clone(&self.shared);
        Observable::new(move |observer: Observer<T>| {
            let id = observer.id();
            let attaching = Arc::clone(&shared);
            shared.hub.schedule(move || attaching.attach(observer));

            let shared = Arc::clone(&shared);
            Subscription::new(move || {
                let detaching = Arc::clone(&shared);
                shared.hub.schedule(move || detaching.detach(id));
            })
        })
    }

    /// Subscribe directly. Shorthand for `observable().subscribe(..)`.
    pub fn subscribe(&self, observer: Observer<T>) -> Subscription {
        self.observable().subscribe(observer)
    }

    /// Subscribe with a value-only callback.
    pub fn subscribe_next<F>(&self, next: F) -> Subscription
    where
        F: Fn(T) + Send + Sync + 'static,
    {
        self.observable().subscribe_next(next)
    }

    /// The remembered value. `None` while disconnected or before the upstream
    /// emitted anything.
    pub fn latest(&self) -> Option<T> {
        self.shared.hub.latest()
    }

    /// Number of current listeners.
    pub fn subscriber_count(&self) -> usize {
        self.shared.hub.listener_count()
    }

    /// Whether an upstream subscription is currently open.
    pub fn is_connected(&self) -> bool {
        self.shared.link.lock().connection.is_some()
    }

    /// Whether the upstream has completed or failed.
    pub fn is_terminated(&self) -> bool {
        self.shared.hub.is_terminated()
    }

    /// Whether two handles refer to the same broadcast.
    pub fn ptr_eq(&self, other: &Self) -> bool {
        Arc::ptr_eq(&self.shared, &other.shared)
    }
}

impl<T: Item> Shared<T> {
    fn attach(self: Arc<Self>, observer: Observer<T>) {
        if !self.hub.register(observer) {
            return;
        }
        let needs_connection = self.link.lock().connection.is_none();
        if needs_connection {
            self.connect();
        }
    }

    fn connect(self: &Arc<Self>) {
        let epoch = {
            let mut link = self.link.lock();
            link.epoch += 1;
            link.epoch
        };
        tracing::trace!(epoch, "broadcast connecting upstream");

        // Upstream emissions that happen during `subscribe` are queued behind
        // this job, so the connection is stored before any of them run.
        let weak: Weak<Self> = Arc::downgrade(self);
        let connection = self.source.subscribe(Observer::new(move |notification| {
            if let Some(shared) = weak.upgrade() {
                let delivering = Arc::clone(&shared);
                shared.hub.schedule(move || delivering.forward(epoch, notification));
            }
        }));

        let mut link = self.link.lock();
        if link.epoch == epoch {
            link.connection = Some(connection);
        }
    }

    fn forward(&self, epoch: u64, notification: Notification<T>) {
        {
            let mut link = self.link.lock();
            if link.epoch != epoch {
                return;
            }
            if notification.is_terminal() {
                // The upstream subscription already tore itself down.
                link.connection = None;
            }
        }
        self.hub.deliver(notification);
    }

    fn detach(&self, id: SubscriberId) {
        if self.hub.unregister(id) > 0 || self.hub.is_terminated() {
            return;
        }
        let connection = {
            let mut link = self.link.lock();
            link.epoch += 1;
            link.connection.take()
        };
        if let Some(connection) = connection {
            tracing::trace!("broadcast disconnecting upstream, no subscribers left");
            self.hub.reset();
            connection.unsubscribe();
        }
    }
}

impl<T> Clone for Broadcast<T> {
    fn clone(&self) -> Self {
        Self {
            shared: Arc::clone(&self.shared),
        }
    }
}

impl<T: Item> fmt::Debug for Broadcast<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Broadcast")
            .field("subscriber_count", &self.subscriber_count())
            .field("connected", &self.is_connected())
            .field("terminated", &self.is_terminated())
            .finish()
    }
}

// ----------------------------------------------------------------------------
// Tests
// ----------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::StreamError;
    use crate::reactive::Subject;
    use std::sync::atomic::{AtomicI32, Ordering};

    fn record<T: Item>(broadcast: &Broadcast<T>) -> (Subscription, Arc<Mutex<Vec<Notification<T>>>>) {
        let log = Arc::new(Mutex::new(Vec::new()));
        let log_clone = log.clone();
        let subscription = broadcast.subscribe(Observer::new(move |n| log_clone.lock().push(n)));
        (subscription, log)
    }

    /// A source that counts how many times it was subscribed.
    fn counted(subject: &Subject<i32>) -> (Observable<i32>, Arc<AtomicI32>) {
        let connections = Arc::new(AtomicI32::new(0));
        let connections_clone = connections.clone();
        let inner = subject.observable();
        let source = Observable::new(move |observer: Observer<i32>| {
            connections_clone.fetch_add(1, Ordering::SeqCst);
            inner.subscribe(observer)
        });
        (source, connections)
    }

    #[test]
    fn upstream_is_subscribed_once() {
        let subject = Subject::new();
        let (source, connections) = counted(&subject);
        let broadcast = source.share_latest();

        let (_a, first) = record(&broadcast);
        let (_b, second) = record(&broadcast);
        subject.next(1).unwrap();

        assert_eq!(connections.load(Ordering::SeqCst), 1);
        assert_eq!(*first.lock(), vec![Notification::Next(1)]);
        assert_eq!(*second.lock(), vec![Notification::Next(1)]);
    }

    #[test]
    fn late_subscriber_gets_latest_then_updates() {
        let subject = Subject::new();
        let broadcast = subject.observable().share_latest();
        let (_a, _) = record(&broadcast);

        subject.next(1).unwrap();
        subject.next(2).unwrap();
        let (_b, late) = record(&broadcast);
        subject.next(3).unwrap();

        assert_eq!(*late.lock(), vec![Notification::Next(2), Notification::Next(3)]);
        assert_eq!(broadcast.latest(), Some(3));
    }

    #[test]
    fn synchronous_upstream_is_replayed_to_first_subscriber() {
        let broadcast = Observable::of(vec![1, 2]).share_latest();
        let (_sub, log) = record(&broadcast);

        assert_eq!(
            *log.lock(),
            vec![Notification::Next(1), Notification::Next(2), Notification::Complete]
        );
    }

    #[test]
    fn last_unsubscribe_disconnects_and_resets() {
        let subject = Subject::new();
        let (source, connections) = counted(&subject);
        let broadcast = source.share_latest();

        let (a, _) = record(&broadcast);
        subject.next(1).unwrap();
        assert!(broadcast.is_connected());

        a.unsubscribe();
        assert!(!broadcast.is_connected());
        assert_eq!(broadcast.latest(), None);
        assert_eq!(subject.subscriber_count(), 0);

        let (_b, log) = record(&broadcast);
        assert_eq!(connections.load(Ordering::SeqCst), 2);
        assert!(log.lock().is_empty());
    }

    #[test]
    fn termination_is_permanent_and_replayed() {
        let subject = Subject::new();
        let (source, connections) = counted(&subject);
        let broadcast = source.share_latest();
        let (_a, first) = record(&broadcast);

        subject.next(7).unwrap();
        subject.error(StreamError::upstream("gone")).unwrap();

        let (late_sub, late) = record(&broadcast);

        let expected = vec![Notification::Next(7), Notification::Error(StreamError::upstream("gone"))];
        assert_eq!(*first.lock(), expected);
        assert_eq!(*late.lock(), expected);
        assert!(late_sub.is_closed());
        assert!(broadcast.is_terminated());
        assert!(!broadcast.is_connected());
        assert_eq!(connections.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn subscriber_added_from_a_listener_sees_no_duplicate() {
        let subject = Subject::new();
        let broadcast = subject.observable().share_latest();
        let nested_log = Arc::new(Mutex::new(Vec::new()));
        let nested_subs = Arc::new(Mutex::new(Vec::new()));

        let (b, log, subs) = (broadcast.clone(), nested_log.clone(), nested_subs.clone());
        let _outer = broadcast.subscribe_next(move |v: i32| {
            if v == 1 {
                let log = log.clone();
                subs.lock().push(b.subscribe_next(move |v| log.lock().push(v)));
            }
        });

        subject.next(1).unwrap();
        subject.next(2).unwrap();

        assert_eq!(*nested_log.lock(), vec![1, 2]);
    }
}
