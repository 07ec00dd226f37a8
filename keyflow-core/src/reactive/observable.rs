//! Observable Implementation
//!
//! An [`Observable`] is a cold stream: a recipe that starts a fresh producer
//! for every subscriber. Hot sharing is layered on top by
//! [`Subject`](super::Subject) and [`Broadcast`](super::Broadcast).
//!
//! # Subscription Contract
//!
//! [`Observable::subscribe`] wraps the caller's observer in a fresh guard
//! observer per subscription:
//!
//! - Unsubscribing closes the guard, so nothing is delivered afterwards even
//!   if the producer is slow to notice.
//! - A terminal notification unsubscribes automatically, which releases the
//!   producer's resources without the caller having to do it.
//!
//! Producers may emit synchronously from inside `subscribe`, including
//! terminating before `subscribe` returns. In that case the returned
//! subscription is already closed.

use std::fmt;
use std::sync::Arc;

use super::subscriber::{Notification, Observer};
use super::subscription::Subscription;
use super::Item;
use crate::error::StreamError;

type Producer<T> = dyn Fn(Observer<T>) -> Subscription + Send + Sync;

/// A cold, push-based stream of `T`.
pub struct Observable<T> {
    producer: Arc<Producer<T>>,
}

impl<T: Item> Observable<T> {
    /// Create an observable from a producer function.
    ///
    /// The producer runs once per subscriber and returns the subscription
    /// that tears its resources down.
    pub fn new<F>(producer: F) -> Self
    where
        F: Fn(Observer<T>) -> Subscription + Send + Sync + 'static,
    {
        Self {
            producer: Arc::new(producer),
        }
    }

    /// Start the stream for `observer`.
    pub fn subscribe(&self, observer: Observer<T>) -> Subscription {
        let subscription = Subscription::empty();

        let on_terminal = subscription.clone();
        let guard = Observer::new(move |notification: Notification<T>| {
            let terminal = notification.is_terminal();
            observer.notify(notification);
            if terminal {
                on_terminal.unsubscribe();
            }
        });

        let closer = guard.clone();
        subscription.add_teardown(move || closer.close());
        subscription.add((self.producer)(guard));
        subscription
    }

    /// Subscribe with a value-only callback. See [`Observer::on_next`].
    pub fn subscribe_next<F>(&self, next: F) -> Subscription
    where
        F: Fn(T) + Send + Sync + 'static,
    {
        self.subscribe(Observer::on_next(next))
    }

    /// A stream that emits each item in order, then completes.
    pub fn of<I>(items: I) -> Self
    where
        I: IntoIterator<Item = T>,
    {
        let items: Arc<[T]> = items.into_iter().collect();
        Self::new(move |observer| {
            for item in items.iter() {
                if observer.is_closed() {
                    break;
                }
                observer.next(item.clone());
            }
            observer.complete();
            Subscription::empty()
        })
    }

    /// A stream that completes immediately.
    pub fn empty() -> Self {
        Self::new(|observer| {
            observer.complete();
            Subscription::empty()
        })
    }

    /// A stream that never emits anything.
    pub fn never() -> Self {
        Self::new(|_| Subscription::empty())
    }

    /// A stream that fails immediately with `error`.
    pub fn fail(error: StreamError) -> Self {
        Self::new(move |observer| {
            observer.error(error.clone());
            Subscription::empty()
        })
    }
}

impl<T> Clone for Observable<T> {
    fn clone(&self) -> Self {
        Self {
            producer: Arc::clone(&self.producer),
        }
    }
}

impl<T> fmt::Debug for Observable<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Observable").finish_non_exhaustive()
    }
}
