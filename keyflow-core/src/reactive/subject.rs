//! Subject Implementation
//!
//! A Subject is the command-submission end of a pipeline: the external
//! command layer calls [`Subject::next`], [`Subject::error`] and
//! [`Subject::complete`], and every current subscriber of
//! [`Subject::observable`] receives the notification.
//!
//! # How Subjects Work
//!
//! 1. Subscribing registers an observer with the subject's hub.
//!
//! 2. Submitting a value hands it to the hub's serial queue, which delivers
//!    it to a snapshot of the listener list.
//!
//! 3. A terminal submission is delivered once and then the subject refuses
//!    further input with [`StreamError::Terminated`].
//!
//! # Thread Safety
//!
//! Subjects can be shared across threads. Submissions from different threads
//! are serialized: one notification reaches every listener before the next
//! one starts.
//!
//! Subjects do not replay. Anything that must be seen by late subscribers
//! goes through a [`Broadcast`](super::Broadcast).

use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use super::hub::Hub;
use super::observable::Observable;
use super::subscriber::{Notification, Observer};
use super::subscription::Subscription;
use super::Item;
use crate::error::StreamError;

/// A hot multicast source.
pub struct Subject<T> {
    hub: Arc<Hub<T>>,

    /// Set as soon as a terminal notification is submitted, before it is
    /// delivered, so racing submissions are rejected consistently.
    stopped: Arc<AtomicBool>,
}

impl<T: Item> Subject<T> {
    /// Create a subject. It only forwards; late subscribers see nothing
    /// sent before they attached.
    pub fn new() -> Self {
        Self {
            hub: Arc::new(Hub::new(false)),
            stopped: Arc::new(AtomicBool::new(false)),
        }
    }

    /// Submit a value.
    pub fn next(&self, value: T) -> Result<(), StreamError> {
        if self.stopped.load(Ordering::Acquire) {
            return Err(StreamError::Terminated);
        }
        self.submit(Notification::Next(value));
        Ok(())
    }

    /// Fail the subject.
    pub fn error(&self, error: StreamError) -> Result<(), StreamError> {
        if self.stopped.swap(true, Ordering::AcqRel) {
            return Err(StreamError::Terminated);
        }
        self.submit(Notification::Error(error));
        Ok(())
    }

    /// Complete the subject.
    pub fn complete(&self) -> Result<(), StreamError> {
        if self.stopped.swap(true, Ordering::AcqRel) {
            return Err(StreamError::Terminated);
        }
        self.submit(Notification::Complete);
        Ok(())
    }

    fn submit(&self, notification: Notification<T>) {
        let hub = Arc::clone(&self.hub);
        self.hub.schedule(move || hub.deliver(notification));
    }

    /// The subject as a stream. Every subscription registers one listener.
    pub fn observable(&self) -> Observable<T> {
        let hub = Arc::clone(&self.hub);
        Observable::new(move |observer: Observer<T>| {
            let id = observer.id();
            let registering = Arc::clone(&hub);
            hub.schedule(move || {
                registering.register(observer);
            });

            let hub = Arc::clone(&hub);
            Subscription::new(move || {
                let unregistering = Arc::clone(&hub);
                hub.schedule(move || {
                    unregistering.unregister(id);
                });
            })
        })
    }

    /// Subscribe directly. Shorthand for `observable().subscribe(..)`.
    pub fn subscribe(&self, observer: Observer<T>) -> Subscription {
        self.observable().subscribe(observer)
    }

    /// Whether a terminal notification has been submitted.
    pub fn is_stopped(&self) -> bool {
        self.stopped.load(Ordering::Acquire)
    }

    /// Number of current listeners.
    pub fn subscriber_count(&self) -> usize {
        self.hub.listener_count()
    }
}

impl<T: Item> Default for Subject<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T> Clone for Subject<T> {
    fn clone(&self) -> Self {
        Self {
            hub: Arc::clone(&self.hub),
            stopped: Arc::clone(&self.stopped),
        }
    }
}

impl<T: Item> fmt::Debug for Subject<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Subject")
            .field("stopped", &self.is_stopped())
            .field("subscriber_count", &self.subscriber_count())
            .finish()
    }
}

// ----------------------------------------------------------------------------
// Tests
// ----------------------------------------------------------------------------
