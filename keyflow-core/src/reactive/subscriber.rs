//! Subscriber types for the push-stream layer.
//!
//! An [`Observer`] is the receiving end of a stream: a callback that is handed
//! every [`Notification`] the stream produces. Observers enforce the stream
//! grammar `Next* (Error | Complete)?`: once a terminal notification has been
//! delivered (or the observer has been closed by cancellation) nothing else
//! reaches the callback.

use std::fmt;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;

use crate::error::StreamError;

/// Unique identifier for a subscriber.
///
/// Every observer gets one when created. Hubs use it to find the listener to
/// remove when a subscription is cancelled.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SubscriberId(u64);

impl SubscriberId {
    /// Generate a new unique subscriber ID.
    ///
    /// Uses an atomic counter to ensure uniqueness across threads.
    pub fn new() -> Self {
        static COUNTER: AtomicU64 = AtomicU64::new(0);
        Self(COUNTER.fetch_add(1, Ordering::Relaxed))
    }
}

impl Default for SubscriberId {
    fn default() -> Self {
        Self::new()
    }
}

/// One message on a stream.
#[derive(Debug, Clone, PartialEq)]
pub enum Notification<T> {
    /// A value.
    Next(T),
    /// The stream failed. Terminal.
    Error(StreamError),
    /// The stream ended normally. Terminal.
    Complete,
}

impl<T> Notification<T> {
    /// Whether this notification ends the stream.
    pub fn is_terminal(&self) -> bool {
        !matches!(self, Notification::Next(_))
    }

    /// The carried value, if any.
    pub fn value(&self) -> Option<&T> {
        match self {
            Notification::Next(value) => Some(value),
            _ => None,
        }
    }
}

type Handler<T> = dyn Fn(Notification<T>) + Send + Sync;

/// The receiving end of a stream.
///
/// Cloning an observer shares its callback and its closed state.
pub struct Observer<T> {
    id: SubscriberId,
    handler: Arc<Handler<T>>,
    closed: Arc<AtomicBool>,
}

impl<T> Observer<T> {
    /// Create an observer that receives every notification.
    pub fn new<F>(handler: F) -> Self
    where
        F: Fn(Notification<T>) + Send + Sync + 'static,
    {
        Self {
            id: SubscriberId::new(),
            handler: Arc::new(handler),
            closed: Arc::new(AtomicBool::new(false)),
        }
    }

    /// Create an observer that only cares about values.
    ///
    /// Completion is ignored. Errors are logged, never dropped silently.
    pub fn on_next<F>(next: F) -> Self
    where
        F: Fn(T) + Send + Sync + 'static,
    {
        Self::new(move |notification| match notification {
            Notification::Next(value) => next(value),
            Notification::Error(error) => {
                tracing::warn!(%error, "stream failed with no error handler attached");
            }
            Notification::Complete => {}
        })
    }

    /// Get the observer's unique ID.
    pub fn id(&self) -> SubscriberId {
        self.id
    }

    /// Deliver a value.
    pub fn next(&self, value: T) {
        if !self.closed.load(Ordering::Acquire) {
            (self.handler)(Notification::Next(value));
        }
    }

    /// Deliver an error and close the observer.
    pub fn error(&self, error: StreamError) {
        if !self.closed.swap(true, Ordering::AcqRel) {
            (self.handler)(Notification::Error(error));
        }
    }

    /// Deliver completion and close the observer.
    pub fn complete(&self) {
        if !self.closed.swap(true, Ordering::AcqRel) {
            (self.handler)(Notification::Complete);
        }
    }

    /// Deliver any notification.
    pub fn notify(&self, notification: Notification<T>) {
        match notification {
            Notification::Next(value) => self.next(value),
            Notification::Error(error) => self.error(error),
            Notification::Complete => self.complete(),
        }
    }

    /// Close without delivering anything. Used by cancellation.
    pub fn close(&self) {
        self.closed.store(true, Ordering::Release);
    }

    /// Whether the observer has terminated or been closed.
    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::Acquire)
    }
}

impl<T> Clone for Observer<T> {
    fn clone(&self) -> Self {
        Self {
            id: self.id,
            handler: Arc::clone(&self.handler),
            closed: Arc::clone(&self.closed),
        }
    }
}

impl<T> fmt::Debug for Observer<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Observer")
            .field("id", &self.id)
            .field("closed", &self.is_closed())
            .finish()
    }
}
