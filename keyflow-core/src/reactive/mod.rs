//! Reactive Primitives
//!
//! This module implements the push-stream layer the keyed engine is built on:
//! observables, observers, subscriptions, subjects and broadcasts.
//!
//! # Concepts
//!
//! ## Observables
//!
//! An [`Observable`] is a cold stream. Subscribing runs its producer for that
//! subscriber alone; two subscribers get two independent producers.
//!
//! ## Subjects
//!
//! A [`Subject`] is a hot source. Values are pushed into it through explicit
//! command-submission methods and fanned out to whoever is subscribed at the
//! time.
//!
//! ## Broadcasts
//!
//! A [`Broadcast`] shares one subscription to an upstream observable among
//! many listeners and replays the latest value to late ones. Every output the
//! keyed engine exposes is a broadcast.
//!
//! # Implementation Notes
//!
//! Delivery is synchronous. Stateful components own a [`SerialQueue`] so that
//! one notification is fully processed before the next starts, whether the
//! next one comes from a re-entrant listener or from another thread. No lock
//! is held while user callbacks run.

mod broadcast;
mod hub;
mod observable;
mod operators;
mod scheduler;
mod subject;
mod subscriber;
mod subscription;

pub use broadcast::Broadcast;
pub use observable::Observable;
pub use scheduler::SerialQueue;
pub use subject::Subject;
pub use subscriber::{Notification, Observer, SubscriberId};
pub use subscription::{Subscription, SubscriptionGuard};

/// Values that can travel through a stream.
///
/// Streams fan values out to many listeners and hand them across threads, so
/// they must be cheap to clone and thread-safe. Implemented for every type
/// that qualifies.
pub trait Item: Clone + Send + Sync + 'static {}

impl<T> Item for T where T: Clone + Send + Sync + 'static {}
