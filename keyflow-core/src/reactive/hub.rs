//! Listener hub shared by [`Subject`](super::Subject) and
//! [`Broadcast`](super::Broadcast).
//!
//! A hub owns a listener list, an optional remembered latest value and the
//! terminal state, all behind one [`SerialQueue`]. Every method except the
//! read-only accessors must run inside that queue; callers submit jobs with
//! [`Hub::schedule`].

use std::mem;

use parking_lot::Mutex;
use smallvec::SmallVec;

use super::scheduler::SerialQueue;
use super::subscriber::{Notification, Observer, SubscriberId};
use crate::error::StreamError;

/// How a hub ended.
#[derive(Debug, Clone)]
pub(crate) enum Terminal {
    Failed(StreamError),
    Completed,
}

impl Terminal {
    fn notification<T>(&self) -> Notification<T> {
        match self {
            Terminal::Failed(error) => Notification::Error(error.clone()),
            Terminal::Completed => Notification::Complete,
        }
    }
}

pub(crate) struct Hub<T> {
    queue: SerialQueue,
    replay: bool,
    state: Mutex<HubState<T>>,
}

struct HubState<T> {
    listeners: SmallVec<[Observer<T>; 4]>,
    latest: Option<T>,
    terminal: Option<Terminal>,
}

impl<T> Hub<T>
where
    T: Clone + Send + 'static,
{
    pub(crate) fn new(replay: bool) -> Self {
        Self {
            queue: SerialQueue::new(),
            replay,
            state: Mutex::new(HubState {
                listeners: SmallVec::new(),
                latest: None,
                terminal: None,
            }),
        }
    }

    /// Run `job` in this hub's serialized context.
    pub(crate) fn schedule<F>(&self, job: F)
    where
        F: FnOnce() + Send + 'static,
    {
        self.queue.run(job);
    }

    /// Fan a notification out to the current listeners.
    ///
    /// Listeners added by a listener while this runs do not see this
    /// notification; they get it through replay instead.
    pub(crate) fn deliver(&self, notification: Notification<T>) {
        let listeners = {
            let mut state = self.state.lock();
            if state.terminal.is_some() {
                return;
            }
            match &notification {
                Notification::Next(value) => {
                    if self.replay {
                        state.latest = Some(value.clone());
                    }
                    state.listeners.clone()
                }
                Notification::Error(error) => {
                    state.terminal = Some(Terminal::Failed(error.clone()));
                    mem::take(&mut state.listeners)
                }
                Notification::Complete => {
                    state.terminal = Some(Terminal::Completed);
                    mem::take(&mut state.listeners)
                }
            }
        };

        for listener in listeners {
            listener.notify(notification.clone());
        }
    }

    /// Add a listener and replay the latest value and terminal state to it.
    ///
    /// Returns `true` if the listener was added, i.e. it was still open and
    /// the hub has not terminated.
    pub(crate) fn register(&self, observer: Observer<T>) -> bool {
        let (latest, terminal) = {
            let mut state = self.state.lock();
            if observer.is_closed() {
                return false;
            }
            if state.terminal.is_none() {
                state.listeners.push(observer.clone());
            }
            (state.latest.clone(), state.terminal.clone())
        };

        if let Some(value) = latest {
            observer.next(value);
        }
        match terminal {
            Some(terminal) => {
                observer.notify(terminal.notification());
                false
            }
            None => true,
        }
    }

    /// Remove a listener. Returns the number of listeners left.
    pub(crate) fn unregister(&self, id: SubscriberId) -> usize {
        let mut state = self.state.lock();
        state.listeners.retain(|listener| listener.id() != id);
        state.listeners.len()
    }

    /// Forget the remembered value.
    pub(crate) fn reset(&self) {
        self.state.lock().latest = None;
    }

    pub(crate) fn latest(&self) -> Option<T> {
        self.state.lock().latest.clone()
    }

    pub(crate) fn listener_count(&self) -> usize {
        self.state.lock().listeners.len()
    }

    pub(crate) fn is_terminated(&self) -> bool {
        self.state.lock().terminal.is_some()
    }
}
