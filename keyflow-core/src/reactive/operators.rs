//! Stream Operators
//!
//! The small operator set the keyed engine and its per-key transforms are
//! written with. Every operator returns a new cold [`Observable`]; per-operator
//! state (scan accumulators, the last distinct value, ...) is created per
//! subscription, so two subscribers never share it.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use parking_lot::Mutex;

use super::broadcast::Broadcast;
use super::observable::Observable;
use super::subscriber::{Notification, Observer};
use super::subscription::Subscription;
use super::Item;

/// Forward a terminal notification unchanged.
fn forward_terminal<T, U>(observer: &Observer<U>, notification: Notification<T>) {
    match notification {
        Notification::Next(_) => {}
        Notification::Error(error) => observer.error(error),
        Notification::Complete => observer.complete(),
    }
}

impl<T: Item> Observable<T> {
    /// Transform every value.
    pub fn map<U, F>(&self, f: F) -> Observable<U>
    where
        U: Item,
        F: Fn(T) -> U + Send + Sync + 'static,
    {
        let source = self.clone();
        let f = Arc::new(f);
        Observable::new(move |observer: Observer<U>| {
            let f = Arc::clone(&f);
            source.subscribe(Observer::new(move |notification| match notification {
                Notification::Next(value) => observer.next(f(value)),
                other => forward_terminal(&observer, other),
            }))
        })
    }

    /// Keep only values matching `predicate`.
    pub fn filter<F>(&self, predicate: F) -> Observable<T>
    where
        F: Fn(&T) -> bool + Send + Sync + 'static,
    {
        let source = self.clone();
        let predicate = Arc::new(predicate);
        Observable::new(move |observer: Observer<T>| {
            let predicate = Arc::clone(&predicate);
            source.subscribe(Observer::new(move |notification| match notification {
                Notification::Next(value) => {
                    if predicate(&value) {
                        observer.next(value);
                    }
                }
                other => forward_terminal(&observer, other),
            }))
        })
    }

    /// Emit the running fold of the values, starting from a copy of `seed`.
    pub fn scan<A, F>(&self, seed: A, f: F) -> Observable<A>
    where
        A: Item,
        F: Fn(&A, T) -> A + Send + Sync + 'static,
    {
        let source = self.clone();
        let f = Arc::new(f);
        Observable::new(move |observer: Observer<A>| {
            let f = Arc::clone(&f);
            let acc = Mutex::new(seed.clone());
            source.subscribe(Observer::new(move |notification| match notification {
                Notification::Next(value) => {
                    let next = {
                        let mut acc = acc.lock();
                        let next = f(&acc, value);
                        *acc = next.clone();
                        next
                    };
                    observer.next(next);
                }
                other => forward_terminal(&observer, other),
            }))
        })
    }

    /// Drop values equal to the previously emitted one.
    pub fn distinct_until_changed(&self) -> Observable<T>
    where
        T: PartialEq,
    {
        let source = self.clone();
        Observable::new(move |observer: Observer<T>| {
            let last: Mutex<Option<T>> = Mutex::new(None);
            source.subscribe(Observer::new(move |notification| match notification {
                Notification::Next(value) => {
                    let changed = {
                        let mut last = last.lock();
                        if last.as_ref() == Some(&value) {
                            false
                        } else {
                            *last = Some(value.clone());
                            true
                        }
                    };
                    if changed {
                        observer.next(value);
                    }
                }
                other => forward_terminal(&observer, other),
            }))
        })
    }

    /// Pass values through while `predicate` holds. The first value that
    /// fails it is dropped and the stream completes.
    pub fn take_while<F>(&self, predicate: F) -> Observable<T>
    where
        F: Fn(&T) -> bool + Send + Sync + 'static,
    {
        let source = self.clone();
        let predicate = Arc::new(predicate);
        Observable::new(move |observer: Observer<T>| {
            let predicate = Arc::clone(&predicate);
            source.subscribe(Observer::new(move |notification| match notification {
                Notification::Next(value) => {
                    if predicate(&value) {
                        observer.next(value);
                    } else {
                        observer.complete();
                    }
                }
                other => forward_terminal(&observer, other),
            }))
        })
    }

    /// Mirror the source until `notifier` emits a value, then complete.
    ///
    /// A notifier error fails the stream; notifier completion is ignored.
    pub fn take_until<N: Item>(&self, notifier: &Observable<N>) -> Observable<T> {
        let source = self.clone();
        let notifier = notifier.clone();
        Observable::new(move |observer: Observer<T>| {
            let subscription = Subscription::empty();

            let downstream = observer.clone();
            let stop = subscription.clone();
            subscription.add(notifier.subscribe(Observer::new(move |notification: Notification<N>| {
                match notification {
                    Notification::Next(_) => downstream.complete(),
                    Notification::Error(error) => downstream.error(error),
                    Notification::Complete => return,
                }
                stop.unsubscribe();
            })));
            if observer.is_closed() {
                return subscription;
            }

            let downstream = observer.clone();
            subscription.add(source.subscribe(Observer::new(move |n| downstream.notify(n))));
            subscription
        })
    }

    /// Interleave several streams. Completes once all of them completed;
    /// fails on the first error.
    pub fn merge<I>(sources: I) -> Observable<T>
    where
        I: IntoIterator<Item = Observable<T>>,
    {
        let sources: Arc<[Observable<T>]> = sources.into_iter().collect();
        Observable::new(move |observer: Observer<T>| {
            if sources.is_empty() {
                observer.complete();
                return Subscription::empty();
            }

            let remaining = Arc::new(AtomicUsize::new(sources.len()));
            let subscription = Subscription::empty();
            for source in sources.iter() {
                if observer.is_closed() {
                    break;
                }
                let downstream = observer.clone();
                let remaining = Arc::clone(&remaining);
                subscription.add(source.subscribe(Observer::new(move |notification| {
                    match notification {
                        Notification::Complete => {
                            if remaining.fetch_sub(1, Ordering::AcqRel) == 1 {
                                downstream.complete();
                            }
                        }
                        other => downstream.notify(other),
                    }
                })));
            }
            subscription
        })
    }

    /// Share one upstream subscription among all subscribers and replay the
    /// latest value to late ones. See [`Broadcast`].
    pub fn share_latest(&self) -> Broadcast<T> {
        Broadcast::new(self.clone())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::StreamError;
    use crate::reactive::Subject;

    fn collect_values<T: Item>(source: &Observable<T>) -> Arc<Mutex<Vec<Notification<T>>>> {
        let log = Arc::new(Mutex::new(Vec::new()));
        let log_clone = log.clone();
        source.subscribe(Observer::new(move |n| log_clone.lock().push(n)));
        log
    }

    fn values<T: Clone>(log: &Mutex<Vec<Notification<T>>>) -> Vec<T> {
        log.lock().iter().filter_map(|n| n.value().cloned()).collect()
    }

    #[test]
    fn map_and_filter() {
        let source = Observable::of(1..=6).filter(|v| v % 2 == 0).map(|v| v * 10);
        let log = collect_values(&source);

        assert_eq!(values(&log), vec![20, 40, 60]);
        assert_eq!(log.lock().last(), Some(&Notification::Complete));
    }

    #[test]
    fn scan_state_is_per_subscription() {
        let source = Observable::of(vec![1, 2, 3]).scan(0, |acc, v| acc + v);

        assert_eq!(values(&collect_values(&source)), vec![1, 3, 6]);
        assert_eq!(values(&collect_values(&source)), vec![1, 3, 6]);
    }

    #[test]
    fn distinct_until_changed_drops_repeats() {
        let source = Observable::of(vec![true, true, false, false, true]).distinct_until_changed();
        assert_eq!(values(&collect_values(&source)), vec![true, false, true]);
    }

    #[test]
    fn take_while_completes_on_first_failure() {
        let source = Observable::of(vec![1, 2, 9, 3]).take_while(|v| *v < 5);
        let log = collect_values(&source);

        assert_eq!(
            *log.lock(),
            vec![Notification::Next(1), Notification::Next(2), Notification::Complete]
        );
    }

    #[test]
    fn take_until_stops_on_notifier() {
        let source = Subject::new();
        let stop = Subject::<()>::new();
        let log = collect_values(&source.observable().take_until(&stop.observable()));

        source.next(1).unwrap();
        stop.next(()).unwrap();
        source.next(2).unwrap();

        assert_eq!(*log.lock(), vec![Notification::Next(1), Notification::Complete]);
        assert_eq!(source.subscriber_count(), 0);
        assert_eq!(stop.subscriber_count(), 0);
    }

    #[test]
    fn take_until_ignores_notifier_completion() {
        let source = Subject::new();
        let stop = Subject::<()>::new();
        let log = collect_values(&source.observable().take_until(&stop.observable()));

        stop.complete().unwrap();
        source.next(1).unwrap();

        assert_eq!(values(&log), vec![1]);
    }

    #[test]
    fn merge_completes_after_all_sources() {
        let a = Subject::new();
        let b = Subject::new();
        let log = collect_values(&Observable::merge([a.observable(), b.observable()]));

        a.next(1).unwrap();
        b.next(2).unwrap();
        a.complete().unwrap();
        assert_eq!(log.lock().last(), Some(&Notification::Next(2)));

        b.next(3).unwrap();
        b.complete().unwrap();
        assert_eq!(values(&log), vec![1, 2, 3]);
        assert_eq!(log.lock().last(), Some(&Notification::Complete));
    }

    #[test]
    fn merge_fails_fast() {
        let a = Subject::<i32>::new();
        let b = Subject::<i32>::new();
        let log = collect_values(&Observable::merge([a.observable(), b.observable()]));

        a.error(StreamError::upstream("a")).unwrap();
        b.next(1).unwrap();

        assert_eq!(*log.lock(), vec![Notification::Error(StreamError::upstream("a"))]);
        assert_eq!(b.subscriber_count(), 0);
    }
}
