use std::cell::{Cell, RefCell};
use std::fmt;
use std::rc::{Rc, Weak};

use futures::future::{self, AbortHandle};
use futures::task::LocalSpawn;
use futures::{Stream, StreamExt};

use crate::spawn::spawn_eager;

type Subscriber<T> = Rc<dyn Fn(&T)>;

struct SignalInner<T> {
    value: RefCell<T>,
    subscribers: RefCell<Vec<(u64, Subscriber<T>)>>,
    next_subscriber: Cell<u64>,
}

/// An observable, mutable value cell.
///
/// Cloning a `Signal` yields another handle onto the same cell. Setting a
///  value equal to the current one is a no-op, anything else replaces the
///  value and notifies every subscriber in subscription order.
pub struct Signal<T> {
    inner: Rc<SignalInner<T>>,
}

impl<T> Clone for Signal<T> {
    fn clone(&self) -> Self {
        Self {
            inner: self.inner.clone(),
        }
    }
}

impl<T: fmt::Debug> fmt::Debug for Signal<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Signal")
            .field("value", &self.inner.value.borrow())
            .field("subscribers", &self.inner.subscribers.borrow().len())
            .finish()
    }
}

impl<T: Clone + PartialEq + 'static> Signal<T> {
    pub fn new(value: T) -> Self {
        Self {
            inner: Rc::new(SignalInner {
                value: RefCell::new(value),
                subscribers: RefCell::new(Vec::new()),
                next_subscriber: Cell::new(0),
            }),
        }
    }

    /// Project a cell from a stream: holds `initial` until the stream
    ///  first emits, then follows every emission.
    ///
    /// The returned [`AbortHandle`] releases the stream subscription.
    pub fn project<S>(initial: T, stream: S, spawner: &dyn LocalSpawn) -> (Self, AbortHandle)
    where
        S: Stream<Item = T> + 'static,
    {
        let signal = Self::new(initial);
        let target = signal.downgrade();
        let (forward, handle) = future::abortable(stream.for_each(move |value| {
            if let Some(signal) = target.upgrade() {
                signal.set(value);
            }
            future::ready(())
        }));
        spawn_eager(spawner, async move {
            let _ = forward.await;
        });
        (signal, handle)
    }

    /// Clone out the current value
    pub fn get(&self) -> T {
        self.inner.value.borrow().clone()
    }

    /// Read the current value without cloning it
    pub fn with<R>(&self, f: impl FnOnce(&T) -> R) -> R {
        f(&self.inner.value.borrow())
    }

    /// Replace the value, notifying subscribers if it changed.
    ///
    /// Returns whether the value changed.
    pub fn set(&self, value: T) -> bool {
        {
            let mut current = self.inner.value.borrow_mut();
            if *current == value {
                return false;
            }
            *current = value;
        }
        self.notify();
        true
    }

    /// Register `f` to be called with every new value.
    ///
    /// The subscription lasts as long as the returned guard.
    pub fn subscribe(&self, f: impl Fn(&T) + 'static) -> Subscription {
        let id = self.inner.next_subscriber.get();
        self.inner.next_subscriber.set(id + 1);
        self.inner.subscribers.borrow_mut().push((id, Rc::new(f)));

        let weak = Rc::downgrade(&self.inner);
        Subscription {
            release: Some(Box::new(move || {
                if let Some(inner) = weak.upgrade() {
                    inner.subscribers.borrow_mut().retain(|(sid, _)| *sid != id);
                }
            })),
        }
    }

    pub fn subscriber_count(&self) -> usize {
        self.inner.subscribers.borrow().len()
    }

    fn downgrade(&self) -> WeakSignal<T> {
        WeakSignal {
            inner: Rc::downgrade(&self.inner),
        }
    }

    fn notify(&self) {
        // snapshot both so subscribers may read, set or unsubscribe freely
        let value = self.get();
        let subscribers: Vec<Subscriber<T>> = self
            .inner
            .subscribers
            .borrow()
            .iter()
            .map(|(_, f)| f.clone())
            .collect();
        for subscriber in subscribers {
            subscriber(&value);
        }
    }
}

struct WeakSignal<T> {
    inner: Weak<SignalInner<T>>,
}

impl<T> WeakSignal<T> {
    fn upgrade(&self) -> Option<Signal<T>> {
        self.inner.upgrade().map(|inner| Signal { inner })
    }
}

/// Guard returned by [`Signal::subscribe`], unsubscribes when dropped
#[must_use = "dropping a Subscription unsubscribes immediately"]
pub struct Subscription {
    release: Option<Box<dyn FnOnce()>>,
}

impl Subscription {
    /// Keep the subscriber registered for the lifetime of the signal
    pub fn detach(mut self) {
        self.release = None;
    }
}

impl fmt::Debug for Subscription {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Subscription")
            .field("active", &self.release.is_some())
            .finish()
    }
}

impl Drop for Subscription {
    fn drop(&mut self) {
        if let Some(release) = self.release.take() {
            release();
        }
    }
}

#[cfg(test)]
mod tests {
    use futures::channel::mpsc;
    use futures::executor::LocalPool;

    use super::*;

    #[test]
    fn test_set_notifies_subscribers() {
        let signal = Signal::new(1);
        let seen = Rc::new(RefCell::new(Vec::new()));

        let log = seen.clone();
        let _subscription = signal.subscribe(move |value| log.borrow_mut().push(*value));

        assert!(signal.set(2));
        assert!(signal.set(3));
        assert_eq!(signal.get(), 3);
        assert_eq!(*seen.borrow(), vec![2, 3]);
    }

    #[test]
    fn test_equal_value_is_not_notified() {
        let signal = Signal::new("same".to_string());
        let count = Rc::new(Cell::new(0));

        let counter = count.clone();
        let _subscription = signal.subscribe(move |_| counter.set(counter.get() + 1));

        assert!(!signal.set("same".to_string()));
        assert_eq!(count.get(), 0);
    }

    #[test]
    fn test_dropping_subscription_unsubscribes() {
        let signal = Signal::new(0);
        let subscription = signal.subscribe(|_| {});
        assert_eq!(signal.subscriber_count(), 1);

        drop(subscription);
        assert_eq!(signal.subscriber_count(), 0);

        signal.subscribe(|_| {}).detach();
        assert_eq!(signal.subscriber_count(), 1);
    }

    #[test]
    fn test_subscriber_can_set_other_signal() {
        let source = Signal::new(1);
        let doubled = Signal::new(2);

        let target = doubled.clone();
        let _subscription = source.subscribe(move |value| {
            target.set(value * 2);
        });

        source.set(21);
        assert_eq!(doubled.get(), 42);
    }

    #[test]
    fn test_project_follows_stream() {
        let mut pool = LocalPool::new();
        let (tx, rx) = mpsc::unbounded::<String>();

        let (signal, handle) = Signal::project("initial".to_string(), rx, &pool.spawner());
        assert_eq!(signal.get(), "initial");

        tx.unbounded_send("first".to_string()).unwrap();
        pool.run_until_stalled();
        assert_eq!(signal.get(), "first");

        handle.abort();
        pool.run_until_stalled();
        // the subscription is gone once aborted
        assert!(tx.unbounded_send("second".to_string()).is_err());
        assert_eq!(signal.get(), "first");
    }
}
