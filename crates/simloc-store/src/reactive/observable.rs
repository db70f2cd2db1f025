#![forbid(unsafe_code)]

//! Shared, version-tracked values with change notification.
//!
//! # Design
//!
//! [`Observable<T>`] keeps its value in reference-counted shared storage;
//! cloning an `Observable` yields another handle to the same value.
//! Callbacks live in a [`Subscribers`] list that only holds `Weak`
//! references. The strong reference is owned by the returned
//! [`Subscription`], so dropping the guard unsubscribes. Dead entries are
//! pruned lazily on the next notification.
//!
//! # Invariants
//!
//! 1. Version increments exactly once per mutation that changes the value.
//! 2. Subscribers are notified in registration order.
//! 3. Setting a value equal to the current value is a no-op.
//! 4. Callbacks run with no internal borrow held, so they may read the
//!    observable, set it, or subscribe new callbacks.
//!
//! # Failure Modes
//!
//! - Callback panic: propagates to the caller of `set()`. The value has
//!   already been updated.

use std::any::Any;
use std::cell::{Cell, RefCell};
use std::rc::{Rc, Weak};

type Callback<T> = Box<dyn Fn(&T)>;

/// Ordered list of weakly-held callbacks.
pub struct Subscribers<T> {
    list: RefCell<Vec<Weak<Callback<T>>>>,
}

impl<T: 'static> Subscribers<T> {
    /// Create an empty list.
    #[must_use]
    pub fn new() -> Self {
        Self {
            list: RefCell::new(Vec::new()),
        }
    }

    /// Register `callback`. It stays registered while the returned
    /// [`Subscription`] is alive.
    pub fn subscribe(&self, callback: impl Fn(&T) + 'static) -> Subscription {
        let strong: Rc<Callback<T>> = Rc::new(Box::new(callback));
        self.list.borrow_mut().push(Rc::downgrade(&strong));
        Subscription {
            callback: Some(strong as Rc<dyn Any>),
        }
    }

    /// Invoke every live callback with `value`, in registration order.
    pub fn notify(&self, value: &T) {
        let live: Vec<Rc<Callback<T>>> = {
            let mut list = self.list.borrow_mut();
            list.retain(|w| w.strong_count() > 0);
            list.iter().filter_map(Weak::upgrade).collect()
        };
        for callback in live {
            callback(value);
        }
    }

    /// Number of live callbacks.
    #[must_use]
    pub fn len(&self) -> usize {
        self.list
            .borrow()
            .iter()
            .filter(|w| w.strong_count() > 0)
            .count()
    }

    /// Whether no live callbacks remain.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl<T: 'static> Default for Subscribers<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T: 'static> std::fmt::Debug for Subscribers<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Subscribers")
            .field("live", &self.len())
            .finish()
    }
}

/// RAII guard for a registered callback.
///
/// Dropping the guard (or calling [`cancel`](Self::cancel)) removes the
/// callback before the next notification cycle.
#[must_use = "dropping a Subscription unsubscribes immediately"]
pub struct Subscription {
    callback: Option<Rc<dyn Any>>,
}

impl Subscription {
    /// Stop receiving notifications. Idempotent.
    pub fn cancel(&mut self) {
        self.callback = None;
    }

    /// Whether the callback is still registered.
    #[must_use]
    pub fn is_active(&self) -> bool {
        self.callback.is_some()
    }
}

impl std::fmt::Debug for Subscription {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Subscription")
            .field("active", &self.is_active())
            .finish()
    }
}

struct Shared<T> {
    value: RefCell<T>,
    version: Cell<u64>,
    subscribers: Subscribers<T>,
}

/// A shared value that notifies subscribers when it changes.
///
/// Cloning an `Observable` creates a new handle to the **same** value.
pub struct Observable<T> {
    shared: Rc<Shared<T>>,
}

impl<T> Clone for Observable<T> {
    fn clone(&self) -> Self {
        Self {
            shared: Rc::clone(&self.shared),
        }
    }
}

impl<T: std::fmt::Debug> std::fmt::Debug for Observable<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Observable")
            .field("value", &*self.shared.value.borrow())
            .field("version", &self.shared.version.get())
            .finish()
    }
}

impl<T: Clone + PartialEq + 'static> Observable<T> {
    /// Create an observable holding `value` at version 0.
    #[must_use]
    pub fn new(value: T) -> Self {
        Self {
            shared: Rc::new(Shared {
                value: RefCell::new(value),
                version: Cell::new(0),
                subscribers: Subscribers::new(),
            }),
        }
    }

    /// Clone of the current value.
    #[must_use]
    pub fn get(&self) -> T {
        self.shared.value.borrow().clone()
    }

    /// Borrow the current value for the duration of `f`.
    pub fn with<R>(&self, f: impl FnOnce(&T) -> R) -> R {
        f(&self.shared.value.borrow())
    }

    /// Replace the value, notifying subscribers if it changed.
    pub fn set(&self, value: T) {
        if *self.shared.value.borrow() == value {
            return;
        }
        let snapshot = value.clone();
        *self.shared.value.borrow_mut() = value;
        self.shared.version.set(self.shared.version.get() + 1);
        self.shared.subscribers.notify(&snapshot);
    }

    /// Mutate a copy of the value in place and store it back.
    pub fn update(&self, f: impl FnOnce(&mut T)) {
        let mut next = self.get();
        f(&mut next);
        self.set(next);
    }

    /// Register a callback invoked with each new value.
    pub fn subscribe(&self, callback: impl Fn(&T) + 'static) -> Subscription {
        self.shared.subscribers.subscribe(callback)
    }

    /// Number of changes applied so far.
    #[must_use]
    pub fn version(&self) -> u64 {
        self.shared.version.get()
    }

    /// Number of live subscribers.
    #[must_use]
    pub fn subscriber_count(&self) -> usize {
        self.shared.subscribers.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn get_and_set() {
        let obs = Observable::new(1);
        assert_eq!(obs.get(), 1);
        obs.set(2);
        assert_eq!(obs.get(), 2);
        assert_eq!(obs.version(), 1);
    }

    #[test]
    fn equal_set_is_noop() {
        let obs = Observable::new(5);
        let hits = Rc::new(Cell::new(0));
        let h = Rc::clone(&hits);
        let _sub = obs.subscribe(move |_| h.set(h.get() + 1));

        obs.set(5);
        assert_eq!(obs.version(), 0);
        assert_eq!(hits.get(), 0);
    }

    #[test]
    fn subscribers_notified_in_order() {
        let obs = Observable::new(0);
        let log = Rc::new(RefCell::new(Vec::new()));
        let l1 = Rc::clone(&log);
        let l2 = Rc::clone(&log);
        let _a = obs.subscribe(move |v| l1.borrow_mut().push(("a", *v)));
        let _b = obs.subscribe(move |v| l2.borrow_mut().push(("b", *v)));

        obs.set(9);
        assert_eq!(*log.borrow(), vec![("a", 9), ("b", 9)]);
    }

    #[test]
    fn dropped_subscription_stops_delivery() {
        let obs = Observable::new(0);
        let seen = Rc::new(Cell::new(0));
        let s = Rc::clone(&seen);
        let sub = obs.subscribe(move |v| s.set(*v));
        obs.set(1);
        drop(sub);
        obs.set(2);
        assert_eq!(seen.get(), 1);
        assert_eq!(obs.subscriber_count(), 0);
    }

    #[test]
    fn cancel_is_idempotent() {
        let obs = Observable::new(0);
        let mut sub = obs.subscribe(|_| {});
        sub.cancel();
        sub.cancel();
        assert!(!sub.is_active());
        assert_eq!(obs.subscriber_count(), 0);
    }

    #[test]
    fn callback_may_read_and_subscribe() {
        let obs = Observable::new(0);
        let inner = obs.clone();
        let extra = Rc::new(RefCell::new(Vec::new()));
        let e = Rc::clone(&extra);
        let _sub = obs.subscribe(move |v| {
            assert_eq!(inner.get(), *v);
            e.borrow_mut().push(inner.subscribe(|_| {}));
        });
        obs.set(3);
        assert_eq!(extra.borrow().len(), 1);
    }

    #[test]
    fn update_applies_closure() {
        let obs = Observable::new(vec![1]);
        obs.update(|v| v.push(2));
        assert_eq!(obs.get(), vec![1, 2]);
    }

    #[test]
    fn clones_share_state() {
        let a = Observable::new(String::from("x"));
        let b = a.clone();
        b.set("y".into());
        assert_eq!(a.get(), "y");
        assert_eq!(a.version(), 1);
    }

    #[test]
    fn bare_subscribers_list() {
        let subs: Subscribers<u8> = Subscribers::new();
        assert!(subs.is_empty());
        let total = Rc::new(Cell::new(0_u32));
        let t = Rc::clone(&total);
        let _s = subs.subscribe(move |v| t.set(t.get() + u32::from(*v)));
        subs.notify(&4);
        subs.notify(&5);
        assert_eq!(total.get(), 9);
        assert_eq!(subs.len(), 1);
    }
}
