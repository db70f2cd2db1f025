#![forbid(unsafe_code)]

//! Two-way bindings for connecting reactive values to UI state.
//!
//! A [`Binding<T>`] is a `{get, set}` pair that view code reads and writes
//! without knowing where the value lives. Anything implementing
//! [`Bindable`] (an [`Observable`], a
//! [`Persisted`](crate::persisted::Persisted) preference) can produce one.
//!
//! # Usage
//!
//! ```
//! use simloc_store::reactive::{Observable, bind};
//!
//! let count = Observable::new(0);
//! let b = bind(&count);
//! b.set(5);
//! assert_eq!(count.get(), 5);
//!
//! let label = b.map(|c| c.to_string(), |s: String| s.parse().unwrap_or(0));
//! label.set("7".to_owned());
//! assert_eq!(count.get(), 7);
//! ```
//!
//! # Two-Way Links
//!
//! [`TwoWayBinding<T>`] keeps two bindables equal: a change to either side
//! is written to the other, with a re-entrancy guard against cycles.
//!
//! ```
//! use simloc_store::reactive::{Observable, TwoWayBinding};
//!
//! let source = Observable::new(42);
//! let field = Observable::new(0);
//! let _link = TwoWayBinding::new(&source, &field);
//! assert_eq!(field.get(), 42);
//!
//! field.set(20);
//! assert_eq!(source.get(), 20);
//! ```
//!
//! # Invariants
//!
//! 1. `Binding::get()` always returns the current (not stale) value.
//! 2. `TwoWayBinding` never cycles: one change produces at most one write to
//!    the opposite side.
//! 3. Dropping a `TwoWayBinding` or `BindingScope` disconnects everything it
//!    holds.

use std::cell::Cell;
use std::rc::Rc;

use super::observable::{Observable, Subscription};

/// A value source that bindings can read, write and watch.
pub trait Bindable<T>: Clone + 'static {
    /// Current value.
    fn current(&self) -> T;
    /// Replace the value.
    fn assign(&self, value: T);
    /// Register a callback for new values.
    fn watch(&self, callback: Box<dyn Fn(&T)>) -> Subscription;
}

impl<T: Clone + PartialEq + 'static> Bindable<T> for Observable<T> {
    fn current(&self) -> T {
        self.get()
    }

    fn assign(&self, value: T) {
        self.set(value);
    }

    fn watch(&self, callback: Box<dyn Fn(&T)>) -> Subscription {
        self.subscribe(callback)
    }
}

// ---------------------------------------------------------------------------
// Binding<T>
// ---------------------------------------------------------------------------

/// Read/write access to a value held elsewhere.
pub struct Binding<T> {
    get: Rc<dyn Fn() -> T>,
    set: Rc<dyn Fn(T)>,
}

impl<T> Clone for Binding<T> {
    fn clone(&self) -> Self {
        Self {
            get: Rc::clone(&self.get),
            set: Rc::clone(&self.set),
        }
    }
}

impl<T: std::fmt::Debug + 'static> std::fmt::Debug for Binding<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Binding")
            .field("value", &self.get())
            .finish()
    }
}

impl<T: 'static> Binding<T> {
    /// Create a binding from a getter and a setter.
    pub fn new(get: impl Fn() -> T + 'static, set: impl Fn(T) + 'static) -> Self {
        Self {
            get: Rc::new(get),
            set: Rc::new(set),
        }
    }

    /// A binding that always reads `value` and ignores writes.
    pub fn constant(value: T) -> Self
    where
        T: Clone,
    {
        Self::new(move || value.clone(), |_| {})
    }

    /// Get the current bound value.
    #[must_use]
    pub fn get(&self) -> T {
        (self.get)()
    }

    /// Write through to the bound value.
    pub fn set(&self, value: T) {
        (self.set)(value);
    }

    /// Derive a binding of another type through a pair of conversions.
    pub fn map<U: 'static>(
        self,
        to: impl Fn(T) -> U + 'static,
        from: impl Fn(U) -> T + 'static,
    ) -> Binding<U> {
        let get = Rc::clone(&self.get);
        let set = Rc::clone(&self.set);
        Binding {
            get: Rc::new(move || to(get())),
            set: Rc::new(move |u| set(from(u))),
        }
    }
}

/// Create a two-way binding to any [`Bindable`] source.
pub fn bind<T: 'static, B: Bindable<T>>(source: &B) -> Binding<T> {
    let reader = source.clone();
    let writer = source.clone();
    Binding::new(move || reader.current(), move |v| writer.assign(v))
}

// ---------------------------------------------------------------------------
// TwoWayBinding<T>
// ---------------------------------------------------------------------------

fn link<T, A, B>(a: &A, b: &B) -> [Subscription; 2]
where
    T: Clone + 'static,
    A: Bindable<T>,
    B: Bindable<T>,
{
    b.assign(a.current());

    let syncing = Rc::new(Cell::new(false));

    let b_clone = b.clone();
    let guard_ab = Rc::clone(&syncing);
    let sub_ab = a.watch(Box::new(move |val: &T| {
        if !guard_ab.get() {
            guard_ab.set(true);
            b_clone.assign(val.clone());
            guard_ab.set(false);
        }
    }));

    let a_clone = a.clone();
    let guard_ba = Rc::clone(&syncing);
    let sub_ba = b.watch(Box::new(move |val: &T| {
        if !guard_ba.get() {
            guard_ba.set(true);
            a_clone.assign(val.clone());
            guard_ba.set(false);
        }
    }));

    [sub_ab, sub_ba]
}

/// Bidirectional link between two [`Bindable`]s of the same type.
///
/// Drop the `TwoWayBinding` to disconnect both directions.
pub struct TwoWayBinding<T> {
    _subs: [Subscription; 2],
    _phantom: std::marker::PhantomData<T>,
}

impl<T: Clone + 'static> TwoWayBinding<T> {
    /// Link `a` and `b`. `b` first takes `a`'s current value.
    pub fn new<A: Bindable<T>, B: Bindable<T>>(a: &A, b: &B) -> Self {
        Self {
            _subs: link(a, b),
            _phantom: std::marker::PhantomData,
        }
    }
}

impl<T> std::fmt::Debug for TwoWayBinding<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TwoWayBinding").finish()
    }
}

// ---------------------------------------------------------------------------
// BindingScope
// ---------------------------------------------------------------------------

/// Collects subscriptions for a logical scope such as one view.
///
/// Dropping the scope releases everything it holds. `clear()` does the same
/// immediately and leaves the scope reusable.
pub struct BindingScope {
    subscriptions: Vec<Subscription>,
}

impl BindingScope {
    /// Create an empty binding scope.
    #[must_use]
    pub fn new() -> Self {
        Self {
            subscriptions: Vec::new(),
        }
    }

    /// Keep `sub` alive for the lifetime of the scope.
    pub fn hold(&mut self, sub: Subscription) {
        self.subscriptions.push(sub);
    }

    /// Subscribe to a source within this scope.
    pub fn subscribe<T: 'static, B: Bindable<T>>(
        &mut self,
        source: &B,
        callback: impl Fn(&T) + 'static,
    ) -> &mut Self {
        let sub = source.watch(Box::new(callback));
        self.subscriptions.push(sub);
        self
    }

    /// Link two sources for the lifetime of this scope.
    pub fn link<T, A, B>(&mut self, a: &A, b: &B) -> &mut Self
    where
        T: Clone + 'static,
        A: Bindable<T>,
        B: Bindable<T>,
    {
        self.subscriptions.extend(link(a, b));
        self
    }

    /// Number of held subscriptions.
    #[must_use]
    pub fn binding_count(&self) -> usize {
        self.subscriptions.len()
    }

    /// Whether the scope holds nothing.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.subscriptions.is_empty()
    }

    /// Release all subscriptions immediately.
    pub fn clear(&mut self) {
        self.subscriptions.clear();
    }
}

impl Default for BindingScope {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Debug for BindingScope {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BindingScope")
            .field("binding_count", &self.subscriptions.len())
            .finish()
    }
}
