#![forbid(unsafe_code)]

//! Property-level access to a persisted value.
//!
//! [`Persisted<V>`] is what view code holds. It is a thin handle: every
//! operation delegates to the [`Writer`] the [`Registry`] keeps for the
//! handle's key, so any number of handles for the same key observe one
//! shared value.
//!
//! ```
//! use std::sync::Arc;
//! use simloc_store::{MemoryStore, Persisted, Registry, Store};
//!
//! let registry = Registry::new();
//! let store: Arc<dyn Store> = Arc::new(MemoryStore::new());
//!
//! let a = Persisted::new(&registry, &store, "volume", 3_i64);
//! let b = Persisted::new(&registry, &store, "volume", 0_i64);
//! a.set(7);
//! assert_eq!(b.get(), 7);
//! ```
//!
//! # Lifetime
//!
//! A handle holds a `Weak` reference; the registry owns the writer. Using a
//! handle after its registry was dropped panics.

use std::fmt;
use std::rc::{Rc, Weak};
use std::sync::Arc;

use crate::codec::Persistable;
use crate::reactive::{Bindable, Binding, Subscription};
use crate::registry::{Registry, WriterKey};
use crate::store::Store;
use crate::writer::Writer;

/// Handle to the value stored under one key.
pub struct Persisted<V> {
    key: WriterKey,
    writer: Weak<Writer<V>>,
}

impl<V> Clone for Persisted<V> {
    fn clone(&self) -> Self {
        Self {
            key: self.key.clone(),
            writer: Weak::clone(&self.writer),
        }
    }
}

impl<V: Persistable + Clone + 'static> Persisted<V> {
    /// Attach to `key` in `store`, creating the writer on first use.
    ///
    /// # Panics
    ///
    /// Panics if `key` is already registered with a different value type.
    pub fn new(registry: &Registry, store: &Arc<dyn Store>, key: &str, default: V) -> Self {
        let writer = registry.get_or_create(store, key, default);
        Self::from_writer(&writer)
    }

    /// Handle onto an existing writer.
    #[must_use]
    pub fn from_writer(writer: &Rc<Writer<V>>) -> Self {
        Self {
            key: writer.key().clone(),
            writer: Rc::downgrade(writer),
        }
    }

    /// The (store, key) pair this handle is bound to.
    #[must_use]
    pub fn key(&self) -> &WriterKey {
        &self.key
    }

    /// Whether the owning registry is still alive.
    #[must_use]
    pub fn is_attached(&self) -> bool {
        self.writer.strong_count() > 0
    }

    /// Current value.
    #[must_use]
    pub fn get(&self) -> V {
        self.writer().read()
    }

    /// Borrow the current value for the duration of `f`.
    pub fn with<R>(&self, f: impl FnOnce(&V) -> R) -> R {
        self.writer().with(f)
    }

    /// Replace and persist the value.
    pub fn set(&self, value: V) {
        self.writer().write(value);
    }

    /// Modify a copy of the value and write it back.
    pub fn update(&self, f: impl FnOnce(&mut V)) {
        let writer = self.writer();
        let mut next = writer.read();
        f(&mut next);
        writer.write(next);
    }

    /// A get/set pair delegating to this handle.
    #[must_use]
    pub fn binding(&self) -> Binding<V> {
        let reader = self.clone();
        let writer = self.clone();
        Binding::new(move || reader.get(), move |v| writer.set(v))
    }

    /// Subscribe to new values.
    pub fn subscribe(&self, callback: impl Fn(&V) + 'static) -> Subscription {
        self.writer().subscribe(callback)
    }

    /// Subscribe to pre-change notices carrying the old value.
    pub fn subscribe_will_change(&self, callback: impl Fn(&V) + 'static) -> Subscription {
        self.writer().subscribe_will_change(callback)
    }

    fn writer(&self) -> Rc<Writer<V>> {
        match self.writer.upgrade() {
            Some(writer) => writer,
            None => panic!("persisted value `{}` used after its registry was dropped", self.key),
        }
    }
}

impl<V: Persistable + Clone + 'static> Bindable<V> for Persisted<V> {
    fn current(&self) -> V {
        self.get()
    }

    fn assign(&self, value: V) {
        self.set(value);
    }

    fn watch(&self, callback: Box<dyn Fn(&V)>) -> Subscription {
        self.subscribe(callback)
    }
}

impl<V: fmt::Debug> fmt::Debug for Persisted<V> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut s = f.debug_struct("Persisted");
        s.field("key", &self.key);
        match self.writer.upgrade() {
            Some(writer) => s.field("writer", &writer),
            None => s.field("writer", &"<detached>"),
        };
        s.finish()
    }
}
