#![forbid(unsafe_code)]

//! One writer per (store, key).
//!
//! The [`Registry`] owns every [`Writer`] it creates and hands out the same
//! instance for every later request with the same [`WriterKey`]. Writers of
//! different value types share one table; each entry records the type it
//! was created with and every lookup checks it.
//!
//! A registry is an ordinary value. The application's composition root
//! creates one and passes it to whatever builds bindings, so tests get
//! isolated registries and can run in parallel.
//!
//! # Invariants
//!
//! 1. For a given key, every lookup after the first returns the same writer.
//! 2. Looking up a key with a value type other than the one it was created
//!    with panics, naming the key and both types. Reusing a key for another
//!    type is a programming error, not a runtime condition.
//! 3. Writers live as long as the registry. Bindings hold weak references.
//! 4. The registry is `!Send`; every access happens on the thread that owns
//!    it, which also serializes all writer state.

use std::any::{Any, TypeId, type_name};
use std::cell::RefCell;
use std::collections::HashMap;
use std::fmt;
use std::rc::Rc;
use std::sync::Arc;

use crate::codec::Persistable;
use crate::store::{Store, StoreId};
use crate::writer::Writer;

/// Identity of a synchronization target: a store instance plus a key.
#[derive(Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct WriterKey {
    store: StoreId,
    name: String,
}

impl WriterKey {
    /// Build a key for `name` in the store identified by `store`.
    #[must_use]
    pub fn new(store: StoreId, name: impl Into<String>) -> Self {
        Self {
            store,
            name: name.into(),
        }
    }

    /// The store this key belongs to.
    #[must_use]
    pub fn store(&self) -> StoreId {
        self.store
    }

    /// The string key inside the store.
    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }
}

impl fmt::Display for WriterKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.store, self.name)
    }
}

trait ErasedWriter {
    fn pump(&self) -> usize;
}

impl<V: Persistable + Clone + 'static> ErasedWriter for Writer<V> {
    fn pump(&self) -> usize {
        Writer::pump(self)
    }
}

struct Entry {
    type_id: TypeId,
    type_name: &'static str,
    any: Rc<dyn Any>,
    erased: Rc<dyn ErasedWriter>,
}

/// Table of live writers, one per [`WriterKey`].
#[derive(Default)]
pub struct Registry {
    entries: RefCell<HashMap<WriterKey, Entry>>,
}

impl Registry {
    /// Create an empty registry.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Return the writer for `key` in `store`, creating it on first use.
    ///
    /// A new writer is seeded from the store, or from `default` when the
    /// store has no decodable value. For an existing writer `default` is
    /// ignored.
    ///
    /// # Panics
    ///
    /// Panics if `key` was first registered with a value type other than `V`.
    pub fn get_or_create<V>(&self, store: &Arc<dyn Store>, key: &str, default: V) -> Rc<Writer<V>>
    where
        V: Persistable + Clone + 'static,
    {
        let writer_key = WriterKey::new(store.id(), key);
        if let Some(existing) = self.lookup::<V>(&writer_key) {
            return existing;
        }

        let writer = Rc::new(Writer::new(Arc::clone(store), key, default));
        let entry = Entry {
            type_id: TypeId::of::<V>(),
            type_name: type_name::<V>(),
            any: Rc::clone(&writer) as Rc<dyn Any>,
            erased: Rc::clone(&writer) as Rc<dyn ErasedWriter>,
        };
        self.entries.borrow_mut().insert(writer_key, entry);
        writer
    }

    /// The existing writer for `key`, if any.
    ///
    /// # Panics
    ///
    /// Panics if `key` was registered with a value type other than `V`.
    #[must_use]
    pub fn get<V>(&self, key: &WriterKey) -> Option<Rc<Writer<V>>>
    where
        V: Persistable + Clone + 'static,
    {
        self.lookup(key)
    }

    /// Apply pending store notifications for every writer. Returns the
    /// number of notifications consumed.
    ///
    /// Call this from the owning thread's event loop.
    pub fn pump(&self) -> usize {
        // Writers may create bindings from their callbacks, so the table is
        // not borrowed while they run.
        let writers: Vec<Rc<dyn ErasedWriter>> = self
            .entries
            .borrow()
            .values()
            .map(|e| Rc::clone(&e.erased))
            .collect();
        writers.iter().map(|w| w.pump()).sum()
    }

    /// Whether a writer exists for `key`.
    #[must_use]
    pub fn contains(&self, key: &WriterKey) -> bool {
        self.entries.borrow().contains_key(key)
    }

    /// Number of registered writers.
    #[must_use]
    pub fn len(&self) -> usize {
        self.entries.borrow().len()
    }

    /// Whether no writers are registered.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entries.borrow().is_empty()
    }

    fn lookup<V: 'static>(&self, key: &WriterKey) -> Option<Rc<Writer<V>>> {
        let entries = self.entries.borrow();
        let entry = entries.get(key)?;
        if entry.type_id != TypeId::of::<V>() {
            panic!(
                "persisted value type must remain consistent for key `{key}`: \
                 registered as `{}`, requested as `{}`",
                entry.type_name,
                type_name::<V>()
            );
        }
        match Rc::clone(&entry.any).downcast::<Writer<V>>() {
            Ok(writer) => Some(writer),
            Err(_) => unreachable!("type id matched for key `{key}`"),
        }
    }
}

impl fmt::Debug for Registry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let entries = self.entries.borrow();
        let mut keys: Vec<_> = entries
            .iter()
            .map(|(k, e)| format!("{k}: {}", e.type_name))
            .collect();
        keys.sort();
        f.debug_struct("Registry").field("writers", &keys).finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::MemoryStore;

    fn memory() -> Arc<dyn Store> {
        Arc::new(MemoryStore::new())
    }

    #[test]
    fn same_key_returns_same_writer() {
        let registry = Registry::new();
        let store = memory();
        let a = registry.get_or_create(&store, "k", 0_i64);
        let b = registry.get_or_create(&store, "k", 99_i64);
        assert!(Rc::ptr_eq(&a, &b));
        assert_eq!(b.read(), 0, "second default is ignored");
        assert_eq!(registry.len(), 1);
    }

    #[test]
    fn different_stores_get_different_writers() {
        let registry = Registry::new();
        let s1 = memory();
        let s2 = memory();
        let a = registry.get_or_create(&s1, "k", 0_i64);
        let b = registry.get_or_create(&s2, "k", 0_i64);
        assert!(!Rc::ptr_eq(&a, &b));
        assert_eq!(registry.len(), 2);
    }

    #[test]
    #[should_panic(expected = "must remain consistent for key")]
    fn type_mismatch_panics() {
        let registry = Registry::new();
        let store = memory();
        let _a = registry.get_or_create(&store, "k", 0_i64);
        let _b = registry.get_or_create(&store, "k", String::new());
    }

    #[test]
    fn type_mismatch_message_names_both_types() {
        let registry = Registry::new();
        let store = memory();
        let _a = registry.get_or_create(&store, "k", 0_i64);
        let result = std::panic::catch_unwind(std::panic::AssertUnwindSafe(|| {
            let _ = registry.get_or_create(&store, "k", false);
        }));
        let payload = result.unwrap_err();
        let message = payload
            .downcast_ref::<String>()
            .cloned()
            .unwrap_or_default();
        assert!(message.contains("`i64`"), "{message}");
        assert!(message.contains("`bool`"), "{message}");
        assert!(message.contains("/k`"), "{message}");
    }

    #[test]
    fn get_finds_existing_only() {
        let registry = Registry::new();
        let store = memory();
        let key = WriterKey::new(store.id(), "k");
        assert!(registry.get::<i64>(&key).is_none());
        let created = registry.get_or_create(&store, "k", 1_i64);
        let found = registry.get::<i64>(&key).unwrap();
        assert!(Rc::ptr_eq(&created, &found));
        assert!(registry.contains(&key));
    }

    #[test]
    fn pump_reaches_every_writer() {
        let registry = Registry::new();
        let store = memory();
        let a = registry.get_or_create(&store, "a", 0_i64);
        let b = registry.get_or_create(&store, "b", String::new());

        store.set("a", 5_i64.into()).unwrap();
        store.set("b", "five".into()).unwrap();
        assert_eq!(registry.pump(), 2);
        assert_eq!(a.read(), 5);
        assert_eq!(b.read(), "five");
        assert_eq!(registry.pump(), 0);
    }

    #[test]
    fn writer_key_display() {
        let key = WriterKey::new(StoreId::next(), "device-locations");
        assert!(key.to_string().ends_with("/device-locations"));
        assert_eq!(key.name(), "device-locations");
    }
}
