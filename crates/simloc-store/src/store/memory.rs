#![forbid(unsafe_code)]

use std::collections::BTreeMap;
use std::sync::{Mutex, PoisonError};

use super::observers::ObserverTable;
use super::{ChangeHandler, Observation, Store, StoreError, StoreId};
use crate::codec::PropertyValue;

/// Thread-safe, process-local [`Store`].
///
/// Nothing survives the process. Useful for tests and for state that only
/// needs the observation semantics.
pub struct MemoryStore {
    id: StoreId,
    entries: Mutex<BTreeMap<String, PropertyValue>>,
    // Serializes apply + notify so observers see changes in store order.
    write_gate: Mutex<()>,
    observers: ObserverTable,
}

impl MemoryStore {
    /// Create an empty store with a fresh identity.
    #[must_use]
    pub fn new() -> Self {
        Self {
            id: StoreId::next(),
            entries: Mutex::new(BTreeMap::new()),
            write_gate: Mutex::new(()),
            observers: ObserverTable::new(),
        }
    }

    /// Create a store pre-populated with `entries`. No notifications fire.
    #[must_use]
    pub fn with_entries(entries: impl IntoIterator<Item = (String, PropertyValue)>) -> Self {
        let store = Self::new();
        store
            .entries
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .extend(entries);
        store
    }

    /// Number of live observers for `key`.
    #[must_use]
    pub fn observer_count(&self, key: &str) -> usize {
        self.observers.observer_count(key)
    }

    fn apply(&self, key: &str, value: Option<PropertyValue>) -> Result<(), StoreError> {
        let _gate = self
            .write_gate
            .lock()
            .map_err(|_| StoreError::PoisonedLock)?;
        {
            let mut entries = self.entries.lock().map_err(|_| StoreError::PoisonedLock)?;
            let changed = match &value {
                Some(v) => entries.insert(key.to_owned(), v.clone()).as_ref() != Some(v),
                None => entries.remove(key).is_some(),
            };
            if !changed {
                return Ok(());
            }
        }
        tracing::trace!(store = %self.id, key, present = value.is_some(), "memory store changed");
        self.observers.notify(key, &value);
        Ok(())
    }
}

impl Default for MemoryStore {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Debug for MemoryStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let len = self
            .entries
            .lock()
            .map(|e| e.len())
            .unwrap_or_default();
        f.debug_struct("MemoryStore")
            .field("id", &self.id)
            .field("entries", &len)
            .finish()
    }
}

impl Store for MemoryStore {
    fn id(&self) -> StoreId {
        self.id
    }

    fn get(&self, key: &str) -> Option<PropertyValue> {
        self.entries
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .get(key)
            .cloned()
    }

    fn set(&self, key: &str, value: PropertyValue) -> Result<(), StoreError> {
        self.apply(key, Some(value))
    }

    fn remove(&self, key: &str) -> Result<(), StoreError> {
        self.apply(key, None)
    }

    fn observe(&self, key: &str, handler: ChangeHandler) -> Observation {
        self.observers.register(key, handler)
    }
}
