#![forbid(unsafe_code)]

//! Per-key handler table shared by the store backends.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError, Weak};

use super::ChangeHandler;
use crate::codec::PropertyValue;

type SharedHandler = Arc<dyn Fn(Option<PropertyValue>) + Send + Sync>;

#[derive(Default)]
struct Handlers {
    next_id: u64,
    by_key: HashMap<String, Vec<(u64, SharedHandler)>>,
}

/// Registered change handlers, keyed by store key.
#[derive(Default)]
pub(crate) struct ObserverTable {
    inner: Arc<Mutex<Handlers>>,
}

fn lock(handlers: &Mutex<Handlers>) -> MutexGuard<'_, Handlers> {
    // Handlers are never invoked with the lock held, so a poisoned table is
    // still structurally sound.
    handlers.lock().unwrap_or_else(PoisonError::into_inner)
}

impl ObserverTable {
    pub(crate) fn new() -> Self {
        Self::default()
    }

    pub(crate) fn register(&self, key: &str, handler: ChangeHandler) -> Observation {
        let mut handlers = lock(&self.inner);
        let id = handlers.next_id;
        handlers.next_id += 1;
        handlers
            .by_key
            .entry(key.to_owned())
            .or_default()
            .push((id, Arc::from(handler)));
        Observation {
            table: Arc::downgrade(&self.inner),
            key: key.to_owned(),
            id,
            cancelled: AtomicBool::new(false),
        }
    }

    /// Invoke every handler registered for `key`, outside the table lock.
    pub(crate) fn notify(&self, key: &str, value: &Option<PropertyValue>) {
        let targets: Vec<SharedHandler> = lock(&self.inner)
            .by_key
            .get(key)
            .map(|list| list.iter().map(|(_, h)| Arc::clone(h)).collect())
            .unwrap_or_default();
        for handler in targets {
            handler(value.clone());
        }
    }

    pub(crate) fn observer_count(&self, key: &str) -> usize {
        lock(&self.inner).by_key.get(key).map_or(0, Vec::len)
    }
}

/// Handle to a registered change handler.
///
/// Cancelling stops delivery. [`cancel`](Self::cancel) is idempotent, runs
/// automatically on drop, and is a no-op once the store itself is gone.
#[must_use = "dropping an Observation cancels it"]
pub struct Observation {
    table: Weak<Mutex<Handlers>>,
    key: String,
    id: u64,
    cancelled: AtomicBool,
}

impl Observation {
    /// Stop delivering notifications to this handler.
    pub fn cancel(&self) {
        if self.cancelled.swap(true, Ordering::AcqRel) {
            return;
        }
        let Some(table) = self.table.upgrade() else {
            return;
        };
        let mut handlers = lock(&table);
        if let Some(list) = handlers.by_key.get_mut(&self.key) {
            list.retain(|(id, _)| *id != self.id);
            if list.is_empty() {
                handlers.by_key.remove(&self.key);
            }
        }
    }

    /// Whether [`cancel`](Self::cancel) has run.
    #[must_use]
    pub fn is_cancelled(&self) -> bool {
        self.cancelled.load(Ordering::Acquire)
    }

    /// The observed key.
    #[must_use]
    pub fn key(&self) -> &str {
        &self.key
    }
}

impl Drop for Observation {
    fn drop(&mut self) {
        self.cancel();
    }
}

impl std::fmt::Debug for Observation {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Observation")
            .field("key", &self.key)
            .field("cancelled", &self.is_cancelled())
            .finish()
    }
}
