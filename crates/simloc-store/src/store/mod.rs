#![forbid(unsafe_code)]

//! Key-value persistent stores with per-key change notification.
//!
//! A [`Store`] maps string keys to [`PropertyValue`]s and lets callers
//! [`observe`](Store::observe) a key. Handlers receive the new value (or
//! `None` when the key was removed) for every distinct change, whether it was
//! made through this handle or by someone else.
//!
//! # Delivery contract
//!
//! - Handlers may run on any thread. They must be cheap and must not write
//!   to the store that invoked them; the usual handler just posts the value
//!   into a channel drained elsewhere.
//! - Setting a key to the value it already holds is silent.
//! - Notifications for one store are delivered in the order the changes
//!   were applied.
//!
//! # Backends
//!
//! - [`MemoryStore`]: process-local, for tests and ephemeral state.
//! - [`FileStore`]: a JSON document on disk that survives restarts and can
//!   pick up edits made by other processes via [`FileStore::reload`].

mod file;
mod memory;
mod observers;

use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};

pub use file::FileStore;
pub use memory::MemoryStore;
pub use observers::Observation;

use crate::codec::PropertyValue;

/// Callback invoked with the new value of an observed key.
pub type ChangeHandler = Box<dyn Fn(Option<PropertyValue>) + Send + Sync>;

/// Process-unique identity of a store instance.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct StoreId(u64);

impl StoreId {
    /// Allocate a fresh identity. Every call returns a distinct id.
    #[must_use]
    pub fn next() -> Self {
        static NEXT: AtomicU64 = AtomicU64::new(1);
        Self(NEXT.fetch_add(1, Ordering::Relaxed))
    }

    /// Raw numeric value.
    #[must_use]
    pub fn get(self) -> u64 {
        self.0
    }
}

impl fmt::Display for StoreId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "store#{}", self.0)
    }
}

/// Errors from persisting to a store.
#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("store I/O failed for {path}: {source}")]
    Io {
        path: String,
        #[source]
        source: std::io::Error,
    },
    #[error("store document is malformed: {0}")]
    Format(#[from] serde_json::Error),
    /// An internal lock was poisoned (another thread panicked while holding it).
    #[error("store lock was poisoned")]
    PoisonedLock,
}

/// Durable key-value store with change notification.
pub trait Store: Send + Sync {
    /// Identity used to tell store instances apart.
    fn id(&self) -> StoreId;

    /// Current value for `key`, or `None` if it was never set or was removed.
    fn get(&self, key: &str) -> Option<PropertyValue>;

    /// Persist `value` under `key`, replacing any prior value.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError`] if the value could not be made durable. The
    /// in-process view may already reflect the new value.
    fn set(&self, key: &str, value: PropertyValue) -> Result<(), StoreError>;

    /// Delete `key`. Observers are notified with `None` if it existed.
    ///
    /// # Errors
    ///
    /// As for [`set`](Store::set).
    fn remove(&self, key: &str) -> Result<(), StoreError>;

    /// Register `handler` for changes to `key`.
    ///
    /// Delivery stops when the returned [`Observation`] is cancelled or
    /// dropped.
    fn observe(&self, key: &str, handler: ChangeHandler) -> Observation;
}
