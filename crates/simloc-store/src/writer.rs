#![forbid(unsafe_code)]

//! The synchronization object behind one persisted value.
//!
//! A [`Writer<V>`] owns the authoritative in-memory copy of the value stored
//! under one [`WriterKey`]. Local writes go through [`Writer::write`];
//! changes made to the store by anyone else arrive through a mailbox and are
//! applied by [`Writer::pump`] on the thread that owns the writer.
//!
//! # State machine
//!
//! ```text
//!            write() begins                 Store::set returns
//!   Idle ──────────────────────▶ SelfWriting ──────────────────▶ Idle
//!    ▲  accepts external changes   ignores notifications          │
//!    └────────────────────────────────────────────────────────────┘
//! ```
//!
//! Before leaving `SelfWriting` the writer absorbs whatever its mailbox
//! received during the store call. A store that notifies synchronously has
//! already posted the echo of our own write by then; it is dropped so that a
//! local write publishes exactly once. A store that notifies later leaves the
//! written encoding recorded as an unconfirmed echo, and the first pumped
//! notification carrying exactly that encoding is dropped instead.
//!
//! # Marshalling
//!
//! The store's handler runs on whatever thread performed the change. It only
//! posts the new value into an `mpsc` channel. All reads of that channel and
//! every mutation of the writer happen on the owning thread: `Writer` is
//! `!Send`, so this is enforced by the compiler.
//!
//! # Failure Modes
//!
//! | Failure | Effect |
//! |---------|--------|
//! | Encoding error on write | Logged; in-memory value still updated, store untouched |
//! | Store error on write | Logged; in-memory value still updated |
//! | Decoding error on external change | Logged; last good value kept, nothing published |
//! | Key removed externally | Value resets to the default and is published |

use std::cell::RefCell;
use std::sync::Arc;
use std::sync::mpsc::{self, Receiver};

use crate::codec::{Persistable, PropertyValue, decode, encode};
use crate::reactive::{Subscribers, Subscription};
use crate::registry::WriterKey;
use crate::store::{Observation, Store};

/// Whether a writer is currently performing its own store write.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum SyncState {
    /// Accepting external change notifications.
    Idle,
    /// Inside `Store::set`; notifications are echoes of our own write.
    SelfWriting,
}

struct Slot<V> {
    value: V,
    state: SyncState,
    // Encoding we persisted whose notification has not arrived yet.
    unconfirmed_echo: Option<PropertyValue>,
    // Foreign change observed during a self-write, applied on the next pump.
    deferred: Option<Option<PropertyValue>>,
}

/// Owner of one persisted value's in-memory copy.
pub struct Writer<V> {
    key: WriterKey,
    store: Arc<dyn Store>,
    default: V,
    slot: RefCell<Slot<V>>,
    mailbox: Receiver<Option<PropertyValue>>,
    will_change: Subscribers<V>,
    did_change: Subscribers<V>,
    _observation: Observation,
}

impl<V: Persistable + Clone + 'static> Writer<V> {
    /// Create a writer for `key` in `store`.
    ///
    /// The initial value is read from the store, falling back to `default`
    /// when the key is absent or does not decode as `V`.
    pub fn new(store: Arc<dyn Store>, key: impl Into<String>, default: V) -> Self {
        let key = WriterKey::new(store.id(), key);
        let (tx, mailbox) = mpsc::channel();
        // Observe before reading so no change can slip between the two.
        let observation = store.observe(
            key.name(),
            Box::new(move |native| {
                // The writer may already be gone; nothing to deliver then.
                let _ = tx.send(native);
            }),
        );
        let value = match store.get(key.name()) {
            None => default.clone(),
            Some(native) => match decode::<V>(&native) {
                Ok(value) => value,
                Err(err) => {
                    tracing::warn!(key = %key, error = %err, "stored value unreadable; using default");
                    default.clone()
                }
            },
        };
        tracing::debug!(key = %key, value_type = std::any::type_name::<V>(), "writer created");
        Self {
            key,
            store,
            default,
            slot: RefCell::new(Slot {
                value,
                state: SyncState::Idle,
                unconfirmed_echo: None,
                deferred: None,
            }),
            mailbox,
            will_change: Subscribers::new(),
            did_change: Subscribers::new(),
            _observation: observation,
        }
    }

    /// The (store, key) pair this writer synchronizes.
    #[must_use]
    pub fn key(&self) -> &WriterKey {
        &self.key
    }

    /// The value used when the store has no usable entry.
    #[must_use]
    pub fn default_value(&self) -> &V {
        &self.default
    }

    /// Current synchronization state.
    #[must_use]
    pub fn sync_state(&self) -> SyncState {
        self.slot.borrow().state
    }

    /// Current in-memory value. Never touches the store.
    #[must_use]
    pub fn read(&self) -> V {
        self.slot.borrow().value.clone()
    }

    /// Borrow the current value for the duration of `f`.
    ///
    /// `f` must not call [`write`](Self::write) on this writer.
    pub fn with<R>(&self, f: impl FnOnce(&V) -> R) -> R {
        f(&self.slot.borrow().value)
    }

    /// Replace the value and persist it.
    ///
    /// The new value is readable as soon as this returns, whether or not it
    /// reached the store. Subscribers see will-change (old value) first and
    /// did-change (new value) last, once each.
    pub fn write(&self, value: V) {
        let old = self.read();
        self.will_change.notify(&old);

        self.slot.borrow_mut().state = SyncState::SelfWriting;
        let (attempted, stored) = match encode(&value) {
            Ok(native) => {
                let stored = match self.store.set(self.key.name(), native.clone()) {
                    Ok(()) => true,
                    Err(err) => {
                        tracing::warn!(key = %self.key, error = %err, "store write failed; keeping value in memory only");
                        false
                    }
                };
                (Some(native), stored)
            }
            Err(err) => {
                tracing::warn!(key = %self.key, error = %err, "value not encodable; keeping it in memory only");
                (None, false)
            }
        };
        self.finish_self_write(attempted, stored);

        self.slot.borrow_mut().value = value.clone();
        self.did_change.notify(&value);
    }

    /// Apply a change reported by the store.
    ///
    /// `None` means the key was removed and resets the value to the default.
    /// Ignored while [`SyncState::SelfWriting`]. A value that fails to decode
    /// is logged and dropped.
    pub fn on_external_change(&self, native: Option<PropertyValue>) {
        if self.sync_state() == SyncState::SelfWriting {
            tracing::debug!(key = %self.key, "ignoring notification during self-write");
            return;
        }
        let next = match native {
            None => {
                tracing::debug!(key = %self.key, "key removed externally; resetting to default");
                self.default.clone()
            }
            Some(native) => match decode::<V>(&native) {
                Ok(value) => value,
                Err(err) => {
                    tracing::warn!(
                        key = %self.key,
                        kind = native.kind(),
                        error = %err,
                        "could not decode external change; keeping current value"
                    );
                    return;
                }
            },
        };
        let old = self.read();
        self.will_change.notify(&old);
        self.slot.borrow_mut().value = next.clone();
        self.did_change.notify(&next);
    }

    /// Apply store notifications queued since the last pump.
    ///
    /// Notifications carry whole values, so only the latest one is applied.
    /// Returns the number of notifications consumed.
    pub fn pump(&self) -> usize {
        let (native, consumed) = {
            let mut slot = self.slot.borrow_mut();
            if slot.state == SyncState::SelfWriting {
                return 0;
            }
            let mut consumed = 0;
            let mut latest = None;
            if let Some(deferred) = slot.deferred.take() {
                consumed += 1;
                latest = Some(deferred);
            }
            for native in self.mailbox.try_iter() {
                consumed += 1;
                latest = Some(native);
            }
            let Some(latest) = latest else {
                return 0;
            };
            let echo = slot.unconfirmed_echo.take();
            if echo.is_some() && latest == echo {
                tracing::debug!(key = %self.key, "dropped late echo of our own write");
                return consumed;
            }
            (latest, consumed)
        };
        self.on_external_change(native);
        consumed
    }

    /// Subscribe to new values, delivered after each accepted change.
    pub fn subscribe(&self, callback: impl Fn(&V) + 'static) -> Subscription {
        self.did_change.subscribe(callback)
    }

    /// Subscribe to pre-change notices, delivered with the old value.
    pub fn subscribe_will_change(&self, callback: impl Fn(&V) + 'static) -> Subscription {
        self.will_change.subscribe(callback)
    }

    fn finish_self_write(&self, attempted: Option<PropertyValue>, stored: bool) {
        let mut slot = self.slot.borrow_mut();
        let latest = self.mailbox.try_iter().last();
        match attempted {
            Some(written) if stored => {
                // Anything queued before our write is superseded by it.
                slot.deferred = None;
                slot.unconfirmed_echo = None;
                match latest {
                    Some(latest) if latest.as_ref() == Some(&written) => {
                        tracing::trace!(key = %self.key, "absorbed echo of our own write");
                    }
                    Some(foreign) => slot.deferred = Some(foreign),
                    None => slot.unconfirmed_echo = Some(written),
                }
            }
            attempted => match latest {
                // A store may announce a value it then failed to persist.
                Some(latest) if attempted.is_some() && latest == attempted => {
                    tracing::trace!(key = %self.key, "absorbed notification of a rejected write");
                }
                Some(latest) => slot.deferred = Some(latest),
                None => {}
            },
        }
        slot.state = SyncState::Idle;
    }
}

impl<V: std::fmt::Debug> std::fmt::Debug for Writer<V> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let slot = self.slot.borrow();
        f.debug_struct("Writer")
            .field("key", &self.key)
            .field("value", &slot.value)
            .field("state", &slot.state)
            .finish()
    }
}
