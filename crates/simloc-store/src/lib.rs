#![forbid(unsafe_code)]

//! Persisted, observable values backed by a key-value preferences store.
//!
//! This crate provides:
//! - [`PropertyValue`] and the [`Persistable`] codec for any serde type
//! - [`Store`] with [`MemoryStore`] and [`FileStore`] backends
//! - [`Writer`], the single synchronization object behind each stored key
//! - [`Registry`], which keeps exactly one writer per (store, key)
//! - [`Persisted`], the handle view code reads, writes and binds to
//!
//! # Threading
//!
//! Stores are `Send + Sync` and may be changed from any thread. Writers,
//! the registry and handles are confined to the thread that created them;
//! store notifications are queued and applied by [`Registry::pump`].

pub mod codec;
pub mod persisted;
pub mod reactive;
pub mod registry;
pub mod store;
pub mod writer;

pub use codec::{CodecError, Persistable, PropertyValue, decode, encode};
pub use persisted::Persisted;
pub use reactive::{Bindable, Binding, BindingScope, Observable, Subscription, TwoWayBinding};
pub use registry::{Registry, WriterKey};
pub use store::{ChangeHandler, FileStore, MemoryStore, Observation, Store, StoreError, StoreId};
pub use writer::{SyncState, Writer};
