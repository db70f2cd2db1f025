#![forbid(unsafe_code)]

//! Reactive primitives shared by writers and view code.
//!
//! - [`Observable`]: a shared, version-tracked value with change
//!   notification via subscriber callbacks.
//! - [`Subscribers`]: the weakly-held callback list behind `Observable`,
//!   reused by [`Writer`](crate::writer::Writer) for its change events.
//! - [`Subscription`]: RAII guard that unsubscribes on drop.
//! - [`Binding`], [`TwoWayBinding`], [`BindingScope`]: get/set views and
//!   their lifecycle.
//!
//! # Architecture
//!
//! Everything here is single-threaded (`Rc` + `RefCell`). Values that change
//! on other threads reach these types only through a channel drained on the
//! owning thread.
//!
//! # Invariants
//!
//! 1. Subscribers are notified in registration order.
//! 2. Dropping a [`Subscription`] removes the callback before the next
//!    notification cycle.
//! 3. No internal borrow is held while a callback runs.

pub mod binding;
pub mod observable;

pub use binding::{Bindable, Binding, BindingScope, TwoWayBinding, bind};
pub use observable::{Observable, Subscribers, Subscription};
