#![forbid(unsafe_code)]

//! Saved GPS locations for simulated devices.
//!
//! This crate provides:
//! - [`LocationList`], the saved locations kept in a preferences store
//! - [`LocationInput`] for validating the "add location" form
//! - [`DeviceRoster`], the known devices and current selection
//! - [`AppConfig`] and [`App`], used by the `simloc` binary

pub mod app;
pub mod config;
pub mod device;
pub mod error;
pub mod location;
pub mod logging;

pub use app::{AddOutcome, App};
pub use config::AppConfig;
pub use device::{Device, DeviceEvent, DeviceEventSender, DeviceRoster};
pub use error::{AppError, ConfigError, DeviceError, LocationInputError};
pub use location::{
    Coordinate, DeviceLocation, LOCATIONS_KEY, LocationInput, LocationList, is_valid_latitude,
    is_valid_longitude,
};
pub use logging::LogFormat;
