#![forbid(unsafe_code)]

//! Named locations and the persisted list that holds them.
//!
//! The list lives in the preferences store under [`LOCATIONS_KEY`] as an
//! array of `{address, latitude, longitude}` dictionaries. A location's
//! identity is its address.
//!
//! # Invariants
//!
//! 1. `LocationList::add` never stores two equal entries.
//! 2. A [`DeviceLocation`] built through [`LocationInput`] has a non-empty
//!    address and coordinates inside the valid ranges.

use std::fmt;
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use simloc_store::{Persisted, Registry, Store, Subscription};

use crate::error::LocationInputError;

/// Store key of the saved location list.
pub const LOCATIONS_KEY: &str = "device-locations";

/// A latitude/longitude pair in degrees.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct Coordinate {
    pub latitude: f64,
    pub longitude: f64,
}

/// A saved, named location.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct DeviceLocation {
    pub address: String,
    pub latitude: f64,
    pub longitude: f64,
}

impl DeviceLocation {
    #[must_use]
    pub fn new(address: impl Into<String>, latitude: f64, longitude: f64) -> Self {
        Self {
            address: address.into(),
            latitude,
            longitude,
        }
    }

    /// Identity of the location.
    #[must_use]
    pub fn id(&self) -> &str {
        &self.address
    }

    #[must_use]
    pub fn coordinate(&self) -> Coordinate {
        Coordinate {
            latitude: self.latitude,
            longitude: self.longitude,
        }
    }
}

impl fmt::Display for DeviceLocation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{}  latitude: {}  longitude: {}",
            self.address, self.latitude, self.longitude
        )
    }
}

/// Whether `latitude` lies in [-90, 90]. NaN is rejected.
#[must_use]
pub fn is_valid_latitude(latitude: f64) -> bool {
    (-90.0..=90.0).contains(&latitude)
}

/// Whether `longitude` lies in [-180, 180]. NaN is rejected.
#[must_use]
pub fn is_valid_longitude(longitude: f64) -> bool {
    (-180.0..=180.0).contains(&longitude)
}

/// Text fields of the "add location" form.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct LocationInput {
    pub address: String,
    pub latitude: String,
    pub longitude: String,
}

impl LocationInput {
    /// Validate raw form text into a location.
    ///
    /// The address is trimmed and must be non-empty. Coordinates must parse
    /// as decimal degrees within range.
    ///
    /// # Errors
    ///
    /// The first [`LocationInputError`] found, checking the address, then
    /// latitude, then longitude.
    pub fn parse(
        address: &str,
        latitude: &str,
        longitude: &str,
    ) -> Result<DeviceLocation, LocationInputError> {
        let address = address.trim();
        if address.is_empty() {
            return Err(LocationInputError::EmptyAddress);
        }
        let lat: f64 = latitude
            .trim()
            .parse()
            .map_err(|_| LocationInputError::LatitudeNotANumber(latitude.to_owned()))?;
        if !is_valid_latitude(lat) {
            return Err(LocationInputError::LatitudeOutOfRange(lat));
        }
        let long: f64 = longitude
            .trim()
            .parse()
            .map_err(|_| LocationInputError::LongitudeNotANumber(longitude.to_owned()))?;
        if !is_valid_longitude(long) {
            return Err(LocationInputError::LongitudeOutOfRange(long));
        }
        Ok(DeviceLocation::new(address, lat, long))
    }

    /// Validate the current fields. On success the form is cleared.
    ///
    /// # Errors
    ///
    /// As for [`parse`](Self::parse); the fields are left as typed.
    pub fn submit(&mut self) -> Result<DeviceLocation, LocationInputError> {
        let location = Self::parse(&self.address, &self.latitude, &self.longitude)?;
        *self = Self::default();
        Ok(location)
    }
}

/// The saved location list, synchronized with the store.
#[derive(Clone, Debug)]
pub struct LocationList {
    locations: Persisted<Vec<DeviceLocation>>,
}

impl LocationList {
    /// Attach to the list stored under [`LOCATIONS_KEY`].
    #[must_use]
    pub fn new(registry: &Registry, store: &Arc<dyn Store>) -> Self {
        Self::with_key(registry, store, LOCATIONS_KEY)
    }

    /// Attach to a list stored under `key`.
    #[must_use]
    pub fn with_key(registry: &Registry, store: &Arc<dyn Store>, key: &str) -> Self {
        Self {
            locations: Persisted::new(registry, store, key, Vec::new()),
        }
    }

    /// Snapshot of all locations, in insertion order.
    #[must_use]
    pub fn all(&self) -> Vec<DeviceLocation> {
        self.locations.get()
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.locations.with(Vec::len)
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Append `location` unless an equal entry exists. Returns whether it
    /// was added.
    pub fn add(&self, location: DeviceLocation) -> bool {
        if self.locations.with(|all| all.contains(&location)) {
            tracing::debug!(address = %location.address, "location already saved");
            return false;
        }
        tracing::info!(address = %location.address, "saving location");
        self.locations.update(|all| all.push(location));
        true
    }

    /// Remove every entry with `address`. Returns the first one removed.
    pub fn remove(&self, address: &str) -> Option<DeviceLocation> {
        let found = self.find(address)?;
        self.locations.update(|all| all.retain(|l| l.address != address));
        tracing::info!(address, "removed location");
        Some(found)
    }

    /// The first entry with `address`.
    #[must_use]
    pub fn find(&self, address: &str) -> Option<DeviceLocation> {
        self.locations
            .with(|all| all.iter().find(|l| l.address == address).cloned())
    }

    /// Replace the list with an empty one.
    pub fn clear(&self) {
        self.locations.set(Vec::new());
    }

    /// Subscribe to list changes.
    pub fn subscribe(&self, callback: impl Fn(&Vec<DeviceLocation>) + 'static) -> Subscription {
        self.locations.subscribe(callback)
    }

    /// The underlying persisted handle.
    #[must_use]
    pub fn persisted(&self) -> &Persisted<Vec<DeviceLocation>> {
        &self.locations
    }
}
