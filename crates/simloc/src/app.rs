#![forbid(unsafe_code)]

//! Composition root: one store, one registry, the saved location list and
//! the device roster.
//!
//! Every CLI command runs against an [`App`]. Tests build one over a
//! temporary file. Device backends are handed in through
//! [`App::open_with_devices`] and report later changes through
//! [`App::device_sender`]; the binary runs without one.

use std::cell::RefCell;
use std::rc::Rc;
use std::sync::Arc;
use std::thread;
use std::time::Duration;

use simloc_store::{FileStore, Registry, Store};

use crate::config::AppConfig;
use crate::device::{Device, DeviceEventSender, DeviceRoster};
use crate::error::AppError;
use crate::location::{DeviceLocation, LocationInput, LocationList};

/// Result of an `add` request.
#[derive(Debug, Clone, PartialEq)]
pub enum AddOutcome {
    Added(DeviceLocation),
    AlreadySaved(DeviceLocation),
}

/// The running application.
pub struct App {
    config: AppConfig,
    file: Arc<FileStore>,
    store: Arc<dyn Store>,
    registry: Registry,
    locations: LocationList,
    devices: RefCell<DeviceRoster>,
}

impl App {
    /// Open the configured store and attach the location list.
    ///
    /// # Errors
    ///
    /// [`AppError::Config`] if no store path can be resolved,
    /// [`AppError::Store`] if the store file cannot be read.
    pub fn open(config: AppConfig) -> Result<Self, AppError> {
        Self::open_with_devices(config, [])
    }

    /// Like [`open`](Self::open), with the devices a backend found at
    /// startup.
    ///
    /// # Errors
    ///
    /// As for [`open`](Self::open).
    pub fn open_with_devices(
        config: AppConfig,
        devices: impl IntoIterator<Item = Arc<dyn Device>>,
    ) -> Result<Self, AppError> {
        let path = config.resolve_store_path()?;
        let file = Arc::new(FileStore::open(&path)?);
        let store: Arc<dyn Store> = file.clone();
        let registry = Registry::new();
        let locations = LocationList::with_key(&registry, &store, &config.locations_key);
        tracing::debug!(path = %path.display(), key = %config.locations_key, "app opened");
        Ok(Self {
            config,
            file,
            store,
            registry,
            locations,
            devices: RefCell::new(DeviceRoster::new(devices)),
        })
    }

    #[must_use]
    pub fn config(&self) -> &AppConfig {
        &self.config
    }

    #[must_use]
    pub fn locations(&self) -> &LocationList {
        &self.locations
    }

    #[must_use]
    pub fn registry(&self) -> &Registry {
        &self.registry
    }

    /// Sender for device backends; events apply on the next
    /// [`drain_device_events`](Self::drain_device_events).
    #[must_use]
    pub fn device_sender(&self) -> DeviceEventSender {
        self.devices.borrow().sender()
    }

    /// Known devices in discovery order.
    #[must_use]
    pub fn devices(&self) -> Vec<Arc<dyn Device>> {
        self.devices.borrow().devices().to_vec()
    }

    /// Header text for the current device selection.
    #[must_use]
    pub fn selection_text(&self) -> String {
        self.devices.borrow().selection_text()
    }

    /// Select the device that receives [`simulate`](Self::simulate).
    ///
    /// # Errors
    ///
    /// [`AppError::Device`] if no listed device has `udid`.
    pub fn select_device(&self, udid: &str) -> Result<(), AppError> {
        Ok(self.devices.borrow_mut().select(udid)?)
    }

    /// Apply device events reported since the last call.
    pub fn drain_device_events(&self) -> usize {
        self.devices.borrow_mut().drain()
    }

    /// Send the saved location named `address` to the selected device.
    ///
    /// # Errors
    ///
    /// [`AppError::UnknownLocation`] if nothing is saved under that name,
    /// [`AppError::Device`] if no device is selected or the device refuses.
    pub fn simulate(&self, address: &str) -> Result<DeviceLocation, AppError> {
        let location = self
            .locations
            .find(address)
            .ok_or_else(|| AppError::UnknownLocation(address.to_owned()))?;
        self.devices.borrow().simulate(&location)?;
        Ok(location)
    }

    /// All saved locations.
    #[must_use]
    pub fn list(&self) -> Vec<DeviceLocation> {
        self.locations.all()
    }

    /// Validate the form values and save the location.
    ///
    /// # Errors
    ///
    /// [`AppError::Input`] when validation fails.
    pub fn add(&self, address: &str, latitude: &str, longitude: &str) -> Result<AddOutcome, AppError> {
        let location = LocationInput::parse(address, latitude, longitude)?;
        if self.locations.add(location.clone()) {
            Ok(AddOutcome::Added(location))
        } else {
            Ok(AddOutcome::AlreadySaved(location))
        }
    }

    /// Delete the location named `address`.
    ///
    /// # Errors
    ///
    /// [`AppError::UnknownLocation`] if nothing is saved under that name.
    pub fn remove(&self, address: &str) -> Result<DeviceLocation, AppError> {
        self.locations
            .remove(address)
            .ok_or_else(|| AppError::UnknownLocation(address.to_owned()))
    }

    /// Delete the stored list. Bound values reset to empty on the next pump,
    /// which this call performs.
    ///
    /// # Errors
    ///
    /// [`AppError::Store`] if the file cannot be rewritten.
    pub fn clear(&self) -> Result<(), AppError> {
        self.store.remove(&self.config.locations_key)?;
        self.registry.pump();
        Ok(())
    }

    /// Pick up edits made to the store file by other processes. Returns the
    /// number of notifications applied.
    ///
    /// # Errors
    ///
    /// [`AppError::Store`] if the file cannot be re-read.
    pub fn poll(&self) -> Result<usize, AppError> {
        self.file.reload()?;
        Ok(self.registry.pump())
    }

    /// Poll every `interval` and report each new list to `on_change`.
    ///
    /// Stops after `limit` changes, or never when `limit` is `None`.
    /// Returns the number of changes reported.
    ///
    /// # Errors
    ///
    /// The first polling error.
    pub fn watch(
        &self,
        interval: Duration,
        limit: Option<usize>,
        mut on_change: impl FnMut(&[DeviceLocation]),
    ) -> Result<usize, AppError> {
        let pending: Rc<RefCell<Vec<Vec<DeviceLocation>>>> = Rc::default();
        let sink = Rc::clone(&pending);
        let _sub = self
            .locations
            .subscribe(move |list| sink.borrow_mut().push(list.clone()));

        let mut reported = 0;
        loop {
            if limit.is_some_and(|max| reported >= max) {
                return Ok(reported);
            }
            thread::sleep(interval);
            let events = self.drain_device_events();
            if events > 0 {
                tracing::debug!(events, "applied device events");
            }
            self.poll()?;
            let changes = std::mem::take(&mut *pending.borrow_mut());
            for list in changes {
                tracing::info!(count = list.len(), "location list changed");
                on_change(&list);
                reported += 1;
                if limit.is_some_and(|max| reported >= max) {
                    return Ok(reported);
                }
            }
        }
    }
}

impl std::fmt::Debug for App {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("App")
            .field("store", &self.file)
            .field("locations_key", &self.config.locations_key)
            .field("devices", &self.devices)
            .finish()
    }
}
