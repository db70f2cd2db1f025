#![forbid(unsafe_code)]

//! Devices that can receive a simulated location.
//!
//! Discovery and the location command itself belong to whatever backend
//! implements [`Device`]. This module keeps the list of known devices and
//! the current selection up to date from a stream of [`DeviceEvent`]s.
//!
//! # Threading
//!
//! Backends report events from their own threads through a
//! [`DeviceEventSender`]. The [`DeviceRoster`] lives on the UI thread and
//! applies them in [`drain`](DeviceRoster::drain), once per loop iteration.
//!
//! # Event handling
//!
//! | Event | Effect |
//! |-------|--------|
//! | `Connected`, `Paired` | Appended unless a device with that udid is listed |
//! | `Disconnected` | Removed by udid; clears the selection if it was selected |
//! | `Changed` | Replaced in place; refreshes the selection if selected |

use std::fmt;
use std::sync::Arc;
use std::sync::mpsc::{self, Receiver, Sender};

use crate::error::DeviceError;
use crate::location::{Coordinate, DeviceLocation};

/// A simulator or attached device.
pub trait Device: Send + Sync {
    /// Stable identifier.
    fn udid(&self) -> &str;

    /// Human-readable name.
    fn name(&self) -> &str;

    /// OS major version, if known.
    fn major_version(&self) -> Option<u32>;

    /// OS minor version.
    fn minor_version(&self) -> u32;

    /// Make the device report `coordinate` as its location.
    ///
    /// # Errors
    ///
    /// Whatever the backend reports, as a [`DeviceError`].
    fn simulate_location(&self, coordinate: Coordinate) -> Result<(), DeviceError>;

    /// Label shown in device lists: `"{name} {major}.{minor}"`, with an
    /// unknown major version shown as 0.
    fn display_text(&self) -> String {
        format!(
            "{} {}.{}",
            self.name(),
            self.major_version().unwrap_or(0),
            self.minor_version()
        )
    }
}

/// A change reported by a device backend.
#[derive(Clone)]
pub enum DeviceEvent {
    Connected(Arc<dyn Device>),
    Paired(Arc<dyn Device>),
    Disconnected(Arc<dyn Device>),
    Changed(Arc<dyn Device>),
}

impl DeviceEvent {
    /// The device the event is about.
    #[must_use]
    pub fn device(&self) -> &Arc<dyn Device> {
        match self {
            Self::Connected(d) | Self::Paired(d) | Self::Disconnected(d) | Self::Changed(d) => d,
        }
    }

    fn label(&self) -> &'static str {
        match self {
            Self::Connected(_) => "connected",
            Self::Paired(_) => "paired",
            Self::Disconnected(_) => "disconnected",
            Self::Changed(_) => "changed",
        }
    }
}

impl fmt::Debug for DeviceEvent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DeviceEvent")
            .field("kind", &self.label())
            .field("udid", &self.device().udid())
            .finish()
    }
}

/// Cloneable handle for posting events to a [`DeviceRoster`] from any thread.
pub type DeviceEventSender = Sender<DeviceEvent>;

/// Known devices plus the current selection.
pub struct DeviceRoster {
    devices: Vec<Arc<dyn Device>>,
    selected: Option<Arc<dyn Device>>,
    events: Receiver<DeviceEvent>,
    sender: Sender<DeviceEvent>,
}

impl DeviceRoster {
    /// Create a roster seeded with the devices available at startup.
    ///
    /// Duplicate udids in `initial` keep their first occurrence.
    #[must_use]
    pub fn new(initial: impl IntoIterator<Item = Arc<dyn Device>>) -> Self {
        let (sender, events) = mpsc::channel();
        let mut roster = Self {
            devices: Vec::new(),
            selected: None,
            events,
            sender,
        };
        for device in initial {
            roster.insert(device);
        }
        roster
    }

    /// A sender backends use to report events.
    #[must_use]
    pub fn sender(&self) -> DeviceEventSender {
        self.sender.clone()
    }

    /// Known devices in discovery order.
    #[must_use]
    pub fn devices(&self) -> &[Arc<dyn Device>] {
        &self.devices
    }

    /// The device with `udid`, if listed.
    #[must_use]
    pub fn get(&self, udid: &str) -> Option<&Arc<dyn Device>> {
        self.devices.iter().find(|d| d.udid() == udid)
    }

    /// The selected device.
    #[must_use]
    pub fn selected(&self) -> Option<&Arc<dyn Device>> {
        self.selected.as_ref()
    }

    /// Header text for the selection.
    #[must_use]
    pub fn selection_text(&self) -> String {
        match &self.selected {
            Some(device) => format!("Selected Device: {}", device.display_text()),
            None => "Selected Device: No device selected".to_owned(),
        }
    }

    /// Select the listed device with `udid`.
    ///
    /// # Errors
    ///
    /// [`DeviceError::Unavailable`] if no such device is listed; the
    /// selection is unchanged.
    pub fn select(&mut self, udid: &str) -> Result<(), DeviceError> {
        let device = self
            .get(udid)
            .cloned()
            .ok_or_else(|| DeviceError::Unavailable {
                udid: udid.to_owned(),
            })?;
        tracing::info!(udid, name = device.name(), "device selected");
        self.selected = Some(device);
        Ok(())
    }

    /// Clear the selection.
    pub fn deselect(&mut self) {
        self.selected = None;
    }

    /// Apply one event.
    pub fn apply(&mut self, event: DeviceEvent) {
        tracing::debug!(?event, "device event");
        match event {
            DeviceEvent::Connected(device) | DeviceEvent::Paired(device) => {
                self.insert(device);
            }
            DeviceEvent::Disconnected(device) => {
                let udid = device.udid();
                self.devices.retain(|d| d.udid() != udid);
                if self.selected.as_ref().is_some_and(|s| s.udid() == udid) {
                    tracing::info!(udid, "selected device disconnected");
                    self.selected = None;
                }
            }
            DeviceEvent::Changed(device) => {
                let udid = device.udid();
                let Some(slot) = self.devices.iter_mut().find(|d| d.udid() == udid) else {
                    return;
                };
                *slot = Arc::clone(&device);
                if self.selected.as_ref().is_some_and(|s| s.udid() == udid) {
                    self.selected = Some(device);
                }
            }
        }
    }

    /// Apply every event queued since the last drain. Returns how many were
    /// applied.
    pub fn drain(&mut self) -> usize {
        let mut applied = 0;
        while let Ok(event) = self.events.try_recv() {
            self.apply(event);
            applied += 1;
        }
        applied
    }

    /// Send `location` to the selected device.
    ///
    /// # Errors
    ///
    /// [`DeviceError::NoSelection`] when nothing is selected, otherwise
    /// whatever the device reports.
    pub fn simulate(&self, location: &DeviceLocation) -> Result<(), DeviceError> {
        let device = self.selected.as_ref().ok_or(DeviceError::NoSelection)?;
        tracing::info!(
            udid = device.udid(),
            address = %location.address,
            latitude = location.latitude,
            longitude = location.longitude,
            "simulating location"
        );
        device.simulate_location(location.coordinate())
    }

    fn insert(&mut self, device: Arc<dyn Device>) {
        if self.get(device.udid()).is_some() {
            return;
        }
        self.devices.push(device);
    }
}

impl fmt::Debug for DeviceRoster {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let udids: Vec<&str> = self.devices.iter().map(|d| d.udid()).collect();
        f.debug_struct("DeviceRoster")
            .field("devices", &udids)
            .field("selected", &self.selected.as_ref().map(|d| d.udid()))
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;
    use std::thread;

    struct FakeDevice {
        udid: String,
        name: String,
        major: Option<u32>,
        minor: u32,
        sent: Mutex<Vec<Coordinate>>,
    }

    fn fake(udid: &str, name: &str) -> Arc<FakeDevice> {
        Arc::new(FakeDevice {
            udid: udid.into(),
            name: name.into(),
            major: Some(17),
            minor: 2,
            sent: Mutex::new(Vec::new()),
        })
    }

    fn listed(udid: &str, name: &str) -> Arc<dyn Device> {
        fake(udid, name)
    }

    impl Device for FakeDevice {
        fn udid(&self) -> &str {
            &self.udid
        }
        fn name(&self) -> &str {
            &self.name
        }
        fn major_version(&self) -> Option<u32> {
            self.major
        }
        fn minor_version(&self) -> u32 {
            self.minor
        }
        fn simulate_location(&self, coordinate: Coordinate) -> Result<(), DeviceError> {
            self.sent.lock().unwrap().push(coordinate);
            Ok(())
        }
    }

    #[test]
    fn display_text_defaults_missing_major() {
        let device = FakeDevice {
            udid: "u".into(),
            name: "iPhone 15".into(),
            major: None,
            minor: 4,
            sent: Mutex::new(Vec::new()),
        };
        assert_eq!(device.display_text(), "iPhone 15 0.4");
        assert_eq!(fake("u", "iPad").display_text(), "iPad 17.2");
    }

    #[test]
    fn initial_devices_deduplicated() {
        let roster = DeviceRoster::new([listed("a", "One"), listed("a", "Dup"), listed("b", "Two")]);
        assert_eq!(roster.devices().len(), 2);
        assert_eq!(roster.get("a").map(|d| d.name().to_owned()), Some("One".into()));
    }

    #[test]
    fn connect_and_pair_add_once() {
        let mut roster = DeviceRoster::new([]);
        roster.apply(DeviceEvent::Connected(fake("a", "One")));
        roster.apply(DeviceEvent::Paired(fake("a", "One")));
        roster.apply(DeviceEvent::Paired(fake("b", "Two")));
        assert_eq!(roster.devices().len(), 2);
    }

    #[test]
    fn disconnect_clears_selection() {
        let mut roster = DeviceRoster::new([listed("a", "One")]);
        roster.select("a").unwrap();
        roster.apply(DeviceEvent::Disconnected(fake("a", "One")));
        assert!(roster.devices().is_empty());
        assert!(roster.selected().is_none());
        assert_eq!(roster.selection_text(), "Selected Device: No device selected");
    }

    #[test]
    fn change_refreshes_selection() {
        let mut roster = DeviceRoster::new([listed("a", "Old")]);
        roster.select("a").unwrap();
        roster.apply(DeviceEvent::Changed(fake("a", "New")));
        assert_eq!(roster.devices()[0].name(), "New");
        assert_eq!(roster.selected().map(|d| d.name().to_owned()), Some("New".into()));
        assert_eq!(roster.selection_text(), "Selected Device: New 17.2");
    }

    #[test]
    fn change_for_unknown_device_is_ignored() {
        let mut roster = DeviceRoster::new([]);
        roster.apply(DeviceEvent::Changed(fake("x", "Ghost")));
        assert!(roster.devices().is_empty());
    }

    #[test]
    fn select_unknown_device_fails() {
        let mut roster = DeviceRoster::new([]);
        assert!(matches!(
            roster.select("nope"),
            Err(DeviceError::Unavailable { udid }) if udid == "nope"
        ));
    }

    #[test]
    fn simulate_requires_selection() {
        let roster = DeviceRoster::new([listed("a", "One")]);
        let home = DeviceLocation::new("Home", 37.0, -122.0);
        assert!(matches!(roster.simulate(&home), Err(DeviceError::NoSelection)));
    }

    #[test]
    fn simulate_forwards_coordinate() {
        let device = fake("a", "One");
        let mut roster = DeviceRoster::new([Arc::clone(&device) as Arc<dyn Device>]);
        roster.select("a").unwrap();
        roster.simulate(&DeviceLocation::new("Home", 37.0, -122.0)).unwrap();
        assert_eq!(
            *device.sent.lock().unwrap(),
            vec![Coordinate {
                latitude: 37.0,
                longitude: -122.0
            }]
        );
    }

    #[test]
    fn events_from_other_threads_apply_on_drain() {
        let mut roster = DeviceRoster::new([]);
        let tx = roster.sender();
        thread::spawn(move || {
            tx.send(DeviceEvent::Connected(fake("a", "One"))).unwrap();
            tx.send(DeviceEvent::Connected(fake("b", "Two"))).unwrap();
            tx.send(DeviceEvent::Disconnected(fake("a", "One"))).unwrap();
        })
        .join()
        .unwrap();

        assert!(roster.devices().is_empty());
        assert_eq!(roster.drain(), 3);
        let udids: Vec<&str> = roster.devices().iter().map(|d| d.udid()).collect();
        assert_eq!(udids, vec!["b"]);
        assert_eq!(roster.drain(), 0);
    }
}
