#![forbid(unsafe_code)]

//! Application configuration.
//!
//! TOML file, all fields optional:
//!
//! ```toml
//! store_path = "/home/me/.config/simloc/preferences.json"
//! locations_key = "device-locations"
//! poll_interval_ms = 500
//! log_filter = "info,simloc_store=debug"
//! ```
//!
//! Lookup order: an explicit `--config` path, then
//! `<config_dir>/simloc/config.toml` if it exists, then built-in defaults.

use std::fs;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::ConfigError;
use crate::location::LOCATIONS_KEY;

const APP_DIR: &str = "simloc";
const CONFIG_FILE: &str = "config.toml";
const STORE_FILE: &str = "preferences.json";

/// Settings for the `simloc` binary.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct AppConfig {
    /// Preferences file. Defaults to `<config_dir>/simloc/preferences.json`.
    #[serde(default)]
    pub store_path: Option<PathBuf>,

    /// Store key holding the saved locations.
    #[serde(default = "default_locations_key")]
    pub locations_key: String,

    /// How often `watch` re-reads the store file.
    #[serde(default = "default_poll_interval_ms")]
    pub poll_interval_ms: u64,

    /// `tracing` filter used when `SIMLOC_LOG` is unset.
    #[serde(default = "default_log_filter")]
    pub log_filter: String,
}

fn default_locations_key() -> String {
    LOCATIONS_KEY.to_owned()
}

fn default_poll_interval_ms() -> u64 {
    500
}

fn default_log_filter() -> String {
    "info".to_owned()
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            store_path: None,
            locations_key: default_locations_key(),
            poll_interval_ms: default_poll_interval_ms(),
            log_filter: default_log_filter(),
        }
    }
}

impl AppConfig {
    /// Load and parse the file at `path`.
    ///
    /// # Errors
    ///
    /// [`ConfigError::Read`] or [`ConfigError::Parse`].
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let text = fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.to_owned(),
            source,
        })?;
        Self::parse(&text, path)
    }

    /// Parse TOML `text`; `origin` is used in error messages.
    ///
    /// # Errors
    ///
    /// [`ConfigError::Parse`] for invalid TOML or unknown fields.
    pub fn parse(text: &str, origin: &Path) -> Result<Self, ConfigError> {
        toml::from_str(text).map_err(|source| ConfigError::Parse {
            path: origin.to_owned(),
            source,
        })
    }

    /// Resolve configuration from an optional explicit path.
    ///
    /// An explicit path must exist. Without one, the platform default file
    /// is used when present and defaults otherwise.
    ///
    /// # Errors
    ///
    /// As for [`load`](Self::load).
    pub fn discover(explicit: Option<&Path>) -> Result<Self, ConfigError> {
        if let Some(path) = explicit {
            return Self::load(path);
        }
        let Some(path) = default_config_path() else {
            return Ok(Self::default());
        };
        match Self::load(&path) {
            Err(ConfigError::Read { source, .. }) if source.kind() == ErrorKind::NotFound => {
                Ok(Self::default())
            }
            other => other,
        }
    }

    /// The store file to open.
    ///
    /// # Errors
    ///
    /// [`ConfigError::NoStorePath`] if none is configured and the platform
    /// has no config directory.
    pub fn resolve_store_path(&self) -> Result<PathBuf, ConfigError> {
        if let Some(path) = &self.store_path {
            return Ok(path.clone());
        }
        dirs::config_dir()
            .map(|dir| dir.join(APP_DIR).join(STORE_FILE))
            .ok_or(ConfigError::NoStorePath)
    }

    #[must_use]
    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms)
    }
}

/// `<config_dir>/simloc/config.toml`, if the platform has a config dir.
#[must_use]
pub fn default_config_path() -> Option<PathBuf> {
    dirs::config_dir().map(|dir| dir.join(APP_DIR).join(CONFIG_FILE))
}
