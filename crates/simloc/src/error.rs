#![forbid(unsafe_code)]

//! Error types for the location app.

use std::path::PathBuf;

use simloc_store::StoreError;

/// Rejected location form input.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum LocationInputError {
    #[error("address must not be empty")]
    EmptyAddress,
    #[error("latitude `{0}` is not a number")]
    LatitudeNotANumber(String),
    #[error("longitude `{0}` is not a number")]
    LongitudeNotANumber(String),
    #[error("latitude {0} is outside [-90, 90]")]
    LatitudeOutOfRange(f64),
    #[error("longitude {0} is outside [-180, 180]")]
    LongitudeOutOfRange(f64),
}

/// Failures reported by or about devices.
#[derive(Debug, thiserror::Error)]
pub enum DeviceError {
    #[error("no device selected")]
    NoSelection,
    #[error("device `{udid}` is no longer available")]
    Unavailable { udid: String },
    #[error("device `{udid}` rejected the location: {reason}")]
    Rejected { udid: String, reason: String },
}

/// Configuration loading failures.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("cannot read config {path}: {source}")]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("invalid config {path}: {source}")]
    Parse {
        path: PathBuf,
        #[source]
        source: toml::de::Error,
    },
    #[error("no store path configured and no platform config directory found")]
    NoStorePath,
}

/// Top-level error for the `simloc` binary.
#[derive(Debug, thiserror::Error)]
pub enum AppError {
    #[error(transparent)]
    Config(#[from] ConfigError),
    #[error(transparent)]
    Store(#[from] StoreError),
    #[error(transparent)]
    Input(#[from] LocationInputError),
    #[error(transparent)]
    Device(#[from] DeviceError),
    #[error("no saved location named `{0}`")]
    UnknownLocation(String),
    #[error("cannot install log subscriber: {0}")]
    Logging(String),
}
