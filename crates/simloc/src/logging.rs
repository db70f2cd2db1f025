#![forbid(unsafe_code)]

//! `tracing` subscriber setup for the binary.
//!
//! Logs go to stderr so that `list` output on stdout stays clean. The filter
//! comes from `SIMLOC_LOG` when set, else from the configured directive.

use tracing_subscriber::EnvFilter;

use crate::error::AppError;

/// Environment variable holding a filter directive.
pub const LOG_ENV: &str = "SIMLOC_LOG";

/// Output format for log lines.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum LogFormat {
    #[default]
    Text,
    Json,
}

/// Pick the directive: a non-blank environment value wins over `configured`.
#[must_use]
pub fn filter_directive(from_env: Option<String>, configured: &str) -> String {
    from_env
        .filter(|d| !d.trim().is_empty())
        .unwrap_or_else(|| configured.to_owned())
}

/// Install the global subscriber.
///
/// # Errors
///
/// [`AppError::Logging`] if the directive does not parse or a subscriber
/// is already installed.
pub fn init(configured: &str, format: LogFormat) -> Result<(), AppError> {
    let directive = filter_directive(std::env::var(LOG_ENV).ok(), configured);
    let filter = EnvFilter::try_new(&directive)
        .map_err(|e| AppError::Logging(format!("bad filter `{directive}`: {e}")))?;
    let builder = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr);
    let installed = match format {
        LogFormat::Text => builder.try_init(),
        LogFormat::Json => builder.json().try_init(),
    };
    installed.map_err(|e| AppError::Logging(e.to_string()))
}
