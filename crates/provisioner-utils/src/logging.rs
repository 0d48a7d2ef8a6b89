/*
 * Copyright (c) 2025 Dylan Storey
 * Licensed under the Elastic License 2.0.
 * See LICENSE file in the project root for full license text.
 */

//! # Provisioner Logging Module
//!
//! Installs the process-wide `tracing` subscriber used by every provisioner component.
//!
//! ## Features
//! - Text or JSON output
//! - `RUST_LOG` takes precedence over the configured level when it is set
//! - Log level adjustable at runtime through a reload handle
//!
//! ## Usage
//!
//! ```rust,ignore
//! use provisioner_utils::logging;
//!
//! logging::init_with_format("info", "json")?;
//! tracing::info!(cluster_id = %id, "cluster resized");
//!
//! logging::update_log_level("debug")?;
//! ```
//!
//! ## Log Levels
//!
//! "off", "error", "warn", "info" (default), "debug", "trace". Anything else is
//! treated as "info".

use once_cell::sync::OnceCell;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::{fmt, reload, EnvFilter, Registry};

static RELOAD_HANDLE: OnceCell<reload::Handle<EnvFilter, Registry>> = OnceCell::new();

/// Error type for logging initialization
#[derive(Debug)]
pub enum LoggingError {
    /// Failed to set the global subscriber
    SubscriberError(String),
    /// Failed to swap the active filter
    ReloadError(String),
    /// `update_log_level` was called before `init`
    NotInitialized,
}

impl std::fmt::Display for LoggingError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            LoggingError::SubscriberError(e) => write!(f, "Subscriber error: {}", e),
            LoggingError::ReloadError(e) => write!(f, "Log level reload error: {}", e),
            LoggingError::NotInitialized => write!(f, "Logging has not been initialized"),
        }
    }
}

impl std::error::Error for LoggingError {}

/// Initializes logging with the specified level and text output.
pub fn init(level: &str) -> Result<(), LoggingError> {
    init_with_format(level, "text")
}

/// Initializes logging with the specified level and format.
///
/// The first call installs the global subscriber. Later calls only change
/// the level; the output format is fixed for the lifetime of the process.
///
/// # Arguments
/// * `level` - "off", "error", "warn", "info", "debug" or "trace"
/// * `format` - "text" for human-readable output, "json" for structured JSON
pub fn init_with_format(level: &str, format: &str) -> Result<(), LoggingError> {
    let mut installed_now = false;
    RELOAD_HANDLE.get_or_try_init(|| {
        installed_now = true;
        install(level, format)
    })?;

    if !installed_now {
        update_log_level(level)?;
    }
    Ok(())
}

fn install(level: &str, format: &str) -> Result<reload::Handle<EnvFilter, Registry>, LoggingError> {
    let env_filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(normalize_level(level)));
    let (filter_layer, handle) = reload::Layer::new(env_filter);
    let subscriber = tracing_subscriber::registry().with(filter_layer);

    if format.eq_ignore_ascii_case("json") {
        subscriber
            .with(fmt::layer().json())
            .try_init()
            .map_err(|e| LoggingError::SubscriberError(e.to_string()))?;
    } else {
        subscriber
            .with(fmt::layer())
            .try_init()
            .map_err(|e| LoggingError::SubscriberError(e.to_string()))?;
    }

    Ok(handle)
}

/// Updates the current log level.
pub fn update_log_level(level: &str) -> Result<(), LoggingError> {
    let handle = RELOAD_HANDLE.get().ok_or(LoggingError::NotInitialized)?;
    handle
        .reload(EnvFilter::new(normalize_level(level)))
        .map_err(|e| LoggingError::ReloadError(e.to_string()))
}

/// Returns the active filter directive, if logging has been initialized.
pub fn current_level() -> Option<String> {
    RELOAD_HANDLE
        .get()
        .and_then(|handle| handle.with_current(|filter| filter.to_string()).ok())
}

fn normalize_level(level: &str) -> &'static str {
    match level.to_lowercase().as_str() {
        "off" => "off",
        "error" => "error",
        "warn" => "warn",
        "info" => "info",
        "debug" => "debug",
        "trace" => "trace",
        _ => "info",
    }
}

/// Re-export tracing macros for convenience
pub mod prelude {
    pub use tracing::{debug, error, info, trace, warn};
    pub use tracing::{instrument, span, Level};
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_normalize_level() {
        assert_eq!(normalize_level("DEBUG"), "debug");
        assert_eq!(normalize_level("warn"), "warn");
        assert_eq!(normalize_level("off"), "off");
        assert_eq!(normalize_level("invalid_level"), "info");
        assert_eq!(normalize_level(""), "info");
    }

    #[test]
    /// Initializing twice is harmless and the second call only moves the level.
    /// Level changes are checked in one test because the subscriber is global.
    fn test_init_and_update_log_level() {
        std::env::remove_var("RUST_LOG");
        assert!(init("info").is_ok());
        assert!(init_with_format("warn", "json").is_ok());
        assert_eq!(current_level().as_deref(), Some("warn"));

        assert!(update_log_level("debug").is_ok());
        assert_eq!(current_level().as_deref(), Some("debug"));

        assert!(update_log_level("another_invalid_level").is_ok());
        assert_eq!(current_level().as_deref(), Some("info"));

        prelude::debug!("debug message");
        prelude::info!(cluster_id = "abc", "info message");
    }
}
