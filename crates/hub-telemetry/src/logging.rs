//! Structured logging setup.
//!
//! Installs a `tracing-subscriber` registry whose `EnvFilter` sits behind a
//! reload layer, so the filter can be changed at runtime (the boundary
//! `LogLevel` call does this).

use lazy_static::lazy_static;
use parking_lot::Mutex;
use tracing_subscriber::{layer::SubscriberExt, reload, util::SubscriberInitExt, EnvFilter, Registry};

use crate::{LogFormat, TelemetryConfig, TelemetryError};

lazy_static! {
    static ref LOG_HANDLE: Mutex<Option<LogHandle>> = Mutex::new(None);
}

/// Handle to the installed subscriber's filter.
#[derive(Clone)]
pub struct LogHandle {
    filter: reload::Handle<EnvFilter, Registry>,
}

impl LogHandle {
    /// Replace the active filter directives.
    pub fn set_level(&self, directives: &str) -> Result<(), TelemetryError> {
        let filter = EnvFilter::try_new(directives)
            .map_err(|e| TelemetryError::Config(format!("invalid log filter {directives:?}: {e}")))?;
        self.filter
            .reload(filter)
            .map_err(|e| TelemetryError::LoggerInit(e.to_string()))
    }
}

/// Initialize logging.
///
/// Calling this more than once returns the handle of the first
/// initialization.
///
/// # Errors
///
/// Returns `TelemetryError::Config` for unparsable filter directives and
/// `TelemetryError::LoggerInit` when another global subscriber is already
/// installed.
pub fn init_logging(config: &TelemetryConfig) -> Result<LogHandle, TelemetryError> {
    let mut slot = LOG_HANDLE.lock();
    if let Some(handle) = slot.as_ref() {
        return Ok(handle.clone());
    }

    let env_filter = EnvFilter::try_new(&config.log_level)
        .map_err(|e| TelemetryError::Config(format!("invalid log filter: {e}")))?;
    let (filter_layer, filter_handle) = reload::Layer::new(env_filter);

    let json_layer = (config.format == LogFormat::Json).then(|| {
        tracing_subscriber::fmt::layer()
            .json()
            .with_target(true)
            .with_thread_ids(true)
            .with_file(true)
            .with_line_number(true)
    });

    let pretty_layer = (config.format == LogFormat::Pretty).then(|| {
        tracing_subscriber::fmt::layer()
            .with_target(true)
            .with_thread_ids(false)
            .with_ansi(true)
    });

    tracing_subscriber::registry()
        .with(filter_layer)
        .with(json_layer)
        .with(pretty_layer)
        .try_init()
        .map_err(|e| TelemetryError::LoggerInit(e.to_string()))?;

    tracing::debug!(
        service = %config.service_name,
        format = ?config.format,
        "Logging initialized"
    );

    let handle = LogHandle {
        filter: filter_handle,
    };
    *slot = Some(handle.clone());
    Ok(handle)
}

/// Change the log filter of the installed subscriber.
///
/// # Errors
///
/// Returns `TelemetryError::NotInitialized` if [`init_logging`] has not run.
pub fn set_log_level(directives: &str) -> Result<(), TelemetryError> {
    let handle = LOG_HANDLE
        .lock()
        .clone()
        .ok_or(TelemetryError::NotInitialized)?;
    handle.set_level(directives)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_set_level_rejects_garbage_filter() {
        // Whether or not another test installed a subscriber first, the
        // second call must hand back a usable handle or a clean error.
        let config = TelemetryConfig::default().with_log_level("warn");
        if let Ok(handle) = init_logging(&config) {
            assert!(handle.set_level("peer_hub=loud").is_err());
            assert!(handle.set_level("debug").is_ok());
            assert!(init_logging(&config).is_ok());
        }
    }
}
