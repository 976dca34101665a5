//! # Hub Telemetry
//!
//! Logging and metrics for the validator communication hub.
//!
//! ## Components
//!
//! - **Logging**: `tracing-subscriber` with a reloadable `EnvFilter`
//!   (pretty or JSON output)
//! - **Metrics**: Prometheus counters and gauges in a process-wide registry
//!
//! ## Usage
//!
//! ```rust,ignore
//! use hub_telemetry::{init_telemetry, TelemetryConfig};
//!
//! let _guard = init_telemetry(TelemetryConfig::from_env())?;
//! hub_telemetry::set_log_level("peer_hub=debug")?;
//! ```
//!
//! Environment variables are listed on [`TelemetryConfig::from_env`].

#![warn(missing_docs)]

mod config;
mod logging;
pub mod metrics;

pub use config::{LogFormat, TelemetryConfig};
pub use logging::{init_logging, set_log_level, LogHandle};
pub use metrics::{encode_metrics, register_metrics};

use thiserror::Error;

/// Logging or metrics set-up failure.
#[derive(Error, Debug)]
pub enum TelemetryError {
    /// Another global subscriber is installed, or the filter reload failed.
    #[error("logger: {0}")]
    LoggerInit(String),

    /// Prometheus registration or encoding failed.
    #[error("metrics: {0}")]
    MetricsInit(String),

    /// [`init_logging`] has not run.
    #[error("logging not initialised")]
    NotInitialized,

    /// Unparsable filter directives.
    #[error("bad telemetry setting: {0}")]
    Config(String),
}

/// Initialize logging and register metrics.
///
/// The returned guard carries the log handle; dropping it does not uninstall
/// the subscriber.
pub fn init_telemetry(config: TelemetryConfig) -> Result<TelemetryGuard, TelemetryError> {
    register_metrics()?;
    let log_handle = init_logging(&config)?;
    Ok(TelemetryGuard { log_handle })
}

/// Keeps the logging handle reachable for the lifetime of the application.
pub struct TelemetryGuard {
    log_handle: LogHandle,
}

impl TelemetryGuard {
    /// Handle to the installed log filter.
    pub fn log_handle(&self) -> &LogHandle {
        &self.log_handle
    }
}
