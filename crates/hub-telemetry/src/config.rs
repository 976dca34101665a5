//! Logging settings, read from the process environment.

use std::env;

/// How log lines are written.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LogFormat {
    /// Human-readable, coloured.
    Pretty,
    /// Structured JSON.
    Json,
    /// Filter installed, nothing written.
    Silent,
}

/// Logging settings for one process.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TelemetryConfig {
    /// Tag on the start-up line.
    pub service_name: String,
    /// `EnvFilter` directives, e.g. `info` or `peer_hub=trace,quinn=warn`.
    pub log_level: String,
    /// Output format.
    pub format: LogFormat,
}

impl Default for TelemetryConfig {
    fn default() -> Self {
        Self {
            service_name: "peer-hub".into(),
            log_level: "info".into(),
            format: LogFormat::Pretty,
        }
    }
}

fn flag(name: &str) -> Option<bool> {
    let value = env::var(name).ok()?;
    match value.trim().to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Some(true),
        "0" | "false" | "no" | "off" => Some(false),
        _ => None,
    }
}

impl TelemetryConfig {
    /// Read the environment, falling back to the defaults.
    ///
    /// | Variable | Default | Meaning |
    /// |----------|---------|---------|
    /// | `HUB_LOG_LEVEL`, then `RUST_LOG` | `info` | filter directives |
    /// | `HUB_JSON_LOGS` | off | one JSON object per line |
    /// | `HUB_CONSOLE_OUTPUT` | on | `0`/`false` silences output |
    /// | `HUB_SERVICE_NAME` | `peer-hub` | tag on the start-up line |
    pub fn from_env() -> Self {
        let defaults = Self::default();
        let log_level = env::var("HUB_LOG_LEVEL")
            .or_else(|_| env::var("RUST_LOG"))
            .unwrap_or(defaults.log_level);
        let format = match (flag("HUB_CONSOLE_OUTPUT"), flag("HUB_JSON_LOGS")) {
            (Some(false), _) => LogFormat::Silent,
            (_, Some(true)) => LogFormat::Json,
            _ => LogFormat::Pretty,
        };
        Self {
            service_name: env::var("HUB_SERVICE_NAME").unwrap_or(defaults.service_name),
            log_level,
            format,
        }
    }

    /// Replace the filter directives.
    pub fn with_log_level(mut self, log_level: impl Into<String>) -> Self {
        self.log_level = log_level.into();
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = TelemetryConfig::default();
        assert_eq!(config.service_name, "peer-hub");
        assert_eq!(config.log_level, "info");
        assert_eq!(config.format, LogFormat::Pretty);
    }

    #[test]
    fn test_log_level_override() {
        let config = TelemetryConfig::default().with_log_level("peer_hub=trace");
        assert_eq!(config.log_level, "peer_hub=trace");
    }
}
