//! Participant configuration file.

use std::fs;
use std::path::Path;

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};

/// `{ "PrivateKey", "Idx", "Port", "Bootstraps" }`
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct TestHubConfig {
    /// Hex transport secret; also used as the account secret.
    pub private_key: String,
    /// This participant's index into the bootstrap list.
    pub idx: u32,
    /// Listening port, informational; the bootstrap entry decides.
    #[serde(default)]
    pub port: u32,
    /// Comma-separated `fingerprint@host:port` entries, one per participant.
    pub bootstraps: String,
}

impl TestHubConfig {
    /// Read and parse a JSON config file.
    pub fn load(path: &Path) -> Result<Self> {
        let data = fs::read_to_string(path)
            .with_context(|| format!("failed to read config {}", path.display()))?;
        let config: Self = serde_json::from_str(&data)
            .with_context(|| format!("failed to parse config {}", path.display()))?;
        anyhow::ensure!(
            config.idx < config.participants(),
            "Idx {} out of range for {} participants",
            config.idx,
            config.participants()
        );
        Ok(config)
    }

    /// Number of participants.
    pub fn participants(&self) -> u32 {
        self.bootstraps
            .split(',')
            .filter(|entry| !entry.trim().is_empty())
            .count() as u32
    }
}
