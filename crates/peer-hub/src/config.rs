//! # Hub Configuration
//!
//! One explicit configuration object, validated once at construction and
//! immutable afterwards.
//!
//! ## Bootstrap Addresses
//!
//! Each bootstrap entry names a peer's transport fingerprint and where to
//! dial it:
//!
//! ```text
//! 3b6a27bcceb6a42d62a3a8d02a6f0d73653215771de243a63ac048a18b59da29@127.0.0.1:4001
//! ```
//!
//! A directory is usually given as a comma-separated list of entries.

use std::fmt;
use std::net::{SocketAddr, ToSocketAddrs};
use std::str::FromStr;
use std::time::Duration;

use hub_crypto::TransportFingerprint;
use serde::{Deserialize, Serialize};

use crate::errors::ConfigError;

/// Largest frame the wire format can describe.
const MAX_ENCODABLE_FRAME: usize = u32::MAX as usize;

/// Default cap on a payload held by the boundary queue.
pub const DEFAULT_MAX_QUEUED_PAYLOAD: usize = 64 * 1024;

// =============================================================================
// BOOTSTRAP DIRECTORY
// =============================================================================

/// A bootstrap peer: transport fingerprint plus a dialable address.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct BootstrapAddress {
    /// Transport identity expected at the address.
    pub fingerprint: TransportFingerprint,
    /// Resolved socket address.
    pub addr: SocketAddr,
}

impl FromStr for BootstrapAddress {
    type Err = ConfigError;

    fn from_str(entry: &str) -> Result<Self, Self::Err> {
        let entry = entry.trim();
        let invalid = |reason: &str| ConfigError::InvalidBootstrapAddress {
            entry: entry.to_string(),
            reason: reason.to_string(),
        };

        let (fp_hex, host_port) = entry
            .split_once('@')
            .ok_or_else(|| invalid("missing '@' separator"))?;
        let fingerprint = TransportFingerprint::from_hex(fp_hex)
            .map_err(|e| invalid(&format!("bad fingerprint: {e}")))?;

        let (host, port) = host_port
            .rsplit_once(':')
            .ok_or_else(|| invalid("missing ':port'"))?;
        let host = host.trim_start_matches('[').trim_end_matches(']');
        if host.is_empty() {
            return Err(invalid("empty host"));
        }
        let port: u16 = port.parse().map_err(|_| invalid("bad port"))?;

        let addr = (host, port)
            .to_socket_addrs()
            .map_err(|e| invalid(&format!("cannot resolve host: {e}")))?
            .next()
            .ok_or_else(|| invalid("host resolved to no addresses"))?;

        Ok(Self { fingerprint, addr })
    }
}

impl fmt::Display for BootstrapAddress {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}@{}", self.fingerprint, self.addr)
    }
}

/// The immutable bootstrap set consulted at start-up and used as the
/// broadcast target set.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(try_from = "Vec<String>", into = "Vec<String>")]
pub struct BootstrapDirectory {
    peers: Vec<BootstrapAddress>,
}

impl BootstrapDirectory {
    /// Build a directory, rejecting duplicate fingerprints.
    pub fn new(peers: Vec<BootstrapAddress>) -> Result<Self, ConfigError> {
        for (i, peer) in peers.iter().enumerate() {
            if peers[..i].iter().any(|p| p.fingerprint == peer.fingerprint) {
                return Err(ConfigError::DuplicateBootstrap(peer.fingerprint));
            }
        }
        Ok(Self { peers })
    }

    /// Parse a comma-separated list. Empty entries are ignored.
    pub fn from_csv(csv: &str) -> Result<Self, ConfigError> {
        let peers = csv
            .split(',')
            .map(str::trim)
            .filter(|entry| !entry.is_empty())
            .map(BootstrapAddress::from_str)
            .collect::<Result<Vec<_>, _>>()?;
        Self::new(peers)
    }

    /// All entries, in configuration order.
    pub fn iter(&self) -> impl Iterator<Item = &BootstrapAddress> {
        self.peers.iter()
    }

    /// Entries other than `local`.
    pub fn peers_except(
        &self,
        local: TransportFingerprint,
    ) -> impl Iterator<Item = &BootstrapAddress> {
        self.peers.iter().filter(move |p| p.fingerprint != local)
    }

    /// Address configured for `fingerprint`.
    pub fn address_of(&self, fingerprint: &TransportFingerprint) -> Option<SocketAddr> {
        self.peers
            .iter()
            .find(|p| &p.fingerprint == fingerprint)
            .map(|p| p.addr)
    }

    /// Number of entries.
    pub fn len(&self) -> usize {
        self.peers.len()
    }

    /// Whether the directory is empty.
    pub fn is_empty(&self) -> bool {
        self.peers.is_empty()
    }
}

impl TryFrom<Vec<String>> for BootstrapDirectory {
    type Error = ConfigError;

    fn try_from(entries: Vec<String>) -> Result<Self, Self::Error> {
        let peers = entries
            .iter()
            .map(|e| e.parse())
            .collect::<Result<Vec<_>, _>>()?;
        Self::new(peers)
    }
}

impl From<BootstrapDirectory> for Vec<String> {
    fn from(dir: BootstrapDirectory) -> Self {
        dir.peers.iter().map(ToString::to_string).collect()
    }
}

// =============================================================================
// RETRY POLICY
// =============================================================================

/// Exponential backoff for reliable sends.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct RetryPolicy {
    /// Delay before the second attempt.
    pub initial_backoff_ms: u64,
    /// Upper bound on any single delay.
    pub max_backoff_ms: u64,
    /// Attempts before the send is abandoned.
    pub max_attempts: u32,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            initial_backoff_ms: 50,
            max_backoff_ms: 2_000,
            max_attempts: 40,
        }
    }
}

impl RetryPolicy {
    /// Delay after the `attempt`-th failure (1-based).
    pub fn backoff(&self, attempt: u32) -> Duration {
        let shift = attempt.saturating_sub(1).min(20);
        let delay = self.initial_backoff_ms.saturating_mul(1u64 << shift);
        Duration::from_millis(delay.min(self.max_backoff_ms))
    }

    /// Whether another attempt is allowed after `attempts` have been made.
    pub fn allows_retry(&self, attempts: u32) -> bool {
        attempts < self.max_attempts
    }

    fn validate(&self, field: &'static str) -> Result<(), ConfigError> {
        if self.max_attempts == 0 {
            return Err(ConfigError::InvalidValue {
                field,
                reason: "max_attempts must be at least 1".into(),
            });
        }
        if self.initial_backoff_ms == 0 || self.initial_backoff_ms > self.max_backoff_ms {
            return Err(ConfigError::InvalidValue {
                field,
                reason: "initial_backoff_ms must be in 1..=max_backoff_ms".into(),
            });
        }
        Ok(())
    }
}

// =============================================================================
// HUB CONFIG
// =============================================================================

/// Complete hub configuration.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct HubConfig {
    /// UDP address the QUIC endpoint binds.
    pub listen_addr: SocketAddr,
    /// Address put into announcements. Defaults to the bound address.
    pub advertise_addr: Option<SocketAddr>,
    /// Bootstrap peers.
    pub bootstrap: BootstrapDirectory,
    /// Frames the boundary queue holds before evicting the oldest.
    pub queue_capacity: usize,
    /// Largest payload the boundary queue accepts; larger frames are refused.
    pub max_queued_payload: usize,
    /// Largest accepted frame payload in bytes.
    pub max_frame_size: usize,
    /// Dial plus identity handshake deadline.
    pub connect_timeout_ms: u64,
    /// Deadline for a frame write and its acknowledgement.
    pub ack_timeout_ms: u64,
    /// QUIC keep-alive interval.
    pub keep_alive_ms: u64,
    /// QUIC idle timeout.
    pub idle_timeout_ms: u64,
    /// Retry policy for reliable sends.
    pub retry: RetryPolicy,
    /// Redial backoff for bootstrap peers (`max_attempts` is ignored).
    pub bootstrap_redial: RetryPolicy,
    /// After a failed dial, further dials to the same peer fail fast for this long.
    pub dial_failure_backoff_ms: u64,
    /// Repeat rediscovery queries for one account are suppressed within this window.
    pub rediscovery_window_ms: u64,
    /// Message ids remembered for duplicate suppression.
    pub dedup_capacity: usize,
}

impl Default for HubConfig {
    fn default() -> Self {
        Self {
            listen_addr: SocketAddr::from(([0, 0, 0, 0], 0)),
            advertise_addr: None,
            bootstrap: BootstrapDirectory::default(),
            queue_capacity: 65_536,
            max_queued_payload: DEFAULT_MAX_QUEUED_PAYLOAD,
            max_frame_size: 16 * 1024 * 1024,
            connect_timeout_ms: 5_000,
            ack_timeout_ms: 10_000,
            keep_alive_ms: 5_000,
            idle_timeout_ms: 30_000,
            retry: RetryPolicy::default(),
            bootstrap_redial: RetryPolicy {
                initial_backoff_ms: 200,
                max_backoff_ms: 5_000,
                max_attempts: u32::MAX,
            },
            dial_failure_backoff_ms: 500,
            rediscovery_window_ms: 250,
            dedup_capacity: 65_536,
        }
    }
}

impl HubConfig {
    /// Start a builder from the defaults.
    pub fn builder() -> HubConfigBuilder {
        HubConfigBuilder::default()
    }

    /// Short timeouts for loopback tests.
    pub fn for_testing(listen_addr: SocketAddr, bootstrap: BootstrapDirectory) -> Self {
        Self {
            listen_addr,
            bootstrap,
            connect_timeout_ms: 1_000,
            ack_timeout_ms: 5_000,
            keep_alive_ms: 1_000,
            idle_timeout_ms: 5_000,
            retry: RetryPolicy {
                initial_backoff_ms: 20,
                max_backoff_ms: 500,
                max_attempts: 200,
            },
            bootstrap_redial: RetryPolicy {
                initial_backoff_ms: 50,
                max_backoff_ms: 500,
                max_attempts: u32::MAX,
            },
            dial_failure_backoff_ms: 200,
            ..Self::default()
        }
    }

    /// Check every setting.
    pub fn validate(&self) -> Result<(), ConfigError> {
        fn positive(field: &'static str, value: u64) -> Result<(), ConfigError> {
            if value == 0 {
                return Err(ConfigError::InvalidValue {
                    field,
                    reason: "must be greater than zero".into(),
                });
            }
            Ok(())
        }

        if self.queue_capacity == 0 {
            return Err(ConfigError::InvalidValue {
                field: "queue_capacity",
                reason: "must be greater than zero".into(),
            });
        }
        if self.max_queued_payload == 0 || self.max_queued_payload > MAX_ENCODABLE_FRAME {
            return Err(ConfigError::InvalidValue {
                field: "max_queued_payload",
                reason: format!("must be in 1..={MAX_ENCODABLE_FRAME}"),
            });
        }
        if self.max_frame_size == 0 || self.max_frame_size > MAX_ENCODABLE_FRAME {
            return Err(ConfigError::InvalidValue {
                field: "max_frame_size",
                reason: format!("must be in 1..={MAX_ENCODABLE_FRAME}"),
            });
        }
        if self.dedup_capacity == 0 {
            return Err(ConfigError::InvalidValue {
                field: "dedup_capacity",
                reason: "must be greater than zero".into(),
            });
        }
        positive("connect_timeout_ms", self.connect_timeout_ms)?;
        positive("ack_timeout_ms", self.ack_timeout_ms)?;
        positive("keep_alive_ms", self.keep_alive_ms)?;
        positive("idle_timeout_ms", self.idle_timeout_ms)?;
        if self.keep_alive_ms >= self.idle_timeout_ms {
            return Err(ConfigError::InvalidValue {
                field: "keep_alive_ms",
                reason: "must be shorter than idle_timeout_ms".into(),
            });
        }
        self.retry.validate("retry")?;
        self.bootstrap_redial.validate("bootstrap_redial")?;
        Ok(())
    }

    /// Dial plus handshake deadline.
    pub fn connect_timeout(&self) -> Duration {
        Duration::from_millis(self.connect_timeout_ms)
    }

    /// Frame write plus acknowledgement deadline.
    pub fn ack_timeout(&self) -> Duration {
        Duration::from_millis(self.ack_timeout_ms)
    }

    /// QUIC keep-alive interval.
    pub fn keep_alive(&self) -> Duration {
        Duration::from_millis(self.keep_alive_ms)
    }

    /// QUIC idle timeout.
    pub fn idle_timeout(&self) -> Duration {
        Duration::from_millis(self.idle_timeout_ms)
    }

    /// Fail-fast window after a dial failure.
    pub fn dial_failure_backoff(&self) -> Duration {
        Duration::from_millis(self.dial_failure_backoff_ms)
    }

    /// Rediscovery suppression window.
    pub fn rediscovery_window(&self) -> Duration {
        Duration::from_millis(self.rediscovery_window_ms)
    }
}

/// Builder that validates on [`HubConfigBuilder::build`].
#[derive(Debug, Clone, Default)]
pub struct HubConfigBuilder {
    config: HubConfig,
}

impl HubConfigBuilder {
    /// Listen address.
    pub fn listen_addr(mut self, addr: SocketAddr) -> Self {
        self.config.listen_addr = addr;
        self
    }

    /// Address advertised in announcements.
    pub fn advertise_addr(mut self, addr: SocketAddr) -> Self {
        self.config.advertise_addr = Some(addr);
        self
    }

    /// Bootstrap directory.
    pub fn bootstrap(mut self, bootstrap: BootstrapDirectory) -> Self {
        self.config.bootstrap = bootstrap;
        self
    }

    /// Boundary queue capacity.
    pub fn queue_capacity(mut self, capacity: usize) -> Self {
        self.config.queue_capacity = capacity;
        self
    }

    /// Largest payload the boundary queue accepts.
    pub fn max_queued_payload(mut self, size: usize) -> Self {
        self.config.max_queued_payload = size;
        self
    }

    /// Maximum frame payload size.
    pub fn max_frame_size(mut self, size: usize) -> Self {
        self.config.max_frame_size = size;
        self
    }

    /// Retry policy for reliable sends.
    pub fn retry(mut self, retry: RetryPolicy) -> Self {
        self.config.retry = retry;
        self
    }

    /// Connect and handshake deadline.
    pub fn connect_timeout(mut self, timeout: Duration) -> Self {
        self.config.connect_timeout_ms = timeout.as_millis() as u64;
        self
    }

    /// Frame acknowledgement deadline.
    pub fn ack_timeout(mut self, timeout: Duration) -> Self {
        self.config.ack_timeout_ms = timeout.as_millis() as u64;
        self
    }

    /// Validate and return the configuration.
    pub fn build(self) -> Result<HubConfig, ConfigError> {
        self.config.validate()?;
        Ok(self.config)
    }
}
