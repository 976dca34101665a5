//! Error types for the hub.
//!
//! Four classes surface to callers: configuration problems (fatal at
//! start-up), signature failures (registration rejected), transport failures
//! (retried by the delivery engine unless permanent) and capacity limits
//! (reported through metrics, never raised across the boundary).

use std::net::SocketAddr;

use hub_crypto::{CryptoError, TransportFingerprint};
use thiserror::Error;

use crate::domain::FrameError;

/// Configuration errors. Raised once, when the hub is constructed.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum ConfigError {
    /// A bootstrap entry is not of the form `fingerprint@host:port`.
    #[error("invalid bootstrap address {entry:?}: {reason}")]
    InvalidBootstrapAddress {
        /// The offending entry.
        entry: String,
        /// What is wrong with it.
        reason: String,
    },

    /// The same fingerprint appears twice in the bootstrap directory.
    #[error("duplicate bootstrap fingerprint {0}")]
    DuplicateBootstrap(TransportFingerprint),

    /// Key material could not be decoded.
    #[error("invalid key material: {0}")]
    InvalidKey(#[from] CryptoError),

    /// A numeric setting is out of range.
    #[error("invalid value for {field}: {reason}")]
    InvalidValue {
        /// Setting name.
        field: &'static str,
        /// Constraint that was violated.
        reason: String,
    },
}

/// Transport failures.
///
/// Everything except [`TransportError::Rejected`] and
/// [`TransportError::Closed`] is worth retrying.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum TransportError {
    /// The listening socket could not be bound.
    #[error("failed to bind {addr}: {reason}")]
    BindFailed {
        /// Requested listen address.
        addr: SocketAddr,
        /// Error description.
        reason: String,
    },

    /// TLS or endpoint configuration failed.
    #[error("TLS setup failed: {0}")]
    Tls(String),

    /// No address is known for the peer, or dialing it failed.
    #[error("peer {peer} unreachable: {reason}")]
    Unreachable {
        /// Target fingerprint.
        peer: TransportFingerprint,
        /// Error description.
        reason: String,
    },

    /// The address now hosts a different transport identity.
    #[error("stale identity: expected {expected}, found {}", found.map(|fp| fp.to_string()).unwrap_or_else(|| "unknown".into()))]
    StaleIdentity {
        /// Fingerprint we dialed for.
        expected: TransportFingerprint,
        /// Fingerprint that answered, when it said so.
        found: Option<TransportFingerprint>,
    },

    /// The identity handshake failed for another reason.
    #[error("handshake failed: {0}")]
    Handshake(String),

    /// Stream open, write or read failed.
    #[error("stream failed: {0}")]
    Stream(String),

    /// No acknowledgement arrived in time.
    #[error("acknowledgement timed out")]
    AckTimeout,

    /// The peer refused the frame.
    #[error("frame rejected by peer")]
    Rejected,

    /// The hub is shutting down.
    #[error("transport closed")]
    Closed,
}

impl TransportError {
    /// Whether another attempt may succeed.
    pub fn is_retryable(&self) -> bool {
        !matches!(self, Self::Rejected | Self::Closed)
    }

    /// Whether the failure means the peer's registration may be out of date.
    pub fn is_stale(&self) -> bool {
        matches!(self, Self::StaleIdentity { .. } | Self::Unreachable { .. })
    }
}

/// Top-level hub error.
#[derive(Debug, Error)]
pub enum HubError {
    /// Invalid configuration
    #[error(transparent)]
    Config(#[from] ConfigError),

    /// Transport failure
    #[error(transparent)]
    Transport(#[from] TransportError),

    /// A registration signature does not bind the account key to this hub.
    #[error("registration signature rejected: {0}")]
    Signature(CryptoError),

    /// Malformed key or identifier supplied by the caller.
    #[error("invalid input: {0}")]
    InvalidInput(#[from] CryptoError),

    /// Malformed frame
    #[error(transparent)]
    Frame(#[from] FrameError),

    /// The hub has been stopped.
    #[error("hub stopped")]
    Stopped,
}

#[cfg(test)]
mod tests {
    use super::*;
    use hub_crypto::TransportKeyPair;

    #[test]
    fn test_retryable_classification() {
        let peer = TransportKeyPair::generate().fingerprint();
        assert!(TransportError::AckTimeout.is_retryable());
        assert!(TransportError::StaleIdentity {
            expected: peer,
            found: None
        }
        .is_retryable());
        assert!(!TransportError::Rejected.is_retryable());
        assert!(!TransportError::Closed.is_retryable());
    }

    #[test]
    fn test_stale_classification() {
        let peer = TransportKeyPair::generate().fingerprint();
        assert!(TransportError::Unreachable {
            peer,
            reason: "no address".into()
        }
        .is_stale());
        assert!(!TransportError::AckTimeout.is_stale());
        assert!(!TransportError::Stream("reset".into()).is_stale());
    }

    #[test]
    fn test_stale_identity_display_without_found() {
        let peer = TransportKeyPair::generate().fingerprint();
        let text = TransportError::StaleIdentity {
            expected: peer,
            found: None,
        }
        .to_string();
        assert!(text.contains("unknown"));
    }
}
