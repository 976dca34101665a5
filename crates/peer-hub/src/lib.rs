//! # Peer Hub
//!
//! Account-addressed peer-to-peer messaging for validator networks.
//!
//! A validator sends byte payloads to another validator's long-term account
//! key. The hub resolves the key to the peer's current transport identity,
//! dials (or reuses) an authenticated QUIC link, and retries until the frame
//! is acknowledged or the retry budget runs out. Neither side tracks the
//! other's address or connection state.
//!
//! ## Architecture
//!
//! - **Domain:** frames, registration records, the peer registry and the
//!   boundary queue (no I/O)
//! - **Ports:** the [`PeerHubApi`] surface and the capabilities components
//!   consume from each other
//! - **Transport:** QUIC endpoint, identity handshake, link cache
//! - **Service:** delivery engine, inbound dispatch, discovery and the
//!   [`PeerHub`] façade
//!
//! ## Example
//!
//! ```rust,ignore
//! use peer_hub::{HubConfig, PeerHub, PeerHubApi};
//! use hub_crypto::{AccountKeyPair, TransportKeyPair};
//!
//! let identity = TransportKeyPair::generate();
//! let account = AccountKeyPair::generate();
//! let hub = PeerHub::start(HubConfig::default(), identity).await?;
//!
//! let fingerprint = hub.get_id().unwrap();
//! hub.register(&account.sign(fingerprint.as_bytes())?)?;
//! hub.set_stream_handler_fn(|payload| println!("{} bytes", payload.len()));
//! hub.send_message_to_peer(&peer_account, "hello".into(), true);
//! ```

pub mod config;
pub mod domain;
pub mod errors;
pub mod ports;
pub mod service;
pub mod transport;

pub use config::{
    BootstrapAddress, BootstrapDirectory, HubConfig, HubConfigBuilder, RetryPolicy,
    DEFAULT_MAX_QUEUED_PAYLOAD,
};
pub use domain::{split_drained, Frame, FrameKind, RecentMessages, RegistrationRecord, SharedRecentMessages};
pub use errors::{ConfigError, HubError, TransportError};
pub use ports::{HubStats, MessageHandler, PeerHubApi};
pub use service::{BindStatus, PeerHub};
