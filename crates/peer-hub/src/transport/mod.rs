//! # Transport Layer
//!
//! QUIC endpoint, identity handshake and the transport host that owns them.

pub mod handshake;
pub mod host;
pub mod quic;

pub use host::{InboundStream, PeerLink, TransportHost};
