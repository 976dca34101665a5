//! # Integration Scenarios
//!
//! Every scenario starts real hubs on loopback and talks through the public
//! [`peer_hub::PeerHubApi`] surface only, apart from the registration
//! scenarios that need a raw transport host to forge frames.

pub mod boundary;
pub mod delivery;
pub mod registration;
