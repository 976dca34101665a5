//! # Ports
//!
//! - [`inbound`]: the API the hub offers its host process
//! - [`outbound`]: capabilities the hub consumes

pub mod inbound;
pub mod outbound;

pub use inbound::{HubStats, PeerHubApi};
pub use outbound::{AddressBook, MessageHandler, RediscoveryRequester};
