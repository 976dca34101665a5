//! # Hub Services
//!
//! Wires the domain types to the transport host.
//!
//! - [`dispatch`]: routes inbound frames to the handler, the boundary queue
//!   or the registry
//! - [`delivery`]: resolves recipients and retries reliable sends
//! - [`discovery`]: announcements, bootstrap links and rediscovery
//! - [`hub`]: the [`PeerHub`] façade

pub mod delivery;
pub mod discovery;
pub mod dispatch;
pub mod hub;

pub use delivery::DeliveryEngine;
pub use discovery::Discovery;
pub use dispatch::{InboundDispatch, Reply};
pub use hub::{BindStatus, PeerHub};
