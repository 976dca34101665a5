//! # Driving Ports (Inbound API)
//!
//! The operations a validator process uses to talk to the network.

use bytes::Bytes;
use hub_crypto::{AccountKey, AccountSignature, TransportFingerprint};

use super::outbound::MessageHandler;
use crate::errors::HubError;

/// Snapshot of hub state.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct HubStats {
    /// Accounts with a live registration, including our own.
    pub known_peers: usize,
    /// Reliable sends waiting for a retry.
    pub pending_sends: usize,
    /// Sends currently being attempted.
    pub in_flight: usize,
    /// Frames waiting in the boundary queue.
    pub queued_frames: usize,
    /// Live transport links.
    pub links: usize,
}

/// Primary API of the hub.
///
/// # Example
///
/// ```rust,ignore
/// use peer_hub::ports::PeerHubApi;
///
/// fn greet_all<H: PeerHubApi>(hub: &H, validators: &[AccountKey]) {
///     for account in validators {
///         hub.send_message_to_peer(account, Bytes::from_static(b"hello"), true);
///     }
/// }
/// ```
pub trait PeerHubApi {
    /// Local transport fingerprint once the listener is bound.
    fn get_id(&self) -> Option<TransportFingerprint>;

    /// Bind the account that signed our fingerprint to this hub and
    /// announce it to the bootstrap set.
    ///
    /// Returns the recovered account key.
    fn register(&self, signature: &AccountSignature) -> Result<AccountKey, HubError>;

    /// Replace the inbound application handler.
    fn set_stream_handler(&self, handler: Box<dyn MessageHandler>);

    /// Remove the handler; later frames go to the boundary queue.
    fn clear_stream_handler(&self);

    /// Queue `payload` for `account`. Never blocks on the network.
    fn send_message_to_peer(&self, account: &AccountKey, payload: Bytes, reliable: bool);

    /// Send `payload` to every bootstrap peer except ourselves.
    ///
    /// Returns the number of peers addressed.
    fn broadcast(&self, payload: Bytes, reliable: bool) -> usize;

    /// Drain queued frames into `buf`; `None` when nothing is ready.
    fn get_messages(&self, buf: &mut [u8]) -> Option<usize>;

    /// Current counters.
    fn stats(&self) -> HubStats;

    /// Shut down. Idempotent.
    fn stop(&self);
}
