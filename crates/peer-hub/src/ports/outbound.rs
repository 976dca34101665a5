//! # Driven Ports (Outbound SPI)
//!
//! Capabilities the hub's components consume from one another or from the
//! host process.

use std::net::SocketAddr;

use hub_crypto::{AccountKey, TransportFingerprint};
use tokio::sync::mpsc;

/// Receives inbound application payloads.
///
/// Called on a network task: implementations should return quickly and
/// must not block on the hub itself.
pub trait MessageHandler: Send + Sync {
    /// Handle one payload.
    fn handle(&self, payload: &[u8]);
}

impl<F> MessageHandler for F
where
    F: Fn(&[u8]) + Send + Sync,
{
    fn handle(&self, payload: &[u8]) {
        self(payload)
    }
}

/// Asked to find a registration for an account the registry does not know.
///
/// Must not block.
pub trait RediscoveryRequester: Send + Sync {
    /// Request rediscovery of `account`.
    fn request(&self, account: AccountKey);
}

impl RediscoveryRequester for mpsc::UnboundedSender<AccountKey> {
    fn request(&self, account: AccountKey) {
        // A closed channel means the hub is stopping.
        let _ = self.send(account);
    }
}

/// Fingerprint → dialable address map.
pub trait AddressBook: Send + Sync {
    /// Best known address for `fingerprint`.
    fn address_of(&self, fingerprint: &TransportFingerprint) -> Option<SocketAddr>;

    /// Record an address observed on an authenticated connection.
    fn observe(&self, fingerprint: TransportFingerprint, addr: SocketAddr);

    /// Record an unauthenticated hint; never overrides an existing entry.
    fn hint(&self, fingerprint: TransportFingerprint, addr: SocketAddr);
}
