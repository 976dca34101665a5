//! Shared fixtures for multi-node scenarios.

use std::collections::HashSet;
use std::future::Future;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use hub_crypto::{AccountKeyPair, TransportKeyPair};
use parking_lot::Mutex;
use peer_hub::{
    BootstrapAddress, BootstrapDirectory, HubConfig, HubError, PeerHub, PeerHubApi, SharedRecentMessages,
};

/// Poll interval used by [`eventually`].
const POLL: Duration = Duration::from_millis(10);

/// Any free loopback port.
pub fn loopback() -> SocketAddr {
    SocketAddr::from(([127, 0, 0, 1], 0))
}

/// Bootstrap set naming each of `hubs`.
///
/// # Panics
///
/// If a hub is not bound.
pub fn directory(hubs: &[&PeerHub]) -> BootstrapDirectory {
    let peers = hubs
        .iter()
        .map(|hub| BootstrapAddress {
            fingerprint: hub.fingerprint(),
            addr: hub.local_addr().expect("hub is bound"),
        })
        .collect();
    BootstrapDirectory::new(peers).expect("valid bootstrap set")
}

/// Start an unregistered hub on loopback with test timeouts.
pub async fn start_node(bootstrap: BootstrapDirectory) -> Result<PeerHub, HubError> {
    PeerHub::start(
        HubConfig::for_testing(loopback(), bootstrap),
        TransportKeyPair::generate(),
    )
    .await
}

/// Start a hub under a fresh transport identity that continues
/// `previous`'s duplicate suppression.
pub async fn restart_node(
    previous: &PeerHub,
    bootstrap: BootstrapDirectory,
) -> Result<PeerHub, HubError> {
    let recent: SharedRecentMessages = previous.recent_messages();
    PeerHub::start_with_recent(
        HubConfig::for_testing(loopback(), bootstrap),
        TransportKeyPair::generate(),
        recent,
    )
    .await
}

/// Bind `account` to the hub's transport identity.
pub fn register(hub: &PeerHub, account: &AccountKeyPair) -> Result<(), HubError> {
    let signature = account.sign(hub.fingerprint().as_bytes())?;
    hub.register(&signature)?;
    Ok(())
}

/// Start a hub and register a fresh account on it.
pub async fn start_registered(
    bootstrap: BootstrapDirectory,
) -> Result<(PeerHub, AccountKeyPair), HubError> {
    let hub = start_node(bootstrap).await?;
    let account = AccountKeyPair::generate();
    register(&hub, &account)?;
    Ok((hub, account))
}

/// Records every payload a hub's handler receives.
///
/// One inbox may be installed on several hubs in turn, e.g. across a
/// restart under a new transport identity.
#[derive(Clone, Default)]
pub struct Inbox {
    received: Arc<Mutex<Vec<Vec<u8>>>>,
}

impl Inbox {
    pub fn new() -> Self {
        Self::default()
    }

    /// Install as `hub`'s stream handler.
    pub fn attach(&self, hub: &PeerHub) {
        let received = Arc::clone(&self.received);
        hub.set_stream_handler_fn(move |payload| received.lock().push(payload.to_vec()));
    }

    pub fn len(&self) -> usize {
        self.received.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Number of distinct payloads received.
    pub fn distinct(&self) -> usize {
        self.received.lock().iter().collect::<HashSet<_>>().len()
    }

    pub fn contains(&self, payload: &[u8]) -> bool {
        self.received.lock().iter().any(|p| p == payload)
    }

    pub fn snapshot(&self) -> Vec<Vec<u8>> {
        self.received.lock().clone()
    }
}

/// Poll `condition` until it holds or `limit` passes.
pub async fn eventually(limit: Duration, mut condition: impl FnMut() -> bool) -> bool {
    let deadline = tokio::time::Instant::now() + limit;
    loop {
        if condition() {
            return true;
        }
        if tokio::time::Instant::now() >= deadline {
            return false;
        }
        tokio::time::sleep(POLL).await;
    }
}

/// Wait until `hub` has no send in flight or waiting for a retry.
pub async fn settled(hub: &PeerHub, limit: Duration) -> bool {
    eventually(limit, || {
        let stats = hub.stats();
        stats.in_flight == 0 && stats.pending_sends == 0
    })
    .await
}

/// Run `scenario` on a fresh multi-thread runtime.
///
/// # Panics
///
/// If the runtime cannot be built.
pub fn run<F: Future>(scenario: F) -> F::Output {
    tokio::runtime::Builder::new_multi_thread()
        .worker_threads(4)
        .enable_all()
        .build()
        .expect("tokio runtime")
        .block_on(scenario)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_inbox_counts_distinct_payloads() {
        let inbox = Inbox::new();
        inbox.received.lock().extend([b"a".to_vec(), b"b".to_vec(), b"a".to_vec()]);
        assert_eq!(inbox.len(), 3);
        assert_eq!(inbox.distinct(), 2);
        assert!(inbox.contains(b"b"));
        assert!(!inbox.contains(b"c"));
    }

    #[test]
    fn test_eventually_times_out() {
        let held = run(eventually(Duration::from_millis(30), || false));
        assert!(!held);
    }
}
