//! # Discovery
//!
//! Keeps the registry populated:
//!
//! - **Announce**: the local registration is sent reliably to every
//!   bootstrap peer when it is set, and again on every fresh link to one.
//! - **Bootstrap links**: one task per bootstrap peer keeps a link open,
//!   redialing with backoff after it drops.
//! - **Rediscovery**: a registry miss or an invalidated record queries the
//!   bootstrap set for the account. At most one query round per account per
//!   suppression window.

use std::collections::HashMap;
use std::sync::Arc;

use hub_crypto::{AccountKey, TransportFingerprint};
use hub_telemetry::metrics;
use parking_lot::Mutex;
use tokio::runtime::Handle;
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tokio::time::{sleep, Instant};
use tracing::{debug, trace};

use crate::config::{BootstrapAddress, HubConfig};
use crate::domain::registration::encode_query;
use crate::domain::{Announcement, Frame, FrameKind, PeerRegistry, Recipient};
use crate::ports::outbound::AddressBook;
use crate::transport::TransportHost;

use super::delivery::DeliveryEngine;

/// Announcement and rediscovery service.
pub struct Discovery {
    host: Arc<TransportHost>,
    registry: Arc<PeerRegistry>,
    delivery: Arc<DeliveryEngine>,
    config: Arc<HubConfig>,
    runtime: Handle,
    last_query: Mutex<HashMap<AccountKey, Instant>>,
}

impl Discovery {
    pub fn new(
        runtime: Handle,
        host: Arc<TransportHost>,
        registry: Arc<PeerRegistry>,
        delivery: Arc<DeliveryEngine>,
        config: Arc<HubConfig>,
    ) -> Arc<Self> {
        Arc::new(Self {
            host,
            registry,
            delivery,
            config,
            runtime,
            last_query: Mutex::new(HashMap::new()),
        })
    }

    fn bootstrap_peers(&self) -> impl Iterator<Item = &BootstrapAddress> {
        self.config.bootstrap.peers_except(self.host.fingerprint())
    }

    // =========================================================================
    // ANNOUNCE
    // =========================================================================

    /// Announce the local registration to every bootstrap peer.
    ///
    /// Returns the number of peers addressed; zero before registration.
    pub fn announce_to_bootstrap(&self) -> usize {
        let peers: Vec<TransportFingerprint> = self.bootstrap_peers().map(|p| p.fingerprint).collect();
        peers.iter().filter(|peer| self.announce_to(**peer)).count()
    }

    /// Announce the local registration to one peer.
    fn announce_to(&self, peer: TransportFingerprint) -> bool {
        let Some(record) = self.registry.local() else {
            return false;
        };
        let announcement = Announcement {
            record,
            addr: self.host.advertised_addr(),
        };
        trace!(%peer, account = %record.account, "Announcing registration");
        self.delivery.submit(
            Recipient::Transport(peer),
            Frame::new(FrameKind::Announcement, announcement.encode()),
            true,
        );
        true
    }

    // =========================================================================
    // BOOTSTRAP LINKS
    // =========================================================================

    /// Spawn one link-maintenance task per bootstrap peer.
    pub fn spawn_bootstrap_maintenance(self: &Arc<Self>, shutdown: &watch::Receiver<bool>) -> Vec<JoinHandle<()>> {
        self.bootstrap_peers()
            .copied()
            .collect::<Vec<_>>()
            .into_iter()
            .map(|peer| {
                let discovery = Arc::clone(self);
                let shutdown = shutdown.clone();
                self.runtime
                    .spawn(async move { discovery.maintain_link(peer, shutdown).await })
            })
            .collect()
    }

    async fn maintain_link(self: Arc<Self>, peer: BootstrapAddress, mut shutdown: watch::Receiver<bool>) {
        let mut failures = 0u32;
        let mut announced_on = None;

        loop {
            if *shutdown.borrow() {
                break;
            }
            match self.host.link(peer.fingerprint).await {
                Ok(link) => {
                    if failures > 0 {
                        debug!(peer = %peer, after = failures, "Bootstrap peer reachable");
                    }
                    failures = 0;
                    if announced_on != Some(link.id()) {
                        announced_on = Some(link.id());
                        self.announce_to(peer.fingerprint);
                    }
                    tokio::select! {
                        _ = shutdown.changed() => break,
                        _ = link.closed() => debug!(peer = %peer, "Bootstrap link closed"),
                    }
                }
                Err(e) => {
                    failures = failures.saturating_add(1);
                    trace!(peer = %peer, attempt = failures, error = %e, "Bootstrap dial failed");
                    let delay = self.config.bootstrap_redial.backoff(failures);
                    tokio::select! {
                        _ = shutdown.changed() => break,
                        _ = sleep(delay) => {}
                    }
                }
            }
        }
    }

    // =========================================================================
    // REDISCOVERY
    // =========================================================================

    /// Serve rediscovery requests from the registry until shutdown.
    pub fn spawn_rediscovery(
        self: &Arc<Self>,
        mut requests: mpsc::UnboundedReceiver<AccountKey>,
        mut shutdown: watch::Receiver<bool>,
    ) -> JoinHandle<()> {
        let discovery = Arc::clone(self);
        self.runtime.spawn(async move {
            loop {
                tokio::select! {
                    _ = shutdown.changed() => break,
                    account = requests.recv() => {
                        let Some(account) = account else { break };
                        discovery.rediscover(account);
                    }
                }
            }
        })
    }

    /// Whether a query round for `account` may start now.
    fn claim_query(&self, account: AccountKey) -> bool {
        let now = Instant::now();
        let window = self.config.rediscovery_window();
        let mut last = self.last_query.lock();
        if last.get(&account).is_some_and(|at| now.duration_since(*at) < window) {
            return false;
        }
        last.retain(|_, at| now.duration_since(*at) < window);
        last.insert(account, now);
        true
    }

    fn rediscover(self: &Arc<Self>, account: AccountKey) {
        if !self.claim_query(account) {
            return;
        }
        let peers: Vec<TransportFingerprint> = self.bootstrap_peers().map(|p| p.fingerprint).collect();
        if peers.is_empty() {
            return;
        }

        metrics::REDISCOVERY_QUERIES.inc();
        debug!(%account, peers = peers.len(), "Querying bootstrap set");
        for peer in peers {
            let discovery = Arc::clone(self);
            self.runtime
                .spawn(async move { discovery.query(peer, account).await });
        }
    }

    async fn query(&self, peer: TransportFingerprint, account: AccountKey) {
        let frame = Frame::new(FrameKind::Query, encode_query(&account));
        let body = match self.host.send_frame(peer, &frame).await {
            Ok(body) => body,
            Err(e) => {
                trace!(%peer, %account, error = %e, "Rediscovery query failed");
                return;
            }
        };
        if body.is_empty() {
            trace!(%peer, %account, "Peer has no registration for account");
            return;
        }

        match Announcement::decode(&body) {
            Ok(answer) if answer.record.account == account => {
                let record = answer.record;
                if self.registry.install(record).is_live() {
                    if let Some(addr) = answer.addr {
                        self.host.hint(record.fingerprint, addr);
                    }
                    debug!(%account, fingerprint = %record.fingerprint, via = %peer, "Rediscovered peer");
                }
            }
            Ok(_) => debug!(%peer, %account, "Query answered for a different account"),
            Err(e) => debug!(%peer, %account, error = %e, "Malformed query answer"),
        }
    }
}
