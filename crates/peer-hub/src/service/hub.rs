//! # Peer Hub
//!
//! Composes the transport host, registry, delivery engine, dispatcher and
//! discovery into the API a validator process uses.
//!
//! ## Lifecycle
//!
//! ```text
//! spawn ──► Binding ──► Bound ──► Stopped
//!              │
//!              └──► Failed
//! ```
//!
//! [`PeerHub::spawn`] returns at once and binds in the background; callers
//! poll [`PeerHubApi::get_id`]. [`PeerHub::start`] is the awaiting variant for
//! async callers and surfaces a bind failure as an error.
//!
//! Sends submitted while binding are held and released once the listener is
//! up. Dropping the last handle stops the hub.
//!
//! A hub restarted in-process under a new transport identity for the same
//! account should be spawned with the previous hub's
//! [`PeerHub::recent_messages`]; otherwise frames the old identity handled
//! without acknowledging are handled again.

use std::net::SocketAddr;
use std::sync::{Arc, Weak};

use bytes::Bytes;
use hub_crypto::{AccountKey, AccountSignature, CryptoError, TransportFingerprint, TransportKeyPair};
use parking_lot::Mutex;
use tokio::runtime::Handle;
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

use crate::config::HubConfig;
use crate::domain::registration::next_seq;
use crate::domain::{
    BoundaryQueue, Frame, PeerRegistry, PendingSend, RecentMessages, Recipient, RegistrationRecord,
    SharedRecentMessages,
};
use crate::errors::{HubError, TransportError};
use crate::ports::inbound::{HubStats, PeerHubApi};
use crate::ports::outbound::MessageHandler;
use crate::transport::TransportHost;

use super::delivery::DeliveryEngine;
use super::discovery::Discovery;
use super::dispatch::InboundDispatch;

/// Inbound streams buffered between the transport and the dispatcher.
const INBOUND_BACKLOG: usize = 1024;

/// Where the listener is in its lifecycle.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BindStatus {
    /// Bring-up in progress.
    Binding,
    /// Listening on the address.
    Bound(SocketAddr),
    /// The listener could not be bound.
    Failed(TransportError),
    /// Stopped.
    Stopped,
}

/// Services that exist once the listener is bound.
struct Services {
    host: Arc<TransportHost>,
    delivery: Arc<DeliveryEngine>,
    discovery: Arc<Discovery>,
}

enum Phase {
    /// Sends submitted before the listener came up.
    Binding(Vec<PendingSend>),
    Bound(Arc<Services>),
    Down,
}

struct HubInner {
    config: Arc<HubConfig>,
    identity: TransportKeyPair,
    fingerprint: TransportFingerprint,
    registry: Arc<PeerRegistry>,
    queue: Arc<BoundaryQueue>,
    dispatch: Arc<InboundDispatch>,
    runtime: Handle,
    phase: Mutex<Phase>,
    status: watch::Sender<BindStatus>,
    shutdown: watch::Sender<bool>,
    tasks: Mutex<Vec<JoinHandle<()>>>,
}

/// Handle to a running hub. Cheap to clone.
#[derive(Clone)]
pub struct PeerHub {
    inner: Arc<HubInner>,
}

impl PeerHub {
    /// Validate `config` and bind in the background on `runtime`.
    ///
    /// Only configuration errors are reported here; a bind failure shows up
    /// as [`BindStatus::Failed`].
    pub fn spawn(runtime: &Handle, config: HubConfig, identity: TransportKeyPair) -> Result<Self, HubError> {
        let recent = RecentMessages::shared(config.dedup_capacity);
        Self::spawn_with_recent(runtime, config, identity, recent)
    }

    /// [`Self::spawn`] reusing the duplicate-suppression cache of an earlier
    /// hub that served the same account, see [`Self::recent_messages`].
    pub fn spawn_with_recent(
        runtime: &Handle,
        config: HubConfig,
        identity: TransportKeyPair,
        recent: SharedRecentMessages,
    ) -> Result<Self, HubError> {
        config.validate()?;
        let config = Arc::new(config);
        let fingerprint = identity.fingerprint();

        let (rediscovery_tx, rediscovery_rx) = mpsc::unbounded_channel();
        let registry = Arc::new(PeerRegistry::with_rediscovery(Box::new(rediscovery_tx)));
        let queue = Arc::new(BoundaryQueue::with_max_payload(
            config.queue_capacity,
            config.max_queued_payload,
        ));
        let dispatch = Arc::new(InboundDispatch::with_recent(
            Arc::clone(&registry),
            Arc::clone(&queue),
            &config,
            recent,
        ));
        let (shutdown, _) = watch::channel(false);
        let (status, _) = watch::channel(BindStatus::Binding);

        let inner = Arc::new(HubInner {
            config,
            identity: identity.clone(),
            fingerprint,
            registry,
            queue,
            dispatch,
            runtime: runtime.clone(),
            phase: Mutex::new(Phase::Binding(Vec::new())),
            status,
            shutdown,
            tasks: Mutex::new(Vec::new()),
        });

        let weak = Arc::downgrade(&inner);
        let bring_up = runtime.spawn(async move { bring_up(weak, identity, rediscovery_rx) });
        inner.tasks.lock().push(bring_up);

        info!(%fingerprint, "Peer hub starting");
        Ok(Self { inner })
    }

    /// Start on the current runtime and wait until the listener is bound.
    pub async fn start(config: HubConfig, identity: TransportKeyPair) -> Result<Self, HubError> {
        let hub = Self::spawn(&Handle::current(), config, identity)?;
        hub.wait_bound().await?;
        Ok(hub)
    }

    /// Awaiting variant of [`Self::spawn_with_recent`].
    pub async fn start_with_recent(
        config: HubConfig,
        identity: TransportKeyPair,
        recent: SharedRecentMessages,
    ) -> Result<Self, HubError> {
        let hub = Self::spawn_with_recent(&Handle::current(), config, identity, recent)?;
        hub.wait_bound().await?;
        Ok(hub)
    }

    /// Ids of recently handled frames; survives [`PeerHubApi::stop`].
    pub fn recent_messages(&self) -> SharedRecentMessages {
        self.inner.dispatch.recent()
    }

    /// Wait for bring-up to finish. Returns the bound address.
    pub async fn wait_bound(&self) -> Result<SocketAddr, HubError> {
        let mut status = self.inner.status.subscribe();
        let settled = status
            .wait_for(|s| !matches!(s, BindStatus::Binding))
            .await
            .map_err(|_| HubError::Stopped)?
            .clone();
        match settled {
            BindStatus::Bound(addr) => Ok(addr),
            BindStatus::Failed(e) => Err(e.into()),
            BindStatus::Binding | BindStatus::Stopped => Err(HubError::Stopped),
        }
    }

    /// Current lifecycle state.
    pub fn status(&self) -> BindStatus {
        self.inner.status.borrow().clone()
    }

    /// Transport fingerprint, whether or not the listener is bound yet.
    pub fn fingerprint(&self) -> TransportFingerprint {
        self.inner.fingerprint
    }

    /// Bound listener address.
    pub fn local_addr(&self) -> Option<SocketAddr> {
        self.inner.services().map(|s| s.host.local_addr())
    }

    /// Effective configuration.
    pub fn config(&self) -> &HubConfig {
        &self.inner.config
    }

    /// Register using a signature produced elsewhere for an already known
    /// account key. Fails if the signature does not bind `account`.
    pub fn register_as(&self, account: AccountKey, signature: &AccountSignature) -> Result<(), HubError> {
        let record = RegistrationRecord::new(account, &self.inner.identity, *signature, self.inner.next_seq());
        self.inner.register(record)
    }

    /// [`PeerHubApi::send_message_to_peer`] taking the account key in hex.
    pub fn send_message_to_peer_hex(&self, account_hex: &str, payload: Bytes, reliable: bool) -> Result<(), HubError> {
        let account = AccountKey::from_hex(account_hex)?;
        self.send_message_to_peer(&account, payload, reliable);
        Ok(())
    }

    /// Send to a transport identity directly, bypassing the registry.
    pub fn send_to_transport(&self, fingerprint: TransportFingerprint, payload: Bytes, reliable: bool) {
        self.inner
            .submit(Recipient::Transport(fingerprint), Frame::application(payload), reliable);
    }

    /// Install a closure as the inbound handler.
    pub fn set_stream_handler_fn<F>(&self, handler: F)
    where
        F: Fn(&[u8]) + Send + Sync + 'static,
    {
        self.inner.dispatch.set_handler(Arc::new(handler));
    }

    /// Transport fingerprint currently registered for `account`.
    pub fn resolve(&self, account: &AccountKey) -> Option<TransportFingerprint> {
        self.inner.registry.peek(account)
    }

    /// Whether [`PeerHubApi::stop`] has run.
    pub fn is_stopped(&self) -> bool {
        *self.inner.shutdown.borrow()
    }
}

impl PeerHubApi for PeerHub {
    fn get_id(&self) -> Option<TransportFingerprint> {
        self.inner.services().map(|_| self.inner.fingerprint)
    }

    fn register(&self, signature: &AccountSignature) -> Result<AccountKey, HubError> {
        let record = RegistrationRecord::recover(&self.inner.identity, *signature, self.inner.next_seq())
            .map_err(HubError::Signature)?;
        self.inner.register(record)?;
        Ok(record.account)
    }

    fn set_stream_handler(&self, handler: Box<dyn MessageHandler>) {
        self.inner.dispatch.set_handler(Arc::from(handler));
    }

    fn clear_stream_handler(&self) {
        self.inner.dispatch.clear_handler();
    }

    fn send_message_to_peer(&self, account: &AccountKey, payload: Bytes, reliable: bool) {
        self.inner
            .submit(Recipient::Account(*account), Frame::application(payload), reliable);
    }

    fn broadcast(&self, payload: Bytes, reliable: bool) -> usize {
        let peers: Vec<TransportFingerprint> = self
            .inner
            .config
            .bootstrap
            .peers_except(self.inner.fingerprint)
            .map(|p| p.fingerprint)
            .collect();
        for peer in &peers {
            self.inner
                .submit(Recipient::Transport(*peer), Frame::application(payload.clone()), reliable);
        }
        debug!(peers = peers.len(), "Broadcast submitted");
        peers.len()
    }

    fn get_messages(&self, buf: &mut [u8]) -> Option<usize> {
        self.inner.queue.drain_into(buf)
    }

    fn stats(&self) -> HubStats {
        let services = self.inner.services();
        let held = match &*self.inner.phase.lock() {
            Phase::Binding(held) => held.len(),
            _ => 0,
        };
        HubStats {
            known_peers: self.inner.registry.len(),
            pending_sends: held + services.as_ref().map_or(0, |s| s.delivery.pending()),
            in_flight: services.as_ref().map_or(0, |s| s.delivery.in_flight()),
            queued_frames: self.inner.queue.len(),
            links: services.as_ref().map_or(0, |s| s.host.link_count()),
        }
    }

    fn stop(&self) {
        self.inner.stop();
    }
}

impl HubInner {
    fn services(&self) -> Option<Arc<Services>> {
        match &*self.phase.lock() {
            Phase::Bound(services) => Some(Arc::clone(services)),
            _ => None,
        }
    }

    fn next_seq(&self) -> u64 {
        next_seq(self.registry.local().map(|r| r.seq))
    }

    fn register(&self, record: RegistrationRecord) -> Result<(), HubError> {
        if *self.shutdown.borrow() {
            return Err(HubError::Stopped);
        }
        if !self.registry.set_local(record).is_live() {
            warn!(account = %record.account, "Registration signature rejected");
            return Err(HubError::Signature(CryptoError::SignatureVerificationFailed));
        }

        // Before bind, bootstrap links announce on connect.
        let announced = self
            .services()
            .map_or(0, |s| s.discovery.announce_to_bootstrap());
        info!(account = %record.account, fingerprint = %self.fingerprint, announced, "Registered");
        Ok(())
    }

    fn submit(&self, recipient: Recipient, frame: Frame, reliable: bool) {
        let services = {
            let mut phase = self.phase.lock();
            match &mut *phase {
                Phase::Bound(services) => Arc::clone(services),
                Phase::Binding(held) => {
                    held.push(PendingSend::new(recipient, frame, reliable));
                    return;
                }
                Phase::Down => {
                    debug!(%recipient, "Hub not running, dropping send");
                    return;
                }
            }
        };
        services.delivery.submit(recipient, frame, reliable);
    }

    fn stop(&self) {
        if self.shutdown.send_replace(true) {
            return;
        }

        let phase = std::mem::replace(&mut *self.phase.lock(), Phase::Down);
        if let Phase::Bound(services) = phase {
            services.host.close();
        }
        for task in self.tasks.lock().drain(..) {
            task.abort();
        }
        self.status.send_replace(BindStatus::Stopped);
        info!(fingerprint = %self.fingerprint, "Peer hub stopped");
    }
}

impl Drop for HubInner {
    fn drop(&mut self) {
        self.stop();
    }
}

/// Bind the listener and start the services.
fn bring_up(
    hub: Weak<HubInner>,
    identity: TransportKeyPair,
    rediscovery: mpsc::UnboundedReceiver<AccountKey>,
) {
    let Some(inner) = hub.upgrade() else {
        return;
    };

    let (inbound_tx, inbound_rx) = mpsc::channel(INBOUND_BACKLOG);
    let host = match TransportHost::bind(
        Arc::clone(&inner.config),
        identity,
        inbound_tx,
        inner.shutdown.subscribe(),
    ) {
        Ok(host) => host,
        Err(e) => {
            error!(listen = %inner.config.listen_addr, error = %e, "Failed to bind listener");
            let mut phase = inner.phase.lock();
            if matches!(*phase, Phase::Binding(_)) {
                *phase = Phase::Down;
                inner.status.send_replace(BindStatus::Failed(e));
            }
            return;
        }
    };

    let (delivery, scheduler) = DeliveryEngine::spawn(
        inner.runtime.clone(),
        Arc::clone(&host),
        Arc::clone(&inner.registry),
        Arc::clone(&inner.dispatch),
        inner.config.retry.clone(),
        inner.shutdown.subscribe(),
    );
    let discovery = Discovery::new(
        inner.runtime.clone(),
        Arc::clone(&host),
        Arc::clone(&inner.registry),
        Arc::clone(&delivery),
        Arc::clone(&inner.config),
    );

    let mut tasks = vec![
        scheduler,
        host.spawn_accept_loop(),
        inner.dispatch.spawn_loop(
            &inner.runtime,
            Arc::clone(&host),
            inbound_rx,
            inner.shutdown.subscribe(),
        ),
        discovery.spawn_rediscovery(rediscovery, inner.shutdown.subscribe()),
    ];
    tasks.extend(discovery.spawn_bootstrap_maintenance(&inner.shutdown.subscribe()));

    let local_addr = host.local_addr();
    let services = Arc::new(Services {
        host,
        delivery,
        discovery,
    });

    // Published under the phase lock so a concurrent stop aborts the tasks.
    let held = {
        let mut phase = inner.phase.lock();
        match std::mem::replace(&mut *phase, Phase::Bound(Arc::clone(&services))) {
            Phase::Binding(held) => {
                inner.tasks.lock().extend(tasks);
                inner.status.send_replace(BindStatus::Bound(local_addr));
                held
            }
            // Stopped while binding.
            Phase::Down | Phase::Bound(_) => {
                *phase = Phase::Down;
                drop(phase);
                services.host.close();
                for task in tasks {
                    task.abort();
                }
                return;
            }
        }
    };

    info!(fingerprint = %inner.fingerprint, %local_addr, "Peer hub listening");

    if !held.is_empty() {
        debug!(count = held.len(), "Releasing sends held during bring-up");
    }
    for send in held {
        services.delivery.submit(send.recipient, send.frame, send.reliable);
    }
    if inner.registry.local().is_some() {
        services.discovery.announce_to_bootstrap();
    }
}
