//! # Transport Host
//!
//! Owns the QUIC endpoint and the ephemeral transport identity.
//!
//! ## Responsibilities
//!
//! - Accept loop: authenticate every inbound connection, then hand each of
//!   its streams to inbound dispatch through a channel
//! - Link cache: at most one cached connection per remote fingerprint, dialed
//!   on demand, evicted when it closes
//! - Address book: fingerprint → socket address
//! - Frame exchange: one bidirectional stream per frame, answered by an
//!   acknowledgement byte
//!
//! Dials to one peer are single-flight: concurrent senders wait for the dial
//! in progress instead of starting their own. After a failed dial, further
//! dials to that peer fail fast for `dial_failure_backoff`. Dial locks and
//! failure marks are dropped once no dial needs them, so peers that vanish
//! leave nothing behind.

use std::collections::HashMap;
use std::fmt;
use std::net::SocketAddr;
use std::sync::Arc;

use bytes::Bytes;
use hub_crypto::{TransportFingerprint, TransportKeyPair};
use parking_lot::{Mutex, RwLock};
use quinn::VarInt;
use tokio::runtime::Handle;
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tokio::time::{timeout, Instant};
use tracing::{debug, info, trace, warn};

use super::{handshake, quic};
use crate::config::HubConfig;
use crate::domain::{Ack, Frame};
use crate::errors::TransportError;
use crate::ports::outbound::AddressBook;

/// Largest response body read after an acknowledgement.
const MAX_RESPONSE_LEN: usize = 4096;

/// Close code used on shutdown.
const SHUTDOWN_CODE: VarInt = VarInt::from_u32(0);

/// A stream opened by an authenticated peer.
pub struct InboundStream {
    /// Proven fingerprint of the remote side.
    pub remote: TransportFingerprint,
    /// Remote socket address.
    pub remote_addr: SocketAddr,
    /// Where the acknowledgement goes.
    pub send: quinn::SendStream,
    /// Where the frame comes from.
    pub recv: quinn::RecvStream,
}

/// An authenticated connection to one peer.
pub struct PeerLink {
    fingerprint: TransportFingerprint,
    connection: quinn::Connection,
    write_lock: tokio::sync::Mutex<()>,
}

impl PeerLink {
    fn new(fingerprint: TransportFingerprint, connection: quinn::Connection) -> Self {
        Self {
            fingerprint,
            connection,
            write_lock: tokio::sync::Mutex::new(()),
        }
    }

    /// Remote fingerprint.
    pub fn fingerprint(&self) -> TransportFingerprint {
        self.fingerprint
    }

    /// Whether the connection is still usable.
    pub fn is_open(&self) -> bool {
        self.connection.close_reason().is_none()
    }

    /// Resolves once the connection has closed.
    pub async fn closed(&self) {
        self.connection.closed().await;
    }

    /// Stable connection id.
    pub fn id(&self) -> usize {
        self.connection.stable_id()
    }
}

impl fmt::Debug for PeerLink {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PeerLink")
            .field("fingerprint", &self.fingerprint)
            .field("remote_addr", &self.connection.remote_address())
            .field("open", &self.is_open())
            .finish_non_exhaustive()
    }
}

/// Owner of the endpoint, the link cache and the address book.
pub struct TransportHost {
    identity: TransportKeyPair,
    fingerprint: TransportFingerprint,
    config: Arc<HubConfig>,
    endpoint: quinn::Endpoint,
    local_addr: SocketAddr,
    links: Mutex<HashMap<TransportFingerprint, Arc<PeerLink>>>,
    dial_locks: Mutex<HashMap<TransportFingerprint, Arc<tokio::sync::Mutex<()>>>>,
    dial_failures: Mutex<HashMap<TransportFingerprint, Instant>>,
    addresses: RwLock<HashMap<TransportFingerprint, SocketAddr>>,
    inbound: mpsc::Sender<InboundStream>,
    runtime: Handle,
    shutdown: watch::Receiver<bool>,
}

impl TransportHost {
    /// Bind the endpoint and seed the address book from the bootstrap set.
    ///
    /// Must be called from within a tokio runtime.
    pub fn bind(
        config: Arc<HubConfig>,
        identity: TransportKeyPair,
        inbound: mpsc::Sender<InboundStream>,
        shutdown: watch::Receiver<bool>,
    ) -> Result<Arc<Self>, TransportError> {
        let endpoint = quic::bind_endpoint(&config)?;
        let local_addr = quic::local_addr(&endpoint, config.listen_addr)?;
        let fingerprint = identity.fingerprint();

        let addresses = config
            .bootstrap
            .peers_except(fingerprint)
            .map(|p| (p.fingerprint, p.addr))
            .collect();

        info!(%fingerprint, %local_addr, "Transport host bound");

        Ok(Arc::new(Self {
            identity,
            fingerprint,
            config,
            endpoint,
            local_addr,
            links: Mutex::new(HashMap::new()),
            dial_locks: Mutex::new(HashMap::new()),
            dial_failures: Mutex::new(HashMap::new()),
            addresses: RwLock::new(addresses),
            inbound,
            runtime: Handle::current(),
            shutdown,
        }))
    }

    /// Local transport fingerprint.
    pub fn fingerprint(&self) -> TransportFingerprint {
        self.fingerprint
    }

    /// Bound socket address.
    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    /// Address put into our own announcements.
    pub fn advertised_addr(&self) -> Option<SocketAddr> {
        self.config
            .advertise_addr
            .or_else(|| (!self.local_addr.ip().is_unspecified()).then_some(self.local_addr))
    }

    /// Number of cached live links.
    pub fn link_count(&self) -> usize {
        self.links.lock().values().filter(|l| l.is_open()).count()
    }

    // =========================================================================
    // ACCEPT LOOP
    // =========================================================================

    /// Start accepting connections until shutdown.
    pub fn spawn_accept_loop(self: &Arc<Self>) -> JoinHandle<()> {
        let host = Arc::clone(self);
        self.runtime.spawn(async move { host.accept_loop().await })
    }

    async fn accept_loop(self: Arc<Self>) {
        let mut shutdown = self.shutdown.clone();
        loop {
            tokio::select! {
                _ = shutdown.changed() => break,
                incoming = self.endpoint.accept() => {
                    let Some(incoming) = incoming else { break };
                    let host = Arc::clone(&self);
                    self.runtime.spawn(async move { host.handle_incoming(incoming).await });
                }
            }
        }
        debug!("Accept loop stopped");
    }

    async fn handle_incoming(self: Arc<Self>, incoming: quinn::Incoming) {
        let remote_addr = incoming.remote_address();
        let authenticated = timeout(self.config.connect_timeout(), async {
            let conn = incoming
                .await
                .map_err(|e| TransportError::Handshake(e.to_string()))?;
            let remote = handshake::accept(&conn, &self.identity).await?;
            Ok::<_, TransportError>((conn, remote))
        })
        .await;

        match authenticated {
            Ok(Ok((conn, remote))) => {
                debug!(%remote, %remote_addr, "Accepted peer connection");
                self.observe(remote, conn.remote_address());
                self.dial_failures.lock().remove(&remote);
                let link = self.install_link(remote, conn);
                self.serve(link).await;
            }
            Ok(Err(e)) => debug!(%remote_addr, error = %e, "Inbound handshake failed"),
            Err(_) => debug!(%remote_addr, "Inbound handshake timed out"),
        }
    }

    /// Forward every stream of `link` to dispatch until the connection ends.
    async fn serve(self: Arc<Self>, link: Arc<PeerLink>) {
        let mut shutdown = self.shutdown.clone();
        let remote_addr = link.connection.remote_address();
        loop {
            tokio::select! {
                _ = shutdown.changed() => break,
                stream = link.connection.accept_bi() => match stream {
                    Ok((send, recv)) => {
                        let stream = InboundStream {
                            remote: link.fingerprint,
                            remote_addr,
                            send,
                            recv,
                        };
                        if self.inbound.send(stream).await.is_err() {
                            break;
                        }
                    }
                    Err(e) => {
                        debug!(peer = %link.fingerprint, reason = %e, "Peer connection closed");
                        break;
                    }
                }
            }
        }
        self.remove_link(&link);
    }

    // =========================================================================
    // LINKS
    // =========================================================================

    fn install_link(&self, fingerprint: TransportFingerprint, connection: quinn::Connection) -> Arc<PeerLink> {
        let link = Arc::new(PeerLink::new(fingerprint, connection));
        self.links.lock().insert(fingerprint, Arc::clone(&link));
        link
    }

    fn remove_link(&self, link: &Arc<PeerLink>) {
        let mut links = self.links.lock();
        if links
            .get(&link.fingerprint)
            .is_some_and(|current| Arc::ptr_eq(current, link))
        {
            links.remove(&link.fingerprint);
        }
    }

    fn live_link(&self, fingerprint: &TransportFingerprint) -> Option<Arc<PeerLink>> {
        let mut links = self.links.lock();
        match links.get(fingerprint) {
            Some(link) if link.is_open() => Some(Arc::clone(link)),
            Some(_) => {
                links.remove(fingerprint);
                None
            }
            None => None,
        }
    }

    fn dial_lock(&self, fingerprint: TransportFingerprint) -> Arc<tokio::sync::Mutex<()>> {
        Arc::clone(self.dial_locks.lock().entry(fingerprint).or_default())
    }

    /// Drop the dial lock for `fingerprint` unless another caller holds it.
    fn release_dial_lock(&self, fingerprint: &TransportFingerprint, lock: &Arc<tokio::sync::Mutex<()>>) {
        let mut locks = self.dial_locks.lock();
        // One reference in the map, one in `lock`.
        let unused = locks
            .get(fingerprint)
            .is_some_and(|held| Arc::ptr_eq(held, lock) && Arc::strong_count(held) == 2);
        if unused {
            locks.remove(fingerprint);
        }
    }

    /// Whether a dial to `fingerprint` failed within the backoff window.
    /// Expired marks are dropped.
    fn recently_failed(&self, fingerprint: &TransportFingerprint) -> bool {
        let backoff = self.config.dial_failure_backoff();
        let mut failures = self.dial_failures.lock();
        match failures.get(fingerprint) {
            Some(failed_at) if failed_at.elapsed() < backoff => true,
            Some(_) => {
                failures.remove(fingerprint);
                false
            }
            None => false,
        }
    }

    fn mark_dial_failed(&self, fingerprint: TransportFingerprint) {
        let backoff = self.config.dial_failure_backoff();
        let mut failures = self.dial_failures.lock();
        failures.retain(|_, failed_at| failed_at.elapsed() < backoff);
        failures.insert(fingerprint, Instant::now());
    }

    /// Dial locks and failure marks currently held.
    pub fn dial_state_len(&self) -> (usize, usize) {
        (self.dial_locks.lock().len(), self.dial_failures.lock().len())
    }

    /// Cached link to `fingerprint`, dialing if there is none.
    pub async fn link(self: &Arc<Self>, fingerprint: TransportFingerprint) -> Result<Arc<PeerLink>, TransportError> {
        if fingerprint == self.fingerprint {
            return Err(TransportError::Unreachable {
                peer: fingerprint,
                reason: "cannot dial self".into(),
            });
        }
        if let Some(link) = self.live_link(&fingerprint) {
            return Ok(link);
        }

        // Released on drop, including when the caller gives up mid-dial.
        let slot = DialSlot {
            host: self,
            fingerprint,
            lock: self.dial_lock(fingerprint),
        };
        let _guard = slot.lock.lock().await;
        self.link_single_flight(fingerprint).await
    }

    /// Dial under the peer's dial lock.
    async fn link_single_flight(
        self: &Arc<Self>,
        fingerprint: TransportFingerprint,
    ) -> Result<Arc<PeerLink>, TransportError> {
        if let Some(link) = self.live_link(&fingerprint) {
            return Ok(link);
        }
        if self.recently_failed(&fingerprint) {
            return Err(TransportError::Unreachable {
                peer: fingerprint,
                reason: "recent dial failure".into(),
            });
        }

        match self.dial(fingerprint).await {
            Ok(link) => {
                self.dial_failures.lock().remove(&fingerprint);
                Ok(link)
            }
            Err(e) => {
                self.mark_dial_failed(fingerprint);
                Err(e)
            }
        }
    }

    async fn dial(self: &Arc<Self>, fingerprint: TransportFingerprint) -> Result<Arc<PeerLink>, TransportError> {
        let stopping = *self.shutdown.borrow();
        if stopping {
            return Err(TransportError::Closed);
        }
        let addr = self
            .address_of(&fingerprint)
            .ok_or_else(|| TransportError::Unreachable {
                peer: fingerprint,
                reason: "no known address".into(),
            })?;

        let connecting = self
            .endpoint
            .connect(addr, quic::SERVER_NAME)
            .map_err(|e| TransportError::Unreachable {
                peer: fingerprint,
                reason: e.to_string(),
            })?;

        let dialed = timeout(self.config.connect_timeout(), async {
            let conn = connecting.await.map_err(|e| TransportError::Unreachable {
                peer: fingerprint,
                reason: e.to_string(),
            })?;
            handshake::dial(&conn, &self.identity, fingerprint).await?;
            Ok::<_, TransportError>(conn)
        })
        .await
        .map_err(|_| TransportError::Unreachable {
            peer: fingerprint,
            reason: format!("dial to {addr} timed out"),
        })?;

        let conn = match dialed {
            Ok(conn) => conn,
            Err(e @ TransportError::StaleIdentity { .. }) => {
                warn!(peer = %fingerprint, %addr, "Address now hosts another identity");
                self.forget_address(&fingerprint, addr);
                return Err(e);
            }
            Err(e) => return Err(e),
        };

        debug!(peer = %fingerprint, %addr, "Dialed peer");
        let link = self.install_link(fingerprint, conn);
        let host = Arc::clone(self);
        let served = Arc::clone(&link);
        self.runtime.spawn(async move { host.serve(served).await });
        Ok(link)
    }

    // =========================================================================
    // FRAME EXCHANGE
    // =========================================================================

    /// Write `frame` to `fingerprint` and wait for its acknowledgement.
    ///
    /// Returns the response body that followed an accepting acknowledgement
    /// (empty for everything but query answers).
    pub async fn send_frame(
        self: &Arc<Self>,
        fingerprint: TransportFingerprint,
        frame: &Frame,
    ) -> Result<Bytes, TransportError> {
        let link = self.link(fingerprint).await?;
        let wire = frame.encode();

        let exchange = async {
            let (send, mut recv) = {
                let _write = link.write_lock.lock().await;
                let (mut send, recv) = link
                    .connection
                    .open_bi()
                    .await
                    .map_err(|e| TransportError::Stream(e.to_string()))?;
                send.write_all(&wire)
                    .await
                    .map_err(|e| TransportError::Stream(e.to_string()))?;
                send.finish()
                    .map_err(|e| TransportError::Stream(e.to_string()))?;
                (send, recv)
            };
            let response = recv
                .read_to_end(MAX_RESPONSE_LEN)
                .await
                .map_err(|e| TransportError::Stream(e.to_string()))?;
            drop(send);
            Ok::<_, TransportError>(response)
        };

        let response = match timeout(self.config.ack_timeout(), exchange).await {
            Ok(Ok(response)) => response,
            Ok(Err(e)) => {
                if !link.is_open() {
                    self.remove_link(&link);
                }
                return Err(e);
            }
            Err(_) => return Err(TransportError::AckTimeout),
        };

        trace!(peer = %fingerprint, id = %frame.id, kind = frame.kind.as_str(), "Frame acknowledged");
        match response.first().copied().map(Ack::from_byte) {
            Some(Ack::Accepted) => Ok(Bytes::from(response).slice(1..)),
            Some(Ack::Rejected) => Err(TransportError::Rejected),
            None => Err(TransportError::Stream("empty acknowledgement".into())),
        }
    }

    // =========================================================================
    // SHUTDOWN
    // =========================================================================

    /// Close every connection and the endpoint. In-flight streams are aborted.
    pub fn close(&self) {
        for (_, link) in self.links.lock().drain() {
            link.connection.close(SHUTDOWN_CODE, b"hub stopped");
        }
        self.endpoint.close(SHUTDOWN_CODE, b"hub stopped");
        info!(fingerprint = %self.fingerprint, "Transport host closed");
    }

    fn forget_address(&self, fingerprint: &TransportFingerprint, addr: SocketAddr) {
        let mut addresses = self.addresses.write();
        if addresses.get(fingerprint) == Some(&addr) {
            addresses.remove(fingerprint);
        }
    }
}

/// A caller's claim on a peer's dial lock.
struct DialSlot<'a> {
    host: &'a TransportHost,
    fingerprint: TransportFingerprint,
    lock: Arc<tokio::sync::Mutex<()>>,
}

impl Drop for DialSlot<'_> {
    fn drop(&mut self) {
        self.host.release_dial_lock(&self.fingerprint, &self.lock);
    }
}

impl AddressBook for TransportHost {
    fn address_of(&self, fingerprint: &TransportFingerprint) -> Option<SocketAddr> {
        if fingerprint == &self.fingerprint {
            return self.advertised_addr();
        }
        self.addresses.read().get(fingerprint).copied()
    }

    fn observe(&self, fingerprint: TransportFingerprint, addr: SocketAddr) {
        if fingerprint != self.fingerprint {
            self.addresses.write().insert(fingerprint, addr);
        }
    }

    fn hint(&self, fingerprint: TransportFingerprint, addr: SocketAddr) {
        if fingerprint != self.fingerprint {
            self.addresses.write().entry(fingerprint).or_insert(addr);
        }
    }
}

#[cfg(test)]
mod tests;
