//! # Inbound Dispatch
//!
//! Reads one frame per accepted stream, classifies it by kind and routes it:
//!
//! | Kind | Destination |
//! |------|-------------|
//! | Application | installed handler, or the boundary queue when none is installed |
//! | Announcement | peer registry (verified first) |
//! | Query | answered from the peer registry |
//!
//! Every frame gets an acknowledgement. A malformed frame is rejected and
//! logged; the connection and its other streams carry on.

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use bytes::Bytes;
use hub_crypto::TransportFingerprint;
use hub_telemetry::metrics;
use parking_lot::RwLock;
use tokio::runtime::Handle;
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tokio::time::timeout;
use tracing::{debug, trace, warn};

use crate::config::HubConfig;
use crate::domain::registration::decode_query;
use crate::domain::{
    Ack, Announcement, BoundaryQueue, Frame, FrameKind, InstallOutcome, PeerRegistry, PushOutcome,
    RecentMessages, SharedRecentMessages, FRAME_HEADER_LEN,
};
use crate::ports::outbound::{AddressBook, MessageHandler};
use crate::transport::{InboundStream, TransportHost};

/// What goes back on the stream.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Reply {
    /// Acknowledgement byte.
    pub ack: Ack,
    /// Response body; only query answers carry one.
    pub body: Bytes,
}

impl Reply {
    fn accepted() -> Self {
        Self {
            ack: Ack::Accepted,
            body: Bytes::new(),
        }
    }

    fn rejected() -> Self {
        Self {
            ack: Ack::Rejected,
            body: Bytes::new(),
        }
    }

    fn with_body(body: Bytes) -> Self {
        Self {
            ack: Ack::Accepted,
            body,
        }
    }
}

/// Routes inbound frames.
pub struct InboundDispatch {
    registry: Arc<PeerRegistry>,
    queue: Arc<BoundaryQueue>,
    handler: RwLock<Option<Arc<dyn MessageHandler>>>,
    recent: SharedRecentMessages,
    max_frame_size: usize,
    read_timeout: Duration,
}

impl InboundDispatch {
    /// Dispatcher writing to `registry` and `queue`.
    pub fn new(registry: Arc<PeerRegistry>, queue: Arc<BoundaryQueue>, config: &HubConfig) -> Self {
        let recent = RecentMessages::shared(config.dedup_capacity);
        Self::with_recent(registry, queue, config, recent)
    }

    /// Dispatcher suppressing duplicates against an existing cache.
    pub fn with_recent(
        registry: Arc<PeerRegistry>,
        queue: Arc<BoundaryQueue>,
        config: &HubConfig,
        recent: SharedRecentMessages,
    ) -> Self {
        Self {
            registry,
            queue,
            handler: RwLock::new(None),
            recent,
            max_frame_size: config.max_frame_size,
            read_timeout: config.ack_timeout(),
        }
    }

    /// The duplicate-suppression cache.
    pub fn recent(&self) -> SharedRecentMessages {
        Arc::clone(&self.recent)
    }

    /// Atomically replace the application handler.
    ///
    /// Frames already being dispatched finish on the handler they started with.
    pub fn set_handler(&self, handler: Arc<dyn MessageHandler>) {
        *self.handler.write() = Some(handler);
    }

    /// Remove the handler; later frames go to the boundary queue.
    pub fn clear_handler(&self) {
        *self.handler.write() = None;
    }

    /// Whether a handler is installed.
    pub fn has_handler(&self) -> bool {
        self.handler.read().is_some()
    }

    // =========================================================================
    // STREAM LOOP
    // =========================================================================

    /// Serve streams from `inbound` until shutdown.
    pub fn spawn_loop(
        self: &Arc<Self>,
        runtime: &Handle,
        host: Arc<TransportHost>,
        mut inbound: mpsc::Receiver<InboundStream>,
        mut shutdown: watch::Receiver<bool>,
    ) -> JoinHandle<()> {
        let dispatch = Arc::clone(self);
        let spawner = runtime.clone();
        runtime.spawn(async move {
            loop {
                tokio::select! {
                    _ = shutdown.changed() => break,
                    stream = inbound.recv() => {
                        let Some(stream) = stream else { break };
                        let dispatch = Arc::clone(&dispatch);
                        let host = Arc::clone(&host);
                        spawner.spawn(async move { dispatch.serve_stream(&host, stream).await });
                    }
                }
            }
            debug!("Inbound dispatch stopped");
        })
    }

    async fn serve_stream(&self, book: &TransportHost, mut stream: InboundStream) {
        let limit = FRAME_HEADER_LEN + self.max_frame_size;
        let reply = match timeout(self.read_timeout, stream.recv.read_to_end(limit)).await {
            Ok(Ok(bytes)) => match Frame::decode(&bytes, self.max_frame_size) {
                Ok(frame) => self.handle_frame(book, stream.remote, Some(stream.remote_addr), frame),
                Err(e) => {
                    warn!(peer = %stream.remote, error = %e, "Rejecting malformed frame");
                    metrics::FRAMES_REJECTED.inc();
                    Reply::rejected()
                }
            },
            Ok(Err(quinn::ReadToEndError::TooLong)) => {
                warn!(peer = %stream.remote, limit, "Rejecting oversized frame");
                metrics::FRAMES_REJECTED.inc();
                Reply::rejected()
            }
            Ok(Err(e)) => {
                debug!(peer = %stream.remote, error = %e, "Inbound stream failed");
                return;
            }
            Err(_) => {
                debug!(peer = %stream.remote, "Inbound stream timed out");
                return;
            }
        };

        let written = async {
            stream.send.write_all(&[reply.ack as u8]).await?;
            if !reply.body.is_empty() {
                stream.send.write_all(&reply.body).await?;
            }
            Ok::<_, quinn::WriteError>(())
        }
        .await;
        match written {
            Ok(()) => {
                let _ = stream.send.finish();
            }
            Err(e) => debug!(peer = %stream.remote, error = %e, "Failed to acknowledge frame"),
        }
    }

    // =========================================================================
    // ROUTING
    // =========================================================================

    /// Route one decoded frame from `origin` and build the reply.
    pub fn handle_frame(
        &self,
        book: &dyn AddressBook,
        origin: TransportFingerprint,
        origin_addr: Option<SocketAddr>,
        frame: Frame,
    ) -> Reply {
        metrics::FRAMES_RECEIVED
            .with_label_values(&[frame.kind.as_str()])
            .inc();
        match frame.kind {
            FrameKind::Application => {
                if !self.has_handler() && frame.payload.len() > self.queue.max_payload() {
                    warn!(
                        peer = %origin,
                        len = frame.payload.len(),
                        limit = self.queue.max_payload(),
                        "Rejecting frame too large for the boundary queue"
                    );
                    metrics::FRAMES_REJECTED.inc();
                    return Reply::rejected();
                }
                self.deliver(frame);
                Reply::accepted()
            }
            FrameKind::Announcement => self.on_announcement(book, origin, origin_addr, &frame.payload),
            FrameKind::Query => self.on_query(book, origin, &frame.payload),
        }
    }

    /// Hand an application frame to the handler or the queue.
    ///
    /// Returns `false` if the frame was a suppressed duplicate.
    pub fn deliver(&self, frame: Frame) -> bool {
        if !self.recent.lock().insert(frame.id) {
            metrics::DUPLICATES_SUPPRESSED.inc();
            trace!(id = %frame.id, "Suppressed duplicate frame");
            return false;
        }

        let handler = self.handler.read().clone();
        match handler {
            Some(handler) => handler.handle(&frame.payload),
            None => match self.queue.push(frame.payload) {
                PushOutcome::Queued => {}
                PushOutcome::Evicted => {
                    debug!(capacity = self.queue.capacity(), "Boundary queue full, evicted oldest frame");
                }
                PushOutcome::Oversized => {
                    debug!(id = %frame.id, "Frame too large for the boundary queue, dropped");
                }
            },
        }
        true
    }

    fn on_announcement(
        &self,
        book: &dyn AddressBook,
        origin: TransportFingerprint,
        origin_addr: Option<SocketAddr>,
        payload: &[u8],
    ) -> Reply {
        let announcement = match Announcement::decode(payload) {
            Ok(a) => a,
            Err(e) => {
                warn!(peer = %origin, error = %e, "Rejecting malformed announcement");
                metrics::FRAMES_REJECTED.inc();
                return Reply::rejected();
            }
        };

        let record = announcement.record;
        match self.registry.install(record) {
            InstallOutcome::Rejected => return Reply::rejected(),
            // Well-formed but superseded; nothing to learn from it.
            InstallOutcome::Stale => return Reply::accepted(),
            _ => {}
        }

        // The announcer's own connection address is authenticated; relayed
        // hints are not.
        match origin_addr {
            Some(addr) if record.fingerprint == origin => book.observe(origin, addr),
            _ => {
                if let Some(hint) = announcement.addr {
                    book.hint(record.fingerprint, hint);
                }
            }
        }
        Reply::accepted()
    }

    fn on_query(&self, book: &dyn AddressBook, origin: TransportFingerprint, payload: &[u8]) -> Reply {
        let account = match decode_query(payload) {
            Ok(account) => account,
            Err(e) => {
                warn!(peer = %origin, error = %e, "Rejecting malformed query");
                metrics::FRAMES_REJECTED.inc();
                return Reply::rejected();
            }
        };

        match self.registry.record(&account) {
            Some(record) => {
                trace!(peer = %origin, %account, "Answering rediscovery query");
                Reply::with_body(
                    Announcement {
                        record,
                        addr: book.address_of(&record.fingerprint),
                    }
                    .encode(),
                )
            }
            None => Reply::accepted(),
        }
    }
}
