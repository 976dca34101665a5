//! # Delivery Engine
//!
//! Turns submitted sends into acknowledged frames.
//!
//! ## Flow
//!
//! ```text
//! submit ──► attempt task ──► resolve recipient ──► send_frame ──► ack
//!                 ▲                                     │
//!                 │                                failure (reliable)
//!                 │                                     ▼
//!           retry scheduler ◄──────────── PendingSend (backoff)
//! ```
//!
//! - `submit` never blocks: every attempt runs on its own task.
//! - Account recipients are re-resolved on every attempt, so a retry follows
//!   a peer that re-registered under a new transport identity.
//! - A stale-identity failure invalidates the registration, which triggers
//!   rediscovery on the next lookup.
//! - Retries reuse the frame's message id; the receiver suppresses
//!   duplicates, so a frame whose acknowledgement was lost is still handed
//!   to the application once.

use std::collections::BinaryHeap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use hub_crypto::{AccountKey, TransportFingerprint};
use hub_telemetry::metrics;
use tokio::runtime::Handle;
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tokio::time::{sleep_until, Instant};
use tracing::{debug, trace, warn};

use crate::config::RetryPolicy;
use crate::domain::{Ack, Frame, PeerRegistry, PendingSend, Recipient, Scheduled};
use crate::errors::TransportError;
use crate::transport::TransportHost;

use super::dispatch::InboundDispatch;

/// Sleep used when nothing is scheduled.
const IDLE_WAKEUP: Duration = Duration::from_secs(3600);

/// Why one attempt failed.
#[derive(Debug)]
enum AttemptError {
    /// No registration for the account yet.
    Unresolved(AccountKey),
    Transport(TransportError),
}

impl AttemptError {
    fn is_retryable(&self) -> bool {
        match self {
            Self::Unresolved(_) => true,
            Self::Transport(e) => e.is_retryable(),
        }
    }
}

impl std::fmt::Display for AttemptError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Unresolved(account) => write!(f, "no registration for {account}"),
            Self::Transport(e) => e.fmt(f),
        }
    }
}

/// Delivers frames with retry.
pub struct DeliveryEngine {
    host: Arc<TransportHost>,
    registry: Arc<PeerRegistry>,
    dispatch: Arc<InboundDispatch>,
    policy: RetryPolicy,
    retries: mpsc::UnboundedSender<PendingSend>,
    runtime: Handle,
    shutdown: watch::Receiver<bool>,
    in_flight: AtomicUsize,
    pending: AtomicUsize,
}

impl DeliveryEngine {
    /// Create the engine and spawn its retry scheduler on `runtime`.
    pub fn spawn(
        runtime: Handle,
        host: Arc<TransportHost>,
        registry: Arc<PeerRegistry>,
        dispatch: Arc<InboundDispatch>,
        policy: RetryPolicy,
        shutdown: watch::Receiver<bool>,
    ) -> (Arc<Self>, JoinHandle<()>) {
        let (retries, scheduled) = mpsc::unbounded_channel();
        let engine = Arc::new(Self {
            host,
            registry,
            dispatch,
            policy,
            retries,
            runtime: runtime.clone(),
            shutdown: shutdown.clone(),
            in_flight: AtomicUsize::new(0),
            pending: AtomicUsize::new(0),
        });
        let scheduler = runtime.spawn(run_retry_scheduler(Arc::clone(&engine), scheduled, shutdown));
        (engine, scheduler)
    }

    /// Queue a send. Returns immediately.
    ///
    /// Safe to call from threads outside the runtime.
    pub fn submit(self: &Arc<Self>, recipient: Recipient, frame: Frame, reliable: bool) {
        if self.is_stopping() {
            debug!(%recipient, "Hub stopping, dropping send");
            return;
        }
        self.spawn_attempt(PendingSend::new(recipient, frame, reliable));
    }

    /// Sends currently being attempted.
    pub fn in_flight(&self) -> usize {
        self.in_flight.load(Ordering::Relaxed)
    }

    /// Reliable sends waiting for their next attempt.
    pub fn pending(&self) -> usize {
        self.pending.load(Ordering::Relaxed)
    }

    fn is_stopping(&self) -> bool {
        *self.shutdown.borrow()
    }

    fn spawn_attempt(self: &Arc<Self>, send: PendingSend) {
        self.in_flight.fetch_add(1, Ordering::Relaxed);
        let engine = Arc::clone(self);
        self.runtime.spawn(async move {
            engine.attempt(send).await;
            engine.in_flight.fetch_sub(1, Ordering::Relaxed);
        });
    }

    async fn attempt(&self, mut send: PendingSend) {
        send.attempt_count += 1;
        match self.try_deliver(&send).await {
            Ok(()) => {
                metrics::FRAMES_SENT
                    .with_label_values(&[send.frame.kind.as_str()])
                    .inc();
                metrics::DELIVERY_LATENCY.observe(send.submitted_at.elapsed().as_secs_f64());
                trace!(
                    recipient = %send.recipient,
                    id = %send.frame.id,
                    attempts = send.attempt_count,
                    "Frame delivered"
                );
            }
            Err(e) => self.on_failure(send, e),
        }
    }

    async fn try_deliver(&self, send: &PendingSend) -> Result<(), AttemptError> {
        let fingerprint = self.resolve(&send.recipient)?;

        if fingerprint == self.host.fingerprint() {
            let reply = self
                .dispatch
                .handle_frame(&*self.host, fingerprint, None, send.frame.clone());
            return match reply.ack {
                Ack::Accepted => Ok(()),
                Ack::Rejected => Err(AttemptError::Transport(TransportError::Rejected)),
            };
        }

        match self.host.send_frame(fingerprint, &send.frame).await {
            Ok(_) => Ok(()),
            Err(e) => {
                if e.is_stale() {
                    self.forget_registration(&send.recipient, &fingerprint);
                }
                Err(AttemptError::Transport(e))
            }
        }
    }

    fn resolve(&self, recipient: &Recipient) -> Result<TransportFingerprint, AttemptError> {
        match recipient {
            Recipient::Account(account) => self
                .registry
                .lookup(account)
                .ok_or(AttemptError::Unresolved(*account)),
            Recipient::Transport(fingerprint) => Ok(*fingerprint),
        }
    }

    fn forget_registration(&self, recipient: &Recipient, fingerprint: &TransportFingerprint) {
        if let Recipient::Account(account) = recipient {
            if self.registry.invalidate(account, fingerprint) {
                self.registry.request_rediscovery(account);
            }
        }
    }

    fn on_failure(&self, mut send: PendingSend, error: AttemptError) {
        if self.is_stopping() {
            return;
        }

        if !send.reliable {
            debug!(recipient = %send.recipient, %error, "Best-effort send dropped");
            metrics::SENDS_ABANDONED.with_label_values(&["best_effort"]).inc();
            return;
        }
        if !error.is_retryable() {
            warn!(recipient = %send.recipient, id = %send.frame.id, %error, "Send rejected, not retrying");
            metrics::SENDS_ABANDONED.with_label_values(&["rejected"]).inc();
            return;
        }
        if !send.schedule_retry(&self.policy, Instant::now()) {
            warn!(
                recipient = %send.recipient,
                id = %send.frame.id,
                attempts = send.attempt_count,
                %error,
                "Giving up on send"
            );
            metrics::SENDS_ABANDONED.with_label_values(&["exhausted"]).inc();
            return;
        }

        trace!(
            recipient = %send.recipient,
            attempt = send.attempt_count,
            %error,
            "Send failed, retry scheduled"
        );
        metrics::SEND_RETRIES.inc();
        // Released by the scheduler when the retry is spawned.
        self.pending.fetch_add(1, Ordering::Relaxed);
        if self.retries.send(send).is_err() {
            self.pending.fetch_sub(1, Ordering::Relaxed);
            debug!("Retry scheduler gone, dropping send");
        }
    }
}

/// Hold failed sends until they are due, then re-attempt them.
async fn run_retry_scheduler(
    engine: Arc<DeliveryEngine>,
    mut incoming: mpsc::UnboundedReceiver<PendingSend>,
    mut shutdown: watch::Receiver<bool>,
) {
    let mut heap: BinaryHeap<Scheduled> = BinaryHeap::new();
    let mut seq = 0u64;

    loop {
        let wake_at = heap
            .peek()
            .map(Scheduled::due)
            .unwrap_or_else(|| Instant::now() + IDLE_WAKEUP);

        tokio::select! {
            _ = shutdown.changed() => break,
            send = incoming.recv() => {
                let Some(send) = send else { break };
                heap.push(Scheduled::new(send, seq));
                seq += 1;
            }
            _ = sleep_until(wake_at) => {
                let now = Instant::now();
                while heap.peek().is_some_and(|s| s.due() <= now) {
                    if let Some(due) = heap.pop() {
                        engine.spawn_attempt(due.send);
                        engine.pending.fetch_sub(1, Ordering::Relaxed);
                    }
                }
            }
        }

        metrics::PENDING_SENDS.set(heap.len() as f64);
    }

    if !heap.is_empty() {
        debug!(abandoned = heap.len(), "Retry scheduler stopped with sends pending");
    }
    engine.pending.store(0, Ordering::Relaxed);
    metrics::PENDING_SENDS.set(0.0);
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_unresolved_is_retryable() {
        let account = hub_crypto::AccountKeyPair::generate().account_key();
        assert!(AttemptError::Unresolved(account).is_retryable());
        assert!(AttemptError::Transport(TransportError::AckTimeout).is_retryable());
        assert!(!AttemptError::Transport(TransportError::Rejected).is_retryable());
        assert!(!AttemptError::Transport(TransportError::Closed).is_retryable());
    }
}
