//! Pending sends and their recipients.

use std::cmp::Ordering;
use std::fmt;

use hub_crypto::{AccountKey, TransportFingerprint};
use tokio::time::Instant;

use super::Frame;
use crate::config::RetryPolicy;

/// Who a frame is addressed to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Recipient {
    /// A validator account; resolved through the registry on every attempt.
    Account(AccountKey),
    /// A transport identity, used for bootstrap traffic.
    Transport(TransportFingerprint),
}

impl fmt::Display for Recipient {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Account(key) => write!(f, "account:{key}"),
            Self::Transport(fp) => write!(f, "transport:{fp}"),
        }
    }
}

/// A send that has not been acknowledged yet.
#[derive(Debug, Clone)]
pub struct PendingSend {
    /// Target.
    pub recipient: Recipient,
    /// Frame to deliver; retries reuse its message id.
    pub frame: Frame,
    /// Retry on failure.
    pub reliable: bool,
    /// Attempts made so far.
    pub attempt_count: u32,
    /// When the next attempt is due.
    pub next_retry_at: Instant,
    /// When the send was submitted.
    pub submitted_at: Instant,
}

impl PendingSend {
    /// New send, due immediately.
    pub fn new(recipient: Recipient, frame: Frame, reliable: bool) -> Self {
        let now = Instant::now();
        Self {
            recipient,
            frame,
            reliable,
            attempt_count: 0,
            next_retry_at: now,
            submitted_at: now,
        }
    }

    /// Schedule the next attempt after a failure.
    ///
    /// Returns `false` when the policy's ceiling has been reached.
    pub fn schedule_retry(&mut self, policy: &RetryPolicy, now: Instant) -> bool {
        if !self.reliable || !policy.allows_retry(self.attempt_count) {
            return false;
        }
        self.next_retry_at = now + policy.backoff(self.attempt_count);
        true
    }
}

/// Heap entry ordering pending sends by due time, earliest first.
#[derive(Debug)]
pub struct Scheduled {
    seq: u64,
    /// The send.
    pub send: PendingSend,
}

impl Scheduled {
    /// Wrap `send`; `seq` breaks ties between equal due times.
    pub fn new(send: PendingSend, seq: u64) -> Self {
        Self { seq, send }
    }

    /// Due time.
    pub fn due(&self) -> Instant {
        self.send.next_retry_at
    }
}

impl PartialEq for Scheduled {
    fn eq(&self, other: &Self) -> bool {
        self.cmp(other) == Ordering::Equal
    }
}

impl Eq for Scheduled {}

impl PartialOrd for Scheduled {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for Scheduled {
    // Reversed so `BinaryHeap` pops the earliest due time.
    fn cmp(&self, other: &Self) -> Ordering {
        other
            .due()
            .cmp(&self.due())
            .then_with(|| other.seq.cmp(&self.seq))
    }
}
