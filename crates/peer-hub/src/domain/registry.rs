//! # Peer Registry
//!
//! Authoritative account key → transport fingerprint map, written only with
//! verified registration records.
//!
//! ## Invariants
//!
//! - At most one live record per account key; a valid record with a higher
//!   sequence number replaces an earlier one.
//! - A record whose signatures do not verify is never installed.
//! - A record older than the newest one seen for its account is never
//!   installed, even after that newest one has been invalidated.
//! - Invalidation removes a record only if it still names the fingerprint
//!   that failed, so a newer registration is never clobbered.

use std::collections::HashMap;

use hub_crypto::{AccountKey, TransportFingerprint};
use hub_telemetry::metrics;
use parking_lot::RwLock;
use tracing::{debug, info, warn};

use super::RegistrationRecord;
use crate::ports::outbound::RediscoveryRequester;

/// Result of [`PeerRegistry::install`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InstallOutcome {
    /// First record for the account.
    Installed,
    /// Replaced a record naming another fingerprint.
    Superseded {
        /// Fingerprint of the replaced record.
        previous: TransportFingerprint,
    },
    /// Same binding already present.
    Unchanged,
    /// Older than the newest record seen for the account; nothing changed.
    Stale,
    /// Signature did not verify; nothing changed.
    Rejected,
}

impl InstallOutcome {
    /// Whether the record is now live.
    pub fn is_live(&self) -> bool {
        !matches!(self, Self::Rejected | Self::Stale)
    }

    fn as_str(&self) -> &'static str {
        match self {
            Self::Installed => "installed",
            Self::Superseded { .. } => "superseded",
            Self::Unchanged => "unchanged",
            Self::Stale => "stale",
            Self::Rejected => "rejected",
        }
    }
}

#[derive(Default)]
struct Records {
    live: HashMap<AccountKey, RegistrationRecord>,
    /// Newest `(seq, fingerprint)` seen per account. Survives invalidation.
    newest: HashMap<AccountKey, (u64, TransportFingerprint)>,
}

impl Records {
    fn install(&mut self, record: RegistrationRecord) -> InstallOutcome {
        if let Some((seq, fingerprint)) = self.newest.get(&record.account) {
            let older = record.seq < *seq || (record.seq == *seq && record.fingerprint != *fingerprint);
            if older {
                return InstallOutcome::Stale;
            }
        }
        self.newest
            .insert(record.account, (record.seq, record.fingerprint));
        match self.live.insert(record.account, record) {
            None => InstallOutcome::Installed,
            Some(prev) if prev.fingerprint == record.fingerprint => InstallOutcome::Unchanged,
            Some(prev) => InstallOutcome::Superseded {
                previous: prev.fingerprint,
            },
        }
    }
}

/// Registry of verified registration records.
pub struct PeerRegistry {
    records: RwLock<Records>,
    local: RwLock<Option<RegistrationRecord>>,
    rediscovery: Option<Box<dyn RediscoveryRequester>>,
}

impl Default for PeerRegistry {
    fn default() -> Self {
        Self::new()
    }
}

impl PeerRegistry {
    /// Registry that never asks for rediscovery.
    pub fn new() -> Self {
        Self {
            records: RwLock::new(Records::default()),
            local: RwLock::new(None),
            rediscovery: None,
        }
    }

    /// Registry that reports lookup misses to `rediscovery`.
    pub fn with_rediscovery(rediscovery: Box<dyn RediscoveryRequester>) -> Self {
        Self {
            rediscovery: Some(rediscovery),
            ..Self::new()
        }
    }

    /// Install `record` if its signatures verify and it is not older than
    /// the newest record seen for the account.
    pub fn install(&self, record: RegistrationRecord) -> InstallOutcome {
        let outcome = if !record.verify() {
            warn!(
                account = %record.account,
                fingerprint = %record.fingerprint,
                "Discarding registration with invalid signature"
            );
            InstallOutcome::Rejected
        } else {
            let mut records = self.records.write();
            let outcome = records.install(record);
            metrics::KNOWN_PEERS.set(records.live.len() as f64);
            outcome
        };

        metrics::REGISTRATIONS
            .with_label_values(&[outcome.as_str()])
            .inc();
        match outcome {
            InstallOutcome::Installed => info!(
                account = %record.account,
                fingerprint = %record.fingerprint,
                "Registered peer"
            ),
            InstallOutcome::Superseded { previous } => info!(
                account = %record.account,
                fingerprint = %record.fingerprint,
                %previous,
                "Peer changed transport identity"
            ),
            InstallOutcome::Stale => debug!(
                account = %record.account,
                fingerprint = %record.fingerprint,
                seq = record.seq,
                "Ignoring stale registration"
            ),
            InstallOutcome::Unchanged | InstallOutcome::Rejected => {}
        }
        outcome
    }

    /// Install the hub's own record and remember it for announcements.
    ///
    /// Repeat calls replace the outgoing record.
    pub fn set_local(&self, record: RegistrationRecord) -> InstallOutcome {
        let outcome = self.install(record);
        if outcome.is_live() {
            *self.local.write() = Some(record);
        }
        outcome
    }

    /// The hub's own record, once registered.
    pub fn local(&self) -> Option<RegistrationRecord> {
        *self.local.read()
    }

    /// Current fingerprint for `account`.
    ///
    /// A miss asks for rediscovery and returns immediately.
    pub fn lookup(&self, account: &AccountKey) -> Option<TransportFingerprint> {
        let found = self.peek(account);
        if found.is_none() {
            debug!(%account, "Unknown account");
            self.request_rediscovery(account);
        }
        found
    }

    /// Ask the bootstrap set for the current record of `account`.
    pub fn request_rediscovery(&self, account: &AccountKey) {
        if let Some(rediscovery) = &self.rediscovery {
            rediscovery.request(*account);
        }
    }

    /// Current fingerprint for `account`, without side effects.
    pub fn peek(&self, account: &AccountKey) -> Option<TransportFingerprint> {
        self.records.read().live.get(account).map(|r| r.fingerprint)
    }

    /// Full record for `account`.
    pub fn record(&self, account: &AccountKey) -> Option<RegistrationRecord> {
        self.records.read().live.get(account).copied()
    }

    /// Drop the record for `account` if it still names `fingerprint`.
    pub fn invalidate(&self, account: &AccountKey, fingerprint: &TransportFingerprint) -> bool {
        if self.local().is_some_and(|r| &r.account == account) {
            return false;
        }

        let mut records = self.records.write();
        let removed = match records.live.get(account) {
            Some(r) if &r.fingerprint == fingerprint => records.live.remove(account).is_some(),
            _ => false,
        };
        metrics::KNOWN_PEERS.set(records.live.len() as f64);
        drop(records);

        if removed {
            debug!(%account, %fingerprint, "Invalidated registration");
        }
        removed
    }

    /// Number of live records (including the local one).
    pub fn len(&self) -> usize {
        self.records.read().live.len()
    }

    /// Whether no records are live.
    pub fn is_empty(&self) -> bool {
        self.records.read().live.is_empty()
    }
}
