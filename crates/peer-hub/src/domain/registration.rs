//! # Registration Records
//!
//! A record binds an account key to a transport fingerprint. It is valid iff
//! the account signature verifies over the fingerprint bytes and the
//! transport identity attests to the sequence number.
//!
//! The account signature is produced once, outside the hub, and never
//! changes for a given fingerprint. The sequence number orders records for
//! the same account, so the attestation is made by the transport key, which
//! the hub holds.
//!
//! ## Wire Format
//!
//! ```text
//! Record:       [account_key(33)] [fingerprint(32)] [signature(65)] [seq(8), LE] [attestation(64)]
//! Announcement: [record(202)] [hint_len(1)] [hint(hint_len), UTF-8 "host:port"]
//! Query:        [account_key(33)]
//! ```

use std::net::SocketAddr;
use std::time::{SystemTime, UNIX_EPOCH};

use bytes::{BufMut, Bytes, BytesMut};
use hub_crypto::account::{self, ACCOUNT_KEY_LEN, ACCOUNT_SIGNATURE_LEN};
use hub_crypto::transport::{FINGERPRINT_LEN, TRANSPORT_SIGNATURE_LEN};
use hub_crypto::{
    AccountKey, AccountSignature, CryptoError, TransportFingerprint, TransportKeyPair,
    TransportSignature,
};

use super::FrameError;

/// Encoded record length.
pub const RECORD_LEN: usize =
    ACCOUNT_KEY_LEN + FINGERPRINT_LEN + ACCOUNT_SIGNATURE_LEN + SEQ_LEN + TRANSPORT_SIGNATURE_LEN;

const SEQ_LEN: usize = 8;

/// Domain tag for the transport attestation.
const ATTESTATION_TAG: &[u8] = b"peer-hub/registration/v1";

/// Account key ↔ transport fingerprint binding.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RegistrationRecord {
    /// Long-term account key.
    pub account: AccountKey,
    /// Transport identity speaking for the account.
    pub fingerprint: TransportFingerprint,
    /// Account signature over the fingerprint.
    pub signature: AccountSignature,
    /// Registration order for the account; higher wins.
    pub seq: u64,
    /// Transport signature over the account key and `seq`.
    pub attestation: TransportSignature,
}

impl RegistrationRecord {
    /// Build a record for `identity`, attesting `seq`.
    ///
    /// The account signature is not checked here; see [`Self::verify`].
    pub fn new(
        account: AccountKey,
        identity: &TransportKeyPair,
        signature: AccountSignature,
        seq: u64,
    ) -> Self {
        Self {
            account,
            fingerprint: identity.fingerprint(),
            signature,
            seq,
            attestation: identity.sign(&attestation_message(&account, seq)),
        }
    }

    /// Build a record from the signature alone, recovering the account key.
    pub fn recover(
        identity: &TransportKeyPair,
        signature: AccountSignature,
        seq: u64,
    ) -> Result<Self, CryptoError> {
        let account = account::recover(identity.fingerprint().as_bytes(), &signature)?;
        Ok(Self::new(account, identity, signature, seq))
    }

    /// Whether the account signature binds this account key to this
    /// fingerprint and the fingerprint attests to `seq`.
    pub fn verify(&self) -> bool {
        account::verify(self.fingerprint.as_bytes(), &self.signature, &self.account)
            && self
                .fingerprint
                .verify(&attestation_message(&self.account, self.seq), &self.attestation)
                .is_ok()
    }

    /// Fixed-length encoding.
    pub fn encode(&self, buf: &mut BytesMut) {
        buf.put_slice(self.account.as_bytes());
        buf.put_slice(self.fingerprint.as_bytes());
        buf.put_slice(self.signature.as_bytes());
        buf.put_u64_le(self.seq);
        buf.put_slice(self.attestation.as_bytes());
    }

    /// Decode the fixed-length encoding. Does not verify the signatures.
    pub fn decode(bytes: &[u8]) -> Result<Self, FrameError> {
        if bytes.len() != RECORD_LEN {
            return Err(malformed(
                "announcement",
                format!("record is {} bytes, expected {RECORD_LEN}", bytes.len()),
            ));
        }
        let (account, rest) = bytes.split_at(ACCOUNT_KEY_LEN);
        let (fingerprint, rest) = rest.split_at(FINGERPRINT_LEN);
        let (signature, rest) = rest.split_at(ACCOUNT_SIGNATURE_LEN);
        let (seq, attestation) = rest.split_at(SEQ_LEN);

        let mut seq_bytes = [0u8; SEQ_LEN];
        seq_bytes.copy_from_slice(seq);
        let mut attestation_bytes = [0u8; TRANSPORT_SIGNATURE_LEN];
        attestation_bytes.copy_from_slice(attestation);

        Ok(Self {
            account: AccountKey::from_slice(account)
                .map_err(|e| malformed("announcement", e.to_string()))?,
            fingerprint: TransportFingerprint::from_slice(fingerprint)
                .map_err(|e| malformed("announcement", e.to_string()))?,
            signature: AccountSignature::from_slice(signature)
                .map_err(|e| malformed("announcement", e.to_string()))?,
            seq: u64::from_le_bytes(seq_bytes),
            attestation: TransportSignature::from_bytes(attestation_bytes),
        })
    }
}

/// Message the transport identity signs for a record.
fn attestation_message(account: &AccountKey, seq: u64) -> Vec<u8> {
    let mut message = Vec::with_capacity(ATTESTATION_TAG.len() + ACCOUNT_KEY_LEN + SEQ_LEN);
    message.extend_from_slice(ATTESTATION_TAG);
    message.extend_from_slice(account.as_bytes());
    message.extend_from_slice(&seq.to_le_bytes());
    message
}

/// Sequence number for a fresh registration: wall-clock milliseconds, kept
/// strictly above `previous`.
pub fn next_seq(previous: Option<u64>) -> u64 {
    let now = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map_or(0, |d| u64::try_from(d.as_millis()).unwrap_or(u64::MAX));
    match previous {
        Some(prev) => now.max(prev.saturating_add(1)),
        None => now,
    }
}

/// A record plus an unsigned address hint.
///
/// The hint needs no signature: whoever dials it must still prove the
/// fingerprint in the identity handshake.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Announcement {
    /// The signed binding.
    pub record: RegistrationRecord,
    /// Where the fingerprint was last reachable.
    pub addr: Option<SocketAddr>,
}

impl Announcement {
    /// Encode as a frame payload.
    pub fn encode(&self) -> Bytes {
        let hint = self.addr.map(|a| a.to_string()).unwrap_or_default();
        let mut buf = BytesMut::with_capacity(RECORD_LEN + 1 + hint.len());
        self.record.encode(&mut buf);
        buf.put_u8(hint.len() as u8);
        buf.put_slice(hint.as_bytes());
        buf.freeze()
    }

    /// Decode a frame payload. Does not verify the signature.
    pub fn decode(bytes: &[u8]) -> Result<Self, FrameError> {
        if bytes.len() < RECORD_LEN + 1 {
            return Err(malformed("announcement", "too short".into()));
        }
        let record = RegistrationRecord::decode(&bytes[..RECORD_LEN])?;
        let hint_len = bytes[RECORD_LEN] as usize;
        let hint = &bytes[RECORD_LEN + 1..];
        if hint.len() != hint_len {
            return Err(malformed(
                "announcement",
                format!("hint is {} bytes, header says {hint_len}", hint.len()),
            ));
        }

        let addr = if hint.is_empty() {
            None
        } else {
            let text = std::str::from_utf8(hint)
                .map_err(|_| malformed("announcement", "hint is not UTF-8".into()))?;
            Some(
                text.parse()
                    .map_err(|_| malformed("announcement", format!("bad hint {text:?}")))?,
            )
        };

        Ok(Self { record, addr })
    }
}

/// Encode a rediscovery query.
pub fn encode_query(account: &AccountKey) -> Bytes {
    Bytes::copy_from_slice(account.as_bytes())
}

/// Decode a rediscovery query.
pub fn decode_query(bytes: &[u8]) -> Result<AccountKey, FrameError> {
    AccountKey::from_slice(bytes).map_err(|e| malformed("query", e.to_string()))
}

fn malformed(kind: &'static str, reason: String) -> FrameError {
    FrameError::MalformedPayload { kind, reason }
}
