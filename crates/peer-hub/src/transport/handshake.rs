//! # Identity Handshake
//!
//! Runs on the first bidirectional stream of every connection and proves
//! both transport fingerprints.
//!
//! ## Messages
//!
//! ```text
//! 1. dialer   -> acceptor: [dialer_fp(32)] [dialer_nonce(32)] [expected_fp(32)]
//! 2. acceptor -> dialer:   [acceptor_fp(32)] [acceptor_nonce(32)] [sig(64)]
//!                          sig = Sign_acceptor(DOMAIN | session | dialer_nonce | acceptor_fp)
//! 3. dialer   -> acceptor: [sig(64)]
//!                          sig = Sign_dialer(DOMAIN | session | acceptor_nonce | dialer_fp)
//! ```
//!
//! `session` is keying material exported from the connection's TLS session.
//! Both ends of one session derive the same value, while a relay sitting
//! between two sessions sees two different ones, so a proof forwarded
//! across a relay does not verify.
//!
//! An acceptor that is not `expected_fp` closes the connection with
//! [`STALE_IDENTITY_CODE`], which the dialer reports as
//! [`TransportError::StaleIdentity`] without waiting for a timeout.

use hub_crypto::transport::{FINGERPRINT_LEN, TRANSPORT_SIGNATURE_LEN};
use hub_crypto::{TransportFingerprint, TransportKeyPair, TransportSignature};
use quinn::{Connection, ConnectionError, VarInt};

use crate::errors::TransportError;

/// Domain separator for handshake signatures.
const DOMAIN: &[u8] = b"peer-hub/handshake/v2";

/// TLS exporter label for the session binding.
const EXPORTER_LABEL: &[u8] = b"EXPORTER-peer-hub-identity";

const NONCE_LEN: usize = 32;
const SESSION_BINDING_LEN: usize = 32;
const DIALER_HELLO_LEN: usize = FINGERPRINT_LEN + NONCE_LEN + FINGERPRINT_LEN;
const ACCEPTOR_HELLO_LEN: usize = FINGERPRINT_LEN + NONCE_LEN + TRANSPORT_SIGNATURE_LEN;

/// Connection close code: the dialer expected someone else.
pub const STALE_IDENTITY_CODE: VarInt = VarInt::from_u32(0x5e1f);

/// Connection close code: the handshake failed.
pub const HANDSHAKE_FAILED_CODE: VarInt = VarInt::from_u32(0x0bad);

pub(super) type SessionBinding = [u8; SESSION_BINDING_LEN];

/// Keying material unique to this connection's TLS session.
pub(super) fn session_binding(conn: &Connection) -> Result<SessionBinding, TransportError> {
    let mut binding = [0u8; SESSION_BINDING_LEN];
    conn.export_keying_material(&mut binding, EXPORTER_LABEL, &[])
        .map_err(|_| TransportError::Handshake("TLS keying material unavailable".into()))?;
    Ok(binding)
}

/// Bytes each side signs.
fn challenge(session: &SessionBinding, nonce: &[u8; NONCE_LEN], signer: &TransportFingerprint) -> Vec<u8> {
    let mut msg = Vec::with_capacity(DOMAIN.len() + SESSION_BINDING_LEN + NONCE_LEN + FINGERPRINT_LEN);
    msg.extend_from_slice(DOMAIN);
    msg.extend_from_slice(session);
    msg.extend_from_slice(nonce);
    msg.extend_from_slice(signer.as_bytes());
    msg
}

fn fingerprint_at(bytes: &[u8], offset: usize) -> Result<TransportFingerprint, TransportError> {
    TransportFingerprint::from_slice(&bytes[offset..offset + FINGERPRINT_LEN])
        .map_err(|e| TransportError::Handshake(format!("bad fingerprint: {e}")))
}

fn nonce_at(bytes: &[u8], offset: usize) -> [u8; NONCE_LEN] {
    let mut nonce = [0u8; NONCE_LEN];
    nonce.copy_from_slice(&bytes[offset..offset + NONCE_LEN]);
    nonce
}

fn signature_at(bytes: &[u8], offset: usize) -> TransportSignature {
    let mut sig = [0u8; TRANSPORT_SIGNATURE_LEN];
    sig.copy_from_slice(&bytes[offset..offset + TRANSPORT_SIGNATURE_LEN]);
    TransportSignature::from_bytes(sig)
}

/// Map a stream failure, recognising the acceptor's stale-identity close.
fn stream_failure(conn: &Connection, expected: TransportFingerprint, err: impl ToString) -> TransportError {
    match conn.close_reason() {
        Some(ConnectionError::ApplicationClosed(close)) if close.error_code == STALE_IDENTITY_CODE => {
            TransportError::StaleIdentity {
                expected,
                found: None,
            }
        }
        _ => TransportError::Handshake(err.to_string()),
    }
}

/// Dialer side. Succeeds only if the remote proves `expected`.
pub async fn dial(
    conn: &Connection,
    identity: &TransportKeyPair,
    expected: TransportFingerprint,
) -> Result<(), TransportError> {
    let local = identity.fingerprint();
    let session = session_binding(conn)?;
    let (mut send, mut recv) = conn
        .open_bi()
        .await
        .map_err(|e| stream_failure(conn, expected, e))?;

    let nonce: [u8; NONCE_LEN] = rand::random();
    let mut hello = Vec::with_capacity(DIALER_HELLO_LEN);
    hello.extend_from_slice(local.as_bytes());
    hello.extend_from_slice(&nonce);
    hello.extend_from_slice(expected.as_bytes());
    send.write_all(&hello)
        .await
        .map_err(|e| stream_failure(conn, expected, e))?;

    let mut reply = [0u8; ACCEPTOR_HELLO_LEN];
    recv.read_exact(&mut reply)
        .await
        .map_err(|e| stream_failure(conn, expected, e))?;

    let remote = fingerprint_at(&reply, 0)?;
    if remote != expected {
        conn.close(STALE_IDENTITY_CODE, b"stale identity");
        return Err(TransportError::StaleIdentity {
            expected,
            found: Some(remote),
        });
    }
    let remote_nonce = nonce_at(&reply, FINGERPRINT_LEN);
    let remote_sig = signature_at(&reply, FINGERPRINT_LEN + NONCE_LEN);
    if remote.verify(&challenge(&session, &nonce, &remote), &remote_sig).is_err() {
        conn.close(HANDSHAKE_FAILED_CODE, b"bad signature");
        return Err(TransportError::StaleIdentity {
            expected,
            found: None,
        });
    }

    let proof = identity.sign(&challenge(&session, &remote_nonce, &local));
    send.write_all(proof.as_bytes())
        .await
        .map_err(|e| stream_failure(conn, expected, e))?;
    send.finish()
        .map_err(|e| TransportError::Handshake(e.to_string()))?;
    Ok(())
}

/// Acceptor side. Returns the dialer's proven fingerprint.
pub async fn accept(
    conn: &Connection,
    identity: &TransportKeyPair,
) -> Result<TransportFingerprint, TransportError> {
    let local = identity.fingerprint();
    let session = session_binding(conn)?;
    let (mut send, mut recv) = conn
        .accept_bi()
        .await
        .map_err(|e| TransportError::Handshake(e.to_string()))?;

    let mut hello = [0u8; DIALER_HELLO_LEN];
    recv.read_exact(&mut hello)
        .await
        .map_err(|e| TransportError::Handshake(e.to_string()))?;

    let remote = fingerprint_at(&hello, 0)?;
    let remote_nonce = nonce_at(&hello, FINGERPRINT_LEN);
    let expected = fingerprint_at(&hello, FINGERPRINT_LEN + NONCE_LEN)?;
    if expected != local {
        conn.close(STALE_IDENTITY_CODE, b"stale identity");
        return Err(TransportError::StaleIdentity {
            expected,
            found: Some(local),
        });
    }

    let nonce: [u8; NONCE_LEN] = rand::random();
    let proof = identity.sign(&challenge(&session, &remote_nonce, &local));
    let mut reply = Vec::with_capacity(ACCEPTOR_HELLO_LEN);
    reply.extend_from_slice(local.as_bytes());
    reply.extend_from_slice(&nonce);
    reply.extend_from_slice(proof.as_bytes());
    send.write_all(&reply)
        .await
        .map_err(|e| TransportError::Handshake(e.to_string()))?;
    send.finish()
        .map_err(|e| TransportError::Handshake(e.to_string()))?;

    let mut sig = [0u8; TRANSPORT_SIGNATURE_LEN];
    recv.read_exact(&mut sig)
        .await
        .map_err(|e| TransportError::Handshake(e.to_string()))?;
    if remote
        .verify(&challenge(&session, &nonce, &remote), &TransportSignature::from_bytes(sig))
        .is_err()
    {
        conn.close(HANDSHAKE_FAILED_CODE, b"bad signature");
        return Err(TransportError::Handshake(format!(
            "dialer {remote} failed to prove its identity"
        )));
    }
    Ok(remote)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_challenge_binds_signer_and_nonce() {
        let a = TransportKeyPair::generate();
        let b = TransportKeyPair::generate();
        let session = [1u8; SESSION_BINDING_LEN];
        let nonce = [7u8; NONCE_LEN];

        let sig = a.sign(&challenge(&session, &nonce, &a.fingerprint()));
        assert!(a
            .fingerprint()
            .verify(&challenge(&session, &nonce, &a.fingerprint()), &sig)
            .is_ok());
        // Replayed under another identity or nonce, the proof fails.
        assert!(b
            .fingerprint()
            .verify(&challenge(&session, &nonce, &b.fingerprint()), &sig)
            .is_err());
        assert!(a
            .fingerprint()
            .verify(&challenge(&session, &[8u8; NONCE_LEN], &a.fingerprint()), &sig)
            .is_err());
    }

    #[test]
    fn test_proof_from_another_session_fails() {
        let a = TransportKeyPair::generate();
        let nonce = [7u8; NONCE_LEN];
        let relayed = a.sign(&challenge(&[1u8; SESSION_BINDING_LEN], &nonce, &a.fingerprint()));
        assert!(a
            .fingerprint()
            .verify(&challenge(&[2u8; SESSION_BINDING_LEN], &nonce, &a.fingerprint()), &relayed)
            .is_err());
    }

    #[test]
    fn test_message_lengths() {
        assert_eq!(DIALER_HELLO_LEN, 96);
        assert_eq!(ACCEPTOR_HELLO_LEN, 128);
    }
}
