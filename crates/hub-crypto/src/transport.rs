//! # Transport Identity (Ed25519)
//!
//! Ephemeral per-process key pair used to authenticate transport
//! connections. The 32-byte public key doubles as the fingerprint that
//! account registrations are signed over.

use std::fmt;
use std::str::FromStr;

use ed25519_dalek::{Signer, SigningKey, Verifier, VerifyingKey};
use zeroize::Zeroize;

use crate::errors::{decode_hex, to_array};
use crate::CryptoError;

/// Length of a transport fingerprint.
pub const FINGERPRINT_LEN: usize = 32;

/// Length of a transport signature.
pub const TRANSPORT_SIGNATURE_LEN: usize = 64;

/// Transport identity fingerprint (Ed25519 public key, 32 bytes).
#[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct TransportFingerprint([u8; FINGERPRINT_LEN]);

impl TransportFingerprint {
    /// Accepts only valid curve points.
    pub fn from_bytes(bytes: [u8; FINGERPRINT_LEN]) -> Result<Self, CryptoError> {
        VerifyingKey::from_bytes(&bytes).map_err(|_| CryptoError::InvalidPublicKey)?;
        Ok(Self(bytes))
    }

    /// From a 32-byte slice.
    pub fn from_slice(bytes: &[u8]) -> Result<Self, CryptoError> {
        Self::from_bytes(to_array(bytes)?)
    }

    /// Parse from hex (the encoding used in bootstrap addresses).
    pub fn from_hex(input: &str) -> Result<Self, CryptoError> {
        Self::from_slice(&decode_hex(input)?)
    }

    /// Raw key bytes.
    pub fn as_bytes(&self) -> &[u8; FINGERPRINT_LEN] {
        &self.0
    }

    /// Lowercase hex encoding.
    pub fn to_hex(&self) -> String {
        hex::encode(self.0)
    }

    /// Verify a signature made by the identity behind this fingerprint.
    pub fn verify(&self, message: &[u8], signature: &TransportSignature) -> Result<(), CryptoError> {
        VerifyingKey::from_bytes(&self.0)
            .map_err(|_| CryptoError::InvalidPublicKey)?
            .verify(message, &ed25519_dalek::Signature::from_bytes(&signature.0))
            .map_err(|_| CryptoError::SignatureVerificationFailed)
    }
}

impl fmt::Display for TransportFingerprint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.to_hex())
    }
}

impl fmt::Debug for TransportFingerprint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "TransportFingerprint({})", &self.to_hex()[..16])
    }
}

impl FromStr for TransportFingerprint {
    type Err = CryptoError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::from_hex(s)
    }
}

/// Signature by a transport identity, as carried in the handshake.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct TransportSignature([u8; TRANSPORT_SIGNATURE_LEN]);

impl TransportSignature {
    /// Wrap 64 raw bytes; checked only on verify.
    pub fn from_bytes(bytes: [u8; TRANSPORT_SIGNATURE_LEN]) -> Self {
        Self(bytes)
    }

    /// Raw signature bytes.
    pub fn as_bytes(&self) -> &[u8; TRANSPORT_SIGNATURE_LEN] {
        &self.0
    }
}

/// Transport identity secret. The inner key wipes itself on drop.
#[derive(Clone)]
pub struct TransportKeyPair {
    signing_key: SigningKey,
}

impl TransportKeyPair {
    /// Fresh identity for this process run.
    pub fn generate() -> Self {
        Self {
            signing_key: SigningKey::generate(&mut rand::thread_rng()),
        }
    }

    /// Deterministic identity from a secret seed.
    pub fn from_seed(seed: [u8; 32]) -> Self {
        Self {
            signing_key: SigningKey::from_bytes(&seed),
        }
    }

    /// Seed slice; anything but 32 bytes is `InvalidPrivateKey`.
    pub fn from_bytes(bytes: &[u8]) -> Result<Self, CryptoError> {
        let mut seed: [u8; 32] = to_array(bytes).map_err(|_| CryptoError::InvalidPrivateKey)?;
        let keypair = Self::from_seed(seed);
        seed.zeroize();
        Ok(keypair)
    }

    /// Parse a hex-encoded secret seed.
    pub fn from_hex(input: &str) -> Result<Self, CryptoError> {
        let mut bytes = decode_hex(input)?;
        let result = Self::from_bytes(&bytes);
        bytes.zeroize();
        result
    }

    /// Public half, as sent in the handshake.
    pub fn fingerprint(&self) -> TransportFingerprint {
        TransportFingerprint(self.signing_key.verifying_key().to_bytes())
    }

    /// Deterministic Ed25519 signature.
    pub fn sign(&self, message: &[u8]) -> TransportSignature {
        TransportSignature(self.signing_key.sign(message).to_bytes())
    }

    /// The 32-byte secret seed.
    pub fn to_seed(&self) -> [u8; 32] {
        self.signing_key.to_bytes()
    }
}

impl fmt::Debug for TransportKeyPair {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TransportKeyPair")
            .field("fingerprint", &self.fingerprint())
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_fingerprint_verifies_own_signature() {
        let keypair = TransportKeyPair::generate();
        let signature = keypair.sign(b"handshake");
        assert!(keypair.fingerprint().verify(b"handshake", &signature).is_ok());
    }

    #[test]
    fn test_signature_over_other_nonce_fails() {
        let keypair = TransportKeyPair::generate();
        let signature = keypair.sign(b"nonce-a");
        assert_eq!(
            keypair.fingerprint().verify(b"nonce-b", &signature),
            Err(CryptoError::SignatureVerificationFailed)
        );
    }

    #[test]
    fn test_seed_roundtrip() {
        let original = TransportKeyPair::generate();
        let restored = TransportKeyPair::from_bytes(&original.to_seed()).unwrap();

        assert_eq!(original.fingerprint(), restored.fingerprint());
    }

    #[test]
    fn test_hex_parsing() {
        let keypair = TransportKeyPair::from_seed([9u8; 32]);
        let from_hex = TransportKeyPair::from_hex(&hex::encode([9u8; 32])).unwrap();
        let fingerprint: TransportFingerprint = keypair.fingerprint().to_hex().parse().unwrap();

        assert_eq!(from_hex.fingerprint(), keypair.fingerprint());
        assert_eq!(fingerprint, keypair.fingerprint());
    }

    #[test]
    fn test_rejects_short_seed() {
        assert!(matches!(
            TransportKeyPair::from_bytes(&[1u8; 31]),
            Err(CryptoError::InvalidPrivateKey)
        ));
        assert!(TransportKeyPair::from_hex("zz").is_err());
    }
}
