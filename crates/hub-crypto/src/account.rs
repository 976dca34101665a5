//! # Account Keys (secp256k1)
//!
//! Long-term validator identities and the registration signature that binds
//! an account key to a transport fingerprint.
//!
//! ## Security Properties
//!
//! - RFC 6979 deterministic nonces (no RNG dependency for signing)
//! - Recoverable signatures (`r || s || v`), so a registration can be
//!   checked against the claimed account key or used to recover it
//! - Secret material zeroized on drop

use std::fmt;
use std::str::FromStr;

use k256::ecdsa::{RecoveryId, Signature, SigningKey, VerifyingKey};
use zeroize::Zeroize;

use crate::errors::{decode_hex, to_array};
use crate::CryptoError;

/// Length of a compressed SEC1 account key.
pub const ACCOUNT_KEY_LEN: usize = 33;

/// Length of a recoverable account signature.
pub const ACCOUNT_SIGNATURE_LEN: usize = 65;

/// Compressed secp256k1 public key (33 bytes) identifying a validator.
#[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct AccountKey([u8; ACCOUNT_KEY_LEN]);

impl AccountKey {
    /// Create from compressed bytes (33 bytes, starting with 0x02 or 0x03).
    pub fn from_bytes(bytes: [u8; ACCOUNT_KEY_LEN]) -> Result<Self, CryptoError> {
        VerifyingKey::from_sec1_bytes(&bytes).map_err(|_| CryptoError::InvalidPublicKey)?;
        Ok(Self(bytes))
    }

    /// Create from a byte slice of exactly 33 bytes.
    pub fn from_slice(bytes: &[u8]) -> Result<Self, CryptoError> {
        Self::from_bytes(to_array(bytes)?)
    }

    /// Parse from a 66-character hex string (optional `0x` prefix).
    pub fn from_hex(input: &str) -> Result<Self, CryptoError> {
        Self::from_slice(&decode_hex(input)?)
    }

    /// Get raw compressed bytes.
    pub fn as_bytes(&self) -> &[u8; ACCOUNT_KEY_LEN] {
        &self.0
    }

    /// Lowercase hex encoding, the external form of an account key.
    pub fn to_hex(&self) -> String {
        hex::encode(self.0)
    }

    fn from_verifying_key(key: &VerifyingKey) -> Self {
        // secp256k1 SEC1 encoding is compressed: 0x02/0x03 prefix + 32-byte x
        let sec1_bytes = key.to_sec1_bytes();
        let mut bytes = [0u8; ACCOUNT_KEY_LEN];
        bytes.copy_from_slice(&sec1_bytes[..ACCOUNT_KEY_LEN]);
        Self(bytes)
    }
}

impl fmt::Display for AccountKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.to_hex())
    }
}

impl fmt::Debug for AccountKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "AccountKey({})", &self.to_hex()[..16])
    }
}

impl FromStr for AccountKey {
    type Err = CryptoError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::from_hex(s)
    }
}

/// Recoverable ECDSA signature (65 bytes, `r || s || v`).
#[derive(Clone, Copy, PartialEq, Eq)]
pub struct AccountSignature([u8; ACCOUNT_SIGNATURE_LEN]);

impl AccountSignature {
    /// Create from bytes (65 bytes).
    pub fn from_bytes(bytes: [u8; ACCOUNT_SIGNATURE_LEN]) -> Self {
        Self(bytes)
    }

    /// Create from a slice of exactly 65 bytes.
    pub fn from_slice(bytes: &[u8]) -> Result<Self, CryptoError> {
        to_array(bytes)
            .map(Self)
            .map_err(|_| CryptoError::InvalidSignatureFormat)
    }

    /// Get raw bytes.
    pub fn as_bytes(&self) -> &[u8; ACCOUNT_SIGNATURE_LEN] {
        &self.0
    }

    fn split(&self) -> Result<(Signature, RecoveryId), CryptoError> {
        let signature =
            Signature::from_slice(&self.0[..64]).map_err(|_| CryptoError::InvalidSignatureFormat)?;
        let recovery_id =
            RecoveryId::from_byte(self.0[64]).ok_or(CryptoError::InvalidSignatureFormat)?;
        Ok((signature, recovery_id))
    }
}

impl fmt::Debug for AccountSignature {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "AccountSignature({}..)", hex::encode(&self.0[..8]))
    }
}

/// secp256k1 account keypair.
pub struct AccountKeyPair {
    signing_key: SigningKey,
}

impl AccountKeyPair {
    /// Generate random keypair.
    pub fn generate() -> Self {
        let signing_key = SigningKey::random(&mut rand::thread_rng());
        Self { signing_key }
    }

    /// Create from secret key bytes (32 bytes).
    pub fn from_bytes(bytes: &[u8]) -> Result<Self, CryptoError> {
        let signing_key =
            SigningKey::from_slice(bytes).map_err(|_| CryptoError::InvalidPrivateKey)?;
        Ok(Self { signing_key })
    }

    /// Parse a hex-encoded secret key.
    pub fn from_hex(input: &str) -> Result<Self, CryptoError> {
        let mut bytes = decode_hex(input)?;
        let result = Self::from_bytes(&bytes);
        bytes.zeroize();
        result
    }

    /// Get the account key (compressed, 33 bytes).
    pub fn account_key(&self) -> AccountKey {
        AccountKey::from_verifying_key(self.signing_key.verifying_key())
    }

    /// Sign a message with a recoverable signature (deterministic RFC 6979).
    pub fn sign(&self, message: &[u8]) -> Result<AccountSignature, CryptoError> {
        let (signature, recovery_id) = self
            .signing_key
            .sign_recoverable(message)
            .map_err(|e| CryptoError::SigningFailed(e.to_string()))?;
        let mut bytes = [0u8; ACCOUNT_SIGNATURE_LEN];
        bytes[..64].copy_from_slice(&signature.to_bytes());
        bytes[64] = recovery_id.to_byte();
        Ok(AccountSignature(bytes))
    }

    /// Get secret key bytes (for serialization).
    pub fn to_bytes(&self) -> [u8; 32] {
        self.signing_key.to_bytes().into()
    }
}

impl fmt::Debug for AccountKeyPair {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AccountKeyPair")
            .field("account", &self.account_key())
            .finish_non_exhaustive()
    }
}

impl Drop for AccountKeyPair {
    fn drop(&mut self) {
        let mut bytes: [u8; 32] = self.signing_key.to_bytes().into();
        bytes.zeroize();
    }
}

/// Sign a transport fingerprint with raw account secret key material.
///
/// # Errors
///
/// Returns `CryptoError::InvalidPrivateKey` when the key material is not a
/// valid secp256k1 scalar.
pub fn sign(fingerprint: &[u8], account_secret: &[u8]) -> Result<AccountSignature, CryptoError> {
    AccountKeyPair::from_bytes(account_secret)?.sign(fingerprint)
}

/// Check that `signature` was produced over `fingerprint` by `account`.
pub fn verify(fingerprint: &[u8], signature: &AccountSignature, account: &AccountKey) -> bool {
    recover(fingerprint, signature).is_ok_and(|recovered| recovered == *account)
}

/// Recover the account key that produced `signature` over `fingerprint`.
pub fn recover(fingerprint: &[u8], signature: &AccountSignature) -> Result<AccountKey, CryptoError> {
    let (sig, recovery_id) = signature.split()?;
    let key = VerifyingKey::recover_from_msg(fingerprint, &sig, recovery_id)
        .map_err(|_| CryptoError::SignatureVerificationFailed)?;
    Ok(AccountKey::from_verifying_key(&key))
}
