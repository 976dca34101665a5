//! Errors from key parsing, signing and verification.

use thiserror::Error;

/// Failure of a key or signature operation.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum CryptoError {
    /// The signature does not bind the message to the key.
    #[error("signature does not verify")]
    SignatureVerificationFailed,

    /// Wrong length, bad recovery id, or a scalar out of range.
    #[error("malformed signature")]
    InvalidSignatureFormat,

    /// Not a point on the curve.
    #[error("malformed public key")]
    InvalidPublicKey,

    /// Zero or out-of-range secret scalar.
    #[error("malformed secret key")]
    InvalidPrivateKey,

    /// Key or signature of the wrong size.
    #[error("expected {expected} bytes, got {actual}")]
    InvalidKeyLength {
        /// Required length.
        expected: usize,
        /// Supplied length.
        actual: usize,
    },

    /// Hex text that does not decode.
    #[error("bad hex: {0}")]
    InvalidHex(String),

    /// The signer refused the key material.
    #[error("signing failed: {0}")]
    SigningFailed(String),
}

impl From<hex::FromHexError> for CryptoError {
    fn from(err: hex::FromHexError) -> Self {
        CryptoError::InvalidHex(err.to_string())
    }
}

/// Decode a hex string, tolerating an optional `0x` prefix and surrounding whitespace.
pub(crate) fn decode_hex(input: &str) -> Result<Vec<u8>, CryptoError> {
    let trimmed = input.trim();
    let stripped = trimmed
        .strip_prefix("0x")
        .or_else(|| trimmed.strip_prefix("0X"))
        .unwrap_or(trimmed);
    Ok(hex::decode(stripped)?)
}

/// Copy a slice into a fixed-size array, reporting the length mismatch.
pub(crate) fn to_array<const N: usize>(bytes: &[u8]) -> Result<[u8; N], CryptoError> {
    bytes
        .try_into()
        .map_err(|_| CryptoError::InvalidKeyLength {
            expected: N,
            actual: bytes.len(),
        })
}
