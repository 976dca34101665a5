//! FFI error type. Never crosses the ABI; mapped to sentinels at the edge.

use hub_crypto::CryptoError;
use peer_hub::{ConfigError, HubError};
use thiserror::Error;

/// Failures of the C surface.
#[derive(Debug, Error)]
pub enum FfiError {
    /// A required pointer was null.
    #[error("null pointer for {0}")]
    NullPointer(&'static str),

    /// A string argument was not UTF-8.
    #[error("{0} is not valid UTF-8")]
    InvalidUtf8(&'static str),

    /// The library runtime could not be created.
    #[error("async runtime unavailable")]
    RuntimeUnavailable,

    /// Bad key material.
    #[error(transparent)]
    Crypto(#[from] CryptoError),

    /// Bad configuration.
    #[error(transparent)]
    Config(#[from] ConfigError),

    /// Hub operation failed.
    #[error(transparent)]
    Hub(#[from] HubError),
}
