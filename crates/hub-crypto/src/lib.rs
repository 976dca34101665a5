//! # Hub Crypto - Identity Primitives
//!
//! ## Components
//!
//! | Module | Algorithm | Use Case |
//! |--------|-----------|----------|
//! | `account` | secp256k1 (recoverable ECDSA) | Validator account keys, registration signatures |
//! | `transport` | Ed25519 | Ephemeral transport identity, connection handshakes |
//!
//! ## Registration Binding
//!
//! A validator proves that a transport identity speaks for its account by
//! signing the transport fingerprint with the account key:
//!
//! ```rust
//! use hub_crypto::{account, AccountKeyPair, TransportKeyPair};
//!
//! let account_keys = AccountKeyPair::generate();
//! let transport = TransportKeyPair::generate();
//! let fingerprint = transport.fingerprint();
//!
//! let signature = account_keys.sign(fingerprint.as_bytes()).unwrap();
//! assert!(account::verify(
//!     fingerprint.as_bytes(),
//!     &signature,
//!     &account_keys.account_key()
//! ));
//! ```

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod account;
pub mod errors;
pub mod transport;

// Re-exports
pub use account::{AccountKey, AccountKeyPair, AccountSignature};
pub use errors::CryptoError;
pub use transport::{TransportFingerprint, TransportKeyPair, TransportSignature};

/// Crate version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
