//! ChanSettle Cryptographic Primitives
//!
//! Provides the Ed25519 keys used to sign ledger transactions and the
//! hash function used to derive channel and transaction identifiers.

pub mod signing;
pub mod hash;

pub use signing::{SigningKey, VerifyingKey, Signature};
pub use hash::{sha256, sha256_hex, sha256_concat};

/// Errors from cryptographic operations.
#[derive(Debug, thiserror::Error)]
pub enum CryptoError {
    #[error("Invalid signature")]
    InvalidSignature,

    #[error("Invalid key: {0}")]
    InvalidKey(String),
}

pub type Result<T> = std::result::Result<T, CryptoError>;
