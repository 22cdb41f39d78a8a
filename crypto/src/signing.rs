//! Transaction signing with Ed25519.

use std::fmt;

use ed25519_dalek::{
    Signer, SigningKey as Ed25519SigningKey, Verifier, VerifyingKey as Ed25519VerifyingKey,
};
use rand::rngs::OsRng;
use serde::{Deserialize, Serialize};

use crate::{CryptoError, Result};

/// The on-chain key pair a party signs its transactions with.
pub struct SigningKey {
    inner: Ed25519SigningKey,
}

impl SigningKey {
    /// Generate a new random signing key.
    pub fn generate() -> Self {
        let mut csprng = OsRng;
        Self {
            inner: Ed25519SigningKey::generate(&mut csprng),
        }
    }

    /// Create from a 32-byte secret.
    pub fn from_bytes(bytes: &[u8]) -> Result<Self> {
        let bytes: [u8; 32] = bytes
            .try_into()
            .map_err(|_| CryptoError::InvalidKey(format!("expected 32 bytes, got {}", bytes.len())))?;

        Ok(Self {
            inner: Ed25519SigningKey::from_bytes(&bytes),
        })
    }

    /// Get the corresponding verifying key.
    pub fn verifying_key(&self) -> VerifyingKey {
        VerifyingKey {
            inner: self.inner.verifying_key(),
        }
    }

    /// Sign a transaction payload.
    pub fn sign(&self, message: &[u8]) -> Signature {
        Signature {
            bytes: self.inner.sign(message).to_bytes(),
        }
    }

    /// Get raw secret bytes.
    pub fn to_bytes(&self) -> [u8; 32] {
        self.inner.to_bytes()
    }
}

impl fmt::Debug for SigningKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SigningKey")
            .field("public", &self.verifying_key().to_hex())
            .finish_non_exhaustive()
    }
}

/// A verifying key (public key). Its bytes double as the ledger account.
#[derive(Clone, Copy, PartialEq, Eq)]
pub struct VerifyingKey {
    inner: Ed25519VerifyingKey,
}

impl VerifyingKey {
    /// Create from raw bytes.
    pub fn from_bytes(bytes: &[u8]) -> Result<Self> {
        let bytes: [u8; 32] = bytes
            .try_into()
            .map_err(|_| CryptoError::InvalidKey(format!("expected 32 bytes, got {}", bytes.len())))?;

        let inner = Ed25519VerifyingKey::from_bytes(&bytes)
            .map_err(|e| CryptoError::InvalidKey(e.to_string()))?;

        Ok(Self { inner })
    }

    /// Verify a signature over `message`.
    pub fn verify(&self, message: &[u8], signature: &Signature) -> Result<()> {
        let sig = ed25519_dalek::Signature::from_bytes(&signature.bytes);

        self.inner
            .verify(message, &sig)
            .map_err(|_| CryptoError::InvalidSignature)
    }

    /// Get raw key bytes.
    pub fn to_bytes(&self) -> [u8; 32] {
        self.inner.to_bytes()
    }

    pub fn to_hex(&self) -> String {
        hex::encode(self.inner.as_bytes())
    }
}

impl fmt::Debug for VerifyingKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "VerifyingKey({})", self.to_hex())
    }
}

/// An Ed25519 signature over a transaction payload.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct Signature {
    bytes: [u8; 64],
}

impl Signature {
    /// Raw signature bytes.
    pub fn to_bytes(&self) -> [u8; 64] {
        self.bytes
    }

    /// Get signature as hex string.
    pub fn to_hex(&self) -> String {
        hex::encode(self.bytes)
    }

    /// Create from hex string.
    pub fn from_hex(hex_str: &str) -> Result<Self> {
        let decoded = hex::decode(hex_str).map_err(|_| CryptoError::InvalidSignature)?;
        let bytes: [u8; 64] = decoded
            .try_into()
            .map_err(|_| CryptoError::InvalidSignature)?;

        Ok(Self { bytes })
    }
}

impl From<Signature> for String {
    fn from(sig: Signature) -> Self {
        sig.to_hex()
    }
}

impl TryFrom<String> for Signature {
    type Error = CryptoError;

    fn try_from(s: String) -> Result<Self> {
        Self::from_hex(&s)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_sign_verify() {
        let signing_key = SigningKey::generate();
        let verifying_key = signing_key.verifying_key();

        let payload = b"initiate_settlement";
        let signature = signing_key.sign(payload);

        assert!(verifying_key.verify(payload, &signature).is_ok());
        assert!(verifying_key.verify(b"withdraw", &signature).is_err());
    }

    #[test]
    fn test_corrupted_signature_rejected() {
        let signing_key = SigningKey::generate();
        let payload = b"withdraw";
        let signature = signing_key.sign(payload);

        let mut bytes = signature.to_bytes();
        bytes[0] ^= 0xff;
        let corrupted = Signature::from_hex(&hex::encode(bytes)).unwrap();

        assert!(signing_key
            .verifying_key()
            .verify(payload, &corrupted)
            .is_err());
    }

    #[test]
    fn test_key_restored_from_bytes() {
        let signing_key = SigningKey::generate();
        let restored = SigningKey::from_bytes(&signing_key.to_bytes()).unwrap();
        assert_eq!(signing_key.verifying_key(), restored.verifying_key());
        assert!(SigningKey::from_bytes(&[0u8; 16]).is_err());
    }
}
