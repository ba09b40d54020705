//! Crypto error types.

use thiserror::Error;

/// Result type for crypto operations.
pub type CryptoResult<T> = Result<T, CryptoError>;

/// Errors raised by key derivation, sealing and envelope decoding.
#[derive(Debug, Error)]
pub enum CryptoError {
    #[error("key derivation failed: {0}")]
    KeyDerivation(String),

    #[error("encryption failed: {0}")]
    Encryption(String),

    /// Tag verification failed: tampered data or the wrong key.
    #[error("integrity check failed (wrong key or tampered data)")]
    Integrity,

    /// The tag verified but the plaintext does not match the envelope's
    /// content hash: the metadata was altered after sealing.
    #[error("content hash does not match the decrypted vault")]
    HashMismatch,

    #[error("invalid key length: expected {expected}, got {actual}")]
    InvalidKeyLength { expected: usize, actual: usize },

    #[error("invalid envelope: {0}")]
    InvalidEnvelope(String),

    #[error("unsupported envelope version {0}")]
    UnsupportedVersion(u32),
}
