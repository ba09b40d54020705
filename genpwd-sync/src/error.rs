//! Sync error types.

use crate::conflict::ResolutionStrategy;
use genpwd_cloud::{CloudError, ProviderKind};
use genpwd_crypto::CryptoError;
use thiserror::Error;

/// Result type for sync operations.
pub type SyncResult<T> = Result<T, SyncError>;

/// Errors surfaced by the sync engine.
///
/// Transport and crypto failures keep their meaning on the way up: an
/// expired token stays [`SyncError::Authentication`], a tampered envelope
/// stays [`SyncError::Integrity`].
#[derive(Debug, Error)]
pub enum SyncError {
    /// Token expired, refused or revoked. The user must sign in again.
    #[error("authentication failed: {0}")]
    Authentication(String),

    /// Transient failure that outlived the retry budget.
    #[error("network error: {0}")]
    Network(String),

    #[error("storage quota exceeded: {0}")]
    QuotaExceeded(String),

    /// The vault decrypted but does not match its recorded content hash,
    /// or authenticated data failed to verify under a trusted key.
    #[error("integrity check failed (tampered data or wrong key)")]
    Integrity,

    /// The remote vault does not open with the supplied master password.
    #[error("decryption failed: wrong master password")]
    Decryption,

    #[error("provider {0} is not supported yet")]
    UnsupportedProvider(ProviderKind),

    #[error("no provider registered for {0}")]
    ProviderNotRegistered(ProviderKind),

    #[error("conflict strategy {0} is not supported")]
    UnsupportedStrategy(ResolutionStrategy),

    /// `MANUAL` strategy: a person has to pick a side.
    #[error("conflict on vault {vault_id} awaits a manual decision")]
    ConflictPending { vault_id: String },

    #[error("sync cancelled")]
    Cancelled,

    #[error("not found: {0}")]
    NotFound(String),

    #[error("invalid envelope: {0}")]
    InvalidEnvelope(String),

    #[error("local vault repository error: {0}")]
    Repository(String),

    #[error("sync history error: {0}")]
    History(String),

    #[error(transparent)]
    Crypto(CryptoError),

    #[error(transparent)]
    Cloud(CloudError),

    #[error("background task failed: {0}")]
    Task(String),
}

impl From<CloudError> for SyncError {
    fn from(e: CloudError) -> Self {
        match e {
            CloudError::Authentication(msg) => SyncError::Authentication(msg),
            CloudError::Network(msg) => SyncError::Network(msg),
            CloudError::QuotaExceeded(msg) => SyncError::QuotaExceeded(msg),
            CloudError::UnsupportedProvider(kind) => SyncError::UnsupportedProvider(kind),
            CloudError::ProviderNotRegistered(kind) => SyncError::ProviderNotRegistered(kind),
            CloudError::NotFound(what) => SyncError::NotFound(what),
            other => SyncError::Cloud(other),
        }
    }
}

impl From<CryptoError> for SyncError {
    fn from(e: CryptoError) -> Self {
        match e {
            CryptoError::Integrity | CryptoError::HashMismatch => SyncError::Integrity,
            CryptoError::InvalidEnvelope(msg) => SyncError::InvalidEnvelope(msg),
            CryptoError::UnsupportedVersion(v) => {
                SyncError::InvalidEnvelope(format!("unsupported envelope version {v}"))
            }
            other => SyncError::Crypto(other),
        }
    }
}

impl From<rusqlite::Error> for SyncError {
    fn from(e: rusqlite::Error) -> Self {
        SyncError::History(e.to_string())
    }
}

impl From<serde_json::Error> for SyncError {
    fn from(e: serde_json::Error) -> Self {
        SyncError::History(format!("serialization: {e}"))
    }
}

impl From<tokio::task::JoinError> for SyncError {
    fn from(e: tokio::task::JoinError) -> Self {
        SyncError::Task(e.to_string())
    }
}

impl SyncError {
    /// Failures a user has to act on before the next cycle can succeed.
    pub fn requires_user_action(&self) -> bool {
        matches!(
            self,
            SyncError::Authentication(_)
                | SyncError::Decryption
                | SyncError::Integrity
                | SyncError::QuotaExceeded(_)
                | SyncError::ConflictPending { .. }
        )
    }
}
