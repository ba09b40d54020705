//! Cloud provider error types.

use crate::types::ProviderKind;
use thiserror::Error;

/// Result type for cloud operations.
pub type CloudResult<T> = Result<T, CloudError>;

/// Errors that can occur talking to a cloud provider.
#[derive(Debug, Error)]
pub enum CloudError {
    /// Token expired, refused or revoked. Requires re-authentication.
    #[error("authentication failed: {0}")]
    Authentication(String),

    #[error("network error: {0}")]
    Network(String),

    #[error("storage quota exceeded: {0}")]
    QuotaExceeded(String),

    #[error("provider {0} is not supported yet")]
    UnsupportedProvider(ProviderKind),

    #[error("no provider registered for {0}")]
    ProviderNotRegistered(ProviderKind),

    #[error("not found: {0}")]
    NotFound(String),

    #[error("provider API error ({status}): {message}")]
    Api { status: u16, message: String },

    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("credential store error: {0}")]
    CredentialStore(String),

    #[error("invalid configuration: {0}")]
    Config(String),
}

impl CloudError {
    /// True for failures worth retrying: connection problems, throttling
    /// and server-side errors.
    pub fn is_transient(&self) -> bool {
        match self {
            CloudError::Network(_) => true,
            CloudError::Api { status, .. } => *status == 429 || *status >= 500,
            _ => false,
        }
    }
}

impl From<reqwest::Error> for CloudError {
    fn from(e: reqwest::Error) -> Self {
        match e.status() {
            Some(status) => CloudError::Api {
                status: status.as_u16(),
                message: e.to_string(),
            },
            None => CloudError::Network(e.to_string()),
        }
    }
}

impl From<keyring::Error> for CloudError {
    fn from(e: keyring::Error) -> Self {
        CloudError::CredentialStore(e.to_string())
    }
}
