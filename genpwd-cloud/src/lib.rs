//! Cloud storage providers for GenPwd vault sync.
//!
//! Provides the transport half of the sync engine:
//! - OAuth2 authorization-code flow with PKCE and single-use CSRF state
//! - Token persistence in the platform keychain
//! - A [`CloudProvider`] capability trait with Google Drive and WebDAV
//!   back ends, plus failing placeholders for planned providers
//! - Bounded exponential backoff for transient network failures
//!
//! Providers only ever see sealed vault envelopes.

pub mod config;
pub mod credential_store;
pub mod error;
pub mod flow_state;
pub mod oauth;
pub mod provider;
pub mod providers;
pub mod registry;
pub mod retry;
pub mod types;

pub use config::{CloudConfig, GoogleDriveConfig, OAuthClientConfig, RetryConfig, WebDavConfig};
pub use credential_store::{CredentialStore, KeyringCredentialStore, MemoryCredentialStore};
pub use error::{CloudError, CloudResult};
pub use oauth::{AuthPhase, AuthorizationLauncher, OAuthAuthenticator};
pub use provider::CloudProvider;
pub use providers::{GoogleDriveProvider, UnsupportedProvider, WebDavProvider};
pub use registry::ProviderRegistry;
pub use retry::RetryPolicy;
pub use types::*;
