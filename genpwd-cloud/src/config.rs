//! Cloud provider configuration.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::time::Duration;

/// Top-level configuration for the provider layer.
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct CloudConfig {
    pub retry: RetryConfig,
    pub google_drive: Option<GoogleDriveConfig>,
    pub webdav: Option<WebDavConfig>,
}

/// Backoff policy for transient transport failures.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct RetryConfig {
    /// Total attempts including the first one.
    pub max_attempts: u32,
    pub base_delay_ms: u64,
    pub max_delay_ms: u64,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            base_delay_ms: 500,
            max_delay_ms: 8_000,
        }
    }
}

/// OAuth2 authorization-code client settings for one provider.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(default)]
pub struct OAuthClientConfig {
    pub client_id: String,
    /// Only for providers that require one; PKCE clients usually do not.
    pub client_secret: Option<String>,
    pub authorization_endpoint: String,
    pub token_endpoint: String,
    pub revocation_endpoint: Option<String>,
    pub userinfo_endpoint: Option<String>,
    pub redirect_uri: String,
    pub scopes: Vec<String>,
    /// Extra query parameters appended to the authorization URL.
    pub extra_authorization_params: BTreeMap<String, String>,
    /// Refresh the access token when it expires within this margin.
    pub refresh_margin_secs: i64,
    /// Lifetime of a pending authorization attempt.
    pub flow_ttl_secs: u64,
    pub request_timeout_secs: u64,
}

impl Default for OAuthClientConfig {
    fn default() -> Self {
        Self::google(String::new())
    }
}

impl OAuthClientConfig {
    /// Google endpoints with the per-file Drive scope.
    pub fn google(client_id: impl Into<String>) -> Self {
        let mut extra = BTreeMap::new();
        extra.insert("access_type".to_string(), "offline".to_string());
        extra.insert("prompt".to_string(), "consent".to_string());

        Self {
            client_id: client_id.into(),
            client_secret: None,
            authorization_endpoint: "https://accounts.google.com/o/oauth2/v2/auth".to_string(),
            token_endpoint: "https://oauth2.googleapis.com/token".to_string(),
            revocation_endpoint: Some("https://oauth2.googleapis.com/revoke".to_string()),
            userinfo_endpoint: Some(
                "https://www.googleapis.com/oauth2/v3/userinfo".to_string(),
            ),
            redirect_uri: "genpwdpro://oauth2callback".to_string(),
            scopes: vec![
                "https://www.googleapis.com/auth/drive.file".to_string(),
                "email".to_string(),
            ],
            extra_authorization_params: extra,
            refresh_margin_secs: 300, // 5 minutes before expiry
            flow_ttl_secs: 600,
            request_timeout_secs: 30,
        }
    }

    pub fn flow_ttl(&self) -> Duration {
        Duration::from_secs(self.flow_ttl_secs)
    }
}

/// Google Drive transport settings.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(default)]
pub struct GoogleDriveConfig {
    pub oauth: OAuthClientConfig,
    /// Base for metadata calls (`/drive/v3/...`).
    pub api_base_url: String,
    /// Base for media uploads (`/upload/drive/v3/...`).
    pub upload_base_url: String,
    /// Folder in the user's Drive that holds vault files.
    pub folder_name: String,
    pub request_timeout_secs: u64,
}

impl Default for GoogleDriveConfig {
    fn default() -> Self {
        Self {
            oauth: OAuthClientConfig::default(),
            api_base_url: "https://www.googleapis.com".to_string(),
            upload_base_url: "https://www.googleapis.com".to_string(),
            folder_name: "GenPwdPro".to_string(),
            request_timeout_secs: 60,
        }
    }
}

/// WebDAV transport settings. The password lives in the credential store,
/// never in this struct.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(default)]
pub struct WebDavConfig {
    /// Collection URL, e.g. `https://cloud.example.com/remote.php/dav/files/me/`.
    pub base_url: String,
    pub username: String,
    /// Folder below `base_url` holding vault files.
    pub folder_name: String,
    /// Disables certificate validation for self-signed deployments.
    pub accept_invalid_certs: bool,
    pub request_timeout_secs: u64,
}

impl Default for WebDavConfig {
    fn default() -> Self {
        Self {
            base_url: String::new(),
            username: String::new(),
            folder_name: "GenPwdPro".to_string(),
            accept_invalid_certs: false,
            request_timeout_secs: 60,
        }
    }
}
