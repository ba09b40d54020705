//! Shared test helpers for provider tests against wiremock.

#![allow(dead_code)]

use chrono::{Duration, Utc};
use genpwd_cloud::oauth::parse_callback;
use genpwd_cloud::{
    AuthorizationLauncher, CloudAccount, CloudError, CloudResult, CredentialStore,
    MemoryCredentialStore, OAuthAuthenticator, OAuthClientConfig, ProviderKind, RetryConfig,
    RetryPolicy,
};
use std::sync::{Arc, Mutex};
use tracing_subscriber::EnvFilter;
use wiremock::MockServer;

/// Remembers every URL it was asked to open.
#[derive(Default)]
pub struct RecordingLauncher {
    pub urls: Mutex<Vec<String>>,
    pub fail: bool,
}

impl RecordingLauncher {
    pub fn failing() -> Self {
        Self {
            urls: Mutex::new(Vec::new()),
            fail: true,
        }
    }

    pub fn last_url(&self) -> Option<String> {
        self.urls.lock().unwrap().last().cloned()
    }
}

impl AuthorizationLauncher for RecordingLauncher {
    fn launch(&self, authorization_url: &str) -> CloudResult<()> {
        if self.fail {
            return Err(CloudError::Config("no browser available".into()));
        }
        self.urls.lock().unwrap().push(authorization_url.to_string());
        Ok(())
    }
}

/// OAuth endpoints pointing at the mock server (or a dead address).
pub fn oauth_config(base: &str) -> OAuthClientConfig {
    OAuthClientConfig {
        client_id: "test-client".into(),
        client_secret: None,
        authorization_endpoint: format!("{base}/authorize"),
        token_endpoint: format!("{base}/token"),
        revocation_endpoint: Some(format!("{base}/revoke")),
        userinfo_endpoint: Some(format!("{base}/userinfo")),
        redirect_uri: "genpwdpro://oauth2callback".into(),
        scopes: vec!["drive.file".into()],
        ..OAuthClientConfig::default()
    }
}

pub fn authenticator(
    base: &str,
    store: Arc<MemoryCredentialStore>,
    launcher: Arc<RecordingLauncher>,
) -> Arc<OAuthAuthenticator> {
    Arc::new(
        OAuthAuthenticator::new(ProviderKind::GoogleDrive, oauth_config(base), store, launcher)
            .unwrap(),
    )
}

pub fn account(access_token: &str, expires_in_secs: i64) -> CloudAccount {
    CloudAccount {
        id: "acc-1".into(),
        provider: ProviderKind::GoogleDrive,
        display_name: "Google Drive".into(),
        email: Some("user@example.com".into()),
        access_token: access_token.into(),
        refresh_token: Some("rt-1".into()),
        expires_at: Utc::now() + Duration::seconds(expires_in_secs),
    }
}

/// Authenticator already holding `access_token`, restored from a store.
pub async fn signed_in(
    server: &MockServer,
    access_token: &str,
    expires_in_secs: i64,
) -> (Arc<OAuthAuthenticator>, Arc<MemoryCredentialStore>) {
    let store = Arc::new(MemoryCredentialStore::new());
    store.save(&account(access_token, expires_in_secs)).unwrap();
    let auth = authenticator(&server.uri(), store.clone(), Arc::new(RecordingLauncher::default()));
    assert!(auth.restore("acc-1").await.unwrap());
    (auth, store)
}

/// Extracts the `state` parameter from an authorization URL.
pub fn state_of(url: &str) -> String {
    parse_callback(url)
        .unwrap()
        .1
        .state
        .expect("authorization URL carries state")
}

/// Retries with millisecond delays so tests stay fast.
pub fn fast_retry() -> RetryPolicy {
    RetryPolicy::new(RetryConfig {
        max_attempts: 3,
        base_delay_ms: 1,
        max_delay_ms: 4,
    })
}

pub fn token_response(access: &str, refresh: Option<&str>) -> serde_json::Value {
    let mut body = serde_json::json!({
        "access_token": access,
        "expires_in": 3599,
        "token_type": "Bearer",
    });
    if let Some(refresh) = refresh {
        body["refresh_token"] = serde_json::json!(refresh);
    }
    body
}

pub fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::new("genpwd_cloud=debug"))
        .with_test_writer()
        .try_init();
}
