//! OAuth2 authorization-code flow with PKCE.
//!
//! One [`OAuthAuthenticator`] per provider. It owns the account tokens,
//! the pending flow states (CSRF defense) and the refresh logic:
//!
//! ```text
//! IDLE -> AUTHORIZING -> AWAITING_CALLBACK -> EXCHANGING -> AUTHENTICATED | FAILED
//! ```
//!
//! Refreshes are serialized so concurrent callers never race on a
//! rotating refresh token. A rejected refresh moves the authenticator to
//! `FAILED`; from there only a new authorization gets tokens again.

use crate::config::OAuthClientConfig;
use crate::credential_store::CredentialStore;
use crate::error::{CloudError, CloudResult};
use crate::flow_state::{FlowStateStore, OAuthFlowState};
use crate::types::{CloudAccount, ProviderKind};
use base64::Engine;
use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use chrono::Utc;
use rand::RngCore;
use reqwest::{Client, Url};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{Mutex, RwLock};
use tokio::time::Instant;
use tracing::{debug, info, warn};
use zeroize::Zeroizing;

/// Error message for unknown, replayed or expired state tokens.
pub const INVALID_STATE: &str = "invalid or expired OAuth state";

/// Default token lifetime when the provider omits `expires_in`.
const DEFAULT_EXPIRES_IN_SECS: i64 = 3600;

/// Authentication phase for one provider.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum AuthPhase {
    Idle,
    Authorizing,
    AwaitingCallback,
    Exchanging,
    Authenticated,
    Failed,
}

/// Opens the authorization URL for the user (system browser, custom tab).
pub trait AuthorizationLauncher: Send + Sync {
    fn launch(&self, authorization_url: &str) -> CloudResult<()>;
}

/// Query parameters of a redirect back to the app.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct CallbackParams {
    pub code: Option<String>,
    pub state: Option<String>,
    pub error: Option<String>,
    pub error_description: Option<String>,
}

/// PKCE verifier and its S256 challenge.
pub struct PkcePair {
    pub verifier: Zeroizing<String>,
    pub challenge: String,
}

impl PkcePair {
    /// 32 random bytes, base64url without padding (43 chars).
    pub fn generate() -> Self {
        let mut bytes = Zeroizing::new([0u8; 32]);
        rand::rngs::OsRng.fill_bytes(&mut bytes[..]);
        let verifier = Zeroizing::new(URL_SAFE_NO_PAD.encode(&bytes[..]));
        let challenge = Self::challenge_for(&verifier);
        Self {
            verifier,
            challenge,
        }
    }

    pub fn challenge_for(verifier: &str) -> String {
        URL_SAFE_NO_PAD.encode(Sha256::digest(verifier.as_bytes()))
    }
}

/// Splits a callback URI into its redirect base (query and fragment
/// removed) and the OAuth parameters.
pub fn parse_callback(uri: &str) -> CloudResult<(String, CallbackParams)> {
    let mut url = Url::parse(uri)
        .map_err(|e| CloudError::Authentication(format!("malformed callback URI: {e}")))?;

    let mut params = CallbackParams::default();
    for (key, value) in url.query_pairs() {
        let value = Some(value.into_owned());
        match key.as_ref() {
            "code" => params.code = value,
            "state" => params.state = value,
            "error" => params.error = value,
            "error_description" => params.error_description = value,
            _ => {}
        }
    }

    url.set_query(None);
    url.set_fragment(None);
    Ok((url.into(), params))
}

struct AuthState {
    phase: AuthPhase,
    account: Option<CloudAccount>,
    /// Bumped on every successful refresh so waiters can tell a
    /// concurrent refresh already rotated the tokens.
    refresh_generation: u64,
}

#[derive(Deserialize)]
struct TokenResponse {
    access_token: String,
    refresh_token: Option<String>,
    expires_in: Option<i64>,
}

#[derive(Deserialize)]
struct UserInfo {
    email: Option<String>,
    name: Option<String>,
}

/// OAuth2/PKCE client for a single provider account.
pub struct OAuthAuthenticator {
    provider: ProviderKind,
    config: OAuthClientConfig,
    client: Client,
    flows: FlowStateStore,
    store: Arc<dyn CredentialStore>,
    launcher: Arc<dyn AuthorizationLauncher>,
    auth: Arc<RwLock<AuthState>>,
    /// One HTTP refresh at a time.
    refresh_lock: Arc<Mutex<()>>,
}

impl OAuthAuthenticator {
    pub fn new(
        provider: ProviderKind,
        config: OAuthClientConfig,
        store: Arc<dyn CredentialStore>,
        launcher: Arc<dyn AuthorizationLauncher>,
    ) -> CloudResult<Self> {
        let client = Client::builder()
            .timeout(Duration::from_secs(config.request_timeout_secs))
            .build()
            .map_err(|e| CloudError::Config(format!("failed to build HTTP client: {e}")))?;

        Ok(Self {
            provider,
            flows: FlowStateStore::new(config.flow_ttl()),
            config,
            client,
            store,
            launcher,
            auth: Arc::new(RwLock::new(AuthState {
                phase: AuthPhase::Idle,
                account: None,
                refresh_generation: 0,
            })),
            refresh_lock: Arc::new(Mutex::new(())),
        })
    }

    pub fn provider(&self) -> ProviderKind {
        self.provider
    }

    pub async fn phase(&self) -> AuthPhase {
        self.auth.read().await.phase
    }

    pub async fn account(&self) -> Option<CloudAccount> {
        self.auth.read().await.account.clone()
    }

    pub async fn is_authenticated(&self) -> bool {
        let auth = self.auth.read().await;
        auth.phase == AuthPhase::Authenticated && auth.account.is_some()
    }

    async fn set_phase(&self, phase: AuthPhase) {
        let mut auth = self.auth.write().await;
        if auth.phase != phase {
            debug!("{} auth phase {:?} -> {:?}", self.provider, auth.phase, phase);
            auth.phase = phase;
        }
    }

    // ── Authorization ──

    /// Starts a new authorization attempt and opens the browser.
    ///
    /// Returns the authorization URL that was launched.
    pub async fn begin_authorization(&self) -> CloudResult<String> {
        self.set_phase(AuthPhase::Authorizing).await;

        let pkce = PkcePair::generate();
        let state_token = format!("{}:{}", self.provider.as_str(), uuid::Uuid::new_v4());
        let url = self.authorization_url(&state_token, &pkce.challenge);

        self.flows
            .insert(OAuthFlowState {
                state_token: state_token.clone(),
                code_verifier: pkce.verifier,
                provider: self.provider,
                created_at: Instant::now(),
            })
            .await;

        if let Err(e) = self.launcher.launch(&url) {
            warn!("failed to open {} authorization page: {e}", self.provider);
            self.flows.consume(&state_token).await;
            self.set_phase(AuthPhase::Failed).await;
            return Err(e);
        }

        self.set_phase(AuthPhase::AwaitingCallback).await;
        info!("{} authorization started", self.provider);
        Ok(url)
    }

    fn authorization_url(&self, state_token: &str, challenge: &str) -> String {
        let scope = self.config.scopes.join(" ");
        let mut params: Vec<(&str, &str)> = vec![
            ("response_type", "code"),
            ("client_id", &self.config.client_id),
            ("redirect_uri", &self.config.redirect_uri),
            ("scope", &scope),
            ("state", state_token),
            ("code_challenge", challenge),
            ("code_challenge_method", "S256"),
        ];
        for (k, v) in &self.config.extra_authorization_params {
            params.push((k.as_str(), v.as_str()));
        }

        let query = params
            .iter()
            .map(|(k, v)| format!("{k}={}", urlencoding::encode(v)))
            .collect::<Vec<_>>()
            .join("&");
        format!("{}?{query}", self.config.authorization_endpoint)
    }

    /// Handles the redirect URI the platform delivered to the app.
    pub async fn handle_callback(&self, uri: &str) -> CloudResult<CloudAccount> {
        let (base, params) = parse_callback(uri)?;
        if base.trim_end_matches('/') != self.config.redirect_uri.trim_end_matches('/') {
            return Err(CloudError::Authentication(format!(
                "unexpected callback target: {base}"
            )));
        }

        let Some(state) = params.state else {
            return Err(CloudError::Authentication(INVALID_STATE.to_string()));
        };

        if let Some(error) = params.error {
            // The attempt is over either way: burn the state.
            let known = self.flows.consume(&state).await.is_some();
            if known {
                self.set_phase(AuthPhase::Failed).await;
            }
            let detail = params
                .error_description
                .map(|d| format!("{error}: {d}"))
                .unwrap_or(error);
            warn!("{} authorization refused: {detail}", self.provider);
            return Err(CloudError::Authentication(format!(
                "authorization refused: {detail}"
            )));
        }

        let Some(code) = params.code else {
            if self.flows.consume(&state).await.is_some() {
                self.set_phase(AuthPhase::Failed).await;
            }
            return Err(CloudError::Authentication(
                "callback carried no authorization code".to_string(),
            ));
        };

        self.complete_authentication(&state, &code).await
    }

    /// Exchanges an authorization code for tokens.
    ///
    /// The flow state is consumed before anything else, so a state token
    /// can never be used twice.
    pub async fn complete_authentication(
        &self,
        state_token: &str,
        code: &str,
    ) -> CloudResult<CloudAccount> {
        let Some(flow) = self.flows.consume(state_token).await else {
            warn!("{} callback with unknown or expired state", self.provider);
            return Err(CloudError::Authentication(INVALID_STATE.to_string()));
        };

        let prefix_matches = state_token
            .split_once(':')
            .is_some_and(|(kind, _)| kind == self.provider.as_str());
        if flow.provider != self.provider || !prefix_matches {
            warn!("{} callback carried a foreign state token", self.provider);
            return Err(CloudError::Authentication(INVALID_STATE.to_string()));
        }

        self.set_phase(AuthPhase::Exchanging).await;

        let tokens = match self.exchange_code(code, &flow.code_verifier).await {
            Ok(t) => t,
            Err(e) => {
                warn!("{} code exchange failed: {e}", self.provider);
                self.set_phase(AuthPhase::Failed).await;
                return Err(match e {
                    CloudError::Network(_) => e,
                    other => CloudError::Authentication(format!("code exchange failed: {other}")),
                });
            }
        };

        let (email, name) = self.fetch_user_info(&tokens.access_token).await;
        let account = CloudAccount {
            id: uuid::Uuid::new_v4().to_string(),
            provider: self.provider,
            display_name: name.unwrap_or_else(|| self.provider.display_name().to_string()),
            email,
            access_token: tokens.access_token,
            refresh_token: tokens.refresh_token,
            expires_at: Utc::now()
                + chrono::Duration::seconds(tokens.expires_in.unwrap_or(DEFAULT_EXPIRES_IN_SECS)),
        };

        if let Err(e) = self.store.save(&account) {
            self.set_phase(AuthPhase::Failed).await;
            return Err(e);
        }

        let mut auth = self.auth.write().await;
        auth.account = Some(account.clone());
        auth.phase = AuthPhase::Authenticated;
        info!("{} account {} authenticated", self.provider, account.id);
        Ok(account)
    }

    async fn exchange_code(&self, code: &str, verifier: &str) -> CloudResult<TokenResponse> {
        let mut form = vec![
            ("grant_type", "authorization_code"),
            ("code", code),
            ("redirect_uri", self.config.redirect_uri.as_str()),
            ("client_id", self.config.client_id.as_str()),
            ("code_verifier", verifier),
        ];
        if let Some(secret) = &self.config.client_secret {
            form.push(("client_secret", secret.as_str()));
        }

        let resp = self
            .client
            .post(&self.config.token_endpoint)
            .form(&form)
            .send()
            .await?;

        let status = resp.status();
        if !status.is_success() {
            let body = resp.text().await.unwrap_or_default();
            return Err(CloudError::Api {
                status: status.as_u16(),
                message: body,
            });
        }
        Ok(resp.json().await?)
    }

    /// Best effort; a missing profile does not fail the sign-in.
    async fn fetch_user_info(&self, access_token: &str) -> (Option<String>, Option<String>) {
        let Some(endpoint) = &self.config.userinfo_endpoint else {
            return (None, None);
        };

        let result = async {
            let info: UserInfo = self
                .client
                .get(endpoint)
                .bearer_auth(access_token)
                .send()
                .await?
                .error_for_status()?
                .json()
                .await?;
            Ok::<_, reqwest::Error>(info)
        }
        .await;

        match result {
            Ok(info) => (info.email, info.name),
            Err(e) => {
                debug!("{} userinfo lookup failed: {e}", self.provider);
                (None, None)
            }
        }
    }

    // ── Tokens ──

    /// Returns a usable access token, refreshing it first if it expires
    /// within the configured margin.
    pub async fn access_token(&self) -> CloudResult<String> {
        // Fast path: check if the current token is still good
        {
            let auth = self.auth.read().await;
            if auth.phase == AuthPhase::Failed {
                return Err(CloudError::Authentication(
                    "re-authentication required".to_string(),
                ));
            }
            let Some(account) = auth.account.as_ref() else {
                return Err(CloudError::Authentication("not signed in".to_string()));
            };
            if !account.expires_within_secs(self.config.refresh_margin_secs) {
                return Ok(account.access_token.clone());
            }
            debug!(
                "{} token expiring within {}s, refreshing",
                self.provider, self.config.refresh_margin_secs
            );
        }

        // Slow path: refresh
        self.refresh_access_token().await
    }

    /// Forces a refresh (e.g. after a 401).
    ///
    /// Callers that queue behind a refresh already in progress get the
    /// token it produced instead of issuing a second request.
    pub async fn refresh_access_token(&self) -> CloudResult<String> {
        let pre_gen = self.auth.read().await.refresh_generation;

        let _guard = self.refresh_lock.lock().await;

        let refresh_token = {
            let auth = self.auth.read().await;
            if auth.phase == AuthPhase::Failed {
                return Err(CloudError::Authentication(
                    "re-authentication required".to_string(),
                ));
            }
            let account = auth
                .account
                .as_ref()
                .ok_or_else(|| CloudError::Authentication("not signed in".to_string()))?;
            if auth.refresh_generation > pre_gen {
                return Ok(account.access_token.clone());
            }
            account.refresh_token.clone()
        };

        let Some(refresh_token) = refresh_token else {
            self.set_phase(AuthPhase::Failed).await;
            return Err(CloudError::Authentication(
                "no refresh token, re-authentication required".to_string(),
            ));
        };

        let mut form = vec![
            ("grant_type", "refresh_token"),
            ("refresh_token", refresh_token.as_str()),
            ("client_id", self.config.client_id.as_str()),
        ];
        if let Some(secret) = &self.config.client_secret {
            form.push(("client_secret", secret.as_str()));
        }

        let resp = self
            .client
            .post(&self.config.token_endpoint)
            .form(&form)
            .send()
            .await
            .map_err(|e| CloudError::Network(format!("token refresh failed: {e}")))?;

        let status = resp.status();
        if status.is_client_error() {
            // Refresh token expired or revoked
            warn!("{} token refresh rejected ({status})", self.provider);
            self.set_phase(AuthPhase::Failed).await;
            return Err(CloudError::Authentication(
                "token refresh failed: session expired, re-authentication required".to_string(),
            ));
        }
        if !status.is_success() {
            return Err(CloudError::Api {
                status: status.as_u16(),
                message: "token refresh failed".to_string(),
            });
        }

        let tokens: TokenResponse = resp.json().await?;

        let mut guard = self.auth.write().await;
        let auth = &mut *guard;
        let account = auth
            .account
            .as_mut()
            .ok_or_else(|| CloudError::Authentication("signed out during refresh".to_string()))?;
        account.access_token = tokens.access_token.clone();
        if let Some(rotated) = tokens.refresh_token {
            account.refresh_token = Some(rotated);
        }
        account.expires_at = Utc::now()
            + chrono::Duration::seconds(tokens.expires_in.unwrap_or(DEFAULT_EXPIRES_IN_SECS));
        self.store.save(account)?;
        auth.refresh_generation += 1;

        debug!(
            "refreshed {} token, expires at {}",
            self.provider, account.expires_at
        );
        Ok(tokens.access_token)
    }

    // ── Session ──

    /// Loads a previously saved account. Returns `false` if none is stored.
    pub async fn restore(&self, account_id: &str) -> CloudResult<bool> {
        let Some(account) = self.store.load(self.provider, account_id)? else {
            return Ok(false);
        };
        let mut auth = self.auth.write().await;
        auth.account = Some(account);
        auth.phase = AuthPhase::Authenticated;
        debug!("restored {} account {account_id}", self.provider);
        Ok(true)
    }

    /// Forgets the account locally and revokes its token (best effort).
    pub async fn sign_out(&self) -> CloudResult<()> {
        let account = {
            let mut auth = self.auth.write().await;
            auth.phase = AuthPhase::Idle;
            auth.account.take()
        };
        self.flows.evict_expired().await;

        let Some(account) = account else {
            return Ok(());
        };

        if let Some(endpoint) = &self.config.revocation_endpoint {
            let token = account
                .refresh_token
                .as_deref()
                .unwrap_or(&account.access_token);
            if let Err(e) = self
                .client
                .post(endpoint)
                .form(&[("token", token)])
                .send()
                .await
                .and_then(|r| r.error_for_status())
            {
                warn!("{} token revocation failed: {e}", self.provider);
            }
        }

        self.store.delete(self.provider, &account.id)?;
        info!("{} account {} signed out", self.provider, account.id);
        Ok(())
    }
}
