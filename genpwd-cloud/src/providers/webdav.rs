//! WebDAV transport (Nextcloud, ownCloud, Synology, Apache mod_dav...).
//!
//! Basic authentication over HTTPS. Plain `http://` is only accepted for
//! loopback hosts. Uploads go to a temporary name and are then `MOVE`d over
//! the target, so readers see either the old file or the new one.

use crate::config::WebDavConfig;
use crate::credential_store::CredentialStore;
use crate::error::{CloudError, CloudResult};
use crate::provider::CloudProvider;
use crate::retry::RetryPolicy;
use crate::types::{AuthOutcome, CloudAccount, ProviderKind, QuotaInfo, RemoteVaultRef};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use quick_xml::Reader;
use quick_xml::events::Event;
use reqwest::{Client, Method, RequestBuilder, Response, StatusCode, Url};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Mutex;
use tracing::{debug, info, warn};
use zeroize::Zeroizing;

const PROPFIND_ENTRIES: &str = r#"<?xml version="1.0" encoding="utf-8"?>
<d:propfind xmlns:d="DAV:">
  <d:prop><d:resourcetype/><d:getcontentlength/><d:getlastmodified/></d:prop>
</d:propfind>"#;

const PROPFIND_QUOTA: &str = r#"<?xml version="1.0" encoding="utf-8"?>
<d:propfind xmlns:d="DAV:">
  <d:prop><d:quota-used-bytes/><d:quota-available-bytes/></d:prop>
</d:propfind>"#;

/// Checks that a server URL is safe to send Basic credentials to.
pub fn validate_url(url: &str) -> CloudResult<Url> {
    let parsed =
        Url::parse(url).map_err(|e| CloudError::Config(format!("invalid WebDAV URL: {e}")))?;

    match parsed.scheme() {
        "https" => Ok(parsed),
        "http" if parsed.host_str().is_some_and(is_loopback) => Ok(parsed),
        "http" => Err(CloudError::Config(
            "WebDAV over plain HTTP is only allowed for localhost, use HTTPS".to_string(),
        )),
        other => Err(CloudError::Config(format!(
            "unsupported WebDAV scheme: {other}"
        ))),
    }
}

fn is_loopback(host: &str) -> bool {
    matches!(host, "localhost" | "::1" | "[::1]") || host.starts_with("127.")
}

fn dav_method(name: &'static str) -> CloudResult<Method> {
    Method::from_bytes(name.as_bytes())
        .map_err(|e| CloudError::Config(format!("invalid HTTP method {name}: {e}")))
}

/// One `<d:response>` of a multistatus body.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub(crate) struct DavEntry {
    pub href: String,
    pub is_collection: bool,
    pub content_length: Option<u64>,
    pub last_modified: Option<DateTime<Utc>>,
    pub quota_used: Option<u64>,
    pub quota_available: Option<i64>,
}

#[derive(Clone, Copy)]
enum DavField {
    Href,
    ContentLength,
    LastModified,
    QuotaUsed,
    QuotaAvailable,
}

/// Parses a `207 Multi-Status` body. Namespace prefixes are ignored.
pub(crate) fn parse_multistatus(xml: &str) -> CloudResult<Vec<DavEntry>> {
    let mut reader = Reader::from_str(xml);
    reader.config_mut().trim_text(true);

    let mut entries = Vec::new();
    let mut current: Option<DavEntry> = None;
    let mut field: Option<DavField> = None;

    loop {
        match reader.read_event() {
            Ok(Event::Start(e)) => match e.local_name().as_ref() {
                b"response" => current = Some(DavEntry::default()),
                b"collection" => {
                    if let Some(entry) = current.as_mut() {
                        entry.is_collection = true;
                    }
                }
                b"href" => field = Some(DavField::Href),
                b"getcontentlength" => field = Some(DavField::ContentLength),
                b"getlastmodified" => field = Some(DavField::LastModified),
                b"quota-used-bytes" => field = Some(DavField::QuotaUsed),
                b"quota-available-bytes" => field = Some(DavField::QuotaAvailable),
                _ => {}
            },
            Ok(Event::Empty(e)) => {
                if e.local_name().as_ref() == b"collection" {
                    if let Some(entry) = current.as_mut() {
                        entry.is_collection = true;
                    }
                }
            }
            Ok(Event::Text(t)) => {
                let (Some(f), Some(entry)) = (field, current.as_mut()) else {
                    continue;
                };
                let text = t
                    .unescape()
                    .map_err(|e| CloudError::Api {
                        status: 207,
                        message: format!("malformed multistatus text: {e}"),
                    })?
                    .trim()
                    .to_string();
                match f {
                    DavField::Href => entry.href = text,
                    DavField::ContentLength => entry.content_length = text.parse().ok(),
                    DavField::LastModified => {
                        entry.last_modified = DateTime::parse_from_rfc2822(&text)
                            .ok()
                            .map(|d| d.with_timezone(&Utc));
                    }
                    DavField::QuotaUsed => entry.quota_used = text.parse().ok(),
                    DavField::QuotaAvailable => entry.quota_available = text.parse().ok(),
                }
            }
            Ok(Event::End(e)) => match e.local_name().as_ref() {
                b"response" => {
                    if let Some(entry) = current.take() {
                        entries.push(entry);
                    }
                }
                _ => field = None,
            },
            Ok(Event::Eof) => break,
            Err(e) => {
                return Err(CloudError::Api {
                    status: 207,
                    message: format!("malformed multistatus at {}: {e}", reader.buffer_position()),
                });
            }
            _ => {}
        }
    }

    Ok(entries)
}

/// Last path segment of an href, percent-decoded.
fn file_name(href: &str) -> String {
    let segment = href
        .trim_end_matches('/')
        .rsplit('/')
        .next()
        .unwrap_or(href);
    urlencoding::decode(segment)
        .map(|s| s.into_owned())
        .unwrap_or_else(|_| segment.to_string())
}

/// WebDAV implementation of [`CloudProvider`].
pub struct WebDavProvider {
    config: WebDavConfig,
    base_url: Url,
    folder_url: Url,
    client: Client,
    password: Zeroizing<String>,
    retry: RetryPolicy,
    store: Option<Arc<dyn CredentialStore>>,
    folder_ready: Mutex<bool>,
}

impl WebDavProvider {
    pub fn new(
        config: WebDavConfig,
        password: Zeroizing<String>,
        retry: RetryPolicy,
    ) -> CloudResult<Self> {
        let mut base_url = validate_url(&config.base_url)?;
        if !base_url.path().ends_with('/') {
            let path = format!("{}/", base_url.path());
            base_url.set_path(&path);
        }
        let folder_url = base_url
            .join(&format!("{}/", urlencoding::encode(&config.folder_name)))
            .map_err(|e| CloudError::Config(format!("invalid WebDAV folder name: {e}")))?;

        if config.accept_invalid_certs {
            warn!(
                "certificate validation disabled for WebDAV server {}",
                base_url.host_str().unwrap_or("?")
            );
        }

        let client = Client::builder()
            .timeout(Duration::from_secs(config.request_timeout_secs))
            .danger_accept_invalid_certs(config.accept_invalid_certs)
            .build()
            .map_err(|e| CloudError::Config(format!("failed to build HTTP client: {e}")))?;

        Ok(Self {
            config,
            base_url,
            folder_url,
            client,
            password,
            retry,
            store: None,
            folder_ready: Mutex::new(false),
        })
    }

    /// Builds a provider from a password saved earlier with [`Self::remember`].
    pub fn from_store(
        config: WebDavConfig,
        store: Arc<dyn CredentialStore>,
        retry: RetryPolicy,
    ) -> CloudResult<Self> {
        let account_id = Self::account_id_for(&config)?;
        let account = store
            .load(ProviderKind::WebDav, &account_id)?
            .ok_or_else(|| {
                CloudError::Authentication(format!("no saved WebDAV credentials for {account_id}"))
            })?;
        let mut provider = Self::new(config, Zeroizing::new(account.access_token), retry)?;
        provider.store = Some(store);
        Ok(provider)
    }

    /// Saves the password so [`Self::from_store`] can rebuild the provider.
    pub fn remember(&mut self, store: Arc<dyn CredentialStore>) -> CloudResult<()> {
        let account = CloudAccount {
            id: self.account_id(),
            provider: ProviderKind::WebDav,
            display_name: self
                .base_url
                .host_str()
                .unwrap_or("WebDAV")
                .to_string(),
            email: None,
            access_token: self.password.as_str().to_string(),
            refresh_token: None,
            // Basic credentials do not expire
            expires_at: Utc::now() + chrono::Duration::days(36_500),
        };
        store.save(&account)?;
        self.store = Some(store);
        Ok(())
    }

    fn account_id_for(config: &WebDavConfig) -> CloudResult<String> {
        let url = validate_url(&config.base_url)?;
        Ok(format!(
            "{}@{}",
            config.username,
            url.host_str().unwrap_or_default()
        ))
    }

    pub fn account_id(&self) -> String {
        format!(
            "{}@{}",
            self.config.username,
            self.base_url.host_str().unwrap_or_default()
        )
    }

    fn request(&self, method: Method, url: Url) -> RequestBuilder {
        self.client
            .request(method, url)
            .basic_auth(&self.config.username, Some(self.password.as_str()))
    }

    /// Maps WebDAV status codes onto the error taxonomy.
    async fn check(what: &str, resp: Response) -> CloudResult<Response> {
        let status = resp.status();
        if status.is_success() {
            return Ok(resp);
        }
        let body = resp.text().await.unwrap_or_default();
        Err(match status {
            StatusCode::UNAUTHORIZED | StatusCode::FORBIDDEN => CloudError::Authentication(
                format!("WebDAV server refused credentials on {what}"),
            ),
            StatusCode::INSUFFICIENT_STORAGE => {
                CloudError::QuotaExceeded("WebDAV server is out of space".to_string())
            }
            StatusCode::NOT_FOUND => CloudError::NotFound(what.to_string()),
            _ => CloudError::Api {
                status: status.as_u16(),
                message: format!("{what}: {body}"),
            },
        })
    }

    async fn propfind(&self, url: Url, depth: u8, body: &'static str) -> CloudResult<Vec<DavEntry>> {
        let resp = self
            .request(dav_method("PROPFIND")?, url)
            .header("Depth", depth.to_string())
            .header("Content-Type", "application/xml; charset=utf-8")
            .body(body)
            .send()
            .await?;
        let xml = Self::check("PROPFIND", resp).await?.text().await?;
        parse_multistatus(&xml)
    }

    async fn ensure_folder(&self) -> CloudResult<()> {
        let mut ready = self.folder_ready.lock().await;
        if *ready {
            return Ok(());
        }

        match self
            .propfind(self.folder_url.clone(), 0, PROPFIND_ENTRIES)
            .await
        {
            Ok(_) => {}
            Err(CloudError::NotFound(_)) => {
                let resp = self
                    .request(dav_method("MKCOL")?, self.folder_url.clone())
                    .send()
                    .await?;
                // 405: created concurrently by another client
                if resp.status() != StatusCode::METHOD_NOT_ALLOWED {
                    Self::check("MKCOL", resp).await?;
                    info!("created WebDAV folder {}", self.config.folder_name);
                }
            }
            Err(e) => return Err(e),
        }

        *ready = true;
        Ok(())
    }

    fn file_url(&self, name: &str) -> CloudResult<Url> {
        self.folder_url
            .join(&urlencoding::encode(name))
            .map_err(|e| CloudError::Config(format!("invalid vault file name {name}: {e}")))
    }

    /// Resolves a remote reference, refusing URLs on a different origin so
    /// credentials never leave the configured server.
    fn resolve(&self, remote: &RemoteVaultRef) -> CloudResult<Url> {
        let url = self
            .base_url
            .join(&remote.id)
            .map_err(|e| CloudError::Config(format!("invalid WebDAV href: {e}")))?;
        if url.origin() != self.base_url.origin() {
            return Err(CloudError::Config(format!(
                "refusing to follow href to another server: {url}"
            )));
        }
        Ok(url)
    }

    async fn upload_once(&self, name: &str, bytes: &[u8]) -> CloudResult<RemoteVaultRef> {
        self.ensure_folder().await?;

        let target = self.file_url(name)?;
        let staging = self.file_url(&format!(".{name}.{}.part", uuid::Uuid::new_v4().simple()))?;

        let resp = self
            .request(Method::PUT, staging.clone())
            .header("Content-Type", "application/octet-stream")
            .body(bytes.to_vec())
            .send()
            .await?;
        Self::check("PUT", resp).await?;

        let resp = self
            .request(dav_method("MOVE")?, staging.clone())
            .header("Destination", target.as_str())
            .header("Overwrite", "T")
            .send()
            .await?;
        if let Err(e) = Self::check("MOVE", resp).await {
            // Leave nothing half-done behind
            if let Err(cleanup) = self.request(Method::DELETE, staging).send().await {
                debug!("failed to remove staging file: {cleanup}");
            }
            return Err(e);
        }

        debug!("uploaded {name} to WebDAV ({} bytes)", bytes.len());
        Ok(RemoteVaultRef {
            id: target.path().to_string(),
            name: name.to_string(),
            provider: ProviderKind::WebDav,
            size_bytes: bytes.len() as u64,
            modified_at: None,
        })
    }

    async fn download_once(&self, remote: &RemoteVaultRef) -> CloudResult<Vec<u8>> {
        let url = self.resolve(remote)?;
        let resp = self.request(Method::GET, url).send().await?;
        let bytes = Self::check("GET", resp).await?.bytes().await?;
        debug!("downloaded {} from WebDAV ({} bytes)", remote.name, bytes.len());
        Ok(bytes.to_vec())
    }

    async fn list_once(&self) -> CloudResult<Vec<RemoteVaultRef>> {
        self.ensure_folder().await?;
        let entries = self
            .propfind(self.folder_url.clone(), 1, PROPFIND_ENTRIES)
            .await?;

        Ok(entries
            .into_iter()
            .filter(|e| !e.is_collection)
            .map(|e| RemoteVaultRef {
                name: file_name(&e.href),
                id: e.href,
                provider: ProviderKind::WebDav,
                size_bytes: e.content_length.unwrap_or(0),
                modified_at: e.last_modified,
            })
            .filter(|r| !r.name.starts_with('.'))
            .collect())
    }

    async fn quota_once(&self) -> CloudResult<QuotaInfo> {
        let entries = self
            .propfind(self.base_url.clone(), 0, PROPFIND_QUOTA)
            .await?;
        let entry = entries.into_iter().next().unwrap_or_default();
        let used = entry.quota_used.unwrap_or(0);
        // RFC 4331: negative or missing available bytes means unknown
        let total = entry
            .quota_available
            .and_then(|a| u64::try_from(a).ok())
            .map(|available| used.saturating_add(available));
        Ok(QuotaInfo {
            used_bytes: used,
            total_bytes: total,
        })
    }
}

#[async_trait]
impl CloudProvider for WebDavProvider {
    fn kind(&self) -> ProviderKind {
        ProviderKind::WebDav
    }

    async fn authenticate(&self) -> CloudResult<AuthOutcome> {
        self.retry
            .run("WebDAV login", move || async move {
                self.propfind(self.base_url.clone(), 0, PROPFIND_ENTRIES)
                    .await
                    .map(|_| ())
            })
            .await?;
        info!("WebDAV credentials accepted by {}", self.account_id());
        Ok(AuthOutcome::Authenticated)
    }

    async fn upload_vault(&self, name: &str, bytes: &[u8]) -> CloudResult<RemoteVaultRef> {
        self.retry
            .run("WebDAV upload", move || self.upload_once(name, bytes))
            .await
    }

    async fn download_vault(&self, remote: &RemoteVaultRef) -> CloudResult<Vec<u8>> {
        self.retry
            .run("WebDAV download", move || self.download_once(remote))
            .await
    }

    async fn list_vaults(&self) -> CloudResult<Vec<RemoteVaultRef>> {
        self.retry.run("WebDAV list", move || self.list_once()).await
    }

    async fn get_quota(&self) -> CloudResult<QuotaInfo> {
        self.retry.run("WebDAV quota", move || self.quota_once()).await
    }

    async fn sign_out(&self) -> CloudResult<()> {
        *self.folder_ready.lock().await = false;
        if let Some(store) = &self.store {
            store.delete(ProviderKind::WebDav, &self.account_id())?;
        }
        info!("WebDAV account {} signed out", self.account_id());
        Ok(())
    }
}
