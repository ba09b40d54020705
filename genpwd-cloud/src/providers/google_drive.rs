//! Google Drive v3 transport.
//!
//! Vault files live in one folder of the user's Drive, created on first
//! use. New files go up as a single `multipart/related` request carrying
//! metadata and content together; existing files are replaced with a media
//! `PATCH`. Either way the file flips from old to new content in one step.

use crate::config::GoogleDriveConfig;
use crate::error::{CloudError, CloudResult};
use crate::oauth::OAuthAuthenticator;
use crate::provider::CloudProvider;
use crate::retry::RetryPolicy;
use crate::types::{
    AuthOutcome, ProviderKind, QuotaInfo, RemoteVaultRef, deserialize_u64_from_str_or_num,
};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use reqwest::{Client, RequestBuilder, Response, StatusCode};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::RwLock;
use tracing::{debug, info};

const FOLDER_MIME: &str = "application/vnd.google-apps.folder";
const FILE_FIELDS: &str = "id,name,size,modifiedTime";

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct DriveFile {
    id: String,
    name: String,
    #[serde(default, deserialize_with = "deserialize_u64_from_str_or_num")]
    size: Option<u64>,
    modified_time: Option<DateTime<Utc>>,
}

impl DriveFile {
    fn into_ref(self) -> RemoteVaultRef {
        RemoteVaultRef {
            id: self.id,
            name: self.name,
            provider: ProviderKind::GoogleDrive,
            size_bytes: self.size.unwrap_or(0),
            modified_at: self.modified_time,
        }
    }
}

#[derive(Deserialize)]
struct DriveFileList {
    #[serde(default)]
    files: Vec<DriveFile>,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct About {
    storage_quota: StorageQuota,
}

#[derive(Deserialize)]
struct StorageQuota {
    #[serde(default, deserialize_with = "deserialize_u64_from_str_or_num")]
    limit: Option<u64>,
    #[serde(default, deserialize_with = "deserialize_u64_from_str_or_num")]
    usage: Option<u64>,
}

/// Escapes a value for use inside a single-quoted Drive query literal.
fn quote(value: &str) -> String {
    value.replace('\\', "\\\\").replace('\'', "\\'")
}

/// Google Drive implementation of [`CloudProvider`].
pub struct GoogleDriveProvider {
    config: GoogleDriveConfig,
    auth: Arc<OAuthAuthenticator>,
    client: Client,
    retry: RetryPolicy,
    folder_id: RwLock<Option<String>>,
}

impl GoogleDriveProvider {
    pub fn new(
        config: GoogleDriveConfig,
        auth: Arc<OAuthAuthenticator>,
        retry: RetryPolicy,
    ) -> CloudResult<Self> {
        let client = Client::builder()
            .timeout(Duration::from_secs(config.request_timeout_secs))
            .build()
            .map_err(|e| CloudError::Config(format!("failed to build HTTP client: {e}")))?;

        Ok(Self {
            config,
            auth,
            client,
            retry,
            folder_id: RwLock::new(None),
        })
    }

    pub fn authenticator(&self) -> &Arc<OAuthAuthenticator> {
        &self.auth
    }

    fn files_url(&self) -> String {
        format!("{}/drive/v3/files", self.config.api_base_url)
    }

    fn upload_url(&self) -> String {
        format!("{}/upload/drive/v3/files", self.config.upload_base_url)
    }

    /// Sends an authenticated request, refreshing the token and retrying
    /// once on 401. A second 401 is an authentication failure.
    async fn send<F>(&self, what: &str, build: F) -> CloudResult<Response>
    where
        F: Fn(&Client, &str) -> RequestBuilder,
    {
        let token = self.auth.access_token().await?;
        let resp = build(&self.client, &token).send().await?;

        let resp = if resp.status() == StatusCode::UNAUTHORIZED {
            debug!("401 on {what}, refreshing token");
            let token = self.auth.refresh_access_token().await?;
            let retried = build(&self.client, &token).send().await?;
            if retried.status() == StatusCode::UNAUTHORIZED {
                return Err(CloudError::Authentication(format!(
                    "Google Drive rejected the refreshed token on {what}"
                )));
            }
            retried
        } else {
            resp
        };

        Self::check(what, resp).await
    }

    /// Maps Drive error responses onto the error taxonomy.
    async fn check(what: &str, resp: Response) -> CloudResult<Response> {
        let status = resp.status();
        if status.is_success() {
            return Ok(resp);
        }

        let body = resp.text().await.unwrap_or_default();
        Err(match status {
            StatusCode::FORBIDDEN if body.contains("storageQuotaExceeded") => {
                CloudError::QuotaExceeded("Google Drive storage is full".to_string())
            }
            StatusCode::FORBIDDEN
                if body.contains("rateLimitExceeded") || body.contains("userRateLimitExceeded") =>
            {
                CloudError::Api {
                    status: 429,
                    message: format!("{what}: rate limited"),
                }
            }
            StatusCode::NOT_FOUND => CloudError::NotFound(format!("{what}: {body}")),
            _ => CloudError::Api {
                status: status.as_u16(),
                message: format!("{what}: {body}"),
            },
        })
    }

    /// Returns the vault folder id, creating the folder if needed.
    async fn ensure_folder(&self) -> CloudResult<String> {
        if let Some(id) = self.folder_id.read().await.clone() {
            return Ok(id);
        }

        let query = format!(
            "name='{}' and mimeType='{FOLDER_MIME}' and trashed=false",
            quote(&self.config.folder_name)
        );
        let url = self.files_url();
        let list: DriveFileList = self
            .send("folder lookup", |c, token| {
                c.get(&url)
                    .bearer_auth(token)
                    .query(&[("q", query.as_str()), ("fields", "files(id,name)"), ("spaces", "drive")])
            })
            .await?
            .json()
            .await?;

        let id = match list.files.into_iter().next() {
            Some(folder) => folder.id,
            None => {
                #[derive(Serialize)]
                #[serde(rename_all = "camelCase")]
                struct CreateFolder<'a> {
                    name: &'a str,
                    mime_type: &'a str,
                }

                let body = CreateFolder {
                    name: &self.config.folder_name,
                    mime_type: FOLDER_MIME,
                };
                let folder: DriveFile = self
                    .send("folder create", |c, token| {
                        c.post(&url).bearer_auth(token).query(&[("fields", "id,name")]).json(&body)
                    })
                    .await?
                    .json()
                    .await?;
                info!("created Drive folder {}", self.config.folder_name);
                folder.id
            }
        };

        *self.folder_id.write().await = Some(id.clone());
        Ok(id)
    }

    async fn find_in_folder(&self, folder_id: &str, name: &str) -> CloudResult<Option<DriveFile>> {
        let query = format!(
            "name='{}' and '{}' in parents and trashed=false",
            quote(name),
            quote(folder_id)
        );
        let url = self.files_url();
        let fields = format!("files({FILE_FIELDS})");
        let list: DriveFileList = self
            .send("file lookup", |c, token| {
                c.get(&url)
                    .bearer_auth(token)
                    .query(&[("q", query.as_str()), ("fields", fields.as_str())])
            })
            .await?
            .json()
            .await?;
        Ok(list.files.into_iter().next())
    }

    async fn upload_once(&self, name: &str, bytes: &[u8]) -> CloudResult<RemoteVaultRef> {
        let folder_id = self.ensure_folder().await?;

        let file: DriveFile = match self.find_in_folder(&folder_id, name).await? {
            Some(existing) => {
                let url = format!("{}/{}", self.upload_url(), existing.id);
                self.send("file update", |c, token| {
                    c.patch(&url)
                        .bearer_auth(token)
                        .query(&[("uploadType", "media"), ("fields", FILE_FIELDS)])
                        .header("Content-Type", "application/octet-stream")
                        .body(bytes.to_vec())
                })
                .await?
                .json()
                .await?
            }
            None => {
                #[derive(Serialize)]
                struct FileMetadata<'a> {
                    name: &'a str,
                    parents: [&'a str; 1],
                }

                let metadata = serde_json::to_string(&FileMetadata {
                    name,
                    parents: [folder_id.as_str()],
                })?;
                let boundary = format!("genpwd-{}", uuid::Uuid::new_v4().simple());
                let body = multipart_related(&boundary, &metadata, bytes);
                let url = self.upload_url();
                self.send("file create", |c, token| {
                    c.post(&url)
                        .bearer_auth(token)
                        .query(&[("uploadType", "multipart"), ("fields", FILE_FIELDS)])
                        .header(
                            "Content-Type",
                            format!("multipart/related; boundary={boundary}"),
                        )
                        .body(body.clone())
                })
                .await?
                .json()
                .await?
            }
        };

        debug!("uploaded {name} to Drive ({} bytes)", bytes.len());
        Ok(file.into_ref())
    }

    async fn download_once(&self, remote: &RemoteVaultRef) -> CloudResult<Vec<u8>> {
        let url = format!("{}/{}", self.files_url(), remote.id);
        let bytes = self
            .send("file download", |c, token| {
                c.get(&url).bearer_auth(token).query(&[("alt", "media")])
            })
            .await?
            .bytes()
            .await?;
        debug!("downloaded {} from Drive ({} bytes)", remote.name, bytes.len());
        Ok(bytes.to_vec())
    }

    async fn list_once(&self) -> CloudResult<Vec<RemoteVaultRef>> {
        let folder_id = self.ensure_folder().await?;
        let query = format!("'{}' in parents and trashed=false", quote(&folder_id));
        let fields = format!("files({FILE_FIELDS})");
        let url = self.files_url();
        let list: DriveFileList = self
            .send("file list", |c, token| {
                c.get(&url).bearer_auth(token).query(&[
                    ("q", query.as_str()),
                    ("fields", fields.as_str()),
                    ("pageSize", "1000"),
                ])
            })
            .await?
            .json()
            .await?;
        Ok(list.files.into_iter().map(DriveFile::into_ref).collect())
    }

    async fn quota_once(&self) -> CloudResult<QuotaInfo> {
        let url = format!("{}/drive/v3/about", self.config.api_base_url);
        let about: About = self
            .send("quota", |c, token| {
                c.get(&url).bearer_auth(token).query(&[("fields", "storageQuota")])
            })
            .await?
            .json()
            .await?;
        Ok(QuotaInfo {
            used_bytes: about.storage_quota.usage.unwrap_or(0),
            total_bytes: about.storage_quota.limit,
        })
    }
}

/// Builds a two-part `multipart/related` body: JSON metadata, then content.
fn multipart_related(boundary: &str, metadata_json: &str, content: &[u8]) -> Vec<u8> {
    let head = format!(
        "--{boundary}\r\nContent-Type: application/json; charset=UTF-8\r\n\r\n{metadata_json}\r\n--{boundary}\r\nContent-Type: application/octet-stream\r\n\r\n"
    );
    let mut body = head.into_bytes();
    body.extend_from_slice(content);
    body.extend_from_slice(format!("\r\n--{boundary}--").as_bytes());
    body
}

#[async_trait]
impl CloudProvider for GoogleDriveProvider {
    fn kind(&self) -> ProviderKind {
        ProviderKind::GoogleDrive
    }

    async fn authenticate(&self) -> CloudResult<AuthOutcome> {
        if self.auth.is_authenticated().await {
            self.auth.access_token().await?;
            return Ok(AuthOutcome::Authenticated);
        }
        let authorization_url = self.auth.begin_authorization().await?;
        Ok(AuthOutcome::Pending { authorization_url })
    }

    async fn upload_vault(&self, name: &str, bytes: &[u8]) -> CloudResult<RemoteVaultRef> {
        self.retry
            .run("Drive upload", move || self.upload_once(name, bytes))
            .await
    }

    async fn download_vault(&self, remote: &RemoteVaultRef) -> CloudResult<Vec<u8>> {
        self.retry
            .run("Drive download", move || self.download_once(remote))
            .await
    }

    async fn list_vaults(&self) -> CloudResult<Vec<RemoteVaultRef>> {
        self.retry.run("Drive list", move || self.list_once()).await
    }

    async fn get_quota(&self) -> CloudResult<QuotaInfo> {
        self.retry.run("Drive quota", move || self.quota_once()).await
    }

    async fn sign_out(&self) -> CloudResult<()> {
        *self.folder_id.write().await = None;
        self.auth.sign_out().await
    }

    async fn find_vault(&self, name: &str) -> CloudResult<Option<RemoteVaultRef>> {
        self.retry
            .run("Drive lookup", move || async move {
                let folder_id = self.ensure_folder().await?;
                Ok(self
                    .find_in_folder(&folder_id, name)
                    .await?
                    .map(DriveFile::into_ref))
            })
            .await
    }
}
