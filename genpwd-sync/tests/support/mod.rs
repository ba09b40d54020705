//! In-memory provider and repository doubles for sync tests.

#![allow(dead_code)]

use async_trait::async_trait;
use chrono::Utc;
use genpwd_cloud::{
    AuthOutcome, CloudError, CloudProvider, CloudResult, ProviderKind, ProviderRegistry,
    QuotaInfo, RemoteVaultRef,
};
use genpwd_crypto::{KdfParams, Salt, Zeroizing};
use genpwd_sync::{
    HistoryStore, MemoryHistoryStore, SyncConfig, SyncError, SyncResult, VaultRepository,
    VaultSyncManager,
};
use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tracing_subscriber::EnvFilter;

pub const VAULT: &str = "v1";
pub const PASSWORD: &str = "correct horse battery staple";

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum AuthMode {
    Ok,
    Pending,
    Expired,
}

/// Remote store shared by every device that registers it.
pub struct MockProvider {
    kind: ProviderKind,
    files: Mutex<HashMap<String, Vec<u8>>>,
    auth: Mutex<AuthMode>,
    transfer_delay: Duration,
    calls: AtomicUsize,
    uploads: AtomicUsize,
    downloads: AtomicUsize,
    in_flight: AtomicUsize,
    max_in_flight: AtomicUsize,
    sign_outs: AtomicUsize,
}

impl MockProvider {
    pub fn new() -> Arc<Self> {
        Self::with_delay(Duration::ZERO)
    }

    /// Every upload and download takes `delay`.
    pub fn with_delay(delay: Duration) -> Arc<Self> {
        Arc::new(Self {
            kind: ProviderKind::WebDav,
            files: Mutex::new(HashMap::new()),
            auth: Mutex::new(AuthMode::Ok),
            transfer_delay: delay,
            calls: AtomicUsize::new(0),
            uploads: AtomicUsize::new(0),
            downloads: AtomicUsize::new(0),
            in_flight: AtomicUsize::new(0),
            max_in_flight: AtomicUsize::new(0),
            sign_outs: AtomicUsize::new(0),
        })
    }

    pub fn set_auth(&self, mode: AuthMode) {
        *self.auth.lock().unwrap() = mode;
    }

    pub fn file(&self, name: &str) -> Option<Vec<u8>> {
        self.files.lock().unwrap().get(name).cloned()
    }

    pub fn put_file(&self, name: &str, bytes: Vec<u8>) {
        self.files.lock().unwrap().insert(name.to_string(), bytes);
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    pub fn uploads(&self) -> usize {
        self.uploads.load(Ordering::SeqCst)
    }

    pub fn downloads(&self) -> usize {
        self.downloads.load(Ordering::SeqCst)
    }

    pub fn max_in_flight(&self) -> usize {
        self.max_in_flight.load(Ordering::SeqCst)
    }

    pub fn sign_outs(&self) -> usize {
        self.sign_outs.load(Ordering::SeqCst)
    }

    fn reference(&self, name: &str, size: usize) -> RemoteVaultRef {
        RemoteVaultRef {
            id: format!("id-{name}"),
            name: name.to_string(),
            provider: self.kind,
            size_bytes: size as u64,
            modified_at: Some(Utc::now()),
        }
    }

    async fn transfer(&self) {
        let now = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
        self.max_in_flight.fetch_max(now, Ordering::SeqCst);
        if !self.transfer_delay.is_zero() {
            tokio::time::sleep(self.transfer_delay).await;
        }
        self.in_flight.fetch_sub(1, Ordering::SeqCst);
    }
}

#[async_trait]
impl CloudProvider for MockProvider {
    fn kind(&self) -> ProviderKind {
        self.kind
    }

    async fn authenticate(&self) -> CloudResult<AuthOutcome> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        let mode = *self.auth.lock().unwrap();
        match mode {
            AuthMode::Ok => Ok(AuthOutcome::Authenticated),
            AuthMode::Pending => Ok(AuthOutcome::Pending {
                authorization_url: "https://auth.invalid/authorize".into(),
            }),
            AuthMode::Expired => Err(CloudError::Authentication(
                "re-authentication required".into(),
            )),
        }
    }

    async fn upload_vault(&self, name: &str, bytes: &[u8]) -> CloudResult<RemoteVaultRef> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        self.transfer().await;
        self.uploads.fetch_add(1, Ordering::SeqCst);
        self.put_file(name, bytes.to_vec());
        Ok(self.reference(name, bytes.len()))
    }

    async fn download_vault(&self, remote: &RemoteVaultRef) -> CloudResult<Vec<u8>> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        self.transfer().await;
        self.downloads.fetch_add(1, Ordering::SeqCst);
        self.file(&remote.name)
            .ok_or_else(|| CloudError::NotFound(remote.name.clone()))
    }

    async fn list_vaults(&self) -> CloudResult<Vec<RemoteVaultRef>> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        let files = self.files.lock().unwrap();
        let mut refs: Vec<_> = files
            .iter()
            .map(|(name, bytes)| self.reference(name, bytes.len()))
            .collect();
        refs.sort_by(|a, b| a.name.cmp(&b.name));
        Ok(refs)
    }

    async fn get_quota(&self) -> CloudResult<QuotaInfo> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        let used = self.files.lock().unwrap().values().map(|f| f.len() as u64).sum();
        Ok(QuotaInfo {
            used_bytes: used,
            total_bytes: Some(1 << 30),
        })
    }

    async fn sign_out(&self) -> CloudResult<()> {
        self.sign_outs.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }
}

/// One device's local vault store.
pub struct MockRepository {
    vaults: Mutex<HashMap<String, (Vec<u8>, i64)>>,
    salt: Salt,
    applies: AtomicUsize,
}

impl MockRepository {
    pub fn new() -> Arc<Self> {
        Arc::new(Self {
            vaults: Mutex::new(HashMap::new()),
            salt: shared_salt(),
            applies: AtomicUsize::new(0),
        })
    }

    pub fn with_vault(vault_id: &str, plaintext: &[u8], modified_at: i64) -> Arc<Self> {
        let repo = Self::new();
        repo.edit(vault_id, plaintext, modified_at);
        repo
    }

    /// Simulates a local edit.
    pub fn edit(&self, vault_id: &str, plaintext: &[u8], modified_at: i64) {
        self.vaults
            .lock()
            .unwrap()
            .insert(vault_id.to_string(), (plaintext.to_vec(), modified_at));
    }

    pub fn plaintext(&self, vault_id: &str) -> Option<Vec<u8>> {
        self.vaults
            .lock()
            .unwrap()
            .get(vault_id)
            .map(|(p, _)| p.clone())
    }

    pub fn applies(&self) -> usize {
        self.applies.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl VaultRepository for MockRepository {
    async fn get_plaintext(&self, vault_id: &str) -> SyncResult<Option<Zeroizing<Vec<u8>>>> {
        Ok(self.plaintext(vault_id).map(Zeroizing::new))
    }

    async fn apply_plaintext(&self, vault_id: &str, plaintext: &[u8]) -> SyncResult<()> {
        self.applies.fetch_add(1, Ordering::SeqCst);
        self.edit(vault_id, plaintext, Utc::now().timestamp_millis());
        Ok(())
    }

    async fn vault_salt(&self, _vault_id: &str) -> SyncResult<Salt> {
        Ok(self.salt)
    }

    async fn local_modified_at(&self, vault_id: &str) -> SyncResult<i64> {
        self.vaults
            .lock()
            .unwrap()
            .get(vault_id)
            .map(|(_, ts)| *ts)
            .ok_or_else(|| SyncError::Repository(format!("no local vault {vault_id}")))
    }
}

/// Every device of the same user shares the vault salt.
pub fn shared_salt() -> Salt {
    Salt::from_bytes([7; 16])
}

pub fn config(device_id: &str) -> SyncConfig {
    SyncConfig {
        device_id: device_id.to_string(),
        kdf: KdfParams::insecure_fast(),
        ..SyncConfig::default()
    }
}

/// A device syncing through `provider`.
pub struct Device {
    pub manager: Arc<VaultSyncManager>,
    pub repo: Arc<MockRepository>,
    pub history: Arc<MemoryHistoryStore>,
}

pub fn device(name: &str, provider: &Arc<MockProvider>, repo: Arc<MockRepository>) -> Device {
    let registry = Arc::new(ProviderRegistry::with_template_providers());
    registry.register(provider.clone());
    let history = Arc::new(MemoryHistoryStore::new());
    let manager = Arc::new(VaultSyncManager::new(
        registry,
        ProviderKind::WebDav,
        repo.clone(),
        history.clone() as Arc<dyn HistoryStore>,
        config(name),
    ));
    Device {
        manager,
        repo,
        history,
    }
}

pub fn remote_name() -> String {
    config("any").remote_file_name(VAULT)
}

pub fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::new("genpwd_sync=debug"))
        .with_test_writer()
        .try_init();
}
