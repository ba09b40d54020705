//! Vault sync manager: one encrypted vault, one remote file, one cycle at
//! a time per vault.
//!
//! A cycle authenticates, derives the key once, seals the local vault,
//! fetches the remote envelope and then either uploads, applies the remote
//! copy, reports "up to date" or hands both envelopes back as a conflict.
//! Conflicts are never resolved here without an explicit strategy.

use crate::config::SyncConfig;
use crate::conflict::{ConflictResolver, ConflictSide, Resolution, ResolutionStrategy};
use crate::error::{SyncError, SyncResult};
use crate::history::{
    ArchiveReason, ArchivedVersion, ConflictRecord, HistoryOutcome, HistoryStore,
    SyncHistoryEntry,
};
use crate::repository::VaultRepository;
use crate::status::{SyncPhase, SyncStatus, SyncStatusBoard};
use chrono::{DateTime, Utc};
use genpwd_cloud::{
    AuthOutcome, CloudProvider, ProviderKind, ProviderRegistry, QuotaInfo, RemoteVaultRef,
};
use genpwd_crypto::{CryptoError, DerivedKey, VaultEnvelope, Zeroizing, content_hash, derive_key};
use std::collections::HashMap;
use std::future::Future;
use std::sync::{Arc, Mutex, MutexGuard, RwLock};
use std::time::Instant;
use tokio::sync::OwnedMutexGuard;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

type TokioMutex<T> = tokio::sync::Mutex<T>;

/// Result of one [`VaultSyncManager::sync_vault`] call.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum SyncOutcome {
    /// Local content is now the remote content.
    Uploaded(RemoteVaultRef),
    /// Both sides already held the same content.
    UpToDate,
    /// Remote content was applied locally.
    Downloaded,
    /// Both sides changed. Resolve with [`VaultSyncManager::resolve_conflict`].
    Conflict {
        local: VaultEnvelope,
        remote: VaultEnvelope,
    },
}

impl SyncOutcome {
    pub fn history_outcome(&self) -> HistoryOutcome {
        match self {
            SyncOutcome::Uploaded(_) => HistoryOutcome::Uploaded,
            SyncOutcome::UpToDate => HistoryOutcome::UpToDate,
            SyncOutcome::Downloaded => HistoryOutcome::Downloaded,
            SyncOutcome::Conflict { .. } => HistoryOutcome::Conflict,
        }
    }
}

/// What a finished cycle writes to history.
struct CycleReport {
    outcome: HistoryOutcome,
    size_bytes: u64,
    content_hash: Option<String>,
}

impl CycleReport {
    fn new(outcome: HistoryOutcome, size_bytes: u64, content_hash: Option<&str>) -> Self {
        Self {
            outcome,
            size_bytes,
            content_hash: content_hash.map(str::to_owned),
        }
    }
}

struct FetchedRemote {
    reference: RemoteVaultRef,
    envelope: VaultEnvelope,
    size_bytes: u64,
}

/// Coordinates the repository, the active provider and the history store.
pub struct VaultSyncManager {
    registry: Arc<ProviderRegistry>,
    active: RwLock<ProviderKind>,
    repository: Arc<dyn VaultRepository>,
    history: Arc<dyn HistoryStore>,
    status: Arc<SyncStatusBoard>,
    resolver: ConflictResolver,
    config: SyncConfig,
    /// Single-flight gate per vault id.
    gates: GateMap,
    remote_refs: Mutex<HashMap<(ProviderKind, String), RemoteVaultRef>>,
}

impl VaultSyncManager {
    pub fn new(
        registry: Arc<ProviderRegistry>,
        active: ProviderKind,
        repository: Arc<dyn VaultRepository>,
        history: Arc<dyn HistoryStore>,
        config: SyncConfig,
    ) -> Self {
        Self {
            registry,
            active: RwLock::new(active),
            repository,
            history,
            status: Arc::new(SyncStatusBoard::new()),
            resolver: ConflictResolver::new(),
            config,
            gates: Mutex::new(HashMap::new()),
            remote_refs: Mutex::new(HashMap::new()),
        }
    }

    pub fn status(&self) -> &Arc<SyncStatusBoard> {
        &self.status
    }

    pub fn history(&self) -> &Arc<dyn HistoryStore> {
        &self.history
    }

    pub fn config(&self) -> &SyncConfig {
        &self.config
    }

    pub fn active_provider(&self) -> ProviderKind {
        *self.active.read().unwrap_or_else(|p| p.into_inner())
    }

    /// Switches the provider used by subsequent operations.
    pub fn set_active_provider(&self, kind: ProviderKind) {
        *self.active.write().unwrap_or_else(|p| p.into_inner()) = kind;
        info!("active sync provider set to {kind}");
    }

    /// Last reference seen for a vault on the active provider.
    pub fn cached_remote(&self, vault_id: &str) -> Option<RemoteVaultRef> {
        let key = (self.active_provider(), self.config.remote_file_name(vault_id));
        self.refs().get(&key).cloned()
    }

    /// Vaults with a cycle running or queued, sorted.
    pub fn busy_vaults(&self) -> Vec<String> {
        let mut ids: Vec<String> = self
            .gates
            .lock()
            .unwrap_or_else(|p| p.into_inner())
            .keys()
            .cloned()
            .collect();
        ids.sort();
        ids
    }

    // ── Sync ──

    pub async fn sync_vault(&self, vault_id: &str, password: &str) -> SyncResult<SyncOutcome> {
        self.sync_vault_cancellable(vault_id, password, &CancellationToken::new())
            .await
    }

    /// Like [`Self::sync_vault`], abandoning the cycle when `cancel` fires
    /// before the final upload or local apply. Nothing is written then.
    pub async fn sync_vault_cancellable(
        &self,
        vault_id: &str,
        password: &str,
        cancel: &CancellationToken,
    ) -> SyncResult<SyncOutcome> {
        let _in_flight = self.lease(vault_id).await;

        let cycle = CycleClock::start(self, vault_id);
        let result = self
            .run_sync(vault_id, password, cancel)
            .await
            .map(|(outcome, report)| (outcome, Some(report)));
        let outcome = self.finish(cycle, result).await?;
        info!("vault {vault_id} sync finished: {:?}", outcome.history_outcome());
        Ok(outcome)
    }

    async fn run_sync(
        &self,
        vault_id: &str,
        password: &str,
        cancel: &CancellationToken,
    ) -> SyncResult<(SyncOutcome, CycleReport)> {
        let provider = self.provider()?;
        self.status.set_phase(vault_id, SyncPhase::Authenticating);
        unless_cancelled(cancel, ensure_authenticated(provider.as_ref())).await?;

        let key = unless_cancelled(cancel, self.derive_key(vault_id, password)).await?;
        let local = match self.repository.get_plaintext(vault_id).await? {
            Some(plaintext) => Some(self.seal_local(vault_id, &key, &plaintext).await?),
            None => None,
        };

        self.status.set_phase(vault_id, SyncPhase::FetchingRemote);
        let name = self.config.remote_file_name(vault_id);
        let remote = unless_cancelled(cancel, self.fetch_remote(provider.as_ref(), &name)).await?;

        match (local, remote) {
            (None, None) => Err(SyncError::NotFound(format!(
                "vault {vault_id} has no local or remote copy"
            ))),
            (Some(local), None) => {
                let (reference, report) = self
                    .upload(vault_id, provider.as_ref(), &name, &local, cancel)
                    .await?;
                Ok((SyncOutcome::Uploaded(reference), report))
            }
            (None, Some(remote)) => {
                let plaintext = open_with_password(&remote.envelope, &key)?;
                let report = self.apply(vault_id, &remote, &plaintext, cancel).await?;
                Ok((SyncOutcome::Downloaded, report))
            }
            (Some(local), Some(remote)) => {
                self.status.set_phase(vault_id, SyncPhase::Comparing);
                if !self.resolver.has_conflict(&local, &remote.envelope) {
                    let report = CycleReport::new(
                        HistoryOutcome::UpToDate,
                        remote.size_bytes,
                        Some(local.content_hash()),
                    );
                    return Ok((SyncOutcome::UpToDate, report));
                }

                // Every branch below replaces or reports against the remote
                // copy, so the password must open it first.
                let remote_plaintext = open_with_password(&remote.envelope, &key)?;

                let last_synced = {
                    let vault_id = vault_id.to_string();
                    let kind = provider.kind();
                    self.with_history(move |h| h.last_synced_hash(&vault_id, kind))
                        .await?
                };

                match last_synced.as_deref() {
                    // Only the remote side moved since the last sync
                    Some(hash) if hash == local.content_hash() => {
                        debug!("vault {vault_id}: fast-forwarding to remote");
                        let report = self
                            .apply(vault_id, &remote, &remote_plaintext, cancel)
                            .await?;
                        Ok((SyncOutcome::Downloaded, report))
                    }
                    // Only the local side moved
                    Some(hash) if hash == remote.envelope.content_hash() => {
                        let (reference, report) = self
                            .upload(vault_id, provider.as_ref(), &name, &local, cancel)
                            .await?;
                        Ok((SyncOutcome::Uploaded(reference), report))
                    }
                    _ => {
                        warn!("vault {vault_id}: local and remote both changed");
                        self.status
                            .set_phase(vault_id, SyncPhase::AwaitingResolution);
                        let report =
                            CycleReport::new(HistoryOutcome::Conflict, remote.size_bytes, None);
                        Ok((
                            SyncOutcome::Conflict {
                                local,
                                remote: remote.envelope,
                            },
                            report,
                        ))
                    }
                }
            }
        }
    }

    // ── Download ──

    /// Replaces the local vault with the remote copy.
    ///
    /// Returns `false` when there is no remote copy. A wrong password fails
    /// with [`SyncError::Decryption`] before anything local is touched.
    /// Differing local content is archived first.
    pub async fn download_vault(&self, vault_id: &str, password: &str) -> SyncResult<bool> {
        self.download_vault_cancellable(vault_id, password, &CancellationToken::new())
            .await
    }

    pub async fn download_vault_cancellable(
        &self,
        vault_id: &str,
        password: &str,
        cancel: &CancellationToken,
    ) -> SyncResult<bool> {
        let _in_flight = self.lease(vault_id).await;

        let cycle = CycleClock::start(self, vault_id);
        let result = self.run_download(vault_id, password, cancel).await;
        self.finish(cycle, result).await
    }

    async fn run_download(
        &self,
        vault_id: &str,
        password: &str,
        cancel: &CancellationToken,
    ) -> SyncResult<(bool, Option<CycleReport>)> {
        let provider = self.provider()?;
        self.status.set_phase(vault_id, SyncPhase::Authenticating);
        unless_cancelled(cancel, ensure_authenticated(provider.as_ref())).await?;

        self.status.set_phase(vault_id, SyncPhase::FetchingRemote);
        let name = self.config.remote_file_name(vault_id);
        let Some(remote) =
            unless_cancelled(cancel, self.fetch_remote(provider.as_ref(), &name)).await?
        else {
            info!("vault {vault_id} has no remote copy on {}", provider.kind());
            return Ok((false, None));
        };

        let key = unless_cancelled(cancel, self.derive_key(vault_id, password)).await?;
        let plaintext = open_with_password(&remote.envelope, &key)?;

        self.status.set_phase(vault_id, SyncPhase::Comparing);
        if let Some(local) = self.repository.get_plaintext(vault_id).await? {
            if content_hash(&local) == remote.envelope.content_hash() {
                let report = CycleReport::new(
                    HistoryOutcome::UpToDate,
                    remote.size_bytes,
                    Some(remote.envelope.content_hash()),
                );
                return Ok((true, Some(report)));
            }
            checkpoint(cancel)?;
            let envelope = self.seal_local(vault_id, &key, &local).await?;
            self.archive(vault_id, envelope, ArchiveReason::OverwrittenByDownload)
                .await?;
        }

        let report = self.apply(vault_id, &remote, &plaintext, cancel).await?;
        Ok((true, Some(report)))
    }

    // ── Conflict Resolution ──

    /// Applies `strategy` to a conflict returned by [`Self::sync_vault`].
    ///
    /// The losing envelope is archived first, then the winner is uploaded
    /// (re-sealed) or applied locally, and a [`ConflictRecord`] is written.
    /// `MANUAL` flags the vault and fails with [`SyncError::ConflictPending`].
    pub async fn resolve_conflict(
        &self,
        vault_id: &str,
        local: &VaultEnvelope,
        remote: &VaultEnvelope,
        strategy: ResolutionStrategy,
        password: &str,
    ) -> SyncResult<ConflictSide> {
        let (winner, winning, losing) = match self.resolver.resolve(local, remote, strategy)? {
            Resolution::Resolved {
                winner,
                winning,
                losing,
            } => (winner, winning, losing),
            Resolution::Pending => {
                self.status.flag_conflict(vault_id);
                self.status
                    .set_phase(vault_id, SyncPhase::AwaitingResolution);
                return Err(SyncError::ConflictPending {
                    vault_id: vault_id.to_string(),
                });
            }
        };

        let _in_flight = self.lease(vault_id).await;

        let cycle = CycleClock::start(self, vault_id);
        self.status.set_phase(vault_id, SyncPhase::Resolving);
        let result = self
            .run_resolution(vault_id, password, winner, &winning, losing)
            .await;
        let result = match result {
            Ok(report) => {
                let record = ConflictRecord {
                    id: Uuid::new_v4(),
                    vault_id: vault_id.to_string(),
                    local: local.into(),
                    remote: remote.into(),
                    strategy_applied: strategy,
                    winner,
                    resolved_at: Utc::now(),
                    losing_version_archived: true,
                };
                self.with_history(move |h| h.append_conflict(&record))
                    .await
                    .map(|()| (winner, Some(report)))
            }
            Err(e) => Err(e),
        };
        let winner = self.finish(cycle, result).await?;
        self.status.clear_conflict(vault_id);
        info!("vault {vault_id} conflict resolved with {strategy}: {} wins", winner.as_str());
        Ok(winner)
    }

    async fn run_resolution(
        &self,
        vault_id: &str,
        password: &str,
        winner: ConflictSide,
        winning: &VaultEnvelope,
        losing: VaultEnvelope,
    ) -> SyncResult<CycleReport> {
        let provider = self.provider()?;
        ensure_authenticated(provider.as_ref()).await?;
        let key = self.derive_key(vault_id, password).await?;

        // The password must open the winner before anything is replaced
        let plaintext = open_with_password(winning, &key)?;
        if winner == ConflictSide::Local {
            // `losing` is the remote copy about to be overwritten
            open_with_password(&losing, &key)?;
        }
        self.archive(vault_id, losing, ArchiveReason::ConflictLoser)
            .await?;

        let name = self.config.remote_file_name(vault_id);
        let never = CancellationToken::new();
        match winner {
            ConflictSide::Local => {
                let resealed = VaultEnvelope::seal(
                    &key,
                    &plaintext,
                    self.config.device_id.clone(),
                    winning.timestamp(),
                )?;
                let (_, mut report) = self
                    .upload(vault_id, provider.as_ref(), &name, &resealed, &never)
                    .await?;
                report.outcome = HistoryOutcome::Resolved;
                Ok(report)
            }
            ConflictSide::Remote => {
                self.status.set_phase(vault_id, SyncPhase::Applying);
                self.repository.apply_plaintext(vault_id, &plaintext).await?;
                Ok(CycleReport::new(
                    HistoryOutcome::Resolved,
                    winning.ciphertext().len() as u64,
                    Some(winning.content_hash()),
                ))
            }
        }
    }

    // ── Provider Pass-through ──

    pub async fn get_storage_quota(&self) -> SyncResult<QuotaInfo> {
        Ok(self.provider()?.get_quota().await?)
    }

    pub async fn list_cloud_vaults(&self) -> SyncResult<Vec<RemoteVaultRef>> {
        let vaults = self.provider()?.list_vaults().await?;
        let mut refs = self.refs();
        for vault in &vaults {
            refs.insert((vault.provider, vault.name.clone()), vault.clone());
        }
        Ok(vaults)
    }

    /// Signs out of the active provider and forgets its remote references.
    pub async fn remove_account(&self) -> SyncResult<()> {
        let provider = self.provider()?;
        let kind = provider.kind();
        provider.sign_out().await?;
        self.refs().retain(|(k, _), _| *k != kind);
        info!("removed {kind} account");
        Ok(())
    }

    // ── Internals ──

    fn provider(&self) -> SyncResult<Arc<dyn CloudProvider>> {
        Ok(self.registry.require(self.active_provider())?)
    }

    /// Waits for exclusive use of a vault. The gate is dropped from the
    /// map once its last holder or waiter is gone.
    async fn lease(&self, vault_id: &str) -> GateLease<'_> {
        let gate = self
            .gates
            .lock()
            .unwrap_or_else(|p| p.into_inner())
            .entry(vault_id.to_string())
            .or_default()
            .clone();
        let guard = gate.lock_owned().await;
        GateLease {
            gates: &self.gates,
            vault_id: vault_id.to_string(),
            guard: Some(guard),
        }
    }

    fn refs(&self) -> MutexGuard<'_, HashMap<(ProviderKind, String), RemoteVaultRef>> {
        self.remote_refs.lock().unwrap_or_else(|p| p.into_inner())
    }

    /// Argon2id on a blocking thread; the password copy is wiped afterwards.
    async fn derive_key(&self, vault_id: &str, password: &str) -> SyncResult<DerivedKey> {
        let salt = self.repository.vault_salt(vault_id).await?;
        let password = Zeroizing::new(password.to_string());
        let params = self.config.kdf;
        let key =
            tokio::task::spawn_blocking(move || derive_key(&password, &salt, &params)).await??;
        Ok(key)
    }

    async fn seal_local(
        &self,
        vault_id: &str,
        key: &DerivedKey,
        plaintext: &[u8],
    ) -> SyncResult<VaultEnvelope> {
        let modified_at = self.repository.local_modified_at(vault_id).await?;
        Ok(VaultEnvelope::seal(
            key,
            plaintext,
            self.config.device_id.clone(),
            modified_at,
        )?)
    }

    async fn fetch_remote(
        &self,
        provider: &dyn CloudProvider,
        name: &str,
    ) -> SyncResult<Option<FetchedRemote>> {
        let Some(reference) = provider.find_vault(name).await? else {
            return Ok(None);
        };
        let bytes = provider.download_vault(&reference).await?;
        debug!("fetched {name} from {} ({} bytes)", provider.kind(), bytes.len());
        let envelope = VaultEnvelope::from_json(&bytes)?;
        self.refs()
            .insert((reference.provider, reference.name.clone()), reference.clone());
        Ok(Some(FetchedRemote {
            reference,
            envelope,
            size_bytes: bytes.len() as u64,
        }))
    }

    async fn upload(
        &self,
        vault_id: &str,
        provider: &dyn CloudProvider,
        name: &str,
        envelope: &VaultEnvelope,
        cancel: &CancellationToken,
    ) -> SyncResult<(RemoteVaultRef, CycleReport)> {
        let bytes = envelope.to_json()?;
        checkpoint(cancel)?;
        self.status.set_phase(vault_id, SyncPhase::Uploading);
        let reference = provider.upload_vault(name, &bytes).await?;
        debug!("uploaded vault {vault_id} ({} bytes)", bytes.len());
        self.refs()
            .insert((reference.provider, reference.name.clone()), reference.clone());
        let report = CycleReport::new(
            HistoryOutcome::Uploaded,
            bytes.len() as u64,
            Some(envelope.content_hash()),
        );
        Ok((reference, report))
    }

    async fn apply(
        &self,
        vault_id: &str,
        remote: &FetchedRemote,
        plaintext: &[u8],
        cancel: &CancellationToken,
    ) -> SyncResult<CycleReport> {
        checkpoint(cancel)?;
        self.status.set_phase(vault_id, SyncPhase::Applying);
        self.repository.apply_plaintext(vault_id, plaintext).await?;
        debug!(
            "applied {} from {} to vault {vault_id}",
            remote.reference.name, remote.reference.provider
        );
        Ok(CycleReport::new(
            HistoryOutcome::Downloaded,
            remote.size_bytes,
            Some(remote.envelope.content_hash()),
        ))
    }

    async fn archive(
        &self,
        vault_id: &str,
        envelope: VaultEnvelope,
        reason: ArchiveReason,
    ) -> SyncResult<()> {
        let version = ArchivedVersion {
            id: Uuid::new_v4(),
            vault_id: vault_id.to_string(),
            envelope,
            archived_at: Utc::now(),
            reason,
        };
        debug!("archiving vault {vault_id} version ({})", reason.as_str());
        self.with_history(move |h| h.archive(&version)).await
    }

    async fn with_history<T, F>(&self, f: F) -> SyncResult<T>
    where
        T: Send + 'static,
        F: FnOnce(&dyn HistoryStore) -> SyncResult<T> + Send + 'static,
    {
        let history = self.history.clone();
        tokio::task::spawn_blocking(move || f(history.as_ref())).await?
    }

    /// Writes the history entry and final status for a cycle.
    ///
    /// A `None` report means nothing happened: status is restored and no
    /// entry is written.
    async fn finish<T>(
        &self,
        cycle: CycleClock,
        result: SyncResult<(T, Option<CycleReport>)>,
    ) -> SyncResult<T> {
        let vault_id = cycle.vault_id.clone();
        let (value, report) = match result {
            Ok((value, Some(report))) => {
                if report.outcome == HistoryOutcome::Conflict {
                    self.status.set_status(&vault_id, SyncStatus::Conflict);
                } else {
                    self.status.set_status(&vault_id, SyncStatus::Synced);
                    self.status.set_phase(&vault_id, SyncPhase::Done);
                }
                (Ok(value), report)
            }
            Ok((value, None)) => {
                self.status.set_status(&vault_id, cycle.previous);
                self.status.set_phase(&vault_id, SyncPhase::Idle);
                return Ok(value);
            }
            Err(SyncError::Cancelled) => {
                info!("vault {vault_id} sync cancelled");
                self.status.set_status(&vault_id, cycle.previous);
                self.status.set_phase(&vault_id, SyncPhase::Idle);
                let report = CycleReport::new(HistoryOutcome::Cancelled, 0, None);
                (Err(SyncError::Cancelled), report)
            }
            Err(e) => {
                error!("vault {vault_id} sync failed: {e}");
                self.status.set_status(&vault_id, SyncStatus::Error);
                self.status.set_phase(&vault_id, SyncPhase::Error);
                let report = CycleReport::new(HistoryOutcome::Error(e.to_string()), 0, None);
                (Err(e), report)
            }
        };

        let entry = SyncHistoryEntry {
            id: Uuid::new_v4(),
            vault_id,
            provider: cycle.provider,
            started_at: cycle.started_at,
            duration_ms: cycle.clock.elapsed().as_millis() as u64,
            size_bytes: report.size_bytes,
            outcome: report.outcome,
            content_hash: report.content_hash,
        };
        if let Err(e) = self.with_history(move |h| h.append_entry(&entry)).await {
            error!("failed to record sync history: {e}");
        }
        value
    }
}

type GateMap = Mutex<HashMap<String, Arc<TokioMutex<()>>>>;

/// Held for the duration of one vault operation.
struct GateLease<'a> {
    gates: &'a GateMap,
    vault_id: String,
    guard: Option<OwnedMutexGuard<()>>,
}

impl Drop for GateLease<'_> {
    fn drop(&mut self) {
        drop(self.guard.take());
        let mut gates = self.gates.lock().unwrap_or_else(|p| p.into_inner());
        // Waiters hold their own clone, so a count of one means only the map
        if gates
            .get(&self.vault_id)
            .is_some_and(|gate| Arc::strong_count(gate) == 1)
        {
            gates.remove(&self.vault_id);
        }
    }
}

/// Start-of-cycle bookkeeping for the history entry.
struct CycleClock {
    vault_id: String,
    provider: ProviderKind,
    previous: SyncStatus,
    started_at: DateTime<Utc>,
    clock: Instant,
}

impl CycleClock {
    fn start(manager: &VaultSyncManager, vault_id: &str) -> Self {
        let previous = manager.status.status(vault_id);
        manager.status.set_status(vault_id, SyncStatus::Syncing);
        Self {
            vault_id: vault_id.to_string(),
            provider: manager.active_provider(),
            previous,
            started_at: Utc::now(),
            clock: Instant::now(),
        }
    }
}

async fn ensure_authenticated(provider: &dyn CloudProvider) -> SyncResult<()> {
    match provider.authenticate().await? {
        AuthOutcome::Authenticated => Ok(()),
        AuthOutcome::Pending { .. } => Err(SyncError::Authentication(format!(
            "{} sign-in required",
            provider.kind().display_name()
        ))),
    }
}

/// A failing tag under a freshly derived key means the password is wrong.
/// A hash mismatch behind a valid tag stays [`SyncError::Integrity`].
fn open_with_password(
    envelope: &VaultEnvelope,
    key: &DerivedKey,
) -> SyncResult<Zeroizing<Vec<u8>>> {
    envelope.open(key).map_err(|e| match e {
        CryptoError::Integrity => SyncError::Decryption,
        other => other.into(),
    })
}

fn checkpoint(cancel: &CancellationToken) -> SyncResult<()> {
    if cancel.is_cancelled() {
        Err(SyncError::Cancelled)
    } else {
        Ok(())
    }
}

async fn unless_cancelled<T>(
    cancel: &CancellationToken,
    fut: impl Future<Output = SyncResult<T>>,
) -> SyncResult<T> {
    tokio::select! {
        biased;
        _ = cancel.cancelled() => Err(SyncError::Cancelled),
        result = fut => result,
    }
}
