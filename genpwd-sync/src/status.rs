//! Per-vault sync status and phase, observable through watch channels.

use serde::{Deserialize, Serialize};
use std::collections::{BTreeSet, HashMap};
use std::sync::{Mutex, MutexGuard};
use tokio::sync::watch;
use tracing::debug;

/// Coarse status shown to the user.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum SyncStatus {
    #[default]
    NeverSynced,
    Synced,
    Syncing,
    /// Waiting for a scheduling constraint.
    Pending,
    Error,
    Conflict,
}

/// Step of the sync state machine a vault is currently in.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum SyncPhase {
    #[default]
    Idle,
    Authenticating,
    FetchingRemote,
    Comparing,
    Uploading,
    AwaitingResolution,
    Resolving,
    Applying,
    Done,
    Error,
}

struct VaultChannels {
    status: watch::Sender<SyncStatus>,
    phase: watch::Sender<SyncPhase>,
}

impl VaultChannels {
    fn new() -> Self {
        Self {
            status: watch::Sender::new(SyncStatus::default()),
            phase: watch::Sender::new(SyncPhase::default()),
        }
    }
}

/// Status and phase of every vault the engine has seen, plus the set of
/// vaults with a conflict waiting for a person.
#[derive(Default)]
pub struct SyncStatusBoard {
    vaults: Mutex<HashMap<String, VaultChannels>>,
    pending_conflicts: Mutex<BTreeSet<String>>,
}

impl SyncStatusBoard {
    pub fn new() -> Self {
        Self::default()
    }

    fn vaults(&self) -> MutexGuard<'_, HashMap<String, VaultChannels>> {
        self.vaults.lock().unwrap_or_else(|p| p.into_inner())
    }

    fn conflicts(&self) -> MutexGuard<'_, BTreeSet<String>> {
        self.pending_conflicts
            .lock()
            .unwrap_or_else(|p| p.into_inner())
    }

    pub fn subscribe(&self, vault_id: &str) -> watch::Receiver<SyncStatus> {
        self.vaults()
            .entry(vault_id.to_string())
            .or_insert_with(VaultChannels::new)
            .status
            .subscribe()
    }

    pub fn subscribe_phase(&self, vault_id: &str) -> watch::Receiver<SyncPhase> {
        self.vaults()
            .entry(vault_id.to_string())
            .or_insert_with(VaultChannels::new)
            .phase
            .subscribe()
    }

    pub fn status(&self, vault_id: &str) -> SyncStatus {
        self.vaults()
            .get(vault_id)
            .map(|c| *c.status.borrow())
            .unwrap_or_default()
    }

    pub fn phase(&self, vault_id: &str) -> SyncPhase {
        self.vaults()
            .get(vault_id)
            .map(|c| *c.phase.borrow())
            .unwrap_or_default()
    }

    pub fn set_status(&self, vault_id: &str, status: SyncStatus) {
        let mut vaults = self.vaults();
        let channels = vaults
            .entry(vault_id.to_string())
            .or_insert_with(VaultChannels::new);
        channels.status.send_replace(status);
    }

    pub fn set_phase(&self, vault_id: &str, phase: SyncPhase) {
        debug!("vault {vault_id} phase {phase:?}");
        let mut vaults = self.vaults();
        let channels = vaults
            .entry(vault_id.to_string())
            .or_insert_with(VaultChannels::new);
        channels.phase.send_replace(phase);
    }

    /// Marks a conflict the UI has to surface later.
    pub fn flag_conflict(&self, vault_id: &str) {
        self.conflicts().insert(vault_id.to_string());
        self.set_status(vault_id, SyncStatus::Conflict);
    }

    pub fn clear_conflict(&self, vault_id: &str) -> bool {
        self.conflicts().remove(vault_id)
    }

    pub fn has_pending_conflict(&self, vault_id: &str) -> bool {
        self.conflicts().contains(vault_id)
    }

    pub fn pending_conflicts(&self) -> Vec<String> {
        self.conflicts().iter().cloned().collect()
    }
}
