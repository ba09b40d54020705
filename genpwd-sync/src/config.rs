//! Sync engine configuration.

use genpwd_crypto::KdfParams;
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Settings for [`crate::VaultSyncManager`].
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct SyncConfig {
    /// Stable identifier of this device, written into every envelope.
    pub device_id: String,
    /// Argon2id cost for master-password key derivation.
    pub kdf: KdfParams,
    /// Remote file name prefix; the full name is `{prefix}{vault_id}.enc`.
    pub file_prefix: String,
}

impl Default for SyncConfig {
    fn default() -> Self {
        Self {
            device_id: uuid::Uuid::new_v4().to_string(),
            kdf: KdfParams::default(),
            file_prefix: "vault_".to_string(),
        }
    }
}

impl SyncConfig {
    pub fn remote_file_name(&self, vault_id: &str) -> String {
        format!("{}{vault_id}.enc", self.file_prefix)
    }
}

/// Settings for [`crate::AutoSyncScheduler`].
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct SchedulerConfig {
    /// How often a deferred trigger re-checks its constraint.
    pub constraint_recheck_interval_secs: u64,
    /// Capacity of the scheduler event channel.
    pub event_capacity: usize,
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            constraint_recheck_interval_secs: 60,
            event_capacity: 64,
        }
    }
}

impl SchedulerConfig {
    pub fn constraint_recheck_interval(&self) -> Duration {
        Duration::from_secs(self.constraint_recheck_interval_secs.max(1))
    }
}
