//! The local vault store the sync engine reads from and writes to.

use crate::error::SyncResult;
use async_trait::async_trait;
use genpwd_crypto::{Salt, Zeroizing};

/// Access to the on-device vault, implemented by the host application.
///
/// Plaintext is the serialized vault exactly as the application wants it
/// back; the engine never interprets it.
#[async_trait]
pub trait VaultRepository: Send + Sync {
    /// Current serialized vault, or `None` when this device has no copy yet.
    async fn get_plaintext(&self, vault_id: &str) -> SyncResult<Option<Zeroizing<Vec<u8>>>>;

    /// Replaces the local vault in one step.
    async fn apply_plaintext(&self, vault_id: &str, plaintext: &[u8]) -> SyncResult<()>;

    /// Per-vault Argon2id salt. Every device syncing the vault must return
    /// the same value.
    async fn vault_salt(&self, vault_id: &str) -> SyncResult<Salt>;

    /// Last local modification, epoch milliseconds.
    async fn local_modified_at(&self, vault_id: &str) -> SyncResult<i64>;
}
