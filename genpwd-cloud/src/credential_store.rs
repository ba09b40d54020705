//! Persistent storage for cloud account tokens.
//!
//! Accounts are serialized to JSON and kept in the platform keychain
//! (Keychain, Credential Manager, Secret Service). Tokens never touch the
//! filesystem in plaintext.

use crate::error::{CloudError, CloudResult};
use crate::types::{CloudAccount, ProviderKind, storage_key};
use std::collections::HashMap;
use std::sync::Mutex;
use tracing::debug;

/// Where authenticated accounts (and WebDAV passwords) are kept.
pub trait CredentialStore: Send + Sync {
    fn save(&self, account: &CloudAccount) -> CloudResult<()>;

    fn load(&self, provider: ProviderKind, account_id: &str) -> CloudResult<Option<CloudAccount>>;

    /// Deleting a missing entry is not an error.
    fn delete(&self, provider: ProviderKind, account_id: &str) -> CloudResult<()>;
}

/// Platform keychain backed store.
pub struct KeyringCredentialStore {
    service: String,
}

impl KeyringCredentialStore {
    pub const DEFAULT_SERVICE: &'static str = "genpwd-cloud-sync";

    pub fn new(service: impl Into<String>) -> Self {
        Self {
            service: service.into(),
        }
    }

    fn entry(&self, key: &str) -> CloudResult<keyring::Entry> {
        Ok(keyring::Entry::new(&self.service, key)?)
    }
}

impl Default for KeyringCredentialStore {
    fn default() -> Self {
        Self::new(Self::DEFAULT_SERVICE)
    }
}

impl CredentialStore for KeyringCredentialStore {
    fn save(&self, account: &CloudAccount) -> CloudResult<()> {
        let json = serde_json::to_string(account)?;
        self.entry(&account.storage_key())?.set_password(&json)?;
        debug!("stored {} account {} in keychain", account.provider, account.id);
        Ok(())
    }

    fn load(&self, provider: ProviderKind, account_id: &str) -> CloudResult<Option<CloudAccount>> {
        match self.entry(&storage_key(provider, account_id))?.get_password() {
            Ok(json) => Ok(Some(serde_json::from_str(&json)?)),
            Err(keyring::Error::NoEntry) => Ok(None),
            Err(e) => Err(CloudError::CredentialStore(e.to_string())),
        }
    }

    fn delete(&self, provider: ProviderKind, account_id: &str) -> CloudResult<()> {
        match self
            .entry(&storage_key(provider, account_id))?
            .delete_credential()
        {
            Ok(()) | Err(keyring::Error::NoEntry) => Ok(()),
            Err(e) => Err(CloudError::CredentialStore(e.to_string())),
        }
    }
}

/// Process-memory store. Accounts are lost when the process exits.
#[derive(Default)]
pub struct MemoryCredentialStore {
    accounts: Mutex<HashMap<String, CloudAccount>>,
}

impl MemoryCredentialStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.lock().map(|a| a.len()).unwrap_or(0)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn lock(&self) -> CloudResult<std::sync::MutexGuard<'_, HashMap<String, CloudAccount>>> {
        self.accounts
            .lock()
            .map_err(|_| CloudError::CredentialStore("credential map poisoned".to_string()))
    }
}

impl CredentialStore for MemoryCredentialStore {
    fn save(&self, account: &CloudAccount) -> CloudResult<()> {
        self.lock()?.insert(account.storage_key(), account.clone());
        Ok(())
    }

    fn load(&self, provider: ProviderKind, account_id: &str) -> CloudResult<Option<CloudAccount>> {
        Ok(self.lock()?.get(&storage_key(provider, account_id)).cloned())
    }

    fn delete(&self, provider: ProviderKind, account_id: &str) -> CloudResult<()> {
        self.lock()?.remove(&storage_key(provider, account_id));
        Ok(())
    }
}
