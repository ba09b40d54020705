//! Placeholder for providers whose transport does not exist yet.

use crate::error::{CloudError, CloudResult};
use crate::provider::CloudProvider;
use crate::types::{AuthOutcome, ProviderKind, QuotaInfo, RemoteVaultRef};
use async_trait::async_trait;
use tracing::warn;

/// Fails every operation with [`CloudError::UnsupportedProvider`].
///
/// Registered for OneDrive, pCloud and Proton Drive so callers get a
/// typed error instead of a silent no-op.
pub struct UnsupportedProvider {
    kind: ProviderKind,
}

impl UnsupportedProvider {
    pub fn new(kind: ProviderKind) -> Self {
        Self { kind }
    }

    fn fail<T>(&self, op: &str) -> CloudResult<T> {
        warn!("{op} called on unsupported provider {}", self.kind);
        Err(CloudError::UnsupportedProvider(self.kind))
    }
}

#[async_trait]
impl CloudProvider for UnsupportedProvider {
    fn kind(&self) -> ProviderKind {
        self.kind
    }

    async fn authenticate(&self) -> CloudResult<AuthOutcome> {
        self.fail("authenticate")
    }

    async fn upload_vault(&self, _name: &str, _bytes: &[u8]) -> CloudResult<RemoteVaultRef> {
        self.fail("upload_vault")
    }

    async fn download_vault(&self, _remote: &RemoteVaultRef) -> CloudResult<Vec<u8>> {
        self.fail("download_vault")
    }

    async fn list_vaults(&self) -> CloudResult<Vec<RemoteVaultRef>> {
        self.fail("list_vaults")
    }

    async fn get_quota(&self) -> CloudResult<QuotaInfo> {
        self.fail("get_quota")
    }

    async fn sign_out(&self) -> CloudResult<()> {
        self.fail("sign_out")
    }

    async fn find_vault(&self, _name: &str) -> CloudResult<Option<RemoteVaultRef>> {
        self.fail("find_vault")
    }
}
