//! The capability set every storage back end implements.

use crate::error::CloudResult;
use crate::types::{AuthOutcome, ProviderKind, QuotaInfo, RemoteVaultRef};
use async_trait::async_trait;

/// A remote object store holding encrypted vault files.
///
/// Each upload and download is a single-object transfer: the remote side
/// either holds the previous file or the new one, never a mix.
#[async_trait]
pub trait CloudProvider: Send + Sync {
    fn kind(&self) -> ProviderKind;

    /// Makes sure the provider holds usable credentials, starting an
    /// interactive authorization if it does not.
    async fn authenticate(&self) -> CloudResult<AuthOutcome>;

    /// Creates or replaces the file called `name`.
    async fn upload_vault(&self, name: &str, bytes: &[u8]) -> CloudResult<RemoteVaultRef>;

    async fn download_vault(&self, remote: &RemoteVaultRef) -> CloudResult<Vec<u8>>;

    async fn list_vaults(&self) -> CloudResult<Vec<RemoteVaultRef>>;

    async fn get_quota(&self) -> CloudResult<QuotaInfo>;

    /// Drops stored credentials for this provider.
    async fn sign_out(&self) -> CloudResult<()>;

    /// Looks a vault file up by name.
    async fn find_vault(&self, name: &str) -> CloudResult<Option<RemoteVaultRef>> {
        Ok(self
            .list_vaults()
            .await?
            .into_iter()
            .find(|v| v.name == name))
    }
}
