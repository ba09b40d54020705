//! Lookup table from [`ProviderKind`] to a live provider.

use crate::error::{CloudError, CloudResult};
use crate::provider::CloudProvider;
use crate::providers::UnsupportedProvider;
use crate::types::ProviderKind;
use std::collections::HashMap;
use std::sync::{Arc, RwLock, RwLockReadGuard, RwLockWriteGuard};
use tracing::debug;

type ProviderMap = HashMap<ProviderKind, Arc<dyn CloudProvider>>;

/// Holds one provider per kind. Registering a kind again replaces it.
#[derive(Default)]
pub struct ProviderRegistry {
    providers: RwLock<ProviderMap>,
}

impl ProviderRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registry pre-filled with failing placeholders for every template
    /// kind (OneDrive, pCloud, Proton Drive).
    pub fn with_template_providers() -> Self {
        let registry = Self::new();
        for kind in ProviderKind::ALL.into_iter().filter(ProviderKind::is_template) {
            registry.register(Arc::new(UnsupportedProvider::new(kind)));
        }
        registry
    }

    pub fn register(&self, provider: Arc<dyn CloudProvider>) {
        let kind = provider.kind();
        debug!("registered provider {kind}");
        self.write().insert(kind, provider);
    }

    pub fn unregister(&self, kind: ProviderKind) -> Option<Arc<dyn CloudProvider>> {
        self.write().remove(&kind)
    }

    pub fn get(&self, kind: ProviderKind) -> Option<Arc<dyn CloudProvider>> {
        self.read().get(&kind).cloned()
    }

    /// Like [`Self::get`] but fails with [`CloudError::ProviderNotRegistered`].
    pub fn require(&self, kind: ProviderKind) -> CloudResult<Arc<dyn CloudProvider>> {
        self.get(kind)
            .ok_or(CloudError::ProviderNotRegistered(kind))
    }

    pub fn kinds(&self) -> Vec<ProviderKind> {
        let mut kinds: Vec<_> = self.read().keys().copied().collect();
        kinds.sort();
        kinds
    }

    fn read(&self) -> RwLockReadGuard<'_, ProviderMap> {
        self.providers.read().unwrap_or_else(|p| p.into_inner())
    }

    fn write(&self) -> RwLockWriteGuard<'_, ProviderMap> {
        self.providers.write().unwrap_or_else(|p| p.into_inner())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn template_registry_has_only_templates() {
        let registry = ProviderRegistry::with_template_providers();
        assert_eq!(
            registry.kinds(),
            vec![
                ProviderKind::OneDrive,
                ProviderKind::PCloud,
                ProviderKind::ProtonDrive
            ]
        );
        assert!(registry.get(ProviderKind::GoogleDrive).is_none());
    }

    #[test]
    fn require_missing_is_typed_error() {
        let registry = ProviderRegistry::new();
        assert!(matches!(
            registry.require(ProviderKind::WebDav),
            Err(CloudError::ProviderNotRegistered(ProviderKind::WebDav))
        ));
    }

    #[test]
    fn register_replaces_and_unregister_removes() {
        let registry = ProviderRegistry::new();
        registry.register(Arc::new(UnsupportedProvider::new(ProviderKind::PCloud)));
        registry.register(Arc::new(UnsupportedProvider::new(ProviderKind::PCloud)));
        assert_eq!(registry.kinds().len(), 1);

        assert!(registry.unregister(ProviderKind::PCloud).is_some());
        assert!(registry.get(ProviderKind::PCloud).is_none());
    }
}
