use crate::errors::{Error, Result};
use crate::key_provider::{BackgroundProvider, Provider, ProviderSource};
use crate::types::ProviderId;
use std::collections::BTreeMap;
use std::sync::Arc;
use tracing::debug;

/// Read-only set of key-wrapping providers.
///
/// Built once from a [`ProviderSource`] before the manager serves traffic.
#[derive(Clone)]
pub struct ProviderRegistry {
    providers: BTreeMap<ProviderId, Arc<dyn Provider>>,
}

impl ProviderRegistry {
    /// Resolve every provider from `source`. Identifiers are normalized.
    pub async fn initialize(source: &dyn ProviderSource) -> Result<Self> {
        let providers: BTreeMap<_, _> = source
            .provide()
            .await?
            .into_iter()
            .map(|(id, provider)| (id.normalize(), provider))
            .collect();
        debug!(count = providers.len(), "encryption providers initialized");
        Ok(Self { providers })
    }

    pub fn resolve(&self, id: &ProviderId) -> Result<Arc<dyn Provider>> {
        let id = id.clone().normalize();
        self.providers
            .get(&id)
            .cloned()
            .ok_or_else(|| Error::ProviderNotFound { id: id.to_string() })
    }

    pub fn contains(&self, id: &ProviderId) -> bool {
        self.providers.contains_key(&id.clone().normalize())
    }

    pub fn len(&self) -> usize {
        self.providers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.providers.is_empty()
    }

    /// Number of providers per kind.
    pub fn kind_counts(&self) -> Result<BTreeMap<String, u64>> {
        let mut counts = BTreeMap::new();
        for id in self.providers.keys() {
            *counts.entry(id.kind()?.to_string()).or_insert(0) += 1;
        }
        Ok(counts)
    }

    pub(crate) fn background_tasks(&self) -> Vec<(ProviderId, Arc<dyn BackgroundProvider>)> {
        self.providers
            .iter()
            .filter_map(|(id, provider)| provider.background().map(|task| (id.clone(), task)))
            .collect()
    }
}
