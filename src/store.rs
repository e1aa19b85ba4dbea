use crate::errors::{Error, Result};
use crate::types::{DataKey, ProviderId};
use async_trait::async_trait;
use parking_lot::RwLock;
use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;
use time::OffsetDateTime;

/// Durable registry of wrapped data keys.
#[async_trait]
pub trait DataKeyStore: Send + Sync {
    /// Active key for `label`, or [`Error::NotFound`].
    async fn get_current_data_key(&self, namespace: &str, label: &str) -> Result<DataKey>;

    /// Key `id` regardless of its active flag, or [`Error::NotFound`].
    async fn get_data_key(&self, namespace: &str, id: &str) -> Result<DataKey>;

    async fn create_data_key(&self, key: DataKey) -> Result<()>;

    /// Marks every key of `namespace` inactive. Rows are kept for decryption.
    async fn disable_data_keys(&self, namespace: &str) -> Result<()>;

    async fn list_data_keys(&self, namespace: &str) -> Result<Vec<DataKey>>;

    /// Replace the wrapped bytes of key `id` after re-wrapping with `provider`.
    async fn update_data_key_wrapping(
        &self,
        namespace: &str,
        id: &str,
        provider: &ProviderId,
        encrypted_data: Vec<u8>,
        updated_at: OffsetDateTime,
    ) -> Result<()>;
}

#[async_trait]
impl<T> DataKeyStore for Arc<T>
where
    T: DataKeyStore + ?Sized,
{
    async fn get_current_data_key(&self, namespace: &str, label: &str) -> Result<DataKey> {
        (**self).get_current_data_key(namespace, label).await
    }

    async fn get_data_key(&self, namespace: &str, id: &str) -> Result<DataKey> {
        (**self).get_data_key(namespace, id).await
    }

    async fn create_data_key(&self, key: DataKey) -> Result<()> {
        (**self).create_data_key(key).await
    }

    async fn disable_data_keys(&self, namespace: &str) -> Result<()> {
        (**self).disable_data_keys(namespace).await
    }

    async fn list_data_keys(&self, namespace: &str) -> Result<Vec<DataKey>> {
        (**self).list_data_keys(namespace).await
    }

    async fn update_data_key_wrapping(
        &self,
        namespace: &str,
        id: &str,
        provider: &ProviderId,
        encrypted_data: Vec<u8>,
        updated_at: OffsetDateTime,
    ) -> Result<()> {
        (**self)
            .update_data_key_wrapping(namespace, id, provider, encrypted_data, updated_at)
            .await
    }
}

/// In-memory data key store.
#[derive(Default)]
pub struct MemoryDataKeyStore {
    namespaces: RwLock<HashMap<String, BTreeMap<String, DataKey>>>,
}

impl MemoryDataKeyStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl DataKeyStore for MemoryDataKeyStore {
    async fn get_current_data_key(&self, namespace: &str, label: &str) -> Result<DataKey> {
        let namespaces = self.namespaces.read();
        namespaces
            .get(namespace)
            .and_then(|keys| {
                keys.values()
                    .filter(|key| key.active && key.label == label)
                    .max_by_key(|key| key.created_at)
            })
            .cloned()
            .ok_or_else(|| Error::data_key_not_found(namespace, label))
    }

    async fn get_data_key(&self, namespace: &str, id: &str) -> Result<DataKey> {
        let namespaces = self.namespaces.read();
        namespaces
            .get(namespace)
            .and_then(|keys| keys.get(id))
            .cloned()
            .ok_or_else(|| Error::data_key_not_found(namespace, id))
    }

    async fn create_data_key(&self, key: DataKey) -> Result<()> {
        let mut namespaces = self.namespaces.write();
        let keys = namespaces.entry(key.namespace.clone()).or_default();
        if keys.contains_key(&key.id) {
            return Err(Error::Storage(format!("data key {} already exists", key.id)));
        }
        if key.active {
            for existing in keys.values_mut().filter(|k| k.label == key.label) {
                existing.active = false;
            }
        }
        keys.insert(key.id.clone(), key);
        Ok(())
    }

    async fn disable_data_keys(&self, namespace: &str) -> Result<()> {
        let mut namespaces = self.namespaces.write();
        if let Some(keys) = namespaces.get_mut(namespace) {
            for key in keys.values_mut() {
                key.active = false;
            }
        }
        Ok(())
    }

    async fn list_data_keys(&self, namespace: &str) -> Result<Vec<DataKey>> {
        let namespaces = self.namespaces.read();
        Ok(namespaces
            .get(namespace)
            .map(|keys| keys.values().cloned().collect())
            .unwrap_or_default())
    }

    async fn update_data_key_wrapping(
        &self,
        namespace: &str,
        id: &str,
        provider: &ProviderId,
        encrypted_data: Vec<u8>,
        updated_at: OffsetDateTime,
    ) -> Result<()> {
        let mut namespaces = self.namespaces.write();
        let key = namespaces
            .get_mut(namespace)
            .and_then(|keys| keys.get_mut(id))
            .ok_or_else(|| Error::data_key_not_found(namespace, id))?;
        key.provider = provider.clone();
        key.encrypted_data = encrypted_data;
        key.updated_at = updated_at;
        Ok(())
    }
}
