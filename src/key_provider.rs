use crate::errors::Result;
use crate::secret_key::SecretKeyProvider;
use crate::types::{DEFAULT_PROVIDER_ID, ProviderId};
use async_trait::async_trait;
use std::collections::BTreeMap;
use std::sync::Arc;
use tokio::sync::watch;

/// Wraps and unwraps data keys on behalf of the encryption manager.
#[async_trait]
pub trait Provider: Send + Sync {
    /// Wrap a raw data key.
    async fn encrypt(&self, data_key: &[u8]) -> Result<Vec<u8>>;

    /// Unwrap a previously wrapped data key.
    async fn decrypt(&self, wrapped: &[u8]) -> Result<Vec<u8>>;

    /// Long-lived task the provider needs while the manager runs, if any.
    fn background(&self) -> Option<Arc<dyn BackgroundProvider>> {
        None
    }
}

/// Provider-owned task supervised by [`crate::EncryptionManager::run`].
#[async_trait]
pub trait BackgroundProvider: Send + Sync {
    /// Runs until `shutdown` flips to `true`. Returning [`crate::Error::Cancelled`]
    /// on shutdown is treated as a clean exit.
    async fn run(&self, shutdown: watch::Receiver<bool>) -> Result<()>;
}

#[async_trait]
impl<T> Provider for Arc<T>
where
    T: Provider + ?Sized,
{
    async fn encrypt(&self, data_key: &[u8]) -> Result<Vec<u8>> {
        (**self).encrypt(data_key).await
    }

    async fn decrypt(&self, wrapped: &[u8]) -> Result<Vec<u8>> {
        (**self).decrypt(wrapped).await
    }

    fn background(&self) -> Option<Arc<dyn BackgroundProvider>> {
        (**self).background()
    }
}

/// Resolves the full set of configured providers in one call.
#[async_trait]
pub trait ProviderSource: Send + Sync {
    async fn provide(&self) -> Result<BTreeMap<ProviderId, Arc<dyn Provider>>>;
}

/// Provider source backed by an in-process map.
#[derive(Clone, Default)]
pub struct StaticProviders {
    providers: BTreeMap<ProviderId, Arc<dyn Provider>>,
}

impl StaticProviders {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register `provider` under `id`, replacing any previous entry.
    pub fn with<P>(mut self, id: impl Into<ProviderId>, provider: P) -> Self
    where
        P: Provider + 'static,
    {
        self.providers.insert(id.into(), Arc::new(provider));
        self
    }

    /// Register the built-in secret-key provider as `secret_key.v1`.
    pub fn with_secret_key(self, secret: impl AsRef<[u8]>) -> Self {
        self.with(
            DEFAULT_PROVIDER_ID,
            SecretKeyProvider::from_material(secret.as_ref()),
        )
    }
}

#[async_trait]
impl ProviderSource for StaticProviders {
    async fn provide(&self) -> Result<BTreeMap<ProviderId, Arc<dyn Provider>>> {
        Ok(self.providers.clone())
    }
}
