#![allow(dead_code)]

use async_trait::async_trait;
use secrets_encryption::store::{DataKeyStore, MemoryDataKeyStore};
use secrets_encryption::{
    BackgroundProvider, DataKey, EncryptionConfig, EncryptionManager, Error, ManualClock,
    Provider, ProviderId, Result, SecretKeyProvider, StaticProviders,
};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::time::Duration;
use time::OffsetDateTime;
use tokio::sync::watch;

pub const MINUTE: Duration = Duration::from_secs(60);
pub const SECRET: &[u8] = b"integration-secret";

#[derive(Clone, Default)]
pub struct CountingStore {
    pub inner: Arc<MemoryDataKeyStore>,
    current_gets: Arc<AtomicUsize>,
    id_gets: Arc<AtomicUsize>,
    creates: Arc<AtomicUsize>,
    fail_disable: Arc<AtomicBool>,
}

impl CountingStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn current_gets(&self) -> usize {
        self.current_gets.load(Ordering::SeqCst)
    }

    pub fn id_gets(&self) -> usize {
        self.id_gets.load(Ordering::SeqCst)
    }

    pub fn creates(&self) -> usize {
        self.creates.load(Ordering::SeqCst)
    }

    pub fn fail_disable(&self) {
        self.fail_disable.store(true, Ordering::SeqCst);
    }
}

#[async_trait]
impl DataKeyStore for CountingStore {
    async fn get_current_data_key(&self, namespace: &str, label: &str) -> Result<DataKey> {
        self.current_gets.fetch_add(1, Ordering::SeqCst);
        self.inner.get_current_data_key(namespace, label).await
    }

    async fn get_data_key(&self, namespace: &str, id: &str) -> Result<DataKey> {
        self.id_gets.fetch_add(1, Ordering::SeqCst);
        self.inner.get_data_key(namespace, id).await
    }

    async fn create_data_key(&self, key: DataKey) -> Result<()> {
        self.creates.fetch_add(1, Ordering::SeqCst);
        self.inner.create_data_key(key).await
    }

    async fn disable_data_keys(&self, namespace: &str) -> Result<()> {
        if self.fail_disable.load(Ordering::SeqCst) {
            return Err(Error::Storage("database is read-only".into()));
        }
        self.inner.disable_data_keys(namespace).await
    }

    async fn list_data_keys(&self, namespace: &str) -> Result<Vec<DataKey>> {
        self.inner.list_data_keys(namespace).await
    }

    async fn update_data_key_wrapping(
        &self,
        namespace: &str,
        id: &str,
        provider: &ProviderId,
        encrypted_data: Vec<u8>,
        updated_at: OffsetDateTime,
    ) -> Result<()> {
        self.inner
            .update_data_key_wrapping(namespace, id, provider, encrypted_data, updated_at)
            .await
    }
}

#[derive(Clone)]
pub struct CountingProvider {
    inner: SecretKeyProvider,
    wraps: Arc<AtomicUsize>,
    unwraps: Arc<AtomicUsize>,
}

impl CountingProvider {
    pub fn new(material: &[u8]) -> Self {
        Self {
            inner: SecretKeyProvider::from_material(material),
            wraps: Arc::new(AtomicUsize::new(0)),
            unwraps: Arc::new(AtomicUsize::new(0)),
        }
    }

    pub fn calls(&self) -> (usize, usize) {
        (
            self.wraps.load(Ordering::SeqCst),
            self.unwraps.load(Ordering::SeqCst),
        )
    }
}

impl Default for CountingProvider {
    fn default() -> Self {
        Self::new(SECRET)
    }
}

#[async_trait]
impl Provider for CountingProvider {
    async fn encrypt(&self, data_key: &[u8]) -> Result<Vec<u8>> {
        self.wraps.fetch_add(1, Ordering::SeqCst);
        tokio::task::yield_now().await;
        self.inner.encrypt(data_key).await
    }

    async fn decrypt(&self, wrapped: &[u8]) -> Result<Vec<u8>> {
        self.unwraps.fetch_add(1, Ordering::SeqCst);
        self.inner.decrypt(wrapped).await
    }
}

pub struct FailingProvider;

#[async_trait]
impl Provider for FailingProvider {
    async fn encrypt(&self, _data_key: &[u8]) -> Result<Vec<u8>> {
        Err(Error::Provider("kms unavailable".into()))
    }

    async fn decrypt(&self, _wrapped: &[u8]) -> Result<Vec<u8>> {
        Err(Error::Provider("kms unavailable".into()))
    }
}

/// Background task state shared between a test and the provider it belongs to.
#[derive(Default)]
pub struct TaskProbe {
    pub started: AtomicBool,
    pub stopped: AtomicBool,
    fail_with: Option<String>,
    cancel_with_error: bool,
}

impl TaskProbe {
    pub fn failing(message: &str) -> Self {
        Self {
            fail_with: Some(message.to_string()),
            ..Self::default()
        }
    }

    pub fn reporting_cancellation() -> Self {
        Self {
            cancel_with_error: true,
            ..Self::default()
        }
    }

    pub fn started(&self) -> bool {
        self.started.load(Ordering::SeqCst)
    }

    pub fn stopped(&self) -> bool {
        self.stopped.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl BackgroundProvider for TaskProbe {
    async fn run(&self, mut shutdown: watch::Receiver<bool>) -> Result<()> {
        self.started.store(true, Ordering::SeqCst);
        if let Some(message) = &self.fail_with {
            tokio::time::sleep(Duration::from_millis(10)).await;
            self.stopped.store(true, Ordering::SeqCst);
            return Err(Error::Background(message.clone()));
        }
        while !*shutdown.borrow_and_update() {
            if shutdown.changed().await.is_err() {
                break;
            }
        }
        self.stopped.store(true, Ordering::SeqCst);
        if self.cancel_with_error {
            Err(Error::Cancelled)
        } else {
            Ok(())
        }
    }
}

/// Provider that owns a background task.
pub struct BackgroundKeyProvider {
    inner: SecretKeyProvider,
    probe: Arc<TaskProbe>,
}

impl BackgroundKeyProvider {
    pub fn new(probe: Arc<TaskProbe>) -> Self {
        Self {
            inner: SecretKeyProvider::from_material(SECRET),
            probe,
        }
    }
}

#[async_trait]
impl Provider for BackgroundKeyProvider {
    async fn encrypt(&self, data_key: &[u8]) -> Result<Vec<u8>> {
        self.inner.encrypt(data_key).await
    }

    async fn decrypt(&self, wrapped: &[u8]) -> Result<Vec<u8>> {
        self.inner.decrypt(wrapped).await
    }

    fn background(&self) -> Option<Arc<dyn BackgroundProvider>> {
        let task: Arc<dyn BackgroundProvider> = self.probe.clone();
        Some(task)
    }
}

pub fn test_config() -> EncryptionConfig {
    EncryptionConfig::default()
        .with_cache_ttl(MINUTE)
        .with_caution_period(10 * MINUTE)
}

pub async fn build_manager(
    store: CountingStore,
    provider: CountingProvider,
    clock: Arc<ManualClock>,
    config: EncryptionConfig,
) -> EncryptionManager {
    EncryptionManager::builder()
        .config(config)
        .store(store)
        .providers(StaticProviders::new().with("secret_key.v1", provider))
        .clock(clock)
        .build()
        .await
        .expect("manager")
}

pub fn start_clock() -> Arc<ManualClock> {
    Arc::new(ManualClock::new(OffsetDateTime::now_utc()))
}
