use crate::clock::{Clock, SystemClock};
use crate::config::EncryptionConfig;
use crate::crypto::blob;
use crate::crypto::cipher::{AesGcmCipher, Cipher, random_bytes};
use crate::crypto::data_key_cache::{CachedDataKey, DataKeyCache};
use crate::errors::{Error, Result};
use crate::key_provider::{ProviderSource, StaticProviders};
use crate::locks::KeyLocks;
use crate::metrics::{Operation, OpsCounter, OpsSnapshot};
use crate::registry::ProviderRegistry;
use crate::secret_key::SecretKeyProvider;
use crate::store::{DataKeyStore, MemoryDataKeyStore};
use crate::types::{DEFAULT_PROVIDER_ID, DataKey, EncryptionOptions, ProviderId, key_label};
use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tokio::task::{JoinError, JoinSet};
use tokio::time::{Instant, MissedTickBehavior, interval_at};
use tracing::{Instrument, debug, error, info, info_span, warn};
use uuid::Uuid;

const DATA_KEY_LEN: usize = 16;
const MAX_CLEANUP_INTERVAL: Duration = Duration::from_secs(7 * 24 * 60 * 60);

/// Builder for [`EncryptionManager`].
#[derive(Default)]
pub struct ManagerBuilder {
    config: Option<EncryptionConfig>,
    store: Option<Arc<dyn DataKeyStore>>,
    cipher: Option<Arc<dyn Cipher>>,
    providers: Option<Arc<dyn ProviderSource>>,
    clock: Option<Arc<dyn Clock>>,
}

impl ManagerBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Start from [`EncryptionConfig::from_env`].
    pub fn from_env() -> Self {
        Self::new().config(EncryptionConfig::from_env())
    }

    pub fn config(mut self, config: EncryptionConfig) -> Self {
        self.config = Some(config);
        self
    }

    pub fn store<S>(mut self, store: S) -> Self
    where
        S: DataKeyStore + 'static,
    {
        let store: Arc<dyn DataKeyStore> = Arc::new(store);
        self.store = Some(store);
        self
    }

    pub fn cipher<C>(mut self, cipher: C) -> Self
    where
        C: Cipher + 'static,
    {
        let cipher: Arc<dyn Cipher> = Arc::new(cipher);
        self.cipher = Some(cipher);
        self
    }

    pub fn providers<P>(mut self, source: P) -> Self
    where
        P: ProviderSource + 'static,
    {
        let source: Arc<dyn ProviderSource> = Arc::new(source);
        self.providers = Some(source);
        self
    }

    pub fn clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = Some(clock);
        self
    }

    /// Resolve providers and construct the manager.
    ///
    /// Without an explicit source, the secret-key provider is registered from
    /// `SECRETS_ENCRYPTION_SECRET_KEY`. Without a store, keys live in memory.
    pub async fn build(self) -> Result<EncryptionManager> {
        let mut config = self.config.unwrap_or_default();
        config.current_provider = config.current_provider.normalize();
        let interval = config.data_keys_cache_cleanup_interval;
        if interval.is_zero() || interval > MAX_CLEANUP_INTERVAL {
            return Err(Error::Config(format!(
                "data key cache cleanup interval must be non-zero and at most {}s",
                MAX_CLEANUP_INTERVAL.as_secs()
            )));
        }
        config.current_provider.kind()?;

        let source: Arc<dyn ProviderSource> = match self.providers {
            Some(source) => source,
            None => Arc::new(
                StaticProviders::new().with(DEFAULT_PROVIDER_ID, SecretKeyProvider::from_env()),
            ),
        };
        let providers = ProviderRegistry::initialize(source.as_ref()).await?;
        if !providers.contains(&config.current_provider) {
            return Err(Error::MissingProvider {
                id: config.current_provider.to_string(),
            });
        }

        let clock: Arc<dyn Clock> = match self.clock {
            Some(clock) => clock,
            None => Arc::new(SystemClock),
        };
        let cache = DataKeyCache::new(
            config.data_keys_cache_ttl,
            config.caution_period,
            clock.clone(),
        );

        info!(
            current_provider = %config.current_provider,
            providers = providers.len(),
            cache_ttl_secs = config.data_keys_cache_ttl.as_secs(),
            "encryption manager ready"
        );

        let store: Arc<dyn DataKeyStore> = match self.store {
            Some(store) => store,
            None => Arc::new(MemoryDataKeyStore::new()),
        };
        let cipher: Arc<dyn Cipher> = match self.cipher {
            Some(cipher) => cipher,
            None => Arc::new(AesGcmCipher),
        };

        Ok(EncryptionManager {
            store,
            cipher,
            providers,
            cache,
            locks: KeyLocks::default(),
            metrics: OpsCounter::default(),
            clock,
            config,
        })
    }
}

/// Envelope encryption over namespaced data keys.
///
/// Payloads are encrypted with a random data key. The data key is wrapped by
/// the current provider and persisted through the [`DataKeyStore`]. The
/// returned blob names the data key so decryption needs nothing else.
pub struct EncryptionManager {
    config: EncryptionConfig,
    store: Arc<dyn DataKeyStore>,
    cipher: Arc<dyn Cipher>,
    providers: ProviderRegistry,
    cache: DataKeyCache,
    locks: KeyLocks,
    metrics: OpsCounter,
    clock: Arc<dyn Clock>,
}

impl EncryptionManager {
    pub fn builder() -> ManagerBuilder {
        ManagerBuilder::new()
    }

    pub fn config(&self) -> &EncryptionConfig {
        &self.config
    }

    pub fn current_provider(&self) -> &ProviderId {
        &self.config.current_provider
    }

    pub fn providers(&self) -> &ProviderRegistry {
        &self.providers
    }

    pub fn cache(&self) -> &DataKeyCache {
        &self.cache
    }

    pub fn metrics(&self) -> OpsSnapshot {
        self.metrics.snapshot()
    }

    /// Usage report keyed by stat name.
    pub fn usage_stats(&self) -> Result<BTreeMap<String, u64>> {
        let mut stats = BTreeMap::new();
        stats.insert(
            format!(
                "stats.encryption.current_provider.{}.count",
                self.config.current_provider.kind()?
            ),
            1,
        );
        for (kind, count) in self.providers.kind_counts()? {
            stats.insert(format!("stats.encryption.providers.{kind}.count"), count);
        }
        Ok(stats)
    }

    /// Encrypt `payload` with the current data key of the scope in `options`.
    pub async fn encrypt(
        &self,
        namespace: &str,
        payload: &[u8],
        options: &EncryptionOptions,
    ) -> Result<Vec<u8>> {
        let span = info_span!("secrets.encrypt", namespace = %namespace);
        let result = self
            .encrypt_inner(namespace, payload, options)
            .instrument(span)
            .await;
        if let Err(err) = &result {
            error!(namespace = %namespace, error = %err, "failed to encrypt payload");
        }
        self.metrics.record(Operation::Encrypt, result.is_ok());
        result
    }

    async fn encrypt_inner(
        &self,
        namespace: &str,
        payload: &[u8],
        options: &EncryptionOptions,
    ) -> Result<Vec<u8>> {
        let scope = options.scope();
        let label = key_label(scope, &self.config.current_provider);
        let (id, data_key) = self.current_data_key(namespace, &label, scope).await?;
        let encrypted = self.cipher.encrypt(payload, &data_key)?;
        Ok(blob::encode(&id, &encrypted))
    }

    /// Decrypt a blob produced by [`EncryptionManager::encrypt`].
    pub async fn decrypt(&self, namespace: &str, payload: &[u8]) -> Result<Vec<u8>> {
        let span = info_span!("secrets.decrypt", namespace = %namespace);
        let result = self.decrypt_inner(namespace, payload).instrument(span).await;
        if let Err(err) = &result {
            error!(namespace = %namespace, error = %err, "failed to decrypt payload");
        }
        self.metrics.record(Operation::Decrypt, result.is_ok());
        result
    }

    async fn decrypt_inner(&self, namespace: &str, payload: &[u8]) -> Result<Vec<u8>> {
        let (key_id, encrypted) = blob::decode(payload)?;
        let data_key = self.data_key_by_id(namespace, &key_id).await?;
        self.cipher.decrypt(encrypted, &data_key)
    }

    /// Decrypts `values[key]` as (lossy) UTF-8, or returns `fallback` when the
    /// entry is missing or cannot be decrypted.
    pub async fn get_decrypted_value(
        &self,
        namespace: &str,
        values: &HashMap<String, Vec<u8>>,
        key: &str,
        fallback: &str,
    ) -> String {
        let Some(encrypted) = values.get(key) else {
            return fallback.to_string();
        };
        match self.decrypt(namespace, encrypted).await {
            Ok(plaintext) => String::from_utf8_lossy(&plaintext).into_owned(),
            Err(_) => fallback.to_string(),
        }
    }

    /// Disable every data key of `namespace`; the next encryption creates a new one.
    pub async fn rotate_data_keys(&self, namespace: &str) -> Result<()> {
        info!(
            target = "audit",
            action = "data_keys.rotate.start",
            namespace = %namespace,
            "data key rotation starting"
        );

        let _guard = self.locks.lock_namespace(namespace).await;
        if let Err(err) = self.store.disable_data_keys(namespace).await {
            error!(namespace = %namespace, error = %err, "failed to disable data keys");
            return Err(err);
        }
        self.cache.flush(namespace);

        info!(
            target = "audit",
            action = "data_keys.rotate.finish",
            namespace = %namespace,
            "data key rotation completed"
        );
        Ok(())
    }

    /// Re-wrap every data key of `namespace` with the current provider.
    ///
    /// Raw key material is unchanged, so existing ciphertext stays readable.
    pub async fn re_encrypt_data_keys(&self, namespace: &str) -> Result<()> {
        let current_id = &self.config.current_provider;
        let _guard = self.locks.lock_namespace(namespace).await;

        let current = self.providers.resolve(current_id)?;
        let keys = self.store.list_data_keys(namespace).await?;
        info!(
            target = "audit",
            action = "data_keys.reencrypt.start",
            namespace = %namespace,
            provider = %current_id,
            total = keys.len(),
            "data key re-encryption starting"
        );

        let mut rewrapped = 0usize;
        let mut skipped = 0usize;
        for key in keys {
            if key.provider.clone().normalize() == *current_id {
                skipped += 1;
                continue;
            }
            let provider = self.providers.resolve(&key.provider)?;
            let raw = provider.decrypt(&key.encrypted_data).await?;
            let wrapped = current.encrypt(&raw).await?;
            self.store
                .update_data_key_wrapping(
                    namespace,
                    &key.id,
                    current_id,
                    wrapped,
                    self.clock.now(),
                )
                .await?;
            rewrapped += 1;
            debug!(
                target = "metrics",
                action = "data_keys.reencrypt.progress",
                namespace = %namespace,
                key_id = %key.id,
                from = %key.provider,
                rewrapped = rewrapped,
                "data key re-wrapped"
            );
        }
        self.cache.flush(namespace);

        info!(
            target = "audit",
            action = "data_keys.reencrypt.finish",
            namespace = %namespace,
            provider = %current_id,
            rewrapped = rewrapped,
            skipped = skipped,
            "data key re-encryption completed"
        );
        Ok(())
    }

    /// Background maintenance: periodic cache eviction plus provider tasks.
    ///
    /// Returns once `shutdown` flips to `true` (or its sender is dropped) and
    /// every provider task has exited, or as soon as a provider task fails. In
    /// the latter case the remaining tasks are cancelled and awaited before the
    /// failure is returned.
    pub async fn run(&self, mut shutdown: watch::Receiver<bool>) -> Result<()> {
        let (cancel_tx, cancel_rx) = watch::channel(false);
        let mut tasks = JoinSet::new();
        for (id, task) in self.providers.background_tasks() {
            let cancel = cancel_rx.clone();
            debug!(provider = %id, "starting provider background task");
            tasks.spawn(async move {
                let result = task.run(cancel).await;
                (id, result)
            });
        }

        let period = self.config.data_keys_cache_cleanup_interval;
        let mut ticker = interval_at(Instant::now() + period, period);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        let mut failure = None;
        if !*shutdown.borrow_and_update() {
            loop {
                tokio::select! {
                    changed = shutdown.changed() => {
                        if changed.is_err() || *shutdown.borrow_and_update() {
                            break;
                        }
                    }
                    _ = ticker.tick() => {
                        let removed = self.cache.remove_expired();
                        debug!(removed = removed, "evicted expired data keys");
                    }
                    Some(joined) = tasks.join_next(), if !tasks.is_empty() => {
                        if let Err(err) = task_outcome(joined) {
                            failure = Some(err);
                            break;
                        }
                    }
                }
            }
        }

        debug!("stopping encryption background tasks");
        let _ = cancel_tx.send(true);
        while let Some(joined) = tasks.join_next().await {
            if let Err(err) = task_outcome(joined) {
                if failure.is_none() {
                    failure = Some(err);
                }
            }
        }

        match failure {
            Some(err) => Err(err),
            None => Ok(()),
        }
    }

    async fn current_data_key(
        &self,
        namespace: &str,
        label: &str,
        scope: &str,
    ) -> Result<(String, Vec<u8>)> {
        let _guard = self.locks.lock_label(namespace, label).await;

        if let Some(key) = self.data_key_by_label(namespace, label).await? {
            return Ok((key.id, key.data_key));
        }
        self.new_data_key(namespace, label, scope).await
    }

    async fn data_key_by_label(
        &self,
        namespace: &str,
        label: &str,
    ) -> Result<Option<CachedDataKey>> {
        if let Some(cached) = self.cache.get_by_label(namespace, label) {
            if cached.active {
                return Ok(Some(cached));
            }
        }

        let stored = match self.store.get_current_data_key(namespace, label).await {
            Ok(stored) => stored,
            Err(err) if err.is_not_found() => return Ok(None),
            Err(err) => {
                error!(
                    namespace = %namespace,
                    label = %label,
                    error = %err,
                    "failed to get current data key"
                );
                return Err(err);
            }
        };

        let data_key = self.unwrap_data_key(&stored).await?;
        let cached = cached_data_key(&stored, data_key);
        self.cache.add_by_id(namespace, cached.clone());
        if !self.cache.add_by_label(namespace, cached.clone()) {
            debug!(
                namespace = %namespace,
                key_id = %stored.id,
                "data key within caution period, not cached for encryption"
            );
        }
        Ok(Some(cached))
    }

    async fn data_key_by_id(&self, namespace: &str, id: &str) -> Result<Vec<u8>> {
        if let Some(cached) = self.cache.get_by_id(namespace, id) {
            return Ok(cached.data_key);
        }

        let stored = match self.store.get_data_key(namespace, id).await {
            Ok(stored) => stored,
            Err(err) => {
                error!(
                    namespace = %namespace,
                    key_id = %id,
                    error = %err,
                    "failed to get data key"
                );
                return Err(err);
            }
        };
        let data_key = self.unwrap_data_key(&stored).await?;
        self.cache
            .add_by_id(namespace, cached_data_key(&stored, data_key.clone()));
        Ok(data_key)
    }

    // Not cached here: the row only becomes eligible for the label index once
    // a later lookup observes it past the caution period.
    async fn new_data_key(
        &self,
        namespace: &str,
        label: &str,
        scope: &str,
    ) -> Result<(String, Vec<u8>)> {
        let current_id = &self.config.current_provider;
        let provider = self.providers.resolve(current_id)?;

        let data_key = random_bytes(DATA_KEY_LEN);
        let encrypted = provider.encrypt(&data_key).await?;

        let now = self.clock.now();
        let id = Uuid::new_v4().simple().to_string();
        self.store
            .create_data_key(DataKey {
                id: id.clone(),
                namespace: namespace.to_string(),
                label: label.to_string(),
                scope: scope.to_string(),
                provider: current_id.clone(),
                encrypted_data: encrypted,
                active: true,
                created_at: now,
                updated_at: now,
            })
            .await?;

        info!(
            target = "audit",
            action = "data_keys.create",
            namespace = %namespace,
            label = %label,
            key_id = %id,
            provider = %current_id,
            "data key created"
        );
        Ok((id, data_key))
    }

    async fn unwrap_data_key(&self, stored: &DataKey) -> Result<Vec<u8>> {
        let provider = self.providers.resolve(&stored.provider)?;
        provider.decrypt(&stored.encrypted_data).await
    }
}

fn cached_data_key(stored: &DataKey, data_key: Vec<u8>) -> CachedDataKey {
    CachedDataKey {
        id: stored.id.clone(),
        namespace: stored.namespace.clone(),
        label: stored.label.clone(),
        data_key,
        active: stored.active,
        created_at: stored.created_at,
    }
}

fn task_outcome(joined: std::result::Result<(ProviderId, Result<()>), JoinError>) -> Result<()> {
    match joined {
        Ok((_, Ok(()))) => Ok(()),
        Ok((id, Err(err))) if err.is_cancelled() => {
            debug!(provider = %id, "provider background task cancelled");
            Ok(())
        }
        Ok((id, Err(err))) => {
            warn!(provider = %id, error = %err, "provider background task failed");
            Err(err)
        }
        Err(err) => {
            warn!(error = %err, "provider background task aborted");
            Err(Error::Background(err.to_string()))
        }
    }
}
