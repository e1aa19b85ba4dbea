use crate::types::ProviderId;
use std::env;
use std::time::Duration;

const PROVIDER_ENV: &str = "SECRETS_ENCRYPTION_PROVIDER";
const CACHE_TTL_ENV: &str = "SECRETS_DATA_KEYS_CACHE_TTL_SECS";
const CACHE_CLEANUP_ENV: &str = "SECRETS_DATA_KEYS_CACHE_CLEANUP_SECS";

const DEFAULT_CACHE_TTL_SECS: u64 = 15 * 60;
const DEFAULT_CACHE_CLEANUP_SECS: u64 = 60;
const DEFAULT_CAUTION_PERIOD_SECS: u64 = 10 * 60;

/// Settings consumed by [`crate::EncryptionManager`].
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct EncryptionConfig {
    /// Provider used to wrap newly created data keys.
    pub current_provider: ProviderId,
    /// Lifetime of a cache entry from the moment it is inserted.
    pub data_keys_cache_ttl: Duration,
    /// Tick interval of the background eviction sweep.
    pub data_keys_cache_cleanup_interval: Duration,
    /// Minimum age of a persisted data key before it may serve encryptions from cache.
    pub caution_period: Duration,
}

impl Default for EncryptionConfig {
    fn default() -> Self {
        Self {
            current_provider: ProviderId::default(),
            data_keys_cache_ttl: Duration::from_secs(DEFAULT_CACHE_TTL_SECS),
            data_keys_cache_cleanup_interval: Duration::from_secs(DEFAULT_CACHE_CLEANUP_SECS),
            caution_period: Duration::from_secs(DEFAULT_CAUTION_PERIOD_SECS),
        }
    }
}

impl EncryptionConfig {
    /// Load configuration from the environment.
    ///
    /// * `SECRETS_ENCRYPTION_PROVIDER` selects the current provider (default: `secret_key.v1`).
    /// * `SECRETS_DATA_KEYS_CACHE_TTL_SECS` overrides the cache TTL (default: 900s).
    /// * `SECRETS_DATA_KEYS_CACHE_CLEANUP_SECS` overrides the eviction interval (default: 60s).
    ///
    /// Empty or unparsable values fall back to the defaults.
    pub fn from_env() -> Self {
        let mut config = Self::default();

        if let Ok(provider) = env::var(PROVIDER_ENV) {
            let provider = provider.trim();
            if !provider.is_empty() {
                config.current_provider = ProviderId::from(provider);
            }
        }
        if let Some(ttl) = secs_from_env(CACHE_TTL_ENV) {
            config.data_keys_cache_ttl = ttl;
        }
        if let Some(interval) = secs_from_env(CACHE_CLEANUP_ENV) {
            config.data_keys_cache_cleanup_interval = interval;
        }

        config.current_provider = config.current_provider.normalize();
        config
    }

    pub fn with_current_provider(mut self, provider: impl Into<ProviderId>) -> Self {
        self.current_provider = provider.into().normalize();
        self
    }

    pub fn with_cache_ttl(mut self, ttl: Duration) -> Self {
        self.data_keys_cache_ttl = ttl;
        self
    }

    pub fn with_cleanup_interval(mut self, interval: Duration) -> Self {
        self.data_keys_cache_cleanup_interval = interval;
        self
    }

    pub fn with_caution_period(mut self, period: Duration) -> Self {
        self.caution_period = period;
        self
    }
}

fn secs_from_env(key: &str) -> Option<Duration> {
    env::var(key)
        .ok()
        .and_then(|v| v.trim().parse::<u64>().ok())
        .filter(|secs| *secs > 0)
        .map(Duration::from_secs)
}
