//! Envelope encryption of namespaced secret payloads with cached, provider-wrapped data keys.

pub mod clock;
pub mod config;
pub mod crypto;
pub mod errors;
pub mod key_provider;
mod locks;
pub mod manager;
pub mod metrics;
pub mod registry;
pub mod secret_key;
pub mod store;
pub mod types;

pub use clock::{Clock, ManualClock, SystemClock};
pub use config::EncryptionConfig;
pub use crypto::cipher::{AesGcmCipher, Cipher};
pub use crypto::data_key_cache::{CachedDataKey, DataKeyCache};
pub use errors::{Error, Result};
pub use key_provider::{BackgroundProvider, Provider, ProviderSource, StaticProviders};
pub use manager::{EncryptionManager, ManagerBuilder};
pub use metrics::{Operation, OpsCounter, OpsSnapshot};
pub use registry::ProviderRegistry;
pub use secret_key::SecretKeyProvider;
pub use store::{DataKeyStore, MemoryDataKeyStore};
pub use types::{DataKey, EncryptionOptions, ProviderId, key_label};
