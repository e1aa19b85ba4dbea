use crate::crypto::cipher::{AesGcmCipher, Cipher};
use crate::errors::Result;
use crate::key_provider::Provider;
use async_trait::async_trait;
use sha2::{Digest, Sha256};
use tracing::warn;

const SECRET_KEY_ENV: &str = "SECRETS_ENCRYPTION_SECRET_KEY";

/// Wraps data keys with a locally configured secret.
#[derive(Clone)]
pub struct SecretKeyProvider {
    master_key: [u8; 32],
}

impl SecretKeyProvider {
    /// Reads the secret from `SECRETS_ENCRYPTION_SECRET_KEY`.
    ///
    /// A missing or blank variable still yields a provider keyed by the empty
    /// secret, which offers no protection outside development.
    pub fn from_env() -> Self {
        let secret = std::env::var(SECRET_KEY_ENV)
            .ok()
            .filter(|value| !value.trim().is_empty());
        match secret {
            Some(secret) => Self::from_material(secret.as_bytes()),
            None => {
                warn!(
                    env = SECRET_KEY_ENV,
                    "encryption secret key not configured, wrapping data keys with an empty secret"
                );
                Self::from_material(&[])
            }
        }
    }

    /// Keys the provider with SHA-256 of `secret`.
    pub fn from_material(secret: &[u8]) -> Self {
        Self {
            master_key: Sha256::digest(secret).into(),
        }
    }
}

#[async_trait]
impl Provider for SecretKeyProvider {
    async fn encrypt(&self, data_key: &[u8]) -> Result<Vec<u8>> {
        AesGcmCipher.encrypt(data_key, &self.master_key)
    }

    async fn decrypt(&self, wrapped: &[u8]) -> Result<Vec<u8>> {
        AesGcmCipher.decrypt(wrapped, &self.master_key)
    }
}
