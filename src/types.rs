use crate::errors::{Error, Result};
use serde::{Deserialize, Serialize};
use std::fmt;
use time::OffsetDateTime;

/// Identifier of the built-in secret-key provider.
pub const DEFAULT_PROVIDER_ID: &str = "secret_key.v1";
const LEGACY_SECRET_KEY_ID: &str = "secret_key";
const ROOT_SCOPE: &str = "root";

/// Identifier of a key-wrapping provider, in the form `<kind>.<name>`.
#[derive(Clone, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ProviderId(String);

impl ProviderId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Provider kind, i.e. the segment before the first `.`.
    pub fn kind(&self) -> Result<&str> {
        match self.0.split_once('.') {
            Some((kind, _)) if !kind.is_empty() => Ok(kind),
            _ => Err(Error::InvalidProviderId(self.0.clone())),
        }
    }

    /// Maps the legacy bare `secret_key` identifier onto `secret_key.v1`.
    pub fn normalize(self) -> Self {
        if self.0 == LEGACY_SECRET_KEY_ID {
            Self(DEFAULT_PROVIDER_ID.to_string())
        } else {
            self
        }
    }
}

impl Default for ProviderId {
    fn default() -> Self {
        Self(DEFAULT_PROVIDER_ID.to_string())
    }
}

impl fmt::Display for ProviderId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for ProviderId {
    fn from(value: &str) -> Self {
        Self::new(value)
    }
}

impl From<String> for ProviderId {
    fn from(value: String) -> Self {
        Self(value)
    }
}

/// Scope selector passed alongside an encryption request.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub enum EncryptionOptions {
    #[default]
    WithoutScope,
    WithScope(String),
}

impl EncryptionOptions {
    pub fn with_scope(scope: impl Into<String>) -> Self {
        Self::WithScope(scope.into())
    }

    pub fn scope(&self) -> &str {
        match self {
            Self::WithoutScope => ROOT_SCOPE,
            Self::WithScope(scope) => scope,
        }
    }
}

/// Label identifying the current data key for a scope and provider.
pub fn key_label(scope: &str, provider: &ProviderId) -> String {
    format!("{scope}@{provider}")
}

/// Durable data-key row as persisted by a [`crate::store::DataKeyStore`].
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct DataKey {
    pub id: String,
    pub namespace: String,
    pub label: String,
    pub scope: String,
    pub provider: ProviderId,
    /// Data key bytes as wrapped by `provider`.
    pub encrypted_data: Vec<u8>,
    pub active: bool,
    #[serde(with = "time::serde::rfc3339")]
    pub created_at: OffsetDateTime,
    #[serde(with = "time::serde::rfc3339")]
    pub updated_at: OffsetDateTime,
}
