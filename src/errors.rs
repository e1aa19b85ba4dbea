use thiserror::Error;

/// Errors raised by the encryption core.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum Error {
    #[error("missing configuration for current encryption provider {id}")]
    MissingProvider { id: String },
    #[error("encryption provider not found: {id}")]
    ProviderNotFound { id: String },
    #[error("invalid provider identifier: {0}")]
    InvalidProviderId(String),
    #[error("invalid configuration: {0}")]
    Config(String),
    #[error("{entity} not found")]
    NotFound { entity: String },
    #[error("unable to decrypt empty payload")]
    EmptyPayload,
    #[error("could not find valid key id in encrypted payload")]
    MissingKeyId,
    #[error("invalid key id in encrypted payload: {0}")]
    InvalidKeyId(String),
    #[error("key provider error: {0}")]
    Provider(String),
    #[error("storage error: {0}")]
    Storage(String),
    #[error("crypto error: {0}")]
    Crypto(String),
    #[error("background task failed: {0}")]
    Background(String),
    #[error("operation cancelled")]
    Cancelled,
}

impl Error {
    pub(crate) fn data_key_not_found(namespace: &str, key: &str) -> Self {
        Error::NotFound {
            entity: format!("data key {namespace}/{key}"),
        }
    }

    /// True when the error describes a ciphertext blob that could not be parsed.
    pub fn is_malformed(&self) -> bool {
        matches!(
            self,
            Error::EmptyPayload | Error::MissingKeyId | Error::InvalidKeyId(_)
        )
    }

    pub fn is_not_found(&self) -> bool {
        matches!(self, Error::NotFound { .. })
    }

    pub fn is_cancelled(&self) -> bool {
        matches!(self, Error::Cancelled)
    }
}

pub type Result<T> = std::result::Result<T, Error>;
