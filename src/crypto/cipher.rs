use crate::errors::{Error, Result};
#[allow(deprecated)]
use aes_gcm::aead::generic_array::GenericArray;
use aes_gcm::Aes256Gcm;
use aes_gcm::aead::{Aead, KeyInit};
use hkdf::Hkdf;
use rand::RngCore;
use sha2::Sha256;

const SALT_LEN: usize = 16;
const NONCE_LEN: usize = 12;
const KEY_INFO: &[u8] = b"secrets-encryption/aes-256-gcm";

/// Authenticated symmetric cipher keyed by arbitrary secret bytes.
pub trait Cipher: Send + Sync {
    fn encrypt(&self, payload: &[u8], secret: &[u8]) -> Result<Vec<u8>>;

    fn decrypt(&self, payload: &[u8], secret: &[u8]) -> Result<Vec<u8>>;
}

/// AES-256-GCM with a per-message HKDF-SHA256 key.
///
/// Output layout: `salt (16) || nonce (12) || ciphertext+tag`.
#[derive(Clone, Copy, Debug, Default)]
pub struct AesGcmCipher;

impl Cipher for AesGcmCipher {
    #[allow(deprecated)]
    fn encrypt(&self, payload: &[u8], secret: &[u8]) -> Result<Vec<u8>> {
        let salt = random_bytes(SALT_LEN);
        let nonce = random_bytes(NONCE_LEN);
        let cipher = new_cipher(secret, &salt)?;
        let sealed = cipher
            .encrypt(GenericArray::from_slice(&nonce), payload)
            .map_err(|_| Error::Crypto("failed to encrypt payload".into()))?;

        let mut out = Vec::with_capacity(SALT_LEN + NONCE_LEN + sealed.len());
        out.extend_from_slice(&salt);
        out.extend_from_slice(&nonce);
        out.extend_from_slice(&sealed);
        Ok(out)
    }

    #[allow(deprecated)]
    fn decrypt(&self, payload: &[u8], secret: &[u8]) -> Result<Vec<u8>> {
        if payload.len() < SALT_LEN + NONCE_LEN {
            return Err(Error::Crypto("ciphertext too short".into()));
        }
        let (salt, rest) = payload.split_at(SALT_LEN);
        let (nonce, sealed) = rest.split_at(NONCE_LEN);
        let cipher = new_cipher(secret, salt)?;
        cipher
            .decrypt(GenericArray::from_slice(nonce), sealed)
            .map_err(|_| Error::Crypto("message authentication failed".into()))
    }
}

fn new_cipher(secret: &[u8], salt: &[u8]) -> Result<Aes256Gcm> {
    let key = derive_key(secret, salt)?;
    Aes256Gcm::new_from_slice(&key).map_err(|_| Error::Crypto("invalid AES key".into()))
}

fn derive_key(secret: &[u8], salt: &[u8]) -> Result<[u8; 32]> {
    let hkdf = Hkdf::<Sha256>::new(Some(salt), secret);
    let mut okm = [0u8; 32];
    hkdf.expand(KEY_INFO, &mut okm)
        .map_err(|_| Error::Crypto("failed to derive key material".into()))?;
    Ok(okm)
}

pub(crate) fn random_bytes(len: usize) -> Vec<u8> {
    let mut buffer = vec![0u8; len];
    let mut rng = rand::rng();
    rng.fill_bytes(&mut buffer);
    buffer
}
