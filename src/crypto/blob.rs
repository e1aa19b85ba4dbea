//! Self-describing ciphertext framing.
//!
//! A blob is `#` || base64-no-pad(key id) || `#` || cipher bytes. The layout is
//! persisted alongside every secret and must not change.

use crate::errors::{Error, Result};
use base64::{Engine, engine::general_purpose::STANDARD_NO_PAD};

/// Marker byte framing the key id. Not part of the base64 alphabet.
pub const KEY_ID_DELIMITER: u8 = b'#';

/// Frames `cipher` with the id of the data key that produced it.
pub fn encode(key_id: &str, cipher: &[u8]) -> Vec<u8> {
    let encoded_id = STANDARD_NO_PAD.encode(key_id.as_bytes());
    let mut blob = Vec::with_capacity(encoded_id.len() + cipher.len() + 2);
    blob.push(KEY_ID_DELIMITER);
    blob.extend_from_slice(encoded_id.as_bytes());
    blob.push(KEY_ID_DELIMITER);
    blob.extend_from_slice(cipher);
    blob
}

/// Splits a blob into its key id and cipher bytes.
pub fn decode(blob: &[u8]) -> Result<(String, &[u8])> {
    let Some((_, rest)) = blob.split_first() else {
        return Err(Error::EmptyPayload);
    };
    let end = rest
        .iter()
        .position(|b| *b == KEY_ID_DELIMITER)
        .ok_or(Error::MissingKeyId)?;

    let raw_id = STANDARD_NO_PAD
        .decode(&rest[..end])
        .map_err(|err| Error::InvalidKeyId(err.to_string()))?;
    let key_id = String::from_utf8(raw_id).map_err(|err| Error::InvalidKeyId(err.to_string()))?;

    Ok((key_id, &rest[end + 1..]))
}
