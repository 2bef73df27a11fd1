use aes_gcm::aead::OsRng;
use aes_gcm::aead::rand_core::RngCore;
use anyhow::{Context, Result, bail};
use base64::{Engine as _, engine::general_purpose::STANDARD as BASE64};

pub const KEY_LEN: usize = 32;

/// Fresh random AES-256 key for sealing message bodies.
pub fn generate_key() -> [u8; KEY_LEN] {
    let mut key = [0u8; KEY_LEN];
    OsRng.fill_bytes(&mut key);
    key
}

/// Config representation of a key (standard base64).
pub fn encode_key(key: &[u8; KEY_LEN]) -> String {
    BASE64.encode(key)
}

/// Parse a key as written in config. Surrounding whitespace is ignored.
pub fn decode_key(encoded: &str) -> Result<[u8; KEY_LEN]> {
    let bytes = BASE64
        .decode(encoded.trim())
        .context("encryption key is not valid base64")?;
    if bytes.len() != KEY_LEN {
        bail!("encryption key must be {} bytes, got {}", KEY_LEN, bytes.len());
    }

    let mut key = [0u8; KEY_LEN];
    key.copy_from_slice(&bytes);
    Ok(key)
}
