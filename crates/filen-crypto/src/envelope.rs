//! Versioned metadata envelopes
//!
//! Envelope format (string):
//! ```text
//! "002" ∥ base64(IV ∥ ciphertext ∥ tag)
//! ```
//!
//! File metadata is wrapped under the master key; per-file fields the backend
//! stores alongside the node (name, size, mime) are wrapped under the file's
//! content key. Unknown version prefixes are rejected before any decoding.

use aes_gcm::{
    aead::{Aead, KeyInit},
    Aes256Gcm, Nonce,
};
use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine;
use filen_core::{FilenError, FilenResult};
use rand::RngCore;

use crate::{IV_SIZE, KEY_SIZE, TAG_SIZE};

/// The envelope version this client produces and accepts.
pub const METADATA_VERSION: &str = "002";

/// Wrap a plaintext metadata string into a v002 envelope under `key`.
pub fn wrap_metadata(key: &[u8; KEY_SIZE], plaintext: &str) -> FilenResult<String> {
    let cipher = Aes256Gcm::new(key.into());

    let mut iv = [0u8; IV_SIZE];
    rand::thread_rng().fill_bytes(&mut iv);
    let nonce = Nonce::from_slice(&iv);

    let ciphertext = cipher
        .encrypt(nonce, plaintext.as_bytes())
        .map_err(|_| FilenError::Fatal("metadata encryption failed".into()))?;

    let mut framed = Vec::with_capacity(IV_SIZE + ciphertext.len());
    framed.extend_from_slice(&iv);
    framed.extend_from_slice(&ciphertext);

    Ok(format!("{METADATA_VERSION}{}", BASE64.encode(&framed)))
}

/// Unwrap a v002 envelope back into its plaintext string.
///
/// Unrecognized version prefixes are `CryptoVersion`; undecodable or
/// unauthenticated bodies are `CryptoAuth`.
pub fn unwrap_metadata(key: &[u8; KEY_SIZE], envelope: &str) -> FilenResult<String> {
    let Some(body) = envelope.strip_prefix(METADATA_VERSION) else {
        let prefix: String = envelope.chars().take(3).collect();
        return Err(FilenError::CryptoVersion(prefix));
    };

    let framed = BASE64
        .decode(body)
        .map_err(|_| FilenError::CryptoAuth)?;
    if framed.len() < IV_SIZE + TAG_SIZE {
        return Err(FilenError::CryptoAuth);
    }

    let (iv, ciphertext) = framed.split_at(IV_SIZE);
    let nonce = Nonce::from_slice(iv);
    let cipher = Aes256Gcm::new(key.into());

    let plaintext = cipher
        .decrypt(nonce, ciphertext)
        .map_err(|_| FilenError::CryptoAuth)?;

    String::from_utf8(plaintext).map_err(|_| FilenError::CryptoAuth)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn test_key() -> [u8; KEY_SIZE] {
        [0x42u8; KEY_SIZE]
    }

    #[test]
    fn roundtrip() {
        let key = test_key();
        let json = r#"{"name":"report.pdf","size":1024}"#;

        let envelope = wrap_metadata(&key, json).unwrap();
        assert!(envelope.starts_with("002"));

        let opened = unwrap_metadata(&key, &envelope).unwrap();
        assert_eq!(opened, json);
    }

    #[test]
    fn roundtrip_unicode_names() {
        let key = test_key();
        for name in ["naïve café.txt", "日本語ファイル.pdf", "emoji 🎉.bin", ""] {
            let envelope = wrap_metadata(&key, name).unwrap();
            assert_eq!(unwrap_metadata(&key, &envelope).unwrap(), name);
        }
    }

    #[test]
    fn fresh_iv_per_wrap() {
        let key = test_key();
        let a = wrap_metadata(&key, "same").unwrap();
        let b = wrap_metadata(&key, "same").unwrap();
        assert_ne!(a, b);
    }

    #[test]
    fn unknown_version_is_crypto_version() {
        let key = test_key();
        let envelope = wrap_metadata(&key, "x").unwrap();
        let legacy = format!("001{}", &envelope[3..]);

        let err = unwrap_metadata(&key, &legacy).unwrap_err();
        assert_eq!(err.kind(), "crypto_version");
    }

    #[test]
    fn wrong_key_is_crypto_auth() {
        let envelope = wrap_metadata(&test_key(), "secret").unwrap();
        let err = unwrap_metadata(&[0x99u8; KEY_SIZE], &envelope).unwrap_err();
        assert_eq!(err.kind(), "crypto_auth");
    }

    #[test]
    fn garbage_body_is_crypto_auth() {
        let err = unwrap_metadata(&test_key(), "002!!!not-base64!!!").unwrap_err();
        assert_eq!(err.kind(), "crypto_auth");

        let err = unwrap_metadata(&test_key(), "002AAAA").unwrap_err();
        assert_eq!(err.kind(), "crypto_auth");
    }
}
