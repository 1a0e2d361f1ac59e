//! Per-chunk AES-256-GCM encryption/decryption
//!
//! Encrypted chunk format (binary):
//! ```text
//! [12 bytes: random IV][N bytes: ciphertext][16 bytes: GCM tag]
//! ```
//!
//! IVs are drawn fresh from the process CSPRNG for every chunk; they must
//! never repeat under the same content key.

use aes_gcm::{
    aead::{Aead, KeyInit},
    Aes256Gcm, Nonce,
};
use filen_core::{FilenError, FilenResult};
use rand::RngCore;

use crate::kdf::ContentKey;
use crate::{IV_SIZE, TAG_SIZE};

/// Encrypt one plaintext chunk under the file's content key.
///
/// Returns `[12-byte IV][ciphertext][16-byte tag]`.
pub fn encrypt_chunk(key: &ContentKey, plaintext: &[u8]) -> FilenResult<Vec<u8>> {
    let cipher = Aes256Gcm::new(key.as_bytes().into());

    let mut iv = [0u8; IV_SIZE];
    rand::thread_rng().fill_bytes(&mut iv);
    let nonce = Nonce::from_slice(&iv);

    let ciphertext = cipher
        .encrypt(nonce, plaintext)
        .map_err(|_| FilenError::Fatal("chunk encryption failed".into()))?;

    let mut out = Vec::with_capacity(IV_SIZE + ciphertext.len());
    out.extend_from_slice(&iv);
    out.extend_from_slice(&ciphertext);
    Ok(out)
}

/// Decrypt one chunk blob (`[IV][ciphertext][tag]`).
///
/// A blob too short to carry an IV and tag is `CorruptChunk`; a failed tag
/// check is `CryptoAuth`.
pub fn decrypt_chunk(key: &ContentKey, blob: &[u8]) -> FilenResult<Vec<u8>> {
    if blob.len() < IV_SIZE + TAG_SIZE {
        return Err(FilenError::CorruptChunk(format!(
            "{} bytes, minimum is {}",
            blob.len(),
            IV_SIZE + TAG_SIZE
        )));
    }

    let (iv, ciphertext) = blob.split_at(IV_SIZE);
    let nonce = Nonce::from_slice(iv);
    let cipher = Aes256Gcm::new(key.as_bytes().into());

    cipher
        .decrypt(nonce, ciphertext)
        .map_err(|_| FilenError::CryptoAuth)
}
