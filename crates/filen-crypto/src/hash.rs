//! Streaming SHA-512 over file plaintext
//!
//! The full-file hash is fed chunk by chunk: before encryption on upload,
//! after decryption on download. Hasher state is never persisted; resume
//! rebuilds it by re-reading the already-transferred prefix from disk.

use sha2::{Digest, Sha512};

/// Incremental SHA-512 hasher for one file's plaintext.
#[derive(Default)]
pub struct FileHasher {
    inner: Sha512,
}

impl FileHasher {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn update(&mut self, chunk: &[u8]) {
        self.inner.update(chunk);
    }

    /// Consume the hasher and return the lowercase hex digest.
    pub fn finalize_hex(self) -> String {
        hex::encode(self.inner.finalize())
    }
}

/// One-shot SHA-512 hex digest (used for per-chunk ciphertext hashes).
pub fn sha512_hex(data: &[u8]) -> String {
    hex::encode(Sha512::digest(data))
}
