//! filen-crypto: client-side E2E encryption for the Filen CLI
//!
//! Wire format: every chunk and metadata envelope is AES-256-GCM with a
//! 12-byte random IV and a 16-byte tag.
//!
//! Key hierarchy:
//! ```text
//! Master Key (256-bit, PBKDF2-SHA512 from password + salt, 200k iterations)
//!   ├── wraps per-file metadata envelopes ("002" ∥ base64(IV ∥ ct ∥ tag))
//!   ├── keys the filename HMAC (HMAC-SHA256, server-side lookup only)
//!   └── Content Key (per-file, 256-bit random, carried inside the envelope)
//!         └── chunk AEAD: AES-256-GCM, fresh IV per chunk
//! ```
//!
//! The auth token (bytes 32..64 of the KDF output) never touches any
//! ciphertext; it is only presented to the backend at login.

pub mod chunk;
pub mod envelope;
pub mod hash;
pub mod kdf;
pub mod names;

pub use chunk::{decrypt_chunk, encrypt_chunk};
pub use envelope::{unwrap_metadata, wrap_metadata, METADATA_VERSION};
pub use hash::{sha512_hex, FileHasher};
pub use kdf::{derive_keys, ContentKey, DerivedKeys, MasterKey};
pub use names::hash_name;

/// Size of a master or content key in bytes (256-bit).
pub const KEY_SIZE: usize = 32;

/// Size of an AES-GCM IV.
pub const IV_SIZE: usize = 12;

/// Size of a GCM authentication tag.
pub const TAG_SIZE: usize = 16;
