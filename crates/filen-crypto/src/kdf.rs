//! Key derivation: PBKDF2-SHA512 password → master key + auth token

use filen_core::{FilenError, FilenResult};
use rand::RngCore;
use secrecy::{ExposeSecret, SecretString};
use sha2::Sha512;
use zeroize::Zeroize;

use crate::KEY_SIZE;

const PBKDF2_ITERATIONS: u32 = 200_000;
const DERIVED_LEN: usize = 64;

/// The user's 256-bit root key. Decrypts metadata envelopes and keys the
/// filename HMAC; never leaves the process.
///
/// Zeroized on drop so the key does not linger in freed memory.
#[derive(Clone)]
pub struct MasterKey {
    bytes: [u8; KEY_SIZE],
}

impl MasterKey {
    pub fn from_bytes(bytes: [u8; KEY_SIZE]) -> Self {
        Self { bytes }
    }

    pub fn from_hex(hex_str: &str) -> FilenResult<Self> {
        let raw = hex::decode(hex_str)
            .map_err(|e| FilenError::Auth(format!("master key is not valid hex: {e}")))?;
        let bytes: [u8; KEY_SIZE] = raw
            .try_into()
            .map_err(|_| FilenError::Auth("master key has wrong length".into()))?;
        Ok(Self { bytes })
    }

    pub fn as_bytes(&self) -> &[u8; KEY_SIZE] {
        &self.bytes
    }

    pub fn to_hex(&self) -> String {
        hex::encode(self.bytes)
    }
}

impl Drop for MasterKey {
    fn drop(&mut self) {
        self.bytes.zeroize();
    }
}

impl std::fmt::Debug for MasterKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MasterKey")
            .field("bytes", &"[REDACTED]")
            .finish()
    }
}

/// A per-file 256-bit content key. Zeroized on drop.
#[derive(Clone)]
pub struct ContentKey {
    bytes: [u8; KEY_SIZE],
}

impl ContentKey {
    pub fn from_bytes(bytes: [u8; KEY_SIZE]) -> Self {
        Self { bytes }
    }

    /// Generate a fresh random content key.
    pub fn generate() -> Self {
        let mut bytes = [0u8; KEY_SIZE];
        rand::thread_rng().fill_bytes(&mut bytes);
        Self { bytes }
    }

    pub fn from_hex(hex_str: &str) -> FilenResult<Self> {
        let raw = hex::decode(hex_str)
            .map_err(|e| FilenError::CorruptChunk(format!("content key is not valid hex: {e}")))?;
        let bytes: [u8; KEY_SIZE] = raw
            .try_into()
            .map_err(|_| FilenError::CorruptChunk("content key has wrong length".into()))?;
        Ok(Self { bytes })
    }

    pub fn as_bytes(&self) -> &[u8; KEY_SIZE] {
        &self.bytes
    }

    pub fn to_hex(&self) -> String {
        hex::encode(self.bytes)
    }
}

impl Drop for ContentKey {
    fn drop(&mut self) {
        self.bytes.zeroize();
    }
}

impl std::fmt::Debug for ContentKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ContentKey")
            .field("bytes", &"[REDACTED]")
            .finish()
    }
}

/// Output of [`derive_keys`]: the split of the 64-byte PBKDF2 block.
pub struct DerivedKeys {
    pub master: MasterKey,
    /// Hex of bytes 32..64; presented to the backend at login, never used
    /// for encryption.
    pub auth_token: String,
}

/// Derive the master key and auth token from the account password.
///
/// PBKDF2-HMAC-SHA512, 200 000 iterations, 64-byte output. The salt comes
/// from the backend's auth-info response and is not secret.
pub fn derive_keys(password: &SecretString, salt: &str) -> FilenResult<DerivedKeys> {
    let mut derived = [0u8; DERIVED_LEN];
    pbkdf2::pbkdf2_hmac::<Sha512>(
        password.expose_secret().as_bytes(),
        salt.as_bytes(),
        PBKDF2_ITERATIONS,
        &mut derived,
    );

    let mut master_bytes = [0u8; KEY_SIZE];
    master_bytes.copy_from_slice(&derived[..KEY_SIZE]);
    let auth_token = hex::encode(&derived[KEY_SIZE..]);
    derived.zeroize();

    Ok(DerivedKeys {
        master: MasterKey::from_bytes(master_bytes),
        auth_token,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn kdf_deterministic() {
        let password = SecretString::from("correct horse battery staple");
        let a = derive_keys(&password, "salt-1").unwrap();
        let b = derive_keys(&password, "salt-1").unwrap();

        assert_eq!(a.master.as_bytes(), b.master.as_bytes());
        assert_eq!(a.auth_token, b.auth_token);
    }

    #[test]
    fn kdf_different_salts() {
        let password = SecretString::from("same password");
        let a = derive_keys(&password, "salt-1").unwrap();
        let b = derive_keys(&password, "salt-2").unwrap();

        assert_ne!(a.master.as_bytes(), b.master.as_bytes());
        assert_ne!(a.auth_token, b.auth_token);
    }

    #[test]
    fn master_key_and_token_are_disjoint() {
        let derived = derive_keys(&SecretString::from("pw"), "s").unwrap();
        // 32-byte key, 32-byte token half
        assert_eq!(derived.auth_token.len(), 64);
        assert_ne!(derived.master.to_hex(), derived.auth_token);
    }

    #[test]
    fn master_key_hex_roundtrip() {
        let key = MasterKey::from_bytes([7u8; KEY_SIZE]);
        let back = MasterKey::from_hex(&key.to_hex()).unwrap();
        assert_eq!(key.as_bytes(), back.as_bytes());
    }

    #[test]
    fn master_key_rejects_bad_hex() {
        assert!(MasterKey::from_hex("zz").is_err());
        assert!(MasterKey::from_hex("abcd").is_err()); // wrong length
    }

    #[test]
    fn content_keys_are_random() {
        let a = ContentKey::generate();
        let b = ContentKey::generate();
        assert_ne!(a.as_bytes(), b.as_bytes());
    }

    #[test]
    fn debug_redacts_key_material() {
        let key = MasterKey::from_bytes([0xAA; KEY_SIZE]);
        let rendered = format!("{key:?}");
        assert!(!rendered.contains("170")); // 0xAA
        assert!(rendered.contains("REDACTED"));
    }
}
