//! Filename hashing for server-side lookup
//!
//! The backend indexes names by an HMAC so it can answer existence checks
//! without learning plaintext names. The hash is lookup-only and carries no
//! authorization weight.

use hmac::{Hmac, Mac};
use sha2::Sha256;

use crate::kdf::MasterKey;

type HmacSha256 = Hmac<Sha256>;

/// HMAC-SHA256 of the lowercased name, keyed by
/// `UTF-8(master_key_hex ∥ lowercase email)`. Hex output.
pub fn hash_name(master: &MasterKey, email: &str, name: &str) -> String {
    let key = format!("{}{}", master.to_hex(), email.to_lowercase());

    // HMAC accepts arbitrary key lengths
    let mut mac = HmacSha256::new_from_slice(key.as_bytes()).expect("HMAC key of any length");
    mac.update(name.to_lowercase().as_bytes());

    hex::encode(mac.finalize().into_bytes())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::KEY_SIZE;

    fn test_master() -> MasterKey {
        MasterKey::from_bytes([0x11u8; KEY_SIZE])
    }

    #[test]
    fn deterministic() {
        let master = test_master();
        let a = hash_name(&master, "user@example.com", "report.pdf");
        let b = hash_name(&master, "user@example.com", "report.pdf");
        assert_eq!(a, b);
    }

    #[test]
    fn case_insensitive_inputs() {
        let master = test_master();
        assert_eq!(
            hash_name(&master, "User@Example.COM", "Report.PDF"),
            hash_name(&master, "user@example.com", "report.pdf"),
        );
    }

    #[test]
    fn different_names_differ() {
        let master = test_master();
        assert_ne!(
            hash_name(&master, "user@example.com", "a.txt"),
            hash_name(&master, "user@example.com", "b.txt"),
        );
    }

    #[test]
    fn different_keys_differ() {
        let m1 = MasterKey::from_bytes([0x11u8; KEY_SIZE]);
        let m2 = MasterKey::from_bytes([0x22u8; KEY_SIZE]);
        assert_ne!(
            hash_name(&m1, "user@example.com", "a.txt"),
            hash_name(&m2, "user@example.com", "a.txt"),
        );
    }

    #[test]
    fn output_is_hex_sha256() {
        let digest = hash_name(&test_master(), "user@example.com", "a.txt");
        assert_eq!(digest.len(), 64);
        assert!(digest.chars().all(|c| c.is_ascii_hexdigit()));
    }
}
