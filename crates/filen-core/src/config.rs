use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::{FilenError, FilenResult};

/// Default API endpoints. The gateway serves the JSON API; ingest and egest
/// carry raw chunk bodies.
pub const DEFAULT_GATEWAY_URL: &str = "https://gateway.filen.io";
pub const DEFAULT_INGEST_URL: &str = "https://ingest.filen.io";
pub const DEFAULT_EGEST_URL: &str = "https://egest.filen.io";

/// Client configuration: on-disk layout, endpoints, and tunables.
#[derive(Debug, Clone)]
pub struct Config {
    /// State directory, default `~/.filen-cli` (override: `FILEN_CLI_DIR`).
    pub data_dir: PathBuf,
    pub gateway_url: String,
    pub ingest_url: String,
    pub egest_url: String,
    /// Directory cache bound (folders).
    pub cache_capacity: usize,
    /// Directory cache entry TTL.
    pub cache_ttl: Duration,
    /// Timeout for a single HTTP attempt.
    pub request_timeout: Duration,
    /// Total deadline for one chunk across retries.
    pub chunk_deadline: Duration,
}

impl Default for Config {
    fn default() -> Self {
        Config {
            data_dir: default_data_dir(),
            gateway_url: DEFAULT_GATEWAY_URL.into(),
            ingest_url: DEFAULT_INGEST_URL.into(),
            egest_url: DEFAULT_EGEST_URL.into(),
            cache_capacity: 1024,
            cache_ttl: Duration::from_secs(600),
            request_timeout: Duration::from_secs(60),
            chunk_deadline: Duration::from_secs(600),
        }
    }
}

fn default_data_dir() -> PathBuf {
    if let Ok(dir) = std::env::var("FILEN_CLI_DIR") {
        return PathBuf::from(dir);
    }
    let home = std::env::var("HOME")
        .or_else(|_| std::env::var("USERPROFILE"))
        .unwrap_or_else(|_| ".".into());
    PathBuf::from(home).join(".filen-cli")
}

impl Config {
    pub fn credentials_path(&self) -> PathBuf {
        self.data_dir.join("credentials.json")
    }

    pub fn batch_state_dir(&self) -> PathBuf {
        self.data_dir.join("batch_states")
    }

    pub fn batch_state_path(&self, batch_id: &str) -> PathBuf {
        self.batch_state_dir().join(format!("{batch_id}.json"))
    }

    pub fn ensure_dirs(&self) -> FilenResult<()> {
        std::fs::create_dir_all(&self.data_dir)?;
        std::fs::create_dir_all(self.batch_state_dir())?;
        Ok(())
    }
}

/// Stored login state, written to `credentials.json` after a successful login.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Credentials {
    pub email: String,
    pub master_key_hex: String,
    pub auth_token: String,
    pub api_key: String,
    pub base_url: String,
    /// Root folder identifier fetched at login.
    pub base_folder_uuid: String,
}

impl Credentials {
    /// Load saved credentials, or `Auth` if none exist.
    pub fn load(path: &Path) -> FilenResult<Self> {
        if !path.exists() {
            return Err(FilenError::Auth("not logged in (run `filen login`)".into()));
        }
        let content = std::fs::read_to_string(path)?;
        serde_json::from_str(&content)
            .map_err(|e| FilenError::Auth(format!("credentials file unreadable: {e}")))
    }

    /// Persist credentials with owner-only permissions.
    pub fn save(&self, path: &Path) -> FilenResult<()> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let json = serde_json::to_string_pretty(self)
            .map_err(|e| FilenError::Fatal(format!("serializing credentials: {e}")))?;
        std::fs::write(path, json)?;
        #[cfg(unix)]
        {
            use std::os::unix::fs::PermissionsExt;
            let perms = std::fs::Permissions::from_mode(0o600);
            std::fs::set_permissions(path, perms)?;
        }
        Ok(())
    }

    /// Remove the credentials file if present.
    pub fn clear(path: &Path) -> FilenResult<()> {
        if path.exists() {
            std::fs::remove_file(path)?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn test_creds() -> Credentials {
        Credentials {
            email: "user@example.com".into(),
            master_key_hex: "ab".repeat(32),
            auth_token: "cd".repeat(32),
            api_key: "key-123".into(),
            base_url: DEFAULT_GATEWAY_URL.into(),
            base_folder_uuid: "00000000-0000-4000-8000-000000000001".into(),
        }
    }

    #[test]
    fn credentials_roundtrip() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("credentials.json");

        let creds = test_creds();
        creds.save(&path).unwrap();

        let loaded = Credentials::load(&path).unwrap();
        assert_eq!(loaded.email, creds.email);
        assert_eq!(loaded.master_key_hex, creds.master_key_hex);

        // File uses camelCase keys (wire-compatible layout)
        let raw = std::fs::read_to_string(&path).unwrap();
        assert!(raw.contains("\"masterKeyHex\""));
        assert!(raw.contains("\"baseFolderUuid\""));
    }

    #[cfg(unix)]
    #[test]
    fn credentials_are_owner_only() {
        use std::os::unix::fs::PermissionsExt;
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("credentials.json");
        test_creds().save(&path).unwrap();

        let mode = std::fs::metadata(&path).unwrap().permissions().mode();
        assert_eq!(mode & 0o777, 0o600);
    }

    #[test]
    fn load_missing_is_auth_error() {
        let dir = tempfile::tempdir().unwrap();
        let err = Credentials::load(&dir.path().join("credentials.json")).unwrap_err();
        assert_eq!(err.kind(), "auth");
    }

    #[test]
    fn clear_is_idempotent() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("credentials.json");
        Credentials::clear(&path).unwrap();
        test_creds().save(&path).unwrap();
        Credentials::clear(&path).unwrap();
        assert!(!path.exists());
        Credentials::clear(&path).unwrap();
    }

    #[test]
    fn batch_state_paths() {
        let cfg = Config {
            data_dir: PathBuf::from("/tmp/filen-test"),
            ..Config::default()
        };
        assert_eq!(
            cfg.batch_state_path("0123456789abcdef"),
            PathBuf::from("/tmp/filen-test/batch_states/0123456789abcdef.json")
        );
    }
}
