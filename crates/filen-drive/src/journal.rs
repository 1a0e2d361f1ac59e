//! Crash-safe batch journal.
//!
//! One JSON file per batch under `batch_states/<batchId>.json`, written with
//! write-to-temp-then-rename so readers never observe a torn journal. The
//! batch id is a pure function of (operation, sorted sources, target), so
//! re-invoking the same command reopens the same journal and resumes.

use std::path::PathBuf;
use std::time::{Duration, Instant, SystemTime, UNIX_EPOCH};

use filen_core::{FilenError, FilenResult, ItemId};
use serde::{Deserialize, Serialize};
use sha1::{Digest, Sha1};
use tracing::debug;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Operation {
    Upload,
    Download,
}

impl Operation {
    pub fn as_str(&self) -> &'static str {
        match self {
            Operation::Upload => "upload",
            Operation::Download => "download",
        }
    }
}

/// Task state, encoded as a single string on disk: `pending`, `active`,
/// `interrupted`, `completed`, `skipped_<reason>`, `error_<kind>`.
///
/// Statuses outside the recognized set (legacy journals) load as
/// `error_fatal` and are surfaced rather than silently reset.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(from = "String", into = "String")]
pub enum TaskStatus {
    Pending,
    Active,
    Interrupted,
    Completed,
    Skipped(String),
    Error(String),
}

impl TaskStatus {
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            TaskStatus::Completed | TaskStatus::Skipped(_) | TaskStatus::Error(_)
        )
    }

    pub fn error(err: &FilenError) -> Self {
        TaskStatus::Error(err.kind().to_string())
    }
}

impl From<TaskStatus> for String {
    fn from(status: TaskStatus) -> String {
        match status {
            TaskStatus::Pending => "pending".into(),
            TaskStatus::Active => "active".into(),
            TaskStatus::Interrupted => "interrupted".into(),
            TaskStatus::Completed => "completed".into(),
            TaskStatus::Skipped(reason) => format!("skipped_{reason}"),
            TaskStatus::Error(kind) => format!("error_{kind}"),
        }
    }
}

impl From<String> for TaskStatus {
    fn from(s: String) -> TaskStatus {
        match s.as_str() {
            "pending" => TaskStatus::Pending,
            "active" => TaskStatus::Active,
            "interrupted" => TaskStatus::Interrupted,
            "completed" => TaskStatus::Completed,
            _ => {
                if let Some(reason) = s.strip_prefix("skipped_") {
                    TaskStatus::Skipped(reason.to_string())
                } else if let Some(kind) = s.strip_prefix("error_") {
                    TaskStatus::Error(kind.to_string())
                } else {
                    TaskStatus::Error("fatal".to_string())
                }
            }
        }
    }
}

impl std::fmt::Display for TaskStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", String::from(self.clone()))
    }
}

/// One file's worth of work within a batch.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Task {
    pub local_path: PathBuf,
    pub remote_path: String,
    pub status: TaskStatus,
    /// Upload in flight: client-assigned file uuid.
    #[serde(default)]
    pub file_uuid: Option<ItemId>,
    #[serde(default)]
    pub upload_key: Option<String>,
    /// Upload in flight: hex of the content key, needed to resume with the
    /// same key the committed chunks were sealed under.
    #[serde(default)]
    pub content_key: Option<String>,
    /// Download source.
    #[serde(default)]
    pub remote_uuid: Option<ItemId>,
    #[serde(default)]
    pub remote_mtime: Option<i64>,
    #[serde(default)]
    pub chunk_count: Option<u64>,
    /// Highest fully committed zero-based chunk index; -1 means none.
    pub last_chunk: i64,
}

impl Task {
    pub fn new(local_path: PathBuf, remote_path: String) -> Self {
        Task {
            local_path,
            remote_path,
            status: TaskStatus::Pending,
            file_uuid: None,
            upload_key: None,
            content_key: None,
            remote_uuid: None,
            remote_mtime: None,
            chunk_count: None,
            last_chunk: -1,
        }
    }

    /// Advance the committed chunk watermark; downgrades are refused so a
    /// racing stale writer can never roll progress back.
    pub fn advance_last_chunk(&mut self, index: i64) {
        if index > self.last_chunk {
            self.last_chunk = index;
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BatchJournal {
    pub batch_id: String,
    pub operation: Operation,
    pub sources: Vec<String>,
    pub target: String,
    pub created_at: i64,
    pub updated_at: i64,
    pub tasks: Vec<Task>,
}

impl BatchJournal {
    pub fn new(batch_id: String, operation: Operation, sources: Vec<String>, target: String) -> Self {
        let now = now_ms();
        BatchJournal {
            batch_id,
            operation,
            sources,
            target,
            created_at: now,
            updated_at: now,
            tasks: Vec::new(),
        }
    }

    pub fn all_terminal(&self) -> bool {
        self.tasks.iter().all(|t| t.status.is_terminal())
    }

    pub fn has_errors(&self) -> bool {
        self.tasks
            .iter()
            .any(|t| matches!(t.status, TaskStatus::Error(_)))
    }

    pub fn non_terminal_count(&self) -> usize {
        self.tasks.iter().filter(|t| !t.status.is_terminal()).count()
    }
}

/// First 16 hex chars of SHA-1 over `op ∥ NUL ∥ sort(sources).join(NUL) ∥ NUL ∥ target`.
pub fn batch_id(operation: Operation, sources: &[String], target: &str) -> String {
    let mut sorted: Vec<&str> = sources.iter().map(|s| s.as_str()).collect();
    sorted.sort_unstable();

    let mut hasher = Sha1::new();
    hasher.update(operation.as_str().as_bytes());
    hasher.update(b"\0");
    for (i, source) in sorted.iter().enumerate() {
        if i > 0 {
            hasher.update(b"\0");
        }
        hasher.update(source.as_bytes());
    }
    hasher.update(b"\0");
    hasher.update(target.as_bytes());

    hex::encode(hasher.finalize())[..16].to_string()
}

fn now_ms() -> i64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_millis() as i64
}

// ── Persistence ───────────────────────────────────────────────────────────────

#[derive(Debug, Clone)]
pub struct JournalStore {
    dir: PathBuf,
}

impl JournalStore {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        JournalStore { dir: dir.into() }
    }

    fn path_for(&self, batch_id: &str) -> PathBuf {
        self.dir.join(format!("{batch_id}.json"))
    }

    pub fn load(&self, batch_id: &str) -> FilenResult<Option<BatchJournal>> {
        let path = self.path_for(batch_id);
        if !path.exists() {
            return Ok(None);
        }
        let content = std::fs::read_to_string(&path)?;
        let journal: BatchJournal = serde_json::from_str(&content)
            .map_err(|e| FilenError::Fatal(format!("corrupt journal {}: {e}", path.display())))?;
        Ok(Some(journal))
    }

    /// Atomic write: temp file in the same directory, then rename over.
    pub fn save(&self, journal: &mut BatchJournal) -> FilenResult<()> {
        journal.updated_at = now_ms();
        std::fs::create_dir_all(&self.dir)?;

        let path = self.path_for(&journal.batch_id);
        let tmp = path.with_extension("json.tmp");
        let json = serde_json::to_string_pretty(journal)
            .map_err(|e| FilenError::Fatal(format!("serializing journal: {e}")))?;
        std::fs::write(&tmp, json)?;
        std::fs::rename(&tmp, &path)?;
        debug!(batch_id = %journal.batch_id, path = %path.display(), "journal saved");
        Ok(())
    }

    pub fn delete(&self, batch_id: &str) -> FilenResult<()> {
        let path = self.path_for(batch_id);
        if path.exists() {
            std::fs::remove_file(&path)?;
        }
        Ok(())
    }

    pub fn journal_path(&self, batch_id: &str) -> PathBuf {
        self.path_for(batch_id)
    }
}

/// Persists the journal at most every 10 committed chunks or every 5 seconds,
/// and unconditionally on demand (terminal transitions).
pub struct ThrottledSaver {
    store: JournalStore,
    last_save: Instant,
    chunks_since_save: u32,
}

const SAVE_EVERY_CHUNKS: u32 = 10;
const SAVE_EVERY: Duration = Duration::from_secs(5);

impl ThrottledSaver {
    pub fn new(store: JournalStore) -> Self {
        ThrottledSaver {
            store,
            last_save: Instant::now(),
            chunks_since_save: 0,
        }
    }

    /// Record one committed chunk; saves if either threshold tripped.
    pub fn chunk_committed(&mut self, journal: &mut BatchJournal) -> FilenResult<()> {
        self.chunks_since_save += 1;
        if self.chunks_since_save >= SAVE_EVERY_CHUNKS || self.last_save.elapsed() >= SAVE_EVERY {
            self.force(journal)?;
        }
        Ok(())
    }

    /// Unthrottled save (task transitions, batch end).
    pub fn force(&mut self, journal: &mut BatchJournal) -> FilenResult<()> {
        self.store.save(journal)?;
        self.last_save = Instant::now();
        self.chunks_since_save = 0;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn status_string_roundtrip() {
        for (status, text) in [
            (TaskStatus::Pending, "pending"),
            (TaskStatus::Active, "active"),
            (TaskStatus::Interrupted, "interrupted"),
            (TaskStatus::Completed, "completed"),
            (TaskStatus::Skipped("exists".into()), "skipped_exists"),
            (TaskStatus::Error("crypto_auth".into()), "error_crypto_auth"),
        ] {
            assert_eq!(String::from(status.clone()), text);
            assert_eq!(TaskStatus::from(text.to_string()), status);
        }
    }

    #[test]
    fn unknown_status_loads_as_error_fatal() {
        assert_eq!(
            TaskStatus::from("uploading".to_string()),
            TaskStatus::Error("fatal".into())
        );
    }

    #[test]
    fn batch_id_is_pure_and_order_insensitive() {
        let sources = vec!["b.txt".to_string(), "a.txt".to_string()];
        let reversed = vec!["a.txt".to_string(), "b.txt".to_string()];

        let id1 = batch_id(Operation::Upload, &sources, "/docs");
        let id2 = batch_id(Operation::Upload, &reversed, "/docs");
        assert_eq!(id1, id2);
        assert_eq!(id1.len(), 16);
        assert!(id1.chars().all(|c| c.is_ascii_hexdigit()));
    }

    #[test]
    fn batch_id_separates_inputs() {
        let sources = vec!["a".to_string()];
        assert_ne!(
            batch_id(Operation::Upload, &sources, "/x"),
            batch_id(Operation::Upload, &sources, "/y")
        );
        assert_ne!(
            batch_id(Operation::Upload, &sources, "/x"),
            batch_id(Operation::Download, &sources, "/x")
        );
        // NUL framing: ["a", "b"] vs ["a\0b"] must differ from ["ab"]
        assert_ne!(
            batch_id(
                Operation::Upload,
                &["a".to_string(), "b".to_string()],
                "/t"
            ),
            batch_id(Operation::Upload, &["ab".to_string()], "/t")
        );
    }

    #[test]
    fn advance_last_chunk_never_downgrades() {
        let mut task = Task::new(PathBuf::from("a"), "/a".into());
        assert_eq!(task.last_chunk, -1);
        task.advance_last_chunk(3);
        assert_eq!(task.last_chunk, 3);
        task.advance_last_chunk(1);
        assert_eq!(task.last_chunk, 3);
        task.advance_last_chunk(4);
        assert_eq!(task.last_chunk, 4);
    }

    #[test]
    fn journal_save_load_roundtrip() {
        let dir = tempfile::tempdir().unwrap();
        let store = JournalStore::new(dir.path());

        let id = batch_id(Operation::Upload, &["src".to_string()], "/t");
        let mut journal = BatchJournal::new(
            id.clone(),
            Operation::Upload,
            vec!["src".to_string()],
            "/t".to_string(),
        );
        let mut task = Task::new(PathBuf::from("src/a.txt"), "/t/a.txt".into());
        task.status = TaskStatus::Interrupted;
        task.last_chunk = 2;
        journal.tasks.push(task);

        store.save(&mut journal).unwrap();

        let loaded = store.load(&id).unwrap().unwrap();
        assert_eq!(loaded.tasks.len(), 1);
        assert_eq!(loaded.tasks[0].status, TaskStatus::Interrupted);
        assert_eq!(loaded.tasks[0].last_chunk, 2);
        assert!(!loaded.all_terminal());

        store.delete(&id).unwrap();
        assert!(store.load(&id).unwrap().is_none());
    }

    #[test]
    fn journal_file_is_json_with_string_statuses() {
        let dir = tempfile::tempdir().unwrap();
        let store = JournalStore::new(dir.path());

        let mut journal = BatchJournal::new(
            "feedfacecafebeef".into(),
            Operation::Download,
            vec!["/remote".to_string()],
            "local".to_string(),
        );
        let mut task = Task::new(PathBuf::from("local/a"), "/remote/a".into());
        task.status = TaskStatus::Skipped("not_newer".into());
        journal.tasks.push(task);
        store.save(&mut journal).unwrap();

        let raw =
            std::fs::read_to_string(dir.path().join("feedfacecafebeef.json")).unwrap();
        assert!(raw.contains("\"skipped_not_newer\""));
        assert!(raw.contains("\"download\""));
        assert!(raw.contains("\"lastChunk\""));
    }

    #[test]
    fn legacy_status_surfaces_as_error() {
        let dir = tempfile::tempdir().unwrap();
        let store = JournalStore::new(dir.path());
        let raw = r#"{
            "batchId": "0011223344556677",
            "operation": "upload",
            "sources": ["x"],
            "target": "/t",
            "createdAt": 0,
            "updatedAt": 0,
            "tasks": [{
                "localPath": "x/a",
                "remotePath": "/t/a",
                "status": "uploading",
                "lastChunk": 4
            }]
        }"#;
        std::fs::write(dir.path().join("0011223344556677.json"), raw).unwrap();

        let journal = store.load("0011223344556677").unwrap().unwrap();
        assert_eq!(journal.tasks[0].status, TaskStatus::Error("fatal".into()));
    }
}
