//! In-memory [`Backend`] for tests and local experimentation.
//!
//! Holds the folder tree, file entries, and ciphertext chunks in process
//! memory, and adds fault hooks the integration tests use: scripted chunk-PUT
//! failures (resume paths), chunk tampering (decrypt failures), and wire
//! counters (asserting how many chunks actually travelled).

use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Mutex;
use std::time::{SystemTime, UNIX_EPOCH};

use async_trait::async_trait;
use filen_core::{FilenError, FilenResult, ItemId};

use crate::backend::{Backend, DirSelector, ItemKind};
use crate::types::*;

pub struct MemoryBackend {
    state: Mutex<State>,
    chunk_put_attempts: AtomicU64,
    chunk_puts: AtomicU64,
    chunk_gets: AtomicU64,
}

struct State {
    root: ItemId,
    folders: HashMap<ItemId, StoredFolder>,
    files: HashMap<ItemId, StoredFile>,
    pending: HashMap<ItemId, PendingUpload>,
    chunks: HashMap<(ItemId, u64), Vec<u8>>,
    /// Fail this many upcoming chunk PUTs with a transient error.
    fail_puts_remaining: u64,
    /// After this many successful PUTs in total, fail every further PUT
    /// until faults are cleared. Simulates the link dying mid-batch.
    fail_puts_after: Option<u64>,
    tampered: HashSet<(ItemId, u64)>,
}

struct StoredFolder {
    name_env: String,
    name_hashed: String,
    parent: ItemId,
    timestamp: i64,
    trashed: bool,
}

struct StoredFile {
    metadata_env: String,
    name_hashed: String,
    parent: ItemId,
    chunks: u64,
    timestamp: i64,
    trashed: bool,
    version: u32,
}

struct PendingUpload {
    parent: ItemId,
    upload_key: String,
}

fn now_ms() -> i64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_millis() as i64
}

const MEM_REGION: &str = "mem";
const MEM_BUCKET: &str = "mem";

impl Default for MemoryBackend {
    fn default() -> Self {
        Self::new()
    }
}

impl MemoryBackend {
    pub fn new() -> Self {
        Self {
            state: Mutex::new(State {
                root: ItemId::new(),
                folders: HashMap::new(),
                files: HashMap::new(),
                pending: HashMap::new(),
                chunks: HashMap::new(),
                fail_puts_remaining: 0,
                fail_puts_after: None,
                tampered: HashSet::new(),
            }),
            chunk_put_attempts: AtomicU64::new(0),
            chunk_puts: AtomicU64::new(0),
            chunk_gets: AtomicU64::new(0),
        }
    }

    pub fn root_id(&self) -> ItemId {
        self.state.lock().unwrap().root
    }

    // ── Fault injection and wire counters ────────────────────────────────

    /// Fail the next `n` chunk PUTs with a transient error, then recover.
    pub fn fail_next_chunk_puts(&self, n: u64) {
        self.state.lock().unwrap().fail_puts_remaining = n;
    }

    /// Let `n` more chunk PUTs succeed (counted from now), then fail every
    /// further PUT until [`clear_faults`](Self::clear_faults).
    pub fn fail_chunk_puts_after(&self, n: u64) {
        let current = self.chunk_puts.load(Ordering::SeqCst);
        self.state.lock().unwrap().fail_puts_after = Some(current + n);
    }

    pub fn clear_faults(&self) {
        let mut state = self.state.lock().unwrap();
        state.fail_puts_remaining = 0;
        state.fail_puts_after = None;
    }

    /// Corrupt one stored chunk so its next download fails authentication.
    pub fn tamper_chunk(&self, uuid: ItemId, index: u64) {
        self.state.lock().unwrap().tampered.insert((uuid, index));
    }

    pub fn clear_tampering(&self) {
        self.state.lock().unwrap().tampered.clear();
    }

    /// Truncate a stored chunk body (framing corruption, not a tag failure).
    pub fn truncate_chunk(&self, uuid: ItemId, index: u64, len: usize) {
        let mut state = self.state.lock().unwrap();
        if let Some(body) = state.chunks.get_mut(&(uuid, index)) {
            body.truncate(len);
        }
    }

    /// Successful chunk PUTs so far.
    pub fn chunk_puts(&self) -> u64 {
        self.chunk_puts.load(Ordering::SeqCst)
    }

    /// Chunk PUT attempts, including injected failures.
    pub fn chunk_put_attempts(&self) -> u64 {
        self.chunk_put_attempts.load(Ordering::SeqCst)
    }

    pub fn chunk_gets(&self) -> u64 {
        self.chunk_gets.load(Ordering::SeqCst)
    }

    /// Stored chunk count for one file (test inspection).
    pub fn stored_chunks(&self, uuid: ItemId) -> u64 {
        let state = self.state.lock().unwrap();
        state.chunks.keys().filter(|(id, _)| *id == uuid).count() as u64
    }

    fn file_entry(uuid: ItemId, f: &StoredFile) -> FileEntry {
        FileEntry {
            uuid,
            metadata: f.metadata_env.clone(),
            parent: Some(f.parent),
            chunks: f.chunks,
            region: MEM_REGION.into(),
            bucket: MEM_BUCKET.into(),
            timestamp: f.timestamp,
            trash: f.trashed,
            version: f.version,
        }
    }
}

#[async_trait]
impl Backend for MemoryBackend {
    async fn auth_info(&self, email: &str) -> FilenResult<AuthInfo> {
        Ok(AuthInfo {
            email: email.to_lowercase(),
            auth_version: 2,
            salt: "memory-backend-salt".into(),
        })
    }

    async fn login(&self, req: &LoginRequest) -> FilenResult<LoginResponse> {
        if req.password.is_empty() {
            return Err(FilenError::Auth("empty derived password".into()));
        }
        Ok(LoginResponse {
            api_key: "memory-api-key".into(),
        })
    }

    async fn user_info(&self) -> FilenResult<UserInfo> {
        Ok(UserInfo {
            email: "mem@example.com".into(),
            storage_used: 0,
            max_storage: u64::MAX,
        })
    }

    async fn base_folder(&self) -> FilenResult<ItemId> {
        Ok(self.root_id())
    }

    async fn dir_content(&self, dir: DirSelector) -> FilenResult<DirContent> {
        let state = self.state.lock().unwrap();
        let mut content = DirContent::default();

        match dir {
            DirSelector::Folder(folder) => {
                if folder != state.root && !state.folders.contains_key(&folder) {
                    return Err(FilenError::NotFound(format!("folder {folder}")));
                }
                for (id, f) in &state.folders {
                    if f.parent == folder && !f.trashed {
                        content.folders.push(FolderEntry {
                            uuid: *id,
                            name: f.name_env.clone(),
                            parent: Some(f.parent),
                            timestamp: f.timestamp,
                            trash: false,
                        });
                    }
                }
                for (id, f) in &state.files {
                    if f.parent == folder && !f.trashed {
                        content.uploads.push(Self::file_entry(*id, f));
                    }
                }
            }
            DirSelector::Trash => {
                for (id, f) in &state.folders {
                    if f.trashed {
                        content.folders.push(FolderEntry {
                            uuid: *id,
                            name: f.name_env.clone(),
                            parent: Some(f.parent),
                            timestamp: f.timestamp,
                            trash: true,
                        });
                    }
                }
                for (id, f) in &state.files {
                    if f.trashed {
                        content.uploads.push(Self::file_entry(*id, f));
                    }
                }
            }
        }

        Ok(content)
    }

    async fn file_info(&self, uuid: ItemId) -> FilenResult<FileEntry> {
        let state = self.state.lock().unwrap();
        state
            .files
            .get(&uuid)
            .map(|f| Self::file_entry(uuid, f))
            .ok_or_else(|| FilenError::NotFound(format!("file {uuid}")))
    }

    async fn file_exists(&self, parent: ItemId, name_hashed: &str) -> FilenResult<bool> {
        let state = self.state.lock().unwrap();
        Ok(state
            .files
            .values()
            .any(|f| f.parent == parent && !f.trashed && f.name_hashed == name_hashed))
    }

    async fn create_folder(&self, req: &CreateFolderRequest) -> FilenResult<()> {
        let mut state = self.state.lock().unwrap();
        if req.parent != state.root && !state.folders.contains_key(&req.parent) {
            return Err(FilenError::NotFound(format!("parent {}", req.parent)));
        }
        let duplicate = state
            .folders
            .values()
            .any(|f| f.parent == req.parent && !f.trashed && f.name_hashed == req.name_hashed);
        if duplicate {
            return Err(FilenError::Conflict("folder already exists".into()));
        }
        state.folders.insert(
            req.uuid,
            StoredFolder {
                name_env: req.name.clone(),
                name_hashed: req.name_hashed.clone(),
                parent: req.parent,
                timestamp: now_ms(),
                trashed: false,
            },
        );
        Ok(())
    }

    async fn move_item(&self, kind: ItemKind, uuid: ItemId, to: ItemId) -> FilenResult<()> {
        let mut state = self.state.lock().unwrap();
        if to != state.root && !state.folders.contains_key(&to) {
            return Err(FilenError::NotFound(format!("destination {to}")));
        }
        match kind {
            ItemKind::Folder => {
                let folder = state
                    .folders
                    .get_mut(&uuid)
                    .ok_or_else(|| FilenError::NotFound(format!("folder {uuid}")))?;
                folder.parent = to;
            }
            ItemKind::File => {
                let file = state
                    .files
                    .get_mut(&uuid)
                    .ok_or_else(|| FilenError::NotFound(format!("file {uuid}")))?;
                file.parent = to;
            }
        }
        Ok(())
    }

    async fn rename_file(&self, req: &RenameFileRequest) -> FilenResult<()> {
        let mut state = self.state.lock().unwrap();
        let file = state
            .files
            .get_mut(&req.uuid)
            .ok_or_else(|| FilenError::NotFound(format!("file {}", req.uuid)))?;
        file.metadata_env = req.metadata.clone();
        file.name_hashed = req.name_hashed.clone();
        Ok(())
    }

    async fn rename_folder(&self, req: &RenameFolderRequest) -> FilenResult<()> {
        let mut state = self.state.lock().unwrap();
        let folder = state
            .folders
            .get_mut(&req.uuid)
            .ok_or_else(|| FilenError::NotFound(format!("folder {}", req.uuid)))?;
        folder.name_env = req.name.clone();
        folder.name_hashed = req.name_hashed.clone();
        Ok(())
    }

    async fn trash_item(&self, kind: ItemKind, uuid: ItemId) -> FilenResult<()> {
        let mut state = self.state.lock().unwrap();
        match kind {
            ItemKind::Folder => {
                state
                    .folders
                    .get_mut(&uuid)
                    .ok_or_else(|| FilenError::NotFound(format!("folder {uuid}")))?
                    .trashed = true;
            }
            ItemKind::File => {
                state
                    .files
                    .get_mut(&uuid)
                    .ok_or_else(|| FilenError::NotFound(format!("file {uuid}")))?
                    .trashed = true;
            }
        }
        Ok(())
    }

    async fn restore_item(&self, kind: ItemKind, uuid: ItemId) -> FilenResult<()> {
        let mut state = self.state.lock().unwrap();
        match kind {
            ItemKind::Folder => {
                state
                    .folders
                    .get_mut(&uuid)
                    .ok_or_else(|| FilenError::NotFound(format!("folder {uuid}")))?
                    .trashed = false;
            }
            ItemKind::File => {
                state
                    .files
                    .get_mut(&uuid)
                    .ok_or_else(|| FilenError::NotFound(format!("file {uuid}")))?
                    .trashed = false;
            }
        }
        Ok(())
    }

    async fn delete_item(&self, kind: ItemKind, uuid: ItemId) -> FilenResult<()> {
        let mut state = self.state.lock().unwrap();
        match kind {
            ItemKind::Folder => {
                state
                    .folders
                    .remove(&uuid)
                    .ok_or_else(|| FilenError::NotFound(format!("folder {uuid}")))?;
            }
            ItemKind::File => {
                state
                    .files
                    .remove(&uuid)
                    .ok_or_else(|| FilenError::NotFound(format!("file {uuid}")))?;
                state.chunks.retain(|(id, _), _| *id != uuid);
            }
        }
        Ok(())
    }

    async fn upload_chunk(&self, req: &ChunkUpload) -> FilenResult<()> {
        self.chunk_put_attempts.fetch_add(1, Ordering::SeqCst);

        let mut state = self.state.lock().unwrap();
        if state.fail_puts_remaining > 0 {
            state.fail_puts_remaining -= 1;
            return Err(FilenError::Transient("injected chunk PUT failure".into()));
        }
        if let Some(limit) = state.fail_puts_after {
            if self.chunk_puts.load(Ordering::SeqCst) >= limit {
                return Err(FilenError::Transient("injected link failure".into()));
            }
        }

        let pending = state
            .pending
            .entry(req.uuid)
            .or_insert_with(|| PendingUpload {
                parent: req.parent,
                upload_key: req.upload_key.clone(),
            });
        if pending.upload_key != req.upload_key {
            return Err(FilenError::Auth("upload key mismatch".into()));
        }

        state.chunks.insert((req.uuid, req.index), req.body.clone());
        self.chunk_puts.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    async fn upload_done(&self, req: &UploadDoneRequest) -> FilenResult<()> {
        let mut state = self.state.lock().unwrap();
        let pending = state
            .pending
            .remove(&req.uuid)
            .ok_or_else(|| FilenError::NotFound(format!("no pending upload {}", req.uuid)))?;
        if pending.upload_key != req.upload_key {
            return Err(FilenError::Auth("upload key mismatch".into()));
        }

        let stored = req.chunks;
        let have = state
            .chunks
            .keys()
            .filter(|(id, _)| *id == req.uuid)
            .count() as u64;
        if have < stored {
            return Err(FilenError::Fatal(format!(
                "upload incomplete: {have}/{stored} chunks"
            )));
        }

        state.files.insert(
            req.uuid,
            StoredFile {
                metadata_env: req.metadata.clone(),
                name_hashed: req.name_hashed.clone(),
                parent: pending.parent,
                chunks: stored,
                timestamp: now_ms(),
                trashed: false,
                version: req.version,
            },
        );
        Ok(())
    }

    async fn upload_empty(&self, req: &UploadEmptyRequest) -> FilenResult<()> {
        let mut state = self.state.lock().unwrap();
        if req.parent != state.root && !state.folders.contains_key(&req.parent) {
            return Err(FilenError::NotFound(format!("parent {}", req.parent)));
        }
        state.files.insert(
            req.uuid,
            StoredFile {
                metadata_env: req.metadata.clone(),
                name_hashed: req.name_hashed.clone(),
                parent: req.parent,
                chunks: 0,
                timestamp: now_ms(),
                trashed: false,
                version: req.version,
            },
        );
        Ok(())
    }

    async fn download_chunk(&self, loc: &ChunkLocation, index: u64) -> FilenResult<Vec<u8>> {
        self.chunk_gets.fetch_add(1, Ordering::SeqCst);

        let state = self.state.lock().unwrap();
        let mut body = state
            .chunks
            .get(&(loc.uuid, index))
            .cloned()
            .ok_or_else(|| FilenError::NotFound(format!("chunk {}/{index}", loc.uuid)))?;

        if state.tampered.contains(&(loc.uuid, index)) {
            // Flip one ciphertext byte past the IV so the tag check fails
            let pos = body.len().saturating_sub(1).min(13);
            body[pos] ^= 0xFF;
        }

        Ok(body)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn chunk_req(uuid: ItemId, parent: ItemId, index: u64, body: &[u8]) -> ChunkUpload {
        ChunkUpload {
            uuid,
            index,
            parent,
            upload_key: "test-key".into(),
            ciphertext_hash: String::new(),
            body: body.to_vec(),
        }
    }

    #[tokio::test]
    async fn chunk_roundtrip_and_counters() {
        let backend = MemoryBackend::new();
        let root = backend.root_id();
        let uuid = ItemId::new();

        backend
            .upload_chunk(&chunk_req(uuid, root, 0, b"chunk zero"))
            .await
            .unwrap();
        assert_eq!(backend.chunk_puts(), 1);

        let loc = ChunkLocation {
            region: MEM_REGION.into(),
            bucket: MEM_BUCKET.into(),
            uuid,
        };
        let body = backend.download_chunk(&loc, 0).await.unwrap();
        assert_eq!(body, b"chunk zero");
        assert_eq!(backend.chunk_gets(), 1);
    }

    #[tokio::test]
    async fn injected_put_failures_are_transient() {
        let backend = MemoryBackend::new();
        let root = backend.root_id();
        let uuid = ItemId::new();
        backend.fail_next_chunk_puts(2);

        let req = chunk_req(uuid, root, 0, b"x");
        assert!(backend.upload_chunk(&req).await.unwrap_err().is_retryable());
        assert!(backend.upload_chunk(&req).await.unwrap_err().is_retryable());
        backend.upload_chunk(&req).await.unwrap();

        assert_eq!(backend.chunk_put_attempts(), 3);
        assert_eq!(backend.chunk_puts(), 1);
    }

    #[tokio::test]
    async fn upload_done_requires_all_chunks() {
        let backend = MemoryBackend::new();
        let root = backend.root_id();
        let uuid = ItemId::new();

        backend
            .upload_chunk(&chunk_req(uuid, root, 0, b"only one"))
            .await
            .unwrap();

        let done = UploadDoneRequest {
            uuid,
            name: "002n".into(),
            name_hashed: "h".into(),
            size: "002s".into(),
            chunks: 2,
            mime: "002m".into(),
            metadata: "002meta".into(),
            upload_key: "test-key".into(),
            version: 2,
            rm: "rm".into(),
        };
        assert!(backend.upload_done(&done).await.is_err());
    }

    #[tokio::test]
    async fn trash_hides_from_listing() {
        let backend = MemoryBackend::new();
        let root = backend.root_id();
        let folder = ItemId::new();

        backend
            .create_folder(&CreateFolderRequest {
                uuid: folder,
                name: "002name".into(),
                name_hashed: "hash".into(),
                parent: root,
            })
            .await
            .unwrap();

        backend.trash_item(ItemKind::Folder, folder).await.unwrap();

        let listing = backend.dir_content(DirSelector::Folder(root)).await.unwrap();
        assert!(listing.folders.is_empty());

        let trash = backend.dir_content(DirSelector::Trash).await.unwrap();
        assert_eq!(trash.folders.len(), 1);

        backend
            .restore_item(ItemKind::Folder, folder)
            .await
            .unwrap();
        let listing = backend.dir_content(DirSelector::Folder(root)).await.unwrap();
        assert_eq!(listing.folders.len(), 1);
    }
}
