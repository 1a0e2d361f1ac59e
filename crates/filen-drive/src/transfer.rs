//! Chunked transfer engine: one file's encrypted upload or decrypting
//! download over fixed 1 MiB chunks.
//!
//! Resume model: the caller owns a [`TransferState`] (persisted in the batch
//! journal). `last_chunk` is the highest chunk durably acknowledged by the
//! backend; on resume the engine re-reads and re-hashes the already-committed
//! prefix from local disk to rebuild the streaming SHA-512; hasher state is
//! never persisted. Re-hashed chunks are not re-transmitted.
//!
//! Chunk `i + 1` is only submitted after chunk `i` is acknowledged, and the
//! cancel flag is polled before each submission, so `last_chunk` always
//! reflects the truth on the wire.

use std::io::SeekFrom;
use std::path::Path;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{SystemTime, UNIX_EPOCH};

use filen_api::types::{ChunkLocation, ChunkUpload, UploadDoneRequest, UploadEmptyRequest};
use filen_api::Backend;
use filen_core::types::chunk_count;
use filen_core::{FileMetadata, FilenError, FilenResult, ItemId, CHUNK_SIZE};
use filen_crypto::{
    decrypt_chunk, encrypt_chunk, hash_name, sha512_hex, wrap_metadata, ContentKey, FileHasher,
    MasterKey,
};
use rand::distributions::Alphanumeric;
use rand::Rng;
use tokio::fs::{File, OpenOptions};
use tokio::io::{AsyncReadExt, AsyncSeekExt, AsyncWriteExt};
use tracing::{debug, info, warn};

/// Progress callback: `(bytes_done, bytes_total)`, invoked after each chunk.
pub type ProgressFn = Box<dyn Fn(u64, u64) + Send + Sync>;

/// Cooperative cancellation: polled before each chunk submission.
pub type CancelFlag = Arc<AtomicBool>;

const DEFAULT_MIME: &str = "application/octet-stream";

/// Resume state for one transfer, mirrored into the journal task.
#[derive(Debug, Clone, Default)]
pub struct TransferState {
    pub file_uuid: Option<ItemId>,
    pub upload_key: Option<String>,
    /// Hex of the content key minted at upload begin; resumed chunks must be
    /// sealed under the same key as the committed prefix.
    pub content_key: Option<String>,
    /// Highest acknowledged zero-based chunk index, -1 for none.
    pub last_chunk: i64,
}

#[derive(Debug)]
pub enum TransferOutcome {
    Completed(TransferReport),
    /// Cancel observed: state persisted, no error.
    Interrupted,
}

#[derive(Debug)]
pub struct TransferReport {
    pub uuid: ItemId,
    pub size: u64,
    pub chunks: u64,
    /// Hex SHA-512 of the plaintext; empty for empty files.
    pub hash_hex: String,
}

pub struct UploadSpec<'a> {
    pub local_path: &'a Path,
    pub parent: ItemId,
    pub remote_name: &'a str,
    /// Carry the local mtime into the metadata envelope instead of "now".
    pub preserve_mtime: bool,
}

pub struct DownloadSpec<'a> {
    pub uuid: ItemId,
    pub region: &'a str,
    pub bucket: &'a str,
    pub size: u64,
    pub chunks: u64,
    pub key_hex: &'a str,
    /// Server-stored plaintext hash, when the metadata carries one.
    pub server_hash: Option<&'a str>,
    pub remote_mtime_ms: i64,
    pub local_path: &'a Path,
    pub preserve_mtime: bool,
    /// Recompute the full-file SHA-512 and compare against `server_hash`.
    pub verify: bool,
}

pub struct TransferEngine {
    backend: Arc<dyn Backend>,
    master: MasterKey,
    email: String,
}

fn now_ms() -> i64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_millis() as i64
}

/// Random alphanumeric token (upload keys, rm tokens).
fn random_token(len: usize) -> String {
    rand::thread_rng()
        .sample_iter(&Alphanumeric)
        .take(len)
        .map(char::from)
        .collect()
}

/// Fill `buf` from the file, tolerating partial reads. Returns bytes read.
async fn read_up_to(file: &mut File, buf: &mut [u8]) -> FilenResult<usize> {
    let mut filled = 0;
    while filled < buf.len() {
        let n = file.read(&mut buf[filled..]).await?;
        if n == 0 {
            break;
        }
        filled += n;
    }
    Ok(filled)
}

fn expected_chunk_len(size: u64, index: u64) -> usize {
    (size - index * CHUNK_SIZE).min(CHUNK_SIZE) as usize
}

impl TransferEngine {
    pub fn new(backend: Arc<dyn Backend>, master: MasterKey, email: String) -> Self {
        TransferEngine {
            backend,
            master,
            email,
        }
    }

    // ── Upload ───────────────────────────────────────────────────────────

    pub async fn upload_file(
        &self,
        spec: &UploadSpec<'_>,
        state: &mut TransferState,
        mut on_commit: impl FnMut(&TransferState) -> FilenResult<()>,
        progress: Option<&(dyn Fn(u64, u64) + Send + Sync)>,
        cancel: &CancelFlag,
    ) -> FilenResult<TransferOutcome> {
        let meta = tokio::fs::metadata(spec.local_path).await?;
        let size = meta.len();
        let last_modified = if spec.preserve_mtime {
            meta.modified()
                .ok()
                .and_then(|t| t.duration_since(UNIX_EPOCH).ok())
                .map(|d| d.as_millis() as i64)
                .unwrap_or_else(now_ms)
        } else {
            now_ms()
        };

        if size == 0 {
            return self.upload_empty(spec, last_modified, progress).await;
        }

        // Identity of this upload attempt: reused on resume so committed
        // chunks stay valid.
        let uuid = *state.file_uuid.get_or_insert_with(ItemId::new);
        let upload_key = state
            .upload_key
            .get_or_insert_with(|| random_token(32))
            .clone();
        let content_key = match &state.content_key {
            Some(hex_key) => ContentKey::from_hex(hex_key)?,
            None => {
                let key = ContentKey::generate();
                state.content_key = Some(key.to_hex());
                key
            }
        };

        let total_chunks = chunk_count(size);
        let start = (state.last_chunk + 1) as u64;

        if start > 0 {
            info!(path = %spec.local_path.display(), start, total_chunks, "resuming upload");
        } else {
            debug!(path = %spec.local_path.display(), total_chunks, size, "starting upload");
        }

        let mut hasher = FileHasher::new();
        let mut file = File::open(spec.local_path).await?;
        let mut buf = vec![0u8; CHUNK_SIZE as usize];

        // Rebuild the streaming hash over the committed prefix; these bytes
        // are not re-transmitted.
        for index in 0..start {
            let want = expected_chunk_len(size, index);
            let got = read_up_to(&mut file, &mut buf[..want]).await?;
            if got != want {
                return Err(FilenError::Io(std::io::Error::new(
                    std::io::ErrorKind::UnexpectedEof,
                    format!("{} changed size during resume", spec.local_path.display()),
                )));
            }
            hasher.update(&buf[..want]);
        }

        for index in start..total_chunks {
            if cancel.load(Ordering::Relaxed) {
                debug!(index, "cancel observed before chunk submission");
                return Ok(TransferOutcome::Interrupted);
            }

            let want = expected_chunk_len(size, index);
            let got = read_up_to(&mut file, &mut buf[..want]).await?;
            if got != want {
                return Err(FilenError::Io(std::io::Error::new(
                    std::io::ErrorKind::UnexpectedEof,
                    format!("{} changed size during upload", spec.local_path.display()),
                )));
            }

            hasher.update(&buf[..want]);
            let sealed = encrypt_chunk(&content_key, &buf[..want])?;
            let upload = ChunkUpload {
                uuid,
                index,
                parent: spec.parent,
                upload_key: upload_key.clone(),
                ciphertext_hash: sha512_hex(&sealed),
                body: sealed,
            };
            self.backend.upload_chunk(&upload).await?;

            state.last_chunk = index as i64;
            on_commit(state)?;
            if let Some(cb) = progress {
                cb(((index + 1) * CHUNK_SIZE).min(size), size);
            }
        }

        let hash_hex = hasher.finalize_hex();
        let metadata = FileMetadata {
            name: spec.remote_name.to_string(),
            size,
            mime: DEFAULT_MIME.into(),
            key: content_key.to_hex(),
            last_modified,
            hash: hash_hex.clone(),
        };
        let metadata_json = serde_json::to_string(&metadata)
            .map_err(|e| FilenError::Fatal(format!("serializing metadata: {e}")))?;

        let done = UploadDoneRequest {
            uuid,
            name: wrap_metadata(content_key.as_bytes(), spec.remote_name)?,
            name_hashed: hash_name(&self.master, &self.email, spec.remote_name),
            size: wrap_metadata(content_key.as_bytes(), &size.to_string())?,
            chunks: total_chunks,
            mime: wrap_metadata(content_key.as_bytes(), DEFAULT_MIME)?,
            metadata: wrap_metadata(self.master.as_bytes(), &metadata_json)?,
            upload_key,
            version: 2,
            rm: random_token(32),
        };
        self.backend.upload_done(&done).await?;

        info!(%uuid, size, chunks = total_chunks, "upload complete");
        Ok(TransferOutcome::Completed(TransferReport {
            uuid,
            size,
            chunks: total_chunks,
            hash_hex,
        }))
    }

    /// Zero-chunk upload: metadata only, via the dedicated endpoint.
    async fn upload_empty(
        &self,
        spec: &UploadSpec<'_>,
        last_modified: i64,
        progress: Option<&(dyn Fn(u64, u64) + Send + Sync)>,
    ) -> FilenResult<TransferOutcome> {
        let uuid = ItemId::new();
        let content_key = ContentKey::generate();

        let metadata = FileMetadata {
            name: spec.remote_name.to_string(),
            size: 0,
            mime: DEFAULT_MIME.into(),
            key: content_key.to_hex(),
            last_modified,
            hash: String::new(),
        };
        let metadata_json = serde_json::to_string(&metadata)
            .map_err(|e| FilenError::Fatal(format!("serializing metadata: {e}")))?;

        let req = UploadEmptyRequest {
            uuid,
            name: wrap_metadata(content_key.as_bytes(), spec.remote_name)?,
            name_hashed: hash_name(&self.master, &self.email, spec.remote_name),
            size: wrap_metadata(content_key.as_bytes(), "0")?,
            parent: spec.parent,
            mime: wrap_metadata(content_key.as_bytes(), DEFAULT_MIME)?,
            metadata: wrap_metadata(self.master.as_bytes(), &metadata_json)?,
            version: 2,
        };
        self.backend.upload_empty(&req).await?;

        if let Some(cb) = progress {
            cb(0, 0);
        }
        info!(%uuid, "empty file uploaded");
        Ok(TransferOutcome::Completed(TransferReport {
            uuid,
            size: 0,
            chunks: 0,
            hash_hex: String::new(),
        }))
    }

    // ── Download ─────────────────────────────────────────────────────────

    pub async fn download_file(
        &self,
        spec: &DownloadSpec<'_>,
        state: &mut TransferState,
        mut on_commit: impl FnMut(&TransferState) -> FilenResult<()>,
        progress: Option<&(dyn Fn(u64, u64) + Send + Sync)>,
        cancel: &CancelFlag,
    ) -> FilenResult<TransferOutcome> {
        if let Some(parent) = spec.local_path.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }

        if spec.chunks == 0 {
            tokio::fs::write(spec.local_path, b"").await?;
            self.stamp_mtime(spec)?;
            if let Some(cb) = progress {
                cb(0, 0);
            }
            return Ok(TransferOutcome::Completed(TransferReport {
                uuid: spec.uuid,
                size: 0,
                chunks: 0,
                hash_hex: String::new(),
            }));
        }

        let content_key = ContentKey::from_hex(spec.key_hex)?;
        let mut start = (state.last_chunk + 1) as u64;
        let mut resume_len = (start * CHUNK_SIZE).min(spec.size);

        let mut file = OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .truncate(false)
            .open(spec.local_path)
            .await?;
        let on_disk = file.metadata().await?.len();
        if on_disk < resume_len {
            // The file no longer backs the committed watermark (deleted or
            // quarantined between runs); start over.
            warn!(path = %spec.local_path.display(), on_disk, resume_len, "partial file missing, restarting download");
            start = 0;
            resume_len = 0;
            state.last_chunk = -1;
        }
        // Discard any bytes past the committed watermark (a partially
        // written chunk from the interrupted run).
        file.set_len(resume_len).await?;

        let mut hasher = FileHasher::new();
        if spec.verify && resume_len > 0 {
            file.seek(SeekFrom::Start(0)).await?;
            let mut remaining = resume_len;
            let mut buf = vec![0u8; CHUNK_SIZE as usize];
            while remaining > 0 {
                let want = remaining.min(CHUNK_SIZE) as usize;
                let got = read_up_to(&mut file, &mut buf[..want]).await?;
                if got != want {
                    return Err(FilenError::Io(std::io::Error::new(
                        std::io::ErrorKind::UnexpectedEof,
                        "partial download shrank on disk",
                    )));
                }
                hasher.update(&buf[..want]);
                remaining -= want as u64;
            }
        } else {
            file.seek(SeekFrom::Start(resume_len)).await?;
        }

        if start > 0 {
            info!(path = %spec.local_path.display(), start, total = spec.chunks, "resuming download");
        }

        let location = ChunkLocation {
            region: spec.region.to_string(),
            bucket: spec.bucket.to_string(),
            uuid: spec.uuid,
        };
        let mut written = resume_len;

        for index in start..spec.chunks {
            if cancel.load(Ordering::Relaxed) {
                file.flush().await?;
                debug!(index, "cancel observed before chunk fetch");
                return Ok(TransferOutcome::Interrupted);
            }

            let sealed = self.backend.download_chunk(&location, index).await?;
            let plaintext = decrypt_chunk(&content_key, &sealed)?;
            if plaintext.len() != expected_chunk_len(spec.size, index) {
                return Err(FilenError::CorruptChunk(format!(
                    "chunk {index}: {} bytes, expected {}",
                    plaintext.len(),
                    expected_chunk_len(spec.size, index)
                )));
            }

            file.write_all(&plaintext).await?;
            if spec.verify {
                hasher.update(&plaintext);
            }
            written += plaintext.len() as u64;

            state.last_chunk = index as i64;
            on_commit(state)?;
            if let Some(cb) = progress {
                cb(written, spec.size);
            }
        }

        file.flush().await?;
        drop(file);

        let hash_hex = if spec.verify {
            let computed = hasher.finalize_hex();
            if let Some(expected) = spec.server_hash.filter(|h| !h.is_empty()) {
                if computed != expected {
                    return Err(FilenError::HashMismatch {
                        expected: expected.to_string(),
                        computed,
                    });
                }
            }
            computed
        } else {
            String::new()
        };

        self.stamp_mtime(spec)?;

        info!(uuid = %spec.uuid, size = spec.size, chunks = spec.chunks, "download complete");
        Ok(TransferOutcome::Completed(TransferReport {
            uuid: spec.uuid,
            size: spec.size,
            chunks: spec.chunks,
            hash_hex,
        }))
    }

    fn stamp_mtime(&self, spec: &DownloadSpec<'_>) -> FilenResult<()> {
        if spec.preserve_mtime && spec.remote_mtime_ms > 0 {
            let secs = spec.remote_mtime_ms / 1000;
            let nanos = ((spec.remote_mtime_ms % 1000) * 1_000_000) as u32;
            let mtime = filetime::FileTime::from_unix_time(secs, nanos);
            filetime::set_file_mtime(spec.local_path, mtime)?;
        }
        Ok(())
    }

    pub fn backend(&self) -> &Arc<dyn Backend> {
        &self.backend
    }
}

/// Fresh, un-signalled cancel flag.
pub fn cancel_flag() -> CancelFlag {
    Arc::new(AtomicBool::new(false))
}
