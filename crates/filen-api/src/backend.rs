//! The `Backend` trait: every operation the client needs from the store.
//!
//! The transfer engine and batch orchestrator are written against this trait
//! so tests can swap the HTTP transport for [`crate::MemoryBackend`].

use async_trait::async_trait;
use filen_core::{FilenResult, ItemId};

use crate::types::{
    AuthInfo, ChunkLocation, ChunkUpload, CreateFolderRequest, DirContent, LoginRequest,
    LoginResponse, RenameFileRequest, RenameFolderRequest, UploadDoneRequest, UploadEmptyRequest,
    UserInfo,
};

/// File-or-folder discriminant for the operations that exist for both.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ItemKind {
    File,
    Folder,
}

/// What to list: a folder by id, or the account trash.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DirSelector {
    Folder(ItemId),
    Trash,
}

#[async_trait]
pub trait Backend: Send + Sync {
    // ── Authentication ────────────────────────────────────────────────────

    async fn auth_info(&self, email: &str) -> FilenResult<AuthInfo>;
    async fn login(&self, req: &LoginRequest) -> FilenResult<LoginResponse>;
    async fn user_info(&self) -> FilenResult<UserInfo>;
    async fn base_folder(&self) -> FilenResult<ItemId>;

    // ── Listing and lookup ────────────────────────────────────────────────

    async fn dir_content(&self, dir: DirSelector) -> FilenResult<DirContent>;
    async fn file_info(&self, uuid: ItemId) -> FilenResult<crate::types::FileEntry>;
    async fn file_exists(&self, parent: ItemId, name_hashed: &str) -> FilenResult<bool>;

    // ── Mutations ─────────────────────────────────────────────────────────

    async fn create_folder(&self, req: &CreateFolderRequest) -> FilenResult<()>;
    async fn move_item(&self, kind: ItemKind, uuid: ItemId, to: ItemId) -> FilenResult<()>;
    async fn rename_file(&self, req: &RenameFileRequest) -> FilenResult<()>;
    async fn rename_folder(&self, req: &RenameFolderRequest) -> FilenResult<()>;
    async fn trash_item(&self, kind: ItemKind, uuid: ItemId) -> FilenResult<()>;
    async fn restore_item(&self, kind: ItemKind, uuid: ItemId) -> FilenResult<()>;
    async fn delete_item(&self, kind: ItemKind, uuid: ItemId) -> FilenResult<()>;

    // ── Chunk transport ───────────────────────────────────────────────────

    /// PUT one raw ciphertext chunk. Idempotent: replaying an index
    /// overwrites the same slot.
    async fn upload_chunk(&self, req: &ChunkUpload) -> FilenResult<()>;
    /// Finalize a chunked upload with the wrapped metadata.
    async fn upload_done(&self, req: &UploadDoneRequest) -> FilenResult<()>;
    /// Create a zero-chunk file (metadata only).
    async fn upload_empty(&self, req: &UploadEmptyRequest) -> FilenResult<()>;
    /// GET one raw ciphertext chunk.
    async fn download_chunk(&self, loc: &ChunkLocation, index: u64) -> FilenResult<Vec<u8>>;
}
