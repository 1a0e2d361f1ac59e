//! Wire DTOs for the backend JSON API (camelCase on the wire).

use filen_core::ItemId;
use serde::{Deserialize, Serialize};

/// Generic gateway response frame: `{status, message, code, data}`.
#[derive(Debug, Deserialize)]
#[serde(bound(deserialize = "T: Deserialize<'de>"))]
pub struct ApiResponse<T> {
    pub status: bool,
    #[serde(default)]
    pub message: Option<String>,
    #[serde(default)]
    pub code: Option<String>,
    #[serde(default)]
    pub data: Option<T>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AuthInfo {
    pub email: String,
    pub auth_version: u32,
    pub salt: String,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct LoginRequest {
    pub email: String,
    /// The derived auth token, not the plaintext password.
    pub password: String,
    pub auth_version: u32,
    pub two_factor_code: String,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LoginResponse {
    pub api_key: String,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UserInfo {
    pub email: String,
    #[serde(default)]
    pub storage_used: u64,
    #[serde(default)]
    pub max_storage: u64,
}

/// Raw listing of one directory: folder and file entries with undecrypted
/// metadata envelopes.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct DirContent {
    #[serde(default)]
    pub folders: Vec<FolderEntry>,
    #[serde(default)]
    pub uploads: Vec<FileEntry>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FolderEntry {
    pub uuid: ItemId,
    /// Metadata envelope carrying `{"name": ...}`, wrapped with the master key.
    pub name: String,
    pub parent: Option<ItemId>,
    #[serde(default)]
    pub timestamp: i64,
    #[serde(default)]
    pub trash: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FileEntry {
    pub uuid: ItemId,
    /// Full metadata envelope, wrapped with the master key.
    pub metadata: String,
    pub parent: Option<ItemId>,
    #[serde(default)]
    pub chunks: u64,
    #[serde(default)]
    pub region: String,
    #[serde(default)]
    pub bucket: String,
    #[serde(default)]
    pub timestamp: i64,
    #[serde(default)]
    pub trash: bool,
    #[serde(default = "default_version")]
    pub version: u32,
}

fn default_version() -> u32 {
    2
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CreateFolderRequest {
    pub uuid: ItemId,
    /// `{"name": ...}` envelope under the master key.
    pub name: String,
    pub name_hashed: String,
    pub parent: ItemId,
}

/// One raw ciphertext chunk PUT to the ingest endpoint.
#[derive(Debug, Clone)]
pub struct ChunkUpload {
    pub uuid: ItemId,
    pub index: u64,
    pub parent: ItemId,
    pub upload_key: String,
    /// Hex SHA-512 of the ciphertext body.
    pub ciphertext_hash: String,
    pub body: Vec<u8>,
}

/// Server-side placement of a stored file's chunks.
#[derive(Debug, Clone)]
pub struct ChunkLocation {
    pub region: String,
    pub bucket: String,
    pub uuid: ItemId,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct UploadDoneRequest {
    pub uuid: ItemId,
    /// Name envelope under the content key.
    pub name: String,
    pub name_hashed: String,
    /// Size envelope under the content key.
    pub size: String,
    pub chunks: u64,
    /// Mime envelope under the content key.
    pub mime: String,
    /// Full metadata envelope under the master key.
    pub metadata: String,
    pub upload_key: String,
    pub version: u32,
    /// Random token the backend uses to garbage-collect abandoned uploads.
    pub rm: String,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct UploadEmptyRequest {
    pub uuid: ItemId,
    pub name: String,
    pub name_hashed: String,
    pub size: String,
    pub parent: ItemId,
    pub mime: String,
    pub metadata: String,
    pub version: u32,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RenameFileRequest {
    pub uuid: ItemId,
    /// New name envelope under the content key.
    pub name: String,
    pub name_hashed: String,
    /// Re-wrapped full metadata envelope under the master key.
    pub metadata: String,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RenameFolderRequest {
    pub uuid: ItemId,
    pub name: String,
    pub name_hashed: String,
}
