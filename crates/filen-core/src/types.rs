use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Fixed chunk size: the unit of encryption, transfer, and resume.
pub const CHUNK_SIZE: u64 = 1_048_576;

/// Number of chunks for a file of `size` bytes. Empty files have zero chunks.
pub fn chunk_count(size: u64) -> u64 {
    size.div_ceil(CHUNK_SIZE)
}

/// Opaque 128-bit identifier assigned by the backend (UUID string on the wire).
///
/// `Ord` compares the canonical lowercase-hyphenated form, which the resolver
/// relies on for its duplicate-name tie-break.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ItemId(Uuid);

impl ItemId {
    pub fn new() -> Self {
        ItemId(Uuid::new_v4())
    }

    pub fn parse(s: &str) -> Option<Self> {
        Uuid::parse_str(s).ok().map(ItemId)
    }
}

impl Default for ItemId {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Display for ItemId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl PartialOrd for ItemId {
    fn partial_cmp(&self, other: &Self) -> Option<std::cmp::Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for ItemId {
    fn cmp(&self, other: &Self) -> std::cmp::Ordering {
        self.0.as_bytes().cmp(other.0.as_bytes())
    }
}

/// A resolved directory entry: file or folder, with decrypted name.
#[derive(Debug, Clone, PartialEq)]
pub struct Node {
    pub id: ItemId,
    pub parent: Option<ItemId>,
    pub name: String,
    /// Server-assigned creation/update timestamp, milliseconds since epoch.
    pub timestamp_ms: i64,
    pub trashed: bool,
    pub kind: NodeKind,
}

#[derive(Debug, Clone, PartialEq)]
pub enum NodeKind {
    Folder,
    File(FileInfo),
}

/// File-specific attributes recovered from the decrypted metadata envelope
/// plus the server-side chunk/placement fields.
#[derive(Debug, Clone, PartialEq)]
pub struct FileInfo {
    pub size: u64,
    pub chunks: u64,
    /// Hex of the per-file 256-bit content key.
    pub key_hex: String,
    pub mime: String,
    pub version: u32,
    pub region: String,
    pub bucket: String,
    /// Modification time from the metadata envelope, milliseconds since epoch.
    pub last_modified_ms: i64,
    /// Hex SHA-512 of the plaintext; empty for empty files.
    pub hash_hex: String,
}

impl Node {
    pub fn is_folder(&self) -> bool {
        matches!(self.kind, NodeKind::Folder)
    }

    pub fn file_info(&self) -> Option<&FileInfo> {
        match &self.kind {
            NodeKind::File(info) => Some(info),
            NodeKind::Folder => None,
        }
    }

    /// Best modification timestamp for ordering: envelope mtime for files,
    /// server timestamp for folders.
    pub fn modified_ms(&self) -> i64 {
        match &self.kind {
            NodeKind::File(info) if info.last_modified_ms > 0 => info.last_modified_ms,
            _ => self.timestamp_ms,
        }
    }
}

/// Plaintext body of a file's metadata envelope.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FileMetadata {
    pub name: String,
    pub size: u64,
    pub mime: String,
    /// Hex of the content key.
    pub key: String,
    pub last_modified: i64,
    /// Hex SHA-512 of the plaintext; empty string for empty files.
    #[serde(default)]
    pub hash: String,
}
