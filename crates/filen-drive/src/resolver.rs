//! Path resolution over the identifier-addressed tree.
//!
//! Paths are slash-separated plaintext names rooted at `/`. Each segment is
//! matched by exact name against the (decrypted) listing of the current
//! folder; listings come from the directory cache and fall back to the
//! backend on miss or expiry. Duplicate names under one parent are legal on
//! the server: the resolver picks the most recently modified non-trashed
//! node (then the lexicographically smaller identifier) and reports the
//! losers so strict callers can refuse ambiguous matches.

use std::sync::Arc;
use std::sync::Mutex;
use std::time::Duration;
use std::time::{SystemTime, UNIX_EPOCH};

use filen_api::types::{CreateFolderRequest, FileEntry, FolderEntry};
use filen_api::{Backend, DirSelector};
use filen_core::{FileInfo, FileMetadata, FilenError, FilenResult, ItemId, Node, NodeKind};
use filen_crypto::{hash_name, unwrap_metadata, wrap_metadata, MasterKey};
use serde::Deserialize;
use tracing::{debug, warn};

use crate::cache::DirCache;

/// Result of a resolve: the chosen node plus any same-named rivals under the
/// same parent (non-empty means the name is ambiguous).
#[derive(Debug, Clone)]
pub struct Resolved {
    pub node: Node,
    pub duplicates: Vec<Node>,
}

pub struct Resolver {
    backend: Arc<dyn Backend>,
    master: MasterKey,
    email: String,
    root: ItemId,
    cache: Mutex<DirCache>,
}

/// Folder name envelopes carry a one-field JSON object.
#[derive(Deserialize)]
struct FolderNameMeta {
    name: String,
}

fn now_ms() -> i64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_millis() as i64
}

/// Split a path into validated segments. Empty, `/`, and `.` mean the root.
pub fn validate_path(path: &str) -> FilenResult<Vec<String>> {
    if path.contains('\0') {
        return Err(FilenError::InvalidPath("path contains NUL".into()));
    }
    let trimmed = path.trim();
    if trimmed.is_empty() || trimmed == "/" || trimmed == "." {
        return Ok(Vec::new());
    }
    let body = trimmed.strip_prefix('/').unwrap_or(trimmed);
    let body = body.strip_suffix('/').unwrap_or(body);
    if body.is_empty() {
        return Ok(Vec::new());
    }

    let mut segments = Vec::new();
    for segment in body.split('/') {
        if segment.is_empty() {
            return Err(FilenError::InvalidPath(format!(
                "empty segment in {trimmed:?}"
            )));
        }
        segments.push(segment.to_string());
    }
    Ok(segments)
}

/// Split a validated path into its parent path and final name.
/// `/a/b/c.txt` → (`/a/b`, `c.txt`); `/c.txt` → (`/`, `c.txt`).
pub fn split_parent(path: &str) -> FilenResult<(String, String)> {
    let segments = validate_path(path)?;
    let Some((name, parents)) = segments.split_last() else {
        return Err(FilenError::InvalidPath("root has no parent".into()));
    };
    let parent = if parents.is_empty() {
        "/".to_string()
    } else {
        format!("/{}", parents.join("/"))
    };
    Ok((parent, name.clone()))
}

fn canonical(segments: &[String]) -> String {
    format!("/{}", segments.join("/"))
}

impl Resolver {
    pub fn new(
        backend: Arc<dyn Backend>,
        master: MasterKey,
        email: String,
        root: ItemId,
        cache_capacity: usize,
        cache_ttl: Duration,
    ) -> Self {
        Resolver {
            backend,
            master,
            email,
            root,
            cache: Mutex::new(DirCache::new(cache_capacity, cache_ttl)),
        }
    }

    pub fn root_id(&self) -> ItemId {
        self.root
    }

    /// Synthetic node for `/`.
    pub fn root_node(&self) -> Node {
        Node {
            id: self.root,
            parent: None,
            name: "/".into(),
            timestamp_ms: 0,
            trashed: false,
            kind: NodeKind::Folder,
        }
    }

    /// Drop the cached listing of a folder. Called after every mutation this
    /// client issues against that parent.
    pub fn invalidate(&self, folder: ItemId) {
        self.cache.lock().unwrap().invalidate(folder);
    }

    pub fn clear_cache(&self) {
        self.cache.lock().unwrap().clear();
    }

    // ── Listing ──────────────────────────────────────────────────────────

    /// Decrypted listing of a folder, cache-backed.
    pub async fn list(&self, folder: ItemId) -> FilenResult<Vec<Node>> {
        if let Some(children) = self.cache.lock().unwrap().get(folder) {
            debug!(%folder, "directory cache hit");
            return Ok(children);
        }

        let content = self.backend.dir_content(DirSelector::Folder(folder)).await?;
        let mut children = Vec::with_capacity(content.folders.len() + content.uploads.len());
        for entry in &content.folders {
            match self.decode_folder_entry(entry) {
                Ok(node) => children.push(node),
                Err(e) => warn!(uuid = %entry.uuid, error = %e, "skipping undecryptable folder"),
            }
        }
        for entry in &content.uploads {
            match self.decode_file_entry(entry) {
                Ok(node) => children.push(node),
                Err(e) => warn!(uuid = %entry.uuid, error = %e, "skipping undecryptable file"),
            }
        }

        self.cache.lock().unwrap().insert(folder, children.clone());
        Ok(children)
    }

    /// Decrypted trash listing (never cached).
    pub async fn list_trash(&self) -> FilenResult<Vec<Node>> {
        let content = self.backend.dir_content(DirSelector::Trash).await?;
        let mut items = Vec::new();
        for entry in &content.folders {
            if let Ok(node) = self.decode_folder_entry(entry) {
                items.push(node);
            }
        }
        for entry in &content.uploads {
            if let Ok(node) = self.decode_file_entry(entry) {
                items.push(node);
            }
        }
        Ok(items)
    }

    pub fn decode_folder_entry(&self, entry: &FolderEntry) -> FilenResult<Node> {
        let plaintext = unwrap_metadata(self.master.as_bytes(), &entry.name)?;
        // Folder names are wrapped as {"name": ...}; tolerate bare strings
        // found in very old accounts.
        let name = match serde_json::from_str::<FolderNameMeta>(&plaintext) {
            Ok(meta) => meta.name,
            Err(_) => plaintext,
        };
        Ok(Node {
            id: entry.uuid,
            parent: entry.parent,
            name,
            timestamp_ms: entry.timestamp,
            trashed: entry.trash,
            kind: NodeKind::Folder,
        })
    }

    pub fn decode_file_entry(&self, entry: &FileEntry) -> FilenResult<Node> {
        let plaintext = unwrap_metadata(self.master.as_bytes(), &entry.metadata)?;
        let meta: FileMetadata = serde_json::from_str(&plaintext)
            .map_err(|e| FilenError::Fatal(format!("malformed file metadata: {e}")))?;
        Ok(Node {
            id: entry.uuid,
            parent: entry.parent,
            name: meta.name,
            timestamp_ms: entry.timestamp,
            trashed: entry.trash,
            kind: NodeKind::File(FileInfo {
                size: meta.size,
                chunks: entry.chunks,
                key_hex: meta.key,
                mime: meta.mime,
                version: entry.version,
                region: entry.region.clone(),
                bucket: entry.bucket.clone(),
                last_modified_ms: meta.last_modified,
                hash_hex: meta.hash,
            }),
        })
    }

    // ── Resolution ───────────────────────────────────────────────────────

    pub async fn resolve(&self, path: &str) -> FilenResult<Resolved> {
        let segments = validate_path(path)?;
        if segments.is_empty() {
            return Ok(Resolved {
                node: self.root_node(),
                duplicates: Vec::new(),
            });
        }

        let (mut current, start) = self.cached_prefix(&segments);
        for (i, segment) in segments.iter().enumerate().skip(start) {
            let is_last = i == segments.len() - 1;
            let children = self.list(current).await?;

            let mut matches: Vec<Node> = children
                .into_iter()
                .filter(|n| n.name == *segment && (is_last || n.is_folder()))
                .collect();
            if matches.is_empty() {
                return Err(FilenError::NotFound(canonical(&segments[..=i])));
            }
            // Most recently modified first; smaller id breaks remaining ties
            matches.sort_by(|a, b| {
                b.modified_ms()
                    .cmp(&a.modified_ms())
                    .then(a.id.cmp(&b.id))
            });
            let mut matches = matches.into_iter();
            let node = matches.next().expect("non-empty match list");
            let duplicates: Vec<Node> = matches.collect();

            if is_last {
                return Ok(Resolved { node, duplicates });
            }
            current = node.id;
            self.cache
                .lock()
                .unwrap()
                .remember_path(&canonical(&segments[..=i]), current);
        }
        unreachable!("loop returns on the last segment")
    }

    /// Resolve, refusing ambiguous names.
    pub async fn resolve_strict(&self, path: &str) -> FilenResult<Node> {
        let resolved = self.resolve(path).await?;
        if !resolved.duplicates.is_empty() {
            return Err(FilenError::Ambiguous(format!(
                "{path}: {} nodes share this name",
                resolved.duplicates.len() + 1
            )));
        }
        Ok(resolved.node)
    }

    /// Longest strict path prefix already known to the cache.
    fn cached_prefix(&self, segments: &[String]) -> (ItemId, usize) {
        let cache = self.cache.lock().unwrap();
        for i in (1..segments.len()).rev() {
            if let Some(id) = cache.lookup_path(&canonical(&segments[..i])) {
                return (id, i);
            }
        }
        (self.root, 0)
    }

    // ── Folder creation ──────────────────────────────────────────────────

    /// Resolve a folder path, creating missing segments.
    pub async fn ensure_folder(&self, path: &str) -> FilenResult<Node> {
        let segments = validate_path(path)?;
        let mut current = self.root_node();

        for (i, segment) in segments.iter().enumerate() {
            let children = self.list(current.id).await?;
            let mut found: Vec<Node> = children
                .into_iter()
                .filter(|n| n.is_folder() && n.name == *segment)
                .collect();

            current = if found.is_empty() {
                self.create_folder(current.id, segment).await?
            } else {
                found.sort_by(|a, b| {
                    b.modified_ms()
                        .cmp(&a.modified_ms())
                        .then(a.id.cmp(&b.id))
                });
                found.swap_remove(0)
            };
            self.cache
                .lock()
                .unwrap()
                .remember_path(&canonical(&segments[..=i]), current.id);
        }

        Ok(current)
    }

    /// Create one folder under `parent`. A conflict (concurrent creation)
    /// resolves to the existing folder.
    pub async fn create_folder(&self, parent: ItemId, name: &str) -> FilenResult<Node> {
        if name.is_empty() || name.contains('/') || name.contains('\0') {
            return Err(FilenError::InvalidPath(format!("bad folder name {name:?}")));
        }

        let uuid = ItemId::new();
        let name_json = serde_json::json!({ "name": name }).to_string();
        let req = CreateFolderRequest {
            uuid,
            name: wrap_metadata(self.master.as_bytes(), &name_json)?,
            name_hashed: hash_name(&self.master, &self.email, name),
            parent,
        };

        match self.backend.create_folder(&req).await {
            Ok(()) => {
                self.invalidate(parent);
                debug!(%uuid, name, "folder created");
                Ok(Node {
                    id: uuid,
                    parent: Some(parent),
                    name: name.to_string(),
                    timestamp_ms: now_ms(),
                    trashed: false,
                    kind: NodeKind::Folder,
                })
            }
            Err(FilenError::Conflict(_)) => {
                // Someone else created it between our listing and the call
                self.invalidate(parent);
                let children = self.list(parent).await?;
                children
                    .into_iter()
                    .find(|n| n.is_folder() && n.name == name)
                    .ok_or_else(|| {
                        FilenError::Conflict(format!("folder {name:?} reported as existing"))
                    })
            }
            Err(e) => Err(e),
        }
    }

    pub fn master_key(&self) -> &MasterKey {
        &self.master
    }

    pub fn email(&self) -> &str {
        &self.email
    }
}
