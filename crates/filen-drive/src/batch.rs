//! Batch orchestrator: enumerate work, apply filters and conflict policy,
//! drive the transfer engine, and keep the resume journal truthful.
//!
//! One logical file transfer at a time; the journal is the single source of
//! truth and is persisted (throttled) after each committed chunk and
//! unconditionally on every terminal transition. A batch whose tasks are all
//! terminal without errors deletes its journal; error tasks keep it alive
//! for the next invocation.

use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::sync::atomic::Ordering;
use std::sync::Arc;
use std::time::UNIX_EPOCH;

use filen_api::{Backend, ItemKind};
use filen_core::{FilenError, FilenResult, ItemId, Node, NodeKind};
use filen_crypto::{hash_name, MasterKey};
use tracing::{debug, info, warn};

use crate::filter::PathFilter;
use crate::journal::{
    batch_id, BatchJournal, JournalStore, Operation, Task, TaskStatus, ThrottledSaver,
};
use crate::resolver::{split_parent, Resolver};
use crate::transfer::{
    CancelFlag, DownloadSpec, TransferEngine, TransferOutcome, TransferState, UploadSpec,
};

/// What to do when the destination side already has the file.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ConflictPolicy {
    #[default]
    Skip,
    Overwrite,
    Newer,
}

impl FromStr for ConflictPolicy {
    type Err = FilenError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "skip" => Ok(ConflictPolicy::Skip),
            "overwrite" => Ok(ConflictPolicy::Overwrite),
            "newer" => Ok(ConflictPolicy::Newer),
            other => Err(FilenError::Fatal(format!(
                "unknown conflict policy {other:?} (skip|overwrite|newer)"
            ))),
        }
    }
}

#[derive(Debug, Clone, Default)]
pub struct BatchOptions {
    pub recursive: bool,
    pub conflict: ConflictPolicy,
    pub preserve_mtime: bool,
    /// Verify downloaded files against the server-stored hash.
    pub verify: bool,
    pub include: Vec<String>,
    pub exclude: Vec<String>,
}

/// Per-status counts for one batch run.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct BatchSummary {
    pub completed: u64,
    pub previously_completed: u64,
    pub skipped: u64,
    pub errors: u64,
    pub interrupted: u64,
    pub total_tasks: u64,
}

impl BatchSummary {
    pub fn failed(&self) -> bool {
        self.errors > 0
    }
}

/// Per-task progress: `(remote_path, bytes_done, bytes_total)`.
pub type TaskProgressFn = Box<dyn Fn(&str, u64, u64) + Send + Sync>;

enum ConflictDecision {
    Proceed,
    Skip(&'static str),
    /// Proceed, then trash this superseded node once the upload lands.
    Replace(ItemId),
}

pub struct Orchestrator {
    backend: Arc<dyn Backend>,
    resolver: Arc<Resolver>,
    engine: TransferEngine,
    store: JournalStore,
    master: MasterKey,
    email: String,
}

impl Orchestrator {
    pub fn new(
        backend: Arc<dyn Backend>,
        resolver: Arc<Resolver>,
        master: MasterKey,
        email: String,
        state_dir: impl Into<PathBuf>,
    ) -> Self {
        let engine = TransferEngine::new(backend.clone(), master.clone(), email.clone());
        Orchestrator {
            backend,
            resolver,
            engine,
            store: JournalStore::new(state_dir),
            master,
            email,
        }
    }

    pub fn journal_store(&self) -> &JournalStore {
        &self.store
    }

    // ── Upload batches ───────────────────────────────────────────────────

    pub async fn upload(
        &self,
        sources: &[String],
        target: &str,
        opts: &BatchOptions,
        progress: Option<&TaskProgressFn>,
        cancel: &CancelFlag,
    ) -> FilenResult<BatchSummary> {
        let filter = PathFilter::new(&opts.include, &opts.exclude)?;
        let id = batch_id(Operation::Upload, sources, target);
        let mut saver = ThrottledSaver::new(self.store.clone());

        let mut journal = match self.store.load(&id)? {
            Some(mut j) if j.non_terminal_count() > 0 || j.has_errors() => {
                revive_error_tasks(&mut j);
                info!(batch_id = %id, pending = j.non_terminal_count(), "resuming upload batch");
                j
            }
            _ => {
                let mut j = BatchJournal::new(
                    id.clone(),
                    Operation::Upload,
                    sources.to_vec(),
                    target.to_string(),
                );
                j.tasks = self.enumerate_upload(sources, target, opts, &filter).await?;
                info!(batch_id = %id, tasks = j.tasks.len(), "upload batch enumerated");
                saver.force(&mut j)?;
                j
            }
        };

        let run = self
            .run_upload_tasks(&mut journal, opts, &mut saver, progress, cancel)
            .await;
        self.finish(journal, saver, run)
    }

    /// Walk sources, apply filters, and produce pending tasks in stable
    /// order: lexicographic per directory, files before subdirectories.
    async fn enumerate_upload(
        &self,
        sources: &[String],
        target: &str,
        opts: &BatchOptions,
        filter: &PathFilter,
    ) -> FilenResult<Vec<Task>> {
        // Destination root exists before any task runs
        self.resolver.ensure_folder(target).await?;

        let mut tasks = Vec::new();
        for source in sources {
            let path = Path::new(source);
            if path.is_dir() {
                if !opts.recursive {
                    warn!(source, "skipping directory (pass -r to recurse)");
                    continue;
                }
                let dir_name = path
                    .file_name()
                    .map(|n| n.to_string_lossy().into_owned())
                    .unwrap_or_else(|| "upload".into());
                for (abs, rel) in walk_local(path)? {
                    if filter.matches(&rel) {
                        let remote = remote_join(target, &format!("{dir_name}/{rel}"));
                        tasks.push(Task::new(abs, remote));
                    }
                }
            } else {
                let name = path
                    .file_name()
                    .map(|n| n.to_string_lossy().into_owned())
                    .unwrap_or_else(|| source.clone());
                if filter.matches(&name) {
                    tasks.push(Task::new(path.to_path_buf(), remote_join(target, &name)));
                }
            }
        }
        Ok(tasks)
    }

    async fn run_upload_tasks(
        &self,
        journal: &mut BatchJournal,
        opts: &BatchOptions,
        saver: &mut ThrottledSaver,
        progress: Option<&TaskProgressFn>,
        cancel: &CancelFlag,
    ) -> FilenResult<BatchSummary> {
        let mut summary = BatchSummary {
            total_tasks: journal.tasks.len() as u64,
            ..BatchSummary::default()
        };

        for idx in 0..journal.tasks.len() {
            if cancel.load(Ordering::Relaxed) {
                break;
            }
            match &journal.tasks[idx].status {
                TaskStatus::Completed => {
                    summary.previously_completed += 1;
                    continue;
                }
                TaskStatus::Skipped(_) => {
                    summary.skipped += 1;
                    continue;
                }
                TaskStatus::Error(_) => {
                    // Errors are not auto-reset mid-batch
                    summary.errors += 1;
                    continue;
                }
                TaskStatus::Pending | TaskStatus::Active | TaskStatus::Interrupted => {}
            }

            let local = journal.tasks[idx].local_path.clone();
            let remote = journal.tasks[idx].remote_path.clone();

            if !local.exists() {
                warn!(path = %local.display(), "source missing, skipping");
                journal.tasks[idx].status = TaskStatus::Skipped("missing".into());
                summary.skipped += 1;
                saver.force(journal)?;
                continue;
            }

            let (parent_path, name) = split_parent(&remote)?;
            let parent = match self.resolver.ensure_folder(&parent_path).await {
                Ok(node) => node,
                Err(e @ FilenError::Auth(_)) => {
                    saver.force(journal)?;
                    return Err(e);
                }
                Err(e) => {
                    warn!(path = %remote, error = %e, "cannot prepare remote parent");
                    journal.tasks[idx].status = TaskStatus::error(&e);
                    summary.errors += 1;
                    saver.force(journal)?;
                    continue;
                }
            };

            // Conflict policy applies to fresh tasks; a task with an upload
            // in flight already made its decision.
            let mut replace_uuid = None;
            if journal.tasks[idx].file_uuid.is_none() {
                match self
                    .check_upload_conflict(&parent, &parent_path, &name, &local, opts)
                    .await
                {
                    Ok(ConflictDecision::Proceed) => {}
                    Ok(ConflictDecision::Replace(old)) => replace_uuid = Some(old),
                    Ok(ConflictDecision::Skip(reason)) => {
                        debug!(path = %remote, reason, "skipping (conflict policy)");
                        journal.tasks[idx].status = TaskStatus::Skipped(reason.into());
                        summary.skipped += 1;
                        saver.force(journal)?;
                        continue;
                    }
                    Err(e @ FilenError::Auth(_)) => {
                        saver.force(journal)?;
                        return Err(e);
                    }
                    Err(e) => {
                        journal.tasks[idx].status = TaskStatus::error(&e);
                        summary.errors += 1;
                        saver.force(journal)?;
                        continue;
                    }
                }
            }

            journal.tasks[idx].status = TaskStatus::Active;
            saver.force(journal)?;

            let mut state = TransferState {
                file_uuid: journal.tasks[idx].file_uuid,
                upload_key: journal.tasks[idx].upload_key.clone(),
                content_key: journal.tasks[idx].content_key.clone(),
                last_chunk: journal.tasks[idx].last_chunk,
            };
            let spec = UploadSpec {
                local_path: &local,
                parent: parent.id,
                remote_name: &name,
                preserve_mtime: opts.preserve_mtime,
            };

            let bridge = progress.map(|p| {
                let label = remote.clone();
                move |done: u64, total: u64| p(&label, done, total)
            });
            let bridge_ref = bridge
                .as_ref()
                .map(|f| f as &(dyn Fn(u64, u64) + Send + Sync));

            let result = self
                .engine
                .upload_file(
                    &spec,
                    &mut state,
                    |st| {
                        let task = &mut journal.tasks[idx];
                        task.file_uuid = st.file_uuid;
                        task.upload_key = st.upload_key.clone();
                        task.content_key = st.content_key.clone();
                        task.advance_last_chunk(st.last_chunk);
                        saver.chunk_committed(journal)
                    },
                    bridge_ref,
                    cancel,
                )
                .await;

            match result {
                Ok(TransferOutcome::Completed(report)) => {
                    let task = &mut journal.tasks[idx];
                    task.status = TaskStatus::Completed;
                    task.chunk_count = Some(report.chunks);
                    task.advance_last_chunk(report.chunks as i64 - 1);
                    summary.completed += 1;

                    if let Some(old) = replace_uuid {
                        if let Err(e) = self.backend.trash_item(ItemKind::File, old).await {
                            warn!(%old, error = %e, "failed to trash replaced file");
                        }
                    }
                    self.resolver.invalidate(parent.id);
                    saver.force(journal)?;
                }
                Ok(TransferOutcome::Interrupted) => {
                    journal.tasks[idx].status = TaskStatus::Interrupted;
                    summary.interrupted += 1;
                    saver.force(journal)?;
                    break;
                }
                Err(e @ FilenError::Auth(_)) => {
                    journal.tasks[idx].status = TaskStatus::Interrupted;
                    saver.force(journal)?;
                    return Err(e);
                }
                Err(e) => {
                    warn!(path = %remote, error = %e, kind = e.kind(), "upload failed");
                    journal.tasks[idx].status = TaskStatus::error(&e);
                    summary.errors += 1;
                    saver.force(journal)?;
                }
            }
        }

        Ok(summary)
    }

    async fn check_upload_conflict(
        &self,
        parent: &Node,
        parent_path: &str,
        name: &str,
        local: &Path,
        opts: &BatchOptions,
    ) -> FilenResult<ConflictDecision> {
        let hashed = hash_name(&self.master, &self.email, name);
        if !self.backend.file_exists(parent.id, &hashed).await? {
            return Ok(ConflictDecision::Proceed);
        }

        match opts.conflict {
            ConflictPolicy::Skip => Ok(ConflictDecision::Skip("exists")),
            ConflictPolicy::Overwrite => {
                match self.resolver.resolve(&remote_join(parent_path, name)).await {
                    Ok(resolved) if !resolved.node.is_folder() => {
                        Ok(ConflictDecision::Replace(resolved.node.id))
                    }
                    // Raced with a delete, or the name collides with a folder
                    _ => Ok(ConflictDecision::Proceed),
                }
            }
            ConflictPolicy::Newer => {
                let resolved = match self.resolver.resolve(&remote_join(parent_path, name)).await {
                    Ok(r) => r,
                    Err(FilenError::NotFound(_)) => return Ok(ConflictDecision::Proceed),
                    Err(e) => return Err(e),
                };
                let local_ms = mtime_ms(local)?;
                // Strictly newer proceeds; equal timestamps skip
                if local_ms > resolved.node.modified_ms() {
                    Ok(ConflictDecision::Replace(resolved.node.id))
                } else {
                    Ok(ConflictDecision::Skip("not_newer"))
                }
            }
        }
    }

    // ── Download batches ─────────────────────────────────────────────────

    pub async fn download(
        &self,
        source: &str,
        dest: &str,
        opts: &BatchOptions,
        progress: Option<&TaskProgressFn>,
        cancel: &CancelFlag,
    ) -> FilenResult<BatchSummary> {
        let filter = PathFilter::new(&opts.include, &opts.exclude)?;
        let sources = vec![source.to_string()];
        let id = batch_id(Operation::Download, &sources, dest);
        let mut saver = ThrottledSaver::new(self.store.clone());

        let mut journal = match self.store.load(&id)? {
            Some(mut j) if j.non_terminal_count() > 0 || j.has_errors() => {
                revive_error_tasks(&mut j);
                info!(batch_id = %id, pending = j.non_terminal_count(), "resuming download batch");
                j
            }
            _ => {
                let mut j = BatchJournal::new(
                    id.clone(),
                    Operation::Download,
                    sources,
                    dest.to_string(),
                );
                j.tasks = self.enumerate_download(source, dest, opts, &filter).await?;
                info!(batch_id = %id, tasks = j.tasks.len(), "download batch enumerated");
                saver.force(&mut j)?;
                j
            }
        };

        let run = self
            .run_download_tasks(&mut journal, opts, &mut saver, progress, cancel)
            .await;
        self.finish(journal, saver, run)
    }

    async fn enumerate_download(
        &self,
        source: &str,
        dest: &str,
        opts: &BatchOptions,
        filter: &PathFilter,
    ) -> FilenResult<Vec<Task>> {
        let resolved = self.resolver.resolve(source).await?;
        let mut tasks = Vec::new();

        match &resolved.node.kind {
            NodeKind::File(_) => {
                let name = resolved.node.name.clone();
                if !filter.matches(&name) {
                    return Ok(tasks);
                }
                let dest_path = Path::new(dest);
                let local = if dest_path.is_dir() || dest.ends_with('/') {
                    dest_path.join(&name)
                } else {
                    dest_path.to_path_buf()
                };
                tasks.push(download_task(&resolved.node, local, source.to_string()));
            }
            NodeKind::Folder => {
                if !opts.recursive {
                    return Err(FilenError::Fatal(format!(
                        "{source} is a folder (pass -r for recursive download)"
                    )));
                }
                let base = PathBuf::from(dest);
                std::fs::create_dir_all(&base)?;

                // Depth-first, files before subfolders, lexicographic within
                // each directory. The stack is LIFO so subfolders are pushed
                // in reverse order.
                let mut stack: Vec<(ItemId, String)> = vec![(resolved.node.id, String::new())];
                while let Some((folder, rel)) = stack.pop() {
                    let children = self.resolver.list(folder).await?;

                    let mut files: Vec<&Node> = children.iter().filter(|n| !n.is_folder()).collect();
                    files.sort_by(|a, b| a.name.cmp(&b.name));
                    for node in files {
                        let child_rel = join_rel(&rel, &node.name);
                        if filter.matches(&child_rel) {
                            let local = base.join(&child_rel);
                            let remote = remote_join(source, &child_rel);
                            tasks.push(download_task(node, local, remote));
                        }
                    }

                    let mut dirs: Vec<&Node> = children.iter().filter(|n| n.is_folder()).collect();
                    dirs.sort_by(|a, b| a.name.cmp(&b.name));
                    for node in dirs.iter() {
                        // Local directory exists before its files are queued
                        std::fs::create_dir_all(base.join(join_rel(&rel, &node.name)))?;
                    }
                    for node in dirs.iter().rev() {
                        stack.push((node.id, join_rel(&rel, &node.name)));
                    }
                }
            }
        }

        Ok(tasks)
    }

    async fn run_download_tasks(
        &self,
        journal: &mut BatchJournal,
        opts: &BatchOptions,
        saver: &mut ThrottledSaver,
        progress: Option<&TaskProgressFn>,
        cancel: &CancelFlag,
    ) -> FilenResult<BatchSummary> {
        let mut summary = BatchSummary {
            total_tasks: journal.tasks.len() as u64,
            ..BatchSummary::default()
        };

        for idx in 0..journal.tasks.len() {
            if cancel.load(Ordering::Relaxed) {
                break;
            }
            match &journal.tasks[idx].status {
                TaskStatus::Completed => {
                    summary.previously_completed += 1;
                    continue;
                }
                TaskStatus::Skipped(_) => {
                    summary.skipped += 1;
                    continue;
                }
                TaskStatus::Error(_) => {
                    summary.errors += 1;
                    continue;
                }
                TaskStatus::Pending | TaskStatus::Active | TaskStatus::Interrupted => {}
            }

            let local = journal.tasks[idx].local_path.clone();
            let remote = journal.tasks[idx].remote_path.clone();
            let Some(remote_uuid) = journal.tasks[idx].remote_uuid else {
                journal.tasks[idx].status = TaskStatus::Error("fatal".into());
                summary.errors += 1;
                saver.force(journal)?;
                continue;
            };

            // Conflict policy for fresh tasks; a resumed partial download
            // continues regardless.
            if journal.tasks[idx].last_chunk < 0 && local.exists() {
                let decision = match opts.conflict {
                    ConflictPolicy::Skip => Some("exists"),
                    ConflictPolicy::Overwrite => None,
                    ConflictPolicy::Newer => {
                        let remote_ms = journal.tasks[idx].remote_mtime.unwrap_or(0);
                        if remote_ms > mtime_ms(&local)? {
                            None
                        } else {
                            Some("not_newer")
                        }
                    }
                };
                if let Some(reason) = decision {
                    debug!(path = %local.display(), reason, "skipping (conflict policy)");
                    journal.tasks[idx].status = TaskStatus::Skipped(reason.into());
                    summary.skipped += 1;
                    saver.force(journal)?;
                    continue;
                }
            }

            // Re-fetch metadata: content key, placement, size, hash
            let info = match self.fetch_file_node(remote_uuid).await {
                Ok(node) => node,
                Err(e @ FilenError::Auth(_)) => {
                    saver.force(journal)?;
                    return Err(e);
                }
                Err(e) => {
                    warn!(path = %remote, error = %e, "cannot fetch file metadata");
                    journal.tasks[idx].status = TaskStatus::error(&e);
                    summary.errors += 1;
                    saver.force(journal)?;
                    continue;
                }
            };
            let Some(file) = info.file_info().cloned() else {
                journal.tasks[idx].status = TaskStatus::Error("fatal".into());
                summary.errors += 1;
                saver.force(journal)?;
                continue;
            };

            journal.tasks[idx].status = TaskStatus::Active;
            journal.tasks[idx].chunk_count = Some(file.chunks);
            saver.force(journal)?;

            let mut state = TransferState {
                last_chunk: journal.tasks[idx].last_chunk,
                ..TransferState::default()
            };
            let spec = DownloadSpec {
                uuid: remote_uuid,
                region: &file.region,
                bucket: &file.bucket,
                size: file.size,
                chunks: file.chunks,
                key_hex: &file.key_hex,
                server_hash: Some(file.hash_hex.as_str()),
                remote_mtime_ms: file.last_modified_ms,
                local_path: &local,
                preserve_mtime: opts.preserve_mtime,
                verify: opts.verify,
            };

            let bridge = progress.map(|p| {
                let label = remote.clone();
                move |done: u64, total: u64| p(&label, done, total)
            });
            let bridge_ref = bridge
                .as_ref()
                .map(|f| f as &(dyn Fn(u64, u64) + Send + Sync));

            let result = self
                .engine
                .download_file(
                    &spec,
                    &mut state,
                    |st| {
                        journal.tasks[idx].advance_last_chunk(st.last_chunk);
                        saver.chunk_committed(journal)
                    },
                    bridge_ref,
                    cancel,
                )
                .await;

            match result {
                Ok(TransferOutcome::Completed(report)) => {
                    let task = &mut journal.tasks[idx];
                    task.status = TaskStatus::Completed;
                    task.advance_last_chunk(report.chunks as i64 - 1);
                    summary.completed += 1;
                    saver.force(journal)?;
                }
                Ok(TransferOutcome::Interrupted) => {
                    journal.tasks[idx].status = TaskStatus::Interrupted;
                    summary.interrupted += 1;
                    saver.force(journal)?;
                    break;
                }
                Err(e @ FilenError::Auth(_)) => {
                    journal.tasks[idx].status = TaskStatus::Interrupted;
                    saver.force(journal)?;
                    return Err(e);
                }
                Err(e) => {
                    if matches!(e, FilenError::CryptoAuth) {
                        quarantine_corrupt(&local);
                        // The partial file is gone; the watermark must say so
                        journal.tasks[idx].last_chunk = -1;
                    }
                    warn!(path = %remote, error = %e, kind = e.kind(), "download failed");
                    journal.tasks[idx].status = TaskStatus::error(&e);
                    summary.errors += 1;
                    saver.force(journal)?;
                }
            }
        }

        Ok(summary)
    }

    async fn fetch_file_node(&self, uuid: ItemId) -> FilenResult<Node> {
        let entry = self.backend.file_info(uuid).await?;
        self.resolver.decode_file_entry(&entry)
    }

    /// Common tail: persist, delete the journal when fully done, surface
    /// the summary.
    fn finish(
        &self,
        mut journal: BatchJournal,
        mut saver: ThrottledSaver,
        run: FilenResult<BatchSummary>,
    ) -> FilenResult<BatchSummary> {
        match run {
            Ok(summary) => {
                saver.force(&mut journal)?;
                if journal.all_terminal() && !journal.has_errors() {
                    self.store.delete(&journal.batch_id)?;
                    debug!(batch_id = %journal.batch_id, "batch complete, journal deleted");
                } else {
                    info!(
                        batch_id = %journal.batch_id,
                        pending = journal.non_terminal_count(),
                        "journal retained for resume/retry"
                    );
                }
                Ok(summary)
            }
            Err(e) => {
                // Keep whatever progress we have; the error aborts the batch
                let _ = saver.force(&mut journal);
                Err(e)
            }
        }
    }
}

/// Re-running the same batch id is the explicit retry signal: failed tasks
/// go back to work, resuming where their committed chunks left off.
fn revive_error_tasks(journal: &mut BatchJournal) {
    for task in &mut journal.tasks {
        if matches!(task.status, TaskStatus::Error(_)) {
            task.status = if task.last_chunk >= 0 {
                TaskStatus::Interrupted
            } else {
                TaskStatus::Pending
            };
        }
    }
}

fn download_task(node: &Node, local: PathBuf, remote: String) -> Task {
    let mut task = Task::new(local, remote);
    task.remote_uuid = Some(node.id);
    task.remote_mtime = Some(node.modified_ms());
    task.chunk_count = node.file_info().map(|f| f.chunks);
    task
}

/// Rename a partially written file aside for inspection.
fn quarantine_corrupt(path: &Path) {
    if !path.exists() {
        return;
    }
    let quarantined = PathBuf::from(format!("{}.corrupt", path.display()));
    match std::fs::rename(path, &quarantined) {
        Ok(()) => warn!(path = %quarantined.display(), "corrupt download quarantined"),
        Err(e) => warn!(path = %path.display(), error = %e, "failed to quarantine corrupt file"),
    }
}

fn mtime_ms(path: &Path) -> FilenResult<i64> {
    let meta = std::fs::metadata(path)?;
    Ok(meta
        .modified()
        .ok()
        .and_then(|t| t.duration_since(UNIX_EPOCH).ok())
        .map(|d| d.as_millis() as i64)
        .unwrap_or(0))
}

fn remote_join(base: &str, rel: &str) -> String {
    let base = base.trim_end_matches('/');
    if base.is_empty() {
        format!("/{rel}")
    } else {
        format!("{base}/{rel}")
    }
}

fn join_rel(rel: &str, name: &str) -> String {
    if rel.is_empty() {
        name.to_string()
    } else {
        format!("{rel}/{name}")
    }
}

/// Collect all regular files under `root`: lexicographic per directory,
/// files before subdirectories, relative paths slash-separated.
fn walk_local(root: &Path) -> FilenResult<Vec<(PathBuf, String)>> {
    fn inner(dir: &Path, root: &Path, out: &mut Vec<(PathBuf, String)>) -> FilenResult<()> {
        let mut files = Vec::new();
        let mut dirs = Vec::new();
        for entry in std::fs::read_dir(dir)? {
            let path = entry?.path();
            if path.is_dir() {
                dirs.push(path);
            } else if path.is_file() {
                files.push(path);
            }
        }
        files.sort();
        dirs.sort();

        for file in files {
            let rel = file
                .strip_prefix(root)
                .unwrap_or(&file)
                .to_string_lossy()
                .replace('\\', "/");
            out.push((file, rel));
        }
        for sub in dirs {
            inner(&sub, root, out)?;
        }
        Ok(())
    }

    let mut out = Vec::new();
    inner(root, root, &mut out)?;
    Ok(out)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn conflict_policy_parses() {
        assert_eq!(
            ConflictPolicy::from_str("skip").unwrap(),
            ConflictPolicy::Skip
        );
        assert_eq!(
            ConflictPolicy::from_str("overwrite").unwrap(),
            ConflictPolicy::Overwrite
        );
        assert_eq!(
            ConflictPolicy::from_str("newer").unwrap(),
            ConflictPolicy::Newer
        );
        assert!(ConflictPolicy::from_str("merge").is_err());
    }

    #[test]
    fn remote_join_normalizes() {
        assert_eq!(remote_join("/docs", "a.txt"), "/docs/a.txt");
        assert_eq!(remote_join("/docs/", "a.txt"), "/docs/a.txt");
        assert_eq!(remote_join("/", "a.txt"), "/a.txt");
        assert_eq!(remote_join("", "a.txt"), "/a.txt");
    }

    #[test]
    fn walk_local_is_stable_files_first() {
        let dir = tempfile::tempdir().unwrap();
        let root = dir.path();
        std::fs::create_dir_all(root.join("sub_a")).unwrap();
        std::fs::write(root.join("zeta.txt"), b"z").unwrap();
        std::fs::write(root.join("alpha.txt"), b"a").unwrap();
        std::fs::write(root.join("sub_a/inner.txt"), b"i").unwrap();

        let rels: Vec<String> = walk_local(root).unwrap().into_iter().map(|(_, r)| r).collect();
        assert_eq!(rels, vec!["alpha.txt", "zeta.txt", "sub_a/inner.txt"]);
    }
}
