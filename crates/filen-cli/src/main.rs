//! filen: command-line client for an end-to-end encrypted cloud drive
//!
//! Account:   login, logout, whoami, config
//! Browsing:  ls, tree, find, resolve, list-trash
//! Transfer:  upload, download, download-path, verify, cp
//! Mutation:  mkdir, mv, rename, trash, restore-uuid, restore-path,
//!            delete-path
//!
//! Exit codes: 0 success, 1 partial failure or verification mismatch,
//! 2 usage error, 3 authentication error, 4 transient errors exhausted.

use std::future::Future;
use std::path::{Path, PathBuf};
use std::pin::Pin;
use std::process::ExitCode;
use std::sync::atomic::Ordering;
use std::sync::Arc;
use std::time::Duration;

use clap::{Parser, Subcommand};
use indicatif::{ProgressBar, ProgressStyle};
use secrecy::SecretString;
use tracing::debug;

use filen_api::types::{LoginRequest, RenameFileRequest, RenameFolderRequest};
use filen_api::{Backend, HttpBackend, ItemKind};
use filen_core::config::{Config, Credentials};
use filen_core::{FileMetadata, FilenError, FilenResult, ItemId, Node, NodeKind};
use filen_crypto::{derive_keys, hash_name, wrap_metadata, FileHasher, MasterKey};
use filen_drive::batch::TaskProgressFn;
use filen_drive::transfer::cancel_flag;
use filen_drive::{BatchOptions, BatchSummary, CancelFlag, ConflictPolicy, Orchestrator, Resolver};

// ── CLI structure ─────────────────────────────────────────────────────────────

#[derive(Parser, Debug)]
#[command(
    name = "filen",
    version,
    about = "Client for the Filen end-to-end encrypted cloud drive",
    long_about = "filen: encrypted, resumable uploads and downloads with a \
                  path-addressed view of your drive. Interrupted batches \
                  resume when the same command is re-run."
)]
struct Cli {
    /// Log filter (also FILEN_LOG), e.g. warn, info, filen_drive=debug
    #[arg(long, env = "FILEN_LOG", default_value = "warn", global = true)]
    log: String,

    /// Verbose output (-v info, -vv debug)
    #[arg(short = 'v', long, action = clap::ArgAction::Count, global = true)]
    verbose: u8,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Log in and store credentials locally
    Login {
        email: Option<String>,
        /// Two-factor code, when the account has 2FA enabled
        #[arg(long)]
        two_factor: Option<String>,
    },

    /// Remove stored credentials
    Logout,

    /// Show the logged-in account
    Whoami,

    /// List a remote directory
    Ls {
        #[arg(default_value = "/")]
        path: String,
        /// Long listing (sizes and dates)
        #[arg(short = 'l')]
        long: bool,
        /// Show backend identifiers
        #[arg(long)]
        uuids: bool,
    },

    /// Print a remote directory tree
    Tree {
        #[arg(default_value = "/")]
        path: String,
        /// Maximum depth
        #[arg(short = 'l', long = "levels", default_value_t = 3)]
        levels: usize,
    },

    /// Find remote files by glob pattern
    Find {
        path: String,
        pattern: String,
        /// Limit traversal depth (-1 = unlimited)
        #[arg(long, default_value_t = -1)]
        maxdepth: i32,
    },

    /// Resolve a path to its backend identifier
    Resolve { path: String },

    /// Upload files or directories (resumable)
    Upload {
        #[arg(required = true)]
        sources: Vec<String>,
        /// Remote target folder
        #[arg(short = 't', long, default_value = "/")]
        target: String,
        /// Recurse into directories
        #[arg(short = 'r', long)]
        recursive: bool,
        /// Preserve local modification times
        #[arg(short = 'p', long)]
        preserve_timestamps: bool,
        /// Include glob (repeatable); empty means everything
        #[arg(long)]
        include: Vec<String>,
        /// Exclude glob (repeatable)
        #[arg(long)]
        exclude: Vec<String>,
        /// Conflict policy: skip, overwrite, newer
        #[arg(long = "on-conflict", default_value = "skip")]
        on_conflict: String,
    },

    /// Download a single remote file
    Download {
        path: String,
        /// Local destination (file or existing directory)
        #[arg(short = 'o', long, default_value = ".")]
        output: String,
        #[arg(short = 'p', long)]
        preserve_timestamps: bool,
        /// Verify the SHA-512 against the server-stored hash
        #[arg(long)]
        verify: bool,
        #[arg(long = "on-conflict", default_value = "skip")]
        on_conflict: String,
    },

    /// Download a remote file or folder tree (resumable)
    DownloadPath {
        path: String,
        #[arg(short = 'o', long, default_value = ".")]
        output: String,
        #[arg(short = 'r', long)]
        recursive: bool,
        #[arg(short = 'p', long)]
        preserve_timestamps: bool,
        #[arg(long)]
        include: Vec<String>,
        #[arg(long)]
        exclude: Vec<String>,
        #[arg(long = "on-conflict", default_value = "skip")]
        on_conflict: String,
        #[arg(long)]
        verify: bool,
    },

    /// Compare a local file against the server-stored hash (no download)
    Verify {
        remote_path: String,
        local_path: PathBuf,
    },

    /// Create remote folders, including missing parents
    Mkdir { path: String },

    /// Move a file or folder into another folder
    Mv { source: String, dest: String },

    /// Copy a remote file (download + re-upload)
    Cp { source: String, dest: String },

    /// Rename a file or folder in place
    Rename { path: String, new_name: String },

    /// Move a file or folder to the trash
    Trash { path: String },

    /// List trash contents
    #[command(name = "list-trash")]
    ListTrash {
        #[arg(long)]
        uuids: bool,
    },

    /// Restore a trashed item by identifier
    #[command(name = "restore-uuid")]
    RestoreUuid { uuid: String },

    /// Restore a trashed item by name
    #[command(name = "restore-path")]
    RestorePath { path: String },

    /// Permanently delete a file or folder
    #[command(name = "delete-path")]
    DeletePath {
        path: String,
        /// Skip the confirmation prompt
        #[arg(short = 'f', long)]
        force: bool,
    },

    /// Show the active configuration
    Config,
}

// ── Entry point ───────────────────────────────────────────────────────────────

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();
    init_logging(&cli.log, cli.verbose);

    let config = Config::default();
    match run(cli.command, config).await {
        Ok(code) => code,
        Err(e) => {
            eprintln!("error ({}): {e}", e.kind());
            exit_code_for(&e)
        }
    }
}

fn init_logging(filter: &str, verbose: u8) {
    use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

    let level = match verbose {
        0 => filter.to_string(),
        1 => "info".to_string(),
        _ => "debug".to_string(),
    };
    let env_filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level));
    tracing_subscriber::registry()
        .with(env_filter)
        .with(fmt::layer().with_target(false))
        .init();
}

fn exit_code_for(err: &FilenError) -> ExitCode {
    match err {
        FilenError::Auth(_) => ExitCode::from(3),
        FilenError::Transient(_) | FilenError::RateLimited { .. } => ExitCode::from(4),
        _ => ExitCode::from(1),
    }
}

async fn run(command: Commands, config: Config) -> FilenResult<ExitCode> {
    match command {
        Commands::Login { email, two_factor } => cmd_login(&config, email, two_factor).await,
        Commands::Logout => cmd_logout(&config),
        Commands::Config => cmd_config(&config),
        other => {
            let ctx = AppContext::open(config).await?;
            ctx.dispatch(other).await
        }
    }
}

// ── Application context ───────────────────────────────────────────────────────

/// Everything an authenticated command needs, built once per invocation.
struct AppContext {
    creds: Credentials,
    backend: Arc<dyn Backend>,
    resolver: Arc<Resolver>,
    orchestrator: Orchestrator,
    master: MasterKey,
}

impl AppContext {
    async fn open(config: Config) -> FilenResult<Self> {
        let creds = Credentials::load(&config.credentials_path())?;
        let master = MasterKey::from_hex(&creds.master_key_hex)?;
        let root = ItemId::parse(&creds.base_folder_uuid)
            .ok_or_else(|| FilenError::Auth("stored credentials are corrupt".into()))?;

        let backend: Arc<dyn Backend> = Arc::new(HttpBackend::new(&config, Some(&creds.api_key))?);
        let resolver = Arc::new(Resolver::new(
            backend.clone(),
            master.clone(),
            creds.email.clone(),
            root,
            config.cache_capacity,
            config.cache_ttl,
        ));
        let orchestrator = Orchestrator::new(
            backend.clone(),
            resolver.clone(),
            master.clone(),
            creds.email.clone(),
            config.batch_state_dir(),
        );
        config.ensure_dirs()?;

        Ok(AppContext {
            creds,
            backend,
            resolver,
            orchestrator,
            master,
        })
    }

    async fn dispatch(&self, command: Commands) -> FilenResult<ExitCode> {
        match command {
            Commands::Whoami => self.cmd_whoami().await,
            Commands::Ls { path, long, uuids } => self.cmd_ls(&path, long, uuids).await,
            Commands::Tree { path, levels } => self.cmd_tree(&path, levels).await,
            Commands::Find {
                path,
                pattern,
                maxdepth,
            } => self.cmd_find(&path, &pattern, maxdepth).await,
            Commands::Resolve { path } => self.cmd_resolve(&path).await,
            Commands::Upload {
                sources,
                target,
                recursive,
                preserve_timestamps,
                include,
                exclude,
                on_conflict,
            } => {
                let opts = BatchOptions {
                    recursive,
                    conflict: on_conflict.parse::<ConflictPolicy>()?,
                    preserve_mtime: preserve_timestamps,
                    verify: false,
                    include,
                    exclude,
                };
                self.cmd_upload(&sources, &target, &opts).await
            }
            Commands::Download {
                path,
                output,
                preserve_timestamps,
                verify,
                on_conflict,
            } => {
                let opts = BatchOptions {
                    recursive: false,
                    conflict: on_conflict.parse::<ConflictPolicy>()?,
                    preserve_mtime: preserve_timestamps,
                    verify,
                    include: Vec::new(),
                    exclude: Vec::new(),
                };
                self.cmd_download(&path, &output, &opts).await
            }
            Commands::DownloadPath {
                path,
                output,
                recursive,
                preserve_timestamps,
                include,
                exclude,
                on_conflict,
                verify,
            } => {
                let opts = BatchOptions {
                    recursive,
                    conflict: on_conflict.parse::<ConflictPolicy>()?,
                    preserve_mtime: preserve_timestamps,
                    verify,
                    include,
                    exclude,
                };
                self.cmd_download(&path, &output, &opts).await
            }
            Commands::Verify {
                remote_path,
                local_path,
            } => self.cmd_verify(&remote_path, &local_path).await,
            Commands::Mkdir { path } => self.cmd_mkdir(&path).await,
            Commands::Mv { source, dest } => self.cmd_mv(&source, &dest).await,
            Commands::Cp { source, dest } => self.cmd_cp(&source, &dest).await,
            Commands::Rename { path, new_name } => self.cmd_rename(&path, &new_name).await,
            Commands::Trash { path } => self.cmd_trash(&path).await,
            Commands::ListTrash { uuids } => self.cmd_list_trash(uuids).await,
            Commands::RestoreUuid { uuid } => self.cmd_restore_uuid(&uuid).await,
            Commands::RestorePath { path } => self.cmd_restore_path(&path).await,
            Commands::DeletePath { path, force } => self.cmd_delete_path(&path, force).await,
            // Handled before the context is opened
            Commands::Login { .. } | Commands::Logout | Commands::Config => unreachable!(),
        }
    }

    // ── Account commands ─────────────────────────────────────────────────

    async fn cmd_whoami(&self) -> FilenResult<ExitCode> {
        println!("{}", self.creds.email);
        if let Ok(info) = self.backend.user_info().await {
            if info.max_storage > 0 {
                println!(
                    "storage: {} of {} used",
                    fmt_bytes(info.storage_used),
                    fmt_bytes(info.max_storage)
                );
            }
        }
        Ok(ExitCode::SUCCESS)
    }

    // ── Browsing commands ────────────────────────────────────────────────

    async fn cmd_ls(&self, path: &str, long: bool, uuids: bool) -> FilenResult<ExitCode> {
        let resolved = self.resolver.resolve(path).await?;
        let nodes = if resolved.node.is_folder() {
            let mut children = self.resolver.list(resolved.node.id).await?;
            children.sort_by(|a, b| {
                b.is_folder()
                    .cmp(&a.is_folder())
                    .then(a.name.cmp(&b.name))
            });
            children
        } else {
            vec![resolved.node]
        };

        for node in &nodes {
            print_node_line(node, long, uuids);
        }
        Ok(ExitCode::SUCCESS)
    }

    async fn cmd_tree(&self, path: &str, levels: usize) -> FilenResult<ExitCode> {
        let resolved = self.resolver.resolve(path).await?;
        if !resolved.node.is_folder() {
            println!("{}", resolved.node.name);
            return Ok(ExitCode::SUCCESS);
        }
        println!("{}", if path == "/" { "/" } else { path });
        print_tree(&self.resolver, resolved.node.id, String::new(), levels).await?;
        Ok(ExitCode::SUCCESS)
    }

    async fn cmd_find(&self, path: &str, pattern: &str, maxdepth: i32) -> FilenResult<ExitCode> {
        let pattern = glob::Pattern::new(pattern)
            .map_err(|e| FilenError::Fatal(format!("invalid pattern: {e}")))?;
        let start = self.resolver.resolve(path).await?;
        if !start.node.is_folder() {
            return Err(FilenError::InvalidPath(format!("{path} is not a folder")));
        }

        let base = if path == "/" { String::new() } else { path.trim_end_matches('/').to_string() };
        let mut found = 0usize;
        let mut stack: Vec<(ItemId, String, i32)> = vec![(start.node.id, base, 0)];
        while let Some((folder, prefix, depth)) = stack.pop() {
            if maxdepth >= 0 && depth > maxdepth {
                continue;
            }
            let children = self.resolver.list(folder).await?;
            for node in &children {
                let full = format!("{prefix}/{}", node.name);
                if !node.is_folder() && pattern.matches(&node.name) {
                    let size = node.file_info().map(|f| f.size).unwrap_or(0);
                    println!("{full} ({})", fmt_bytes(size));
                    found += 1;
                }
            }
            for node in children.iter().rev() {
                if node.is_folder() {
                    stack.push((node.id, format!("{prefix}/{}", node.name), depth + 1));
                }
            }
        }

        debug!(found, "find finished");
        Ok(ExitCode::SUCCESS)
    }

    async fn cmd_resolve(&self, path: &str) -> FilenResult<ExitCode> {
        let resolved = self.resolver.resolve(path).await?;
        let kind = if resolved.node.is_folder() { "folder" } else { "file" };
        println!("{kind} {}", resolved.node.id);
        if !resolved.duplicates.is_empty() {
            println!("warning: {} other node(s) share this name:", resolved.duplicates.len());
            for dup in &resolved.duplicates {
                println!("  {} {}", if dup.is_folder() { "folder" } else { "file" }, dup.id);
            }
        }
        Ok(ExitCode::SUCCESS)
    }

    // ── Transfer commands ────────────────────────────────────────────────

    async fn cmd_upload(
        &self,
        sources: &[String],
        target: &str,
        opts: &BatchOptions,
    ) -> FilenResult<ExitCode> {
        let cancel = cancel_on_ctrl_c();
        let (bar, progress) = transfer_bar("upload");

        let summary = self
            .orchestrator
            .upload(sources, target, opts, Some(&progress), &cancel)
            .await;
        bar.finish_and_clear();

        let summary = summary?;
        print_summary("Upload", &summary);
        Ok(summary_exit(&summary, &cancel))
    }

    async fn cmd_download(
        &self,
        path: &str,
        output: &str,
        opts: &BatchOptions,
    ) -> FilenResult<ExitCode> {
        let cancel = cancel_on_ctrl_c();
        let (bar, progress) = transfer_bar("download");

        let summary = self
            .orchestrator
            .download(path, output, opts, Some(&progress), &cancel)
            .await;
        bar.finish_and_clear();

        let summary = summary?;
        print_summary("Download", &summary);
        Ok(summary_exit(&summary, &cancel))
    }

    async fn cmd_verify(&self, remote_path: &str, local_path: &Path) -> FilenResult<ExitCode> {
        let node = self.resolver.resolve_strict(remote_path).await?;
        let info = node
            .file_info()
            .ok_or_else(|| FilenError::InvalidPath(format!("{remote_path} is a folder")))?;

        let local_hash = hash_local_file(local_path)?;
        if info.hash_hex.is_empty() {
            let empty = std::fs::metadata(local_path)?.len() == 0;
            println!("{}", if empty { "OK (empty file)" } else { "MISMATCH (remote is empty)" });
            return Ok(if empty { ExitCode::SUCCESS } else { ExitCode::from(1) });
        }

        if local_hash == info.hash_hex {
            println!("OK {}", &local_hash[..32]);
            Ok(ExitCode::SUCCESS)
        } else {
            println!("MISMATCH");
            println!("  local:  {local_hash}");
            println!("  remote: {}", info.hash_hex);
            Ok(ExitCode::from(1))
        }
    }

    async fn cmd_cp(&self, source: &str, dest: &str) -> FilenResult<ExitCode> {
        let node = self.resolver.resolve_strict(source).await?;
        if node.is_folder() {
            return Err(FilenError::InvalidPath(
                "cp copies single files; use download-path + upload for trees".into(),
            ));
        }

        let staging = tempfile::tempdir()?;
        let staging_str = staging.path().to_string_lossy().into_owned();
        let cancel = cancel_flag();

        self.orchestrator
            .download(source, &staging_str, &BatchOptions::default(), None, &cancel)
            .await?;

        let local = staging.path().join(&node.name);
        let opts = BatchOptions {
            conflict: ConflictPolicy::Overwrite,
            ..BatchOptions::default()
        };
        let summary = self
            .orchestrator
            .upload(
                &[local.to_string_lossy().into_owned()],
                dest,
                &opts,
                None,
                &cancel,
            )
            .await?;

        if summary.failed() {
            return Ok(ExitCode::from(1));
        }
        println!("copied {source} -> {dest}");
        Ok(ExitCode::SUCCESS)
    }

    // ── Mutation commands ────────────────────────────────────────────────

    async fn cmd_mkdir(&self, path: &str) -> FilenResult<ExitCode> {
        let node = self.resolver.ensure_folder(path).await?;
        println!("created {path} ({})", node.id);
        Ok(ExitCode::SUCCESS)
    }

    async fn cmd_mv(&self, source: &str, dest: &str) -> FilenResult<ExitCode> {
        let node = self.resolver.resolve_strict(source).await?;
        let target = self.resolver.resolve_strict(dest).await?;
        if !target.is_folder() {
            return Err(FilenError::InvalidPath(format!("{dest} is not a folder")));
        }

        let kind = if node.is_folder() { ItemKind::Folder } else { ItemKind::File };
        self.backend.move_item(kind, node.id, target.id).await?;

        if let Some(parent) = node.parent {
            self.resolver.invalidate(parent);
        }
        self.resolver.invalidate(target.id);
        println!("moved {source} -> {dest}");
        Ok(ExitCode::SUCCESS)
    }

    async fn cmd_rename(&self, path: &str, new_name: &str) -> FilenResult<ExitCode> {
        if new_name.is_empty() || new_name.contains('/') || new_name.contains('\0') {
            return Err(FilenError::InvalidPath(format!("bad name {new_name:?}")));
        }
        let node = self.resolver.resolve_strict(path).await?;
        let name_hashed = hash_name(&self.master, &self.creds.email, new_name);

        match &node.kind {
            NodeKind::Folder => {
                let name_json = serde_json::json!({ "name": new_name }).to_string();
                self.backend
                    .rename_folder(&RenameFolderRequest {
                        uuid: node.id,
                        name: wrap_metadata(self.master.as_bytes(), &name_json)?,
                        name_hashed,
                    })
                    .await?;
            }
            NodeKind::File(info) => {
                let content_key = filen_crypto::ContentKey::from_hex(&info.key_hex)?;
                let metadata = FileMetadata {
                    name: new_name.to_string(),
                    size: info.size,
                    mime: info.mime.clone(),
                    key: info.key_hex.clone(),
                    last_modified: info.last_modified_ms,
                    hash: info.hash_hex.clone(),
                };
                let metadata_json = serde_json::to_string(&metadata)
                    .map_err(|e| FilenError::Fatal(format!("serializing metadata: {e}")))?;
                self.backend
                    .rename_file(&RenameFileRequest {
                        uuid: node.id,
                        name: wrap_metadata(content_key.as_bytes(), new_name)?,
                        name_hashed,
                        metadata: wrap_metadata(self.master.as_bytes(), &metadata_json)?,
                    })
                    .await?;
            }
        }

        if let Some(parent) = node.parent {
            self.resolver.invalidate(parent);
        }
        println!("renamed {path} -> {new_name}");
        Ok(ExitCode::SUCCESS)
    }

    async fn cmd_trash(&self, path: &str) -> FilenResult<ExitCode> {
        let node = self.resolver.resolve_strict(path).await?;
        let kind = if node.is_folder() { ItemKind::Folder } else { ItemKind::File };
        self.backend.trash_item(kind, node.id).await?;
        if let Some(parent) = node.parent {
            self.resolver.invalidate(parent);
        }
        println!("trashed {path}");
        Ok(ExitCode::SUCCESS)
    }

    async fn cmd_list_trash(&self, uuids: bool) -> FilenResult<ExitCode> {
        let items = self.resolver.list_trash().await?;
        if items.is_empty() {
            println!("trash is empty");
            return Ok(ExitCode::SUCCESS);
        }
        for node in &items {
            print_node_line(node, true, uuids);
        }
        Ok(ExitCode::SUCCESS)
    }

    async fn cmd_restore_uuid(&self, uuid: &str) -> FilenResult<ExitCode> {
        let id = ItemId::parse(uuid)
            .ok_or_else(|| FilenError::InvalidPath(format!("{uuid} is not an identifier")))?;

        // The identifier does not reveal the kind; try file, then folder.
        match self.backend.restore_item(ItemKind::File, id).await {
            Ok(()) => {}
            Err(FilenError::NotFound(_)) => {
                self.backend.restore_item(ItemKind::Folder, id).await?;
            }
            Err(e) => return Err(e),
        }
        self.resolver.clear_cache();
        println!("restored {id}");
        Ok(ExitCode::SUCCESS)
    }

    async fn cmd_restore_path(&self, path: &str) -> FilenResult<ExitCode> {
        let (_, name) = filen_drive::resolver::split_parent(path)?;
        let trash = self.resolver.list_trash().await?;
        let matches: Vec<&Node> = trash.iter().filter(|n| n.name == name).collect();

        match matches.len() {
            0 => Err(FilenError::NotFound(format!("{name} is not in the trash"))),
            1 => {
                let node = matches[0];
                let kind = if node.is_folder() { ItemKind::Folder } else { ItemKind::File };
                self.backend.restore_item(kind, node.id).await?;
                self.resolver.clear_cache();
                println!("restored {name} ({})", node.id);
                Ok(ExitCode::SUCCESS)
            }
            n => Err(FilenError::Ambiguous(format!(
                "{n} trashed items are named {name:?}; use restore-uuid"
            ))),
        }
    }

    async fn cmd_delete_path(&self, path: &str, force: bool) -> FilenResult<ExitCode> {
        let node = self.resolver.resolve_strict(path).await?;

        if !force {
            let answer = prompt_line(&format!("Permanently delete {path}? [y/N] "))?;
            if !matches!(answer.trim(), "y" | "Y" | "yes") {
                println!("aborted");
                return Ok(ExitCode::SUCCESS);
            }
        }

        let kind = if node.is_folder() { ItemKind::Folder } else { ItemKind::File };
        self.backend.delete_item(kind, node.id).await?;
        if let Some(parent) = node.parent {
            self.resolver.invalidate(parent);
        }
        println!("deleted {path}");
        Ok(ExitCode::SUCCESS)
    }
}

// ── login / logout / config (no stored credentials required) ─────────────────

async fn cmd_login(
    config: &Config,
    email: Option<String>,
    two_factor: Option<String>,
) -> FilenResult<ExitCode> {
    let email = match email {
        Some(e) => e,
        None => prompt_line("Email: ")?,
    };
    let email = email.trim().to_lowercase();
    if email.is_empty() {
        return Err(FilenError::Auth("email must not be empty".into()));
    }

    let password = rpassword::prompt_password("Password: ").map_err(FilenError::Io)?;

    let anonymous = HttpBackend::new(config, None)?;
    let info = anonymous.auth_info(&email).await?;
    if info.auth_version != 2 {
        return Err(FilenError::Auth(format!(
            "unsupported auth version {}",
            info.auth_version
        )));
    }

    println!("Deriving keys...");
    let derived = derive_keys(&SecretString::from(password), &info.salt)?;

    let login = anonymous
        .login(&LoginRequest {
            email: email.clone(),
            password: derived.auth_token.clone(),
            auth_version: 2,
            two_factor_code: two_factor.unwrap_or_else(|| "XXXXXX".into()),
        })
        .await?;

    let authed = HttpBackend::new(config, Some(&login.api_key))?;
    let root = authed.base_folder().await?;

    let creds = Credentials {
        email: email.clone(),
        master_key_hex: derived.master.to_hex(),
        auth_token: derived.auth_token,
        api_key: login.api_key,
        base_url: config.gateway_url.clone(),
        base_folder_uuid: root.to_string(),
    };
    config.ensure_dirs()?;
    creds.save(&config.credentials_path())?;

    println!("Logged in as {email}");
    Ok(ExitCode::SUCCESS)
}

fn cmd_logout(config: &Config) -> FilenResult<ExitCode> {
    Credentials::clear(&config.credentials_path())?;
    println!("Logged out.");
    Ok(ExitCode::SUCCESS)
}

fn cmd_config(config: &Config) -> FilenResult<ExitCode> {
    let logged_in = config.credentials_path().exists();
    println!("data dir:     {}", config.data_dir.display());
    println!("gateway:      {}", config.gateway_url);
    println!("ingest:       {}", config.ingest_url);
    println!("egest:        {}", config.egest_url);
    println!("cache:        {} folders, {}s TTL", config.cache_capacity, config.cache_ttl.as_secs());
    println!("batch states: {}", config.batch_state_dir().display());
    println!("logged in:    {}", if logged_in { "yes" } else { "no" });
    Ok(ExitCode::SUCCESS)
}

// ── Progress and cancellation plumbing ────────────────────────────────────────

/// Cancel flag flipped by the first Ctrl-C; a second Ctrl-C kills the
/// process the usual way.
fn cancel_on_ctrl_c() -> CancelFlag {
    let cancel = cancel_flag();
    let flag = cancel.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            eprintln!("\ninterrupt: finishing the in-flight chunk, then saving state...");
            flag.store(true, Ordering::Relaxed);
        }
    });
    cancel
}

fn transfer_bar(prefix: &str) -> (ProgressBar, TaskProgressFn) {
    let bar = ProgressBar::new(0);
    bar.set_style(
        ProgressStyle::with_template(
            "{prefix:.bold} [{bar:40.cyan/blue}] {bytes}/{total_bytes} {msg}",
        )
        .unwrap()
        .progress_chars("=>-"),
    );
    bar.set_prefix(prefix.to_string());
    bar.enable_steady_tick(Duration::from_millis(100));

    let bar_cb = bar.clone();
    let progress: TaskProgressFn = Box::new(move |label, done, total| {
        bar_cb.set_length(total);
        bar_cb.set_position(done);
        bar_cb.set_message(label.to_string());
    });
    (bar, progress)
}

fn print_summary(verb: &str, summary: &BatchSummary) {
    println!("{verb} summary:");
    if summary.previously_completed > 0 {
        println!("  previously done: {}", summary.previously_completed);
    }
    println!("  transferred:     {}", summary.completed);
    println!("  skipped:         {}", summary.skipped);
    if summary.interrupted > 0 {
        println!("  interrupted:     {} (re-run to resume)", summary.interrupted);
    }
    if summary.errors > 0 {
        println!("  errors:          {}", summary.errors);
    }
}

fn summary_exit(summary: &BatchSummary, cancel: &CancelFlag) -> ExitCode {
    if summary.failed() {
        ExitCode::from(1)
    } else if cancel.load(Ordering::Relaxed) || summary.interrupted > 0 {
        ExitCode::from(1)
    } else {
        ExitCode::SUCCESS
    }
}

// ── Rendering helpers ─────────────────────────────────────────────────────────

fn print_node_line(node: &Node, long: bool, uuids: bool) {
    let mut line = String::new();
    if uuids {
        line.push_str(&format!("{} ", node.id));
    }
    if long {
        let (size, date) = match node.file_info() {
            Some(info) => (fmt_bytes(info.size), fmt_date(node.modified_ms())),
            None => ("-".to_string(), fmt_date(node.timestamp_ms)),
        };
        line.push_str(&format!("{size:>10}  {date}  "));
    }
    line.push_str(&node.name);
    if node.is_folder() {
        line.push('/');
    }
    println!("{line}");
}

/// Depth-limited tree rendering with box-drawing connectors.
fn print_tree<'a>(
    resolver: &'a Resolver,
    folder: ItemId,
    prefix: String,
    levels: usize,
) -> Pin<Box<dyn Future<Output = FilenResult<()>> + 'a>> {
    Box::pin(async move {
        if levels == 0 {
            return Ok(());
        }
        let mut children = resolver.list(folder).await?;
        children.sort_by(|a, b| {
            b.is_folder()
                .cmp(&a.is_folder())
                .then(a.name.cmp(&b.name))
        });

        let count = children.len();
        for (i, node) in children.iter().enumerate() {
            let last = i + 1 == count;
            let connector = if last { "└── " } else { "├── " };
            if node.is_folder() {
                println!("{prefix}{connector}{}/", node.name);
                let child_prefix = format!("{prefix}{}", if last { "    " } else { "│   " });
                print_tree(resolver, node.id, child_prefix, levels - 1).await?;
            } else {
                let size = node.file_info().map(|f| f.size).unwrap_or(0);
                println!("{prefix}{connector}{} ({})", node.name, fmt_bytes(size));
            }
        }
        Ok(())
    })
}

fn hash_local_file(path: &Path) -> FilenResult<String> {
    use std::io::Read;

    let mut file = std::fs::File::open(path)?;
    let mut hasher = FileHasher::new();
    let mut buf = vec![0u8; 1 << 20];
    loop {
        let n = file.read(&mut buf)?;
        if n == 0 {
            break;
        }
        hasher.update(&buf[..n]);
    }
    Ok(hasher.finalize_hex())
}

fn prompt_line(prompt: &str) -> FilenResult<String> {
    use std::io::{BufRead, Write};

    print!("{prompt}");
    std::io::stdout().flush()?;
    let mut line = String::new();
    std::io::stdin().lock().read_line(&mut line)?;
    Ok(line.trim_end().to_string())
}

fn fmt_bytes(bytes: u64) -> String {
    const KB: u64 = 1024;
    const MB: u64 = KB * 1024;
    const GB: u64 = MB * 1024;
    if bytes >= GB {
        format!("{:.1} GB", bytes as f64 / GB as f64)
    } else if bytes >= MB {
        format!("{:.1} MB", bytes as f64 / MB as f64)
    } else if bytes >= KB {
        format!("{:.1} KB", bytes as f64 / KB as f64)
    } else {
        format!("{bytes} B")
    }
}

fn fmt_date(ms: i64) -> String {
    use chrono::{TimeZone, Utc};
    match Utc.timestamp_millis_opt(ms) {
        chrono::LocalResult::Single(dt) => dt.format("%Y-%m-%d %H:%M").to_string(),
        _ => "-".into(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn bytes_formatting() {
        assert_eq!(fmt_bytes(0), "0 B");
        assert_eq!(fmt_bytes(999), "999 B");
        assert_eq!(fmt_bytes(2048), "2.0 KB");
        assert_eq!(fmt_bytes(3 * 1024 * 1024), "3.0 MB");
    }

    #[test]
    fn date_formatting() {
        assert_eq!(fmt_date(0), "1970-01-01 00:00");
        assert_eq!(fmt_date(i64::MIN), "-");
    }

    #[test]
    fn cli_parses_all_verbs() {
        use clap::CommandFactory;
        Cli::command().debug_assert();
    }

    #[test]
    fn upload_flags_parse() {
        let cli = Cli::parse_from([
            "filen",
            "upload",
            "a.txt",
            "b.txt",
            "-t",
            "/docs",
            "-r",
            "-p",
            "--include",
            "*.pdf",
            "--exclude",
            "draft_*",
            "--on-conflict",
            "newer",
        ]);
        match cli.command {
            Commands::Upload {
                sources,
                target,
                recursive,
                preserve_timestamps,
                include,
                exclude,
                on_conflict,
            } => {
                assert_eq!(sources, vec!["a.txt", "b.txt"]);
                assert_eq!(target, "/docs");
                assert!(recursive);
                assert!(preserve_timestamps);
                assert_eq!(include, vec!["*.pdf"]);
                assert_eq!(exclude, vec!["draft_*"]);
                assert_eq!(on_conflict, "newer");
            }
            other => panic!("parsed wrong command: {other:?}"),
        }
    }
}
