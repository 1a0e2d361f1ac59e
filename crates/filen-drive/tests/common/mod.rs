//! Shared fixture: in-memory backend + resolver + orchestrator over a
//! temporary state directory.
#![allow(dead_code)] // not every test binary uses every helper

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use filen_api::{Backend, MemoryBackend};
use filen_crypto::MasterKey;
use filen_drive::batch::Orchestrator;
use filen_drive::transfer::TransferEngine;
use filen_drive::Resolver;

pub const EMAIL: &str = "mem@example.com";

pub fn master() -> MasterKey {
    MasterKey::from_bytes([7u8; 32])
}

pub struct Fixture {
    pub backend: Arc<MemoryBackend>,
    pub resolver: Arc<Resolver>,
    pub orchestrator: Orchestrator,
    pub tmp: tempfile::TempDir,
}

impl Fixture {
    pub fn new() -> Self {
        let tmp = tempfile::tempdir().unwrap();
        let backend = Arc::new(MemoryBackend::new());
        let dyn_backend: Arc<dyn Backend> = backend.clone();
        let root = backend.root_id();

        let resolver = Arc::new(Resolver::new(
            dyn_backend.clone(),
            master(),
            EMAIL.into(),
            root,
            1024,
            Duration::from_secs(600),
        ));
        let orchestrator = Orchestrator::new(
            dyn_backend,
            resolver.clone(),
            master(),
            EMAIL.into(),
            tmp.path().join("batch_states"),
        );

        Fixture {
            backend,
            resolver,
            orchestrator,
            tmp,
        }
    }

    pub fn engine(&self) -> TransferEngine {
        let dyn_backend: Arc<dyn Backend> = self.backend.clone();
        TransferEngine::new(dyn_backend, master(), EMAIL.into())
    }

    /// Path inside the fixture's temp dir.
    pub fn path(&self, rel: &str) -> PathBuf {
        self.tmp.path().join(rel)
    }

    pub fn write_file(&self, rel: &str, content: &[u8]) -> PathBuf {
        let path = self.path(rel);
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent).unwrap();
        }
        std::fs::write(&path, content).unwrap();
        path
    }
}

/// Deterministic pseudo-random payload of `len` bytes.
pub fn payload(len: usize) -> Vec<u8> {
    (0..len as u64)
        .map(|i| (i.wrapping_mul(31).wrapping_add(i >> 7) % 251) as u8)
        .collect()
}

pub fn read(path: &Path) -> Vec<u8> {
    std::fs::read(path).unwrap()
}
