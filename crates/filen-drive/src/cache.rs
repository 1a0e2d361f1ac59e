//! Directory listing cache: TTL-expired, LRU-bounded, invalidated on mutation.
//!
//! Entries are keyed by folder identifier; a secondary index maps canonical
//! paths to folder identifiers so repeated resolves of the same path skip the
//! segment walk. Stale reads within the TTL are acceptable, but any mutation
//! this client issues must invalidate the affected parent immediately.

use std::collections::HashMap;
use std::time::{Duration, Instant};

use filen_core::{ItemId, Node};

pub struct DirCache {
    capacity: usize,
    ttl: Duration,
    entries: HashMap<ItemId, Entry>,
    /// canonical path → folder id fast path; cleared conservatively on any
    /// invalidation since paths are not tracked per folder.
    path_index: HashMap<String, ItemId>,
    tick: u64,
}

struct Entry {
    children: Vec<Node>,
    fetched_at: Instant,
    last_used: u64,
}

impl DirCache {
    pub fn new(capacity: usize, ttl: Duration) -> Self {
        DirCache {
            capacity: capacity.max(1),
            ttl,
            entries: HashMap::new(),
            path_index: HashMap::new(),
            tick: 0,
        }
    }

    /// Cached listing for a folder, or `None` if absent or past its TTL.
    pub fn get(&mut self, folder: ItemId) -> Option<Vec<Node>> {
        let expired = match self.entries.get(&folder) {
            Some(entry) => entry.fetched_at.elapsed() >= self.ttl,
            None => return None,
        };
        if expired {
            self.entries.remove(&folder);
            return None;
        }
        self.tick += 1;
        let entry = self.entries.get_mut(&folder).unwrap();
        entry.last_used = self.tick;
        Some(entry.children.clone())
    }

    pub fn insert(&mut self, folder: ItemId, children: Vec<Node>) {
        self.tick += 1;
        self.entries.insert(
            folder,
            Entry {
                children,
                fetched_at: Instant::now(),
                last_used: self.tick,
            },
        );
        if self.entries.len() > self.capacity {
            self.evict_lru();
        }
    }

    fn evict_lru(&mut self) {
        let victim = self
            .entries
            .iter()
            .min_by_key(|(_, entry)| entry.last_used)
            .map(|(id, _)| *id);
        if let Some(victim) = victim {
            self.entries.remove(&victim);
            self.path_index.retain(|_, id| *id != victim);
        }
    }

    /// Drop a folder's listing (and, conservatively, the whole path index;
    /// descendants of the mutated folder may have moved).
    pub fn invalidate(&mut self, folder: ItemId) {
        self.entries.remove(&folder);
        self.path_index.clear();
    }

    pub fn clear(&mut self) {
        self.entries.clear();
        self.path_index.clear();
    }

    pub fn remember_path(&mut self, path: &str, folder: ItemId) {
        if self.path_index.len() < self.capacity * 4 {
            self.path_index.insert(path.to_string(), folder);
        }
    }

    pub fn lookup_path(&self, path: &str) -> Option<ItemId> {
        self.path_index.get(path).copied()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}
