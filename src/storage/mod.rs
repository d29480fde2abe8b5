//! # Storage Module - Blob Persistence
//!
//! The friend finder persists exactly one thing: the friend table, as a single fixed-size
//! binary blob under one key. This module defines the [`BlobStore`] contract for that and
//! two implementations:
//!
//! - [`SledBlobStore`] - one sled tree per namespace inside a sled database directory
//! - [`MemoryBlobStore`] - process-local map for tests and the simulator; clones share state
//!
//! ```text
//! data/
//! └── (sled db)
//!     └── tree "ffinder"
//!         └── "friends" → 456-byte blob
//! ```
//!
//! ## Usage
//!
//! ```rust,no_run
//! use meshfinder::storage::{BlobStore, SledBlobStore};
//!
//! fn main() -> Result<(), meshfinder::storage::StorageError> {
//!     let mut store = SledBlobStore::open("./data", "ffinder")?;
//!     store.write("friends", &[0u8; 4])?;
//!     assert_eq!(store.read("friends")?, Some(vec![0u8; 4]));
//!     Ok(())
//! }
//! ```
//!
//! Callers treat every error here as "run without persistence"; nothing in this module is
//! fatal to the engine.

use std::collections::HashMap;
use std::path::Path;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};

use log::debug;
use thiserror::Error;

/// Errors from the persistence layer.
#[derive(Debug, Error)]
pub enum StorageError {
    /// Wrapper around sled's error type.
    #[error("sled error: {0}")]
    Sled(#[from] sled::Error),

    /// Wrapper around bincode serialization and deserialization errors.
    #[error("serialization error: {0}")]
    Bincode(#[from] bincode::Error),

    /// Wrapper around IO errors (directory creation, etc.).
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    /// Returned by [`MemoryBlobStore`] when failure injection is switched on.
    #[error("store unavailable: {0}")]
    Unavailable(String),
}

/// A named store holding opaque binary blobs.
pub trait BlobStore: Send {
    fn read(&self, key: &str) -> Result<Option<Vec<u8>>, StorageError>;
    fn write(&mut self, key: &str, value: &[u8]) -> Result<(), StorageError>;
}

/// Sled-backed blob store; `namespace` names the tree.
pub struct SledBlobStore {
    _db: sled::Db,
    tree: sled::Tree,
}

impl SledBlobStore {
    /// Open (or create) the database at `path` and the tree called `namespace`.
    pub fn open<P: AsRef<Path>>(path: P, namespace: &str) -> Result<Self, StorageError> {
        let path_ref = path.as_ref();
        std::fs::create_dir_all(path_ref)?;
        let db = sled::open(path_ref)?;
        let tree = db.open_tree(namespace)?;
        debug!(
            "Opened blob store {} (namespace '{}')",
            path_ref.display(),
            namespace
        );
        Ok(Self { _db: db, tree })
    }
}

impl BlobStore for SledBlobStore {
    fn read(&self, key: &str) -> Result<Option<Vec<u8>>, StorageError> {
        Ok(self.tree.get(key.as_bytes())?.map(|v| v.to_vec()))
    }

    fn write(&mut self, key: &str, value: &[u8]) -> Result<(), StorageError> {
        self.tree.insert(key.as_bytes(), value)?;
        self.tree.flush()?;
        Ok(())
    }
}

/// In-memory blob store. Clones share the same map, so a test can keep a handle and
/// inspect what the engine wrote.
#[derive(Clone, Default)]
pub struct MemoryBlobStore {
    blobs: Arc<Mutex<HashMap<String, Vec<u8>>>>,
    fail_reads: Arc<AtomicBool>,
    fail_writes: Arc<AtomicBool>,
}

impl MemoryBlobStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set_fail_reads(&self, fail: bool) {
        self.fail_reads.store(fail, Ordering::Relaxed);
    }

    pub fn set_fail_writes(&self, fail: bool) {
        self.fail_writes.store(fail, Ordering::Relaxed);
    }

    /// Raw access for tests that plant or inspect blobs.
    pub fn get(&self, key: &str) -> Option<Vec<u8>> {
        self.blobs.lock().ok().and_then(|m| m.get(key).cloned())
    }

    pub fn put(&self, key: &str, value: Vec<u8>) {
        if let Ok(mut m) = self.blobs.lock() {
            m.insert(key.to_string(), value);
        }
    }
}

impl BlobStore for MemoryBlobStore {
    fn read(&self, key: &str) -> Result<Option<Vec<u8>>, StorageError> {
        if self.fail_reads.load(Ordering::Relaxed) {
            return Err(StorageError::Unavailable("read failure injected".into()));
        }
        let map = self
            .blobs
            .lock()
            .map_err(|_| StorageError::Unavailable("poisoned".into()))?;
        Ok(map.get(key).cloned())
    }

    fn write(&mut self, key: &str, value: &[u8]) -> Result<(), StorageError> {
        if self.fail_writes.load(Ordering::Relaxed) {
            return Err(StorageError::Unavailable("write failure injected".into()));
        }
        let mut map = self
            .blobs
            .lock()
            .map_err(|_| StorageError::Unavailable("poisoned".into()))?;
        map.insert(key.to_string(), value.to_vec());
        Ok(())
    }
}
