//! Local entry-storage contract.
//!
//! The engine consumes the local note tree through [`EntryStorage`], a
//! byte-oriented hierarchical store keyed by normalized note paths. Two
//! implementations ship with the crate: [`FsEntryStorage`] over a real
//! directory and [`MemoryEntryStorage`] for tests and embedders.

pub mod fs;
pub mod memory;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::errors::StorageError;
use crate::identity::ContentIdentity;
use crate::paths;

pub use fs::FsEntryStorage;
pub use memory::MemoryEntryStorage;

/// Filesystem-style metadata for one entry.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct EntryStats {
    pub is_directory: bool,
    pub size: u64,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// One row of a content-free tree listing.
#[derive(Debug, Clone)]
pub struct OutlineEntry {
    pub path: String,
    pub stats: EntryStats,
}

/// The local tree abstraction consumed by the sync engine.
///
/// All paths are normalized note paths (see [`crate::paths`]). Writes create
/// missing parent directories; reads and stats never mutate.
pub trait EntryStorage: Send + Sync {
    /// Read a file's exact bytes.
    fn read(&self, path: &str) -> Result<Vec<u8>, StorageError>;

    /// Write a file, creating it (and missing parents) if needed.
    fn write(&self, path: &str, bytes: &[u8]) -> Result<(), StorageError>;

    /// Create a directory (and missing parents). Idempotent when the
    /// directory already exists.
    fn create_dir(&self, path: &str) -> Result<(), StorageError>;

    /// Remove a file, or a directory with everything beneath it.
    fn remove(&self, path: &str) -> Result<(), StorageError>;

    /// Whether the path exists. The root always exists.
    fn exists(&self, path: &str) -> Result<bool, StorageError>;

    /// Entry metadata, or `None` when the path does not exist.
    fn stats(&self, path: &str) -> Result<Option<EntryStats>, StorageError>;

    /// Direct children of a directory, as full normalized paths.
    fn children(&self, path: &str) -> Result<Vec<String>, StorageError>;

    /// Content-free listing of the whole tree, depth-first.
    fn load_outline(&self) -> Result<Vec<OutlineEntry>, StorageError> {
        fn walk(
            storage: &(impl EntryStorage + ?Sized),
            path: &str,
            out: &mut Vec<OutlineEntry>,
        ) -> Result<(), StorageError> {
            let Some(stats) = storage.stats(path)? else {
                return Ok(());
            };
            if stats.is_directory {
                for child in storage.children(path)? {
                    walk(storage, &child, out)?;
                }
            }
            if !paths::is_root(path) {
                out.push(OutlineEntry {
                    path: path.to_string(),
                    stats,
                });
            }
            Ok(())
        }

        let mut out = Vec::new();
        walk(self, paths::ROOT, &mut out)?;
        Ok(out)
    }
}

/// Observe one entry's identity: `None` when absent, the directory sentinel
/// for directories, a content hash for files.
///
/// An entry that vanishes between the stat and the read is reported as
/// absent rather than as an error.
pub fn entry_identity(
    storage: &dyn EntryStorage,
    path: &str,
) -> Result<Option<ContentIdentity>, StorageError> {
    match storage.stats(path)? {
        None => Ok(None),
        Some(stats) if stats.is_directory => Ok(Some(ContentIdentity::directory())),
        Some(_) => match storage.read(path) {
            Ok(bytes) => Ok(Some(ContentIdentity::of_bytes(&bytes))),
            Err(StorageError::NotFound(_)) => Ok(None),
            Err(e) => Err(e),
        },
    }
}
