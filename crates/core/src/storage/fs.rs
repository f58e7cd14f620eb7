//! Filesystem-backed entry storage.
//!
//! Maps normalized note paths onto a directory on disk. The base directory
//! is the tree root; note path segments become path components beneath it.
//! Escapes (`..` segments) are rejected before touching the filesystem.

use std::path::PathBuf;

use chrono::{DateTime, Utc};
use tracing::debug;

use crate::errors::StorageError;
use crate::paths;

use super::{EntryStats, EntryStorage};

/// Entry storage over a real directory.
pub struct FsEntryStorage {
    root: PathBuf,
}

impl FsEntryStorage {
    /// Use `root` as the tree root. The directory must already exist.
    pub fn new(root: impl Into<PathBuf>) -> Result<Self, StorageError> {
        let root = root.into();
        if !root.is_dir() {
            return Err(StorageError::NotADirectory(root.display().to_string()));
        }
        debug!(root = %root.display(), "opening filesystem entry storage");
        Ok(Self { root })
    }

    /// Resolve a note path to an on-disk path, rejecting escapes.
    fn resolve(&self, path: &str) -> Result<PathBuf, StorageError> {
        let normalized = paths::normalize(path);
        let mut resolved = self.root.clone();
        for segment in normalized.split('/').filter(|s| !s.is_empty()) {
            if segment == ".." {
                return Err(StorageError::PathEscape(normalized));
            }
            resolved.push(segment);
        }
        Ok(resolved)
    }

    fn stats_of(meta: &std::fs::Metadata) -> EntryStats {
        let updated_at: DateTime<Utc> = meta
            .modified()
            .map(DateTime::from)
            .unwrap_or_else(|_| Utc::now());
        let created_at: DateTime<Utc> = meta
            .created()
            .map(DateTime::from)
            .unwrap_or(updated_at);
        EntryStats {
            is_directory: meta.is_dir(),
            size: if meta.is_dir() { 0 } else { meta.len() },
            created_at,
            updated_at,
        }
    }
}

impl EntryStorage for FsEntryStorage {
    fn read(&self, path: &str) -> Result<Vec<u8>, StorageError> {
        let disk = self.resolve(path)?;
        match std::fs::metadata(&disk) {
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                return Err(StorageError::NotFound(paths::normalize(path)));
            }
            Err(e) => return Err(StorageError::IoError(e)),
            Ok(meta) if meta.is_dir() => {
                return Err(StorageError::NotAFile(paths::normalize(path)));
            }
            Ok(_) => {}
        }
        std::fs::read(&disk).map_err(|e| {
            if e.kind() == std::io::ErrorKind::NotFound {
                StorageError::NotFound(paths::normalize(path))
            } else {
                StorageError::IoError(e)
            }
        })
    }

    fn write(&self, path: &str, bytes: &[u8]) -> Result<(), StorageError> {
        let disk = self.resolve(path)?;
        if disk.is_dir() {
            return Err(StorageError::NotAFile(paths::normalize(path)));
        }
        if let Some(parent) = disk.parent() {
            std::fs::create_dir_all(parent)?;
        }
        std::fs::write(&disk, bytes)?;
        Ok(())
    }

    fn create_dir(&self, path: &str) -> Result<(), StorageError> {
        let disk = self.resolve(path)?;
        if disk.is_file() {
            return Err(StorageError::NotADirectory(paths::normalize(path)));
        }
        std::fs::create_dir_all(&disk)?;
        Ok(())
    }

    fn remove(&self, path: &str) -> Result<(), StorageError> {
        let disk = self.resolve(path)?;
        match std::fs::metadata(&disk) {
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                Err(StorageError::NotFound(paths::normalize(path)))
            }
            Err(e) => Err(StorageError::IoError(e)),
            Ok(meta) if meta.is_dir() => {
                std::fs::remove_dir_all(&disk)?;
                Ok(())
            }
            Ok(_) => {
                std::fs::remove_file(&disk)?;
                Ok(())
            }
        }
    }

    fn exists(&self, path: &str) -> Result<bool, StorageError> {
        Ok(self.resolve(path)?.exists())
    }

    fn stats(&self, path: &str) -> Result<Option<EntryStats>, StorageError> {
        let disk = self.resolve(path)?;
        match std::fs::metadata(&disk) {
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(StorageError::IoError(e)),
            Ok(meta) => Ok(Some(Self::stats_of(&meta))),
        }
    }

    fn children(&self, path: &str) -> Result<Vec<String>, StorageError> {
        let normalized = paths::normalize(path);
        let disk = self.resolve(path)?;
        match std::fs::metadata(&disk) {
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                return Err(StorageError::NotFound(normalized));
            }
            Err(e) => return Err(StorageError::IoError(e)),
            Ok(meta) if !meta.is_dir() => {
                return Err(StorageError::NotADirectory(normalized));
            }
            Ok(_) => {}
        }

        let mut out = Vec::new();
        for entry in std::fs::read_dir(&disk)? {
            let entry = entry?;
            if let Some(name) = entry.file_name().to_str() {
                out.push(paths::join(&normalized, name));
            }
        }
        out.sort();
        Ok(out)
    }
}
