//! In-memory entry storage for tests and embedders.

use std::collections::BTreeMap;
use std::sync::Mutex;

use chrono::{DateTime, Utc};

use crate::errors::StorageError;
use crate::paths;

use super::{EntryStats, EntryStorage};

#[derive(Debug, Clone)]
enum MemoryEntry {
    File {
        bytes: Vec<u8>,
        created_at: DateTime<Utc>,
        updated_at: DateTime<Utc>,
    },
    Directory {
        created_at: DateTime<Utc>,
    },
}

/// A note tree held entirely in memory.
///
/// The root directory always exists. Writes create missing parent
/// directories, matching the contract in [`super::EntryStorage`].
#[derive(Debug, Default)]
pub struct MemoryEntryStorage {
    entries: Mutex<BTreeMap<String, MemoryEntry>>,
}

impl MemoryEntryStorage {
    pub fn new() -> Self {
        Self::default()
    }

    fn ensure_parents(entries: &mut BTreeMap<String, MemoryEntry>, path: &str) {
        let mut current = paths::parent(path).map(str::to_string);
        while let Some(dir) = current {
            if paths::is_root(&dir) {
                break;
            }
            entries.entry(dir.clone()).or_insert(MemoryEntry::Directory {
                created_at: Utc::now(),
            });
            current = paths::parent(&dir).map(str::to_string);
        }
    }
}

impl EntryStorage for MemoryEntryStorage {
    fn read(&self, path: &str) -> Result<Vec<u8>, StorageError> {
        let path = paths::normalize(path);
        let entries = self.entries.lock().unwrap();
        match entries.get(&path) {
            Some(MemoryEntry::File { bytes, .. }) => Ok(bytes.clone()),
            Some(MemoryEntry::Directory { .. }) => Err(StorageError::NotAFile(path)),
            None => Err(StorageError::NotFound(path)),
        }
    }

    fn write(&self, path: &str, bytes: &[u8]) -> Result<(), StorageError> {
        let path = paths::normalize(path);
        if paths::is_root(&path) {
            return Err(StorageError::NotAFile(path));
        }
        let mut entries = self.entries.lock().unwrap();
        if matches!(entries.get(&path), Some(MemoryEntry::Directory { .. })) {
            return Err(StorageError::NotAFile(path));
        }
        Self::ensure_parents(&mut entries, &path);
        let now = Utc::now();
        let created_at = match entries.get(&path) {
            Some(MemoryEntry::File { created_at, .. }) => *created_at,
            _ => now,
        };
        entries.insert(
            path,
            MemoryEntry::File {
                bytes: bytes.to_vec(),
                created_at,
                updated_at: now,
            },
        );
        Ok(())
    }

    fn create_dir(&self, path: &str) -> Result<(), StorageError> {
        let path = paths::normalize(path);
        if paths::is_root(&path) {
            return Ok(());
        }
        let mut entries = self.entries.lock().unwrap();
        match entries.get(&path) {
            Some(MemoryEntry::File { .. }) => Err(StorageError::NotADirectory(path)),
            Some(MemoryEntry::Directory { .. }) => Ok(()),
            None => {
                Self::ensure_parents(&mut entries, &path);
                entries.insert(
                    path,
                    MemoryEntry::Directory {
                        created_at: Utc::now(),
                    },
                );
                Ok(())
            }
        }
    }

    fn remove(&self, path: &str) -> Result<(), StorageError> {
        let path = paths::normalize(path);
        let mut entries = self.entries.lock().unwrap();
        if !entries.contains_key(&path) {
            return Err(StorageError::NotFound(path));
        }
        entries.retain(|p, _| !paths::is_within(p, &path));
        Ok(())
    }

    fn exists(&self, path: &str) -> Result<bool, StorageError> {
        let path = paths::normalize(path);
        if paths::is_root(&path) {
            return Ok(true);
        }
        Ok(self.entries.lock().unwrap().contains_key(&path))
    }

    fn stats(&self, path: &str) -> Result<Option<EntryStats>, StorageError> {
        let path = paths::normalize(path);
        if paths::is_root(&path) {
            let now = Utc::now();
            return Ok(Some(EntryStats {
                is_directory: true,
                size: 0,
                created_at: now,
                updated_at: now,
            }));
        }
        let entries = self.entries.lock().unwrap();
        Ok(entries.get(&path).map(|entry| match entry {
            MemoryEntry::File {
                bytes,
                created_at,
                updated_at,
            } => EntryStats {
                is_directory: false,
                size: bytes.len() as u64,
                created_at: *created_at,
                updated_at: *updated_at,
            },
            MemoryEntry::Directory { created_at } => EntryStats {
                is_directory: true,
                size: 0,
                created_at: *created_at,
                updated_at: *created_at,
            },
        }))
    }

    fn children(&self, path: &str) -> Result<Vec<String>, StorageError> {
        let path = paths::normalize(path);
        let entries = self.entries.lock().unwrap();
        if !paths::is_root(&path) {
            match entries.get(&path) {
                Some(MemoryEntry::Directory { .. }) => {}
                Some(MemoryEntry::File { .. }) => {
                    return Err(StorageError::NotADirectory(path));
                }
                None => return Err(StorageError::NotFound(path)),
            }
        }
        Ok(entries
            .keys()
            .filter(|p| paths::parent(p) == Some(path.as_str()))
            .cloned()
            .collect())
    }
}
