//! In-memory sync target with real optimistic-concurrency semantics.
//!
//! Used by the integration tests as the remote side, and by embedders that
//! want a loopback target. Mutating operations enforce the `expected` token
//! exactly as a production transport is expected to, so race-safety tests
//! against this target are meaningful.

use std::collections::BTreeMap;
use std::sync::Mutex;

use async_trait::async_trait;

use crate::errors::TargetError;
use crate::identity::ContentIdentity;
use crate::paths;

use super::{RemoteOutline, SyncTarget};

#[derive(Debug, Clone)]
enum RemoteEntry {
    File(Vec<u8>),
    Directory,
}

impl RemoteEntry {
    fn identity(&self) -> ContentIdentity {
        match self {
            Self::File(bytes) => ContentIdentity::of_bytes(bytes),
            Self::Directory => ContentIdentity::directory(),
        }
    }
}

/// A remote tree held in memory.
#[derive(Debug)]
pub struct MemorySyncTarget {
    id: String,
    entries: Mutex<BTreeMap<String, RemoteEntry>>,
}

impl MemorySyncTarget {
    pub fn new(id: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            entries: Mutex::new(BTreeMap::new()),
        }
    }

    /// Current identity of a path (root is always a directory).
    fn identity_of(entries: &BTreeMap<String, RemoteEntry>, path: &str) -> Option<ContentIdentity> {
        if paths::is_root(path) {
            return Some(ContentIdentity::directory());
        }
        entries.get(path).map(RemoteEntry::identity)
    }

    fn check_token(
        entries: &BTreeMap<String, RemoteEntry>,
        path: &str,
        expected: Option<&ContentIdentity>,
    ) -> Result<(), TargetError> {
        let found = Self::identity_of(entries, path);
        if found.as_ref() != expected {
            return Err(TargetError::IdentityMismatch {
                path: path.to_string(),
                expected: expected.map(|id| id.as_str().to_string()),
                found: found.map(|id| id.as_str().to_string()),
            });
        }
        Ok(())
    }

    fn ensure_parents(entries: &mut BTreeMap<String, RemoteEntry>, path: &str) {
        let mut current = paths::parent(path).map(str::to_string);
        while let Some(dir) = current {
            if paths::is_root(&dir) {
                break;
            }
            entries.entry(dir.clone()).or_insert(RemoteEntry::Directory);
            current = paths::parent(&dir).map(str::to_string);
        }
    }

    // -- direct mutation, bypassing token checks -----------------------------
    //
    // Test fixtures use these to simulate edits made by another device.

    /// Put a file directly, as if another client synced it.
    pub fn put_file(&self, path: &str, bytes: &[u8]) {
        let path = paths::normalize(path);
        let mut entries = self.entries.lock().unwrap();
        Self::ensure_parents(&mut entries, &path);
        entries.insert(path, RemoteEntry::File(bytes.to_vec()));
    }

    /// Put a directory directly.
    pub fn put_dir(&self, path: &str) {
        let path = paths::normalize(path);
        let mut entries = self.entries.lock().unwrap();
        Self::ensure_parents(&mut entries, &path);
        entries.insert(path, RemoteEntry::Directory);
    }

    /// Delete an entry (and its subtree) directly.
    pub fn delete(&self, path: &str) {
        let path = paths::normalize(path);
        let mut entries = self.entries.lock().unwrap();
        entries.retain(|p, _| !paths::is_within(p, &path));
    }

    /// Peek at a file's current bytes.
    pub fn file_bytes(&self, path: &str) -> Option<Vec<u8>> {
        let path = paths::normalize(path);
        match self.entries.lock().unwrap().get(&path) {
            Some(RemoteEntry::File(bytes)) => Some(bytes.clone()),
            _ => None,
        }
    }

    /// Whether an entry currently exists.
    pub fn contains(&self, path: &str) -> bool {
        let path = paths::normalize(path);
        paths::is_root(&path) || self.entries.lock().unwrap().contains_key(&path)
    }

    fn build_outline(
        entries: &BTreeMap<String, RemoteEntry>,
        path: &str,
        is_dir: bool,
    ) -> RemoteOutline {
        let children = if is_dir {
            entries
                .iter()
                .filter(|(p, _)| paths::parent(p) == Some(path))
                .map(|(p, entry)| {
                    Self::build_outline(entries, p, matches!(entry, RemoteEntry::Directory))
                })
                .collect()
        } else {
            Vec::new()
        };
        let identity = Self::identity_of(entries, path).unwrap_or_else(ContentIdentity::directory);
        RemoteOutline {
            name: paths::file_name(path).to_string(),
            identity,
            children,
        }
    }
}

#[async_trait]
impl SyncTarget for MemorySyncTarget {
    async fn id(&self) -> Result<String, TargetError> {
        Ok(self.id.clone())
    }

    async fn outline(&self, path: &str) -> Result<Option<RemoteOutline>, TargetError> {
        let path = paths::normalize(path);
        let entries = self.entries.lock().unwrap();
        if paths::is_root(&path) {
            return Ok(Some(Self::build_outline(&entries, &path, true)));
        }
        match entries.get(&path) {
            None => Ok(None),
            Some(entry) => Ok(Some(Self::build_outline(
                &entries,
                &path,
                matches!(entry, RemoteEntry::Directory),
            ))),
        }
    }

    async fn read(&self, path: &str) -> Result<Vec<u8>, TargetError> {
        let path = paths::normalize(path);
        match self.entries.lock().unwrap().get(&path) {
            Some(RemoteEntry::File(bytes)) => Ok(bytes.clone()),
            Some(RemoteEntry::Directory) => Err(TargetError::Rejected {
                path,
                detail: "entry is a directory".into(),
            }),
            None => Err(TargetError::NotFound(path)),
        }
    }

    async fn update(
        &self,
        path: &str,
        bytes: &[u8],
        expected: Option<&ContentIdentity>,
    ) -> Result<(), TargetError> {
        let path = paths::normalize(path);
        let mut entries = self.entries.lock().unwrap();
        Self::check_token(&entries, &path, expected)?;
        Self::ensure_parents(&mut entries, &path);
        entries.insert(path, RemoteEntry::File(bytes.to_vec()));
        Ok(())
    }

    async fn create_dir(
        &self,
        path: &str,
        expected: Option<&ContentIdentity>,
    ) -> Result<(), TargetError> {
        let path = paths::normalize(path);
        let mut entries = self.entries.lock().unwrap();
        // Directories all compare equal; an existing directory satisfies the
        // request whatever the token says.
        if paths::is_root(&path)
            || matches!(entries.get(&path), Some(RemoteEntry::Directory))
        {
            return Ok(());
        }
        Self::check_token(&entries, &path, expected)?;
        Self::ensure_parents(&mut entries, &path);
        entries.insert(path, RemoteEntry::Directory);
        Ok(())
    }

    async fn remove(
        &self,
        path: &str,
        expected: Option<&ContentIdentity>,
    ) -> Result<(), TargetError> {
        let path = paths::normalize(path);
        let mut entries = self.entries.lock().unwrap();
        Self::check_token(&entries, &path, expected)?;
        if expected.is_none() {
            // Token said "absent" and the check passed: nothing to remove.
            return Ok(());
        }
        entries.retain(|p, _| !paths::is_within(p, &path));
        Ok(())
    }
}
