//! In-memory sync-metadata store for tests and embedders.

use std::collections::BTreeMap;
use std::sync::Mutex;

use crate::errors::MetadataError;
use crate::models::EntrySyncMetadata;

use super::{SyncMetadataStore, UpdateFn};

/// Metadata map held in memory. Not durable; useful for tests and for
/// embedders that persist elsewhere.
#[derive(Debug, Default)]
pub struct MemoryMetadataStore {
    entries: Mutex<BTreeMap<String, EntrySyncMetadata>>,
}

impl MemoryMetadataStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Seed the store with existing records (test fixtures).
    pub fn with_entries(entries: BTreeMap<String, EntrySyncMetadata>) -> Self {
        Self {
            entries: Mutex::new(entries),
        }
    }
}

impl SyncMetadataStore for MemoryMetadataStore {
    fn get_all(&self) -> Result<BTreeMap<String, EntrySyncMetadata>, MetadataError> {
        Ok(self.entries.lock().unwrap().clone())
    }

    fn update_single(
        &self,
        path: &str,
        f: UpdateFn<'_>,
    ) -> Result<Option<EntrySyncMetadata>, MetadataError> {
        let mut entries = self.entries.lock().unwrap();
        let old = entries.get(path).cloned();
        let new = f(old);
        match &new {
            Some(meta) => {
                entries.insert(path.to_string(), meta.clone());
            }
            None => {
                entries.remove(path);
            }
        }
        Ok(new)
    }

    fn set_multi(
        &self,
        batch: &BTreeMap<String, Option<EntrySyncMetadata>>,
    ) -> Result<(), MetadataError> {
        let mut entries = self.entries.lock().unwrap();
        for (path, meta) in batch {
            match meta {
                Some(meta) => {
                    entries.insert(path.clone(), meta.clone());
                }
                None => {
                    entries.remove(path);
                }
            }
        }
        Ok(())
    }

    fn get(&self, path: &str) -> Result<Option<EntrySyncMetadata>, MetadataError> {
        Ok(self.entries.lock().unwrap().get(path).cloned())
    }
}
