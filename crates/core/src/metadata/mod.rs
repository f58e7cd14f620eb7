//! Durable sync-metadata store contract.
//!
//! One [`EntrySyncMetadata`] record per normalized path. The store is the
//! source of truth across restarts; the engine's in-memory diff list is a
//! cache rebuildable from it plus live tree state.
//!
//! The contract offers single-key atomic read-modify-write and bulk
//! upsert/delete. It deliberately does not promise multi-key transactions:
//! cross-path consistency in the engine comes from each path's metadata
//! being independent.

pub mod memory;
pub mod sqlite;

use std::collections::BTreeMap;

use crate::errors::MetadataError;
use crate::models::EntrySyncMetadata;

pub use memory::MemoryMetadataStore;
pub use sqlite::SqliteMetadataStore;

/// Closure shape for [`SyncMetadataStore::update_single`]: maps the current
/// record (if any) to its replacement (`None` deletes the key).
pub type UpdateFn<'a> =
    &'a mut dyn FnMut(Option<EntrySyncMetadata>) -> Option<EntrySyncMetadata>;

/// Durable map from path to per-entry sync state.
pub trait SyncMetadataStore: Send + Sync {
    /// The full persisted map.
    fn get_all(&self) -> Result<BTreeMap<String, EntrySyncMetadata>, MetadataError>;

    /// Atomic read-modify-write for one key. Returns what was stored
    /// (`None` when the closure deleted the record).
    fn update_single(
        &self,
        path: &str,
        f: UpdateFn<'_>,
    ) -> Result<Option<EntrySyncMetadata>, MetadataError>;

    /// Bulk upsert/delete: `Some` values are stored, `None` values delete
    /// their keys.
    fn set_multi(
        &self,
        entries: &BTreeMap<String, Option<EntrySyncMetadata>>,
    ) -> Result<(), MetadataError>;

    /// One record. Stores may override with a targeted lookup.
    fn get(&self, path: &str) -> Result<Option<EntrySyncMetadata>, MetadataError> {
        Ok(self.get_all()?.remove(path))
    }
}
