//! NoteSync core library.
//!
//! This crate provides the foundational components for offline-first
//! three-way note-tree synchronization: content identity computation, diff
//! classification, sync metadata persistence, declarative diff-handling
//! rules, conflict resolution, and the job executor that converges the
//! local and remote trees.

pub mod classify;
pub mod config;
pub mod errors;
pub mod identity;
pub mod metadata;
pub mod models;
pub mod paths;
pub mod rules;
pub mod storage;
pub mod sync_engine;
pub mod target;

// Re-exports for convenience.
pub use config::SyncSettings;
pub use errors::CoreError;
pub use identity::ContentIdentity;
pub use metadata::{MemoryMetadataStore, SqliteMetadataStore, SyncMetadataStore};
pub use models::{DiffType, EntrySyncMetadata, ResolutionAction, SyncDiffEntry};
pub use storage::{EntryStorage, FsEntryStorage, MemoryEntryStorage};
pub use sync_engine::{JobOutcome, SyncEngine, SyncJob};
pub use target::{MemorySyncTarget, SyncTarget};
