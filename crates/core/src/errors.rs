//! Comprehensive error types for the NoteSync core library.
//!
//! Each subsystem has its own error type derived with `thiserror`, and a
//! top-level [`CoreError`] enum unifies them all for callers that want a
//! single error type.

use thiserror::Error;

use crate::models::{DiffType, ResolutionAction};

// ---------------------------------------------------------------------------
// Top-level error
// ---------------------------------------------------------------------------

/// Unified error type for the entire core library.
#[derive(Debug, Error)]
pub enum CoreError {
    #[error(transparent)]
    Storage(#[from] StorageError),

    #[error(transparent)]
    Target(#[from] TargetError),

    #[error(transparent)]
    Metadata(#[from] MetadataError),

    #[error(transparent)]
    Resolve(#[from] ResolveError),

    #[error(transparent)]
    Config(#[from] ConfigError),

    #[error(transparent)]
    Sync(#[from] SyncError),
}

// ---------------------------------------------------------------------------
// Local entry-storage errors
// ---------------------------------------------------------------------------

/// Errors from the local entry-storage contract.
#[derive(Debug, Error)]
pub enum StorageError {
    /// The requested path does not exist.
    #[error("entry not found: {0}")]
    NotFound(String),

    /// A file operation was attempted on a directory.
    #[error("not a file: {0}")]
    NotAFile(String),

    /// A directory operation was attempted on a file.
    #[error("not a directory: {0}")]
    NotADirectory(String),

    /// The note path resolves outside the storage root.
    #[error("path escapes storage root: {0}")]
    PathEscape(String),

    /// Generic I/O wrapper.
    #[error("storage I/O error: {0}")]
    IoError(#[from] std::io::Error),
}

// ---------------------------------------------------------------------------
// Remote sync-target errors
// ---------------------------------------------------------------------------

/// Errors from the remote sync-target contract.
#[derive(Debug, Error)]
pub enum TargetError {
    /// The requested path does not exist remotely.
    #[error("remote entry not found: {0}")]
    NotFound(String),

    /// The optimistic-concurrency token no longer matches the remote state.
    #[error("remote identity mismatch at '{path}': expected {expected:?}, found {found:?}")]
    IdentityMismatch {
        path: String,
        expected: Option<String>,
        found: Option<String>,
    },

    /// The remote could not be reached at all.
    #[error("remote connection failed: {0}")]
    ConnectionFailed(String),

    /// The remote rejected the request for a reason of its own.
    #[error("remote rejected '{path}': {detail}")]
    Rejected { path: String, detail: String },

    /// Generic I/O wrapper.
    #[error("remote I/O error: {0}")]
    IoError(#[from] std::io::Error),
}

// ---------------------------------------------------------------------------
// Metadata store errors
// ---------------------------------------------------------------------------

/// Errors from the sync-metadata persistence layer.
#[derive(Debug, Error)]
pub enum MetadataError {
    /// Underlying rusqlite error.
    #[error("metadata store error: {0}")]
    SqliteError(#[from] rusqlite::Error),

    /// A migration failed.
    #[error("metadata migration failed (version {version}): {detail}")]
    MigrationFailed { version: u32, detail: String },

    /// A persisted record could not be decoded.
    #[error("corrupt metadata record for '{path}': {detail}")]
    CorruptRecord { path: String, detail: String },

    /// Generic I/O error (e.g. file permissions).
    #[error("metadata I/O error: {0}")]
    IoError(#[from] std::io::Error),
}

// ---------------------------------------------------------------------------
// Resolution errors
// ---------------------------------------------------------------------------

/// Errors from conflict-resolution requests. These are rejected before any
/// state mutation.
#[derive(Debug, Error)]
pub enum ResolveError {
    /// No live diff entry exists for the path.
    #[error("no diff recorded for '{0}'")]
    NoSuchDiff(String),

    /// `accept-auto` requested on a conflicting diff type.
    #[error("cannot accept-auto the conflicting diff {diff} on '{path}'")]
    AutoOnConflict { path: String, diff: DiffType },

    /// `accept-local` / `accept-remote` requested on a clean diff type.
    #[error("{action} is only valid on conflicting diffs, got {diff} on '{path}'")]
    ExplicitOnClean {
        path: String,
        action: ResolutionAction,
        diff: DiffType,
    },

    /// Metadata store failure while persisting a resolution.
    #[error("resolution metadata error: {0}")]
    MetadataError(#[from] MetadataError),
}

// ---------------------------------------------------------------------------
// Configuration errors
// ---------------------------------------------------------------------------

/// Errors from settings loading and validation.
#[derive(Debug, Error)]
pub enum ConfigError {
    /// Settings file not found.
    #[error("settings file not found: {0}")]
    FileNotFound(String),

    /// TOML or JSON parse error.
    #[error("settings parse error: {0}")]
    ParseError(String),

    /// Generic I/O error reading a settings file.
    #[error("settings I/O error: {0}")]
    IoError(#[from] std::io::Error),
}

// ---------------------------------------------------------------------------
// Sync engine errors
// ---------------------------------------------------------------------------

/// Errors from the diff computation pass and the job executor.
#[derive(Debug, Error)]
pub enum SyncError {
    /// A job is already active for this path.
    #[error("job already active for '{0}'")]
    JobAlreadyActive(String),

    /// The job's diff entry no longer exists or its accepted state was
    /// withdrawn since the job was queued.
    #[error("stale job for '{0}': nothing left to execute")]
    StaleJob(String),

    /// Metadata corruption that must not be papered over, e.g. a removal
    /// commit with no synced baseline.
    #[error("invariant violation on '{path}': {detail}")]
    InvariantViolation { path: String, detail: String },

    /// Underlying storage error during sync.
    #[error("sync storage error: {0}")]
    StorageError(#[from] StorageError),

    /// Underlying remote-target error during sync.
    #[error("sync target error: {0}")]
    TargetError(#[from] TargetError),

    /// Metadata store error during sync.
    #[error("sync metadata error: {0}")]
    MetadataError(#[from] MetadataError),

    /// Resolution error raised by rule-driven acceptance.
    #[error("sync resolution error: {0}")]
    ResolveError(#[from] ResolveError),
}

// ---------------------------------------------------------------------------
// Convenience conversions
// ---------------------------------------------------------------------------

// CoreError implements `std::error::Error` via `thiserror`, which means
// `anyhow::Error: From<CoreError>` is already provided by the blanket impl
// in `anyhow`. No manual `From` impl is needed.
