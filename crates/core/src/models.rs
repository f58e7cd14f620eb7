//! Domain model types used throughout NoteSync.
//!
//! These types bridge the classifier, the metadata store, and the sync
//! engine.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::identity::ContentIdentity;

// ---------------------------------------------------------------------------
// Diff types
// ---------------------------------------------------------------------------

/// Classification of a single path's three-way state.
///
/// "Clean" types have a deterministic resolution direction; "conflicting"
/// types diverged from the baseline on both sides and require an explicit
/// accept-local / accept-remote decision.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "kebab-case")]
pub enum DiffType {
    LocalUpdate,
    RemoteUpdate,
    ConflictingUpdate,
    LocalCreate,
    RemoteCreate,
    ConflictingCreate,
    LocalRemove,
    ConflictingLocalRemove,
    RemoteRemove,
    ConflictingRemoteRemove,
}

impl DiffType {
    /// All classifications, in declaration order.
    pub const ALL: [DiffType; 10] = [
        Self::LocalUpdate,
        Self::RemoteUpdate,
        Self::ConflictingUpdate,
        Self::LocalCreate,
        Self::RemoteCreate,
        Self::ConflictingCreate,
        Self::LocalRemove,
        Self::ConflictingLocalRemove,
        Self::RemoteRemove,
        Self::ConflictingRemoteRemove,
    ];

    /// Whether this diff requires an explicit resolution decision.
    pub fn is_conflicting(&self) -> bool {
        matches!(
            self,
            Self::ConflictingUpdate
                | Self::ConflictingCreate
                | Self::ConflictingLocalRemove
                | Self::ConflictingRemoteRemove
        )
    }

    /// Whether this diff resolves without user input.
    pub fn is_clean(&self) -> bool {
        !self.is_conflicting()
    }

    /// Clean types whose resolution propagates the local side outward.
    pub fn favors_local(&self) -> bool {
        matches!(self, Self::LocalUpdate | Self::LocalCreate | Self::LocalRemove)
    }

    /// Clean types whose resolution propagates the remote side inward.
    pub fn favors_remote(&self) -> bool {
        matches!(self, Self::RemoteUpdate | Self::RemoteCreate | Self::RemoteRemove)
    }
}

impl std::fmt::Display for DiffType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::LocalUpdate => write!(f, "local-update"),
            Self::RemoteUpdate => write!(f, "remote-update"),
            Self::ConflictingUpdate => write!(f, "conflicting-update"),
            Self::LocalCreate => write!(f, "local-create"),
            Self::RemoteCreate => write!(f, "remote-create"),
            Self::ConflictingCreate => write!(f, "conflicting-create"),
            Self::LocalRemove => write!(f, "local-remove"),
            Self::ConflictingLocalRemove => write!(f, "conflicting-local-remove"),
            Self::RemoteRemove => write!(f, "remote-remove"),
            Self::ConflictingRemoteRemove => write!(f, "conflicting-remote-remove"),
        }
    }
}

// ---------------------------------------------------------------------------
// Resolution actions
// ---------------------------------------------------------------------------

/// How a diff entry was (or should be) resolved.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "kebab-case")]
pub enum ResolutionAction {
    /// Follow the diff's own direction. Only valid on clean types.
    AcceptAuto,
    /// Keep the local side. Only valid on conflicting types.
    AcceptLocal,
    /// Keep the remote side. Only valid on conflicting types.
    AcceptRemote,
}

impl std::fmt::Display for ResolutionAction {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::AcceptAuto => write!(f, "accept-auto"),
            Self::AcceptLocal => write!(f, "accept-local"),
            Self::AcceptRemote => write!(f, "accept-remote"),
        }
    }
}

// ---------------------------------------------------------------------------
// Accepted identity
// ---------------------------------------------------------------------------

/// Token stored for an accepted removal.
const REMOVED_TOKEN: &str = "removed";

/// The state a resolution approved to propagate: either concrete content
/// (one side's identity) or the removal of the entry.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "kebab-case")]
pub enum AcceptedIdentity {
    Content(ContentIdentity),
    Removal,
}

impl AcceptedIdentity {
    /// The content identity, if this is not a removal.
    pub fn content(&self) -> Option<&ContentIdentity> {
        match self {
            Self::Content(id) => Some(id),
            Self::Removal => None,
        }
    }

    pub fn is_removal(&self) -> bool {
        matches!(self, Self::Removal)
    }

    /// Persistable token form. Content tokens are hex hashes or the
    /// directory sentinel, so the removal token cannot collide.
    pub fn to_token(&self) -> String {
        match self {
            Self::Content(id) => id.as_str().to_string(),
            Self::Removal => REMOVED_TOKEN.to_string(),
        }
    }

    /// Rehydrate from a persisted token.
    pub fn from_token(token: &str) -> Self {
        if token == REMOVED_TOKEN {
            Self::Removal
        } else {
            Self::Content(ContentIdentity::from_token(token))
        }
    }
}

impl std::fmt::Display for AcceptedIdentity {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Content(id) => write!(f, "{id}"),
            Self::Removal => write!(f, "{REMOVED_TOKEN}"),
        }
    }
}

// ---------------------------------------------------------------------------
// Entry sync metadata
// ---------------------------------------------------------------------------

/// Durable per-path sync state, keyed by normalized path in the metadata
/// store.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct EntrySyncMetadata {
    /// Identity at the last point local and remote were known consistent.
    /// Absent = never synced.
    pub synced: Option<ContentIdentity>,
    /// Identity the user or a rule approved to propagate. Absent = undecided.
    pub accepted: Option<AcceptedIdentity>,
    /// Last resolution action applied.
    pub action: Option<ResolutionAction>,
    /// Diff classification that produced this metadata.
    pub diff: Option<DiffType>,
}

impl EntrySyncMetadata {
    /// A fresh baseline record: both sides agree on `identity` and there is
    /// nothing to execute. Written when a clean, unrecorded path is first
    /// seen, and restored by a successful job commit.
    pub fn baseline(identity: ContentIdentity) -> Self {
        Self {
            synced: Some(identity.clone()),
            accepted: Some(AcceptedIdentity::Content(identity)),
            action: None,
            diff: None,
        }
    }

    /// Whether the accepted state still awaits execution: an accepted value
    /// present and different from the baseline. Baseline records
    /// (`accepted == synced`) are inert.
    pub fn needs_job(&self) -> bool {
        match &self.accepted {
            None => false,
            Some(AcceptedIdentity::Removal) => true,
            Some(AcceptedIdentity::Content(id)) => self.synced.as_ref() != Some(id),
        }
    }
}

// ---------------------------------------------------------------------------
// Live diff entries
// ---------------------------------------------------------------------------

/// One path's classification at the moment of computation.
///
/// Created by the diff computation pass, mutated in place when identity
/// drift is observed mid-flight, and dropped once the path has converged.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SyncDiffEntry {
    /// Normalized path.
    pub path: String,
    /// Current classification.
    pub diff_type: DiffType,
    /// Local identity at computation time.
    pub actual: Option<ContentIdentity>,
    /// Remote identity at computation time.
    pub remote: Option<ContentIdentity>,
    /// Mirror of the persisted metadata record.
    pub metadata: EntrySyncMetadata,
}

// ---------------------------------------------------------------------------
// Engine status
// ---------------------------------------------------------------------------

/// Snapshot of engine state for UI/consumer polling.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SyncStatus {
    /// Diff entries with no resolution decision yet.
    pub unresolved_diffs: usize,
    /// Diff entries with a conflicting classification.
    pub conflicts: usize,
    /// Whether a diff computation pass is in flight.
    pub updating_diff: bool,
    /// Completion time of the most recent diff computation pass.
    pub last_pass_at: Option<DateTime<Utc>>,
}
