//! Three-way diff classification.
//!
//! Given the identities of one path on the three state axes — local content,
//! last-synced baseline, remote content — [`classify`] maps the triple to
//! one of the nine [`DiffType`] values, or `None` when the path does not
//! differ. The function is pure and total over every present/absent/equality
//! combination of its inputs.
//!
//! The tree root is never classified; it exists by definition on both sides
//! and the diff computation pass skips it before calling in here.

use crate::identity::ContentIdentity;
use crate::models::DiffType;

/// Classify one path's three-way state.
///
/// `local` and `remote` are the identities currently observed on each side;
/// `synced` is the persisted baseline from the last successful sync point.
/// `None` on any axis means the entry does not exist there.
pub fn classify(
    local: Option<&ContentIdentity>,
    synced: Option<&ContentIdentity>,
    remote: Option<&ContentIdentity>,
) -> Option<DiffType> {
    match (local, remote) {
        // Present on both sides: equal content is never a diff, regardless
        // of what the baseline says.
        (Some(l), Some(r)) if l == r => None,
        (Some(l), Some(r)) => match synced {
            None => Some(DiffType::ConflictingCreate),
            Some(s) if s == r => Some(DiffType::LocalUpdate),
            Some(s) if s == l => Some(DiffType::RemoteUpdate),
            Some(_) => Some(DiffType::ConflictingUpdate),
        },

        // Remote only.
        (None, Some(r)) => match synced {
            None => Some(DiffType::RemoteCreate),
            Some(s) if s == r => Some(DiffType::LocalRemove),
            Some(_) => Some(DiffType::ConflictingLocalRemove),
        },

        // Local only.
        (Some(l), None) => match synced {
            None => Some(DiffType::LocalCreate),
            Some(s) if s == l => Some(DiffType::RemoteRemove),
            Some(_) => Some(DiffType::ConflictingRemoteRemove),
        },

        // Absent on both sides: nothing to sync, whatever the baseline.
        (None, None) => None,
    }
}
