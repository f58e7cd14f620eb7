//! Content identity computation.
//!
//! An identity is the stable fingerprint used to detect change without
//! comparing full bytes: the SHA-256 of a file's exact content, or a fixed
//! sentinel for directories. Directories all compare equal to each other —
//! only their existence matters for diffing; content equality is delegated
//! to path-level diffing of their children.

use serde::{Deserialize, Serialize};

/// Token value shared by every directory identity.
const DIRECTORY_TOKEN: &str = "directory";

/// A comparable content fingerprint for one tree entry.
///
/// Two identities are equal iff they were derived from byte-identical file
/// content, or both denote a directory. `Option<ContentIdentity>` is used
/// throughout the engine, with `None` meaning "entry does not exist on this
/// axis".
#[derive(Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ContentIdentity(String);

impl ContentIdentity {
    /// Hash exact file bytes. Empty content hashes deterministically and is
    /// not treated as absent.
    pub fn of_bytes(bytes: &[u8]) -> Self {
        use sha2::{Digest, Sha256};
        let mut hasher = Sha256::new();
        hasher.update(bytes);
        Self(hex::encode(hasher.finalize()))
    }

    /// The shared directory sentinel.
    pub fn directory() -> Self {
        Self(DIRECTORY_TOKEN.to_string())
    }

    /// Whether this identity is the directory sentinel.
    pub fn is_directory(&self) -> bool {
        self.0 == DIRECTORY_TOKEN
    }

    /// Rehydrate an identity from a persisted token.
    pub fn from_token(token: impl Into<String>) -> Self {
        Self(token.into())
    }

    /// The persistable token form.
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for ContentIdentity {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

impl std::fmt::Debug for ContentIdentity {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        // Full hashes are noise in logs; eight hex chars identify an entry.
        if self.is_directory() {
            write!(f, "ContentIdentity(directory)")
        } else {
            write!(f, "ContentIdentity({}..)", &self.0[..8.min(self.0.len())])
        }
    }
}

/// Compute the identity for an entry observed on one axis.
///
/// Returns `None` for a non-existent entry, the directory sentinel for a
/// directory, and a byte hash for a file.
pub fn identity_of(exists: bool, is_directory: bool, bytes: &[u8]) -> Option<ContentIdentity> {
    if !exists {
        None
    } else if is_directory {
        Some(ContentIdentity::directory())
    } else {
        Some(ContentIdentity::of_bytes(bytes))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_byte_identity_is_deterministic() {
        let a = ContentIdentity::of_bytes(b"hello");
        let b = ContentIdentity::of_bytes(b"hello");
        assert_eq!(a, b);
        assert_eq!(
            a.as_str(),
            "2cf24dba5fb0a30e26e83b2ac5b9e29e1b161e5c1fa7425e73043362938b9824"
        );
    }

    #[test]
    fn test_different_bytes_differ() {
        assert_ne!(
            ContentIdentity::of_bytes(b"hello"),
            ContentIdentity::of_bytes(b"hello!")
        );
    }

    #[test]
    fn test_empty_content_is_not_absent() {
        let empty = ContentIdentity::of_bytes(b"");
        assert!(!empty.is_directory());
        assert_eq!(empty, ContentIdentity::of_bytes(b""));
    }

    #[test]
    fn test_all_directories_compare_equal() {
        assert_eq!(ContentIdentity::directory(), ContentIdentity::directory());
        assert!(ContentIdentity::directory().is_directory());
        assert_ne!(ContentIdentity::directory(), ContentIdentity::of_bytes(b""));
    }

    #[test]
    fn test_identity_of() {
        assert_eq!(identity_of(false, false, b""), None);
        assert_eq!(
            identity_of(true, true, b"ignored"),
            Some(ContentIdentity::directory())
        );
        assert_eq!(
            identity_of(true, false, b"x"),
            Some(ContentIdentity::of_bytes(b"x"))
        );
    }

    #[test]
    fn test_token_round_trip() {
        let id = ContentIdentity::of_bytes(b"note");
        let back = ContentIdentity::from_token(id.as_str());
        assert_eq!(id, back);
    }
}
