//! Remote sync-target contract.
//!
//! The engine reaches the remote copy of the tree through [`SyncTarget`].
//! Every mutating operation carries an `expected` optimistic-concurrency
//! token: the identity the caller believes the remote currently has for the
//! path (`None` = believed absent). The target must reject the operation
//! with [`TargetError::IdentityMismatch`] when its current state diverged
//! from the token — that check is what turns the engine's lock-free data
//! transfers into lost-update-safe commits.
//!
//! Directory creation is the one exemption: directories all compare equal,
//! so a `create_dir` against an already-existing directory succeeds as a
//! no-op instead of failing the token check.

pub mod memory;

use async_trait::async_trait;

use crate::errors::TargetError;
use crate::identity::ContentIdentity;
use crate::paths;

pub use memory::MemorySyncTarget;

/// A content-free subtree listing from the remote: each node carries the
/// entry's identity so changes are detectable without transferring data.
#[derive(Debug, Clone)]
pub struct RemoteOutline {
    /// Last path component; empty for the root.
    pub name: String,
    /// Identity of this entry.
    pub identity: ContentIdentity,
    /// Child nodes, if this entry is a directory.
    pub children: Vec<RemoteOutline>,
}

impl RemoteOutline {
    /// Flatten into `(path, identity)` pairs, the node itself included,
    /// rooted at `base` (the path the outline was requested for).
    pub fn flatten(&self, base: &str) -> Vec<(String, ContentIdentity)> {
        let mut out = Vec::new();
        self.flatten_into(base, &mut out);
        out
    }

    fn flatten_into(&self, path: &str, out: &mut Vec<(String, ContentIdentity)>) {
        out.push((path.to_string(), self.identity.clone()));
        for child in &self.children {
            let child_path = paths::join(path, &child.name);
            child.flatten_into(&child_path, out);
        }
    }
}

/// The remote tree abstraction consumed by the sync engine.
#[async_trait]
pub trait SyncTarget: Send + Sync {
    /// Opaque identifier of the remote instance.
    async fn id(&self) -> Result<String, TargetError>;

    /// Content-free outline of the subtree at `path`, or `None` when the
    /// path does not exist remotely. The root always exists.
    async fn outline(&self, path: &str) -> Result<Option<RemoteOutline>, TargetError>;

    /// Read a file's exact bytes.
    async fn read(&self, path: &str) -> Result<Vec<u8>, TargetError>;

    /// Write a file. `expected` is the identity the remote is believed to
    /// currently hold for the path (`None` = create).
    async fn update(
        &self,
        path: &str,
        bytes: &[u8],
        expected: Option<&ContentIdentity>,
    ) -> Result<(), TargetError>;

    /// Create a directory. No-op when it already exists as a directory.
    async fn create_dir(
        &self,
        path: &str,
        expected: Option<&ContentIdentity>,
    ) -> Result<(), TargetError>;

    /// Remove an entry (recursively for directories).
    async fn remove(
        &self,
        path: &str,
        expected: Option<&ContentIdentity>,
    ) -> Result<(), TargetError>;
}
