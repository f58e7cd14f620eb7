//! Declarative diff-handling rules and the path-ignore predicate.
//!
//! Rules auto-resolve diffs before they are surfaced to the user: each rule
//! constrains a set of paths (glob patterns) and a set of diff types, and
//! names the resolution action to apply on match. Rules are evaluated
//! top-to-bottom, first match wins. A rule that omits either the `files` or
//! the `diff` axis never matches — a rule must constrain both.
//!
//! The combined rule list is built once from the two settings layers
//! (workspace settings first, then the sync-specific config) and cached for
//! the lifetime of the engine. Settings changes are not picked up until a
//! new engine is constructed; see DESIGN.md.

use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::models::{DiffType, ResolutionAction};
use crate::paths;

// ---------------------------------------------------------------------------
// One-or-many config values
// ---------------------------------------------------------------------------

/// A config field that accepts either a single value or a list.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(untagged)]
pub enum OneOrMany<T> {
    One(T),
    Many(Vec<T>),
}

impl<T> OneOrMany<T> {
    pub fn iter(&self) -> impl Iterator<Item = &T> {
        match self {
            Self::One(v) => std::slice::from_ref(v).iter(),
            Self::Many(vs) => vs.iter(),
        }
    }
}

// ---------------------------------------------------------------------------
// Rules
// ---------------------------------------------------------------------------

/// One auto-resolution rule.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct DiffRule {
    /// Glob patterns matched against the path (leading `/` stripped).
    #[serde(default)]
    pub files: Option<OneOrMany<String>>,

    /// Diff types this rule applies to.
    #[serde(default)]
    pub diff: Option<OneOrMany<DiffType>>,

    /// Resolution action to apply on match.
    pub action: ResolutionAction,
}

impl DiffRule {
    /// Whether this rule matches `path` classified as `diff`.
    ///
    /// Both axes must be present and match; a rule missing one is inert.
    pub fn matches(&self, path: &str, diff: DiffType) -> bool {
        let (Some(files), Some(diffs)) = (&self.files, &self.diff) else {
            return false;
        };
        if !diffs.iter().any(|d| *d == diff) {
            return false;
        }
        let rel = paths::glob_form(path);
        files
            .iter()
            .any(|pattern| glob_match::glob_match(&pattern.replace('\\', "/"), rel))
    }
}

/// The ordered, layered rule list.
#[derive(Debug, Clone, Default)]
pub struct RuleSet {
    rules: Vec<DiffRule>,
}

impl RuleSet {
    /// Build from the two settings layers. Workspace rules take precedence
    /// by coming first in evaluation order.
    pub fn layered(workspace: Vec<DiffRule>, sync_config: Vec<DiffRule>) -> Self {
        let mut rules = workspace;
        rules.extend(sync_config);
        Self { rules }
    }

    /// Evaluate against one diff; returns the first matching rule's action.
    pub fn evaluate(&self, path: &str, diff: DiffType) -> Option<ResolutionAction> {
        for rule in &self.rules {
            if rule.matches(path, diff) {
                debug!(path, %diff, action = %rule.action, "diff rule matched");
                return Some(rule.action);
            }
        }
        None
    }

    pub fn len(&self) -> usize {
        self.rules.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rules.is_empty()
    }
}

// ---------------------------------------------------------------------------
// Ignore predicate
// ---------------------------------------------------------------------------

/// Decides which paths are excluded from sync entirely.
///
/// Hidden/system entries (any component starting with a dot) are always
/// excluded; configured glob patterns exclude more.
#[derive(Debug, Clone, Default)]
pub struct IgnorePredicate {
    patterns: Vec<String>,
}

impl IgnorePredicate {
    pub fn new(patterns: Vec<String>) -> Self {
        Self { patterns }
    }

    /// Whether `path` is excluded from sync.
    pub fn is_ignored(&self, path: &str) -> bool {
        if paths::is_root(path) {
            return false;
        }
        let rel = paths::glob_form(path);
        if rel.split('/').any(|segment| segment.starts_with('.')) {
            return true;
        }
        self.patterns
            .iter()
            .any(|pattern| glob_match::glob_match(&pattern.replace('\\', "/"), rel))
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
