//! Layered settings for the sync engine.
//!
//! Two layers feed the engine: workspace-level settings (TOML, the file an
//! embedding application already owns) and a sync-specific config (JSON,
//! shipped next to the sync metadata). Both carry ignore patterns and
//! diff-handling rules; the merged view concatenates them with the
//! workspace layer taking precedence.

use std::path::Path;

use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::errors::ConfigError;
use crate::rules::{DiffRule, IgnorePredicate, RuleSet};

/// Settings consumed by the engine, from either layer.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct SyncSettings {
    /// Glob patterns excluded from sync entirely (in addition to the
    /// always-excluded hidden entries).
    #[serde(default)]
    pub ignore_patterns: Vec<String>,

    /// Auto-resolution rules, evaluated in order.
    #[serde(default)]
    pub rules: Vec<DiffRule>,
}

impl SyncSettings {
    /// Load the workspace layer from a TOML file.
    pub fn load_workspace(path: &Path) -> Result<Self, ConfigError> {
        if !path.exists() {
            return Err(ConfigError::FileNotFound(path.display().to_string()));
        }
        let raw = std::fs::read_to_string(path)?;
        let settings: Self =
            toml::from_str(&raw).map_err(|e| ConfigError::ParseError(e.to_string()))?;
        debug!(
            path = %path.display(),
            rules = settings.rules.len(),
            "loaded workspace settings"
        );
        Ok(settings)
    }

    /// Load the sync-specific layer from a JSON file.
    pub fn load_sync_config(path: &Path) -> Result<Self, ConfigError> {
        if !path.exists() {
            return Err(ConfigError::FileNotFound(path.display().to_string()));
        }
        let raw = std::fs::read_to_string(path)?;
        let settings: Self =
            serde_json::from_str(&raw).map_err(|e| ConfigError::ParseError(e.to_string()))?;
        debug!(
            path = %path.display(),
            rules = settings.rules.len(),
            "loaded sync config"
        );
        Ok(settings)
    }

    /// Like the loaders above, but an absent file yields empty settings.
    pub fn load_workspace_or_default(path: &Path) -> Result<Self, ConfigError> {
        match Self::load_workspace(path) {
            Err(ConfigError::FileNotFound(_)) => Ok(Self::default()),
            other => other,
        }
    }

    /// Like [`Self::load_sync_config`], but an absent file yields empty
    /// settings.
    pub fn load_sync_config_or_default(path: &Path) -> Result<Self, ConfigError> {
        match Self::load_sync_config(path) {
            Err(ConfigError::FileNotFound(_)) => Ok(Self::default()),
            other => other,
        }
    }

    /// Merge the workspace layer over the sync-specific layer. Workspace
    /// rules and patterns come first, so they win first-match evaluation.
    pub fn merged(workspace: Self, sync_config: Self) -> Self {
        let mut ignore_patterns = workspace.ignore_patterns;
        ignore_patterns.extend(sync_config.ignore_patterns);
        let mut rules = workspace.rules;
        rules.extend(sync_config.rules);
        Self {
            ignore_patterns,
            rules,
        }
    }

    /// The rule set view of these settings.
    pub fn rule_set(&self) -> RuleSet {
        RuleSet::layered(self.rules.clone(), Vec::new())
    }

    /// The ignore predicate view of these settings.
    pub fn ignore_predicate(&self) -> IgnorePredicate {
        IgnorePredicate::new(self.ignore_patterns.clone())
    }
}
