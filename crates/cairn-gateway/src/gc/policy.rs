//! Manifest retention policy.

use serde::{Deserialize, Serialize};

use crate::config::RemoteStateSettings;
use crate::naming::{self, ManifestFileName};

/// Retention policy for manifests of one cluster UUID.
///
/// Keeps the newest `keep_manifests` manifests plus the latest committed
/// manifest, wherever it sits in the listing. Everything older is a
/// deletion candidate.
///
/// # Example
///
/// ```rust
/// use cairn_gateway::gc::RetentionPolicy;
///
/// let policy = RetentionPolicy { keep_manifests: 5 };
/// assert!(policy.validate().is_none());
/// ```
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct RetentionPolicy {
    /// Keep last N manifests per cluster UUID (e.g., 10).
    ///
    /// Writers carry pointers from the newest manifests, so this must stay
    /// at least 1.
    pub keep_manifests: usize,
}

impl Default for RetentionPolicy {
    fn default() -> Self {
        Self { keep_manifests: 10 }
    }
}

impl RetentionPolicy {
    /// Derives the policy from the dynamic settings.
    #[must_use]
    pub const fn from_settings(settings: &RemoteStateSettings) -> Self {
        Self {
            keep_manifests: settings.retention_count,
        }
    }

    /// Validates the policy settings are reasonable.
    ///
    /// Returns an error message if validation fails.
    #[must_use]
    pub fn validate(&self) -> Option<String> {
        if self.keep_manifests == 0 {
            return Some("keep_manifests must be at least 1".to_string());
        }
        None
    }

    /// Splits manifest paths, sorted newest first, into kept and stale.
    ///
    /// Paths whose name cannot be parsed are always kept.
    #[must_use]
    pub fn partition(&self, sorted_paths: &[String]) -> (Vec<String>, Vec<String>) {
        let latest_committed = sorted_paths.iter().position(|path| {
            ManifestFileName::parse(naming::file_name(path)).is_ok_and(|name| name.committed)
        });

        let mut keep = Vec::new();
        let mut stale = Vec::new();
        for (i, path) in sorted_paths.iter().enumerate() {
            let parseable = ManifestFileName::parse(naming::file_name(path)).is_ok();
            if i < self.keep_manifests || Some(i) == latest_committed || !parseable {
                keep.push(path.clone());
            } else {
                stale.push(path.clone());
            }
        }
        (keep, stale)
    }
}
