//! Stale-state cleanup.
//!
//! Cleanup only ever deletes. It removes manifests that fell out of the
//! retention window and the component blobs referenced by those manifests
//! and by no retained manifest. Blobs are never rewritten, so cleanup cannot
//! race a writer or reader on the same key.

use std::collections::BTreeSet;
use std::sync::Arc;
use std::time::Instant;

use async_trait::async_trait;

use cairn_core::storage::BlobStore;

use crate::config::RemoteStateSettings;
use crate::error::Result;
use crate::gc::RetentionPolicy;
use crate::reader::RemoteStateReader;

// =========================================================================
// Metrics
//
// Counters:
// - cairn_remote_state_cleanup_deleted_total
// =========================================================================

/// Result of a cleanup run.
#[derive(Debug, Clone, Default)]
pub struct CleanupResult {
    /// Number of manifests deleted.
    pub manifests_deleted: u64,
    /// Number of component blobs deleted.
    pub blobs_deleted: u64,
    /// Number of cluster UUIDs visited.
    pub cluster_uuids_visited: u64,
    /// Errors encountered (cleanup continues on non-fatal errors).
    pub errors: Vec<String>,
}

impl CleanupResult {
    /// Merges another result into this one.
    pub fn merge(&mut self, other: Self) {
        self.manifests_deleted += other.manifests_deleted;
        self.blobs_deleted += other.blobs_deleted;
        self.cluster_uuids_visited += other.cluster_uuids_visited;
        self.errors.extend(other.errors);
    }

    /// Returns the total number of deleted objects.
    #[must_use]
    pub const fn objects_deleted(&self) -> u64 {
        self.manifests_deleted + self.blobs_deleted
    }

    /// Returns true if any errors were encountered.
    #[must_use]
    pub fn has_errors(&self) -> bool {
        !self.errors.is_empty()
    }
}

/// A periodically scheduled cleanup task.
#[async_trait]
pub trait StaleStateCleanup: Send + Sync + 'static {
    /// Runs one cleanup pass with the given settings snapshot.
    ///
    /// # Errors
    ///
    /// Returns an error if the pass cannot start; per-object failures are
    /// reported in [`CleanupResult::errors`].
    async fn cleanup(&self, settings: &RemoteStateSettings) -> Result<CleanupResult>;
}

/// Cleanup that applies a [`RetentionPolicy`] to every cluster UUID of one
/// cluster name.
///
/// # Example
///
/// ```rust,ignore
/// let cleaner = RetentionCleaner::new(store, "remote-state", "prod");
/// let result = cleaner.cleanup(&coordinator.settings()).await?;
/// ```
pub struct RetentionCleaner {
    store: Arc<dyn BlobStore>,
    reader: RemoteStateReader,
    cluster_name: String,
}

impl RetentionCleaner {
    /// Creates a cleaner for `cluster_name` under `base_path`.
    #[must_use]
    pub fn new(
        store: Arc<dyn BlobStore>,
        base_path: impl Into<String>,
        cluster_name: impl Into<String>,
    ) -> Self {
        Self {
            reader: RemoteStateReader::new(Arc::clone(&store), base_path),
            store,
            cluster_name: cluster_name.into(),
        }
    }

    async fn clean_cluster_uuid(
        &self,
        cluster_uuid: &str,
        policy: &RetentionPolicy,
    ) -> Result<CleanupResult> {
        let mut result = CleanupResult {
            cluster_uuids_visited: 1,
            ..CleanupResult::default()
        };
        let paths = self
            .reader
            .list_manifests(&self.cluster_name, cluster_uuid)
            .await?;
        let (keep, stale) = policy.partition(&paths);
        if stale.is_empty() {
            return Ok(result);
        }

        let mut retained: BTreeSet<String> = BTreeSet::new();
        for path in &keep {
            // Anything a retained manifest references must survive, so an
            // unreadable retained manifest aborts this UUID.
            let manifest = self.reader.read_manifest(path).await?;
            retained.extend(manifest.referenced_blobs().into_iter().map(str::to_string));
        }

        let mut candidates: BTreeSet<String> = BTreeSet::new();
        let mut deletable_manifests = Vec::new();
        for path in stale {
            match self.reader.read_manifest(&path).await {
                Ok(manifest) => {
                    candidates.extend(
                        manifest
                            .referenced_blobs()
                            .into_iter()
                            .filter(|blob| !retained.contains(*blob))
                            .map(str::to_string),
                    );
                    deletable_manifests.push(path);
                }
                Err(err) => {
                    tracing::warn!(path = %path, error = %err, "skipping unreadable stale manifest");
                    result.errors.push(format!("{path}: {err}"));
                }
            }
        }

        for blob in candidates {
            match self.store.delete(&blob).await {
                Ok(()) => result.blobs_deleted += 1,
                Err(err) => result.errors.push(format!("{blob}: {err}")),
            }
        }
        // Manifests go last so a failed pass never leaves a manifest pointing
        // at deleted blobs while its own blobs remain.
        for path in deletable_manifests {
            match self.store.delete(&path).await {
                Ok(()) => {
                    tracing::debug!(path = %path, "deleted stale manifest");
                    result.manifests_deleted += 1;
                }
                Err(err) => result.errors.push(format!("{path}: {err}")),
            }
        }
        Ok(result)
    }
}

#[async_trait]
impl StaleStateCleanup for RetentionCleaner {
    async fn cleanup(&self, settings: &RemoteStateSettings) -> Result<CleanupResult> {
        let started = Instant::now();
        let policy = RetentionPolicy::from_settings(settings);
        if let Some(problem) = policy.validate() {
            return Err(crate::error::RemoteStateError::Config(problem));
        }

        tracing::info!(
            cluster = %self.cluster_name,
            keep_manifests = policy.keep_manifests,
            "starting stale state cleanup"
        );

        let mut result = CleanupResult::default();
        for cluster_uuid in self.reader.cluster_uuids(&self.cluster_name).await? {
            match self.clean_cluster_uuid(&cluster_uuid, &policy).await {
                Ok(partial) => result.merge(partial),
                Err(err) => {
                    tracing::error!(
                        cluster_uuid = %cluster_uuid,
                        error = %err,
                        "stale state cleanup failed for cluster UUID"
                    );
                    result.errors.push(format!("{cluster_uuid}: {err}"));
                }
            }
        }

        crate::metrics::record_cleanup_deleted(result.objects_deleted());
        tracing::info!(
            cluster = %self.cluster_name,
            manifests_deleted = result.manifests_deleted,
            blobs_deleted = result.blobs_deleted,
            errors = result.errors.len(),
            duration_ms = started.elapsed().as_millis(),
            metric = "cairn_remote_state_cleanup_completed",
            "stale state cleanup completed"
        );
        Ok(result)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_result_merge() {
        let mut a = CleanupResult {
            manifests_deleted: 1,
            blobs_deleted: 2,
            cluster_uuids_visited: 1,
            errors: vec!["x".into()],
        };
        a.merge(CleanupResult {
            manifests_deleted: 3,
            blobs_deleted: 4,
            cluster_uuids_visited: 1,
            errors: Vec::new(),
        });
        assert_eq!(a.objects_deleted(), 10);
        assert_eq!(a.cluster_uuids_visited, 2);
        assert!(a.has_errors());
    }
}
