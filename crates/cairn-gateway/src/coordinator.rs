//! Remote-state coordinator.
//!
//! The entry point of the protocol. Composes the writer, reader, lineage
//! resolver and dynamic settings into the operations the surrounding cluster
//! layer calls:
//!
//! ```text
//! write_full / write_incremental ──> UNCOMMITTED manifest
//! mark_committed                 ──> COMMITTED manifest (visible to readers)
//! get_latest_manifest / get_latest_state / resolve_last_known_uuid
//! ```
//!
//! Writes are only performed by the elected leader; on any other node they
//! return `Ok(None)`.

use std::collections::{BTreeMap, BTreeSet};
use std::future::Future;
use std::sync::Arc;
use std::time::Instant;

use tokio::sync::watch;
use tracing::Instrument;

use cairn_core::observability::remote_state_span;
use cairn_core::state::{ClusterState, UNKNOWN_UUID};
use cairn_core::storage::BlobStore;

use crate::config::{RemoteStateConfig, RemoteStateSettings};
use crate::diff::StateDiff;
use crate::error::{RemoteStateError, Result};
use crate::lineage;
use crate::listener::SharedListener;
use crate::manifest::{Manifest, ManifestInfo};
use crate::metrics;
use crate::reader::{RemoteStateReader, StoreContentComparator};
use crate::writer::RemoteStateWriter;

/// Orchestrates remote cluster-state persistence for one node.
#[derive(Debug)]
pub struct RemoteStateCoordinator {
    base_path: String,
    writer: RemoteStateWriter,
    reader: RemoteStateReader,
    settings: watch::Sender<RemoteStateSettings>,
}

impl RemoteStateCoordinator {
    /// Creates a coordinator for `node_id` over `store`.
    ///
    /// # Errors
    ///
    /// Returns [`RemoteStateError::Config`] if remote state is disabled in
    /// `config` or the configuration is invalid.
    pub fn new(
        store: Arc<dyn BlobStore>,
        config: RemoteStateConfig,
        node_id: impl Into<String>,
    ) -> Result<Self> {
        if !config.enabled {
            return Err(RemoteStateError::Config(
                "remote cluster state is not enabled on this node".into(),
            ));
        }
        config.validate()?;

        let (settings, _) = watch::channel(config.settings);
        Ok(Self {
            writer: RemoteStateWriter::new(Arc::clone(&store), &config.base_path, node_id),
            reader: RemoteStateReader::new(store, &config.base_path),
            base_path: config.base_path,
            settings,
        })
    }

    /// Registers an index-metadata upload listener.
    pub fn add_listener(&mut self, listener: SharedListener) {
        self.writer.add_listener(listener);
    }

    /// Returns the blob path prefix of this coordinator.
    #[must_use]
    pub fn base_path(&self) -> &str {
        &self.base_path
    }

    /// Returns the reader used by this coordinator.
    #[must_use]
    pub const fn reader(&self) -> &RemoteStateReader {
        &self.reader
    }

    /// Returns a snapshot of the current dynamic settings.
    #[must_use]
    pub fn settings(&self) -> RemoteStateSettings {
        self.settings.borrow().clone()
    }

    /// Subscribes to dynamic settings changes.
    #[must_use]
    pub fn subscribe_settings(&self) -> watch::Receiver<RemoteStateSettings> {
        self.settings.subscribe()
    }

    /// Replaces the dynamic settings for subsequent calls.
    ///
    /// Calls already in flight keep the snapshot they started with.
    ///
    /// # Errors
    ///
    /// Returns [`RemoteStateError::Config`] if `settings` is invalid.
    pub fn update_settings(&self, settings: RemoteStateSettings) -> Result<()> {
        settings.validate()?;
        tracing::info!(?settings, "updated remote state settings");
        self.settings.send_replace(settings);
        Ok(())
    }

    // ========================================================================
    // Writes
    // ========================================================================

    /// Uploads the whole of `state` and publishes an uncommitted manifest.
    ///
    /// Returns `Ok(None)` if this node is not the elected leader.
    ///
    /// # Errors
    ///
    /// Returns [`RemoteStateError::Transfer`] if the upload does not complete.
    pub async fn write_full(
        &self,
        state: &ClusterState,
        previous_cluster_uuid: &str,
    ) -> Result<Option<ManifestInfo>> {
        if !is_leader(state, "write_full") {
            return Ok(None);
        }
        let settings = self.settings();
        let span = remote_state_span("write_full", &state.cluster_name, state.cluster_uuid());
        self.timed_write(
            "full",
            &settings,
            self.writer
                .write_full(state, previous_cluster_uuid, settings.write_timeout())
                .instrument(span),
        )
        .await
        .map(Some)
    }

    /// Uploads what changed since `previous_state` and publishes an
    /// uncommitted manifest.
    ///
    /// Returns `Ok(None)` if this node is not the elected leader.
    ///
    /// # Errors
    ///
    /// - [`RemoteStateError::InvariantViolation`] if the term changed
    /// - [`RemoteStateError::Transfer`] if the upload does not complete
    pub async fn write_incremental(
        &self,
        previous_state: &ClusterState,
        state: &ClusterState,
        previous_manifest: &Manifest,
    ) -> Result<Option<ManifestInfo>> {
        if !is_leader(state, "write_incremental") {
            return Ok(None);
        }
        let settings = self.settings();
        let span = remote_state_span(
            "write_incremental",
            &state.cluster_name,
            state.cluster_uuid(),
        );
        self.timed_write(
            "incremental",
            &settings,
            self.writer
                .write_incremental(
                    previous_state,
                    state,
                    previous_manifest,
                    settings.write_timeout(),
                )
                .instrument(span),
        )
        .await
        .map(Some)
    }

    /// Publishes `previous_manifest` as committed for `state`.
    ///
    /// Returns `Ok(None)` if this node is not the elected leader.
    ///
    /// # Errors
    ///
    /// Returns [`RemoteStateError::Transfer`] if the manifest cannot be
    /// written within the configured write timeout.
    pub async fn mark_committed(
        &self,
        state: &ClusterState,
        previous_manifest: &Manifest,
    ) -> Result<Option<ManifestInfo>> {
        if !is_leader(state, "mark_committed") {
            return Ok(None);
        }
        let settings = self.settings();
        let span = remote_state_span("mark_committed", &state.cluster_name, state.cluster_uuid());
        let commit = async {
            let info = self
                .writer
                .mark_committed(state, previous_manifest, settings.write_timeout())
                .await?;
            Ok((info, StateDiff::default()))
        };
        self.timed_write("commit", &settings, commit.instrument(span))
            .await
            .map(Some)
    }

    async fn timed_write<F>(
        &self,
        kind: &'static str,
        settings: &RemoteStateSettings,
        write: F,
    ) -> Result<ManifestInfo>
    where
        F: Future<Output = Result<(ManifestInfo, StateDiff)>>,
    {
        let started = Instant::now();
        let result = write.await;
        let elapsed = started.elapsed();
        metrics::record_write(kind, result.is_ok(), elapsed);

        match result {
            Ok((info, diff)) => {
                let m = &info.manifest;
                if elapsed > settings.slow_write_threshold() {
                    tracing::warn!(
                        kind,
                        elapsed_ms = elapsed.as_millis(),
                        threshold_ms = settings.slow_write_threshold_ms,
                        term = m.term,
                        version = m.state_version,
                        uploads = diff.upload_count(),
                        "slow remote state write"
                    );
                } else {
                    tracing::info!(
                        kind,
                        elapsed_ms = elapsed.as_millis(),
                        term = m.term,
                        version = m.state_version,
                        committed = m.committed,
                        uploads = diff.upload_count(),
                        indices = m.indices.len(),
                        path = %info.path,
                        "remote state written"
                    );
                }
                Ok(info)
            }
            Err(err) => {
                tracing::error!(kind, elapsed_ms = elapsed.as_millis(), error = %err, "remote state write failed");
                Err(err)
            }
        }
    }

    // ========================================================================
    // Reads
    // ========================================================================

    /// Returns the latest committed manifest of `cluster_uuid`.
    ///
    /// # Errors
    ///
    /// Returns an error if the manifest listing or read fails.
    pub async fn get_latest_manifest(
        &self,
        cluster_name: &str,
        cluster_uuid: &str,
    ) -> Result<Option<Manifest>> {
        let result = self.reader.latest_manifest(cluster_name, cluster_uuid).await;
        metrics::record_read("manifest", result.is_ok());
        Ok(result?.map(|info| info.manifest))
    }

    /// Reads the state of the latest committed manifest of `cluster_uuid`.
    ///
    /// # Errors
    ///
    /// - [`RemoteStateError::StateNotFound`] if nothing is committed
    /// - [`RemoteStateError::Transfer`] if the read does not complete
    pub async fn get_latest_state(
        &self,
        cluster_name: &str,
        cluster_uuid: &str,
        include_ephemeral: bool,
    ) -> Result<ClusterState> {
        let manifest = self
            .get_latest_manifest(cluster_name, cluster_uuid)
            .await?
            .ok_or_else(|| RemoteStateError::StateNotFound {
                cluster_name: cluster_name.to_string(),
                cluster_uuid: cluster_uuid.to_string(),
            })?;
        self.get_state_for_manifest(cluster_name, &manifest, include_ephemeral)
            .await
    }

    /// Reads the state described by `manifest`.
    ///
    /// # Errors
    ///
    /// Returns [`RemoteStateError::Transfer`] if the read does not complete.
    pub async fn get_state_for_manifest(
        &self,
        cluster_name: &str,
        manifest: &Manifest,
        include_ephemeral: bool,
    ) -> Result<ClusterState> {
        let settings = self.settings();
        let span = remote_state_span("read_full", cluster_name, &manifest.cluster_uuid);
        let result = self
            .reader
            .state_for_manifest(
                cluster_name,
                manifest,
                include_ephemeral,
                settings.read_timeout(),
            )
            .instrument(span)
            .await;
        metrics::record_read("full", result.is_ok());
        result
    }

    /// Applies the changes recorded in `manifest` to `previous_state`.
    ///
    /// # Errors
    ///
    /// - [`RemoteStateError::InvariantViolation`] if the manifest carries no
    ///   usable diff for `previous_state`
    /// - [`RemoteStateError::Transfer`] if the read does not complete
    pub async fn get_state_using_diff(
        &self,
        manifest: &Manifest,
        previous_state: &ClusterState,
    ) -> Result<ClusterState> {
        let settings = self.settings();
        let span = remote_state_span(
            "read_diff",
            &previous_state.cluster_name,
            &manifest.cluster_uuid,
        );
        let result = self
            .reader
            .state_using_diff(manifest, previous_state, settings.read_timeout())
            .instrument(span)
            .await;
        metrics::record_read("diff", result.is_ok());
        result
    }

    // ========================================================================
    // Lineage
    // ========================================================================

    /// Lists every cluster UUID stored for `cluster_name`.
    ///
    /// # Errors
    ///
    /// Returns an error if the listing fails.
    pub async fn get_all_cluster_uuids(&self, cluster_name: &str) -> Result<BTreeSet<String>> {
        self.reader.cluster_uuids(cluster_name).await
    }

    /// Resolves the valid cluster UUID lineage, most recent first.
    ///
    /// # Errors
    ///
    /// - [`RemoteStateError::AmbiguousLineage`] if the history is split
    /// - [`RemoteStateError::InvariantViolation`] if the history is cyclic
    pub async fn resolve_lineage(&self, cluster_name: &str) -> Result<Vec<String>> {
        let settings = self.settings();
        let uuids = self.get_all_cluster_uuids(cluster_name).await?;

        let latest = futures::future::try_join_all(uuids.iter().map(|uuid| async move {
            let manifest = self.get_latest_manifest(cluster_name, uuid).await?;
            Ok::<_, RemoteStateError>(manifest.map(|m| (uuid.clone(), m)))
        }))
        .await?;
        let manifests: BTreeMap<String, Manifest> = latest.into_iter().flatten().collect();

        let comparator = StoreContentComparator::new(self.reader.clone(), settings.read_timeout());
        lineage::resolve(manifests, &comparator).await
    }

    /// Returns the most recent cluster UUID of the valid lineage, or
    /// [`UNKNOWN_UUID`] if nothing is committed.
    ///
    /// # Errors
    ///
    /// - [`RemoteStateError::AmbiguousLineage`] if the history is split
    /// - [`RemoteStateError::InvariantViolation`] if the history is cyclic
    pub async fn resolve_last_known_uuid(&self, cluster_name: &str) -> Result<String> {
        let span = remote_state_span("resolve_lineage", cluster_name, UNKNOWN_UUID);
        let chain = self.resolve_lineage(cluster_name).instrument(span).await?;
        let last_known = chain
            .into_iter()
            .next()
            .unwrap_or_else(|| UNKNOWN_UUID.to_string());
        tracing::info!(cluster = cluster_name, cluster_uuid = %last_known, "resolved last known cluster UUID");
        Ok(last_known)
    }
}

fn is_leader(state: &ClusterState, operation: &str) -> bool {
    let leader = state.nodes.is_local_node_elected_leader();
    if !leader {
        tracing::debug!(
            operation,
            local_node = ?state.nodes.local_node_id,
            leader = ?state.nodes.leader_node_id,
            "skipping remote state write on non-leader node"
        );
    }
    leader
}
