//! Remote-state write path.
//!
//! A write runs in four steps: diff the state, fan the uploads out, build the
//! manifest from the outcomes plus carried pointers, then publish the
//! manifest as a new blob. Nothing is published unless every upload
//! succeeded; blobs written by a failed write stay unreferenced.

use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;

use bytes::Bytes;
use tokio::time::Instant;

use cairn_core::state::ClusterState;
use cairn_core::storage::BlobStore;

use crate::builder::ManifestBuilder;
use crate::codec;
use crate::component::{Component, CustomKind, UploadOutcome};
use crate::diff::{DiffEngine, StateDiff};
use crate::error::{RemoteStateError, Result};
use crate::listener::{IndexUpload, SharedListener};
use crate::manifest::{BlobPointer, IndexPointer, Manifest, ManifestInfo};
use crate::naming::{self, ClusterPaths, ManifestFileName};
use crate::reader::MANIFEST_KIND;
use crate::transfer::ParallelTransfer;

/// Writes component blobs and manifests.
#[derive(Clone)]
pub struct RemoteStateWriter {
    store: Arc<dyn BlobStore>,
    base_path: String,
    node_id: String,
    listeners: Vec<SharedListener>,
}

impl std::fmt::Debug for RemoteStateWriter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RemoteStateWriter")
            .field("base_path", &self.base_path)
            .field("node_id", &self.node_id)
            .field("listeners", &self.listeners.len())
            .finish_non_exhaustive()
    }
}

impl RemoteStateWriter {
    /// Creates a writer over `store` rooted at `base_path`.
    #[must_use]
    pub fn new(
        store: Arc<dyn BlobStore>,
        base_path: impl Into<String>,
        node_id: impl Into<String>,
    ) -> Self {
        Self {
            store,
            base_path: base_path.into(),
            node_id: node_id.into(),
            listeners: Vec::new(),
        }
    }

    /// Registers an index-metadata upload listener.
    pub fn add_listener(&mut self, listener: SharedListener) {
        self.listeners.push(listener);
    }

    /// Uploads every component of `state` and publishes an uncommitted
    /// manifest. `timeout` bounds the uploads and the manifest together.
    ///
    /// # Errors
    ///
    /// Returns [`RemoteStateError::Transfer`] if any upload fails or the
    /// write times out; no manifest is published in that case.
    pub async fn write_full(
        &self,
        state: &ClusterState,
        previous_cluster_uuid: &str,
        timeout: Duration,
    ) -> Result<(ManifestInfo, StateDiff)> {
        let deadline = Instant::now() + timeout;
        let diff = DiffEngine::full(state);
        let (dispatched, results) = self.upload(state, None, &diff, timeout).await?;

        let manifest = ManifestBuilder::new(state, &diff)
            .with_previous_cluster_uuid(previous_cluster_uuid)
            .with_node_id(&self.node_id)
            .build(dispatched, results)?;
        let info = self
            .publish(&state.cluster_name, manifest, remaining(deadline))
            .await?;
        Ok((info, diff))
    }

    /// Uploads what changed since `previous_state` and publishes an
    /// uncommitted manifest carrying every other pointer of
    /// `previous_manifest`.
    ///
    /// # Errors
    ///
    /// - [`RemoteStateError::InvariantViolation`] if the term changed between
    ///   the two states
    /// - [`RemoteStateError::Transfer`] if any upload fails or the write
    ///   times out
    pub async fn write_incremental(
        &self,
        previous_state: &ClusterState,
        state: &ClusterState,
        previous_manifest: &Manifest,
        timeout: Duration,
    ) -> Result<(ManifestInfo, StateDiff)> {
        if previous_state.term() != state.term() {
            return Err(RemoteStateError::invariant(format!(
                "incremental write across terms: previous term {}, current term {}",
                previous_state.term(),
                state.term()
            )));
        }

        let deadline = Instant::now() + timeout;
        let diff = DiffEngine::incremental(previous_state, state, previous_manifest);
        let (dispatched, results) = self
            .upload(state, Some(previous_state), &diff, timeout)
            .await?;

        let manifest = ManifestBuilder::new(state, &diff)
            .with_previous(previous_manifest, &previous_state.state_uuid)
            .with_node_id(&self.node_id)
            .build(dispatched, results)?;
        let info = self
            .publish(&state.cluster_name, manifest, remaining(deadline))
            .await?;
        Ok((info, diff))
    }

    /// Republishes `previous_manifest` as committed for `state`.
    ///
    /// # Errors
    ///
    /// Returns an error if the manifest cannot be written within `timeout`.
    pub async fn mark_committed(
        &self,
        state: &ClusterState,
        previous_manifest: &Manifest,
        timeout: Duration,
    ) -> Result<ManifestInfo> {
        let manifest = ManifestBuilder::committed(previous_manifest, state);
        self.publish(&state.cluster_name, manifest, timeout).await
    }

    /// Writes `manifest` under a fresh manifest name.
    ///
    /// # Errors
    ///
    /// - [`RemoteStateError::Serialization`] if the manifest cannot be encoded
    /// - [`RemoteStateError::Transfer`] naming the manifest item if the put
    ///   fails or does not finish within `timeout`
    pub async fn publish(
        &self,
        cluster_name: &str,
        manifest: Manifest,
        timeout: Duration,
    ) -> Result<ManifestInfo> {
        let path = format!(
            "{}{}",
            self.paths(cluster_name).manifest_dir(&manifest.cluster_uuid),
            ManifestFileName::format(
                manifest.term,
                manifest.state_version,
                manifest.committed,
                manifest.codec_version,
            )
        );
        let data = codec::encode(MANIFEST_KIND, &manifest)?;
        let store = Arc::clone(&self.store);
        let target = path.clone();
        let mut transfer = ParallelTransfer::new("publish");
        transfer.push(Component::Manifest, async move {
            store.put(&target, data).await?;
            Ok(())
        });
        transfer.run(timeout).await?;
        tracing::debug!(
            path = %path,
            committed = manifest.committed,
            codec = manifest.codec_version.as_u8(),
            "published manifest"
        );
        Ok(ManifestInfo { manifest, path })
    }

    fn paths(&self, cluster_name: &str) -> ClusterPaths {
        ClusterPaths::new(&self.base_path, cluster_name)
    }

    /// Dispatches every upload of `diff` and waits for all of them.
    async fn upload(
        &self,
        state: &ClusterState,
        previous_state: Option<&ClusterState>,
        diff: &StateDiff,
        timeout: Duration,
    ) -> Result<(usize, Vec<(Component, UploadOutcome)>)> {
        let paths = self.paths(&state.cluster_name);
        let uuid = state.cluster_uuid();
        let (term, version) = (state.term(), state.version);
        let mut transfer = ParallelTransfer::new("upload");

        for category in &diff.singletons {
            let dir = if category.is_ephemeral() {
                paths.ephemeral_dir(uuid)
            } else {
                paths.global_metadata_dir(uuid)
            };
            let path = format!("{dir}{}", naming::blob_file_name(category.name(), term, version));
            let outcome =
                UploadOutcome::Singleton(*category, BlobPointer::new(category.name(), &path));
            self.push_put(
                &mut transfer,
                Component::Singleton(*category),
                path,
                category.encode(state)?,
                outcome,
            );
        }

        let mut uploads = Vec::with_capacity(diff.indices_to_upload.len());
        for change in &diff.indices_to_upload {
            let index = state.metadata.indices.get(&change.name).ok_or_else(|| {
                RemoteStateError::invariant(format!("diff names unknown index {}", change.name))
            })?;
            let path = format!(
                "{}{}",
                paths.index_dir(uuid, &index.uuid),
                naming::blob_file_name("metadata", term, index.version)
            );
            let outcome = UploadOutcome::Index(IndexPointer {
                index_name: index.name.clone(),
                index_uuid: index.uuid.clone(),
                blob_name: path.clone(),
            });
            let component = Component::Index(change.name.clone());
            let data = codec::encode(component.kind(), index)?;
            self.push_put(&mut transfer, component, path, data, outcome);
            uploads.push(IndexUpload {
                index: index.clone(),
                previous_version: change.previous_version,
            });
        }

        for (key, custom) in &diff.customs.upserts {
            self.push_custom(&mut transfer, &paths, state, CustomKind::Metadata, key, custom)?;
        }
        for (key, value) in &diff.cluster_state_customs.upserts {
            self.push_custom(&mut transfer, &paths, state, CustomKind::ClusterState, key, value)?;
        }

        for (name, routing) in &diff.routing.indices.upserts {
            let path = format!(
                "{}{}",
                paths.routing_dir(uuid, &routing.index_uuid),
                naming::blob_file_name("index_routing", term, diff.routing.version)
            );
            let outcome = UploadOutcome::IndexRouting(IndexPointer {
                index_name: name.clone(),
                index_uuid: routing.index_uuid.clone(),
                blob_name: path.clone(),
            });
            let component = Component::IndexRouting(name.clone());
            let data = codec::encode(component.kind(), routing)?;
            self.push_put(&mut transfer, component, path, data, outcome);
        }

        if diff.upload_routing_diff {
            let path = format!(
                "{}{}",
                paths.routing_diff_dir(uuid),
                naming::blob_file_name(naming::ROUTING_DIFF_PREFIX, term, version)
            );
            let outcome =
                UploadOutcome::RoutingDiff(BlobPointer::new(naming::ROUTING_DIFF_PREFIX, &path));
            let data = codec::encode(Component::RoutingDiff.kind(), &diff.routing)?;
            self.push_put(&mut transfer, Component::RoutingDiff, path, data, outcome);
        }

        if !uploads.is_empty() {
            let previous: BTreeMap<_, _> = previous_state
                .map(|p| {
                    uploads
                        .iter()
                        .filter_map(|u| p.metadata.indices.get_key_value(&u.index.name))
                        .map(|(k, v)| (k.clone(), v.clone()))
                        .collect()
                })
                .unwrap_or_default();
            for listener in &self.listeners {
                let listener = Arc::clone(listener);
                let name = listener.name().to_string();
                let (uploads, previous) = (uploads.clone(), previous.clone());
                transfer.push(Component::Listener(name.clone()), async move {
                    listener.on_upload(uploads, previous).await?;
                    Ok(UploadOutcome::Listener(name))
                });
            }
        }

        let dispatched = transfer.len();
        tracing::debug!(
            dispatched,
            singletons = diff.singletons.len(),
            indices = diff.indices_to_upload.len(),
            format_upgrade = diff.format_upgrade,
            "dispatching uploads"
        );
        let results = transfer.run(timeout).await?;
        Ok((dispatched, results))
    }

    fn push_custom<V: serde::Serialize>(
        &self,
        transfer: &mut ParallelTransfer<UploadOutcome>,
        paths: &ClusterPaths,
        state: &ClusterState,
        kind: CustomKind,
        key: &str,
        value: &V,
    ) -> Result<()> {
        let uuid = state.cluster_uuid();
        let dir = match kind {
            CustomKind::Metadata => paths.global_metadata_dir(uuid),
            CustomKind::ClusterState => paths.ephemeral_dir(uuid),
        };
        let prefix = format!("{}--{key}", kind.name());
        let path = format!(
            "{dir}{}",
            naming::blob_file_name(&prefix, state.term(), state.version)
        );
        let component = Component::Custom(kind, key.to_string());
        let data = codec::encode(component.kind(), value)?;
        let outcome = UploadOutcome::Custom(kind, key.to_string(), BlobPointer::new(key, &path));
        self.push_put(transfer, component, path, data, outcome);
        Ok(())
    }

    fn push_put(
        &self,
        transfer: &mut ParallelTransfer<UploadOutcome>,
        component: Component,
        path: String,
        data: Bytes,
        outcome: UploadOutcome,
    ) {
        let store = Arc::clone(&self.store);
        transfer.push(component, async move {
            let size = data.len();
            store.put(&path, data).await?;
            tracing::debug!(path = %path, bytes = size, "uploaded component");
            Ok(outcome)
        });
    }
}

fn remaining(deadline: Instant) -> Duration {
    deadline.saturating_duration_since(Instant::now())
}
