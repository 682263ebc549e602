//! Remote-state read path.
//!
//! Mirrors the write path: given a manifest, one read item is dispatched per
//! pointer the manifest claims, every item decodes its own payload, and the
//! payloads are folded into a state snapshot only after the join barrier.
//! A read that does not fully complete returns no partial state.

use std::collections::{BTreeMap, BTreeSet};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;

use cairn_core::state::{ClusterState, IndexMetadata, IndexTemplate, MetadataCustom, Settings};
use cairn_core::storage::BlobStore;

use crate::codec;
use crate::component::{Component, ComponentPayload, CustomKind, SingletonCategory};
use crate::error::{RemoteStateError, Result};
use crate::lineage::ContentComparator;
use crate::manifest::{BlobPointer, Manifest, ManifestInfo};
use crate::naming::{self, ClusterPaths, ManifestFileName};
use crate::transfer::ParallelTransfer;

/// Envelope kind of manifest blobs.
pub const MANIFEST_KIND: &str = "manifest";

/// Durable global metadata compared during lineage resolution.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct GlobalContent {
    /// Persistent settings.
    pub persistent_settings: Settings,
    /// Templates.
    pub templates: BTreeMap<String, IndexTemplate>,
    /// Metadata customs that persist across restarts.
    pub customs: BTreeMap<String, MetadataCustom>,
}

/// Reads manifests and the state they describe.
#[derive(Clone)]
pub struct RemoteStateReader {
    store: Arc<dyn BlobStore>,
    base_path: String,
}

impl std::fmt::Debug for RemoteStateReader {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RemoteStateReader")
            .field("base_path", &self.base_path)
            .finish_non_exhaustive()
    }
}

impl RemoteStateReader {
    /// Creates a reader over `store` rooted at `base_path`.
    #[must_use]
    pub fn new(store: Arc<dyn BlobStore>, base_path: impl Into<String>) -> Self {
        Self {
            store,
            base_path: base_path.into(),
        }
    }

    /// Returns the path builder for `cluster_name`.
    #[must_use]
    pub fn paths(&self, cluster_name: &str) -> ClusterPaths {
        ClusterPaths::new(&self.base_path, cluster_name)
    }

    // ========================================================================
    // Manifests
    // ========================================================================

    /// Lists manifest paths of one cluster UUID, newest first.
    ///
    /// # Errors
    ///
    /// Returns an error if the listing fails.
    pub async fn list_manifests(&self, cluster_name: &str, cluster_uuid: &str) -> Result<Vec<String>> {
        let prefix = self.paths(cluster_name).manifest_dir(cluster_uuid);
        let mut paths: Vec<String> = self
            .store
            .list(&prefix)
            .await?
            .into_iter()
            .map(|meta| meta.path)
            .collect();
        paths.sort_unstable();
        Ok(paths)
    }

    /// Reads and decodes one manifest blob.
    ///
    /// # Errors
    ///
    /// Returns an error if the blob is missing or not a valid manifest.
    pub async fn read_manifest(&self, path: &str) -> Result<Manifest> {
        let data = self.store.get(path).await?;
        codec::decode(MANIFEST_KIND, &data)
    }

    /// Returns the latest committed manifest of one cluster UUID.
    ///
    /// # Errors
    ///
    /// Returns an error if listing or reading fails.
    pub async fn latest_manifest(
        &self,
        cluster_name: &str,
        cluster_uuid: &str,
    ) -> Result<Option<ManifestInfo>> {
        for path in self.list_manifests(cluster_name, cluster_uuid).await? {
            match ManifestFileName::parse(naming::file_name(&path)) {
                Ok(name) if name.committed => {
                    let manifest = self.read_manifest(&path).await?;
                    return Ok(Some(ManifestInfo { manifest, path }));
                }
                Ok(_) => {}
                Err(err) => {
                    tracing::warn!(path = %path, error = %err, "skipping unparseable manifest name");
                }
            }
        }
        Ok(None)
    }

    /// Lists every cluster UUID with a directory under `cluster_name`.
    ///
    /// # Errors
    ///
    /// Returns an error if the listing fails.
    pub async fn cluster_uuids(&self, cluster_name: &str) -> Result<BTreeSet<String>> {
        let paths = self.paths(cluster_name);
        Ok(self
            .store
            .list(paths.cluster_root())
            .await?
            .iter()
            .filter_map(|meta| paths.cluster_uuid_of(&meta.path))
            .map(str::to_string)
            .collect())
    }

    // ========================================================================
    // State
    // ========================================================================

    /// Reads the full state described by `manifest`.
    ///
    /// With `include_ephemeral == false`, transient settings, nodes, blocks,
    /// consistent-setting hashes, cluster-state customs, routing and
    /// non-persistent metadata customs are skipped.
    ///
    /// # Errors
    ///
    /// Returns [`RemoteStateError::Transfer`] if any read fails or times out.
    pub async fn state_for_manifest(
        &self,
        cluster_name: &str,
        manifest: &Manifest,
        include_ephemeral: bool,
        timeout: Duration,
    ) -> Result<ClusterState> {
        let mut transfer = ParallelTransfer::new("read");

        if manifest.codec_version.splits_global_metadata() {
            for (category, pointer) in &manifest.categories {
                if include_ephemeral || !category.is_ephemeral() {
                    self.push_read(&mut transfer, Component::Singleton(*category), pointer);
                }
            }
            for (key, pointer) in &manifest.customs {
                self.push_read(
                    &mut transfer,
                    Component::Custom(CustomKind::Metadata, key.clone()),
                    pointer,
                );
            }
            if include_ephemeral {
                for (key, pointer) in &manifest.cluster_state_customs {
                    self.push_read(
                        &mut transfer,
                        Component::Custom(CustomKind::ClusterState, key.clone()),
                        pointer,
                    );
                }
            }
        } else if let Some(pointer) = &manifest.global_metadata {
            self.push_read(&mut transfer, Component::LegacyGlobalMetadata, pointer);
        }

        for pointer in &manifest.indices {
            self.push_path(
                &mut transfer,
                Component::Index(pointer.index_name.clone()),
                &pointer.blob_name,
            );
        }
        if include_ephemeral {
            for pointer in &manifest.indices_routing {
                self.push_path(
                    &mut transfer,
                    Component::IndexRouting(pointer.index_name.clone()),
                    &pointer.blob_name,
                );
            }
        }

        let results = transfer.run(timeout).await?;

        let mut state = ClusterState::empty(cluster_name);
        apply_header(&mut state, manifest);
        if include_ephemeral {
            state.routing_table.version = manifest.routing_table_version;
        }
        for (_, payload) in results {
            apply_payload(&mut state, payload);
        }
        if !include_ephemeral {
            state.metadata.customs.retain(|_, custom| custom.persist_on_gateway);
        }
        Ok(state)
    }

    /// Reads only what `manifest`'s diff manifest lists as changed and applies
    /// it to `previous_state`.
    ///
    /// # Errors
    ///
    /// - [`RemoteStateError::InvariantViolation`] if the manifest has no diff
    ///   manifest, the diff does not start at `previous_state`, or a changed
    ///   component has no pointer
    /// - [`RemoteStateError::Transfer`] if any read fails or times out
    pub async fn state_using_diff(
        &self,
        manifest: &Manifest,
        previous_state: &ClusterState,
        timeout: Duration,
    ) -> Result<ClusterState> {
        let diff = manifest.diff_manifest.as_ref().ok_or_else(|| {
            RemoteStateError::invariant(format!(
                "manifest for state {} has no diff manifest",
                manifest.state_uuid
            ))
        })?;
        if diff.from_state_uuid != previous_state.state_uuid {
            return Err(RemoteStateError::invariant(format!(
                "diff applies to state {} but previous state is {}",
                diff.from_state_uuid, previous_state.state_uuid
            )));
        }

        let missing = |what: &str, key: &str| {
            RemoteStateError::invariant(format!("diff lists {what} {key} without a pointer"))
        };
        let mut transfer = ParallelTransfer::new("read");

        for category in &diff.updated_categories {
            let pointer = manifest
                .categories
                .get(category)
                .ok_or_else(|| missing("category", category.name()))?;
            self.push_read(&mut transfer, Component::Singleton(*category), pointer);
        }
        for name in &diff.indices_updated {
            let pointer = manifest
                .index_pointer(name)
                .ok_or_else(|| missing("index", name))?;
            self.push_path(&mut transfer, Component::Index(name.clone()), &pointer.blob_name);
        }
        for key in &diff.customs_updated {
            let pointer = manifest
                .customs
                .get(key)
                .ok_or_else(|| missing("custom", key))?;
            self.push_read(
                &mut transfer,
                Component::Custom(CustomKind::Metadata, key.clone()),
                pointer,
            );
        }
        for key in &diff.cluster_state_customs_updated {
            let pointer = manifest
                .cluster_state_customs
                .get(key)
                .ok_or_else(|| missing("cluster-state custom", key))?;
            self.push_read(
                &mut transfer,
                Component::Custom(CustomKind::ClusterState, key.clone()),
                pointer,
            );
        }
        if let Some(path) = &diff.routing_diff_path {
            self.push_path(&mut transfer, Component::RoutingDiff, path);
        } else {
            for name in &diff.routing_updated {
                let pointer = manifest
                    .routing_pointer(name)
                    .ok_or_else(|| missing("index routing", name))?;
                self.push_path(
                    &mut transfer,
                    Component::IndexRouting(name.clone()),
                    &pointer.blob_name,
                );
            }
        }

        let results = transfer.run(timeout).await?;

        let mut state = previous_state.clone();
        apply_header(&mut state, manifest);
        for name in &diff.indices_deleted {
            state.metadata.indices.remove(name);
        }
        for key in &diff.customs_deleted {
            state.metadata.customs.remove(key);
        }
        for key in &diff.cluster_state_customs_deleted {
            state.customs.remove(key);
        }
        if diff.routing_diff_path.is_none() {
            for name in &diff.routing_deleted {
                state.routing_table.indices.remove(name);
            }
        }
        for (_, payload) in results {
            apply_payload(&mut state, payload);
        }
        state.routing_table.version = manifest.routing_table_version;
        Ok(state)
    }

    /// Reads every index metadata blob of `manifest`.
    ///
    /// # Errors
    ///
    /// Returns [`RemoteStateError::Transfer`] if any read fails or times out.
    pub async fn index_metadata(
        &self,
        manifest: &Manifest,
        timeout: Duration,
    ) -> Result<BTreeMap<String, IndexMetadata>> {
        let mut transfer = ParallelTransfer::new("read");
        for pointer in &manifest.indices {
            self.push_path(
                &mut transfer,
                Component::Index(pointer.index_name.clone()),
                &pointer.blob_name,
            );
        }
        Ok(transfer
            .run(timeout)
            .await?
            .into_iter()
            .filter_map(|(_, payload)| match payload {
                ComponentPayload::Index(index) => Some((index.name.clone(), index)),
                _ => None,
            })
            .collect())
    }

    /// Reads the durable global metadata of `manifest`.
    ///
    /// # Errors
    ///
    /// Returns [`RemoteStateError::Transfer`] if any read fails or times out.
    pub async fn global_content(&self, manifest: &Manifest, timeout: Duration) -> Result<GlobalContent> {
        let mut transfer = ParallelTransfer::new("read");
        if manifest.codec_version.splits_global_metadata() {
            for category in [SingletonCategory::PersistentSettings, SingletonCategory::Templates] {
                if let Some(pointer) = manifest.categories.get(&category) {
                    self.push_read(&mut transfer, Component::Singleton(category), pointer);
                }
            }
            for (key, pointer) in &manifest.customs {
                self.push_read(
                    &mut transfer,
                    Component::Custom(CustomKind::Metadata, key.clone()),
                    pointer,
                );
            }
        } else if let Some(pointer) = &manifest.global_metadata {
            self.push_read(&mut transfer, Component::LegacyGlobalMetadata, pointer);
        }

        let mut content = GlobalContent::default();
        for (_, payload) in transfer.run(timeout).await? {
            match payload {
                ComponentPayload::PersistentSettings(settings) => {
                    content.persistent_settings = settings;
                }
                ComponentPayload::Templates(templates) => content.templates = templates,
                ComponentPayload::MetadataCustom(key, custom) => {
                    content.customs.insert(key, custom);
                }
                ComponentPayload::LegacyGlobalMetadata(legacy) => {
                    content.persistent_settings = legacy.persistent_settings;
                    content.templates = legacy.templates;
                    content.customs = legacy.customs;
                }
                _ => {}
            }
        }
        content.customs.retain(|_, custom| custom.persist_on_gateway);
        Ok(content)
    }

    fn push_read(
        &self,
        transfer: &mut ParallelTransfer<ComponentPayload>,
        component: Component,
        pointer: &BlobPointer,
    ) {
        self.push_path(transfer, component, &pointer.blob_name);
    }

    fn push_path(
        &self,
        transfer: &mut ParallelTransfer<ComponentPayload>,
        component: Component,
        path: &str,
    ) {
        let store = Arc::clone(&self.store);
        let path = path.to_string();
        let key = component.clone();
        transfer.push(key, async move {
            let data = store.get(&path).await?;
            tracing::debug!(item = %component, path = %path, bytes = data.len(), "read component");
            ComponentPayload::decode(&component, &data)
        });
    }
}

/// Copies the manifest-level fields into `state`.
fn apply_header(state: &mut ClusterState, manifest: &Manifest) {
    state.version = manifest.state_version;
    state.state_uuid.clone_from(&manifest.state_uuid);
    state.metadata.version = manifest.metadata_version;
    state.metadata.cluster_uuid.clone_from(&manifest.cluster_uuid);
    state.metadata.cluster_uuid_committed = manifest.cluster_uuid_committed;
}

fn apply_payload(state: &mut ClusterState, payload: ComponentPayload) {
    let metadata = &mut state.metadata;
    match payload {
        ComponentPayload::Coordination(c) => metadata.coordination = c,
        ComponentPayload::PersistentSettings(s) => metadata.persistent_settings = s,
        ComponentPayload::TransientSettings(s) => metadata.transient_settings = s,
        ComponentPayload::Templates(t) => metadata.templates = t,
        ComponentPayload::HashesOfConsistentSettings(h) => {
            metadata.hashes_of_consistent_settings = h;
        }
        ComponentPayload::Nodes(n) => state.nodes = n,
        ComponentPayload::Blocks(b) => state.blocks = b,
        ComponentPayload::Index(index) => {
            metadata.indices.insert(index.name.clone(), index);
        }
        ComponentPayload::IndexRouting(routing) => {
            state
                .routing_table
                .indices
                .insert(routing.index_name.clone(), routing);
        }
        ComponentPayload::MetadataCustom(key, custom) => {
            metadata.customs.insert(key, custom);
        }
        ComponentPayload::ClusterStateCustom(key, value) => {
            state.customs.insert(key, value);
        }
        ComponentPayload::RoutingDiff(diff) => {
            state.routing_table = diff.apply(&state.routing_table);
        }
        ComponentPayload::LegacyGlobalMetadata(legacy) => {
            metadata.coordination = legacy.coordination;
            metadata.persistent_settings = legacy.persistent_settings;
            metadata.templates = legacy.templates;
            metadata.customs.extend(legacy.customs);
        }
    }
}

/// [`ContentComparator`] that reads manifest content from the store.
///
/// Identical pointers are treated as identical content without reading.
#[derive(Debug, Clone)]
pub struct StoreContentComparator {
    reader: RemoteStateReader,
    timeout: Duration,
}

impl StoreContentComparator {
    /// Creates a comparator reading through `reader` with `timeout` per fan-out.
    #[must_use]
    pub const fn new(reader: RemoteStateReader, timeout: Duration) -> Self {
        Self { reader, timeout }
    }

    async fn same_indices(&self, manifest: &Manifest, previous: &Manifest) -> Result<bool> {
        if manifest.indices == previous.indices {
            return Ok(true);
        }
        let names = |m: &Manifest| -> BTreeSet<String> {
            m.indices.iter().map(|p| p.index_name.clone()).collect()
        };
        if names(manifest) != names(previous) {
            return Ok(false);
        }
        let (current, before) = futures::try_join!(
            self.reader.index_metadata(manifest, self.timeout),
            self.reader.index_metadata(previous, self.timeout),
        )?;
        Ok(current == before)
    }

    async fn same_global(&self, manifest: &Manifest, previous: &Manifest) -> Result<bool> {
        let pointers = |m: &Manifest| {
            (
                m.categories
                    .get(&SingletonCategory::PersistentSettings)
                    .cloned(),
                m.categories.get(&SingletonCategory::Templates).cloned(),
                m.customs.clone(),
                m.global_metadata.clone(),
            )
        };
        if pointers(manifest) == pointers(previous) {
            return Ok(true);
        }
        let (current, before) = futures::try_join!(
            self.reader.global_content(manifest, self.timeout),
            self.reader.global_content(previous, self.timeout),
        )?;
        Ok(current == before)
    }
}

#[async_trait]
impl ContentComparator for StoreContentComparator {
    async fn same_content(&self, manifest: &Manifest, previous: &Manifest) -> Result<bool> {
        Ok(self.same_indices(manifest, previous).await?
            && self.same_global(manifest, previous).await?)
    }
}
