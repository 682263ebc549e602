//! Diff engine: decides which components of a state must be uploaded.
//!
//! The engine compares two snapshots category by category and reports the
//! minimal work for the next manifest:
//!
//! - singleton categories are uploaded when their content changed
//! - index metadata is uploaded when the index is new or its version moved
//! - custom maps use an ordered-key map diff
//! - the routing table reports its own diff, which is consumed as is
//!
//! Anything not reported is carried over from the previous manifest by
//! pointer. A previous manifest written with a pre-split codec has no
//! per-category pointers to carry, so the first incremental write after a
//! format upgrade uploads every singleton and every map entry.

use std::collections::{BTreeMap, BTreeSet};

use cairn_core::diff::{MapDiff, StringKeyDiffProvider, diff_maps};
use cairn_core::state::{ClusterState, MetadataCustom, RoutingTable, RoutingTableDiff};

use crate::component::SingletonCategory;
use crate::manifest::{BlobPointer, DiffManifest, Manifest};

/// An index whose metadata must be uploaded.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IndexChange {
    /// Index name.
    pub name: String,
    /// Version held by the previous state, if the index existed.
    pub previous_version: Option<u64>,
}

/// Work computed by the [`DiffEngine`] for one write.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct StateDiff {
    /// The previous manifest predates per-category splitting.
    pub format_upgrade: bool,
    /// Singleton categories to upload.
    pub singletons: BTreeSet<SingletonCategory>,
    /// Indices whose metadata must be uploaded.
    pub indices_to_upload: Vec<IndexChange>,
    /// Indices whose pointers must be dropped.
    pub indices_deleted: Vec<String>,
    /// Metadata customs to upload or drop.
    pub customs: MapDiff<MetadataCustom>,
    /// Cluster-state customs to upload or drop.
    pub cluster_state_customs: MapDiff<serde_json::Value>,
    /// Index routing tables to upload or drop.
    pub routing: RoutingTableDiff,
    /// Whether the combined routing diff warrants its own blob.
    pub upload_routing_diff: bool,
}

impl StateDiff {
    /// Returns the number of blob uploads this diff dispatches.
    #[must_use]
    pub fn upload_count(&self) -> usize {
        self.singletons.len()
            + self.indices_to_upload.len()
            + self.customs.upserts.len()
            + self.cluster_state_customs.upserts.len()
            + self.routing.indices.upserts.len()
            + usize::from(self.upload_routing_diff)
    }

    /// Returns true if nothing needs to be uploaded or dropped.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.upload_count() == 0
            && self.indices_deleted.is_empty()
            && self.customs.deletes.is_empty()
            && self.cluster_state_customs.deletes.is_empty()
            && self.routing.indices.deletes.is_empty()
    }

    /// Records this diff as a [`DiffManifest`].
    #[must_use]
    pub fn to_diff_manifest(
        &self,
        from_state_uuid: &str,
        to_state_uuid: &str,
        routing_diff_path: Option<String>,
    ) -> DiffManifest {
        DiffManifest {
            from_state_uuid: from_state_uuid.to_string(),
            to_state_uuid: to_state_uuid.to_string(),
            updated_categories: self.singletons.clone(),
            indices_updated: self
                .indices_to_upload
                .iter()
                .map(|c| c.name.clone())
                .collect(),
            indices_deleted: self.indices_deleted.clone(),
            customs_updated: self.customs.upserts.keys().cloned().collect(),
            customs_deleted: self.customs.deletes.iter().cloned().collect(),
            cluster_state_customs_updated: self
                .cluster_state_customs
                .upserts
                .keys()
                .cloned()
                .collect(),
            cluster_state_customs_deleted: self
                .cluster_state_customs
                .deletes
                .iter()
                .cloned()
                .collect(),
            routing_updated: self.routing.indices.upserts.keys().cloned().collect(),
            routing_deleted: self.routing.indices.deletes.iter().cloned().collect(),
            routing_diff_path,
        }
    }
}

/// Computes [`StateDiff`]s.
#[derive(Debug, Clone, Copy, Default)]
pub struct DiffEngine;

impl DiffEngine {
    /// Diffs `state` against an empty baseline: everything is uploaded.
    #[must_use]
    pub fn full(state: &ClusterState) -> StateDiff {
        let m = &state.metadata;
        StateDiff {
            format_upgrade: false,
            singletons: SingletonCategory::ALL.into_iter().collect(),
            indices_to_upload: m
                .indices
                .keys()
                .map(|name| IndexChange {
                    name: name.clone(),
                    previous_version: None,
                })
                .collect(),
            indices_deleted: Vec::new(),
            customs: diff_maps(&BTreeMap::new(), &m.customs),
            cluster_state_customs: diff_maps(&BTreeMap::new(), &state.customs),
            routing: state.routing_table.diff_from(&RoutingTable::default()),
            upload_routing_diff: false,
        }
    }

    /// Diffs `state` against `previous_state`, whose persisted form is
    /// `previous_manifest`.
    #[must_use]
    pub fn incremental(
        previous_state: &ClusterState,
        state: &ClusterState,
        previous_manifest: &Manifest,
    ) -> StateDiff {
        let upgrade = !previous_manifest.codec_version.splits_global_metadata();
        let (prev, cur) = (&previous_state.metadata, &state.metadata);

        let singletons = SingletonCategory::ALL
            .into_iter()
            .filter(|category| {
                upgrade
                    || !previous_manifest.categories.contains_key(category)
                    || category.changed(previous_state, state)
            })
            .collect();

        let indices_to_upload = cur
            .indices
            .iter()
            .filter_map(|(name, index)| {
                let before = prev.indices.get(name);
                let unchanged = before.is_some_and(|b| {
                    b.version == index.version && b.uuid == index.uuid
                }) && previous_manifest.index_pointer(name).is_some();
                (!unchanged).then(|| IndexChange {
                    name: name.clone(),
                    previous_version: before.map(|b| b.version),
                })
            })
            .collect();

        let indices_deleted: BTreeSet<String> = prev
            .indices
            .keys()
            .chain(previous_manifest.indices.iter().map(|p| &p.index_name))
            .filter(|name| !cur.indices.contains_key(*name))
            .cloned()
            .collect();

        let customs = diff_keyed(&prev.customs, &cur.customs, &previous_manifest.customs, upgrade);
        let cluster_state_customs = diff_keyed(
            &previous_state.customs,
            &state.customs,
            &previous_manifest.cluster_state_customs,
            upgrade,
        );

        let routing_pointers: BTreeMap<String, BlobPointer> = previous_manifest
            .indices_routing
            .iter()
            .map(|p| (p.index_name.clone(), BlobPointer::new(&p.index_name, &p.blob_name)))
            .collect();
        let provided = state.routing_table.diff_from(&previous_state.routing_table);
        let routing = RoutingTableDiff {
            version: provided.version,
            indices: reconcile(
                provided.provide_diff(),
                &state.routing_table.indices,
                &routing_pointers,
                upgrade,
            ),
        };
        let upload_routing_diff = !upgrade && !routing.is_empty();

        StateDiff {
            format_upgrade: upgrade,
            singletons,
            indices_to_upload,
            indices_deleted: indices_deleted.into_iter().collect(),
            customs,
            cluster_state_customs,
            routing,
            upload_routing_diff,
        }
    }
}

/// Map diff that also re-uploads keys lacking a pointer and drops every
/// pointer whose key disappeared.
fn diff_keyed<V: Clone + PartialEq>(
    previous: &BTreeMap<String, V>,
    current: &BTreeMap<String, V>,
    pointers: &BTreeMap<String, BlobPointer>,
    force: bool,
) -> MapDiff<V> {
    reconcile(Some(&diff_maps(previous, current)), current, pointers, force)
}

/// Extends a provided diff with the keys the previous manifest cannot carry:
/// current keys without a pointer (every key when `force`) are uploaded and
/// pointers to vanished keys are dropped.
fn reconcile<V: Clone>(
    provided: Option<&MapDiff<V>>,
    current: &BTreeMap<String, V>,
    pointers: &BTreeMap<String, BlobPointer>,
    force: bool,
) -> MapDiff<V> {
    let mut diff = provided.cloned().unwrap_or_default();
    for (key, value) in current {
        if force || !pointers.contains_key(key) {
            diff.upserts
                .entry(key.clone())
                .or_insert_with(|| value.clone());
        }
    }
    diff.deletes.extend(
        pointers
            .keys()
            .filter(|key| !current.contains_key(*key))
            .cloned(),
    );
    diff
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::manifest::{CodecVersion, IndexPointer};
    use cairn_core::state::{IndexMetadata, IndexRoutingTable, Settings};

    fn state_with_indices(names: &[&str]) -> ClusterState {
        let mut state = ClusterState::empty("c1");
        state.state_uuid = "s1".into();
        for name in names {
            state
                .metadata
                .indices
                .insert((*name).to_string(), IndexMetadata::new(*name, format!("{name}-u")));
            state.routing_table.indices.insert(
                (*name).to_string(),
                IndexRoutingTable {
                    index_name: (*name).to_string(),
                    index_uuid: format!("{name}-u"),
                    shards: Vec::new(),
                },
            );
        }
        state
    }

    /// Manifest that holds a pointer for every component of `state`.
    fn manifest_for(state: &ClusterState, codec: CodecVersion) -> Manifest {
        let pointer = |n: &str| BlobPointer::new(n, format!("blob/{n}"));
        let index_pointer = |n: &String| IndexPointer {
            index_name: n.clone(),
            index_uuid: format!("{n}-u"),
            blob_name: format!("blob/{n}"),
        };
        let split = codec.splits_global_metadata();
        Manifest {
            codec_version: codec,
            term: 0,
            state_version: state.version,
            state_uuid: state.state_uuid.clone(),
            cluster_uuid: "c".into(),
            previous_cluster_uuid: "_na_".into(),
            cluster_uuid_committed: true,
            committed: true,
            node_id: "n1".into(),
            metadata_version: 0,
            routing_table_version: 0,
            categories: if split {
                SingletonCategory::ALL
                    .into_iter()
                    .map(|c| (c, pointer(c.name())))
                    .collect()
            } else {
                BTreeMap::new()
            },
            indices: state.metadata.indices.keys().map(index_pointer).collect(),
            indices_routing: if split {
                state.routing_table.indices.keys().map(index_pointer).collect()
            } else {
                Vec::new()
            },
            customs: if split {
                state.metadata.customs.keys().map(|k| (k.clone(), pointer(k))).collect()
            } else {
                BTreeMap::new()
            },
            cluster_state_customs: BTreeMap::new(),
            global_metadata: (!split).then(|| pointer("global")),
            diff_manifest: None,
        }
    }

    #[test]
    fn test_full_diff_uploads_everything() {
        let mut state = state_with_indices(&["a", "b"]);
        state
            .metadata
            .customs
            .insert("repos".into(), MetadataCustom::durable(serde_json::json!({})));

        let diff = DiffEngine::full(&state);
        assert_eq!(diff.singletons.len(), SingletonCategory::ALL.len());
        assert_eq!(diff.indices_to_upload.len(), 2);
        assert_eq!(diff.customs.upserts.len(), 1);
        assert_eq!(diff.routing.indices.upserts.len(), 2);
        assert!(!diff.upload_routing_diff);
        assert_eq!(diff.upload_count(), 7 + 2 + 1 + 2);
    }

    #[test]
    fn test_unchanged_state_yields_empty_diff() {
        let state = state_with_indices(&["a", "b", "c"]);
        let manifest = manifest_for(&state, CodecVersion::V3);

        let diff = DiffEngine::incremental(&state, &state, &manifest);
        assert!(diff.is_empty(), "{diff:?}");
    }

    #[test]
    fn test_single_index_version_bump_uploads_one_index() {
        let previous = state_with_indices(&["a", "b", "c", "d"]);
        let manifest = manifest_for(&previous, CodecVersion::V3);
        let mut current = previous.clone();
        if let Some(index) = current.metadata.indices.get_mut("c") {
            index.version += 1;
        }

        let diff = DiffEngine::incremental(&previous, &current, &manifest);
        assert_eq!(
            diff.indices_to_upload,
            vec![IndexChange {
                name: "c".into(),
                previous_version: Some(1),
            }]
        );
        assert!(diff.singletons.is_empty());
        assert_eq!(diff.upload_count(), 1);
    }

    #[test]
    fn test_removed_index_is_dropped_not_uploaded() {
        let previous = state_with_indices(&["a", "b"]);
        let manifest = manifest_for(&previous, CodecVersion::V3);
        let current = state_with_indices(&["a"]);

        let diff = DiffEngine::incremental(&previous, &current, &manifest);
        assert_eq!(diff.indices_deleted, vec!["b".to_string()]);
        assert!(diff.indices_to_upload.is_empty());
        assert!(diff.routing.indices.deletes.contains("b"));
        assert!(diff.upload_routing_diff);
    }

    #[test]
    fn test_changed_singleton_is_uploaded() {
        let previous = state_with_indices(&["a"]);
        let manifest = manifest_for(&previous, CodecVersion::V3);
        let mut current = previous.clone();
        current.metadata.persistent_settings = Settings::new().with("k", "v");

        let diff = DiffEngine::incremental(&previous, &current, &manifest);
        assert_eq!(
            diff.singletons,
            BTreeSet::from([SingletonCategory::PersistentSettings])
        );
    }

    #[test]
    fn test_format_upgrade_forces_all_singletons_and_maps() {
        let mut previous = state_with_indices(&["a"]);
        previous
            .metadata
            .customs
            .insert("repos".into(), MetadataCustom::durable(serde_json::json!(1)));
        let manifest = manifest_for(&previous, CodecVersion::V1);

        let diff = DiffEngine::incremental(&previous, &previous, &manifest);
        assert!(diff.format_upgrade);
        assert_eq!(diff.singletons.len(), SingletonCategory::ALL.len());
        assert!(diff.indices_to_upload.is_empty());
        assert_eq!(diff.customs.upserts.len(), 1);
        assert_eq!(diff.routing.indices.upserts.len(), 1);
        assert!(!diff.upload_routing_diff);
    }

    #[test]
    fn test_diff_manifest_records_changes() {
        let previous = state_with_indices(&["a", "b"]);
        let manifest = manifest_for(&previous, CodecVersion::V3);
        let mut current = state_with_indices(&["a", "n"]);
        current.state_uuid = "s2".into();

        let diff = DiffEngine::incremental(&previous, &current, &manifest);
        let record = diff.to_diff_manifest("s1", "s2", Some("p".into()));
        assert_eq!(record.indices_updated, vec!["n".to_string()]);
        assert_eq!(record.indices_deleted, vec!["b".to_string()]);
        assert_eq!(record.routing_updated, vec!["n".to_string()]);
        assert_eq!(record.routing_deleted, vec!["b".to_string()]);
        assert_eq!(record.routing_diff_path.as_deref(), Some("p"));
    }

    #[test]
    fn test_routing_change_comes_from_routing_table_diff() {
        use cairn_core::state::{ShardRouting, ShardState};

        let previous = state_with_indices(&["a", "b"]);
        let manifest = manifest_for(&previous, CodecVersion::V3);
        let mut current = previous.clone();
        current.routing_table.version += 1;
        if let Some(table) = current.routing_table.indices.get_mut("b") {
            table.shards.push(ShardRouting {
                shard_id: 0,
                primary: true,
                node_id: Some("n2".into()),
                state: ShardState::Started,
            });
        }

        let diff = DiffEngine::incremental(&previous, &current, &manifest);
        let provided = current.routing_table.diff_from(&previous.routing_table);
        assert_eq!(diff.routing, provided);
        assert_eq!(
            diff.routing.indices.upserts.keys().collect::<Vec<_>>(),
            vec!["b"]
        );
        assert!(diff.indices_to_upload.is_empty());
        assert!(diff.upload_routing_diff);
    }

    #[test]
    fn test_routing_without_pointer_is_uploaded() {
        let previous = state_with_indices(&["a", "b"]);
        let mut manifest = manifest_for(&previous, CodecVersion::V3);
        manifest.indices_routing.retain(|p| p.index_name != "a");

        let diff = DiffEngine::incremental(&previous, &previous, &manifest);
        assert_eq!(
            diff.routing.indices.upserts.keys().collect::<Vec<_>>(),
            vec!["a"]
        );
        assert!(diff.routing.indices.deletes.is_empty());
    }
}
