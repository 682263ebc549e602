//! Manifest builder.
//!
//! Assembles a new [`Manifest`] from two sources: the tagged outcomes of the
//! upload fan-out, and pointers carried unchanged from the previous manifest
//! for every component the diff did not touch. A pointer in the result is
//! always one or the other; nothing is recomputed speculatively.

use std::collections::BTreeMap;

use cairn_core::state::{ClusterState, UNKNOWN_UUID};

use crate::component::{Component, CustomKind, SingletonCategory, UploadOutcome};
use crate::diff::StateDiff;
use crate::error::{RemoteStateError, Result};
use crate::manifest::{BlobPointer, CodecVersion, IndexPointer, Manifest};

/// Builds the manifest of one write.
#[derive(Debug)]
pub struct ManifestBuilder<'a> {
    state: &'a ClusterState,
    diff: &'a StateDiff,
    previous: Option<&'a Manifest>,
    previous_cluster_uuid: String,
    from_state_uuid: String,
    node_id: String,
}

impl<'a> ManifestBuilder<'a> {
    /// Creates a builder for `state` whose uploads were computed by `diff`.
    #[must_use]
    pub fn new(state: &'a ClusterState, diff: &'a StateDiff) -> Self {
        Self {
            state,
            diff,
            previous: None,
            previous_cluster_uuid: UNKNOWN_UUID.to_string(),
            from_state_uuid: UNKNOWN_UUID.to_string(),
            node_id: String::new(),
        }
    }

    /// Sets the manifest whose untouched pointers are carried over.
    #[must_use]
    pub fn with_previous(mut self, previous: &'a Manifest, from_state_uuid: &str) -> Self {
        self.previous = Some(previous);
        self.previous_cluster_uuid
            .clone_from(&previous.previous_cluster_uuid);
        self.from_state_uuid = from_state_uuid.to_string();
        self
    }

    /// Sets the cluster UUID this cluster was bootstrapped from.
    #[must_use]
    pub fn with_previous_cluster_uuid(mut self, uuid: impl Into<String>) -> Self {
        self.previous_cluster_uuid = uuid.into();
        self
    }

    /// Sets the writing node.
    #[must_use]
    pub fn with_node_id(mut self, node_id: impl Into<String>) -> Self {
        self.node_id = node_id.into();
        self
    }

    /// Builds the uncommitted manifest.
    ///
    /// `dispatched` is the number of items handed to the transfer
    /// coordinator; every one of them must be accounted for in `results`.
    ///
    /// # Errors
    ///
    /// Returns [`RemoteStateError::InvariantViolation`] if the result count
    /// does not match, if an outcome does not belong to its item, or if a
    /// component of the state ends up without a pointer.
    pub fn build(
        self,
        dispatched: usize,
        results: Vec<(Component, UploadOutcome)>,
    ) -> Result<Manifest> {
        if results.len() != dispatched {
            return Err(RemoteStateError::invariant(format!(
                "upload result count {} does not match dispatched item count {dispatched}",
                results.len()
            )));
        }

        let mut slots = Slots::carried(self.previous, self.diff);
        let mut routing_diff_path = None;

        for (component, outcome) in results {
            if outcome.component() != component {
                return Err(RemoteStateError::invariant(format!(
                    "unknown component in upload result: item {component} reported {}",
                    outcome.component()
                )));
            }
            match outcome {
                UploadOutcome::Singleton(category, pointer) => {
                    slots.categories.insert(category, pointer);
                }
                UploadOutcome::Index(pointer) => {
                    slots.indices.insert(pointer.index_name.clone(), pointer);
                }
                UploadOutcome::IndexRouting(pointer) => {
                    slots.routing.insert(pointer.index_name.clone(), pointer);
                }
                UploadOutcome::Custom(CustomKind::Metadata, key, pointer) => {
                    slots.customs.insert(key, pointer);
                }
                UploadOutcome::Custom(CustomKind::ClusterState, key, pointer) => {
                    slots.cluster_state_customs.insert(key, pointer);
                }
                UploadOutcome::RoutingDiff(pointer) => routing_diff_path = Some(pointer.blob_name),
                UploadOutcome::Listener(_) => {}
            }
        }

        slots.check_complete(self.state)?;

        let state = self.state;
        Ok(Manifest {
            codec_version: CodecVersion::CURRENT,
            term: state.term(),
            state_version: state.version,
            state_uuid: state.state_uuid.clone(),
            cluster_uuid: state.cluster_uuid().to_string(),
            previous_cluster_uuid: self.previous_cluster_uuid,
            cluster_uuid_committed: state.metadata.cluster_uuid_committed,
            committed: false,
            node_id: self.node_id,
            metadata_version: state.metadata.version,
            routing_table_version: state.routing_table.version,
            categories: slots.categories,
            indices: slots.indices.into_values().collect(),
            indices_routing: slots.routing.into_values().collect(),
            customs: slots.customs,
            cluster_state_customs: slots.cluster_state_customs,
            global_metadata: None,
            diff_manifest: Some(self.diff.to_diff_manifest(
                &self.from_state_uuid,
                &state.state_uuid,
                routing_diff_path,
            )),
        })
    }

    /// Returns `previous` republished as committed for `state`.
    ///
    /// Every pointer, the diff manifest and the previous cluster UUID are
    /// kept; term and version come from `state`.
    #[must_use]
    pub fn committed(previous: &Manifest, state: &ClusterState) -> Manifest {
        Manifest {
            term: state.term(),
            state_version: state.version,
            state_uuid: state.state_uuid.clone(),
            cluster_uuid: state.cluster_uuid().to_string(),
            cluster_uuid_committed: state.metadata.cluster_uuid_committed,
            committed: true,
            ..previous.clone()
        }
    }
}

/// Pointer slots of the manifest under construction.
#[derive(Default)]
struct Slots {
    categories: BTreeMap<SingletonCategory, BlobPointer>,
    indices: BTreeMap<String, IndexPointer>,
    routing: BTreeMap<String, IndexPointer>,
    customs: BTreeMap<String, BlobPointer>,
    cluster_state_customs: BTreeMap<String, BlobPointer>,
}

impl Slots {
    /// Pointers of `previous` that survive `diff`.
    fn carried(previous: Option<&Manifest>, diff: &StateDiff) -> Self {
        let Some(previous) = previous else {
            return Self::default();
        };

        let split = previous.codec_version.splits_global_metadata();
        let mut slots = Self {
            indices: carry_indices(&previous.indices, |name| {
                !diff.indices_deleted.iter().any(|d| d == name)
            }),
            routing: carry_indices(&previous.indices_routing, |name| {
                !diff.routing.indices.deletes.contains(name)
            }),
            ..Self::default()
        };
        if split {
            slots.categories.clone_from(&previous.categories);
            slots.customs = previous
                .customs
                .iter()
                .filter(|(key, _)| !diff.customs.deletes.contains(*key))
                .map(|(key, pointer)| (key.clone(), pointer.clone()))
                .collect();
            slots.cluster_state_customs = previous
                .cluster_state_customs
                .iter()
                .filter(|(key, _)| !diff.cluster_state_customs.deletes.contains(*key))
                .map(|(key, pointer)| (key.clone(), pointer.clone()))
                .collect();
        }
        slots
    }

    fn check_complete(&self, state: &ClusterState) -> Result<()> {
        let missing = |what: &str, key: &str| {
            Err(RemoteStateError::invariant(format!(
                "manifest has no pointer for {what} {key}"
            )))
        };

        for category in SingletonCategory::ALL {
            if !self.categories.contains_key(&category) {
                return missing("category", category.name());
            }
        }
        for name in state.metadata.indices.keys() {
            if !self.indices.contains_key(name) {
                return missing("index", name);
            }
        }
        for name in state.routing_table.indices.keys() {
            if !self.routing.contains_key(name) {
                return missing("index routing", name);
            }
        }
        for key in state.metadata.customs.keys() {
            if !self.customs.contains_key(key) {
                return missing("custom", key);
            }
        }
        for key in state.customs.keys() {
            if !self.cluster_state_customs.contains_key(key) {
                return missing("cluster-state custom", key);
            }
        }
        Ok(())
    }
}

fn carry_indices(
    pointers: &[IndexPointer],
    keep: impl Fn(&str) -> bool,
) -> BTreeMap<String, IndexPointer> {
    pointers
        .iter()
        .filter(|p| keep(p.index_name.as_str()))
        .map(|p| (p.index_name.clone(), p.clone()))
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::diff::DiffEngine;
    use cairn_core::state::IndexMetadata;

    fn outcome_for(component: &Component) -> UploadOutcome {
        let blob = format!("blob/{component}");
        match component {
            Component::Singleton(c) => UploadOutcome::Singleton(*c, BlobPointer::new(c.name(), blob)),
            Component::Index(name) => UploadOutcome::Index(IndexPointer {
                index_name: name.clone(),
                index_uuid: format!("{name}-u"),
                blob_name: blob,
            }),
            Component::IndexRouting(name) => UploadOutcome::IndexRouting(IndexPointer {
                index_name: name.clone(),
                index_uuid: format!("{name}-u"),
                blob_name: blob,
            }),
            Component::Custom(kind, key) => {
                UploadOutcome::Custom(*kind, key.clone(), BlobPointer::new(key, blob))
            }
            Component::RoutingDiff => UploadOutcome::RoutingDiff(BlobPointer::new("diff", blob)),
            Component::Listener(name) => UploadOutcome::Listener(name.clone()),
            Component::LegacyGlobalMetadata | Component::Manifest => unreachable!("never uploaded"),
        }
    }

    fn full_results(state: &ClusterState) -> (StateDiff, Vec<(Component, UploadOutcome)>) {
        let diff = DiffEngine::full(state);
        let mut components: Vec<Component> = diff
            .singletons
            .iter()
            .map(|c| Component::Singleton(*c))
            .collect();
        components.extend(
            diff.indices_to_upload
                .iter()
                .map(|c| Component::Index(c.name.clone())),
        );
        components.extend(
            diff.routing
                .indices
                .upserts
                .keys()
                .map(|k| Component::IndexRouting(k.clone())),
        );
        let results = components
            .iter()
            .map(|c| (c.clone(), outcome_for(c)))
            .collect();
        (diff, results)
    }

    fn state() -> ClusterState {
        let mut state = ClusterState::empty("c1");
        state.state_uuid = "s1".into();
        state.metadata.cluster_uuid = "cu".into();
        state
            .metadata
            .indices
            .insert("logs".into(), IndexMetadata::new("logs", "logs-u"));
        state
    }

    #[test]
    fn test_build_full_manifest() {
        let state = state();
        let (diff, results) = full_results(&state);
        let count = results.len();

        let manifest = ManifestBuilder::new(&state, &diff)
            .with_previous_cluster_uuid("prev")
            .with_node_id("n1")
            .build(count, results)
            .expect("build");

        assert!(!manifest.committed);
        assert_eq!(manifest.codec_version, CodecVersion::CURRENT);
        assert_eq!(manifest.previous_cluster_uuid, "prev");
        assert_eq!(manifest.cluster_uuid, "cu");
        assert_eq!(manifest.categories.len(), SingletonCategory::ALL.len());
        assert_eq!(manifest.indices.len(), 1);
        assert_eq!(
            manifest.diff_manifest.as_ref().map(|d| d.from_state_uuid.as_str()),
            Some(UNKNOWN_UUID)
        );
    }

    #[test]
    fn test_result_count_mismatch_is_fatal() {
        let state = state();
        let (diff, mut results) = full_results(&state);
        let dispatched = results.len();
        results.pop();

        let err = ManifestBuilder::new(&state, &diff)
            .build(dispatched, results)
            .expect_err("count mismatch");
        assert!(matches!(err, RemoteStateError::InvariantViolation { .. }));
    }

    #[test]
    fn test_mismatched_outcome_is_unknown_component() {
        let state = state();
        let (diff, mut results) = full_results(&state);
        let count = results.len();
        results[0].1 = UploadOutcome::Listener("stray".into());

        let err = ManifestBuilder::new(&state, &diff)
            .build(count, results)
            .expect_err("unknown component");
        assert!(err.to_string().contains("unknown component"));
    }

    #[test]
    fn test_incremental_carries_untouched_pointers() {
        let previous_state = state();
        let (diff, results) = full_results(&previous_state);
        let count = results.len();
        let previous = ManifestBuilder::new(&previous_state, &diff)
            .build(count, results)
            .expect("build");

        let mut current = previous_state.clone();
        current.state_uuid = "s2".into();
        current.version = 2;
        let diff = DiffEngine::incremental(&previous_state, &current, &previous);
        assert!(diff.is_empty());

        let manifest = ManifestBuilder::new(&current, &diff)
            .with_previous(&previous, &previous_state.state_uuid)
            .build(0, Vec::new())
            .expect("build");
        assert_eq!(manifest.categories, previous.categories);
        assert_eq!(manifest.indices, previous.indices);
        assert_eq!(manifest.indices_routing, previous.indices_routing);
        assert_eq!(manifest.state_version, 2);
    }

    #[test]
    fn test_missing_pointer_is_fatal() {
        let state = state();
        let (diff, results) = full_results(&state);
        let results: Vec<_> = results
            .into_iter()
            .filter(|(c, _)| !matches!(c, Component::Index(_)))
            .collect();
        let count = results.len();

        let err = ManifestBuilder::new(&state, &diff)
            .build(count, results)
            .expect_err("index pointer missing");
        assert!(err.to_string().contains("index logs"));
    }

    #[test]
    fn test_committed_keeps_pointers() {
        let state = state();
        let (diff, results) = full_results(&state);
        let count = results.len();
        let manifest = ManifestBuilder::new(&state, &diff)
            .build(count, results)
            .expect("build");

        let committed = ManifestBuilder::committed(&manifest, &state);
        assert!(committed.committed);
        assert_eq!(committed.indices, manifest.indices);
        assert_eq!(committed.diff_manifest, manifest.diff_manifest);
    }
}
