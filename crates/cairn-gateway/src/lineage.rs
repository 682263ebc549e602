//! Cluster lineage resolution.
//!
//! Each cluster UUID records the UUID it was bootstrapped from, forming a
//! forest over every committed manifest in the store. Normally that forest is
//! a single chain. When two nodes raced for leadership it forks: two UUIDs
//! name the same previous UUID. A fork whose content equals its previous
//! added nothing and is dropped; any other fork is surfaced as
//! [`RemoteStateError::AmbiguousLineage`] and never guessed.

use std::collections::{BTreeMap, BTreeSet};

use async_trait::async_trait;

use cairn_core::state::UNKNOWN_UUID;

use crate::error::{RemoteStateError, Result};
use crate::manifest::Manifest;

/// Compares the durable content of two manifests.
#[async_trait]
pub trait ContentComparator: Send + Sync {
    /// Returns true if `manifest` describes the same indices and global
    /// metadata as `previous`.
    ///
    /// # Errors
    ///
    /// Returns an error if either manifest's content cannot be read.
    async fn same_content(&self, manifest: &Manifest, previous: &Manifest) -> Result<bool>;
}

/// Cluster UUIDs not named as anyone's previous cluster UUID.
#[must_use]
pub fn heads(manifests: &BTreeMap<String, Manifest>) -> BTreeSet<String> {
    let referenced: BTreeSet<&str> = manifests
        .values()
        .map(|m| m.previous_cluster_uuid.as_str())
        .collect();
    manifests
        .keys()
        .filter(|uuid| !referenced.contains(uuid.as_str()))
        .cloned()
        .collect()
}

/// Walks previous-UUID links from `head`, head first.
///
/// Stops at [`UNKNOWN_UUID`], or after a UUID that is referenced but has no
/// manifest (that UUID is still included).
///
/// # Errors
///
/// Returns [`RemoteStateError::InvariantViolation`] if the walk revisits a
/// UUID.
pub fn walk(head: &str, manifests: &BTreeMap<String, Manifest>) -> Result<Vec<String>> {
    let mut chain = Vec::new();
    let mut seen = BTreeSet::new();
    let mut current = head.to_string();

    while current != UNKNOWN_UUID {
        if !seen.insert(current.clone()) {
            return Err(RemoteStateError::invariant(format!(
                "cycle in cluster UUID lineage at {current}"
            )));
        }
        chain.push(current.clone());
        match manifests.get(&current) {
            Some(manifest) => current.clone_from(&manifest.previous_cluster_uuid),
            None => break,
        }
    }
    Ok(chain)
}

/// Drops every head whose content equals its previous manifest's.
///
/// Returns a new candidate set; the input is not modified.
///
/// # Errors
///
/// Propagates comparator errors.
pub async fn trim_redundant_heads(
    manifests: &BTreeMap<String, Manifest>,
    head_uuids: &BTreeSet<String>,
    comparator: &dyn ContentComparator,
) -> Result<BTreeMap<String, Manifest>> {
    let mut trimmed = manifests.clone();
    for uuid in head_uuids {
        let Some(manifest) = manifests.get(uuid) else {
            continue;
        };
        if manifest.previous_cluster_uuid == UNKNOWN_UUID {
            continue;
        }
        let Some(previous) = manifests.get(&manifest.previous_cluster_uuid) else {
            continue;
        };
        if comparator.same_content(manifest, previous).await? {
            tracing::info!(
                cluster_uuid = %uuid,
                previous_cluster_uuid = %manifest.previous_cluster_uuid,
                "dropping redundant lineage head"
            );
            trimmed.remove(uuid);
        }
    }
    Ok(trimmed)
}

/// Resolves the single valid lineage, most recent first.
///
/// `manifests` maps each cluster UUID to its latest manifest; uncommitted
/// manifests are ignored. Returns an empty chain if nothing is committed.
///
/// # Errors
///
/// - [`RemoteStateError::InvariantViolation`] if the graph has no head or
///   contains a cycle
/// - [`RemoteStateError::AmbiguousLineage`] if more than one head survives
///   trimming
pub async fn resolve(
    manifests: BTreeMap<String, Manifest>,
    comparator: &dyn ContentComparator,
) -> Result<Vec<String>> {
    let mut candidates: BTreeMap<String, Manifest> = manifests
        .into_iter()
        .filter(|(_, m)| m.committed)
        .collect();

    loop {
        if candidates.is_empty() {
            return Ok(Vec::new());
        }
        let head_uuids = heads(&candidates);
        match head_uuids.len() {
            0 => {
                return Err(RemoteStateError::invariant(format!(
                    "no head in cluster UUID lineage of {} manifests",
                    candidates.len()
                )));
            }
            1 => {
                let head = head_uuids.iter().next().map_or("", String::as_str);
                return walk(head, &candidates);
            }
            _ => {
                let trimmed = trim_redundant_heads(&candidates, &head_uuids, comparator).await?;
                if trimmed.len() == candidates.len() {
                    return Err(RemoteStateError::AmbiguousLineage {
                        heads: head_uuids.into_iter().collect(),
                    });
                }
                candidates = trimmed;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::manifest::CodecVersion;

    fn manifest(uuid: &str, previous: &str, content: &str) -> Manifest {
        Manifest {
            codec_version: CodecVersion::CURRENT,
            term: 1,
            state_version: 1,
            state_uuid: content.into(),
            cluster_uuid: uuid.into(),
            previous_cluster_uuid: previous.into(),
            cluster_uuid_committed: true,
            committed: true,
            node_id: "n".into(),
            metadata_version: 1,
            routing_table_version: 1,
            categories: BTreeMap::new(),
            indices: Vec::new(),
            indices_routing: Vec::new(),
            customs: BTreeMap::new(),
            cluster_state_customs: BTreeMap::new(),
            global_metadata: None,
            diff_manifest: None,
        }
    }

    /// Treats `state_uuid` as the content fingerprint.
    struct ByStateUuid;

    #[async_trait]
    impl ContentComparator for ByStateUuid {
        async fn same_content(&self, manifest: &Manifest, previous: &Manifest) -> Result<bool> {
            Ok(manifest.state_uuid == previous.state_uuid)
        }
    }

    fn set(manifests: Vec<Manifest>) -> BTreeMap<String, Manifest> {
        manifests
            .into_iter()
            .map(|m| (m.cluster_uuid.clone(), m))
            .collect()
    }

    #[tokio::test]
    async fn test_linear_chain() {
        let manifests = set(vec![
            manifest("A", "B", "a"),
            manifest("B", "C", "b"),
            manifest("C", UNKNOWN_UUID, "c"),
        ]);
        let chain = resolve(manifests, &ByStateUuid).await.expect("resolve");
        assert_eq!(chain, vec!["A", "B", "C"]);
    }

    #[tokio::test]
    async fn test_empty_and_uncommitted_resolve_to_nothing() {
        assert!(resolve(BTreeMap::new(), &ByStateUuid).await.unwrap().is_empty());

        let mut pending = manifest("A", UNKNOWN_UUID, "a");
        pending.committed = false;
        let chain = resolve(set(vec![pending]), &ByStateUuid).await.unwrap();
        assert!(chain.is_empty());
    }

    #[tokio::test]
    async fn test_redundant_fork_is_trimmed() {
        let manifests = set(vec![
            manifest("X", "P", "p"),
            manifest("Y", "P", "y"),
            manifest("P", UNKNOWN_UUID, "p"),
        ]);
        let chain = resolve(manifests, &ByStateUuid).await.expect("resolve");
        assert_eq!(chain, vec!["Y", "P"]);
    }

    #[tokio::test]
    async fn test_irreducible_fork_is_ambiguous() {
        let manifests = set(vec![
            manifest("X", "P", "x"),
            manifest("Y", "P", "y"),
            manifest("P", UNKNOWN_UUID, "p"),
        ]);
        let err = resolve(manifests, &ByStateUuid).await.expect_err("ambiguous");
        let RemoteStateError::AmbiguousLineage { heads } = err else {
            panic!("expected ambiguous lineage, got {err:?}");
        };
        assert_eq!(heads, vec!["X", "Y"]);
    }

    #[tokio::test]
    async fn test_cycle_without_head_is_invariant_violation() {
        let manifests = set(vec![manifest("A", "B", "a"), manifest("B", "A", "b")]);
        let err = resolve(manifests, &ByStateUuid).await.expect_err("cycle");
        assert!(matches!(err, RemoteStateError::InvariantViolation { .. }));
    }

    #[test]
    fn test_walk_includes_dangling_previous() {
        let manifests = set(vec![manifest("A", "GONE", "a")]);
        assert_eq!(walk("A", &manifests).unwrap(), vec!["A", "GONE"]);
    }

    #[test]
    fn test_walk_detects_revisit() {
        let manifests = set(vec![
            manifest("H", "A", "h"),
            manifest("A", "B", "a"),
            manifest("B", "A", "b"),
        ]);
        assert!(walk("H", &manifests).is_err());
    }

    #[tokio::test]
    async fn test_repeated_redundant_forks_trim_over_several_passes() {
        // Z restored from Y, which was itself a no-op restore of P.
        let manifests = set(vec![
            manifest("Z", "Y", "p"),
            manifest("Y", "P", "p"),
            manifest("W", "P", "w"),
            manifest("P", UNKNOWN_UUID, "p"),
        ]);
        let chain = resolve(manifests, &ByStateUuid).await.expect("resolve");
        assert_eq!(chain, vec!["W", "P"]);
    }
}
