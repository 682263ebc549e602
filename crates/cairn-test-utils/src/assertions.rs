//! Custom assertion helpers for integration tests.

use cairn_core::state::ClusterState;

use crate::storage::StorageOp;

/// Asserts that storage operations contain expected `(kind, path prefix)`
/// patterns.
///
/// # Panics
///
/// Panics if expected operations are not found.
pub fn assert_storage_ops_contain(ops: &[StorageOp], expected: &[(&str, &str)]) {
    for (op_type, path_prefix) in expected {
        let found = ops
            .iter()
            .any(|op| op.kind() == *op_type && op.path().starts_with(path_prefix));
        assert!(
            found,
            "Expected {op_type} operation on path starting with '{path_prefix}', not found in {ops:?}",
        );
    }
}

/// Asserts that no storage operation of `kind` touched a given path prefix.
///
/// # Panics
///
/// Panics if any matching operation accessed the given prefix.
pub fn assert_storage_ops_exclude(ops: &[StorageOp], kind: &str, forbidden_prefix: &str) {
    for op in ops.iter().filter(|op| op.kind() == kind) {
        assert!(
            !op.path().starts_with(forbidden_prefix),
            "{kind} on forbidden path: {} (prefix: {forbidden_prefix})",
            op.path(),
        );
    }
}

/// Asserts that two states agree on every durable category.
///
/// Ephemeral content (nodes, blocks, routing, transient settings,
/// cluster-state customs, non-persistent metadata customs) is ignored.
///
/// # Panics
///
/// Panics on the first durable category that differs.
pub fn assert_durable_state_eq(actual: &ClusterState, expected: &ClusterState) {
    assert_eq!(actual.cluster_name, expected.cluster_name, "cluster name");
    assert_eq!(actual.version, expected.version, "state version");
    assert_eq!(
        actual.metadata.cluster_uuid, expected.metadata.cluster_uuid,
        "cluster uuid"
    );
    assert_eq!(
        actual.metadata.coordination, expected.metadata.coordination,
        "coordination"
    );
    assert_eq!(
        actual.metadata.persistent_settings, expected.metadata.persistent_settings,
        "persistent settings"
    );
    assert_eq!(
        actual.metadata.templates, expected.metadata.templates,
        "templates"
    );
    assert_eq!(
        actual.metadata.durable_customs(),
        expected.metadata.durable_customs(),
        "durable customs"
    );
    assert_eq!(actual.metadata.indices, expected.metadata.indices, "indices");
}
