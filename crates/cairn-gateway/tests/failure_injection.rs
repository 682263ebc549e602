//! Failure injection tests for the parallel upload and read paths.
//!
//! # Invariants Tested
//!
//! 1. **No partial publish**: if any upload fails or hangs, no manifest is
//!    written and the previous committed state stays the latest
//! 2. **Precise attribution**: the error names exactly the items that did not
//!    complete
//! 3. **Bounded writes**: a hung manifest upload fails the write within the
//!    write timeout instead of blocking it
//! 4. **No partial reads**: a read that cannot fetch every component returns
//!    an error, never a partial state

#![allow(clippy::unwrap_used, clippy::expect_used, clippy::panic)]

use std::time::Duration;

use cairn_core::UNKNOWN_UUID;
use cairn_gateway::naming::ClusterPaths;
use cairn_gateway::{
    RemoteStateConfig, RemoteStateCoordinator, RemoteStateError, RemoteStateSettings,
    TransferFailure,
};
use cairn_test_utils::{ClusterStateFactory, TestContext, sample_state};

fn coordinator(ctx: &TestContext) -> RemoteStateCoordinator {
    RemoteStateCoordinator::new(
        ctx.store.clone(),
        RemoteStateConfig::enabled(&ctx.base_path),
        "node-1",
    )
    .expect("coordinator")
}

fn transfer_failure(err: RemoteStateError) -> TransferFailure {
    match err {
        RemoteStateError::Transfer(failure) => failure,
        other => panic!("expected transfer failure, got {other:?}"),
    }
}

#[tokio::test(start_paused = true)]
async fn hung_upload_times_out_naming_the_item() {
    let ctx = TestContext::new();
    let coordinator = coordinator(&ctx);
    let state = sample_state(&ctx.cluster_name);
    let paths = ClusterPaths::new(&ctx.base_path, &ctx.cluster_name);
    ctx.store
        .inject_hang(paths.index_dir(state.cluster_uuid(), "logs-uuid"));

    let err = coordinator
        .write_full(&state, UNKNOWN_UUID)
        .await
        .expect_err("upload hangs");
    let failure = transfer_failure(err);

    assert!(failure.timed_out);
    assert_eq!(failure.incomplete, vec!["index:logs".to_string()]);
    assert!(failure.names("index:logs"));
    assert!(!failure.names("index:metrics"));
    assert!(failure.to_string().contains("index:logs"));

    let manifests = ctx
        .store
        .paths_under(&paths.manifest_dir(state.cluster_uuid()))
        .await;
    assert!(manifests.is_empty());
}

#[tokio::test(start_paused = true)]
async fn write_timeout_follows_dynamic_settings() {
    let ctx = TestContext::new();
    let coordinator = coordinator(&ctx);
    coordinator
        .update_settings(RemoteStateSettings {
            write_timeout_ms: 500,
            ..RemoteStateSettings::default()
        })
        .expect("valid settings");
    let state = sample_state(&ctx.cluster_name);
    let paths = ClusterPaths::new(&ctx.base_path, &ctx.cluster_name);
    ctx.store
        .inject_hang(paths.global_metadata_dir(state.cluster_uuid()));

    let started = tokio::time::Instant::now();
    let err = coordinator
        .write_full(&state, UNKNOWN_UUID)
        .await
        .expect_err("uploads hang");
    assert!(started.elapsed() < Duration::from_secs(1));

    let failure = transfer_failure(err);
    assert!(failure.timed_out);
    // Every durable singleton and metadata custom lives in the hung directory.
    for item in ["singleton:coordination", "singleton:templates", "customs:repositories"] {
        assert!(failure.names(item), "{item} should be incomplete: {failure}");
    }
    assert!(!failure.names("singleton:nodes"));
}

#[tokio::test(start_paused = true)]
async fn hung_manifest_upload_times_out_naming_the_manifest() {
    let ctx = TestContext::new();
    let coordinator = coordinator(&ctx);
    let state = sample_state(&ctx.cluster_name);
    let paths = ClusterPaths::new(&ctx.base_path, &ctx.cluster_name);
    ctx.store.inject_hang(paths.manifest_dir(state.cluster_uuid()));

    let started = tokio::time::Instant::now();
    let err = coordinator
        .write_full(&state, UNKNOWN_UUID)
        .await
        .expect_err("manifest upload hangs");
    assert!(started.elapsed() <= coordinator.settings().write_timeout());

    let failure = transfer_failure(err);
    assert!(failure.timed_out);
    assert_eq!(failure.operation, "publish");
    assert_eq!(failure.incomplete, vec!["manifest".to_string()]);

    // Component uploads finished; only the manifest is missing.
    assert_eq!(ctx.store.count_puts(&paths.index_dir(state.cluster_uuid(), "logs-uuid")), 1);
    assert!(
        ctx.store
            .paths_under(&paths.manifest_dir(state.cluster_uuid()))
            .await
            .is_empty()
    );
}

#[tokio::test(start_paused = true)]
async fn hung_commit_times_out_naming_the_manifest() {
    let ctx = TestContext::new();
    let coordinator = coordinator(&ctx);
    let state = sample_state(&ctx.cluster_name);
    let written = coordinator
        .write_full(&state, UNKNOWN_UUID)
        .await
        .expect("write")
        .expect("leader");

    let paths = ClusterPaths::new(&ctx.base_path, &ctx.cluster_name);
    ctx.store.inject_hang(paths.manifest_dir(state.cluster_uuid()));

    let err = coordinator
        .mark_committed(&state, &written.manifest)
        .await
        .expect_err("commit hangs");
    let failure = transfer_failure(err);
    assert!(failure.timed_out);
    assert!(failure.names("manifest"));

    ctx.store.clear_faults();
    let latest = coordinator
        .get_latest_manifest(&ctx.cluster_name, state.cluster_uuid())
        .await
        .expect("query");
    assert!(latest.is_none(), "the commit never landed");
}

#[tokio::test]
async fn failed_incremental_upload_keeps_previous_state_latest() {
    let ctx = TestContext::new();
    let coordinator = coordinator(&ctx);
    let previous = sample_state(&ctx.cluster_name);
    let written = coordinator
        .write_full(&previous, UNKNOWN_UUID)
        .await
        .expect("write")
        .expect("leader");
    let committed = coordinator
        .mark_committed(&previous, &written.manifest)
        .await
        .expect("commit")
        .expect("leader");

    let paths = ClusterPaths::new(&ctx.base_path, &ctx.cluster_name);
    let uuid = previous.cluster_uuid().to_string();
    ctx.store.inject_failure(paths.index_dir(&uuid, "logs-uuid"));

    let next = ClusterStateFactory::next(&previous)
        .bump_index("logs")
        .bump_index("metrics")
        .build();
    let err = coordinator
        .write_incremental(&previous, &next, &committed.manifest)
        .await
        .expect_err("logs upload fails");
    let failure = transfer_failure(err);
    assert!(!failure.timed_out);
    assert_eq!(failure.incomplete, vec!["index:logs".to_string()]);
    assert_eq!(failure.causes.len(), 1);

    ctx.store.clear_faults();
    let latest = coordinator
        .get_latest_manifest(&ctx.cluster_name, &uuid)
        .await
        .expect("query")
        .expect("still committed");
    assert_eq!(latest.state_uuid, previous.state_uuid);
    let manifests = ctx.store.paths_under(&paths.manifest_dir(&uuid)).await;
    assert_eq!(manifests.len(), 2, "only the full write and its commit");
}

#[tokio::test]
async fn failed_component_read_returns_no_state() {
    let ctx = TestContext::new();
    let coordinator = coordinator(&ctx);
    let state = sample_state(&ctx.cluster_name);
    let written = coordinator
        .write_full(&state, UNKNOWN_UUID)
        .await
        .expect("write")
        .expect("leader");
    coordinator
        .mark_committed(&state, &written.manifest)
        .await
        .expect("commit");

    let paths = ClusterPaths::new(&ctx.base_path, &ctx.cluster_name);
    ctx.store
        .inject_failure(paths.routing_dir(state.cluster_uuid(), "metrics-uuid"));

    let err = coordinator
        .get_latest_state(&ctx.cluster_name, state.cluster_uuid(), true)
        .await
        .expect_err("routing read fails");
    let failure = transfer_failure(err);
    assert_eq!(failure.operation, "read");
    assert_eq!(failure.incomplete, vec!["routing:metrics".to_string()]);

    // Routing is ephemeral, so a durable read does not touch it.
    let durable = coordinator
        .get_latest_state(&ctx.cluster_name, state.cluster_uuid(), false)
        .await
        .expect("durable read");
    assert_eq!(durable.metadata.indices, state.metadata.indices);
}
