//! Stale state cleanup against a real write history.

#![allow(clippy::unwrap_used, clippy::expect_used)]

use std::collections::BTreeSet;
use std::sync::Arc;
use std::time::Duration;

use cairn_core::UNKNOWN_UUID;
use cairn_core::state::ClusterState;
use cairn_gateway::gc::{CleanupScheduler, RetentionCleaner, StaleStateCleanup};
use cairn_gateway::naming::ClusterPaths;
use cairn_gateway::{Manifest, RemoteStateConfig, RemoteStateCoordinator, RemoteStateSettings};
use cairn_test_utils::{ClusterStateFactory, TestContext, sample_state};

fn coordinator(ctx: &TestContext) -> RemoteStateCoordinator {
    RemoteStateCoordinator::new(
        ctx.store.clone(),
        RemoteStateConfig::enabled(&ctx.base_path),
        "node-1",
    )
    .expect("coordinator")
}

/// Writes a full state and then `updates` incremental states, each bumping
/// the `logs` index and committing. Returns the last state.
async fn write_history(
    coordinator: &RemoteStateCoordinator,
    ctx: &TestContext,
    updates: usize,
) -> ClusterState {
    let mut state = sample_state(&ctx.cluster_name);
    let written = coordinator
        .write_full(&state, UNKNOWN_UUID)
        .await
        .expect("write")
        .expect("leader");
    let mut manifest: Manifest = coordinator
        .mark_committed(&state, &written.manifest)
        .await
        .expect("commit")
        .expect("leader")
        .manifest;

    for _ in 0..updates {
        let next = ClusterStateFactory::next(&state).bump_index("logs").build();
        let written = coordinator
            .write_incremental(&state, &next, &manifest)
            .await
            .expect("write")
            .expect("leader");
        manifest = coordinator
            .mark_committed(&next, &written.manifest)
            .await
            .expect("commit")
            .expect("leader")
            .manifest;
        state = next;
    }
    state
}

fn settings(retention_count: usize) -> RemoteStateSettings {
    RemoteStateSettings {
        retention_count,
        ..RemoteStateSettings::default()
    }
}

#[tokio::test]
async fn cleanup_keeps_retained_manifests_and_their_blobs() {
    let ctx = TestContext::new();
    let coordinator = coordinator(&ctx);
    let latest = write_history(&coordinator, &ctx, 5).await;
    let uuid = latest.cluster_uuid().to_string();
    let paths = ClusterPaths::new(&ctx.base_path, &ctx.cluster_name);
    assert_eq!(ctx.store.paths_under(&paths.manifest_dir(&uuid)).await.len(), 12);

    let cleaner = RetentionCleaner::new(ctx.store.clone(), &ctx.base_path, &ctx.cluster_name);
    let result = cleaner.cleanup(&settings(3)).await.expect("cleanup");

    assert!(!result.has_errors(), "{:?}", result.errors);
    assert_eq!(result.cluster_uuids_visited, 1);
    assert_eq!(result.manifests_deleted, 9);
    // Versions 1 through 4 of the logs index are only referenced by stale
    // manifests; everything else is shared with the retained ones.
    assert_eq!(result.blobs_deleted, 4);
    assert_eq!(
        ctx.store
            .paths_under(&paths.index_dir(&uuid, "logs-uuid"))
            .await
            .len(),
        2
    );
    assert_eq!(ctx.store.paths_under(&paths.manifest_dir(&uuid)).await.len(), 3);

    let restored = coordinator
        .get_latest_state(&ctx.cluster_name, &uuid, true)
        .await
        .expect("latest state survives cleanup");
    assert_eq!(restored, latest);
}

#[tokio::test]
async fn cleanup_never_deletes_referenced_blobs() {
    let ctx = TestContext::new();
    let coordinator = coordinator(&ctx);
    let latest = write_history(&coordinator, &ctx, 4).await;
    let uuid = latest.cluster_uuid().to_string();
    let paths = ClusterPaths::new(&ctx.base_path, &ctx.cluster_name);

    let cleaner = RetentionCleaner::new(ctx.store.clone(), &ctx.base_path, &ctx.cluster_name);
    cleaner.cleanup(&settings(1)).await.expect("cleanup");

    let remaining: BTreeSet<String> = ctx.store.paths().await.into_iter().collect();
    for path in ctx.store.paths_under(&paths.manifest_dir(&uuid)).await {
        let manifest = coordinator.reader().read_manifest(&path).await.expect("read");
        for blob in manifest.referenced_blobs() {
            assert!(remaining.contains(blob), "dangling pointer to {blob}");
        }
    }
}

#[tokio::test]
async fn cleanup_within_retention_deletes_nothing() {
    let ctx = TestContext::new();
    let coordinator = coordinator(&ctx);
    write_history(&coordinator, &ctx, 2).await;
    let before = ctx.store.paths().await;

    let cleaner = RetentionCleaner::new(ctx.store.clone(), &ctx.base_path, &ctx.cluster_name);
    let result = cleaner.cleanup(&settings(10)).await.expect("cleanup");

    assert_eq!(result.objects_deleted(), 0);
    assert_eq!(ctx.store.paths().await, before);
}

#[tokio::test(start_paused = true)]
async fn scheduler_runs_cleanup_with_live_settings() {
    let ctx = TestContext::new();
    let coordinator = coordinator(&ctx);
    let latest = write_history(&coordinator, &ctx, 3).await;
    let paths = ClusterPaths::new(&ctx.base_path, &ctx.cluster_name);
    let manifest_dir = paths.manifest_dir(latest.cluster_uuid());

    coordinator
        .update_settings(RemoteStateSettings {
            cleanup_interval_secs: 60,
            ..settings(2)
        })
        .expect("valid settings");
    let cleaner = Arc::new(RetentionCleaner::new(
        ctx.store.clone(),
        &ctx.base_path,
        &ctx.cluster_name,
    ));
    let handle = CleanupScheduler::new(cleaner, coordinator.subscribe_settings()).spawn();

    tokio::time::sleep(Duration::from_secs(30)).await;
    assert_eq!(ctx.store.paths_under(&manifest_dir).await.len(), 8);

    tokio::time::sleep(Duration::from_secs(60)).await;
    assert_eq!(ctx.store.paths_under(&manifest_dir).await.len(), 2);

    handle.shutdown().await;
}
