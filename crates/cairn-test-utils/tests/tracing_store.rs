//! Contract tests for the tracing test store.

#![allow(clippy::unwrap_used, clippy::expect_used)]

use std::time::Duration;

use bytes::Bytes;
use cairn_core::storage::BlobStore;
use cairn_test_utils::{
    StorageOp, TracingMemoryStore, assert_storage_ops_contain, init_test_logging,
};

#[tokio::test]
async fn records_operations_in_order() {
    let store = TracingMemoryStore::new();
    store.put("a/1", Bytes::from("x")).await.unwrap();
    store.get("a/1").await.unwrap();
    store.list("a/").await.unwrap();

    let ops = store.operations();
    assert_eq!(ops.len(), 3);
    assert_eq!(ops[0], StorageOp::Put { path: "a/1".into(), size: 1 });
    assert_storage_ops_contain(&ops, &[("get", "a/"), ("list", "a/")]);
    assert_eq!(store.count_puts("a/"), 1);
    assert_eq!(store.count_puts("b/"), 0);
}

#[tokio::test]
async fn injected_failure_matches_prefix() {
    let store = TracingMemoryStore::new();
    store.inject_failure("bad/");

    assert!(store.put("bad/1", Bytes::from("x")).await.is_err());
    store.put("good/1", Bytes::from("x")).await.unwrap();
    assert_eq!(store.paths().await, vec!["good/1".to_string()]);

    store.clear_faults();
    store.put("bad/1", Bytes::from("x")).await.unwrap();
}

#[tokio::test(start_paused = true)]
async fn injected_hang_never_completes() {
    let store = TracingMemoryStore::new();
    store.inject_hang("slow/");

    let put = store.put("slow/1", Bytes::from("x"));
    let outcome = tokio::time::timeout(Duration::from_secs(3600), put).await;
    assert!(outcome.is_err(), "hung put must not complete");
    assert!(store.paths().await.is_empty());
}

#[test]
fn logging_can_be_initialized_repeatedly() {
    init_test_logging();
    init_test_logging();
    tracing_subscriber::fmt().try_init().ok();
}
