//! Remote-state metrics.
//!
//! Counters and histograms for writes, reads and cleanup. Emission goes to
//! whatever `metrics` recorder the embedding process installed; without one
//! every call is a no-op.

use std::time::Duration;

use metrics::{counter, describe_counter, describe_histogram, histogram};

// ============================================================================
// Metric Names
// ============================================================================

/// Write attempts, labelled by `kind` and `result`.
pub const WRITES_TOTAL: &str = "cairn_remote_state_writes_total";

/// Write duration histogram, labelled by `kind`.
pub const WRITE_DURATION: &str = "cairn_remote_state_write_duration_seconds";

/// Read attempts, labelled by `kind` and `result`.
pub const READS_TOTAL: &str = "cairn_remote_state_reads_total";

/// Blobs deleted by cleanup.
pub const CLEANUP_DELETED: &str = "cairn_remote_state_cleanup_deleted_total";

// ============================================================================
// Metric Registration
// ============================================================================

/// Registers all remote-state metric descriptions.
///
/// Call this once at application startup after initializing the metrics recorder.
pub fn register_metrics() {
    describe_counter!(WRITES_TOTAL, "Total remote cluster-state writes");
    describe_histogram!(WRITE_DURATION, "Duration of remote cluster-state writes in seconds");
    describe_counter!(READS_TOTAL, "Total remote cluster-state reads");
    describe_counter!(CLEANUP_DELETED, "Total blobs deleted by stale-state cleanup");
}

// ============================================================================
// Recording
// ============================================================================

const fn result_label(success: bool) -> &'static str {
    if success { "success" } else { "failure" }
}

/// Records one write attempt of the given kind (`full`, `incremental`,
/// `commit`).
pub fn record_write(kind: &'static str, success: bool, elapsed: Duration) {
    counter!(WRITES_TOTAL, "kind" => kind, "result" => result_label(success)).increment(1);
    histogram!(WRITE_DURATION, "kind" => kind).record(elapsed.as_secs_f64());
}

/// Records one read attempt of the given kind (`full`, `diff`, `manifest`).
pub fn record_read(kind: &'static str, success: bool) {
    counter!(READS_TOTAL, "kind" => kind, "result" => result_label(success)).increment(1);
}

/// Records blobs deleted by a cleanup run.
pub fn record_cleanup_deleted(count: u64) {
    counter!(CLEANUP_DELETED).increment(count);
}
