//! Test storage implementations with operation tracing.
//!
//! Provides an in-memory blob store that records all operations for test
//! assertions and can inject failures, hangs and latency by path prefix.

use std::sync::{Arc, Mutex};
use std::time::Duration;

use bytes::Bytes;

use cairn_core::error::{Error, Result};
use cairn_core::storage::{BlobMeta, BlobStore, MemoryBlobStore};

/// Record of a storage operation for test assertions.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StorageOp {
    /// Get operation.
    Get {
        /// Path that was read.
        path: String,
    },
    /// Head operation (metadata only).
    Head {
        /// Path that was checked.
        path: String,
    },
    /// Put operation.
    Put {
        /// Path that was written.
        path: String,
        /// Size of data written.
        size: usize,
    },
    /// Delete operation.
    Delete {
        /// Path that was deleted.
        path: String,
    },
    /// List operation.
    List {
        /// Prefix that was listed.
        prefix: String,
    },
}

impl StorageOp {
    /// Returns the operation name (`get`, `put`, ...).
    pub const fn kind(&self) -> &'static str {
        match self {
            Self::Get { .. } => "get",
            Self::Head { .. } => "head",
            Self::Put { .. } => "put",
            Self::Delete { .. } => "delete",
            Self::List { .. } => "list",
        }
    }

    /// Returns the path (or listed prefix) the operation touched.
    pub fn path(&self) -> &str {
        match self {
            Self::Get { path }
            | Self::Head { path }
            | Self::Put { path, .. }
            | Self::Delete { path }
            | Self::List { prefix: path } => path,
        }
    }
}

/// In-memory blob store with operation tracing and fault injection.
///
/// Clones share the same blobs, recorded operations and injected faults.
#[derive(Debug, Clone, Default)]
pub struct TracingMemoryStore {
    inner: MemoryBlobStore,
    operations: Arc<Mutex<Vec<StorageOp>>>,
    fail_paths: Arc<Mutex<Vec<String>>>,
    hang_paths: Arc<Mutex<Vec<String>>>,
    latency: Option<Duration>,
}

impl TracingMemoryStore {
    /// Creates a new empty tracing store.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Creates a store that delays every operation by `latency`.
    #[must_use]
    pub fn with_latency(latency: Duration) -> Self {
        Self {
            latency: Some(latency),
            ..Self::default()
        }
    }

    /// Returns all recorded operations.
    #[must_use]
    pub fn operations(&self) -> Vec<StorageOp> {
        self.operations.lock().expect("lock").clone()
    }

    /// Clears recorded operations.
    pub fn clear_operations(&self) {
        self.operations.lock().expect("lock").clear();
    }

    /// Counts recorded puts whose path starts with `prefix`.
    #[must_use]
    pub fn count_puts(&self, prefix: &str) -> usize {
        self.operations
            .lock()
            .expect("lock")
            .iter()
            .filter(|op| matches!(op, StorageOp::Put { path, .. } if path.starts_with(prefix)))
            .count()
    }

    /// Makes every operation on paths starting with `prefix` fail.
    pub fn inject_failure(&self, prefix: impl Into<String>) {
        self.fail_paths.lock().expect("lock").push(prefix.into());
    }

    /// Makes every operation on paths starting with `prefix` never complete.
    pub fn inject_hang(&self, prefix: impl Into<String>) {
        self.hang_paths.lock().expect("lock").push(prefix.into());
    }

    /// Clears all injected failures and hangs.
    pub fn clear_faults(&self) {
        self.fail_paths.lock().expect("lock").clear();
        self.hang_paths.lock().expect("lock").clear();
    }

    /// Returns all stored paths in lexicographic order.
    pub async fn paths(&self) -> Vec<String> {
        self.inner
            .list("")
            .await
            .expect("memory list")
            .into_iter()
            .map(|meta| meta.path)
            .collect()
    }

    /// Returns stored paths that start with `prefix`.
    pub async fn paths_under(&self, prefix: &str) -> Vec<String> {
        self.inner
            .list(prefix)
            .await
            .expect("memory list")
            .into_iter()
            .map(|meta| meta.path)
            .collect()
    }

    fn record(&self, op: StorageOp) {
        self.operations.lock().expect("lock").push(op);
    }

    fn matches(paths: &Mutex<Vec<String>>, path: &str) -> bool {
        paths
            .lock()
            .expect("lock")
            .iter()
            .any(|p| path.starts_with(p.as_str()))
    }

    async fn before(&self, path: &str) -> Result<()> {
        if let Some(latency) = self.latency {
            tokio::time::sleep(latency).await;
        }
        if Self::matches(&self.hang_paths, path) {
            futures::future::pending::<()>().await;
        }
        if Self::matches(&self.fail_paths, path) {
            return Err(Error::storage(format!("injected failure for path: {path}")));
        }
        Ok(())
    }
}

#[async_trait::async_trait]
impl BlobStore for TracingMemoryStore {
    async fn get(&self, path: &str) -> Result<Bytes> {
        self.before(path).await?;
        self.record(StorageOp::Get {
            path: path.to_string(),
        });
        self.inner.get(path).await
    }

    async fn put(&self, path: &str, data: Bytes) -> Result<()> {
        self.before(path).await?;
        self.record(StorageOp::Put {
            path: path.to_string(),
            size: data.len(),
        });
        self.inner.put(path, data).await
    }

    async fn delete(&self, path: &str) -> Result<()> {
        self.before(path).await?;
        self.record(StorageOp::Delete {
            path: path.to_string(),
        });
        self.inner.delete(path).await
    }

    async fn list(&self, prefix: &str) -> Result<Vec<BlobMeta>> {
        self.before(prefix).await?;
        self.record(StorageOp::List {
            prefix: prefix.to_string(),
        });
        self.inner.list(prefix).await
    }

    async fn head(&self, path: &str) -> Result<Option<BlobMeta>> {
        self.before(path).await?;
        self.record(StorageOp::Head {
            path: path.to_string(),
        });
        self.inner.head(path).await
    }
}
