//! Blob store abstraction for object storage (GCS, S3, local).
//!
//! The remote-state protocol only needs a narrow contract from the backing
//! store:
//! - `put` is atomic per key and **write-once**: a second write to the same
//!   path is rejected, so a published blob can never change under a reader
//! - `get` returns the full payload of a previously written blob
//! - `list` enumerates blobs by prefix, in arbitrary order
//! - `delete` is idempotent and is only used by cleanup
//!
//! Retry policy belongs to the concrete client behind this trait, never to the
//! callers.

use async_trait::async_trait;
use bytes::Bytes;
use chrono::{DateTime, Utc};
use std::collections::BTreeMap;
use std::sync::{Arc, RwLock};

use crate::error::{Error, Result};

/// Metadata about a stored blob.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BlobMeta {
    /// Blob path (key).
    pub path: String,
    /// Blob size in bytes.
    pub size: u64,
    /// Time the blob was written.
    pub last_modified: Option<DateTime<Utc>>,
}

/// Blob store trait for object storage.
///
/// All backends (GCS, S3, memory) implement this trait.
#[async_trait]
pub trait BlobStore: Send + Sync + 'static {
    /// Reads an entire blob.
    ///
    /// Returns `Error::NotFound` if the blob doesn't exist.
    async fn get(&self, path: &str) -> Result<Bytes>;

    /// Writes a blob that must not exist yet.
    ///
    /// Returns `Error::PreconditionFailed` if `path` already holds a blob; the
    /// existing blob is left untouched.
    async fn put(&self, path: &str, data: Bytes) -> Result<()>;

    /// Deletes a blob.
    ///
    /// Succeeds even if the blob doesn't exist.
    async fn delete(&self, path: &str) -> Result<()>;

    /// Lists blobs with the given prefix.
    ///
    /// **Ordering**: results are returned in arbitrary order that may vary
    /// between backends and invocations. Callers that rely on the
    /// lexicographic naming scheme must sort by `path`.
    async fn list(&self, prefix: &str) -> Result<Vec<BlobMeta>>;

    /// Gets blob metadata without reading content.
    ///
    /// Returns `None` if the blob doesn't exist.
    async fn head(&self, path: &str) -> Result<Option<BlobMeta>>;
}

/// In-memory blob store.
///
/// Thread-safe via `RwLock`. Suitable for tests and single-process embedding.
#[derive(Debug, Default, Clone)]
pub struct MemoryBlobStore {
    blobs: Arc<RwLock<BTreeMap<String, StoredBlob>>>,
}

#[derive(Debug, Clone)]
struct StoredBlob {
    data: Bytes,
    last_modified: DateTime<Utc>,
}

impl StoredBlob {
    fn meta(&self, path: &str) -> BlobMeta {
        BlobMeta {
            path: path.to_string(),
            size: self.data.len() as u64,
            last_modified: Some(self.last_modified),
        }
    }
}

impl MemoryBlobStore {
    /// Creates a new empty memory store.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns the number of stored blobs.
    ///
    /// # Errors
    ///
    /// Returns `Error::Internal` if the lock is poisoned.
    pub fn len(&self) -> Result<usize> {
        Ok(self.read_lock()?.len())
    }

    /// Returns true if no blobs are stored.
    ///
    /// # Errors
    ///
    /// Returns `Error::Internal` if the lock is poisoned.
    pub fn is_empty(&self) -> Result<bool> {
        Ok(self.read_lock()?.is_empty())
    }

    fn read_lock(
        &self,
    ) -> Result<std::sync::RwLockReadGuard<'_, BTreeMap<String, StoredBlob>>> {
        self.blobs.read().map_err(|_| Error::Internal {
            message: "lock poisoned".into(),
        })
    }

    fn write_lock(
        &self,
    ) -> Result<std::sync::RwLockWriteGuard<'_, BTreeMap<String, StoredBlob>>> {
        self.blobs.write().map_err(|_| Error::Internal {
            message: "lock poisoned".into(),
        })
    }
}

#[async_trait]
impl BlobStore for MemoryBlobStore {
    async fn get(&self, path: &str) -> Result<Bytes> {
        self.read_lock()?
            .get(path)
            .map(|b| b.data.clone())
            .ok_or_else(|| Error::NotFound(format!("blob not found: {path}")))
    }

    async fn put(&self, path: &str, data: Bytes) -> Result<()> {
        let mut blobs = self.write_lock()?;
        if blobs.contains_key(path) {
            return Err(Error::PreconditionFailed {
                message: format!("blob already exists: {path}"),
            });
        }
        blobs.insert(
            path.to_string(),
            StoredBlob {
                data,
                last_modified: Utc::now(),
            },
        );
        drop(blobs);
        Ok(())
    }

    async fn delete(&self, path: &str) -> Result<()> {
        self.write_lock()?.remove(path);
        Ok(())
    }

    async fn list(&self, prefix: &str) -> Result<Vec<BlobMeta>> {
        Ok(self
            .read_lock()?
            .range(prefix.to_string()..)
            .take_while(|(path, _)| path.starts_with(prefix))
            .map(|(path, blob)| blob.meta(path))
            .collect())
    }

    async fn head(&self, path: &str) -> Result<Option<BlobMeta>> {
        Ok(self.read_lock()?.get(path).map(|blob| blob.meta(path)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_memory_store_roundtrip() {
        let store = MemoryBlobStore::new();
        let data = Bytes::from("hello world");

        store
            .put("test/file.json", data.clone())
            .await
            .expect("put should succeed");

        let retrieved = store.get("test/file.json").await.expect("get should succeed");
        assert_eq!(retrieved, data);
    }

    #[tokio::test]
    async fn test_put_is_write_once() {
        let store = MemoryBlobStore::new();
        store
            .put("blob", Bytes::from("v1"))
            .await
            .expect("first put should succeed");

        let err = store
            .put("blob", Bytes::from("v2"))
            .await
            .expect_err("second put must be rejected");
        assert!(matches!(err, Error::PreconditionFailed { .. }));

        // Original payload survives
        assert_eq!(store.get("blob").await.unwrap(), Bytes::from("v1"));
    }

    #[tokio::test]
    async fn test_get_missing_is_not_found() {
        let store = MemoryBlobStore::new();
        let err = store.get("missing").await.expect_err("should fail");
        assert!(err.is_not_found());
    }

    #[tokio::test]
    async fn test_blob_meta_has_size() {
        let store = MemoryBlobStore::new();
        store.put("meta.json", Bytes::from("data")).await.unwrap();

        let meta = store
            .head("meta.json")
            .await
            .expect("head should succeed")
            .expect("blob should exist");

        assert_eq!(meta.path, "meta.json");
        assert_eq!(meta.size, 4);
        assert!(meta.last_modified.is_some());
    }

    #[tokio::test]
    async fn test_list_with_prefix() {
        let store = MemoryBlobStore::new();

        store.put("a/1", Bytes::from("a1")).await.unwrap();
        store.put("a/2", Bytes::from("a2")).await.unwrap();
        store.put("ab/1", Bytes::from("ab1")).await.unwrap();
        store.put("b/1", Bytes::from("b1")).await.unwrap();

        let list_a = store.list("a/").await.expect("should succeed");
        assert_eq!(list_a.len(), 2);

        let list_b = store.list("b/").await.expect("should succeed");
        assert_eq!(list_b.len(), 1);

        assert_eq!(store.list("").await.unwrap().len(), 4);
    }

    #[tokio::test]
    async fn test_delete_is_idempotent() {
        let store = MemoryBlobStore::new();

        store.put("del", Bytes::from("data")).await.unwrap();
        assert!(store.head("del").await.unwrap().is_some());

        store.delete("del").await.expect("should succeed");
        store.delete("del").await.expect("second delete should succeed");
        assert!(store.head("del").await.unwrap().is_none());
        assert!(store.is_empty().unwrap());
    }
}
