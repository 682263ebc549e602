//! Index-metadata upload listeners.
//!
//! Observers that must act on every index-metadata upload (for example to
//! pre-create per-index remote resources) register an
//! [`IndexMetadataUploadListener`]. Each listener runs as one item of the
//! write fan-out, alongside the blob uploads: a failing listener does not
//! stop unrelated uploads, but it fails the write as a whole.

use std::collections::BTreeMap;
use std::sync::Arc;

use async_trait::async_trait;

use cairn_core::state::IndexMetadata;

use crate::error::Result;

/// An index whose metadata is being uploaded by a write.
#[derive(Debug, Clone, PartialEq)]
pub struct IndexUpload {
    /// The metadata being uploaded.
    pub index: IndexMetadata,
    /// Version held by the previous state, if the index existed.
    pub previous_version: Option<u64>,
}

/// Observer of index-metadata uploads.
#[async_trait]
pub trait IndexMetadataUploadListener: Send + Sync + 'static {
    /// Stable listener name, used as the fan-out item name.
    fn name(&self) -> &str;

    /// Called once per write with every index uploaded by that write.
    ///
    /// `previous` maps index name to the metadata held by the previous
    /// state; it is empty for full writes.
    ///
    /// # Errors
    ///
    /// An error fails the surrounding write.
    async fn on_upload(
        &self,
        uploads: Vec<IndexUpload>,
        previous: BTreeMap<String, IndexMetadata>,
    ) -> Result<()>;
}

/// Shared listener handle.
pub type SharedListener = Arc<dyn IndexMetadataUploadListener>;

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;

    struct Recording {
        seen: Mutex<Vec<String>>,
    }

    #[async_trait]
    impl IndexMetadataUploadListener for Recording {
        fn name(&self) -> &str {
            "recording"
        }

        async fn on_upload(
            &self,
            uploads: Vec<IndexUpload>,
            _previous: BTreeMap<String, IndexMetadata>,
        ) -> Result<()> {
            let mut seen = self.seen.lock().expect("lock");
            seen.extend(uploads.into_iter().map(|u| u.index.name));
            Ok(())
        }
    }

    #[tokio::test]
    async fn test_listener_receives_uploads() {
        let listener = Arc::new(Recording {
            seen: Mutex::new(Vec::new()),
        });
        let shared: SharedListener = listener.clone();

        shared
            .on_upload(
                vec![IndexUpload {
                    index: IndexMetadata::new("logs", "u"),
                    previous_version: None,
                }],
                BTreeMap::new(),
            )
            .await
            .expect("listener ok");

        assert_eq!(*listener.seen.lock().unwrap(), vec!["logs".to_string()]);
    }
}
