//! # cairn-gateway
//!
//! Manifest-based persistence of cluster metadata to an object store.
//!
//! The elected leader uploads each piece of cluster state as its own
//! immutable blob and then publishes a *manifest* that points at the full set
//! of blobs making up one state version. Readers on any node reconstruct the
//! state from the latest committed manifest, or apply a manifest's recorded
//! diff to a state they already hold.
//!
//! - **Parallel transfer**: every component upload or download of one call
//!   is fanned out and joined under a single deadline
//! - **Diff engine**: computes the minimal upload set between two states
//! - **Manifest builder**: merges fresh pointers with pointers carried over
//!   from the previous manifest
//! - **Lineage resolver**: picks the one valid cluster UUID history out of
//!   everything stored for a cluster name
//! - **Cleanup**: retires manifests and blobs outside the retention window
//!
//! ## Write Protocol
//!
//! ```text
//! 1. Diff the new state against the previous one
//! 2. Upload every changed component in parallel (write-once, unique names)
//! 3. Publish an UNCOMMITTED manifest referencing old and new blobs
//! 4. After the cluster accepts the state, publish a COMMITTED manifest
//! ```
//!
//! A manifest is only written after every upload of the call succeeded, so
//! a visible manifest never references a missing blob.
//!
//! ## Example
//!
//! ```rust,ignore
//! use cairn_gateway::{RemoteStateConfig, RemoteStateCoordinator};
//!
//! let coordinator = RemoteStateCoordinator::new(store, RemoteStateConfig::from_env()?, "node-1")?;
//! if let Some(info) = coordinator.write_full(&state, UNKNOWN_UUID).await? {
//!     coordinator.mark_committed(&state, &info.manifest).await?;
//! }
//! let restored = coordinator.get_latest_state("prod", state.cluster_uuid(), false).await?;
//! ```

#![forbid(unsafe_code)]
#![deny(missing_docs)]
#![deny(rust_2018_idioms)]
#![warn(clippy::pedantic)]

pub mod builder;
pub mod codec;
pub mod component;
pub mod config;
pub mod coordinator;
pub mod diff;
pub mod error;
pub mod gc;
pub mod lineage;
pub mod listener;
pub mod manifest;
pub mod metrics;
pub mod naming;
pub mod reader;
pub mod transfer;
pub mod writer;

// Re-export main types at crate root
pub use builder::ManifestBuilder;
pub use component::{Component, CustomKind, SingletonCategory};
pub use config::{RemoteStateConfig, RemoteStateSettings};
pub use coordinator::RemoteStateCoordinator;
pub use diff::{DiffEngine, StateDiff};
pub use error::{RemoteStateError, Result, TransferFailure};
pub use lineage::ContentComparator;
pub use listener::{IndexMetadataUploadListener, IndexUpload, SharedListener};
pub use manifest::{CodecVersion, DiffManifest, Manifest, ManifestInfo};
pub use reader::RemoteStateReader;
pub use transfer::ParallelTransfer;
pub use writer::RemoteStateWriter;

/// Prelude module for convenient imports.
pub mod prelude {
    pub use crate::config::{RemoteStateConfig, RemoteStateSettings};
    pub use crate::coordinator::RemoteStateCoordinator;
    pub use crate::error::{RemoteStateError, Result};
    pub use crate::gc::{CleanupScheduler, RetentionCleaner};
    pub use crate::listener::IndexMetadataUploadListener;
    pub use crate::manifest::{Manifest, ManifestInfo};
}
