//! # cairn-core
//!
//! Shared primitives for the cairn remote cluster-state store.
//!
//! This crate provides the foundational types and traits used by the other
//! cairn crates:
//!
//! - **Blob Store**: the write-once object-store contract and an in-memory backend
//! - **State Model**: the consumed cluster-state snapshot and its categories
//! - **Map Diff**: string-keyed differencing shared by custom maps and routing
//! - **Error Types**: shared error definitions and result types
//! - **Observability**: logging bootstrap and span helpers
//!
//! ## Example
//!
//! ```rust
//! use cairn_core::prelude::*;
//!
//! let mut state = ClusterState::empty("prod");
//! state.metadata.indices.insert("logs".into(), IndexMetadata::new("logs", "u-logs"));
//! assert_eq!(state.metadata.indices.len(), 1);
//! ```

#![forbid(unsafe_code)]
#![deny(missing_docs)]
#![deny(rust_2018_idioms)]
#![warn(clippy::pedantic)]

pub mod diff;
pub mod error;
pub mod observability;
pub mod state;
pub mod storage;

/// Prelude module for convenient imports.
///
/// # Example
///
/// ```rust
/// use cairn_core::prelude::*;
/// ```
pub mod prelude {
    pub use crate::diff::{MapDiff, StringKeyDiffProvider, diff_maps};
    pub use crate::error::{Error, Result};
    pub use crate::state::{
        ClusterBlocks, ClusterState, CoordinationMetadata, DiscoveryNode, DiscoveryNodes,
        IndexMetadata, IndexRoutingTable, IndexTemplate, Metadata, MetadataCustom, RoutingTable,
        RoutingTableDiff, Settings, ShardRouting, ShardState, UNKNOWN_UUID,
    };
    pub use crate::storage::{BlobMeta, BlobStore, MemoryBlobStore};
}

// Re-export key types at crate root for ergonomics
pub use diff::{MapDiff, StringKeyDiffProvider, diff_maps};
pub use error::{Error, Result};
pub use observability::{LogFormat, init_logging, remote_state_span};
pub use state::{ClusterState, UNKNOWN_UUID};
pub use storage::{BlobMeta, BlobStore, MemoryBlobStore};
