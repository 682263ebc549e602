//! In-memory cluster-state object model.
//!
//! These types are owned by the surrounding cluster-coordination layer; cairn
//! only consumes them. They are plain data with structural equality so the
//! persistence protocol can diff two snapshots category by category.
//!
//! A [`ClusterState`] is split into independently persisted categories:
//!
//! ```text
//! ClusterState
//! ├── metadata
//! │   ├── coordination          (singleton, carries the term)
//! │   ├── persistent_settings   (singleton)
//! │   ├── transient_settings    (singleton, ephemeral)
//! │   ├── templates             (singleton)
//! │   ├── hashes_of_consistent_settings (singleton, ephemeral)
//! │   ├── customs               (map, one blob per key)
//! │   └── indices               (map, one blob per index)
//! ├── routing_table             (map, one blob per index + optional diff blob)
//! ├── nodes                     (singleton, ephemeral)
//! ├── blocks                    (singleton, ephemeral)
//! └── customs                   (map, ephemeral)
//! ```

mod metadata;
mod nodes;
mod routing;

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

pub use metadata::{
    CoordinationMetadata, IndexMetadata, IndexTemplate, Metadata, MetadataCustom, Settings,
};
pub use nodes::{ClusterBlocks, DiscoveryNode, DiscoveryNodes};
pub use routing::{IndexRoutingTable, RoutingTable, RoutingTableDiff, ShardRouting, ShardState};

/// Sentinel UUID used before a cluster has been bootstrapped, and as the
/// "previous cluster UUID" of the first cluster in a lineage.
pub const UNKNOWN_UUID: &str = "_na_";

/// A full cluster-state snapshot.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ClusterState {
    /// Name of the cluster this state belongs to.
    pub cluster_name: String,
    /// Monotonic cluster-state version.
    pub version: u64,
    /// Unique identifier of this particular state.
    pub state_uuid: String,
    /// Durable metadata.
    pub metadata: Metadata,
    /// Shard placement.
    pub routing_table: RoutingTable,
    /// Cluster membership.
    pub nodes: DiscoveryNodes,
    /// Active cluster blocks.
    pub blocks: ClusterBlocks,
    /// Cluster-state customs (ephemeral extension points).
    #[serde(default)]
    pub customs: BTreeMap<String, serde_json::Value>,
}

impl ClusterState {
    /// Creates an empty state for the given cluster name.
    ///
    /// The empty state is the baseline a full write diffs against.
    #[must_use]
    pub fn empty(cluster_name: impl Into<String>) -> Self {
        Self {
            cluster_name: cluster_name.into(),
            version: 0,
            state_uuid: UNKNOWN_UUID.to_string(),
            metadata: Metadata::default(),
            routing_table: RoutingTable::default(),
            nodes: DiscoveryNodes::default(),
            blocks: ClusterBlocks::default(),
            customs: BTreeMap::new(),
        }
    }

    /// Returns the leadership term recorded in the coordination metadata.
    #[must_use]
    pub const fn term(&self) -> u64 {
        self.metadata.coordination.term
    }

    /// Returns the cluster UUID from the metadata.
    #[must_use]
    pub fn cluster_uuid(&self) -> &str {
        &self.metadata.cluster_uuid
    }
}
