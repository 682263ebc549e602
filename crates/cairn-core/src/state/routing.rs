//! Shard routing table.
//!
//! The routing table is persisted as one blob per index plus, for incremental
//! writes, an optional combined diff blob. Its diff primitive is exposed
//! through [`StringKeyDiffProvider`] so the persistence layer never inspects
//! shard placement itself.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::diff::{MapDiff, StringKeyDiffProvider, diff_maps};

/// Lifecycle state of a shard copy.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ShardState {
    /// Not assigned to any node.
    Unassigned,
    /// Recovering on its node.
    Initializing,
    /// Serving requests.
    Started,
    /// Moving to another node.
    Relocating,
}

/// Placement of one shard copy.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ShardRouting {
    /// Shard number within the index.
    pub shard_id: u32,
    /// Whether this copy is the primary.
    pub primary: bool,
    /// Node holding the copy, if assigned.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub node_id: Option<String>,
    /// Current lifecycle state.
    pub state: ShardState,
}

/// Routing of all shard copies of one index.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct IndexRoutingTable {
    /// Index name.
    pub index_name: String,
    /// Index UUID.
    pub index_uuid: String,
    /// Shard copies.
    #[serde(default)]
    pub shards: Vec<ShardRouting>,
}

/// Routing table of the whole cluster.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RoutingTable {
    /// Monotonic routing-table version.
    pub version: u64,
    /// Per-index routing keyed by index name.
    #[serde(default)]
    pub indices: BTreeMap<String, IndexRoutingTable>,
}

impl RoutingTable {
    /// Computes the diff needed to turn `previous` into `self`.
    #[must_use]
    pub fn diff_from(&self, previous: &Self) -> RoutingTableDiff {
        RoutingTableDiff {
            version: self.version,
            indices: diff_maps(&previous.indices, &self.indices),
        }
    }
}

/// Incremental difference between two routing tables.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RoutingTableDiff {
    /// Version of the target routing table.
    pub version: u64,
    /// Upserted and deleted index routing tables.
    pub indices: MapDiff<IndexRoutingTable>,
}

impl RoutingTableDiff {
    /// Returns true if the diff changes no index.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.indices.is_empty()
    }

    /// Applies this diff to `previous`, producing the target routing table.
    #[must_use]
    pub fn apply(&self, previous: &RoutingTable) -> RoutingTable {
        let mut indices = previous.indices.clone();
        self.indices.apply(&mut indices);
        RoutingTable {
            version: self.version,
            indices,
        }
    }
}

impl StringKeyDiffProvider<IndexRoutingTable> for RoutingTableDiff {
    fn provide_diff(&self) -> Option<&MapDiff<IndexRoutingTable>> {
        Some(&self.indices)
    }
}
