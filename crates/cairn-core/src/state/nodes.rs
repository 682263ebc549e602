//! Cluster membership and blocks.

use std::collections::{BTreeMap, BTreeSet};

use serde::{Deserialize, Serialize};

/// A member node.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DiscoveryNode {
    /// Persistent node ID.
    pub id: String,
    /// Human-readable node name.
    pub name: String,
    /// Transport address.
    pub address: String,
}

/// The set of member nodes as seen by one node.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DiscoveryNodes {
    /// Member nodes keyed by ID.
    #[serde(default)]
    pub nodes: BTreeMap<String, DiscoveryNode>,
    /// ID of the node holding this view.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub local_node_id: Option<String>,
    /// ID of the currently elected leader.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub leader_node_id: Option<String>,
}

impl DiscoveryNodes {
    /// Returns true if the local node is the elected leader.
    #[must_use]
    pub fn is_local_node_elected_leader(&self) -> bool {
        matches!(
            (&self.local_node_id, &self.leader_node_id),
            (Some(local), Some(leader)) if local == leader
        )
    }
}

/// Cluster-wide and per-index blocks.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ClusterBlocks {
    /// Blocks applying to the whole cluster.
    #[serde(default)]
    pub global: BTreeSet<String>,
    /// Blocks applying to individual indices.
    #[serde(default)]
    pub indices: BTreeMap<String, BTreeSet<String>>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_leader_check() {
        let mut nodes = DiscoveryNodes::default();
        assert!(!nodes.is_local_node_elected_leader());

        nodes.local_node_id = Some("n1".into());
        assert!(!nodes.is_local_node_elected_leader());

        nodes.leader_node_id = Some("n2".into());
        assert!(!nodes.is_local_node_elected_leader());

        nodes.leader_node_id = Some("n1".into());
        assert!(nodes.is_local_node_elected_leader());
    }
}
