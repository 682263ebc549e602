//! Pre-built test fixtures for common test scenarios.
//!
//! Provides factory functions to create cluster states with sensible
//! defaults. Every state built here is viewed from an elected leader so it
//! can be written without further setup.

use std::sync::Arc;

use serde_json::json;

use cairn_core::state::{
    ClusterState, DiscoveryNode, IndexMetadata, IndexRoutingTable, IndexTemplate, MetadataCustom,
    Settings, ShardRouting, ShardState,
};

use crate::storage::TracingMemoryStore;

/// Test context with pre-configured storage and identifiers.
pub struct TestContext {
    /// Shared blob store.
    pub store: Arc<TracingMemoryStore>,
    /// Cluster name.
    pub cluster_name: String,
    /// Blob path prefix.
    pub base_path: String,
}

impl TestContext {
    /// Creates a new test context with a unique cluster name.
    #[must_use]
    pub fn new() -> Self {
        Self {
            store: Arc::new(TracingMemoryStore::new()),
            cluster_name: format!("test-cluster-{}", uuid::Uuid::new_v4().as_simple()),
            base_path: "remote-state".to_string(),
        }
    }

    /// Returns a factory for states of this context's cluster.
    #[must_use]
    pub fn states(&self) -> ClusterStateFactory {
        ClusterStateFactory::new(&self.cluster_name)
    }
}

impl Default for TestContext {
    fn default() -> Self {
        Self::new()
    }
}

/// Builder for leader-local cluster states.
///
/// ```rust,ignore
/// let state = ClusterStateFactory::new("prod")
///     .cluster_uuid("u1")
///     .term(3)
///     .with_index("logs", 2)
///     .build();
/// ```
#[derive(Debug, Clone)]
pub struct ClusterStateFactory {
    state: ClusterState,
}

/// ID of the local (and leading) node in factory-built states.
pub const LEADER_NODE_ID: &str = "node-1";

impl ClusterStateFactory {
    /// Starts a state for `cluster_name` with version 1 and term 1.
    #[must_use]
    pub fn new(cluster_name: &str) -> Self {
        let mut state = ClusterState::empty(cluster_name);
        state.version = 1;
        state.state_uuid = uuid::Uuid::new_v4().to_string();
        state.metadata.version = 1;
        state.metadata.cluster_uuid = uuid::Uuid::new_v4().to_string();
        state.metadata.coordination.term = 1;
        state.metadata.persistent_settings =
            Settings::new().with("cluster.routing.allocation.enable", "all");
        state.nodes.nodes.insert(
            LEADER_NODE_ID.to_string(),
            DiscoveryNode {
                id: LEADER_NODE_ID.to_string(),
                name: "leader".to_string(),
                address: "127.0.0.1:9300".to_string(),
            },
        );
        state.nodes.local_node_id = Some(LEADER_NODE_ID.to_string());
        state.nodes.leader_node_id = Some(LEADER_NODE_ID.to_string());
        Self { state }
    }

    /// Continues from an existing state as its successor: version bumped
    /// by one and a fresh state UUID.
    #[must_use]
    pub fn next(previous: &ClusterState) -> Self {
        let mut state = previous.clone();
        state.version += 1;
        state.state_uuid = uuid::Uuid::new_v4().to_string();
        Self { state }
    }

    /// Sets the cluster UUID.
    #[must_use]
    pub fn cluster_uuid(mut self, uuid: &str) -> Self {
        self.state.metadata.cluster_uuid = uuid.to_string();
        self
    }

    /// Sets the leadership term.
    #[must_use]
    pub fn term(mut self, term: u64) -> Self {
        self.state.metadata.coordination.term = term;
        self
    }

    /// Sets the state version.
    #[must_use]
    pub fn version(mut self, version: u64) -> Self {
        self.state.version = version;
        self
    }

    /// Adds (or replaces) an index with `shards` started primaries, and its
    /// routing.
    #[must_use]
    pub fn with_index(mut self, name: &str, shards: u32) -> Self {
        let uuid = format!("{name}-uuid");
        let mut index = IndexMetadata::new(name, &uuid);
        index.settings = Settings::new().with("index.number_of_shards", shards.to_string());
        self.state.metadata.indices.insert(name.to_string(), index);
        self.state.routing_table.indices.insert(
            name.to_string(),
            IndexRoutingTable {
                index_name: name.to_string(),
                index_uuid: uuid,
                shards: (0..shards)
                    .map(|shard_id| ShardRouting {
                        shard_id,
                        primary: true,
                        node_id: Some(LEADER_NODE_ID.to_string()),
                        state: ShardState::Started,
                    })
                    .collect(),
            },
        );
        self.state.routing_table.version += 1;
        self
    }

    /// Bumps the metadata version of an existing index.
    #[must_use]
    pub fn bump_index(mut self, name: &str) -> Self {
        if let Some(index) = self.state.metadata.indices.get_mut(name) {
            index.version += 1;
            index.mappings = json!({ "revision": index.version });
        }
        self
    }

    /// Moves every shard of an index to `node_id` and bumps the routing
    /// table version.
    #[must_use]
    pub fn relocate_shards(mut self, name: &str, node_id: &str) -> Self {
        if let Some(table) = self.state.routing_table.indices.get_mut(name) {
            for shard in &mut table.shards {
                shard.node_id = Some(node_id.to_string());
            }
            self.state.routing_table.version += 1;
        }
        self
    }

    /// Removes an index and its routing.
    #[must_use]
    pub fn without_index(mut self, name: &str) -> Self {
        self.state.metadata.indices.remove(name);
        if self.state.routing_table.indices.remove(name).is_some() {
            self.state.routing_table.version += 1;
        }
        self
    }

    /// Adds an index template.
    #[must_use]
    pub fn with_template(mut self, name: &str, pattern: &str) -> Self {
        self.state.metadata.templates.insert(
            name.to_string(),
            IndexTemplate {
                patterns: vec![pattern.to_string()],
                order: 0,
                settings: Settings::new(),
                mappings: json!({}),
            },
        );
        self
    }

    /// Adds a durable metadata custom.
    #[must_use]
    pub fn with_custom(mut self, key: &str, value: serde_json::Value) -> Self {
        self.state
            .metadata
            .customs
            .insert(key.to_string(), MetadataCustom::durable(value));
        self
    }

    /// Adds a non-persistent metadata custom.
    #[must_use]
    pub fn with_ephemeral_custom(mut self, key: &str, value: serde_json::Value) -> Self {
        self.state
            .metadata
            .customs
            .insert(key.to_string(), MetadataCustom::ephemeral(value));
        self
    }

    /// Adds a cluster-state custom.
    #[must_use]
    pub fn with_cluster_custom(mut self, key: &str, value: serde_json::Value) -> Self {
        self.state.customs.insert(key.to_string(), value);
        self
    }

    /// Adds a transient setting.
    #[must_use]
    pub fn with_transient_setting(mut self, key: &str, value: &str) -> Self {
        let settings = std::mem::take(&mut self.state.metadata.transient_settings);
        self.state.metadata.transient_settings = settings.with(key, value);
        self
    }

    /// Adds a global block.
    #[must_use]
    pub fn with_global_block(mut self, block: &str) -> Self {
        self.state.blocks.global.insert(block.to_string());
        self
    }

    /// Makes the local node a follower of another leader.
    #[must_use]
    pub fn as_follower(mut self) -> Self {
        self.state.nodes.leader_node_id = Some("node-2".to_string());
        self
    }

    /// Finishes the state.
    #[must_use]
    pub fn build(self) -> ClusterState {
        self.state
    }
}

/// A representative state: two indices, a template, customs of every kind
/// and some ephemeral content.
#[must_use]
pub fn sample_state(cluster_name: &str) -> ClusterState {
    ClusterStateFactory::new(cluster_name)
        .with_index("logs", 2)
        .with_index("metrics", 1)
        .with_template("logs-template", "logs-*")
        .with_custom("repositories", json!({ "backup": { "type": "fs" } }))
        .with_ephemeral_custom("ingest-stats", json!({ "pipelines": 3 }))
        .with_cluster_custom("snapshots", json!({ "inProgress": [] }))
        .with_transient_setting("cluster.info.update.interval", "30s")
        .with_global_block("read_only_allow_delete")
        .build()
}
