//! Component identities and payloads.
//!
//! Every fan-out item is keyed by a [`Component`] and reports a tagged
//! outcome, so results are mapped back to manifest slots by matching on the
//! tag rather than by parsing blob names.

use std::collections::BTreeMap;
use std::fmt;

use bytes::Bytes;
use serde::{Deserialize, Serialize};

use cairn_core::state::{
    ClusterBlocks, ClusterState, CoordinationMetadata, DiscoveryNodes, IndexMetadata,
    IndexRoutingTable, IndexTemplate, MetadataCustom, RoutingTableDiff, Settings,
};

use crate::codec;
use crate::error::Result;
use crate::manifest::{BlobPointer, IndexPointer};

/// A singleton category of cluster state, persisted as one blob.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize,
)]
#[serde(rename_all = "camelCase")]
pub enum SingletonCategory {
    /// Coordination metadata (carries the term).
    Coordination,
    /// Persistent cluster settings.
    PersistentSettings,
    /// Transient cluster settings.
    TransientSettings,
    /// Index templates.
    Templates,
    /// Hashes of consistent secure settings.
    HashesOfConsistentSettings,
    /// Discovery nodes.
    Nodes,
    /// Cluster blocks.
    Blocks,
}

impl SingletonCategory {
    /// Every singleton category.
    pub const ALL: [Self; 7] = [
        Self::Coordination,
        Self::PersistentSettings,
        Self::TransientSettings,
        Self::Templates,
        Self::HashesOfConsistentSettings,
        Self::Nodes,
        Self::Blocks,
    ];

    /// Stable name used in blob names, item names and envelope kinds.
    #[must_use]
    pub const fn name(self) -> &'static str {
        match self {
            Self::Coordination => "coordination",
            Self::PersistentSettings => "settings",
            Self::TransientSettings => "transient_settings",
            Self::Templates => "templates",
            Self::HashesOfConsistentSettings => "hashes_of_consistent_settings",
            Self::Nodes => "nodes",
            Self::Blocks => "blocks",
        }
    }

    /// Returns true if the category is skipped by non-ephemeral reads.
    #[must_use]
    pub const fn is_ephemeral(self) -> bool {
        matches!(
            self,
            Self::TransientSettings | Self::HashesOfConsistentSettings | Self::Nodes | Self::Blocks
        )
    }

    /// Returns true if the category content differs between two states.
    #[must_use]
    pub fn changed(self, previous: &ClusterState, current: &ClusterState) -> bool {
        let (p, c) = (&previous.metadata, &current.metadata);
        match self {
            Self::Coordination => p.coordination != c.coordination,
            Self::PersistentSettings => p.persistent_settings != c.persistent_settings,
            Self::TransientSettings => p.transient_settings != c.transient_settings,
            Self::Templates => p.templates != c.templates,
            Self::HashesOfConsistentSettings => {
                p.hashes_of_consistent_settings != c.hashes_of_consistent_settings
            }
            Self::Nodes => previous.nodes != current.nodes,
            Self::Blocks => previous.blocks != current.blocks,
        }
    }

    /// Encodes this category's content from `state`.
    ///
    /// # Errors
    ///
    /// Returns an error if the content cannot be serialized.
    pub fn encode(self, state: &ClusterState) -> Result<Bytes> {
        let m = &state.metadata;
        let kind = self.name();
        match self {
            Self::Coordination => codec::encode(kind, &m.coordination),
            Self::PersistentSettings => codec::encode(kind, &m.persistent_settings),
            Self::TransientSettings => codec::encode(kind, &m.transient_settings),
            Self::Templates => codec::encode(kind, &m.templates),
            Self::HashesOfConsistentSettings => {
                codec::encode(kind, &m.hashes_of_consistent_settings)
            }
            Self::Nodes => codec::encode(kind, &state.nodes),
            Self::Blocks => codec::encode(kind, &state.blocks),
        }
    }
}

impl fmt::Display for SingletonCategory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// Which custom map a custom component belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum CustomKind {
    /// Metadata customs (durable unless flagged otherwise).
    Metadata,
    /// Cluster-state customs (always ephemeral).
    ClusterState,
}

impl CustomKind {
    /// Stable name used in blob names, item names and envelope kinds.
    #[must_use]
    pub const fn name(self) -> &'static str {
        match self {
            Self::Metadata => "customs",
            Self::ClusterState => "cluster_state_customs",
        }
    }
}

/// Identity of one fan-out item.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum Component {
    /// A singleton category.
    Singleton(SingletonCategory),
    /// Metadata of one index.
    Index(String),
    /// Routing of one index.
    IndexRouting(String),
    /// One entry of a custom map.
    Custom(CustomKind, String),
    /// The combined routing-table diff.
    RoutingDiff,
    /// The legacy combined global-metadata blob.
    LegacyGlobalMetadata,
    /// An index-metadata upload listener.
    Listener(String),
    /// The manifest itself.
    Manifest,
}

impl Component {
    /// Envelope kind of the blob this component reads or writes.
    #[must_use]
    pub const fn kind(&self) -> &'static str {
        match self {
            Self::Singleton(category) => category.name(),
            Self::Index(_) => "index_metadata",
            Self::IndexRouting(_) => "index_routing",
            Self::Custom(kind, _) => kind.name(),
            Self::RoutingDiff => "routing_table_diff",
            Self::LegacyGlobalMetadata => "global_metadata",
            Self::Listener(_) => "listener",
            Self::Manifest => "manifest",
        }
    }
}

impl fmt::Display for Component {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Singleton(category) => write!(f, "singleton:{category}"),
            Self::Index(name) => write!(f, "index:{name}"),
            Self::IndexRouting(name) => write!(f, "routing:{name}"),
            Self::Custom(kind, key) => write!(f, "{}:{key}", kind.name()),
            Self::RoutingDiff => f.write_str("routing_table_diff"),
            Self::LegacyGlobalMetadata => f.write_str("global_metadata"),
            Self::Listener(name) => write!(f, "listener:{name}"),
            Self::Manifest => f.write_str("manifest"),
        }
    }
}

/// Result of one upload item.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum UploadOutcome {
    /// A singleton category blob was written.
    Singleton(SingletonCategory, BlobPointer),
    /// An index metadata blob was written.
    Index(IndexPointer),
    /// An index routing blob was written.
    IndexRouting(IndexPointer),
    /// A custom blob was written.
    Custom(CustomKind, String, BlobPointer),
    /// The routing-table diff blob was written.
    RoutingDiff(BlobPointer),
    /// An upload listener completed.
    Listener(String),
}

impl UploadOutcome {
    /// Returns the component this outcome reports for.
    #[must_use]
    pub fn component(&self) -> Component {
        match self {
            Self::Singleton(category, _) => Component::Singleton(*category),
            Self::Index(pointer) => Component::Index(pointer.index_name.clone()),
            Self::IndexRouting(pointer) => Component::IndexRouting(pointer.index_name.clone()),
            Self::Custom(kind, key, _) => Component::Custom(*kind, key.clone()),
            Self::RoutingDiff(_) => Component::RoutingDiff,
            Self::Listener(name) => Component::Listener(name.clone()),
        }
    }
}

/// Durable global metadata as stored by V0/V1 manifests in one blob.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LegacyGlobalMetadata {
    /// Coordination metadata.
    #[serde(default)]
    pub coordination: CoordinationMetadata,
    /// Persistent settings.
    #[serde(default)]
    pub persistent_settings: Settings,
    /// Templates.
    #[serde(default)]
    pub templates: BTreeMap<String, IndexTemplate>,
    /// Metadata customs.
    #[serde(default)]
    pub customs: BTreeMap<String, MetadataCustom>,
}

/// Decoded content of one read item.
#[derive(Debug, Clone, PartialEq)]
pub enum ComponentPayload {
    /// Coordination metadata.
    Coordination(CoordinationMetadata),
    /// Persistent settings.
    PersistentSettings(Settings),
    /// Transient settings.
    TransientSettings(Settings),
    /// Templates.
    Templates(BTreeMap<String, IndexTemplate>),
    /// Hashes of consistent settings.
    HashesOfConsistentSettings(BTreeMap<String, String>),
    /// Discovery nodes.
    Nodes(DiscoveryNodes),
    /// Cluster blocks.
    Blocks(ClusterBlocks),
    /// Index metadata.
    Index(IndexMetadata),
    /// Index routing.
    IndexRouting(IndexRoutingTable),
    /// A metadata custom.
    MetadataCustom(String, MetadataCustom),
    /// A cluster-state custom.
    ClusterStateCustom(String, serde_json::Value),
    /// A routing-table diff.
    RoutingDiff(RoutingTableDiff),
    /// Legacy combined global metadata.
    LegacyGlobalMetadata(LegacyGlobalMetadata),
}

impl ComponentPayload {
    /// Decodes a blob read for `component`.
    ///
    /// # Errors
    ///
    /// Returns an error if the blob is not a valid envelope of the
    /// component's kind, or if the component has no payload.
    pub fn decode(component: &Component, data: &[u8]) -> Result<Self> {
        let kind = component.kind();
        Ok(match component {
            Component::Singleton(category) => match category {
                SingletonCategory::Coordination => Self::Coordination(codec::decode(kind, data)?),
                SingletonCategory::PersistentSettings => {
                    Self::PersistentSettings(codec::decode(kind, data)?)
                }
                SingletonCategory::TransientSettings => {
                    Self::TransientSettings(codec::decode(kind, data)?)
                }
                SingletonCategory::Templates => Self::Templates(codec::decode(kind, data)?),
                SingletonCategory::HashesOfConsistentSettings => {
                    Self::HashesOfConsistentSettings(codec::decode(kind, data)?)
                }
                SingletonCategory::Nodes => Self::Nodes(codec::decode(kind, data)?),
                SingletonCategory::Blocks => Self::Blocks(codec::decode(kind, data)?),
            },
            Component::Index(_) => Self::Index(codec::decode(kind, data)?),
            Component::IndexRouting(_) => Self::IndexRouting(codec::decode(kind, data)?),
            Component::Custom(CustomKind::Metadata, key) => {
                Self::MetadataCustom(key.clone(), codec::decode(kind, data)?)
            }
            Component::Custom(CustomKind::ClusterState, key) => {
                Self::ClusterStateCustom(key.clone(), codec::decode(kind, data)?)
            }
            Component::RoutingDiff => Self::RoutingDiff(codec::decode(kind, data)?),
            Component::LegacyGlobalMetadata => {
                Self::LegacyGlobalMetadata(codec::decode(kind, data)?)
            }
            Component::Listener(_) | Component::Manifest => {
                return Err(crate::error::RemoteStateError::invariant(format!(
                    "{component} has no readable payload"
                )));
            }
        })
    }
}
