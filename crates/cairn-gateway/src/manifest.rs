//! Manifest model.
//!
//! A [`Manifest`] is the immutable pointer-set that reconstitutes one
//! cluster-state snapshot. It never embeds category content, only the names of
//! previously written blobs, so unchanged categories are carried from one
//! manifest to the next by copying their pointer.
//!
//! # Codec Versions
//!
//! | Codec | Layout |
//! |-------|--------|
//! | V0, V1 | index pointers plus one legacy combined global-metadata pointer |
//! | V2 | one pointer per singleton category, customs split out, diff manifest |
//! | V3 | V2 plus an optional combined routing-table diff blob |

use std::collections::{BTreeMap, BTreeSet};

use serde::{Deserialize, Serialize};

use crate::component::SingletonCategory;

// ============================================================================
// Codec
// ============================================================================

/// On-disk codec version of a manifest.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(try_from = "u8", into = "u8")]
pub enum CodecVersion {
    /// Original layout: indices plus a legacy global-metadata blob.
    V0,
    /// V0 with a committed cluster-UUID flag.
    V1,
    /// Per-category global metadata and diff manifests.
    V2,
    /// Adds routing-table diff blobs.
    V3,
}

impl CodecVersion {
    /// Codec written by this implementation.
    pub const CURRENT: Self = Self::V3;

    /// Returns the numeric tag of this codec.
    #[must_use]
    pub const fn as_u8(self) -> u8 {
        match self {
            Self::V0 => 0,
            Self::V1 => 1,
            Self::V2 => 2,
            Self::V3 => 3,
        }
    }

    /// Returns true if global metadata is split into one blob per category.
    #[must_use]
    pub const fn splits_global_metadata(self) -> bool {
        matches!(self, Self::V2 | Self::V3)
    }

    /// Returns true if the manifest may carry a routing-table diff blob.
    #[must_use]
    pub const fn supports_routing_diff(self) -> bool {
        matches!(self, Self::V3)
    }
}

impl TryFrom<u8> for CodecVersion {
    type Error = String;

    fn try_from(value: u8) -> Result<Self, Self::Error> {
        match value {
            0 => Ok(Self::V0),
            1 => Ok(Self::V1),
            2 => Ok(Self::V2),
            3 => Ok(Self::V3),
            other => Err(format!("unknown manifest codec version: {other}")),
        }
    }
}

impl From<CodecVersion> for u8 {
    fn from(codec: CodecVersion) -> Self {
        codec.as_u8()
    }
}

// ============================================================================
// Pointers
// ============================================================================

/// Pointer to a previously written blob.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BlobPointer {
    /// Category or custom key the blob holds.
    pub category: String,
    /// Full blob path.
    pub blob_name: String,
}

impl BlobPointer {
    /// Creates a pointer.
    #[must_use]
    pub fn new(category: impl Into<String>, blob_name: impl Into<String>) -> Self {
        Self {
            category: category.into(),
            blob_name: blob_name.into(),
        }
    }
}

/// Pointer to a per-index blob (metadata or routing).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct IndexPointer {
    /// Index name.
    pub index_name: String,
    /// Index UUID.
    pub index_uuid: String,
    /// Full blob path.
    pub blob_name: String,
}

// ============================================================================
// Diff manifest
// ============================================================================

/// Record of what changed relative to the previous manifest.
///
/// Lets a follower that already holds the previous state catch up by reading
/// only the changed components.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DiffManifest {
    /// State UUID the diff applies to.
    pub from_state_uuid: String,
    /// State UUID the diff produces.
    pub to_state_uuid: String,
    /// Singleton categories that were re-uploaded.
    #[serde(default)]
    pub updated_categories: BTreeSet<SingletonCategory>,
    /// Indices whose metadata was uploaded.
    #[serde(default)]
    pub indices_updated: Vec<String>,
    /// Indices removed from the state.
    #[serde(default)]
    pub indices_deleted: Vec<String>,
    /// Metadata customs uploaded.
    #[serde(default)]
    pub customs_updated: Vec<String>,
    /// Metadata customs removed.
    #[serde(default)]
    pub customs_deleted: Vec<String>,
    /// Cluster-state customs uploaded.
    #[serde(default)]
    pub cluster_state_customs_updated: Vec<String>,
    /// Cluster-state customs removed.
    #[serde(default)]
    pub cluster_state_customs_deleted: Vec<String>,
    /// Indices whose routing was uploaded.
    #[serde(default)]
    pub routing_updated: Vec<String>,
    /// Indices whose routing was removed.
    #[serde(default)]
    pub routing_deleted: Vec<String>,
    /// Path of the combined routing-table diff blob, if one was written.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub routing_diff_path: Option<String>,
}

// ============================================================================
// Manifest
// ============================================================================

/// Versioned pointer-set describing one cluster-state snapshot.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Manifest {
    /// Codec the manifest was written with.
    pub codec_version: CodecVersion,
    /// Leadership term of the state.
    pub term: u64,
    /// Cluster-state version.
    pub state_version: u64,
    /// Cluster-state UUID.
    pub state_uuid: String,
    /// Cluster UUID the state belongs to.
    pub cluster_uuid: String,
    /// Cluster UUID this cluster was bootstrapped from.
    pub previous_cluster_uuid: String,
    /// Whether the cluster UUID itself was committed at write time.
    #[serde(default)]
    pub cluster_uuid_committed: bool,
    /// Whether this manifest describes an accepted state.
    pub committed: bool,
    /// Node that wrote the manifest.
    #[serde(default)]
    pub node_id: String,
    /// Version of the metadata section.
    #[serde(default)]
    pub metadata_version: u64,
    /// Version of the routing table.
    #[serde(default)]
    pub routing_table_version: u64,
    /// Pointer per singleton category (V2+).
    #[serde(default)]
    pub categories: BTreeMap<SingletonCategory, BlobPointer>,
    /// Pointer per index metadata blob, sorted by index name.
    #[serde(default)]
    pub indices: Vec<IndexPointer>,
    /// Pointer per index routing blob, sorted by index name.
    #[serde(default)]
    pub indices_routing: Vec<IndexPointer>,
    /// Pointer per metadata custom (V2+).
    #[serde(default)]
    pub customs: BTreeMap<String, BlobPointer>,
    /// Pointer per cluster-state custom (V2+).
    #[serde(default)]
    pub cluster_state_customs: BTreeMap<String, BlobPointer>,
    /// Legacy combined global-metadata pointer (V0/V1 only).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub global_metadata: Option<BlobPointer>,
    /// What changed relative to the previous manifest.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub diff_manifest: Option<DiffManifest>,
}

impl Manifest {
    /// Returns the metadata pointer of the named index.
    #[must_use]
    pub fn index_pointer(&self, index_name: &str) -> Option<&IndexPointer> {
        self.indices.iter().find(|p| p.index_name == index_name)
    }

    /// Returns the routing pointer of the named index.
    #[must_use]
    pub fn routing_pointer(&self, index_name: &str) -> Option<&IndexPointer> {
        self.indices_routing
            .iter()
            .find(|p| p.index_name == index_name)
    }

    /// Returns every blob path this manifest references.
    #[must_use]
    pub fn referenced_blobs(&self) -> BTreeSet<&str> {
        let mut blobs: BTreeSet<&str> = BTreeSet::new();
        blobs.extend(self.categories.values().map(|p| p.blob_name.as_str()));
        blobs.extend(self.indices.iter().map(|p| p.blob_name.as_str()));
        blobs.extend(self.indices_routing.iter().map(|p| p.blob_name.as_str()));
        blobs.extend(self.customs.values().map(|p| p.blob_name.as_str()));
        blobs.extend(
            self.cluster_state_customs
                .values()
                .map(|p| p.blob_name.as_str()),
        );
        blobs.extend(self.global_metadata.iter().map(|p| p.blob_name.as_str()));
        if let Some(path) = self
            .diff_manifest
            .as_ref()
            .and_then(|d| d.routing_diff_path.as_deref())
        {
            blobs.insert(path);
        }
        blobs
    }
}

/// A published manifest together with its blob path.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ManifestInfo {
    /// The manifest.
    pub manifest: Manifest,
    /// Blob path the manifest was written to.
    pub path: String,
}
