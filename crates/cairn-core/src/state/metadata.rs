//! Durable cluster metadata.

use std::collections::{BTreeMap, BTreeSet};

use serde::{Deserialize, Serialize};

use super::UNKNOWN_UUID;

/// Flat string settings, ordered by key.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Settings(pub BTreeMap<String, String>);

impl Settings {
    /// Creates empty settings.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns a copy with `key` set to `value`.
    #[must_use]
    pub fn with(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.0.insert(key.into(), value.into());
        self
    }

    /// Returns the value for `key`.
    #[must_use]
    pub fn get(&self, key: &str) -> Option<&str> {
        self.0.get(key).map(String::as_str)
    }

    /// Returns true if there are no settings.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

/// Voting configuration and the current leadership term.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CoordinationMetadata {
    /// Leadership term.
    pub term: u64,
    /// Node IDs in the last committed voting configuration.
    #[serde(default)]
    pub last_committed_config: BTreeSet<String>,
    /// Node IDs in the last accepted voting configuration.
    #[serde(default)]
    pub last_accepted_config: BTreeSet<String>,
    /// Node IDs excluded from voting.
    #[serde(default)]
    pub voting_config_exclusions: BTreeSet<String>,
}

/// An index template.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct IndexTemplate {
    /// Index-name patterns the template applies to.
    pub patterns: Vec<String>,
    /// Template precedence.
    #[serde(default)]
    pub order: i32,
    /// Settings applied to matching indices.
    #[serde(default)]
    pub settings: Settings,
    /// Mappings applied to matching indices.
    #[serde(default)]
    pub mappings: serde_json::Value,
}

/// A metadata custom: a named extension section of the metadata.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MetadataCustom {
    /// Opaque payload.
    pub value: serde_json::Value,
    /// Whether this custom survives a full cluster restart.
    ///
    /// Customs with `false` are dropped when reading state without ephemeral
    /// content.
    #[serde(default = "default_true")]
    pub persist_on_gateway: bool,
}

const fn default_true() -> bool {
    true
}

impl MetadataCustom {
    /// Creates a custom that is persisted across restarts.
    #[must_use]
    pub const fn durable(value: serde_json::Value) -> Self {
        Self {
            value,
            persist_on_gateway: true,
        }
    }

    /// Creates a custom that only lives for the current cluster lifetime.
    #[must_use]
    pub const fn ephemeral(value: serde_json::Value) -> Self {
        Self {
            value,
            persist_on_gateway: false,
        }
    }
}

/// Metadata of a single index.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct IndexMetadata {
    /// Index name (unique within a cluster).
    pub name: String,
    /// Index UUID (unique across recreations of the same name).
    pub uuid: String,
    /// Monotonic version, bumped on every change to this index's metadata.
    pub version: u64,
    /// Index settings.
    #[serde(default)]
    pub settings: Settings,
    /// Index mappings.
    #[serde(default)]
    pub mappings: serde_json::Value,
    /// Aliases pointing at this index.
    #[serde(default)]
    pub aliases: BTreeSet<String>,
}

impl IndexMetadata {
    /// Creates index metadata at version 1.
    #[must_use]
    pub fn new(name: impl Into<String>, uuid: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            uuid: uuid.into(),
            version: 1,
            settings: Settings::default(),
            mappings: serde_json::Value::Null,
            aliases: BTreeSet::new(),
        }
    }
}

/// Durable cluster metadata.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Metadata {
    /// Monotonic metadata version.
    pub version: u64,
    /// Cluster UUID assigned at bootstrap.
    pub cluster_uuid: String,
    /// Whether the cluster UUID has been committed by a quorum.
    #[serde(default)]
    pub cluster_uuid_committed: bool,
    /// Coordination metadata (voting configuration and term).
    #[serde(default)]
    pub coordination: CoordinationMetadata,
    /// Persistent cluster settings.
    #[serde(default)]
    pub persistent_settings: Settings,
    /// Transient cluster settings.
    #[serde(default)]
    pub transient_settings: Settings,
    /// Index templates keyed by name.
    #[serde(default)]
    pub templates: BTreeMap<String, IndexTemplate>,
    /// Hashes of settings that must be consistent across nodes.
    #[serde(default)]
    pub hashes_of_consistent_settings: BTreeMap<String, String>,
    /// Metadata customs keyed by type.
    #[serde(default)]
    pub customs: BTreeMap<String, MetadataCustom>,
    /// Index metadata keyed by index name.
    #[serde(default)]
    pub indices: BTreeMap<String, IndexMetadata>,
}

impl Default for Metadata {
    fn default() -> Self {
        Self {
            version: 0,
            cluster_uuid: UNKNOWN_UUID.to_string(),
            cluster_uuid_committed: false,
            coordination: CoordinationMetadata::default(),
            persistent_settings: Settings::default(),
            transient_settings: Settings::default(),
            templates: BTreeMap::new(),
            hashes_of_consistent_settings: BTreeMap::new(),
            customs: BTreeMap::new(),
            indices: BTreeMap::new(),
        }
    }
}

impl Metadata {
    /// Returns a copy keeping only durable customs.
    #[must_use]
    pub fn durable_customs(&self) -> BTreeMap<String, MetadataCustom> {
        self.customs
            .iter()
            .filter(|(_, custom)| custom.persist_on_gateway)
            .map(|(k, v)| (k.clone(), v.clone()))
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_settings_builder() {
        let settings = Settings::new().with("a", "1").with("b", "2");
        assert_eq!(settings.get("a"), Some("1"));
        assert_eq!(settings.get("c"), None);
        assert!(!settings.is_empty());
    }

    #[test]
    fn test_custom_defaults_to_durable_when_flag_missing() {
        let custom: MetadataCustom =
            serde_json::from_str(r#"{"value": {"repositories": []}}"#).expect("parse");
        assert!(custom.persist_on_gateway);
    }

    #[test]
    fn test_durable_customs_filters_ephemeral() {
        let mut metadata = Metadata::default();
        metadata
            .customs
            .insert("repositories".into(), MetadataCustom::durable(serde_json::json!([])));
        metadata
            .customs
            .insert("tasks".into(), MetadataCustom::ephemeral(serde_json::json!([])));

        let durable = metadata.durable_customs();
        assert_eq!(durable.len(), 1);
        assert!(durable.contains_key("repositories"));
    }
}
