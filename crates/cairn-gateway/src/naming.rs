//! Blob naming and storage layout.
//!
//! Every blob name embeds *inverted* term, version and wall-clock millis so
//! that an ascending lexicographic listing yields the most recent blob first:
//!
//! ```text
//! <prefix>__<inv term>__<inv version>__<inv millis>__<inv ulid>
//! manifest__<inv term>__<inv version>__<C|P>__<inv millis>__<inv ulid>__<codec>
//! ```
//!
//! Inversion is `u64::MAX - n` zero-padded to 20 digits. The trailing token is
//! a monotonic ULID inverted the same way, so names are globally unique (a
//! blob is never overwritten and pointers can be aliased across manifests)
//! and two names issued within one millisecond still list newest first.
//!
//! # Storage Layout
//!
//! ```text
//! {base}/{b64 cluster name}/cluster-state/{cluster uuid}/
//! ├── manifest/                 # Manifest blobs
//! ├── global-metadata/          # Durable singletons and metadata customs
//! ├── ephemeral/                # Ephemeral singletons and cluster-state customs
//! ├── index/{index uuid}/       # Per-index metadata
//! ├── routing/{index uuid}/     # Per-index routing
//! └── routing-table-diff/       # Combined routing diffs
//! ```

use base64::Engine as _;
use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use std::sync::{Mutex, PoisonError};

use chrono::Utc;
use ulid::{Generator, Ulid};

use crate::error::{RemoteStateError, Result};
use crate::manifest::CodecVersion;

/// Separator between name tokens.
pub const DELIMITER: &str = "__";

/// File-name prefix of manifest blobs.
pub const MANIFEST_PREFIX: &str = "manifest";

/// File-name prefix of routing-table diff blobs.
pub const ROUTING_DIFF_PREFIX: &str = "routing_table_diff";

const CLUSTER_STATE_DIR: &str = "cluster-state";
const INVERTED_WIDTH: usize = 20;

/// Inverts `n` so that larger values sort first lexicographically.
#[must_use]
pub fn invert_long(n: u64) -> String {
    format!("{:0width$}", u64::MAX - n, width = INVERTED_WIDTH)
}

/// Reverses [`invert_long`].
///
/// # Errors
///
/// Returns [`RemoteStateError::Serialization`] if `token` is not an inverted
/// long.
pub fn revert_long(token: &str) -> Result<u64> {
    if token.len() != INVERTED_WIDTH {
        return Err(RemoteStateError::serialization(format!(
            "inverted token must have {INVERTED_WIDTH} digits: {token}"
        )));
    }
    token
        .parse::<u64>()
        .map(|inverted| u64::MAX - inverted)
        .map_err(|e| RemoteStateError::serialization(format!("bad inverted token {token}: {e}")))
}

static ULIDS: Mutex<Generator> = Mutex::new(Generator::new());

fn now_millis() -> u64 {
    u64::try_from(Utc::now().timestamp_millis()).unwrap_or_default()
}

/// Returns a unique token that sorts before every token this process issued
/// earlier.
fn descending_token() -> String {
    let id = ULIDS
        .lock()
        .unwrap_or_else(PoisonError::into_inner)
        .generate()
        .unwrap_or_else(|_| Ulid::new());
    Ulid(u128::MAX - id.0).to_string()
}

/// Builds a unique file name for a component blob.
#[must_use]
pub fn blob_file_name(prefix: &str, term: u64, version: u64) -> String {
    [
        prefix.to_string(),
        invert_long(term),
        invert_long(version),
        invert_long(now_millis()),
        descending_token(),
    ]
    .join(DELIMITER)
}

/// Encodes a cluster name into a path-safe token.
#[must_use]
pub fn encode_cluster_name(cluster_name: &str) -> String {
    URL_SAFE_NO_PAD.encode(cluster_name.as_bytes())
}

/// Path builder for one cluster name under a base path.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ClusterPaths {
    root: String,
}

impl ClusterPaths {
    /// Creates the path builder for `cluster_name` under `base_path`.
    #[must_use]
    pub fn new(base_path: &str, cluster_name: &str) -> Self {
        Self {
            root: format!(
                "{base_path}/{}/{CLUSTER_STATE_DIR}/",
                encode_cluster_name(cluster_name)
            ),
        }
    }

    /// Prefix under which every cluster UUID directory lives.
    #[must_use]
    pub fn cluster_root(&self) -> &str {
        &self.root
    }

    /// Directory of one cluster UUID.
    #[must_use]
    pub fn uuid_root(&self, cluster_uuid: &str) -> String {
        format!("{}{cluster_uuid}/", self.root)
    }

    /// Manifest directory of one cluster UUID.
    #[must_use]
    pub fn manifest_dir(&self, cluster_uuid: &str) -> String {
        format!("{}manifest/", self.uuid_root(cluster_uuid))
    }

    /// Directory of durable global-metadata blobs.
    #[must_use]
    pub fn global_metadata_dir(&self, cluster_uuid: &str) -> String {
        format!("{}global-metadata/", self.uuid_root(cluster_uuid))
    }

    /// Directory of ephemeral blobs.
    #[must_use]
    pub fn ephemeral_dir(&self, cluster_uuid: &str) -> String {
        format!("{}ephemeral/", self.uuid_root(cluster_uuid))
    }

    /// Directory of one index's metadata blobs.
    #[must_use]
    pub fn index_dir(&self, cluster_uuid: &str, index_uuid: &str) -> String {
        format!("{}index/{index_uuid}/", self.uuid_root(cluster_uuid))
    }

    /// Directory of one index's routing blobs.
    #[must_use]
    pub fn routing_dir(&self, cluster_uuid: &str, index_uuid: &str) -> String {
        format!("{}routing/{index_uuid}/", self.uuid_root(cluster_uuid))
    }

    /// Directory of routing-table diff blobs.
    #[must_use]
    pub fn routing_diff_dir(&self, cluster_uuid: &str) -> String {
        format!("{}routing-table-diff/", self.uuid_root(cluster_uuid))
    }

    /// Extracts the cluster UUID from a blob path under this cluster root.
    #[must_use]
    pub fn cluster_uuid_of<'a>(&self, path: &'a str) -> Option<&'a str> {
        path.strip_prefix(self.root.as_str())?
            .split('/')
            .next()
            .filter(|uuid| !uuid.is_empty())
    }
}

/// Parsed manifest file name.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ManifestFileName {
    /// Leadership term.
    pub term: u64,
    /// Cluster-state version.
    pub version: u64,
    /// Whether the manifest is committed.
    pub committed: bool,
    /// Upload wall-clock time in epoch millis.
    pub timestamp_millis: u64,
    /// Codec the manifest body was written with.
    pub codec: CodecVersion,
}

impl ManifestFileName {
    /// Formats a fresh, unique manifest file name.
    #[must_use]
    pub fn format(term: u64, version: u64, committed: bool, codec: CodecVersion) -> String {
        [
            MANIFEST_PREFIX.to_string(),
            invert_long(term),
            invert_long(version),
            if committed { "C" } else { "P" }.to_string(),
            invert_long(now_millis()),
            descending_token(),
            codec.as_u8().to_string(),
        ]
        .join(DELIMITER)
    }

    /// Parses a manifest file name (the last path segment).
    ///
    /// Legacy five-token names without ULID and codec are read as codec V0.
    ///
    /// # Errors
    ///
    /// Returns [`RemoteStateError::Serialization`] if the name is malformed.
    pub fn parse(file_name: &str) -> Result<Self> {
        let tokens: Vec<&str> = file_name.split(DELIMITER).collect();
        let malformed =
            || RemoteStateError::serialization(format!("malformed manifest name: {file_name}"));

        let codec = match tokens.as_slice() {
            [MANIFEST_PREFIX, _, _, _, _] => CodecVersion::V0,
            [MANIFEST_PREFIX, _, _, _, _, _, codec] => {
                let raw = codec.parse::<u8>().map_err(|_| malformed())?;
                CodecVersion::try_from(raw).map_err(|_| malformed())?
            }
            _ => return Err(malformed()),
        };
        let committed = match tokens[3] {
            "C" => true,
            "P" => false,
            _ => return Err(malformed()),
        };

        Ok(Self {
            term: revert_long(tokens[1])?,
            version: revert_long(tokens[2])?,
            committed,
            timestamp_millis: revert_long(tokens[4])?,
            codec,
        })
    }
}

/// Returns the last segment of a blob path.
#[must_use]
pub fn file_name(path: &str) -> &str {
    path.rsplit('/').next().unwrap_or(path)
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    #[test]
    fn test_invert_roundtrip_and_width() {
        assert_eq!(invert_long(0).len(), 20);
        assert_eq!(invert_long(u64::MAX), "00000000000000000000");
        assert_eq!(revert_long(&invert_long(42)).unwrap(), 42);
        assert!(revert_long("123").is_err());
    }

    #[test]
    fn test_manifest_name_roundtrip() {
        let name = ManifestFileName::format(3, 17, true, CodecVersion::V3);
        let parsed = ManifestFileName::parse(&name).expect("parse");
        assert_eq!(parsed.term, 3);
        assert_eq!(parsed.version, 17);
        assert!(parsed.committed);
        assert_eq!(parsed.codec, CodecVersion::V3);
    }

    #[test]
    fn test_legacy_manifest_name_is_codec_v0() {
        let name = [
            "manifest",
            &invert_long(1),
            &invert_long(2),
            "P",
            &invert_long(1000),
        ]
        .join(DELIMITER);
        let parsed = ManifestFileName::parse(&name).expect("parse");
        assert_eq!(parsed.codec, CodecVersion::V0);
        assert!(!parsed.committed);
        assert_eq!(parsed.timestamp_millis, 1000);
    }

    #[test]
    fn test_committed_sorts_before_pending_for_same_version() {
        let committed = ManifestFileName::format(1, 5, true, CodecVersion::V3);
        let pending = ManifestFileName::format(1, 5, false, CodecVersion::V3);
        assert!(committed < pending);
    }

    #[test]
    fn test_names_issued_back_to_back_list_newest_first() {
        let manifests: Vec<String> = (0..200)
            .map(|_| ManifestFileName::format(4, 9, true, CodecVersion::V3))
            .collect();
        assert!(manifests.windows(2).all(|w| w[1] < w[0]));

        let blobs: Vec<String> = (0..200).map(|_| blob_file_name("nodes", 4, 9)).collect();
        assert!(blobs.windows(2).all(|w| w[1] < w[0]));
    }

    #[test]
    fn test_blob_names_are_unique() {
        let a = blob_file_name("templates", 1, 1);
        let b = blob_file_name("templates", 1, 1);
        assert_ne!(a, b);
    }

    #[test]
    fn test_cluster_paths_layout() {
        let paths = ClusterPaths::new("base", "prod/east");
        let root = paths.cluster_root().to_string();
        let encoded = encode_cluster_name("prod/east");
        assert!(!encoded.contains('/'));
        assert_eq!(root, format!("base/{encoded}/cluster-state/"));
        assert_eq!(
            paths.index_dir("u1", "idx"),
            format!("{root}u1/index/idx/")
        );
        assert_eq!(
            paths.cluster_uuid_of(&format!("{root}u1/manifest/m")),
            Some("u1")
        );
        assert_eq!(paths.cluster_uuid_of("elsewhere/u1"), None);
    }

    proptest! {
        #[test]
        fn prop_newer_manifests_list_first(
            term in 0u64..1_000,
            version in 0u64..1_000_000,
            bump_term in any::<bool>(),
        ) {
            let older = ManifestFileName::format(term, version, true, CodecVersion::V3);
            let newer = if bump_term {
                ManifestFileName::format(term + 1, 0, true, CodecVersion::V3)
            } else {
                ManifestFileName::format(term, version + 1, true, CodecVersion::V3)
            };
            prop_assert!(newer < older);
        }

        #[test]
        fn prop_inversion_reverses_order(a in any::<u64>(), b in any::<u64>()) {
            prop_assume!(a < b);
            prop_assert!(invert_long(b) < invert_long(a));
        }
    }
}
