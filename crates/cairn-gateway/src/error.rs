//! Error types for remote cluster-state operations.
//!
//! The taxonomy separates environment failures, which a caller may retry, from
//! logic failures that indicate a bug:
//!
//! - [`RemoteStateError::Transfer`]: one or more fan-out items failed or the
//!   join barrier timed out
//! - [`RemoteStateError::StateNotFound`]: nothing committed to recover from
//! - [`RemoteStateError::AmbiguousLineage`]: irreducible split of the cluster
//!   UUID history, requires manual resolution
//! - [`RemoteStateError::InvariantViolation`]: internal bug, never retried

use std::fmt;

use thiserror::Error;

/// Result type alias for remote-state operations.
pub type Result<T> = std::result::Result<T, RemoteStateError>;

/// Errors that can occur during remote-state operations.
#[derive(Debug, Error)]
pub enum RemoteStateError {
    /// A parallel transfer did not complete.
    #[error(transparent)]
    Transfer(#[from] TransferFailure),

    /// No committed manifest exists for the requested cluster.
    #[error("no committed cluster state for cluster [{cluster_name}] uuid [{cluster_uuid}]")]
    StateNotFound {
        /// Cluster name that was queried.
        cluster_name: String,
        /// Cluster UUID that was queried.
        cluster_uuid: String,
    },

    /// The lineage resolver found more than one irreducible history.
    #[error("multiple valid cluster states found, heads: {heads:?}")]
    AmbiguousLineage {
        /// Remaining head cluster UUIDs.
        heads: Vec<String>,
    },

    /// An internal invariant was violated.
    #[error("invariant violation: {message}")]
    InvariantViolation {
        /// Description of the violated invariant.
        message: String,
    },

    /// A blob-store or core operation failed.
    #[error(transparent)]
    Core(#[from] cairn_core::Error),

    /// A blob payload could not be encoded, decoded or verified.
    #[error("serialization error: {message}")]
    Serialization {
        /// Description of the serialization failure.
        message: String,
    },

    /// Configuration is invalid.
    #[error("configuration error: {0}")]
    Config(String),
}

impl RemoteStateError {
    /// Creates an invariant violation.
    #[must_use]
    pub fn invariant(message: impl Into<String>) -> Self {
        Self::InvariantViolation {
            message: message.into(),
        }
    }

    /// Creates a serialization error.
    #[must_use]
    pub fn serialization(message: impl Into<String>) -> Self {
        Self::Serialization {
            message: message.into(),
        }
    }

    /// Returns true if a caller may reasonably retry the operation.
    ///
    /// Logic failures (invariant violations, ambiguous lineage, bad config)
    /// are never retryable.
    #[must_use]
    pub const fn is_retryable(&self) -> bool {
        match self {
            Self::Transfer(_) => true,
            Self::Core(err) => matches!(err, cairn_core::Error::Storage { .. }),
            Self::StateNotFound { .. }
            | Self::AmbiguousLineage { .. }
            | Self::InvariantViolation { .. }
            | Self::Serialization { .. }
            | Self::Config(_) => false,
        }
    }

    /// Returns true if the underlying blob does not exist.
    #[must_use]
    pub const fn is_not_found(&self) -> bool {
        matches!(self, Self::Core(err) if err.is_not_found())
    }
}

impl From<serde_json::Error> for RemoteStateError {
    fn from(err: serde_json::Error) -> Self {
        Self::serialization(err.to_string())
    }
}

/// Aggregated failure of a parallel transfer.
///
/// Names every item that did not complete successfully (failed, panicked or
/// still in flight at the deadline) and carries every captured cause.
#[derive(Debug)]
pub struct TransferFailure {
    /// Label of the orchestrating operation, e.g. `upload` or `read`.
    pub operation: String,
    /// Names of the items that did not complete successfully, sorted.
    pub incomplete: Vec<String>,
    /// Whether the join barrier timed out.
    pub timed_out: bool,
    /// Captured item errors, keyed by item name.
    pub causes: Vec<(String, RemoteStateError)>,
}

impl TransferFailure {
    /// Returns true if the named item is listed as incomplete.
    #[must_use]
    pub fn names(&self, item: &str) -> bool {
        self.incomplete.iter().any(|name| name == item)
    }
}

impl fmt::Display for TransferFailure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.timed_out {
            write!(
                f,
                "timed out waiting for {} of: [{}]",
                self.operation,
                self.incomplete.join(", ")
            )?;
        } else {
            write!(
                f,
                "{} failed for: [{}]",
                self.operation,
                self.incomplete.join(", ")
            )?;
        }
        for (item, cause) in &self.causes {
            write!(f, "; {item}: {cause}")?;
        }
        Ok(())
    }
}

impl std::error::Error for TransferFailure {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        self.causes
            .first()
            .map(|(_, cause)| cause as &(dyn std::error::Error + 'static))
    }
}
