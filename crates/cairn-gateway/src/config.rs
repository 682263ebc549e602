//! Remote-state configuration.
//!
//! Configuration is split into a node-scope part that is fixed once the
//! coordinator is constructed ([`RemoteStateConfig`]) and a dynamic part
//! ([`RemoteStateSettings`]) that can be swapped at runtime. Every
//! orchestrating call takes one immutable snapshot of the dynamic settings
//! at its start.
//!
//! # Environment Variables
//!
//! | Variable | Default |
//! |----------|---------|
//! | `CAIRN_REMOTE_STATE_ENABLED` | `false` |
//! | `CAIRN_REMOTE_STATE_BASE_PATH` | `remote-state` |
//! | `CAIRN_REMOTE_STATE_READ_TIMEOUT_MS` | `20000` |
//! | `CAIRN_REMOTE_STATE_WRITE_TIMEOUT_MS` | `20000` |
//! | `CAIRN_REMOTE_STATE_CLEANUP_INTERVAL_SECS` | `300` (`<= 0` disables) |
//! | `CAIRN_REMOTE_STATE_RETENTION_COUNT` | `10` |
//! | `CAIRN_REMOTE_STATE_SLOW_WRITE_THRESHOLD_MS` | `10000` |

use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::{RemoteStateError, Result};

/// Default read timeout.
pub const DEFAULT_READ_TIMEOUT_MS: u64 = 20_000;
/// Default write timeout.
pub const DEFAULT_WRITE_TIMEOUT_MS: u64 = 20_000;
/// Default cleanup interval.
pub const DEFAULT_CLEANUP_INTERVAL_SECS: i64 = 300;
/// Default number of manifests kept per cluster UUID.
pub const DEFAULT_RETENTION_COUNT: usize = 10;
/// Default slow-write threshold.
pub const DEFAULT_SLOW_WRITE_THRESHOLD_MS: u64 = 10_000;

/// Node-scope remote-state configuration.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct RemoteStateConfig {
    /// Whether remote cluster-state persistence is enabled on this node.
    pub enabled: bool,
    /// Root prefix of every blob written by this node.
    pub base_path: String,
    /// Initial dynamic settings.
    pub settings: RemoteStateSettings,
}

impl Default for RemoteStateConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            base_path: "remote-state".to_string(),
            settings: RemoteStateSettings::default(),
        }
    }
}

impl RemoteStateConfig {
    /// Creates an enabled configuration rooted at `base_path`.
    #[must_use]
    pub fn enabled(base_path: impl Into<String>) -> Self {
        Self {
            enabled: true,
            base_path: base_path.into(),
            settings: RemoteStateSettings::default(),
        }
    }

    /// Loads configuration from `CAIRN_REMOTE_STATE_*` environment variables.
    ///
    /// # Errors
    ///
    /// Returns [`RemoteStateError::Config`] if a variable is set but cannot be
    /// parsed, or if the resulting configuration is invalid.
    pub fn from_env() -> Result<Self> {
        let mut config = Self::default();

        if let Some(enabled) = env_bool("CAIRN_REMOTE_STATE_ENABLED")? {
            config.enabled = enabled;
        }
        if let Some(base_path) = env_string("CAIRN_REMOTE_STATE_BASE_PATH") {
            config.base_path = base_path;
        }
        if let Some(ms) = env_u64("CAIRN_REMOTE_STATE_READ_TIMEOUT_MS")? {
            config.settings.read_timeout_ms = ms;
        }
        if let Some(ms) = env_u64("CAIRN_REMOTE_STATE_WRITE_TIMEOUT_MS")? {
            config.settings.write_timeout_ms = ms;
        }
        if let Some(secs) = env_i64("CAIRN_REMOTE_STATE_CLEANUP_INTERVAL_SECS")? {
            config.settings.cleanup_interval_secs = secs;
        }
        if let Some(count) = env_u64("CAIRN_REMOTE_STATE_RETENTION_COUNT")? {
            config.settings.retention_count = usize::try_from(count).map_err(|_| {
                RemoteStateError::Config("CAIRN_REMOTE_STATE_RETENTION_COUNT is too large".into())
            })?;
        }
        if let Some(ms) = env_u64("CAIRN_REMOTE_STATE_SLOW_WRITE_THRESHOLD_MS")? {
            config.settings.slow_write_threshold_ms = ms;
        }

        config.validate()?;
        Ok(config)
    }

    /// Validates the configuration.
    ///
    /// # Errors
    ///
    /// Returns [`RemoteStateError::Config`] describing the first problem found.
    pub fn validate(&self) -> Result<()> {
        if self.base_path.trim().is_empty() {
            return Err(RemoteStateError::Config("base_path must not be empty".into()));
        }
        if self.base_path.ends_with('/') {
            return Err(RemoteStateError::Config(
                "base_path must not end with '/'".into(),
            ));
        }
        self.settings.validate()
    }
}

/// Dynamic remote-state settings.
///
/// Durations are stored as integers so the struct round-trips through any
/// serde format unchanged.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct RemoteStateSettings {
    /// Join-barrier timeout for read fan-outs, in milliseconds.
    pub read_timeout_ms: u64,
    /// Join-barrier timeout for upload fan-outs, in milliseconds.
    pub write_timeout_ms: u64,
    /// Cleanup schedule interval in seconds; `<= 0` disables the schedule.
    pub cleanup_interval_secs: i64,
    /// Number of manifests kept per cluster UUID by cleanup.
    pub retention_count: usize,
    /// Writes slower than this are logged at warn level, in milliseconds.
    pub slow_write_threshold_ms: u64,
}

impl Default for RemoteStateSettings {
    fn default() -> Self {
        Self {
            read_timeout_ms: DEFAULT_READ_TIMEOUT_MS,
            write_timeout_ms: DEFAULT_WRITE_TIMEOUT_MS,
            cleanup_interval_secs: DEFAULT_CLEANUP_INTERVAL_SECS,
            retention_count: DEFAULT_RETENTION_COUNT,
            slow_write_threshold_ms: DEFAULT_SLOW_WRITE_THRESHOLD_MS,
        }
    }
}

impl RemoteStateSettings {
    /// Returns the read timeout.
    #[must_use]
    pub const fn read_timeout(&self) -> Duration {
        Duration::from_millis(self.read_timeout_ms)
    }

    /// Returns the write timeout.
    #[must_use]
    pub const fn write_timeout(&self) -> Duration {
        Duration::from_millis(self.write_timeout_ms)
    }

    /// Returns the slow-write threshold.
    #[must_use]
    pub const fn slow_write_threshold(&self) -> Duration {
        Duration::from_millis(self.slow_write_threshold_ms)
    }

    /// Returns the cleanup interval, or `None` if the schedule is disabled.
    #[must_use]
    pub fn cleanup_interval(&self) -> Option<Duration> {
        u64::try_from(self.cleanup_interval_secs)
            .ok()
            .filter(|secs| *secs > 0)
            .map(Duration::from_secs)
    }

    /// Validates the settings.
    ///
    /// # Errors
    ///
    /// Returns [`RemoteStateError::Config`] describing the first problem found.
    pub fn validate(&self) -> Result<()> {
        if self.read_timeout_ms == 0 {
            return Err(RemoteStateError::Config(
                "read_timeout_ms must be at least 1".into(),
            ));
        }
        if self.write_timeout_ms == 0 {
            return Err(RemoteStateError::Config(
                "write_timeout_ms must be at least 1".into(),
            ));
        }
        if self.retention_count == 0 {
            return Err(RemoteStateError::Config(
                "retention_count must be at least 1".into(),
            ));
        }
        Ok(())
    }
}

fn env_string(name: &str) -> Option<String> {
    std::env::var(name).ok().and_then(|v| {
        let trimmed = v.trim();
        if trimmed.is_empty() {
            None
        } else {
            Some(trimmed.to_string())
        }
    })
}

fn env_u64(name: &str) -> Result<Option<u64>> {
    let Some(v) = env_string(name) else {
        return Ok(None);
    };
    v.parse::<u64>()
        .map(Some)
        .map_err(|e| RemoteStateError::Config(format!("{name} must be a u64: {e}")))
}

fn env_i64(name: &str) -> Result<Option<i64>> {
    let Some(v) = env_string(name) else {
        return Ok(None);
    };
    v.parse::<i64>()
        .map(Some)
        .map_err(|e| RemoteStateError::Config(format!("{name} must be an i64: {e}")))
}

fn parse_bool(name: &str, value: &str) -> Result<bool> {
    let value = value.trim().to_ascii_lowercase();
    match value.as_str() {
        "true" | "1" | "yes" | "y" => Ok(true),
        "false" | "0" | "no" | "n" => Ok(false),
        _ => Err(RemoteStateError::Config(format!(
            "{name} must be a boolean (true/false/1/0)"
        ))),
    }
}

fn env_bool(name: &str) -> Result<Option<bool>> {
    let Some(v) = env_string(name) else {
        return Ok(None);
    };
    parse_bool(name, &v).map(Some)
}
