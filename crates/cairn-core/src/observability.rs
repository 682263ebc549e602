//! Observability infrastructure for cairn.
//!
//! Structured logging with consistent spans. Every orchestrating call in
//! `cairn-gateway` runs inside a [`remote_state_span`] so component-level
//! events carry the cluster identity.

use std::sync::Once;
use tracing::Span;
use tracing_subscriber::{EnvFilter, fmt, layer::SubscriberExt, util::SubscriberInitExt};

static INIT: Once = Once::new();

/// Log output format.
#[derive(Debug, Clone, Copy, Default)]
pub enum LogFormat {
    /// JSON structured logs (for production).
    Json,
    /// Pretty-printed logs (for development).
    #[default]
    Pretty,
}

/// Initializes the logging subsystem.
///
/// Call once at application startup. Safe to call multiple times;
/// subsequent calls are no-ops.
///
/// # Environment Variables
///
/// - `RUST_LOG`: Controls log levels (e.g., `info`, `cairn_gateway=debug`)
///
/// # Example
///
/// ```rust
/// use cairn_core::observability::{init_logging, LogFormat};
///
/// init_logging(LogFormat::Pretty);
/// ```
pub fn init_logging(format: LogFormat) {
    INIT.call_once(|| {
        let env_filter =
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));

        let registry = tracing_subscriber::registry().with(env_filter);
        let installed = match format {
            LogFormat::Json => registry.with(fmt::layer().json()).try_init(),
            LogFormat::Pretty => registry.with(fmt::layer().pretty()).try_init(),
        };
        if installed.is_err() {
            tracing::debug!("global subscriber already set; keeping it");
        }
    });
}

/// Creates a span for remote-state operations with standard fields.
///
/// # Example
///
/// ```rust
/// use cairn_core::observability::remote_state_span;
///
/// let span = remote_state_span("write_full", "prod-cluster", "uuid-1");
/// let _guard = span.enter();
/// ```
#[must_use]
pub fn remote_state_span(operation: &str, cluster_name: &str, cluster_uuid: &str) -> Span {
    tracing::info_span!(
        "remote_state",
        op = operation,
        cluster = cluster_name,
        cluster_uuid = cluster_uuid,
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_init_logging_succeeds() {
        init_logging(LogFormat::Pretty);
        init_logging(LogFormat::Json); // Second call is a no-op
    }

    #[test]
    fn test_init_logging_keeps_existing_subscriber() {
        tracing_subscriber::fmt().with_test_writer().try_init().ok();
        init_logging(LogFormat::Json);
        tracing::debug!("existing subscriber still receives events");
    }

    #[test]
    fn test_span_helper_creates_span() {
        let span = remote_state_span("read_latest", "c1", "uuid-1");
        let _guard = span.enter();
        tracing::info!("message in span");
    }
}
