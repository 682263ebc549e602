//! Fixtures for exercising remote cluster-state persistence without an
//! object store.
//!
//! Tests build cluster states with [`ClusterStateFactory`] (or take the
//! ready-made [`sample_state`]), write them through a coordinator backed by a
//! [`TracingMemoryStore`], and then inspect what reached the store: which
//! paths were put, which reads were skipped, and how a write behaves when a
//! directory fails or never answers. [`TestContext`] gives every test its own
//! cluster name so tests never share manifests.
//!
//! ```rust,ignore
//! use cairn_test_utils::{ClusterStateFactory, TestContext, sample_state};
//!
//! let ctx = TestContext::new();
//! let previous = sample_state(&ctx.cluster_name);
//! let next = ClusterStateFactory::next(&previous).bump_index("logs").build();
//! ```

#![forbid(unsafe_code)]
#![deny(missing_docs)]
#![deny(rust_2018_idioms)]
#![warn(clippy::pedantic)]
#![allow(clippy::must_use_candidate)]
#![allow(clippy::expect_used)]
#![allow(clippy::unwrap_used)]
#![allow(clippy::missing_panics_doc)]

pub mod assertions;
pub mod fixtures;
pub mod storage;

pub use assertions::*;
pub use fixtures::*;
pub use storage::*;

/// Routes `cairn_core` and `cairn_gateway` debug logs to the test writer.
///
/// Safe to call from every test; only the first call installs a subscriber.
pub fn init_test_logging() {
    use tracing_subscriber::{EnvFilter, fmt};

    let filter = ["cairn_core=debug", "cairn_gateway=debug"]
        .into_iter()
        .fold(EnvFilter::from_default_env(), |filter, directive| {
            filter.add_directive(directive.parse().expect("valid directive"))
        });
    fmt()
        .with_env_filter(filter)
        .with_test_writer()
        .try_init()
        .ok();
}
