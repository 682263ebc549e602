//! Stale remote-state cleanup.
//!
//! Every write publishes a new manifest and usually a few component blobs;
//! nothing is ever overwritten. Without cleanup the store grows unbounded.
//! This module provides:
//!
//! - **Retention policy**: keep the newest N manifests per cluster UUID plus
//!   the latest committed one
//! - **Retention cleaner**: deletes stale manifests and the blobs only they
//!   reference
//! - **Scheduler**: runs a cleanup task every `cleanup_interval`, pausing
//!   while the interval is `<= 0`
//!
//! # Usage
//!
//! ```rust,ignore
//! use cairn_gateway::gc::{CleanupScheduler, RetentionCleaner};
//!
//! let cleaner = Arc::new(RetentionCleaner::new(store, "remote-state", "prod"));
//! let handle = CleanupScheduler::new(cleaner, coordinator.subscribe_settings()).spawn();
//! // ...
//! handle.shutdown().await;
//! ```

mod collector;
mod policy;
mod scheduler;

pub use collector::{CleanupResult, RetentionCleaner, StaleStateCleanup};
pub use policy::RetentionPolicy;
pub use scheduler::{CleanupHandle, CleanupScheduler};
