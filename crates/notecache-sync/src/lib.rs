//! # notecache-sync
//!
//! Keeps the notecache record store in step with the vault.
//!
//! This crate provides:
//! - A cancelable trailing-edge debouncer
//! - The metadata readiness gate that holds markdown files until the host
//!   index has an entry for them
//! - The vault sync orchestrator (initial load, diffs, rename migration,
//!   tag and property trees)
//! - The rebuild controller and its progress notice
//!
//! ## Example
//!
//! ```ignore
//! use notecache_sync::{SyncConfig, VaultSyncBuilder};
//!
//! let sync = VaultSyncBuilder::new(db.records.clone(), host.clone(), host)
//!     .with_settings(settings)
//!     .with_config(SyncConfig::from_env())
//!     .build()
//!     .await;
//! sync.start().await?;
//! let tags = sync.tag_tree().borrow().clone();
//! ```

pub mod config;
pub mod debounce;
pub mod gate;
pub mod notice;
pub mod orchestrator;
pub mod rebuild;

pub use config::SyncConfig;
pub use debounce::Debouncer;
pub use gate::{active_mask, MetadataReadinessGate};
pub use notice::{PendingWorkSource, RebuildNotice, RemainingCounts, StorePendingWork};
pub use orchestrator::{SyncReport, VaultSync, VaultSyncBuilder};
pub use rebuild::{expected_work, REBUILD_SOURCE};
