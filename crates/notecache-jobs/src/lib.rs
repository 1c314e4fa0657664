//! # notecache-jobs
//!
//! Background content generation for the notecache derived-content cache.
//!
//! This crate provides:
//! - The cache session and its `stopped` flag
//! - The content provider trait and a queued batch worker
//! - Markdown, tag, metadata, and feature image generators
//! - The provider registry with filtered dispatch and settings-driven clears
//!
//! ## Example
//!
//! ```ignore
//! use notecache_jobs::{default_registry, CacheSession, ProviderConfig, ProviderContext, QueueFilter};
//!
//! let ctx = ProviderContext::new(db.records.clone(), host.clone(), host, CacheSession::new());
//! let registry = default_registry(ctx, ProviderConfig::from_env()).await;
//! registry
//!     .queue_files_for_all_providers(&files, &settings, QueueFilter::all())
//!     .await;
//! registry.wait_idle().await;
//! ```

pub mod provider;
pub mod providers;
pub mod registry;
pub mod session;

pub use provider::{
    tracked_kinds, ContentGenerator, ContentProvider, ProviderConfig, ProviderContext,
    ProviderStats, QueuedProvider,
};
pub use providers::{
    default_registry, FeatureImageGenerator, MarkdownGenerator, MetadataGenerator, TagGenerator,
};
pub use registry::{ContentProviderRegistry, QueueFilter};
pub use session::CacheSession;
