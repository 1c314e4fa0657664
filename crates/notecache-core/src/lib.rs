//! # notecache-core
//!
//! Core types, traits, and abstractions for the notecache derived-content
//! cache.
//!
//! This crate provides:
//! - File records, content kinds, and metadata wait masks
//! - Cache settings deciding which content is produced
//! - Host traits for the vault, metadata index, and progress notice
//! - The store event bus and tag/property read models
//! - Centralized defaults and the shared error type

pub mod content;
pub mod defaults;
pub mod error;
pub mod events;
pub mod memory_host;
pub mod models;
pub mod settings;
pub mod tags;
pub mod traits;

pub use content::{ContentKind, ContentProviderType, WaitMask};
pub use error::{Error, Result};
pub use events::{EventBus, StoreEvent};
pub use memory_host::InMemoryVault;
pub use models::*;
pub use settings::CacheSettings;
pub use tags::{PropertyTree, TagNode, TagTree};
pub use traits::{
    CachedMetadata, LogNotice, MetadataEvent, MetadataIndex, ProgressNotice, VaultEvent,
    VaultHost,
};
