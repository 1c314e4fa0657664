//! # notecache-db
//!
//! SQLite storage layer for the notecache derived-content cache.
//!
//! This crate provides:
//! - Connection pool management
//! - The path-keyed record store with schema and content versioning
//! - Preview text and feature image side stores with move guards
//! - The diff calculator
//! - The local key-value namespace for UI-side state
//!
//! ## Example
//!
//! ```rust,ignore
//! use notecache_db::{calculate_diff, CacheDatabase};
//!
//! let db = CacheDatabase::open(".notecache/cache.db").await?;
//! let diff = calculate_diff(&files, db.records.snapshot());
//! db.records.record_file_changes(&diff.to_add).await?;
//! ```

pub mod blobs;
pub mod diff;
pub mod local_storage;
pub mod locks;
pub mod pool;
pub mod records;
pub mod schema;

use std::path::Path;
use std::sync::Arc;

pub use blobs::{compute_content_hash, BlobStore, FeatureImageBlob, MoveGuard};
pub use diff::calculate_diff;
pub use local_storage::{LocalStorage, UiPreferences};
pub use locks::{PathGuard, PathLocks};
pub use pool::{create_memory_pool, create_pool, create_pool_with_config, PoolConfig};
pub use records::RecordStore;
pub use schema::{SchemaOutcome, StoreVersions};

use notecache_core::Result;

/// Opened content database.
#[derive(Clone)]
pub struct CacheDatabase {
    /// The underlying connection pool.
    pub pool: sqlx::SqlitePool,
    /// Path-keyed records and side stores.
    pub records: Arc<RecordStore>,
}

impl CacheDatabase {
    /// Open (creating if missing) the database file at `path`.
    pub async fn open(path: impl AsRef<Path>) -> Result<Self> {
        Self::open_with_config(path, PoolConfig::default()).await
    }

    pub async fn open_with_config(path: impl AsRef<Path>, config: PoolConfig) -> Result<Self> {
        let pool = create_pool_with_config(path.as_ref(), config).await?;
        Self::from_pool(pool).await
    }

    /// Private in-memory database.
    pub async fn in_memory() -> Result<Self> {
        Self::from_pool(create_memory_pool().await?).await
    }

    pub async fn from_pool(pool: sqlx::SqlitePool) -> Result<Self> {
        let records = RecordStore::open(pool.clone()).await?;
        Ok(Self {
            pool,
            records: Arc::new(records),
        })
    }
}
