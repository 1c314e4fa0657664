//! Table definitions and version checks for the content database.

use sqlx::SqlitePool;
use tracing::{info, warn};

use notecache_core::{defaults, Result};

/// Versions the stored data must match.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StoreVersions {
    /// Table layout. A mismatch drops and recreates every table.
    pub schema: i64,
    /// Derived-content semantics. A mismatch clears every record.
    pub content: i64,
}

impl Default for StoreVersions {
    fn default() -> Self {
        Self {
            schema: defaults::DB_SCHEMA_VERSION,
            content: defaults::DB_CONTENT_VERSION,
        }
    }
}

/// What happened while reconciling stored versions.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SchemaOutcome {
    pub recreated: bool,
    pub invalidated: bool,
}

const SCHEMA_KEY: &str = "schema_version";
const CONTENT_KEY: &str = "content_version";

const CREATE_TABLES: &[&str] = &[
    r#"
    CREATE TABLE IF NOT EXISTS file_records (
        path TEXT PRIMARY KEY NOT NULL,
        mtime INTEGER NOT NULL,
        markdown_pipeline_mtime INTEGER NOT NULL DEFAULT 0,
        tags_mtime INTEGER NOT NULL DEFAULT 0,
        metadata_mtime INTEGER NOT NULL DEFAULT 0,
        feature_image_mtime INTEGER NOT NULL DEFAULT 0,
        preview_status TEXT NOT NULL DEFAULT 'unprocessed',
        feature_image_status TEXT NOT NULL DEFAULT 'unprocessed',
        feature_image_key TEXT,
        tags TEXT,
        metadata TEXT,
        word_count INTEGER,
        task_total INTEGER,
        task_unfinished INTEGER,
        properties TEXT
    )
    "#,
    r#"
    CREATE TABLE IF NOT EXISTS preview_text (
        path TEXT PRIMARY KEY NOT NULL,
        text TEXT NOT NULL
    )
    "#,
    r#"
    CREATE TABLE IF NOT EXISTS feature_image_blobs (
        path TEXT PRIMARY KEY NOT NULL,
        content_key TEXT NOT NULL,
        bytes BLOB NOT NULL
    )
    "#,
];

const DATA_TABLES: &[&str] = &["file_records", "preview_text", "feature_image_blobs"];

async fn read_version(pool: &SqlitePool, key: &str) -> Result<Option<i64>> {
    let row: Option<(i64,)> = sqlx::query_as("SELECT value FROM cache_meta WHERE key = ?")
        .bind(key)
        .fetch_optional(pool)
        .await?;
    Ok(row.map(|(value,)| value))
}

async fn write_version(pool: &SqlitePool, key: &str, value: i64) -> Result<()> {
    sqlx::query(
        "INSERT INTO cache_meta (key, value) VALUES (?, ?) \
         ON CONFLICT(key) DO UPDATE SET value = excluded.value",
    )
    .bind(key)
    .bind(value)
    .execute(pool)
    .await?;
    Ok(())
}

/// Create tables and reconcile stored versions with `versions`.
pub async fn ensure_schema(pool: &SqlitePool, versions: StoreVersions) -> Result<SchemaOutcome> {
    sqlx::query(
        "CREATE TABLE IF NOT EXISTS cache_meta (key TEXT PRIMARY KEY NOT NULL, value INTEGER NOT NULL)",
    )
    .execute(pool)
    .await?;

    let mut outcome = SchemaOutcome::default();
    let stored_schema = read_version(pool, SCHEMA_KEY).await?;

    if let Some(stored) = stored_schema.filter(|v| *v != versions.schema) {
        warn!(
            subsystem = "database",
            component = "schema",
            op = "recreate",
            stored,
            expected = versions.schema,
            "Schema version changed, recreating tables"
        );
        let mut tx = pool.begin().await?;
        for table in DATA_TABLES {
            sqlx::query(&format!("DROP TABLE IF EXISTS {table}"))
                .execute(&mut *tx)
                .await?;
        }
        tx.commit().await?;
        outcome.recreated = true;
    }

    for statement in CREATE_TABLES {
        sqlx::query(statement).execute(pool).await?;
    }
    write_version(pool, SCHEMA_KEY, versions.schema).await?;

    let stored_content = read_version(pool, CONTENT_KEY).await?;
    if let Some(stored) = stored_content.filter(|v| *v != versions.content) {
        info!(
            subsystem = "database",
            component = "schema",
            op = "invalidate",
            stored,
            expected = versions.content,
            "Content version changed, clearing cached content"
        );
        clear_tables(pool).await?;
        outcome.invalidated = true;
    }
    write_version(pool, CONTENT_KEY, versions.content).await?;

    Ok(outcome)
}

/// Delete every row from the data tables in one transaction.
pub async fn clear_tables(pool: &SqlitePool) -> Result<()> {
    let mut tx = pool.begin().await?;
    for table in DATA_TABLES {
        sqlx::query(&format!("DELETE FROM {table}"))
            .execute(&mut *tx)
            .await?;
    }
    tx.commit().await?;
    Ok(())
}
