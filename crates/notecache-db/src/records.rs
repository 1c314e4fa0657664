//! Durable path-keyed record store with an in-memory mirror.
//!
//! Reads are served from the mirror, which is loaded when the store opens.
//! Writes commit to SQLite first and update the mirror only on success, so
//! a failed write leaves the file for the next diff pass. The one exception
//! is [`RecordStore::seed_memory_file`], used during renames while the
//! caller holds the path locks.

use std::collections::{HashMap, HashSet};
use std::sync::{PoisonError, RwLock};
use std::time::Instant;

use serde::de::DeserializeOwned;
use sqlx::{SqliteConnection, SqlitePool};
use tracing::{debug, info, warn};

use notecache_core::{
    defaults, ContentKind, ContentPatch, ContentProviderType, ContentStatus, ContentUpdate,
    EventBus, FileMetadata, FileRecord, PropertyMap, Result, StoreEvent, VaultFile,
};

use crate::blobs::{
    delete_feature_image, write_feature_image, write_preview_text, BlobStore, FeatureImageBlob,
    MoveGuard,
};
use crate::locks::{PathGuard, PathLocks};
use crate::schema::{clear_tables, ensure_schema, SchemaOutcome, StoreVersions};

#[derive(sqlx::FromRow)]
struct RecordRow {
    path: String,
    mtime: i64,
    markdown_pipeline_mtime: i64,
    tags_mtime: i64,
    metadata_mtime: i64,
    feature_image_mtime: i64,
    preview_status: String,
    feature_image_status: String,
    feature_image_key: Option<String>,
    tags: Option<String>,
    metadata: Option<String>,
    word_count: Option<i64>,
    task_total: Option<i64>,
    task_unfinished: Option<i64>,
    properties: Option<String>,
}

fn parse_json<T: DeserializeOwned>(path: &str, column: &str, raw: Option<String>) -> Option<T> {
    let raw = raw?;
    match serde_json::from_str(&raw) {
        Ok(value) => Some(value),
        Err(e) => {
            warn!(path, column, error = %e, "Unreadable cached column, treating as absent");
            None
        }
    }
}

impl RecordRow {
    fn into_record(self) -> FileRecord {
        let tags: Option<Vec<String>> = parse_json(&self.path, "tags", self.tags);
        let metadata: Option<FileMetadata> = parse_json(&self.path, "metadata", self.metadata);
        let properties: Option<PropertyMap> =
            parse_json(&self.path, "properties", self.properties);
        FileRecord {
            path: self.path,
            mtime: self.mtime,
            markdown_pipeline_mtime: self.markdown_pipeline_mtime,
            tags_mtime: self.tags_mtime,
            metadata_mtime: self.metadata_mtime,
            feature_image_mtime: self.feature_image_mtime,
            preview_status: ContentStatus::parse(&self.preview_status),
            feature_image_status: ContentStatus::parse(&self.feature_image_status),
            feature_image_key: self.feature_image_key,
            tags,
            metadata,
            word_count: self.word_count,
            task_total: self.task_total,
            task_unfinished: self.task_unfinished,
            properties,
        }
    }
}

fn to_json<T: serde::Serialize>(value: &Option<T>) -> Result<Option<String>> {
    value
        .as_ref()
        .map(serde_json::to_string)
        .transpose()
        .map_err(Into::into)
}

async fn upsert_record(conn: &mut SqliteConnection, record: &FileRecord) -> Result<()> {
    sqlx::query(
        r#"
        INSERT INTO file_records (
            path, mtime, markdown_pipeline_mtime, tags_mtime, metadata_mtime,
            feature_image_mtime, preview_status, feature_image_status, feature_image_key,
            tags, metadata, word_count, task_total, task_unfinished, properties
        ) VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
        ON CONFLICT(path) DO UPDATE SET
            mtime = excluded.mtime,
            markdown_pipeline_mtime = excluded.markdown_pipeline_mtime,
            tags_mtime = excluded.tags_mtime,
            metadata_mtime = excluded.metadata_mtime,
            feature_image_mtime = excluded.feature_image_mtime,
            preview_status = excluded.preview_status,
            feature_image_status = excluded.feature_image_status,
            feature_image_key = excluded.feature_image_key,
            tags = excluded.tags,
            metadata = excluded.metadata,
            word_count = excluded.word_count,
            task_total = excluded.task_total,
            task_unfinished = excluded.task_unfinished,
            properties = excluded.properties
        "#,
    )
    .bind(&record.path)
    .bind(record.mtime)
    .bind(record.markdown_pipeline_mtime)
    .bind(record.tags_mtime)
    .bind(record.metadata_mtime)
    .bind(record.feature_image_mtime)
    .bind(record.preview_status.as_str())
    .bind(record.feature_image_status.as_str())
    .bind(&record.feature_image_key)
    .bind(to_json(&record.tags)?)
    .bind(to_json(&record.metadata)?)
    .bind(record.word_count)
    .bind(record.task_total)
    .bind(record.task_unfinished)
    .bind(to_json(&record.properties)?)
    .execute(&mut *conn)
    .await?;
    Ok(())
}

async fn delete_path(conn: &mut SqliteConnection, path: &str) -> Result<()> {
    for statement in [
        "DELETE FROM file_records WHERE path = ?",
        "DELETE FROM preview_text WHERE path = ?",
        "DELETE FROM feature_image_blobs WHERE path = ?",
    ] {
        sqlx::query(statement).bind(path).execute(&mut *conn).await?;
    }
    Ok(())
}

/// Persistent `path -> FileRecord` store with preview and image side stores.
pub struct RecordStore {
    pool: SqlitePool,
    memory: RwLock<HashMap<String, FileRecord>>,
    blobs: BlobStore,
    locks: PathLocks,
    events: EventBus<StoreEvent>,
    schema_outcome: SchemaOutcome,
}

impl RecordStore {
    /// Open the store with the current schema and content versions.
    pub async fn open(pool: SqlitePool) -> Result<Self> {
        Self::open_with_versions(pool, StoreVersions::default()).await
    }

    pub async fn open_with_versions(pool: SqlitePool, versions: StoreVersions) -> Result<Self> {
        let start = Instant::now();
        let schema_outcome = ensure_schema(&pool, versions).await?;

        let rows: Vec<RecordRow> = sqlx::query_as("SELECT * FROM file_records")
            .fetch_all(&pool)
            .await?;
        let memory: HashMap<String, FileRecord> = rows
            .into_iter()
            .map(|row| {
                let record = row.into_record();
                (record.path.clone(), record)
            })
            .collect();

        info!(
            subsystem = "database",
            component = "records",
            op = "open",
            count = memory.len(),
            recreated = schema_outcome.recreated,
            invalidated = schema_outcome.invalidated,
            duration_ms = start.elapsed().as_millis() as u64,
            "Record store opened"
        );

        Ok(Self {
            blobs: BlobStore::new(pool.clone()),
            pool,
            memory: RwLock::new(memory),
            locks: PathLocks::default(),
            events: EventBus::new(defaults::EVENT_BUS_CAPACITY),
            schema_outcome,
        })
    }

    pub fn pool(&self) -> &SqlitePool {
        &self.pool
    }

    pub fn blobs(&self) -> &BlobStore {
        &self.blobs
    }

    pub fn events(&self) -> &EventBus<StoreEvent> {
        &self.events
    }

    /// Version reconciliation performed when the store opened.
    pub fn schema_outcome(&self) -> SchemaOutcome {
        self.schema_outcome
    }

    /// Lock `paths` against concurrent record writes.
    pub async fn lock_paths<I, S>(&self, paths: I) -> PathGuard
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        self.locks.lock(paths).await
    }

    // =========================================================================
    // READS
    // =========================================================================

    pub fn get_file(&self, path: &str) -> Option<FileRecord> {
        self.memory
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(path)
            .cloned()
    }

    /// Records for the paths that exist, in input order.
    pub fn get_files<S: AsRef<str>>(&self, paths: &[S]) -> Vec<FileRecord> {
        let memory = self.memory.read().unwrap_or_else(PoisonError::into_inner);
        paths
            .iter()
            .filter_map(|path| memory.get(path.as_ref()).cloned())
            .collect()
    }

    pub fn contains(&self, path: &str) -> bool {
        self.memory
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .contains_key(path)
    }

    pub fn len(&self) -> usize {
        self.memory.read().unwrap_or_else(PoisonError::into_inner).len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Copy of every record, keyed by path.
    pub fn snapshot(&self) -> HashMap<String, FileRecord> {
        self.memory
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    /// Visit every record. The mirror is read-locked for the whole scan, so
    /// `callback` must not call back into the store.
    pub fn for_each_file<F: FnMut(&FileRecord)>(&self, mut callback: F) {
        let memory = self.memory.read().unwrap_or_else(PoisonError::into_inner);
        for record in memory.values() {
            callback(record);
        }
    }

    /// Paths where any of `kinds` applies and has no trusted value.
    pub fn get_files_needing_any_content(&self, kinds: &[ContentKind]) -> HashSet<String> {
        let mut paths = HashSet::new();
        self.for_each_file(|record| {
            if record.needs_any_content(kinds) {
                paths.insert(record.path.clone());
            }
        });
        paths
    }

    pub fn count_files_needing_any_content(&self, kinds: &[ContentKind]) -> usize {
        let mut count = 0;
        self.for_each_file(|record| {
            if record.needs_any_content(kinds) {
                count += 1;
            }
        });
        count
    }

    // =========================================================================
    // WRITES
    // =========================================================================

    /// Write `record` at `path`. The caller owns every field.
    pub async fn set_file(&self, path: &str, mut record: FileRecord) -> Result<()> {
        record.path = path.to_string();
        let mut conn = self.pool.acquire().await?;
        upsert_record(&mut conn, &record).await?;
        self.memory
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(path.to_string(), record);
        Ok(())
    }

    /// Write `record` into the mirror only, ahead of the durable write.
    pub fn seed_memory_file(&self, path: &str, mut record: FileRecord) {
        record.path = path.to_string();
        self.memory
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(path.to_string(), record);
    }

    /// Record new or changed files from a diff pass.
    ///
    /// Existing records keep their derived content and watermarks; only the
    /// mtime moves, which marks stale content as absent. An mtime that moves
    /// backwards also resets every watermark, since older watermarks would
    /// still compare as fresh.
    pub async fn record_file_changes(&self, files: &[VaultFile]) -> Result<Vec<FileRecord>> {
        let mut written = Vec::with_capacity(files.len());
        for chunk in files.chunks(defaults::STORE_WRITE_BATCH) {
            let _guard = self.locks.lock(chunk.iter().map(|f| f.path.as_str())).await;
            let records: Vec<FileRecord> = chunk
                .iter()
                .map(|file| match self.get_file(&file.path) {
                    Some(mut record) => {
                        if file.mtime < record.mtime {
                            for provider in ContentProviderType::ALL {
                                record.set_watermark(provider, 0);
                            }
                        }
                        record.mtime = file.mtime;
                        record
                    }
                    None => FileRecord::new(&file.path, file.mtime),
                })
                .collect();

            let mut tx = self.pool.begin().await?;
            for record in &records {
                upsert_record(&mut tx, record).await?;
            }
            tx.commit().await?;

            {
                let mut memory = self.memory.write().unwrap_or_else(PoisonError::into_inner);
                for record in &records {
                    memory.insert(record.path.clone(), record.clone());
                }
            }
            written.extend(records);
        }

        if !written.is_empty() {
            debug!(
                subsystem = "database",
                component = "records",
                op = "record_changes",
                count = written.len(),
                "File changes recorded"
            );
            self.events.emit(StoreEvent::FilesWritten {
                paths: written.iter().map(|r| r.path.clone()).collect(),
            });
        }
        Ok(written)
    }

    /// Remove records and their side-store entries.
    pub async fn remove_files(&self, paths: &[String]) -> Result<usize> {
        let mut removed = 0;
        for chunk in paths.chunks(defaults::STORE_WRITE_BATCH) {
            let _guard = self.locks.lock(chunk).await;
            let mut tx = self.pool.begin().await?;
            for path in chunk {
                delete_path(&mut tx, path).await?;
            }
            tx.commit().await?;

            let mut memory = self.memory.write().unwrap_or_else(PoisonError::into_inner);
            for path in chunk {
                if memory.remove(path).is_some() {
                    removed += 1;
                }
            }
            drop(memory);
            self.blobs.evict(chunk);
        }
        if !paths.is_empty() {
            debug!(
                subsystem = "database",
                component = "records",
                op = "remove",
                count = removed,
                "Records removed"
            );
            self.events.emit(StoreEvent::FilesRemoved {
                paths: paths.to_vec(),
            });
        }
        Ok(removed)
    }

    /// Delete every record and side-store entry. The mirror is only cleared
    /// once the durable clear commits.
    pub async fn clear_database(&self) -> Result<()> {
        let _guard = self.locks.lock_all().await;
        clear_tables(&self.pool).await?;
        self.memory
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .clear();
        self.blobs.clear_cache();
        info!(
            subsystem = "database",
            component = "records",
            op = "clear",
            "Record store cleared"
        );
        self.events.emit(StoreEvent::Cleared);
        Ok(())
    }

    /// Commit one provider's output for `path`.
    ///
    /// Only the fields owned by the patch's provider change. Returns `false`
    /// without writing when no record exists, so a provider never creates a
    /// blank record for a path that was renamed or removed meanwhile.
    pub async fn update_content(&self, path: &str, patch: ContentPatch) -> Result<bool> {
        let _guard = self.locks.lock_one(path).await;
        let Some(mut record) = self.get_file(path) else {
            debug!(path, provider = %patch.provider(), "No record for content update, skipping");
            return Ok(false);
        };
        patch.apply_to(&mut record);

        let mut tx = self.pool.begin().await?;
        upsert_record(&mut tx, &record).await?;
        match &patch.update {
            ContentUpdate::Markdown { preview, .. } => {
                write_preview_text(&mut tx, path, preview.text.as_deref()).await?;
            }
            ContentUpdate::FeatureImage { key, bytes, .. } => match (key, bytes) {
                (Some(key), Some(bytes)) => write_feature_image(&mut tx, path, key, bytes).await?,
                _ => delete_feature_image(&mut tx, path).await?,
            },
            ContentUpdate::Tags(_) | ContentUpdate::Metadata(_) => {}
        }
        tx.commit().await?;

        if let ContentUpdate::Markdown { preview, .. } = &patch.update {
            self.blobs.cache_preview(path, preview.text.clone());
        }
        self.memory
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(path.to_string(), record);
        self.events.emit(StoreEvent::ContentUpdated {
            path: path.to_string(),
            provider: patch.provider(),
        });
        Ok(true)
    }

    /// Reset the watermarks of `providers` so their content is regenerated.
    /// Existing values stay readable but are no longer trusted.
    pub async fn mark_for_regeneration(
        &self,
        path: &str,
        providers: &[ContentProviderType],
    ) -> Result<bool> {
        let _guard = self.locks.lock_one(path).await;
        let Some(mut record) = self.get_file(path) else {
            return Ok(false);
        };
        for provider in providers {
            record.set_watermark(*provider, 0);
        }
        let mut conn = self.pool.acquire().await?;
        upsert_record(&mut conn, &record).await?;
        self.memory
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(path.to_string(), record);
        Ok(true)
    }

    /// Drop every value owned by `provider` across the store.
    pub async fn clear_provider_content(&self, provider: ContentProviderType) -> Result<usize> {
        let _guard = self.locks.lock_all().await;
        let mut records: Vec<FileRecord> = self.snapshot().into_values().collect();
        for record in &mut records {
            record.clear_provider(provider);
        }

        let mut tx = self.pool.begin().await?;
        for chunk in records.chunks(defaults::STORE_WRITE_BATCH) {
            for record in chunk {
                upsert_record(&mut tx, record).await?;
            }
        }
        match provider {
            ContentProviderType::Markdown => {
                sqlx::query("DELETE FROM preview_text").execute(&mut *tx).await?;
            }
            ContentProviderType::FeatureImage => {
                sqlx::query("DELETE FROM feature_image_blobs")
                    .execute(&mut *tx)
                    .await?;
            }
            ContentProviderType::Tags | ContentProviderType::Metadata => {}
        }
        tx.commit().await?;

        let count = records.len();
        {
            let mut memory = self.memory.write().unwrap_or_else(PoisonError::into_inner);
            for record in records {
                memory.insert(record.path.clone(), record);
            }
        }
        if provider == ContentProviderType::Markdown {
            self.blobs.clear_cache();
        }
        info!(
            subsystem = "database",
            component = "records",
            op = "clear_provider",
            provider = %provider,
            count,
            "Provider content cleared"
        );
        Ok(count)
    }

    /// Durably move a record: write `record` at `new_path` and delete the
    /// row at `old_path` in one transaction. Callers hold both path locks.
    pub async fn persist_rename(
        &self,
        old_path: &str,
        new_path: &str,
        mut record: FileRecord,
    ) -> Result<()> {
        record.path = new_path.to_string();
        let mut tx = self.pool.begin().await?;
        upsert_record(&mut tx, &record).await?;
        sqlx::query("DELETE FROM file_records WHERE path = ?")
            .bind(old_path)
            .execute(&mut *tx)
            .await?;
        tx.commit().await?;

        {
            let mut memory = self.memory.write().unwrap_or_else(PoisonError::into_inner);
            memory.remove(old_path);
            memory.insert(new_path.to_string(), record);
        }
        self.events.emit(StoreEvent::FileRenamed {
            old_path: old_path.to_string(),
            new_path: new_path.to_string(),
        });
        Ok(())
    }

    // =========================================================================
    // SIDE STORES
    // =========================================================================

    pub async fn get_preview_text(&self, path: &str) -> Result<Option<String>> {
        self.blobs.get_preview_text(path).await
    }

    pub async fn move_preview_text(&self, old_path: &str, new_path: &str) -> Result<()> {
        self.blobs.move_preview_text(old_path, new_path).await
    }

    pub async fn delete_preview_text(&self, path: &str) -> Result<()> {
        self.blobs.delete_preview_text(path).await
    }

    pub fn begin_preview_text_move(&self, old_path: &str, new_path: &str) -> MoveGuard {
        self.blobs.begin_preview_text_move(old_path, new_path)
    }

    pub async fn get_feature_image(&self, path: &str) -> Result<Option<FeatureImageBlob>> {
        self.blobs.get_feature_image(path).await
    }

    pub async fn move_feature_image_blob(&self, old_path: &str, new_path: &str) -> Result<()> {
        self.blobs.move_feature_image_blob(old_path, new_path).await
    }

    pub async fn delete_feature_image_blob(&self, path: &str) -> Result<()> {
        self.blobs.delete_feature_image_blob(path).await
    }

    pub fn begin_feature_image_blob_move(&self, old_path: &str, new_path: &str) -> MoveGuard {
        self.blobs.begin_feature_image_blob_move(old_path, new_path)
    }

    /// Close the underlying pool. Later writes fail.
    pub async fn close(&self) {
        self.pool.close().await;
    }
}
