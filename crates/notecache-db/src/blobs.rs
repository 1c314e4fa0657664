//! Preview text and feature image side stores.
//!
//! Both are keyed by file path like the main record table. Preview reads
//! go through an LRU cache. While a rename moves an entry, reads of the
//! destination fall back to the source so observers never see a
//! transient "missing" value.

use std::collections::HashMap;
use std::num::NonZeroUsize;
use std::sync::{Arc, Mutex, PoisonError, RwLock};

use lru::LruCache;
use sqlx::{SqliteConnection, SqlitePool};
use tracing::{debug, trace};

use notecache_core::{defaults, Result};

/// Compute BLAKE3 hash of data with "blake3:" prefix.
///
/// Returns a string in the format: `blake3:{64-char-hex}`
pub fn compute_content_hash(data: &[u8]) -> String {
    let hash = blake3::hash(data);
    format!("blake3:{}", hash.to_hex())
}

/// Stored feature image bytes.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FeatureImageBlob {
    pub key: String,
    pub bytes: Vec<u8>,
}

type MoveMap = Arc<RwLock<HashMap<String, String>>>;

/// In-progress move marker. Dropping it ends the move.
#[must_use = "the move ends when the guard is dropped"]
pub struct MoveGuard {
    moves: MoveMap,
    new_path: String,
}

impl MoveGuard {
    fn begin(moves: &MoveMap, old_path: &str, new_path: &str) -> Self {
        moves
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(new_path.to_string(), old_path.to_string());
        Self {
            moves: moves.clone(),
            new_path: new_path.to_string(),
        }
    }
}

impl Drop for MoveGuard {
    fn drop(&mut self) {
        self.moves
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .remove(&self.new_path);
    }
}

fn move_source(moves: &MoveMap, path: &str) -> Option<String> {
    moves
        .read()
        .unwrap_or_else(PoisonError::into_inner)
        .get(path)
        .cloned()
}

pub struct BlobStore {
    pool: SqlitePool,
    preview_cache: Mutex<LruCache<String, Option<String>>>,
    preview_moves: MoveMap,
    image_moves: MoveMap,
}

impl BlobStore {
    pub fn new(pool: SqlitePool) -> Self {
        Self::with_capacity(pool, defaults::PREVIEW_CACHE_CAPACITY)
    }

    pub fn with_capacity(pool: SqlitePool, capacity: usize) -> Self {
        let capacity = NonZeroUsize::new(capacity).unwrap_or(NonZeroUsize::MIN);
        Self {
            pool,
            preview_cache: Mutex::new(LruCache::new(capacity)),
            preview_moves: Arc::new(RwLock::new(HashMap::new())),
            image_moves: Arc::new(RwLock::new(HashMap::new())),
        }
    }

    // =========================================================================
    // PREVIEW TEXT
    // =========================================================================

    fn cached_preview(&self, path: &str) -> Option<Option<String>> {
        self.preview_cache
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .get(path)
            .cloned()
    }

    pub(crate) fn cache_preview(&self, path: &str, text: Option<String>) {
        self.preview_cache
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .put(path.to_string(), text);
    }

    fn forget_preview(&self, path: &str) {
        self.preview_cache
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .pop(path);
    }

    async fn load_preview(&self, path: &str) -> Result<Option<String>> {
        let row: Option<(String,)> = sqlx::query_as("SELECT text FROM preview_text WHERE path = ?")
            .bind(path)
            .fetch_optional(&self.pool)
            .await?;
        Ok(row.map(|(text,)| text))
    }

    /// Preview text for `path`, falling back to the move source while a
    /// move into `path` is in progress.
    pub async fn get_preview_text(&self, path: &str) -> Result<Option<String>> {
        let text = match self.cached_preview(path) {
            Some(cached) => cached,
            None => {
                let loaded = self.load_preview(path).await?;
                self.cache_preview(path, loaded.clone());
                loaded
            }
        };
        if text.is_some() {
            return Ok(text);
        }
        match move_source(&self.preview_moves, path) {
            Some(source) => {
                trace!(path, source = %source, "Preview read during move, using source");
                match self.cached_preview(&source) {
                    Some(cached) => Ok(cached),
                    None => self.load_preview(&source).await,
                }
            }
            None => Ok(None),
        }
    }

    pub async fn set_preview_text(&self, path: &str, text: &str) -> Result<()> {
        let mut conn = self.pool.acquire().await?;
        write_preview_text(&mut conn, path, Some(text)).await?;
        self.cache_preview(path, Some(text.to_string()));
        Ok(())
    }

    pub async fn delete_preview_text(&self, path: &str) -> Result<()> {
        sqlx::query("DELETE FROM preview_text WHERE path = ?")
            .bind(path)
            .execute(&self.pool)
            .await?;
        self.cache_preview(path, None);
        Ok(())
    }

    pub fn begin_preview_text_move(&self, old_path: &str, new_path: &str) -> MoveGuard {
        MoveGuard::begin(&self.preview_moves, old_path, new_path)
    }

    /// Move preview text from `old_path` to `new_path`, replacing any text
    /// already stored at the destination.
    pub async fn move_preview_text(&self, old_path: &str, new_path: &str) -> Result<()> {
        let mut tx = self.pool.begin().await?;
        sqlx::query("DELETE FROM preview_text WHERE path = ?")
            .bind(new_path)
            .execute(&mut *tx)
            .await?;
        let moved = sqlx::query("UPDATE preview_text SET path = ? WHERE path = ?")
            .bind(new_path)
            .bind(old_path)
            .execute(&mut *tx)
            .await?
            .rows_affected();
        tx.commit().await?;

        let text = self.cached_preview(old_path).flatten();
        self.forget_preview(old_path);
        if moved > 0 {
            match text {
                Some(text) => self.cache_preview(new_path, Some(text)),
                None => self.forget_preview(new_path),
            }
        } else {
            self.cache_preview(new_path, None);
        }
        debug!(
            subsystem = "database",
            component = "blobs",
            op = "move_preview",
            old_path,
            new_path,
            moved,
            "Preview text moved"
        );
        Ok(())
    }

    // =========================================================================
    // FEATURE IMAGES
    // =========================================================================

    async fn load_image(&self, path: &str) -> Result<Option<FeatureImageBlob>> {
        let row: Option<(String, Vec<u8>)> =
            sqlx::query_as("SELECT content_key, bytes FROM feature_image_blobs WHERE path = ?")
                .bind(path)
                .fetch_optional(&self.pool)
                .await?;
        Ok(row.map(|(key, bytes)| FeatureImageBlob { key, bytes }))
    }

    /// Feature image for `path`, falling back to the move source while a
    /// move into `path` is in progress.
    pub async fn get_feature_image(&self, path: &str) -> Result<Option<FeatureImageBlob>> {
        if let Some(blob) = self.load_image(path).await? {
            return Ok(Some(blob));
        }
        match move_source(&self.image_moves, path) {
            Some(source) => self.load_image(&source).await,
            None => Ok(None),
        }
    }

    pub async fn set_feature_image(&self, path: &str, bytes: &[u8]) -> Result<String> {
        let key = compute_content_hash(bytes);
        let mut conn = self.pool.acquire().await?;
        write_feature_image(&mut conn, path, &key, bytes).await?;
        Ok(key)
    }

    pub async fn delete_feature_image_blob(&self, path: &str) -> Result<()> {
        sqlx::query("DELETE FROM feature_image_blobs WHERE path = ?")
            .bind(path)
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    pub fn begin_feature_image_blob_move(&self, old_path: &str, new_path: &str) -> MoveGuard {
        MoveGuard::begin(&self.image_moves, old_path, new_path)
    }

    pub async fn move_feature_image_blob(&self, old_path: &str, new_path: &str) -> Result<()> {
        let mut tx = self.pool.begin().await?;
        sqlx::query("DELETE FROM feature_image_blobs WHERE path = ?")
            .bind(new_path)
            .execute(&mut *tx)
            .await?;
        let moved = sqlx::query("UPDATE feature_image_blobs SET path = ? WHERE path = ?")
            .bind(new_path)
            .bind(old_path)
            .execute(&mut *tx)
            .await?
            .rows_affected();
        tx.commit().await?;
        debug!(
            subsystem = "database",
            component = "blobs",
            op = "move_feature_image",
            old_path,
            new_path,
            moved,
            "Feature image blob moved"
        );
        Ok(())
    }

    // =========================================================================
    // BULK
    // =========================================================================

    /// Forget cached preview entries for `paths`.
    pub(crate) fn evict(&self, paths: &[String]) {
        let mut cache = self.preview_cache.lock().unwrap_or_else(PoisonError::into_inner);
        for path in paths {
            cache.pop(path);
        }
    }

    pub(crate) fn clear_cache(&self) {
        self.preview_cache
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clear();
    }

    pub fn cached_preview_count(&self) -> usize {
        self.preview_cache
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .len()
    }
}

/// Write or delete preview text on an open connection or transaction.
pub(crate) async fn write_preview_text(
    conn: &mut SqliteConnection,
    path: &str,
    text: Option<&str>,
) -> Result<()> {
    match text {
        Some(text) => {
            sqlx::query(
                "INSERT INTO preview_text (path, text) VALUES (?, ?) \
                 ON CONFLICT(path) DO UPDATE SET text = excluded.text",
            )
            .bind(path)
            .bind(text)
            .execute(&mut *conn)
            .await?;
        }
        None => {
            sqlx::query("DELETE FROM preview_text WHERE path = ?")
                .bind(path)
                .execute(&mut *conn)
                .await?;
        }
    }
    Ok(())
}

/// Write a feature image blob on an open connection or transaction.
pub(crate) async fn write_feature_image(
    conn: &mut SqliteConnection,
    path: &str,
    key: &str,
    bytes: &[u8],
) -> Result<()> {
    sqlx::query(
        "INSERT INTO feature_image_blobs (path, content_key, bytes) VALUES (?, ?, ?) \
         ON CONFLICT(path) DO UPDATE SET content_key = excluded.content_key, bytes = excluded.bytes",
    )
    .bind(path)
    .bind(key)
    .bind(bytes)
    .execute(&mut *conn)
    .await?;
    Ok(())
}

pub(crate) async fn delete_feature_image(conn: &mut SqliteConnection, path: &str) -> Result<()> {
    sqlx::query("DELETE FROM feature_image_blobs WHERE path = ?")
        .bind(path)
        .execute(&mut *conn)
        .await?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pool::create_memory_pool;
    use crate::schema::{ensure_schema, StoreVersions};

    async fn store() -> BlobStore {
        let pool = create_memory_pool().await.unwrap();
        ensure_schema(&pool, StoreVersions::default()).await.unwrap();
        BlobStore::with_capacity(pool, 8)
    }

    #[test]
    fn test_compute_content_hash_format() {
        let hash = compute_content_hash(b"hello");
        assert!(hash.starts_with("blake3:"));
        assert_eq!(hash.len(), "blake3:".len() + 64);
        assert_eq!(hash, compute_content_hash(b"hello"));
        assert_ne!(hash, compute_content_hash(b"world"));
    }

    #[tokio::test]
    async fn test_preview_set_get_delete() {
        let blobs = store().await;
        assert_eq!(blobs.get_preview_text("a.md").await.unwrap(), None);

        blobs.set_preview_text("a.md", "hello").await.unwrap();
        assert_eq!(blobs.get_preview_text("a.md").await.unwrap().as_deref(), Some("hello"));

        blobs.delete_preview_text("a.md").await.unwrap();
        assert_eq!(blobs.get_preview_text("a.md").await.unwrap(), None);
    }

    #[tokio::test]
    async fn test_preview_move() {
        let blobs = store().await;
        blobs.set_preview_text("a.md", "text").await.unwrap();
        blobs.set_preview_text("b.md", "stale").await.unwrap();

        blobs.move_preview_text("a.md", "b.md").await.unwrap();
        assert_eq!(blobs.get_preview_text("b.md").await.unwrap().as_deref(), Some("text"));
        assert_eq!(blobs.get_preview_text("a.md").await.unwrap(), None);
    }

    #[tokio::test]
    async fn test_move_guard_falls_back_to_source() {
        let blobs = store().await;
        blobs.set_preview_text("a.md", "text").await.unwrap();

        let guard = blobs.begin_preview_text_move("a.md", "b.md");
        assert_eq!(blobs.get_preview_text("b.md").await.unwrap().as_deref(), Some("text"));
        drop(guard);

        // Without the guard the destination has nothing yet.
        assert_eq!(blobs.get_preview_text("b.md").await.unwrap(), None);
    }

    #[tokio::test]
    async fn test_feature_image_move_guard() {
        let blobs = store().await;
        let key = blobs.set_feature_image("a.pdf", b"png-bytes").await.unwrap();

        let guard = blobs.begin_feature_image_blob_move("a.pdf", "b.pdf");
        let during = blobs.get_feature_image("b.pdf").await.unwrap().unwrap();
        assert_eq!(during.key, key);

        blobs.move_feature_image_blob("a.pdf", "b.pdf").await.unwrap();
        drop(guard);
        assert!(blobs.get_feature_image("a.pdf").await.unwrap().is_none());
        assert_eq!(blobs.get_feature_image("b.pdf").await.unwrap().unwrap().bytes, b"png-bytes");
    }

    #[tokio::test]
    async fn test_cache_capacity_bounded() {
        let blobs = store().await;
        for i in 0..20 {
            blobs.set_preview_text(&format!("{i}.md"), "x").await.unwrap();
        }
        assert_eq!(blobs.cached_preview_count(), 8);
    }
}
