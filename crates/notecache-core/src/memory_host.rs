//! In-memory vault and metadata index.
//!
//! Used by tests and embedders that drive the cache without a real host.
//! Mutations raise the same events a host would.

use std::collections::{BTreeMap, HashMap};
use std::sync::{PoisonError, RwLock};

use async_trait::async_trait;
use tokio::sync::broadcast;

use crate::defaults::EVENT_BUS_CAPACITY;
use crate::error::{Error, Result};
use crate::models::VaultFile;
use crate::traits::{CachedMetadata, MetadataEvent, MetadataIndex, VaultEvent, VaultHost};

#[derive(Debug, Clone)]
struct StoredFile {
    file: VaultFile,
    content: Vec<u8>,
}

/// Vault and metadata index held in memory.
#[derive(Debug)]
pub struct InMemoryVault {
    files: RwLock<BTreeMap<String, StoredFile>>,
    metadata: RwLock<HashMap<String, CachedMetadata>>,
    thumbnails: RwLock<HashMap<String, Vec<u8>>>,
    vault_tx: broadcast::Sender<VaultEvent>,
    metadata_tx: broadcast::Sender<MetadataEvent>,
}

impl Default for InMemoryVault {
    fn default() -> Self {
        Self::new()
    }
}

impl InMemoryVault {
    pub fn new() -> Self {
        let (vault_tx, _) = broadcast::channel(EVENT_BUS_CAPACITY);
        let (metadata_tx, _) = broadcast::channel(EVENT_BUS_CAPACITY);
        Self {
            files: RwLock::new(BTreeMap::new()),
            metadata: RwLock::new(HashMap::new()),
            thumbnails: RwLock::new(HashMap::new()),
            vault_tx,
            metadata_tx,
        }
    }

    /// Add or replace a file without raising an event.
    pub fn insert_silently(&self, path: &str, mtime: i64, content: impl Into<Vec<u8>>) -> VaultFile {
        let content = content.into();
        let file = VaultFile::new(path, mtime, content.len() as u64);
        self.files
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(
                path.to_string(),
                StoredFile {
                    file: file.clone(),
                    content,
                },
            );
        file
    }

    /// Add a file and raise a create event.
    pub fn add_file(&self, path: &str, mtime: i64, content: impl Into<Vec<u8>>) -> VaultFile {
        let file = self.insert_silently(path, mtime, content);
        let _ = self.vault_tx.send(VaultEvent::Created(file.clone()));
        file
    }

    /// Replace a file's content and raise a modify event.
    pub fn modify_file(&self, path: &str, mtime: i64, content: impl Into<Vec<u8>>) -> VaultFile {
        let file = self.insert_silently(path, mtime, content);
        let _ = self.vault_tx.send(VaultEvent::Modified(file.clone()));
        file
    }

    /// Move a file, carrying its index entry, and raise a rename event.
    pub fn rename_file(&self, old_path: &str, new_path: &str) -> Result<VaultFile> {
        let file = {
            let mut files = self.files.write().unwrap_or_else(PoisonError::into_inner);
            let mut stored = files
                .remove(old_path)
                .ok_or_else(|| Error::NotFound(old_path.to_string()))?;
            stored.file.path = new_path.to_string();
            let file = stored.file.clone();
            files.insert(new_path.to_string(), stored);
            file
        };
        {
            let mut metadata = self.metadata.write().unwrap_or_else(PoisonError::into_inner);
            if let Some(entry) = metadata.remove(old_path) {
                metadata.insert(new_path.to_string(), entry);
            }
        }
        let _ = self.vault_tx.send(VaultEvent::Renamed {
            file: file.clone(),
            old_path: old_path.to_string(),
        });
        Ok(file)
    }

    /// Remove a file and its index entry, and raise a delete event.
    pub fn delete_file(&self, path: &str) -> bool {
        let removed = self
            .files
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .remove(path)
            .is_some();
        self.metadata
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .remove(path);
        if removed {
            let _ = self.vault_tx.send(VaultEvent::Deleted {
                path: path.to_string(),
            });
        }
        removed
    }

    /// Store an index entry and raise a changed event.
    pub fn set_metadata(&self, path: &str, metadata: CachedMetadata) {
        self.set_metadata_silently(path, metadata);
        let _ = self.metadata_tx.send(MetadataEvent::Changed {
            path: path.to_string(),
        });
    }

    pub fn set_metadata_silently(&self, path: &str, metadata: CachedMetadata) {
        self.metadata
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(path.to_string(), metadata);
    }

    pub fn remove_metadata(&self, path: &str) {
        self.metadata
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .remove(path);
    }

    /// Raise an index-resolved event.
    pub fn emit_resolved(&self) {
        let _ = self.metadata_tx.send(MetadataEvent::Resolved);
    }

    pub fn set_pdf_thumbnail(&self, path: &str, bytes: Vec<u8>) {
        self.thumbnails
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(path.to_string(), bytes);
    }

    pub fn file_count(&self) -> usize {
        self.files.read().unwrap_or_else(PoisonError::into_inner).len()
    }

    fn content(&self, path: &str) -> Result<Vec<u8>> {
        self.files
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(path)
            .map(|stored| stored.content.clone())
            .ok_or_else(|| Error::NotFound(path.to_string()))
    }
}

#[async_trait]
impl VaultHost for InMemoryVault {
    async fn list_files(&self) -> Result<Vec<VaultFile>> {
        Ok(self
            .files
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .values()
            .map(|stored| stored.file.clone())
            .collect())
    }

    async fn get_file(&self, path: &str) -> Result<Option<VaultFile>> {
        Ok(self
            .files
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(path)
            .map(|stored| stored.file.clone()))
    }

    async fn read_text(&self, path: &str) -> Result<String> {
        let bytes = self.content(path)?;
        String::from_utf8(bytes).map_err(|e| Error::Host(format!("{path}: {e}")))
    }

    async fn read_binary(&self, path: &str) -> Result<Vec<u8>> {
        self.content(path)
    }

    async fn render_pdf_thumbnail(&self, path: &str) -> Result<Option<Vec<u8>>> {
        Ok(self
            .thumbnails
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(path)
            .cloned())
    }

    fn subscribe_vault_events(&self) -> broadcast::Receiver<VaultEvent> {
        self.vault_tx.subscribe()
    }
}

impl MetadataIndex for InMemoryVault {
    fn get_file_cache(&self, path: &str) -> Option<CachedMetadata> {
        self.metadata
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(path)
            .cloned()
    }

    fn subscribe_metadata_events(&self) -> broadcast::Receiver<MetadataEvent> {
        self.metadata_tx.subscribe()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_add_and_read() {
        let vault = InMemoryVault::new();
        let mut rx = vault.subscribe_vault_events();
        vault.add_file("a.md", 10, "hello");

        assert_eq!(vault.read_text("a.md").await.unwrap(), "hello");
        assert_eq!(vault.list_files().await.unwrap().len(), 1);
        assert!(matches!(rx.recv().await.unwrap(), VaultEvent::Created(f) if f.path == "a.md"));
    }

    #[tokio::test]
    async fn test_rename_moves_metadata() {
        let vault = InMemoryVault::new();
        vault.insert_silently("a.md", 1, "x");
        vault.set_metadata_silently("a.md", CachedMetadata::default());

        vault.rename_file("a.md", "b.md").unwrap();
        assert!(vault.has_entry("b.md"));
        assert!(!vault.has_entry("a.md"));
        assert!(vault.get_file("a.md").await.unwrap().is_none());
        assert!(vault.rename_file("missing.md", "c.md").is_err());
    }

    #[tokio::test]
    async fn test_metadata_events() {
        let vault = InMemoryVault::new();
        let mut rx = vault.subscribe_metadata_events();
        vault.set_metadata("a.md", CachedMetadata::default());
        vault.emit_resolved();

        assert_eq!(
            rx.recv().await.unwrap(),
            MetadataEvent::Changed {
                path: "a.md".into()
            }
        );
        assert_eq!(rx.recv().await.unwrap(), MetadataEvent::Resolved);
    }

    #[tokio::test]
    async fn test_resolve_link() {
        let vault = InMemoryVault::new();
        vault.insert_silently("notes/a.md", 1, "");
        vault.insert_silently("attachments/cover.png", 1, "");
        vault.insert_silently("notes/local.png", 1, "");

        assert_eq!(
            vault.resolve_link("cover.png", "notes/a.md").await.unwrap(),
            Some("attachments/cover.png".into())
        );
        assert_eq!(
            vault.resolve_link("local.png|200", "notes/a.md").await.unwrap(),
            Some("notes/local.png".into())
        );
        assert_eq!(vault.resolve_link("a", "x.md").await.unwrap(), Some("notes/a.md".into()));
        assert_eq!(vault.resolve_link("missing.png", "x.md").await.unwrap(), None);
    }
}
