//! Filesystem-backed vault.
//!
//! Paths are vault-relative with `/` separators. Hidden files and folders
//! (leading `.`) are skipped, which also keeps the cache database out of
//! the listing.

use std::path::{Component, Path, PathBuf};
use std::time::UNIX_EPOCH;

use async_trait::async_trait;
use tokio::sync::broadcast;
use walkdir::{DirEntry, WalkDir};

use notecache_core::{defaults, Error, Result, VaultEvent, VaultFile, VaultHost};

pub struct FsVault {
    root: PathBuf,
    events: broadcast::Sender<VaultEvent>,
}

fn is_hidden(name: &str) -> bool {
    name.starts_with('.')
}

fn mtime_ms(metadata: &std::fs::Metadata) -> i64 {
    metadata
        .modified()
        .ok()
        .and_then(|time| time.duration_since(UNIX_EPOCH).ok())
        .map(|elapsed| elapsed.as_millis() as i64)
        .unwrap_or(0)
}

impl FsVault {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        let (events, _) = broadcast::channel(defaults::EVENT_BUS_CAPACITY);
        Self {
            root: root.into(),
            events,
        }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Vault-relative path for an absolute path inside the vault, or `None`
    /// for paths outside it or under a hidden folder.
    pub fn relative_path(&self, path: &Path) -> Option<String> {
        let relative = path.strip_prefix(&self.root).ok()?;
        let mut parts = Vec::new();
        for component in relative.components() {
            let Component::Normal(part) = component else {
                return None;
            };
            let part = part.to_str()?;
            if is_hidden(part) {
                return None;
            }
            parts.push(part);
        }
        (!parts.is_empty()).then(|| parts.join("/"))
    }

    fn absolute(&self, path: &str) -> Result<PathBuf> {
        if path.split('/').any(|part| part == ".." || part.is_empty()) {
            return Err(Error::InvalidInput(format!("Not a vault path: {path}")));
        }
        Ok(self.root.join(path))
    }

    /// Listing entry for `path` read straight from the filesystem.
    pub fn stat(&self, path: &str) -> Result<Option<VaultFile>> {
        let absolute = self.absolute(path)?;
        match std::fs::metadata(&absolute) {
            Ok(metadata) if metadata.is_file() => Ok(Some(VaultFile::new(
                path,
                mtime_ms(&metadata),
                metadata.len(),
            ))),
            Ok(_) => Ok(None),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(e.into()),
        }
    }

    /// Publish a change detected by the watcher.
    pub fn emit(&self, event: VaultEvent) {
        let _ = self.events.send(event);
    }

    fn walk(root: &Path) -> Result<Vec<VaultFile>> {
        let visible = |entry: &DirEntry| {
            entry.depth() == 0 || !entry.file_name().to_str().map_or(true, is_hidden)
        };
        let mut files = Vec::new();
        for entry in WalkDir::new(root).into_iter().filter_entry(visible) {
            let entry = entry.map_err(|e| Error::Host(e.to_string()))?;
            if !entry.file_type().is_file() {
                continue;
            }
            let Ok(relative) = entry.path().strip_prefix(root) else {
                continue;
            };
            let Some(path) = relative.to_str().map(|p| p.replace('\\', "/")) else {
                continue;
            };
            let metadata = entry.metadata().map_err(|e| Error::Host(e.to_string()))?;
            files.push(VaultFile::new(path, mtime_ms(&metadata), metadata.len()));
        }
        files.sort_by(|a, b| a.path.cmp(&b.path));
        Ok(files)
    }
}

#[async_trait]
impl VaultHost for FsVault {
    async fn list_files(&self) -> Result<Vec<VaultFile>> {
        let root = self.root.clone();
        tokio::task::spawn_blocking(move || Self::walk(&root))
            .await
            .map_err(|e| Error::Internal(e.to_string()))?
    }

    async fn get_file(&self, path: &str) -> Result<Option<VaultFile>> {
        self.stat(path)
    }

    async fn read_text(&self, path: &str) -> Result<String> {
        Ok(tokio::fs::read_to_string(self.absolute(path)?).await?)
    }

    async fn read_binary(&self, path: &str) -> Result<Vec<u8>> {
        Ok(tokio::fs::read(self.absolute(path)?).await?)
    }

    fn subscribe_vault_events(&self) -> broadcast::Receiver<VaultEvent> {
        self.events.subscribe()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn vault_with_files() -> (tempfile::TempDir, FsVault) {
        let dir = tempfile::tempdir().unwrap();
        std::fs::create_dir_all(dir.path().join("notes/sub")).unwrap();
        std::fs::create_dir_all(dir.path().join(".notecache")).unwrap();
        std::fs::write(dir.path().join("notes/a.md"), "alpha").unwrap();
        std::fs::write(dir.path().join("notes/sub/b.pdf"), [1u8, 2]).unwrap();
        std::fs::write(dir.path().join(".notecache/cache.db"), "x").unwrap();
        std::fs::write(dir.path().join("notes/.hidden.md"), "x").unwrap();
        let vault = FsVault::new(dir.path());
        (dir, vault)
    }

    #[tokio::test]
    async fn test_list_skips_hidden_entries() {
        let (_dir, vault) = vault_with_files();
        let files = vault.list_files().await.unwrap();
        let paths: Vec<&str> = files.iter().map(|f| f.path.as_str()).collect();
        assert_eq!(paths, vec!["notes/a.md", "notes/sub/b.pdf"]);
        assert_eq!(files[0].size, 5);
        assert!(files[0].mtime > 0);
    }

    #[tokio::test]
    async fn test_reads_and_stats() {
        let (_dir, vault) = vault_with_files();
        assert_eq!(vault.read_text("notes/a.md").await.unwrap(), "alpha");
        assert_eq!(vault.read_binary("notes/sub/b.pdf").await.unwrap(), vec![1, 2]);
        assert!(vault.get_file("missing.md").await.unwrap().is_none());
        assert!(vault.read_text("../escape.md").await.is_err());
    }

    #[test]
    fn test_relative_path() {
        let (dir, vault) = vault_with_files();
        assert_eq!(
            vault.relative_path(&dir.path().join("notes/a.md")).as_deref(),
            Some("notes/a.md")
        );
        assert_eq!(vault.relative_path(&dir.path().join(".notecache/cache.db")), None);
        assert_eq!(vault.relative_path(Path::new("/elsewhere/a.md")), None);
    }
}
