//! Filesystem watcher feeding vault and index events.
//!
//! notify events are reduced to [`FsChange`]s, then turned into
//! [`VaultEvent`]s on the [`FsVault`] bus, with the metadata index refreshed
//! after each change.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use notify::event::{EventKind, ModifyKind, RenameMode};
use notify::{Event, RecommendedWatcher, RecursiveMode, Watcher};
use tokio::sync::mpsc;
use tracing::{debug, warn};
use walkdir::WalkDir;

use notecache_core::VaultEvent;
use notecache_db::RecordStore;

use crate::index::FrontmatterIndex;
use crate::vault::FsVault;

/// Filesystem change reduced from a notify event.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FsChange {
    Upsert(PathBuf),
    Remove(PathBuf),
    Rename { from: PathBuf, to: PathBuf },
}

pub fn classify(event: &Event) -> Vec<FsChange> {
    let paths = &event.paths;
    match event.kind {
        EventKind::Create(_) => paths.iter().cloned().map(FsChange::Upsert).collect(),
        EventKind::Remove(_) => paths.iter().cloned().map(FsChange::Remove).collect(),
        EventKind::Modify(ModifyKind::Name(RenameMode::Both)) if paths.len() >= 2 => {
            vec![FsChange::Rename {
                from: paths[0].clone(),
                to: paths[1].clone(),
            }]
        }
        EventKind::Modify(ModifyKind::Name(RenameMode::From)) => {
            paths.iter().cloned().map(FsChange::Remove).collect()
        }
        EventKind::Modify(ModifyKind::Name(_)) => paths
            .iter()
            .map(|path| {
                if path.exists() {
                    FsChange::Upsert(path.clone())
                } else {
                    FsChange::Remove(path.clone())
                }
            })
            .collect(),
        EventKind::Modify(_) => paths.iter().cloned().map(FsChange::Upsert).collect(),
        _ => Vec::new(),
    }
}

/// Recursive watcher over the vault root.
pub struct VaultWatcher {
    _watcher: RecommendedWatcher,
    events: mpsc::UnboundedReceiver<Event>,
}

impl VaultWatcher {
    pub fn new(root: &Path) -> notify::Result<Self> {
        let (sender, events) = mpsc::unbounded_channel();
        let mut watcher = RecommendedWatcher::new(
            move |res: notify::Result<Event>| match res {
                Ok(event) => {
                    let _ = sender.send(event);
                }
                Err(e) => warn!(subsystem = "watcher", error = %e, "Watch error"),
            },
            notify::Config::default(),
        )?;
        watcher.watch(root, RecursiveMode::Recursive)?;
        Ok(Self {
            _watcher: watcher,
            events,
        })
    }

    pub async fn next(&mut self) -> Option<Event> {
        self.events.recv().await
    }
}

/// Applies filesystem changes to the vault bus and the metadata index.
pub struct WatchBridge {
    vault: Arc<FsVault>,
    index: Arc<FrontmatterIndex>,
    store: Arc<RecordStore>,
}

impl WatchBridge {
    pub fn new(vault: Arc<FsVault>, index: Arc<FrontmatterIndex>, store: Arc<RecordStore>) -> Self {
        Self {
            vault,
            index,
            store,
        }
    }

    pub async fn apply_event(&self, event: &Event) {
        for change in classify(event) {
            self.apply(change).await;
        }
    }

    pub async fn apply(&self, change: FsChange) {
        match change {
            FsChange::Upsert(path) => self.upsert(&path).await,
            FsChange::Remove(path) => self.remove(&path),
            FsChange::Rename { from, to } => self.rename(&from, &to).await,
        }
    }

    fn remove(&self, path: &Path) {
        let Some(relative) = self.vault.relative_path(path) else {
            return;
        };
        debug!(subsystem = "watcher", path = %relative, "Removed");
        self.index.remove(&relative);
        self.vault.emit(VaultEvent::Deleted { path: relative });
    }

    async fn upsert(&self, path: &Path) {
        let Some(relative) = self.vault.relative_path(path) else {
            return;
        };
        let file = match self.vault.stat(&relative) {
            Ok(Some(file)) => file,
            Ok(None) => return,
            Err(e) => {
                warn!(subsystem = "watcher", path = %relative, error = %e, "Stat failed");
                return;
            }
        };
        let event = if self.store.contains(&relative) {
            VaultEvent::Modified(file)
        } else {
            VaultEvent::Created(file)
        };
        self.vault.emit(event);
        self.index.refresh(&relative).await;
    }

    async fn rename(&self, from: &Path, to: &Path) {
        let (Some(old_root), Some(new_root)) =
            (self.vault.relative_path(from), self.vault.relative_path(to))
        else {
            // Moved into or out of a hidden folder.
            self.remove(from);
            self.upsert(to).await;
            return;
        };

        // Folder renames move every file below them.
        let moved: Vec<(String, String)> = if to.is_dir() {
            WalkDir::new(to)
                .into_iter()
                .filter_map(|entry| entry.ok())
                .filter(|entry| entry.file_type().is_file())
                .filter_map(|entry| self.vault.relative_path(entry.path()))
                .filter_map(|new_path| {
                    let suffix = new_path.strip_prefix(&new_root)?.to_string();
                    Some((format!("{old_root}{suffix}"), new_path))
                })
                .collect()
        } else {
            vec![(old_root, new_root)]
        };

        for (old_path, new_path) in moved {
            let file = match self.vault.stat(&new_path) {
                Ok(Some(file)) => file,
                _ => continue,
            };
            debug!(subsystem = "watcher", from = %old_path, to = %new_path, "Renamed");
            self.index.remove(&old_path);
            self.vault.emit(VaultEvent::Renamed {
                file,
                old_path,
            });
            self.index.refresh(&new_path).await;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use notecache_core::{MetadataIndex, VaultFile, VaultHost};
    use notecache_db::CacheDatabase;
    use notify::event::{CreateKind, DataChange, RemoveKind};

    #[test]
    fn test_classify_events() {
        let create = Event::new(EventKind::Create(CreateKind::File)).add_path("/v/a.md".into());
        assert_eq!(classify(&create), vec![FsChange::Upsert("/v/a.md".into())]);

        let write = Event::new(EventKind::Modify(ModifyKind::Data(DataChange::Content)))
            .add_path("/v/a.md".into());
        assert_eq!(classify(&write), vec![FsChange::Upsert("/v/a.md".into())]);

        let rename = Event::new(EventKind::Modify(ModifyKind::Name(RenameMode::Both)))
            .add_path("/v/a.md".into())
            .add_path("/v/b.md".into());
        assert_eq!(
            classify(&rename),
            vec![FsChange::Rename {
                from: "/v/a.md".into(),
                to: "/v/b.md".into()
            }]
        );

        let moved_out = Event::new(EventKind::Modify(ModifyKind::Name(RenameMode::From)))
            .add_path("/v/a.md".into());
        assert_eq!(classify(&moved_out), vec![FsChange::Remove("/v/a.md".into())]);

        let remove = Event::new(EventKind::Remove(RemoveKind::File)).add_path("/v/a.md".into());
        assert_eq!(classify(&remove), vec![FsChange::Remove("/v/a.md".into())]);

        assert!(classify(&Event::new(EventKind::Any)).is_empty());
    }

    async fn bridge(root: &Path) -> (Arc<FsVault>, Arc<RecordStore>, WatchBridge) {
        let vault = Arc::new(FsVault::new(root));
        let index = Arc::new(FrontmatterIndex::new(vault.clone()));
        let db = CacheDatabase::in_memory().await.unwrap();
        let bridge = WatchBridge::new(vault.clone(), index, db.records.clone());
        (vault, db.records, bridge)
    }

    #[tokio::test]
    async fn test_upsert_distinguishes_create_and_modify() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("a.md");
        std::fs::write(&path, "#tag").unwrap();
        let (vault, store, bridge) = bridge(dir.path()).await;
        let mut events = vault.subscribe_vault_events();

        bridge.apply(FsChange::Upsert(path.clone())).await;
        let VaultEvent::Created(file) = events.recv().await.unwrap() else {
            panic!("expected a create event");
        };
        assert_eq!(file.path, "a.md");
        assert!(bridge.index.has_entry("a.md"));

        store
            .record_file_changes(&[VaultFile::new("a.md", file.mtime, file.size)])
            .await
            .unwrap();
        bridge.apply(FsChange::Upsert(path)).await;
        assert!(matches!(events.recv().await.unwrap(), VaultEvent::Modified(_)));

        bridge
            .apply(FsChange::Upsert(dir.path().join(".notecache/x.md")))
            .await;
        assert!(events.try_recv().is_err());
    }

    #[tokio::test]
    async fn test_folder_rename_moves_children() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::create_dir_all(dir.path().join("new/sub")).unwrap();
        std::fs::write(dir.path().join("new/sub/x.md"), "x").unwrap();
        let (vault, _store, bridge) = bridge(dir.path()).await;
        let mut events = vault.subscribe_vault_events();

        bridge
            .apply(FsChange::Rename {
                from: dir.path().join("old"),
                to: dir.path().join("new"),
            })
            .await;
        match events.recv().await.unwrap() {
            VaultEvent::Renamed { file, old_path } => {
                assert_eq!(file.path, "new/sub/x.md");
                assert_eq!(old_path, "old/sub/x.md");
            }
            other => panic!("unexpected event {other:?}"),
        }
    }
}
