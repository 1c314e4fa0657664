//! Vault sync, readiness gate, and rebuild against the in-memory host and an
//! in-memory record store.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use serde_json::json;
use tokio::sync::watch;
use tokio::time::Instant;

use notecache_core::{
    CacheRebuildNoticeState, CacheSettings, CachedMetadata, ContentKind, ContentProviderType,
    ContentStatus, InMemoryVault, ProgressNotice, Result, VaultEvent, VaultFile, WaitMask,
};
use notecache_db::{CacheDatabase, LocalStorage};
use notecache_jobs::{CacheSession, ContentProvider, ContentProviderRegistry, ProviderStats};
use notecache_sync::{MetadataReadinessGate, SyncConfig, VaultSync, VaultSyncBuilder};

// =============================================================================
// HELPERS
// =============================================================================

#[derive(Default)]
struct RecordingNotice {
    shown: AtomicBool,
    hidden: AtomicBool,
}

impl ProgressNotice for RecordingNotice {
    fn show(&self, _message: &str, _max: u64) {
        self.shown.store(true, Ordering::SeqCst);
    }

    fn update(&self, _done: u64, _max: u64, _message: &str) {}

    fn hide(&self) {
        self.hidden.store(true, Ordering::SeqCst);
    }
}

struct Harness {
    db: CacheDatabase,
    host: Arc<InMemoryVault>,
    storage: Arc<LocalStorage>,
    notice: Arc<RecordingNotice>,
    sync: VaultSync,
}

fn fast_config() -> SyncConfig {
    SyncConfig::default()
        .with_file_operation_delay(10)
        .with_sweep(500, 20)
        .with_notice_timing(20, 5_000)
}

async fn setup_with(host: Arc<InMemoryVault>, settings: CacheSettings) -> Harness {
    let db = CacheDatabase::in_memory()
        .await
        .expect("Failed to open in-memory database");
    let storage = Arc::new(LocalStorage::in_memory());
    let notice = Arc::new(RecordingNotice::default());
    let sync = VaultSyncBuilder::new(db.records.clone(), host.clone(), host.clone())
        .with_settings(settings)
        .with_config(fast_config())
        .with_storage(storage.clone())
        .with_notice(notice.clone())
        .build()
        .await;
    Harness {
        db,
        host,
        storage,
        notice,
        sync,
    }
}

fn tagged(tags: &[&str]) -> CachedMetadata {
    CachedMetadata {
        tags: tags.iter().map(|t| t.to_string()).collect(),
        ..Default::default()
    }
}

async fn eventually<F: Fn() -> bool>(what: &str, check: F) {
    let deadline = Instant::now() + Duration::from_secs(5);
    while !check() {
        assert!(Instant::now() < deadline, "timed out waiting for {what}");
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
}

fn preview_only() -> CacheSettings {
    CacheSettings {
        show_tags: false,
        show_feature_image: false,
        show_tasks: false,
        show_properties: false,
        show_metadata: false,
        ..Default::default()
    }
}

// =============================================================================
// READINESS GATE
// =============================================================================

#[derive(Default)]
struct RecordingProvider {
    kind: Option<ContentProviderType>,
    queued: Mutex<Vec<String>>,
}

#[async_trait]
impl ContentProvider for RecordingProvider {
    fn provider_type(&self) -> ContentProviderType {
        self.kind.unwrap_or(ContentProviderType::Markdown)
    }

    fn should_regenerate(&self, _old: &CacheSettings, _new: &CacheSettings) -> bool {
        false
    }

    async fn clear_content(&self) -> Result<()> {
        Ok(())
    }

    fn queue_files(&self, files: &[VaultFile], _settings: &CacheSettings) -> usize {
        let mut queued = self.queued.lock().unwrap();
        queued.extend(files.iter().map(|f| f.path.clone()));
        files.len()
    }

    fn start_processing(&self) {}

    fn stop_processing(&self) {}

    fn pending_count(&self) -> usize {
        0
    }

    async fn wait_idle(&self) {}

    fn stats(&self) -> ProviderStats {
        ProviderStats::default()
    }
}

struct GateHarness {
    host: Arc<InMemoryVault>,
    gate: MetadataReadinessGate,
    settings: watch::Sender<CacheSettings>,
    providers: Vec<Arc<RecordingProvider>>,
}

impl GateHarness {
    async fn new() -> Self {
        let host = Arc::new(InMemoryVault::new());
        let registry = Arc::new(ContentProviderRegistry::new());
        let mut providers = Vec::new();
        for kind in ContentProviderType::ALL {
            let provider = Arc::new(RecordingProvider {
                kind: Some(kind),
                ..Default::default()
            });
            registry.register_provider(provider.clone()).await;
            providers.push(provider);
        }
        let (settings, settings_rx) = watch::channel(CacheSettings::default());
        let gate = MetadataReadinessGate::new(
            host.clone(),
            registry,
            settings_rx,
            CacheSession::new(),
            fast_config(),
        );
        Self {
            host,
            gate,
            settings,
            providers,
        }
    }

    fn queued(&self, kind: ContentProviderType) -> Vec<String> {
        self.providers
            .iter()
            .find(|p| p.kind == Some(kind))
            .map(|p| p.queued.lock().unwrap().clone())
            .unwrap_or_default()
    }
}

fn tags_metadata() -> WaitMask {
    [ContentProviderType::Tags, ContentProviderType::Metadata]
        .into_iter()
        .collect()
}

#[tokio::test]
async fn test_changed_event_dispatches_exactly_the_masked_providers() {
    let h = GateHarness::new().await;
    h.gate.queue(&[VaultFile::new("p.md", 1, 1)], tags_metadata());
    assert_eq!(h.gate.pending_mask("p.md"), Some(tags_metadata()));
    assert!(h.gate.has_listener());

    h.host.set_metadata("p.md", tagged(&["a"]));
    eventually("tags dispatch", || !h.queued(ContentProviderType::Tags).is_empty()).await;
    eventually("gate idle", || h.gate.is_idle()).await;

    assert_eq!(h.queued(ContentProviderType::Tags), vec!["p.md".to_string()]);
    assert_eq!(h.queued(ContentProviderType::Metadata), vec!["p.md".to_string()]);
    assert!(h.queued(ContentProviderType::Markdown).is_empty());
    assert!(h.queued(ContentProviderType::FeatureImage).is_empty());
    assert_eq!(h.gate.pending_count(), 0);
}

#[tokio::test]
async fn test_disabling_kinds_unmasks_pending_paths() {
    let h = GateHarness::new().await;
    h.gate.queue(&[VaultFile::new("p.md", 1, 1)], tags_metadata());

    let no_tags = CacheSettings {
        show_tags: false,
        ..Default::default()
    };
    h.settings.send_replace(no_tags.clone());
    h.gate.prune(&no_tags);
    assert_eq!(
        h.gate.pending_mask("p.md"),
        Some(WaitMask::of(ContentProviderType::Metadata))
    );

    let nothing = CacheSettings {
        show_metadata: false,
        ..no_tags
    };
    h.settings.send_replace(nothing.clone());
    h.gate.prune(&nothing);
    assert_eq!(h.gate.pending_count(), 0);
    assert!(h.gate.is_idle());

    h.host.set_metadata("p.md", tagged(&["a"]));
    tokio::time::sleep(Duration::from_millis(100)).await;
    for kind in ContentProviderType::ALL {
        assert!(h.queued(kind).is_empty(), "{kind} was dispatched");
    }
}

#[tokio::test]
async fn test_resolved_event_sweeps_every_pending_path() {
    let h = GateHarness::new().await;
    let files: Vec<VaultFile> = (0..5)
        .map(|i| VaultFile::new(format!("n{i}.md"), 1, 1))
        .collect();
    h.gate.queue(&files, WaitMask::of(ContentProviderType::Tags));
    for file in &files {
        h.host.set_metadata_silently(&file.path, CachedMetadata::default());
    }
    h.host.emit_resolved();

    eventually("all dispatched", || h.queued(ContentProviderType::Tags).len() == 5).await;
    assert!(h.queued(ContentProviderType::Metadata).is_empty());
}

// =============================================================================
// ORCHESTRATOR
// =============================================================================

#[tokio::test]
async fn test_pending_file_is_flushed_when_its_index_entry_arrives() {
    let host = Arc::new(InMemoryVault::new());
    for name in ["f1.md", "f2.md", "f3.md"] {
        host.insert_silently(name, 10, "some words here");
    }
    host.set_metadata_silently("f1.md", CachedMetadata::default());
    host.set_metadata_silently("f3.md", CachedMetadata::default());
    let h = setup_with(host, preview_only()).await;

    let report = h.sync.start().await.unwrap();
    assert_eq!(report.added, 3);
    assert_eq!(report.queued_markdown, 3);
    assert_eq!(
        h.sync.gate().pending_mask("f2.md"),
        Some(WaitMask::of(ContentProviderType::Markdown))
    );

    let records = h.db.records.clone();
    eventually("f1 and f3 processed", || {
        ["f1.md", "f3.md"]
            .iter()
            .all(|p| records.get_file(p).unwrap().has_content(ContentKind::WordCount))
    })
    .await;
    assert!(records.get_file("f2.md").unwrap().needs_content(ContentKind::Preview));

    h.host.set_metadata("f2.md", CachedMetadata::default());
    eventually("f2 processed", || {
        records.get_file("f2.md").unwrap().has_content(ContentKind::Preview)
    })
    .await;
    assert_eq!(records.get_file("f2.md").unwrap().word_count, Some(3));
    assert_eq!(h.sync.gate().pending_count(), 0);
    h.sync.shutdown().await;
}

#[tokio::test]
async fn test_rename_waiting_on_locks_yields_to_rebuild() {
    let host = Arc::new(InMemoryVault::new());
    host.insert_silently("a.md", 10, "hello");
    host.set_metadata_silently("a.md", CachedMetadata::default());
    let h = setup_with(host, preview_only()).await;
    h.sync.initial_load().await.unwrap();
    h.sync.wait_idle().await;
    h.storage.add_recent_note("default", "a.md").unwrap();

    let held = h.db.records.lock_paths(["a.md"]).await;
    let renamed = h.host.rename_file("a.md", "b.md").unwrap();
    let sync = h.sync.clone();
    let rename = tokio::spawn(async move {
        sync.handle_vault_event(VaultEvent::Renamed {
            file: renamed,
            old_path: "a.md".to_string(),
        })
        .await;
    });
    tokio::time::sleep(Duration::from_millis(20)).await;

    // A rebuild stops the session while the rename waits for its locks.
    let previous = h.sync.session().set_stopped(true);
    drop(held);
    rename.await.unwrap();

    assert!(h.db.records.get_file("b.md").is_none());
    assert!(h.db.records.contains("a.md"));
    assert_eq!(h.storage.recent_notes("default"), vec!["b.md".to_string()]);

    // No diff was scheduled behind the stop.
    h.sync.session().set_stopped(previous);
    tokio::time::sleep(Duration::from_millis(50)).await;
    assert!(h.db.records.contains("a.md"));
    assert!(!h.db.records.contains("b.md"));
}

#[tokio::test]
async fn test_rename_keeps_preview_and_drops_old_path() {
    let host = Arc::new(InMemoryVault::new());
    host.insert_silently("notes/a.md", 10, "hello there");
    host.set_metadata_silently("notes/a.md", CachedMetadata::default());
    let h = setup_with(host, CacheSettings::default()).await;
    h.sync.initial_load().await.unwrap();
    h.sync.wait_idle().await;
    h.storage.add_recent_note("default", "notes/a.md").unwrap();

    let renamed = h.host.rename_file("notes/a.md", "archive/a.md").unwrap();
    h.sync
        .handle_vault_event(VaultEvent::Renamed {
            file: renamed,
            old_path: "notes/a.md".to_string(),
        })
        .await;

    let records = &h.db.records;
    let record = records.get_file("archive/a.md").unwrap();
    assert_eq!(record.preview_status, ContentStatus::Has);
    assert!(record.has_content(ContentKind::Preview));
    assert!(records.get_file("notes/a.md").is_none());
    assert_eq!(
        records.get_preview_text("archive/a.md").await.unwrap().as_deref(),
        Some("hello there")
    );
    assert!(records.get_preview_text("notes/a.md").await.unwrap().is_none());
    assert_eq!(h.storage.recent_notes("default"), vec!["archive/a.md".to_string()]);

    // The follow-up diff finds nothing to do.
    tokio::time::sleep(Duration::from_millis(20)).await;
    assert!(records.get_file("archive/a.md").unwrap().has_content(ContentKind::Preview));
}

#[tokio::test]
async fn test_rename_to_other_type_invalidates_markdown_content() {
    let host = Arc::new(InMemoryVault::new());
    host.insert_silently("a.md", 10, "hello #tag");
    host.set_metadata_silently("a.md", tagged(&["tag"]));
    let h = setup_with(host, CacheSettings::default()).await;
    h.sync.initial_load().await.unwrap();
    h.sync.wait_idle().await;
    assert!(h.db.records.get_file("a.md").unwrap().tags.is_some());

    let renamed = h.host.rename_file("a.md", "a.txt").unwrap();
    h.sync
        .handle_vault_event(VaultEvent::Renamed {
            file: renamed,
            old_path: "a.md".to_string(),
        })
        .await;

    let record = h.db.records.get_file("a.txt").unwrap();
    assert_eq!(record.preview_status, ContentStatus::None);
    assert_eq!(record.markdown_pipeline_mtime, 0);
    assert_eq!(record.tags_mtime, 0);
    assert_eq!(record.metadata_mtime, 0);
    assert!(record.tags.is_none());
    assert!(!record.needs_any_content(&ContentKind::ALL));
    assert!(h.db.records.get_preview_text("a.txt").await.unwrap().is_none());
}

#[tokio::test]
async fn test_live_events_keep_store_in_step() {
    let host = Arc::new(InMemoryVault::new());
    host.insert_silently("a.md", 10, "one");
    host.set_metadata_silently("a.md", tagged(&["first"]));
    let h = setup_with(host, CacheSettings::default()).await;
    h.sync.start().await.unwrap();
    let records = h.db.records.clone();
    eventually("a tagged", || {
        records.get_file("a.md").unwrap().tags == Some(vec!["first".to_string()])
    })
    .await;

    // Modify: new mtime and a new index entry.
    h.host.set_metadata_silently("a.md", tagged(&["second"]));
    h.host.modify_file("a.md", 20, "two");
    eventually("a retagged", || {
        let record = records.get_file("a.md").unwrap();
        record.mtime == 20 && record.tags == Some(vec!["second".to_string()])
    })
    .await;

    // Create goes through the debounced diff.
    h.host.set_metadata_silently("b.md", CachedMetadata::default());
    h.host.add_file("b.md", 5, "new note");
    eventually("b recorded", || records.contains("b.md")).await;
    eventually("b processed", || {
        records.get_file("b.md").unwrap().has_content(ContentKind::WordCount)
    })
    .await;

    // Delete removes the record.
    h.storage.add_recent_note("default", "b.md").unwrap();
    h.host.delete_file("b.md");
    eventually("b removed", || !records.contains("b.md")).await;
    assert!(h.storage.recent_notes("default").is_empty());

    // The tag tree follows the store.
    let tree = h.sync.tag_tree();
    eventually("tree updated", || tree.borrow().find("second").is_some()).await;
    h.sync.shutdown().await;
}

#[tokio::test]
async fn test_metadata_change_regenerates_without_modify() {
    let host = Arc::new(InMemoryVault::new());
    host.insert_silently("a.md", 10, "body");
    host.set_metadata_silently("a.md", tagged(&["old"]));
    let h = setup_with(host, CacheSettings::default()).await;
    h.sync.start().await.unwrap();
    let records = h.db.records.clone();
    eventually("tagged", || records.get_file("a.md").unwrap().tags == Some(vec!["old".into()])).await;

    h.host.set_metadata("a.md", tagged(&["new"]));
    eventually("retagged", || records.get_file("a.md").unwrap().tags == Some(vec!["new".into()])).await;
    h.sync.shutdown().await;
}

#[tokio::test]
async fn test_restored_older_copy_is_rederived() {
    let host = Arc::new(InMemoryVault::new());
    host.insert_silently("a.md", 20, "one two three four");
    host.set_metadata_silently("a.md", CachedMetadata::default());
    let h = setup_with(host, preview_only()).await;
    h.sync.initial_load().await.unwrap();
    h.sync.wait_idle().await;
    assert_eq!(h.db.records.get_file("a.md").unwrap().word_count, Some(4));

    h.host.insert_silently("a.md", 10, "one");
    let report = h.sync.run_diff().await.unwrap();
    assert_eq!(report.updated, 1);
    assert_eq!(report.queued_markdown, 1);
    h.sync.wait_idle().await;

    let record = h.db.records.get_file("a.md").unwrap();
    assert_eq!(record.mtime, 10);
    assert_eq!(record.word_count, Some(1));
    assert!(record.has_content(ContentKind::WordCount));
}

#[tokio::test]
async fn test_settings_change_regenerates_cleared_content() {
    let host = Arc::new(InMemoryVault::new());
    host.insert_silently("a.md", 3, "alpha beta gamma");
    host.set_metadata_silently("a.md", CachedMetadata::default());
    let h = setup_with(host, CacheSettings::default()).await;
    h.sync.initial_load().await.unwrap();
    h.sync.wait_idle().await;

    let cleared = h
        .sync
        .update_settings(CacheSettings {
            preview_length: 5,
            ..Default::default()
        })
        .await
        .unwrap();
    assert_eq!(cleared, vec![ContentProviderType::Markdown]);
    h.sync.wait_idle().await;

    let preview = h.db.records.get_preview_text("a.md").await.unwrap();
    assert_eq!(preview.as_deref(), Some("alpha"));
}

#[tokio::test]
async fn test_pdf_is_dispatched_for_thumbnail_only() {
    let host = Arc::new(InMemoryVault::new());
    host.insert_silently("doc.pdf", 4, vec![1u8, 2, 3]);
    host.set_pdf_thumbnail("doc.pdf", vec![7, 7]);
    let h = setup_with(host, CacheSettings::default()).await;
    let report = h.sync.initial_load().await.unwrap();
    assert_eq!(report.queued_pdfs, 1);
    assert_eq!(report.queued_markdown, 0);
    h.sync.wait_idle().await;

    let record = h.db.records.get_file("doc.pdf").unwrap();
    assert_eq!(record.feature_image_status, ContentStatus::Has);
    let image = h.db.records.get_feature_image("doc.pdf").await.unwrap().unwrap();
    assert_eq!(image.bytes, vec![7, 7]);
}

// =============================================================================
// REBUILD
// =============================================================================

#[tokio::test]
async fn test_rebuild_repopulates_and_hides_notice() {
    let host = Arc::new(InMemoryVault::new());
    host.insert_silently("a.md", 10, "front #x");
    host.insert_silently("b.png", 10, vec![0u8]);
    host.set_metadata_silently("a.md", tagged(&["x"]));
    let h = setup_with(host, CacheSettings::default()).await;
    h.sync.initial_load().await.unwrap();
    h.sync.wait_idle().await;

    h.sync.rebuild_cache().await.unwrap();
    assert!(!h.sync.session().is_stopped());
    assert!(h.notice.shown.load(Ordering::SeqCst));
    let marker = h.storage.rebuild_notice_state();
    assert_eq!(marker.as_ref().map(|m| m.total), Some(1));
    assert_eq!(marker.map(|m| m.source), Some("rebuild".to_string()));
    assert!(h.db.records.contains("a.md"));
    assert!(h.db.records.contains("b.png"));

    h.sync.wait_idle().await;
    assert_eq!(h.db.records.get_file("a.md").unwrap().tags, Some(vec!["x".to_string()]));

    let storage = h.storage.clone();
    eventually("notice hidden", || !h.sync.notice().is_visible()).await;
    assert!(h.notice.hidden.load(Ordering::SeqCst));
    eventually("marker cleared", || storage.rebuild_notice_state().is_none()).await;
}

#[tokio::test]
async fn test_rebuild_failure_restores_stopped_flag() {
    let host = Arc::new(InMemoryVault::new());
    host.insert_silently("a.md", 10, "text");
    let h = setup_with(host, CacheSettings::default()).await;
    h.sync.initial_load().await.unwrap();
    h.db.records.close().await;

    assert!(!h.sync.session().is_stopped());
    assert!(h.sync.rebuild_cache().await.is_err());
    assert!(!h.sync.session().is_stopped());
    assert!(h.storage.rebuild_notice_state().is_none());
    assert!(!h.sync.notice().is_visible());

    h.sync.session().set_stopped(true);
    assert!(h.sync.rebuild_cache().await.is_err());
    assert!(h.sync.session().is_stopped());
}

#[tokio::test]
async fn test_start_restores_persisted_notice() {
    let host = Arc::new(InMemoryVault::new());
    host.insert_silently("a.md", 10, "text");
    let h = setup_with(host, CacheSettings::default()).await;
    h.storage
        .set_rebuild_notice_state(Some(CacheRebuildNoticeState {
            total: 1,
            source: "rebuild".to_string(),
            types: vec![ContentKind::Preview],
        }))
        .unwrap();

    h.sync.start().await.unwrap();
    assert!(h.notice.shown.load(Ordering::SeqCst));
    assert!(h.sync.notice().is_visible());

    h.host.set_metadata("a.md", CachedMetadata::default());
    let storage = h.storage.clone();
    eventually("marker cleared", || storage.rebuild_notice_state().is_none()).await;
    h.sync.shutdown().await;
}

#[tokio::test]
async fn test_property_tree_tracks_configured_fields() {
    let host = Arc::new(InMemoryVault::new());
    host.insert_silently("a.md", 10, "---\nstatus: draft\n---\nbody");
    host.set_metadata_silently(
        "a.md",
        CachedMetadata {
            frontmatter: json!({"status": "draft"}).as_object().cloned(),
            ..Default::default()
        },
    );
    let settings = CacheSettings {
        property_fields: vec!["status".to_string()],
        ..Default::default()
    };
    let h = setup_with(host, settings).await;
    h.sync.initial_load().await.unwrap();
    h.sync.wait_idle().await;
    h.sync.rebuild_trees();

    let tree = h.sync.property_tree().borrow().clone();
    let files = tree.files_with("status", "draft").cloned().unwrap_or_default();
    assert!(files.contains("a.md"));
}
