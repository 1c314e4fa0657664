//! Vault sync orchestrator.
//!
//! Keeps the record store in step with the vault: a full diff on start,
//! debounced re-diffs on create and delete, immediate single-file writes on
//! modify, and an ordered migration on rename. Every path that needs derived
//! content goes through [`VaultSync::queue_content`], which routes markdown
//! through the readiness gate and PDFs straight to the thumbnail provider.

use std::future::Future;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, PoisonError, Weak};
use std::time::{Duration, Instant};

use tokio::sync::broadcast::{self, error::RecvError};
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{debug, info, trace, warn};

use notecache_core::{
    is_indexable_path, is_markdown_path, CacheSettings, ContentProviderType, LogNotice,
    MetadataEvent, MetadataIndex, ProgressNotice, PropertyTree, Result, TagTree,
    VaultEvent, VaultFile, VaultHost, WaitMask,
};
use notecache_db::{calculate_diff, LocalStorage, RecordStore};
use notecache_jobs::{
    default_registry, tracked_kinds, CacheSession, ContentProviderRegistry, ProviderConfig,
    ProviderContext, QueueFilter,
};

use crate::config::SyncConfig;
use crate::debounce::Debouncer;
use crate::gate::{active_mask, MetadataReadinessGate};
use crate::notice::{RebuildNotice, StorePendingWork};

/// Counts from one diff pass.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SyncReport {
    pub added: usize,
    pub updated: usize,
    pub removed: usize,
    /// Markdown files handed to the readiness gate.
    pub queued_markdown: usize,
    /// PDFs dispatched for thumbnails.
    pub queued_pdfs: usize,
}

pub(crate) struct SyncInner {
    pub(crate) store: Arc<RecordStore>,
    pub(crate) vault: Arc<dyn VaultHost>,
    pub(crate) index: Arc<dyn MetadataIndex>,
    pub(crate) registry: Arc<ContentProviderRegistry>,
    pub(crate) gate: MetadataReadinessGate,
    pub(crate) storage: Arc<LocalStorage>,
    pub(crate) session: CacheSession,
    pub(crate) config: SyncConfig,
    pub(crate) notice: RebuildNotice,
    pub(crate) settings: watch::Sender<CacheSettings>,
    pub(crate) storage_ready: watch::Sender<bool>,
    pub(crate) tag_tree: watch::Sender<Arc<TagTree>>,
    pub(crate) property_tree: watch::Sender<Arc<PropertyTree>>,
    pub(crate) diff_debouncer: Debouncer,
    pub(crate) tree_debouncer: Debouncer,
    started: AtomicBool,
    listeners: Mutex<Vec<JoinHandle<()>>>,
}

/// Handle to the running sync layer. Cheap to clone.
#[derive(Clone)]
pub struct VaultSync {
    pub(crate) inner: Arc<SyncInner>,
}

// =============================================================================
// BUILDER
// =============================================================================

/// Builder wiring the store, host, providers, gate, and notice together.
pub struct VaultSyncBuilder {
    store: Arc<RecordStore>,
    vault: Arc<dyn VaultHost>,
    index: Arc<dyn MetadataIndex>,
    settings: CacheSettings,
    config: SyncConfig,
    provider_config: ProviderConfig,
    storage: Option<Arc<LocalStorage>>,
    notice: Option<Arc<dyn ProgressNotice>>,
}

impl VaultSyncBuilder {
    pub fn new(
        store: Arc<RecordStore>,
        vault: Arc<dyn VaultHost>,
        index: Arc<dyn MetadataIndex>,
    ) -> Self {
        Self {
            store,
            vault,
            index,
            settings: CacheSettings::default(),
            config: SyncConfig::default(),
            provider_config: ProviderConfig::default(),
            storage: None,
            notice: None,
        }
    }

    pub fn with_settings(mut self, settings: CacheSettings) -> Self {
        self.settings = settings;
        self
    }

    pub fn with_config(mut self, config: SyncConfig) -> Self {
        self.config = config;
        self
    }

    pub fn with_provider_config(mut self, config: ProviderConfig) -> Self {
        self.provider_config = config;
        self
    }

    /// Local key-value namespace. Defaults to a non-persistent one.
    pub fn with_storage(mut self, storage: Arc<LocalStorage>) -> Self {
        self.storage = Some(storage);
        self
    }

    /// Notice UI for rebuild progress. Defaults to [`LogNotice`].
    pub fn with_notice(mut self, notice: Arc<dyn ProgressNotice>) -> Self {
        self.notice = Some(notice);
        self
    }

    pub async fn build(self) -> VaultSync {
        let session = CacheSession::new();
        let ctx = ProviderContext::new(
            self.store.clone(),
            self.vault.clone(),
            self.index.clone(),
            session.clone(),
        );
        let registry = Arc::new(default_registry(ctx, self.provider_config).await);

        let (settings, settings_rx) = watch::channel(self.settings);
        let gate = MetadataReadinessGate::new(
            self.index.clone(),
            registry.clone(),
            settings_rx,
            session.clone(),
            self.config.clone(),
        );

        let storage = self
            .storage
            .unwrap_or_else(|| Arc::new(LocalStorage::in_memory()));
        let notice_ui = self.notice.unwrap_or_else(|| Arc::new(LogNotice));
        let notice = RebuildNotice::new(
            notice_ui,
            storage.clone(),
            Arc::new(StorePendingWork::new(self.store.clone(), self.index.clone())),
            self.config.clone(),
        );

        let inner = SyncInner {
            diff_debouncer: Debouncer::new("diff", self.config.diff_debounce()),
            tree_debouncer: Debouncer::new("trees", self.config.file_operation_delay()),
            store: self.store,
            vault: self.vault,
            index: self.index,
            registry,
            gate,
            storage,
            session,
            config: self.config,
            notice,
            settings,
            storage_ready: watch::channel(false).0,
            tag_tree: watch::channel(Arc::new(TagTree::default())).0,
            property_tree: watch::channel(Arc::new(PropertyTree::default())).0,
            started: AtomicBool::new(false),
            listeners: Mutex::new(Vec::new()),
        };
        VaultSync {
            inner: Arc::new(inner),
        }
    }
}

// =============================================================================
// LIFECYCLE
// =============================================================================

impl VaultSync {
    /// Run the initial load and start listening for vault, index, and store
    /// events. Restores a rebuild notice left over from a previous run.
    pub async fn start(&self) -> Result<SyncReport> {
        if self.inner.started.swap(true, Ordering::SeqCst) {
            debug!(subsystem = "sync", component = "orchestrator", "Already started");
            return Ok(SyncReport::default());
        }

        // Subscribe before the load so nothing emitted during it is missed.
        let vault_rx = self.inner.vault.subscribe_vault_events();
        let metadata_rx = self.inner.index.subscribe_metadata_events();
        let store_rx = self.inner.store.events().subscribe();

        if let Some(state) = self.inner.storage.rebuild_notice_state() {
            info!(
                subsystem = "sync",
                component = "orchestrator",
                total = state.total,
                source = %state.source,
                "Restoring rebuild notice"
            );
            self.inner.notice.start(state);
        }

        let report = self.initial_load().await?;

        let listeners = vec![
            self.spawn_listener("vault", vault_rx, |sync, event| async move {
                match event {
                    Some(event) => sync.handle_vault_event(event).await,
                    None => sync.schedule_diff(),
                }
            }),
            self.spawn_listener("metadata", metadata_rx, |sync, event| async move {
                if let Some(event) = event {
                    sync.handle_metadata_event(event).await;
                }
            }),
            self.spawn_listener("store", store_rx, |sync, event| async move {
                if event.map_or(true, |event| event.affects_trees()) {
                    sync.schedule_tree_rebuild();
                }
            }),
        ];
        self.inner
            .listeners
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .extend(listeners);
        Ok(report)
    }

    /// Stop all background work. The rebuild marker is kept so the notice
    /// can be restored on the next start.
    pub async fn shutdown(&self) {
        self.inner.session.set_stopped(true);
        let listeners: Vec<_> = self
            .inner
            .listeners
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .drain(..)
            .collect();
        for handle in listeners {
            handle.abort();
        }
        self.inner.diff_debouncer.cancel();
        self.inner.tree_debouncer.cancel();
        self.inner.notice.stop();
        self.inner.gate.clear();
        self.inner.registry.stop_all_processing().await;
        self.inner.started.store(false, Ordering::SeqCst);
        info!(subsystem = "sync", component = "orchestrator", "Vault sync stopped");
    }

    /// Forward events from `rx` to `handler` until the channel closes or
    /// the orchestrator is dropped. A lagged receiver is reported as `None`.
    fn spawn_listener<T, F, Fut>(
        &self,
        name: &'static str,
        mut rx: broadcast::Receiver<T>,
        handler: F,
    ) -> JoinHandle<()>
    where
        T: Clone + Send + 'static,
        F: Fn(VaultSync, Option<T>) -> Fut + Send + 'static,
        Fut: Future<Output = ()> + Send,
    {
        let weak: Weak<SyncInner> = Arc::downgrade(&self.inner);
        tokio::spawn(async move {
            loop {
                let event = match rx.recv().await {
                    Ok(event) => Some(event),
                    Err(RecvError::Lagged(skipped)) => {
                        warn!(
                            subsystem = "sync",
                            component = "orchestrator",
                            listener = name,
                            skipped,
                            "Event listener lagged"
                        );
                        None
                    }
                    Err(RecvError::Closed) => break,
                };
                let Some(inner) = weak.upgrade() else {
                    break;
                };
                handler(VaultSync { inner }, event).await;
            }
            trace!(listener = name, "Event listener stopped");
        })
    }

    // =========================================================================
    // DIFF
    // =========================================================================

    /// Full diff against the vault, tree rebuild, storage-ready flag, and
    /// content queuing for every indexable file.
    pub async fn initial_load(&self) -> Result<SyncReport> {
        let start = Instant::now();
        self.inner.session.ensure_running()?;
        let files = self.inner.vault.list_files().await?;
        self.inner.session.ensure_running()?;

        let (mut report, _) = self.apply_diff(&files).await?;
        self.inner.session.ensure_running()?;

        self.rebuild_trees();
        self.inner.storage_ready.send_replace(true);

        let indexable: Vec<VaultFile> = files
            .into_iter()
            .filter(|file| is_indexable_path(&file.path))
            .collect();
        let (markdown, pdfs) = self.queue_content(&indexable).await;
        report.queued_markdown = markdown;
        report.queued_pdfs = pdfs;

        info!(
            subsystem = "sync",
            component = "orchestrator",
            op = "initial_load",
            added = report.added,
            updated = report.updated,
            removed = report.removed,
            queued_markdown = markdown,
            queued_pdfs = pdfs,
            duration_ms = start.elapsed().as_millis() as u64,
            "Initial load finished"
        );
        Ok(report)
    }

    /// Reconcile the store with the vault and queue content for changed
    /// files.
    pub async fn run_diff(&self) -> Result<SyncReport> {
        self.inner.session.ensure_running()?;
        let files = self.inner.vault.list_files().await?;
        self.inner.session.ensure_running()?;

        let (mut report, changed) = self.apply_diff(&files).await?;
        if report.added + report.updated + report.removed > 0 {
            debug!(
                subsystem = "sync",
                component = "orchestrator",
                op = "diff",
                added = report.added,
                updated = report.updated,
                removed = report.removed,
                "Diff applied"
            );
        }
        let (markdown, pdfs) = self.queue_content(&changed).await;
        report.queued_markdown = markdown;
        report.queued_pdfs = pdfs;
        Ok(report)
    }

    /// Write adds and updates, remove dropped paths, and return the
    /// changed indexable files.
    async fn apply_diff(
        &self,
        files: &[VaultFile],
    ) -> Result<(SyncReport, Vec<VaultFile>)> {
        let inner = &self.inner;
        let diff = calculate_diff(files, inner.store.snapshot());
        let changed: Vec<VaultFile> = diff.changed().cloned().collect();
        if !changed.is_empty() {
            inner.store.record_file_changes(&changed).await?;
        }
        inner.session.ensure_running()?;
        if !diff.to_remove.is_empty() {
            inner.store.remove_files(&diff.to_remove).await?;
            inner.gate.forget(&diff.to_remove);
            if let Err(e) = inner.storage.remove_recent_notes(&diff.to_remove) {
                warn!(subsystem = "sync", component = "orchestrator", error = %e, "Failed to prune recent notes");
            }
        }
        let report = SyncReport {
            added: diff.to_add.len(),
            updated: diff.to_update.len(),
            removed: diff.to_remove.len(),
            ..Default::default()
        };
        let indexable = changed
            .into_iter()
            .filter(|file| is_indexable_path(&file.path))
            .collect();
        Ok((report, indexable))
    }

    /// Coalesce a diff pass onto the next tick (or after the configured
    /// debounce).
    pub fn schedule_diff(&self) {
        let weak = Arc::downgrade(&self.inner);
        self.inner.diff_debouncer.schedule(move || async move {
            let Some(inner) = weak.upgrade() else {
                return;
            };
            let sync = VaultSync { inner };
            if let Err(e) = sync.run_diff().await {
                if sync.inner.session.is_stopped() {
                    trace!("Diff skipped while stopped");
                } else {
                    warn!(
                        subsystem = "sync",
                        component = "orchestrator",
                        op = "diff",
                        error = %e,
                        "Diff pass failed"
                    );
                }
            }
        });
    }

    // =========================================================================
    // CONTENT QUEUING
    // =========================================================================

    /// Queue derived content for `files`, skipping anything already fresh.
    ///
    /// Markdown goes to the readiness gate with a mask of exactly the
    /// providers it is missing. PDFs go to the feature image provider when
    /// feature images are shown. Returns the markdown and PDF counts.
    pub async fn queue_content(&self, files: &[VaultFile]) -> (usize, usize) {
        let inner = &self.inner;
        if files.is_empty() || inner.session.is_stopped() {
            return (0, 0);
        }
        let settings = inner.settings.borrow().clone();
        let active = active_mask(&settings);
        if active.is_empty() {
            return (0, 0);
        }

        let mut groups: Vec<(WaitMask, Vec<VaultFile>)> = Vec::new();
        let mut pdfs = Vec::new();
        let mut markdown = 0;
        for file in files {
            let Some(record) = inner.store.get_file(&file.path) else {
                continue;
            };
            if file.is_markdown() {
                let mask: WaitMask = active
                    .types()
                    .into_iter()
                    .filter(|provider| {
                        record.needs_provider(*provider, &tracked_kinds(*provider, &settings))
                    })
                    .collect();
                if mask.is_empty() {
                    continue;
                }
                markdown += 1;
                match groups.iter_mut().find(|(existing, _)| *existing == mask) {
                    Some((_, group)) => group.push(file.clone()),
                    None => groups.push((mask, vec![file.clone()])),
                }
            } else if file.is_pdf() && active.contains(ContentProviderType::FeatureImage) {
                let kinds = tracked_kinds(ContentProviderType::FeatureImage, &settings);
                if record.needs_provider(ContentProviderType::FeatureImage, &kinds) {
                    pdfs.push(file.clone());
                }
            }
        }

        for (mask, group) in &groups {
            inner.gate.queue(group, *mask);
        }
        if !pdfs.is_empty() {
            inner
                .registry
                .queue_files_for_all_providers(
                    &pdfs,
                    &settings,
                    QueueFilter::only(WaitMask::of(ContentProviderType::FeatureImage)),
                )
                .await;
        }
        trace!(
            subsystem = "sync",
            component = "orchestrator",
            markdown,
            pdfs = pdfs.len(),
            "Content queued"
        );
        (markdown, pdfs.len())
    }

    /// Queue content for every indexable file in the vault.
    pub async fn requeue_all(&self) -> Result<(usize, usize)> {
        let files: Vec<VaultFile> = self
            .inner
            .vault
            .list_files()
            .await?
            .into_iter()
            .filter(|file| is_indexable_path(&file.path))
            .collect();
        Ok(self.queue_content(&files).await)
    }

    // =========================================================================
    // VAULT EVENTS
    // =========================================================================

    pub async fn handle_vault_event(&self, event: VaultEvent) {
        if self.inner.session.is_stopped() {
            return;
        }
        trace!(subsystem = "sync", component = "orchestrator", path = event.path(), "Vault event");
        match event {
            VaultEvent::Created(_) => self.schedule_diff(),
            VaultEvent::Deleted { path } => {
                self.inner.gate.forget(std::slice::from_ref(&path));
                if let Err(e) = self.inner.storage.remove_recent_notes(&[path]) {
                    warn!(subsystem = "sync", component = "orchestrator", error = %e, "Failed to prune recent notes");
                }
                self.schedule_diff();
            }
            VaultEvent::Modified(file) => self.handle_modify(file).await,
            VaultEvent::Renamed { file, old_path } => self.handle_rename(&old_path, file).await,
        }
    }

    async fn handle_modify(&self, file: VaultFile) {
        if let Err(e) = self
            .inner
            .store
            .record_file_changes(std::slice::from_ref(&file))
            .await
        {
            warn!(
                subsystem = "sync",
                component = "orchestrator",
                path = %file.path,
                error = %e,
                "Failed to record modified file"
            );
            self.schedule_diff();
            return;
        }
        if is_indexable_path(&file.path) {
            self.queue_content(&[file]).await;
        }
    }

    /// Move a record to its new path without losing derived content.
    ///
    /// Under both path locks: seed the mirror, persist, then move or drop
    /// side-store entries. The diff runs only after the locks are released.
    async fn handle_rename(&self, old_path: &str, file: VaultFile) {
        let inner = &self.inner;
        let new_path = file.path.clone();
        let mut migrated = false;
        {
            let _locks = inner.store.lock_paths([old_path, new_path.as_str()]).await;
            // A rebuild that started while we waited reloads from the vault.
            let record = if inner.session.is_stopped() {
                None
            } else {
                inner.store.get_file(old_path)
            };
            if let Some(mut record) = record {
                let outcome = record.apply_rename(&new_path);
                let preview_move = (!outcome.markdown_changed)
                    .then(|| inner.store.begin_preview_text_move(old_path, &new_path));
                let image_move = (!outcome.feature_image_reset)
                    .then(|| inner.store.begin_feature_image_blob_move(old_path, &new_path));

                inner.store.seed_memory_file(&new_path, record.clone());
                match inner.store.persist_rename(old_path, &new_path, record).await {
                    Ok(()) => {
                        migrated = true;
                        self.move_side_stores(old_path, &new_path, preview_move.is_some(), image_move.is_some())
                            .await;
                    }
                    Err(e) => warn!(
                        subsystem = "sync",
                        component = "orchestrator",
                        old_path,
                        new_path = %new_path,
                        error = %e,
                        "Failed to persist rename"
                    ),
                }
                drop(preview_move);
                drop(image_move);
                debug!(
                    subsystem = "sync",
                    component = "orchestrator",
                    op = "rename",
                    old_path,
                    new_path = %new_path,
                    markdown_changed = outcome.markdown_changed,
                    "Record migrated"
                );
            }
        }

        inner.gate.forget(&[old_path.to_string()]);
        if let Err(e) = inner.storage.rename_recent_note(old_path, &new_path) {
            warn!(subsystem = "sync", component = "orchestrator", error = %e, "Failed to rename recent note");
        }
        if inner.session.is_stopped() {
            return;
        }
        self.schedule_diff();
        if migrated && is_indexable_path(&new_path) {
            self.queue_content(&[file]).await;
        }
    }

    async fn move_side_stores(&self, old_path: &str, new_path: &str, keep_preview: bool, keep_image: bool) {
        let store = &self.inner.store;
        let preview = if keep_preview {
            store.move_preview_text(old_path, new_path).await
        } else {
            store.delete_preview_text(old_path).await
        };
        let image = if keep_image {
            store.move_feature_image_blob(old_path, new_path).await
        } else {
            store.delete_feature_image_blob(old_path).await
        };
        for result in [preview, image] {
            if let Err(e) = result {
                warn!(
                    subsystem = "sync",
                    component = "orchestrator",
                    old_path,
                    new_path,
                    error = %e,
                    "Failed to move side-store entry"
                );
            }
        }
    }

    // =========================================================================
    // METADATA EVENTS
    // =========================================================================

    /// An index update without a matching vault modify still invalidates
    /// the file's metadata-derived content.
    pub async fn handle_metadata_event(&self, event: MetadataEvent) {
        let MetadataEvent::Changed { path } = event else {
            return;
        };
        let inner = &self.inner;
        if inner.session.is_stopped() || !is_markdown_path(&path) {
            return;
        }
        let Some(record) = inner.store.get_file(&path) else {
            return;
        };
        let providers = inner.settings.borrow().enabled_provider_types();
        if providers.is_empty() {
            return;
        }
        if let Err(e) = inner.store.mark_for_regeneration(&path, &providers).await {
            warn!(
                subsystem = "sync",
                component = "orchestrator",
                path = %path,
                error = %e,
                "Failed to mark file for regeneration"
            );
            return;
        }
        let file = match inner.vault.get_file(&path).await {
            Ok(Some(file)) => file,
            _ => VaultFile::new(path.as_str(), record.mtime, 0),
        };
        self.queue_content(&[file]).await;
    }

    // =========================================================================
    // SETTINGS
    // =========================================================================

    /// Apply new settings: clear content whose inputs changed, prune gate
    /// masks, and queue whatever is now missing. Returns the cleared
    /// provider types.
    pub async fn update_settings(&self, settings: CacheSettings) -> Result<Vec<ContentProviderType>> {
        let inner = &self.inner;
        let old = inner.settings.send_replace(settings.clone());
        inner.gate.prune(&settings);
        let cleared = inner.registry.handle_settings_change(&old, &settings).await;
        info!(
            subsystem = "sync",
            component = "orchestrator",
            cleared = ?cleared,
            "Settings applied"
        );
        self.schedule_tree_rebuild();
        self.requeue_all().await?;
        Ok(cleared)
    }

    // =========================================================================
    // TREES
    // =========================================================================

    /// Rebuild the tag and property trees from the store and publish them.
    pub fn rebuild_trees(&self) {
        let mut tags = TagTree::default();
        let mut properties = PropertyTree::default();
        self.inner.store.for_each_file(|record| {
            if !is_markdown_path(&record.path) {
                return;
            }
            if let Some(record_tags) = &record.tags {
                tags.add_file(&record.path, record_tags);
            }
            if let Some(record_properties) = &record.properties {
                properties.add_file(&record.path, record_properties);
            }
        });
        trace!(
            subsystem = "sync",
            component = "orchestrator",
            untagged = tags.untagged,
            "Trees rebuilt"
        );
        self.inner.tag_tree.send_replace(Arc::new(tags));
        self.inner.property_tree.send_replace(Arc::new(properties));
    }

    pub fn schedule_tree_rebuild(&self) {
        let weak = Arc::downgrade(&self.inner);
        self.inner.tree_debouncer.schedule(move || async move {
            if let Some(inner) = weak.upgrade() {
                if !inner.session.is_stopped() {
                    VaultSync { inner }.rebuild_trees();
                }
            }
        });
    }

    pub(crate) fn reset_read_models(&self) {
        self.inner.storage_ready.send_replace(false);
        self.inner.tag_tree.send_replace(Arc::new(TagTree::default()));
        self.inner
            .property_tree
            .send_replace(Arc::new(PropertyTree::default()));
    }

    // =========================================================================
    // ACCESSORS
    // =========================================================================

    pub fn store(&self) -> &Arc<RecordStore> {
        &self.inner.store
    }

    pub fn registry(&self) -> &Arc<ContentProviderRegistry> {
        &self.inner.registry
    }

    pub fn gate(&self) -> &MetadataReadinessGate {
        &self.inner.gate
    }

    pub fn session(&self) -> &CacheSession {
        &self.inner.session
    }

    pub fn storage(&self) -> &Arc<LocalStorage> {
        &self.inner.storage
    }

    pub fn notice(&self) -> &RebuildNotice {
        &self.inner.notice
    }

    pub fn config(&self) -> &SyncConfig {
        &self.inner.config
    }

    pub fn settings(&self) -> CacheSettings {
        self.inner.settings.borrow().clone()
    }

    pub fn is_storage_ready(&self) -> bool {
        *self.inner.storage_ready.borrow()
    }

    pub fn storage_ready(&self) -> watch::Receiver<bool> {
        self.inner.storage_ready.subscribe()
    }

    pub fn tag_tree(&self) -> watch::Receiver<Arc<TagTree>> {
        self.inner.tag_tree.subscribe()
    }

    pub fn property_tree(&self) -> watch::Receiver<Arc<PropertyTree>> {
        self.inner.property_tree.subscribe()
    }

    /// Resolve once nothing is waiting in the gate or the providers. Never
    /// resolves while a file waits on an index entry that does not come.
    pub async fn wait_idle(&self) {
        loop {
            tokio::task::yield_now().await;
            self.inner.registry.wait_idle().await;
            if self.inner.gate.is_idle() && self.inner.registry.pending_count().await == 0 {
                return;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use notecache_core::{CachedMetadata, ContentKind, InMemoryVault};
    use notecache_db::CacheDatabase;

    async fn setup(host: Arc<InMemoryVault>) -> VaultSync {
        let db = CacheDatabase::in_memory().await.unwrap();
        VaultSyncBuilder::new(db.records.clone(), host.clone(), host)
            .build()
            .await
    }

    #[tokio::test]
    async fn test_initial_load_records_every_file_and_flips_ready() {
        let host = Arc::new(InMemoryVault::new());
        host.insert_silently("a.md", 5, "hello #tag");
        host.insert_silently("b.txt", 5, "plain");
        host.set_metadata_silently(
            "a.md",
            CachedMetadata {
                tags: vec!["#tag".into()],
                ..Default::default()
            },
        );
        let sync = setup(host).await;
        assert!(!sync.is_storage_ready());

        let report = sync.initial_load().await.unwrap();
        assert_eq!(report.added, 2);
        assert_eq!(report.queued_markdown, 1);
        assert_eq!(report.queued_pdfs, 0);
        assert!(sync.is_storage_ready());
        assert!(sync.store().contains("b.txt"));

        sync.wait_idle().await;
        let record = sync.store().get_file("a.md").unwrap();
        assert!(!record.needs_any_content(&sync.settings().enabled_content_kinds()));
        assert!(!sync.store().get_file("b.txt").unwrap().needs_any_content(&ContentKind::ALL));
    }

    #[tokio::test]
    async fn test_fresh_files_are_not_requeued() {
        let host = Arc::new(InMemoryVault::new());
        host.insert_silently("a.md", 5, "text");
        host.set_metadata_silently("a.md", CachedMetadata::default());
        let sync = setup(host).await;
        sync.initial_load().await.unwrap();
        sync.wait_idle().await;

        let file = VaultFile::new("a.md", 5, 4);
        assert_eq!(sync.queue_content(&[file]).await, (0, 0));
        let report = sync.run_diff().await.unwrap();
        assert_eq!(report, SyncReport::default());
    }

    #[tokio::test]
    async fn test_stopped_session_blocks_initial_load() {
        let host = Arc::new(InMemoryVault::new());
        host.insert_silently("a.md", 5, "text");
        let sync = setup(host).await;
        sync.session().set_stopped(true);
        assert!(sync.initial_load().await.is_err());
        assert!(sync.store().is_empty());
        assert!(!sync.is_storage_ready());
    }
}
