//! Content provider trait and the queued worker shared by every provider.
//!
//! A [`QueuedProvider`] owns a per-provider queue of vault files and a single
//! background worker task that drains it in batches. The content itself is
//! produced by a [`ContentGenerator`]; the queue handles deduplication,
//! freshness checks, cancellation, and the write into the record store.

use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use async_trait::async_trait;
use tokio::sync::watch;
use tracing::{debug, trace, warn};

use notecache_core::{
    defaults, CacheSettings, ContentKind, ContentPatch, ContentProviderType, ContentUpdate,
    MetadataIndex, Result, VaultFile, VaultHost,
};
use notecache_db::RecordStore;

use crate::session::CacheSession;

// =============================================================================
// CONFIGURATION
// =============================================================================

/// Configuration for queued providers.
#[derive(Debug, Clone)]
pub struct ProviderConfig {
    /// Files taken from the queue per batch.
    pub batch_size: usize,
    /// Whether queued work is accepted at all.
    pub enabled: bool,
}

impl Default for ProviderConfig {
    fn default() -> Self {
        Self {
            batch_size: defaults::PROVIDER_BATCH_SIZE,
            enabled: true,
        }
    }
}

impl ProviderConfig {
    /// Create config from environment variables (with defaults).
    ///
    /// | Variable | Default | Description |
    /// |----------|---------|-------------|
    /// | `NOTECACHE_PROVIDERS_ENABLED` | `true` | Enable/disable content generation |
    /// | `NOTECACHE_PROVIDER_BATCH_SIZE` | `25` | Files processed per batch |
    pub fn from_env() -> Self {
        let enabled = std::env::var("NOTECACHE_PROVIDERS_ENABLED")
            .map(|v| v != "false" && v != "0")
            .unwrap_or(true);

        let batch_size = std::env::var("NOTECACHE_PROVIDER_BATCH_SIZE")
            .ok()
            .and_then(|v| v.parse::<usize>().ok())
            .unwrap_or(defaults::PROVIDER_BATCH_SIZE)
            .max(1);

        Self {
            batch_size,
            enabled,
        }
    }

    pub fn with_batch_size(mut self, batch_size: usize) -> Self {
        self.batch_size = batch_size.max(1);
        self
    }

    pub fn with_enabled(mut self, enabled: bool) -> Self {
        self.enabled = enabled;
        self
    }
}

// =============================================================================
// CONTEXT AND TRAITS
// =============================================================================

/// Everything a generator may read, plus the store results are written to.
#[derive(Clone)]
pub struct ProviderContext {
    pub store: Arc<RecordStore>,
    pub vault: Arc<dyn VaultHost>,
    pub index: Arc<dyn MetadataIndex>,
    pub session: CacheSession,
}

impl ProviderContext {
    pub fn new(
        store: Arc<RecordStore>,
        vault: Arc<dyn VaultHost>,
        index: Arc<dyn MetadataIndex>,
        session: CacheSession,
    ) -> Self {
        Self {
            store,
            vault,
            index,
            session,
        }
    }
}

/// Counters kept by each queued provider.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ProviderStats {
    /// Files whose content was written.
    pub processed: u64,
    /// Files dropped because they were fresh, gone, or not ready.
    pub skipped: u64,
    /// Files whose generation or write failed.
    pub failed: u64,
}

/// A registered producer of one [`ContentProviderType`].
#[async_trait]
pub trait ContentProvider: Send + Sync {
    fn provider_type(&self) -> ContentProviderType;

    /// Whether a settings change invalidates everything this provider wrote.
    fn should_regenerate(&self, old: &CacheSettings, new: &CacheSettings) -> bool;

    /// Drop all content owned by this provider from the store.
    async fn clear_content(&self) -> Result<()>;

    /// Queue files for processing and return how many were newly queued.
    ///
    /// Must be called from within a tokio runtime.
    fn queue_files(&self, files: &[VaultFile], settings: &CacheSettings) -> usize;

    /// Accept queued work again after [`ContentProvider::stop_processing`].
    fn start_processing(&self);

    /// Drop the queue and abandon in-flight results.
    fn stop_processing(&self);

    /// Queued plus in-flight files.
    fn pending_count(&self) -> usize;

    /// Resolve once nothing is queued or in flight.
    async fn wait_idle(&self);

    fn stats(&self) -> ProviderStats;
}

/// Produces one provider's content for a single file.
#[async_trait]
pub trait ContentGenerator: Send + Sync + 'static {
    fn provider_type(&self) -> ContentProviderType;

    /// Whether this generator handles `file` at all.
    fn accepts(&self, file: &VaultFile) -> bool;

    fn should_regenerate(&self, old: &CacheSettings, new: &CacheSettings) -> bool;

    /// Generate content. `Ok(None)` means the file is not ready yet and is
    /// skipped without writing.
    async fn generate(
        &self,
        ctx: &ProviderContext,
        file: &VaultFile,
        settings: &CacheSettings,
    ) -> Result<Option<ContentUpdate>>;
}

/// Kinds of `provider` checked for freshness under `settings`.
pub fn tracked_kinds(provider: ContentProviderType, settings: &CacheSettings) -> Vec<ContentKind> {
    let enabled: Vec<ContentKind> = settings
        .enabled_content_kinds()
        .into_iter()
        .filter(|kind| kind.provider() == provider)
        .collect();
    if enabled.is_empty() {
        provider.content_kinds()
    } else {
        enabled
    }
}

// =============================================================================
// QUEUED PROVIDER
// =============================================================================

struct QueueState {
    order: VecDeque<String>,
    files: HashMap<String, VaultFile>,
    settings: CacheSettings,
    in_flight: usize,
    worker_running: bool,
    accepting: bool,
    epoch: u64,
}

impl QueueState {
    fn pending(&self) -> usize {
        self.order.len() + self.in_flight
    }
}

struct Shared<G> {
    generator: G,
    ctx: ProviderContext,
    config: ProviderConfig,
    state: Mutex<QueueState>,
    pending_tx: watch::Sender<usize>,
    processed: AtomicU64,
    skipped: AtomicU64,
    failed: AtomicU64,
}

/// Queue-backed [`ContentProvider`] around a [`ContentGenerator`].
pub struct QueuedProvider<G: ContentGenerator> {
    shared: Arc<Shared<G>>,
}

impl<G: ContentGenerator> QueuedProvider<G> {
    pub fn new(generator: G, ctx: ProviderContext) -> Self {
        Self::with_config(generator, ctx, ProviderConfig::default())
    }

    pub fn with_config(generator: G, ctx: ProviderContext, config: ProviderConfig) -> Self {
        let (pending_tx, _) = watch::channel(0);
        Self {
            shared: Arc::new(Shared {
                generator,
                ctx,
                config,
                state: Mutex::new(QueueState {
                    order: VecDeque::new(),
                    files: HashMap::new(),
                    settings: CacheSettings::default(),
                    in_flight: 0,
                    worker_running: false,
                    accepting: true,
                    epoch: 0,
                }),
                pending_tx,
                processed: AtomicU64::new(0),
                skipped: AtomicU64::new(0),
                failed: AtomicU64::new(0),
            }),
        }
    }

    pub fn generator(&self) -> &G {
        &self.shared.generator
    }

    fn spawn_worker(&self) {
        let shared = Arc::clone(&self.shared);
        tokio::spawn(async move { run_worker(shared).await });
    }
}

impl<G: ContentGenerator> Shared<G> {
    fn lock(&self) -> MutexGuard<'_, QueueState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn publish(&self, state: &QueueState) {
        self.pending_tx.send_replace(state.pending());
    }

    fn cancelled(&self, epoch: u64) -> bool {
        if self.ctx.session.is_stopped() {
            return true;
        }
        let state = self.lock();
        !state.accepting || state.epoch != epoch
    }

    async fn process_file(&self, file: &VaultFile, settings: &CacheSettings, epoch: u64) {
        let provider = self.generator.provider_type();
        let Some(record) = self.ctx.store.get_file(&file.path) else {
            trace!(provider = %provider, path = %file.path, "No record, skipping");
            self.skipped.fetch_add(1, Ordering::Relaxed);
            return;
        };
        if !record.needs_provider(provider, &tracked_kinds(provider, settings)) {
            trace!(provider = %provider, path = %file.path, "Content fresh, skipping");
            self.skipped.fetch_add(1, Ordering::Relaxed);
            return;
        }
        let mtime = record.mtime;

        let update = match self.generator.generate(&self.ctx, file, settings).await {
            Ok(Some(update)) => update,
            Ok(None) => {
                trace!(provider = %provider, path = %file.path, "Not ready, skipping");
                self.skipped.fetch_add(1, Ordering::Relaxed);
                return;
            }
            Err(e) => {
                warn!(
                    subsystem = "jobs",
                    component = "provider",
                    provider = %provider,
                    path = %file.path,
                    error = %e,
                    "Content generation failed"
                );
                self.failed.fetch_add(1, Ordering::Relaxed);
                return;
            }
        };

        if self.cancelled(epoch) {
            debug!(provider = %provider, path = %file.path, "Provider stopped, dropping result");
            return;
        }

        match self
            .ctx
            .store
            .update_content(&file.path, ContentPatch::new(mtime, update))
            .await
        {
            Ok(true) => {
                self.processed.fetch_add(1, Ordering::Relaxed);
            }
            Ok(false) => {
                self.skipped.fetch_add(1, Ordering::Relaxed);
            }
            Err(e) => {
                warn!(
                    subsystem = "jobs",
                    component = "provider",
                    provider = %provider,
                    path = %file.path,
                    error = %e,
                    "Failed to store content"
                );
                self.failed.fetch_add(1, Ordering::Relaxed);
            }
        }
    }
}

async fn run_worker<G: ContentGenerator>(shared: Arc<Shared<G>>) {
    let provider = shared.generator.provider_type();
    debug!(subsystem = "jobs", component = "provider", provider = %provider, "Provider worker started");

    loop {
        let (batch, settings, epoch) = {
            let mut guard = shared.lock();
            let state = &mut *guard;
            if state.order.is_empty() || !state.accepting || shared.ctx.session.is_stopped() {
                state.worker_running = false;
                state.in_flight = 0;
                shared.publish(state);
                break;
            }
            let take = shared.config.batch_size.max(1).min(state.order.len());
            let batch: Vec<VaultFile> = state
                .order
                .drain(..take)
                .filter_map(|path| state.files.remove(&path))
                .collect();
            state.in_flight = batch.len();
            shared.publish(state);
            (batch, state.settings.clone(), state.epoch)
        };

        trace!(provider = %provider, count = batch.len(), "Processing provider batch");
        for file in &batch {
            if shared.cancelled(epoch) {
                break;
            }
            shared.process_file(file, &settings, epoch).await;
            let mut state = shared.lock();
            state.in_flight = state.in_flight.saturating_sub(1);
            shared.publish(&state);
        }

        {
            let mut state = shared.lock();
            state.in_flight = 0;
            shared.publish(&state);
        }
        tokio::task::yield_now().await;
    }

    debug!(subsystem = "jobs", component = "provider", provider = %provider, "Provider worker idle");
}

#[async_trait]
impl<G: ContentGenerator> ContentProvider for QueuedProvider<G> {
    fn provider_type(&self) -> ContentProviderType {
        self.shared.generator.provider_type()
    }

    fn should_regenerate(&self, old: &CacheSettings, new: &CacheSettings) -> bool {
        self.shared.generator.should_regenerate(old, new)
    }

    async fn clear_content(&self) -> Result<()> {
        self.shared
            .ctx
            .store
            .clear_provider_content(self.provider_type())
            .await?;
        Ok(())
    }

    fn queue_files(&self, files: &[VaultFile], settings: &CacheSettings) -> usize {
        let provider = self.provider_type();
        if !self.shared.config.enabled || !settings.provider_enabled(provider) {
            return 0;
        }

        let mut guard = self.shared.lock();
        let state = &mut *guard;
        if !state.accepting {
            debug!(provider = %provider, "Provider stopped, ignoring queued files");
            return 0;
        }
        state.settings = settings.clone();

        let mut added = 0;
        for file in files.iter().filter(|f| self.shared.generator.accepts(f)) {
            if state.files.insert(file.path.clone(), file.clone()).is_none() {
                state.order.push_back(file.path.clone());
                added += 1;
            }
        }
        self.shared.publish(state);

        let spawn = !state.order.is_empty() && !state.worker_running;
        if spawn {
            state.worker_running = true;
        }
        drop(guard);

        if added > 0 {
            debug!(provider = %provider, count = added, "Files queued");
        }
        if spawn {
            self.spawn_worker();
        }
        added
    }

    fn start_processing(&self) {
        let spawn = {
            let mut state = self.shared.lock();
            state.accepting = true;
            let spawn = !state.order.is_empty() && !state.worker_running;
            if spawn {
                state.worker_running = true;
            }
            spawn
        };
        if spawn {
            self.spawn_worker();
        }
    }

    fn stop_processing(&self) {
        let mut state = self.shared.lock();
        state.accepting = false;
        state.epoch += 1;
        state.order.clear();
        state.files.clear();
        self.shared.publish(&state);
        debug!(provider = %self.shared.generator.provider_type(), "Provider processing stopped");
    }

    fn pending_count(&self) -> usize {
        self.shared.lock().pending()
    }

    async fn wait_idle(&self) {
        let mut rx = self.shared.pending_tx.subscribe();
        let _ = rx.wait_for(|pending| *pending == 0).await;
    }

    fn stats(&self) -> ProviderStats {
        ProviderStats {
            processed: self.shared.processed.load(Ordering::Relaxed),
            skipped: self.shared.skipped.load(Ordering::Relaxed),
            failed: self.shared.failed.load(Ordering::Relaxed),
        }
    }
}
