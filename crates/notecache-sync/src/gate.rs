//! Metadata readiness gate.
//!
//! Markdown content generation depends on the host metadata index. Files
//! whose index entry is missing wait here with a [`WaitMask`] of the
//! providers requested for them. A path leaves the pending set when a
//! targeted change event, a periodic sweep, or an index-resolved sweep finds
//! its entry. Ready paths are flushed one tick later, grouped by mask, and
//! each group is dispatched with exactly its masked providers.
//!
//! The index listener is started with the first pending path and stops once
//! nothing is pending, ready, or being swept.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError, Weak};
use std::time::Duration;

use tokio::sync::{broadcast, watch};
use tokio::task::JoinHandle;
use tokio::time::{Instant, MissedTickBehavior};
use tracing::{debug, trace, warn};

use notecache_core::{
    defaults, CacheSettings, MetadataEvent, MetadataIndex, VaultFile, WaitMask,
};
use notecache_jobs::{CacheSession, ContentProviderRegistry, QueueFilter};

use crate::config::SyncConfig;

/// Providers enabled under `settings`, as a mask.
pub fn active_mask(settings: &CacheSettings) -> WaitMask {
    settings.enabled_provider_types().into_iter().collect()
}

#[derive(Debug, Clone)]
struct GateEntry {
    file: VaultFile,
    mask: WaitMask,
}

#[derive(Default)]
struct GateState {
    pending: HashMap<String, GateEntry>,
    ready: HashMap<String, GateEntry>,
    flush_scheduled: bool,
    sweeping: bool,
    listener: Option<JoinHandle<()>>,
    warning: Option<JoinHandle<()>>,
    warning_fired: bool,
}

impl GateState {
    fn merge(map: &mut HashMap<String, GateEntry>, file: VaultFile, mask: WaitMask) {
        map.entry(file.path.clone())
            .and_modify(|entry| {
                entry.mask |= mask;
                entry.file = file.clone();
            })
            .or_insert(GateEntry { file, mask });
    }

    fn mark_ready(&mut self, path: &str) -> bool {
        match self.pending.remove(path) {
            Some(entry) => {
                Self::merge(&mut self.ready, entry.file, entry.mask);
                true
            }
            None => false,
        }
    }

    fn is_quiet(&self) -> bool {
        self.pending.is_empty() && self.ready.is_empty() && !self.flush_scheduled && !self.sweeping
    }
}

struct GateInner {
    index: Arc<dyn MetadataIndex>,
    registry: Arc<ContentProviderRegistry>,
    settings: watch::Receiver<CacheSettings>,
    session: CacheSession,
    config: SyncConfig,
    state: Mutex<GateState>,
}

/// Defers metadata-dependent work until the host index has each file.
#[derive(Clone)]
pub struct MetadataReadinessGate {
    inner: Arc<GateInner>,
}

impl MetadataReadinessGate {
    pub fn new(
        index: Arc<dyn MetadataIndex>,
        registry: Arc<ContentProviderRegistry>,
        settings: watch::Receiver<CacheSettings>,
        session: CacheSession,
        config: SyncConfig,
    ) -> Self {
        Self {
            inner: Arc::new(GateInner {
                index,
                registry,
                settings,
                session,
                config,
                state: Mutex::new(GateState::default()),
            }),
        }
    }

    /// Request the providers in `mask` for `files`.
    ///
    /// Files already in the index are flushed on the next tick; the rest
    /// wait with `mask` OR'd into their pending mask.
    pub fn queue(&self, files: &[VaultFile], mask: WaitMask) {
        if files.is_empty() || mask.is_empty() {
            return;
        }
        let mut ready = 0usize;
        let mut waiting = 0usize;
        {
            let mut state = self.inner.lock();
            for file in files {
                if self.inner.index.has_entry(&file.path) {
                    if state.pending.contains_key(&file.path) {
                        GateState::merge(&mut state.pending, file.clone(), mask);
                        state.mark_ready(&file.path);
                    } else {
                        GateState::merge(&mut state.ready, file.clone(), mask);
                    }
                    ready += 1;
                } else {
                    GateState::merge(&mut state.pending, file.clone(), mask);
                    waiting += 1;
                }
            }
            if waiting > 0 {
                self.inner.ensure_listener(&mut state);
                self.inner.arm_warning(&mut state);
            }
        }
        debug!(
            subsystem = "sync",
            component = "gate",
            op = "queue",
            mask = %mask,
            ready,
            waiting,
            "Metadata-dependent files queued"
        );
        if ready > 0 {
            self.inner.schedule_flush();
        }
    }

    /// Re-check one path after a targeted index change.
    pub fn notify_changed(&self, path: &str) {
        self.inner.on_changed(path);
    }

    /// Check every pending path against the index.
    pub async fn sweep(&self) {
        Arc::clone(&self.inner).sweep().await;
    }

    /// Drop disabled providers from every waiting mask. Paths whose mask
    /// becomes empty leave without being dispatched.
    pub fn prune(&self, settings: &CacheSettings) {
        let active = active_mask(settings);
        let mut guard = self.inner.lock();
        let state = &mut *guard;
        let before = state.pending.len() + state.ready.len();
        for map in [&mut state.pending, &mut state.ready] {
            map.retain(|_, entry| {
                entry.mask = entry.mask & active;
                !entry.mask.is_empty()
            });
        }
        let dropped = before - (state.pending.len() + state.ready.len());
        if dropped > 0 {
            debug!(subsystem = "sync", component = "gate", count = dropped, "Pruned gate entries after settings change");
        }
        self.inner.after_drain(state);
    }

    /// Forget paths that were deleted or renamed away.
    pub fn forget(&self, paths: &[String]) {
        let mut state = self.inner.lock();
        for path in paths {
            state.pending.remove(path);
            state.ready.remove(path);
        }
        self.inner.after_drain(&mut state);
    }

    /// Drop all waiting work and stop the listener and timers.
    pub fn clear(&self) {
        let mut state = self.inner.lock();
        state.pending.clear();
        state.ready.clear();
        state.flush_scheduled = false;
        state.warning_fired = false;
        if let Some(handle) = state.warning.take() {
            handle.abort();
        }
        if let Some(handle) = state.listener.take() {
            handle.abort();
        }
        debug!(subsystem = "sync", component = "gate", "Gate cleared");
    }

    pub fn pending_count(&self) -> usize {
        self.inner.lock().pending.len()
    }

    pub fn pending_mask(&self, path: &str) -> Option<WaitMask> {
        self.inner.lock().pending.get(path).map(|entry| entry.mask)
    }

    pub fn has_listener(&self) -> bool {
        self.inner.lock().listener.is_some()
    }

    pub fn is_idle(&self) -> bool {
        let state = self.inner.lock();
        state.is_quiet() && state.listener.is_none() && state.warning.is_none()
    }
}

impl GateInner {
    fn lock(&self) -> MutexGuard<'_, GateState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn ensure_listener(self: &Arc<Self>, state: &mut GateState) {
        if state.listener.is_some() {
            return;
        }
        let events = self.index.subscribe_metadata_events();
        let weak = Arc::downgrade(self);
        let interval = self.config.sweep_interval();
        state.listener = Some(tokio::spawn(run_listener(weak, events, interval)));
        debug!(subsystem = "sync", component = "gate", "Index listener started");
    }

    fn arm_warning(self: &Arc<Self>, state: &mut GateState) {
        if state.warning.is_some() || state.warning_fired || state.pending.is_empty() {
            return;
        }
        let weak = Arc::downgrade(self);
        let delay = self.config.metadata_warning();
        state.warning = Some(tokio::spawn(async move {
            tokio::time::sleep(delay).await;
            if let Some(inner) = weak.upgrade() {
                inner.fire_warning();
            }
        }));
    }

    fn fire_warning(&self) {
        let mut state = self.lock();
        state.warning = None;
        if state.pending.is_empty() {
            return;
        }
        state.warning_fired = true;
        let mut samples: Vec<&str> = state.pending.keys().map(String::as_str).collect();
        samples.sort_unstable();
        samples.truncate(defaults::METADATA_WAIT_WARNING_SAMPLES);
        warn!(
            subsystem = "sync",
            component = "gate",
            pending = state.pending.len(),
            samples = ?samples,
            "Metadata index has not produced entries for pending files"
        );
    }

    /// Reset the warning once everything drained, and stop the listener
    /// when there is nothing left to wait for.
    fn after_drain(&self, state: &mut GateState) {
        if state.pending.is_empty() {
            state.warning_fired = false;
            if let Some(handle) = state.warning.take() {
                handle.abort();
            }
        }
        if state.is_quiet() {
            if let Some(handle) = state.listener.take() {
                handle.abort();
                debug!(subsystem = "sync", component = "gate", "Index listener stopped");
            }
        }
    }

    fn on_changed(self: &Arc<Self>, path: &str) {
        let moved = {
            let mut state = self.lock();
            state.pending.contains_key(path) && self.index.has_entry(path) && state.mark_ready(path)
        };
        if moved {
            trace!(path, "Pending path ready after index change");
            self.schedule_flush();
        }
    }

    async fn sweep(self: Arc<Self>) {
        let paths: Vec<String> = {
            let mut state = self.lock();
            if state.sweeping || state.pending.is_empty() {
                return;
            }
            state.sweeping = true;
            state.pending.keys().cloned().collect()
        };

        let mut moved = 0usize;
        for chunk in paths.chunks(self.config.sweep_chunk_size.max(1)) {
            {
                let mut state = self.lock();
                for path in chunk {
                    if self.index.has_entry(path) && state.mark_ready(path) {
                        moved += 1;
                    }
                }
            }
            tokio::task::yield_now().await;
        }

        self.lock().sweeping = false;
        trace!(checked = paths.len(), moved, "Gate sweep finished");
        if moved > 0 {
            self.schedule_flush();
        } else {
            let mut state = self.lock();
            self.after_drain(&mut state);
        }
    }

    fn schedule_flush(self: &Arc<Self>) {
        {
            let mut state = self.lock();
            if state.flush_scheduled {
                return;
            }
            state.flush_scheduled = true;
        }
        let inner = Arc::clone(self);
        tokio::spawn(async move {
            tokio::task::yield_now().await;
            inner.flush().await;
        });
    }

    /// Dispatch every ready entry. `flush_scheduled` stays set until the
    /// dispatch finished so the gate never looks idle mid-flush.
    async fn flush(self: &Arc<Self>) {
        let entries: Vec<GateEntry> = {
            let mut state = self.lock();
            state.ready.drain().map(|(_, entry)| entry).collect()
        };

        if self.session.is_stopped() {
            debug!(count = entries.len(), "Session stopped, dropping ready gate entries");
        } else if !entries.is_empty() {
            let settings = self.settings.borrow().clone();
            let active = active_mask(&settings);
            for (mask, files) in group_by_mask(entries) {
                let mask = mask & active;
                if mask.is_empty() {
                    continue;
                }
                debug!(
                    subsystem = "sync",
                    component = "gate",
                    op = "flush",
                    mask = %mask,
                    count = files.len(),
                    "Dispatching metadata-ready files"
                );
                self.registry
                    .queue_files_for_all_providers(&files, &settings, QueueFilter::only(mask))
                    .await;
                if self.session.is_stopped() {
                    break;
                }
            }
        }

        let again = {
            let mut state = self.lock();
            state.flush_scheduled = false;
            self.after_drain(&mut state);
            !state.ready.is_empty()
        };
        if again {
            self.schedule_flush();
        }
    }
}

fn group_by_mask(entries: Vec<GateEntry>) -> Vec<(WaitMask, Vec<VaultFile>)> {
    let mut groups: Vec<(WaitMask, Vec<VaultFile>)> = Vec::new();
    for entry in entries {
        match groups.iter_mut().find(|(mask, _)| *mask == entry.mask) {
            Some((_, files)) => files.push(entry.file),
            None => groups.push((entry.mask, vec![entry.file])),
        }
    }
    for (_, files) in &mut groups {
        files.sort_by(|a, b| a.path.cmp(&b.path));
    }
    groups
}

enum ListenerAction {
    Changed(String),
    Sweep,
    Stop,
}

async fn run_listener(
    weak: Weak<GateInner>,
    mut events: broadcast::Receiver<MetadataEvent>,
    interval: Duration,
) {
    let mut ticker = tokio::time::interval_at(Instant::now() + interval, interval);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

    loop {
        let action = tokio::select! {
            event = events.recv() => match event {
                Ok(MetadataEvent::Changed { path }) => ListenerAction::Changed(path),
                Ok(MetadataEvent::Resolved) => ListenerAction::Sweep,
                Err(broadcast::error::RecvError::Lagged(skipped)) => {
                    debug!(skipped, "Index listener lagged, sweeping");
                    ListenerAction::Sweep
                }
                Err(broadcast::error::RecvError::Closed) => ListenerAction::Stop,
            },
            _ = ticker.tick() => ListenerAction::Sweep,
        };

        let Some(inner) = weak.upgrade() else {
            break;
        };
        match action {
            ListenerAction::Changed(path) => inner.on_changed(&path),
            ListenerAction::Sweep => Arc::clone(&inner).sweep().await,
            ListenerAction::Stop => {
                inner.lock().listener = None;
                break;
            }
        }
    }
}
