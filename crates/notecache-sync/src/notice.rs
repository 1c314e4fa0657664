//! Rebuild progress notice.
//!
//! After a rebuild the notice polls for remaining work and reports
//! `max - remaining` as progress. The displayed maximum starts at the
//! persisted estimate and grows if more work shows up than expected. The
//! notice hides itself after consecutive empty polls, or at the timeout
//! when no remaining work was ever observed, and clears the persisted
//! marker when it does.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, PoisonError};

use async_trait::async_trait;
use tokio::task::JoinHandle;
use tokio::time::{Instant, MissedTickBehavior};
use tracing::{debug, info, warn};

use notecache_core::{
    defaults, is_markdown_path, CacheRebuildNoticeState, ContentKind, MetadataIndex,
    ProgressNotice, Result,
};
use notecache_db::{LocalStorage, RecordStore};

use crate::config::SyncConfig;

/// Remaining-work counts from one poll.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RemainingCounts {
    /// Records missing any tracked content kind.
    pub remaining: u64,
    /// Remaining records that can be processed now.
    pub ready: u64,
    /// Remaining records including those blocked on the metadata index.
    pub raw: u64,
}

impl RemainingCounts {
    pub fn blocked(&self) -> u64 {
        self.raw.saturating_sub(self.ready)
    }
}

/// Source of remaining-work counts for the notice.
#[async_trait]
pub trait PendingWorkSource: Send + Sync {
    async fn remaining(&self, kinds: &[ContentKind]) -> Result<RemainingCounts>;
}

/// Counts pending records in the store, split by index readiness.
pub struct StorePendingWork {
    store: Arc<RecordStore>,
    index: Arc<dyn MetadataIndex>,
}

impl StorePendingWork {
    pub fn new(store: Arc<RecordStore>, index: Arc<dyn MetadataIndex>) -> Self {
        Self { store, index }
    }
}

#[async_trait]
impl PendingWorkSource for StorePendingWork {
    async fn remaining(&self, kinds: &[ContentKind]) -> Result<RemainingCounts> {
        let paths = self.store.get_files_needing_any_content(kinds);
        let raw = paths.len() as u64;
        let ready = paths
            .iter()
            .filter(|path| !is_markdown_path(path) || self.index.has_entry(path))
            .count() as u64;
        Ok(RemainingCounts {
            remaining: raw,
            ready,
            raw,
        })
    }
}

fn progress_message(counts: &RemainingCounts) -> String {
    match counts.blocked() {
        0 => format!("Rebuilding cache: {} files remaining", counts.remaining),
        blocked => format!(
            "Rebuilding cache: {} files remaining, {} waiting for metadata",
            counts.remaining, blocked
        ),
    }
}

struct NoticeInner {
    notice: Arc<dyn ProgressNotice>,
    storage: Arc<LocalStorage>,
    source: Arc<dyn PendingWorkSource>,
    config: SyncConfig,
    visible: AtomicBool,
    task: Mutex<Option<JoinHandle<()>>>,
}

impl NoticeInner {
    fn close(&self) {
        if self.visible.swap(false, Ordering::SeqCst) {
            self.notice.hide();
        }
        if let Err(e) = self.storage.set_rebuild_notice_state(None) {
            warn!(
                subsystem = "sync",
                component = "notice",
                error = %e,
                "Failed to clear rebuild marker"
            );
        }
    }

    async fn run(self: Arc<Self>, state: CacheRebuildNoticeState) {
        let started = Instant::now();
        let mut ticker = tokio::time::interval_at(
            started + self.config.notice_poll(),
            self.config.notice_poll(),
        );
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        let mut max = state.total;
        let mut saw_work = false;
        let mut empty_polls = 0u32;

        loop {
            ticker.tick().await;
            match self.source.remaining(&state.types).await {
                Ok(counts) => {
                    if counts.raw > max {
                        max = counts.raw;
                    }
                    if counts.remaining == 0 {
                        empty_polls += 1;
                        self.notice.update(max, max, "Rebuilding cache: done");
                        if empty_polls >= defaults::NOTICE_EMPTY_POLLS_TO_HIDE {
                            info!(
                                subsystem = "sync",
                                component = "notice",
                                total = max,
                                duration_ms = started.elapsed().as_millis() as u64,
                                "Rebuild finished"
                            );
                            break;
                        }
                    } else {
                        saw_work = true;
                        empty_polls = 0;
                        let done = max.saturating_sub(counts.remaining);
                        self.notice.update(done, max, &progress_message(&counts));
                    }
                }
                Err(e) => {
                    warn!(
                        subsystem = "sync",
                        component = "notice",
                        error = %e,
                        "Failed to count remaining work"
                    );
                }
            }

            // Outstanding work keeps the notice up however long it takes.
            if !saw_work && started.elapsed() >= self.config.notice_timeout() {
                debug!(
                    subsystem = "sync",
                    component = "notice",
                    "Notice timed out without observing work"
                );
                break;
            }
        }
        self.close();
    }
}

/// Progress notice bound to a persisted rebuild marker.
pub struct RebuildNotice {
    inner: Arc<NoticeInner>,
}

impl RebuildNotice {
    pub fn new(
        notice: Arc<dyn ProgressNotice>,
        storage: Arc<LocalStorage>,
        source: Arc<dyn PendingWorkSource>,
        config: SyncConfig,
    ) -> Self {
        Self {
            inner: Arc::new(NoticeInner {
                notice,
                storage,
                source,
                config,
                visible: AtomicBool::new(false),
                task: Mutex::new(None),
            }),
        }
    }

    /// Show the notice for `state` and start polling. Replaces any running
    /// notice. The marker is not written here.
    pub fn start(&self, state: CacheRebuildNoticeState) {
        let mut task = self.inner.task.lock().unwrap_or_else(PoisonError::into_inner);
        if let Some(previous) = task.take() {
            previous.abort();
        }
        self.inner.notice.show(
            &format!("Rebuilding cache: {} files", state.total),
            state.total,
        );
        self.inner.visible.store(true, Ordering::SeqCst);
        debug!(
            subsystem = "sync",
            component = "notice",
            total = state.total,
            source = %state.source,
            "Notice started"
        );
        *task = Some(tokio::spawn(Arc::clone(&self.inner).run(state)));
    }

    /// Hide the notice and clear the persisted marker.
    pub fn hide(&self) {
        self.stop();
        self.inner.close();
    }

    /// Stop polling without touching the marker, so the notice can be
    /// restored on the next start.
    pub fn stop(&self) {
        let handle = self
            .inner
            .task
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take();
        if let Some(handle) = handle {
            handle.abort();
        }
    }

    pub fn is_visible(&self) -> bool {
        self.inner.visible.load(Ordering::SeqCst)
    }
}

impl Drop for RebuildNotice {
    fn drop(&mut self) {
        self.stop();
    }
}
