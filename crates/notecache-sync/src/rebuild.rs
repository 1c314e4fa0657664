//! Rebuild controller.
//!
//! Clears the content database and reloads it from the vault while every
//! other producer is held off by the session's `stopped` flag. The flag is
//! restored to its previous value on every exit path.

use std::time::Instant;

use tracing::{info, warn};

use notecache_core::{CacheRebuildNoticeState, ContentKind, Result, VaultFile};

use crate::orchestrator::VaultSync;

/// Marker source written by [`VaultSync::rebuild_cache`].
pub const REBUILD_SOURCE: &str = "rebuild";

/// Files that will carry at least one of `kinds`.
pub fn expected_work(files: &[VaultFile], kinds: &[ContentKind]) -> u64 {
    files
        .iter()
        .filter(|file| kinds.iter().any(|kind| kind.applies_to(&file.path)))
        .count() as u64
}

impl VaultSync {
    /// Drop all cached content and regenerate it from the vault.
    ///
    /// On failure the notice and its marker are cleared, the previous
    /// `stopped` value is restored, and the error is returned.
    pub async fn rebuild_cache(&self) -> Result<()> {
        let start = Instant::now();
        let inner = &self.inner;
        info!(subsystem = "sync", component = "rebuild", "Cache rebuild started");

        inner.notice.hide();
        let previous = inner.session.set_stopped(true);
        inner.registry.stop_all_processing().await;
        inner.diff_debouncer.cancel();
        inner.tree_debouncer.cancel();
        inner.gate.clear();

        match self.clear_and_reload(previous).await {
            Ok(total) => {
                info!(
                    subsystem = "sync",
                    component = "rebuild",
                    total,
                    duration_ms = start.elapsed().as_millis() as u64,
                    "Cache cleared and reload queued"
                );
                Ok(())
            }
            Err(e) => {
                warn!(
                    subsystem = "sync",
                    component = "rebuild",
                    error = %e,
                    "Cache rebuild failed"
                );
                inner.notice.hide();
                inner.session.set_stopped(previous);
                Err(e)
            }
        }
    }

    /// Returns the expected work total shown in the notice.
    async fn clear_and_reload(&self, previous: bool) -> Result<u64> {
        let inner = &self.inner;
        inner.store.clear_database().await?;
        self.reset_read_models();

        let files = inner.vault.list_files().await?;
        let kinds = inner.settings.borrow().enabled_content_kinds();
        let total = expected_work(&files, &kinds);
        let state = CacheRebuildNoticeState {
            total,
            source: REBUILD_SOURCE.to_string(),
            types: kinds,
        };
        inner.storage.set_rebuild_notice_state(Some(state.clone()))?;
        inner.notice.start(state);

        inner.session.set_stopped(previous);
        self.initial_load().await?;
        Ok(total)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_expected_work_counts_applicable_files() {
        let files = vec![
            VaultFile::new("a.md", 1, 1),
            VaultFile::new("b.pdf", 1, 1),
            VaultFile::new("c.png", 1, 1),
        ];
        assert_eq!(expected_work(&files, &ContentKind::ALL), 2);
        assert_eq!(expected_work(&files, &[ContentKind::Tags]), 1);
        assert_eq!(expected_work(&files, &[]), 0);
    }
}
