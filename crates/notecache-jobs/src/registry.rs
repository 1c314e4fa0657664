//! Content provider registry.

use std::collections::BTreeMap;
use std::sync::Arc;

use tokio::sync::RwLock;
use tracing::{debug, info, warn};

use notecache_core::{CacheSettings, ContentProviderType, VaultFile, WaitMask};

use crate::provider::{ContentProvider, ProviderStats};

/// Which providers a dispatch reaches.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct QueueFilter {
    /// Only these providers, when set.
    pub include: Option<WaitMask>,
    /// Never these providers.
    pub exclude: WaitMask,
}

impl QueueFilter {
    /// Every registered provider.
    pub fn all() -> Self {
        Self::default()
    }

    /// Exactly the providers in `mask`.
    pub fn only(mask: WaitMask) -> Self {
        Self {
            include: Some(mask),
            exclude: WaitMask::EMPTY,
        }
    }

    pub fn excluding(mask: WaitMask) -> Self {
        Self {
            include: None,
            exclude: mask,
        }
    }

    pub fn allows(&self, provider: ContentProviderType) -> bool {
        if self.exclude.contains(provider) {
            return false;
        }
        self.include.map_or(true, |include| include.contains(provider))
    }
}

/// Registered content providers keyed by type.
#[derive(Default)]
pub struct ContentProviderRegistry {
    providers: RwLock<BTreeMap<ContentProviderType, Arc<dyn ContentProvider>>>,
}

impl ContentProviderRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a provider, replacing any provider of the same type.
    pub async fn register_provider(&self, provider: Arc<dyn ContentProvider>) {
        let provider_type = provider.provider_type();
        self.providers.write().await.insert(provider_type, provider);
        debug!(provider = %provider_type, "Registered content provider");
    }

    pub async fn get_provider(
        &self,
        provider_type: ContentProviderType,
    ) -> Option<Arc<dyn ContentProvider>> {
        self.providers.read().await.get(&provider_type).cloned()
    }

    pub async fn provider_types(&self) -> Vec<ContentProviderType> {
        self.providers.read().await.keys().copied().collect()
    }

    async fn snapshot(&self) -> Vec<Arc<dyn ContentProvider>> {
        self.providers.read().await.values().cloned().collect()
    }

    /// Dispatch `files` to every provider allowed by `filter`.
    ///
    /// Each provider is resumed before queuing so that providers halted by
    /// [`ContentProviderRegistry::stop_all_processing`] accept the work.
    /// Returns the provider types that queued at least one file.
    pub async fn queue_files_for_all_providers(
        &self,
        files: &[VaultFile],
        settings: &CacheSettings,
        filter: QueueFilter,
    ) -> Vec<ContentProviderType> {
        if files.is_empty() {
            return Vec::new();
        }
        let mut dispatched = Vec::new();
        for provider in self.snapshot().await {
            let provider_type = provider.provider_type();
            if !filter.allows(provider_type) {
                continue;
            }
            provider.start_processing();
            if provider.queue_files(files, settings) > 0 {
                dispatched.push(provider_type);
            }
        }
        debug!(
            subsystem = "jobs",
            component = "registry",
            count = files.len(),
            providers = ?dispatched,
            "Files dispatched to providers"
        );
        dispatched
    }

    /// Halt every provider and drop its queue.
    pub async fn stop_all_processing(&self) {
        for provider in self.snapshot().await {
            provider.stop_processing();
        }
        info!(subsystem = "jobs", component = "registry", "All providers stopped");
    }

    /// Clear the content of every provider whose output depends on a setting
    /// that changed. Returns the cleared provider types.
    pub async fn handle_settings_change(
        &self,
        old: &CacheSettings,
        new: &CacheSettings,
    ) -> Vec<ContentProviderType> {
        let mut cleared = Vec::new();
        for provider in self.snapshot().await {
            if !provider.should_regenerate(old, new) {
                continue;
            }
            let provider_type = provider.provider_type();
            match provider.clear_content().await {
                Ok(()) => cleared.push(provider_type),
                Err(e) => warn!(
                    subsystem = "jobs",
                    component = "registry",
                    provider = %provider_type,
                    error = %e,
                    "Failed to clear provider content"
                ),
            }
        }
        if !cleared.is_empty() {
            info!(providers = ?cleared, "Provider content cleared after settings change");
        }
        cleared
    }

    /// Queued plus in-flight files across all providers.
    pub async fn pending_count(&self) -> usize {
        self.snapshot()
            .await
            .iter()
            .map(|provider| provider.pending_count())
            .sum()
    }

    /// Resolve once every provider is idle.
    pub async fn wait_idle(&self) {
        for provider in self.snapshot().await {
            provider.wait_idle().await;
        }
    }

    pub async fn stats(&self) -> Vec<(ContentProviderType, ProviderStats)> {
        self.snapshot()
            .await
            .iter()
            .map(|provider| (provider.provider_type(), provider.stats()))
            .collect()
    }
}
