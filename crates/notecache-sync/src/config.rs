//! Timing configuration for vault sync, the readiness gate, and the
//! rebuild notice.

use std::time::Duration;

use notecache_core::defaults;

/// Configuration for the sync layer.
#[derive(Debug, Clone)]
pub struct SyncConfig {
    /// Delay before a scheduled diff runs. Zero defers to the next tick.
    pub diff_debounce_ms: u64,
    /// Delay before tag and property trees are rebuilt after store changes.
    pub file_operation_delay_ms: u64,
    /// Delay before the readiness gate logs unresolved paths.
    pub metadata_warning_ms: u64,
    /// Paths checked per sweep chunk.
    pub sweep_chunk_size: usize,
    /// Interval between periodic sweeps while paths are pending.
    pub sweep_interval_ms: u64,
    /// Interval between rebuild notice polls.
    pub notice_poll_ms: u64,
    /// Time after which a notice that never saw work hides itself.
    pub notice_timeout_ms: u64,
}

impl Default for SyncConfig {
    fn default() -> Self {
        Self {
            diff_debounce_ms: defaults::DIFF_DEBOUNCE_MS,
            file_operation_delay_ms: defaults::FILE_OPERATION_DELAY_MS,
            metadata_warning_ms: defaults::METADATA_WAIT_WARNING_MS,
            sweep_chunk_size: defaults::METADATA_SWEEP_CHUNK_SIZE,
            sweep_interval_ms: defaults::METADATA_SWEEP_INTERVAL_MS,
            notice_poll_ms: defaults::NOTICE_POLL_INTERVAL_MS,
            notice_timeout_ms: defaults::NOTICE_NO_PROGRESS_TIMEOUT_MS,
        }
    }
}

fn env_parse<T: std::str::FromStr>(name: &str, default: T) -> T {
    std::env::var(name)
        .ok()
        .and_then(|v| v.parse::<T>().ok())
        .unwrap_or(default)
}

impl SyncConfig {
    /// Create config from environment variables (with defaults).
    ///
    /// | Variable | Default | Description |
    /// |----------|---------|-------------|
    /// | `NOTECACHE_DIFF_DEBOUNCE_MS` | `0` | Diff coalescing delay |
    /// | `NOTECACHE_FILE_OPERATION_DELAY_MS` | `300` | Tree rebuild delay |
    /// | `NOTECACHE_METADATA_WARNING_MS` | `10000` | Unresolved metadata warning delay |
    /// | `NOTECACHE_SWEEP_CHUNK_SIZE` | `500` | Paths per sweep chunk |
    /// | `NOTECACHE_SWEEP_INTERVAL_MS` | `1000` | Periodic sweep interval |
    /// | `NOTECACHE_NOTICE_POLL_MS` | `2000` | Rebuild notice poll interval |
    /// | `NOTECACHE_NOTICE_TIMEOUT_MS` | `60000` | Notice timeout without work |
    pub fn from_env() -> Self {
        let d = Self::default();
        Self {
            diff_debounce_ms: env_parse("NOTECACHE_DIFF_DEBOUNCE_MS", d.diff_debounce_ms),
            file_operation_delay_ms: env_parse(
                "NOTECACHE_FILE_OPERATION_DELAY_MS",
                d.file_operation_delay_ms,
            ),
            metadata_warning_ms: env_parse("NOTECACHE_METADATA_WARNING_MS", d.metadata_warning_ms),
            sweep_chunk_size: env_parse("NOTECACHE_SWEEP_CHUNK_SIZE", d.sweep_chunk_size).max(1),
            sweep_interval_ms: env_parse("NOTECACHE_SWEEP_INTERVAL_MS", d.sweep_interval_ms).max(1),
            notice_poll_ms: env_parse("NOTECACHE_NOTICE_POLL_MS", d.notice_poll_ms).max(1),
            notice_timeout_ms: env_parse("NOTECACHE_NOTICE_TIMEOUT_MS", d.notice_timeout_ms),
        }
    }

    pub fn with_diff_debounce(mut self, ms: u64) -> Self {
        self.diff_debounce_ms = ms;
        self
    }

    pub fn with_file_operation_delay(mut self, ms: u64) -> Self {
        self.file_operation_delay_ms = ms;
        self
    }

    pub fn with_metadata_warning(mut self, ms: u64) -> Self {
        self.metadata_warning_ms = ms;
        self
    }

    pub fn with_sweep(mut self, chunk_size: usize, interval_ms: u64) -> Self {
        self.sweep_chunk_size = chunk_size.max(1);
        self.sweep_interval_ms = interval_ms.max(1);
        self
    }

    pub fn with_notice_timing(mut self, poll_ms: u64, timeout_ms: u64) -> Self {
        self.notice_poll_ms = poll_ms.max(1);
        self.notice_timeout_ms = timeout_ms;
        self
    }

    pub fn diff_debounce(&self) -> Duration {
        Duration::from_millis(self.diff_debounce_ms)
    }

    pub fn file_operation_delay(&self) -> Duration {
        Duration::from_millis(self.file_operation_delay_ms)
    }

    pub fn metadata_warning(&self) -> Duration {
        Duration::from_millis(self.metadata_warning_ms)
    }

    pub fn sweep_interval(&self) -> Duration {
        Duration::from_millis(self.sweep_interval_ms)
    }

    pub fn notice_poll(&self) -> Duration {
        Duration::from_millis(self.notice_poll_ms)
    }

    pub fn notice_timeout(&self) -> Duration {
        Duration::from_millis(self.notice_timeout_ms)
    }
}
