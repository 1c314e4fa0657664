//! Centralized default constants for notecache.
//!
//! **This module is the single source of truth** for shared default values.
//! Crates reference these constants instead of defining their own magic
//! numbers. Organized by component.

// =============================================================================
// RECORD STORE
// =============================================================================

/// Schema version of the content database. A mismatch drops and recreates
/// every table.
pub const DB_SCHEMA_VERSION: i64 = 3;

/// Version of the derived-content semantics (preview stripping rules, tag
/// normalization). A mismatch clears every record so content is regenerated.
pub const DB_CONTENT_VERSION: i64 = 7;

/// Number of records written per transaction in batched writes.
pub const STORE_WRITE_BATCH: usize = 500;

/// Capacity of the in-memory preview text cache (entries).
pub const PREVIEW_CACHE_CAPACITY: usize = 2_000;

/// Default store event broadcast channel capacity.
pub const EVENT_BUS_CAPACITY: usize = 256;

// =============================================================================
// LOCAL STORAGE
// =============================================================================

/// Version of the local key-value namespace. A mismatch discards the
/// namespace contents.
pub const LOCAL_STORAGE_VERSION: u32 = 2;

/// Maximum recent icons remembered per icon provider.
pub const RECENT_ICONS_PER_PROVIDER: usize = 15;

/// Maximum recent notes remembered per profile.
pub const RECENT_NOTES_LIMIT: usize = 50;

// =============================================================================
// SYNC
// =============================================================================

/// Delay before a scheduled diff pass runs. Zero coalesces every event
/// raised in the same tick into one pass.
pub const DIFF_DEBOUNCE_MS: u64 = 0;

/// Debounce for tag/property tree rebuilds after content writes.
pub const FILE_OPERATION_DELAY_MS: u64 = 300;

// =============================================================================
// METADATA READINESS GATE
// =============================================================================

/// Delay after which unresolved metadata waits are reported.
pub const METADATA_WAIT_WARNING_MS: u64 = 10_000;

/// Maximum unresolved paths logged by the metadata wait warning.
pub const METADATA_WAIT_WARNING_SAMPLES: usize = 20;

/// Paths checked per chunk during a readiness sweep.
pub const METADATA_SWEEP_CHUNK_SIZE: usize = 500;

/// Interval between periodic readiness sweeps while waits are pending.
pub const METADATA_SWEEP_INTERVAL_MS: u64 = 1_000;

// =============================================================================
// CONTENT PROVIDERS
// =============================================================================

/// Files processed per provider batch.
pub const PROVIDER_BATCH_SIZE: usize = 25;

/// Default preview length in characters.
pub const PREVIEW_LENGTH: usize = 300;

/// Largest markdown file read for content generation (bytes).
pub const MARKDOWN_MAX_BYTES: usize = 5 * 1024 * 1024;

/// Largest feature image stored in the blob store (bytes).
pub const FEATURE_IMAGE_MAX_BYTES: usize = 10 * 1024 * 1024;

// =============================================================================
// REBUILD NOTICE
// =============================================================================

/// Interval between rebuild progress polls.
pub const NOTICE_POLL_INTERVAL_MS: u64 = 2_000;

/// Time after which a notice that never observed work hides itself.
pub const NOTICE_NO_PROGRESS_TIMEOUT_MS: u64 = 60_000;

/// Consecutive empty polls required before the notice hides.
pub const NOTICE_EMPTY_POLLS_TO_HIDE: u32 = 2;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_gate_constants() {
        assert_eq!(METADATA_WAIT_WARNING_MS, 10_000);
        assert_eq!(METADATA_WAIT_WARNING_SAMPLES, 20);
        assert_eq!(METADATA_SWEEP_CHUNK_SIZE, 500);
    }

    #[test]
    fn test_notice_constants() {
        assert_eq!(NOTICE_POLL_INTERVAL_MS, 2_000);
        assert_eq!(NOTICE_NO_PROGRESS_TIMEOUT_MS, 60_000);
        assert_eq!(NOTICE_EMPTY_POLLS_TO_HIDE, 2);
    }

    #[test]
    fn test_recent_icon_cap() {
        assert_eq!(RECENT_ICONS_PER_PROVIDER, 15);
    }
}
