//! Host application interfaces consumed by the cache.
//!
//! The vault, its metadata index, and the notice UI are owned by the host.
//! These traits are the only surface the cache core touches, so tests and
//! the CLI can supply their own implementations.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value as JsonValue};
use tokio::sync::broadcast;

use crate::error::Result;
use crate::models::{basename, stem_of, VaultFile};

// =============================================================================
// EVENTS
// =============================================================================

/// File-level change reported by the vault.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum VaultEvent {
    Created(VaultFile),
    Modified(VaultFile),
    Deleted { path: String },
    Renamed { file: VaultFile, old_path: String },
}

impl VaultEvent {
    /// Path the event refers to after it happened.
    pub fn path(&self) -> &str {
        match self {
            VaultEvent::Created(file) | VaultEvent::Modified(file) => &file.path,
            VaultEvent::Deleted { path } => path,
            VaultEvent::Renamed { file, .. } => &file.path,
        }
    }
}

/// Metadata index change.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MetadataEvent {
    /// The index entry for one path was (re)computed.
    Changed { path: String },
    /// The index finished a full resolution pass.
    Resolved,
}

// =============================================================================
// METADATA
// =============================================================================

/// Parsed metadata the host index holds for one file.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct CachedMetadata {
    /// Inline and frontmatter tags, with or without a leading `#`.
    pub tags: Vec<String>,
    /// Frontmatter, when the file has a parseable block.
    pub frontmatter: Option<Map<String, JsonValue>>,
    /// Link targets of `![[...]]` / `![](...)` embeds, in document order.
    pub embeds: Vec<String>,
}

impl CachedMetadata {
    pub fn frontmatter_value(&self, key: &str) -> Option<&JsonValue> {
        if key.trim().is_empty() {
            return None;
        }
        self.frontmatter.as_ref()?.get(key)
    }

    /// Frontmatter value as a list of strings. Scalars become one entry,
    /// arrays keep their scalar members.
    pub fn frontmatter_strings(&self, key: &str) -> Vec<String> {
        match self.frontmatter_value(key) {
            Some(value) => json_to_strings(value),
            None => Vec::new(),
        }
    }
}

fn json_to_strings(value: &JsonValue) -> Vec<String> {
    match value {
        JsonValue::Null => Vec::new(),
        JsonValue::String(s) => {
            if s.trim().is_empty() {
                Vec::new()
            } else {
                vec![s.clone()]
            }
        }
        JsonValue::Bool(b) => vec![b.to_string()],
        JsonValue::Number(n) => vec![n.to_string()],
        JsonValue::Array(items) => items.iter().flat_map(json_to_strings).collect(),
        JsonValue::Object(_) => Vec::new(),
    }
}

// =============================================================================
// HOST TRAITS
// =============================================================================

/// Access to the host vault's files.
#[async_trait]
pub trait VaultHost: Send + Sync {
    /// Every file in the vault.
    async fn list_files(&self) -> Result<Vec<VaultFile>>;

    /// Current listing entry for one path.
    async fn get_file(&self, path: &str) -> Result<Option<VaultFile>>;

    async fn read_text(&self, path: &str) -> Result<String>;

    async fn read_binary(&self, path: &str) -> Result<Vec<u8>>;

    /// First-page thumbnail for a PDF. Hosts without a renderer return `None`.
    async fn render_pdf_thumbnail(&self, _path: &str) -> Result<Option<Vec<u8>>> {
        Ok(None)
    }

    /// Resolve a wiki link or relative link from `source_path` to a vault path.
    ///
    /// Tries the path relative to the source folder, then the path as
    /// written, then the first file with a matching name or stem.
    async fn resolve_link(&self, link: &str, source_path: &str) -> Result<Option<String>> {
        let target = link
            .split(['#', '|'])
            .next()
            .unwrap_or(link)
            .trim()
            .trim_start_matches("./");
        if target.is_empty() {
            return Ok(None);
        }
        let files = self.list_files().await?;
        let folder = source_path.rsplit_once('/').map(|(dir, _)| dir);
        if let Some(folder) = folder {
            let relative = format!("{folder}/{target}");
            if files.iter().any(|f| f.path == relative) {
                return Ok(Some(relative));
            }
        }
        if files.iter().any(|f| f.path == target) {
            return Ok(Some(target.to_string()));
        }
        let wanted = basename(target);
        let found = files
            .iter()
            .find(|f| f.basename() == wanted)
            .or_else(|| files.iter().find(|f| stem_of(&f.path) == wanted));
        Ok(found.map(|f| f.path.clone()))
    }

    /// Live stream of file events.
    fn subscribe_vault_events(&self) -> broadcast::Receiver<VaultEvent>;
}

/// Access to the host's metadata index.
pub trait MetadataIndex: Send + Sync {
    /// Index entry for `path`, or `None` while the host has not indexed it.
    fn get_file_cache(&self, path: &str) -> Option<CachedMetadata>;

    fn has_entry(&self, path: &str) -> bool {
        self.get_file_cache(path).is_some()
    }

    fn subscribe_metadata_events(&self) -> broadcast::Receiver<MetadataEvent>;
}

/// Persistent, dismissible progress notice in the host UI.
pub trait ProgressNotice: Send + Sync {
    fn show(&self, message: &str, max: u64);

    fn update(&self, done: u64, max: u64, message: &str);

    fn hide(&self);
}

/// Notice that only logs, for hosts without a notice UI.
#[derive(Debug, Default, Clone, Copy)]
pub struct LogNotice;

impl ProgressNotice for LogNotice {
    fn show(&self, message: &str, max: u64) {
        tracing::info!(subsystem = "notice", max, "{message}");
    }

    fn update(&self, done: u64, max: u64, message: &str) {
        tracing::info!(subsystem = "notice", done, max, "{message}");
    }

    fn hide(&self) {
        tracing::debug!(subsystem = "notice", "Notice hidden");
    }
}
