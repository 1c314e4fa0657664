//! Frontmatter metadata index over a filesystem vault.
//!
//! Each markdown file is parsed into tags, YAML frontmatter, and embed
//! targets. A file whose frontmatter does not parse gets no entry, the same
//! way a host index leaves such files unresolved.

use std::collections::HashMap;
use std::sync::{Arc, PoisonError, RwLock};

use once_cell::sync::Lazy;
use regex::Regex;
use serde_json::Value as JsonValue;
use tokio::sync::broadcast;
use tracing::{debug, warn};

use notecache_core::{
    defaults, is_markdown_path, CachedMetadata, MetadataEvent, MetadataIndex, VaultHost,
};

use crate::vault::FsVault;

static INLINE_TAG: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?:^|\s)#([\p{L}\p{N}_][\p{L}\p{N}_/-]*)").unwrap());
static WIKI_EMBED: Lazy<Regex> = Lazy::new(|| Regex::new(r"!\[\[([^\]|#]+)").unwrap());
static MD_EMBED: Lazy<Regex> = Lazy::new(|| Regex::new(r"!\[[^\]]*\]\(([^)\s]+)\)").unwrap());
static CODE_FENCE: Lazy<Regex> = Lazy::new(|| Regex::new(r"(?s)```.*?```").unwrap());

/// Split `text` into its frontmatter block (without delimiters) and body.
pub fn split_frontmatter(text: &str) -> (Option<&str>, &str) {
    let Some(rest) = text.strip_prefix("---\n").or_else(|| text.strip_prefix("---\r\n")) else {
        return (None, text);
    };
    for (offset, line) in line_offsets(rest) {
        if line.trim_end() == "---" {
            let body_start = (offset + line.len()).min(rest.len());
            let body = rest[body_start..].trim_start_matches(['\r', '\n']);
            return (Some(&rest[..offset]), body);
        }
    }
    (None, text)
}

fn line_offsets(text: &str) -> impl Iterator<Item = (usize, &str)> {
    let mut offset = 0;
    text.split_inclusive('\n').map(move |line| {
        let start = offset;
        offset += line.len();
        (start, line.trim_end_matches(['\r', '\n']))
    })
}

/// Parse one markdown file. `None` when the frontmatter is not valid YAML
/// or not a mapping.
pub fn parse_metadata(text: &str) -> Option<CachedMetadata> {
    let (frontmatter, body) = split_frontmatter(text);
    let frontmatter = match frontmatter {
        Some(raw) if raw.trim().is_empty() => None,
        Some(raw) => {
            let yaml: serde_yaml::Value = serde_yaml::from_str(raw).ok()?;
            match serde_json::to_value(yaml).ok()? {
                JsonValue::Object(map) => Some(map),
                JsonValue::Null => None,
                _ => return None,
            }
        }
        None => None,
    };

    let prose = CODE_FENCE.replace_all(body, "");
    let tags = INLINE_TAG
        .captures_iter(&prose)
        .map(|caps| format!("#{}", &caps[1]))
        .collect();

    let mut embeds: Vec<(usize, String)> = WIKI_EMBED
        .captures_iter(body)
        .chain(MD_EMBED.captures_iter(body))
        .filter_map(|caps| {
            let target = caps.get(1)?;
            Some((target.start(), target.as_str().trim().to_string()))
        })
        .collect();
    embeds.sort_by_key(|(start, _)| *start);

    Some(CachedMetadata {
        tags,
        frontmatter,
        embeds: embeds.into_iter().map(|(_, target)| target).collect(),
    })
}

/// Metadata index over an [`FsVault`], refreshed by the CLI and watcher.
pub struct FrontmatterIndex {
    vault: Arc<FsVault>,
    entries: RwLock<HashMap<String, CachedMetadata>>,
    events: broadcast::Sender<MetadataEvent>,
}

impl FrontmatterIndex {
    pub fn new(vault: Arc<FsVault>) -> Self {
        let (events, _) = broadcast::channel(defaults::EVENT_BUS_CAPACITY);
        Self {
            vault,
            entries: RwLock::new(HashMap::new()),
            events,
        }
    }

    /// Index every markdown file, then announce a resolved index.
    pub async fn index_all(&self) -> notecache_core::Result<usize> {
        let files = self.vault.list_files().await?;
        let mut indexed = 0;
        for file in files.iter().filter(|f| f.is_markdown()) {
            if self.load(&file.path).await {
                indexed += 1;
            }
        }
        debug!(subsystem = "index", count = indexed, "Vault indexed");
        let _ = self.events.send(MetadataEvent::Resolved);
        Ok(indexed)
    }

    /// Re-read one file and announce the change.
    pub async fn refresh(&self, path: &str) {
        if !is_markdown_path(path) {
            return;
        }
        if self.load(path).await {
            let _ = self.events.send(MetadataEvent::Changed {
                path: path.to_string(),
            });
        }
    }

    pub fn remove(&self, path: &str) {
        self.entries
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .remove(path);
    }

    /// Returns whether an entry was stored.
    async fn load(&self, path: &str) -> bool {
        let text = match self.vault.read_text(path).await {
            Ok(text) => text,
            Err(e) => {
                debug!(subsystem = "index", path, error = %e, "Unreadable file");
                self.remove(path);
                return false;
            }
        };
        match parse_metadata(&text) {
            Some(metadata) => {
                self.entries
                    .write()
                    .unwrap_or_else(PoisonError::into_inner)
                    .insert(path.to_string(), metadata);
                true
            }
            None => {
                warn!(subsystem = "index", path, "Frontmatter could not be parsed");
                self.remove(path);
                false
            }
        }
    }
}

impl MetadataIndex for FrontmatterIndex {
    fn get_file_cache(&self, path: &str) -> Option<CachedMetadata> {
        self.entries
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(path)
            .cloned()
    }

    fn subscribe_metadata_events(&self) -> broadcast::Receiver<MetadataEvent> {
        self.events.subscribe()
    }
}
