//! Markdown pipeline: preview text, word count, task counts, and properties.

use async_trait::async_trait;
use once_cell::sync::Lazy;
use regex::Regex;
use tracing::debug;

use notecache_core::{
    defaults, CacheSettings, CachedMetadata, ContentProviderType, ContentUpdate, PreviewContent,
    PropertyMap, Result, VaultFile,
};

use crate::provider::{ContentGenerator, ProviderContext};

static EMBED: Lazy<Regex> = Lazy::new(|| Regex::new(r"!\[\[[^\]]*\]\]|!\[[^\]]*\]\([^)]*\)").unwrap());
static WIKI_ALIAS: Lazy<Regex> = Lazy::new(|| Regex::new(r"\[\[[^\]|]*\|([^\]]*)\]\]").unwrap());
static WIKI_LINK: Lazy<Regex> = Lazy::new(|| Regex::new(r"\[\[([^\]]*)\]\]").unwrap());
static MD_LINK: Lazy<Regex> = Lazy::new(|| Regex::new(r"\[([^\]]*)\]\([^)]*\)").unwrap());
static FOOTNOTE: Lazy<Regex> = Lazy::new(|| Regex::new(r"\[\^[^\]]*\]").unwrap());
static COMMENT: Lazy<Regex> = Lazy::new(|| Regex::new(r"(?s)%%.*?%%|<!--.*?-->").unwrap());
static HTML_TAG: Lazy<Regex> = Lazy::new(|| Regex::new(r"</?[A-Za-z][^>]*>").unwrap());
static INLINE_CODE: Lazy<Regex> = Lazy::new(|| Regex::new(r"`([^`]*)`").unwrap());
static EMPHASIS: Lazy<Regex> = Lazy::new(|| Regex::new(r"\*\*|__|~~|==|\*|\b_|_\b").unwrap());
static HEADING: Lazy<Regex> = Lazy::new(|| Regex::new(r"^#{1,6}\s+").unwrap());
static LIST_MARKER: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^(?:[-*+]|\d+[.)])\s+(?:\[.\]\s+)?").unwrap());
static TASK: Lazy<Regex> = Lazy::new(|| Regex::new(r"^\s*(?:[-*+]|\d+[.)])\s+\[(.)\]").unwrap());
static RULE: Lazy<Regex> = Lazy::new(|| Regex::new(r"^(?:-{3,}|\*{3,}|_{3,})$").unwrap());

/// Split a leading `---` frontmatter block from the body.
pub fn strip_frontmatter(text: &str) -> &str {
    let Some(rest) = text
        .strip_prefix("---\n")
        .or_else(|| text.strip_prefix("---\r\n"))
    else {
        return text;
    };
    let mut offset = 0;
    for line in rest.split_inclusive('\n') {
        offset += line.len();
        if line.trim_end() == "---" {
            return &rest[offset..];
        }
    }
    text
}

fn is_fence(line: &str) -> bool {
    let trimmed = line.trim_start();
    trimmed.starts_with("```") || trimmed.starts_with("~~~")
}

fn strip_inline(line: &str) -> String {
    let line = EMBED.replace_all(line, "");
    let line = WIKI_ALIAS.replace_all(&line, "$1");
    let line = WIKI_LINK.replace_all(&line, "$1");
    let line = MD_LINK.replace_all(&line, "$1");
    let line = FOOTNOTE.replace_all(&line, "");
    let line = HTML_TAG.replace_all(&line, "");
    let line = INLINE_CODE.replace_all(&line, "$1");
    EMPHASIS.replace_all(&line, "").into_owned()
}

/// Plain text of a markdown body with markup removed and whitespace
/// collapsed to single spaces.
pub fn plain_text(body: &str, skip_headings: bool, skip_code_blocks: bool) -> String {
    let body = COMMENT.replace_all(body, "");
    let mut out: Vec<String> = Vec::new();
    let mut in_code = false;

    for raw in body.lines() {
        if is_fence(raw) {
            in_code = !in_code;
            continue;
        }
        if in_code {
            if !skip_code_blocks {
                out.push(raw.trim().to_string());
            }
            continue;
        }

        let mut line = raw.trim();
        while let Some(rest) = line.strip_prefix('>') {
            line = rest.trim_start();
        }
        if line.is_empty() || RULE.is_match(line) || line.starts_with('|') {
            continue;
        }
        if HEADING.is_match(line) {
            if skip_headings {
                continue;
            }
            line = &line[HEADING.find(line).map_or(0, |m| m.end())..];
        }
        if let Some(m) = LIST_MARKER.find(line) {
            line = &line[m.end()..];
        }
        let stripped = strip_inline(line);
        if !stripped.trim().is_empty() {
            out.push(stripped);
        }
    }

    out.join(" ").split_whitespace().collect::<Vec<_>>().join(" ")
}

/// First `length` characters of `text`.
pub fn truncate_chars(text: &str, length: usize) -> String {
    match text.char_indices().nth(length) {
        Some((idx, _)) => text[..idx].trim_end().to_string(),
        None => text.to_string(),
    }
}

pub fn count_words(body: &str) -> i64 {
    plain_text(body, false, true)
        .split_whitespace()
        .filter(|word| word.chars().any(char::is_alphanumeric))
        .count() as i64
}

/// `(total, unfinished)` checkbox tasks outside code blocks.
pub fn count_tasks(body: &str) -> (i64, i64) {
    let mut in_code = false;
    let mut total = 0;
    let mut unfinished = 0;
    for line in body.lines() {
        if is_fence(line) {
            in_code = !in_code;
            continue;
        }
        if in_code {
            continue;
        }
        if let Some(caps) = TASK.captures(line) {
            total += 1;
            if caps.get(1).map(|m| m.as_str()) == Some(" ") {
                unfinished += 1;
            }
        }
    }
    (total, unfinished)
}

fn preview_override(metadata: Option<&CachedMetadata>, settings: &CacheSettings) -> Option<String> {
    let metadata = metadata?;
    settings.preview_properties.iter().find_map(|key| {
        let values = metadata.frontmatter_strings(key);
        let joined = values.join(" ");
        let text = plain_text(&joined, false, false);
        (!text.is_empty()).then_some(text)
    })
}

fn extract_properties(metadata: Option<&CachedMetadata>, settings: &CacheSettings) -> PropertyMap {
    let mut properties = PropertyMap::new();
    let Some(metadata) = metadata else {
        return properties;
    };
    for field in &settings.property_fields {
        let values = metadata.frontmatter_strings(field);
        if !values.is_empty() {
            properties.insert(field.clone(), values);
        }
    }
    properties
}

/// Build the markdown update for `text` with the given index entry.
pub fn build_update(
    text: &str,
    metadata: Option<&CachedMetadata>,
    settings: &CacheSettings,
) -> ContentUpdate {
    let body = strip_frontmatter(text);
    let preview_text = preview_override(metadata, settings).unwrap_or_else(|| {
        plain_text(
            body,
            settings.skip_headings_in_preview,
            settings.skip_code_blocks_in_preview,
        )
    });
    let preview = truncate_chars(&preview_text, settings.preview_length);
    let (task_total, task_unfinished) = count_tasks(body);

    ContentUpdate::Markdown {
        preview: PreviewContent::from_text(preview),
        word_count: count_words(body),
        task_total,
        task_unfinished,
        properties: extract_properties(metadata, settings),
    }
}

#[derive(Debug, Default)]
pub struct MarkdownGenerator;

#[async_trait]
impl ContentGenerator for MarkdownGenerator {
    fn provider_type(&self) -> ContentProviderType {
        ContentProviderType::Markdown
    }

    fn accepts(&self, file: &VaultFile) -> bool {
        file.is_markdown()
    }

    fn should_regenerate(&self, old: &CacheSettings, new: &CacheSettings) -> bool {
        old.markdown_output_changed(new)
    }

    async fn generate(
        &self,
        ctx: &ProviderContext,
        file: &VaultFile,
        settings: &CacheSettings,
    ) -> Result<Option<ContentUpdate>> {
        if file.size as usize > defaults::MARKDOWN_MAX_BYTES {
            debug!(path = %file.path, size = file.size, "Markdown file too large, storing empty content");
            return Ok(Some(ContentUpdate::Markdown {
                preview: PreviewContent::empty(),
                word_count: 0,
                task_total: 0,
                task_unfinished: 0,
                properties: PropertyMap::new(),
            }));
        }
        let text = ctx.vault.read_text(&file.path).await?;
        ctx.session.ensure_running()?;
        let metadata = ctx.index.get_file_cache(&file.path);
        Ok(Some(build_update(&text, metadata.as_ref(), settings)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use notecache_core::ContentStatus;
    use serde_json::json;

    fn metadata(frontmatter: serde_json::Value) -> CachedMetadata {
        CachedMetadata {
            frontmatter: frontmatter.as_object().cloned(),
            ..Default::default()
        }
    }

    #[test]
    fn test_strip_frontmatter() {
        assert_eq!(strip_frontmatter("---\ntitle: x\n---\nbody"), "body");
        assert_eq!(strip_frontmatter("no frontmatter"), "no frontmatter");
        assert_eq!(strip_frontmatter("---\nunclosed"), "---\nunclosed");
    }

    #[test]
    fn test_plain_text_strips_markup() {
        let body = "# Title\n\nSome **bold** and [[Note|alias]] with [link](http://x).\n\n![[img.png]]\n- item one\n> quoted `code`";
        assert_eq!(
            plain_text(body, false, false),
            "Title Some bold and alias with link. item one quoted code"
        );
        assert_eq!(
            plain_text(body, true, false),
            "Some bold and alias with link. item one quoted code"
        );
    }

    #[test]
    fn test_plain_text_code_blocks() {
        let body = "before\n```rust\nlet x = 1;\n```\nafter";
        assert_eq!(plain_text(body, false, true), "before after");
        assert_eq!(plain_text(body, false, false), "before let x = 1; after");
    }

    #[test]
    fn test_truncate_is_char_aware() {
        assert_eq!(truncate_chars("héllo wörld", 5), "héllo");
        assert_eq!(truncate_chars("short", 10), "short");
    }

    #[test]
    fn test_count_tasks() {
        let body = "- [ ] open\n- [x] done\n* [/] partial\n1. [ ] numbered\n```\n- [ ] in code\n```\n- plain";
        assert_eq!(count_tasks(body), (4, 2));
    }

    #[test]
    fn test_count_words_excludes_frontmatter_and_markup() {
        let text = "---\ntags: [a, b]\n---\n# Heading\nOne two **three** - 4";
        assert_eq!(count_words(strip_frontmatter(text)), 5);
    }

    #[test]
    fn test_build_update_uses_preview_property_and_properties() {
        let settings = CacheSettings {
            property_fields: vec!["status".into()],
            ..Default::default()
        };
        let meta = metadata(json!({"summary": "From **frontmatter**", "status": ["draft", "wip"]}));
        let update = build_update("---\nsummary: x\n---\nBody text", Some(&meta), &settings);
        match update {
            ContentUpdate::Markdown {
                preview,
                word_count,
                properties,
                ..
            } => {
                assert_eq!(preview.text.as_deref(), Some("From frontmatter"));
                assert_eq!(preview.status, ContentStatus::Has);
                assert_eq!(word_count, 2);
                assert_eq!(properties.get("status").unwrap(), &vec!["draft".to_string(), "wip".to_string()]);
            }
            other => panic!("unexpected update {other:?}"),
        }
    }

    #[test]
    fn test_empty_body_gives_empty_preview() {
        let update = build_update("---\na: b\n---\n", None, &CacheSettings::default());
        match update {
            ContentUpdate::Markdown { preview, .. } => {
                assert_eq!(preview.status, ContentStatus::None);
                assert!(preview.text.is_none());
            }
            other => panic!("unexpected update {other:?}"),
        }
    }

    #[test]
    fn test_preview_respects_length() {
        let settings = CacheSettings {
            preview_length: 9,
            ..Default::default()
        };
        let update = build_update("alpha beta gamma", None, &settings);
        match update {
            ContentUpdate::Markdown { preview, .. } => {
                assert_eq!(preview.text.as_deref(), Some("alpha bet"));
            }
            other => panic!("unexpected update {other:?}"),
        }
    }
}
