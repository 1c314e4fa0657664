//! Tags read from the host metadata index.

use async_trait::async_trait;

use notecache_core::tags::dedupe_tags;
use notecache_core::{
    CacheSettings, CachedMetadata, ContentProviderType, ContentUpdate, Result, VaultFile,
};

use crate::provider::{ContentGenerator, ProviderContext};

/// Frontmatter keys that carry tags.
const FRONTMATTER_TAG_KEYS: [&str; 2] = ["tags", "tag"];

/// Inline and frontmatter tags, normalized and deduplicated.
pub fn collect_tags(metadata: &CachedMetadata) -> Vec<String> {
    let frontmatter = FRONTMATTER_TAG_KEYS.iter().flat_map(|key| {
        metadata
            .frontmatter_strings(key)
            .into_iter()
            .flat_map(|value| {
                value
                    .split([',', ' '])
                    .map(str::to_string)
                    .collect::<Vec<_>>()
            })
    });
    dedupe_tags(frontmatter.chain(metadata.tags.iter().cloned()))
}

#[derive(Debug, Default)]
pub struct TagGenerator;

#[async_trait]
impl ContentGenerator for TagGenerator {
    fn provider_type(&self) -> ContentProviderType {
        ContentProviderType::Tags
    }

    fn accepts(&self, file: &VaultFile) -> bool {
        file.is_markdown()
    }

    fn should_regenerate(&self, _old: &CacheSettings, _new: &CacheSettings) -> bool {
        false
    }

    async fn generate(
        &self,
        ctx: &ProviderContext,
        file: &VaultFile,
        _settings: &CacheSettings,
    ) -> Result<Option<ContentUpdate>> {
        let Some(metadata) = ctx.index.get_file_cache(&file.path) else {
            return Ok(None);
        };
        Ok(Some(ContentUpdate::Tags(collect_tags(&metadata))))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_collect_tags_merges_sources() {
        let metadata = CachedMetadata {
            tags: vec!["#Project/Alpha".into(), "#todo".into()],
            frontmatter: json!({"tags": ["project/alpha", "reading"], "tag": "misc, Todo"})
                .as_object()
                .cloned(),
            embeds: vec![],
        };
        let tags = collect_tags(&metadata);
        assert_eq!(tags, vec!["project/alpha", "reading", "misc", "Todo"]);
    }

    #[test]
    fn test_collect_tags_empty() {
        assert!(collect_tags(&CachedMetadata::default()).is_empty());
    }
}
