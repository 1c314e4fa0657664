//! Feature images: a frontmatter image field or the first image embed for
//! markdown files, a host-rendered thumbnail for PDFs.

use async_trait::async_trait;
use tracing::debug;

use notecache_core::models::extension_of;
use notecache_core::{
    defaults, CacheSettings, CachedMetadata, ContentKind, ContentProviderType, ContentStatus,
    ContentUpdate, Result, VaultFile,
};
use notecache_db::compute_content_hash;

use crate::provider::{ContentGenerator, ProviderContext};

const IMAGE_EXTENSIONS: [&str; 9] = [
    "png", "jpg", "jpeg", "gif", "webp", "svg", "bmp", "avif", "tiff",
];

pub fn is_image_path(path: &str) -> bool {
    extension_of(path).is_some_and(|ext| IMAGE_EXTENSIONS.contains(&ext.as_str()))
}

fn is_external(link: &str) -> bool {
    link.starts_with("http://") || link.starts_with("https://")
}

/// Strip `[[...]]`, `![[...]]`, and `![](...)` wrappers from a frontmatter value.
pub fn clean_link(value: &str) -> String {
    let value = value.trim();
    let inner = value
        .strip_prefix("![[")
        .or_else(|| value.strip_prefix("[["))
        .and_then(|v| v.strip_suffix("]]"))
        .or_else(|| {
            value
                .strip_prefix("![")
                .and_then(|v| v.split_once("]("))
                .and_then(|(_, rest)| rest.strip_suffix(')'))
        })
        .unwrap_or(value);
    inner.split('|').next().unwrap_or(inner).trim().to_string()
}

/// Candidate image links in priority order: frontmatter fields, then embeds.
pub fn candidate_links(metadata: &CachedMetadata, settings: &CacheSettings) -> Vec<String> {
    let mut links: Vec<String> = settings
        .feature_image_properties
        .iter()
        .flat_map(|field| metadata.frontmatter_strings(field))
        .map(|value| clean_link(&value))
        .filter(|link| !link.is_empty())
        .collect();
    if settings.use_embeds_for_feature_image {
        links.extend(
            metadata
                .embeds
                .iter()
                .filter(|embed| is_external(embed) || is_image_path(embed))
                .cloned(),
        );
    }
    links
}

fn no_image() -> ContentUpdate {
    ContentUpdate::FeatureImage {
        status: ContentStatus::None,
        key: None,
        bytes: None,
    }
}

fn image_from_bytes(bytes: Vec<u8>) -> ContentUpdate {
    if bytes.is_empty() || bytes.len() > defaults::FEATURE_IMAGE_MAX_BYTES {
        return no_image();
    }
    ContentUpdate::FeatureImage {
        status: ContentStatus::Has,
        key: Some(compute_content_hash(&bytes)),
        bytes: Some(bytes),
    }
}

#[derive(Debug, Default)]
pub struct FeatureImageGenerator;

impl FeatureImageGenerator {
    async fn markdown_image(
        &self,
        ctx: &ProviderContext,
        file: &VaultFile,
        settings: &CacheSettings,
    ) -> Result<Option<ContentUpdate>> {
        let Some(metadata) = ctx.index.get_file_cache(&file.path) else {
            return Ok(None);
        };

        for link in candidate_links(&metadata, settings) {
            if is_external(&link) {
                return Ok(Some(ContentUpdate::FeatureImage {
                    status: ContentStatus::Has,
                    key: Some(link),
                    bytes: None,
                }));
            }
            let Some(target) = ctx.vault.resolve_link(&link, &file.path).await? else {
                debug!(path = %file.path, link, "Feature image link did not resolve");
                continue;
            };
            ctx.session.ensure_running()?;
            let bytes = ctx.vault.read_binary(&target).await?;
            return Ok(Some(image_from_bytes(bytes)));
        }
        Ok(Some(no_image()))
    }
}

#[async_trait]
impl ContentGenerator for FeatureImageGenerator {
    fn provider_type(&self) -> ContentProviderType {
        ContentProviderType::FeatureImage
    }

    fn accepts(&self, file: &VaultFile) -> bool {
        ContentKind::FeatureImage.applies_to(&file.path)
    }

    fn should_regenerate(&self, old: &CacheSettings, new: &CacheSettings) -> bool {
        old.feature_image_source_changed(new)
    }

    async fn generate(
        &self,
        ctx: &ProviderContext,
        file: &VaultFile,
        settings: &CacheSettings,
    ) -> Result<Option<ContentUpdate>> {
        if file.is_pdf() {
            return Ok(Some(match ctx.vault.render_pdf_thumbnail(&file.path).await? {
                Some(bytes) => image_from_bytes(bytes),
                None => no_image(),
            }));
        }
        self.markdown_image(ctx, file, settings).await
    }
}
