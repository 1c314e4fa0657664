//! Display metadata from configured frontmatter fields.

use async_trait::async_trait;
use chrono::{DateTime, NaiveDate, NaiveDateTime, TimeZone, Utc};
use serde_json::Value as JsonValue;

use notecache_core::{
    CacheSettings, CachedMetadata, ContentProviderType, ContentUpdate, FileMetadata,
    FrontmatterDate, Result, VaultFile,
};

use crate::provider::{ContentGenerator, ProviderContext};

const DATETIME_FORMATS: [&str; 4] = [
    "%Y-%m-%d %H:%M:%S",
    "%Y-%m-%dT%H:%M:%S",
    "%Y-%m-%d %H:%M",
    "%Y-%m-%dT%H:%M",
];

/// Parse a frontmatter timestamp into epoch milliseconds.
///
/// Accepts RFC 3339, common local date-time layouts (read as UTC), plain
/// dates, and integer epoch milliseconds.
pub fn parse_timestamp(value: &JsonValue) -> Option<i64> {
    match value {
        JsonValue::Number(n) => n.as_i64(),
        JsonValue::String(s) => parse_timestamp_str(s.trim()),
        _ => None,
    }
}

fn parse_timestamp_str(s: &str) -> Option<i64> {
    if s.is_empty() {
        return None;
    }
    if let Ok(dt) = DateTime::parse_from_rfc3339(s) {
        return Some(dt.timestamp_millis());
    }
    for format in DATETIME_FORMATS {
        if let Ok(naive) = NaiveDateTime::parse_from_str(s, format) {
            return Some(Utc.from_utc_datetime(&naive).timestamp_millis());
        }
    }
    if let Ok(date) = NaiveDate::parse_from_str(s, "%Y-%m-%d") {
        let naive = date.and_hms_opt(0, 0, 0)?;
        return Some(Utc.from_utc_datetime(&naive).timestamp_millis());
    }
    s.parse::<i64>().ok()
}

fn date_field(metadata: &CachedMetadata, field: &str) -> Option<FrontmatterDate> {
    let value = metadata.frontmatter_value(field)?;
    if value.is_null() {
        return None;
    }
    Some(match parse_timestamp(value) {
        Some(ms) => FrontmatterDate::Parsed(ms),
        None => FrontmatterDate::Invalid,
    })
}

fn string_field(metadata: &CachedMetadata, field: &str) -> Option<String> {
    metadata
        .frontmatter_strings(field)
        .into_iter()
        .next()
        .map(|s| s.trim().to_string())
        .filter(|s| !s.is_empty())
}

pub fn extract_metadata(metadata: &CachedMetadata, settings: &CacheSettings) -> FileMetadata {
    FileMetadata {
        name: string_field(metadata, &settings.name_field),
        created: date_field(metadata, &settings.created_field),
        modified: date_field(metadata, &settings.modified_field),
        icon: string_field(metadata, &settings.icon_field),
        color: string_field(metadata, &settings.color_field),
    }
}

#[derive(Debug, Default)]
pub struct MetadataGenerator;

#[async_trait]
impl ContentGenerator for MetadataGenerator {
    fn provider_type(&self) -> ContentProviderType {
        ContentProviderType::Metadata
    }

    fn accepts(&self, file: &VaultFile) -> bool {
        file.is_markdown()
    }

    fn should_regenerate(&self, old: &CacheSettings, new: &CacheSettings) -> bool {
        old.metadata_fields_changed(new)
    }

    async fn generate(
        &self,
        ctx: &ProviderContext,
        file: &VaultFile,
        settings: &CacheSettings,
    ) -> Result<Option<ContentUpdate>> {
        let Some(metadata) = ctx.index.get_file_cache(&file.path) else {
            return Ok(None);
        };
        Ok(Some(ContentUpdate::Metadata(extract_metadata(&metadata, settings))))
    }
}
