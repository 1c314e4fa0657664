//! User-facing cache settings.
//!
//! Settings decide which content kinds are produced. The registry compares
//! old and new settings to decide which providers must clear and regenerate.

use serde::{Deserialize, Serialize};

use crate::content::{ContentKind, ContentProviderType};
use crate::defaults;

/// Settings consumed by the cache and its content providers.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct CacheSettings {
    pub show_tags: bool,
    pub show_file_preview: bool,
    pub show_feature_image: bool,
    pub show_word_count: bool,
    pub show_tasks: bool,
    pub show_properties: bool,
    /// Frontmatter keys collected into the properties field.
    pub property_fields: Vec<String>,
    /// Frontmatter keys that override the generated preview text.
    pub preview_properties: Vec<String>,
    pub preview_length: usize,
    pub skip_headings_in_preview: bool,
    pub skip_code_blocks_in_preview: bool,
    pub show_metadata: bool,
    pub name_field: String,
    pub created_field: String,
    pub modified_field: String,
    pub icon_field: String,
    pub color_field: String,
    /// Frontmatter keys checked in order for a feature image link.
    pub feature_image_properties: Vec<String>,
    /// Fall back to the first embedded image when no property is set.
    pub use_embeds_for_feature_image: bool,
}

impl Default for CacheSettings {
    fn default() -> Self {
        Self {
            show_tags: true,
            show_file_preview: true,
            show_feature_image: true,
            show_word_count: true,
            show_tasks: true,
            show_properties: true,
            property_fields: Vec::new(),
            preview_properties: vec!["summary".to_string()],
            preview_length: defaults::PREVIEW_LENGTH,
            skip_headings_in_preview: true,
            skip_code_blocks_in_preview: true,
            show_metadata: true,
            name_field: String::new(),
            created_field: "created".to_string(),
            modified_field: "modified".to_string(),
            icon_field: "icon".to_string(),
            color_field: "color".to_string(),
            feature_image_properties: vec!["feature".to_string(), "thumbnail".to_string()],
            use_embeds_for_feature_image: true,
        }
    }
}

impl CacheSettings {
    /// Whether the markdown pipeline has any enabled output.
    pub fn markdown_enabled(&self) -> bool {
        self.show_file_preview || self.show_word_count || self.show_tasks || self.show_properties
    }

    pub fn provider_enabled(&self, provider: ContentProviderType) -> bool {
        match provider {
            ContentProviderType::Markdown => self.markdown_enabled(),
            ContentProviderType::Tags => self.show_tags,
            ContentProviderType::Metadata => self.show_metadata && self.has_metadata_fields(),
            ContentProviderType::FeatureImage => self.show_feature_image,
        }
    }

    pub fn has_metadata_fields(&self) -> bool {
        [
            &self.name_field,
            &self.created_field,
            &self.modified_field,
            &self.icon_field,
            &self.color_field,
        ]
        .iter()
        .any(|field| !field.trim().is_empty())
    }

    /// Provider types with at least one enabled output, in dispatch order.
    pub fn enabled_provider_types(&self) -> Vec<ContentProviderType> {
        ContentProviderType::ALL
            .into_iter()
            .filter(|provider| self.provider_enabled(*provider))
            .collect()
    }

    pub fn kind_enabled(&self, kind: ContentKind) -> bool {
        match kind {
            ContentKind::Preview => self.show_file_preview,
            ContentKind::WordCount => self.show_word_count,
            ContentKind::Tasks => self.show_tasks,
            ContentKind::Properties => self.show_properties && !self.property_fields.is_empty(),
            ContentKind::Tags => self.show_tags,
            ContentKind::Metadata => self.provider_enabled(ContentProviderType::Metadata),
            ContentKind::FeatureImage => self.show_feature_image,
        }
    }

    /// Content kinds tracked for progress and pending-content scans.
    pub fn enabled_content_kinds(&self) -> Vec<ContentKind> {
        ContentKind::ALL
            .into_iter()
            .filter(|kind| self.kind_enabled(*kind))
            .collect()
    }

    /// Whether settings that shape markdown output differ.
    pub fn markdown_output_changed(&self, other: &CacheSettings) -> bool {
        self.preview_length != other.preview_length
            || self.skip_headings_in_preview != other.skip_headings_in_preview
            || self.skip_code_blocks_in_preview != other.skip_code_blocks_in_preview
            || self.preview_properties != other.preview_properties
            || self.property_fields != other.property_fields
    }

    /// Whether settings that shape metadata output differ.
    pub fn metadata_fields_changed(&self, other: &CacheSettings) -> bool {
        self.name_field != other.name_field
            || self.created_field != other.created_field
            || self.modified_field != other.modified_field
            || self.icon_field != other.icon_field
            || self.color_field != other.color_field
    }

    /// Whether settings that choose the feature image differ.
    pub fn feature_image_source_changed(&self, other: &CacheSettings) -> bool {
        self.feature_image_properties != other.feature_image_properties
            || self.use_embeds_for_feature_image != other.use_embeds_for_feature_image
    }
}
