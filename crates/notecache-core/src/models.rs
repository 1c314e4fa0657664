//! Data models for the derived-content cache.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::content::{ContentKind, ContentProviderType};

// =============================================================================
// PATH HELPERS
// =============================================================================

/// Lowercased extension of a vault path, without the dot.
pub fn extension_of(path: &str) -> Option<String> {
    let name = basename(path);
    let (stem, ext) = name.rsplit_once('.')?;
    if stem.is_empty() || ext.is_empty() {
        return None;
    }
    Some(ext.to_ascii_lowercase())
}

/// Final path segment.
pub fn basename(path: &str) -> &str {
    path.rsplit('/').next().unwrap_or(path)
}

/// File name without its extension.
pub fn stem_of(path: &str) -> &str {
    let name = basename(path);
    match name.rsplit_once('.') {
        Some((stem, _)) if !stem.is_empty() => stem,
        _ => name,
    }
}

pub fn is_markdown_path(path: &str) -> bool {
    extension_of(path).as_deref() == Some("md")
}

pub fn is_pdf_path(path: &str) -> bool {
    extension_of(path).as_deref() == Some("pdf")
}

/// Whether any derived content applies to files at `path`.
pub fn is_indexable_path(path: &str) -> bool {
    is_markdown_path(path) || is_pdf_path(path)
}

// =============================================================================
// VAULT FILES
// =============================================================================

/// A file as listed by the host vault.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct VaultFile {
    /// Vault-relative path using `/` separators.
    pub path: String,
    /// Modification time in milliseconds since the epoch.
    pub mtime: i64,
    /// Size in bytes.
    pub size: u64,
}

impl VaultFile {
    pub fn new(path: impl Into<String>, mtime: i64, size: u64) -> Self {
        Self {
            path: path.into(),
            mtime,
            size,
        }
    }

    pub fn extension(&self) -> Option<String> {
        extension_of(&self.path)
    }

    pub fn is_markdown(&self) -> bool {
        is_markdown_path(&self.path)
    }

    pub fn is_pdf(&self) -> bool {
        is_pdf_path(&self.path)
    }

    pub fn basename(&self) -> &str {
        basename(&self.path)
    }
}

// =============================================================================
// FILE RECORDS
// =============================================================================

/// Processing state of a derived field that can legitimately be empty.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ContentStatus {
    /// Not produced yet.
    #[default]
    Unprocessed,
    /// Produced and non-empty.
    Has,
    /// Produced and empty, or not applicable to the file type.
    None,
}

impl ContentStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            ContentStatus::Unprocessed => "unprocessed",
            ContentStatus::Has => "has",
            ContentStatus::None => "none",
        }
    }

    pub fn parse(value: &str) -> Self {
        match value {
            "has" => ContentStatus::Has,
            "none" => ContentStatus::None,
            _ => ContentStatus::Unprocessed,
        }
    }
}

/// A frontmatter date value. Values that fail to parse are kept as
/// `Invalid` so the failure is cached rather than retried.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum FrontmatterDate {
    /// Milliseconds since the epoch.
    Parsed(i64),
    Invalid,
}

/// Display metadata read from frontmatter.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct FileMetadata {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub created: Option<FrontmatterDate>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub modified: Option<FrontmatterDate>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub icon: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub color: Option<String>,
}

impl FileMetadata {
    pub fn is_empty(&self) -> bool {
        self.name.is_none()
            && self.created.is_none()
            && self.modified.is_none()
            && self.icon.is_none()
            && self.color.is_none()
    }
}

/// Frontmatter property values keyed by property name.
pub type PropertyMap = BTreeMap<String, Vec<String>>;

/// One cached file and its derived content.
///
/// Derived fields are trusted only while the owning provider's watermark is
/// at least the record's `mtime`. Preview text and feature image bytes live
/// in side stores keyed by the same path.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FileRecord {
    pub path: String,
    pub mtime: i64,
    pub markdown_pipeline_mtime: i64,
    pub tags_mtime: i64,
    pub metadata_mtime: i64,
    pub feature_image_mtime: i64,
    pub preview_status: ContentStatus,
    pub feature_image_status: ContentStatus,
    pub feature_image_key: Option<String>,
    pub tags: Option<Vec<String>>,
    pub metadata: Option<FileMetadata>,
    pub word_count: Option<i64>,
    pub task_total: Option<i64>,
    pub task_unfinished: Option<i64>,
    pub properties: Option<PropertyMap>,
}

/// What a rename invalidated on a migrated record.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct RenameOutcome {
    /// The rename crossed the markdown/non-markdown boundary.
    pub markdown_changed: bool,
    /// Feature image content was reset and its blob must not be moved.
    pub feature_image_reset: bool,
}

impl FileRecord {
    /// Fresh record for a newly discovered file.
    ///
    /// Kinds that never apply to the file type start out as `None` so they
    /// are not reported as pending.
    pub fn new(path: impl Into<String>, mtime: i64) -> Self {
        let path = path.into();
        let preview_status = if is_markdown_path(&path) {
            ContentStatus::Unprocessed
        } else {
            ContentStatus::None
        };
        let feature_image_status = if ContentKind::FeatureImage.applies_to(&path) {
            ContentStatus::Unprocessed
        } else {
            ContentStatus::None
        };
        Self {
            path,
            mtime,
            markdown_pipeline_mtime: 0,
            tags_mtime: 0,
            metadata_mtime: 0,
            feature_image_mtime: 0,
            preview_status,
            feature_image_status,
            feature_image_key: None,
            tags: None,
            metadata: None,
            word_count: None,
            task_total: None,
            task_unfinished: None,
            properties: None,
        }
    }

    pub fn watermark(&self, provider: ContentProviderType) -> i64 {
        match provider {
            ContentProviderType::Markdown => self.markdown_pipeline_mtime,
            ContentProviderType::Tags => self.tags_mtime,
            ContentProviderType::Metadata => self.metadata_mtime,
            ContentProviderType::FeatureImage => self.feature_image_mtime,
        }
    }

    pub fn set_watermark(&mut self, provider: ContentProviderType, value: i64) {
        match provider {
            ContentProviderType::Markdown => self.markdown_pipeline_mtime = value,
            ContentProviderType::Tags => self.tags_mtime = value,
            ContentProviderType::Metadata => self.metadata_mtime = value,
            ContentProviderType::FeatureImage => self.feature_image_mtime = value,
        }
    }

    /// Whether the provider's output reflects the current `mtime`.
    ///
    /// A zero watermark always means "never produced" so that a file with a
    /// zero mtime is not mistaken for processed.
    pub fn is_fresh(&self, provider: ContentProviderType) -> bool {
        let watermark = self.watermark(provider);
        watermark > 0 && watermark >= self.mtime
    }

    /// Whether a trusted value is present for `kind`.
    pub fn has_content(&self, kind: ContentKind) -> bool {
        if !self.is_fresh(kind.provider()) {
            return false;
        }
        match kind {
            ContentKind::Preview => self.preview_status != ContentStatus::Unprocessed,
            ContentKind::WordCount => self.word_count.is_some(),
            ContentKind::Tasks => self.task_total.is_some() && self.task_unfinished.is_some(),
            ContentKind::Properties => self.properties.is_some(),
            ContentKind::Tags => self.tags.is_some(),
            ContentKind::Metadata => self.metadata.is_some(),
            ContentKind::FeatureImage => self.feature_image_status != ContentStatus::Unprocessed,
        }
    }

    /// Whether `kind` applies to this file and has no trusted value.
    pub fn needs_content(&self, kind: ContentKind) -> bool {
        kind.applies_to(&self.path) && !self.has_content(kind)
    }

    /// Whether any of `kinds` is missing.
    pub fn needs_any_content(&self, kinds: &[ContentKind]) -> bool {
        kinds.iter().any(|kind| self.needs_content(*kind))
    }

    /// Whether any kind owned by `provider` is missing.
    pub fn needs_provider(&self, provider: ContentProviderType, kinds: &[ContentKind]) -> bool {
        kinds
            .iter()
            .filter(|kind| kind.provider() == provider)
            .any(|kind| self.needs_content(*kind))
    }

    /// Drop every field owned by `provider` and reset its watermark.
    pub fn clear_provider(&mut self, provider: ContentProviderType) {
        self.set_watermark(provider, 0);
        match provider {
            ContentProviderType::Markdown => {
                self.preview_status = if is_markdown_path(&self.path) {
                    ContentStatus::Unprocessed
                } else {
                    ContentStatus::None
                };
                self.word_count = None;
                self.task_total = None;
                self.task_unfinished = None;
                self.properties = None;
            }
            ContentProviderType::Tags => self.tags = None,
            ContentProviderType::Metadata => self.metadata = None,
            ContentProviderType::FeatureImage => {
                self.feature_image_status = if ContentKind::FeatureImage.applies_to(&self.path) {
                    ContentStatus::Unprocessed
                } else {
                    ContentStatus::None
                };
                self.feature_image_key = None;
            }
        }
    }

    /// Migrate this record to `new_path`, keeping derived content that is
    /// still valid for the new file type.
    pub fn apply_rename(&mut self, new_path: &str) -> RenameOutcome {
        let was_markdown = is_markdown_path(&self.path);
        let had_image = ContentKind::FeatureImage.applies_to(&self.path);
        self.path = new_path.to_string();

        let is_markdown = is_markdown_path(new_path);
        let has_image = ContentKind::FeatureImage.applies_to(new_path);
        let mut outcome = RenameOutcome::default();

        if was_markdown != is_markdown {
            outcome.markdown_changed = true;
            self.clear_provider(ContentProviderType::Markdown);
            self.clear_provider(ContentProviderType::Tags);
            self.clear_provider(ContentProviderType::Metadata);
        }
        if outcome.markdown_changed || had_image != has_image {
            outcome.feature_image_reset = true;
            self.clear_provider(ContentProviderType::FeatureImage);
        }
        outcome
    }
}

// =============================================================================
// CONTENT UPDATES
// =============================================================================

/// Preview text produced by the markdown pipeline.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PreviewContent {
    pub status: ContentStatus,
    pub text: Option<String>,
}

impl PreviewContent {
    pub fn from_text(text: String) -> Self {
        if text.trim().is_empty() {
            Self::empty()
        } else {
            Self {
                status: ContentStatus::Has,
                text: Some(text),
            }
        }
    }

    pub fn empty() -> Self {
        Self {
            status: ContentStatus::None,
            text: None,
        }
    }
}

/// Fields written by a single provider. Each variant only touches the
/// fields its provider owns.
#[derive(Debug, Clone, PartialEq)]
pub enum ContentUpdate {
    Markdown {
        preview: PreviewContent,
        word_count: i64,
        task_total: i64,
        task_unfinished: i64,
        properties: PropertyMap,
    },
    Tags(Vec<String>),
    Metadata(FileMetadata),
    FeatureImage {
        status: ContentStatus,
        key: Option<String>,
        bytes: Option<Vec<u8>>,
    },
}

impl ContentUpdate {
    pub fn provider(&self) -> ContentProviderType {
        match self {
            ContentUpdate::Markdown { .. } => ContentProviderType::Markdown,
            ContentUpdate::Tags(_) => ContentProviderType::Tags,
            ContentUpdate::Metadata(_) => ContentProviderType::Metadata,
            ContentUpdate::FeatureImage { .. } => ContentProviderType::FeatureImage,
        }
    }
}

/// A provider result together with the mtime it was generated against.
#[derive(Debug, Clone, PartialEq)]
pub struct ContentPatch {
    pub watermark: i64,
    pub update: ContentUpdate,
}

impl ContentPatch {
    /// Patch stamped with `mtime`. Stamps are at least 1 so a produced
    /// value is never confused with an unset watermark.
    pub fn new(mtime: i64, update: ContentUpdate) -> Self {
        Self {
            watermark: mtime.max(1),
            update,
        }
    }

    pub fn provider(&self) -> ContentProviderType {
        self.update.provider()
    }

    /// Apply the patch to `record`. Side-store payloads (preview text,
    /// image bytes) are left for the caller.
    pub fn apply_to(&self, record: &mut FileRecord) {
        record.set_watermark(self.provider(), self.watermark);
        match &self.update {
            ContentUpdate::Markdown {
                preview,
                word_count,
                task_total,
                task_unfinished,
                properties,
            } => {
                record.preview_status = preview.status;
                record.word_count = Some(*word_count);
                record.task_total = Some(*task_total);
                record.task_unfinished = Some(*task_unfinished);
                record.properties = Some(properties.clone());
            }
            ContentUpdate::Tags(tags) => record.tags = Some(tags.clone()),
            ContentUpdate::Metadata(metadata) => record.metadata = Some(metadata.clone()),
            ContentUpdate::FeatureImage { status, key, .. } => {
                record.feature_image_status = *status;
                record.feature_image_key = key.clone();
            }
        }
    }
}

// =============================================================================
// DIFF AND REBUILD STATE
// =============================================================================

/// Result of comparing the live listing against the stored records.
#[derive(Debug, Clone, Default)]
pub struct DiffResult {
    pub to_add: Vec<VaultFile>,
    pub to_update: Vec<VaultFile>,
    pub to_remove: Vec<String>,
    /// Snapshot of stored records at diff time, keyed by path.
    pub cached_files: std::collections::HashMap<String, FileRecord>,
}

impl DiffResult {
    pub fn is_empty(&self) -> bool {
        self.to_add.is_empty() && self.to_update.is_empty() && self.to_remove.is_empty()
    }

    /// Added and updated files.
    pub fn changed(&self) -> impl Iterator<Item = &VaultFile> {
        self.to_add.iter().chain(self.to_update.iter())
    }
}

/// Persisted marker for an in-progress rebuild so the progress notice can
/// be restored after a restart.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CacheRebuildNoticeState {
    pub total: u64,
    pub source: String,
    pub types: Vec<ContentKind>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_extension_helpers() {
        assert_eq!(extension_of("a/b/Note.MD").as_deref(), Some("md"));
        assert_eq!(extension_of("a/.hidden"), None);
        assert_eq!(extension_of("a/noext"), None);
        assert_eq!(basename("a/b/c.md"), "c.md");
        assert_eq!(stem_of("a/b/c.tar.gz"), "c.tar");
        assert!(is_pdf_path("docs/x.pdf"));
        assert!(!is_indexable_path("img/x.png"));
    }

    #[test]
    fn test_new_record_statuses_by_type() {
        let md = FileRecord::new("a.md", 10);
        assert_eq!(md.preview_status, ContentStatus::Unprocessed);
        assert_eq!(md.feature_image_status, ContentStatus::Unprocessed);

        let pdf = FileRecord::new("a.pdf", 10);
        assert_eq!(pdf.preview_status, ContentStatus::None);
        assert_eq!(pdf.feature_image_status, ContentStatus::Unprocessed);

        let png = FileRecord::new("a.png", 10);
        assert_eq!(png.feature_image_status, ContentStatus::None);
        assert!(!png.needs_any_content(&ContentKind::ALL));
    }

    #[test]
    fn test_stale_watermark_hides_content() {
        let mut record = FileRecord::new("a.md", 100);
        record.tags = Some(vec!["x".into()]);
        record.tags_mtime = 100;
        assert!(record.has_content(ContentKind::Tags));

        record.mtime = 200;
        assert!(!record.has_content(ContentKind::Tags));
        assert!(record.needs_content(ContentKind::Tags));
    }

    #[test]
    fn test_zero_mtime_still_needs_processing() {
        let mut record = FileRecord::new("a.md", 0);
        record.word_count = Some(3);
        assert!(!record.has_content(ContentKind::WordCount));

        let patch = ContentPatch::new(
            0,
            ContentUpdate::Markdown {
                preview: PreviewContent::empty(),
                word_count: 3,
                task_total: 0,
                task_unfinished: 0,
                properties: PropertyMap::new(),
            },
        );
        patch.apply_to(&mut record);
        assert_eq!(record.markdown_pipeline_mtime, 1);
        assert!(record.has_content(ContentKind::WordCount));
        assert!(record.has_content(ContentKind::Preview));
    }

    #[test]
    fn test_patch_touches_only_owned_fields() {
        let mut record = FileRecord::new("a.md", 5);
        ContentPatch::new(5, ContentUpdate::Tags(vec!["t".into()])).apply_to(&mut record);
        ContentPatch::new(5, ContentUpdate::Metadata(FileMetadata::default()))
            .apply_to(&mut record);

        assert_eq!(record.tags.as_deref(), Some(&["t".to_string()][..]));
        assert!(record.metadata.is_some());
        assert_eq!(record.preview_status, ContentStatus::Unprocessed);
        assert!(record.word_count.is_none());
        assert_eq!(record.markdown_pipeline_mtime, 0);
    }

    #[test]
    fn test_markdown_to_markdown_rename_keeps_content() {
        let mut record = FileRecord::new("a.md", 5);
        record.preview_status = ContentStatus::Has;
        record.markdown_pipeline_mtime = 5;
        record.word_count = Some(10);

        let outcome = record.apply_rename("folder/b.md");
        assert_eq!(outcome, RenameOutcome::default());
        assert_eq!(record.path, "folder/b.md");
        assert_eq!(record.preview_status, ContentStatus::Has);
        assert_eq!(record.markdown_pipeline_mtime, 5);
    }

    #[test]
    fn test_cross_type_rename_invalidates() {
        let mut record = FileRecord::new("a.md", 5);
        record.preview_status = ContentStatus::Has;
        record.markdown_pipeline_mtime = 5;
        record.tags_mtime = 5;
        record.metadata_mtime = 5;
        record.tags = Some(vec!["x".into()]);

        let outcome = record.apply_rename("a.txt");
        assert!(outcome.markdown_changed);
        assert!(outcome.feature_image_reset);
        assert_eq!(record.preview_status, ContentStatus::None);
        assert_eq!(record.markdown_pipeline_mtime, 0);
        assert_eq!(record.tags_mtime, 0);
        assert_eq!(record.metadata_mtime, 0);
        assert!(record.tags.is_none());
        assert_eq!(record.feature_image_status, ContentStatus::None);
    }

    #[test]
    fn test_rename_into_markdown_marks_unprocessed() {
        let mut record = FileRecord::new("a.txt", 5);
        let outcome = record.apply_rename("a.md");
        assert!(outcome.markdown_changed);
        assert_eq!(record.preview_status, ContentStatus::Unprocessed);
        assert!(record.needs_content(ContentKind::Preview));
    }

    #[test]
    fn test_pdf_rename_keeps_feature_image() {
        let mut record = FileRecord::new("a.pdf", 5);
        record.feature_image_status = ContentStatus::Has;
        record.feature_image_key = Some("blake3:abc".into());
        record.feature_image_mtime = 5;

        let outcome = record.apply_rename("docs/a.pdf");
        assert!(!outcome.feature_image_reset);
        assert!(record.has_content(ContentKind::FeatureImage));
    }

    #[test]
    fn test_content_status_round_trip_names() {
        for status in [ContentStatus::Unprocessed, ContentStatus::Has, ContentStatus::None] {
            assert_eq!(ContentStatus::parse(status.as_str()), status);
        }
    }

    #[test]
    fn test_preview_from_blank_text_is_empty() {
        assert_eq!(PreviewContent::from_text("  \n".into()).status, ContentStatus::None);
        assert_eq!(PreviewContent::from_text("hi".into()).status, ContentStatus::Has);
    }
}
