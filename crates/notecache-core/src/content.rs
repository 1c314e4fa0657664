//! Content provider types, tracked content kinds, and metadata wait masks.

use std::fmt;
use std::ops::{BitAnd, BitOr, BitOrAssign};

use serde::{Deserialize, Serialize};

use crate::models::{is_markdown_path, is_pdf_path};

/// A derived-content producer registered with the provider registry.
///
/// Each provider owns a disjoint set of [`FileRecord`](crate::FileRecord)
/// fields and one pipeline watermark.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum ContentProviderType {
    /// Preview text, word count, task counts, and frontmatter properties.
    Markdown,
    /// Tags from the host metadata index.
    Tags,
    /// Frontmatter metadata (display name, dates, icon, color).
    Metadata,
    /// Feature image pointer and blob.
    FeatureImage,
}

impl ContentProviderType {
    /// Every provider type in dispatch order.
    pub const ALL: [ContentProviderType; 4] = [
        ContentProviderType::Markdown,
        ContentProviderType::Tags,
        ContentProviderType::Metadata,
        ContentProviderType::FeatureImage,
    ];

    /// Stable name used in logs and persisted notice state.
    pub fn as_str(&self) -> &'static str {
        match self {
            ContentProviderType::Markdown => "markdown",
            ContentProviderType::Tags => "tags",
            ContentProviderType::Metadata => "metadata",
            ContentProviderType::FeatureImage => "featureImage",
        }
    }

    fn bit(self) -> u8 {
        match self {
            ContentProviderType::Markdown => 1 << 0,
            ContentProviderType::Tags => 1 << 1,
            ContentProviderType::Metadata => 1 << 2,
            ContentProviderType::FeatureImage => 1 << 3,
        }
    }

    /// Content kinds produced by this provider.
    pub fn content_kinds(&self) -> Vec<ContentKind> {
        ContentKind::ALL
            .iter()
            .copied()
            .filter(|kind| kind.provider() == *self)
            .collect()
    }
}

impl fmt::Display for ContentProviderType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A single tracked derived-content field.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum ContentKind {
    Preview,
    WordCount,
    Tasks,
    Properties,
    Tags,
    Metadata,
    FeatureImage,
}

impl ContentKind {
    pub const ALL: [ContentKind; 7] = [
        ContentKind::Preview,
        ContentKind::WordCount,
        ContentKind::Tasks,
        ContentKind::Properties,
        ContentKind::Tags,
        ContentKind::Metadata,
        ContentKind::FeatureImage,
    ];

    /// The provider that owns this kind.
    pub fn provider(&self) -> ContentProviderType {
        match self {
            ContentKind::Preview
            | ContentKind::WordCount
            | ContentKind::Tasks
            | ContentKind::Properties => ContentProviderType::Markdown,
            ContentKind::Tags => ContentProviderType::Tags,
            ContentKind::Metadata => ContentProviderType::Metadata,
            ContentKind::FeatureImage => ContentProviderType::FeatureImage,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            ContentKind::Preview => "preview",
            ContentKind::WordCount => "wordCount",
            ContentKind::Tasks => "tasks",
            ContentKind::Properties => "properties",
            ContentKind::Tags => "tags",
            ContentKind::Metadata => "metadata",
            ContentKind::FeatureImage => "featureImage",
        }
    }

    /// Whether files at `path` ever carry this kind.
    ///
    /// Markdown files carry every kind, PDFs only a feature image, and
    /// everything else nothing.
    pub fn applies_to(&self, path: &str) -> bool {
        if is_markdown_path(path) {
            return true;
        }
        *self == ContentKind::FeatureImage && is_pdf_path(path)
    }
}

impl fmt::Display for ContentKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Set of provider types a path is waiting on, keyed by
/// [`ContentProviderType`].
///
/// OR adds kinds, AND with the active set prunes them, and an empty mask
/// means the path no longer waits on anything.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash)]
pub struct WaitMask(u8);

impl WaitMask {
    pub const EMPTY: WaitMask = WaitMask(0);

    pub fn of(provider: ContentProviderType) -> Self {
        WaitMask(provider.bit())
    }

    pub fn insert(&mut self, provider: ContentProviderType) {
        self.0 |= provider.bit();
    }

    pub fn remove(&mut self, provider: ContentProviderType) {
        self.0 &= !provider.bit();
    }

    pub fn contains(&self, provider: ContentProviderType) -> bool {
        self.0 & provider.bit() != 0
    }

    pub fn is_empty(&self) -> bool {
        self.0 == 0
    }

    pub fn len(&self) -> usize {
        self.0.count_ones() as usize
    }

    /// Provider types in the mask, in dispatch order.
    pub fn types(&self) -> Vec<ContentProviderType> {
        ContentProviderType::ALL
            .iter()
            .copied()
            .filter(|provider| self.contains(*provider))
            .collect()
    }
}

impl FromIterator<ContentProviderType> for WaitMask {
    fn from_iter<I: IntoIterator<Item = ContentProviderType>>(iter: I) -> Self {
        let mut mask = WaitMask::EMPTY;
        for provider in iter {
            mask.insert(provider);
        }
        mask
    }
}

impl BitOr for WaitMask {
    type Output = WaitMask;

    fn bitor(self, rhs: WaitMask) -> WaitMask {
        WaitMask(self.0 | rhs.0)
    }
}

impl BitOrAssign for WaitMask {
    fn bitor_assign(&mut self, rhs: WaitMask) {
        self.0 |= rhs.0;
    }
}

impl BitAnd for WaitMask {
    type Output = WaitMask;

    fn bitand(self, rhs: WaitMask) -> WaitMask {
        WaitMask(self.0 & rhs.0)
    }
}

impl fmt::Display for WaitMask {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let names: Vec<&str> = self.types().iter().map(|t| t.as_str()).collect();
        write!(f, "[{}]", names.join("|"))
    }
}
