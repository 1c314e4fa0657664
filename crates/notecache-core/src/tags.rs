//! Hierarchical tag and property read models.
//!
//! Both trees are rebuilt from the record store after content writes and
//! published to observers. Tags nest on `/` and group case-insensitively
//! while keeping the first-seen display casing.
//!
//! ```
//! use notecache_core::tags::{normalize_tag, TagTree};
//!
//! let mut tree = TagTree::default();
//! tree.add_file("a.md", &["Project/Alpha".to_string()]);
//! tree.add_file("b.md", &["project".to_string()]);
//!
//! let project = tree.find("PROJECT").unwrap();
//! assert_eq!(project.name, "Project");
//! assert_eq!(project.total_count(), 2);
//! assert_eq!(normalize_tag("#todo/"), Some("todo".to_string()));
//! ```

use std::collections::{BTreeMap, BTreeSet};

use serde::Serialize;

use crate::models::PropertyMap;

/// Maximum nesting depth kept for a tag path.
pub const MAX_TAG_PATH_DEPTH: usize = 10;

/// Strip a leading `#`, surrounding slashes, and whitespace from a tag.
///
/// Returns `None` for tags that are empty after cleanup.
pub fn normalize_tag(raw: &str) -> Option<String> {
    let trimmed = raw.trim().trim_start_matches('#');
    let components: Vec<&str> = trimmed
        .split('/')
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .take(MAX_TAG_PATH_DEPTH)
        .collect();
    if components.is_empty() {
        None
    } else {
        Some(components.join("/"))
    }
}

/// Normalize and deduplicate tags case-insensitively, keeping first-seen
/// casing and order.
pub fn dedupe_tags<I, S>(tags: I) -> Vec<String>
where
    I: IntoIterator<Item = S>,
    S: AsRef<str>,
{
    let mut seen = BTreeSet::new();
    let mut result = Vec::new();
    for tag in tags {
        if let Some(normalized) = normalize_tag(tag.as_ref()) {
            if seen.insert(normalized.to_lowercase()) {
                result.push(normalized);
            }
        }
    }
    result
}

/// One node of the tag tree.
#[derive(Debug, Clone, Default, Serialize)]
pub struct TagNode {
    /// Display name of this path segment.
    pub name: String,
    /// Full display path from the root.
    pub path: String,
    /// Files tagged with exactly this path.
    pub files: BTreeSet<String>,
    /// Children keyed by lowercased segment.
    pub children: BTreeMap<String, TagNode>,
}

impl TagNode {
    fn new(name: &str, path: String) -> Self {
        Self {
            name: name.to_string(),
            path,
            ..Default::default()
        }
    }

    /// Distinct files tagged with this path or any descendant.
    pub fn total_count(&self) -> usize {
        self.all_files().len()
    }

    pub fn all_files(&self) -> BTreeSet<String> {
        let mut files = self.files.clone();
        for child in self.children.values() {
            files.extend(child.all_files());
        }
        files
    }
}

/// Hierarchical tag index over every cached markdown file.
#[derive(Debug, Clone, Default, Serialize)]
pub struct TagTree {
    pub roots: BTreeMap<String, TagNode>,
    /// Markdown files with a tag result and no tags.
    pub untagged: usize,
}

impl TagTree {
    /// Record `path`'s tags. An empty slice counts the file as untagged.
    pub fn add_file(&mut self, path: &str, tags: &[String]) {
        let mut added = false;
        for tag in tags {
            let Some(normalized) = normalize_tag(tag) else {
                continue;
            };
            let mut segments = normalized.split('/');
            let Some(first) = segments.next() else {
                continue;
            };
            let mut node = self
                .roots
                .entry(first.to_lowercase())
                .or_insert_with(|| TagNode::new(first, first.to_string()));
            for segment in segments {
                let child_path = format!("{}/{}", node.path, segment);
                node = node
                    .children
                    .entry(segment.to_lowercase())
                    .or_insert_with(|| TagNode::new(segment, child_path));
            }
            node.files.insert(path.to_string());
            added = true;
        }
        if !added {
            self.untagged += 1;
        }
    }

    /// Case-insensitive lookup by full path.
    pub fn find(&self, tag: &str) -> Option<&TagNode> {
        let normalized = normalize_tag(tag)?.to_lowercase();
        let mut segments = normalized.split('/');
        let mut node = self.roots.get(segments.next()?)?;
        for segment in segments {
            node = node.children.get(segment)?;
        }
        Some(node)
    }

    /// Every display path in depth-first order.
    pub fn all_tag_paths(&self) -> Vec<String> {
        fn walk(node: &TagNode, out: &mut Vec<String>) {
            out.push(node.path.clone());
            for child in node.children.values() {
                walk(child, out);
            }
        }
        let mut out = Vec::new();
        for root in self.roots.values() {
            walk(root, &mut out);
        }
        out
    }

    pub fn is_empty(&self) -> bool {
        self.roots.is_empty() && self.untagged == 0
    }
}

/// Property index: key, then value, then files carrying it.
#[derive(Debug, Clone, Default, Serialize)]
pub struct PropertyTree {
    pub keys: BTreeMap<String, BTreeMap<String, BTreeSet<String>>>,
}

impl PropertyTree {
    pub fn add_file(&mut self, path: &str, properties: &PropertyMap) {
        for (key, values) in properties {
            let by_value = self.keys.entry(key.clone()).or_default();
            for value in values {
                by_value
                    .entry(value.clone())
                    .or_default()
                    .insert(path.to_string());
            }
        }
    }

    pub fn files_with(&self, key: &str, value: &str) -> Option<&BTreeSet<String>> {
        self.keys.get(key)?.get(value)
    }

    /// Distinct files carrying any value for `key`.
    pub fn key_count(&self, key: &str) -> usize {
        self.keys
            .get(key)
            .map(|values| values.values().flatten().collect::<BTreeSet<_>>().len())
            .unwrap_or(0)
    }

    pub fn is_empty(&self) -> bool {
        self.keys.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_normalize_tag() {
        assert_eq!(normalize_tag("#work"), Some("work".into()));
        assert_eq!(normalize_tag(" a / b /"), Some("a/b".into()));
        assert_eq!(normalize_tag("#"), None);
        assert_eq!(normalize_tag("   "), None);
    }

    #[test]
    fn test_dedupe_keeps_first_casing() {
        let tags = dedupe_tags(["#Work", "work", "WORK/sub", "home"]);
        assert_eq!(tags, vec!["Work", "WORK/sub", "home"]);
    }

    #[test]
    fn test_tree_nesting_and_counts() {
        let mut tree = TagTree::default();
        tree.add_file("a.md", &["project/alpha".into(), "todo".into()]);
        tree.add_file("b.md", &["Project/Beta".into()]);
        tree.add_file("c.md", &[]);

        let project = tree.find("project").unwrap();
        assert_eq!(project.name, "project");
        assert_eq!(project.children.len(), 2);
        assert_eq!(project.total_count(), 2);
        assert!(project.files.is_empty());

        let beta = tree.find("PROJECT/beta").unwrap();
        assert_eq!(beta.path, "project/Beta");
        assert_eq!(tree.untagged, 1);
        assert_eq!(
            tree.all_tag_paths(),
            vec!["project", "project/alpha", "project/Beta", "todo"]
        );
    }

    #[test]
    fn test_find_missing() {
        let tree = TagTree::default();
        assert!(tree.find("x").is_none());
        assert!(tree.is_empty());
    }

    #[test]
    fn test_property_tree() {
        let mut tree = PropertyTree::default();
        let mut props = PropertyMap::new();
        props.insert("status".into(), vec!["draft".into(), "review".into()]);
        tree.add_file("a.md", &props);
        props.insert("status".into(), vec!["draft".into()]);
        tree.add_file("b.md", &props);

        assert_eq!(tree.files_with("status", "draft").unwrap().len(), 2);
        assert_eq!(tree.files_with("status", "review").unwrap().len(), 1);
        assert_eq!(tree.key_count("status"), 2);
        assert_eq!(tree.key_count("missing"), 0);
    }
}
