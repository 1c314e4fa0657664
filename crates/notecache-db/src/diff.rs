//! Diff between the live vault listing and the stored records.

use std::collections::{HashMap, HashSet};

use notecache_core::{DiffResult, FileRecord, VaultFile};

/// Compare `files` against `cached` by path and mtime.
///
/// A file is added when no record exists and updated when the stored mtime
/// differs in either direction. Stored paths missing from the listing are
/// removed. Output lists follow listing order; removals are sorted.
pub fn calculate_diff(files: &[VaultFile], cached: HashMap<String, FileRecord>) -> DiffResult {
    let mut result = DiffResult::default();
    let mut seen = HashSet::with_capacity(files.len());

    for file in files {
        if !seen.insert(file.path.as_str()) {
            continue;
        }
        match cached.get(&file.path) {
            None => result.to_add.push(file.clone()),
            Some(record) if record.mtime != file.mtime => result.to_update.push(file.clone()),
            Some(_) => {}
        }
    }

    let mut removed: Vec<String> = cached
        .keys()
        .filter(|path| !seen.contains(path.as_str()))
        .cloned()
        .collect();
    removed.sort();
    result.to_remove = removed;
    result.cached_files = cached;
    result
}
