//! Versioned local key-value namespace.
//!
//! Holds small UI-side state next to the content database: recent notes per
//! profile, recent icons per icon provider, UI preferences, and the rebuild
//! notice marker. The whole namespace is one JSON file written atomically.
//! A version mismatch or unreadable file starts from an empty namespace.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::sync::{Mutex, PoisonError};

use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use notecache_core::{defaults, CacheRebuildNoticeState, Result};

/// UI scale and layout preferences.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct UiPreferences {
    pub scale: f64,
    pub navigation_pane_width: u32,
    pub dual_pane: bool,
    pub show_calendar: bool,
}

impl Default for UiPreferences {
    fn default() -> Self {
        Self {
            scale: 1.0,
            navigation_pane_width: 300,
            dual_pane: true,
            show_calendar: false,
        }
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
struct Namespace {
    version: u32,
    recent_notes: BTreeMap<String, Vec<String>>,
    recent_icons: BTreeMap<String, Vec<String>>,
    ui: UiPreferences,
    rebuild_notice: Option<CacheRebuildNoticeState>,
}

impl Namespace {
    fn empty() -> Self {
        Self {
            version: defaults::LOCAL_STORAGE_VERSION,
            ..Default::default()
        }
    }
}

fn renamed_path(path: &str, old_path: &str, new_path: &str) -> Option<String> {
    if path == old_path {
        return Some(new_path.to_string());
    }
    path.strip_prefix(old_path)
        .filter(|rest| rest.starts_with('/'))
        .map(|rest| format!("{new_path}{rest}"))
}

fn push_front_capped(list: &mut Vec<String>, value: &str, cap: usize) {
    list.retain(|existing| existing != value);
    list.insert(0, value.to_string());
    list.truncate(cap);
}

pub struct LocalStorage {
    path: Option<PathBuf>,
    state: Mutex<Namespace>,
}

impl LocalStorage {
    /// Load the namespace from `path`, starting empty if it is missing,
    /// unreadable, or from another version.
    pub fn open(path: impl Into<PathBuf>) -> Self {
        let path = path.into();
        let state = Self::load(&path);
        Self {
            path: Some(path),
            state: Mutex::new(state),
        }
    }

    /// Namespace that is never written to disk.
    pub fn in_memory() -> Self {
        Self {
            path: None,
            state: Mutex::new(Namespace::empty()),
        }
    }

    fn load(path: &Path) -> Namespace {
        if !path.exists() {
            return Namespace::empty();
        }
        let content = match std::fs::read_to_string(path) {
            Ok(s) => s,
            Err(e) => {
                warn!(path = %path.display(), error = %e, "Could not read local storage, starting empty");
                return Namespace::empty();
            }
        };
        match serde_json::from_str::<Namespace>(&content) {
            Ok(ns) if ns.version == defaults::LOCAL_STORAGE_VERSION => ns,
            Ok(ns) => {
                debug!(
                    stored = ns.version,
                    expected = defaults::LOCAL_STORAGE_VERSION,
                    "Local storage version changed, starting empty"
                );
                Namespace::empty()
            }
            Err(e) => {
                warn!(path = %path.display(), error = %e, "Corrupt local storage, starting empty");
                Namespace::empty()
            }
        }
    }

    fn save(&self, state: &Namespace) -> Result<()> {
        let Some(target) = &self.path else {
            return Ok(());
        };
        if let Some(dir) = target.parent() {
            if !dir.as_os_str().is_empty() {
                std::fs::create_dir_all(dir)?;
            }
        }
        let json = serde_json::to_string_pretty(state)?;
        let temp = target.with_extension(format!("tmp.{}", std::process::id()));
        std::fs::write(&temp, json)?;
        if let Err(e) = std::fs::rename(&temp, target) {
            let _ = std::fs::remove_file(&temp);
            return Err(e.into());
        }
        Ok(())
    }

    /// Apply `change` and persist when it reports a modification.
    fn update<F>(&self, change: F) -> Result<bool>
    where
        F: FnOnce(&mut Namespace) -> bool,
    {
        let mut state = self.state.lock().unwrap_or_else(PoisonError::into_inner);
        if !change(&mut state) {
            return Ok(false);
        }
        self.save(&state)?;
        Ok(true)
    }

    fn read<T>(&self, f: impl FnOnce(&Namespace) -> T) -> T {
        f(&self.state.lock().unwrap_or_else(PoisonError::into_inner))
    }

    // =========================================================================
    // RECENT NOTES
    // =========================================================================

    pub fn recent_notes(&self, profile: &str) -> Vec<String> {
        self.read(|ns| ns.recent_notes.get(profile).cloned().unwrap_or_default())
    }

    pub fn add_recent_note(&self, profile: &str, path: &str) -> Result<()> {
        self.update(|ns| {
            let list = ns.recent_notes.entry(profile.to_string()).or_default();
            push_front_capped(list, path, defaults::RECENT_NOTES_LIMIT);
            true
        })?;
        Ok(())
    }

    /// Rewrite entries for a renamed file or folder in every profile.
    pub fn rename_recent_note(&self, old_path: &str, new_path: &str) -> Result<bool> {
        self.update(|ns| {
            let mut changed = false;
            for list in ns.recent_notes.values_mut() {
                for entry in list.iter_mut() {
                    if let Some(renamed) = renamed_path(entry, old_path, new_path) {
                        *entry = renamed;
                        changed = true;
                    }
                }
                let mut seen = std::collections::HashSet::new();
                list.retain(|entry| seen.insert(entry.clone()));
            }
            changed
        })
    }

    /// Drop entries for deleted files or folders in every profile.
    pub fn remove_recent_notes(&self, paths: &[String]) -> Result<bool> {
        self.update(|ns| {
            let mut changed = false;
            for list in ns.recent_notes.values_mut() {
                let before = list.len();
                list.retain(|entry| {
                    !paths
                        .iter()
                        .any(|removed| renamed_path(entry, removed, "").is_some())
                });
                changed |= list.len() != before;
            }
            changed
        })
    }

    // =========================================================================
    // RECENT ICONS
    // =========================================================================

    pub fn recent_icons(&self, provider: &str) -> Vec<String> {
        self.read(|ns| ns.recent_icons.get(provider).cloned().unwrap_or_default())
    }

    /// Record an icon as most recent for `provider`, keeping at most
    /// [`defaults::RECENT_ICONS_PER_PROVIDER`] entries.
    pub fn add_recent_icon(&self, provider: &str, icon: &str) -> Result<()> {
        self.update(|ns| {
            let list = ns.recent_icons.entry(provider.to_string()).or_default();
            push_front_capped(list, icon, defaults::RECENT_ICONS_PER_PROVIDER);
            true
        })?;
        Ok(())
    }

    // =========================================================================
    // UI PREFERENCES
    // =========================================================================

    pub fn ui_preferences(&self) -> UiPreferences {
        self.read(|ns| ns.ui.clone())
    }

    pub fn set_ui_preferences(&self, prefs: UiPreferences) -> Result<()> {
        self.update(|ns| {
            ns.ui = prefs;
            true
        })?;
        Ok(())
    }

    // =========================================================================
    // REBUILD NOTICE
    // =========================================================================

    pub fn rebuild_notice_state(&self) -> Option<CacheRebuildNoticeState> {
        self.read(|ns| ns.rebuild_notice.clone())
    }

    pub fn set_rebuild_notice_state(&self, state: Option<CacheRebuildNoticeState>) -> Result<()> {
        self.update(|ns| {
            if ns.rebuild_notice == state {
                return false;
            }
            ns.rebuild_notice = state;
            true
        })?;
        Ok(())
    }
}
