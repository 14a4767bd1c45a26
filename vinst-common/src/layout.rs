// vinst-common/src/layout.rs
//! Naming rules and read-only scanning of an install root.
//!
//! ```text
//! installRoot/
//!   {app}-{version}/                               installed version
//!   {app}-current -> {app}-{version}               active version (relative symlink)
//!   archives/{app}-{version}-{stamp}[-failed-{ts}] retired versions
//!   .vinst.lock                                    advisory lock
//! ```
use std::fs;
use std::path::{Path, PathBuf};
use std::time::SystemTime;

use chrono::Local;
use regex::Regex;
use tracing::{debug, warn};

use super::error::{Result, VinstError};

pub const ARCHIVES_DIR_NAME: &str = "archives";
pub const LOCK_FILE_NAME: &str = ".vinst.lock";
pub const CURRENT_SUFFIX: &str = "current";
pub const FAILED_MARKER: &str = "-failed-";
pub const TIMESTAMP_FORMAT: &str = "%Y%m%d%H%M%S";

pub fn version_dir_name(app: &str, version: &str) -> String {
    format!("{app}-{version}")
}

pub fn current_pointer_name(app: &str) -> String {
    format!("{app}-{CURRENT_SUFFIX}")
}

/// Local-time archival timestamp, second resolution.
pub fn timestamp_now() -> String {
    Local::now().format(TIMESTAMP_FORMAT).to_string()
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum EntryKind {
    Installed,
    Archived {
        /// Archival timestamp, possibly with a `.N` collision suffix.
        stamp: String,
        failed_at: Option<String>,
    },
}

impl EntryKind {
    pub fn label(&self) -> &'static str {
        match self {
            EntryKind::Installed => "installed",
            EntryKind::Archived { failed_at: None, .. } => "archived",
            EntryKind::Archived { .. } => "failed",
        }
    }
}

/// One version directory of an app, installed or archived.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StoreEntry {
    pub name: String,
    pub version: String,
    pub path: PathBuf,
    pub kind: EntryKind,
    pub modified: SystemTime,
}

impl StoreEntry {
    pub fn is_failed(&self) -> bool {
        matches!(
            self.kind,
            EntryKind::Archived {
                failed_at: Some(_),
                ..
            }
        )
    }

    /// Name without any `-failed-<ts>` marker, e.g. `app-1.0-20240101120000`.
    pub fn archive_base_name(&self) -> &str {
        match &self.kind {
            EntryKind::Archived {
                failed_at: Some(ts),
                ..
            } => self
                .name
                .strip_suffix(ts.as_str())
                .and_then(|rest| rest.strip_suffix(FAILED_MARKER))
                .unwrap_or(&self.name),
            _ => &self.name,
        }
    }
}

/// Parses entry names belonging to one app.
#[derive(Debug, Clone)]
pub struct EntryNameParser {
    app: String,
    archived: Regex,
}

impl EntryNameParser {
    pub fn new(app: &str) -> Result<Self> {
        let pattern = format!(
            r"^{}-(?P<version>.+?)-(?P<stamp>\d{{14}}(?:\.\d+)?)(?:-failed-(?P<failed>\d{{14}}(?:\.\d+)?))?$",
            regex::escape(app)
        );
        let archived = Regex::new(&pattern)
            .map_err(|e| VinstError::Generic(format!("Failed to build entry pattern: {e}")))?;
        Ok(Self {
            app: app.to_string(),
            archived,
        })
    }

    /// Version of an installed directory name (`{app}-{version}`), excluding the pointer.
    pub fn parse_installed(&self, name: &str) -> Option<String> {
        let version = name.strip_prefix(&self.app)?.strip_prefix('-')?;
        if version.is_empty() || version == CURRENT_SUFFIX || name.starts_with('.') {
            return None;
        }
        Some(version.to_string())
    }

    pub fn parse_archived(&self, name: &str) -> Option<(String, String, Option<String>)> {
        let caps = self.archived.captures(name)?;
        Some((
            caps["version"].to_string(),
            caps["stamp"].to_string(),
            caps.name("failed").map(|m| m.as_str().to_string()),
        ))
    }
}

/// Installed (non-archived) version directories of `app` directly under `root`.
///
/// Directories of a sibling app whose name extends `app` (`zyng-cli` next to
/// `zyng`) are skipped once that app has a `current` pointer in the root.
pub fn scan_installed(root: &Path, app: &str) -> Result<Vec<StoreEntry>> {
    let parser = EntryNameParser::new(app)?;
    let siblings = sibling_apps(root, app)?;
    let mut entries = Vec::new();
    for (name, path) in list_dirs(root)? {
        if owned_by_sibling(&name, &siblings) {
            continue;
        }
        if let Some(version) = parser.parse_installed(&name) {
            entries.push(StoreEntry {
                modified: modified_time(&path),
                name,
                version,
                path,
                kind: EntryKind::Installed,
            });
        }
    }
    sort_newest_first(&mut entries);
    debug!(
        "[LAYOUT:{}] Found {} installed version(s) in {}",
        app,
        entries.len(),
        root.display()
    );
    Ok(entries)
}

/// Archived version directories of `app` under `archives_dir`, newest first.
pub fn scan_archived(archives_dir: &Path, app: &str) -> Result<Vec<StoreEntry>> {
    let parser = EntryNameParser::new(app)?;
    let siblings = match archives_dir.parent() {
        Some(root) => sibling_apps(root, app)?,
        None => Vec::new(),
    };
    let mut entries = Vec::new();
    for (name, path) in list_dirs(archives_dir)? {
        if owned_by_sibling(&name, &siblings) {
            continue;
        }
        match parser.parse_archived(&name) {
            Some((version, stamp, failed_at)) => entries.push(StoreEntry {
                modified: modified_time(&path),
                name,
                version,
                path,
                kind: EntryKind::Archived { stamp, failed_at },
            }),
            None => debug!(
                "[LAYOUT:{}] Ignoring archive entry '{}' (not an archive of this app)",
                app, name
            ),
        }
    }
    sort_newest_first(&mut entries);
    Ok(entries)
}

/// Sorts by modification time descending, ties broken by name descending.
pub fn sort_newest_first(entries: &mut [StoreEntry]) {
    entries.sort_by(|a, b| b.modified.cmp(&a.modified).then_with(|| b.name.cmp(&a.name)));
}

/// Apps sharing `root` whose names start with `{app}-`, found through their
/// `{other}-current` pointers.
fn sibling_apps(root: &Path, app: &str) -> Result<Vec<String>> {
    let mut siblings = Vec::new();
    let read_dir = match fs::read_dir(root) {
        Ok(rd) => rd,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(siblings),
        Err(e) => return Err(e.into()),
    };
    let own_prefix = format!("{app}-");
    let pointer_suffix = format!("-{CURRENT_SUFFIX}");
    for entry in read_dir.flatten() {
        let is_link = entry.file_type().map(|ft| ft.is_symlink()).unwrap_or(false);
        if !is_link {
            continue;
        }
        let name = entry.file_name().to_string_lossy().to_string();
        if let Some(other) = name.strip_suffix(&pointer_suffix) {
            if other.starts_with(&own_prefix) {
                debug!("[LAYOUT:{}] Sharing root with '{}'", app, other);
                siblings.push(other.to_string());
            }
        }
    }
    Ok(siblings)
}

fn owned_by_sibling(name: &str, siblings: &[String]) -> bool {
    siblings
        .iter()
        .any(|other| name.strip_prefix(other.as_str()).is_some_and(|rest| rest.starts_with('-')))
}

fn list_dirs(dir: &Path) -> Result<Vec<(String, PathBuf)>> {
    let mut dirs = Vec::new();
    if !dir.is_dir() {
        return Ok(dirs);
    }
    for entry_res in fs::read_dir(dir)? {
        let entry = match entry_res {
            Ok(entry) => entry,
            Err(e) => {
                warn!("Error reading entry in {}: {}. Skipping.", dir.display(), e);
                continue;
            }
        };
        let name = entry.file_name().to_string_lossy().to_string();
        if name.starts_with('.') {
            continue;
        }
        // Pointers are symlinks; only real directories are versions.
        match entry.file_type() {
            Ok(ft) if ft.is_dir() => dirs.push((name, entry.path())),
            Ok(_) => {}
            Err(e) => warn!(
                "Failed to get file type for {}: {}",
                entry.path().display(),
                e
            ),
        }
    }
    Ok(dirs)
}

fn modified_time(path: &Path) -> SystemTime {
    fs::symlink_metadata(path)
        .and_then(|m| m.modified())
        .unwrap_or(SystemTime::UNIX_EPOCH)
}
