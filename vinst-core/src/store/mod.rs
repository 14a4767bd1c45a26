// vinst-core/src/store/mod.rs
//! The multi-version install root: versioned directories, the `current`
//! pointer and the archive of retired versions.
//!
//! Every mutating operation takes an [`InstallLock`] as proof that the caller
//! holds the root's advisory lock.
pub mod lock;

use std::fs::{self, File};
use std::io;
use std::path::{Path, PathBuf};
use std::time::{Duration, SystemTime};

use tokio_retry::strategy::ExponentialBackoff;
use tracing::{debug, error, info, warn};
use uuid::Uuid;
use vinst_common::error::{Result, VinstError};
use vinst_common::layout::{
    current_pointer_name, scan_archived, scan_installed, sort_newest_first,
    timestamp_now, version_dir_name, StoreEntry, ARCHIVES_DIR_NAME, FAILED_MARKER,
    LOCK_FILE_NAME,
};
use walkdir::WalkDir;

pub use self::lock::InstallLock;

const POINTER_SWAP_ATTEMPTS: usize = 3;
const STAGING_PREFIX: &str = ".incoming-";
const SWAP_MARKER: &str = ".swap-";

/// Which retired version a rollback should activate.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RollbackSelector {
    /// Position in [`VersionStore::rollback_candidates`], newest first.
    Index(usize),
    /// A version identifier or a full entry name.
    Version(String),
}

impl RollbackSelector {
    pub fn parse(raw: &str) -> Self {
        match raw.trim().parse::<usize>() {
            Ok(index) => Self::Index(index),
            Err(_) => Self::Version(raw.trim().to_string()),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeployOutcome {
    pub installed: PathBuf,
    /// Previous contents of the same version slot, moved into `archives/`.
    pub archived_previous: Option<PathBuf>,
    pub pruned: Vec<PathBuf>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RollbackOutcome {
    pub current: PathBuf,
    /// Where the previously active directory was retired to.
    pub retired: Option<PathBuf>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StoreListing {
    pub current: Option<PathBuf>,
    pub installed: Vec<StoreEntry>,
    pub archived: Vec<StoreEntry>,
}

#[derive(Debug, Clone)]
pub struct VersionStore {
    root: PathBuf,
    app: String,
}

impl VersionStore {
    pub fn new(root: impl Into<PathBuf>, app: impl Into<String>) -> Self {
        Self {
            root: root.into(),
            app: app.into(),
        }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn app(&self) -> &str {
        &self.app
    }

    pub fn pointer_path(&self) -> PathBuf {
        self.root.join(current_pointer_name(&self.app))
    }

    pub fn archives_dir(&self) -> PathBuf {
        self.root.join(ARCHIVES_DIR_NAME)
    }

    pub fn version_dir(&self, version: &str) -> PathBuf {
        self.root.join(version_dir_name(&self.app, version))
    }

    /// Absolute target of the `current` pointer, `None` when nothing is active.
    ///
    /// Fails with `InvalidStore` if something other than a symlink occupies
    /// the pointer's name.
    pub fn current_target(&self) -> Result<Option<PathBuf>> {
        let pointer = self.pointer_path();
        match fs::symlink_metadata(&pointer) {
            Ok(meta) if meta.file_type().is_symlink() => {
                let link = fs::read_link(&pointer)?;
                Ok(Some(if link.is_absolute() {
                    link
                } else {
                    self.root.join(link)
                }))
            }
            Ok(_) => {
                error!("{} exists but is not a symlink", pointer.display());
                Err(VinstError::InvalidStore(format!(
                    "{} exists but is not a symbolic link; refusing to modify the install root",
                    pointer.display()
                )))
            }
            Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(e.into()),
        }
    }

    pub fn installed(&self) -> Result<Vec<StoreEntry>> {
        scan_installed(&self.root, &self.app)
    }

    pub fn archived(&self) -> Result<Vec<StoreEntry>> {
        scan_archived(&self.archives_dir(), &self.app)
    }

    pub fn list(&self) -> Result<StoreListing> {
        Ok(StoreListing {
            current: self.current_target()?,
            installed: self.installed()?,
            archived: self.archived()?,
        })
    }

    /// Every entry a rollback may activate: archived versions plus installed
    /// versions that are not current, newest first.
    pub fn rollback_candidates(&self) -> Result<Vec<StoreEntry>> {
        let current = self.current_target()?;
        let mut candidates: Vec<StoreEntry> = self
            .installed()?
            .into_iter()
            .chain(self.archived()?)
            .filter(|entry| current.as_deref() != Some(entry.path.as_path()))
            .collect();
        sort_newest_first(&mut candidates);
        Ok(candidates)
    }

    /// Moves `tree_root` into the `version` slot and points `current` at it.
    /// On failure before the slot is filled, the tree is left at `tree_root`.
    pub fn deploy(&self, _lock: &InstallLock, tree_root: &Path, version: &str) -> Result<DeployOutcome> {
        // PREPARED
        self.current_target()?;
        fs::create_dir_all(&self.root)?;
        self.clean_stale_staging()?;

        let staging = self.root.join(format!(
            "{STAGING_PREFIX}{}-{}",
            version_dir_name(&self.app, version),
            Uuid::new_v4().simple()
        ));
        let staged = stage_tree(tree_root, &staging).inspect_err(|e| {
            error!("Failed to stage {}: {}", tree_root.display(), e);
        })?;
        let target = self.version_dir(version);

        // OLD_ARCHIVED
        let mut archived_previous = None;
        if target.symlink_metadata().is_ok() {
            let base = format!("{}-{}", version_dir_name(&self.app, version), timestamp_now());
            let archive_path = match self.unique_archive_path(&base) {
                Ok(path) => path,
                Err(e) => {
                    unstage(tree_root, &staging, staged);
                    return Err(e);
                }
            };
            if let Err(e) = fs::rename(&target, &archive_path) {
                error!("Failed to archive {}: {}", target.display(), e);
                unstage(tree_root, &staging, staged);
                return Err(e.into());
            }
            touch_dir(&archive_path);
            info!(
                "Archived previous {} to {}",
                target.display(),
                archive_path.display()
            );
            archived_previous = Some(archive_path);
        }

        // INSTALLED
        if let Err(e) = fs::rename(&staging, &target) {
            error!("Failed to move staging into {}: {}", target.display(), e);
            unstage(tree_root, &staging, staged);
            if let Some(archived) = &archived_previous {
                if let Err(undo) = fs::rename(archived, &target) {
                    return Err(VinstError::DeploymentInconsistent(format!(
                        "could not install {} ({e}) nor restore it from {} ({undo})",
                        target.display(),
                        archived.display()
                    )));
                }
            }
            return Err(e.into());
        }
        touch_dir(&target);
        if staged == Staged::Copied {
            remove_path_if_exists(tree_root);
        }

        // POINTED
        self.point_at_installed(&target, archived_previous.as_deref())?;

        Ok(DeployOutcome {
            installed: target,
            archived_previous,
            pruned: Vec::new(),
        })
    }

    /// Removes all but the `keep` most recent archived entries. The current
    /// target is never removed.
    pub fn prune(&self, _lock: &InstallLock, keep: usize) -> Result<Vec<PathBuf>> {
        let current = self.current_target()?;
        let removable: Vec<StoreEntry> = self
            .archived()?
            .into_iter()
            .filter(|entry| current.as_deref() != Some(entry.path.as_path()))
            .collect();
        let mut removed = Vec::new();
        for entry in removable.into_iter().skip(keep) {
            debug!("Pruning archived entry {}", entry.path.display());
            fs::remove_dir_all(&entry.path)?;
            removed.push(entry.path);
        }
        if !removed.is_empty() {
            info!(
                "Pruned {} archived version(s) of {}, kept {}",
                removed.len(),
                self.app,
                keep
            );
        }
        Ok(removed)
    }

    /// Points `current` at the selected candidate, then retires the previous
    /// target into `archives/` with a failed marker. Nothing is deleted. If the
    /// retire step fails the pointer has already moved, which is reported as
    /// `DeploymentInconsistent`.
    pub fn rollback(&self, _lock: &InstallLock, selector: &RollbackSelector) -> Result<RollbackOutcome> {
        let previous = self.current_target()?;
        let candidates = self.rollback_candidates()?;
        if candidates.is_empty() {
            return Err(VinstError::NoSuchVersion(format!(
                "no prior versions of {} available for rollback",
                self.app
            )));
        }
        let chosen = match selector {
            RollbackSelector::Index(index) => candidates.get(*index),
            RollbackSelector::Version(wanted) => candidates
                .iter()
                .find(|entry| &entry.name == wanted || &entry.version == wanted),
        }
        .ok_or_else(|| {
            VinstError::NoSuchVersion(format!(
                "{selector:?} does not match any of {} rollback candidate(s)",
                candidates.len()
            ))
        })?;
        info!("Rolling back {} to {}", self.app, chosen.name);
        self.clean_stale_staging()?;

        self.swap_pointer(&chosen.path)?;

        let mut retired = None;
        if let Some(previous) = previous.filter(|p| p.is_dir()) {
            let path = self.retire_failed(&previous).map_err(|e| {
                error!("Could not retire {}: {}", previous.display(), e);
                VinstError::DeploymentInconsistent(format!(
                    "{} now points at {}, but the previous target {} could not be moved into {} ({e}); it is still in place without a failed marker",
                    self.pointer_path().display(),
                    chosen.path.display(),
                    previous.display(),
                    self.archives_dir().display()
                ))
            })?;
            info!("Retired {} to {}", previous.display(), path.display());
            retired = Some(path);
        }

        Ok(RollbackOutcome {
            current: chosen.path.clone(),
            retired,
        })
    }

    /// Removes one installed version, dropping the pointer first if it
    /// references that version.
    pub fn uninstall(&self, _lock: &InstallLock, version: &str) -> Result<PathBuf> {
        let current = self.current_target()?;
        let target = self.version_dir(version);
        if !target.is_dir() {
            return Err(VinstError::NoSuchVersion(format!(
                "{} is not installed",
                target.display()
            )));
        }
        if current.as_deref() == Some(target.as_path()) {
            debug!("Removing current pointer {}", self.pointer_path().display());
            fs::remove_file(self.pointer_path())?;
        }
        fs::remove_dir_all(&target)?;
        info!("Removed {}", target.display());
        Ok(target)
    }

    /// Removes everything belonging to this app, then the archive directory
    /// and the root if nothing else is left in them.
    pub fn remove_all(&self, _lock: &InstallLock) -> Result<Vec<PathBuf>> {
        let mut removed = Vec::new();
        if self.current_target()?.is_some() {
            fs::remove_file(self.pointer_path())?;
            removed.push(self.pointer_path());
        }
        for entry in self.installed()?.into_iter().chain(self.archived()?) {
            debug!("Removing {}", entry.path.display());
            fs::remove_dir_all(&entry.path)?;
            removed.push(entry.path);
        }
        self.clean_stale_staging()?;

        let archives = self.archives_dir();
        if is_empty_dir(&archives, &[])? {
            fs::remove_dir(&archives)?;
        }
        if is_empty_dir(&self.root, &[LOCK_FILE_NAME])? {
            remove_path_if_exists(&self.root.join(LOCK_FILE_NAME));
            if let Err(e) = fs::remove_dir(&self.root) {
                warn!("Could not remove empty install root {}: {}", self.root.display(), e);
            } else {
                info!("Removed empty install root {}", self.root.display());
            }
        }
        Ok(removed)
    }

    /// Removes staging and pointer-swap leftovers of crashed runs.
    fn clean_stale_staging(&self) -> Result<()> {
        let read_dir = match fs::read_dir(&self.root) {
            Ok(rd) => rd,
            Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(()),
            Err(e) => return Err(e.into()),
        };
        let staging_prefix = format!("{STAGING_PREFIX}{}-", self.app);
        let swap_prefix = format!(".{}{SWAP_MARKER}", current_pointer_name(&self.app));
        for entry in read_dir.flatten() {
            let name = entry.file_name().to_string_lossy().to_string();
            if name.starts_with(&staging_prefix) || name.starts_with(&swap_prefix) {
                warn!("Removing stale staging entry {}", entry.path().display());
                remove_path_if_exists(&entry.path());
            }
        }
        Ok(())
    }

    /// Final deploy step: repoints `current` at a freshly installed version.
    fn point_at_installed(&self, target: &Path, archived_previous: Option<&Path>) -> Result<()> {
        self.swap_pointer(target).map_err(|e| {
            VinstError::DeploymentInconsistent(format!(
                "installed {} but could not repoint {}: {}{}",
                target.display(),
                self.pointer_path().display(),
                e,
                archived_previous
                    .map(|a| format!("; previous copy kept at {}", a.display()))
                    .unwrap_or_default()
            ))
        })
    }

    /// Atomically replaces the pointer with a relative link to `target`,
    /// retrying with exponential backoff. Sleeps between attempts, so async
    /// callers run it on a blocking thread.
    fn swap_pointer(&self, target: &Path) -> Result<()> {
        let relative = target.strip_prefix(&self.root).map_err(|_| {
            VinstError::InvalidStore(format!(
                "refusing to point {} outside the install root",
                target.display()
            ))
        })?;
        let delays = ExponentialBackoff::from_millis(10)
            .max_delay(Duration::from_millis(200))
            .take(POINTER_SWAP_ATTEMPTS - 1);

        let mut last_err = match self.try_swap_pointer(relative) {
            Ok(()) => return Ok(()),
            Err(e) => e,
        };
        for delay in delays {
            warn!(
                "Repointing {} failed ({}); retrying in {:?}",
                self.pointer_path().display(),
                last_err,
                delay
            );
            std::thread::sleep(delay);
            match self.try_swap_pointer(relative) {
                Ok(()) => return Ok(()),
                Err(e) => last_err = e,
            }
        }
        error!(
            "Giving up repointing {} after {} attempts",
            self.pointer_path().display(),
            POINTER_SWAP_ATTEMPTS
        );
        Err(last_err.into())
    }

    fn try_swap_pointer(&self, relative: &Path) -> io::Result<()> {
        let pointer = self.pointer_path();
        let temp_link = self.root.join(format!(
            ".{}{SWAP_MARKER}{}",
            current_pointer_name(&self.app),
            Uuid::new_v4().simple()
        ));
        create_dir_symlink(relative, &temp_link)?;
        if let Err(e) = fs::rename(&temp_link, &pointer) {
            let _ = fs::remove_file(&temp_link);
            return Err(e);
        }
        debug!("{} -> {}", pointer.display(), relative.display());
        Ok(())
    }

    /// Renames a formerly active directory into `archives/` with a
    /// `-failed-<ts>` marker.
    fn retire_failed(&self, previous: &Path) -> Result<PathBuf> {
        let now = timestamp_now();
        let name = previous
            .file_name()
            .map(|n| n.to_string_lossy().to_string())
            .ok_or_else(|| {
                VinstError::InvalidStore(format!("bad pointer target {}", previous.display()))
            })?;
        let in_archives = previous.parent() == Some(self.archives_dir().as_path());
        let base = if in_archives {
            self.archived()?
                .into_iter()
                .find(|entry| entry.path == previous)
                .map(|entry| entry.archive_base_name().to_string())
                .unwrap_or(name)
        } else {
            format!("{name}-{now}")
        };
        let retired = self.unique_archive_path(&format!("{base}{FAILED_MARKER}{now}"))?;
        fs::rename(previous, &retired)?;
        touch_dir(&retired);
        Ok(retired)
    }

    /// `archives/<base>`, or `archives/<base>.N` when that name is taken.
    fn unique_archive_path(&self, base: &str) -> Result<PathBuf> {
        let archives = self.archives_dir();
        fs::create_dir_all(&archives)?;
        let mut candidate = archives.join(base);
        let mut seq = 1;
        while candidate.symlink_metadata().is_ok() {
            candidate = archives.join(format!("{base}.{seq}"));
            seq += 1;
        }
        Ok(candidate)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Staged {
    Moved,
    /// `src` is still intact and is dropped only once the slot rename succeeds.
    Copied,
}

/// Moves `src` to `dest` (same filesystem) or copies it there.
fn stage_tree(src: &Path, dest: &Path) -> Result<Staged> {
    match fs::rename(src, dest) {
        Ok(()) => Ok(Staged::Moved),
        Err(e) => {
            debug!(
                "Rename {} -> {} failed ({}); copying instead",
                src.display(),
                dest.display(),
                e
            );
            if let Err(copy_err) = copy_tree(src, dest) {
                remove_path_if_exists(dest);
                return Err(copy_err);
            }
            Ok(Staged::Copied)
        }
    }
}

/// Hands a staged tree back to `src` and clears the staging entry.
fn unstage(src: &Path, staging: &Path, staged: Staged) {
    match staged {
        Staged::Moved => {
            if let Err(e) = fs::rename(staging, src) {
                warn!(
                    "Could not return {} to {}: {}; it stays in place until the next deploy",
                    staging.display(),
                    src.display(),
                    e
                );
            }
        }
        Staged::Copied => remove_path_if_exists(staging),
    }
}

fn copy_tree(src: &Path, dest: &Path) -> Result<()> {
    for entry in WalkDir::new(src).follow_links(false) {
        let entry = entry.map_err(|e| VinstError::Generic(format!("walking {}: {e}", src.display())))?;
        let rel = entry
            .path()
            .strip_prefix(src)
            .map_err(|e| VinstError::Generic(e.to_string()))?;
        let out = dest.join(rel);
        let ft = entry.file_type();
        if ft.is_dir() {
            fs::create_dir_all(&out)?;
        } else if ft.is_symlink() {
            let link = fs::read_link(entry.path())?;
            create_file_symlink(&link, &out)?;
        } else {
            fs::copy(entry.path(), &out)?;
        }
    }
    Ok(())
}

#[cfg(unix)]
fn create_dir_symlink(target: &Path, link: &Path) -> io::Result<()> {
    std::os::unix::fs::symlink(target, link)
}

#[cfg(windows)]
fn create_dir_symlink(target: &Path, link: &Path) -> io::Result<()> {
    std::os::windows::fs::symlink_dir(target, link)
}

#[cfg(unix)]
fn create_file_symlink(target: &Path, link: &Path) -> io::Result<()> {
    std::os::unix::fs::symlink(target, link)
}

#[cfg(windows)]
fn create_file_symlink(target: &Path, link: &Path) -> io::Result<()> {
    std::os::windows::fs::symlink_file(target, link)
}

/// Sets a directory's mtime to now so that recency follows install/retire time.
fn touch_dir(path: &Path) {
    let result = File::open(path).and_then(|f| f.set_modified(SystemTime::now()));
    if let Err(e) = result {
        debug!("Could not stamp mtime on {}: {}", path.display(), e);
    }
}

fn remove_path_if_exists(path: &Path) {
    let result = match path.symlink_metadata() {
        Ok(meta) if meta.is_dir() => fs::remove_dir_all(path),
        Ok(_) => fs::remove_file(path),
        Err(_) => return,
    };
    if let Err(e) = result {
        warn!("Failed to remove {}: {}", path.display(), e);
    }
}

fn is_empty_dir(dir: &Path, ignoring: &[&str]) -> Result<bool> {
    match fs::read_dir(dir) {
        Ok(rd) => {
            for entry in rd {
                let name = entry?.file_name();
                if !ignoring.iter().any(|i| name == *i) {
                    return Ok(false);
                }
            }
            Ok(true)
        }
        Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(false),
        Err(e) => Err(e.into()),
    }
}
