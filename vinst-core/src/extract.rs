// vinst-core/src/extract.rs
//! Unpacks a fetched artifact into scratch, finds the tree root and checks its layout.
use std::fs::{self, File};
use std::io::{self, Read, Seek};
#[cfg(unix)]
use std::os::unix::fs as unix_fs;
use std::path::{Component, Path, PathBuf};

use bzip2::read::BzDecoder;
use flate2::read::GzDecoder;
use tar::{Archive, EntryType};
use tracing::{debug, error, warn};
use vinst_common::error::{Result, VinstError};
use vinst_common::manifest::{LayoutRequirements, ReleaseSpec};
use vinst_common::model::{ExtractedTree, SourceArtifact};
use xz2::read::XzDecoder;
use zip::read::ZipArchive;

const EXTRACT_DIR_NAME: &str = "extract";
const MACOS_METADATA_DIR: &str = "__MACOSX";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ArchiveFormat {
    Zip,
    Gzip,
    Bzip2,
    Xz,
    Tar,
}

/// Detects the container format from magic bytes; the file name is never consulted.
pub fn detect_format(path: &Path) -> Result<ArchiveFormat> {
    let kind = infer::get_from_path(path)?;
    let format = match kind.map(|k| k.extension()) {
        Some("zip") => ArchiveFormat::Zip,
        Some("gz") => ArchiveFormat::Gzip,
        Some("bz2") => ArchiveFormat::Bzip2,
        Some("xz") => ArchiveFormat::Xz,
        Some("tar") => ArchiveFormat::Tar,
        other => {
            error!(
                "Unrecognized archive format for {}: {:?}",
                path.display(),
                kind.map(|k| k.mime_type())
            );
            return Err(VinstError::UnsupportedArchive(format!(
                "{} is not a zip or tar archive (detected: {})",
                path.display(),
                other.unwrap_or("unknown")
            )));
        }
    };
    debug!("Detected {:?} archive: {}", format, path.display());
    Ok(format)
}

/// Extracts `artifact` under `scratch` and validates it against the release's
/// layout, entry point and icon.
pub fn extract_release(
    artifact: &SourceArtifact,
    scratch: &Path,
    spec: &ReleaseSpec,
) -> Result<ExtractedTree> {
    let mut tree = extract(artifact, scratch, &spec.layout)?;
    if let Some(entrypoint) = spec.entrypoint.as_deref() {
        if !tree.root.join(entrypoint).exists() {
            error!("Declared entry point {} missing", entrypoint);
            return Err(VinstError::InvalidLayout(format!(
                "declared entrypoint '{}' not found under {}",
                entrypoint,
                tree.root.display()
            )));
        }
    }
    if let Some(icon) = spec.icon.as_deref() {
        if !tree.root.join(icon).exists() {
            let msg = format!("icon '{icon}' not found in release; continuing without it");
            warn!("{}", msg);
            tree.warnings.push(msg);
        }
    }
    Ok(tree)
}

pub fn extract(
    artifact: &SourceArtifact,
    scratch: &Path,
    layout: &LayoutRequirements,
) -> Result<ExtractedTree> {
    let format = detect_format(artifact.path())?;
    let target = scratch.join(EXTRACT_DIR_NAME);
    if target.exists() {
        fs::remove_dir_all(&target)?;
    }
    fs::create_dir_all(&target)?;

    extract_archive(artifact.path(), &target, format)?;
    let root = normalize_root(&target)?;
    debug!("Source root is {}", root.display());
    let warnings = validate_layout(&root, layout)?;
    Ok(ExtractedTree { root, warnings })
}

pub fn extract_archive(archive_path: &Path, target_dir: &Path, format: ArchiveFormat) -> Result<()> {
    debug!(
        "Extracting archive '{}' ({:?}) to '{}'",
        archive_path.display(),
        format,
        target_dir.display()
    );
    let file = File::open(archive_path).map_err(|e| {
        VinstError::Io(std::sync::Arc::new(io::Error::new(
            e.kind(),
            format!("Failed to open archive {}: {}", archive_path.display(), e),
        )))
    })?;
    match format {
        ArchiveFormat::Zip => extract_zip_archive(file, target_dir, archive_path),
        ArchiveFormat::Gzip => extract_tar_archive(GzDecoder::new(file), target_dir, archive_path),
        ArchiveFormat::Bzip2 => extract_tar_archive(BzDecoder::new(file), target_dir, archive_path),
        ArchiveFormat::Xz => extract_tar_archive(XzDecoder::new(file), target_dir, archive_path),
        ArchiveFormat::Tar => extract_tar_archive(file, target_dir, archive_path),
    }
}

/// The single top-level directory if that is all the archive produced
/// (ignoring `__MACOSX`), otherwise the extraction directory itself.
pub fn normalize_root(extract_dir: &Path) -> Result<PathBuf> {
    let mut entries = Vec::new();
    for entry in fs::read_dir(extract_dir)? {
        let entry = entry?;
        if entry.file_name() == MACOS_METADATA_DIR {
            continue;
        }
        entries.push(entry);
    }
    if let [only] = entries.as_slice() {
        if only.file_type()?.is_dir() {
            return Ok(only.path());
        }
    }
    Ok(extract_dir.to_path_buf())
}

/// Fails on a missing required directory; returns warnings for soft findings.
pub fn validate_layout(root: &Path, layout: &LayoutRequirements) -> Result<Vec<String>> {
    for required in &layout.required_dirs {
        if !root.join(required).is_dir() {
            error!("Invalid app structure: missing {}/", required);
            return Err(VinstError::InvalidLayout(format!(
                "missing {}/ under {}",
                required,
                root.display()
            )));
        }
    }
    let mut warnings = Vec::new();
    if let Some(manifest) = layout.optional_manifest.as_deref() {
        if !root.join(manifest).is_file() {
            let msg = format!("no {manifest} found; skipping dependencies");
            warn!("{}", msg);
            warnings.push(msg);
        }
    }
    Ok(warnings)
}

/// Joins an archive entry path onto `target_dir`, refusing anything that is
/// absolute, climbs with `..`, or would pass through a symlink already on disk.
fn safe_target_path(target_dir: &Path, entry_path: &Path) -> Option<PathBuf> {
    let mut out = target_dir.to_path_buf();
    let mut pushed = false;
    for comp in entry_path.components() {
        match comp {
            Component::Normal(p) => {
                if out != target_dir && out.symlink_metadata().is_ok_and(|m| m.is_symlink()) {
                    return None;
                }
                out.push(p);
                pushed = true;
            }
            Component::CurDir => {}
            Component::ParentDir | Component::RootDir | Component::Prefix(_) => return None,
        }
    }
    pushed.then_some(out)
}

fn unsafe_entry(entry: &Path, archive: &Path) -> VinstError {
    error!(
        "Unsafe entry path {} in {}",
        entry.display(),
        archive.display()
    );
    VinstError::UnsupportedArchive(format!(
        "entry '{}' in {} escapes the extraction directory",
        entry.display(),
        archive.display()
    ))
}

fn create_parent(path: &Path) -> Result<()> {
    if let Some(parent) = path.parent() {
        if !parent.exists() {
            fs::create_dir_all(parent).map_err(|e| {
                VinstError::Io(std::sync::Arc::new(io::Error::new(
                    e.kind(),
                    format!("Failed create parent dir {}: {}", parent.display(), e),
                )))
            })?;
        }
    }
    Ok(())
}

#[cfg(unix)]
struct DeferredHardLink {
    link_path: PathBuf,
    target_path: PathBuf,
}

fn extract_tar_archive<R: Read>(
    reader: R,
    target_dir: &Path,
    archive_path_for_log: &Path,
) -> Result<()> {
    let mut archive = Archive::new(reader);
    archive.set_preserve_permissions(true);
    archive.set_overwrite(true);

    #[cfg(unix)]
    let mut deferred_hardlinks: Vec<DeferredHardLink> = Vec::new();

    let entries = archive.entries().map_err(|e| {
        VinstError::UnsupportedArchive(format!(
            "cannot read tar stream from {}: {e}",
            archive_path_for_log.display()
        ))
    })?;
    for entry_result in entries {
        let mut entry = entry_result.map_err(|e| {
            VinstError::UnsupportedArchive(format!(
                "error reading TAR entry from {}: {}",
                archive_path_for_log.display(),
                e
            ))
        })?;
        let path_in_archive: PathBuf = entry
            .path()
            .map_err(|e| {
                VinstError::UnsupportedArchive(format!(
                    "invalid path in TAR entry from {}: {}",
                    archive_path_for_log.display(),
                    e
                ))
            })?
            .into_owned();

        let Some(disk_path) = safe_target_path(target_dir, &path_in_archive) else {
            if path_in_archive.components().all(|c| c == Component::CurDir) {
                continue;
            }
            return Err(unsafe_entry(&path_in_archive, archive_path_for_log));
        };
        create_parent(&disk_path)?;

        let entry_type = entry.header().entry_type();
        if entry_type == EntryType::Link {
            let link_name = entry.link_name().ok().flatten().map(|l| l.into_owned());
            let Some(link_name) = link_name else {
                return Err(VinstError::UnsupportedArchive(format!(
                    "hardlink entry '{}' in {} has no link target",
                    path_in_archive.display(),
                    archive_path_for_log.display()
                )));
            };
            let target_path = safe_target_path(target_dir, &link_name)
                .ok_or_else(|| unsafe_entry(&link_name, archive_path_for_log))?;
            #[cfg(unix)]
            {
                debug!(
                    "Deferring hardlink '{}' -> '{}'",
                    path_in_archive.display(),
                    link_name.display()
                );
                deferred_hardlinks.push(DeferredHardLink {
                    link_path: disk_path,
                    target_path,
                });
            }
            #[cfg(not(unix))]
            warn!(
                "Skipping hardlink {} -> {} on this platform",
                disk_path.display(),
                target_path.display()
            );
            continue;
        }
        if !cfg!(unix) && entry_type == EntryType::Symlink {
            warn!("Skipping symlink entry {} on this platform", disk_path.display());
            continue;
        }

        entry.unpack(&disk_path).map_err(|e| {
            error!(
                "Failed to unpack entry {:?} to {}: {}",
                path_in_archive,
                disk_path.display(),
                e
            );
            VinstError::Io(std::sync::Arc::new(e))
        })?;
    }

    #[cfg(unix)]
    for deferred in deferred_hardlinks {
        if !deferred.target_path.exists() {
            return Err(VinstError::UnsupportedArchive(format!(
                "hardlink target '{}' for '{}' does not exist in {}",
                deferred.target_path.display(),
                deferred.link_path.display(),
                archive_path_for_log.display()
            )));
        }
        if deferred.link_path.symlink_metadata().is_ok() {
            fs::remove_file(&deferred.link_path)?;
        }
        fs::hard_link(&deferred.target_path, &deferred.link_path)?;
        debug!(
            "Created deferred hardlink '{}' -> '{}'",
            deferred.link_path.display(),
            deferred.target_path.display()
        );
    }

    debug!("Finished TAR extraction for {}", archive_path_for_log.display());
    Ok(())
}

fn extract_zip_archive<R: Read + Seek>(
    reader: R,
    target_dir: &Path,
    archive_path_for_log: &Path,
) -> Result<()> {
    let mut archive = ZipArchive::new(reader).map_err(|e| {
        VinstError::UnsupportedArchive(format!(
            "failed to open ZIP {}: {}",
            archive_path_for_log.display(),
            e
        ))
    })?;

    for i in 0..archive.len() {
        let mut file = archive.by_index(i).map_err(|e| {
            VinstError::UnsupportedArchive(format!(
                "error reading ZIP index {} in {}: {}",
                i,
                archive_path_for_log.display(),
                e
            ))
        })?;
        let raw_name = PathBuf::from(file.name());
        let path_in_archive = file
            .enclosed_name()
            .ok_or_else(|| unsafe_entry(&raw_name, archive_path_for_log))?;
        let Some(disk_path) = safe_target_path(target_dir, &path_in_archive) else {
            if path_in_archive.components().all(|c| c == Component::CurDir) {
                continue;
            }
            return Err(unsafe_entry(&path_in_archive, archive_path_for_log));
        };
        create_parent(&disk_path)?;

        if file.is_dir() {
            fs::create_dir_all(&disk_path)?;
            continue;
        }
        if file.is_symlink() {
            let mut buf = Vec::new();
            file.read_to_end(&mut buf)?;
            let link_target = PathBuf::from(String::from_utf8_lossy(&buf).to_string());
            #[cfg(unix)]
            {
                if disk_path.symlink_metadata().is_ok() {
                    fs::remove_file(&disk_path)?;
                }
                unix_fs::symlink(&link_target, &disk_path)?;
            }
            #[cfg(not(unix))]
            warn!(
                "Cannot create symlink on non-unix system: {} -> {}",
                disk_path.display(),
                link_target.display()
            );
            continue;
        }

        if disk_path.symlink_metadata().is_ok() {
            fs::remove_file(&disk_path)?;
        }
        let mut out_file = File::create(&disk_path)?;
        io::copy(&mut file, &mut out_file)?;
        #[cfg(unix)]
        {
            use std::os::unix::fs::PermissionsExt;
            if let Some(mode) = file.unix_mode() {
                fs::set_permissions(&disk_path, fs::Permissions::from_mode(mode & 0o7777))?;
            }
        }
    }
    debug!("Finished ZIP extraction for {}", archive_path_for_log.display());
    Ok(())
}
