use std::fs;
use std::io;
use std::io::Read as _;
use std::path::{Path, PathBuf};

use super::path::{detect_common_top_dir, flat_destination, parse_entry_rel_path, validate_link_target};
use crate::error::{AppError, Result};

fn open(archive_path: &Path) -> Result<zip::ZipArchive<fs::File>> {
    let file = fs::File::open(archive_path)
        .map_err(|e| AppError::io(format!("Failed to open {:?}: {}", archive_path, e)))?;
    Ok(zip::ZipArchive::new(file)?)
}

/// Extract a zip archive to `dest_dir`, stripping a single wrapping directory.
pub(crate) fn extract_zip_flat(archive_path: &Path, dest_dir: &Path) -> Result<()> {
    let mut archive = open(archive_path)?;
    let top_dir = detect_common_top_dir(archive.file_names());
    let mut symlinks: Vec<(PathBuf, PathBuf)> = Vec::new();

    for index in 0..archive.len() {
        let mut entry = archive.by_index(index)?;
        let raw = entry.name().to_string();

        if parse_entry_rel_path(&raw).is_none() {
            return Err(AppError::invalid_engine_archive(format!(
                "archive contains unsafe zip path: {raw:?}"
            )));
        }
        let Some(out_path) = flat_destination(&raw, dest_dir, top_dir.as_deref()) else {
            continue;
        };

        if entry.is_symlink() {
            let mut target = String::new();
            entry
                .read_to_string(&mut target)
                .map_err(|e| AppError::invalid_engine_archive(e.to_string()))?;
            let target = PathBuf::from(target);
            validate_link_target(&out_path, &target, dest_dir)?;
            symlinks.push((out_path, target));
            continue;
        }

        if entry.is_dir() {
            fs::create_dir_all(&out_path)
                .map_err(|e| AppError::io(format!("failed to create {out_path:?}: {e}")))?;
            continue;
        }

        if let Some(parent) = out_path.parent() {
            fs::create_dir_all(parent)
                .map_err(|e| AppError::io(format!("failed to create {parent:?}: {e}")))?;
        }
        let mut out = fs::File::create(&out_path)
            .map_err(|e| AppError::io(format!("failed to create {out_path:?}: {e}")))?;
        io::copy(&mut entry, &mut out)
            .map_err(|e| AppError::io(format!("failed to write {out_path:?}: {e}")))?;

        #[cfg(unix)]
        if let Some(mode) = entry.unix_mode() {
            use std::os::unix::fs::PermissionsExt as _;
            fs::set_permissions(&out_path, fs::Permissions::from_mode(mode & 0o7777))
                .map_err(|e| AppError::io(e.to_string()))?;
        }
    }

    for (link, target) in symlinks {
        if let Some(parent) = link.parent() {
            fs::create_dir_all(parent).map_err(|e| AppError::io(e.to_string()))?;
        }
        #[cfg(unix)]
        std::os::unix::fs::symlink(&target, &link)
            .map_err(|e| AppError::io(format!("failed to create symlink at {link:?}: {e}")))?;
        #[cfg(not(unix))]
        {
            let source = link.parent().unwrap_or(dest_dir).join(&target);
            if source.is_file() {
                fs::copy(&source, &link).map_err(|e| AppError::io(e.to_string()))?;
            }
        }
    }
    Ok(())
}
