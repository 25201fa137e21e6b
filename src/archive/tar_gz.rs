use std::fs;
use std::io;
use std::path::{Path, PathBuf};

use flate2::read::GzDecoder;
use tar::{Archive, EntryType};

use super::path::{detect_common_top_dir, flat_destination, parse_entry_rel_path, validate_link_target};
use crate::error::{AppError, Result};

fn open(archive_path: &Path) -> Result<Archive<GzDecoder<fs::File>>> {
    let file = fs::File::open(archive_path)
        .map_err(|e| AppError::io(format!("Failed to open {:?}: {}", archive_path, e)))?;
    Ok(Archive::new(GzDecoder::new(file)))
}

fn archive_err(err: io::Error) -> AppError {
    AppError::invalid_engine_archive(err.to_string())
}

/// Entry paths of a tar.gz, for top-level directory detection.
fn entry_paths(archive_path: &Path) -> Result<Vec<String>> {
    let mut archive = open(archive_path)?;
    let mut paths = Vec::new();
    for entry in archive.entries().map_err(archive_err)? {
        let entry = entry.map_err(archive_err)?;
        let path = entry.path().map_err(archive_err)?;
        if let Some(s) = path.to_str() {
            paths.push(s.to_string());
        }
    }
    Ok(paths)
}

/// Extract a tar.gz to `dest_dir`, stripping a single wrapping directory.
pub(crate) fn extract_tar_gz_flat(archive_path: &Path, dest_dir: &Path) -> Result<()> {
    let paths = entry_paths(archive_path)?;
    let top_dir = detect_common_top_dir(paths.iter().map(String::as_str));

    let mut archive = open(archive_path)?;
    let mut symlinks: Vec<(PathBuf, PathBuf)> = Vec::new();

    for entry in archive.entries().map_err(archive_err)? {
        let mut entry = entry.map_err(archive_err)?;
        let raw = entry
            .path()
            .map_err(archive_err)?
            .to_str()
            .ok_or_else(|| AppError::invalid_engine_archive("entry path is not valid UTF-8"))?
            .to_string();

        if parse_entry_rel_path(&raw).is_none() {
            return Err(AppError::invalid_engine_archive(format!(
                "archive contains unsafe entry path: {raw:?}"
            )));
        }
        let Some(out_path) = flat_destination(&raw, dest_dir, top_dir.as_deref()) else {
            continue;
        };

        let entry_type = entry.header().entry_type();
        match entry_type {
            EntryType::Directory => {
                fs::create_dir_all(&out_path)
                    .map_err(|e| AppError::io(format!("failed to create {out_path:?}: {e}")))?;
            }
            EntryType::Symlink | EntryType::Link => {
                let target = entry
                    .link_name()
                    .map_err(archive_err)?
                    .ok_or_else(|| AppError::invalid_engine_archive("link entry without target"))?
                    .into_owned();
                if entry_type == EntryType::Symlink {
                    validate_link_target(&out_path, &target, dest_dir)?;
                    symlinks.push((out_path, target));
                } else {
                    let source = target
                        .to_str()
                        .and_then(|t| flat_destination(t, dest_dir, top_dir.as_deref()))
                        .ok_or_else(|| AppError::invalid_engine_archive("unsafe hard link target"))?;
                    create_parent(&out_path)?;
                    if fs::hard_link(&source, &out_path).is_err() {
                        fs::copy(&source, &out_path).map_err(|e| {
                            AppError::io(format!("failed to copy {source:?} to {out_path:?}: {e}"))
                        })?;
                    }
                }
            }
            t if t.is_file() => {
                create_parent(&out_path)?;
                entry
                    .unpack(&out_path)
                    .map_err(|e| AppError::io(format!("failed to unpack {out_path:?}: {e}")))?;
            }
            other => {
                log::warn!("Skipping unsupported tar entry {:?} ({:?})", raw, other);
            }
        }
    }

    // Links last, once every target they may point at exists.
    for (link, target) in symlinks {
        create_parent(&link)?;
        create_symlink(&target, &link)?;
    }
    Ok(())
}

fn create_parent(path: &Path) -> Result<()> {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent)
            .map_err(|e| AppError::io(format!("failed to create {parent:?}: {e}")))?;
    }
    Ok(())
}

#[cfg(unix)]
fn create_symlink(target: &Path, link: &Path) -> Result<()> {
    std::os::unix::fs::symlink(target, link)
        .map_err(|e| AppError::io(format!("failed to create symlink at {link:?}: {e}")))
}

#[cfg(not(unix))]
fn create_symlink(target: &Path, link: &Path) -> Result<()> {
    let source = link.parent().unwrap_or(link).join(target);
    if source.is_file() {
        fs::copy(&source, link)
            .map_err(|e| AppError::io(format!("failed to copy {source:?} to {link:?}: {e}")))?;
    } else {
        log::warn!("Skipping symlink {:?} -> {:?}", link, target);
    }
    Ok(())
}
