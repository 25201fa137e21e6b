use std::path::{Component, Path, PathBuf};

use crate::error::{AppError, Result};

fn has_windows_drive_prefix(path: &str) -> bool {
    let bytes = path.as_bytes();
    bytes.len() >= 2 && bytes[1] == b':' && bytes[0].is_ascii_alphabetic()
}

/// Convert an archive entry path to a relative path, rejecting absolute,
/// drive-prefixed or traversing entries.
pub(super) fn parse_entry_rel_path(raw: &str) -> Option<PathBuf> {
    let normalized = raw.replace('\\', "/");
    if normalized.starts_with('/') || has_windows_drive_prefix(&normalized) {
        return None;
    }

    let mut relative = PathBuf::new();
    for part in normalized.split('/') {
        match part {
            "" | "." => {}
            ".." => return None,
            _ => relative.push(part),
        }
    }

    if relative.as_os_str().is_empty() {
        None
    } else {
        Some(relative)
    }
}

/// The single top-level directory every entry lives under, if any.
///
/// Archives holding only top-level files (or several roots) have none.
pub(super) fn detect_common_top_dir<'a, I>(paths: I) -> Option<String>
where
    I: IntoIterator<Item = &'a str>,
{
    let mut candidate: Option<String> = None;
    let mut saw_nested = false;

    for raw in paths {
        let Some(relative) = parse_entry_rel_path(raw) else {
            continue;
        };
        let mut components = relative.components();
        let first = components.next()?.as_os_str().to_str()?.to_string();
        if components.next().is_some() {
            saw_nested = true;
        }
        match candidate.as_deref() {
            None => candidate = Some(first),
            Some(existing) if existing == first => {}
            Some(_) => return None,
        }
    }

    if saw_nested {
        candidate
    } else {
        None
    }
}

/// Strip the common top-level directory; `None` for the directory itself.
pub(super) fn strip_common_top_dir(relative: &Path, top_dir: Option<&str>) -> Option<PathBuf> {
    let Some(top) = top_dir else {
        return Some(relative.to_path_buf());
    };
    let stripped = relative.strip_prefix(top).ok()?;
    if stripped.as_os_str().is_empty() {
        None
    } else {
        Some(stripped.to_path_buf())
    }
}

/// Destination for an entry: relative path, flattened, joined onto `dest_dir`.
pub(super) fn flat_destination(raw: &str, dest_dir: &Path, top_dir: Option<&str>) -> Option<PathBuf> {
    let relative = parse_entry_rel_path(raw)?;
    let stripped = strip_common_top_dir(&relative, top_dir)?;
    Some(dest_dir.join(stripped))
}

/// Reject link targets that are absolute or climb out of `dest_dir`.
pub(super) fn validate_link_target(link_path: &Path, target: &Path, dest_dir: &Path) -> Result<()> {
    if target.as_os_str().is_empty() || target.is_absolute() {
        return Err(AppError::invalid_engine_archive(format!(
            "archive link {:?} has an unsafe target {:?}",
            link_path, target
        )));
    }

    let parent = link_path.parent().unwrap_or(dest_dir);
    let mut resolved = parent.to_path_buf();
    for component in target.components() {
        match component {
            Component::Normal(part) => resolved.push(part),
            Component::CurDir => {}
            Component::ParentDir => {
                if !resolved.pop() {
                    return Err(AppError::invalid_engine_archive("link target escapes root"));
                }
            }
            Component::RootDir | Component::Prefix(_) => {
                return Err(AppError::invalid_engine_archive(format!(
                    "absolute link target {:?}",
                    target
                )));
            }
        }
    }

    if resolved.starts_with(dest_dir) {
        Ok(())
    } else {
        Err(AppError::invalid_engine_archive(format!(
            "archive link {:?} points outside the destination",
            link_path
        )))
    }
}
