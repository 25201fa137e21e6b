//! Archive extraction for portable PostgreSQL distributions.
//!
//! Both formats are extracted "flat": when every entry sits under one
//! wrapping directory (`pgsql/bin/...`), that directory is stripped.

mod path;
mod tar_gz;
mod zip_ops;

use std::fs;
use std::path::Path;

use crate::error::{AppError, Result};

pub(crate) use self::tar_gz::extract_tar_gz_flat;
pub(crate) use self::zip_ops::extract_zip_flat;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ArchiveFormat {
    Zip,
    TarGz,
}

impl ArchiveFormat {
    /// Guess the format from a file name or URL.
    pub fn detect(name: &str) -> Option<Self> {
        let lower = name.to_ascii_lowercase();
        let lower = lower.split(['?', '#']).next().unwrap_or_default();
        if lower.ends_with(".zip") {
            Some(Self::Zip)
        } else if lower.ends_with(".tar.gz") || lower.ends_with(".tgz") {
            Some(Self::TarGz)
        } else {
            None
        }
    }

    pub fn extension(self) -> &'static str {
        match self {
            Self::Zip => "zip",
            Self::TarGz => "tar.gz",
        }
    }
}

/// Extract `archive_path` into `dest_dir`, flattening a single root directory.
pub fn extract_flat(archive_path: &Path, format: ArchiveFormat, dest_dir: &Path) -> Result<()> {
    fs::create_dir_all(dest_dir)
        .map_err(|e| AppError::io(format!("Failed to create {:?}: {}", dest_dir, e)))?;
    match format {
        ArchiveFormat::Zip => extract_zip_flat(archive_path, dest_dir),
        ArchiveFormat::TarGz => extract_tar_gz_flat(archive_path, dest_dir),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn format_detection() {
        assert_eq!(ArchiveFormat::detect("pg-16.zip"), Some(ArchiveFormat::Zip));
        assert_eq!(
            ArchiveFormat::detect("https://x/pg.tar.gz?sig=1"),
            Some(ArchiveFormat::TarGz)
        );
        assert_eq!(ArchiveFormat::detect("pg.TGZ"), Some(ArchiveFormat::TarGz));
        assert_eq!(
            ArchiveFormat::detect("https://sbp.enterprisedb.com/getfile.jsp?fileid=1"),
            None
        );
    }
}
