//! Centralized path utilities for the launcher.
//!
//! Layout under the data root:
//! - config.toml, instances.json, versions.json
//! - versions/{version}/ - Odoo checkout, venv/ inside it
//! - instances/{name}/ - addons/, logs/, data/, odoo.conf
//! - postgres/ - portable PostgreSQL (bin/, data/, cache/)
//! - cache/pip/ - pip cache shared by every version

use std::fs;
use std::path::{Path, PathBuf};

use crate::error::{AppError, Result};

/// Environment variable overriding the data root.
pub const HOME_ENV: &str = "ODOO_LAUNCHER_HOME";

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Paths {
    root: PathBuf,
}

impl Paths {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    /// Resolve the data root: `$ODOO_LAUNCHER_HOME`, else `~/.odoo_launcher`.
    pub fn from_env() -> Result<Self> {
        if let Some(dir) = std::env::var_os(HOME_ENV).filter(|v| !v.is_empty()) {
            return Ok(Self::new(dir));
        }
        let home = dirs::home_dir().ok_or_else(|| AppError::config("Cannot find home directory"))?;
        Ok(Self::new(home.join(".odoo_launcher")))
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Ensure all required data directories exist.
    pub fn ensure_data_dirs(&self) -> Result<()> {
        let dirs = [
            self.root.clone(),
            self.versions_dir(),
            self.instances_dir(),
            self.pip_cache_dir(),
        ];
        for dir in &dirs {
            fs::create_dir_all(dir)
                .map_err(|e| AppError::io(format!("Failed to create {:?}: {}", dir, e)))?;
        }
        Ok(())
    }

    pub fn config_path(&self) -> PathBuf {
        self.root.join("config.toml")
    }

    pub fn registry_path(&self) -> PathBuf {
        self.root.join("instances.json")
    }

    pub fn version_cache_path(&self) -> PathBuf {
        self.root.join("versions.json")
    }

    pub fn versions_dir(&self) -> PathBuf {
        self.root.join("versions")
    }

    /// Checkout directory for an Odoo version (e.g. versions/17.0).
    pub fn version_dir(&self, version: &str) -> PathBuf {
        self.versions_dir().join(version)
    }

    pub fn version_venv_dir(&self, version: &str) -> PathBuf {
        self.version_dir(version).join("venv")
    }

    pub fn instances_dir(&self) -> PathBuf {
        self.root.join("instances")
    }

    pub fn instance_dir(&self, name: &str) -> PathBuf {
        self.instances_dir().join(name)
    }

    pub fn instance_config_path(&self, name: &str) -> PathBuf {
        self.instance_dir(name).join("odoo.conf")
    }

    pub fn instance_log_path(&self, name: &str) -> PathBuf {
        self.instance_dir(name).join("logs").join("odoo.log")
    }

    pub fn postgres_dir(&self) -> PathBuf {
        self.root.join("postgres")
    }

    pub fn pip_cache_dir(&self) -> PathBuf {
        self.root.join("cache").join("pip")
    }
}

/// Get the Python executable path within a virtual environment.
pub fn get_venv_python(venv_dir: &Path) -> PathBuf {
    #[cfg(target_os = "windows")]
    {
        venv_dir.join("Scripts").join("python.exe")
    }
    #[cfg(not(target_os = "windows"))]
    {
        venv_dir.join("bin").join("python")
    }
}

/// Platform executable name (`pg_ctl` -> `pg_ctl.exe` on Windows).
pub fn exe_name(name: &str) -> String {
    if cfg!(target_os = "windows") {
        format!("{}.exe", name)
    } else {
        name.to_string()
    }
}

/// Search `PATH` for an executable.
pub fn find_on_path(name: &str) -> Option<PathBuf> {
    which::which(name).ok()
}

/// Search an explicit `PATH`-style list instead of the process environment.
pub fn find_in_dirs(name: &str, dirs: impl AsRef<std::ffi::OsStr>) -> Option<PathBuf> {
    let cwd = std::env::current_dir().ok()?;
    which::which_in(name, Some(dirs), cwd).ok()
}
