use std::ffi::OsString;
use std::fs;
use std::path::{Path, PathBuf};

use async_trait::async_trait;

use super::requirements::{
    filter_driver_requirements, is_source_driver, needs_driver_retry, DRIVER_BINARY_PACKAGE,
    FALLBACK_REQUIREMENTS,
};
use super::RuntimeProvisioner;
use crate::command::{run_streaming, tool_command, CommandOutcome};
use crate::config::LauncherConfig;
use crate::error::{AppError, Result};
use crate::paths::{get_venv_python, Paths};
use crate::progress::Reporter;
use crate::validation::validate_version_tag;

/// Written once dependencies are installed and the driver imports cleanly.
pub const DEPS_MARKER: &str = ".launcher-deps";

const FILTERED_REQUIREMENTS: &str = ".launcher-requirements.txt";

/// Provisions runtimes with `git` and `python -m venv`/`pip`.
#[derive(Debug, Clone)]
pub struct GitVenvProvisioner {
    paths: Paths,
    git: String,
    python: String,
    repo_url: String,
    pypi_mirror: String,
}

impl GitVenvProvisioner {
    pub fn new(paths: Paths, config: &LauncherConfig) -> Self {
        Self {
            paths,
            git: config.git.clone(),
            python: config.python.clone(),
            repo_url: config.repo_url(),
            pypi_mirror: config.pypi_mirror.clone(),
        }
    }

    async fn clone_source(&self, version: &str, dir: &Path, reporter: &Reporter) -> Result<()> {
        if let Some(parent) = dir.parent() {
            fs::create_dir_all(parent)
                .map_err(|e| AppError::io(format!("Failed to create {:?}: {}", parent, e)))?;
        }

        reporter.log(format!("Downloading Odoo {}...", version));
        let mut cmd = tool_command(&self.git);
        cmd.args(["clone", "--depth", "1", "--single-branch", "-b", version])
            .arg(&self.repo_url)
            .arg(dir);

        let outcome = run_streaming(&mut cmd, reporter)
            .await
            .map_err(|e| AppError::fetch_failed(version, e.to_string()))?;
        if !outcome.success {
            return Err(AppError::fetch_failed(version, outcome.summary()));
        }
        Ok(())
    }

    /// Create `<dir>/venv` unless its interpreter already exists.
    async fn ensure_venv(&self, dir: &Path, reporter: &Reporter) -> Result<PathBuf> {
        let venv_dir = dir.join("venv");
        let venv_python = get_venv_python(&venv_dir);
        if venv_python.exists() {
            return Ok(venv_python);
        }

        reporter.log("Creating virtual environment...");
        let mut cmd = tool_command(&self.python);
        cmd.args(["-m", "venv"]).arg(&venv_dir);
        let outcome = run_streaming(&mut cmd, reporter)
            .await
            .map_err(|e| AppError::environment_create_failed(e.to_string()))?;
        if !outcome.success || !venv_python.exists() {
            return Err(AppError::environment_create_failed(outcome.summary()));
        }
        Ok(venv_python)
    }

    async fn pip_install(
        &self,
        venv_python: &Path,
        packages: Vec<OsString>,
        reporter: &Reporter,
    ) -> Result<CommandOutcome> {
        let mut cmd = tool_command(venv_python);
        cmd.args(["-m", "pip", "install", "--cache-dir"])
            .arg(self.paths.pip_cache_dir());
        if !self.pypi_mirror.is_empty() {
            cmd.args(["-i", self.pypi_mirror.as_str()]);
        }
        cmd.args(packages);
        run_streaming(&mut cmd, reporter).await
    }

    /// Install the manifest (or the fallback set), with one retry using the
    /// prebuilt driver when the source driver fails to build.
    async fn install_dependencies(&self, venv_python: &Path, dir: &Path, reporter: &Reporter) -> Result<()> {
        let manifest = dir.join("requirements.txt");
        let first_args: Vec<OsString> = if manifest.is_file() {
            reporter.log("Installing dependencies from requirements.txt...");
            vec!["-r".into(), manifest.clone().into_os_string()]
        } else {
            reporter.log("No requirements.txt found, installing the default dependency set...");
            FALLBACK_REQUIREMENTS.iter().map(OsString::from).collect()
        };

        let first = self.pip_install(venv_python, first_args, reporter).await?;
        if first.success {
            return Ok(());
        }
        if !needs_driver_retry(&first) {
            return Err(AppError::dependency_install_failed(first.summary()));
        }

        reporter.warn(format!(
            "Dependency installation failed on the PostgreSQL driver, retrying with {}",
            DRIVER_BINARY_PACKAGE
        ));
        let mut retry_args: Vec<OsString> = vec![DRIVER_BINARY_PACKAGE.into()];
        if manifest.is_file() {
            let content = fs::read_to_string(&manifest)
                .map_err(|e| AppError::io(format!("Failed to read {:?}: {}", manifest, e)))?;
            let filtered = dir.join(FILTERED_REQUIREMENTS);
            fs::write(&filtered, filter_driver_requirements(&content))
                .map_err(|e| AppError::io(format!("Failed to write {:?}: {}", filtered, e)))?;
            retry_args.push("-r".into());
            retry_args.push(filtered.into_os_string());
        } else {
            retry_args.extend(
                FALLBACK_REQUIREMENTS
                    .iter()
                    .filter(|pkg| !is_source_driver(pkg))
                    .map(OsString::from),
            );
        }

        let second = self.pip_install(venv_python, retry_args, reporter).await?;
        if second.success {
            Ok(())
        } else {
            Err(AppError::dependency_install_failed(second.summary()))
        }
    }

    /// Check that the driver imports; one corrective install if it does not.
    async fn verify_driver(&self, venv_python: &Path, reporter: &Reporter) -> Result<()> {
        if self.driver_imports(venv_python, reporter).await? {
            return Ok(());
        }

        reporter.warn(format!("psycopg2 is not importable, installing {}", DRIVER_BINARY_PACKAGE));
        let outcome = self
            .pip_install(venv_python, vec![DRIVER_BINARY_PACKAGE.into()], reporter)
            .await?;
        if outcome.success && self.driver_imports(venv_python, reporter).await? {
            Ok(())
        } else {
            Err(AppError::dependency_install_failed(
                "psycopg2 is still not importable",
            ))
        }
    }

    async fn driver_imports(&self, venv_python: &Path, reporter: &Reporter) -> Result<bool> {
        let mut cmd = tool_command(venv_python);
        cmd.args(["-c", "import psycopg2"]);
        Ok(run_streaming(&mut cmd, reporter).await?.success)
    }
}

#[async_trait]
impl RuntimeProvisioner for GitVenvProvisioner {
    async fn ensure_version(&self, version: &str, reporter: &Reporter) -> Result<PathBuf> {
        validate_version_tag(version)?;
        let dir = self.paths.version_dir(version);

        if dir.exists() {
            reporter.log(format!("Odoo {} already downloaded", version));
        } else {
            self.clone_source(version, &dir, reporter).await?;
        }

        let venv_python = self.ensure_venv(&dir, reporter).await?;

        let marker = dir.join(DEPS_MARKER);
        if marker.exists() {
            reporter.log("Dependencies already installed");
            return Ok(dir);
        }

        let installed = match self.install_dependencies(&venv_python, &dir, reporter).await {
            Ok(()) => true,
            Err(e) => {
                reporter.warn(format!("Warning: dependency installation incomplete: {}", e));
                false
            }
        };
        let verified = match self.verify_driver(&venv_python, reporter).await {
            Ok(()) => true,
            Err(e) => {
                reporter.warn(format!("Warning: {}", e));
                false
            }
        };

        if installed && verified {
            if let Err(e) = fs::write(&marker, chrono::Utc::now().to_rfc3339()) {
                log::warn!("Failed to write {:?}: {}", marker, e);
            }
            reporter.log(format!("Odoo {} runtime ready", version));
        }
        Ok(dir)
    }
}
