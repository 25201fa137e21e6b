use std::fs;
use std::ops::RangeInclusive;

use serde::{Deserialize, Serialize};

use crate::error::{AppError, Result};
use crate::paths::Paths;

pub const DEFAULT_ODOO_REPO: &str = "https://github.com/odoo/odoo.git";
pub const DEFAULT_DATABASE_PORT: u16 = 5433;

/// Launcher settings stored in `config.toml`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LauncherConfig {
    #[serde(default)]
    pub github_proxy: String,
    #[serde(default)]
    pub pypi_mirror: String,
    #[serde(default = "default_odoo_repo")]
    pub odoo_repo: String,
    #[serde(default = "default_python")]
    pub python: String,
    #[serde(default = "default_git")]
    pub git: String,
    #[serde(default)]
    pub ports: PortsConfig,
    #[serde(default)]
    pub database: DatabaseConfig,
    #[serde(default)]
    pub instance: InstanceDefaults,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PortsConfig {
    #[serde(default = "default_application_start")]
    pub application_start: u16,
    #[serde(default = "default_application_end")]
    pub application_end: u16,
    #[serde(default = "default_database_port")]
    pub database_default: u16,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DatabaseConfig {
    /// Port the managed PostgreSQL listens on.
    #[serde(default = "default_database_port")]
    pub port: u16,
    /// Portable archive to use instead of the vendor lookup. Enables the
    /// portable path on every platform.
    #[serde(default)]
    pub archive_url: String,
    #[serde(default = "default_superuser")]
    pub superuser: String,
    #[serde(default = "default_settle_secs")]
    pub settle_secs: u64,
    /// Prebuilt server release fetched on Linux/macOS when no local server
    /// distribution is installed.
    #[serde(default = "default_binaries_version")]
    pub binaries_version: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct InstanceDefaults {
    #[serde(default = "default_admin_password")]
    pub admin_password: String,
    #[serde(default = "default_db_user")]
    pub db_user: String,
    #[serde(default = "default_db_password")]
    pub db_password: String,
}

fn default_odoo_repo() -> String {
    DEFAULT_ODOO_REPO.to_string()
}

fn default_python() -> String {
    if cfg!(target_os = "windows") {
        "python".to_string()
    } else {
        "python3".to_string()
    }
}

fn default_git() -> String {
    "git".to_string()
}

fn default_application_start() -> u16 {
    8069
}

fn default_application_end() -> u16 {
    8999
}

fn default_database_port() -> u16 {
    DEFAULT_DATABASE_PORT
}

fn default_superuser() -> String {
    "postgres".to_string()
}

fn default_settle_secs() -> u64 {
    3
}

fn default_binaries_version() -> String {
    crate::database::DEFAULT_BINARIES_VERSION.to_string()
}

fn default_admin_password() -> String {
    "admin".to_string()
}

fn default_db_user() -> String {
    "odoo".to_string()
}

fn default_db_password() -> String {
    "odoo".to_string()
}

impl Default for LauncherConfig {
    fn default() -> Self {
        Self {
            github_proxy: String::new(),
            pypi_mirror: String::new(),
            odoo_repo: default_odoo_repo(),
            python: default_python(),
            git: default_git(),
            ports: PortsConfig::default(),
            database: DatabaseConfig::default(),
            instance: InstanceDefaults::default(),
        }
    }
}

impl Default for PortsConfig {
    fn default() -> Self {
        Self {
            application_start: default_application_start(),
            application_end: default_application_end(),
            database_default: default_database_port(),
        }
    }
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self {
            port: default_database_port(),
            archive_url: String::new(),
            superuser: default_superuser(),
            settle_secs: default_settle_secs(),
            binaries_version: default_binaries_version(),
        }
    }
}

impl Default for InstanceDefaults {
    fn default() -> Self {
        Self {
            admin_password: default_admin_password(),
            db_user: default_db_user(),
            db_password: default_db_password(),
        }
    }
}

impl PortsConfig {
    pub fn application_range(&self) -> RangeInclusive<u16> {
        self.application_start..=self.application_end
    }
}

impl LauncherConfig {
    /// Odoo repository URL, wrapped with the GitHub proxy when configured.
    pub fn repo_url(&self) -> String {
        wrap_with_proxy(&self.github_proxy, &self.odoo_repo)
    }
}

/// Wrap a URL with the GitHub proxy prefix.
/// If proxy is empty, returns the URL unchanged.
pub fn wrap_with_proxy(proxy: &str, url: &str) -> String {
    if proxy.is_empty() {
        url.to_string()
    } else {
        let base = proxy.trim_end_matches('/');
        format!("{}/{}", base, url)
    }
}

/// Load `config.toml`, writing the defaults when it does not exist yet.
pub fn load_config(paths: &Paths) -> Result<LauncherConfig> {
    let path = paths.config_path();
    if !path.exists() {
        let config = LauncherConfig::default();
        save_config(paths, &config)?;
        return Ok(config);
    }
    let content = fs::read_to_string(&path).map_err(|e| AppError::config(e.to_string()))?;
    let config: LauncherConfig = toml::from_str(&content)?;
    if config.ports.application_start > config.ports.application_end {
        return Err(AppError::config(format!(
            "ports.application_start ({}) is greater than ports.application_end ({})",
            config.ports.application_start, config.ports.application_end
        )));
    }
    Ok(config)
}

pub fn save_config(paths: &Paths, config: &LauncherConfig) -> Result<()> {
    paths.ensure_data_dirs()?;
    let content = toml::to_string_pretty(config)?;
    fs::write(paths.config_path(), content).map_err(|e| AppError::config(e.to_string()))
}
