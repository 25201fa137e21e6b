use std::fmt::Write as _;
use std::fs;
use std::path::{Path, PathBuf};

use crate::error::{AppError, Result};

/// Contents of an instance's `odoo.conf`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OdooConf {
    pub addons_path: Vec<PathBuf>,
    pub admin_passwd: String,
    /// `None` lets Odoo use the default local socket (`db_host = False`).
    pub db_host: Option<String>,
    pub db_port: u16,
    pub db_user: String,
    pub db_password: String,
    pub http_port: u16,
    pub logfile: PathBuf,
    pub data_dir: PathBuf,
}

impl OdooConf {
    pub fn render(&self) -> String {
        let addons = self
            .addons_path
            .iter()
            .map(|p| p.display().to_string())
            .collect::<Vec<_>>()
            .join(",");

        let mut out = String::from("[options]\n");
        let mut line = |key: &str, value: &str| {
            let _ = writeln!(out, "{} = {}", key, value);
        };
        line("addons_path", &addons);
        line("admin_passwd", &self.admin_passwd);
        line("db_host", self.db_host.as_deref().unwrap_or("False"));
        line("db_port", &self.db_port.to_string());
        line("db_user", &self.db_user);
        line("db_password", &self.db_password);
        line("http_port", &self.http_port.to_string());
        line("logfile", &self.logfile.display().to_string());
        line("data_dir", &self.data_dir.display().to_string());
        out
    }

    pub fn write(&self, path: &Path) -> Result<()> {
        fs::write(path, self.render())
            .map_err(|e| AppError::io(format!("Failed to write {:?}: {}", path, e)))
    }
}

/// Value of `key` in an INI-style `odoo.conf`.
pub fn conf_value<'a>(content: &'a str, key: &str) -> Option<&'a str> {
    content.lines().find_map(|line| {
        let (k, v) = line.split_once('=')?;
        (k.trim() == key).then(|| v.trim())
    })
}
