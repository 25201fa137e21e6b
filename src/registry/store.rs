use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Mutex;

use serde_json::Value;

use super::migration::migrate_registry_value;
use super::types::Registry;
use crate::error::{AppError, Result};

/// Serialising access point for the registry file.
///
/// Every read-modify-write in this process holds `lock`, so two tasks can
/// not lose each other's updates. Writers in other processes are not
/// coordinated.
#[derive(Debug)]
pub struct RegistryStore {
    path: PathBuf,
    default_database_port: u16,
    lock: Mutex<()>,
}

impl RegistryStore {
    pub fn new(path: impl Into<PathBuf>, default_database_port: u16) -> Self {
        Self {
            path: path.into(),
            default_database_port,
            lock: Mutex::new(()),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Read the registry, initialising or migrating the file when needed.
    pub fn load(&self) -> Result<Registry> {
        let _guard = self.lock.lock().unwrap_or_else(|e| e.into_inner());
        self.load_unlocked()
    }

    /// Replace the registry contents wholesale.
    pub fn save(&self, registry: &Registry) -> Result<()> {
        let _guard = self.lock.lock().unwrap_or_else(|e| e.into_inner());
        self.write_unlocked(registry)
    }

    /// Execute a read-modify-write on the registry while holding the lock.
    /// The file is only rewritten when `f` actually changed something.
    pub fn with_registry_mut<F, T>(&self, f: F) -> Result<T>
    where
        F: FnOnce(&mut Registry) -> Result<T>,
    {
        let _guard = self.lock.lock().unwrap_or_else(|e| e.into_inner());
        let current = self.load_unlocked()?;
        let mut updated = current.clone();
        let result = f(&mut updated)?;
        if updated != current {
            self.write_unlocked(&updated)?;
        }
        Ok(result)
    }

    fn load_unlocked(&self) -> Result<Registry> {
        if !self.path.exists() {
            let registry = Registry::default();
            self.write_unlocked(&registry)?;
            return Ok(registry);
        }

        let content = fs::read_to_string(&self.path)
            .map_err(|e| AppError::io(format!("Failed to read {:?}: {}", self.path, e)))?;
        let mut doc: Value = if content.trim().is_empty() {
            Value::Null
        } else {
            serde_json::from_str(content.trim_start_matches('\u{feff}'))?
        };

        let migrated = migrate_registry_value(&mut doc, self.default_database_port);
        let registry: Registry = serde_json::from_value(doc)?;
        if migrated {
            self.write_unlocked(&registry)?;
        }
        Ok(registry)
    }

    /// Write to a sibling temp file, then rename over the registry.
    fn write_unlocked(&self, registry: &Registry) -> Result<()> {
        if let Some(parent) = self.path.parent() {
            fs::create_dir_all(parent)
                .map_err(|e| AppError::io(format!("Failed to create {:?}: {}", parent, e)))?;
        }
        let content = serde_json::to_string_pretty(registry)?;
        let tmp = self.path.with_extension("json.tmp");
        fs::write(&tmp, content)
            .map_err(|e| AppError::io(format!("Failed to write {:?}: {}", tmp, e)))?;
        fs::rename(&tmp, &self.path)
            .map_err(|e| AppError::io(format!("Failed to replace {:?}: {}", self.path, e)))
    }
}
