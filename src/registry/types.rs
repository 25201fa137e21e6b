use std::collections::HashSet;
use std::fmt;
use std::path::PathBuf;

use serde::{Deserialize, Serialize};

pub const REGISTRY_SCHEMA_VERSION: u32 = 2;

/// Advisory run state, updated by launcher actions only.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum InstanceStatus {
    #[default]
    Stopped,
    Running,
}

impl fmt::Display for InstanceStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Stopped => f.write_str("stopped"),
            Self::Running => f.write_str("running"),
        }
    }
}

/// One named Odoo deployment.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Instance {
    pub name: String,
    pub version: String,
    pub path: PathBuf,
    pub application_port: u16,
    pub database_port: u16,
    #[serde(default)]
    pub status: InstanceStatus,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub pid: Option<u32>,
    /// Start time of `pid` as seen when it was launched; a PID whose start
    /// time no longer matches was recycled by the OS.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub process_started: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub created_at: Option<String>,
}

impl Instance {
    pub fn config_path(&self) -> PathBuf {
        self.path.join("odoo.conf")
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Registry {
    #[serde(default)]
    pub schema_version: u32,
    #[serde(default)]
    pub instances: Vec<Instance>,
}

impl Default for Registry {
    fn default() -> Self {
        Self {
            schema_version: REGISTRY_SCHEMA_VERSION,
            instances: Vec::new(),
        }
    }
}

impl Registry {
    pub fn get(&self, name: &str) -> Option<&Instance> {
        self.instances.iter().find(|inst| inst.name == name)
    }

    pub fn get_mut(&mut self, name: &str) -> Option<&mut Instance> {
        self.instances.iter_mut().find(|inst| inst.name == name)
    }

    pub fn contains(&self, name: &str) -> bool {
        self.get(name).is_some()
    }

    /// Remove every entry named `name`; returns whether any matched.
    pub fn remove(&mut self, name: &str) -> bool {
        let before = self.instances.len();
        self.instances.retain(|inst| inst.name != name);
        self.instances.len() != before
    }

    /// Application ports already handed out to registered instances.
    pub fn application_ports(&self) -> HashSet<u16> {
        self.instances
            .iter()
            .map(|inst| inst.application_port)
            .collect()
    }
}
