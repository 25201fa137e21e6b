use std::fs;
use std::path::PathBuf;
use std::sync::Arc;

use super::conf::OdooConf;
use crate::config::{InstanceDefaults, LauncherConfig, PortsConfig};
use crate::database::{ensure_role, EngineHandle};
use crate::error::{AppError, Result};
use crate::paths::Paths;
use crate::port::find_free_port_excluding;
use crate::process::is_instance_alive;
use crate::progress::Reporter;
use crate::registry::{Instance, InstanceStatus, RegistryStore};
use crate::runtime::RuntimeProvisioner;
use crate::validation::{role_name_for, validate_instance_name, validate_version_tag};

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CreateInstanceRequest {
    pub name: String,
    pub version: String,
    pub database_port: Option<u16>,
    pub application_port: Option<u16>,
}

impl CreateInstanceRequest {
    pub fn new(name: impl Into<String>, version: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            version: version.into(),
            database_port: None,
            application_port: None,
        }
    }
}

/// Creates, lists and deletes registered instances.
pub struct InstanceFactory {
    paths: Paths,
    store: Arc<RegistryStore>,
    provisioner: Arc<dyn RuntimeProvisioner>,
    ports: PortsConfig,
    defaults: InstanceDefaults,
    superuser: String,
}

impl InstanceFactory {
    pub fn new(
        paths: Paths,
        store: Arc<RegistryStore>,
        provisioner: Arc<dyn RuntimeProvisioner>,
        config: &LauncherConfig,
    ) -> Self {
        Self {
            paths,
            store,
            provisioner,
            ports: config.ports.clone(),
            defaults: config.instance.clone(),
            superuser: config.database.superuser.clone(),
        }
    }

    pub fn store(&self) -> &Arc<RegistryStore> {
        &self.store
    }

    pub async fn create_instance(
        &self,
        request: CreateInstanceRequest,
        engine: Option<&EngineHandle>,
        reporter: &Reporter,
    ) -> Result<Instance> {
        validate_instance_name(&request.name)?;
        validate_version_tag(&request.version)?;
        if self.store.load()?.contains(&request.name) {
            return Err(AppError::instance_exists(&request.name));
        }

        let runtime_dir = self
            .provisioner
            .ensure_version(&request.version, reporter)
            .await?;

        let application_port = match request.application_port {
            Some(port) => port,
            None => {
                let taken = self.store.load()?.application_ports();
                find_free_port_excluding(self.ports.application_range(), &taken)?
            }
        };
        let database_port = request
            .database_port
            .or(engine.map(|handle| handle.port))
            .unwrap_or(self.ports.database_default);

        let instance_dir = self.paths.instance_dir(&request.name);
        for sub in ["addons", "logs", "data"] {
            let dir = instance_dir.join(sub);
            fs::create_dir_all(&dir)
                .map_err(|e| AppError::io(format!("Failed to create {:?}: {}", dir, e)))?;
        }

        let db_user = match engine {
            Some(_) => role_name_for(&request.name),
            None => self.defaults.db_user.clone(),
        };
        let conf = OdooConf {
            addons_path: vec![runtime_dir.join("addons"), instance_dir.join("addons")],
            admin_passwd: self.defaults.admin_password.clone(),
            db_host: engine.map(|_| "127.0.0.1".to_string()),
            db_port: database_port,
            db_user: db_user.clone(),
            db_password: self.defaults.db_password.clone(),
            http_port: application_port,
            logfile: self.paths.instance_log_path(&request.name),
            data_dir: instance_dir.join("data"),
        };
        conf.write(&self.paths.instance_config_path(&request.name))?;
        reporter.log(format!(
            "Wrote {}",
            self.paths.instance_config_path(&request.name).display()
        ));

        if let Some(handle) = engine {
            if let Err(e) = ensure_role(
                handle,
                &self.superuser,
                &db_user,
                &self.defaults.db_password,
                reporter,
            )
            .await
            {
                reporter.warn(format!("Warning: could not create database role {}: {}", db_user, e));
            }
        }

        let instance = Instance {
            name: request.name.clone(),
            version: request.version.clone(),
            path: instance_dir,
            application_port,
            database_port,
            status: InstanceStatus::Stopped,
            pid: None,
            process_started: None,
            created_at: Some(chrono::Utc::now().to_rfc3339()),
        };

        let entry = instance.clone();
        self.store.with_registry_mut(move |registry| {
            if registry.contains(&entry.name) {
                return Err(AppError::instance_exists(&entry.name));
            }
            if registry.application_ports().contains(&entry.application_port) {
                return Err(AppError::port_occupied(entry.application_port));
            }
            registry.instances.push(entry);
            Ok(())
        })?;

        reporter.log(format!(
            "Instance {} created (Odoo {}, port {})",
            instance.name, instance.version, instance.application_port
        ));
        Ok(instance)
    }

    /// Remove `name` from the registry and delete its directory.
    /// Returns `false` when no such instance was registered.
    pub fn delete_instance(&self, name: &str) -> Result<bool> {
        let removed = self.store.with_registry_mut(|registry| {
            if registry.get(name).is_some_and(is_instance_alive) {
                return Err(AppError::instance_running(name));
            }
            Ok(registry.remove(name))
        })?;
        if !removed {
            return Ok(false);
        }

        let instance_dir = self.paths.instance_dir(name);
        match fs::remove_dir_all(&instance_dir) {
            Ok(()) => {}
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
            Err(e) => {
                return Err(AppError::io(format!(
                    "Failed to remove {:?}: {}",
                    instance_dir, e
                )))
            }
        }
        log::info!("Instance {} deleted", name);
        Ok(true)
    }

    pub fn list_instances(&self) -> Result<Vec<Instance>> {
        Ok(self.store.load()?.instances)
    }

    pub fn get_instance(&self, name: &str) -> Result<Instance> {
        self.store
            .load()?
            .get(name)
            .cloned()
            .ok_or_else(|| AppError::instance_not_found(name))
    }

    /// Odoo's own log file for a registered instance.
    pub fn instance_log_path(&self, name: &str) -> Result<PathBuf> {
        let instance = self.get_instance(name)?;
        Ok(instance.path.join("logs").join("odoo.log"))
    }
}
