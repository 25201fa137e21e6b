use std::fs::{self, OpenOptions};
use std::path::{Path, PathBuf};
use std::process::{Command, Stdio};
use std::sync::Arc;
use std::time::Duration;

use super::control::{graceful_shutdown, is_process_alive, process_start_token};
use super::GRACEFUL_SHUTDOWN_TIMEOUT;
use crate::config::LauncherConfig;
use crate::error::{AppError, Result};
use crate::paths::{get_venv_python, Paths};
use crate::port::check_port_available;
use crate::registry::{Instance, InstanceStatus, RegistryStore};

/// Interpreter for a runtime: its venv python, else the host interpreter.
fn resolve_python(runtime_dir: &Path, host_python: &str) -> PathBuf {
    let venv_python = get_venv_python(&runtime_dir.join("venv"));
    if venv_python.exists() {
        venv_python
    } else {
        log::warn!(
            "No virtual environment in {:?}, falling back to {}",
            runtime_dir,
            host_python
        );
        PathBuf::from(host_python)
    }
}

/// Whether the process recorded for `instance` is still the one the launcher
/// started. A PID without a matching start time is stale.
pub fn is_instance_alive(instance: &Instance) -> bool {
    let Some(pid) = instance.pid else {
        return false;
    };
    if !is_process_alive(pid) {
        return false;
    }
    match (&instance.process_started, process_start_token(pid)) {
        (Some(recorded), Some(current)) => *recorded == current,
        _ => false,
    }
}

/// Spawn Odoo for `instance` and mark it running.
///
/// The child runs in its own process group with output appended to
/// `logs/launcher.log`; it is not supervised after the spawn.
pub fn start_instance(instance: &mut Instance, paths: &Paths, host_python: &str) -> Result<u32> {
    let runtime_dir = paths.version_dir(&instance.version);
    let odoo_bin = runtime_dir.join("odoo-bin");
    if !odoo_bin.is_file() {
        return Err(AppError::io(format!(
            "Odoo {} is not provisioned: {:?} is missing",
            instance.version, odoo_bin
        )));
    }

    check_port_available(instance.application_port)?;

    let log_dir = instance.path.join("logs");
    fs::create_dir_all(&log_dir)
        .map_err(|e| AppError::io(format!("Failed to create {:?}: {}", log_dir, e)))?;
    let log_path = log_dir.join("launcher.log");
    let stdout = OpenOptions::new()
        .create(true)
        .append(true)
        .open(&log_path)
        .map_err(|e| AppError::io(format!("Failed to open {:?}: {}", log_path, e)))?;
    let stderr = stdout.try_clone().map_err(|e| AppError::io(e.to_string()))?;

    let python = resolve_python(&runtime_dir, host_python);
    let mut cmd = Command::new(&python);
    cmd.arg(&odoo_bin)
        .arg("-c")
        .arg(instance.config_path())
        .current_dir(&runtime_dir)
        .env("PYTHONUNBUFFERED", "1")
        .env_remove("PYTHONHOME")
        .stdin(Stdio::null())
        .stdout(stdout)
        .stderr(stderr);

    #[cfg(target_os = "windows")]
    {
        use std::os::windows::process::CommandExt as _;
        use windows::Win32::System::Threading::CREATE_NO_WINDOW;
        cmd.creation_flags(CREATE_NO_WINDOW.0);
    }

    #[cfg(unix)]
    {
        use std::os::unix::process::CommandExt as _;
        cmd.process_group(0);
    }

    let mut child = cmd
        .spawn()
        .map_err(|e| AppError::process(format!("Failed to start instance {}: {}", instance.name, e)))?;
    let pid = child.id();
    let started = process_start_token(pid);
    if started.is_none() {
        log::warn!("Cannot read start time of pid {}; it will not be signalled later", pid);
    }

    // Reap the child if it exits while this process is still around.
    let name = instance.name.clone();
    std::thread::spawn(move || {
        if let Ok(status) = child.wait() {
            log::info!("Instance {} process exited ({})", name, status);
        }
    });

    log::info!(
        "Instance {} started (pid: {}, port: {})",
        instance.name,
        pid,
        instance.application_port
    );
    instance.status = InstanceStatus::Running;
    instance.pid = Some(pid);
    instance.process_started = started;
    Ok(pid)
}

/// Terminate the instance's process tree and mark it stopped.
///
/// Without a live, matching PID only the status is reset.
pub async fn stop_instance(instance: &mut Instance, timeout: Duration) -> Result<()> {
    match instance.pid {
        Some(pid) if is_instance_alive(instance) => {
            tokio::task::spawn_blocking(move || graceful_shutdown(&[pid], timeout))
                .await
                .map_err(|e| AppError::process(format!("Failed to wait for graceful shutdown: {}", e)))?;
            log::info!("Instance {} stopped (pid: {})", instance.name, pid);
        }
        Some(pid) => log::info!("Instance {}: pid {} is stale, resetting status", instance.name, pid),
        None => {}
    }
    instance.status = InstanceStatus::Stopped;
    instance.pid = None;
    instance.process_started = None;
    Ok(())
}

/// Start/stop by name, persisting the resulting status in the registry.
///
/// The registry write happens after the process action, so a crash in
/// between leaves a stale status behind.
#[derive(Debug, Clone)]
pub struct Launcher {
    paths: Paths,
    store: Arc<RegistryStore>,
    host_python: String,
    stop_timeout: Duration,
}

impl Launcher {
    pub fn new(paths: Paths, store: Arc<RegistryStore>, config: &LauncherConfig) -> Self {
        Self {
            paths,
            store,
            host_python: config.python.clone(),
            stop_timeout: GRACEFUL_SHUTDOWN_TIMEOUT,
        }
    }

    pub fn with_stop_timeout(mut self, timeout: Duration) -> Self {
        self.stop_timeout = timeout;
        self
    }

    fn lookup(&self, name: &str) -> Result<Instance> {
        self.store
            .load()?
            .get(name)
            .cloned()
            .ok_or_else(|| AppError::instance_not_found(name))
    }

    fn persist(&self, instance: &Instance) -> Result<()> {
        self.store.with_registry_mut(|registry| {
            let entry = registry
                .get_mut(&instance.name)
                .ok_or_else(|| AppError::instance_not_found(&instance.name))?;
            entry.status = instance.status;
            entry.pid = instance.pid;
            entry.process_started.clone_from(&instance.process_started);
            Ok(())
        })
    }

    pub fn start(&self, name: &str) -> Result<Instance> {
        let mut instance = self.lookup(name)?;
        if is_instance_alive(&instance) {
            return Err(AppError::instance_running(name));
        }
        start_instance(&mut instance, &self.paths, &self.host_python)?;
        self.persist(&instance)?;
        Ok(instance)
    }

    pub async fn stop(&self, name: &str) -> Result<Instance> {
        let mut instance = self.lookup(name)?;
        stop_instance(&mut instance, self.stop_timeout).await?;
        self.persist(&instance)?;
        Ok(instance)
    }

    /// Whether the recorded process for `name` is still alive.
    pub fn is_alive(&self, name: &str) -> Result<bool> {
        Ok(is_instance_alive(&self.lookup(name)?))
    }
}
