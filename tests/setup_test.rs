//! Full setup through the public API, with the engine and runtime stubbed.

use std::fs;
use std::path::PathBuf;
use std::sync::Arc;

use async_trait::async_trait;

use odoo_launcher_lib::config::LauncherConfig;
use odoo_launcher_lib::database::{DatabaseBootstrapper, EngineHandle};
use odoo_launcher_lib::instance::{conf_value, InstanceFactory};
use odoo_launcher_lib::paths::Paths;
use odoo_launcher_lib::pipeline::{spawn_full_setup, InstallPipeline, SetupRequest};
use odoo_launcher_lib::progress::{Reporter, SetupEvent, StopFlag};
use odoo_launcher_lib::registry::{InstanceStatus, RegistryStore};
use odoo_launcher_lib::runtime::RuntimeProvisioner;
use odoo_launcher_lib::{AppError, ErrorKind, Result};

struct NoEngine;

#[async_trait]
impl DatabaseBootstrapper for NoEngine {
    async fn ensure_engine(&self, reporter: &Reporter) -> Result<Option<EngineHandle>> {
        reporter.log("using system PostgreSQL");
        Ok(None)
    }

    async fn stop_engine(&self) -> Result<()> {
        Ok(())
    }

    async fn is_running(&self) -> bool {
        false
    }
}

/// Lays out a runtime directory the way a real clone would.
struct FakeRuntime {
    versions: PathBuf,
    known: Vec<&'static str>,
}

#[async_trait]
impl RuntimeProvisioner for FakeRuntime {
    async fn ensure_version(&self, version: &str, _reporter: &Reporter) -> Result<PathBuf> {
        if !self.known.contains(&version) {
            return Err(AppError::fetch_failed(version, "Remote branch not found"));
        }
        let dir = self.versions.join(version);
        fs::create_dir_all(dir.join("addons")).map_err(AppError::from)?;
        fs::write(dir.join("odoo-bin"), "").map_err(AppError::from)?;
        Ok(dir)
    }
}

struct Harness {
    _tmp: tempfile::TempDir,
    paths: Paths,
    factory: Arc<InstanceFactory>,
    pipeline: Arc<InstallPipeline>,
}

fn harness() -> Harness {
    let tmp = tempfile::tempdir().unwrap();
    let paths = Paths::new(tmp.path());
    paths.ensure_data_dirs().unwrap();
    let config = LauncherConfig::default();
    let store = Arc::new(RegistryStore::new(
        paths.registry_path(),
        config.ports.database_default,
    ));
    let runtime: Arc<dyn RuntimeProvisioner> = Arc::new(FakeRuntime {
        versions: paths.versions_dir(),
        known: vec!["16.0", "17.0"],
    });
    let factory = Arc::new(InstanceFactory::new(
        paths.clone(),
        store,
        Arc::clone(&runtime),
        &config,
    ));
    let pipeline = Arc::new(InstallPipeline::new(
        Arc::new(NoEngine),
        runtime,
        Arc::clone(&factory),
    ));
    Harness {
        _tmp: tmp,
        paths,
        factory,
        pipeline,
    }
}

fn request(name: &str, version: &str) -> SetupRequest {
    SetupRequest {
        version: version.to_string(),
        name: name.to_string(),
        database_port: Some(5433),
    }
}

async fn drain(
    handle: tokio::task::JoinHandle<Result<odoo_launcher_lib::registry::Instance>>,
    mut events: tokio::sync::mpsc::UnboundedReceiver<SetupEvent>,
) -> (Vec<SetupEvent>, Result<odoo_launcher_lib::registry::Instance>) {
    let mut seen = Vec::new();
    while let Some(event) = events.recv().await {
        seen.push(event);
    }
    (seen, handle.await.unwrap())
}

#[tokio::test]
async fn acme_on_17_is_created_registered_and_configured() {
    let h = harness();
    let (handle, events) = spawn_full_setup(
        Arc::clone(&h.pipeline),
        request("acme", "17.0"),
        StopFlag::new(),
    );
    let (events, result) = drain(handle, events).await;
    let instance = result.unwrap();

    assert_eq!(events.last(), Some(&SetupEvent::Completed));
    assert_eq!(instance.version, "17.0");
    assert_eq!(instance.database_port, 5433);
    assert_eq!(instance.status, InstanceStatus::Stopped);

    let dir = h.paths.instance_dir("acme");
    for sub in ["addons", "logs", "data"] {
        assert!(dir.join(sub).is_dir(), "missing {}", sub);
    }

    let conf = fs::read_to_string(dir.join("odoo.conf")).unwrap();
    assert_eq!(conf_value(&conf, "db_port"), Some("5433"));
    assert_eq!(conf_value(&conf, "db_host"), Some("False"));
    assert_eq!(
        conf_value(&conf, "http_port"),
        Some(instance.application_port.to_string().as_str())
    );
    let addons = conf_value(&conf, "addons_path").unwrap();
    assert!(addons.contains(&h.paths.version_dir("17.0").join("addons").display().to_string()));
    assert!(addons.contains(&dir.join("addons").display().to_string()));

    let raw = fs::read_to_string(h.paths.registry_path()).unwrap();
    let doc: serde_json::Value = serde_json::from_str(&raw).unwrap();
    assert_eq!(doc["instances"][0]["name"], "acme");
    assert_eq!(doc["instances"][0]["applicationPort"], instance.application_port);
}

#[tokio::test]
async fn second_instance_gets_its_own_port_and_duplicates_are_refused() {
    let h = harness();
    let first = h
        .pipeline
        .run_full_setup(request("acme", "17.0"), &Reporter::silent(), &StopFlag::new())
        .await
        .unwrap();
    let second = h
        .pipeline
        .run_full_setup(request("beta", "16.0"), &Reporter::silent(), &StopFlag::new())
        .await
        .unwrap();
    assert_ne!(first.application_port, second.application_port);

    let err = h
        .pipeline
        .run_full_setup(request("acme", "16.0"), &Reporter::silent(), &StopFlag::new())
        .await
        .unwrap_err();
    assert_eq!(err.kind(), ErrorKind::InstanceExists);
    assert_eq!(h.factory.list_instances().unwrap().len(), 2);
}

#[tokio::test]
async fn unknown_version_fails_without_registering_anything() {
    let h = harness();
    let (handle, events) = spawn_full_setup(
        Arc::clone(&h.pipeline),
        request("acme", "99.0"),
        StopFlag::new(),
    );
    let (events, result) = drain(handle, events).await;

    let err = result.unwrap_err();
    assert_eq!(err.kind(), ErrorKind::FetchFailed);
    assert!(matches!(events.last(), Some(SetupEvent::Failed { .. })));
    assert!(h.factory.list_instances().unwrap().is_empty());
    assert!(!h.paths.instance_dir("acme").exists());
}

#[tokio::test]
async fn deleted_instance_leaves_no_trace() {
    let h = harness();
    h.pipeline
        .run_full_setup(request("acme", "17.0"), &Reporter::silent(), &StopFlag::new())
        .await
        .unwrap();

    assert!(h.factory.delete_instance("acme").unwrap());
    assert!(!h.paths.instance_dir("acme").exists());
    assert!(h.factory.list_instances().unwrap().is_empty());
    assert!(!h.factory.delete_instance("acme").unwrap());
    assert_eq!(
        h.factory.get_instance("acme").unwrap_err().kind(),
        ErrorKind::InstanceNotFound
    );
}
