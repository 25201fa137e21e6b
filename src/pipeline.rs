//! One-shot full setup: database engine, runtime, instance.

use std::fmt;
use std::sync::Arc;

use tokio::sync::mpsc;
use tokio::task::JoinHandle;

use crate::database::DatabaseBootstrapper;
use crate::error::{AppError, Result};
use crate::instance::{CreateInstanceRequest, InstanceFactory};
use crate::progress::{Reporter, SetupEvent, StopFlag};
use crate::registry::Instance;
use crate::runtime::RuntimeProvisioner;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SetupPhase {
    Init,
    DatabaseReady,
    RuntimeReady,
    InstanceCreated,
    Done,
    Failed,
}

impl fmt::Display for SetupPhase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Init => "init",
            Self::DatabaseReady => "database_ready",
            Self::RuntimeReady => "runtime_ready",
            Self::InstanceCreated => "instance_created",
            Self::Done => "done",
            Self::Failed => "failed",
        };
        f.write_str(name)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SetupRequest {
    pub version: String,
    pub name: String,
    pub database_port: Option<u16>,
}

pub struct InstallPipeline {
    bootstrapper: Arc<dyn DatabaseBootstrapper>,
    provisioner: Arc<dyn RuntimeProvisioner>,
    factory: Arc<InstanceFactory>,
}

impl InstallPipeline {
    pub fn new(
        bootstrapper: Arc<dyn DatabaseBootstrapper>,
        provisioner: Arc<dyn RuntimeProvisioner>,
        factory: Arc<InstanceFactory>,
    ) -> Self {
        Self {
            bootstrapper,
            provisioner,
            factory,
        }
    }

    /// Database → runtime → instance. Failures are reported through
    /// `reporter` and returned unchanged; nothing is rolled back.
    pub async fn run_full_setup(
        &self,
        request: SetupRequest,
        reporter: &Reporter,
        stop: &StopFlag,
    ) -> Result<Instance> {
        match self.run_phases(request, reporter, stop).await {
            Ok(instance) => {
                reporter.completed();
                Ok(instance)
            }
            Err(e) => {
                let message = e.to_string();
                log::error!("Setup {}: {}", SetupPhase::Failed, message);
                reporter.log(format!("Error: {}", message));
                reporter.failed(&message);
                Err(e)
            }
        }
    }

    async fn run_phases(
        &self,
        request: SetupRequest,
        reporter: &Reporter,
        stop: &StopFlag,
    ) -> Result<Instance> {
        let checkpoint = |phase: SetupPhase| -> Result<()> {
            if stop.is_stop_requested() {
                return Err(AppError::cancelled(&phase.to_string()));
            }
            Ok(())
        };

        checkpoint(SetupPhase::Init)?;
        reporter.progress(5, "Starting PostgreSQL...");
        let engine = self.bootstrapper.ensure_engine(reporter).await?;
        reporter.progress(15, "PostgreSQL ready");

        checkpoint(SetupPhase::DatabaseReady)?;
        reporter.progress(30, &format!("Fetching Odoo {}...", request.version));
        self.provisioner
            .ensure_version(&request.version, reporter)
            .await?;
        reporter.progress(60, &format!("Odoo {} ready", request.version));

        checkpoint(SetupPhase::RuntimeReady)?;
        reporter.progress(70, &format!("Creating instance {}...", request.name));
        let create = CreateInstanceRequest {
            name: request.name,
            version: request.version,
            database_port: request.database_port,
            application_port: None,
        };
        let instance = self
            .factory
            .create_instance(create, engine.as_ref(), reporter)
            .await?;
        reporter.progress(90, &format!("Instance {} created", instance.name));

        if stop.is_stop_requested() {
            log::info!(
                "Stop requested after {}; instance {} is already registered",
                SetupPhase::InstanceCreated,
                instance.name
            );
        }
        reporter.progress(
            100,
            &format!(
                "Done: {} on http://localhost:{}",
                instance.name, instance.application_port
            ),
        );
        Ok(instance)
    }
}

/// Run the full setup on its own task. Events arrive on the receiver until
/// the task ends; the last one is `Completed` or `Failed`.
pub fn spawn_full_setup(
    pipeline: Arc<InstallPipeline>,
    request: SetupRequest,
    stop: StopFlag,
) -> (JoinHandle<Result<Instance>>, mpsc::UnboundedReceiver<SetupEvent>) {
    let (tx, rx) = mpsc::unbounded_channel();
    let handle = tokio::spawn(async move {
        let reporter = Reporter::new(Arc::new(tx));
        pipeline.run_full_setup(request, &reporter, &stop).await
    });
    (handle, rx)
}

#[cfg(test)]
mod tests {
    use std::path::{Path, PathBuf};
    use std::sync::atomic::{AtomicUsize, Ordering};

    use async_trait::async_trait;

    use super::*;
    use crate::config::LauncherConfig;
    use crate::database::EngineHandle;
    use crate::error::ErrorKind;
    use crate::paths::Paths;
    use crate::progress::{EventSink, RecordingSink};
    use crate::registry::RegistryStore;

    #[derive(Default)]
    struct StubDatabase {
        fail: bool,
        calls: AtomicUsize,
    }

    #[async_trait]
    impl DatabaseBootstrapper for StubDatabase {
        async fn ensure_engine(&self, _reporter: &Reporter) -> Result<Option<EngineHandle>> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            if self.fail {
                Err(AppError::engine_start_failed("port 5433 in use"))
            } else {
                Ok(None)
            }
        }

        async fn stop_engine(&self) -> Result<()> {
            Ok(())
        }

        async fn is_running(&self) -> bool {
            false
        }
    }

    /// Requests a stop on the given (1-based) `ensure_version` call.
    struct StubRuntime {
        root: PathBuf,
        stop_after: Option<(StopFlag, usize)>,
        calls: AtomicUsize,
    }

    #[async_trait]
    impl RuntimeProvisioner for StubRuntime {
        async fn ensure_version(&self, version: &str, reporter: &Reporter) -> Result<PathBuf> {
            reporter.log(format!("cloning {}", version));
            let call = self.calls.fetch_add(1, Ordering::SeqCst) + 1;
            if let Some((stop, on_call)) = &self.stop_after {
                if call == *on_call {
                    stop.request_stop();
                }
            }
            let dir = self.root.join("versions").join(version);
            std::fs::create_dir_all(&dir).unwrap();
            Ok(dir)
        }
    }

    fn pipeline(
        root: &Path,
        db: StubDatabase,
        stop_after: Option<(StopFlag, usize)>,
    ) -> InstallPipeline {
        let paths = Paths::new(root);
        let store = Arc::new(RegistryStore::new(paths.registry_path(), 5433));
        let runtime: Arc<dyn RuntimeProvisioner> = Arc::new(StubRuntime {
            root: root.to_path_buf(),
            stop_after,
            calls: AtomicUsize::new(0),
        });
        let factory = Arc::new(InstanceFactory::new(
            paths,
            store,
            Arc::clone(&runtime),
            &LauncherConfig::default(),
        ));
        InstallPipeline::new(Arc::new(db), runtime, factory)
    }

    fn request() -> SetupRequest {
        SetupRequest {
            version: "17.0".to_string(),
            name: "acme".to_string(),
            database_port: Some(5433),
        }
    }

    fn recording() -> (Arc<RecordingSink>, Reporter) {
        let sink = Arc::new(RecordingSink::default());
        let reporter = Reporter::new(Arc::clone(&sink) as Arc<dyn EventSink>);
        (sink, reporter)
    }

    #[tokio::test]
    async fn progress_hits_every_checkpoint_in_order() {
        let tmp = tempfile::tempdir().unwrap();
        let (sink, reporter) = recording();
        let instance = pipeline(tmp.path(), StubDatabase::default(), None)
            .run_full_setup(request(), &reporter, &StopFlag::new())
            .await
            .unwrap();

        assert_eq!(sink.percentages(), vec![5, 15, 30, 60, 70, 90, 100]);
        assert!(sink.log_lines().iter().any(|l| l == "cloning 17.0"));
        assert_eq!(sink.events().last(), Some(&SetupEvent::Completed));
        assert_eq!(instance.database_port, 5433);
        assert!((8069..=8999).contains(&instance.application_port));
    }

    #[tokio::test]
    async fn failure_is_reported_and_returned_unchanged() {
        let tmp = tempfile::tempdir().unwrap();
        let (sink, reporter) = recording();
        let db = StubDatabase {
            fail: true,
            ..StubDatabase::default()
        };
        let err = pipeline(tmp.path(), db, None)
            .run_full_setup(request(), &reporter, &StopFlag::new())
            .await
            .unwrap_err();

        assert_eq!(err.kind(), ErrorKind::EngineStartFailed);
        assert_eq!(sink.percentages(), vec![5]);
        assert!(sink.log_lines().iter().any(|l| l.starts_with("Error: ")));
        assert_eq!(
            sink.events().last(),
            Some(&SetupEvent::Failed {
                error: err.to_string()
            })
        );
    }

    #[tokio::test]
    async fn stop_before_start_does_nothing() {
        let tmp = tempfile::tempdir().unwrap();
        let db = Arc::new(StubDatabase::default());
        let paths = Paths::new(tmp.path());
        let store = Arc::new(RegistryStore::new(paths.registry_path(), 5433));
        let runtime: Arc<dyn RuntimeProvisioner> = Arc::new(StubRuntime {
            root: tmp.path().to_path_buf(),
            stop_after: None,
            calls: AtomicUsize::new(0),
        });
        let factory = Arc::new(InstanceFactory::new(
            paths,
            store,
            Arc::clone(&runtime),
            &LauncherConfig::default(),
        ));
        let pipeline = InstallPipeline::new(Arc::clone(&db) as Arc<dyn DatabaseBootstrapper>, runtime, factory);

        let stop = StopFlag::new();
        stop.request_stop();
        let err = pipeline
            .run_full_setup(request(), &Reporter::silent(), &stop)
            .await
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Cancelled);
        assert_eq!(db.calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn in_flight_phase_finishes_then_pipeline_stops() {
        let tmp = tempfile::tempdir().unwrap();
        let stop = StopFlag::new();
        let (sink, reporter) = recording();
        let err = pipeline(tmp.path(), StubDatabase::default(), Some((stop.clone(), 1)))
            .run_full_setup(request(), &reporter, &stop)
            .await
            .unwrap_err();

        assert_eq!(err.kind(), ErrorKind::Cancelled);
        assert_eq!(err.payload("phase"), Some("runtime_ready"));
        assert_eq!(sink.percentages(), vec![5, 15, 30, 60]);
        assert!(!tmp.path().join("instances").join("acme").exists());
    }

    #[tokio::test]
    async fn stop_during_instance_creation_still_completes() {
        let tmp = tempfile::tempdir().unwrap();
        let stop = StopFlag::new();
        let (sink, reporter) = recording();
        // Call 2 is the factory's own runtime check inside phase 3.
        let pipeline = pipeline(tmp.path(), StubDatabase::default(), Some((stop.clone(), 2)));
        let instance = pipeline
            .run_full_setup(request(), &reporter, &stop)
            .await
            .unwrap();

        assert!(stop.is_stop_requested());
        assert_eq!(instance.name, "acme");
        assert_eq!(sink.percentages(), vec![5, 15, 30, 60, 70, 90, 100]);
        assert_eq!(sink.events().last(), Some(&SetupEvent::Completed));
        assert_eq!(pipeline.factory.list_instances().unwrap().len(), 1);
    }

    #[tokio::test]
    async fn spawned_setup_streams_events() {
        let tmp = tempfile::tempdir().unwrap();
        let pipeline = Arc::new(pipeline(tmp.path(), StubDatabase::default(), None));
        let (handle, mut events) = spawn_full_setup(pipeline, request(), StopFlag::new());

        let mut percentages = Vec::new();
        let mut last = None;
        while let Some(event) = events.recv().await {
            if let SetupEvent::Progress { percent, .. } = &event {
                percentages.push(*percent);
            }
            last = Some(event);
        }
        assert_eq!(percentages, vec![5, 15, 30, 60, 70, 90, 100]);
        assert_eq!(last, Some(SetupEvent::Completed));
        assert_eq!(handle.await.unwrap().unwrap().name, "acme");
    }
}
