use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use async_trait::async_trait;
use reqwest::Client;
use tokio::sync::Mutex;

use super::binaries::{host_target, prebuilt_release};
use super::vendor::{resolve_vendor_release, VendorRelease};
use super::{DatabaseBootstrapper, EngineHandle, EngineKind};
use crate::archive::{extract_flat, ArchiveFormat};
use crate::command::{run_streaming, tool_command};
use crate::config::DatabaseConfig;
use crate::download::download_cached;
use crate::error::{AppError, Result};
use crate::paths::{exe_name, find_on_path, Paths};
use crate::progress::Reporter;

/// Label used in the cache file name for a configured archive URL.
const CUSTOM_ARCHIVE_LABEL: &str = "custom";

/// A directory whose children named `<prefix>*` may hold a `bin/pg_ctl`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SearchRoot {
    pub parent: PathBuf,
    pub prefix: String,
}

impl SearchRoot {
    pub fn new(parent: impl Into<PathBuf>, prefix: &str) -> Self {
        Self {
            parent: parent.into(),
            prefix: prefix.to_string(),
        }
    }

    /// Well-known install locations of server packages.
    pub fn defaults() -> Vec<Self> {
        vec![
            Self::new("/usr/lib/postgresql", ""),
            Self::new("/usr", "pgsql-"),
            Self::new("/opt/homebrew/opt", "postgresql"),
            Self::new("/usr/local/opt", "postgresql"),
        ]
    }
}

/// Leading number of a versioned directory name (`pgsql-16` → 16).
fn version_key(name: &str, prefix: &str) -> (u32, String) {
    let rest = name.strip_prefix(prefix).unwrap_or(name);
    let digits: String = rest
        .trim_start_matches(|c: char| !c.is_ascii_digit())
        .chars()
        .take_while(char::is_ascii_digit)
        .collect();
    (digits.parse().unwrap_or(0), name.to_string())
}

/// `bin/` of the newest server distribution found under `roots`.
pub fn find_local_distribution(roots: &[SearchRoot]) -> Option<PathBuf> {
    let pg_ctl = exe_name("pg_ctl");
    let mut found: Vec<((u32, String), PathBuf)> = Vec::new();

    for root in roots {
        let Ok(entries) = fs::read_dir(&root.parent) else {
            continue;
        };
        for entry in entries.flatten() {
            let name = entry.file_name().to_string_lossy().into_owned();
            if !name.starts_with(&root.prefix) {
                continue;
            }
            let bin = entry.path().join("bin");
            if bin.join(&pg_ctl).is_file() {
                found.push((version_key(&name, &root.prefix), bin));
            }
        }
    }

    found.into_iter().max_by(|a, b| a.0.cmp(&b.0)).map(|(_, bin)| bin)
}

/// Require `bin/initdb` and `bin/pg_ctl` under `root`.
pub fn verify_engine_dir(root: &Path) -> Result<()> {
    for tool in ["initdb", "pg_ctl"] {
        let path = root.join("bin").join(exe_name(tool));
        if !path.is_file() {
            return Err(AppError::invalid_engine_archive(format!(
                "missing {}",
                path.display()
            )));
        }
    }
    Ok(())
}

fn platform_tag() -> String {
    let arch = match std::env::consts::ARCH {
        "x86_64" => "x64",
        "aarch64" => "arm64",
        other => other,
    };
    format!("{}-{}", std::env::consts::OS, arch)
}

fn cache_file_name(version: &str, format: ArchiveFormat) -> String {
    format!("postgresql-{}-{}.{}", version, platform_tag(), format.extension())
}

#[derive(Debug, Default)]
struct Held {
    handle: Option<EngineHandle>,
    /// Whether `pg_ctl start` ran in this process, as opposed to adopting a
    /// cluster that was already up.
    started_here: bool,
}

/// Owns the launcher-managed PostgreSQL cluster.
#[derive(Debug)]
pub struct PostgresBootstrapper {
    paths: Paths,
    client: Client,
    config: DatabaseConfig,
    github_proxy: String,
    detect_system: bool,
    search_roots: Vec<SearchRoot>,
    held: Mutex<Held>,
}

impl PostgresBootstrapper {
    pub fn new(paths: Paths, client: Client, config: DatabaseConfig) -> Self {
        Self {
            paths,
            client,
            config,
            github_proxy: String::new(),
            detect_system: true,
            search_roots: SearchRoot::defaults(),
            held: Mutex::new(Held::default()),
        }
    }

    /// Route prebuilt-build downloads through a GitHub proxy.
    pub fn with_github_proxy(mut self, proxy: &str) -> Self {
        self.github_proxy = proxy.to_string();
        self
    }

    /// Never treat a `psql` on `PATH` as a usable system engine.
    pub fn without_system_detection(mut self) -> Self {
        self.detect_system = false;
        self
    }

    pub fn with_search_roots(mut self, roots: Vec<SearchRoot>) -> Self {
        self.search_roots = roots;
        self
    }

    pub fn superuser(&self) -> &str {
        &self.config.superuser
    }

    fn data_dir(&self) -> PathBuf {
        self.paths.postgres_dir().join("data")
    }

    fn server_log(&self) -> PathBuf {
        self.paths.postgres_dir().join("postgres.log")
    }

    fn uses_portable(&self) -> bool {
        cfg!(target_os = "windows") || !self.config.archive_url.is_empty()
    }

    /// Download (or reuse) and unpack the portable distribution.
    async fn ensure_portable(&self, reporter: &Reporter) -> Result<PathBuf> {
        let pg_dir = self.paths.postgres_dir();
        let bin_dir = pg_dir.join("bin");
        if bin_dir.is_dir() {
            verify_engine_dir(&pg_dir)?;
            return Ok(bin_dir);
        }

        let release = self.portable_release(reporter).await?;
        let format = ArchiveFormat::detect(&release.url).unwrap_or(ArchiveFormat::Zip);
        let cache_file = pg_dir
            .join("cache")
            .join(cache_file_name(&release.version, format));

        reporter.log(format!("Fetching PostgreSQL {} portable...", release.version));
        download_cached(&self.client, &release.url, &cache_file, reporter).await?;

        reporter.log("Extracting PostgreSQL...");
        let archive = cache_file.clone();
        let dest = pg_dir.clone();
        tokio::task::spawn_blocking(move || extract_flat(&archive, format, &dest))
            .await
            .map_err(|e| AppError::other(format!("Extraction task failed: {}", e)))??;

        verify_engine_dir(&pg_dir)?;
        reporter.log("PostgreSQL portable ready and verified");
        Ok(bin_dir)
    }

    /// Configured archive, else the vendor build on Windows, else the
    /// prebuilt build for this host.
    async fn portable_release(&self, reporter: &Reporter) -> Result<VendorRelease> {
        if !self.config.archive_url.is_empty() {
            return Ok(VendorRelease {
                url: self.config.archive_url.clone(),
                version: CUSTOM_ARCHIVE_LABEL.to_string(),
            });
        }
        if cfg!(target_os = "windows") {
            reporter.log("Looking up the latest portable PostgreSQL build...");
            return Ok(resolve_vendor_release(&self.client).await);
        }
        let target = host_target().ok_or_else(no_engine)?;
        Ok(prebuilt_release(&self.config.binaries_version, target, &self.github_proxy))
    }

    /// Local server packages take precedence over a download off Windows.
    fn locate_engine(&self) -> Result<(EngineKind, Option<PathBuf>)> {
        if self.uses_portable() {
            return Ok((EngineKind::Portable, None));
        }
        if let Some(bin) = find_local_distribution(&self.search_roots) {
            return Ok((EngineKind::LocalDistribution, Some(bin)));
        }
        if host_target().is_some() {
            return Ok((EngineKind::Portable, None));
        }
        Err(no_engine())
    }

    async fn init_cluster(&self, bin_dir: &Path, data_dir: &Path, reporter: &Reporter) -> Result<()> {
        if data_dir.exists() {
            return Ok(());
        }
        reporter.log("Initialising PostgreSQL data directory...");
        let mut cmd = tool_command(bin_dir.join(exe_name("initdb")));
        cmd.arg("-D")
            .arg(data_dir)
            .args(["-U", self.config.superuser.as_str(), "-A", "trust", "-E", "UTF8"]);
        let outcome = run_streaming(&mut cmd, reporter)
            .await
            .map_err(|e| AppError::engine_start_failed(e.to_string()))?;
        if !outcome.success {
            return Err(AppError::engine_start_failed(format!(
                "initdb failed: {}",
                outcome.summary()
            )));
        }
        Ok(())
    }

    /// `pg_ctl status` exits 0 only while the server runs.
    async fn cluster_running(&self, bin_dir: &Path, data_dir: &Path) -> bool {
        let mut cmd = tool_command(bin_dir.join(exe_name("pg_ctl")));
        cmd.arg("-D").arg(data_dir).arg("status");
        cmd.output().await.is_ok_and(|out| out.status.success())
    }

    /// Returns `false` when the cluster was already running.
    async fn start_cluster(&self, bin_dir: &Path, data_dir: &Path, reporter: &Reporter) -> Result<bool> {
        if self.cluster_running(bin_dir, data_dir).await {
            reporter.log("PostgreSQL is already running");
            return Ok(false);
        }

        reporter.log("Starting PostgreSQL...");
        let mut cmd = tool_command(bin_dir.join(exe_name("pg_ctl")));
        cmd.arg("-D")
            .arg(data_dir)
            .arg("-o")
            .arg(format!("-p {}", self.config.port))
            .arg("-l")
            .arg(self.server_log())
            .arg("start");
        let outcome = run_streaming(&mut cmd, reporter)
            .await
            .map_err(|e| AppError::engine_start_failed(e.to_string()))?;
        if !outcome.success {
            return Err(AppError::engine_start_failed(format!(
                "pg_ctl start failed: {}",
                outcome.summary()
            )));
        }

        tokio::time::sleep(Duration::from_secs(self.config.settle_secs)).await;
        reporter.log(format!("PostgreSQL running on port {}", self.config.port));
        Ok(true)
    }

    /// Adopt a cluster started by an earlier launcher run, if it is up.
    pub async fn attach(&self) -> Option<EngineHandle> {
        let mut held = self.held.lock().await;
        if let Some(handle) = held.handle.as_ref() {
            return Some(handle.clone());
        }

        let (kind, bin_dir) = match self.locate_engine().ok()? {
            (kind, Some(bin)) => (kind, bin),
            (kind, None) => (kind, self.paths.postgres_dir().join("bin")),
        };
        let data_dir = self.data_dir();
        if !data_dir.exists() || !self.cluster_running(&bin_dir, &data_dir).await {
            return None;
        }

        let handle = EngineHandle {
            kind,
            port: self.config.port,
            bin_dir,
            data_dir,
        };
        held.handle = Some(handle.clone());
        Some(handle)
    }

    async fn stop_held(held: &mut Held) -> Result<()> {
        let Some(handle) = held.handle.as_ref() else {
            return Ok(());
        };

        log::info!("Stopping PostgreSQL...");
        let mut cmd = tool_command(handle.tool("pg_ctl"));
        cmd.arg("-D")
            .arg(&handle.data_dir)
            .args(["stop", "-m", "fast"]);
        let outcome = run_streaming(&mut cmd, &Reporter::silent()).await?;
        if !outcome.success {
            return Err(AppError::process(format!(
                "pg_ctl stop failed: {}",
                outcome.summary()
            )));
        }
        *held = Held::default();
        Ok(())
    }
}

fn no_engine() -> AppError {
    AppError::engine_unavailable(
        "No PostgreSQL server found and no prebuilt build for this platform. Install PostgreSQL (server package) or set database.archive_url in config.toml",
    )
}

#[async_trait]
impl DatabaseBootstrapper for PostgresBootstrapper {
    async fn ensure_engine(&self, reporter: &Reporter) -> Result<Option<EngineHandle>> {
        let mut held = self.held.lock().await;
        if let Some(handle) = held.handle.as_ref() {
            return Ok(Some(handle.clone()));
        }

        if self.detect_system && find_on_path("psql").is_some() {
            reporter.log("Using system PostgreSQL");
            return Ok(None);
        }

        let (kind, bin_dir) = match self.locate_engine()? {
            (kind, Some(bin)) => {
                reporter.log(format!("Using PostgreSQL server tools in {}", bin.display()));
                (kind, bin)
            }
            (kind, None) => (kind, self.ensure_portable(reporter).await?),
        };

        let data_dir = self.data_dir();
        self.init_cluster(&bin_dir, &data_dir, reporter).await?;
        let started = self.start_cluster(&bin_dir, &data_dir, reporter).await?;

        let handle = EngineHandle {
            kind,
            port: self.config.port,
            bin_dir,
            data_dir,
        };
        *held = Held {
            handle: Some(handle.clone()),
            started_here: started,
        };
        Ok(Some(handle))
    }

    /// The handle is dropped only once `pg_ctl stop` succeeded.
    async fn stop_engine(&self) -> Result<()> {
        let mut held = self.held.lock().await;
        Self::stop_held(&mut held).await
    }

    async fn release_engine(&self) -> Result<()> {
        let mut held = self.held.lock().await;
        if held.handle.is_some() && !held.started_here {
            log::info!("Leaving PostgreSQL running; it was up before this run");
            return Ok(());
        }
        Self::stop_held(&mut held).await
    }

    async fn is_running(&self) -> bool {
        self.held.lock().await.handle.is_some()
    }
}
