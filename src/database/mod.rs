//! PostgreSQL engine bootstrap.
//!
//! Three outcomes: a system installation reachable through `psql` on `PATH`
//! (nothing to manage, no handle), a locally installed server distribution
//! driven with its own `initdb`/`pg_ctl`, or a portable distribution
//! unpacked under `<data>/postgres` (vendor build on Windows, prebuilt
//! build elsewhere). The last two run a launcher-owned cluster in
//! `<data>/postgres/data`.

mod binaries;
mod postgres;
mod role;
mod vendor;

use std::path::PathBuf;

use async_trait::async_trait;
use serde::Serialize;

use crate::error::Result;
use crate::paths::exe_name;
use crate::progress::Reporter;

pub use binaries::{host_target, prebuilt_release, prebuilt_target, DEFAULT_BINARIES_VERSION};
pub use postgres::{find_local_distribution, verify_engine_dir, PostgresBootstrapper, SearchRoot};
pub use role::ensure_role;
pub use vendor::{parse_vendor_page, VendorRelease, FALLBACK_URL, FALLBACK_VERSION};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum EngineKind {
    Portable,
    LocalDistribution,
}

/// A running, launcher-managed PostgreSQL cluster.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct EngineHandle {
    pub kind: EngineKind,
    pub port: u16,
    pub bin_dir: PathBuf,
    pub data_dir: PathBuf,
}

impl EngineHandle {
    /// Path of a server tool (`psql`, `pg_ctl`, ...) in this distribution.
    pub fn tool(&self, name: &str) -> PathBuf {
        self.bin_dir.join(exe_name(name))
    }
}

#[async_trait]
pub trait DatabaseBootstrapper: Send + Sync {
    /// Make a database engine available. `None` means a system installation
    /// is used with default connectivity. Repeated calls return the handle
    /// already held.
    async fn ensure_engine(&self, reporter: &Reporter) -> Result<Option<EngineHandle>>;

    /// Stop the managed engine, if one is held. Safe to call repeatedly.
    async fn stop_engine(&self) -> Result<()>;

    /// End of a run that called `ensure_engine`: stop the engine only if
    /// that run started it.
    async fn release_engine(&self) -> Result<()> {
        self.stop_engine().await
    }

    async fn is_running(&self) -> bool;
}
