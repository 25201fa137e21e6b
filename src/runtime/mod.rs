//! Shared Odoo runtimes, one per version tag.
//!
//! A runtime is a shallow checkout of the Odoo sources with its own Python
//! virtual environment inside (`versions/<tag>/venv`). Every instance of
//! that version reuses it.

mod provisioner;
mod requirements;

use std::path::PathBuf;

use async_trait::async_trait;

use crate::error::Result;
use crate::progress::Reporter;

pub use provisioner::{GitVenvProvisioner, DEPS_MARKER};
pub use requirements::{filter_driver_requirements, needs_driver_retry, FALLBACK_REQUIREMENTS};

/// Makes a given Odoo version usable on this host.
#[async_trait]
pub trait RuntimeProvisioner: Send + Sync {
    /// Fetch and prepare `version` if needed; returns the runtime directory.
    ///
    /// Already completed steps are skipped, so calling this again after a
    /// partial failure resumes where the previous attempt stopped.
    async fn ensure_version(&self, version: &str, reporter: &Reporter) -> Result<PathBuf>;
}
