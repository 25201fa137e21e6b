//! Starting and stopping Odoo processes.

mod control;
mod launcher;

#[cfg(target_os = "windows")]
pub(crate) mod win_api;

use std::time::Duration;

pub use control::{force_kill, graceful_shutdown, is_process_alive, process_start_token};
pub use launcher::{is_instance_alive, start_instance, stop_instance, Launcher};

/// Timeout for graceful shutdown before force killing.
pub const GRACEFUL_SHUTDOWN_TIMEOUT: Duration = Duration::from_secs(15);
