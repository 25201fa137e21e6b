//! Platform-agnostic process control functions.

use std::time::{Duration, Instant};

use crate::error::{AppError, Result};

/// Check if a process is alive by PID.
#[cfg(target_os = "windows")]
pub fn is_process_alive(pid: u32) -> bool {
    super::win_api::is_process_alive(pid)
}

/// Check if a process is alive by PID.
#[cfg(not(target_os = "windows"))]
pub fn is_process_alive(pid: u32) -> bool {
    use nix::sys::signal::kill;
    use nix::unistd::Pid;

    kill(Pid::from_raw(pid as i32), None).is_ok()
}

/// Opaque token for one incarnation of `pid`, used to tell a recorded
/// process from a later one that reused its PID.
#[cfg(target_os = "linux")]
pub fn process_start_token(pid: u32) -> Option<String> {
    let stat = std::fs::read_to_string(format!("/proc/{}/stat", pid)).ok()?;
    // Fields after the parenthesised command name; starttime is field 22.
    let rest = &stat[stat.rfind(')')? + 1..];
    rest.split_whitespace().nth(19).map(str::to_string)
}

#[cfg(all(unix, not(target_os = "linux")))]
pub fn process_start_token(pid: u32) -> Option<String> {
    let output = std::process::Command::new("ps")
        .args(["-o", "lstart=", "-p", &pid.to_string()])
        .output()
        .ok()?;
    if !output.status.success() {
        return None;
    }
    let started = String::from_utf8_lossy(&output.stdout).trim().to_string();
    (!started.is_empty()).then_some(started)
}

#[cfg(target_os = "windows")]
pub fn process_start_token(pid: u32) -> Option<String> {
    super::win_api::process_creation_time(pid).map(|t| t.to_string())
}

/// Ask the process tree to exit (`taskkill` without `/F`).
#[cfg(target_os = "windows")]
pub(super) fn graceful_signal(pid: u32) -> Result<()> {
    run_taskkill(pid, false)
}

/// Send SIGTERM to the process group led by `pid`, or to `pid` alone when it
/// does not lead its own group.
#[cfg(not(target_os = "windows"))]
pub(super) fn graceful_signal(pid: u32) -> Result<()> {
    use nix::sys::signal::Signal;

    signal_tree(pid, Signal::SIGTERM)
        .map_err(|e| AppError::process(format!("Failed to send SIGTERM to PID {}: {}", pid, e)))
}

#[cfg(target_os = "windows")]
pub fn force_kill(pid: u32) -> Result<()> {
    run_taskkill(pid, true)
}

#[cfg(not(target_os = "windows"))]
pub fn force_kill(pid: u32) -> Result<()> {
    use nix::sys::signal::Signal;

    signal_tree(pid, Signal::SIGKILL)
        .map_err(|e| AppError::process(format!("Failed to kill PID {}: {}", pid, e)))
}

#[cfg(not(target_os = "windows"))]
fn signal_tree(pid: u32, signal: nix::sys::signal::Signal) -> nix::Result<()> {
    use nix::sys::signal::{kill, killpg};
    use nix::unistd::{getpgid, Pid};

    let target = Pid::from_raw(pid as i32);
    match getpgid(Some(target)) {
        Ok(pgid) if pgid == target => killpg(pgid, signal),
        _ => kill(target, signal),
    }
}

#[cfg(target_os = "windows")]
fn run_taskkill(pid: u32, force: bool) -> Result<()> {
    use std::os::windows::process::CommandExt as _;
    use windows::Win32::System::Threading::CREATE_NO_WINDOW;

    let pid_arg = pid.to_string();
    let mut args = vec!["/PID", pid_arg.as_str(), "/T"];
    if force {
        args.push("/F");
    }
    let output = std::process::Command::new("taskkill")
        .args(&args)
        .creation_flags(CREATE_NO_WINDOW.0)
        .output()
        .map_err(|e| AppError::process(format!("Failed to run taskkill: {e}")))?;

    if output.status.success() {
        return Ok(());
    }
    let stderr = String::from_utf8_lossy(&output.stderr);
    let stdout = String::from_utf8_lossy(&output.stdout);
    let detail = if stderr.trim().is_empty() {
        stdout.trim().to_string()
    } else {
        stderr.trim().to_string()
    };
    Err(AppError::process(format!(
        "taskkill failed for pid {}: {}",
        pid,
        if detail.is_empty() { "(no output)" } else { &detail }
    )))
}

/// Send graceful signal to each PID, wait up to `timeout` for all to exit,
/// then force kill any that remain. Blocking.
pub fn graceful_shutdown(pids: &[u32], timeout: Duration) {
    let mut failed_signal_pids = Vec::new();

    for &pid in pids {
        if is_process_alive(pid) {
            if let Err(e) = graceful_signal(pid) {
                log::warn!("Graceful signal failed for PID {pid}: {e}, will force kill immediately");
                failed_signal_pids.push(pid);
            }
        }
    }

    for &pid in &failed_signal_pids {
        if is_process_alive(pid) {
            if let Err(e) = force_kill(pid) {
                log::error!("Failed to force kill PID {pid}: {e}");
            }
        }
    }

    let signalled: Vec<u32> = pids
        .iter()
        .copied()
        .filter(|pid| !failed_signal_pids.contains(pid))
        .collect();

    let deadline = Instant::now() + timeout;
    while Instant::now() < deadline {
        if signalled.iter().all(|&pid| !is_process_alive(pid)) {
            return;
        }
        std::thread::sleep(Duration::from_millis(200));
    }

    for &pid in &signalled {
        if is_process_alive(pid) {
            log::warn!(
                "PID {pid} did not exit within {}s, force killing",
                timeout.as_secs()
            );
            if let Err(e) = force_kill(pid) {
                log::error!("Failed to force kill PID {pid}: {e}");
            }
        }
    }
}

#[cfg(all(test, unix))]
mod tests {
    use std::process::{Command, Stdio};

    use super::*;

    fn spawn_group_leader(script: &str) -> u32 {
        use std::os::unix::process::CommandExt as _;

        let mut child = Command::new("sh")
            .args(["-c", script])
            .stdout(Stdio::null())
            .process_group(0)
            .spawn()
            .unwrap();
        let pid = child.id();
        std::thread::spawn(move || {
            let _ = child.wait();
        });
        pid
    }

    fn wait_until_dead(pid: u32) -> bool {
        let deadline = Instant::now() + Duration::from_secs(5);
        while Instant::now() < deadline {
            if !is_process_alive(pid) {
                return true;
            }
            std::thread::sleep(Duration::from_millis(50));
        }
        false
    }

    #[test]
    fn sigterm_is_enough_for_cooperative_processes() {
        let pid = spawn_group_leader("exec sleep 30");
        assert!(is_process_alive(pid));
        graceful_shutdown(&[pid], Duration::from_secs(5));
        assert!(wait_until_dead(pid));
    }

    #[test]
    fn stubborn_processes_are_killed_after_the_timeout() {
        let pid = spawn_group_leader("trap '' TERM; while true; do sleep 1; done");
        std::thread::sleep(Duration::from_millis(100));
        graceful_shutdown(&[pid], Duration::from_millis(300));
        assert!(wait_until_dead(pid));
    }

    #[test]
    fn start_token_is_stable_for_a_live_process() {
        let pid = spawn_group_leader("exec sleep 30");
        let first = process_start_token(pid);
        assert!(first.is_some());
        assert_eq!(process_start_token(pid), first);
        graceful_shutdown(&[pid], Duration::from_secs(5));
        assert!(wait_until_dead(pid));
    }

    #[test]
    fn dead_pids_are_ignored() {
        let pid = spawn_group_leader("exit 0");
        assert!(wait_until_dead(pid));
        graceful_shutdown(&[pid], Duration::from_millis(100));
    }
}
