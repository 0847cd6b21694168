//! Cooperative single-instance lock.
//!
//! Two concurrently running userbots on one account answer every command
//! twice. A PID file under the data directory detects the previous owner;
//! force mode (the default) terminates it, strict mode refuses to start.

use std::path::PathBuf;
use std::time::Duration;

use tracing::{error, info, warn};

use crate::error::{Result, SakaiError};

pub struct InstanceLock {
    lock_file: PathBuf,
    current_pid: u32,
    acquired: bool,
}

impl InstanceLock {
    pub fn new(lock_file: PathBuf) -> Self {
        Self {
            lock_file,
            current_pid: std::process::id(),
            acquired: false,
        }
    }

    /// Acquire the lock. With `force`, a live previous owner is terminated;
    /// without it, a live owner makes acquisition fail.
    pub fn acquire(&mut self, force: bool) -> Result<bool> {
        if self.acquired {
            return Ok(true);
        }

        if self.lock_file.exists() {
            match std::fs::read_to_string(&self.lock_file) {
                Ok(content) => match content.trim().parse::<u32>() {
                    Ok(old_pid) if process_alive(old_pid) => {
                        if force {
                            info!(pid = old_pid, "Terminating previous instance");
                            terminate_process(old_pid);
                        } else {
                            error!(pid = old_pid, "Another instance is running");
                            return Ok(false);
                        }
                    }
                    Ok(old_pid) => {
                        info!(pid = old_pid, "Removing stale lock file");
                    }
                    Err(_) => {
                        warn!("Lock file content is not a PID; replacing it");
                    }
                },
                Err(e) => warn!(error = %e, "Could not read lock file; replacing it"),
            }
        }

        if let Some(parent) = self.lock_file.parent() {
            std::fs::create_dir_all(parent)?;
        }
        std::fs::write(&self.lock_file, self.current_pid.to_string())
            .map_err(SakaiError::Io)?;
        self.acquired = true;
        info!(pid = self.current_pid, "Instance lock acquired");
        Ok(true)
    }

    /// Delete the lock file, but only if it still contains our PID.
    pub fn release(&mut self) {
        if !self.acquired {
            return;
        }
        match std::fs::read_to_string(&self.lock_file) {
            Ok(content) => match content.trim().parse::<u32>() {
                Ok(pid) if pid == self.current_pid => {
                    if let Err(e) = std::fs::remove_file(&self.lock_file) {
                        error!(error = %e, "Could not remove lock file");
                    } else {
                        info!(pid = self.current_pid, "Instance lock released");
                    }
                }
                Ok(pid) => {
                    warn!(
                        expected = self.current_pid,
                        found = pid,
                        "Lock file PID mismatch; leaving it in place"
                    );
                }
                Err(_) => warn!("Lock file no longer contains a PID; leaving it"),
            },
            Err(_) => {}
        }
        self.acquired = false;
    }
}

impl Drop for InstanceLock {
    fn drop(&mut self) {
        self.release();
    }
}

#[cfg(target_os = "linux")]
fn process_alive(pid: u32) -> bool {
    std::path::Path::new(&format!("/proc/{}", pid)).exists()
}

#[cfg(not(target_os = "linux"))]
fn process_alive(pid: u32) -> bool {
    std::process::Command::new("kill")
        .args(["-0", &pid.to_string()])
        .output()
        .map(|out| out.status.success())
        .unwrap_or(false)
}

/// SIGTERM, then SIGKILL if the process survives a grace period.
fn terminate_process(pid: u32) {
    let pid_arg = pid.to_string();
    let _ = std::process::Command::new("kill")
        .args(["-TERM", &pid_arg])
        .output();
    std::thread::sleep(Duration::from_secs(1));
    if process_alive(pid) {
        warn!(pid, "Previous instance ignored SIGTERM; sending SIGKILL");
        let _ = std::process::Command::new("kill")
            .args(["-KILL", &pid_arg])
            .output();
    }
}
