//! Single-instance enforcement.
//!
//! A PID lockfile in the system temp directory. A second copy of the daemon
//! leaves a note in a notification file and exits; the running instance picks
//! the note up and surfaces it as a visual alert. Stale locks (recorded PID no
//! longer alive) are removed before acquisition.

use std::fs;
use std::io::Write;
use std::path::PathBuf;

use tracing::{info, warn};

use super::process_registry::pid_alive;

const LOCK_FILE: &str = "pinger.lock";
const NOTIFICATION_FILE: &str = "pinger.notification";

pub enum LockOutcome {
    Acquired(InstanceLock),
    AlreadyRunning { holder_pid: Option<u32> },
}

/// Held for the lifetime of the process; releases the lockfile on drop.
pub struct InstanceLock {
    lock_path: PathBuf,
    released: bool,
}

fn lock_path() -> PathBuf {
    std::env::temp_dir().join(LOCK_FILE)
}

fn notification_path() -> PathBuf {
    std::env::temp_dir().join(NOTIFICATION_FILE)
}

fn read_pid(path: &PathBuf) -> Option<u32> {
    fs::read_to_string(path).ok()?.trim().parse().ok()
}

/// Try to become the single running instance.
pub fn acquire() -> std::io::Result<LockOutcome> {
    let path = lock_path();

    // Stale lock: recorded PID no longer alive.
    if path.exists() {
        match read_pid(&path) {
            Some(pid) if pid_alive(pid) => {
                return Ok(LockOutcome::AlreadyRunning { holder_pid: Some(pid) });
            }
            Some(pid) => {
                info!(pid, "removing stale instance lock");
                let _ = fs::remove_file(&path);
            }
            None => {
                warn!("instance lock unreadable, removing");
                let _ = fs::remove_file(&path);
            }
        }
    }

    match fs::OpenOptions::new().write(true).create_new(true).open(&path) {
        Ok(mut file) => {
            write!(file, "{}", std::process::id())?;
            file.sync_all()?;
            Ok(LockOutcome::Acquired(InstanceLock {
                lock_path: path,
                released: false,
            }))
        }
        Err(e) if e.kind() == std::io::ErrorKind::AlreadyExists => {
            Ok(LockOutcome::AlreadyRunning { holder_pid: read_pid(&path) })
        }
        Err(e) => Err(e),
    }
}

/// Leave a note for the running instance before exiting.
pub fn notify_running_instance(message: &str) {
    if let Err(e) = fs::write(notification_path(), message) {
        warn!(error = %e, "failed to write instance notification");
    }
}

/// Read and consume a note left by a second process, if any.
pub fn take_notification() -> Option<String> {
    let path = notification_path();
    let content = fs::read_to_string(&path).ok()?;
    let _ = fs::remove_file(&path);
    let trimmed = content.trim();
    if trimmed.is_empty() {
        None
    } else {
        Some(trimmed.to_string())
    }
}

impl InstanceLock {
    pub fn release(&mut self) {
        if self.released {
            return;
        }
        let _ = fs::remove_file(&self.lock_path);
        self.released = true;
    }
}

impl Drop for InstanceLock {
    fn drop(&mut self) {
        self.release();
    }
}
