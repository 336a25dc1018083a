//! Central registry for child processes.
//!
//! Every `ping`/`traceroute`/`ip` invocation goes through here. A semaphore
//! bounds the number of in-flight children; on timeout the child gets
//! SIGTERM, a short grace period, then SIGKILL. `shutdown()` sweeps whatever
//! is still alive so no probes outlive the daemon.

use std::collections::HashSet;
use std::process::{Output, Stdio};
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use parking_lot::Mutex;
use tokio::process::Command;
use tokio::sync::Semaphore;
use tracing::{debug, warn};

use crate::probes::ProbeError;

pub struct ProcessRegistry {
    semaphore: Semaphore,
    active: Mutex<HashSet<u32>>,
    shutting_down: AtomicBool,
    force_kill_timeout: Duration,
}

impl ProcessRegistry {
    pub fn new(max_concurrent: usize, force_kill_timeout: Duration) -> Self {
        Self {
            semaphore: Semaphore::new(max_concurrent),
            active: Mutex::new(HashSet::new()),
            shutting_down: AtomicBool::new(false),
            force_kill_timeout,
        }
    }

    /// Number of currently tracked children.
    pub fn active_count(&self) -> usize {
        self.active.lock().len()
    }

    /// Run a command, capture its output, and enforce `timeout`.
    ///
    /// On timeout the child is terminated and `ProbeError::Timeout` returned.
    pub async fn run_command(
        &self,
        program: &str,
        args: &[&str],
        timeout: Duration,
    ) -> Result<Output, ProbeError> {
        if self.shutting_down.load(Ordering::SeqCst) {
            return Err(ProbeError::Network("registry is shutting down".into()));
        }

        let _permit = self
            .semaphore
            .acquire()
            .await
            .map_err(|_| ProbeError::Network("process registry closed".into()))?;

        let mut child = Command::new(program)
            .args(args)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .spawn()
            .map_err(|e| {
                if e.kind() == std::io::ErrorKind::NotFound {
                    ProbeError::Unavailable(program.to_string())
                } else {
                    ProbeError::Io(e)
                }
            })?;

        let pid = child.id();
        if let Some(pid) = pid {
            self.active.lock().insert(pid);
        }

        let result = tokio::time::timeout(timeout, child.wait_with_output()).await;

        if let Some(pid) = pid {
            self.active.lock().remove(&pid);
        }

        match result {
            Ok(Ok(output)) => Ok(output),
            Ok(Err(e)) => Err(ProbeError::Io(e)),
            Err(_) => {
                warn!(program, ?timeout, "command timed out, terminating");
                if let Some(pid) = pid {
                    self.terminate(pid).await;
                }
                Err(ProbeError::Timeout(timeout))
            }
        }
    }

    /// SIGTERM, brief grace, then SIGKILL if the process is still alive.
    async fn terminate(&self, pid: u32) {
        signal_pid(pid, TermSignal::Term);

        let deadline = tokio::time::Instant::now() + self.force_kill_timeout;
        while pid_alive(pid) {
            if tokio::time::Instant::now() >= deadline {
                warn!(pid, "process did not exit on SIGTERM, killing");
                signal_pid(pid, TermSignal::Kill);
                break;
            }
            tokio::time::sleep(Duration::from_millis(100)).await;
        }
    }

    /// Terminate every tracked child. Called once at daemon shutdown.
    pub async fn shutdown(&self) {
        self.shutting_down.store(true, Ordering::SeqCst);

        let pids: Vec<u32> = self.active.lock().iter().copied().collect();
        if pids.is_empty() {
            return;
        }

        debug!(count = pids.len(), "cleaning up active subprocesses");
        for &pid in &pids {
            signal_pid(pid, TermSignal::Term);
        }

        let deadline = tokio::time::Instant::now() + self.force_kill_timeout;
        loop {
            let survivors: Vec<u32> = pids.iter().copied().filter(|&p| pid_alive(p)).collect();
            if survivors.is_empty() {
                break;
            }
            if tokio::time::Instant::now() >= deadline {
                for pid in survivors {
                    warn!(pid, "force-killing leftover subprocess");
                    signal_pid(pid, TermSignal::Kill);
                }
                break;
            }
            tokio::time::sleep(Duration::from_millis(100)).await;
        }

        self.active.lock().clear();
    }
}

enum TermSignal {
    Term,
    Kill,
}

#[cfg(unix)]
fn signal_pid(pid: u32, signal: TermSignal) {
    let sig = match signal {
        TermSignal::Term => libc::SIGTERM,
        TermSignal::Kill => libc::SIGKILL,
    };
    unsafe {
        libc::kill(pid as libc::pid_t, sig);
    }
}

#[cfg(not(unix))]
fn signal_pid(_pid: u32, _signal: TermSignal) {}

#[cfg(unix)]
pub(crate) fn pid_alive(pid: u32) -> bool {
    unsafe { libc::kill(pid as libc::pid_t, 0) == 0 }
}

#[cfg(not(unix))]
pub(crate) fn pid_alive(_pid: u32) -> bool {
    false
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn runs_command_and_captures_stdout() {
        let registry = ProcessRegistry::new(4, Duration::from_secs(1));
        let out = registry
            .run_command("echo", &["hello"], Duration::from_secs(5))
            .await
            .unwrap();
        assert!(String::from_utf8_lossy(&out.stdout).contains("hello"));
        assert_eq!(registry.active_count(), 0);
    }

    #[tokio::test]
    async fn missing_tool_is_unavailable() {
        let registry = ProcessRegistry::new(4, Duration::from_secs(1));
        let err = registry
            .run_command("definitely-not-a-real-binary", &[], Duration::from_secs(1))
            .await
            .unwrap_err();
        assert!(matches!(err, ProbeError::Unavailable(_)));
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn timeout_kills_the_child() {
        let registry = ProcessRegistry::new(4, Duration::from_millis(200));
        let err = registry
            .run_command("sleep", &["30"], Duration::from_millis(100))
            .await
            .unwrap_err();
        assert!(err.is_timeout());
        // The child must be gone shortly after the timeout fires.
        tokio::time::sleep(Duration::from_millis(400)).await;
        assert_eq!(registry.active_count(), 0);
    }
}
