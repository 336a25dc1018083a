//! Traceroute invocation and dump files.

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use tracing::{info, warn};

use crate::config::TracerouteSettings;
use crate::infra::{DaemonMetrics, ProcessRegistry};
use crate::probes::{ProbeError, ProbeResult};
use crate::stats::{StatsRepository, VisualAlertKind};

/// Overall budget for one traceroute run.
const TRACEROUTE_BUDGET: Duration = Duration::from_secs(30);

const DUMP_DIR: &str = "traceroutes";

pub struct TracerouteRunner {
    registry: Arc<ProcessRegistry>,
    stats: Arc<StatsRepository>,
    metrics: Arc<DaemonMetrics>,
    settings: TracerouteSettings,
}

impl TracerouteRunner {
    pub fn new(
        registry: Arc<ProcessRegistry>,
        stats: Arc<StatsRepository>,
        metrics: Arc<DaemonMetrics>,
        settings: TracerouteSettings,
    ) -> Self {
        Self {
            registry,
            stats,
            metrics,
            settings,
        }
    }

    /// Run traceroute and return its raw stdout.
    pub async fn run(&self, target: &str) -> ProbeResult<String> {
        let max_hops = self.settings.max_hops.to_string();
        let args = ["-m", max_hops.as_str(), "-w", "1", target];

        let output = self
            .registry
            .run_command("traceroute", &args, TRACEROUTE_BUDGET)
            .await?;
        Ok(String::from_utf8_lossy(&output.stdout).into_owned())
    }

    /// Trigger a background traceroute dump if none is running and the
    /// cooldown has passed. Returns whether a run was started.
    pub fn trigger(self: &Arc<Self>, target: &str) -> bool {
        if self.stats.is_traceroute_running() {
            return false;
        }
        if let Some(last) = self.stats.last_traceroute_time() {
            if (Utc::now() - last).num_seconds() < self.settings.cooldown_secs as i64 {
                return false;
            }
        }

        let runner = Arc::clone(self);
        let target = target.to_string();
        tokio::spawn(async move {
            runner.dump_worker(&target).await;
        });
        true
    }

    /// Run a traceroute and persist it under `./traceroutes/`.
    async fn dump_worker(&self, target: &str) {
        self.stats.set_traceroute_running(true);
        self.stats
            .add_alert("[i] Traceroute: starting...", VisualAlertKind::Info);
        info!(target, "starting traceroute");

        let result = self.run(target).await;
        match result {
            Ok(data) => match write_dump(Path::new(DUMP_DIR), target, &data) {
                Ok(path) => {
                    self.stats.add_alert(
                        format!("[+] Traceroute saved: {}", path.display()),
                        VisualAlertKind::Success,
                    );
                    self.metrics.record_traceroute_saved();
                    info!(path = %path.display(), "traceroute saved");
                }
                Err(e) => {
                    self.stats
                        .add_alert("[!] Failed to save traceroute", VisualAlertKind::Warning);
                    warn!(error = %e, "failed to save traceroute");
                }
            },
            Err(ProbeError::Timeout(_)) => {
                self.stats
                    .add_alert("[!] Traceroute: timeout", VisualAlertKind::Warning);
            }
            Err(e) => {
                self.stats
                    .add_alert("[!] Failed to save traceroute", VisualAlertKind::Warning);
                warn!(error = %e, "traceroute failed");
            }
        }

        self.stats.set_traceroute_running(false);
    }

    /// Startup dependency check.
    pub fn traceroute_available() -> bool {
        super::ping::which("traceroute") || super::ping::which("tracert")
    }
}

/// Write a timestamped dump file and return its path.
pub fn write_dump(base_dir: &Path, target: &str, data: &str) -> std::io::Result<PathBuf> {
    std::fs::create_dir_all(base_dir)?;
    let now = Utc::now();
    let path = base_dir.join(format!("traceroute_{}.txt", now.format("%Y%m%d_%H%M%S")));

    let mut content = format!(
        "Traceroute to {target}\nTime: {}\n",
        now.format("%Y-%m-%d %H:%M:%S")
    );
    content.push_str(&"=".repeat(70));
    content.push('\n');
    content.push_str(data);

    std::fs::write(&path, content)?;
    Ok(path)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn dump_file_has_header_and_payload() {
        let dir = tempfile::tempdir().unwrap();
        let path = write_dump(dir.path(), "1.1.1.1", "1  gw  0.3 ms\n").unwrap();

        let name = path.file_name().unwrap().to_string_lossy().into_owned();
        assert!(name.starts_with("traceroute_"));
        assert!(name.ends_with(".txt"));

        let content = std::fs::read_to_string(&path).unwrap();
        assert!(content.starts_with("Traceroute to 1.1.1.1\nTime: "));
        assert!(content.contains(&"=".repeat(70)));
        assert!(content.ends_with("1  gw  0.3 ms\n"));
    }
}
