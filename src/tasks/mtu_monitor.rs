//! MTU monitor task: local MTU each iteration, path MTU on its own cadence,
//! hysteresis-driven status transitions.

use std::sync::Arc;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use parking_lot::Mutex;
use tracing::info;

use crate::alerts::{AlertContext, AlertEntity, AlertPriority, AlertType, SmartAlertManager};
use crate::config::Settings;
use crate::infra::DaemonMetrics;
use crate::probes::mtu::MtuProber;
use crate::probes::ping::PingProber;
use crate::stats::{MtuStatus, StatsRepository, VisualAlertKind};
use crate::tasks::PeriodicTask;

/// Path MTU below this means fragmentation territory.
const FRAGMENTATION_FLOOR: u32 = 1000;

pub struct MtuMonitorTask {
    settings: Arc<Settings>,
    stats: Arc<StatsRepository>,
    metrics: Arc<DaemonMetrics>,
    alerts: Arc<Mutex<SmartAlertManager>>,
    prober: MtuProber,
    ping: Arc<PingProber>,
    last_path_check: Option<Instant>,
    last_known_path_mtu: Option<u32>,
}

impl MtuMonitorTask {
    pub fn new(
        settings: Arc<Settings>,
        stats: Arc<StatsRepository>,
        metrics: Arc<DaemonMetrics>,
        alerts: Arc<Mutex<SmartAlertManager>>,
        prober: MtuProber,
        ping: Arc<PingProber>,
    ) -> Self {
        Self {
            settings,
            stats,
            metrics,
            alerts,
            prober,
            ping,
            last_path_check: None,
            last_known_path_mtu: None,
        }
    }

    fn classify(&self, local: Option<u32>, path: Option<u32>) -> MtuStatus {
        let (Some(local), Some(path)) = (local, path) else {
            return MtuStatus::Ok;
        };
        if path < FRAGMENTATION_FLOOR {
            MtuStatus::Fragmented
        } else if path < local && local - path >= self.settings.mtu.diff_threshold {
            MtuStatus::Reduced
        } else {
            MtuStatus::Ok
        }
    }

    fn emit_issue_alert(&self, status: MtuStatus, local: Option<u32>, path: Option<u32>) {
        let alert = AlertEntity::new(
            AlertType::MtuIssue,
            format!(
                "MTU problem ({status}): local {} path {}",
                local.map(|v| v.to_string()).unwrap_or_else(|| "?".into()),
                path.map(|v| v.to_string()).unwrap_or_else(|| "?".into()),
            ),
            AlertPriority::Medium,
            AlertContext::new("mtu", "network", "performance", &self.settings.target_ip),
        );
        let _ = self.alerts.lock().process_alert(alert);
    }
}

#[async_trait]
impl PeriodicTask for MtuMonitorTask {
    fn name(&self) -> &'static str {
        "MtuMonitor"
    }

    fn interval(&self) -> Duration {
        Duration::from_secs(self.settings.mtu.check_interval_secs)
    }

    fn enabled(&self) -> bool {
        self.settings.mtu.enabled
    }

    async fn execute(&mut self) -> anyhow::Result<()> {
        let path_interval = Duration::from_secs(self.settings.mtu.path_check_interval_secs);
        let should_check_path = self
            .last_path_check
            .map(|at| at.elapsed() >= path_interval)
            .unwrap_or(true);

        let is_ipv6 = self.ping.detect_ipv6(&self.settings.target_ip).await;
        let reading = self
            .prober
            .check(&self.settings.target_ip, is_ipv6, should_check_path)
            .await;

        let local = reading.local_mtu;
        let mut path = reading.path_mtu;

        if should_check_path {
            self.last_path_check = Some(Instant::now());
            if path.is_some() {
                self.last_known_path_mtu = path;
            }
        } else if path.is_none() {
            path = self.last_known_path_mtu;
        }

        let status = self.classify(local, path);
        let is_issue = status.is_issue();

        // First reading seeds the state directly; hysteresis applies after.
        if !self.stats.local_mtu_known() {
            self.stats.update_mtu(local, path, status);
            self.stats.set_mtu_status_change_time();
            self.stats.update_mtu_hysteresis(is_issue);
            if is_issue {
                self.metrics.record_mtu_problem();
            }
            self.metrics.set_mtu_status(status.as_gauge());
            info!(%status, ?local, ?path, "initial MTU status");
            return Ok(());
        }

        let current = self.stats.mtu_status();
        let (consecutive_issues, consecutive_ok) = self.stats.update_mtu_hysteresis(is_issue);

        if is_issue {
            if consecutive_issues >= self.settings.mtu.issue_consecutive && current != status {
                self.stats.update_mtu(local, path, status);
                self.stats.set_mtu_status_change_time();
                self.metrics.record_mtu_problem();
                self.metrics.set_mtu_status(status.as_gauge());
                self.stats
                    .add_alert(format!("[!] MTU problem: {status}"), VisualAlertKind::Warning);
                info!(%status, "MTU problem");
                self.emit_issue_alert(status, local, path);
            }
        } else if consecutive_ok >= self.settings.mtu.clear_consecutive && current != MtuStatus::Ok
        {
            self.stats.update_mtu(local, path, MtuStatus::Ok);
            self.stats.set_mtu_status_change_time();
            self.metrics.set_mtu_status(MtuStatus::Ok.as_gauge());
            self.stats
                .add_alert("[+] MTU status cleared", VisualAlertKind::Info);
            info!("MTU status cleared");
        }

        Ok(())
    }
}
