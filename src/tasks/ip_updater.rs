//! Public IP updater task: provider lookup, change detection, hop rediscovery.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use parking_lot::Mutex;

use crate::alerts::{AlertContext, AlertEntity, AlertPriority, AlertType, SmartAlertManager};
use crate::config::Settings;
use crate::monitor::ring_bell;
use crate::probes::hops::HopMonitor;
use crate::probes::public_ip::{IpChangeTracker, PublicIpClient};
use crate::stats::{StatsRepository, VisualAlertKind};
use crate::tasks::PeriodicTask;

pub struct IpUpdaterTask {
    settings: Arc<Settings>,
    stats: Arc<StatsRepository>,
    alerts: Arc<Mutex<SmartAlertManager>>,
    hop_monitor: Arc<HopMonitor>,
    client: PublicIpClient,
    tracker: IpChangeTracker,
}

impl IpUpdaterTask {
    pub fn new(
        settings: Arc<Settings>,
        stats: Arc<StatsRepository>,
        alerts: Arc<Mutex<SmartAlertManager>>,
        hop_monitor: Arc<HopMonitor>,
        client: PublicIpClient,
    ) -> Self {
        Self {
            settings,
            stats,
            alerts,
            hop_monitor,
            client,
            tracker: IpChangeTracker::new(),
        }
    }
}

#[async_trait]
impl PeriodicTask for IpUpdaterTask {
    fn name(&self) -> &'static str {
        "IpUpdater"
    }

    fn interval(&self) -> Duration {
        Duration::from_secs(self.settings.public_ip.check_interval_secs)
    }

    fn enabled(&self) -> bool {
        self.settings.public_ip.enabled
    }

    async fn execute(&mut self) -> anyhow::Result<()> {
        let info = self.client.fetch().await?;

        if let Some(change) = self.tracker.check_change(&info.ip) {
            self.stats.add_alert(
                format!("[i] IP changed: {} -> {}", change.old_ip, change.new_ip),
                VisualAlertKind::Info,
            );
            self.stats.update_ip_change(change.old_ip.clone());

            let alert = AlertEntity::new(
                AlertType::IpChange,
                format!("Public IP changed: {} -> {}", change.old_ip, change.new_ip),
                AlertPriority::Medium,
                AlertContext::new("ip", "network", "availability", &self.settings.target_ip),
            );
            let (action, _) = self.alerts.lock().process_alert(alert);
            if action == crate::alerts::AlertAction::Notify
                && self.settings.alerts.sound_enabled
                && self
                    .stats
                    .should_play_sound(self.settings.alerts.sound_cooldown_secs)
            {
                ring_bell();
            }

            // The path almost certainly moved with the address.
            if self.settings.hops.enabled {
                self.hop_monitor.request_rediscovery();
            }
        }

        self.stats
            .update_public_ip(info.ip, info.country, info.country_code);
        Ok(())
    }
}
