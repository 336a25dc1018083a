//! Hop monitor task: initial discovery, per-cycle hop pings, periodic and
//! on-demand rediscovery.

use std::sync::Arc;
use std::time::{Duration, Instant};

use async_trait::async_trait;

use crate::config::Settings;
use crate::probes::hops::HopMonitor;
use crate::stats::StatsRepository;
use crate::tasks::PeriodicTask;

pub struct HopMonitorTask {
    settings: Arc<Settings>,
    stats: Arc<StatsRepository>,
    monitor: Arc<HopMonitor>,
    last_discovery: Option<Instant>,
}

impl HopMonitorTask {
    pub fn new(
        settings: Arc<Settings>,
        stats: Arc<StatsRepository>,
        monitor: Arc<HopMonitor>,
    ) -> Self {
        Self {
            settings,
            stats,
            monitor,
            last_discovery: None,
        }
    }

    async fn rediscover(&mut self) {
        self.stats.update_hop_monitor(Vec::new(), true);
        self.monitor.discover(&self.settings.target_ip).await;
        self.stats.update_hop_monitor(self.monitor.snapshot(), false);
        self.last_discovery = Some(Instant::now());
    }
}

#[async_trait]
impl PeriodicTask for HopMonitorTask {
    fn name(&self) -> &'static str {
        "HopMonitor"
    }

    fn interval(&self) -> Duration {
        Duration::from_secs_f64(self.settings.hops.ping_interval_secs)
    }

    fn enabled(&self) -> bool {
        self.settings.hops.enabled
    }

    async fn setup(&mut self) {
        self.rediscover().await;
    }

    async fn execute(&mut self) -> anyhow::Result<()> {
        let rediscover_after = Duration::from_secs(self.settings.hops.rediscover_interval_secs);
        let due = self
            .last_discovery
            .map(|at| at.elapsed() > rediscover_after)
            .unwrap_or(true);

        if self.monitor.take_rediscovery_request() || due {
            self.rediscover().await;
        } else {
            self.monitor.ping_all().await;
            self.stats.update_hop_monitor(self.monitor.snapshot(), false);
        }

        Ok(())
    }
}
