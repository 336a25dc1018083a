//! TTL monitor task: extract the reply TTL and estimate the hop count.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;

use crate::config::Settings;
use crate::probes::ping::PingProber;
use crate::stats::StatsRepository;
use crate::tasks::PeriodicTask;

pub struct TtlMonitorTask {
    settings: Arc<Settings>,
    stats: Arc<StatsRepository>,
    ping: Arc<PingProber>,
}

impl TtlMonitorTask {
    pub fn new(settings: Arc<Settings>, stats: Arc<StatsRepository>, ping: Arc<PingProber>) -> Self {
        Self {
            settings,
            stats,
            ping,
        }
    }
}

#[async_trait]
impl PeriodicTask for TtlMonitorTask {
    fn name(&self) -> &'static str {
        "TtlMonitor"
    }

    fn interval(&self) -> Duration {
        Duration::from_secs(self.settings.ttl.check_interval_secs)
    }

    fn enabled(&self) -> bool {
        self.settings.ttl.enabled
    }

    async fn execute(&mut self) -> anyhow::Result<()> {
        let (ttl, hops) = self.ping.extract_ttl(&self.settings.target_ip).await;
        self.stats.update_ttl(ttl, hops);
        Ok(())
    }
}
