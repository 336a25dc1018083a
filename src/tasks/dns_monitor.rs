//! DNS monitor task: timed resolution, record-type checks, benchmarks.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;

use crate::config::Settings;
use crate::probes::dns::DnsProber;
use crate::stats::{DnsStatus, StatsRepository};
use crate::tasks::PeriodicTask;

pub struct DnsMonitorTask {
    settings: Arc<Settings>,
    stats: Arc<StatsRepository>,
    prober: DnsProber,
}

impl DnsMonitorTask {
    pub fn new(settings: Arc<Settings>, stats: Arc<StatsRepository>, prober: DnsProber) -> Self {
        Self {
            settings,
            stats,
            prober,
        }
    }
}

#[async_trait]
impl PeriodicTask for DnsMonitorTask {
    fn name(&self) -> &'static str {
        "DnsMonitor"
    }

    fn interval(&self) -> Duration {
        Duration::from_secs(self.settings.dns.check_interval_secs)
    }

    fn enabled(&self) -> bool {
        self.settings.dns.enabled
    }

    async fn execute(&mut self) -> anyhow::Result<()> {
        let (success, elapsed_ms, status) = self.prober.check_resolve().await;
        self.stats
            .update_dns(if success { elapsed_ms } else { None }, status);

        if status == DnsStatus::Failed {
            // Nothing else will resolve either; skip the detailed pass.
            return Ok(());
        }

        let records = self.prober.check_record_types().await;
        self.stats.update_dns_detailed(records);

        if self.settings.dns.benchmark_enabled {
            let benchmarks = self.prober.run_benchmarks().await;
            self.stats.update_dns_benchmark(benchmarks);
        }

        Ok(())
    }
}
