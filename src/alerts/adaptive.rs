//! Adaptive thresholds: rolling statistical baselines per monitored metric.

use std::collections::{HashMap, VecDeque};
use std::sync::Arc;

use chrono::{DateTime, Utc};
use tracing::debug;

use crate::stats::{StatsRepository, StatsSnapshot};

/// Metrics with adaptive thresholds.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Metric {
    Latency,
    AvgLatency,
    PacketLoss,
    Jitter,
}

impl Metric {
    pub const ALL: [Metric; 4] = [
        Metric::Latency,
        Metric::AvgLatency,
        Metric::PacketLoss,
        Metric::Jitter,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Metric::Latency => "latency",
            Metric::AvgLatency => "avg_latency",
            Metric::PacketLoss => "packet_loss",
            Metric::Jitter => "jitter",
        }
    }
}

/// Per-metric threshold configuration.
#[derive(Debug, Clone)]
pub struct ThresholdConfig {
    pub default_value: f64,
    pub min_value: f64,
    pub max_value: f64,
    pub sigma_multiplier: f64,
    pub percentile: f64,
    pub use_percentile: bool,
    /// Samples needed before a baseline is trusted.
    pub min_samples: usize,
}

fn config_for(metric: Metric, sigma: f64) -> ThresholdConfig {
    match metric {
        Metric::Latency => ThresholdConfig {
            default_value: 100.0,
            min_value: 20.0,
            max_value: 500.0,
            sigma_multiplier: sigma,
            percentile: 95.0,
            use_percentile: false,
            min_samples: 10,
        },
        Metric::AvgLatency => ThresholdConfig {
            default_value: 100.0,
            min_value: 20.0,
            max_value: 300.0,
            sigma_multiplier: sigma,
            percentile: 95.0,
            use_percentile: false,
            // Warm-up metric: single sample per refresh.
            min_samples: 3,
        },
        Metric::PacketLoss => ThresholdConfig {
            default_value: 5.0,
            min_value: 1.0,
            max_value: 20.0,
            sigma_multiplier: sigma,
            percentile: 95.0,
            use_percentile: true,
            min_samples: 10,
        },
        Metric::Jitter => ThresholdConfig {
            default_value: 30.0,
            min_value: 10.0,
            max_value: 100.0,
            sigma_multiplier: sigma,
            percentile: 95.0,
            use_percentile: false,
            // Warm-up metric: single sample per refresh.
            min_samples: 3,
        },
    }
}

/// Baseline statistics for one metric.
#[derive(Debug, Clone)]
pub struct BaselineData {
    pub mean: f64,
    pub std_dev: f64,
    pub median: f64,
    pub p95: f64,
    pub p99: f64,
    pub min_value: f64,
    pub max_value: f64,
    pub sample_count: usize,
    pub last_updated: DateTime<Utc>,
}

/// Successes required before the average-latency baseline warms up.
const AVG_LATENCY_WARMUP_SUCCESSES: u64 = 5;
/// Rolling window length for packet-loss percentage samples.
const LOSS_SAMPLE_WINDOW: usize = 30;
/// Cap on accumulated single-value samples for warm-up metrics.
const ACCUMULATOR_CAP: usize = 64;

pub struct AdaptiveThresholds {
    stats: Arc<StatsRepository>,
    update_interval_secs: i64,
    configs: HashMap<Metric, ThresholdConfig>,
    baselines: HashMap<Metric, BaselineData>,
    last_update: HashMap<Metric, DateTime<Utc>>,
    /// Rolling buffers for metrics that yield one sample per refresh.
    accumulators: HashMap<Metric, VecDeque<f64>>,
}

impl AdaptiveThresholds {
    pub fn new(
        stats: Arc<StatsRepository>,
        update_interval_minutes: u64,
        anomaly_sigma: f64,
    ) -> Self {
        let configs = Metric::ALL
            .iter()
            .map(|&m| (m, config_for(m, anomaly_sigma)))
            .collect();
        Self {
            stats,
            update_interval_secs: (update_interval_minutes * 60) as i64,
            configs,
            baselines: HashMap::new(),
            last_update: HashMap::new(),
            accumulators: HashMap::new(),
        }
    }

    /// Current adaptive threshold for the metric, clamped to its bounds.
    pub fn get_threshold(&mut self, metric: Metric) -> f64 {
        if self.should_update(metric) {
            self.update_baseline(metric);
        }

        let config = &self.configs[&metric];
        let threshold = match self.baselines.get(&metric) {
            Some(baseline) => {
                if config.use_percentile {
                    baseline.p95
                } else {
                    baseline.mean + config.sigma_multiplier * baseline.std_dev
                }
            }
            None => config.default_value,
        };

        threshold.clamp(config.min_value, config.max_value)
    }

    pub fn is_anomaly(&mut self, metric: Metric, value: f64) -> bool {
        value > self.get_threshold(metric)
    }

    pub fn baseline(&self, metric: Metric) -> Option<&BaselineData> {
        self.baselines.get(&metric)
    }

    /// Force-refresh all baselines.
    pub fn update_baselines(&mut self) {
        for metric in Metric::ALL {
            self.update_baseline(metric);
        }
    }

    pub fn clear(&mut self) {
        self.baselines.clear();
        self.last_update.clear();
        self.accumulators.clear();
    }

    fn should_update(&self, metric: Metric) -> bool {
        match self.last_update.get(&metric) {
            None => true,
            Some(last) => (Utc::now() - *last).num_seconds() >= self.update_interval_secs,
        }
    }

    fn update_baseline(&mut self, metric: Metric) {
        let snapshot = self.stats.get_snapshot();
        let samples = self.collect_samples(metric, &snapshot);
        self.last_update.insert(metric, Utc::now());

        let min_samples = self.configs[&metric].min_samples;
        if samples.len() < min_samples {
            debug!(
                metric = metric.as_str(),
                samples = samples.len(),
                "not enough samples for baseline"
            );
            return;
        }

        self.baselines.insert(metric, calculate_baseline(&samples));
    }

    /// Pull the metric-specific sample set out of the snapshot.
    fn collect_samples(&mut self, metric: Metric, snapshot: &StatsSnapshot) -> Vec<f64> {
        match metric {
            Metric::Latency => snapshot.latencies.clone(),
            Metric::AvgLatency => {
                if snapshot.success >= AVG_LATENCY_WARMUP_SUCCESSES {
                    self.accumulate(Metric::AvgLatency, snapshot.avg_latency());
                }
                self.accumulated(Metric::AvgLatency)
            }
            Metric::PacketLoss => loss_percentages(&snapshot.recent_results),
            Metric::Jitter => {
                if snapshot.jitter > 0.0 {
                    self.accumulate(Metric::Jitter, snapshot.jitter);
                }
                self.accumulated(Metric::Jitter)
            }
        }
    }

    fn accumulate(&mut self, metric: Metric, value: f64) {
        let buffer = self.accumulators.entry(metric).or_default();
        if buffer.len() == ACCUMULATOR_CAP {
            buffer.pop_front();
        }
        buffer.push_back(value);
    }

    fn accumulated(&self, metric: Metric) -> Vec<f64> {
        self.accumulators
            .get(&metric)
            .map(|b| b.iter().copied().collect())
            .unwrap_or_default()
    }

    #[cfg(test)]
    pub(crate) fn expire_baselines(&mut self) {
        self.last_update.clear();
    }
}

/// Rolling packet-loss percentages over 30-result windows.
fn loss_percentages(recent_results: &[bool]) -> Vec<f64> {
    if recent_results.len() < LOSS_SAMPLE_WINDOW {
        return Vec::new();
    }
    recent_results
        .windows(LOSS_SAMPLE_WINDOW)
        .map(|window| {
            let lost = window.iter().filter(|ok| !**ok).count();
            lost as f64 / window.len() as f64 * 100.0
        })
        .collect()
}

fn calculate_baseline(samples: &[f64]) -> BaselineData {
    let mut sorted = samples.to_vec();
    sorted.sort_by(|a, b| a.partial_cmp(b).unwrap_or(std::cmp::Ordering::Equal));

    let mean = samples.iter().sum::<f64>() / samples.len() as f64;
    let std_dev = if samples.len() < 2 {
        0.0
    } else {
        let variance = samples
            .iter()
            .map(|&v| {
                let diff = v - mean;
                diff * diff
            })
            .sum::<f64>()
            / (samples.len() - 1) as f64;
        variance.sqrt()
    };

    BaselineData {
        mean,
        std_dev,
        median: percentile(&sorted, 50.0),
        p95: percentile(&sorted, 95.0),
        p99: percentile(&sorted, 99.0),
        min_value: sorted[0],
        max_value: sorted[sorted.len() - 1],
        sample_count: samples.len(),
        last_updated: Utc::now(),
    }
}

/// Percentile over pre-sorted values.
fn percentile(sorted: &[f64], p: f64) -> f64 {
    if sorted.is_empty() {
        return 0.0;
    }
    let idx = ((p / 100.0) * (sorted.len() - 1) as f64) as usize;
    sorted[idx.min(sorted.len() - 1)]
}

#[cfg(test)]
mod tests {
    use super::*;

    fn repo_with_latencies(values: &[f64]) -> Arc<StatsRepository> {
        let repo = Arc::new(StatsRepository::new(1800, 600, 3));
        for &ms in values {
            repo.update_after_ping(true, Some(ms), false, 10_000.0, false);
        }
        repo
    }

    #[test]
    fn default_threshold_without_samples() {
        let repo = Arc::new(StatsRepository::new(1800, 600, 3));
        let mut adaptive = AdaptiveThresholds::new(repo, 60, 2.0);
        assert_eq!(adaptive.get_threshold(Metric::Latency), 100.0);
        assert_eq!(adaptive.get_threshold(Metric::PacketLoss), 5.0);
    }

    #[test]
    fn latency_baseline_uses_mean_plus_sigma() {
        let values: Vec<f64> = (0..50).map(|i| 20.0 + (i % 5) as f64).collect();
        let repo = repo_with_latencies(&values);
        let mut adaptive = AdaptiveThresholds::new(repo, 60, 2.0);

        let threshold = adaptive.get_threshold(Metric::Latency);
        let baseline = adaptive.baseline(Metric::Latency).unwrap();
        let expected = (baseline.mean + 2.0 * baseline.std_dev).clamp(20.0, 500.0);
        assert!((threshold - expected).abs() < 1e-9);
        assert_eq!(baseline.sample_count, 50);
    }

    #[test]
    fn threshold_is_clamped() {
        // Absurdly spread samples drive mean + sigma over the cap.
        let values: Vec<f64> = (0..50).map(|i| (i as f64) * 100.0).collect();
        let repo = repo_with_latencies(&values);
        let mut adaptive = AdaptiveThresholds::new(repo, 60, 2.0);
        assert_eq!(adaptive.get_threshold(Metric::Latency), 500.0);
    }

    #[test]
    fn packet_loss_uses_p95_of_rolling_windows() {
        let repo = Arc::new(StatsRepository::new(1800, 600, 3));
        // 60 results, the last 15 lost: rolling windows see up to 50% loss.
        for i in 0..60 {
            repo.update_after_ping(i < 45, Some(10.0), false, 10_000.0, false);
        }
        let mut adaptive = AdaptiveThresholds::new(repo, 60, 2.0);
        let threshold = adaptive.get_threshold(Metric::PacketLoss);
        // p95 of windows sits at 50%, clamped to the 20% max.
        assert_eq!(threshold, 20.0);
    }

    #[test]
    fn warm_up_metrics_accumulate_across_refreshes() {
        let repo = repo_with_latencies(&[30.0; 20]);
        let mut adaptive = AdaptiveThresholds::new(repo.clone(), 60, 2.0);

        // First refresh: one avg sample, below min_samples, default holds.
        assert_eq!(adaptive.get_threshold(Metric::AvgLatency), 100.0);

        for _ in 0..2 {
            adaptive.expire_baselines();
            let _ = adaptive.get_threshold(Metric::AvgLatency);
        }
        // Three accumulated samples of 30 ms: mean 30, sigma 0 -> clamp at 20 floor is below, so 30.
        let threshold = adaptive.get_threshold(Metric::AvgLatency);
        assert!((threshold - 30.0).abs() < 1e-9);
    }

    #[test]
    fn anomaly_is_strictly_above_threshold() {
        let repo = Arc::new(StatsRepository::new(1800, 600, 3));
        let mut adaptive = AdaptiveThresholds::new(repo, 60, 2.0);
        let threshold = adaptive.get_threshold(Metric::Jitter);
        assert!(!adaptive.is_anomaly(Metric::Jitter, threshold));
        assert!(adaptive.is_anomaly(Metric::Jitter, threshold + 0.1));
    }

    #[test]
    fn frozen_baseline_is_deterministic() {
        let repo = repo_with_latencies(&[25.0; 40]);
        let mut adaptive = AdaptiveThresholds::new(repo.clone(), 60, 2.0);
        let first = adaptive.get_threshold(Metric::Latency);

        // New data lands, but the baseline stays frozen until the interval.
        for _ in 0..100 {
            repo.update_after_ping(true, Some(400.0), false, 10_000.0, false);
        }
        assert_eq!(adaptive.get_threshold(Metric::Latency), first);
    }
}
