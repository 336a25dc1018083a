//! Smart alert manager: rate limiting, prioritization, deduplication,
//! grouping, history, and noise reduction in one pipeline.

use std::collections::{HashMap, VecDeque};
use std::sync::Arc;
use std::time::{Duration, Instant};

use chrono::Utc;
use tracing::{debug, info};

use crate::config::AlertSettings;
use crate::stats::StatsRepository;

use super::adaptive::{AdaptiveThresholds, Metric};
use super::dedup::AlertDeduplicator;
use super::grouper::AlertGrouper;
use super::prioritizer::{AlertPrioritizer, PriorityWeights};
use super::types::{
    AlertContext, AlertEntity, AlertGroup, AlertHistory, AlertPriority, AlertType,
};

/// Burst rule: this many events inside the burst window rate-limits.
const BURST_WINDOW: Duration = Duration::from_secs(10);
const MINUTE_WINDOW: Duration = Duration::from_secs(60);

/// Groups larger than this at LOW priority get muted by the noise pass.
const NOISE_GROUP_SIZE: usize = 10;

/// Decision for one processed alert.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AlertAction {
    Notify,
    Suppress,
    Group,
    RateLimited,
}

/// Observable pipeline counters.
#[derive(Debug, Clone, Copy, Default)]
pub struct AlertMetrics {
    pub total_alerts: u64,
    pub deduplicated_alerts: u64,
    pub suppressed_alerts: u64,
    pub rate_limited_alerts: u64,
    pub active_groups: usize,
}

pub struct SmartAlertManager {
    settings: AlertSettings,
    deduplicator: AlertDeduplicator,
    grouper: AlertGrouper,
    prioritizer: AlertPrioritizer,
    adaptive: AdaptiveThresholds,
    history: AlertHistory,
    timestamps: VecDeque<Instant>,
    metrics: AlertMetrics,

    pub enable_deduplication: bool,
    pub enable_grouping: bool,
    pub enable_dynamic_priority: bool,
    pub enable_adaptive_thresholds: bool,
}

impl SmartAlertManager {
    pub fn new(stats: Arc<StatsRepository>, settings: AlertSettings) -> Self {
        let deduplicator = AlertDeduplicator::new(
            settings.dedup_window_secs,
            settings.similarity_threshold,
            true,
        );
        let grouper = AlertGrouper::new(settings.group_window_secs, 20);
        let prioritizer = AlertPrioritizer::new(
            PriorityWeights::default(),
            (settings.escalation_time_minutes * 60) as f64,
        );
        let adaptive = AdaptiveThresholds::new(
            stats,
            settings.adaptive_update_interval_minutes,
            settings.anomaly_sigma,
        );
        let enable_adaptive = settings.adaptive_enabled;

        Self {
            settings,
            deduplicator,
            grouper,
            prioritizer,
            adaptive,
            history: AlertHistory::default(),
            timestamps: VecDeque::new(),
            metrics: AlertMetrics::default(),
            enable_deduplication: true,
            enable_grouping: true,
            enable_dynamic_priority: true,
            enable_adaptive_thresholds: enable_adaptive,
        }
    }

    /// Gate a metric-driven alert on the adaptive threshold.
    ///
    /// Below-threshold values produce `(false, None)`; anything else yields a
    /// ready-to-process entity (priority recomputed later).
    pub fn should_trigger_alert(
        &mut self,
        metric: Metric,
        value: f64,
        alert_type: AlertType,
        context: AlertContext,
        message: impl Into<String>,
    ) -> (bool, Option<AlertEntity>) {
        if self.enable_adaptive_thresholds && !self.adaptive.is_anomaly(metric, value) {
            return (false, None);
        }

        let mut metadata = HashMap::new();
        metadata.insert("metric".to_string(), serde_json::json!(metric.as_str()));
        metadata.insert("value".to_string(), serde_json::json!(value));

        let alert = AlertEntity::with_metadata(
            alert_type,
            message,
            AlertPriority::Medium,
            context,
            metadata,
        );
        (true, Some(alert))
    }

    /// Run one alert through the pipeline.
    pub fn process_alert(&mut self, mut alert: AlertEntity) -> (AlertAction, Option<AlertGroup>) {
        self.metrics.total_alerts += 1;

        if self.is_rate_limited() {
            self.metrics.rate_limited_alerts += 1;
            debug!(message = %alert.message, "alert rate limited");
            return (AlertAction::RateLimited, None);
        }

        if self.enable_dynamic_priority {
            alert.priority = self.prioritizer.calculate_priority(&alert, Utc::now());
        }

        if self.enable_deduplication && self.deduplicator.should_suppress(&alert) {
            self.metrics.deduplicated_alerts += 1;
            debug!(fingerprint = %alert.fingerprint, "alert deduplicated");
            return (AlertAction::Suppress, None);
        }

        let suppressed = alert.suppressed;
        let group = if self.enable_grouping {
            let group = self.grouper.add_to_group(alert.clone());
            self.metrics.active_groups = self.grouper.active_count();
            Some(group)
        } else {
            None
        };

        self.history.add(alert);
        self.timestamps.push_back(Instant::now());
        let cap = self.settings.rate_limit_per_minute * 2;
        while self.timestamps.len() > cap {
            self.timestamps.pop_front();
        }

        if suppressed {
            self.metrics.suppressed_alerts += 1;
            return (AlertAction::Suppress, group);
        }
        if let Some(g) = &group {
            if g.count > 1 {
                return (AlertAction::Group, group);
            }
        }
        (AlertAction::Notify, group)
    }

    /// Burst and per-minute rate limits over the recent timestamp ring.
    fn is_rate_limited(&self) -> bool {
        let now = Instant::now();

        let burst = self
            .timestamps
            .iter()
            .filter(|t| now.duration_since(**t) <= BURST_WINDOW)
            .count();
        if burst >= self.settings.burst_limit {
            return true;
        }

        let minute = self
            .timestamps
            .iter()
            .filter(|t| now.duration_since(**t) <= MINUTE_WINDOW)
            .count();
        minute >= self.settings.rate_limit_per_minute
    }

    /// Escalate groups older than the escalation threshold.
    pub fn escalate_aged_groups(&mut self) -> Vec<String> {
        let escalated = self
            .prioritizer
            .escalate_aged(self.grouper.groups_mut(), Utc::now());
        if !escalated.is_empty() {
            info!(count = escalated.len(), "escalated aged alert groups");
        }
        escalated
    }

    /// Mute large low-priority groups. Returns how many alerts were muted.
    pub fn suppress_noise(&mut self) -> usize {
        let mut suppressed = 0;
        for group in self.grouper.groups_mut() {
            if group.active && group.count > NOISE_GROUP_SIZE && group.priority == AlertPriority::Low
            {
                for alert in &mut group.alerts {
                    if !alert.suppressed {
                        alert.suppressed = true;
                        suppressed += 1;
                    }
                }
            }
        }
        self.metrics.suppressed_alerts += suppressed as u64;
        suppressed
    }

    /// Active groups, highest priority first.
    pub fn get_active_alerts(&self, min_priority: Option<AlertPriority>) -> Vec<AlertGroup> {
        let mut groups = self.grouper.active_groups_cloned();
        if let Some(min) = min_priority {
            groups.retain(|g| g.priority >= min);
        }
        self.prioritizer.sort_by_priority(&mut groups);
        groups
    }

    pub fn get_metrics(&mut self) -> AlertMetrics {
        self.metrics.active_groups = self.grouper.active_count();
        self.metrics
    }

    pub fn history(&self) -> &AlertHistory {
        &self.history
    }

    pub fn adaptive(&mut self) -> &mut AdaptiveThresholds {
        &mut self.adaptive
    }

    pub fn clear_all(&mut self) {
        self.deduplicator.clear();
        self.grouper.clear();
        self.adaptive.clear();
        self.history.clear();
        self.timestamps.clear();
        self.metrics = AlertMetrics::default();
    }

    #[cfg(test)]
    pub(crate) fn backdate_timestamps(&mut self, by: Duration) {
        for t in &mut self.timestamps {
            *t -= by;
        }
    }
}
