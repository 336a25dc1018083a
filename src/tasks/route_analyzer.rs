//! Route analyzer task: periodic traceroute, diffing with hysteresis, alerts
//! and dump triggering on sustained change.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use parking_lot::Mutex;
use tracing::info;

use crate::alerts::{AlertContext, AlertEntity, AlertPriority, AlertType, SmartAlertManager};
use crate::analysis::route::{
    parse_traceroute_output, significant_diff_count, RouteAnalyzer,
};
use crate::config::{RouteSettings, Settings};
use crate::infra::DaemonMetrics;
use crate::probes::traceroute::TracerouteRunner;
use crate::stats::{StatsRepository, VisualAlertKind};
use crate::tasks::PeriodicTask;

/// Boundary crossed by one analysis pass.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RouteTransition {
    Changed,
    Stabilized,
}

/// Outcome of applying one analysis to the hysteresis counters.
#[derive(Debug, Clone, Copy)]
pub struct RouteStep {
    pub sig_count: usize,
    pub consecutive_changes: u32,
    pub transition: Option<RouteTransition>,
}

/// Feed one analysis' diff indices through the route-change hysteresis.
///
/// Transitions flip `route_changed` in the repository; the caller handles
/// alerts, metrics, and dump triggering.
pub fn apply_route_hysteresis(
    stats: &StatsRepository,
    settings: &RouteSettings,
    diff_indices: &[usize],
) -> RouteStep {
    let sig_count = significant_diff_count(diff_indices, settings.ignore_first_hops);
    let is_significant = sig_count >= settings.change_hop_diff;
    let (consecutive_changes, consecutive_ok) = stats.update_route_hysteresis(is_significant);

    let transition = if consecutive_changes >= settings.change_consecutive
        && !stats.is_route_changed()
    {
        stats.set_route_changed(true);
        Some(RouteTransition::Changed)
    } else if consecutive_ok >= settings.change_consecutive && stats.is_route_changed() {
        stats.set_route_changed(false);
        Some(RouteTransition::Stabilized)
    } else {
        None
    };

    RouteStep {
        sig_count,
        consecutive_changes,
        transition,
    }
}

pub struct RouteAnalyzerTask {
    settings: Arc<Settings>,
    stats: Arc<StatsRepository>,
    metrics: Arc<DaemonMetrics>,
    alerts: Arc<Mutex<SmartAlertManager>>,
    traceroute: Arc<TracerouteRunner>,
    analyzer: RouteAnalyzer,
}

impl RouteAnalyzerTask {
    pub fn new(
        settings: Arc<Settings>,
        stats: Arc<StatsRepository>,
        metrics: Arc<DaemonMetrics>,
        alerts: Arc<Mutex<SmartAlertManager>>,
        traceroute: Arc<TracerouteRunner>,
    ) -> Self {
        let analyzer = RouteAnalyzer::new(settings.route.clone());
        Self {
            settings,
            stats,
            metrics,
            alerts,
            traceroute,
            analyzer,
        }
    }

    fn pipeline_alert(&self, alert_type: AlertType, message: String) {
        let alert = AlertEntity::new(
            alert_type,
            message,
            AlertPriority::Medium,
            AlertContext::new("route", "network", "availability", &self.settings.target_ip),
        );
        let _ = self.alerts.lock().process_alert(alert);
    }
}

#[async_trait]
impl PeriodicTask for RouteAnalyzerTask {
    fn name(&self) -> &'static str {
        "RouteAnalyzer"
    }

    fn interval(&self) -> Duration {
        Duration::from_secs(self.settings.route.analysis_interval_secs)
    }

    fn enabled(&self) -> bool {
        self.settings.route.enabled
    }

    async fn execute(&mut self) -> anyhow::Result<()> {
        let output = self.traceroute.run(&self.settings.target_ip).await?;
        let hops = parse_traceroute_output(&output);
        let analysis = self.analyzer.analyze_route(hops);

        let step = apply_route_hysteresis(&self.stats, &self.settings.route, &analysis.diff_indices);

        match step.transition {
            Some(RouteTransition::Changed) => {
                self.stats
                    .add_alert("[i] Route changed", VisualAlertKind::Info);
                self.metrics.record_route_change();
                self.metrics.set_route_changed(true);
                info!(diff_count = step.sig_count, "route changed");
                self.pipeline_alert(
                    AlertType::RouteChange,
                    format!("Route changed ({} significant hops differ)", step.sig_count),
                );

                if step.consecutive_changes >= self.settings.route.save_on_change_consecutive {
                    self.traceroute.trigger(&self.settings.target_ip);
                }
            }
            Some(RouteTransition::Stabilized) => {
                self.stats
                    .add_alert("[i] Route stable", VisualAlertKind::Info);
                self.metrics.set_route_changed(false);
                info!("route stable again");
            }
            None => {}
        }

        self.stats.update_route(
            analysis.hops.clone(),
            analysis.problematic_hop,
            self.stats.is_route_changed(),
            step.sig_count,
        );

        if let Some(hop) = analysis.problematic_hop {
            self.stats.add_alert(
                format!("[!] Problematic hop: {hop}"),
                VisualAlertKind::Warning,
            );
            self.pipeline_alert(AlertType::HopIssue, format!("Problematic hop detected: {hop}"));
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn repo() -> StatsRepository {
        StatsRepository::new(1800, 600, 3)
    }

    #[test]
    fn two_significant_analyses_flip_the_latch() {
        let stats = repo();
        let settings = RouteSettings::default();

        // diff at hops 3 and 5: significant, but one analysis is not enough.
        let step = apply_route_hysteresis(&stats, &settings, &[3, 5]);
        assert_eq!(step.sig_count, 2);
        assert_eq!(step.consecutive_changes, 1);
        assert!(step.transition.is_none());
        assert!(!stats.is_route_changed());

        let step = apply_route_hysteresis(&stats, &settings, &[3, 5]);
        assert_eq!(step.transition, Some(RouteTransition::Changed));
        assert!(stats.is_route_changed());
    }

    #[test]
    fn leading_hop_noise_is_ignored() {
        let stats = repo();
        let settings = RouteSettings::default();

        // Only hops 0 and 1 differ: inside the ignored prefix.
        for _ in 0..5 {
            let step = apply_route_hysteresis(&stats, &settings, &[0, 1]);
            assert_eq!(step.sig_count, 0);
            assert!(step.transition.is_none());
        }
        assert!(!stats.is_route_changed());
    }

    #[test]
    fn stabilization_needs_the_same_consecutive_count() {
        let stats = repo();
        let settings = RouteSettings::default();

        apply_route_hysteresis(&stats, &settings, &[3, 5]);
        apply_route_hysteresis(&stats, &settings, &[3, 5]);
        assert!(stats.is_route_changed());

        let step = apply_route_hysteresis(&stats, &settings, &[0]);
        assert!(step.transition.is_none());
        assert!(stats.is_route_changed());

        let step = apply_route_hysteresis(&stats, &settings, &[0]);
        assert_eq!(step.transition, Some(RouteTransition::Stabilized));
        assert!(!stats.is_route_changed());
    }

    #[test]
    fn repeated_changed_analyses_do_not_retransition() {
        let stats = repo();
        let settings = RouteSettings::default();

        apply_route_hysteresis(&stats, &settings, &[3, 5]);
        apply_route_hysteresis(&stats, &settings, &[3, 5]);
        let step = apply_route_hysteresis(&stats, &settings, &[3, 5]);
        assert!(step.transition.is_none());
        assert!(stats.is_route_changed());
    }
}
