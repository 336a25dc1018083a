//! Main-loop monitoring: the per-ping update path and the four edge-triggered
//! threshold latches feeding the smart alert pipeline.

use std::sync::Arc;

use parking_lot::Mutex;
use tracing::{info, warn};

use crate::alerts::{
    AlertAction, AlertContext, AlertEntity, AlertPriority, AlertType, Metric, SmartAlertManager,
};
use crate::config::Settings;
use crate::infra::{single_instance, DaemonMetrics};
use crate::probes::ping::PingProber;
use crate::probes::traceroute::TracerouteRunner;
use crate::stats::{StatsRepository, StatsSnapshot, ThresholdKey, VisualAlertKind};

/// Terminal bell; the only audible output this daemon makes.
pub fn ring_bell() {
    use std::io::Write;
    print!("\x07");
    let _ = std::io::stdout().flush();
}

pub struct Monitor {
    settings: Arc<Settings>,
    stats: Arc<StatsRepository>,
    metrics: Arc<DaemonMetrics>,
    alerts: Arc<Mutex<SmartAlertManager>>,
    ping: Arc<PingProber>,
    traceroute: Arc<TracerouteRunner>,
}

impl Monitor {
    pub fn new(
        settings: Arc<Settings>,
        stats: Arc<StatsRepository>,
        metrics: Arc<DaemonMetrics>,
        alerts: Arc<Mutex<SmartAlertManager>>,
        ping: Arc<PingProber>,
        traceroute: Arc<TracerouteRunner>,
    ) -> Self {
        Self {
            settings,
            stats,
            metrics,
            alerts,
            ping,
            traceroute,
        }
    }

    /// One ping cycle: probe, update the store, emit metrics.
    pub async fn ping_once(&self) -> (bool, Option<f64>) {
        let thresholds = &self.settings.thresholds;
        let (ok, latency) = self.ping.ping_host(&self.settings.target_ip).await;

        let (high_latency, loss) = self.stats.update_after_ping(
            ok,
            latency,
            thresholds.alert_on_high_latency,
            thresholds.high_latency_ms,
            thresholds.alert_on_packet_loss,
        );

        if high_latency {
            self.play_sound();
        }
        if loss {
            self.play_sound();
            self.check_auto_traceroute();
        }

        self.metrics.record_ping(ok, latency);
        let snapshot = self.stats.get_snapshot();
        self.metrics
            .set_packet_loss_percent(snapshot.recent_loss_pct());

        (ok, latency)
    }

    fn play_sound(&self) {
        if self.settings.alerts.sound_enabled
            && self
                .stats
                .should_play_sound(self.settings.alerts.sound_cooldown_secs)
        {
            ring_bell();
        }
    }

    fn check_auto_traceroute(&self) {
        if !self.settings.traceroute.auto_enabled {
            return;
        }
        if self.stats.consecutive_losses() >= self.settings.traceroute.trigger_losses {
            // The runner enforces the cooldown and the running flag.
            self.traceroute.trigger(&self.settings.target_ip);
        }
    }

    /// Evaluate all four threshold latches against a fresh snapshot.
    pub fn check_thresholds(&self) {
        if !self.settings.thresholds.enabled {
            return;
        }

        let snapshot = self.stats.get_snapshot();
        self.check_packet_loss(&snapshot);
        self.check_avg_latency(&snapshot);
        self.check_connection_lost(&snapshot);
        self.check_jitter(&snapshot);
    }

    fn check_packet_loss(&self, snapshot: &StatsSnapshot) {
        let loss = snapshot.recent_loss_pct();
        let was_high = self.stats.get_threshold_state(ThresholdKey::HighPacketLoss);

        if loss > self.settings.thresholds.packet_loss_pct {
            if !was_high {
                self.stats
                    .update_threshold_state(ThresholdKey::HighPacketLoss, true);
                self.stats.add_alert(
                    format!("[!] High packet loss: {loss:.1}%"),
                    VisualAlertKind::Warning,
                );
                warn!(loss_pct = loss, "packet loss threshold exceeded");
                self.dispatch_metric_alert(
                    Metric::PacketLoss,
                    loss,
                    AlertType::PacketLoss,
                    AlertContext::new(
                        "ping",
                        "network",
                        "availability",
                        &self.settings.target_ip,
                    ),
                    format!("High packet loss: {loss:.1}%"),
                );
            }
        } else if was_high {
            self.stats
                .update_threshold_state(ThresholdKey::HighPacketLoss, false);
            self.stats
                .add_alert("[+] Packet loss normalized", VisualAlertKind::Info);
        }
    }

    fn check_avg_latency(&self, snapshot: &StatsSnapshot) {
        let avg = snapshot.avg_latency();
        let was_high = self.stats.get_threshold_state(ThresholdKey::HighAvgLatency);

        if avg > self.settings.thresholds.avg_latency_ms {
            if !was_high {
                self.stats
                    .update_threshold_state(ThresholdKey::HighAvgLatency, true);
                self.stats.add_alert(
                    format!("[!] High average latency: {avg:.1} ms"),
                    VisualAlertKind::Warning,
                );
                warn!(avg_ms = avg, "average latency threshold exceeded");
                self.dispatch_metric_alert(
                    Metric::AvgLatency,
                    avg,
                    AlertType::HighAvgLatency,
                    AlertContext::new("ping", "latency", "performance", &self.settings.target_ip),
                    format!("High average latency: {avg:.1} ms"),
                );
            }
        } else if was_high {
            self.stats
                .update_threshold_state(ThresholdKey::HighAvgLatency, false);
            self.stats
                .add_alert("[+] Latency normalized", VisualAlertKind::Info);
        }
    }

    fn check_connection_lost(&self, snapshot: &StatsSnapshot) {
        let losses = snapshot.consecutive_losses;
        let was_lost = self.stats.get_threshold_state(ThresholdKey::ConnectionLost);

        if losses >= self.settings.thresholds.consecutive_losses {
            if !was_lost {
                self.stats
                    .update_threshold_state(ThresholdKey::ConnectionLost, true);
                self.stats.add_alert(
                    format!("[X] Connection lost ({losses} in a row)"),
                    VisualAlertKind::Critical,
                );
                tracing::error!(consecutive = losses, "connection lost");

                let alert = AlertEntity::new(
                    AlertType::ConnectionLost,
                    format!("Connection lost ({losses} consecutive losses)"),
                    AlertPriority::Critical,
                    AlertContext::new(
                        "ping",
                        "connectivity",
                        "availability",
                        &self.settings.target_ip,
                    ),
                );
                let (action, _) = self.alerts.lock().process_alert(alert);
                if action == AlertAction::Notify {
                    self.play_sound();
                }
            }
        } else if was_lost {
            self.stats
                .update_threshold_state(ThresholdKey::ConnectionLost, false);
            self.stats
                .add_alert("[+] Connection restored", VisualAlertKind::Success);
            info!("connection restored");
        }
    }

    fn check_jitter(&self, snapshot: &StatsSnapshot) {
        let jitter = snapshot.jitter;
        let was_high = self.stats.get_threshold_state(ThresholdKey::HighJitter);

        if jitter > self.settings.thresholds.jitter_ms {
            if !was_high {
                self.stats
                    .update_threshold_state(ThresholdKey::HighJitter, true);
                self.stats.add_alert(
                    format!("[!] High jitter: {jitter:.1} ms"),
                    VisualAlertKind::Warning,
                );
                warn!(jitter_ms = jitter, "jitter threshold exceeded");
                self.dispatch_metric_alert(
                    Metric::Jitter,
                    jitter,
                    AlertType::HighJitter,
                    AlertContext::new("ping", "latency", "performance", &self.settings.target_ip),
                    format!("High jitter: {jitter:.1} ms"),
                );
            }
        } else if was_high {
            self.stats
                .update_threshold_state(ThresholdKey::HighJitter, false);
            self.stats
                .add_alert("[+] Jitter normalized", VisualAlertKind::Info);
        }
    }

    /// Run a metric-driven alert through the adaptive gate and the pipeline.
    fn dispatch_metric_alert(
        &self,
        metric: Metric,
        value: f64,
        alert_type: AlertType,
        context: AlertContext,
        message: String,
    ) {
        let mut manager = self.alerts.lock();
        let (should, alert) =
            manager.should_trigger_alert(metric, value, alert_type, context, message);
        if !should {
            return;
        }
        let Some(alert) = alert else { return };
        let (action, _) = manager.process_alert(alert);
        drop(manager);

        if action == AlertAction::Notify {
            self.play_sound();
        }
    }

    /// Expire old visual alerts.
    pub fn cleanup_alerts(&self) {
        self.stats
            .clean_old_alerts(self.settings.alerts.display_time_secs);
    }

    /// Surface notes left by a second process refusing to start.
    pub fn poll_instance_notifications(&self) {
        if let Some(note) = single_instance::take_notification() {
            self.stats
                .add_alert(format!("[i] {note}"), VisualAlertKind::Info);
        }
    }
}
