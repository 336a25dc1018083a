//! End-to-end behavior of the monitoring core, driven through the public
//! library surface without touching the network.

use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;

use pinger::alerts::{
    AlertAction, AlertContext, AlertEntity, AlertPriority, AlertType, SmartAlertManager,
};
use pinger::config::Settings;
use pinger::infra::{DaemonMetrics, ProcessRegistry};
use pinger::monitor::Monitor;
use pinger::probes::mtu::{binary_search_path_mtu, header_overhead};
use pinger::probes::ping::PingProber;
use pinger::probes::traceroute::TracerouteRunner;
use pinger::stats::{StatsRepository, ThresholdKey};
use pinger::tasks::route_analyzer::{apply_route_hysteresis, RouteTransition};
use pinger::tasks::WorkerPool;

fn build_monitor() -> (Monitor, Arc<StatsRepository>, Arc<Mutex<SmartAlertManager>>) {
    let settings = Arc::new(Settings::default());
    let registry = Arc::new(ProcessRegistry::new(50, Duration::from_secs(5)));
    let pool = Arc::new(WorkerPool::new(4));
    let stats = Arc::new(StatsRepository::new(
        settings.window_size,
        settings.latency_window,
        settings.alerts.max_active,
    ));
    let metrics = Arc::new(DaemonMetrics::new());
    let alerts = Arc::new(Mutex::new(SmartAlertManager::new(
        stats.clone(),
        settings.alerts.clone(),
    )));
    let ping = Arc::new(PingProber::new(registry.clone(), pool));
    let traceroute = Arc::new(TracerouteRunner::new(
        registry,
        stats.clone(),
        metrics.clone(),
        settings.traceroute.clone(),
    ));

    let monitor = Monitor::new(settings, stats.clone(), metrics, alerts.clone(), ping, traceroute);
    (monitor, stats, alerts)
}

fn observe(stats: &StatsRepository, seen: &mut HashSet<String>) {
    for alert in stats.get_snapshot().active_alerts {
        seen.insert(alert.message);
    }
}

#[tokio::test]
async fn loss_latching_end_to_end() {
    let (monitor, stats, alerts) = build_monitor();
    let mut seen_messages: HashSet<String> = HashSet::new();

    // 100 healthy pings.
    for _ in 0..100 {
        stats.update_after_ping(true, Some(20.0), true, 100.0, true);
        monitor.check_thresholds();
        observe(&stats, &mut seen_messages);
    }
    assert!(!stats.get_threshold_state(ThresholdKey::HighPacketLoss));
    assert!(!stats.get_threshold_state(ThresholdKey::ConnectionLost));

    // 300 straight failures.
    for _ in 0..300 {
        stats.update_after_ping(false, None, true, 100.0, true);
        monitor.check_thresholds();
        observe(&stats, &mut seen_messages);
    }
    assert!(stats.get_threshold_state(ThresholdKey::HighPacketLoss));
    assert!(stats.get_threshold_state(ThresholdKey::ConnectionLost));
    assert!(seen_messages.iter().any(|m| m.contains("High packet loss")));
    assert!(seen_messages.iter().any(|m| m.contains("Connection lost")));

    // The connection-lost latch produced exactly one pipeline NOTIFY; an
    // identical alert afterwards is a duplicate.
    let duplicate = AlertEntity::new(
        AlertType::ConnectionLost,
        "Connection lost (300 consecutive losses)",
        AlertPriority::Critical,
        AlertContext::new("ping", "connectivity", "availability", "1.1.1.1"),
    );
    let (action, _) = alerts.lock().process_alert(duplicate);
    assert_eq!(action, AlertAction::Suppress);

    // Enough successes to push every failure out of the recent window.
    for _ in 0..1800 {
        stats.update_after_ping(true, Some(20.0), true, 100.0, true);
        monitor.check_thresholds();
        observe(&stats, &mut seen_messages);
    }
    assert!(!stats.get_threshold_state(ThresholdKey::HighPacketLoss));
    assert!(!stats.get_threshold_state(ThresholdKey::ConnectionLost));
    assert!(seen_messages.iter().any(|m| m.contains("Packet loss normalized")));
    assert!(seen_messages.iter().any(|m| m.contains("Connection restored")));

    let snapshot = stats.get_snapshot();
    assert_eq!(snapshot.total, 2200);
    assert_eq!(snapshot.success + snapshot.failure, snapshot.total);
    assert_eq!(snapshot.max_consecutive_losses, 300);
}

#[test]
fn route_change_hysteresis_sequence() {
    let stats = StatsRepository::new(1800, 600, 3);
    let settings = Settings::default();

    // Analysis 1: two significant diffs, not yet a transition.
    let step = apply_route_hysteresis(&stats, &settings.route, &[3, 5]);
    assert_eq!(step.sig_count, 2);
    assert_eq!(step.consecutive_changes, 1);
    assert!(step.transition.is_none());
    assert!(!stats.is_route_changed());

    // Analysis 2: same diff again -> route changed, dump-worthy.
    let step = apply_route_hysteresis(&stats, &settings.route, &[3, 5]);
    assert_eq!(step.transition, Some(RouteTransition::Changed));
    assert!(stats.is_route_changed());
    assert!(step.consecutive_changes >= settings.route.save_on_change_consecutive);

    // Analyses 3-4: only ignored leading-hop noise -> stable again.
    let step = apply_route_hysteresis(&stats, &settings.route, &[0]);
    assert!(step.transition.is_none());
    assert!(stats.is_route_changed());

    let step = apply_route_hysteresis(&stats, &settings.route, &[0]);
    assert_eq!(step.transition, Some(RouteTransition::Stabilized));
    assert!(!stats.is_route_changed());
}

#[test]
fn root_cause_grouping_scenario() {
    let stats = Arc::new(StatsRepository::new(1800, 600, 3));
    let mut manager = SmartAlertManager::new(stats, Settings::default().alerts);
    manager.enable_adaptive_thresholds = false;

    let lost = AlertEntity::new(
        AlertType::ConnectionLost,
        "Connection lost (5 consecutive losses)",
        AlertPriority::Medium,
        AlertContext::new("ping", "connectivity", "availability", "1.1.1.1"),
    );
    let (action, group) = manager.process_alert(lost);
    assert_eq!(action, AlertAction::Notify);
    let first = group.expect("grouping enabled");

    let slow = AlertEntity::new(
        AlertType::HighLatency,
        "Latency spike following the outage",
        AlertPriority::Medium,
        AlertContext::new("ping", "latency", "performance", "1.1.1.1"),
    );
    let (action, group) = manager.process_alert(slow);
    assert_eq!(action, AlertAction::Group);
    let second = group.expect("grouping enabled");

    assert_eq!(first.group_id, second.group_id);
    assert_eq!(second.count, 2);
    assert_eq!(second.priority, AlertPriority::Critical);
}

#[test]
fn dedup_by_identity_and_wording() {
    let stats = Arc::new(StatsRepository::new(1800, 600, 3));
    let mut manager = SmartAlertManager::new(stats, Settings::default().alerts);
    manager.enable_adaptive_thresholds = false;

    let ctx = AlertContext::new("ping", "latency", "performance", "1.1.1.1");

    // Same type and context: identical identity class, whatever the wording.
    let a = AlertEntity::new(
        AlertType::HighJitter,
        "High jitter: 42.3 ms",
        AlertPriority::Medium,
        ctx.clone(),
    );
    let b = AlertEntity::new(
        AlertType::HighJitter,
        "High jitter: 42.5 ms",
        AlertPriority::Medium,
        ctx.clone(),
    );
    assert_eq!(a.fingerprint, b.fingerprint);

    let (action, _) = manager.process_alert(a);
    assert_eq!(action, AlertAction::Notify);
    let (action, _) = manager.process_alert(b);
    assert_eq!(action, AlertAction::Suppress);

    // A distinct identity (different threshold) with unrelated wording is not
    // similar enough to suppress.
    let mut metadata = std::collections::HashMap::new();
    metadata.insert("threshold".to_string(), serde_json::json!(99));
    let c = AlertEntity::with_metadata(
        AlertType::HighJitter,
        "Jitter elevated",
        AlertPriority::Medium,
        ctx,
        metadata,
    );
    let (action, _) = manager.process_alert(c);
    assert_ne!(action, AlertAction::Suppress);
}

#[tokio::test]
async fn path_mtu_binary_search_with_df_drop() {
    // DF packets above 1400 bytes total get dropped on the path.
    let overhead = header_overhead(false);
    let result = binary_search_path_mtu(500, 1500, overhead, |payload| async move {
        payload + overhead <= 1400
    })
    .await;
    assert_eq!(result, Some(1400));

    // Clean path: converge on the full local MTU.
    let result =
        binary_search_path_mtu(500, 1500, overhead, |_| async { true }).await;
    assert_eq!(result, Some(1500));
}

#[test]
fn rate_limiter_burst_boundary() {
    let stats = Arc::new(StatsRepository::new(1800, 600, 3));
    let mut manager = SmartAlertManager::new(stats, Settings::default().alerts);
    manager.enable_adaptive_thresholds = false;

    // Five distinct-fingerprint, non-grouping alerts: all pass.
    for i in 0..5 {
        let alert = AlertEntity::new(
            AlertType::Anomaly,
            format!("anomaly {i}"),
            AlertPriority::Medium,
            AlertContext::new(
                format!("svc{i}"),
                format!("comp{i}"),
                "statistical",
                format!("10.0.0.{i}"),
            ),
        );
        let (action, _) = manager.process_alert(alert);
        assert_eq!(action, AlertAction::Notify, "alert {i} should notify");
    }

    // The sixth inside the burst window is rate limited.
    let alert = AlertEntity::new(
        AlertType::Anomaly,
        "anomaly 6",
        AlertPriority::Medium,
        AlertContext::new("svc6", "comp6", "statistical", "10.0.0.6"),
    );
    let (action, _) = manager.process_alert(alert);
    assert_eq!(action, AlertAction::RateLimited);

    let metrics = manager.get_metrics();
    assert_eq!(metrics.rate_limited_alerts, 1);
    assert_eq!(metrics.total_alerts, 6);
}

#[test]
fn snapshot_immutability_under_concurrent_style_mutation() {
    let stats = StatsRepository::new(1800, 600, 3);
    for i in 0..50 {
        stats.update_after_ping(i % 7 != 0, Some(10.0 + i as f64), false, 1000.0, false);
    }

    let mut snapshot = stats.get_snapshot();
    let live_before = stats.get_snapshot();

    snapshot.latencies.clear();
    snapshot.recent_results.clear();
    snapshot.public_ip = "tampered".into();

    let live_after = stats.get_snapshot();
    assert_eq!(live_before.latencies.len(), live_after.latencies.len());
    assert_eq!(live_before.recent_results.len(), live_after.recent_results.len());
    assert_eq!(live_after.public_ip, "N/A");
}
