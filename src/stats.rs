//! Stats repository: the single authoritative mutable store.
//!
//! Every background task writes through here; the UI, metrics and health
//! collaborators read immutable deep-copy snapshots. One mutex guards the
//! whole structure — no field is reachable without it.

use std::collections::VecDeque;

use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};

use crate::analysis::problem::{Prediction, ProblemKind};
use crate::analysis::route::RouteHop;
use crate::probes::hops::HopRecord;

/// Presentation token for the most recent ping.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum PingStatus {
    Ok,
    Timeout,
    NotAvailable,
}

impl std::fmt::Display for PingStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            PingStatus::Ok => write!(f, "OK"),
            PingStatus::Timeout => write!(f, "Timeout"),
            PingStatus::NotAvailable => write!(f, "N/A"),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum DnsStatus {
    Ok,
    Slow,
    Failed,
    NotAvailable,
}

impl std::fmt::Display for DnsStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            DnsStatus::Ok => write!(f, "OK"),
            DnsStatus::Slow => write!(f, "Slow"),
            DnsStatus::Failed => write!(f, "Failed"),
            DnsStatus::NotAvailable => write!(f, "N/A"),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum MtuStatus {
    Ok,
    Reduced,
    Fragmented,
    NotAvailable,
}

impl MtuStatus {
    pub fn is_issue(&self) -> bool {
        matches!(self, MtuStatus::Reduced | MtuStatus::Fragmented)
    }

    /// Gauge encoding: 0 = ok, 1 = reduced, 2 = fragmented.
    pub fn as_gauge(&self) -> u64 {
        match self {
            MtuStatus::Ok | MtuStatus::NotAvailable => 0,
            MtuStatus::Reduced => 1,
            MtuStatus::Fragmented => 2,
        }
    }
}

impl std::fmt::Display for MtuStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            MtuStatus::Ok => write!(f, "OK"),
            MtuStatus::Reduced => write!(f, "Reduced"),
            MtuStatus::Fragmented => write!(f, "Fragmented"),
            MtuStatus::NotAvailable => write!(f, "N/A"),
        }
    }
}

/// Keys of the four edge-triggered threshold latches.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ThresholdKey {
    HighPacketLoss,
    HighAvgLatency,
    ConnectionLost,
    HighJitter,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ThresholdStates {
    pub high_packet_loss: bool,
    pub high_avg_latency: bool,
    pub connection_lost: bool,
    pub high_jitter: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum VisualAlertKind {
    Info,
    Success,
    Warning,
    Critical,
}

/// One line in the on-screen alert panel.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct VisualAlert {
    pub message: String,
    pub kind: VisualAlertKind,
    pub time: DateTime<Utc>,
}

/// Result of one record-type DNS check.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DnsRecordCheck {
    pub record_type: String,
    pub success: bool,
    pub response_time_ms: Option<f64>,
    pub records: Vec<String>,
    pub error: Option<String>,
}

/// Result of one DNS benchmark run against one server.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DnsBenchmark {
    pub server: String,
    pub test_type: String,
    pub domain: String,
    pub queries: u32,
    pub min_ms: f64,
    pub avg_ms: f64,
    pub max_ms: f64,
    pub std_dev: f64,
    /// Fraction of queries answered
    pub reliability: f64,
}

#[derive(Debug)]
struct StatsInner {
    total: u64,
    success: u64,
    failure: u64,
    last_status: PingStatus,
    last_latency_ms: Option<f64>,
    min_latency: f64,
    max_latency: f64,
    total_latency_sum: f64,
    latencies: VecDeque<f64>,
    jitter: f64,
    consecutive_losses: u32,
    max_consecutive_losses: u32,
    recent_results: VecDeque<bool>,

    public_ip: String,
    country: String,
    country_code: Option<String>,
    previous_ip: Option<String>,
    ip_change_time: Option<DateTime<Utc>>,

    threshold_states: ThresholdStates,

    dns_resolve_time: Option<f64>,
    dns_status: DnsStatus,
    dns_records: Vec<DnsRecordCheck>,
    dns_benchmarks: Vec<DnsBenchmark>,

    local_mtu: Option<u32>,
    path_mtu: Option<u32>,
    mtu_status: MtuStatus,
    mtu_consecutive_issues: u32,
    mtu_consecutive_ok: u32,
    mtu_last_status_change: Option<DateTime<Utc>>,

    last_ttl: Option<u32>,
    ttl_hops: Option<u32>,
    ttl_history: VecDeque<u32>,

    current_problem_type: ProblemKind,
    problem_prediction: Prediction,
    problem_pattern: String,

    route_hops: Vec<RouteHop>,
    route_problematic_hop: Option<u32>,
    route_changed: bool,
    route_consecutive_changes: u32,
    route_consecutive_ok: u32,
    route_last_change_time: Option<DateTime<Utc>>,
    route_last_diff_count: usize,

    hop_monitor_hops: Vec<HopRecord>,
    hop_monitor_discovering: bool,

    active_alerts: Vec<VisualAlert>,

    last_traceroute_time: Option<DateTime<Utc>>,
    traceroute_running: bool,

    start_time: Option<DateTime<Utc>>,
    last_problem_time: Option<DateTime<Utc>>,
    last_alert_time: Option<DateTime<Utc>>,
}

/// Immutable deep-copy view for UI / metrics / analyzers.
#[derive(Debug, Clone)]
pub struct StatsSnapshot {
    pub total: u64,
    pub success: u64,
    pub failure: u64,
    pub last_status: PingStatus,
    pub last_latency_ms: Option<f64>,
    pub min_latency: f64,
    pub max_latency: f64,
    pub total_latency_sum: f64,
    pub latencies: Vec<f64>,
    pub jitter: f64,
    pub consecutive_losses: u32,
    pub max_consecutive_losses: u32,
    pub recent_results: Vec<bool>,

    pub public_ip: String,
    pub country: String,
    pub country_code: Option<String>,
    pub previous_ip: Option<String>,
    pub ip_change_time: Option<DateTime<Utc>>,

    pub threshold_states: ThresholdStates,

    pub dns_resolve_time: Option<f64>,
    pub dns_status: DnsStatus,
    pub dns_records: Vec<DnsRecordCheck>,
    pub dns_benchmarks: Vec<DnsBenchmark>,

    pub local_mtu: Option<u32>,
    pub path_mtu: Option<u32>,
    pub mtu_status: MtuStatus,
    pub mtu_consecutive_issues: u32,
    pub mtu_consecutive_ok: u32,
    pub mtu_last_status_change: Option<DateTime<Utc>>,

    pub last_ttl: Option<u32>,
    pub ttl_hops: Option<u32>,
    pub ttl_history: Vec<u32>,

    pub current_problem_type: ProblemKind,
    pub problem_prediction: Prediction,
    pub problem_pattern: String,

    pub route_hops: Vec<RouteHop>,
    pub route_problematic_hop: Option<u32>,
    pub route_changed: bool,
    pub route_consecutive_changes: u32,
    pub route_consecutive_ok: u32,
    pub route_last_change_time: Option<DateTime<Utc>>,
    pub route_last_diff_count: usize,

    pub hop_monitor_hops: Vec<HopRecord>,
    pub hop_monitor_discovering: bool,

    pub active_alerts: Vec<VisualAlert>,

    pub last_traceroute_time: Option<DateTime<Utc>>,
    pub traceroute_running: bool,

    pub start_time: Option<DateTime<Utc>>,
    pub last_problem_time: Option<DateTime<Utc>>,
    pub last_alert_time: Option<DateTime<Utc>>,
}

impl StatsSnapshot {
    /// Current average latency over successful pings, ms.
    pub fn avg_latency(&self) -> f64 {
        if self.success == 0 {
            0.0
        } else {
            self.total_latency_sum / self.success as f64
        }
    }

    /// Packet loss percent over the recent-results window.
    pub fn recent_loss_pct(&self) -> f64 {
        if self.recent_results.is_empty() {
            return 0.0;
        }
        let lost = self.recent_results.iter().filter(|ok| !**ok).count();
        lost as f64 / self.recent_results.len() as f64 * 100.0
    }

    /// Presentation string for the last RTT.
    pub fn last_latency_display(&self) -> String {
        match self.last_latency_ms {
            Some(ms) => format!("{ms:.2}"),
            None => "N/A".into(),
        }
    }
}

const TTL_HISTORY_SIZE: usize = 100;

pub struct StatsRepository {
    inner: Mutex<StatsInner>,
    latency_window: usize,
    window_size: usize,
    max_active_alerts: usize,
}

impl StatsRepository {
    pub fn new(window_size: usize, latency_window: usize, max_active_alerts: usize) -> Self {
        Self {
            inner: Mutex::new(StatsInner {
                total: 0,
                success: 0,
                failure: 0,
                last_status: PingStatus::NotAvailable,
                last_latency_ms: None,
                min_latency: f64::INFINITY,
                max_latency: 0.0,
                total_latency_sum: 0.0,
                latencies: VecDeque::with_capacity(latency_window),
                jitter: 0.0,
                consecutive_losses: 0,
                max_consecutive_losses: 0,
                recent_results: VecDeque::with_capacity(window_size),
                public_ip: "N/A".into(),
                country: "N/A".into(),
                country_code: None,
                previous_ip: None,
                ip_change_time: None,
                threshold_states: ThresholdStates::default(),
                dns_resolve_time: None,
                dns_status: DnsStatus::NotAvailable,
                dns_records: Vec::new(),
                dns_benchmarks: Vec::new(),
                local_mtu: None,
                path_mtu: None,
                mtu_status: MtuStatus::NotAvailable,
                mtu_consecutive_issues: 0,
                mtu_consecutive_ok: 0,
                mtu_last_status_change: None,
                last_ttl: None,
                ttl_hops: None,
                ttl_history: VecDeque::with_capacity(TTL_HISTORY_SIZE),
                current_problem_type: ProblemKind::None,
                problem_prediction: Prediction::Stable,
                problem_pattern: "...".into(),
                route_hops: Vec::new(),
                route_problematic_hop: None,
                route_changed: false,
                route_consecutive_changes: 0,
                route_consecutive_ok: 0,
                route_last_change_time: None,
                route_last_diff_count: 0,
                hop_monitor_hops: Vec::new(),
                hop_monitor_discovering: false,
                active_alerts: Vec::new(),
                last_traceroute_time: None,
                traceroute_running: false,
                start_time: None,
                last_problem_time: None,
                last_alert_time: None,
            }),
            latency_window,
            window_size,
            max_active_alerts,
        }
    }

    /// Update stats after a ping result.
    ///
    /// Returns `(high_latency_flag, loss_flag)` for the caller's alerting.
    pub fn update_after_ping(
        &self,
        ok: bool,
        latency: Option<f64>,
        alert_on_high_latency: bool,
        high_latency_threshold: f64,
        alert_on_packet_loss: bool,
    ) -> (bool, bool) {
        let mut high_latency_flag = false;
        let mut loss_flag = false;

        let mut s = self.inner.lock();
        s.total += 1;

        if ok {
            s.success += 1;
            s.consecutive_losses = 0;
            s.last_status = PingStatus::Ok;

            if let Some(latency) = latency {
                s.last_latency_ms = Some(latency);
                s.total_latency_sum += latency;
                if s.latencies.len() == self.latency_window {
                    s.latencies.pop_front();
                }
                s.latencies.push_back(latency);
                s.min_latency = s.min_latency.min(latency);
                s.max_latency = s.max_latency.max(latency);

                if alert_on_high_latency && latency > high_latency_threshold {
                    high_latency_flag = true;
                }

                s.jitter = jitter_of(&s.latencies);
            } else {
                s.last_latency_ms = None;
            }
        } else {
            s.failure += 1;
            s.consecutive_losses += 1;
            s.last_status = PingStatus::Timeout;
            s.last_latency_ms = None;
            s.max_consecutive_losses = s.max_consecutive_losses.max(s.consecutive_losses);
            s.last_problem_time = Some(Utc::now());

            if alert_on_packet_loss {
                loss_flag = true;
            }
        }

        if s.recent_results.len() == self.window_size {
            s.recent_results.pop_front();
        }
        s.recent_results.push_back(ok);

        (high_latency_flag, loss_flag)
    }

    pub fn set_start_time(&self, time: DateTime<Utc>) {
        self.inner.lock().start_time = Some(time);
    }

    pub fn update_dns(&self, resolve_time: Option<f64>, status: DnsStatus) {
        let mut s = self.inner.lock();
        s.dns_resolve_time = resolve_time;
        s.dns_status = status;
    }

    pub fn update_dns_detailed(&self, records: Vec<DnsRecordCheck>) {
        self.inner.lock().dns_records = records;
    }

    pub fn update_dns_benchmark(&self, benchmarks: Vec<DnsBenchmark>) {
        self.inner.lock().dns_benchmarks = benchmarks;
    }

    pub fn update_mtu(&self, local_mtu: Option<u32>, path_mtu: Option<u32>, status: MtuStatus) {
        let mut s = self.inner.lock();
        s.local_mtu = local_mtu;
        s.path_mtu = path_mtu;
        s.mtu_status = status;
    }

    pub fn mtu_status(&self) -> MtuStatus {
        self.inner.lock().mtu_status
    }

    pub fn local_mtu_known(&self) -> bool {
        self.inner.lock().local_mtu.is_some()
    }

    pub fn set_mtu_status_change_time(&self) {
        self.inner.lock().mtu_last_status_change = Some(Utc::now());
    }

    /// Bump one of the paired MTU hysteresis counters, reset the other.
    ///
    /// Returns `(consecutive_issues, consecutive_ok)`.
    pub fn update_mtu_hysteresis(&self, is_issue: bool) -> (u32, u32) {
        let mut s = self.inner.lock();
        if is_issue {
            s.mtu_consecutive_issues += 1;
            s.mtu_consecutive_ok = 0;
        } else {
            s.mtu_consecutive_ok += 1;
            s.mtu_consecutive_issues = 0;
        }
        (s.mtu_consecutive_issues, s.mtu_consecutive_ok)
    }

    pub fn update_ttl(&self, ttl: Option<u32>, hops: Option<u32>) {
        let mut s = self.inner.lock();
        s.last_ttl = ttl;
        s.ttl_hops = hops;
        if let Some(ttl) = ttl {
            if s.ttl_history.len() == TTL_HISTORY_SIZE {
                s.ttl_history.pop_front();
            }
            s.ttl_history.push_back(ttl);
        }
    }

    pub fn update_public_ip(&self, ip: String, country: String, country_code: Option<String>) {
        let mut s = self.inner.lock();
        s.public_ip = ip;
        s.country = country;
        s.country_code = country_code;
    }

    pub fn update_ip_change(&self, old_ip: String) {
        let mut s = self.inner.lock();
        s.previous_ip = Some(old_ip);
        s.ip_change_time = Some(Utc::now());
    }

    pub fn update_route(
        &self,
        hops: Vec<RouteHop>,
        problematic_hop: Option<u32>,
        route_changed: bool,
        diff_count: usize,
    ) {
        let mut s = self.inner.lock();
        s.route_hops = hops;
        s.route_problematic_hop = problematic_hop;
        s.route_changed = route_changed;
        s.route_last_diff_count = diff_count;
    }

    /// Bump one of the paired route hysteresis counters, reset the other.
    ///
    /// Returns `(consecutive_changes, consecutive_ok)`.
    pub fn update_route_hysteresis(&self, is_significant: bool) -> (u32, u32) {
        let mut s = self.inner.lock();
        if is_significant {
            s.route_consecutive_changes += 1;
            s.route_consecutive_ok = 0;
        } else {
            s.route_consecutive_ok += 1;
            s.route_consecutive_changes = 0;
        }
        (s.route_consecutive_changes, s.route_consecutive_ok)
    }

    pub fn is_route_changed(&self) -> bool {
        self.inner.lock().route_changed
    }

    pub fn set_route_changed(&self, changed: bool) {
        let mut s = self.inner.lock();
        s.route_changed = changed;
        s.route_last_change_time = Some(Utc::now());
    }

    pub fn update_problem_analysis(
        &self,
        problem_type: ProblemKind,
        prediction: Prediction,
        pattern: String,
    ) {
        let mut s = self.inner.lock();
        s.current_problem_type = problem_type;
        s.problem_prediction = prediction;
        s.problem_pattern = pattern;
    }

    pub fn update_threshold_state(&self, key: ThresholdKey, value: bool) {
        let mut s = self.inner.lock();
        match key {
            ThresholdKey::HighPacketLoss => s.threshold_states.high_packet_loss = value,
            ThresholdKey::HighAvgLatency => s.threshold_states.high_avg_latency = value,
            ThresholdKey::ConnectionLost => s.threshold_states.connection_lost = value,
            ThresholdKey::HighJitter => s.threshold_states.high_jitter = value,
        }
    }

    pub fn get_threshold_state(&self, key: ThresholdKey) -> bool {
        let s = self.inner.lock();
        match key {
            ThresholdKey::HighPacketLoss => s.threshold_states.high_packet_loss,
            ThresholdKey::HighAvgLatency => s.threshold_states.high_avg_latency,
            ThresholdKey::ConnectionLost => s.threshold_states.connection_lost,
            ThresholdKey::HighJitter => s.threshold_states.high_jitter,
        }
    }

    pub fn consecutive_losses(&self) -> u32 {
        self.inner.lock().consecutive_losses
    }

    pub fn update_hop_monitor(&self, hops: Vec<HopRecord>, discovering: bool) {
        let mut s = self.inner.lock();
        s.hop_monitor_hops = hops;
        s.hop_monitor_discovering = discovering;
    }

    /// Append a visual alert, dropping the oldest past the cap.
    pub fn add_alert(&self, message: impl Into<String>, kind: VisualAlertKind) {
        let mut s = self.inner.lock();
        s.active_alerts.push(VisualAlert {
            message: message.into(),
            kind,
            time: Utc::now(),
        });
        if s.active_alerts.len() > self.max_active_alerts {
            s.active_alerts.remove(0);
        }
    }

    /// Drop visual alerts older than `display_time_secs`.
    pub fn clean_old_alerts(&self, display_time_secs: u64) {
        let now = Utc::now();
        let mut s = self.inner.lock();
        s.active_alerts.retain(|a| {
            (now - a.time).num_seconds() < display_time_secs as i64
        });
    }

    /// Sound gate: true at most once per cooldown window.
    pub fn should_play_sound(&self, cooldown_secs: u64) -> bool {
        let now = Utc::now();
        let mut s = self.inner.lock();
        let allowed = match s.last_alert_time {
            None => true,
            Some(last) => (now - last).num_seconds() >= cooldown_secs as i64,
        };
        if allowed {
            s.last_alert_time = Some(now);
        }
        allowed
    }

    pub fn is_traceroute_running(&self) -> bool {
        self.inner.lock().traceroute_running
    }

    pub fn set_traceroute_running(&self, running: bool) {
        let mut s = self.inner.lock();
        s.traceroute_running = running;
        if running {
            s.last_traceroute_time = Some(Utc::now());
        }
    }

    pub fn last_traceroute_time(&self) -> Option<DateTime<Utc>> {
        self.inner.lock().last_traceroute_time
    }

    /// Deep-copy point-in-time view. No internal references leak.
    pub fn get_snapshot(&self) -> StatsSnapshot {
        let s = self.inner.lock();
        StatsSnapshot {
            total: s.total,
            success: s.success,
            failure: s.failure,
            last_status: s.last_status,
            last_latency_ms: s.last_latency_ms,
            min_latency: s.min_latency,
            max_latency: s.max_latency,
            total_latency_sum: s.total_latency_sum,
            latencies: s.latencies.iter().copied().collect(),
            jitter: s.jitter,
            consecutive_losses: s.consecutive_losses,
            max_consecutive_losses: s.max_consecutive_losses,
            recent_results: s.recent_results.iter().copied().collect(),
            public_ip: s.public_ip.clone(),
            country: s.country.clone(),
            country_code: s.country_code.clone(),
            previous_ip: s.previous_ip.clone(),
            ip_change_time: s.ip_change_time,
            threshold_states: s.threshold_states,
            dns_resolve_time: s.dns_resolve_time,
            dns_status: s.dns_status,
            dns_records: s.dns_records.clone(),
            dns_benchmarks: s.dns_benchmarks.clone(),
            local_mtu: s.local_mtu,
            path_mtu: s.path_mtu,
            mtu_status: s.mtu_status,
            mtu_consecutive_issues: s.mtu_consecutive_issues,
            mtu_consecutive_ok: s.mtu_consecutive_ok,
            mtu_last_status_change: s.mtu_last_status_change,
            last_ttl: s.last_ttl,
            ttl_hops: s.ttl_hops,
            ttl_history: s.ttl_history.iter().copied().collect(),
            current_problem_type: s.current_problem_type,
            problem_prediction: s.problem_prediction,
            problem_pattern: s.problem_pattern.clone(),
            route_hops: s.route_hops.clone(),
            route_problematic_hop: s.route_problematic_hop,
            route_changed: s.route_changed,
            route_consecutive_changes: s.route_consecutive_changes,
            route_consecutive_ok: s.route_consecutive_ok,
            route_last_change_time: s.route_last_change_time,
            route_last_diff_count: s.route_last_diff_count,
            hop_monitor_hops: s.hop_monitor_hops.clone(),
            hop_monitor_discovering: s.hop_monitor_discovering,
            active_alerts: s.active_alerts.clone(),
            last_traceroute_time: s.last_traceroute_time,
            traceroute_running: s.traceroute_running,
            start_time: s.start_time,
            last_problem_time: s.last_problem_time,
            last_alert_time: s.last_alert_time,
        }
    }
}

/// Mean absolute difference between consecutive latency samples.
fn jitter_of(latencies: &VecDeque<f64>) -> f64 {
    if latencies.len() < 2 {
        return 0.0;
    }
    let values: Vec<f64> = latencies.iter().copied().collect();
    let sum: f64 = values.windows(2).map(|w| (w[1] - w[0]).abs()).sum();
    sum / (values.len() - 1) as f64
}

#[cfg(test)]
mod tests {
    use super::*;

    fn repo() -> StatsRepository {
        StatsRepository::new(1800, 600, 3)
    }

    #[test]
    fn counters_sum_invariant() {
        let r = repo();
        for i in 0..100 {
            r.update_after_ping(i % 3 != 0, Some(20.0), false, 100.0, false);
        }
        let s = r.get_snapshot();
        assert_eq!(s.success + s.failure, s.total);
        assert_eq!(s.total, 100);
    }

    #[test]
    fn consecutive_losses_reset_on_success() {
        let r = repo();
        r.update_after_ping(false, None, false, 100.0, false);
        r.update_after_ping(false, None, false, 100.0, false);
        assert_eq!(r.get_snapshot().consecutive_losses, 2);
        r.update_after_ping(true, Some(10.0), false, 100.0, false);
        let s = r.get_snapshot();
        assert_eq!(s.consecutive_losses, 0);
        assert_eq!(s.max_consecutive_losses, 2);
    }

    #[test]
    fn windows_are_bounded() {
        let r = StatsRepository::new(10, 5, 3);
        for _ in 0..50 {
            r.update_after_ping(true, Some(1.0), false, 100.0, false);
        }
        let s = r.get_snapshot();
        assert_eq!(s.latencies.len(), 5);
        assert_eq!(s.recent_results.len(), 10);
    }

    #[test]
    fn jitter_is_mean_absolute_delta() {
        let r = repo();
        for ms in [10.0, 20.0, 10.0] {
            r.update_after_ping(true, Some(ms), false, 100.0, false);
        }
        // |20-10| and |10-20| -> mean 10
        assert!((r.get_snapshot().jitter - 10.0).abs() < 1e-9);
    }

    #[test]
    fn high_latency_and_loss_flags() {
        let r = repo();
        let (high, loss) = r.update_after_ping(true, Some(250.0), true, 100.0, true);
        assert!(high);
        assert!(!loss);
        let (high, loss) = r.update_after_ping(false, None, true, 100.0, true);
        assert!(!high);
        assert!(loss);
    }

    #[test]
    fn alerts_capped_at_max_active() {
        let r = repo();
        for i in 0..5 {
            r.add_alert(format!("alert {i}"), VisualAlertKind::Info);
        }
        let alerts = r.get_snapshot().active_alerts;
        assert_eq!(alerts.len(), 3);
        assert_eq!(alerts[0].message, "alert 2");
    }

    #[test]
    fn hysteresis_counters_are_paired() {
        let r = repo();
        assert_eq!(r.update_mtu_hysteresis(true), (1, 0));
        assert_eq!(r.update_mtu_hysteresis(true), (2, 0));
        assert_eq!(r.update_mtu_hysteresis(false), (0, 1));
        assert_eq!(r.update_route_hysteresis(true), (1, 0));
        assert_eq!(r.update_route_hysteresis(false), (0, 1));
        assert_eq!(r.update_route_hysteresis(false), (0, 2));
    }

    #[test]
    fn snapshot_is_a_deep_copy() {
        let r = repo();
        r.update_after_ping(true, Some(12.0), false, 100.0, false);
        let mut snap = r.get_snapshot();
        snap.latencies.push(999.0);
        snap.public_ip = "mutated".into();
        let fresh = r.get_snapshot();
        assert_eq!(fresh.latencies.len(), 1);
        assert_eq!(fresh.public_ip, "N/A");
    }

    #[test]
    fn threshold_latches_read_back() {
        let r = repo();
        assert!(!r.get_threshold_state(ThresholdKey::ConnectionLost));
        r.update_threshold_state(ThresholdKey::ConnectionLost, true);
        assert!(r.get_threshold_state(ThresholdKey::ConnectionLost));
        assert!(!r.get_threshold_state(ThresholdKey::HighJitter));
    }

    #[test]
    fn sound_gate_respects_cooldown() {
        let r = repo();
        assert!(r.should_play_sound(5));
        assert!(!r.should_play_sound(5));
        assert!(r.should_play_sound(0));
    }
}
