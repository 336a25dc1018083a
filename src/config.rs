//! Daemon configuration.
//!
//! A single typed `Settings` value built once at startup: defaults, then an
//! optional TOML file, then case-sensitive environment variable overrides.

use std::env;
use std::net::IpAddr;
use std::path::Path;
use std::time::Duration;

use serde::{Deserialize, Serialize};

/// Crate version, reported by the version checker and the health endpoint.
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Main configuration for the monitoring daemon.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct Settings {
    /// Monitored endpoint (IP literal or hostname)
    pub target_ip: String,
    /// Seconds between main-loop pings
    pub interval_secs: f64,
    /// Recent-results window length (one bool per ping)
    pub window_size: usize,
    /// Latency sample window length
    pub latency_window: usize,
    /// Graceful-shutdown budget for background tasks
    pub shutdown_timeout_secs: u64,
    /// Budget for force-killing leftover child processes
    pub force_kill_timeout_secs: u64,
    /// Semaphore bound on in-flight child processes
    pub max_concurrent_processes: usize,
    /// Bounded pool for blocking probe work
    pub worker_pool_size: usize,

    pub thresholds: ThresholdSettings,
    pub dns: DnsSettings,
    pub mtu: MtuSettings,
    pub ttl: TtlSettings,
    pub public_ip: PublicIpSettings,
    pub hops: HopSettings,
    pub route: RouteSettings,
    pub problem: ProblemSettings,
    pub traceroute: TracerouteSettings,
    pub alerts: AlertSettings,
    pub metrics: MetricsSettings,
    pub health: HealthSettings,
    pub version_check: VersionCheckSettings,
    pub logging: LogSettings,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            target_ip: "1.1.1.1".into(),
            interval_secs: 1.0,
            window_size: 1800,
            latency_window: 600,
            shutdown_timeout_secs: 10,
            force_kill_timeout_secs: 5,
            max_concurrent_processes: 50,
            worker_pool_size: 4,
            thresholds: ThresholdSettings::default(),
            dns: DnsSettings::default(),
            mtu: MtuSettings::default(),
            ttl: TtlSettings::default(),
            public_ip: PublicIpSettings::default(),
            hops: HopSettings::default(),
            route: RouteSettings::default(),
            problem: ProblemSettings::default(),
            traceroute: TracerouteSettings::default(),
            alerts: AlertSettings::default(),
            metrics: MetricsSettings::default(),
            health: HealthSettings::default(),
            version_check: VersionCheckSettings::default(),
            logging: LogSettings::default(),
        }
    }
}

/// Threshold latch configuration (main-loop checks).
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ThresholdSettings {
    pub enabled: bool,
    /// Packet loss latch, percent over the recent-results window
    pub packet_loss_pct: f64,
    /// Average latency latch, milliseconds
    pub avg_latency_ms: f64,
    /// Connection-lost latch, consecutive losses
    pub consecutive_losses: u32,
    /// Jitter latch, milliseconds
    pub jitter_ms: f64,
    /// Per-ping high latency flag, milliseconds
    pub high_latency_ms: f64,
    /// Sound on per-ping packet loss
    pub alert_on_packet_loss: bool,
    /// Sound on per-ping high latency
    pub alert_on_high_latency: bool,
}

impl Default for ThresholdSettings {
    fn default() -> Self {
        Self {
            enabled: true,
            packet_loss_pct: 5.0,
            avg_latency_ms: 100.0,
            consecutive_losses: 5,
            jitter_ms: 30.0,
            high_latency_ms: 100.0,
            alert_on_packet_loss: true,
            alert_on_high_latency: true,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct DnsSettings {
    pub enabled: bool,
    pub test_domain: String,
    pub check_interval_secs: u64,
    /// Resolutions slower than this are reported as Slow
    pub slow_threshold_ms: f64,
    /// Record types probed in the detailed check
    pub record_types: Vec<String>,
    pub benchmark_enabled: bool,
    pub benchmark_domain: String,
    /// "system" or explicit resolver IPs
    pub benchmark_servers: Vec<String>,
}

impl Default for DnsSettings {
    fn default() -> Self {
        Self {
            enabled: true,
            test_domain: "cloudflare.com".into(),
            check_interval_secs: 10,
            slow_threshold_ms: 100.0,
            record_types: ["A", "AAAA", "CNAME", "MX", "TXT", "NS"]
                .iter()
                .map(|s| s.to_string())
                .collect(),
            benchmark_enabled: true,
            benchmark_domain: "cloudflare.com".into(),
            benchmark_servers: vec!["system".into()],
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct MtuSettings {
    pub enabled: bool,
    pub check_interval_secs: u64,
    /// Path MTU discovery cadence (cached between runs)
    pub path_check_interval_secs: u64,
    /// Minimal local-vs-path difference considered an issue (bytes)
    pub diff_threshold: u32,
    /// Consecutive bad checks before the status flips
    pub issue_consecutive: u32,
    /// Consecutive good checks before the status clears
    pub clear_consecutive: u32,
}

impl Default for MtuSettings {
    fn default() -> Self {
        Self {
            enabled: true,
            check_interval_secs: 30,
            path_check_interval_secs: 120,
            diff_threshold: 50,
            issue_consecutive: 3,
            clear_consecutive: 2,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct TtlSettings {
    pub enabled: bool,
    pub check_interval_secs: u64,
}

impl Default for TtlSettings {
    fn default() -> Self {
        Self { enabled: true, check_interval_secs: 10 }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct PublicIpSettings {
    pub enabled: bool,
    pub check_interval_secs: u64,
}

impl Default for PublicIpSettings {
    fn default() -> Self {
        Self { enabled: true, check_interval_secs: 15 }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct HopSettings {
    pub enabled: bool,
    /// Seconds between hop ping cycles
    pub ping_interval_secs: f64,
    /// Per-hop ping wait, seconds
    pub ping_timeout_secs: f64,
    pub rediscover_interval_secs: u64,
}

impl Default for HopSettings {
    fn default() -> Self {
        Self {
            enabled: true,
            ping_interval_secs: 1.0,
            ping_timeout_secs: 0.5,
            rediscover_interval_secs: 3600,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RouteSettings {
    pub enabled: bool,
    pub analysis_interval_secs: u64,
    /// Consecutive significant analyses before route_changed flips
    pub change_consecutive: u32,
    /// Minimal changed-hop count considered significant
    pub change_hop_diff: usize,
    /// Diff indices below this are local-network noise
    pub ignore_first_hops: usize,
    /// Save a traceroute dump after this many consecutive changes
    pub save_on_change_consecutive: u32,
    /// Per-hop average latency considered problematic, milliseconds
    pub hop_timeout_threshold_ms: f64,
    pub history_size: usize,
}

impl Default for RouteSettings {
    fn default() -> Self {
        Self {
            enabled: true,
            analysis_interval_secs: 1800,
            change_consecutive: 2,
            change_hop_diff: 2,
            ignore_first_hops: 2,
            save_on_change_consecutive: 2,
            hop_timeout_threshold_ms: 3000.0,
            history_size: 10,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ProblemSettings {
    pub enabled: bool,
    pub analysis_interval_secs: u64,
    pub history_size: usize,
    /// Same-type problem records inside this window are not re-recorded
    pub log_suppression_secs: u64,
}

impl Default for ProblemSettings {
    fn default() -> Self {
        Self {
            enabled: true,
            analysis_interval_secs: 60,
            history_size: 100,
            log_suppression_secs: 6000,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct TracerouteSettings {
    /// Auto-trigger on consecutive losses
    pub auto_enabled: bool,
    pub trigger_losses: u32,
    pub cooldown_secs: u64,
    pub max_hops: u32,
}

impl Default for TracerouteSettings {
    fn default() -> Self {
        Self {
            auto_enabled: false,
            trigger_losses: 3,
            cooldown_secs: 300,
            max_hops: 15,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct AlertSettings {
    pub sound_enabled: bool,
    /// Minimum seconds between audible alerts
    pub sound_cooldown_secs: u64,
    /// Visual alert list cap
    pub max_active: usize,
    /// Visual alert time-to-live, seconds
    pub display_time_secs: u64,
    pub dedup_window_secs: u64,
    pub group_window_secs: u64,
    pub rate_limit_per_minute: usize,
    pub burst_limit: usize,
    pub escalation_time_minutes: u64,
    pub similarity_threshold: f64,
    pub anomaly_sigma: f64,
    pub adaptive_update_interval_minutes: u64,
    pub adaptive_enabled: bool,
}

impl Default for AlertSettings {
    fn default() -> Self {
        Self {
            sound_enabled: true,
            sound_cooldown_secs: 5,
            max_active: 3,
            display_time_secs: 10,
            dedup_window_secs: 300,
            group_window_secs: 600,
            rate_limit_per_minute: 10,
            burst_limit: 5,
            escalation_time_minutes: 30,
            similarity_threshold: 0.85,
            anomaly_sigma: 2.0,
            adaptive_update_interval_minutes: 60,
            adaptive_enabled: true,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct MetricsSettings {
    pub enabled: bool,
    pub addr: String,
    pub port: u16,
}

impl Default for MetricsSettings {
    fn default() -> Self {
        Self { enabled: true, addr: "127.0.0.1".into(), port: 8000 }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct HealthSettings {
    pub enabled: bool,
    pub addr: String,
    pub port: u16,
    /// Basic auth credentials; auth disabled when either is empty
    pub auth_user: Option<String>,
    pub auth_pass: Option<String>,
    /// Static token alternative to basic auth
    pub token: Option<String>,
    pub token_header: String,
    /// Peers allowed to assert X-Forwarded-For
    pub trusted_proxies: Vec<IpAddr>,
}

impl Default for HealthSettings {
    fn default() -> Self {
        Self {
            enabled: true,
            addr: "127.0.0.1".into(),
            port: 8001,
            auth_user: None,
            auth_pass: None,
            token: None,
            token_header: "X-Health-Token".into(),
            trusted_proxies: Vec::new(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct VersionCheckSettings {
    pub enabled: bool,
    pub check_interval_secs: u64,
}

impl Default for VersionCheckSettings {
    fn default() -> Self {
        Self { enabled: true, check_interval_secs: 3600 }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LogSettings {
    /// Log directory; defaults to ~/.pinger
    pub dir: Option<String>,
    pub level: String,
    pub truncate_on_start: bool,
}

impl Default for LogSettings {
    fn default() -> Self {
        Self { dir: None, level: "info".into(), truncate_on_start: true }
    }
}

impl Settings {
    /// Build settings: defaults, then optional TOML file, then env overrides.
    pub fn load(config_path: Option<&Path>) -> anyhow::Result<Self> {
        let mut settings = match config_path {
            Some(path) => {
                let content = std::fs::read_to_string(path)?;
                toml::from_str(&content)?
            }
            None => Self::default(),
        };
        settings.apply_env_overrides();
        Ok(settings)
    }

    pub fn interval(&self) -> Duration {
        Duration::from_secs_f64(self.interval_secs)
    }

    fn apply_env_overrides(&mut self) {
        env_string("TARGET_IP", &mut self.target_ip);
        env_f64("INTERVAL", &mut self.interval_secs);
        env_usize("WINDOW_SIZE", &mut self.window_size);
        env_usize("LATENCY_WINDOW", &mut self.latency_window);

        env_bool("ENABLE_THRESHOLD_ALERTS", &mut self.thresholds.enabled);
        env_f64("PACKET_LOSS_THRESHOLD", &mut self.thresholds.packet_loss_pct);
        env_f64("AVG_LATENCY_THRESHOLD", &mut self.thresholds.avg_latency_ms);
        env_u32("CONSECUTIVE_LOSS_THRESHOLD", &mut self.thresholds.consecutive_losses);
        env_f64("JITTER_THRESHOLD", &mut self.thresholds.jitter_ms);
        env_f64("HIGH_LATENCY_THRESHOLD", &mut self.thresholds.high_latency_ms);
        env_bool("ALERT_ON_PACKET_LOSS", &mut self.thresholds.alert_on_packet_loss);
        env_bool("ALERT_ON_HIGH_LATENCY", &mut self.thresholds.alert_on_high_latency);

        env_bool("ENABLE_DNS_MONITORING", &mut self.dns.enabled);
        env_string("DNS_TEST_DOMAIN", &mut self.dns.test_domain);
        env_u64("DNS_CHECK_INTERVAL", &mut self.dns.check_interval_secs);
        env_f64("DNS_SLOW_THRESHOLD", &mut self.dns.slow_threshold_ms);
        env_bool("ENABLE_DNS_BENCHMARK", &mut self.dns.benchmark_enabled);
        env_string("DNS_BENCHMARK_DOTCOM_DOMAIN", &mut self.dns.benchmark_domain);
        env_list("DNS_RECORD_TYPES", &mut self.dns.record_types);
        env_list("DNS_BENCHMARK_SERVERS", &mut self.dns.benchmark_servers);

        env_bool("ENABLE_MTU_MONITORING", &mut self.mtu.enabled);
        env_u64("MTU_CHECK_INTERVAL", &mut self.mtu.check_interval_secs);
        env_u64("PATH_MTU_CHECK_INTERVAL", &mut self.mtu.path_check_interval_secs);
        env_u32("MTU_DIFF_THRESHOLD", &mut self.mtu.diff_threshold);
        env_u32("MTU_ISSUE_CONSECUTIVE", &mut self.mtu.issue_consecutive);
        env_u32("MTU_CLEAR_CONSECUTIVE", &mut self.mtu.clear_consecutive);

        env_bool("ENABLE_TTL_MONITORING", &mut self.ttl.enabled);
        env_u64("TTL_CHECK_INTERVAL", &mut self.ttl.check_interval_secs);

        env_bool("ENABLE_IP_CHANGE_ALERT", &mut self.public_ip.enabled);
        env_u64("IP_CHECK_INTERVAL", &mut self.public_ip.check_interval_secs);

        env_bool("ENABLE_HOP_MONITORING", &mut self.hops.enabled);
        env_f64("HOP_PING_INTERVAL", &mut self.hops.ping_interval_secs);
        env_f64("HOP_PING_TIMEOUT", &mut self.hops.ping_timeout_secs);
        env_u64("HOP_REDISCOVER_INTERVAL", &mut self.hops.rediscover_interval_secs);

        env_bool("ENABLE_ROUTE_ANALYSIS", &mut self.route.enabled);
        env_u64("ROUTE_ANALYSIS_INTERVAL", &mut self.route.analysis_interval_secs);
        env_u32("ROUTE_CHANGE_CONSECUTIVE", &mut self.route.change_consecutive);
        env_usize("ROUTE_CHANGE_HOP_DIFF", &mut self.route.change_hop_diff);
        env_usize("ROUTE_IGNORE_FIRST_HOPS", &mut self.route.ignore_first_hops);
        env_u32("ROUTE_SAVE_ON_CHANGE_CONSECUTIVE", &mut self.route.save_on_change_consecutive);
        env_f64("HOP_TIMEOUT_THRESHOLD", &mut self.route.hop_timeout_threshold_ms);

        env_bool("ENABLE_PROBLEM_ANALYSIS", &mut self.problem.enabled);
        env_u64("PROBLEM_ANALYSIS_INTERVAL", &mut self.problem.analysis_interval_secs);
        env_u64("PROBLEM_LOG_SUPPRESSION_SECONDS", &mut self.problem.log_suppression_secs);

        env_bool("ENABLE_AUTO_TRACEROUTE", &mut self.traceroute.auto_enabled);
        env_u32("TRACEROUTE_TRIGGER_LOSSES", &mut self.traceroute.trigger_losses);
        env_u64("TRACEROUTE_COOLDOWN", &mut self.traceroute.cooldown_secs);
        env_u32("TRACEROUTE_MAX_HOPS", &mut self.traceroute.max_hops);

        env_bool("ENABLE_SOUND_ALERTS", &mut self.alerts.sound_enabled);
        env_u64("ALERT_COOLDOWN", &mut self.alerts.sound_cooldown_secs);
        env_usize("MAX_ACTIVE_ALERTS", &mut self.alerts.max_active);
        env_u64("ALERT_DISPLAY_TIME", &mut self.alerts.display_time_secs);
        env_u64("ALERT_DEDUP_WINDOW_SECONDS", &mut self.alerts.dedup_window_secs);
        env_u64("ALERT_GROUP_WINDOW_SECONDS", &mut self.alerts.group_window_secs);
        env_usize("ALERT_RATE_LIMIT_PER_MINUTE", &mut self.alerts.rate_limit_per_minute);
        env_usize("ALERT_BURST_LIMIT", &mut self.alerts.burst_limit);
        env_u64("ALERT_ESCALATION_TIME_MINUTES", &mut self.alerts.escalation_time_minutes);
        env_f64("ALERT_SIMILARITY_THRESHOLD", &mut self.alerts.similarity_threshold);
        env_f64("ADAPTIVE_ANOMALY_SIGMA", &mut self.alerts.anomaly_sigma);
        env_u64(
            "ADAPTIVE_UPDATE_INTERVAL_MINUTES",
            &mut self.alerts.adaptive_update_interval_minutes,
        );
        env_bool("ENABLE_ADAPTIVE_THRESHOLDS", &mut self.alerts.adaptive_enabled);

        env_bool("ENABLE_METRICS", &mut self.metrics.enabled);
        env_string("METRICS_ADDR", &mut self.metrics.addr);
        env_u16("METRICS_PORT", &mut self.metrics.port);

        env_bool("ENABLE_HEALTH_ENDPOINT", &mut self.health.enabled);
        env_string("HEALTH_ADDR", &mut self.health.addr);
        env_u16("HEALTH_PORT", &mut self.health.port);
        env_opt_string("HEALTH_AUTH_USER", &mut self.health.auth_user);
        env_opt_string("HEALTH_AUTH_PASS", &mut self.health.auth_pass);
        env_opt_string("HEALTH_TOKEN", &mut self.health.token);
        env_string("HEALTH_TOKEN_HEADER", &mut self.health.token_header);
        if let Ok(raw) = env::var("HEALTH_TRUSTED_PROXIES") {
            self.health.trusted_proxies = raw
                .split(',')
                .filter_map(|s| s.trim().parse().ok())
                .collect();
        }

        env_bool("ENABLE_VERSION_CHECK", &mut self.version_check.enabled);
        env_u64("VERSION_CHECK_INTERVAL", &mut self.version_check.check_interval_secs);

        env_opt_string("LOG_DIR", &mut self.logging.dir);
        env_string("LOG_LEVEL", &mut self.logging.level);
        env_bool("LOG_TRUNCATE_ON_START", &mut self.logging.truncate_on_start);

        env_u64("SHUTDOWN_TIMEOUT_SECONDS", &mut self.shutdown_timeout_secs);
        env_u64("FORCE_KILL_TIMEOUT", &mut self.force_kill_timeout_secs);
        env_usize("MAX_CONCURRENT_PROCESSES", &mut self.max_concurrent_processes);
    }
}

fn env_string(key: &str, slot: &mut String) {
    if let Ok(v) = env::var(key) {
        if !v.trim().is_empty() {
            *slot = v;
        }
    }
}

fn env_opt_string(key: &str, slot: &mut Option<String>) {
    if let Ok(v) = env::var(key) {
        if !v.trim().is_empty() {
            *slot = Some(v);
        }
    }
}

fn env_list(key: &str, slot: &mut Vec<String>) {
    if let Ok(raw) = env::var(key) {
        let items: Vec<String> = raw
            .split(',')
            .map(|s| s.trim().to_string())
            .filter(|s| !s.is_empty())
            .collect();
        if !items.is_empty() {
            *slot = items;
        }
    }
}

fn env_f64(key: &str, slot: &mut f64) {
    if let Some(v) = env::var(key).ok().and_then(|v| v.parse::<f64>().ok()) {
        *slot = v;
    }
}

fn env_u64(key: &str, slot: &mut u64) {
    if let Some(v) = env::var(key).ok().and_then(|v| v.parse::<u64>().ok()) {
        *slot = v;
    }
}

fn env_u32(key: &str, slot: &mut u32) {
    if let Some(v) = env::var(key).ok().and_then(|v| v.parse::<u32>().ok()) {
        *slot = v;
    }
}

fn env_u16(key: &str, slot: &mut u16) {
    if let Some(v) = env::var(key).ok().and_then(|v| v.parse::<u16>().ok()) {
        *slot = v;
    }
}

fn env_usize(key: &str, slot: &mut usize) {
    if let Some(v) = env::var(key).ok().and_then(|v| v.parse::<usize>().ok()) {
        *slot = v;
    }
}

fn env_bool(key: &str, slot: &mut bool) {
    if let Ok(v) = env::var(key) {
        *slot = matches!(v.as_str(), "1" | "true" | "TRUE" | "on" | "ON");
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_match_documented_values() {
        let s = Settings::default();
        assert_eq!(s.target_ip, "1.1.1.1");
        assert_eq!(s.window_size, 1800);
        assert_eq!(s.latency_window, 600);
        assert_eq!(s.thresholds.packet_loss_pct, 5.0);
        assert_eq!(s.thresholds.consecutive_losses, 5);
        assert_eq!(s.traceroute.max_hops, 15);
        assert_eq!(s.traceroute.cooldown_secs, 300);
        assert_eq!(s.alerts.dedup_window_secs, 300);
        assert_eq!(s.alerts.burst_limit, 5);
        assert_eq!(s.metrics.port, 8000);
        assert_eq!(s.health.port, 8001);
        assert_eq!(s.health.token_header, "X-Health-Token");
    }

    #[test]
    fn env_overrides_apply() {
        std::env::set_var("PACKET_LOSS_THRESHOLD", "7.5");
        std::env::set_var("ENABLE_DNS_BENCHMARK", "0");
        let mut s = Settings::default();
        s.apply_env_overrides();
        assert_eq!(s.thresholds.packet_loss_pct, 7.5);
        assert!(!s.dns.benchmark_enabled);
        std::env::remove_var("PACKET_LOSS_THRESHOLD");
        std::env::remove_var("ENABLE_DNS_BENCHMARK");
    }

    #[test]
    fn partial_toml_keeps_defaults() {
        let raw = r#"
target_ip = "8.8.8.8"

[route]
change_consecutive = 3
"#;
        let s: Settings = toml::from_str(raw).unwrap();
        assert_eq!(s.target_ip, "8.8.8.8");
        assert_eq!(s.route.change_consecutive, 3);
        assert_eq!(s.window_size, 1800);
        assert_eq!(s.route.ignore_first_hops, 2);
    }
}
