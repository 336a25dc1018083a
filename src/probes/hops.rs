//! Hop monitor: discover the routers on the path and ping each continuously.

use std::collections::{HashSet, VecDeque};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::sync::OnceLock;
use std::time::Duration;

use parking_lot::Mutex;
use regex::Regex;
use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use crate::config::HopSettings;
use crate::infra::ProcessRegistry;
use crate::probes::ping::parse_rtt_ms;
use crate::probes::public_ip::GeoService;

const LATENCY_HISTORY_SIZE: usize = 30;
const DISCOVERY_BUDGET: Duration = Duration::from_secs(30);

/// Snapshot of a single hop's rolling stats.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HopRecord {
    pub hop: u32,
    pub ip: String,
    pub hostname: String,
    pub last_latency: Option<f64>,
    pub avg_latency: f64,
    pub min_latency: Option<f64>,
    pub max_latency: f64,
    pub loss_count: u32,
    pub total_pings: u32,
    pub last_ok: bool,
    pub loss_pct: f64,
    pub jitter: Option<f64>,
    pub country_code: Option<String>,
    pub asn: Option<String>,
    pub latency_history: Vec<f64>,
}

#[derive(Debug)]
struct HopState {
    hop: u32,
    ip: String,
    hostname: String,
    last_latency: Option<f64>,
    min_latency: f64,
    max_latency: f64,
    loss_count: u32,
    total_pings: u32,
    last_ok: bool,
    latency_history: VecDeque<f64>,
    country_code: Option<String>,
    asn: Option<String>,
}

impl HopState {
    fn new(hop: u32, ip: String, hostname: String) -> Self {
        Self {
            hop,
            ip,
            hostname,
            last_latency: None,
            min_latency: f64::INFINITY,
            max_latency: 0.0,
            loss_count: 0,
            total_pings: 0,
            last_ok: true,
            latency_history: VecDeque::with_capacity(LATENCY_HISTORY_SIZE),
            country_code: None,
            asn: None,
        }
    }

    fn record(&self) -> HopRecord {
        let avg = if self.latency_history.is_empty() {
            0.0
        } else {
            self.latency_history.iter().sum::<f64>() / self.latency_history.len() as f64
        };
        let jitter = if self.latency_history.len() >= 2 {
            let values: Vec<f64> = self.latency_history.iter().copied().collect();
            let sum: f64 = values.windows(2).map(|w| (w[1] - w[0]).abs()).sum();
            Some(sum / (values.len() - 1) as f64)
        } else {
            None
        };

        HopRecord {
            hop: self.hop,
            ip: self.ip.clone(),
            hostname: self.hostname.clone(),
            last_latency: self.last_latency,
            avg_latency: avg,
            min_latency: if self.min_latency.is_finite() {
                Some(self.min_latency)
            } else {
                None
            },
            max_latency: self.max_latency,
            loss_count: self.loss_count,
            total_pings: self.total_pings,
            last_ok: self.last_ok,
            loss_pct: if self.total_pings > 0 {
                self.loss_count as f64 / self.total_pings as f64 * 100.0
            } else {
                0.0
            },
            jitter,
            country_code: self.country_code.clone(),
            asn: self.asn.clone(),
            latency_history: self.latency_history.iter().copied().collect(),
        }
    }
}

/// Invoked with the growing hop list as discovery parses each hop.
pub type HopDiscoveryCallback = Box<dyn Fn(Vec<HopRecord>) + Send + Sync>;

pub struct HopMonitor {
    registry: Arc<ProcessRegistry>,
    geo: Arc<GeoService>,
    settings: HopSettings,
    max_hops: u32,
    hops: Mutex<Vec<HopState>>,
    discovering: AtomicBool,
    rediscovery_requested: AtomicBool,
    on_hop: Option<HopDiscoveryCallback>,
}

impl HopMonitor {
    pub fn new(
        registry: Arc<ProcessRegistry>,
        geo: Arc<GeoService>,
        settings: HopSettings,
        max_hops: u32,
        on_hop: Option<HopDiscoveryCallback>,
    ) -> Self {
        Self {
            registry,
            geo,
            settings,
            max_hops,
            hops: Mutex::new(Vec::new()),
            discovering: AtomicBool::new(false),
            rediscovery_requested: AtomicBool::new(false),
            on_hop,
        }
    }

    pub fn is_discovering(&self) -> bool {
        self.discovering.load(Ordering::SeqCst)
    }

    pub fn request_rediscovery(&self) {
        self.rediscovery_requested.store(true, Ordering::SeqCst);
    }

    /// Consume a pending rediscovery request.
    pub fn take_rediscovery_request(&self) -> bool {
        self.rediscovery_requested.swap(false, Ordering::SeqCst)
    }

    /// Run traceroute, parse the hops, and geo-enrich them.
    ///
    /// Hops are published one at a time through the discovery callback so the
    /// UI can render them progressively.
    pub async fn discover(&self, target: &str) {
        self.discovering.store(true, Ordering::SeqCst);

        let max_hops = self.max_hops.to_string();
        let args = ["-m", max_hops.as_str(), "-w", "1", target];
        let output = self
            .registry
            .run_command("traceroute", &args, DISCOVERY_BUDGET)
            .await;

        let parsed = match output {
            Ok(out) => parse_discovered_hops(&String::from_utf8_lossy(&out.stdout), target),
            Err(e) => {
                debug!(error = %e, "hop discovery traceroute failed");
                Vec::new()
            }
        };

        {
            let mut hops = self.hops.lock();
            hops.clear();
        }
        for (hop, ip, hostname) in parsed {
            {
                let mut hops = self.hops.lock();
                hops.push(HopState::new(hop, ip, hostname));
            }
            if let Some(callback) = &self.on_hop {
                callback(self.snapshot());
            }
        }

        self.enrich_geo().await;

        info!(count = self.hop_count(), "hop discovery complete");
        self.discovering.store(false, Ordering::SeqCst);
    }

    async fn enrich_geo(&self) {
        let ips: Vec<String> = self.hops.lock().iter().map(|h| h.ip.clone()).collect();
        for ip in ips {
            if is_private_ip(&ip) {
                continue;
            }
            if let Some(geo) = self.geo.lookup(&ip).await {
                let mut hops = self.hops.lock();
                if let Some(hop) = hops.iter_mut().find(|h| h.ip == ip) {
                    hop.country_code = Some(geo.country_code);
                    hop.asn = Some(geo.asn);
                }
            }
        }
    }

    /// One ping probe per known hop; rolling stats updated in place.
    pub async fn ping_all(&self) {
        let targets: Vec<String> = self.hops.lock().iter().map(|h| h.ip.clone()).collect();

        for ip in targets {
            let (ok, latency) = self.ping_hop(&ip).await;
            let mut hops = self.hops.lock();
            if let Some(hop) = hops.iter_mut().find(|h| h.ip == ip) {
                hop.total_pings += 1;
                hop.last_ok = ok;
                if ok {
                    if let Some(ms) = latency {
                        hop.last_latency = Some(ms);
                        if hop.latency_history.len() == LATENCY_HISTORY_SIZE {
                            hop.latency_history.pop_front();
                        }
                        hop.latency_history.push_back(ms);
                        hop.min_latency = hop.min_latency.min(ms);
                        hop.max_latency = hop.max_latency.max(ms);
                    }
                } else {
                    hop.loss_count += 1;
                    hop.last_latency = None;
                }
            }
        }
    }

    async fn ping_hop(&self, ip: &str) -> (bool, Option<f64>) {
        let wait = format!("{:.1}", self.settings.ping_timeout_secs.max(0.1));
        let args = ["-c", "1", "-W", wait.as_str(), ip];
        let budget = Duration::from_secs_f64(self.settings.ping_timeout_secs + 1.5);

        match self.registry.run_command("ping", &args, budget).await {
            Ok(output) => {
                let stdout = String::from_utf8_lossy(&output.stdout);
                if let Some(rtt) = parse_rtt_ms(&stdout) {
                    (true, Some(rtt))
                } else if output.status.success() {
                    (true, Some(0.0))
                } else {
                    (false, None)
                }
            }
            Err(_) => (false, None),
        }
    }

    pub fn snapshot(&self) -> Vec<HopRecord> {
        self.hops.lock().iter().map(|h| h.record()).collect()
    }

    pub fn hop_count(&self) -> usize {
        self.hops.lock().len()
    }
}

fn is_private_ip(ip: &str) -> bool {
    ip.parse::<std::net::Ipv4Addr>()
        .map(|v4| v4.is_private() || v4.is_loopback() || v4.is_link_local())
        .unwrap_or(false)
}

/// Parse discovered hops out of traceroute output: `(hop, ip, hostname)`.
///
/// Timeout-only lines are skipped, duplicate IPs collapsed, and the final
/// target line excluded.
pub fn parse_discovered_hops(output: &str, target: &str) -> Vec<(u32, String, String)> {
    static HOP_RE: OnceLock<Regex> = OnceLock::new();
    static TIMEOUT_RE: OnceLock<Regex> = OnceLock::new();
    static IP_RE: OnceLock<Regex> = OnceLock::new();

    let hop_re = HOP_RE.get_or_init(|| Regex::new(r"^\s*(\d+)\s+").expect("static regex"));
    let timeout_re =
        TIMEOUT_RE.get_or_init(|| Regex::new(r"^\s*\d+\s+(\*\s*)+$").expect("static regex"));
    let ip_re = IP_RE.get_or_init(|| {
        Regex::new(r"\[?((?:\d{1,3}\.){3}\d{1,3})\]?").expect("static regex")
    });

    let mut hops = Vec::new();
    let mut seen: HashSet<String> = HashSet::new();

    for line in output.lines() {
        let line = line.trim();
        if line.is_empty() {
            continue;
        }

        let Some(hop_caps) = hop_re.captures(line) else {
            continue;
        };
        let Ok(hop_num) = hop_caps[1].parse::<u32>() else {
            continue;
        };

        if timeout_re.is_match(line) {
            continue;
        }

        let Some(ip_caps) = ip_re.captures(line) else {
            continue;
        };
        let ip = ip_caps[1].to_string();

        if seen.contains(&ip) || ip == target {
            continue;
        }
        seen.insert(ip.clone());

        let hostname = extract_hostname(line, &ip).unwrap_or_else(|| ip.clone());
        hops.push((hop_num, ip, hostname));
    }

    hops
}

fn extract_hostname(line: &str, ip: &str) -> Option<String> {
    let escaped = regex::escape(ip);
    // Windows style: "host [ip]"; Unix style: "host (ip)".
    for pattern in [
        format!(r"(\S+)\s+\[{escaped}\]"),
        format!(r"(\S+)\s+\({escaped}\)"),
    ] {
        if let Ok(re) = Regex::new(&pattern) {
            if let Some(caps) = re.captures(line) {
                let host = caps[1].to_string();
                if host != *ip {
                    return Some(host);
                }
            }
        }
    }
    None
}

#[cfg(test)]
mod tests {
    use super::*;

    const UNIX_TRACE: &str = "\
traceroute to 1.1.1.1 (1.1.1.1), 15 hops max, 60 byte packets
 1  gateway.lan (192.168.1.1)  0.512 ms  0.401 ms  0.388 ms
 2  * * *
 3  isp-edge.example.net (10.20.0.1)  4.1 ms  4.0 ms  3.9 ms
 4  10.20.0.1  4.4 ms
 5  one.one.one.one (1.1.1.1)  8.2 ms  8.1 ms  8.0 ms
";

    #[test]
    fn parses_hops_skipping_timeouts_dups_and_target() {
        let hops = parse_discovered_hops(UNIX_TRACE, "1.1.1.1");
        assert_eq!(hops.len(), 2);
        assert_eq!(hops[0], (1, "192.168.1.1".into(), "gateway.lan".into()));
        // Hop 4 repeats hop 3's address and is collapsed.
        assert_eq!(hops[1].1, "10.20.0.1");
        assert_eq!(hops[1].2, "isp-edge.example.net");
    }

    #[test]
    fn parses_windows_bracket_hostnames() {
        let line = "  3    12 ms    11 ms    12 ms  edge.example.com [203.0.113.9]";
        let hops = parse_discovered_hops(line, "1.1.1.1");
        assert_eq!(hops.len(), 1);
        assert_eq!(hops[0].2, "edge.example.com");
    }

    #[test]
    fn hop_record_stats_roll() {
        let mut state = HopState::new(1, "192.168.1.1".into(), "gw".into());
        for ms in [10.0, 20.0, 30.0] {
            state.total_pings += 1;
            state.last_ok = true;
            state.last_latency = Some(ms);
            state.latency_history.push_back(ms);
            state.min_latency = state.min_latency.min(ms);
            state.max_latency = state.max_latency.max(ms);
        }
        state.total_pings += 1;
        state.loss_count += 1;
        state.last_ok = false;

        let record = state.record();
        assert_eq!(record.total_pings, 4);
        assert_eq!(record.loss_count, 1);
        assert!((record.loss_pct - 25.0).abs() < 1e-9);
        assert!((record.avg_latency - 20.0).abs() < 1e-9);
        assert_eq!(record.min_latency, Some(10.0));
        assert_eq!(record.max_latency, 30.0);
        assert_eq!(record.jitter, Some(10.0));
    }
}
