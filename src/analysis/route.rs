//! Route analyzer: traceroute parsing, problematic-hop detection, diffing.

use std::collections::VecDeque;
use std::sync::OnceLock;

use chrono::{DateTime, Utc};
use regex::Regex;
use serde::{Deserialize, Serialize};

use crate::config::RouteSettings;

/// Latency stdev above this marks a hop unstable, ms.
const HOP_STDEV_THRESHOLD: f64 = 100.0;

/// One parsed traceroute hop.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RouteHop {
    pub hop: u32,
    pub ip: String,
    pub latencies: Vec<f64>,
    pub avg_latency: Option<f64>,
    pub max_latency: Option<f64>,
    pub is_timeout: bool,
}

/// Result of one route analysis pass.
#[derive(Debug, Clone)]
pub struct RouteAnalysis {
    pub hops: Vec<RouteHop>,
    pub hop_count: usize,
    pub problematic_hop: Option<u32>,
    pub route_changed: bool,
    pub avg_latency: Option<f64>,
    pub diff_count: usize,
    pub diff_indices: Vec<usize>,
}

#[derive(Debug, Clone)]
pub struct RouteHistoryEntry {
    pub timestamp: DateTime<Utc>,
    pub hop_count: usize,
    pub problematic_hop: Option<u32>,
    pub avg_latency: Option<f64>,
    pub route_changed: bool,
    pub diff_count: usize,
}

pub struct RouteAnalyzer {
    settings: RouteSettings,
    history: VecDeque<RouteHistoryEntry>,
    last_route: Vec<RouteHop>,
}

impl RouteAnalyzer {
    pub fn new(settings: RouteSettings) -> Self {
        Self {
            settings,
            history: VecDeque::new(),
            last_route: Vec::new(),
        }
    }

    /// Identify the problematic hop, if any.
    ///
    /// A single timeout hop is routine (routers that ignore ICMP); two
    /// consecutive timeout-only hops, an excessive average, or unstable
    /// latencies mark a real problem.
    pub fn identify_problematic_hop(&self, hops: &[RouteHop]) -> Option<u32> {
        let mut consecutive_timeouts = 0u32;

        for hop in hops {
            if hop.is_timeout && hop.latencies.is_empty() {
                consecutive_timeouts += 1;
                if consecutive_timeouts >= 2 {
                    return Some(hop.hop);
                }
                continue;
            }
            consecutive_timeouts = 0;

            if let Some(avg) = hop.avg_latency {
                if avg > self.settings.hop_timeout_threshold_ms {
                    return Some(hop.hop);
                }
            }

            if hop.latencies.len() >= 2 && sample_stdev(&hop.latencies) > HOP_STDEV_THRESHOLD {
                return Some(hop.hop);
            }
        }

        None
    }

    /// Index-aligned IP comparison against the previous route.
    ///
    /// Returns `(changed, diff_count, diff_indices)` and caches `current` as
    /// the new reference. Length mismatches contribute trailing indices.
    pub fn compare_routes(&mut self, current: Vec<RouteHop>) -> (bool, usize, Vec<usize>) {
        if self.last_route.is_empty() {
            self.last_route = current;
            return (false, 0, Vec::new());
        }

        let mut diff_indices = Vec::new();
        let min_len = current.len().min(self.last_route.len());
        for i in 0..min_len {
            if current[i].ip != self.last_route[i].ip {
                diff_indices.push(i);
            }
        }

        let max_len = current.len().max(self.last_route.len());
        for i in min_len..max_len {
            diff_indices.push(i);
        }

        let changed = !diff_indices.is_empty();
        self.last_route = current;
        (changed, diff_indices.len(), diff_indices)
    }

    /// Full analysis pass; appends to the bounded history.
    pub fn analyze_route(&mut self, hops: Vec<RouteHop>) -> RouteAnalysis {
        let problematic_hop = self.identify_problematic_hop(&hops);
        let (changed, diff_count, diff_indices) = self.compare_routes(hops.clone());

        let latencies: Vec<f64> = hops.iter().filter_map(|h| h.avg_latency).collect();
        let avg_latency = if latencies.is_empty() {
            None
        } else {
            Some(latencies.iter().sum::<f64>() / latencies.len() as f64)
        };

        if self.history.len() == self.settings.history_size {
            self.history.pop_front();
        }
        self.history.push_back(RouteHistoryEntry {
            timestamp: Utc::now(),
            hop_count: hops.len(),
            problematic_hop,
            avg_latency,
            route_changed: changed,
            diff_count,
        });

        RouteAnalysis {
            hop_count: hops.len(),
            hops,
            problematic_hop,
            route_changed: changed,
            avg_latency,
            diff_count,
            diff_indices,
        }
    }

    pub fn history(&self) -> &VecDeque<RouteHistoryEntry> {
        &self.history
    }
}

/// Count of diff indices past the ignored local-network prefix.
pub fn significant_diff_count(diff_indices: &[usize], ignore_first_hops: usize) -> usize {
    diff_indices.iter().filter(|&&i| i >= ignore_first_hops).count()
}

/// Parse raw traceroute output into hops.
///
/// Platform heuristics: Windows tracert puts the address last on the line,
/// Unix traceroute puts it second.
pub fn parse_traceroute_output(output: &str) -> Vec<RouteHop> {
    static HOP_RE: OnceLock<Regex> = OnceLock::new();
    static LAT_RE: OnceLock<Regex> = OnceLock::new();

    let hop_re = HOP_RE.get_or_init(|| Regex::new(r"^\s*(\d+)\s").expect("static regex"));
    let lat_re = LAT_RE.get_or_init(|| {
        Regex::new(r"(?i)(?:<|=)?\s*(\d+(?:\.\d+)?)\s*ms").expect("static regex")
    });

    let mut hops = Vec::new();

    for line in output.lines() {
        let line = line.trim();
        if line.is_empty()
            || line.to_lowercase().starts_with("traceroute")
            || line.to_lowercase().starts_with("tracing")
            || line.starts_with("Hops")
        {
            continue;
        }

        let Some(hop_caps) = hop_re.captures(line) else {
            continue;
        };
        let Ok(hop_num) = hop_caps[1].parse::<u32>() else {
            continue;
        };

        let latencies: Vec<f64> = lat_re
            .captures_iter(line)
            .filter_map(|c| c[1].parse().ok())
            .collect();

        let ip = extract_address(line);

        let (avg_latency, max_latency) = if latencies.is_empty() {
            (None, None)
        } else {
            let avg = latencies.iter().sum::<f64>() / latencies.len() as f64;
            let max = latencies.iter().copied().fold(0.0f64, f64::max);
            (Some(avg), Some(max))
        };

        let is_timeout =
            latencies.is_empty() && (line.contains('*') || line.to_lowercase().contains("time"));

        hops.push(RouteHop {
            hop: hop_num,
            ip,
            latencies,
            avg_latency,
            max_latency,
            is_timeout,
        });
    }

    hops
}

fn extract_address(line: &str) -> String {
    let parts: Vec<&str> = line.split_whitespace().collect();
    if parts.len() < 2 {
        return "*".into();
    }

    let candidate = if cfg!(windows) {
        // tracert: "  1    <1 ms    <1 ms    <1 ms  192.168.1.1"
        let last = parts[parts.len() - 1];
        match last.to_lowercase().as_str() {
            "ms" | "out." | "out" | "request" | "*" => "*",
            _ => last,
        }
    } else {
        // traceroute: " 1  192.168.1.1 (192.168.1.1)  0.3 ms"
        if parts[1] == "*" {
            "*"
        } else {
            parts[1]
        }
    };

    candidate.trim_matches(|c| c == '(' || c == ')').to_string()
}

fn sample_stdev(values: &[f64]) -> f64 {
    if values.len() < 2 {
        return 0.0;
    }
    let mean = values.iter().sum::<f64>() / values.len() as f64;
    let variance = values
        .iter()
        .map(|&v| {
            let diff = v - mean;
            diff * diff
        })
        .sum::<f64>()
        / (values.len() - 1) as f64;
    variance.sqrt()
}

/// Serialize hops back into traceroute-like text (dump files, round-trips).
pub fn format_hops(hops: &[RouteHop]) -> String {
    let mut out = String::new();
    for hop in hops {
        if hop.is_timeout && hop.latencies.is_empty() {
            out.push_str(&format!("{:2}  * * *\n", hop.hop));
            continue;
        }
        let latencies: Vec<String> = hop
            .latencies
            .iter()
            .map(|ms| format!("{ms:.1} ms"))
            .collect();
        out.push_str(&format!(
            "{:2}  {} ({})  {}\n",
            hop.hop,
            hop.ip,
            hop.ip,
            latencies.join("  ")
        ));
    }
    out
}
