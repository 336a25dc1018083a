//! Ping probe: single-shot system `ping` with locale-tolerant RTT parsing.

use std::collections::HashMap;
use std::net::IpAddr;
use std::sync::Arc;
use std::sync::OnceLock;
use std::time::{Duration, Instant};

use parking_lot::Mutex;
use regex::Regex;
use tracing::debug;

use crate::infra::ProcessRegistry;
use crate::tasks::WorkerPool;

/// Hard budget for a single ping invocation (the probe itself waits 1 s).
const PING_BUDGET: Duration = Duration::from_secs(2);
/// How long a name-resolution result is trusted for IPv6 detection.
const IPV6_CACHE_TTL: Duration = Duration::from_secs(60);

fn rtt_regex() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(r"(?i)(?:time|время)\s*[=<>]*\s*([0-9]+[.,]?[0-9]*)").expect("static regex")
    })
}

fn sub_ms_regex() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"(?i)time\s*<\s*1\s*(?:ms|мс)?").expect("static regex"))
}

fn ttl_regex() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"(?i)TTL[=:\s]+(\d+)").expect("static regex"))
}

/// Parse an RTT in milliseconds out of ping stdout.
///
/// Tolerates `time=12.3 ms`, `time<1ms`, comma decimals, and localized
/// keywords; sub-millisecond replies report 0.5 ms.
pub fn parse_rtt_ms(stdout: &str) -> Option<f64> {
    if let Some(caps) = rtt_regex().captures(stdout) {
        return caps[1].replace(',', ".").parse().ok();
    }
    if sub_ms_regex().is_match(stdout) {
        return Some(0.5);
    }
    None
}

/// Parse the TTL field out of ping stdout.
pub fn parse_ttl(stdout: &str) -> Option<u32> {
    ttl_regex()
        .captures(stdout)
        .and_then(|caps| caps[1].parse().ok())
}

/// Estimate hop count from an observed TTL, assuming the sender started at
/// the nearest common initial value.
pub fn estimate_hops(ttl: u32) -> Option<u32> {
    [64u32, 128, 255]
        .iter()
        .find(|&&initial| ttl <= initial)
        .map(|&initial| initial - ttl)
}

pub struct PingProber {
    registry: Arc<ProcessRegistry>,
    pool: Arc<WorkerPool>,
    ipv6_cache: Mutex<HashMap<String, (bool, Instant)>>,
}

impl PingProber {
    pub fn new(registry: Arc<ProcessRegistry>, pool: Arc<WorkerPool>) -> Self {
        Self {
            registry,
            pool,
            ipv6_cache: Mutex::new(HashMap::new()),
        }
    }

    /// Whether the host is IPv6, either as a literal or by resolution.
    /// Resolution results are cached for 60 s.
    pub async fn detect_ipv6(&self, host: &str) -> bool {
        if let Ok(addr) = host.parse::<IpAddr>() {
            return addr.is_ipv6();
        }

        if let Some(&(is_v6, at)) = self.ipv6_cache.lock().get(host) {
            if at.elapsed() < IPV6_CACHE_TTL {
                return is_v6;
            }
        }

        let lookup_host = host.to_string();
        let resolved = self
            .pool
            .run(move || {
                use std::net::ToSocketAddrs;
                (lookup_host.as_str(), 0u16)
                    .to_socket_addrs()
                    .map(|addrs| addrs.into_iter().any(|a| a.ip().is_ipv6()))
                    .unwrap_or(false)
            })
            .await;

        self.ipv6_cache
            .lock()
            .insert(host.to_string(), (resolved, Instant::now()));
        resolved
    }

    /// One ping probe. `(false, None)` on timeout or any parse failure.
    pub async fn ping_host(&self, host: &str) -> (bool, Option<f64>) {
        let is_ipv6 = self.detect_ipv6(host).await;

        let mut args: Vec<&str> = Vec::with_capacity(6);
        if is_ipv6 {
            args.push("-6");
        }
        args.extend_from_slice(&["-c", "1", "-W", "1", host]);

        match self.registry.run_command("ping", &args, PING_BUDGET).await {
            Ok(output) => {
                let stdout = String::from_utf8_lossy(&output.stdout);
                if let Some(rtt) = parse_rtt_ms(&stdout) {
                    (true, Some(rtt))
                } else if output.status.success() {
                    // Replied but RTT not recognized; count the success.
                    (true, Some(0.0))
                } else {
                    (false, None)
                }
            }
            Err(e) => {
                if !e.is_timeout() {
                    debug!(host, error = %e, "ping probe failed");
                }
                (false, None)
            }
        }
    }

    /// One ping probe aimed at TTL extraction.
    ///
    /// Returns `(ttl, estimated_hops)`.
    pub async fn extract_ttl(&self, host: &str) -> (Option<u32>, Option<u32>) {
        let is_ipv6 = self.detect_ipv6(host).await;

        let mut args: Vec<&str> = Vec::with_capacity(6);
        if is_ipv6 {
            args.push("-6");
        }
        args.extend_from_slice(&["-c", "1", "-W", "1", host]);

        match self.registry.run_command("ping", &args, PING_BUDGET).await {
            Ok(output) => {
                let stdout = String::from_utf8_lossy(&output.stdout);
                match parse_ttl(&stdout) {
                    Some(ttl) => (Some(ttl), estimate_hops(ttl)),
                    None => (None, None),
                }
            }
            Err(_) => (None, None),
        }
    }

    /// Startup dependency check.
    pub fn ping_available() -> bool {
        which("ping")
    }
}

/// Minimal PATH search for a tool's presence.
pub(crate) fn which(program: &str) -> bool {
    let Some(paths) = std::env::var_os("PATH") else {
        return false;
    };
    std::env::split_paths(&paths).any(|dir| {
        let candidate = dir.join(program);
        candidate.is_file()
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_linux_rtt() {
        let out = "64 bytes from 1.1.1.1: icmp_seq=1 ttl=56 time=12.3 ms";
        assert_eq!(parse_rtt_ms(out), Some(12.3));
    }

    #[test]
    fn parses_comma_decimal_rtt() {
        let out = "64 байта от 1.1.1.1: время=3,7 мс";
        assert_eq!(parse_rtt_ms(out), Some(3.7));
    }

    #[test]
    fn parses_sub_millisecond_reply() {
        assert_eq!(parse_rtt_ms("Reply from 192.168.1.1: bytes=32 time<1ms TTL=64"), Some(1.0));
        assert_eq!(parse_rtt_ms("reply ok, time < 1 ms"), Some(1.0));
        // No digit at all after the keyword still resolves via the sub-ms rule.
        assert_eq!(parse_rtt_ms("time<way-too-fast"), None);
    }

    #[test]
    fn garbage_is_not_an_rtt() {
        assert_eq!(parse_rtt_ms("Request timed out."), None);
        assert_eq!(parse_rtt_ms(""), None);
    }

    #[test]
    fn parses_ttl_variants() {
        assert_eq!(parse_ttl("64 bytes from x: icmp_seq=1 ttl=56 time=1 ms"), Some(56));
        assert_eq!(parse_ttl("Reply from x: bytes=32 time=1ms TTL=118"), Some(118));
        assert_eq!(parse_ttl("no ttl here"), None);
    }

    #[test]
    fn hop_estimation_rounds_up_to_initial_ttl() {
        assert_eq!(estimate_hops(56), Some(8));
        assert_eq!(estimate_hops(118), Some(10));
        assert_eq!(estimate_hops(250), Some(5));
        assert_eq!(estimate_hops(64), Some(0));
    }
}
