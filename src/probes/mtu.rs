//! MTU probes: local interface MTU and path MTU discovery.

use std::future::Future;
use std::sync::Arc;
use std::sync::OnceLock;
use std::time::Duration;

use regex::Regex;
use tracing::debug;

use crate::infra::ProcessRegistry;

/// Sanity bounds for any MTU value we accept.
const MTU_FLOOR: u32 = 500;
const MTU_CEIL: u32 = 9000;

const LOCAL_MTU_BUDGET: Duration = Duration::from_secs(5);
const DF_PROBE_BUDGET: Duration = Duration::from_secs(5);

/// IP + ICMP header overhead on top of the ping payload.
pub fn header_overhead(is_ipv6: bool) -> u32 {
    if is_ipv6 {
        48
    } else {
        28
    }
}

#[derive(Debug, Clone, Copy, Default)]
pub struct MtuReading {
    pub local_mtu: Option<u32>,
    pub path_mtu: Option<u32>,
}

pub struct MtuProber {
    registry: Arc<ProcessRegistry>,
}

impl MtuProber {
    pub fn new(registry: Arc<ProcessRegistry>) -> Self {
        Self { registry }
    }

    /// MTU of the interface carrying default traffic, clamped to sane bounds.
    pub async fn local_mtu(&self) -> Option<u32> {
        #[cfg(unix)]
        let output = self
            .registry
            .run_command("ip", &["link", "show"], LOCAL_MTU_BUDGET)
            .await;
        #[cfg(not(unix))]
        let output = self
            .registry
            .run_command(
                "netsh",
                &["interface", "ipv4", "show", "subinterface"],
                LOCAL_MTU_BUDGET,
            )
            .await;

        match output {
            Ok(out) => parse_local_mtu(&String::from_utf8_lossy(&out.stdout)),
            Err(e) => {
                debug!(error = %e, "local MTU query failed");
                None
            }
        }
    }

    /// Binary-search the largest datagram that traverses the path unfragmented.
    ///
    /// Probes are single pings with DF set; the result is total MTU
    /// (payload + header overhead).
    pub async fn discover_path_mtu(
        &self,
        target: &str,
        is_ipv6: bool,
        limit: u32,
    ) -> Option<u32> {
        let registry = Arc::clone(&self.registry);
        let target = target.to_string();

        binary_search_path_mtu(MTU_FLOOR, limit, header_overhead(is_ipv6), move |payload| {
            let registry = Arc::clone(&registry);
            let target = target.clone();
            async move { df_probe(&registry, &target, is_ipv6, payload).await }
        })
        .await
    }

    /// Local MTU plus, when requested, a fresh path MTU discovery bounded by it.
    pub async fn check(&self, target: &str, is_ipv6: bool, discover_path: bool) -> MtuReading {
        let local_mtu = self.local_mtu().await;
        let mut path_mtu = None;
        if discover_path {
            if let Some(limit) = local_mtu {
                path_mtu = self.discover_path_mtu(target, is_ipv6, limit).await;
            }
        }
        MtuReading { local_mtu, path_mtu }
    }
}

async fn df_probe(registry: &ProcessRegistry, target: &str, is_ipv6: bool, payload: u32) -> bool {
    let size = payload.to_string();

    #[cfg(unix)]
    let args: Vec<&str> = {
        let mut args = Vec::with_capacity(9);
        if is_ipv6 {
            args.push("-6");
        }
        args.extend_from_slice(&["-c", "1", "-M", "do", "-s", size.as_str(), target]);
        args
    };
    #[cfg(not(unix))]
    let args: Vec<&str> = {
        let _ = is_ipv6;
        vec!["-n", "1", "-f", "-l", size.as_str(), target]
    };

    match registry.run_command("ping", &args, DF_PROBE_BUDGET).await {
        Ok(output) => output.status.success(),
        // Timeout means the packet was too large or got lost.
        Err(_) => false,
    }
}

/// Binary search in payload space between total-MTU bounds.
///
/// `probe(payload)` must answer whether a DF packet of that payload size made
/// it through. Returns the converged total MTU, or `None` below the floor.
pub async fn binary_search_path_mtu<F, Fut>(
    low_total: u32,
    high_total: u32,
    overhead: u32,
    mut probe: F,
) -> Option<u32>
where
    F: FnMut(u32) -> Fut,
    Fut: Future<Output = bool>,
{
    if high_total <= overhead || low_total <= overhead {
        return None;
    }

    let mut low = low_total - overhead;
    let mut high = high_total - overhead;

    while low <= high {
        let mid = (low + high) / 2;
        if probe(mid).await {
            low = mid + 1;
        } else {
            if mid == 0 {
                break;
            }
            high = mid - 1;
        }
    }

    let total = high + overhead;
    if total >= MTU_FLOOR {
        Some(total)
    } else {
        None
    }
}

fn parse_local_mtu(stdout: &str) -> Option<u32> {
    static RE: OnceLock<Regex> = OnceLock::new();
    let re = RE.get_or_init(|| Regex::new(r"mtu\s+(\d+)").expect("static regex"));

    for line in stdout.lines() {
        // Loopback carries a 65536 MTU; the range filter skips it along with
        // anything else implausible.
        if line.contains("LOOPBACK") {
            continue;
        }
        if let Some(caps) = re.captures(line) {
            if let Ok(mtu) = caps[1].parse::<u32>() {
                if (MTU_FLOOR..=MTU_CEIL).contains(&mtu) {
                    return Some(mtu);
                }
            }
        }
        // netsh prints the MTU as the first column.
        if let Some(first) = line.split_whitespace().next() {
            if let Ok(mtu) = first.parse::<u32>() {
                if (MTU_FLOOR..=MTU_CEIL).contains(&mtu) {
                    return Some(mtu);
                }
            }
        }
    }
    None
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn local_mtu_skips_loopback() {
        let out = "\
1: lo: <LOOPBACK,UP,LOWER_UP> mtu 65536 qdisc noqueue state UNKNOWN
2: eth0: <BROADCAST,MULTICAST,UP,LOWER_UP> mtu 1500 qdisc fq state UP
";
        assert_eq!(parse_local_mtu(out), Some(1500));
    }

    #[test]
    fn local_mtu_parses_netsh_table() {
        let out = "\
   MTU  MediaSenseState   Bytes In  Bytes Out  Interface
------  ---------------  ---------  ---------  -------------
  1492                1     409600     204800  Ethernet
";
        assert_eq!(parse_local_mtu(out), Some(1492));
    }

    #[test]
    fn local_mtu_none_when_all_out_of_range() {
        assert_eq!(parse_local_mtu("1: lo: mtu 65536"), None);
        assert_eq!(parse_local_mtu(""), None);
    }

    #[tokio::test]
    async fn path_mtu_converges_on_df_drop_point() {
        // Path passes DF packets while total size <= 1400.
        let overhead = header_overhead(false);
        let result = binary_search_path_mtu(500, 1500, overhead, |payload| async move {
            payload + overhead <= 1400
        })
        .await;
        assert_eq!(result, Some(1400));
    }

    #[tokio::test]
    async fn path_mtu_full_local_mtu_when_nothing_drops() {
        let overhead = header_overhead(false);
        let result =
            binary_search_path_mtu(500, 1500, overhead, |_| async { true }).await;
        assert_eq!(result, Some(1500));
    }

    #[tokio::test]
    async fn path_mtu_ipv6_overhead() {
        let overhead = header_overhead(true);
        assert_eq!(overhead, 48);
        let result = binary_search_path_mtu(500, 1500, overhead, |payload| async move {
            payload + overhead <= 1280
        })
        .await;
        assert_eq!(result, Some(1280));
    }

    #[tokio::test]
    async fn path_mtu_none_when_everything_drops() {
        let overhead = header_overhead(false);
        let result =
            binary_search_path_mtu(500, 1500, overhead, |_| async { false }).await;
        assert_eq!(result, None);
    }
}
