//! Prometheus metrics for the monitoring daemon.
//!
//! Hand-rolled text exposition served by axum on its own listener.

use std::net::SocketAddr;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use axum::{extract::State, routing::get, Router};
use parking_lot::RwLock;
use tracing::info;

use crate::tasks::ShutdownSignal;

/// Daemon metrics registry.
///
/// Exposes metrics in Prometheus format via HTTP endpoint.
#[derive(Debug, Default)]
pub struct DaemonMetrics {
    pings_total: AtomicU64,
    pings_success_total: AtomicU64,
    pings_failure_total: AtomicU64,
    mtu_problems_total: AtomicU64,
    route_changes_total: AtomicU64,
    traceroutes_saved_total: AtomicU64,

    /// Recent packet loss, percent
    packet_loss_percent: RwLock<f64>,
    /// 0 = ok, 1 = reduced, 2 = fragmented
    mtu_status: AtomicU64,
    /// 0/1
    route_changed: AtomicU64,

    ping_latency_ms: LatencyHistogram,
}

impl DaemonMetrics {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn record_ping(&self, ok: bool, latency_ms: Option<f64>) {
        self.pings_total.fetch_add(1, Ordering::Relaxed);
        if ok {
            self.pings_success_total.fetch_add(1, Ordering::Relaxed);
            if let Some(ms) = latency_ms {
                self.ping_latency_ms.record(ms);
            }
        } else {
            self.pings_failure_total.fetch_add(1, Ordering::Relaxed);
        }
    }

    pub fn set_packet_loss_percent(&self, pct: f64) {
        *self.packet_loss_percent.write() = pct;
    }

    pub fn record_mtu_problem(&self) {
        self.mtu_problems_total.fetch_add(1, Ordering::Relaxed);
    }

    pub fn set_mtu_status(&self, status: u64) {
        self.mtu_status.store(status, Ordering::Relaxed);
    }

    pub fn record_route_change(&self) {
        self.route_changes_total.fetch_add(1, Ordering::Relaxed);
    }

    pub fn set_route_changed(&self, changed: bool) {
        self.route_changed.store(u64::from(changed), Ordering::Relaxed);
    }

    pub fn record_traceroute_saved(&self) {
        self.traceroutes_saved_total.fetch_add(1, Ordering::Relaxed);
    }

    /// Export all metrics in Prometheus text format.
    pub fn to_prometheus(&self) -> String {
        let mut output = String::new();

        counter(
            &mut output,
            "pinger_pings_total",
            "Total pings",
            self.pings_total.load(Ordering::Relaxed),
        );
        counter(
            &mut output,
            "pinger_pings_success_total",
            "Successful pings",
            self.pings_success_total.load(Ordering::Relaxed),
        );
        counter(
            &mut output,
            "pinger_pings_failure_total",
            "Failed pings",
            self.pings_failure_total.load(Ordering::Relaxed),
        );
        counter(
            &mut output,
            "pinger_mtu_problems_total",
            "Total MTU problems detected",
            self.mtu_problems_total.load(Ordering::Relaxed),
        );
        counter(
            &mut output,
            "pinger_route_changes_total",
            "Total significant route changes",
            self.route_changes_total.load(Ordering::Relaxed),
        );
        counter(
            &mut output,
            "pinger_traceroutes_saved_total",
            "Traceroutes saved due to route change",
            self.traceroutes_saved_total.load(Ordering::Relaxed),
        );

        gauge(
            &mut output,
            "pinger_packet_loss_percent",
            "Recent packet loss percent",
            *self.packet_loss_percent.read(),
        );
        gauge(
            &mut output,
            "pinger_mtu_status",
            "MTU status (0=ok,1=reduced,2=fragmented)",
            self.mtu_status.load(Ordering::Relaxed) as f64,
        );
        gauge(
            &mut output,
            "pinger_route_changed",
            "Is route currently changed (0/1)",
            self.route_changed.load(Ordering::Relaxed) as f64,
        );

        output.push_str("\n# HELP pinger_ping_latency_ms Ping latency ms\n");
        output.push_str("# TYPE pinger_ping_latency_ms histogram\n");
        output.push_str(&self.ping_latency_ms.to_prometheus("pinger_ping_latency_ms"));

        output
    }
}

fn counter(out: &mut String, name: &str, help: &str, value: u64) {
    out.push_str(&format!(
        "# HELP {name} {help}\n# TYPE {name} counter\n{name} {value}\n\n"
    ));
}

fn gauge(out: &mut String, name: &str, help: &str, value: f64) {
    out.push_str(&format!(
        "# HELP {name} {help}\n# TYPE {name} gauge\n{name} {value}\n\n"
    ));
}

/// Fixed-bucket latency histogram, milliseconds.
#[derive(Debug)]
struct LatencyHistogram {
    /// Bucket upper bounds in milliseconds
    buckets: Vec<f64>,
    counts: Vec<AtomicU64>,
    /// Sum of all observations in microseconds
    sum_us: AtomicU64,
    count: AtomicU64,
}

impl Default for LatencyHistogram {
    fn default() -> Self {
        let buckets = vec![
            1.0, 2.0, 5.0, 10.0, 20.0, 50.0, 100.0, 200.0, 500.0, 1000.0, 2000.0,
        ];
        let counts = buckets.iter().map(|_| AtomicU64::new(0)).collect();
        Self {
            buckets,
            counts,
            sum_us: AtomicU64::new(0),
            count: AtomicU64::new(0),
        }
    }
}

impl LatencyHistogram {
    fn record(&self, value_ms: f64) {
        for (i, &boundary) in self.buckets.iter().enumerate() {
            if value_ms <= boundary {
                self.counts[i].fetch_add(1, Ordering::Relaxed);
                break;
            }
        }
        self.sum_us
            .fetch_add((value_ms * 1000.0) as u64, Ordering::Relaxed);
        self.count.fetch_add(1, Ordering::Relaxed);
    }

    fn to_prometheus(&self, name: &str) -> String {
        let mut output = String::new();
        let mut cumulative = 0u64;

        for (i, &boundary) in self.buckets.iter().enumerate() {
            cumulative += self.counts[i].load(Ordering::Relaxed);
            output.push_str(&format!(
                "{name}_bucket{{le=\"{boundary}\"}} {cumulative}\n"
            ));
        }

        let total = self.count.load(Ordering::Relaxed);
        output.push_str(&format!("{name}_bucket{{le=\"+Inf\"}} {total}\n"));
        output.push_str(&format!(
            "{name}_sum {}\n",
            self.sum_us.load(Ordering::Relaxed) as f64 / 1000.0
        ));
        output.push_str(&format!("{name}_count {total}\n"));

        output
    }
}

async fn metrics_handler(State(metrics): State<Arc<DaemonMetrics>>) -> String {
    metrics.to_prometheus()
}

pub fn metrics_router(metrics: Arc<DaemonMetrics>) -> Router {
    Router::new()
        .route("/metrics", get(metrics_handler))
        .with_state(metrics)
}

/// Serve the Prometheus exposition endpoint until the shutdown signal fires.
pub async fn serve_metrics(
    metrics: Arc<DaemonMetrics>,
    addr: SocketAddr,
    shutdown: ShutdownSignal,
) -> anyhow::Result<()> {
    let app = metrics_router(metrics);
    let listener = tokio::net::TcpListener::bind(addr).await?;
    info!("Prometheus metrics available at http://{}/metrics", addr);

    axum::serve(listener, app)
        .with_graceful_shutdown(async move { shutdown.cancelled().await })
        .await?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn exposition_contains_all_families() {
        let m = DaemonMetrics::new();
        m.record_ping(true, Some(12.5));
        m.record_ping(false, None);
        m.set_packet_loss_percent(50.0);
        m.set_mtu_status(1);
        m.set_route_changed(true);
        m.record_traceroute_saved();

        let out = m.to_prometheus();
        assert!(out.contains("pinger_pings_total 2"));
        assert!(out.contains("pinger_pings_success_total 1"));
        assert!(out.contains("pinger_pings_failure_total 1"));
        assert!(out.contains("pinger_packet_loss_percent 50"));
        assert!(out.contains("pinger_mtu_status 1"));
        assert!(out.contains("pinger_route_changed 1"));
        assert!(out.contains("pinger_traceroutes_saved_total 1"));
        assert!(out.contains("pinger_ping_latency_ms_bucket{le=\"+Inf\"} 1"));
        assert!(out.contains("pinger_ping_latency_ms_count 1"));
    }

    #[test]
    fn histogram_buckets_are_cumulative() {
        let h = LatencyHistogram::default();
        h.record(1.5);
        h.record(4.0);
        h.record(300.0);
        let out = h.to_prometheus("x");
        assert!(out.contains("x_bucket{le=\"2\"} 1\n"));
        assert!(out.contains("x_bucket{le=\"5\"} 2\n"));
        assert!(out.contains("x_bucket{le=\"500\"} 3\n"));
        assert!(out.contains("x_count 3\n"));
    }
}
