//! Daemon entry point: configuration, single-instance lock, dependency
//! checks, server spawning, task orchestration, main ping loop, shutdown.

use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use chrono::Utc;
use clap::Parser;
use dotenv::dotenv;
use parking_lot::Mutex;
use tracing::{error, info};

use pinger::alerts::SmartAlertManager;
use pinger::config::{Settings, VERSION};
use pinger::infra::single_instance::{self, LockOutcome};
use pinger::infra::{logging, serve_health, serve_metrics, DaemonMetrics, ProcessRegistry};
use pinger::monitor::Monitor;
use pinger::probes::dns::DnsProber;
use pinger::probes::hops::HopMonitor;
use pinger::probes::mtu::MtuProber;
use pinger::probes::ping::PingProber;
use pinger::probes::public_ip::{GeoService, PublicIpClient};
use pinger::probes::traceroute::TracerouteRunner;
use pinger::stats::StatsRepository;
use pinger::tasks::{
    dns_monitor::DnsMonitorTask, hop_monitor::HopMonitorTask, ip_updater::IpUpdaterTask,
    mtu_monitor::MtuMonitorTask, problem_analyzer::ProblemAnalyzerTask,
    route_analyzer::RouteAnalyzerTask, shutdown_channel, ttl_monitor::TtlMonitorTask,
    version_checker::VersionCheckerTask, ShutdownController, TaskOrchestrator, WorkerPool,
};

#[derive(Parser, Debug)]
#[command(name = "pinger", version = VERSION, about = "Network path observability daemon")]
struct Args {
    /// Path to a TOML configuration file (env vars still override)
    #[arg(short, long)]
    config: Option<PathBuf>,
}

#[tokio::main]
async fn main() {
    let code = match run().await {
        Ok(()) => 0,
        Err(e) => {
            eprintln!("pinger: {e:#}");
            1
        }
    };
    std::process::exit(code);
}

async fn run() -> anyhow::Result<()> {
    let _ = dotenv();
    let args = Args::parse();

    let settings = Arc::new(Settings::load(args.config.as_deref())?);
    let log_path = logging::init_tracing(&settings.logging)?;

    let mut instance_lock = match single_instance::acquire()? {
        LockOutcome::Acquired(lock) => lock,
        LockOutcome::AlreadyRunning { holder_pid } => {
            single_instance::notify_running_instance(&format!(
                "Second start attempt refused at {}",
                Utc::now().format("%Y-%m-%d %H:%M:%S UTC")
            ));
            anyhow::bail!(
                "another instance is already running{}",
                holder_pid
                    .map(|p| format!(" (pid {p})"))
                    .unwrap_or_default()
            );
        }
    };

    if !PingProber::ping_available() {
        anyhow::bail!("required system command missing: ping");
    }
    if !TracerouteRunner::traceroute_available() {
        anyhow::bail!("required system command missing: traceroute");
    }

    info!(
        version = VERSION,
        target = %settings.target_ip,
        log = %log_path.display(),
        "starting network monitor"
    );

    let (controller, shutdown) = shutdown_channel();
    spawn_signal_handler(controller);

    let registry = Arc::new(ProcessRegistry::new(
        settings.max_concurrent_processes,
        Duration::from_secs(settings.force_kill_timeout_secs),
    ));
    let pool = Arc::new(WorkerPool::new(settings.worker_pool_size));
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

    let http = reqwest::Client::builder()
        .timeout(Duration::from_secs(10))
        .build()
        .context("Failed to build HTTP client")?;

    let ping = Arc::new(PingProber::new(registry.clone(), pool.clone()));
    let traceroute = Arc::new(TracerouteRunner::new(
        registry.clone(),
        stats.clone(),
        metrics.clone(),
        settings.traceroute.clone(),
    ));
    let geo = Arc::new(GeoService::new(http.clone()));

    // Progressive discovery: each parsed hop lands in the store immediately.
    let hop_stats = stats.clone();
    let hop_monitor = Arc::new(HopMonitor::new(
        registry.clone(),
        geo,
        settings.hops.clone(),
        settings.traceroute.max_hops,
        Some(Box::new(move |records| {
            hop_stats.update_hop_monitor(records, true);
        })),
    ));

    stats.set_start_time(Utc::now());

    if settings.metrics.enabled {
        let addr: SocketAddr = format!("{}:{}", settings.metrics.addr, settings.metrics.port)
            .parse()
            .context("invalid metrics address")?;
        let metrics = metrics.clone();
        let shutdown = shutdown.clone();
        tokio::spawn(async move {
            if let Err(e) = serve_metrics(metrics, addr, shutdown).await {
                error!(error = %e, "metrics server failed");
            }
        });
    }

    if settings.health.enabled {
        let addr: SocketAddr = format!("{}:{}", settings.health.addr, settings.health.port)
            .parse()
            .context("invalid health address")?;
        let stats = stats.clone();
        let health_settings = Arc::new(settings.health.clone());
        let shutdown = shutdown.clone();
        tokio::spawn(async move {
            if let Err(e) = serve_health(stats, health_settings, addr, shutdown).await {
                error!(error = %e, "health server failed");
            }
        });
    }

    let mut orchestrator = TaskOrchestrator::new(shutdown.clone());
    orchestrator.register(Box::new(IpUpdaterTask::new(
        settings.clone(),
        stats.clone(),
        alerts.clone(),
        hop_monitor.clone(),
        PublicIpClient::new(http.clone()),
    )));
    orchestrator.register(Box::new(DnsMonitorTask::new(
        settings.clone(),
        stats.clone(),
        DnsProber::new(settings.dns.clone())?,
    )));
    orchestrator.register(Box::new(MtuMonitorTask::new(
        settings.clone(),
        stats.clone(),
        metrics.clone(),
        alerts.clone(),
        MtuProber::new(registry.clone()),
        ping.clone(),
    )));
    orchestrator.register(Box::new(TtlMonitorTask::new(
        settings.clone(),
        stats.clone(),
        ping.clone(),
    )));
    orchestrator.register(Box::new(HopMonitorTask::new(
        settings.clone(),
        stats.clone(),
        hop_monitor.clone(),
    )));
    orchestrator.register(Box::new(ProblemAnalyzerTask::new(
        settings.clone(),
        stats.clone(),
    )));
    orchestrator.register(Box::new(RouteAnalyzerTask::new(
        settings.clone(),
        stats.clone(),
        metrics.clone(),
        alerts.clone(),
        traceroute.clone(),
    )));
    orchestrator.register(Box::new(VersionCheckerTask::new(
        settings.clone(),
        stats.clone(),
        http,
    )));
    orchestrator.start_all();

    let monitor = Monitor::new(
        settings.clone(),
        stats.clone(),
        metrics,
        alerts.clone(),
        ping,
        traceroute,
    );

    info!("entering main ping loop");
    while !shutdown.is_set() {
        monitor.ping_once().await;
        monitor.check_thresholds();
        monitor.cleanup_alerts();
        monitor.poll_instance_notifications();
        {
            let mut manager = alerts.lock();
            manager.escalate_aged_groups();
            manager.suppress_noise();
        }

        if !shutdown.sleep(settings.interval()).await {
            break;
        }
    }

    info!("stopping background tasks");
    orchestrator
        .stop_all(Duration::from_secs(settings.shutdown_timeout_secs))
        .await;
    registry.shutdown().await;
    instance_lock.release();
    info!("monitoring stopped");

    Ok(())
}

fn spawn_signal_handler(controller: ShutdownController) {
    tokio::spawn(async move {
        wait_for_stop_signal().await;
        info!("stop signal received");
        controller.shutdown();
    });
}

#[cfg(unix)]
async fn wait_for_stop_signal() {
    use tokio::signal::unix::{signal, SignalKind};

    let mut term = match signal(SignalKind::terminate()) {
        Ok(s) => s,
        Err(e) => {
            error!(error = %e, "failed to install SIGTERM handler");
            let _ = tokio::signal::ctrl_c().await;
            return;
        }
    };
    let mut hup = match signal(SignalKind::hangup()) {
        Ok(s) => s,
        Err(e) => {
            error!(error = %e, "failed to install SIGHUP handler");
            let _ = tokio::signal::ctrl_c().await;
            return;
        }
    };

    tokio::select! {
        _ = tokio::signal::ctrl_c() => {}
        _ = term.recv() => {}
        _ = hup.recv() => {}
    }
}

#[cfg(not(unix))]
async fn wait_for_stop_signal() {
    let _ = tokio::signal::ctrl_c().await;
}
