//! DNS probes: timed resolution, per-record-type checks, resolver benchmarks.

use std::time::{Duration, Instant};

use tracing::debug;
use trust_dns_resolver::config::{NameServerConfigGroup, ResolverConfig, ResolverOpts};
use trust_dns_resolver::error::ResolveErrorKind;
use trust_dns_resolver::proto::rr::{RData, RecordType};
use trust_dns_resolver::TokioAsyncResolver;

use crate::config::DnsSettings;
use crate::stats::{DnsBenchmark, DnsRecordCheck, DnsStatus};

/// Queries per benchmark test.
const BENCH_QUERIES: u32 = 5;

pub struct DnsProber {
    settings: DnsSettings,
    resolver: TokioAsyncResolver,
}

impl DnsProber {
    pub fn new(settings: DnsSettings) -> anyhow::Result<Self> {
        let resolver = match TokioAsyncResolver::tokio_from_system_conf() {
            Ok(r) => r,
            Err(e) => {
                debug!(error = %e, "system resolver config unavailable, using defaults");
                TokioAsyncResolver::tokio(ResolverConfig::default(), resolver_opts())?
            }
        };
        Ok(Self { settings, resolver })
    }

    /// Single timed A lookup of the configured test domain.
    ///
    /// Returns `(success, elapsed_ms, status)`; slower than the configured
    /// threshold reports `Slow`.
    pub async fn check_resolve(&self) -> (bool, Option<f64>, DnsStatus) {
        let start = Instant::now();
        match self.resolver.ipv4_lookup(self.settings.test_domain.as_str()).await {
            Ok(_) => {
                let ms = start.elapsed().as_secs_f64() * 1000.0;
                let status = if ms > self.settings.slow_threshold_ms {
                    DnsStatus::Slow
                } else {
                    DnsStatus::Ok
                };
                (true, Some(ms), status)
            }
            Err(_) => (false, None, DnsStatus::Failed),
        }
    }

    /// Per-record-type resolution of the test domain.
    pub async fn check_record_types(&self) -> Vec<DnsRecordCheck> {
        let mut results = Vec::with_capacity(self.settings.record_types.len());
        for record_type in &self.settings.record_types {
            results.push(self.check_one_type(record_type).await);
        }
        results
    }

    async fn check_one_type(&self, record_type: &str) -> DnsRecordCheck {
        let domain = self.settings.test_domain.as_str();
        let start = Instant::now();

        let outcome: Result<Vec<String>, String> = match record_type {
            "A" => self
                .resolver
                .ipv4_lookup(domain)
                .await
                .map(|l| l.iter().map(|ip| ip.to_string()).collect())
                .map_err(|e| e.to_string()),
            "AAAA" => self
                .resolver
                .ipv6_lookup(domain)
                .await
                .map(|l| l.iter().map(|ip| ip.to_string()).collect())
                .map_err(|e| e.to_string()),
            "MX" => self
                .resolver
                .mx_lookup(domain)
                .await
                .map(|l| {
                    l.iter()
                        .map(|mx| format!("{} {}", mx.preference(), mx.exchange()))
                        .collect()
                })
                .map_err(|e| e.to_string()),
            "TXT" => self
                .resolver
                .txt_lookup(domain)
                .await
                .map(|l| {
                    l.iter()
                        .map(|txt| {
                            txt.txt_data()
                                .iter()
                                .map(|part| String::from_utf8_lossy(part).into_owned())
                                .collect::<Vec<_>>()
                                .join("")
                        })
                        .collect()
                })
                .map_err(|e| e.to_string()),
            "NS" => self
                .resolver
                .ns_lookup(domain)
                .await
                .map(|l| l.iter().map(|name| name.to_string()).collect())
                .map_err(|e| e.to_string()),
            "CNAME" => self
                .resolver
                .lookup(domain, RecordType::CNAME)
                .await
                .map(|l| {
                    l.iter()
                        .filter_map(|rdata| match rdata {
                            RData::CNAME(name) => Some(name.to_string()),
                            _ => None,
                        })
                        .collect()
                })
                .map_err(|e| e.to_string()),
            other => Err(format!("unsupported record type: {other}")),
        };

        let elapsed_ms = start.elapsed().as_secs_f64() * 1000.0;
        match outcome {
            Ok(records) => DnsRecordCheck {
                record_type: record_type.to_string(),
                success: true,
                response_time_ms: Some(elapsed_ms),
                records,
                error: None,
            },
            Err(error) => DnsRecordCheck {
                record_type: record_type.to_string(),
                success: false,
                response_time_ms: None,
                records: Vec::new(),
                error: Some(error),
            },
        }
    }

    /// Cached / uncached / dotcom benchmark against each configured server.
    pub async fn run_benchmarks(&self) -> Vec<DnsBenchmark> {
        let mut all = Vec::new();
        for server in &self.settings.benchmark_servers {
            let resolver = match self.resolver_for(server) {
                Some(r) => r,
                None => continue,
            };

            // Warm the cache before the cached test.
            let _ = timed_query(&resolver, &self.settings.test_domain).await;

            let cached: Vec<String> = (0..BENCH_QUERIES)
                .map(|_| self.settings.test_domain.clone())
                .collect();
            all.push(
                self.bench_run(&resolver, server, "cached", cached.into_iter())
                    .await,
            );

            // Unique labels defeat the resolver cache.
            let uncached: Vec<String> = (0..BENCH_QUERIES)
                .map(|_| {
                    let label = uuid::Uuid::new_v4().simple().to_string();
                    format!("{}.{}", &label[..8], self.settings.test_domain)
                })
                .collect();
            all.push(
                self.bench_run(&resolver, server, "uncached", uncached.into_iter())
                    .await,
            );

            let dotcom: Vec<String> = (0..BENCH_QUERIES)
                .map(|_| self.settings.benchmark_domain.clone())
                .collect();
            all.push(
                self.bench_run(&resolver, server, "dotcom", dotcom.into_iter())
                    .await,
            );
        }
        all
    }

    async fn bench_run(
        &self,
        resolver: &TokioAsyncResolver,
        server: &str,
        test_type: &str,
        domains: impl Iterator<Item = String>,
    ) -> DnsBenchmark {
        let mut timings = Vec::new();
        let mut responded = 0u32;
        let mut total = 0u32;

        for domain in domains {
            total += 1;
            if let Some(ms) = timed_query(resolver, &domain).await {
                responded += 1;
                timings.push(ms);
            }
        }

        summarize(server, test_type, &self.settings.benchmark_domain, total, responded, &timings)
    }

    fn resolver_for(&self, server: &str) -> Option<TokioAsyncResolver> {
        if server == "system" {
            return Some(self.resolver.clone());
        }
        let ip = server.parse().ok()?;
        let group = NameServerConfigGroup::from_ips_clear(&[ip], 53, true);
        let config = ResolverConfig::from_parts(None, vec![], group);
        TokioAsyncResolver::tokio(config, resolver_opts()).ok()
    }
}

fn resolver_opts() -> ResolverOpts {
    let mut opts = ResolverOpts::default();
    opts.timeout = Duration::from_secs(2);
    opts
}

/// Time one query. NXDOMAIN still counts as a response.
async fn timed_query(resolver: &TokioAsyncResolver, domain: &str) -> Option<f64> {
    let start = Instant::now();
    match resolver.ipv4_lookup(domain).await {
        Ok(_) => Some(start.elapsed().as_secs_f64() * 1000.0),
        Err(e) => match e.kind() {
            ResolveErrorKind::NoRecordsFound { .. } => {
                Some(start.elapsed().as_secs_f64() * 1000.0)
            }
            _ => None,
        },
    }
}

fn summarize(
    server: &str,
    test_type: &str,
    domain: &str,
    total: u32,
    responded: u32,
    timings: &[f64],
) -> DnsBenchmark {
    let (min_ms, avg_ms, max_ms, std_dev) = if timings.is_empty() {
        (0.0, 0.0, 0.0, 0.0)
    } else {
        let min = timings.iter().copied().fold(f64::INFINITY, f64::min);
        let max = timings.iter().copied().fold(0.0f64, f64::max);
        let avg = timings.iter().sum::<f64>() / timings.len() as f64;
        let var = if timings.len() < 2 {
            0.0
        } else {
            timings.iter().map(|t| (t - avg).powi(2)).sum::<f64>() / (timings.len() - 1) as f64
        };
        (min, avg, max, var.sqrt())
    };

    DnsBenchmark {
        server: server.to_string(),
        test_type: test_type.to_string(),
        domain: domain.to_string(),
        queries: total,
        min_ms,
        avg_ms,
        max_ms,
        std_dev,
        reliability: if total == 0 {
            0.0
        } else {
            responded as f64 / total as f64
        },
    }
}
