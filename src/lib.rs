//! Network path observability daemon.
//!
//! Continuously probes a target endpoint and the routers on the path,
//! maintains rolling reachability and latency statistics, classifies faults,
//! and feeds a deduplicating, grouping, prioritizing alert pipeline. State is
//! exposed through Prometheus metrics and HTTP health endpoints.

pub mod alerts;
pub mod analysis;
pub mod config;
pub mod infra;
pub mod monitor;
pub mod probes;
pub mod stats;
pub mod tasks;
