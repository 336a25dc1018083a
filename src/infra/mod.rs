//! Process-wide infrastructure: child-process registry, Prometheus metrics,
//! health endpoints, single-instance lock, logging init.

pub mod health;
pub mod logging;
pub mod metrics;
pub mod process_registry;
pub mod single_instance;

pub use health::serve_health;
pub use metrics::{serve_metrics, DaemonMetrics};
pub use process_registry::ProcessRegistry;
pub use single_instance::{InstanceLock, LockOutcome};
