//! Probe primitives.
//!
//! Thin wrappers around the platform `ping`/`traceroute` tools plus DNS, MTU
//! and public-IP lookups. Every child process goes through the central
//! [`ProcessRegistry`](crate::infra::ProcessRegistry) so it can be killed on
//! timeout or shutdown.

pub mod dns;
pub mod hops;
pub mod mtu;
pub mod ping;
pub mod public_ip;
pub mod traceroute;

use std::time::Duration;

use thiserror::Error;

/// Probe failure taxonomy.
///
/// Timeouts and parse failures are counted as probe failures by callers and
/// never escalate; a missing system tool is fatal at startup.
#[derive(Debug, Error)]
pub enum ProbeError {
    #[error("required system tool missing: {0}")]
    Unavailable(String),

    #[error("probe timed out after {0:?}")]
    Timeout(Duration),

    #[error("unrecognized probe output")]
    Parse,

    #[error("network error: {0}")]
    Network(String),

    #[error(transparent)]
    Io(#[from] std::io::Error),
}

impl ProbeError {
    /// Whether this error means the probe simply did not complete in budget.
    pub fn is_timeout(&self) -> bool {
        matches!(self, ProbeError::Timeout(_))
    }
}

pub type ProbeResult<T> = Result<T, ProbeError>;
