//! Problem analyzer: classify the current fault, predict risk, find patterns.

use std::collections::VecDeque;

use chrono::{DateTime, Timelike, Utc};
use serde::{Deserialize, Serialize};
use tracing::info;

use crate::config::ProblemSettings;
use crate::stats::{DnsStatus, StatsSnapshot};

/// Packet loss over the recent window above this is a fault, percent.
const LOSS_PCT_THRESHOLD: f64 = 20.0;
/// Consecutive losses at or above this point at the ISP rather than LAN.
const ISP_CONSECUTIVE_LOSSES: u32 = 10;
/// Average latency above this is an ISP fault, ms.
const ISP_AVG_LATENCY_MS: f64 = 200.0;
/// Jitter above this is an ISP fault, ms.
const ISP_JITTER_MS: f64 = 50.0;

/// Prediction window and pattern thresholds.
const PREDICTION_MIN_HISTORY: usize = 5;
const PREDICTION_RECENT: usize = 10;
const PREDICTION_RECENT_PROBLEMS: usize = 5;
const TIME_PATTERN_MIN_HISTORY: usize = 20;
const TIME_PATTERN_MIN_HITS: usize = 3;
const PATTERN_MIN_HISTORY: usize = 10;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ProblemKind {
    None,
    Isp,
    Local,
    Dns,
    Mtu,
}

impl ProblemKind {
    pub fn label(&self) -> &'static str {
        match self {
            ProblemKind::None => "No problems",
            ProblemKind::Isp => "ISP issue",
            ProblemKind::Local => "Local network",
            ProblemKind::Dns => "DNS issue",
            ProblemKind::Mtu => "MTU issue",
        }
    }
}

impl std::fmt::Display for ProblemKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.label())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Prediction {
    Stable,
    Risk,
}

impl std::fmt::Display for Prediction {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Prediction::Stable => write!(f, "Stable"),
            Prediction::Risk => write!(f, "At risk"),
        }
    }
}

#[derive(Debug, Clone)]
pub struct ProblemRecord {
    pub kind: ProblemKind,
    pub timestamp: DateTime<Utc>,
    pub latency_ms: Option<f64>,
    pub packet_loss_pct: f64,
    pub jitter_ms: f64,
}

pub struct ProblemAnalyzer {
    settings: ProblemSettings,
    history: VecDeque<ProblemRecord>,
}

impl ProblemAnalyzer {
    pub fn new(settings: ProblemSettings) -> Self {
        Self {
            settings,
            history: VecDeque::new(),
        }
    }

    /// Classify the current fault. First match wins:
    /// DNS, MTU, packet loss (ISP vs local), average latency, jitter.
    pub fn analyze_current(&mut self, snap: &StatsSnapshot) -> ProblemKind {
        if snap.dns_status == DnsStatus::Failed {
            self.record(ProblemKind::Dns, snap);
            return ProblemKind::Dns;
        }

        if snap.mtu_status.is_issue() {
            self.record(ProblemKind::Mtu, snap);
            return ProblemKind::Mtu;
        }

        if snap.recent_loss_pct() > LOSS_PCT_THRESHOLD {
            let kind = if snap.consecutive_losses >= ISP_CONSECUTIVE_LOSSES {
                ProblemKind::Isp
            } else {
                ProblemKind::Local
            };
            self.record(kind, snap);
            return kind;
        }

        if snap.success > 0 && snap.avg_latency() > ISP_AVG_LATENCY_MS {
            self.record(ProblemKind::Isp, snap);
            return ProblemKind::Isp;
        }

        if snap.jitter > ISP_JITTER_MS {
            self.record(ProblemKind::Isp, snap);
            return ProblemKind::Isp;
        }

        ProblemKind::None
    }

    /// Risk prediction over the problem history.
    pub fn predict(&self, now: DateTime<Utc>) -> Prediction {
        if self.history.len() < PREDICTION_MIN_HISTORY {
            return Prediction::Stable;
        }

        let recent_problems = self
            .history
            .iter()
            .rev()
            .take(PREDICTION_RECENT)
            .filter(|r| r.kind != ProblemKind::None)
            .count();
        if recent_problems >= PREDICTION_RECENT_PROBLEMS {
            return Prediction::Risk;
        }

        // Recurring trouble in this hour of day.
        if self.history.len() >= TIME_PATTERN_MIN_HISTORY {
            let hour = now.hour();
            let same_hour = self
                .history
                .iter()
                .filter(|r| r.timestamp.hour() == hour)
                .count();
            if same_hour >= TIME_PATTERN_MIN_HITS {
                return Prediction::Risk;
            }
        }

        Prediction::Stable
    }

    /// Dominant problem type, when it covers at least half the history.
    pub fn identify_pattern(&self) -> String {
        if self.history.len() < PATTERN_MIN_HISTORY {
            return "...".into();
        }

        let mut counts: std::collections::HashMap<ProblemKind, usize> =
            std::collections::HashMap::new();
        for record in &self.history {
            *counts.entry(record.kind).or_default() += 1;
        }

        let Some((&dominant, &count)) = counts.iter().max_by_key(|(_, &c)| c) else {
            return "...".into();
        };

        if count * 2 >= self.history.len() {
            dominant.label().to_string()
        } else {
            "...".into()
        }
    }

    /// Append to history unless the same type was recorded within the
    /// suppression window.
    fn record(&mut self, kind: ProblemKind, snap: &StatsSnapshot) {
        let now = Utc::now();

        if let Some(last) = self.history.back() {
            if last.kind == kind {
                let age = (now - last.timestamp).num_seconds();
                if age < self.settings.log_suppression_secs as i64 {
                    return;
                }
            }
        }

        if self.history.len() == self.settings.history_size {
            self.history.pop_front();
        }
        self.history.push_back(ProblemRecord {
            kind,
            timestamp: now,
            latency_ms: snap.last_latency_ms,
            packet_loss_pct: if snap.total > 0 {
                snap.failure as f64 / snap.total as f64 * 100.0
            } else {
                0.0
            },
            jitter_ms: snap.jitter,
        });
        info!(kind = kind.label(), "problem recorded");
    }

    pub fn history_len(&self) -> usize {
        self.history.len()
    }

    #[cfg(test)]
    fn push_history(&mut self, kind: ProblemKind, timestamp: DateTime<Utc>) {
        self.history.push_back(ProblemRecord {
            kind,
            timestamp,
            latency_ms: None,
            packet_loss_pct: 0.0,
            jitter_ms: 0.0,
        });
    }
}
