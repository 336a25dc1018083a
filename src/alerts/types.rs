//! Alert data model: context, entity, group, history.

use std::collections::HashMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

/// Alert priority, orderable for escalation and group maxima.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize,
)]
pub enum AlertPriority {
    Low = 1,
    Medium = 2,
    High = 3,
    Critical = 4,
}

impl AlertPriority {
    /// One step up, capped at critical.
    pub fn escalated(self) -> AlertPriority {
        match self {
            AlertPriority::Low => AlertPriority::Medium,
            AlertPriority::Medium => AlertPriority::High,
            AlertPriority::High | AlertPriority::Critical => AlertPriority::Critical,
        }
    }
}

impl std::fmt::Display for AlertPriority {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            AlertPriority::Low => write!(f, "LOW"),
            AlertPriority::Medium => write!(f, "MEDIUM"),
            AlertPriority::High => write!(f, "HIGH"),
            AlertPriority::Critical => write!(f, "CRITICAL"),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum AlertType {
    PacketLoss,
    HighLatency,
    ConnectionLost,
    HighJitter,
    HighAvgLatency,
    MtuIssue,
    RouteChange,
    DnsFailure,
    IpChange,
    HopIssue,
    MemoryExceeded,
    Anomaly,
}

impl AlertType {
    pub fn as_str(&self) -> &'static str {
        match self {
            AlertType::PacketLoss => "packet_loss",
            AlertType::HighLatency => "high_latency",
            AlertType::ConnectionLost => "connection_lost",
            AlertType::HighJitter => "high_jitter",
            AlertType::HighAvgLatency => "high_avg_latency",
            AlertType::MtuIssue => "mtu_issue",
            AlertType::RouteChange => "route_change",
            AlertType::DnsFailure => "dns_failure",
            AlertType::IpChange => "ip_change",
            AlertType::HopIssue => "hop_issue",
            AlertType::MemoryExceeded => "memory_exceeded",
            AlertType::Anomaly => "anomaly",
        }
    }
}

impl std::fmt::Display for AlertType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Context used for grouping and correlation.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct AlertContext {
    /// e.g. "ping", "dns", "mtu"
    pub service: String,
    /// e.g. "network", "latency", "connectivity"
    pub component: String,
    /// e.g. "performance", "availability"
    pub problem_type: String,
    /// Monitored target (IP or domain)
    pub target: String,
    pub metadata: HashMap<String, serde_json::Value>,
}

impl AlertContext {
    pub fn new(
        service: impl Into<String>,
        component: impl Into<String>,
        problem_type: impl Into<String>,
        target: impl Into<String>,
    ) -> Self {
        Self {
            service: service.into(),
            component: component.into(),
            problem_type: problem_type.into(),
            target: target.into(),
            metadata: HashMap::new(),
        }
    }

    /// Loose match compares service/component/problem_type; strict adds target.
    pub fn matches(&self, other: &AlertContext, strict: bool) -> bool {
        let loose = self.service == other.service
            && self.component == other.component
            && self.problem_type == other.problem_type;
        if strict {
            loose && self.target == other.target
        } else {
            loose
        }
    }
}

/// Core alert entity flowing through the pipeline.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AlertEntity {
    pub alert_type: AlertType,
    pub message: String,
    pub priority: AlertPriority,
    pub context: AlertContext,
    pub timestamp: DateTime<Utc>,
    pub fingerprint: String,
    pub metadata: HashMap<String, serde_json::Value>,
    pub suppressed: bool,
    pub group_id: Option<String>,
}

impl AlertEntity {
    pub fn new(
        alert_type: AlertType,
        message: impl Into<String>,
        priority: AlertPriority,
        context: AlertContext,
    ) -> Self {
        Self::with_metadata(alert_type, message, priority, context, HashMap::new())
    }

    pub fn with_metadata(
        alert_type: AlertType,
        message: impl Into<String>,
        priority: AlertPriority,
        context: AlertContext,
        metadata: HashMap<String, serde_json::Value>,
    ) -> Self {
        let fingerprint = fingerprint(alert_type, &context, &metadata);
        Self {
            alert_type,
            message: message.into(),
            priority,
            context,
            timestamp: Utc::now(),
            fingerprint,
            metadata,
            suppressed: false,
            group_id: None,
        }
    }

    pub fn age_seconds(&self, now: DateTime<Utc>) -> f64 {
        (now - self.timestamp).num_milliseconds() as f64 / 1000.0
    }
}

/// Stable identity class for deduplication: SHA-256 over the alert type and
/// context (plus threshold metadata when present), truncated to 16 hex chars.
pub fn fingerprint(
    alert_type: AlertType,
    context: &AlertContext,
    metadata: &HashMap<String, serde_json::Value>,
) -> String {
    let mut components = vec![
        alert_type.as_str().to_string(),
        context.service.clone(),
        context.component.clone(),
        context.problem_type.clone(),
        context.target.clone(),
    ];
    if let Some(threshold) = metadata.get("threshold") {
        components.push(threshold.to_string());
    }

    let digest = Sha256::digest(components.join("|").as_bytes());
    hex::encode(digest)[..16].to_string()
}

/// Group of related alerts.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AlertGroup {
    pub group_id: String,
    pub alerts: Vec<AlertEntity>,
    pub context: Option<AlertContext>,
    pub priority: AlertPriority,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub count: usize,
    pub active: bool,
}

impl AlertGroup {
    pub fn new(group_id: impl Into<String>) -> Self {
        let now = Utc::now();
        Self {
            group_id: group_id.into(),
            alerts: Vec::new(),
            context: None,
            priority: AlertPriority::Low,
            created_at: now,
            updated_at: now,
            count: 0,
            active: true,
        }
    }

    /// Append an alert: bump the count, raise the priority monotonically, set
    /// the context on first add, and write the group id back into the alert.
    pub fn add_alert(&mut self, mut alert: AlertEntity) {
        alert.group_id = Some(self.group_id.clone());

        if self.context.is_none() {
            self.context = Some(alert.context.clone());
        }
        if alert.priority > self.priority {
            self.priority = alert.priority;
        }

        self.alerts.push(alert);
        self.count = self.alerts.len();
        self.updated_at = Utc::now();
    }

    pub fn age_seconds(&self, now: DateTime<Utc>) -> f64 {
        (now - self.created_at).num_milliseconds() as f64 / 1000.0
    }

    pub fn should_escalate(&self, now: DateTime<Utc>, escalation_threshold_secs: f64) -> bool {
        self.active && self.age_seconds(now) >= escalation_threshold_secs
    }

    pub fn summary(&self) -> String {
        match self.alerts.first() {
            None => "Empty alert group".into(),
            Some(first) if self.count == 1 => first.message.clone(),
            Some(first) => format!("{} (+{} similar)", first.message, self.count - 1),
        }
    }
}

/// Bounded, TTL-retained record of processed alerts.
#[derive(Debug)]
pub struct AlertHistory {
    entries: Vec<AlertEntity>,
    max_size: usize,
    retention_secs: f64,
}

impl Default for AlertHistory {
    fn default() -> Self {
        Self::new(500, 48.0 * 3600.0)
    }
}

impl AlertHistory {
    pub fn new(max_size: usize, retention_secs: f64) -> Self {
        Self {
            entries: Vec::new(),
            max_size,
            retention_secs,
        }
    }

    /// Insert with automatic cleanup by retention and size.
    pub fn add(&mut self, alert: AlertEntity) {
        self.entries.push(alert);
        self.cleanup();
    }

    fn cleanup(&mut self) {
        let cutoff = Utc::now() - chrono::Duration::milliseconds((self.retention_secs * 1000.0) as i64);
        self.entries.retain(|e| e.timestamp >= cutoff);

        if self.entries.len() > self.max_size {
            let excess = self.entries.len() - self.max_size;
            self.entries.drain(..excess);
        }
    }

    pub fn recent(&self, seconds: f64) -> Vec<&AlertEntity> {
        let cutoff = Utc::now() - chrono::Duration::milliseconds((seconds * 1000.0) as i64);
        self.entries.iter().filter(|e| e.timestamp >= cutoff).collect()
    }

    pub fn by_type(&self, alert_type: AlertType) -> Vec<&AlertEntity> {
        self.entries
            .iter()
            .filter(|e| e.alert_type == alert_type)
            .collect()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn clear(&mut self) {
        self.entries.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn context() -> AlertContext {
        AlertContext::new("ping", "network", "availability", "1.1.1.1")
    }

    #[test]
    fn priority_is_orderable_and_escalates() {
        assert!(AlertPriority::Low < AlertPriority::Critical);
        assert_eq!(AlertPriority::Low.escalated(), AlertPriority::Medium);
        assert_eq!(AlertPriority::High.escalated(), AlertPriority::Critical);
        assert_eq!(AlertPriority::Critical.escalated(), AlertPriority::Critical);
    }

    #[test]
    fn fingerprint_is_pure_and_stable() {
        let a = AlertEntity::new(
            AlertType::PacketLoss,
            "loss at 7%",
            AlertPriority::Medium,
            context(),
        );
        let b = AlertEntity::new(
            AlertType::PacketLoss,
            "a completely different message",
            AlertPriority::Critical,
            context(),
        );
        assert_eq!(a.fingerprint, b.fingerprint);
        assert_eq!(a.fingerprint.len(), 16);
    }

    #[test]
    fn fingerprint_varies_by_type_target_and_threshold() {
        let base = AlertEntity::new(
            AlertType::PacketLoss,
            "m",
            AlertPriority::Low,
            context(),
        );

        let other_type =
            AlertEntity::new(AlertType::HighJitter, "m", AlertPriority::Low, context());
        assert_ne!(base.fingerprint, other_type.fingerprint);

        let mut ctx = context();
        ctx.target = "8.8.8.8".into();
        let other_target = AlertEntity::new(AlertType::PacketLoss, "m", AlertPriority::Low, ctx);
        assert_ne!(base.fingerprint, other_target.fingerprint);

        let mut metadata = HashMap::new();
        metadata.insert("threshold".into(), serde_json::json!(5.0));
        let with_threshold = AlertEntity::with_metadata(
            AlertType::PacketLoss,
            "m",
            AlertPriority::Low,
            context(),
            metadata,
        );
        assert_ne!(base.fingerprint, with_threshold.fingerprint);
    }

    #[test]
    fn context_matching_modes() {
        let a = context();
        let mut b = context();
        b.target = "8.8.8.8".into();
        assert!(a.matches(&b, false));
        assert!(!a.matches(&b, true));

        let mut c = context();
        c.service = "dns".into();
        assert!(!a.matches(&c, false));
    }

    #[test]
    fn group_priority_is_monotone_and_context_set_once() {
        let mut group = AlertGroup::new("abcd1234");
        group.add_alert(AlertEntity::new(
            AlertType::HighLatency,
            "first",
            AlertPriority::Medium,
            context(),
        ));
        assert_eq!(group.priority, AlertPriority::Medium);
        assert_eq!(group.count, 1);
        assert!(group.context.is_some());

        group.add_alert(AlertEntity::new(
            AlertType::ConnectionLost,
            "second",
            AlertPriority::Critical,
            context(),
        ));
        assert_eq!(group.priority, AlertPriority::Critical);

        // Lower-priority additions never lower the group priority.
        group.add_alert(AlertEntity::new(
            AlertType::HighLatency,
            "third",
            AlertPriority::Low,
            context(),
        ));
        assert_eq!(group.priority, AlertPriority::Critical);
        assert_eq!(group.count, 3);
        assert_eq!(group.alerts[0].group_id.as_deref(), Some("abcd1234"));
    }

    #[test]
    fn history_is_bounded() {
        let mut history = AlertHistory::new(10, 3600.0);
        for i in 0..30 {
            history.add(AlertEntity::new(
                AlertType::Anomaly,
                format!("a{i}"),
                AlertPriority::Low,
                context(),
            ));
        }
        assert_eq!(history.len(), 10);
        assert!(history.recent(60.0).len() == 10);
    }
}
