//! Dynamic alert prioritization: weighted impact scoring plus age-based
//! escalation.

use chrono::{DateTime, Utc};

use super::types::{AlertEntity, AlertGroup, AlertPriority, AlertType};

/// Weights for the priority score; they sum to 1.
#[derive(Debug, Clone, Copy)]
pub struct PriorityWeights {
    pub business_impact: f64,
    pub user_impact: f64,
    pub service_criticality: f64,
    pub time_factor: f64,
}

impl Default for PriorityWeights {
    fn default() -> Self {
        Self {
            business_impact: 0.4,
            user_impact: 0.3,
            service_criticality: 0.2,
            time_factor: 0.1,
        }
    }
}

/// `(business_impact, user_impact)` per alert type, both 0-1.
fn impact(alert_type: AlertType) -> (f64, f64) {
    match alert_type {
        AlertType::ConnectionLost => (1.0, 1.0),
        AlertType::PacketLoss => (0.7, 0.8),
        AlertType::HighLatency => (0.6, 0.7),
        AlertType::HighJitter => (0.5, 0.6),
        AlertType::HighAvgLatency => (0.6, 0.7),
        AlertType::MtuIssue => (0.5, 0.6),
        AlertType::RouteChange => (0.4, 0.3),
        AlertType::DnsFailure => (0.8, 0.9),
        AlertType::IpChange => (0.3, 0.2),
        AlertType::HopIssue => (0.5, 0.4),
        AlertType::MemoryExceeded => (0.9, 0.7),
        AlertType::Anomaly => (0.6, 0.5),
    }
}

/// Criticality score per service name, 0-1.
fn service_criticality(service: &str) -> f64 {
    match service {
        "ping" | "network" => 1.0,
        "memory" => 0.9,
        "dns" => 0.8,
        "route" => 0.7,
        "mtu" | "hop" => 0.6,
        "ip" => 0.5,
        _ => 0.5,
    }
}

pub struct AlertPrioritizer {
    weights: PriorityWeights,
    escalation_threshold_secs: f64,
}

impl AlertPrioritizer {
    pub fn new(weights: PriorityWeights, escalation_threshold_secs: f64) -> Self {
        Self {
            weights,
            escalation_threshold_secs,
        }
    }

    /// Weighted score mapped onto the priority ladder.
    pub fn calculate_priority(&self, alert: &AlertEntity, now: DateTime<Utc>) -> AlertPriority {
        let (business, user) = impact(alert.alert_type);
        let service = service_criticality(&alert.context.service);
        let time = self.time_factor(alert, now);

        let score = business * self.weights.business_impact
            + user * self.weights.user_impact
            + service * self.weights.service_criticality
            + time * self.weights.time_factor;

        score_to_priority(score)
    }

    /// Age normalized against the escalation threshold, capped at 1.
    fn time_factor(&self, alert: &AlertEntity, now: DateTime<Utc>) -> f64 {
        let age = alert.age_seconds(now).max(0.0);
        (age / self.escalation_threshold_secs).min(1.0)
    }

    /// Bump priority one step for groups older than the escalation threshold.
    ///
    /// Returns ids of the groups that were escalated.
    pub fn escalate_aged<'a>(
        &self,
        groups: impl Iterator<Item = &'a mut AlertGroup>,
        now: DateTime<Utc>,
    ) -> Vec<String> {
        let mut escalated = Vec::new();

        for group in groups {
            if !group.should_escalate(now, self.escalation_threshold_secs) {
                continue;
            }

            let mut changed = false;
            for alert in &mut group.alerts {
                let bumped = alert.priority.escalated();
                if bumped != alert.priority {
                    alert.priority = bumped;
                    changed = true;
                }
            }

            if changed {
                group.priority = group
                    .alerts
                    .iter()
                    .map(|a| a.priority)
                    .max()
                    .unwrap_or(group.priority);
                escalated.push(group.group_id.clone());
            }
        }

        escalated
    }

    /// Highest priority first, oldest first within a priority.
    pub fn sort_by_priority(&self, groups: &mut [AlertGroup]) {
        groups.sort_by(|a, b| {
            b.priority
                .cmp(&a.priority)
                .then(a.created_at.cmp(&b.created_at))
        });
    }
}

fn score_to_priority(score: f64) -> AlertPriority {
    if score >= 0.8 {
        AlertPriority::Critical
    } else if score >= 0.6 {
        AlertPriority::High
    } else if score >= 0.4 {
        AlertPriority::Medium
    } else {
        AlertPriority::Low
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::alerts::types::AlertContext;
    use chrono::Duration as ChronoDuration;

    fn prioritizer() -> AlertPrioritizer {
        AlertPrioritizer::new(PriorityWeights::default(), 1800.0)
    }

    fn entity(alert_type: AlertType, service: &str) -> AlertEntity {
        AlertEntity::new(
            alert_type,
            "m",
            AlertPriority::Medium,
            AlertContext::new(service, "network", "availability", "1.1.1.1"),
        )
    }

    #[test]
    fn connection_lost_on_core_service_is_critical() {
        let p = prioritizer();
        let alert = entity(AlertType::ConnectionLost, "ping");
        // 1.0*0.4 + 1.0*0.3 + 1.0*0.2 + 0*0.1 = 0.9
        assert_eq!(p.calculate_priority(&alert, Utc::now()), AlertPriority::Critical);
    }

    #[test]
    fn ip_change_is_low() {
        let p = prioritizer();
        let alert = entity(AlertType::IpChange, "ip");
        // 0.3*0.4 + 0.2*0.3 + 0.5*0.2 = 0.28
        assert_eq!(p.calculate_priority(&alert, Utc::now()), AlertPriority::Low);
    }

    #[test]
    fn age_raises_the_score() {
        let p = prioritizer();
        let mut alert = entity(AlertType::IpChange, "ip");
        let now = Utc::now();
        assert_eq!(p.calculate_priority(&alert, now), AlertPriority::Low);

        // A full escalation window of age adds the whole time weight: 0.38.
        alert.timestamp = now - ChronoDuration::seconds(3600);
        assert_eq!(p.calculate_priority(&alert, now), AlertPriority::Low);

        let mut latency = entity(AlertType::HighJitter, "mtu");
        // 0.5*0.4 + 0.6*0.3 + 0.6*0.2 = 0.5; with full age 0.6 -> High.
        assert_eq!(p.calculate_priority(&latency, now), AlertPriority::Medium);
        latency.timestamp = now - ChronoDuration::seconds(3600);
        assert_eq!(p.calculate_priority(&latency, now), AlertPriority::High);
    }

    #[test]
    fn escalation_bumps_group_priority_once_per_pass() {
        let p = prioritizer();
        let now = Utc::now();

        let mut group = AlertGroup::new("aaaa1111");
        group.add_alert(entity(AlertType::HighLatency, "ping"));
        group.created_at = now - ChronoDuration::seconds(2000);

        let escalated = p.escalate_aged(std::iter::once(&mut group), now);
        assert_eq!(escalated, vec!["aaaa1111".to_string()]);
        assert_eq!(group.priority, AlertPriority::High);

        // Already critical groups stop reporting as escalated.
        group.alerts[0].priority = AlertPriority::Critical;
        group.priority = AlertPriority::Critical;
        let escalated = p.escalate_aged(std::iter::once(&mut group), now);
        assert!(escalated.is_empty());
    }

    #[test]
    fn sorting_puts_critical_first() {
        let p = prioritizer();
        let mut low = AlertGroup::new("g-low");
        low.add_alert(entity(AlertType::IpChange, "ip"));
        low.priority = AlertPriority::Low;
        let mut critical = AlertGroup::new("g-crit");
        critical.add_alert(entity(AlertType::ConnectionLost, "ping"));
        critical.priority = AlertPriority::Critical;

        let mut groups = vec![low, critical];
        p.sort_by_priority(&mut groups);
        assert_eq!(groups[0].group_id, "g-crit");
    }
}
