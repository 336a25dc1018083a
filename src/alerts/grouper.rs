//! Alert grouping: exact context, root-cause correlation, temporal proximity.

use std::collections::HashMap;

use chrono::{Duration as ChronoDuration, Utc};
use sha2::{Digest, Sha256};

use super::types::{AlertContext, AlertEntity, AlertGroup, AlertType};

/// Which alert types a given root cause is known to produce.
fn consequences(alert_type: AlertType) -> &'static [AlertType] {
    match alert_type {
        AlertType::ConnectionLost => &[
            AlertType::PacketLoss,
            AlertType::HighLatency,
            AlertType::HighJitter,
        ],
        AlertType::MtuIssue => &[AlertType::PacketLoss, AlertType::HighLatency],
        AlertType::RouteChange => &[AlertType::HighLatency, AlertType::PacketLoss],
        AlertType::DnsFailure => &[AlertType::ConnectionLost],
        _ => &[],
    }
}

pub struct AlertGrouper {
    group_window_secs: u64,
    max_group_size: usize,
    groups: HashMap<String, AlertGroup>,
    /// context hash -> group id
    context_index: HashMap<String, String>,
}

impl AlertGrouper {
    pub fn new(group_window_secs: u64, max_group_size: usize) -> Self {
        Self {
            group_window_secs,
            max_group_size,
            groups: HashMap::new(),
            context_index: HashMap::new(),
        }
    }

    /// Add the alert to the best matching group, or open a new one.
    /// Returns a copy of the group after the addition.
    pub fn add_to_group(&mut self, alert: AlertEntity) -> AlertGroup {
        self.cleanup_expired();

        if let Some(group_id) = self.find_matching_group(&alert) {
            let can_take = self
                .groups
                .get(&group_id)
                .map(|g| g.count < self.max_group_size)
                .unwrap_or(false);
            if can_take {
                let group = self
                    .groups
                    .get_mut(&group_id)
                    .expect("group id came from the map");
                group.add_alert(alert);
                return group.clone();
            }
        }

        let group_id = new_group_id();
        let mut group = AlertGroup::new(group_id.clone());
        self.context_index
            .insert(context_hash(&alert.context), group_id.clone());
        group.add_alert(alert);
        self.groups.insert(group_id, group.clone());
        group
    }

    fn find_matching_group(&self, alert: &AlertEntity) -> Option<String> {
        // 1. Exact context.
        if let Some(group_id) = self.context_index.get(&context_hash(&alert.context)) {
            if self.groups.get(group_id).map(|g| g.active).unwrap_or(false) {
                return Some(group_id.clone());
            }
        }

        // 2. Root-cause correlation.
        for (id, group) in &self.groups {
            if !group.active {
                continue;
            }
            if group
                .alerts
                .iter()
                .any(|existing| is_correlated(existing, alert))
            {
                return Some(id.clone());
            }
        }

        // 3. Temporal: same service and component inside the window.
        let now = Utc::now();
        for (id, group) in &self.groups {
            if !group.active {
                continue;
            }
            let Some(context) = &group.context else {
                continue;
            };
            if group.age_seconds(now) > self.group_window_secs as f64 {
                continue;
            }
            if context.service == alert.context.service
                && context.component == alert.context.component
            {
                return Some(id.clone());
            }
        }

        None
    }

    fn cleanup_expired(&mut self) {
        let cutoff = Utc::now() - ChronoDuration::seconds(self.group_window_secs as i64);
        let expired: Vec<String> = self
            .groups
            .iter()
            .filter(|(_, g)| g.updated_at < cutoff)
            .map(|(id, _)| id.clone())
            .collect();

        for id in expired {
            if let Some(group) = self.groups.remove(&id) {
                if let Some(context) = &group.context {
                    let hash = context_hash(context);
                    if self.context_index.get(&hash) == Some(&id) {
                        self.context_index.remove(&hash);
                    }
                }
            }
        }
    }

    pub fn active_groups(&self) -> Vec<&AlertGroup> {
        self.groups.values().filter(|g| g.active).collect()
    }

    pub fn active_groups_cloned(&self) -> Vec<AlertGroup> {
        self.groups.values().filter(|g| g.active).cloned().collect()
    }

    pub fn groups_mut(&mut self) -> impl Iterator<Item = &mut AlertGroup> {
        self.groups.values_mut()
    }

    pub fn get(&self, group_id: &str) -> Option<&AlertGroup> {
        self.groups.get(group_id)
    }

    pub fn active_count(&self) -> usize {
        self.groups.values().filter(|g| g.active).count()
    }

    pub fn clear(&mut self) {
        self.groups.clear();
        self.context_index.clear();
    }

    #[cfg(test)]
    pub(crate) fn backdate_updates(&mut self, by: ChronoDuration) {
        for group in self.groups.values_mut() {
            group.updated_at -= by;
        }
    }
}

/// Two alerts correlate when either type is a known root cause of the other
/// and both point at the same target.
fn is_correlated(a: &AlertEntity, b: &AlertEntity) -> bool {
    if a.context.target != b.context.target {
        return false;
    }
    consequences(a.alert_type).contains(&b.alert_type)
        || consequences(b.alert_type).contains(&a.alert_type)
}

fn context_hash(context: &AlertContext) -> String {
    let key = format!(
        "{}|{}|{}|{}",
        context.service, context.component, context.problem_type, context.target
    );
    hex::encode(Sha256::digest(key.as_bytes()))[..8].to_string()
}

fn new_group_id() -> String {
    uuid::Uuid::new_v4().simple().to_string()[..8].to_string()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::alerts::types::AlertPriority;

    fn entity(alert_type: AlertType, service: &str, target: &str) -> AlertEntity {
        AlertEntity::new(
            alert_type,
            format!("{alert_type} on {target}"),
            AlertPriority::Medium,
            AlertContext::new(service, "network", "availability", target),
        )
    }

    #[test]
    fn exact_context_alerts_share_a_group() {
        let mut grouper = AlertGrouper::new(600, 20);
        let g1 = grouper.add_to_group(entity(AlertType::PacketLoss, "ping", "1.1.1.1"));
        let g2 = grouper.add_to_group(entity(AlertType::PacketLoss, "ping", "1.1.1.1"));
        assert_eq!(g1.group_id, g2.group_id);
        assert_eq!(g2.count, 2);
    }

    #[test]
    fn root_cause_correlation_groups_across_services() {
        let mut grouper = AlertGrouper::new(600, 20);
        let lost = AlertEntity::new(
            AlertType::ConnectionLost,
            "connection lost",
            AlertPriority::Critical,
            AlertContext::new("ping", "connectivity", "availability", "1.1.1.1"),
        );
        let slow = AlertEntity::new(
            AlertType::HighLatency,
            "latency way up",
            AlertPriority::Medium,
            AlertContext::new("ping", "latency", "performance", "1.1.1.1"),
        );

        let g1 = grouper.add_to_group(lost);
        let g2 = grouper.add_to_group(slow);
        assert_eq!(g1.group_id, g2.group_id);
        assert_eq!(g2.count, 2);
        assert_eq!(g2.priority, AlertPriority::Critical);
    }

    #[test]
    fn correlation_requires_matching_target() {
        let mut grouper = AlertGrouper::new(600, 20);
        let lost = AlertEntity::new(
            AlertType::ConnectionLost,
            "connection lost",
            AlertPriority::Critical,
            AlertContext::new("ping", "connectivity", "availability", "1.1.1.1"),
        );
        let slow = AlertEntity::new(
            AlertType::HighLatency,
            "latency way up",
            AlertPriority::Medium,
            AlertContext::new("dns", "latency", "performance", "8.8.8.8"),
        );

        let g1 = grouper.add_to_group(lost);
        let g2 = grouper.add_to_group(slow);
        assert_ne!(g1.group_id, g2.group_id);
    }

    #[test]
    fn temporal_correlation_same_service_and_component() {
        let mut grouper = AlertGrouper::new(600, 20);
        let a = AlertEntity::new(
            AlertType::HighJitter,
            "jitter spiking",
            AlertPriority::Medium,
            AlertContext::new("ping", "latency", "performance", "1.1.1.1"),
        );
        // Different problem_type and target: neither exact context nor
        // root-cause, but same service/component inside the window.
        let b = AlertEntity::new(
            AlertType::Anomaly,
            "odd latency distribution",
            AlertPriority::Low,
            AlertContext::new("ping", "latency", "statistical", "8.8.8.8"),
        );

        let g1 = grouper.add_to_group(a);
        let g2 = grouper.add_to_group(b);
        assert_eq!(g1.group_id, g2.group_id);
    }

    #[test]
    fn full_groups_spill_into_new_ones() {
        let mut grouper = AlertGrouper::new(600, 3);
        let mut last_id = None;
        for _ in 0..3 {
            last_id = Some(
                grouper
                    .add_to_group(entity(AlertType::PacketLoss, "ping", "1.1.1.1"))
                    .group_id,
            );
        }
        let spilled = grouper.add_to_group(entity(AlertType::PacketLoss, "ping", "1.1.1.1"));
        assert_ne!(Some(spilled.group_id.clone()), last_id);
        assert_eq!(spilled.count, 1);
    }

    #[test]
    fn expired_groups_are_dropped() {
        let mut grouper = AlertGrouper::new(600, 20);
        grouper.add_to_group(entity(AlertType::PacketLoss, "ping", "1.1.1.1"));
        assert_eq!(grouper.active_count(), 1);

        grouper.backdate_updates(ChronoDuration::seconds(601));
        let fresh = grouper.add_to_group(entity(AlertType::DnsFailure, "dns", "example.com"));
        assert_eq!(grouper.active_count(), 1);
        assert_eq!(fresh.count, 1);
    }

    #[test]
    fn group_ids_are_eight_hex_chars() {
        let mut grouper = AlertGrouper::new(600, 20);
        let g = grouper.add_to_group(entity(AlertType::PacketLoss, "ping", "1.1.1.1"));
        assert_eq!(g.group_id.len(), 8);
        assert!(g.group_id.chars().all(|c| c.is_ascii_hexdigit()));
    }
}
