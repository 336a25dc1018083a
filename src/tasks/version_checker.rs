//! Version checker task: compare the running version against the latest tag.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use serde::Deserialize;
use tracing::{debug, info};

use crate::config::{Settings, VERSION};
use crate::stats::{StatsRepository, VisualAlertKind};
use crate::tasks::PeriodicTask;

const TAGS_URL: &str = "https://api.github.com/repos/meshlg/pinger/tags";

#[derive(Debug, Deserialize)]
struct Tag {
    name: String,
}

pub struct VersionCheckerTask {
    settings: Arc<Settings>,
    stats: Arc<StatsRepository>,
    http: reqwest::Client,
    announced: bool,
}

impl VersionCheckerTask {
    pub fn new(settings: Arc<Settings>, stats: Arc<StatsRepository>, http: reqwest::Client) -> Self {
        Self {
            settings,
            stats,
            http,
            announced: false,
        }
    }

    async fn fetch_latest(&self) -> anyhow::Result<Option<String>> {
        let tags: Vec<Tag> = self
            .http
            .get(TAGS_URL)
            .header("User-Agent", format!("pinger/{VERSION}"))
            .timeout(Duration::from_secs(5))
            .send()
            .await?
            .json()
            .await?;

        Ok(tags
            .first()
            .map(|t| t.name.trim_start_matches('v').to_string())
            .filter(|v| !v.is_empty()))
    }
}

#[async_trait]
impl PeriodicTask for VersionCheckerTask {
    fn name(&self) -> &'static str {
        "VersionChecker"
    }

    fn interval(&self) -> Duration {
        Duration::from_secs(self.settings.version_check.check_interval_secs)
    }

    fn enabled(&self) -> bool {
        self.settings.version_check.enabled
    }

    async fn execute(&mut self) -> anyhow::Result<()> {
        if self.announced {
            return Ok(());
        }

        let Some(latest) = self.fetch_latest().await? else {
            debug!("no version tags published");
            return Ok(());
        };

        if is_newer(&latest, VERSION) {
            info!(current = VERSION, latest, "update available");
            self.stats.add_alert(
                format!("[i] Update available: {VERSION} -> {latest}"),
                VisualAlertKind::Info,
            );
            self.announced = true;
        }

        Ok(())
    }
}

/// Numeric component comparison: `1.10.0` beats `1.9.9`.
pub fn is_newer(latest: &str, current: &str) -> bool {
    let parse = |v: &str| -> Vec<u64> {
        v.split('.')
            .map(|part| part.trim().parse().unwrap_or(0))
            .collect()
    };

    let mut latest_parts = parse(latest);
    let mut current_parts = parse(current);
    let len = latest_parts.len().max(current_parts.len());
    latest_parts.resize(len, 0);
    current_parts.resize(len, 0);

    latest_parts > current_parts
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn version_comparison() {
        assert!(is_newer("2.2.0", "2.1.5"));
        assert!(is_newer("3.0", "2.9.9"));
        assert!(is_newer("2.1.5.1", "2.1.5"));
        assert!(!is_newer("2.1.5", "2.1.5"));
        assert!(!is_newer("2.0.9", "2.1.0"));
        assert!(!is_newer("garbage", "2.1.5"));
    }
}
