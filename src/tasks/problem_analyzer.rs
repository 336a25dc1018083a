//! Problem analyzer task.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::Utc;

use crate::analysis::problem::ProblemAnalyzer;
use crate::config::Settings;
use crate::stats::StatsRepository;
use crate::tasks::PeriodicTask;

pub struct ProblemAnalyzerTask {
    settings: Arc<Settings>,
    stats: Arc<StatsRepository>,
    analyzer: ProblemAnalyzer,
}

impl ProblemAnalyzerTask {
    pub fn new(settings: Arc<Settings>, stats: Arc<StatsRepository>) -> Self {
        let analyzer = ProblemAnalyzer::new(settings.problem.clone());
        Self {
            settings,
            stats,
            analyzer,
        }
    }
}

#[async_trait]
impl PeriodicTask for ProblemAnalyzerTask {
    fn name(&self) -> &'static str {
        "ProblemAnalyzer"
    }

    fn interval(&self) -> Duration {
        Duration::from_secs(self.settings.problem.analysis_interval_secs)
    }

    fn enabled(&self) -> bool {
        self.settings.problem.enabled
    }

    async fn execute(&mut self) -> anyhow::Result<()> {
        let snapshot = self.stats.get_snapshot();
        let problem_type = self.analyzer.analyze_current(&snapshot);
        let prediction = self.analyzer.predict(Utc::now());
        let pattern = self.analyzer.identify_pattern();
        self.stats
            .update_problem_analysis(problem_type, prediction, pattern);
        Ok(())
    }
}
