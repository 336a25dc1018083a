//! Smart alert pipeline: entities, deduplication, grouping, prioritization,
//! adaptive thresholds, and the coordinating manager.

pub mod adaptive;
pub mod dedup;
pub mod grouper;
pub mod manager;
pub mod prioritizer;
pub mod types;

pub use adaptive::{AdaptiveThresholds, Metric};
pub use manager::{AlertAction, SmartAlertManager};
pub use types::{AlertContext, AlertEntity, AlertGroup, AlertHistory, AlertPriority, AlertType};
