//! Tracing initialization with a file sink.

use std::fs::OpenOptions;
use std::path::PathBuf;
use std::sync::Arc;

use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

use crate::config::LogSettings;

const LOG_FILE_NAME: &str = "ping_monitor.log";

fn resolve_log_dir(settings: &LogSettings) -> PathBuf {
    if let Some(dir) = &settings.dir {
        return PathBuf::from(dir);
    }
    let home = std::env::var("HOME").unwrap_or_else(|_| ".".into());
    PathBuf::from(home).join(".pinger")
}

/// Initialize tracing: env-filtered, writing to the daemon log file.
///
/// Returns the log file path for display.
pub fn init_tracing(settings: &LogSettings) -> anyhow::Result<PathBuf> {
    let dir = resolve_log_dir(settings);
    std::fs::create_dir_all(&dir)?;
    let path = dir.join(LOG_FILE_NAME);

    let file = OpenOptions::new()
        .create(true)
        .write(true)
        .truncate(settings.truncate_on_start)
        .append(!settings.truncate_on_start)
        .open(&path)?;

    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(format!("pinger={}", settings.level)));

    tracing_subscriber::registry()
        .with(filter)
        .with(
            tracing_subscriber::fmt::layer()
                .with_writer(Arc::new(file))
                .with_ansi(false),
        )
        .init();

    Ok(path)
}
