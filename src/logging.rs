use serde::{Deserialize, Serialize};
use tracing::{debug, error, info, warn};

/// Severity of a log line buffered by orchestration logic.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum LogLevel {
    Debug,
    Info,
    Warn,
    Error,
}

/// Forward the lines an orchestration buffered during one turn to `tracing`.
pub(crate) fn flush(instance: &str, logs: Vec<(LogLevel, String)>) {
    for (level, message) in logs {
        match level {
            LogLevel::Debug => debug!(target: "roomflow::orchestration", instance, "{message}"),
            LogLevel::Info => info!(target: "roomflow::orchestration", instance, "{message}"),
            LogLevel::Warn => warn!(target: "roomflow::orchestration", instance, "{message}"),
            LogLevel::Error => error!(target: "roomflow::orchestration", instance, "{message}"),
        }
    }
}

/// Install a fmt subscriber honoring `RUST_LOG`. Safe to call more than once.
pub fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .with_target(false)
        .try_init();
}
