use std::time::Duration;

use super::{OrchestrationStatus, Runtime};
use crate::{Event, RuntimeError};

/// Derive the coarse status of an instance from its history.
pub fn status_from_history(history: &[Event]) -> OrchestrationStatus {
    if history.is_empty() {
        return OrchestrationStatus::NotFound;
    }
    for e in history.iter().rev() {
        match e {
            Event::OrchestrationCompleted { output } => return OrchestrationStatus::Completed { output: output.clone() },
            Event::OrchestrationFailed { error } => return OrchestrationStatus::Failed { error: error.clone() },
            _ => {}
        }
    }
    OrchestrationStatus::Running
}

impl Runtime {
    pub async fn get_orchestration_status(&self, instance: &str) -> OrchestrationStatus {
        status_from_history(&self.history_store.read(instance).await)
    }

    /// Wait until the orchestration reaches a terminal state (Completed/Failed) or the timeout elapses.
    pub async fn wait_for_orchestration(
        &self,
        instance: &str,
        timeout: Duration,
    ) -> Result<OrchestrationStatus, RuntimeError> {
        let deadline = tokio::time::Instant::now() + timeout;
        let mut delay_ms: u64 = 5;
        loop {
            match self.get_orchestration_status(instance).await {
                status @ (OrchestrationStatus::Completed { .. } | OrchestrationStatus::Failed { .. }) => {
                    return Ok(status);
                }
                _ if tokio::time::Instant::now() >= deadline => {
                    return Err(RuntimeError::Timeout(instance.to_string()));
                }
                _ => {
                    tokio::time::sleep(Duration::from_millis(delay_ms)).await;
                    delay_ms = delay_ms.saturating_mul(2).min(100);
                }
            }
        }
    }
}
