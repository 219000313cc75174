use std::sync::Arc;
use std::time::Duration;

use tracing::{debug, warn};

use super::registry::ActivityHandler;
use crate::ActivityError;

/// Bounded exponential backoff.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    /// Total attempts including the first (1 = no retries).
    pub max_attempts: u32,
    /// Delay before the first retry.
    pub base_delay: Duration,
    /// Upper bound for any single delay.
    pub max_delay: Duration,
}

impl RetryPolicy {
    pub fn new(max_attempts: u32, base_delay: Duration, max_delay: Duration) -> Self {
        Self {
            max_attempts: max_attempts.max(1),
            base_delay,
            max_delay,
        }
    }

    /// Delay before retry number `retry` (1-indexed): `base * 2^(retry-1)`, capped.
    pub fn delay_for_retry(&self, retry: u32) -> Duration {
        let multiplier = 2u32.saturating_pow(retry.saturating_sub(1));
        self.base_delay.saturating_mul(multiplier).min(self.max_delay)
    }
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self::new(3, Duration::from_millis(500), Duration::from_secs(30))
    }
}

/// Per-activity execution policy.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ActivityOptions {
    /// Deadline for a single attempt. Exceeding it counts as a transient failure.
    pub timeout: Duration,
    pub retry: RetryPolicy,
}

impl ActivityOptions {
    pub fn new(timeout: Duration, retry: RetryPolicy) -> Self {
        Self { timeout, retry }
    }
}

impl Default for ActivityOptions {
    fn default() -> Self {
        Self::new(Duration::from_secs(60), RetryPolicy::default())
    }
}

/// Run an activity under its options. Transient failures and timeouts are
/// retried until the attempt budget is spent; other categories return at once.
pub(crate) async fn execute_with_retry(
    instance: &str,
    activity: &str,
    handler: Arc<dyn ActivityHandler>,
    input: String,
    options: &ActivityOptions,
) -> Result<String, ActivityError> {
    let mut attempt: u32 = 1;
    loop {
        let outcome = match tokio::time::timeout(options.timeout, handler.invoke(input.clone())).await {
            Ok(result) => result,
            Err(_) => Err(ActivityError::transient(
                "TIMEOUT",
                format!("attempt exceeded {}ms", options.timeout.as_millis()),
            )),
        };
        match outcome {
            Ok(result) => {
                debug!(instance, activity, attempt, "activity succeeded");
                return Ok(result);
            }
            Err(err) if err.is_retryable() && attempt < options.retry.max_attempts => {
                let mut delay = options.retry.delay_for_retry(attempt);
                if let Some(hint) = err.retry_after_ms {
                    delay = delay.max(Duration::from_millis(hint)).min(options.retry.max_delay);
                }
                warn!(
                    instance,
                    activity,
                    attempt,
                    code = %err.code,
                    delay_ms = delay.as_millis() as u64,
                    "transient activity failure; retrying"
                );
                tokio::time::sleep(delay).await;
                attempt += 1;
            }
            Err(err) => {
                warn!(instance, activity, attempt, code = %err.code, category = ?err.category, "activity failed");
                return Err(err.with_attempts(attempt));
            }
        }
    }
}
