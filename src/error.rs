//! Error types shared by the runtime, providers and activity adapters.

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Errors surfaced by the runtime's client-facing operations.
#[derive(Debug, Error)]
pub enum RuntimeError {
    #[error("instance '{0}' already exists and has not finished")]
    AlreadyExists(String),

    #[error("instance '{0}' not found")]
    NotFound(String),

    #[error("orchestration '{0}' is not registered")]
    UnknownOrchestration(String),

    #[error("invalid instance id '{0}': use ASCII letters, digits, '-' or '_'")]
    InvalidInstanceId(String),

    #[error("history store error: {0}")]
    Store(String),

    #[error("codec error: {0}")]
    Codec(String),

    #[error("timed out waiting for instance '{0}'")]
    Timeout(String),
}

/// How the runtime should treat a failed activity attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum ErrorCategory {
    /// Network blips, rate limits, timeouts. Retried per the activity policy.
    Transient,
    /// Definitive failure. Never retried automatically.
    Terminal,
    /// The request itself was unusable. Never retried; callers may discard it.
    InvalidInput,
}

/// Structured failure reported by an activity adapter.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Error)]
#[serde(rename_all = "camelCase")]
#[error("[{code}] {message}")]
pub struct ActivityError {
    pub code: String,
    pub message: String,
    pub category: ErrorCategory,
    /// Server-provided hint for the next attempt, if any.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub retry_after_ms: Option<u64>,
    /// Attempts made before the error was reported back to the orchestration.
    #[serde(default)]
    pub attempts: u32,
}

impl ActivityError {
    fn with_category(category: ErrorCategory, code: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            code: code.into(),
            message: message.into(),
            category,
            retry_after_ms: None,
            attempts: 0,
        }
    }

    pub fn transient(code: impl Into<String>, message: impl Into<String>) -> Self {
        Self::with_category(ErrorCategory::Transient, code, message)
    }

    pub fn terminal(code: impl Into<String>, message: impl Into<String>) -> Self {
        Self::with_category(ErrorCategory::Terminal, code, message)
    }

    pub fn invalid_input(code: impl Into<String>, message: impl Into<String>) -> Self {
        Self::with_category(ErrorCategory::InvalidInput, code, message)
    }

    pub fn with_retry_after(mut self, ms: u64) -> Self {
        self.retry_after_ms = Some(ms);
        self
    }

    pub(crate) fn with_attempts(mut self, attempts: u32) -> Self {
        self.attempts = attempts;
        self
    }

    /// Whether a retry (automatic or user-requested) can succeed.
    pub fn is_retryable(&self) -> bool {
        self.category == ErrorCategory::Transient
    }
}
