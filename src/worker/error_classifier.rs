//! # Handler Failure Classification
//!
//! Decides what a worker pool does with a failed delivery: redeliver it after
//! a backoff delay, or record a terminal failure with the coordinating service.
//!
//! ```text
//! ┌─────────────────┐     ┌─────────────────┐     ┌──────────────────────┐
//! │ HandlerError    │────▶│ ErrorClassifier │────▶│ Retry { delay }      │
//! │ + ErrorContext  │     │ Strategy        │     │ ReportFailure { .. } │
//! └─────────────────┘     └─────────────────┘     └──────────────────────┘
//! ```
//!
//! Retryable categories are retried until `max_attempts` is reached, after
//! which the failure becomes permanent and carries the last error and the
//! attempt count.

use std::fmt;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use serde_json::{json, Value};

use super::backoff::BackoffPolicy;
use super::handler::HandlerError;
use crate::messaging::{CorrelationId, TaskKind};

/// Context information for error classification
#[derive(Debug, Clone)]
pub struct ErrorContext {
    pub envelope_id: uuid::Uuid,
    pub correlation_id: CorrelationId,
    pub task_kind: TaskKind,

    /// Current attempt number (1-based)
    pub attempt_number: u32,

    /// Maximum allowed attempts
    pub max_attempts: u32,

    /// How long the handler ran before failing
    pub execution_duration: Duration,
}

/// Primary error categories for classification
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorCategory {
    /// Temporary downstream failure
    Transient,

    /// Connection-level failure
    Network,

    /// Downstream throttling
    RateLimit,

    /// Handler exceeded its time budget
    Timeout,

    /// Will never succeed if retried
    Permanent,

    /// Malformed input
    Validation,

    /// Missing or invalid configuration
    Configuration,
}

impl ErrorCategory {
    pub fn is_retryable(self) -> bool {
        matches!(
            self,
            Self::Transient | Self::Network | Self::RateLimit | Self::Timeout
        )
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Self::Transient => "transient",
            Self::Network => "network",
            Self::RateLimit => "rate_limit",
            Self::Timeout => "timeout",
            Self::Permanent => "permanent",
            Self::Validation => "validation",
            Self::Configuration => "configuration",
        }
    }
}

impl fmt::Display for ErrorCategory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// What the pool does with the delivery
#[derive(Debug, Clone, PartialEq)]
pub enum FailureDisposition {
    /// Nack and let the broker redeliver after `delay`
    Retry { delay: Duration },

    /// Report a terminal failure, then ack
    ReportFailure { error_info: Value },
}

/// Result of error classification
#[derive(Debug, Clone, PartialEq)]
pub struct ErrorClassification {
    pub category: ErrorCategory,
    pub disposition: FailureDisposition,

    /// Stable code for log searches, e.g. `COURIER_RATE_LIMIT`
    pub error_code: String,
    pub error_message: String,

    /// Whether no further attempt will be made
    pub is_final_attempt: bool,
}

impl ErrorClassification {
    pub fn is_retry(&self) -> bool {
        matches!(self.disposition, FailureDisposition::Retry { .. })
    }

    pub fn retry_delay(&self) -> Option<Duration> {
        match self.disposition {
            FailureDisposition::Retry { delay } => Some(delay),
            FailureDisposition::ReportFailure { .. } => None,
        }
    }
}

/// Strategy for classifying handler failures
pub trait ErrorClassifier: Send + Sync {
    fn classify_error(&self, error: &HandlerError, context: &ErrorContext) -> ErrorClassification;

    fn classifier_name(&self) -> &'static str;
}

/// Default classifier: category decides retryability, backoff decides delay
#[derive(Debug, Clone, Default)]
pub struct StandardErrorClassifier {
    backoff: BackoffPolicy,
}

impl StandardErrorClassifier {
    pub fn new(backoff: BackoffPolicy) -> Self {
        Self { backoff }
    }

    pub fn backoff(&self) -> &BackoffPolicy {
        &self.backoff
    }

    fn terminal_error_info(error: &HandlerError, category: ErrorCategory) -> Value {
        match error {
            HandlerError::Permanent { error_info, .. } => error_info.clone(),
            HandlerError::Validation { message } => json!({
                "reason": "validation_failed",
                "message": message,
            }),
            HandlerError::Configuration { message } => json!({
                "reason": "configuration_error",
                "message": message,
            }),
            other => json!({
                "reason": category.as_str(),
                "message": other.to_string(),
            }),
        }
    }
}

impl ErrorClassifier for StandardErrorClassifier {
    fn classify_error(&self, error: &HandlerError, context: &ErrorContext) -> ErrorClassification {
        let category = error.category();
        let error_message = error.to_string();
        let error_code = format!("COURIER_{}", category.as_str().to_uppercase());
        let attempts_exhausted = context.attempt_number >= context.max_attempts;

        let (disposition, is_final_attempt) = if !category.is_retryable() {
            (
                FailureDisposition::ReportFailure {
                    error_info: Self::terminal_error_info(error, category),
                },
                true,
            )
        } else if attempts_exhausted {
            (
                FailureDisposition::ReportFailure {
                    error_info: json!({
                        "reason": "retries_exhausted",
                        "attempts": context.attempt_number,
                        "category": category.as_str(),
                        "last_error": error_message,
                    }),
                },
                true,
            )
        } else {
            (
                FailureDisposition::Retry {
                    delay: self.backoff.delay_for_attempt(context.attempt_number),
                },
                false,
            )
        };

        ErrorClassification {
            category,
            disposition,
            error_code,
            error_message,
            is_final_attempt,
        }
    }

    fn classifier_name(&self) -> &'static str {
        "standard"
    }
}
