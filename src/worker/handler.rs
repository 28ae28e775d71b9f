//! # Task Handlers
//!
//! The contract between a worker pool and the code that actually performs a
//! unit of work. A handler receives the delivered envelope and returns either
//! a result payload plus any follow-up tasks, or a [`HandlerError`] whose
//! category drives the retry decision.

use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

use async_trait::async_trait;
use serde_json::Value;
use thiserror::Error;

use super::error_classifier::ErrorCategory;
use crate::messaging::{TaskEnvelope, TaskKind};

/// Follow-up work emitted by a successful handler
#[derive(Debug, Clone, PartialEq)]
pub struct DerivedTask {
    pub task_kind: TaskKind,
    pub payload: Value,
}

/// Successful handler result
#[derive(Debug, Clone, PartialEq)]
pub struct HandlerOutcome {
    /// Reported to the coordinating service as the success payload
    pub result: Value,
    /// Published into the same correlation chain before the success report
    pub derived: Vec<DerivedTask>,
}

impl HandlerOutcome {
    pub fn completed(result: Value) -> Self {
        Self {
            result,
            derived: Vec::new(),
        }
    }

    pub fn with_derived(mut self, task_kind: TaskKind, payload: Value) -> Self {
        self.derived.push(DerivedTask { task_kind, payload });
        self
    }
}

/// Handler failure, partitioned by retry eligibility
#[derive(Debug, Clone, Error)]
pub enum HandlerError {
    #[error("{category} failure: {message}")]
    Transient {
        message: String,
        category: ErrorCategory,
    },

    #[error("Permanent failure: {message}")]
    Permanent { message: String, error_info: Value },

    #[error("Handler timed out after {timeout_ms}ms")]
    Timeout { timeout_ms: u64 },

    #[error("Invalid payload: {message}")]
    Validation { message: String },

    #[error("Handler misconfigured: {message}")]
    Configuration { message: String },
}

impl HandlerError {
    pub fn transient(message: impl Into<String>) -> Self {
        Self::Transient {
            message: message.into(),
            category: ErrorCategory::Transient,
        }
    }

    pub fn network(message: impl Into<String>) -> Self {
        Self::Transient {
            message: message.into(),
            category: ErrorCategory::Network,
        }
    }

    pub fn rate_limited(message: impl Into<String>) -> Self {
        Self::Transient {
            message: message.into(),
            category: ErrorCategory::RateLimit,
        }
    }

    /// Permanent failure whose error info is `{"reason": reason}`
    pub fn permanent(reason: impl Into<String>) -> Self {
        let reason = reason.into();
        Self::Permanent {
            error_info: serde_json::json!({ "reason": reason }),
            message: reason,
        }
    }

    pub fn permanent_with_info(message: impl Into<String>, error_info: Value) -> Self {
        Self::Permanent {
            message: message.into(),
            error_info,
        }
    }

    pub fn validation(message: impl Into<String>) -> Self {
        Self::Validation {
            message: message.into(),
        }
    }

    pub fn configuration(message: impl Into<String>) -> Self {
        Self::Configuration {
            message: message.into(),
        }
    }

    pub fn category(&self) -> ErrorCategory {
        match self {
            Self::Transient { category, .. } => *category,
            Self::Permanent { .. } => ErrorCategory::Permanent,
            Self::Timeout { .. } => ErrorCategory::Timeout,
            Self::Validation { .. } => ErrorCategory::Validation,
            Self::Configuration { .. } => ErrorCategory::Configuration,
        }
    }

    pub fn is_retryable(&self) -> bool {
        self.category().is_retryable()
    }
}

impl From<serde_json::Error> for HandlerError {
    fn from(err: serde_json::Error) -> Self {
        Self::validation(err.to_string())
    }
}

/// Work performed for one task kind
#[async_trait]
pub trait TaskHandler: Send + Sync + 'static {
    fn task_kind(&self) -> TaskKind;

    async fn handle(&self, envelope: &TaskEnvelope) -> Result<HandlerOutcome, HandlerError>;

    /// Runs once the derived envelopes of a successful outcome are published,
    /// before the success report. Bounded by the handler timeout; failures are
    /// the handler's to log.
    async fn after_publish(&self, envelope: &TaskEnvelope, result: &Value) {
        let _ = (envelope, result);
    }

    fn name(&self) -> &'static str {
        self.task_kind().as_str()
    }
}

#[derive(Debug, Error)]
pub enum RegistryError {
    #[error("A handler for task kind '{task_kind}' is already registered")]
    DuplicateHandler { task_kind: TaskKind },
}

/// One handler per task kind
#[derive(Default, Clone)]
pub struct HandlerRegistry {
    handlers: HashMap<TaskKind, Arc<dyn TaskHandler>>,
}

impl HandlerRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register<H: TaskHandler>(&mut self, handler: H) -> Result<(), RegistryError> {
        self.register_arc(Arc::new(handler))
    }

    pub fn register_arc(&mut self, handler: Arc<dyn TaskHandler>) -> Result<(), RegistryError> {
        let task_kind = handler.task_kind();
        if self.handlers.contains_key(&task_kind) {
            return Err(RegistryError::DuplicateHandler { task_kind });
        }
        self.handlers.insert(task_kind, handler);
        Ok(())
    }

    pub fn get(&self, task_kind: TaskKind) -> Option<Arc<dyn TaskHandler>> {
        self.handlers.get(&task_kind).cloned()
    }

    pub fn contains(&self, task_kind: TaskKind) -> bool {
        self.handlers.contains_key(&task_kind)
    }

    /// Registered kinds in declaration order
    pub fn task_kinds(&self) -> Vec<TaskKind> {
        TaskKind::ALL
            .iter()
            .copied()
            .filter(|kind| self.handlers.contains_key(kind))
            .collect()
    }

    pub fn len(&self) -> usize {
        self.handlers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.handlers.is_empty()
    }
}

impl fmt::Debug for HandlerRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("HandlerRegistry")
            .field("task_kinds", &self.task_kinds())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    struct Echo(TaskKind);

    #[async_trait]
    impl TaskHandler for Echo {
        fn task_kind(&self) -> TaskKind {
            self.0
        }

        async fn handle(&self, envelope: &TaskEnvelope) -> Result<HandlerOutcome, HandlerError> {
            Ok(HandlerOutcome::completed(envelope.payload().clone()))
        }
    }

    #[test]
    fn test_duplicate_registration_is_rejected() {
        let mut registry = HandlerRegistry::new();
        registry.register(Echo(TaskKind::Classify)).unwrap();
        registry.register(Echo(TaskKind::FileServe)).unwrap();

        let err = registry.register(Echo(TaskKind::Classify)).unwrap_err();
        assert!(matches!(
            err,
            RegistryError::DuplicateHandler {
                task_kind: TaskKind::Classify
            }
        ));
        assert_eq!(
            registry.task_kinds(),
            vec![TaskKind::Classify, TaskKind::FileServe]
        );
    }

    #[test]
    fn test_error_categories() {
        assert_eq!(HandlerError::transient("x").category(), ErrorCategory::Transient);
        assert_eq!(HandlerError::network("x").category(), ErrorCategory::Network);
        assert_eq!(HandlerError::rate_limited("x").category(), ErrorCategory::RateLimit);
        assert_eq!(
            HandlerError::Timeout { timeout_ms: 5 }.category(),
            ErrorCategory::Timeout
        );
        assert!(HandlerError::transient("x").is_retryable());
        assert!(!HandlerError::permanent("low_confidence").is_retryable());
        assert!(!HandlerError::validation("bad").is_retryable());
    }

    #[test]
    fn test_permanent_reason_becomes_error_info() {
        match HandlerError::permanent("low_confidence") {
            HandlerError::Permanent { error_info, .. } => {
                assert_eq!(error_info, json!({ "reason": "low_confidence" }));
            }
            other => panic!("unexpected {other:?}"),
        }
    }

    #[test]
    fn test_outcome_builder() {
        let outcome = HandlerOutcome::completed(json!({ "ok": true }))
            .with_derived(TaskKind::ReplyGenerate, json!({ "a": 1 }));
        assert_eq!(outcome.derived.len(), 1);
        assert_eq!(outcome.derived[0].task_kind, TaskKind::ReplyGenerate);
    }
}
