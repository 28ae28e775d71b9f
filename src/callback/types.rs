use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::messaging::{CorrelationId, DedupKey, TaskEnvelope, TaskKind};

/// Terminal status carried by a report
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CallbackStatus {
    Success,
    Failure,
}

/// Identity of the unit of work a report is about
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ReportSubject {
    pub correlation_id: CorrelationId,
    pub task_kind: TaskKind,
    pub dedup_key: DedupKey,
}

impl ReportSubject {
    pub fn from_envelope(envelope: &TaskEnvelope) -> Self {
        Self {
            correlation_id: envelope.correlation_id(),
            task_kind: envelope.task_kind(),
            dedup_key: envelope.dedup_key(),
        }
    }
}

/// Body POSTed to the intake endpoint
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CallbackReport {
    pub correlation_id: CorrelationId,
    pub task_kind: TaskKind,
    pub status: CallbackStatus,
    pub payload: Value,
    pub idempotency_key: DedupKey,
    pub reported_at: DateTime<Utc>,
}

impl CallbackReport {
    pub fn new(subject: &ReportSubject, status: CallbackStatus, payload: Value) -> Self {
        Self {
            correlation_id: subject.correlation_id,
            task_kind: subject.task_kind,
            status,
            payload,
            idempotency_key: subject.dedup_key,
            reported_at: Utc::now(),
        }
    }
}

/// What happened to a report
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReportOutcome {
    Delivered,
    /// Already delivered or currently being delivered
    Duplicate,
    /// Given up after exhausting retries or a rejection; logged at error level
    Dropped,
}
