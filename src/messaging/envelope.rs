//! # Task Envelope
//!
//! The unit of dispatched work. An envelope carries the task kind, a
//! kind-specific JSON payload, and the correlation identity that links every
//! derived task back to the event that started the chain.
//!
//! Envelopes are only constructed through [`QueueRouter`](super::router::QueueRouter),
//! which is what keeps `target_queue` consistent with `task_kind`.

use chrono::{DateTime, Utc};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use uuid::Uuid;

use super::errors::MessagingError;
use super::router::QueueName;

/// Closed set of task kinds handled by the dispatch core
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TaskKind {
    /// Poll the mailbox for unread messages
    EmailPoll,
    /// Ingest one chat-platform message
    SlackDispatch,
    /// Classify the intent of an inbound message
    Classify,
    /// Execute a version-control or issue-tracker action
    GitJiraExecute,
    /// Generate and deliver a conversational reply
    ReplyGenerate,
    /// Generate and deliver a reply summarizing a git/jira action
    ReplyGitJiraGenerate,
    /// Publish a preview of artifacts produced by a git action
    FileServe,
}

impl TaskKind {
    /// Every task kind, in routing-table order
    pub const ALL: [TaskKind; 7] = [
        TaskKind::EmailPoll,
        TaskKind::SlackDispatch,
        TaskKind::Classify,
        TaskKind::GitJiraExecute,
        TaskKind::ReplyGenerate,
        TaskKind::ReplyGitJiraGenerate,
        TaskKind::FileServe,
    ];

    /// Position of this kind in [`TaskKind::ALL`]
    pub fn index(self) -> usize {
        match self {
            Self::EmailPoll => 0,
            Self::SlackDispatch => 1,
            Self::Classify => 2,
            Self::GitJiraExecute => 3,
            Self::ReplyGenerate => 4,
            Self::ReplyGitJiraGenerate => 5,
            Self::FileServe => 6,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Self::EmailPoll => "email_poll",
            Self::SlackDispatch => "slack_dispatch",
            Self::Classify => "classify",
            Self::GitJiraExecute => "git_jira_execute",
            Self::ReplyGenerate => "reply_generate",
            Self::ReplyGitJiraGenerate => "reply_git_jira_generate",
            Self::FileServe => "file_serve",
        }
    }

    /// Whether envelopes of this kind are produced by ingestion rather than derived
    pub fn is_ingestion(self) -> bool {
        matches!(self, Self::EmailPoll | Self::SlackDispatch)
    }
}

impl fmt::Display for TaskKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl FromStr for TaskKind {
    type Err = MessagingError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        TaskKind::ALL
            .into_iter()
            .find(|kind| kind.as_str() == s)
            .ok_or_else(|| MessagingError::unknown_task_kind(s))
    }
}

/// Opaque identifier linking an origin event to every task derived from it
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct CorrelationId(Uuid);

impl CorrelationId {
    /// Fresh correlation id for a root event
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }

    pub fn from_uuid(uuid: Uuid) -> Self {
        Self(uuid)
    }

    pub fn as_uuid(&self) -> &Uuid {
        &self.0
    }
}

impl Default for CorrelationId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for CorrelationId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl FromStr for CorrelationId {
    type Err = uuid::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Uuid::parse_str(s).map(Self)
    }
}

/// Duplicate-suppression key for one unit of work within a correlation chain
///
/// UUIDv5 in the correlation id's namespace over `"{task_kind}:{payload}"`.
/// `serde_json::Value` objects serialize with sorted keys, so equal payloads
/// always produce equal keys.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct DedupKey(Uuid);

impl DedupKey {
    pub fn compute(
        correlation_id: &CorrelationId,
        task_kind: TaskKind,
        payload: &serde_json::Value,
    ) -> Self {
        let name = format!("{}:{}", task_kind.as_str(), payload);
        Self(Uuid::new_v5(correlation_id.as_uuid(), name.as_bytes()))
    }

    pub fn as_uuid(&self) -> &Uuid {
        &self.0
    }
}

impl fmt::Display for DedupKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Unit of dispatched work
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TaskEnvelope {
    envelope_id: Uuid,
    task_kind: TaskKind,
    payload: serde_json::Value,
    correlation_id: CorrelationId,
    parent_envelope_id: Option<Uuid>,
    attempt_count: u32,
    enqueued_at: DateTime<Utc>,
    target_queue: QueueName,
}

impl TaskEnvelope {
    pub(crate) fn new(
        task_kind: TaskKind,
        payload: serde_json::Value,
        correlation_id: CorrelationId,
        parent_envelope_id: Option<Uuid>,
        target_queue: QueueName,
    ) -> Self {
        Self {
            envelope_id: Uuid::new_v4(),
            task_kind,
            payload,
            correlation_id,
            parent_envelope_id,
            attempt_count: 0,
            enqueued_at: Utc::now(),
            target_queue,
        }
    }

    pub fn envelope_id(&self) -> Uuid {
        self.envelope_id
    }

    pub fn task_kind(&self) -> TaskKind {
        self.task_kind
    }

    pub fn payload(&self) -> &serde_json::Value {
        &self.payload
    }

    pub fn correlation_id(&self) -> CorrelationId {
        self.correlation_id
    }

    pub fn parent_envelope_id(&self) -> Option<Uuid> {
        self.parent_envelope_id
    }

    /// 1-based delivery count, 0 until the broker first delivers the envelope
    pub fn attempt_count(&self) -> u32 {
        self.attempt_count
    }

    pub fn enqueued_at(&self) -> DateTime<Utc> {
        self.enqueued_at
    }

    pub fn target_queue(&self) -> &QueueName {
        &self.target_queue
    }

    /// Root envelopes start a correlation chain
    pub fn is_root(&self) -> bool {
        self.parent_envelope_id.is_none()
    }

    pub fn dedup_key(&self) -> DedupKey {
        DedupKey::compute(&self.correlation_id, self.task_kind, &self.payload)
    }

    /// Decode the payload into the handler's typed representation
    pub fn decode_payload<T: DeserializeOwned>(&self) -> Result<T, serde_json::Error> {
        serde_json::from_value(self.payload.clone())
    }

    /// Stamp the broker's delivery count onto the envelope
    pub(crate) fn with_attempt_count(mut self, attempt_count: u32) -> Self {
        self.attempt_count = attempt_count;
        self
    }

    pub fn to_bytes(&self) -> Result<Vec<u8>, MessagingError> {
        serde_json::to_vec(self).map_err(|e| MessagingError::serialization(e.to_string()))
    }

    pub fn from_bytes(bytes: &[u8]) -> Result<Self, MessagingError> {
        serde_json::from_slice(bytes).map_err(|e| MessagingError::deserialization(e.to_string()))
    }
}
