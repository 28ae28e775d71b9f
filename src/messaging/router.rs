//! # Queue Router
//!
//! Static task-kind to queue routing. The routing table is built once at
//! startup, is total over [`TaskKind::ALL`], maps each kind to exactly one
//! queue, and is never mutated afterwards. Because no two kinds share a queue,
//! a backlog in one business function cannot block another.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::Arc;
use uuid::Uuid;

use super::envelope::{CorrelationId, TaskEnvelope, TaskKind};
use super::errors::MessagingError;
use crate::config::QueuesConfig;
use crate::constants::queues;

/// Name of a durable broker queue
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct QueueName(String);

impl QueueName {
    pub fn new(name: impl Into<String>) -> Self {
        Self(name.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for QueueName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl AsRef<str> for QueueName {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

/// Base queue name for a task kind, before any deployment prefix
pub fn base_queue_name(kind: TaskKind) -> &'static str {
    match kind {
        TaskKind::EmailPoll => queues::EMAIL,
        TaskKind::SlackDispatch => queues::SLACK,
        TaskKind::Classify => queues::INTENT_CLASSIFIER,
        TaskKind::GitJiraExecute => queues::GIT_JIRA,
        TaskKind::ReplyGenerate => queues::REPLY,
        TaskKind::ReplyGitJiraGenerate => queues::REPLY_GIT_JIRA,
        TaskKind::FileServe => queues::FILE_SERVER,
    }
}

/// Immutable kind -> queue table
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RoutingTable {
    queues: [QueueName; 7],
}

impl RoutingTable {
    /// Build the table, optionally namespacing every queue as `{prefix}_{name}`
    pub fn new(prefix: Option<&str>) -> Self {
        let queues = TaskKind::ALL.map(|kind| {
            let base = base_queue_name(kind);
            match prefix {
                Some(prefix) if !prefix.is_empty() => QueueName::new(format!("{prefix}_{base}")),
                _ => QueueName::new(base),
            }
        });
        Self { queues }
    }

    pub fn queue_for(&self, kind: TaskKind) -> &QueueName {
        &self.queues[kind.index()]
    }

    pub fn kind_for_queue(&self, queue: &QueueName) -> Option<TaskKind> {
        TaskKind::ALL
            .into_iter()
            .find(|kind| self.queue_for(*kind) == queue)
    }
}

impl Default for RoutingTable {
    fn default() -> Self {
        Self::new(None)
    }
}

/// Resolves target queues and constructs envelopes
///
/// Cheap to clone; all clones share one routing table.
#[derive(Debug, Clone, Default)]
pub struct QueueRouter {
    table: Arc<RoutingTable>,
}

impl QueueRouter {
    pub fn new(table: RoutingTable) -> Self {
        Self {
            table: Arc::new(table),
        }
    }

    /// Create a router from queue configuration
    pub fn from_config(config: &QueuesConfig) -> Self {
        Self::new(RoutingTable::new(config.prefix.as_deref()))
    }

    pub fn table(&self) -> &RoutingTable {
        &self.table
    }

    pub fn queue_for(&self, kind: TaskKind) -> &QueueName {
        self.table.queue_for(kind)
    }

    pub fn kind_for_queue(&self, queue: &QueueName) -> Option<TaskKind> {
        self.table.kind_for_queue(queue)
    }

    /// All (kind, queue) pairs in routing-table order
    pub fn queues(&self) -> impl Iterator<Item = (TaskKind, &QueueName)> + '_ {
        TaskKind::ALL
            .into_iter()
            .map(move |kind| (kind, self.table.queue_for(kind)))
    }

    pub fn queue_names(&self) -> Vec<QueueName> {
        self.queues().map(|(_, queue)| queue.clone()).collect()
    }

    /// Construct an envelope for `task_kind`
    ///
    /// Without a correlation id the envelope is a root event and gets a fresh
    /// one; with one, the id is propagated unchanged.
    pub fn route(
        &self,
        task_kind: TaskKind,
        payload: serde_json::Value,
        correlation_id: Option<CorrelationId>,
    ) -> TaskEnvelope {
        TaskEnvelope::new(
            task_kind,
            payload,
            correlation_id.unwrap_or_default(),
            None,
            self.queue_for(task_kind).clone(),
        )
    }

    /// Construct a follow-up envelope in the parent's correlation chain
    pub fn derive(
        &self,
        parent: &TaskEnvelope,
        task_kind: TaskKind,
        payload: serde_json::Value,
    ) -> TaskEnvelope {
        let parent_id: Uuid = parent.envelope_id();
        TaskEnvelope::new(
            task_kind,
            payload,
            parent.correlation_id(),
            Some(parent_id),
            self.queue_for(task_kind).clone(),
        )
    }

    /// String entry point for ingestion sources
    pub fn route_named(
        &self,
        task_kind: &str,
        payload: serde_json::Value,
        correlation_id: Option<CorrelationId>,
    ) -> Result<TaskEnvelope, MessagingError> {
        let kind = task_kind.parse::<TaskKind>()?;
        Ok(self.route(kind, payload, correlation_id))
    }

    /// Reject an envelope whose queue disagrees with the routing table
    pub fn validate(&self, envelope: &TaskEnvelope) -> Result<(), MessagingError> {
        let expected = self.queue_for(envelope.task_kind());
        if expected == envelope.target_queue() {
            Ok(())
        } else {
            Err(MessagingError::RoutingMismatch {
                task_kind: envelope.task_kind().to_string(),
                expected: expected.to_string(),
                actual: envelope.target_queue().to_string(),
            })
        }
    }
}
