//! # Broker Service Types
//!
//! Provider-agnostic types exchanged with a [`Broker`](super::Broker).

use std::time::Duration;

use chrono::{DateTime, Utc};

use crate::messaging::envelope::TaskEnvelope;
use crate::messaging::router::QueueName;

/// Unique identifier for a queued message
///
/// The format is provider-specific:
/// - Postgres: `msg_id` BIGSERIAL as string
/// - InMemory: per-queue sequence number as string
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct MessageId(pub String);

impl MessageId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Parse the id as an integer (both shipped providers use numeric ids)
    pub fn as_i64(&self) -> Option<i64> {
        self.0.parse().ok()
    }
}

impl std::fmt::Display for MessageId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<i64> for MessageId {
    fn from(id: i64) -> Self {
        Self(id.to_string())
    }
}

impl From<u64> for MessageId {
    fn from(id: u64) -> Self {
        Self(id.to_string())
    }
}

impl From<&str> for MessageId {
    fn from(id: &str) -> Self {
        Self(id.to_string())
    }
}

/// Handle for acknowledging one specific delivery of a message
///
/// The handle is bound to the delivery that produced it: once the message has
/// been redelivered to another consumer, or removed, the handle is stale and
/// every ack/nack through it fails with `MessageNotFound`.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct AckHandle {
    pub queue: QueueName,
    pub message_id: MessageId,
    /// Receive count at the time of this delivery
    pub delivery_tag: u32,
}

impl AckHandle {
    pub fn new(queue: QueueName, message_id: MessageId, delivery_tag: u32) -> Self {
        Self {
            queue,
            message_id,
            delivery_tag,
        }
    }
}

/// An envelope received from a queue together with its ack handle
#[derive(Debug, Clone)]
pub struct Delivery {
    /// The envelope, with `attempt_count` stamped from the broker's receive count
    pub envelope: TaskEnvelope,
    pub handle: AckHandle,
    /// When the message was originally enqueued on the broker
    pub enqueued_at: DateTime<Utc>,
}

impl Delivery {
    pub fn new(envelope: TaskEnvelope, handle: AckHandle, enqueued_at: DateTime<Utc>) -> Self {
        let envelope = envelope.with_attempt_count(handle.delivery_tag);
        Self {
            envelope,
            handle,
            enqueued_at,
        }
    }

    /// 1-based delivery attempt
    pub fn attempt(&self) -> u32 {
        self.handle.delivery_tag
    }
}

/// Queue statistics for monitoring
#[derive(Debug, Clone, PartialEq)]
pub struct QueueStats {
    pub queue_name: String,

    /// Total number of messages in the queue (visible + invisible)
    pub message_count: u64,

    /// Number of messages currently received and not yet acked or visible again
    pub in_flight_count: u64,

    /// Age of the oldest message in the queue
    pub oldest_message_age: Option<Duration>,
}

impl QueueStats {
    pub fn new(queue_name: impl Into<String>, message_count: u64) -> Self {
        Self {
            queue_name: queue_name.into(),
            message_count,
            in_flight_count: 0,
            oldest_message_age: None,
        }
    }

    pub fn with_in_flight_count(mut self, count: u64) -> Self {
        self.in_flight_count = count;
        self
    }

    pub fn with_oldest_message_age(mut self, age: Duration) -> Self {
        self.oldest_message_age = Some(age);
        self
    }

    /// Messages that a consumer could receive right now
    pub fn visible_count(&self) -> u64 {
        self.message_count.saturating_sub(self.in_flight_count)
    }
}

/// Health check result for queue verification
#[derive(Debug, Clone, Default)]
pub struct QueueHealthReport {
    /// Queues that exist and are accessible
    pub healthy: Vec<String>,

    /// Queues that don't exist
    pub missing: Vec<String>,

    /// Queues that exist but had errors during verification
    pub errors: Vec<(String, String)>,
}

impl QueueHealthReport {
    pub fn new() -> Self {
        Self::default()
    }

    /// Check if all queues are healthy (none missing or errored)
    pub fn is_healthy(&self) -> bool {
        self.missing.is_empty() && self.errors.is_empty()
    }

    pub fn add_healthy(&mut self, queue_name: impl Into<String>) {
        self.healthy.push(queue_name.into());
    }

    pub fn add_missing(&mut self, queue_name: impl Into<String>) {
        self.missing.push(queue_name.into());
    }

    pub fn add_error(&mut self, queue_name: impl Into<String>, error: impl Into<String>) {
        self.errors.push((queue_name.into(), error.into()));
    }
}
