//! # Broker Trait
//!
//! Core trait definition for provider-agnostic queue operations.

use std::time::Duration;

use async_trait::async_trait;

use super::types::{AckHandle, Delivery, MessageId, QueueHealthReport, QueueStats};
use crate::messaging::envelope::TaskEnvelope;
use crate::messaging::errors::MessagingError;
use crate::messaging::router::QueueName;

/// Durable, named FIFO queues with at-least-once delivery
///
/// Implementations provide:
///
/// - Queue creation (idempotent)
/// - Publish / receive with visibility timeout
/// - Acknowledgment (`ack`) and delayed redelivery (`nack`)
/// - Queue statistics for monitoring
///
/// A received message that is neither acked nor nacked before its visibility
/// timeout expires becomes visible again. Acking or nacking through a stale
/// [`AckHandle`] fails with [`MessagingError::MessageNotFound`] and never
/// resurrects a message. Duplicate suppression is left to consumers.
#[async_trait]
pub trait Broker: Send + Sync + 'static {
    /// Create a queue if it doesn't exist (idempotent)
    async fn ensure_queue(&self, queue: &QueueName) -> Result<(), MessagingError>;

    /// Bulk queue creation (called during bootstrap)
    async fn ensure_queues(&self, queues: &[QueueName]) -> Result<(), MessagingError> {
        for queue in queues {
            self.ensure_queue(queue).await?;
        }
        Ok(())
    }

    /// Verify expected queues exist
    async fn verify_queues(
        &self,
        queues: &[QueueName],
    ) -> Result<QueueHealthReport, MessagingError>;

    /// Durably append an envelope to a queue
    async fn publish(
        &self,
        queue: &QueueName,
        envelope: &TaskEnvelope,
    ) -> Result<MessageId, MessagingError>;

    /// Receive the oldest visible message, hiding it for `visibility_timeout`
    async fn receive(
        &self,
        queue: &QueueName,
        visibility_timeout: Duration,
    ) -> Result<Option<Delivery>, MessagingError>;

    /// Remove a message permanently
    async fn ack(&self, handle: &AckHandle) -> Result<(), MessagingError>;

    /// Return a message to the queue, visible again after `redeliver_after`
    async fn nack(&self, handle: &AckHandle, redeliver_after: Duration)
        -> Result<(), MessagingError>;

    async fn queue_stats(&self, queue: &QueueName) -> Result<QueueStats, MessagingError>;

    /// Verify the backend is reachable
    async fn health_check(&self) -> Result<bool, MessagingError>;

    /// Suspend until a message may be available on `queue`, at most `max_wait`
    ///
    /// Spurious wake-ups are allowed; callers always follow with `receive`.
    async fn wait_for_message(&self, queue: &QueueName, max_wait: Duration) {
        let _ = queue;
        tokio::time::sleep(max_wait).await;
    }

    /// Provider name for logging
    fn provider_name(&self) -> &'static str;
}
