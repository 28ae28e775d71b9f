//! # Envelope Publisher
//!
//! The only producer-side entry point to the broker. Ingestion sources, the
//! periodic scheduler and worker pools all publish through it, which keeps
//! every envelope on the queue the routing table assigns to its kind.

use std::sync::Arc;

use tracing::debug;

use super::envelope::{CorrelationId, DedupKey, TaskEnvelope, TaskKind};
use super::errors::MessagingError;
use super::router::{QueueName, QueueRouter};
use super::service::{Broker, BrokerProvider, MessageId};

/// Result of a successful publish
#[derive(Debug, Clone, PartialEq)]
pub struct PublishReceipt {
    pub envelope_id: uuid::Uuid,
    pub correlation_id: CorrelationId,
    pub task_kind: TaskKind,
    pub dedup_key: DedupKey,
    pub queue: QueueName,
    pub message_id: MessageId,
}

#[derive(Debug, Clone)]
pub struct EnvelopePublisher {
    broker: Arc<BrokerProvider>,
    router: QueueRouter,
}

impl EnvelopePublisher {
    pub fn new(broker: Arc<BrokerProvider>, router: QueueRouter) -> Self {
        Self { broker, router }
    }

    pub fn router(&self) -> &QueueRouter {
        &self.router
    }

    pub fn broker(&self) -> &Arc<BrokerProvider> {
        &self.broker
    }

    /// Publish an already-routed envelope after re-checking its queue
    pub async fn publish(&self, envelope: &TaskEnvelope) -> Result<PublishReceipt, MessagingError> {
        self.router.validate(envelope)?;
        let message_id = self.broker.publish(envelope.target_queue(), envelope).await?;

        debug!(
            correlation_id = %envelope.correlation_id(),
            task_kind = %envelope.task_kind(),
            queue = %envelope.target_queue(),
            message_id = %message_id,
            "Envelope published"
        );

        Ok(PublishReceipt {
            envelope_id: envelope.envelope_id(),
            correlation_id: envelope.correlation_id(),
            task_kind: envelope.task_kind(),
            dedup_key: envelope.dedup_key(),
            queue: envelope.target_queue().clone(),
            message_id,
        })
    }

    /// Start a new correlation chain
    pub async fn publish_root(
        &self,
        task_kind: TaskKind,
        payload: serde_json::Value,
    ) -> Result<PublishReceipt, MessagingError> {
        let envelope = self.router.route(task_kind, payload, None);
        self.publish(&envelope).await
    }

    /// Publish into an existing chain identified only by its correlation id
    pub async fn publish_correlated(
        &self,
        task_kind: TaskKind,
        payload: serde_json::Value,
        correlation_id: CorrelationId,
    ) -> Result<PublishReceipt, MessagingError> {
        let envelope = self.router.route(task_kind, payload, Some(correlation_id));
        self.publish(&envelope).await
    }

    /// Publish a follow-up task of `parent`
    pub async fn publish_derived(
        &self,
        parent: &TaskEnvelope,
        task_kind: TaskKind,
        payload: serde_json::Value,
    ) -> Result<PublishReceipt, MessagingError> {
        let envelope = self.router.derive(parent, task_kind, payload);
        self.publish(&envelope).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::messaging::router::RoutingTable;
    use serde_json::json;

    async fn publisher() -> EnvelopePublisher {
        let router = QueueRouter::default();
        let broker = Arc::new(BrokerProvider::in_memory());
        broker.ensure_queues(&router.queue_names()).await.unwrap();
        EnvelopePublisher::new(broker, router)
    }

    #[tokio::test]
    async fn test_publish_root_lands_on_routed_queue() {
        let publisher = publisher().await;
        let receipt = publisher
            .publish_root(TaskKind::SlackDispatch, json!({"text": "hello"}))
            .await
            .unwrap();

        assert_eq!(receipt.queue.as_str(), "slack_queue");
        let in_memory = publisher.broker().as_in_memory().unwrap();
        assert_eq!(in_memory.queue_length(&receipt.queue), 1);
    }

    #[tokio::test]
    async fn test_publish_derived_keeps_correlation() {
        let publisher = publisher().await;
        let parent = publisher
            .router()
            .route(TaskKind::EmailPoll, json!({}), None);

        let receipt = publisher
            .publish_derived(&parent, TaskKind::Classify, json!({"message_id": "m-1"}))
            .await
            .unwrap();
        assert_eq!(receipt.correlation_id, parent.correlation_id());

        let stored = publisher
            .broker()
            .as_in_memory()
            .unwrap()
            .peek_all(&receipt.queue);
        assert_eq!(stored[0].parent_envelope_id(), Some(parent.envelope_id()));
    }

    #[tokio::test]
    async fn test_publish_rejects_foreign_routing() {
        let publisher = publisher().await;
        let foreign = QueueRouter::new(RoutingTable::new(Some("other")));
        let envelope = foreign.route(TaskKind::Classify, json!({}), None);

        let err = publisher.publish(&envelope).await.unwrap_err();
        assert!(matches!(err, MessagingError::RoutingMismatch { .. }));
    }
}
