//! # Broker Provider Enum
//!
//! Enum dispatch for broker providers, avoiding trait object overhead.

use std::time::Duration;

use async_trait::async_trait;

use super::providers::{InMemoryBroker, PgBroker};
use super::traits::Broker;
use super::types::{AckHandle, Delivery, MessageId, QueueHealthReport, QueueStats};
use crate::config::{BrokerConfig, BrokerKind};
use crate::messaging::envelope::TaskEnvelope;
use crate::messaging::errors::MessagingError;
use crate::messaging::router::QueueName;

/// Provider enum for static dispatch
///
/// # Variants
///
/// - `InMemory` - process-local queues
/// - `Postgres` - table-backed queues shared across processes
#[derive(Debug)]
pub enum BrokerProvider {
    InMemory(InMemoryBroker),
    Postgres(PgBroker),
}

impl BrokerProvider {
    /// Build the provider selected by configuration
    pub async fn from_config(config: &BrokerConfig) -> Result<Self, MessagingError> {
        match config.provider {
            BrokerKind::InMemory => Ok(Self::InMemory(InMemoryBroker::new())),
            BrokerKind::Postgres => {
                let url = config.database_url.as_deref().ok_or_else(|| {
                    MessagingError::database_connection("postgres broker requires database_url")
                })?;
                let broker = PgBroker::connect(url, config.max_connections).await?;
                Ok(Self::Postgres(broker))
            }
        }
    }

    pub fn in_memory() -> Self {
        Self::InMemory(InMemoryBroker::new())
    }

    /// Access the in-memory provider (for tests and introspection)
    pub fn as_in_memory(&self) -> Option<&InMemoryBroker> {
        match self {
            Self::InMemory(broker) => Some(broker),
            Self::Postgres(_) => None,
        }
    }

    pub fn as_postgres(&self) -> Option<&PgBroker> {
        match self {
            Self::Postgres(broker) => Some(broker),
            Self::InMemory(_) => None,
        }
    }
}

#[async_trait]
impl Broker for BrokerProvider {
    async fn ensure_queue(&self, queue: &QueueName) -> Result<(), MessagingError> {
        match self {
            Self::InMemory(b) => b.ensure_queue(queue).await,
            Self::Postgres(b) => b.ensure_queue(queue).await,
        }
    }

    async fn ensure_queues(&self, queues: &[QueueName]) -> Result<(), MessagingError> {
        match self {
            Self::InMemory(b) => b.ensure_queues(queues).await,
            Self::Postgres(b) => b.ensure_queues(queues).await,
        }
    }

    async fn verify_queues(
        &self,
        queues: &[QueueName],
    ) -> Result<QueueHealthReport, MessagingError> {
        match self {
            Self::InMemory(b) => b.verify_queues(queues).await,
            Self::Postgres(b) => b.verify_queues(queues).await,
        }
    }

    async fn publish(
        &self,
        queue: &QueueName,
        envelope: &TaskEnvelope,
    ) -> Result<MessageId, MessagingError> {
        match self {
            Self::InMemory(b) => b.publish(queue, envelope).await,
            Self::Postgres(b) => b.publish(queue, envelope).await,
        }
    }

    async fn receive(
        &self,
        queue: &QueueName,
        visibility_timeout: Duration,
    ) -> Result<Option<Delivery>, MessagingError> {
        match self {
            Self::InMemory(b) => b.receive(queue, visibility_timeout).await,
            Self::Postgres(b) => b.receive(queue, visibility_timeout).await,
        }
    }

    async fn ack(&self, handle: &AckHandle) -> Result<(), MessagingError> {
        match self {
            Self::InMemory(b) => b.ack(handle).await,
            Self::Postgres(b) => b.ack(handle).await,
        }
    }

    async fn nack(
        &self,
        handle: &AckHandle,
        redeliver_after: Duration,
    ) -> Result<(), MessagingError> {
        match self {
            Self::InMemory(b) => b.nack(handle, redeliver_after).await,
            Self::Postgres(b) => b.nack(handle, redeliver_after).await,
        }
    }

    async fn queue_stats(&self, queue: &QueueName) -> Result<QueueStats, MessagingError> {
        match self {
            Self::InMemory(b) => b.queue_stats(queue).await,
            Self::Postgres(b) => b.queue_stats(queue).await,
        }
    }

    async fn health_check(&self) -> Result<bool, MessagingError> {
        match self {
            Self::InMemory(b) => b.health_check().await,
            Self::Postgres(b) => b.health_check().await,
        }
    }

    async fn wait_for_message(&self, queue: &QueueName, max_wait: Duration) {
        match self {
            Self::InMemory(b) => b.wait_for_message(queue, max_wait).await,
            Self::Postgres(b) => b.wait_for_message(queue, max_wait).await,
        }
    }

    fn provider_name(&self) -> &'static str {
        match self {
            Self::InMemory(b) => b.provider_name(),
            Self::Postgres(b) => b.provider_name(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_in_memory_from_config() {
        let provider = BrokerProvider::from_config(&BrokerConfig::default())
            .await
            .unwrap();
        assert_eq!(provider.provider_name(), "in_memory");
        assert!(provider.as_in_memory().is_some());
        assert!(provider.health_check().await.unwrap());
    }

    #[tokio::test]
    async fn test_postgres_requires_url() {
        let config = BrokerConfig {
            provider: BrokerKind::Postgres,
            database_url: None,
            ..BrokerConfig::default()
        };
        let err = BrokerProvider::from_config(&config).await.unwrap_err();
        assert!(matches!(err, MessagingError::DatabaseConnection { .. }));
    }
}
