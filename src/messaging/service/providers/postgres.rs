//! # PostgreSQL Broker
//!
//! Table-backed queues on PostgreSQL. Every queue shares one message table;
//! dequeue claims the oldest visible row with `FOR UPDATE SKIP LOCKED`, so any
//! number of consumers (across processes) can read a queue concurrently
//! without receiving the same delivery twice.
//!
//! A row whose envelope no longer decodes is moved to `courier_dead_letters`
//! on receipt instead of cycling through its visibility timeout forever.

use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::postgres::PgPoolOptions;
use sqlx::types::Json;
use sqlx::{PgPool, Row};
use tracing::{debug, info};

use crate::logging::log_error;
use crate::messaging::envelope::TaskEnvelope;
use crate::messaging::errors::MessagingError;
use crate::messaging::router::QueueName;
use crate::messaging::service::traits::Broker;
use crate::messaging::service::types::{
    AckHandle, Delivery, MessageId, QueueHealthReport, QueueStats,
};

const SCHEMA_STATEMENTS: [&str; 4] = [
    "CREATE TABLE IF NOT EXISTS courier_queues (
        queue_name TEXT PRIMARY KEY,
        created_at TIMESTAMPTZ NOT NULL DEFAULT now()
    )",
    "CREATE TABLE IF NOT EXISTS courier_queue_messages (
        msg_id BIGSERIAL PRIMARY KEY,
        queue_name TEXT NOT NULL REFERENCES courier_queues (queue_name),
        envelope JSONB NOT NULL,
        enqueued_at TIMESTAMPTZ NOT NULL DEFAULT now(),
        visible_at TIMESTAMPTZ NOT NULL DEFAULT now(),
        read_ct INTEGER NOT NULL DEFAULT 0
    )",
    "CREATE INDEX IF NOT EXISTS courier_queue_messages_ready_idx
        ON courier_queue_messages (queue_name, visible_at, msg_id)",
    "CREATE TABLE IF NOT EXISTS courier_dead_letters (
        msg_id BIGINT PRIMARY KEY,
        queue_name TEXT NOT NULL,
        envelope JSONB NOT NULL,
        reason TEXT NOT NULL,
        dead_lettered_at TIMESTAMPTZ NOT NULL DEFAULT now()
    )",
];

/// PostgreSQL-backed broker
#[derive(Debug, Clone)]
pub struct PgBroker {
    pool: PgPool,
}

impl PgBroker {
    /// Connect and create the queue schema if it does not exist yet
    pub async fn connect(database_url: &str, max_connections: u32) -> Result<Self, MessagingError> {
        let pool = PgPoolOptions::new()
            .max_connections(max_connections)
            .acquire_timeout(Duration::from_secs(10))
            .connect(database_url)
            .await
            .map_err(|e| MessagingError::database_connection(e.to_string()))?;

        let broker = Self::from_pool(pool);
        broker.ensure_schema().await?;
        info!("PostgreSQL broker connected");
        Ok(broker)
    }

    /// Wrap an existing pool; the caller is responsible for `ensure_schema`
    pub fn from_pool(pool: PgPool) -> Self {
        Self { pool }
    }

    pub fn pool(&self) -> &PgPool {
        &self.pool
    }

    pub async fn ensure_schema(&self) -> Result<(), MessagingError> {
        for statement in SCHEMA_STATEMENTS {
            sqlx::query(statement).execute(&self.pool).await?;
        }
        debug!("Broker schema ready");
        Ok(())
    }

    /// Rows moved aside because their envelope could not be decoded
    pub async fn dead_letter_count(&self, queue: &QueueName) -> Result<u64, MessagingError> {
        let count: i64 =
            sqlx::query_scalar("SELECT count(*) FROM courier_dead_letters WHERE queue_name = $1")
                .bind(queue.as_str())
                .fetch_one(&self.pool)
                .await?;
        Ok(count.max(0) as u64)
    }

    async fn dead_letter(
        &self,
        queue: &QueueName,
        msg_id: i64,
        read_ct: i32,
        reason: &str,
    ) -> Result<(), MessagingError> {
        sqlx::query(
            "WITH moved AS (
                 DELETE FROM courier_queue_messages
                 WHERE msg_id = $1 AND read_ct = $2
                 RETURNING msg_id, queue_name, envelope
             )
             INSERT INTO courier_dead_letters (msg_id, queue_name, envelope, reason)
             SELECT msg_id, queue_name, envelope, $3 FROM moved
             ON CONFLICT (msg_id) DO NOTHING",
        )
        .bind(msg_id)
        .bind(read_ct)
        .bind(reason)
        .execute(&self.pool)
        .await
        .map_err(|e| MessagingError::queue_operation(queue.as_str(), "dead_letter", e.to_string()))?;

        log_error(
            "pg_broker",
            "receive",
            reason,
            Some(&format!("queue={queue} msg_id={msg_id} moved to courier_dead_letters")),
        );
        Ok(())
    }

    fn handle_id(handle: &AckHandle) -> Result<i64, MessagingError> {
        handle.message_id.as_i64().ok_or_else(|| {
            MessagingError::message_not_found(handle.queue.as_str(), handle.message_id.as_str())
        })
    }
}

#[async_trait]
impl Broker for PgBroker {
    async fn ensure_queue(&self, queue: &QueueName) -> Result<(), MessagingError> {
        sqlx::query("INSERT INTO courier_queues (queue_name) VALUES ($1) ON CONFLICT DO NOTHING")
            .bind(queue.as_str())
            .execute(&self.pool)
            .await
            .map_err(|e| MessagingError::queue_operation(queue.as_str(), "ensure_queue", e.to_string()))?;
        Ok(())
    }

    async fn verify_queues(
        &self,
        queues: &[QueueName],
    ) -> Result<QueueHealthReport, MessagingError> {
        let names: Vec<String> = queues.iter().map(|q| q.as_str().to_string()).collect();
        let existing: Vec<String> = sqlx::query_scalar(
            "SELECT queue_name FROM courier_queues WHERE queue_name = ANY($1)",
        )
        .bind(&names)
        .fetch_all(&self.pool)
        .await?;

        let mut report = QueueHealthReport::new();
        for name in names {
            if existing.contains(&name) {
                report.add_healthy(name);
            } else {
                report.add_missing(name);
            }
        }
        Ok(report)
    }

    async fn publish(
        &self,
        queue: &QueueName,
        envelope: &TaskEnvelope,
    ) -> Result<MessageId, MessagingError> {
        let msg_id: Option<i64> = sqlx::query_scalar(
            "INSERT INTO courier_queue_messages (queue_name, envelope)
             SELECT $1, $2 WHERE EXISTS (SELECT 1 FROM courier_queues WHERE queue_name = $1)
             RETURNING msg_id",
        )
        .bind(queue.as_str())
        .bind(Json(envelope))
        .fetch_optional(&self.pool)
        .await
        .map_err(|e| MessagingError::queue_operation(queue.as_str(), "publish", e.to_string()))?;

        msg_id
            .map(MessageId::from)
            .ok_or_else(|| MessagingError::queue_not_found(queue.as_str()))
    }

    async fn receive(
        &self,
        queue: &QueueName,
        visibility_timeout: Duration,
    ) -> Result<Option<Delivery>, MessagingError> {
        loop {
            let row = sqlx::query(
                "UPDATE courier_queue_messages
                 SET visible_at = now() + make_interval(secs => $2), read_ct = read_ct + 1
                 WHERE msg_id = (
                     SELECT msg_id FROM courier_queue_messages
                     WHERE queue_name = $1 AND visible_at <= now()
                     ORDER BY msg_id
                     LIMIT 1
                     FOR UPDATE SKIP LOCKED
                 )
                 RETURNING msg_id, envelope, enqueued_at, read_ct",
            )
            .bind(queue.as_str())
            .bind(visibility_timeout.as_secs_f64())
            .fetch_optional(&self.pool)
            .await
            .map_err(|e| MessagingError::queue_operation(queue.as_str(), "receive", e.to_string()))?;

            let Some(row) = row else {
                return Ok(None);
            };

            let msg_id: i64 = row.try_get("msg_id")?;
            let read_ct: i32 = row.try_get("read_ct")?;
            let Json(raw): Json<serde_json::Value> = row
                .try_get("envelope")
                .map_err(|e| MessagingError::deserialization(e.to_string()))?;

            let envelope = match serde_json::from_value::<TaskEnvelope>(raw) {
                Ok(envelope) => envelope,
                Err(e) => {
                    self.dead_letter(queue, msg_id, read_ct, &format!("undecodable envelope: {e}"))
                        .await?;
                    continue;
                }
            };
            let enqueued_at: DateTime<Utc> = row.try_get("enqueued_at")?;

            let handle = AckHandle::new(
                queue.clone(),
                MessageId::from(msg_id),
                u32::try_from(read_ct).unwrap_or(u32::MAX),
            );
            return Ok(Some(Delivery::new(envelope, handle, enqueued_at)));
        }
    }

    async fn ack(&self, handle: &AckHandle) -> Result<(), MessagingError> {
        let result = sqlx::query(
            "DELETE FROM courier_queue_messages
             WHERE msg_id = $1 AND queue_name = $2 AND read_ct = $3",
        )
        .bind(Self::handle_id(handle)?)
        .bind(handle.queue.as_str())
        .bind(handle.delivery_tag as i32)
        .execute(&self.pool)
        .await?;

        if result.rows_affected() == 0 {
            return Err(MessagingError::message_not_found(
                handle.queue.as_str(),
                handle.message_id.as_str(),
            ));
        }
        Ok(())
    }

    async fn nack(
        &self,
        handle: &AckHandle,
        redeliver_after: Duration,
    ) -> Result<(), MessagingError> {
        let result = sqlx::query(
            "UPDATE courier_queue_messages
             SET visible_at = now() + make_interval(secs => $4)
             WHERE msg_id = $1 AND queue_name = $2 AND read_ct = $3",
        )
        .bind(Self::handle_id(handle)?)
        .bind(handle.queue.as_str())
        .bind(handle.delivery_tag as i32)
        .bind(redeliver_after.as_secs_f64())
        .execute(&self.pool)
        .await?;

        if result.rows_affected() == 0 {
            return Err(MessagingError::message_not_found(
                handle.queue.as_str(),
                handle.message_id.as_str(),
            ));
        }
        Ok(())
    }

    async fn queue_stats(&self, queue: &QueueName) -> Result<QueueStats, MessagingError> {
        let exists: bool = sqlx::query_scalar(
            "SELECT EXISTS (SELECT 1 FROM courier_queues WHERE queue_name = $1)",
        )
        .bind(queue.as_str())
        .fetch_one(&self.pool)
        .await?;
        if !exists {
            return Err(MessagingError::queue_not_found(queue.as_str()));
        }

        let row = sqlx::query(
            "SELECT count(*) AS message_count,
                    count(*) FILTER (WHERE visible_at > now()) AS in_flight_count,
                    min(enqueued_at) AS oldest
             FROM courier_queue_messages WHERE queue_name = $1",
        )
        .bind(queue.as_str())
        .fetch_one(&self.pool)
        .await?;

        let message_count: i64 = row.try_get("message_count")?;
        let in_flight_count: i64 = row.try_get("in_flight_count")?;
        let oldest: Option<DateTime<Utc>> = row.try_get("oldest")?;

        let mut stats = QueueStats::new(queue.as_str(), message_count.max(0) as u64)
            .with_in_flight_count(in_flight_count.max(0) as u64);
        if let Some(age) = oldest.and_then(|at| (Utc::now() - at).to_std().ok()) {
            stats = stats.with_oldest_message_age(age);
        }
        Ok(stats)
    }

    async fn health_check(&self) -> Result<bool, MessagingError> {
        let one: i32 = sqlx::query_scalar("SELECT 1").fetch_one(&self.pool).await?;
        Ok(one == 1)
    }

    fn provider_name(&self) -> &'static str {
        "postgres"
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::messaging::envelope::TaskKind;
    use crate::messaging::router::QueueRouter;
    use serde_json::json;

    /// Broker plus a fresh queue, or `None` when no database is configured
    async fn setup() -> Option<(PgBroker, QueueName)> {
        let Ok(database_url) = std::env::var("DATABASE_URL") else {
            println!("Skipping PostgreSQL broker test - no DATABASE_URL provided");
            return None;
        };
        let broker = PgBroker::connect(&database_url, 2)
            .await
            .expect("DATABASE_URL points at a reachable database");
        let queue = QueueName::new(format!("test_{}", uuid::Uuid::new_v4().simple()));
        broker.ensure_queue(&queue).await.unwrap();
        Some((broker, queue))
    }

    fn envelope() -> TaskEnvelope {
        QueueRouter::default().route(TaskKind::Classify, json!({ "text": "hello" }), None)
    }

    const VISIBLE_AGAIN: Duration = Duration::ZERO;

    #[tokio::test]
    async fn test_publish_receive_ack() {
        let Some((broker, queue)) = setup().await else {
            return;
        };
        let sent = envelope();
        broker.publish(&queue, &sent).await.unwrap();

        let delivery = broker
            .receive(&queue, Duration::from_secs(30))
            .await
            .unwrap()
            .expect("message is visible");
        assert_eq!(delivery.envelope.envelope_id(), sent.envelope_id());
        assert_eq!(delivery.attempt(), 1);

        // Invisible while in flight
        assert!(broker.receive(&queue, Duration::from_secs(30)).await.unwrap().is_none());

        broker.ack(&delivery.handle).await.unwrap();
        assert_eq!(broker.queue_stats(&queue).await.unwrap().message_count, 0);
    }

    #[tokio::test]
    async fn test_stale_handle_is_rejected() {
        let Some((broker, queue)) = setup().await else {
            return;
        };
        broker.publish(&queue, &envelope()).await.unwrap();

        let first = broker.receive(&queue, VISIBLE_AGAIN).await.unwrap().unwrap();
        let second = broker.receive(&queue, VISIBLE_AGAIN).await.unwrap().unwrap();
        assert_eq!(second.attempt(), 2);

        let err = broker.nack(&first.handle, VISIBLE_AGAIN).await.unwrap_err();
        assert!(matches!(err, MessagingError::MessageNotFound { .. }));
        let err = broker.ack(&first.handle).await.unwrap_err();
        assert!(matches!(err, MessagingError::MessageNotFound { .. }));

        broker.ack(&second.handle).await.unwrap();
    }

    #[tokio::test]
    async fn test_ack_after_nacks_never_redelivers() {
        let Some((broker, queue)) = setup().await else {
            return;
        };
        broker.publish(&queue, &envelope()).await.unwrap();

        let mut stale = Vec::new();
        for attempt in 1..=3 {
            let delivery = broker.receive(&queue, Duration::from_secs(30)).await.unwrap().unwrap();
            assert_eq!(delivery.attempt(), attempt);
            if attempt < 3 {
                broker.nack(&delivery.handle, VISIBLE_AGAIN).await.unwrap();
                stale.push(delivery.handle);
            } else {
                broker.ack(&delivery.handle).await.unwrap();
            }
        }

        for handle in &stale {
            assert!(broker.nack(handle, VISIBLE_AGAIN).await.is_err());
        }
        assert!(broker.receive(&queue, VISIBLE_AGAIN).await.unwrap().is_none());
        assert_eq!(broker.queue_stats(&queue).await.unwrap().message_count, 0);
    }

    #[tokio::test]
    async fn test_undecodable_row_is_dead_lettered() {
        let Some((broker, queue)) = setup().await else {
            return;
        };
        sqlx::query("INSERT INTO courier_queue_messages (queue_name, envelope) VALUES ($1, $2)")
            .bind(queue.as_str())
            .bind(Json(json!({ "bogus": true })))
            .execute(broker.pool())
            .await
            .unwrap();
        let valid = envelope();
        broker.publish(&queue, &valid).await.unwrap();

        let delivery = broker
            .receive(&queue, Duration::from_secs(30))
            .await
            .unwrap()
            .expect("valid message behind the malformed one");
        assert_eq!(delivery.envelope.envelope_id(), valid.envelope_id());
        assert_eq!(broker.dead_letter_count(&queue).await.unwrap(), 1);

        broker.ack(&delivery.handle).await.unwrap();
        assert!(broker.receive(&queue, VISIBLE_AGAIN).await.unwrap().is_none());
    }
}
