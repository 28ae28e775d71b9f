//! # In-Memory Broker
//!
//! Thread-safe in-memory queue implementation for testing and single-process
//! deployments.
//!
//! ## Features
//!
//! - **Visibility Timeout**: messages become invisible after receive and visible
//!   again after the timeout. Deadlines use `tokio::time::Instant`, so tests
//!   running with paused time observe redelivery deterministically.
//! - **Wake-ups**: each queue owns a `Notify` signalled on publish and nack.

use std::collections::{HashMap, VecDeque};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use tokio::sync::Notify;
use tokio::time::Instant;
use tracing::trace;

use crate::messaging::envelope::TaskEnvelope;
use crate::messaging::errors::MessagingError;
use crate::messaging::router::QueueName;
use crate::messaging::service::traits::Broker;
use crate::messaging::service::types::{
    AckHandle, Delivery, MessageId, QueueHealthReport, QueueStats,
};

/// In-memory message with visibility tracking
#[derive(Debug, Clone)]
struct InMemoryQueuedMessage {
    id: u64,
    envelope: TaskEnvelope,
    enqueued_at: DateTime<Utc>,
    /// When the message becomes visible again (None = visible now)
    visible_at: Option<Instant>,
    /// Number of times this message has been received
    receive_count: u32,
}

impl InMemoryQueuedMessage {
    fn is_visible(&self, now: Instant) -> bool {
        self.visible_at.map(|at| at <= now).unwrap_or(true)
    }
}

#[derive(Debug)]
struct InMemoryQueue {
    /// Messages in FIFO order
    messages: VecDeque<InMemoryQueuedMessage>,
    next_id: u64,
    notify: Arc<Notify>,
    total_sent: u64,
    total_received: u64,
    total_acked: u64,
    total_nacked: u64,
}

impl InMemoryQueue {
    fn new() -> Self {
        Self {
            messages: VecDeque::new(),
            next_id: 1,
            notify: Arc::new(Notify::new()),
            total_sent: 0,
            total_received: 0,
            total_acked: 0,
            total_nacked: 0,
        }
    }

    /// Position of the message a handle refers to, if the handle is still current
    fn position(&self, handle: &AckHandle) -> Option<usize> {
        let id = handle.message_id.as_i64()?;
        self.messages
            .iter()
            .position(|m| m.id as i64 == id && m.receive_count == handle.delivery_tag)
    }
}

/// Counters kept per in-memory queue
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct InMemoryQueueCounters {
    pub sent: u64,
    pub received: u64,
    pub acked: u64,
    pub nacked: u64,
}

/// In-memory broker
///
/// Messages are stored in a `VecDeque` per queue with visibility timeout
/// simulation.
///
/// ```rust
/// use courier_core::messaging::service::{Broker, InMemoryBroker};
/// use courier_core::messaging::{QueueRouter, TaskKind};
/// use std::time::Duration;
///
/// # tokio_test::block_on(async {
/// let broker = InMemoryBroker::new();
/// let router = QueueRouter::default();
/// let envelope = router.route(TaskKind::EmailPoll, serde_json::json!({}), None);
///
/// broker.ensure_queue(envelope.target_queue()).await?;
/// broker.publish(envelope.target_queue(), &envelope).await?;
///
/// let delivery = broker
///     .receive(envelope.target_queue(), Duration::from_secs(30))
///     .await?
///     .expect("message is visible");
/// broker.ack(&delivery.handle).await?;
/// # Ok::<(), Box<dyn std::error::Error>>(())
/// # }).unwrap();
/// ```
#[derive(Debug, Default)]
pub struct InMemoryBroker {
    queues: Mutex<HashMap<QueueName, InMemoryQueue>>,
}

impl InMemoryBroker {
    pub fn new() -> Self {
        Self::default()
    }

    /// Create with pre-initialized queues
    pub fn with_queues(queues: &[QueueName]) -> Self {
        let broker = Self::new();
        {
            let mut guard = broker.queues.lock();
            for queue in queues {
                guard.insert(queue.clone(), InMemoryQueue::new());
            }
        }
        broker
    }

    /// Number of messages in a queue, visible or not (for testing)
    pub fn queue_length(&self, queue: &QueueName) -> usize {
        self.queues
            .lock()
            .get(queue)
            .map(|q| q.messages.len())
            .unwrap_or(0)
    }

    /// Snapshot of every envelope currently stored on a queue (for testing)
    pub fn peek_all(&self, queue: &QueueName) -> Vec<TaskEnvelope> {
        self.queues
            .lock()
            .get(queue)
            .map(|q| q.messages.iter().map(|m| m.envelope.clone()).collect())
            .unwrap_or_default()
    }

    pub fn counters(&self, queue: &QueueName) -> Option<InMemoryQueueCounters> {
        self.queues.lock().get(queue).map(|q| InMemoryQueueCounters {
            sent: q.total_sent,
            received: q.total_received,
            acked: q.total_acked,
            nacked: q.total_nacked,
        })
    }

    /// Clear all messages from a queue (for testing)
    pub fn clear_queue(&self, queue: &QueueName) {
        if let Some(q) = self.queues.lock().get_mut(queue) {
            q.messages.clear();
        }
    }
}

#[async_trait]
impl Broker for InMemoryBroker {
    async fn ensure_queue(&self, queue: &QueueName) -> Result<(), MessagingError> {
        self.queues
            .lock()
            .entry(queue.clone())
            .or_insert_with(InMemoryQueue::new);
        Ok(())
    }

    async fn verify_queues(
        &self,
        queues: &[QueueName],
    ) -> Result<QueueHealthReport, MessagingError> {
        let guard = self.queues.lock();
        let mut report = QueueHealthReport::new();

        for queue in queues {
            if guard.contains_key(queue) {
                report.add_healthy(queue.as_str());
            } else {
                report.add_missing(queue.as_str());
            }
        }

        Ok(report)
    }

    async fn publish(
        &self,
        queue: &QueueName,
        envelope: &TaskEnvelope,
    ) -> Result<MessageId, MessagingError> {
        let mut guard = self.queues.lock();
        let q = guard
            .get_mut(queue)
            .ok_or_else(|| MessagingError::queue_not_found(queue.as_str()))?;

        let id = q.next_id;
        q.next_id += 1;
        q.total_sent += 1;
        q.messages.push_back(InMemoryQueuedMessage {
            id,
            envelope: envelope.clone(),
            enqueued_at: Utc::now(),
            visible_at: None,
            receive_count: 0,
        });
        q.notify.notify_one();

        trace!(queue = %queue, msg_id = id, "Published envelope");
        Ok(MessageId::from(id))
    }

    async fn receive(
        &self,
        queue: &QueueName,
        visibility_timeout: Duration,
    ) -> Result<Option<Delivery>, MessagingError> {
        let mut guard = self.queues.lock();
        let q = guard
            .get_mut(queue)
            .ok_or_else(|| MessagingError::queue_not_found(queue.as_str()))?;

        let now = Instant::now();
        let Some(msg) = q.messages.iter_mut().find(|m| m.is_visible(now)) else {
            return Ok(None);
        };

        msg.visible_at = Some(now + visibility_timeout);
        msg.receive_count += 1;
        let handle = AckHandle::new(queue.clone(), MessageId::from(msg.id), msg.receive_count);
        let delivery = Delivery::new(msg.envelope.clone(), handle, msg.enqueued_at);
        q.total_received += 1;

        Ok(Some(delivery))
    }

    async fn ack(&self, handle: &AckHandle) -> Result<(), MessagingError> {
        let mut guard = self.queues.lock();
        let q = guard
            .get_mut(&handle.queue)
            .ok_or_else(|| MessagingError::queue_not_found(handle.queue.as_str()))?;

        let pos = q.position(handle).ok_or_else(|| {
            MessagingError::message_not_found(handle.queue.as_str(), handle.message_id.as_str())
        })?;
        q.messages.remove(pos);
        q.total_acked += 1;
        Ok(())
    }

    async fn nack(
        &self,
        handle: &AckHandle,
        redeliver_after: Duration,
    ) -> Result<(), MessagingError> {
        let mut guard = self.queues.lock();
        let q = guard
            .get_mut(&handle.queue)
            .ok_or_else(|| MessagingError::queue_not_found(handle.queue.as_str()))?;

        let pos = q.position(handle).ok_or_else(|| {
            MessagingError::message_not_found(handle.queue.as_str(), handle.message_id.as_str())
        })?;
        q.messages[pos].visible_at = if redeliver_after.is_zero() {
            None
        } else {
            Some(Instant::now() + redeliver_after)
        };
        q.total_nacked += 1;
        if redeliver_after.is_zero() {
            q.notify.notify_one();
        }
        Ok(())
    }

    async fn queue_stats(&self, queue: &QueueName) -> Result<QueueStats, MessagingError> {
        let guard = self.queues.lock();
        let q = guard
            .get(queue)
            .ok_or_else(|| MessagingError::queue_not_found(queue.as_str()))?;

        let now = Instant::now();
        let in_flight = q.messages.iter().filter(|m| !m.is_visible(now)).count() as u64;
        let mut stats =
            QueueStats::new(queue.as_str(), q.messages.len() as u64).with_in_flight_count(in_flight);

        if let Some(oldest) = q.messages.iter().map(|m| m.enqueued_at).min() {
            if let Ok(age) = (Utc::now() - oldest).to_std() {
                stats = stats.with_oldest_message_age(age);
            }
        }

        Ok(stats)
    }

    async fn health_check(&self) -> Result<bool, MessagingError> {
        Ok(true)
    }

    async fn wait_for_message(&self, queue: &QueueName, max_wait: Duration) {
        // Wake at the earliest of: a publish, the next visibility deadline, max_wait.
        let waiter = {
            let guard = self.queues.lock();
            guard.get(queue).map(|q| {
                let now = Instant::now();
                let next_visible = q
                    .messages
                    .iter()
                    .filter_map(|m| m.visible_at)
                    .filter(|at| *at > now)
                    .min()
                    .map(|at| at - now);
                let wait = next_visible.map_or(max_wait, |d| d.min(max_wait));
                (Arc::clone(&q.notify), wait)
            })
        };

        match waiter {
            Some((notify, wait)) => {
                let _ = tokio::time::timeout(wait, notify.notified()).await;
            }
            None => tokio::time::sleep(max_wait).await,
        }
    }

    fn provider_name(&self) -> &'static str {
        "in_memory"
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::messaging::envelope::TaskKind;
    use crate::messaging::router::QueueRouter;
    use serde_json::json;

    fn setup() -> (InMemoryBroker, QueueRouter, QueueName) {
        let router = QueueRouter::default();
        let queue = router.queue_for(TaskKind::Classify).clone();
        (InMemoryBroker::with_queues(&[queue.clone()]), router, queue)
    }

    #[tokio::test]
    async fn test_ensure_queue_is_idempotent() {
        let broker = InMemoryBroker::new();
        let queue = QueueName::new("email_queue");

        broker.ensure_queue(&queue).await.unwrap();
        broker.ensure_queue(&queue).await.unwrap();

        let report = broker.verify_queues(&[queue.clone()]).await.unwrap();
        assert!(report.is_healthy());
        assert_eq!(report.healthy.len(), 1);
    }

    #[tokio::test]
    async fn test_publish_to_missing_queue_fails() {
        let broker = InMemoryBroker::new();
        let router = QueueRouter::default();
        let envelope = router.route(TaskKind::Classify, json!({}), None);

        let err = broker
            .publish(envelope.target_queue(), &envelope)
            .await
            .unwrap_err();
        assert!(matches!(err, MessagingError::QueueNotFound { .. }));
    }

    #[tokio::test]
    async fn test_fifo_within_queue() {
        let (broker, router, queue) = setup();
        for n in 0..3 {
            let envelope = router.route(TaskKind::Classify, json!({ "n": n }), None);
            broker.publish(&queue, &envelope).await.unwrap();
        }

        for n in 0..3 {
            let delivery = broker
                .receive(&queue, Duration::from_secs(30))
                .await
                .unwrap()
                .unwrap();
            assert_eq!(delivery.envelope.payload()["n"], n);
            assert_eq!(delivery.attempt(), 1);
        }
        assert!(broker
            .receive(&queue, Duration::from_secs(30))
            .await
            .unwrap()
            .is_none());
    }

    #[tokio::test(start_paused = true)]
    async fn test_visibility_timeout_redelivers() {
        let (broker, router, queue) = setup();
        let envelope = router.route(TaskKind::Classify, json!({}), None);
        broker.publish(&queue, &envelope).await.unwrap();

        let first = broker
            .receive(&queue, Duration::from_secs(10))
            .await
            .unwrap()
            .unwrap();
        assert!(broker
            .receive(&queue, Duration::from_secs(10))
            .await
            .unwrap()
            .is_none());

        tokio::time::advance(Duration::from_secs(11)).await;

        let second = broker
            .receive(&queue, Duration::from_secs(10))
            .await
            .unwrap()
            .unwrap();
        assert_eq!(second.envelope.envelope_id(), first.envelope.envelope_id());
        assert_eq!(second.attempt(), 2);

        // The first consumer's handle is stale now
        let err = broker.ack(&first.handle).await.unwrap_err();
        assert!(matches!(err, MessagingError::MessageNotFound { .. }));
        broker.ack(&second.handle).await.unwrap();
        assert_eq!(broker.queue_length(&queue), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_nack_delays_redelivery() {
        let (broker, router, queue) = setup();
        let envelope = router.route(TaskKind::Classify, json!({}), None);
        broker.publish(&queue, &envelope).await.unwrap();

        let delivery = broker
            .receive(&queue, Duration::from_secs(30))
            .await
            .unwrap()
            .unwrap();
        broker
            .nack(&delivery.handle, Duration::from_secs(2))
            .await
            .unwrap();

        assert!(broker
            .receive(&queue, Duration::from_secs(30))
            .await
            .unwrap()
            .is_none());
        tokio::time::advance(Duration::from_secs(2)).await;
        assert!(broker
            .receive(&queue, Duration::from_secs(30))
            .await
            .unwrap()
            .is_some());
    }

    #[tokio::test]
    async fn test_ack_is_permanent() {
        let (broker, router, queue) = setup();
        let envelope = router.route(TaskKind::Classify, json!({}), None);
        broker.publish(&queue, &envelope).await.unwrap();

        let delivery = broker
            .receive(&queue, Duration::from_secs(30))
            .await
            .unwrap()
            .unwrap();
        broker.ack(&delivery.handle).await.unwrap();

        let err = broker
            .nack(&delivery.handle, Duration::ZERO)
            .await
            .unwrap_err();
        assert!(matches!(err, MessagingError::MessageNotFound { .. }));
        assert_eq!(broker.queue_length(&queue), 0);
        assert_eq!(broker.counters(&queue).unwrap().acked, 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_queue_stats_counts_in_flight() {
        let (broker, router, queue) = setup();
        for _ in 0..2 {
            let envelope = router.route(TaskKind::Classify, json!({}), None);
            broker.publish(&queue, &envelope).await.unwrap();
        }
        broker
            .receive(&queue, Duration::from_secs(30))
            .await
            .unwrap();

        let stats = broker.queue_stats(&queue).await.unwrap();
        assert_eq!(stats.message_count, 2);
        assert_eq!(stats.in_flight_count, 1);
        assert_eq!(stats.visible_count(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_wait_for_message_wakes_on_publish() {
        let (broker, router, queue) = setup();
        let broker = Arc::new(broker);

        let waiter = {
            let broker = Arc::clone(&broker);
            let queue = queue.clone();
            tokio::spawn(async move {
                let started = Instant::now();
                broker.wait_for_message(&queue, Duration::from_secs(60)).await;
                started.elapsed()
            })
        };
        tokio::task::yield_now().await;

        let envelope = router.route(TaskKind::Classify, json!({}), None);
        broker.publish(&queue, &envelope).await.unwrap();

        let waited = waiter.await.unwrap();
        assert!(waited < Duration::from_secs(60));
    }
}
