//! Chat-platform ingestion: normalize one message event and send it to
//! classification.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde_json::json;

use super::payloads::{decode, encode, ClassifyPayload, SlackEventPayload};
use crate::clients::{InboundMessage, MessageSource};
use crate::messaging::{TaskEnvelope, TaskKind};
use crate::worker::{HandlerError, HandlerOutcome, TaskHandler};

#[derive(Debug, Default)]
pub struct SlackDispatchHandler;

impl SlackDispatchHandler {
    pub fn new() -> Self {
        Self
    }

    fn normalize(event: SlackEventPayload, received_at: DateTime<Utc>) -> InboundMessage {
        InboundMessage {
            id: format!("{}:{}", event.channel, event.ts),
            source: MessageSource::Slack,
            sender: event.email.unwrap_or(event.user),
            subject: None,
            body: event.text,
            // Replies thread under the original message
            thread_ts: Some(event.thread_ts.unwrap_or_else(|| event.ts.clone())),
            channel: Some(event.channel),
            received_at,
        }
    }
}

#[async_trait]
impl TaskHandler for SlackDispatchHandler {
    fn task_kind(&self) -> TaskKind {
        TaskKind::SlackDispatch
    }

    async fn handle(&self, envelope: &TaskEnvelope) -> Result<HandlerOutcome, HandlerError> {
        let event: SlackEventPayload = decode(envelope)?;
        if event.text.trim().is_empty() {
            return Err(HandlerError::validation("chat message has no text"));
        }

        let message = Self::normalize(event, envelope.enqueued_at());
        let result = json!({ "message_id": message.id, "channel": message.channel });
        Ok(HandlerOutcome::completed(result)
            .with_derived(TaskKind::Classify, encode(&ClassifyPayload { message })?))
    }
}
