//! Mailbox poll: fetch unread messages and fan each out to classification.
//!
//! Messages are marked read only after their `Classify` envelopes are
//! published. Until then a retried or later poll fetches them again.

use std::sync::Arc;

use async_trait::async_trait;
use serde_json::Value;
use tracing::{info, warn};

use super::payloads::{decode, encode, ClassifyPayload, EmailPollPayload, EmailPollResult};
use crate::clients::MailboxClient;
use crate::messaging::{TaskEnvelope, TaskKind};
use crate::worker::{HandlerError, HandlerOutcome, TaskHandler};

pub struct EmailPollHandler {
    mailbox: Arc<dyn MailboxClient>,
    batch_size: usize,
}

impl EmailPollHandler {
    pub fn new(mailbox: Arc<dyn MailboxClient>, batch_size: usize) -> Self {
        Self {
            mailbox,
            batch_size: batch_size.max(1),
        }
    }
}

#[async_trait]
impl TaskHandler for EmailPollHandler {
    fn task_kind(&self) -> TaskKind {
        TaskKind::EmailPoll
    }

    async fn handle(&self, envelope: &TaskEnvelope) -> Result<HandlerOutcome, HandlerError> {
        let payload: EmailPollPayload = decode(envelope)?;
        let limit = payload.limit.unwrap_or(self.batch_size);

        let messages = self.mailbox.fetch_unread(limit).await?;
        info!(fetched = messages.len(), limit = limit, "Mailbox polled");

        let result = EmailPollResult {
            fetched: messages.len(),
            message_ids: messages.iter().map(|m| m.id.clone()).collect(),
        };
        let mut outcome = HandlerOutcome::completed(encode(&result)?);
        for message in messages {
            outcome = outcome.with_derived(TaskKind::Classify, encode(&ClassifyPayload { message })?);
        }
        Ok(outcome)
    }

    async fn after_publish(&self, _envelope: &TaskEnvelope, result: &Value) {
        let Ok(result) = serde_json::from_value::<EmailPollResult>(result.clone()) else {
            warn!("Poll result without message ids; nothing marked read");
            return;
        };

        // An unmarked message is fetched again by a later poll
        let mut unmarked = 0usize;
        for id in &result.message_ids {
            if let Err(e) = self.mailbox.mark_read(id).await {
                unmarked += 1;
                warn!(message_id = %id, error = %e, "Failed to mark message read");
            }
        }
        if unmarked > 0 {
            warn!(unmarked = unmarked, "Some polled messages remain unread");
        }
    }
}
