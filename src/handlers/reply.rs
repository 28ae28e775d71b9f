//! Reply generation and delivery on the message's origin channel.

use std::sync::Arc;

use async_trait::async_trait;
use serde_json::json;
use tracing::info;

use super::payloads::{decode, ReplyGitJiraPayload, ReplyPayload};
use crate::clients::{InboundMessage, ReplyClient, ReplyContext};
use crate::messaging::{TaskEnvelope, TaskKind};
use crate::worker::{HandlerError, HandlerOutcome, TaskHandler};

async fn generate_and_deliver(
    client: &dyn ReplyClient,
    context: ReplyContext,
) -> Result<HandlerOutcome, HandlerError> {
    let body = client.generate(&context).await?;
    if body.trim().is_empty() {
        return Err(HandlerError::permanent("empty_reply"));
    }
    client.deliver(&context.message, &body).await?;

    let InboundMessage { id, source, .. } = context.message;
    info!(message_id = %id, chars = body.len(), "Reply delivered");
    Ok(HandlerOutcome::completed(json!({
        "message_id": id,
        "channel": source,
        "reply_chars": body.len(),
    })))
}

/// Replies to messages that needed no action
pub struct ReplyGenerateHandler {
    client: Arc<dyn ReplyClient>,
}

impl ReplyGenerateHandler {
    pub fn new(client: Arc<dyn ReplyClient>) -> Self {
        Self { client }
    }
}

#[async_trait]
impl TaskHandler for ReplyGenerateHandler {
    fn task_kind(&self) -> TaskKind {
        TaskKind::ReplyGenerate
    }

    async fn handle(&self, envelope: &TaskEnvelope) -> Result<HandlerOutcome, HandlerError> {
        let ReplyPayload { message, intent } = decode(envelope)?;
        let context = ReplyContext {
            message,
            intent: Some(intent),
            results: Vec::new(),
        };
        generate_and_deliver(self.client.as_ref(), context).await
    }
}

/// Replies summarizing a completed git or issue-tracker action
pub struct ReplyGitJiraHandler {
    client: Arc<dyn ReplyClient>,
}

impl ReplyGitJiraHandler {
    pub fn new(client: Arc<dyn ReplyClient>) -> Self {
        Self { client }
    }
}

#[async_trait]
impl TaskHandler for ReplyGitJiraHandler {
    fn task_kind(&self) -> TaskKind {
        TaskKind::ReplyGitJiraGenerate
    }

    async fn handle(&self, envelope: &TaskEnvelope) -> Result<HandlerOutcome, HandlerError> {
        let ReplyGitJiraPayload {
            message,
            action,
            result,
        } = decode(envelope)?;
        let context = ReplyContext {
            message,
            intent: None,
            results: vec![json!({ "action": action, "result": result })],
        };
        generate_and_deliver(self.client.as_ref(), context).await
    }
}
