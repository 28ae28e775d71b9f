//! Kind-specific payload shapes carried in envelopes.

use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::clients::{ActionRequest, InboundMessage, Intent};
use crate::messaging::TaskEnvelope;
use crate::worker::HandlerError;

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct EmailPollPayload {
    /// Overrides the configured batch size
    #[serde(default)]
    pub limit: Option<usize>,
}

/// Success result of a mailbox poll
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct EmailPollResult {
    pub fetched: usize,
    pub message_ids: Vec<String>,
}

/// Chat-platform message event as delivered by the listener
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SlackEventPayload {
    pub user: String,
    pub text: String,
    pub channel: String,
    pub ts: String,
    #[serde(default)]
    pub thread_ts: Option<String>,
    #[serde(default)]
    pub email: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ClassifyPayload {
    pub message: InboundMessage,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GitJiraPayload {
    pub message: InboundMessage,
    pub action: ActionRequest,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ReplyPayload {
    pub message: InboundMessage,
    pub intent: Intent,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ReplyGitJiraPayload {
    pub message: InboundMessage,
    pub action: ActionRequest,
    pub result: Value,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FileServePayload {
    pub repository: String,
    pub task_id: String,
}

/// Decode an envelope payload; a malformed payload is a validation failure
pub fn decode<T: DeserializeOwned>(envelope: &TaskEnvelope) -> Result<T, HandlerError> {
    envelope.decode_payload().map_err(|e| {
        HandlerError::validation(format!(
            "malformed {} payload: {e}",
            envelope.task_kind()
        ))
    })
}

pub fn encode<T: Serialize>(payload: &T) -> Result<Value, HandlerError> {
    Ok(serde_json::to_value(payload)?)
}
