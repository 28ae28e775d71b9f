use std::fmt;
use std::path::PathBuf;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Channel an inbound message arrived on; replies go back the same way
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MessageSource {
    Email,
    Slack,
}

/// A message from a human, normalized across channels
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct InboundMessage {
    /// Channel-specific id (mailbox message id, chat timestamp)
    pub id: String,
    pub source: MessageSource,
    pub sender: String,
    #[serde(default)]
    pub subject: Option<String>,
    pub body: String,
    /// Chat channel the message was posted in
    #[serde(default)]
    pub channel: Option<String>,
    #[serde(default)]
    pub thread_ts: Option<String>,
    #[serde(default = "Utc::now")]
    pub received_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Intent {
    Meeting,
    Transcript,
    Instructions,
    Greeting,
}

impl Intent {
    /// Intents that may carry version-control / issue-tracker actions
    pub fn is_actionable(self) -> bool {
        matches!(self, Self::Instructions | Self::Transcript)
    }
}

impl fmt::Display for Intent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Meeting => "meeting",
            Self::Transcript => "transcript",
            Self::Instructions => "instructions",
            Self::Greeting => "greeting",
        };
        f.write_str(s)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ActionTarget {
    Git,
    Jira,
}

/// One version-control or issue-tracker action extracted from a message
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ActionRequest {
    pub target: ActionTarget,
    pub title: String,
    #[serde(default)]
    pub description: String,
    /// Required for git actions
    #[serde(default)]
    pub repository: Option<String>,
    /// Issue-tracker project key
    #[serde(default)]
    pub project: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Classification {
    pub intent: Intent,
    pub confidence: f64,
    #[serde(default)]
    pub actions: Vec<ActionRequest>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RepositorySync {
    pub repository: String,
    pub destination: PathBuf,
    pub instruction: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SyncOutcome {
    pub repository: String,
    #[serde(default)]
    pub commit: Option<String>,
    pub summary: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct IssueMutation {
    #[serde(default)]
    pub project: Option<String>,
    pub title: String,
    pub description: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct IssueReceipt {
    pub key: String,
    pub summary: String,
}

/// Everything a reply generator needs
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ReplyContext {
    pub message: InboundMessage,
    #[serde(default)]
    pub intent: Option<Intent>,
    /// Results of actions taken on the message's behalf
    #[serde(default)]
    pub results: Vec<Value>,
}
