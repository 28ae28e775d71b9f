use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Events that drive envelope state transitions
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", content = "data")]
pub enum EnvelopeEvent {
    /// A worker received the envelope
    Receive,
    /// Handler succeeded (or the envelope was a duplicate of completed work)
    Succeed,
    /// Terminal failure has been reported
    ReportFailure(String),
    /// Transient failure; redeliver after the delay
    Requeue { delay: Duration },
    /// Redelivery delay elapsed
    Release,
    /// Visibility timeout expired without ack or nack
    Expire,
}

impl EnvelopeEvent {
    /// Get a string representation of the event type for logging
    pub fn event_type(&self) -> &'static str {
        match self {
            Self::Receive => "receive",
            Self::Succeed => "succeed",
            Self::ReportFailure(_) => "report_failure",
            Self::Requeue { .. } => "requeue",
            Self::Release => "release",
            Self::Expire => "expire",
        }
    }

    pub fn error_message(&self) -> Option<&str> {
        match self {
            Self::ReportFailure(msg) => Some(msg),
            _ => None,
        }
    }

    /// Check if this event represents a terminal transition
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Succeed | Self::ReportFailure(_))
    }
}
