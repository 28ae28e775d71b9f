use serde::{Deserialize, Serialize};
use std::fmt;

/// How an acknowledged envelope ended
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AckOutcome {
    /// Handler succeeded, derived tasks published and success reported
    Success,
    /// Terminal failure recorded through the callback gateway
    FailureReported,
}

impl fmt::Display for AckOutcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Success => write!(f, "success"),
            Self::FailureReported => write!(f, "failure_reported"),
        }
    }
}

/// Lifecycle of one envelope inside a worker pool
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case", tag = "state", content = "outcome")]
pub enum EnvelopeState {
    /// Visible on the broker, waiting for a consumer
    #[default]
    Pending,
    /// Received by a worker and hidden from other consumers
    InFlight,
    /// Removed from the broker for good
    Acked(AckOutcome),
    /// Returned to the broker with a redelivery delay
    Requeued,
}

impl EnvelopeState {
    /// Check if this is a terminal state (no further transitions allowed)
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Acked(_))
    }

    /// Check if a worker currently owns the envelope
    pub fn is_active(&self) -> bool {
        matches!(self, Self::InFlight)
    }
}

impl fmt::Display for EnvelopeState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Pending => write!(f, "pending"),
            Self::InFlight => write!(f, "in_flight"),
            Self::Acked(AckOutcome::Success) => write!(f, "acked_success"),
            Self::Acked(AckOutcome::FailureReported) => write!(f, "acked_failure_reported"),
            Self::Requeued => write!(f, "requeued"),
        }
    }
}

impl std::str::FromStr for EnvelopeState {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "pending" => Ok(Self::Pending),
            "in_flight" => Ok(Self::InFlight),
            "acked_success" => Ok(Self::Acked(AckOutcome::Success)),
            "acked_failure_reported" => Ok(Self::Acked(AckOutcome::FailureReported)),
            "requeued" => Ok(Self::Requeued),
            _ => Err(format!("Invalid envelope state: {s}")),
        }
    }
}
