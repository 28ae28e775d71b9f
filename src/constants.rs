//! # System Constants
//!
//! Queue names, operational defaults and lifecycle event names that define the
//! boundaries of the dispatch core.

pub use crate::state_machine::{AckOutcome, EnvelopeState};

/// Base queue names, one per task kind
pub mod queues {
    pub const EMAIL: &str = "email_queue";
    pub const SLACK: &str = "slack_queue";
    pub const INTENT_CLASSIFIER: &str = "intent_classifier_queue";
    pub const GIT_JIRA: &str = "git_jira_queue";
    pub const REPLY: &str = "reply_queue";
    pub const REPLY_GIT_JIRA: &str = "reply_git_jira_queue";
    pub const FILE_SERVER: &str = "file_server_queue";
}

/// Envelope lifecycle events, used as the `event` field of lifecycle logs
pub mod events {
    pub const ENVELOPE_PUBLISHED: &str = "envelope.published";
    pub const ENVELOPE_RECEIVED: &str = "envelope.received";
    pub const ENVELOPE_SUCCEEDED: &str = "envelope.succeeded";
    pub const ENVELOPE_FAILURE_REPORTED: &str = "envelope.failure_reported";
    pub const ENVELOPE_REQUEUED: &str = "envelope.requeued";
    pub const ENVELOPE_DUPLICATE_SKIPPED: &str = "envelope.duplicate_skipped";
    pub const SCHEDULE_FIRED: &str = "schedule.fired";
}

/// Defaults for every tunable; all are overridable through configuration
pub mod defaults {
    pub const POOL_CONCURRENCY: usize = 2;
    pub const MAX_ATTEMPTS: u32 = 3;
    pub const HANDLER_TIMEOUT_SECONDS: u64 = 120;
    pub const VISIBILITY_TIMEOUT_SECONDS: u64 = 300;
    pub const POLL_INTERVAL_MS: u64 = 500;
    pub const DRAIN_TIMEOUT_SECONDS: u64 = 30;

    pub const BACKOFF_BASE_MS: u64 = 1_000;
    pub const BACKOFF_MULTIPLIER: f64 = 2.0;
    pub const BACKOFF_MAX_MS: u64 = 300_000;

    /// Completed dedup keys are forgotten after a day
    pub const DEDUP_RETENTION_SECONDS: u64 = 86_400;

    pub const INTAKE_URL: &str = "http://localhost:8000/api/v1/intake/callbacks";
    pub const COLLABORATOR_BASE_URL: &str = "http://localhost:8000";

    pub const EMAIL_POLL_INTERVAL_SECONDS: u64 = 30;
    /// Advisory lock key claimed by the active scheduler instance
    pub const SCHEDULER_LOCK_KEY: i64 = 0x636f_7572_6965_72;

    pub const CONFIDENCE_THRESHOLD: f64 = 0.5;

    pub const PREVIEW_REPOS_DIR: &str = "./repos";
    pub const PREVIEW_BASE_URL: &str = "http://localhost:8080";
}

/// System-wide constants
pub mod system {
    pub const COURIER_CORE_VERSION: &str = env!("CARGO_PKG_VERSION");

    /// Worker identifier prefix in logs
    pub const WORKER_ID_PREFIX: &str = "courier-worker";
}

/// State groupings for lifecycle checks
pub mod status_groups {
    use super::{AckOutcome, EnvelopeState};

    /// States from which no further transition is allowed
    pub const TERMINAL_STATES: &[EnvelopeState] = &[
        EnvelopeState::Acked(AckOutcome::Success),
        EnvelopeState::Acked(AckOutcome::FailureReported),
    ];

    /// States in which the broker still holds the message
    pub const BROKER_HELD_STATES: &[EnvelopeState] = &[
        EnvelopeState::Pending,
        EnvelopeState::InFlight,
        EnvelopeState::Requeued,
    ];
}
