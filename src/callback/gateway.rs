//! # Callback Gateway
//!
//! The single path by which worker pools tell the coordinating service about
//! terminal outcomes. Reports are deduplicated per dedup key, retried a
//! bounded number of times, and the whole call is bounded by a total timeout.
//!
//! ```text
//! report_success / report_failure
//!          │
//!          ▼
//!   ┌──────────────┐ duplicate? ──▶ ReportOutcome::Duplicate
//!   │ state (key)  │
//!   └──────────────┘
//!          │ in flight
//!          ▼
//!   attempt 1..=max_attempts ──▶ Delivered
//!          │ exhausted / rejected
//!          ▼
//!       Dropped (error! log)
//! ```

use std::sync::Arc;
use std::time::Duration;

use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use serde_json::Value;
use tokio::time::Instant;
use tracing::{debug, error, info, warn};

use super::errors::CallbackError;
use super::intake_client::IntakeClient;
use super::types::{CallbackReport, CallbackStatus, ReportOutcome, ReportSubject};
use crate::config::CallbackConfig;
use crate::constants::defaults;
use crate::logging::log_error;
use crate::messaging::DedupKey;
use crate::retention::{Aged, RetentionWindow};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum ReportState {
    InFlight,
    Delivered,
    Dropped,
}

#[derive(Debug, Clone, Copy)]
struct TrackedReport {
    state: ReportState,
    updated_at: Instant,
}

impl TrackedReport {
    fn now(state: ReportState) -> Self {
        Self {
            state,
            updated_at: Instant::now(),
        }
    }
}

impl Aged for TrackedReport {
    fn touched_at(&self) -> Instant {
        self.updated_at
    }
}

/// Delivery limits for one report
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct GatewaySettings {
    pub max_attempts: u32,
    pub attempt_timeout: Duration,
    pub retry_delay: Duration,
    pub total_timeout: Duration,
    /// How long a delivered subject keeps suppressing duplicates
    pub retention: Duration,
}

impl From<&CallbackConfig> for GatewaySettings {
    fn from(config: &CallbackConfig) -> Self {
        Self {
            max_attempts: config.max_attempts.max(1),
            attempt_timeout: config.attempt_timeout(),
            retry_delay: config.retry_delay(),
            total_timeout: config.total_timeout(),
            retention: Duration::from_secs(defaults::DEDUP_RETENTION_SECONDS),
        }
    }
}

impl Default for GatewaySettings {
    fn default() -> Self {
        Self::from(&CallbackConfig::default())
    }
}

/// Clears an in-flight mark if the report future is dropped or times out
struct InFlightGuard<'a> {
    state: &'a DashMap<DedupKey, TrackedReport>,
    key: DedupKey,
    armed: bool,
}

impl InFlightGuard<'_> {
    fn settle(mut self, state: ReportState) {
        self.state.insert(self.key, TrackedReport::now(state));
        self.armed = false;
    }
}

impl Drop for InFlightGuard<'_> {
    fn drop(&mut self) {
        if self.armed {
            self.state
                .remove_if(&self.key, |_, tracked| tracked.state == ReportState::InFlight);
        }
    }
}

pub struct CallbackGateway {
    client: Arc<dyn IntakeClient>,
    settings: GatewaySettings,
    state: DashMap<DedupKey, TrackedReport>,
    window: RetentionWindow,
}

impl std::fmt::Debug for CallbackGateway {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CallbackGateway")
            .field("settings", &self.settings)
            .field("tracked_reports", &self.state.len())
            .finish()
    }
}

impl CallbackGateway {
    pub fn new(client: Arc<dyn IntakeClient>, settings: GatewaySettings) -> Self {
        Self {
            client,
            settings,
            state: DashMap::new(),
            window: RetentionWindow::new(settings.retention),
        }
    }

    pub fn settings(&self) -> &GatewaySettings {
        &self.settings
    }

    pub async fn report_success(
        &self,
        subject: &ReportSubject,
        result_payload: Value,
    ) -> Result<ReportOutcome, CallbackError> {
        self.report(subject, CallbackStatus::Success, result_payload)
            .await
    }

    pub async fn report_failure(
        &self,
        subject: &ReportSubject,
        error_info: Value,
    ) -> Result<ReportOutcome, CallbackError> {
        self.report(subject, CallbackStatus::Failure, error_info)
            .await
    }

    /// Whether a report for this subject was delivered
    pub fn is_reported(&self, subject: &ReportSubject) -> bool {
        self.state
            .get(&subject.dedup_key)
            .is_some_and(|tracked| tracked.state == ReportState::Delivered)
    }

    /// Subjects currently remembered
    pub fn tracked_reports(&self) -> usize {
        self.state.len()
    }

    /// Forget subjects older than the retention window now
    pub fn evict_expired(&self) -> usize {
        self.window.evict(&self.state, Instant::now())
    }

    async fn report(
        &self,
        subject: &ReportSubject,
        status: CallbackStatus,
        payload: Value,
    ) -> Result<ReportOutcome, CallbackError> {
        self.window.sweep(&self.state);
        match self.state.entry(subject.dedup_key) {
            Entry::Occupied(mut entry) => {
                if entry.get().state != ReportState::Dropped {
                    debug!(
                        correlation_id = %subject.correlation_id,
                        task_kind = %subject.task_kind,
                        "Duplicate callback report suppressed"
                    );
                    return Ok(ReportOutcome::Duplicate);
                }
                entry.insert(TrackedReport::now(ReportState::InFlight));
            }
            Entry::Vacant(entry) => {
                entry.insert(TrackedReport::now(ReportState::InFlight));
            }
        }

        let guard = InFlightGuard {
            state: &self.state,
            key: subject.dedup_key,
            armed: true,
        };
        let report = CallbackReport::new(subject, status, payload);

        match tokio::time::timeout(self.settings.total_timeout, self.deliver(&report)).await {
            Ok(Ok(())) => {
                guard.settle(ReportState::Delivered);
                info!(
                    correlation_id = %subject.correlation_id,
                    task_kind = %subject.task_kind,
                    status = ?status,
                    "Callback report delivered"
                );
                Ok(ReportOutcome::Delivered)
            }
            Ok(Err(e)) => {
                guard.settle(ReportState::Dropped);
                log_error(
                    "callback_gateway",
                    "report",
                    &e.to_string(),
                    Some(&format!(
                        "correlation_id={} task_kind={} status={status:?}",
                        subject.correlation_id, subject.task_kind
                    )),
                );
                error!(
                    correlation_id = %subject.correlation_id,
                    task_kind = %subject.task_kind,
                    report = %serde_json::to_string(&report).unwrap_or_default(),
                    "Callback report dropped"
                );
                Ok(ReportOutcome::Dropped)
            }
            Err(_) => {
                drop(guard);
                warn!(
                    correlation_id = %subject.correlation_id,
                    task_kind = %subject.task_kind,
                    timeout_ms = self.settings.total_timeout.as_millis() as u64,
                    "Callback report timed out"
                );
                Err(CallbackError::Timeout {
                    timeout_ms: self.settings.total_timeout.as_millis() as u64,
                })
            }
        }
    }

    async fn deliver(&self, report: &CallbackReport) -> Result<(), CallbackError> {
        let mut attempt = 0;
        loop {
            attempt += 1;
            let result = match tokio::time::timeout(
                self.settings.attempt_timeout,
                self.client.submit(report),
            )
            .await
            {
                Ok(result) => result,
                Err(_) => Err(CallbackError::transport(format!(
                    "attempt timed out after {}ms",
                    self.settings.attempt_timeout.as_millis()
                ))),
            };

            match result {
                Ok(()) => return Ok(()),
                Err(e) if !e.is_retryable() => return Err(e),
                Err(e) if attempt >= self.settings.max_attempts => {
                    error!(
                        attempts = attempt,
                        error = %e,
                        "Exhausted all callback delivery attempts"
                    );
                    return Err(e);
                }
                Err(e) => {
                    warn!(
                        error = %e,
                        attempt = attempt,
                        max_attempts = self.settings.max_attempts,
                        "Callback delivery failed, will retry"
                    );
                    tokio::time::sleep(self.settings.retry_delay * attempt).await;
                }
            }
        }
    }
}
