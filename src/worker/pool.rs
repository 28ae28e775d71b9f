//! # Worker Pool
//!
//! Concurrent consumers bound to exactly one queue. Each worker owns a
//! delivery stream and handles one envelope at a time:
//!
//! ```text
//! receive ─▶ validate route ─▶ already completed? ──yes──▶ ack (duplicate)
//!                                    │ no
//!                                    ▼
//!                          handler (with timeout)
//!                     ok │                    │ err
//!                        ▼                    ▼
//!          publish derived envelopes      classify
//!          report success                 ├─ retry ─▶ nack(backoff)
//!          ack                            └─ terminal ─▶ report failure, ack
//! ```
//!
//! Once the handler succeeded and its derived envelopes are out, the report it
//! owes is kept in the completion ledger. A callback timeout then nacks with
//! backoff and the redelivery retries only the report; after `max_attempts`
//! the report is abandoned and the message acked. Dropping out mid-delivery
//! (drain abort, crash) leaves the message invisible until its visibility
//! timeout expires.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use futures::StreamExt;
use serde::Serialize;
use serde_json::Value;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn, Instrument};

use super::backoff::BackoffPolicy;
use super::error_classifier::{ErrorClassifier, ErrorContext, FailureDisposition};
use super::handler::{HandlerError, HandlerOutcome, TaskHandler};
use super::ledger::{CompletionLedger, PendingReport};
use crate::callback::{CallbackError, CallbackGateway, CallbackStatus, ReportOutcome, ReportSubject};
use crate::config::PoolSettings;
use crate::constants::{events, system};
use crate::logging::{log_envelope_operation, log_error};
use crate::messaging::service::{consume, AckHandle, Broker, BrokerProvider, ConsumeOptions, Delivery};
use crate::messaging::{EnvelopePublisher, MessagingError, QueueName, TaskEnvelope, TaskKind};
use crate::state_machine::{AckOutcome, EnvelopeEvent, EnvelopeStateMachine};

/// Shared collaborators every pool needs
#[derive(Clone)]
pub struct PoolDependencies {
    pub publisher: EnvelopePublisher,
    pub gateway: Arc<CallbackGateway>,
    pub classifier: Arc<dyn ErrorClassifier>,
    pub ledger: Arc<CompletionLedger>,
    /// Delay used when a callback times out after a successful handler
    pub backoff: BackoffPolicy,
}

/// Per-pool counters
#[derive(Debug, Default)]
pub struct PoolMetrics {
    processed: AtomicU64,
    succeeded: AtomicU64,
    failures_reported: AtomicU64,
    requeued: AtomicU64,
    duplicates_skipped: AtomicU64,
    handler_timeouts: AtomicU64,
    callback_timeouts: AtomicU64,
    reports_abandoned: AtomicU64,
    broker_errors: AtomicU64,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct PoolMetricsSnapshot {
    pub processed: u64,
    pub succeeded: u64,
    pub failures_reported: u64,
    pub requeued: u64,
    pub duplicates_skipped: u64,
    pub handler_timeouts: u64,
    pub callback_timeouts: u64,
    pub reports_abandoned: u64,
    pub broker_errors: u64,
}

impl PoolMetrics {
    pub fn snapshot(&self) -> PoolMetricsSnapshot {
        PoolMetricsSnapshot {
            processed: self.processed.load(Ordering::Relaxed),
            succeeded: self.succeeded.load(Ordering::Relaxed),
            failures_reported: self.failures_reported.load(Ordering::Relaxed),
            requeued: self.requeued.load(Ordering::Relaxed),
            duplicates_skipped: self.duplicates_skipped.load(Ordering::Relaxed),
            handler_timeouts: self.handler_timeouts.load(Ordering::Relaxed),
            callback_timeouts: self.callback_timeouts.load(Ordering::Relaxed),
            reports_abandoned: self.reports_abandoned.load(Ordering::Relaxed),
            broker_errors: self.broker_errors.load(Ordering::Relaxed),
        }
    }

    fn incr(counter: &AtomicU64) {
        counter.fetch_add(1, Ordering::Relaxed);
    }
}

/// Result of draining a pool
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct DrainReport {
    pub finished: usize,
    pub aborted: usize,
}

/// Consumers for one queue, not yet started
pub struct WorkerPool {
    inner: Arc<PoolInner>,
}

struct PoolInner {
    task_kind: TaskKind,
    queue: QueueName,
    settings: PoolSettings,
    handler: Arc<dyn TaskHandler>,
    broker: Arc<BrokerProvider>,
    deps: PoolDependencies,
    metrics: Arc<PoolMetrics>,
}

/// Running pool
pub struct PoolHandle {
    task_kind: TaskKind,
    queue: QueueName,
    shutdown_tx: watch::Sender<bool>,
    workers: Vec<JoinHandle<()>>,
    metrics: Arc<PoolMetrics>,
    drain_timeout: Duration,
}

/// Terminal handling decided for one delivery
enum Settlement {
    Ack(AckOutcome),
    AckDuplicate,
    Requeue { delay: Duration, reason: String },
}

impl WorkerPool {
    pub fn new(handler: Arc<dyn TaskHandler>, settings: PoolSettings, deps: PoolDependencies) -> Self {
        let task_kind = handler.task_kind();
        let queue = deps.publisher.router().queue_for(task_kind).clone();
        let broker = Arc::clone(deps.publisher.broker());
        Self {
            inner: Arc::new(PoolInner {
                task_kind,
                queue,
                settings,
                handler,
                broker,
                deps,
                metrics: Arc::new(PoolMetrics::default()),
            }),
        }
    }

    pub fn task_kind(&self) -> TaskKind {
        self.inner.task_kind
    }

    pub fn queue(&self) -> &QueueName {
        &self.inner.queue
    }

    /// Start `concurrency` workers, each with its own delivery stream
    pub fn spawn(self) -> PoolHandle {
        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        let concurrency = self.inner.settings.concurrency.max(1);
        let options = ConsumeOptions {
            visibility_timeout: self.inner.settings.visibility_timeout(),
            poll_interval: self.inner.settings.poll_interval(),
        };

        let workers = (0..concurrency)
            .map(|index| {
                let inner = Arc::clone(&self.inner);
                let shutdown = shutdown_rx.clone();
                let worker_id = format!(
                    "{}-{}-{index}",
                    system::WORKER_ID_PREFIX,
                    inner.task_kind.as_str()
                );
                let span = tracing::info_span!("worker", worker_id = %worker_id, queue = %inner.queue);
                tokio::spawn(async move { inner.run_worker(options, shutdown).await }.instrument(span))
            })
            .collect();

        info!(
            task_kind = %self.inner.task_kind,
            queue = %self.inner.queue,
            concurrency = concurrency,
            max_attempts = self.inner.settings.max_attempts,
            "Worker pool started"
        );

        PoolHandle {
            task_kind: self.inner.task_kind,
            queue: self.inner.queue.clone(),
            shutdown_tx,
            workers,
            metrics: Arc::clone(&self.inner.metrics),
            drain_timeout: self.inner.settings.drain_timeout(),
        }
    }
}

impl PoolInner {
    async fn run_worker(self: Arc<Self>, options: ConsumeOptions, shutdown: watch::Receiver<bool>) {
        let mut deliveries = consume(
            Arc::clone(&self.broker),
            self.queue.clone(),
            options,
            shutdown,
        );

        while let Some(next) = deliveries.next().await {
            match next {
                Ok(delivery) => self.process(delivery).await,
                Err(e) => {
                    PoolMetrics::incr(&self.metrics.broker_errors);
                    warn!(error = %e, "Receive failed");
                }
            }
        }
        debug!("Worker stopped");
    }

    async fn process(&self, delivery: Delivery) {
        let attempt = delivery.attempt();
        let Delivery {
            envelope, handle, ..
        } = delivery;
        PoolMetrics::incr(&self.metrics.processed);

        let span = tracing::info_span!(
            "delivery",
            correlation_id = %envelope.correlation_id(),
            task_kind = %envelope.task_kind(),
            envelope_id = %envelope.envelope_id(),
            attempt = attempt
        );

        async {
            let mut lifecycle = EnvelopeStateMachine::new(envelope.envelope_id());
            self.advance(&mut lifecycle, &EnvelopeEvent::Receive);
            log_envelope_operation(events::ENVELOPE_RECEIVED, &envelope, attempt, None);

            let settlement = self.settle(&envelope, attempt).await;
            self.finish(&envelope, &handle, attempt, settlement, &mut lifecycle)
                .await;
        }
        .instrument(span)
        .await
    }

    /// Decide what happens to the delivery; all side effects except ack/nack
    async fn settle(&self, envelope: &TaskEnvelope, attempt: u32) -> Settlement {
        let subject = ReportSubject::from_envelope(envelope);

        if let Err(e) = self.validate(envelope) {
            warn!(error = %e, "Envelope routed to the wrong queue");
            let error_info = serde_json::json!({
                "reason": "routing_mismatch",
                "message": e.to_string(),
            });
            return self.report_failure(&subject, error_info, attempt).await;
        }

        if self.deps.ledger.is_completed(&subject.dedup_key) {
            return Settlement::AckDuplicate;
        }
        if let Some(pending) = self.deps.ledger.pending_report(&subject.dedup_key) {
            debug!("Handler already ran; retrying its report");
            return self.deliver_report(&subject, pending, attempt).await;
        }

        let started = Instant::now();
        let handler_timeout = self.settings.handler_timeout();
        let result = match tokio::time::timeout(handler_timeout, self.handler.handle(envelope)).await {
            Ok(result) => result,
            Err(_) => {
                PoolMetrics::incr(&self.metrics.handler_timeouts);
                Err(HandlerError::Timeout {
                    timeout_ms: handler_timeout.as_millis() as u64,
                })
            }
        };

        match result {
            Ok(outcome) => self.complete_success(envelope, &subject, attempt, outcome).await,
            Err(handler_error) => {
                let context = ErrorContext {
                    envelope_id: envelope.envelope_id(),
                    correlation_id: envelope.correlation_id(),
                    task_kind: envelope.task_kind(),
                    attempt_number: attempt,
                    max_attempts: self.settings.max_attempts,
                    execution_duration: started.elapsed(),
                };
                let classification = self.deps.classifier.classify_error(&handler_error, &context);

                debug!(
                    category = %classification.category,
                    error_code = %classification.error_code,
                    final_attempt = classification.is_final_attempt,
                    classifier = self.deps.classifier.classifier_name(),
                    "Handler failed"
                );

                match classification.disposition {
                    FailureDisposition::Retry { delay } => Settlement::Requeue {
                        delay,
                        reason: classification.error_message,
                    },
                    FailureDisposition::ReportFailure { error_info } => {
                        self.report_failure(&subject, error_info, attempt).await
                    }
                }
            }
        }
    }

    fn validate(&self, envelope: &TaskEnvelope) -> Result<(), MessagingError> {
        self.deps.publisher.router().validate(envelope)?;
        if envelope.task_kind() != self.task_kind {
            return Err(MessagingError::RoutingMismatch {
                task_kind: envelope.task_kind().to_string(),
                expected: self.deps.publisher.router().queue_for(envelope.task_kind()).to_string(),
                actual: self.queue.to_string(),
            });
        }
        Ok(())
    }

    async fn complete_success(
        &self,
        envelope: &TaskEnvelope,
        subject: &ReportSubject,
        attempt: u32,
        outcome: HandlerOutcome,
    ) -> Settlement {
        for derived in outcome.derived {
            if let Err(e) = self
                .deps
                .publisher
                .publish_derived(envelope, derived.task_kind, derived.payload)
                .await
            {
                PoolMetrics::incr(&self.metrics.broker_errors);
                return Settlement::Requeue {
                    delay: self.deps.backoff.delay_for_attempt(attempt),
                    reason: format!("derived publish to {} failed: {e}", derived.task_kind),
                };
            }
        }

        let handler_timeout = self.settings.handler_timeout();
        if tokio::time::timeout(handler_timeout, self.handler.after_publish(envelope, &outcome.result))
            .await
            .is_err()
        {
            warn!(
                timeout_ms = handler_timeout.as_millis() as u64,
                "Post-publish step timed out"
            );
        }

        let pending = PendingReport {
            status: CallbackStatus::Success,
            payload: outcome.result,
        };
        self.deliver_report(subject, pending, attempt).await
    }

    async fn report_failure(&self, subject: &ReportSubject, error_info: Value, attempt: u32) -> Settlement {
        let pending = PendingReport {
            status: CallbackStatus::Failure,
            payload: error_info,
        };
        self.deliver_report(subject, pending, attempt).await
    }

    /// Send the terminal report, keeping it in the ledger until it is settled
    async fn deliver_report(&self, subject: &ReportSubject, pending: PendingReport, attempt: u32) -> Settlement {
        let outcome = pending.outcome();
        self.deps.ledger.record_pending(subject.dedup_key, pending.clone());

        let result = match pending.status {
            CallbackStatus::Success => self.deps.gateway.report_success(subject, pending.payload).await,
            CallbackStatus::Failure => self.deps.gateway.report_failure(subject, pending.payload).await,
        };
        match result {
            Ok(report) => {
                self.record_completion(subject, outcome, report);
                Settlement::Ack(outcome)
            }
            Err(e) => self.callback_failed(subject, outcome, attempt, e),
        }
    }

    fn record_completion(&self, subject: &ReportSubject, outcome: AckOutcome, report: ReportOutcome) {
        if report == ReportOutcome::Dropped {
            warn!(outcome = %outcome, "Terminal outcome recorded without a delivered report");
        }
        self.deps.ledger.record(subject.dedup_key, outcome);
    }

    fn callback_failed(
        &self,
        subject: &ReportSubject,
        outcome: AckOutcome,
        attempt: u32,
        error: CallbackError,
    ) -> Settlement {
        PoolMetrics::incr(&self.metrics.callback_timeouts);
        if attempt >= self.settings.max_attempts {
            PoolMetrics::incr(&self.metrics.reports_abandoned);
            log_error(
                "worker_pool",
                "report",
                &error.to_string(),
                Some(&format!(
                    "correlation_id={} task_kind={} attempts={attempt}",
                    subject.correlation_id, subject.task_kind
                )),
            );
            error!(
                outcome = %outcome,
                attempts = attempt,
                "Report abandoned after exhausting delivery attempts"
            );
            self.deps.ledger.record(subject.dedup_key, outcome);
            return Settlement::Ack(outcome);
        }
        Settlement::Requeue {
            delay: self.deps.backoff.delay_for_attempt(attempt),
            reason: error.to_string(),
        }
    }

    async fn finish(
        &self,
        envelope: &TaskEnvelope,
        handle: &AckHandle,
        attempt: u32,
        settlement: Settlement,
        lifecycle: &mut EnvelopeStateMachine,
    ) {
        match settlement {
            Settlement::Ack(outcome) => {
                let (event, log_event, counter) = match outcome {
                    AckOutcome::Success => (
                        EnvelopeEvent::Succeed,
                        events::ENVELOPE_SUCCEEDED,
                        &self.metrics.succeeded,
                    ),
                    AckOutcome::FailureReported => (
                        EnvelopeEvent::ReportFailure("terminal failure reported".to_string()),
                        events::ENVELOPE_FAILURE_REPORTED,
                        &self.metrics.failures_reported,
                    ),
                };
                self.ack(handle).await;
                self.advance(lifecycle, &event);
                PoolMetrics::incr(counter);
                log_envelope_operation(log_event, envelope, attempt, None);
            }
            Settlement::AckDuplicate => {
                self.ack(handle).await;
                self.advance(lifecycle, &EnvelopeEvent::Succeed);
                PoolMetrics::incr(&self.metrics.duplicates_skipped);
                log_envelope_operation(
                    events::ENVELOPE_DUPLICATE_SKIPPED,
                    envelope,
                    attempt,
                    Some("dedup key already completed"),
                );
            }
            Settlement::Requeue { delay, reason } => {
                match self.deps.publisher.broker().nack(handle, delay).await {
                    Ok(()) => {}
                    Err(MessagingError::MessageNotFound { .. }) => {
                        warn!("Nack on a stale delivery; message already redelivered");
                    }
                    Err(e) => {
                        PoolMetrics::incr(&self.metrics.broker_errors);
                        error!(error = %e, "Nack failed; message will reappear after its visibility timeout");
                    }
                }
                self.advance(lifecycle, &EnvelopeEvent::Requeue { delay });
                PoolMetrics::incr(&self.metrics.requeued);
                log_envelope_operation(
                    events::ENVELOPE_REQUEUED,
                    envelope,
                    attempt,
                    Some(&format!("delay_ms={} reason={reason}", delay.as_millis())),
                );
            }
        }
    }

    async fn ack(&self, handle: &AckHandle) {
        match self.broker.ack(handle).await {
            Ok(()) => {}
            Err(MessagingError::MessageNotFound { .. }) => {
                warn!(message_id = %handle.message_id, "Ack on a stale delivery; another worker owns the message");
            }
            Err(e) => {
                PoolMetrics::incr(&self.metrics.broker_errors);
                error!(
                    message_id = %handle.message_id,
                    error = %e,
                    "Ack failed; completion ledger will suppress the redelivery"
                );
            }
        }
    }

    fn advance(&self, lifecycle: &mut EnvelopeStateMachine, event: &EnvelopeEvent) {
        if let Err(e) = lifecycle.transition(event) {
            error!(error = %e, "Envelope lifecycle violation");
        }
    }
}

impl PoolHandle {
    pub fn task_kind(&self) -> TaskKind {
        self.task_kind
    }

    pub fn queue(&self) -> &QueueName {
        &self.queue
    }

    pub fn metrics(&self) -> PoolMetricsSnapshot {
        self.metrics.snapshot()
    }

    pub fn worker_count(&self) -> usize {
        self.workers.len()
    }

    /// Stop intake; in-flight deliveries keep running
    pub fn request_shutdown(&self) {
        let _ = self.shutdown_tx.send(true);
    }

    /// Stop intake and wait for in-flight work up to the configured drain timeout
    pub async fn shutdown(self) -> DrainReport {
        let timeout = self.drain_timeout;
        self.drain(timeout).await
    }

    /// Stop intake, wait up to `timeout`, then abort what is still running
    pub async fn drain(mut self, timeout: Duration) -> DrainReport {
        self.request_shutdown();
        let deadline = tokio::time::Instant::now() + timeout;
        let mut report = DrainReport::default();

        for mut worker in self.workers.drain(..) {
            match tokio::time::timeout_at(deadline, &mut worker).await {
                Ok(_) => report.finished += 1,
                Err(_) => {
                    worker.abort();
                    report.aborted += 1;
                }
            }
        }

        if report.aborted > 0 {
            warn!(
                task_kind = %self.task_kind,
                aborted = report.aborted,
                "Drain timeout reached; aborted workers' deliveries will be redelivered"
            );
        } else {
            info!(task_kind = %self.task_kind, "Worker pool drained");
        }
        report
    }
}
