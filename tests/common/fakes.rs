//! In-process stand-ins for the intake endpoint and external collaborators.

use std::path::Path;
use std::sync::atomic::{AtomicU32, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use parking_lot::Mutex;

use courier_core::callback::{CallbackError, CallbackReport, CallbackStatus, IntakeClient};
use courier_core::clients::{
    ClassificationClient, Classification, ClientError, InboundMessage, IssueMutation,
    IssueReceipt, MailboxClient, ReplyClient, ReplyContext, SyncOutcome, VcsIssueClient,
};
use courier_core::messaging::{CorrelationId, TaskEnvelope, TaskKind};
use courier_core::worker::{HandlerError, HandlerOutcome, TaskHandler};

/// Intake endpoint that accepts and records every report
#[derive(Default)]
pub struct RecordingIntake {
    reports: Mutex<Vec<CallbackReport>>,
    stall: Mutex<Option<(TaskKind, u32)>>,
}

impl RecordingIntake {
    /// The first `times` reports for `kind` hang instead of returning
    pub fn stalling(kind: TaskKind, times: u32) -> Self {
        Self {
            stall: Mutex::new(Some((kind, times))),
            ..Self::default()
        }
    }

    pub fn reports(&self) -> Vec<CallbackReport> {
        self.reports.lock().clone()
    }

    pub fn reports_for(&self, kind: TaskKind) -> Vec<CallbackReport> {
        self.reports
            .lock()
            .iter()
            .filter(|r| r.task_kind == kind)
            .cloned()
            .collect()
    }

    pub fn successes(&self) -> usize {
        self.reports
            .lock()
            .iter()
            .filter(|r| r.status == CallbackStatus::Success)
            .count()
    }

    pub fn correlation_ids(&self) -> Vec<CorrelationId> {
        self.reports.lock().iter().map(|r| r.correlation_id).collect()
    }
}

#[async_trait]
impl IntakeClient for RecordingIntake {
    async fn submit(&self, report: &CallbackReport) -> Result<(), CallbackError> {
        let stall = match self.stall.lock().as_mut() {
            Some((kind, remaining)) if *kind == report.task_kind && *remaining > 0 => {
                *remaining -= 1;
                true
            }
            _ => false,
        };
        if stall {
            tokio::time::sleep(Duration::from_secs(3_600)).await;
        }
        self.reports.lock().push(report.clone());
        Ok(())
    }
}

/// Mailbox holding a fixed set of unread messages
pub struct FakeMailbox {
    unread: Mutex<Vec<InboundMessage>>,
    marked: Mutex<Vec<String>>,
    stall_once: Mutex<Option<String>>,
}

impl FakeMailbox {
    pub fn new(messages: Vec<InboundMessage>) -> Self {
        Self {
            unread: Mutex::new(messages),
            marked: Mutex::new(Vec::new()),
            stall_once: Mutex::new(None),
        }
    }

    /// The first `mark_read` of `message_id` hangs for a minute
    pub fn stalling_mark(self, message_id: &str) -> Self {
        *self.stall_once.lock() = Some(message_id.to_string());
        self
    }

    pub fn marked(&self) -> Vec<String> {
        self.marked.lock().clone()
    }

    pub fn unread_ids(&self) -> Vec<String> {
        self.unread.lock().iter().map(|m| m.id.clone()).collect()
    }
}

#[async_trait]
impl MailboxClient for FakeMailbox {
    async fn fetch_unread(&self, limit: usize) -> Result<Vec<InboundMessage>, ClientError> {
        let unread = self.unread.lock();
        Ok(unread.iter().take(limit).cloned().collect())
    }

    async fn mark_read(&self, message_id: &str) -> Result<(), ClientError> {
        let stall = {
            let mut stall_once = self.stall_once.lock();
            if stall_once.as_deref() == Some(message_id) {
                stall_once.take();
                true
            } else {
                false
            }
        };
        if stall {
            tokio::time::sleep(Duration::from_secs(60)).await;
        }
        self.unread.lock().retain(|m| m.id != message_id);
        self.marked.lock().push(message_id.to_string());
        Ok(())
    }
}

/// Classifier returning one canned answer
pub struct FixedClassifier {
    classification: Classification,
    calls: AtomicU32,
}

impl FixedClassifier {
    pub fn new(classification: Classification) -> Self {
        Self {
            classification,
            calls: AtomicU32::new(0),
        }
    }

    pub fn calls(&self) -> u32 {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl ClassificationClient for FixedClassifier {
    async fn classify(&self, _text: &str) -> Result<Classification, ClientError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        Ok(self.classification.clone())
    }
}

/// Version-control client that fails with a network error a fixed number of times
pub struct FlakyVcs {
    failures: u32,
    sync_calls: AtomicU32,
}

impl FlakyVcs {
    pub fn new(failures: u32) -> Self {
        Self {
            failures,
            sync_calls: AtomicU32::new(0),
        }
    }

    pub fn sync_calls(&self) -> u32 {
        self.sync_calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl VcsIssueClient for FlakyVcs {
    async fn sync_repository(
        &self,
        repository: &str,
        _destination: &Path,
        _instruction: &str,
    ) -> Result<SyncOutcome, ClientError> {
        let call = self.sync_calls.fetch_add(1, Ordering::SeqCst) + 1;
        if call <= self.failures {
            return Err(ClientError::network("vcs", "connection reset by peer"));
        }
        Ok(SyncOutcome {
            repository: repository.to_string(),
            commit: Some(format!("c0ffee{call}")),
            summary: "synced".to_string(),
        })
    }

    async fn mutate_issue(&self, mutation: &IssueMutation) -> Result<IssueReceipt, ClientError> {
        Ok(IssueReceipt {
            key: "OPS-1".to_string(),
            summary: mutation.title.clone(),
        })
    }
}

/// Reply client that answers with a fixed body and records deliveries
#[derive(Default)]
pub struct RecordingReply {
    delivered: Mutex<Vec<(String, String)>>,
}

impl RecordingReply {
    pub fn delivered(&self) -> Vec<(String, String)> {
        self.delivered.lock().clone()
    }
}

#[async_trait]
impl ReplyClient for RecordingReply {
    async fn generate(&self, context: &ReplyContext) -> Result<String, ClientError> {
        Ok(format!("Re: {}", context.message.body))
    }

    async fn deliver(&self, message: &InboundMessage, body: &str) -> Result<(), ClientError> {
        self.delivered
            .lock()
            .push((message.id.clone(), body.to_string()));
        Ok(())
    }
}

/// Handler that never finishes on its own
pub struct HangingHandler {
    pub kind: TaskKind,
}

#[async_trait]
impl TaskHandler for HangingHandler {
    fn task_kind(&self) -> TaskKind {
        self.kind
    }

    async fn handle(&self, _envelope: &TaskEnvelope) -> Result<HandlerOutcome, HandlerError> {
        tokio::time::sleep(Duration::from_secs(3600)).await;
        Ok(HandlerOutcome::completed(serde_json::json!({})))
    }
}

/// Handler that completes immediately and counts its invocations
pub struct CountingHandler {
    pub kind: TaskKind,
    pub calls: AtomicU32,
}

impl CountingHandler {
    pub fn new(kind: TaskKind) -> Self {
        Self {
            kind,
            calls: AtomicU32::new(0),
        }
    }

    pub fn calls(&self) -> u32 {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl TaskHandler for CountingHandler {
    fn task_kind(&self) -> TaskKind {
        self.kind
    }

    async fn handle(&self, envelope: &TaskEnvelope) -> Result<HandlerOutcome, HandlerError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        Ok(HandlerOutcome::completed(envelope.payload().clone()))
    }
}
