//! Completion ledger: what is already known about each dedup key.
//!
//! Shared by every pool in the process. A key is either completed (its
//! terminal report went out, or was given up on) or awaiting its report, in
//! which case the handler already ran and its derived envelopes are
//! published, so a redelivery only retries the report.

use std::time::Duration;

use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use serde_json::Value;
use tokio::time::Instant;

use crate::callback::CallbackStatus;
use crate::constants::defaults;
use crate::messaging::DedupKey;
use crate::retention::{Aged, RetentionWindow};
use crate::state_machine::AckOutcome;

/// Terminal report owed for a key whose side effects are done
#[derive(Debug, Clone, PartialEq)]
pub struct PendingReport {
    pub status: CallbackStatus,
    pub payload: Value,
}

impl PendingReport {
    pub fn outcome(&self) -> AckOutcome {
        match self.status {
            CallbackStatus::Success => AckOutcome::Success,
            CallbackStatus::Failure => AckOutcome::FailureReported,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum LedgerEntry {
    AwaitingReport(PendingReport),
    Completed(AckOutcome),
}

#[derive(Debug, Clone, PartialEq)]
pub struct CompletionRecord {
    pub entry: LedgerEntry,
    pub recorded_at: Instant,
}

impl Aged for CompletionRecord {
    fn touched_at(&self) -> Instant {
        self.recorded_at
    }
}

#[derive(Debug)]
pub struct CompletionLedger {
    records: DashMap<DedupKey, CompletionRecord>,
    window: RetentionWindow,
}

impl Default for CompletionLedger {
    fn default() -> Self {
        Self::with_retention(Duration::from_secs(defaults::DEDUP_RETENTION_SECONDS))
    }
}

impl CompletionLedger {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_retention(retention: Duration) -> Self {
        Self {
            records: DashMap::new(),
            window: RetentionWindow::new(retention),
        }
    }

    pub fn retention(&self) -> Duration {
        self.window.retention()
    }

    pub fn is_completed(&self, key: &DedupKey) -> bool {
        self.records
            .get(key)
            .is_some_and(|record| matches!(record.entry, LedgerEntry::Completed(_)))
    }

    pub fn get(&self, key: &DedupKey) -> Option<CompletionRecord> {
        self.records.get(key).map(|record| record.clone())
    }

    /// Report still owed for `key`, if its handler already ran
    pub fn pending_report(&self, key: &DedupKey) -> Option<PendingReport> {
        self.records.get(key).and_then(|record| match &record.entry {
            LedgerEntry::AwaitingReport(pending) => Some(pending.clone()),
            LedgerEntry::Completed(_) => None,
        })
    }

    /// Remember an owed report; never downgrades a completed key
    pub fn record_pending(&self, key: DedupKey, report: PendingReport) {
        self.window.sweep(&self.records);
        match self.records.entry(key) {
            Entry::Occupied(mut entry) => {
                if let LedgerEntry::AwaitingReport(_) = entry.get().entry {
                    entry.insert(CompletionRecord {
                        entry: LedgerEntry::AwaitingReport(report),
                        recorded_at: Instant::now(),
                    });
                }
            }
            Entry::Vacant(entry) => {
                entry.insert(CompletionRecord {
                    entry: LedgerEntry::AwaitingReport(report),
                    recorded_at: Instant::now(),
                });
            }
        }
    }

    /// Record a terminal outcome; the first completion for a key wins
    pub fn record(&self, key: DedupKey, outcome: AckOutcome) -> bool {
        self.window.sweep(&self.records);
        let completed = CompletionRecord {
            entry: LedgerEntry::Completed(outcome),
            recorded_at: Instant::now(),
        };
        match self.records.entry(key) {
            Entry::Occupied(mut entry) => match entry.get().entry {
                LedgerEntry::Completed(_) => false,
                LedgerEntry::AwaitingReport(_) => {
                    entry.insert(completed);
                    true
                }
            },
            Entry::Vacant(entry) => {
                entry.insert(completed);
                true
            }
        }
    }

    /// Drop every record older than the retention window now
    pub fn evict_expired(&self) -> usize {
        self.window.evict(&self.records, Instant::now())
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }
}
