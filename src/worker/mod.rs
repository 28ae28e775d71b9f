//! # Worker Pools
//!
//! Queue consumers, handler contract, retry classification and the
//! coordinator that runs one isolated pool per task kind.

pub mod backoff;
pub mod coordinator;
pub mod error_classifier;
pub mod handler;
pub mod ledger;
pub mod pool;

pub use backoff::BackoffPolicy;
pub use coordinator::WorkerCoordinator;
pub use error_classifier::{
    ErrorCategory, ErrorClassification, ErrorClassifier, ErrorContext, FailureDisposition,
    StandardErrorClassifier,
};
pub use handler::{DerivedTask, HandlerError, HandlerOutcome, HandlerRegistry, RegistryError, TaskHandler};
pub use ledger::{CompletionLedger, CompletionRecord, LedgerEntry, PendingReport};
pub use pool::{DrainReport, PoolDependencies, PoolHandle, PoolMetrics, PoolMetricsSnapshot, WorkerPool};
