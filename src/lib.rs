#![allow(clippy::doc_markdown)] // Allow technical terms like PostgreSQL, SQLx in docs
#![allow(clippy::missing_errors_doc)] // Allow public functions without # Errors sections
#![allow(clippy::must_use_candidate)] // Allow methods without must_use when context is clear

//! # Courier Core
//!
//! Queue-isolated task dispatch for a coordinating service that turns inbound
//! email, chat messages and scheduled polls into version-control actions,
//! issue-tracker updates and replies.
//!
//! ## Overview
//!
//! Every unit of work travels as a [`messaging::TaskEnvelope`] routed by its
//! kind onto exactly one queue. Each queue is drained by its own worker pool,
//! so a slow or failing kind never starves another. Terminal outcomes are
//! reported back to the coordinating service through the callback gateway,
//! exactly once per deduplication key.
//!
//! ```text
//! EmailPoll ───┐
//!              ├─▶ Classify ──▶ GitJiraExecute ──▶ ReplyGitJiraGenerate
//! SlackDispatch┘        │              └──────▶ FileServe (git actions)
//!                       └──▶ ReplyGenerate
//! ```
//!
//! ## Module Organization
//!
//! - [`messaging`] - Envelopes, static queue routing and the broker abstraction
//! - [`worker`] - Per-kind worker pools, retry classification and backoff
//! - [`scheduler`] - Interval and cron root events under a single-instance lock
//! - [`callback`] - Outcome reporting to the coordinating service
//! - [`handlers`] - One handler per task kind
//! - [`clients`] - Ports for external collaborators and their HTTP client
//! - [`config`] - Layered configuration
//! - [`bootstrap`] - Assembly and lifecycle of a running system
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use courier_core::bootstrap::DispatchSystem;
//! use courier_core::config::ConfigManager;
//! use courier_core::messaging::TaskKind;
//! use serde_json::json;
//!
//! # async fn example() -> Result<(), Box<dyn std::error::Error>> {
//! let config_manager = ConfigManager::global()?;
//! let system = DispatchSystem::bootstrap(config_manager).await?;
//!
//! system
//!     .submit(
//!         TaskKind::SlackDispatch,
//!         json!({"user": "U1", "text": "hello", "channel": "C1", "ts": "1.0"}),
//!     )
//!     .await?;
//!
//! system.shutdown().await;
//! # Ok(())
//! # }
//! ```

pub mod bootstrap;
pub mod callback;
pub mod clients;
pub mod config;
pub mod constants;
pub mod error;
pub mod handlers;
pub mod logging;
pub mod messaging;
pub mod preview;
mod retention;
pub mod scheduler;
pub mod state_machine;
pub mod worker;

pub use bootstrap::{Collaborators, DispatchSystem, ShutdownReport, SystemStatus};
pub use config::{ConfigManager, CourierConfig};
pub use error::{CourierError, Result};
pub use messaging::{CorrelationId, DedupKey, EnvelopePublisher, QueueRouter, TaskEnvelope, TaskKind};
