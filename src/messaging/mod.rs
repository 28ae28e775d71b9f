//! # Messaging Module
//!
//! Task envelopes, static queue routing, and the broker abstraction that
//! carries envelopes between producers and worker pools.

pub mod envelope;
pub mod errors;
pub mod publisher;
pub mod router;
pub mod service;

pub use envelope::{CorrelationId, DedupKey, TaskEnvelope, TaskKind};
pub use errors::MessagingError;
pub use publisher::{EnvelopePublisher, PublishReceipt};
pub use router::{QueueName, QueueRouter, RoutingTable};

pub type MessagingResult<T> = Result<T, MessagingError>;
