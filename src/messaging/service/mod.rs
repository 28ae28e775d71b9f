//! # Broker Abstraction
//!
//! Provider-agnostic queue operations with enum dispatch over the shipped
//! providers.
//!
//! ## Architecture
//!
//! ```text
//! BrokerProvider (enum)         <- static dispatch, selected by configuration
//!   ├── InMemory(InMemoryBroker)
//!   └── Postgres(PgBroker)
//!
//! consume(broker, queue, ..)    <- lazy DeliveryStream over Broker::receive
//! ```
//!
//! ## Usage
//!
//! ```ignore
//! let provider = Arc::new(BrokerProvider::from_config(&config.broker).await?);
//! provider.ensure_queues(&router.queue_names()).await?;
//!
//! let mut deliveries = consume(provider.clone(), queue, ConsumeOptions::default(), shutdown_rx);
//! while let Some(delivery) = deliveries.next().await {
//!     let delivery = delivery?;
//!     // handle, then ack or nack
//!     provider.ack(&delivery.handle).await?;
//! }
//! ```

mod consumer;
mod provider;
pub mod providers;
mod traits;
mod types;

pub use consumer::{consume, ConsumeOptions, DeliveryStream};
pub(crate) use consumer::wait_for_shutdown;
pub use provider::BrokerProvider;
pub use providers::{InMemoryBroker, InMemoryQueueCounters, PgBroker};
pub use traits::Broker;
pub use types::{AckHandle, Delivery, MessageId, QueueHealthReport, QueueStats};

pub use super::errors::MessagingError;
