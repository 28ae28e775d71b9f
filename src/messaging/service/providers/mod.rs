//! # Broker Providers
//!
//! - [`InMemoryBroker`]: process-local queues for tests and single-node runs
//! - [`PgBroker`]: durable queues on a PostgreSQL table

mod in_memory;
mod postgres;

pub use in_memory::{InMemoryBroker, InMemoryQueueCounters};
pub use postgres::PgBroker;
