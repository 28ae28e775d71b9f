//! # Callback Gateway
//!
//! Reports terminal task outcomes to the coordinating service's intake
//! endpoint, exactly once per dedup key under retries and redelivery.

pub mod errors;
pub mod gateway;
pub mod intake_client;
pub mod types;

pub use errors::CallbackError;
pub use gateway::{CallbackGateway, GatewaySettings};
pub use intake_client::{HttpIntakeClient, IntakeClient};
pub use types::{CallbackReport, CallbackStatus, ReportOutcome, ReportSubject};
