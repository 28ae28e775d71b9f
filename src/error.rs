use thiserror::Error;

use crate::callback::CallbackError;
use crate::clients::ClientError;
use crate::config::ConfigurationError;
use crate::messaging::MessagingError;
use crate::preview::PreviewError;
use crate::scheduler::SchedulerError;
use crate::state_machine::StateMachineError;
use crate::worker::RegistryError;

/// Top-level error for system assembly and the public entry points
#[derive(Debug, Error)]
pub enum CourierError {
    #[error("Messaging error: {0}")]
    Messaging(#[from] MessagingError),

    #[error("Configuration error: {0}")]
    Configuration(#[from] ConfigurationError),

    #[error("Callback error: {0}")]
    Callback(#[from] CallbackError),

    #[error("Scheduler error: {0}")]
    Scheduler(#[from] SchedulerError),

    #[error("Handler registry error: {0}")]
    Registry(#[from] RegistryError),

    #[error("Collaborator client error: {0}")]
    Client(#[from] ClientError),

    #[error("Preview error: {0}")]
    Preview(#[from] PreviewError),

    #[error("State transition error: {0}")]
    StateTransition(#[from] StateMachineError),

    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),
}

pub type Result<T> = std::result::Result<T, CourierError>;
