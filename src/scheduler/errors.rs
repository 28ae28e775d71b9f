use thiserror::Error;

use crate::config::ConfigurationError;

#[derive(Debug, Error)]
pub enum SchedulerError {
    #[error("Scheduler lock error: {0}")]
    Lock(String),

    #[error("Scheduler database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error(transparent)]
    Configuration(#[from] ConfigurationError),
}
