use thiserror::Error;

#[derive(Debug, Clone, Error)]
pub enum CallbackError {
    /// The whole report, retries included, did not finish in time
    #[error("Callback report timed out after {timeout_ms}ms")]
    Timeout { timeout_ms: u64 },

    /// Connection failure or a 5xx; worth another attempt
    #[error("Callback transport error: {message}")]
    Transport { message: String },

    /// The intake endpoint refused the report (4xx)
    #[error("Callback rejected with HTTP {status}: {message}")]
    Rejected { status: u16, message: String },

    #[error("Callback client configuration error: {message}")]
    Configuration { message: String },
}

impl CallbackError {
    pub fn transport(message: impl Into<String>) -> Self {
        Self::Transport {
            message: message.into(),
        }
    }

    pub fn rejected(status: u16, message: impl Into<String>) -> Self {
        Self::Rejected {
            status,
            message: message.into(),
        }
    }

    pub fn configuration(message: impl Into<String>) -> Self {
        Self::Configuration {
            message: message.into(),
        }
    }

    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::Transport { .. })
    }
}
