use serde_json::json;
use thiserror::Error;

use crate::worker::HandlerError;

/// Failure talking to an external collaborator
#[derive(Debug, Clone, Error)]
pub enum ClientError {
    #[error("{service}: invalid credentials: {message}")]
    InvalidCredentials { service: String, message: String },

    #[error("{service}: not found: {message}")]
    NotFound { service: String, message: String },

    #[error("{service}: rate limited: {message}")]
    RateLimited { service: String, message: String },

    #[error("{service}: unavailable (HTTP {status}): {message}")]
    Unavailable {
        service: String,
        status: u16,
        message: String,
    },

    #[error("{service}: network error: {message}")]
    Network { service: String, message: String },

    #[error("{service}: invalid request (HTTP {status}): {message}")]
    InvalidRequest {
        service: String,
        status: u16,
        message: String,
    },

    #[error("{service}: unexpected response: {message}")]
    InvalidResponse { service: String, message: String },

    #[error("Client configuration error: {message}")]
    Configuration { message: String },
}

impl ClientError {
    /// Map a non-success HTTP status onto the error taxonomy
    pub fn from_status(service: &str, status: u16, message: impl Into<String>) -> Self {
        let service = service.to_string();
        let message = message.into();
        match status {
            401 | 403 => Self::InvalidCredentials { service, message },
            404 => Self::NotFound { service, message },
            429 => Self::RateLimited { service, message },
            500..=599 => Self::Unavailable {
                service,
                status,
                message,
            },
            _ => Self::InvalidRequest {
                service,
                status,
                message,
            },
        }
    }

    pub fn network(service: &str, message: impl Into<String>) -> Self {
        Self::Network {
            service: service.to_string(),
            message: message.into(),
        }
    }

    pub fn invalid_response(service: &str, message: impl Into<String>) -> Self {
        Self::InvalidResponse {
            service: service.to_string(),
            message: message.into(),
        }
    }

    pub fn is_transient(&self) -> bool {
        matches!(
            self,
            Self::RateLimited { .. } | Self::Unavailable { .. } | Self::Network { .. }
        )
    }

    fn reason(&self) -> &'static str {
        match self {
            Self::InvalidCredentials { .. } => "invalid_credentials",
            Self::NotFound { .. } => "not_found",
            Self::RateLimited { .. } => "rate_limited",
            Self::Unavailable { .. } => "unavailable",
            Self::Network { .. } => "network",
            Self::InvalidRequest { .. } => "invalid_request",
            Self::InvalidResponse { .. } => "invalid_response",
            Self::Configuration { .. } => "configuration_error",
        }
    }
}

impl From<ClientError> for HandlerError {
    fn from(err: ClientError) -> Self {
        match &err {
            ClientError::Network { .. } => HandlerError::network(err.to_string()),
            ClientError::RateLimited { .. } => HandlerError::rate_limited(err.to_string()),
            ClientError::Unavailable { .. } => HandlerError::transient(err.to_string()),
            ClientError::Configuration { .. } => HandlerError::configuration(err.to_string()),
            _ => HandlerError::permanent_with_info(
                err.to_string(),
                json!({
                    "reason": err.reason(),
                    "message": err.to_string(),
                }),
            ),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::worker::ErrorCategory;

    #[test]
    fn test_status_mapping() {
        assert!(matches!(
            ClientError::from_status("vcs", 401, ""),
            ClientError::InvalidCredentials { .. }
        ));
        assert!(matches!(
            ClientError::from_status("vcs", 403, ""),
            ClientError::InvalidCredentials { .. }
        ));
        assert!(matches!(
            ClientError::from_status("vcs", 404, ""),
            ClientError::NotFound { .. }
        ));
        assert!(matches!(
            ClientError::from_status("vcs", 429, ""),
            ClientError::RateLimited { .. }
        ));
        assert!(matches!(
            ClientError::from_status("vcs", 503, ""),
            ClientError::Unavailable { status: 503, .. }
        ));
        assert!(matches!(
            ClientError::from_status("vcs", 422, ""),
            ClientError::InvalidRequest { status: 422, .. }
        ));
    }

    #[test]
    fn test_transient_partition_survives_conversion() {
        let cases = [
            (ClientError::network("mailbox", "reset"), ErrorCategory::Network),
            (ClientError::from_status("mailbox", 429, "slow down"), ErrorCategory::RateLimit),
            (ClientError::from_status("mailbox", 502, "bad gateway"), ErrorCategory::Transient),
            (ClientError::from_status("mailbox", 404, "gone"), ErrorCategory::Permanent),
            (ClientError::from_status("mailbox", 401, "expired"), ErrorCategory::Permanent),
        ];
        for (client_error, expected) in cases {
            assert_eq!(client_error.is_transient(), expected.is_retryable());
            assert_eq!(HandlerError::from(client_error).category(), expected);
        }
    }

    #[test]
    fn test_permanent_conversion_keeps_reason() {
        match HandlerError::from(ClientError::from_status("vcs", 404, "no such repo")) {
            HandlerError::Permanent { error_info, .. } => {
                assert_eq!(error_info["reason"], "not_found");
            }
            other => panic!("unexpected {other:?}"),
        }
    }
}
