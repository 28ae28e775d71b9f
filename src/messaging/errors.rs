//! # Messaging Error Types
//!
//! Structured error handling for the broker layer using thiserror
//! instead of `Box<dyn Error>` patterns.

use thiserror::Error;

/// Messaging error types
#[derive(Error, Debug)]
pub enum MessagingError {
    #[error("Database connection error: {message}")]
    DatabaseConnection { message: String },

    #[error("Database query error: {operation}: {message}")]
    DatabaseQuery { operation: String, message: String },

    #[error("Queue operation failed: {queue_name}: {operation}: {message}")]
    QueueOperation {
        queue_name: String,
        operation: String,
        message: String,
    },

    #[error("Queue not found: {queue_name}")]
    QueueNotFound { queue_name: String },

    #[error("Message not found: {queue_name}: {message_id}")]
    MessageNotFound {
        queue_name: String,
        message_id: String,
    },

    #[error("Message serialization error: {message}")]
    MessageSerialization { message: String },

    #[error("Message deserialization error: {message}")]
    MessageDeserialization { message: String },

    #[error("Unknown task kind: {value}")]
    UnknownTaskKind { value: String },

    #[error("Routing mismatch: {task_kind} must be published to {expected}, found {actual}")]
    RoutingMismatch {
        task_kind: String,
        expected: String,
        actual: String,
    },

    #[error("Network timeout: operation {operation} timed out after {timeout_ms}ms")]
    Timeout { operation: String, timeout_ms: u64 },

    #[error("Connection pool exhausted: {message}")]
    PoolExhausted { message: String },

    #[error("Internal messaging error: {message}")]
    Internal { message: String },
}

impl MessagingError {
    /// Create a database connection error
    pub fn database_connection(message: impl Into<String>) -> Self {
        Self::DatabaseConnection {
            message: message.into(),
        }
    }

    /// Create a database query error
    pub fn database_query(operation: impl Into<String>, message: impl Into<String>) -> Self {
        Self::DatabaseQuery {
            operation: operation.into(),
            message: message.into(),
        }
    }

    /// Create a queue operation error
    pub fn queue_operation(
        queue_name: impl Into<String>,
        operation: impl Into<String>,
        message: impl Into<String>,
    ) -> Self {
        Self::QueueOperation {
            queue_name: queue_name.into(),
            operation: operation.into(),
            message: message.into(),
        }
    }

    /// Create a queue not found error
    pub fn queue_not_found(queue_name: impl Into<String>) -> Self {
        Self::QueueNotFound {
            queue_name: queue_name.into(),
        }
    }

    /// Create a message not found error (already acked, or a stale handle)
    pub fn message_not_found(queue_name: impl Into<String>, message_id: impl Into<String>) -> Self {
        Self::MessageNotFound {
            queue_name: queue_name.into(),
            message_id: message_id.into(),
        }
    }

    /// Create a message serialization error
    pub fn serialization(message: impl Into<String>) -> Self {
        Self::MessageSerialization {
            message: message.into(),
        }
    }

    /// Create a message deserialization error
    pub fn deserialization(message: impl Into<String>) -> Self {
        Self::MessageDeserialization {
            message: message.into(),
        }
    }

    /// Create an unknown task kind error
    pub fn unknown_task_kind(value: impl Into<String>) -> Self {
        Self::UnknownTaskKind {
            value: value.into(),
        }
    }

    /// Create a timeout error
    pub fn timeout(operation: impl Into<String>, timeout_ms: u64) -> Self {
        Self::Timeout {
            operation: operation.into(),
            timeout_ms,
        }
    }

    /// Create an internal error
    pub fn internal(message: impl Into<String>) -> Self {
        Self::Internal {
            message: message.into(),
        }
    }

    /// Whether retrying the same broker operation later could succeed
    pub fn is_transient(&self) -> bool {
        matches!(
            self,
            Self::DatabaseConnection { .. }
                | Self::DatabaseQuery { .. }
                | Self::QueueOperation { .. }
                | Self::Timeout { .. }
                | Self::PoolExhausted { .. }
        )
    }
}

/// Conversion from sqlx::Error to MessagingError
impl From<sqlx::Error> for MessagingError {
    fn from(err: sqlx::Error) -> Self {
        match err {
            sqlx::Error::Database(db_err) => {
                MessagingError::database_query("database", db_err.to_string())
            }
            sqlx::Error::PoolTimedOut => MessagingError::timeout("database_pool", 30_000),
            sqlx::Error::PoolClosed => MessagingError::PoolExhausted {
                message: "Database pool is closed".to_string(),
            },
            sqlx::Error::Io(io_err) => MessagingError::database_connection(io_err.to_string()),
            sqlx::Error::Tls(tls_err) => MessagingError::database_connection(tls_err.to_string()),
            other => MessagingError::database_query("query", other.to_string()),
        }
    }
}

impl From<serde_json::Error> for MessagingError {
    fn from(err: serde_json::Error) -> Self {
        MessagingError::serialization(err.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_transient_classification() {
        assert!(MessagingError::timeout("publish", 500).is_transient());
        assert!(MessagingError::database_connection("refused").is_transient());
        assert!(!MessagingError::unknown_task_kind("bogus").is_transient());
        assert!(!MessagingError::message_not_found("email_queue", "7").is_transient());
    }

    #[test]
    fn test_error_display() {
        let err = MessagingError::RoutingMismatch {
            task_kind: "classify".to_string(),
            expected: "intent_classifier_queue".to_string(),
            actual: "reply_queue".to_string(),
        };
        assert_eq!(
            err.to_string(),
            "Routing mismatch: classify must be published to intent_classifier_queue, found reply_queue"
        );
    }
}
