//! Error types for the Pek client.

use crate::config::ClientConfigError;
use pek_core::{DecodeError, EarlyTerminationError, TaskError};
use std::time::Duration;
use thiserror::Error;

/// Errors that can occur when using the Pek client.
#[derive(Debug, Error)]
pub enum ClientError {
    /// The requested dataset is not served by the connected server.
    #[error("the dataset with name='{0}' does not exist")]
    DatasetNotFound(String),

    /// Unknown dataset attribute.
    #[error("invalid key='{key}'. Must be in [{allowed}]")]
    InvalidDatasetKey {
        /// Key that was asked for.
        key: String,
        /// Comma-separated list of valid keys.
        allowed: String,
    },

    /// Server answered a request with `error: true`.
    #[error("server error on '{event}': {message}")]
    Remote {
        /// Event that was sent.
        event: String,
        /// Message provided by the server.
        message: String,
    },

    /// No acknowledgement within the configured request timeout.
    #[error("request '{event}' timed out after {after:?}")]
    Timeout {
        /// Event that was sent.
        event: String,
        /// Configured timeout.
        after: Duration,
    },

    /// Server response did not have the expected shape.
    #[error("invalid response: {0}")]
    InvalidResponse(String),

    /// Connection-level failure (handshake, closed socket, protocol violation).
    #[error("connection error: {0}")]
    Connection(String),

    /// WebSocket transport failure.
    #[error("WebSocket error: {0}")]
    WebSocket(#[from] tokio_tungstenite::tungstenite::Error),

    /// Task configuration or lifecycle precondition failed.
    #[error(transparent)]
    Task(#[from] TaskError),

    /// Early terminator construction failed.
    #[error(transparent)]
    EarlyTermination(#[from] EarlyTerminationError),

    /// Partial result could not be decoded.
    #[error(transparent)]
    Decode(#[from] DecodeError),

    /// Configuration could not be loaded.
    #[error(transparent)]
    Config(#[from] ClientConfigError),

    /// JSON (de)serialisation failed.
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

/// Result type for client operations.
pub type Result<T> = std::result::Result<T, ClientError>;

#[cfg(test)]
mod tests {
    use super::*;
    use pek_core::TaskId;

    #[test]
    fn test_task_error_conversion() {
        let err: ClientError = TaskError::AlreadyStarted { task_id: TaskId::from("t-1") }.into();
        match err {
            ClientError::Task(TaskError::AlreadyStarted { task_id }) => assert_eq!(task_id.as_str(), "t-1"),
            other => panic!("Expected Task error variant, got {other:?}"),
        }
    }

    #[test]
    fn test_remote_error_display() {
        let err = ClientError::Remote { event: "pause-task".to_string(), message: "no such task".to_string() };
        let msg = err.to_string();
        assert!(msg.contains("pause-task"));
        assert!(msg.contains("no such task"));
    }

    #[test]
    fn test_dataset_not_found_display() {
        let err = ClientError::DatasetNotFound("Unknown".to_string());
        assert_eq!(err.to_string(), "the dataset with name='Unknown' does not exist");
    }
}
