//! The transport seam between the client and a Pek server.
//!
//! A connection offers two things: a request/acknowledge call and a single
//! stream of server-pushed messages, each tagged with a topic. Partial results
//! arrive on that stream with the task id as topic.

use crate::error::{ClientError, Result};
use async_trait::async_trait;
use serde::Deserialize;
use serde_json::Value;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tracing::{debug, warn};

/// A message pushed by the server outside of any request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InboundMessage {
    /// Event name the server emitted on. Task updates use the task id.
    pub topic: String,
    /// Raw payload. Not necessarily valid JSON (see `pek_core::normalize_non_finite`).
    pub payload: String,
}

/// Bidirectional channel to a Pek server.
#[async_trait]
pub trait Connection: Send + Sync {
    /// Identity the server knows this client by.
    fn id(&self) -> &str;

    /// Sends one event and waits for the server's acknowledgement.
    ///
    /// Returns the raw acknowledgement; envelope handling is done by the caller.
    async fn request(&self, event: &str, payload: Option<Value>) -> Result<Value>;

    /// Hands out the stream of pushed messages. Only the first call gets it.
    fn take_inbound(&self) -> Option<mpsc::UnboundedReceiver<InboundMessage>>;

    /// Closes the connection. Pending and later requests fail.
    async fn close(&self) -> Result<()>;
}

/// Response envelope used by every request.
#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
struct ResponseEnvelope {
    #[serde(default)]
    error: Option<bool>,
    #[serde(default)]
    error_message: Option<String>,
    #[serde(default)]
    data: Option<Value>,
}

/// Unwraps a response envelope into its `data` payload.
///
/// String data is parsed as JSON when possible; structured data is used as is.
pub(crate) fn unwrap_envelope(event: &str, response: Value) -> Result<Value> {
    if !response.is_object() {
        warn!(event = %event, response = %response, "Response is not an envelope");
        return Ok(Value::Null);
    }

    let envelope: ResponseEnvelope = serde_json::from_value(response)?;
    if envelope.error.unwrap_or(false) {
        return Err(ClientError::Remote {
            event: event.to_string(),
            message: envelope.error_message.unwrap_or_else(|| "unknown server error".to_string()),
        });
    }

    match envelope.data {
        None | Some(Value::Null) => Ok(Value::Null),
        Some(Value::String(text)) => match serde_json::from_str(&text) {
            Ok(parsed) => Ok(parsed),
            Err(e) => {
                warn!(event = %event, error = %e, "Response data is a string but not JSON");
                Ok(Value::String(text))
            }
        },
        Some(data @ (Value::Object(_) | Value::Array(_))) => Ok(data),
        Some(other) => {
            warn!(event = %event, data = %other, "Unexpected response data type");
            Ok(other)
        }
    }
}

/// Request side shared by the client, its datasets and its tasks.
pub(crate) struct Session {
    connection: Arc<dyn Connection>,
    request_timeout: Option<Duration>,
}

impl Session {
    pub(crate) fn new(connection: Arc<dyn Connection>, request_timeout: Option<Duration>) -> Self {
        Self { connection, request_timeout }
    }

    pub(crate) fn client_id(&self) -> &str {
        self.connection.id()
    }

    pub(crate) fn connection(&self) -> &Arc<dyn Connection> {
        &self.connection
    }

    /// Sends a request, bounded by the request timeout, and unwraps the envelope.
    pub(crate) async fn send(&self, event: &str, payload: Option<Value>) -> Result<Value> {
        debug!(event = %event, "Sending request");

        let pending = self.connection.request(event, payload);
        let response = match self.request_timeout {
            Some(after) => tokio::time::timeout(after, pending)
                .await
                .map_err(|_| ClientError::Timeout { event: event.to_string(), after })??,
            None => pending.await?,
        };

        unwrap_envelope(event, response)
    }
}
