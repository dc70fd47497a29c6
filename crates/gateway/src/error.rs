use std::time::Duration;

use mcbridge_protocol::ProtocolError;

use crate::auth::AuthRejection;

/// Failures surfaced by the gateway core.
///
/// Correlation errors (`NotConnected`, `Timeout`, `ConnectionLost`) are
/// returned to callers. `Malformed` and `HandlerFailed` are logged by the
/// dispatch layer and never leave it.
#[derive(Debug, thiserror::Error)]
pub enum GatewayError {
    #[error("server not connected: {server_id} (connected: {})", describe_connected(.connected))]
    NotConnected {
        server_id: String,
        connected: Vec<String>,
    },

    #[error("unauthorized: {0}")]
    Unauthorized(AuthRejection),

    #[error("request {request_type} to {server_id} timed out after {timeout:?}")]
    Timeout {
        server_id: String,
        request_type: String,
        timeout: Duration,
    },

    #[error("connection to {server_id} lost before {request_type} was answered")]
    ConnectionLost {
        server_id: String,
        request_type: String,
    },

    #[error("malformed message: {0}")]
    Malformed(#[from] ProtocolError),

    #[error("handler for {message_type} failed: {reason}")]
    HandlerFailed {
        message_type: String,
        reason: String,
    },

    #[error("handler already registered for message type {0}")]
    DuplicateHandler(String),

    #[error("message type {0} is reserved for the gateway")]
    ReservedType(String),

    #[error("failed to encode envelope: {0}")]
    Encode(#[from] serde_json::Error),
}

fn describe_connected(connected: &[String]) -> String {
    if connected.is_empty() {
        "none".to_string()
    } else {
        connected.join(", ")
    }
}

pub type Result<T, E = GatewayError> = std::result::Result<T, E>;
