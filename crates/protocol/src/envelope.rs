use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::{now_ms, types};

/// Errors raised while decoding a frame.
#[derive(Debug, thiserror::Error)]
pub enum ProtocolError {
    #[error("invalid envelope: {0}")]
    Json(#[from] serde_json::Error),
    #[error("payload must be a JSON object, got {0}")]
    PayloadShape(&'static str),
}

// ── Envelope ─────────────────────────────────────────────────────────────────

/// The unit of wire communication.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Envelope {
    #[serde(rename = "type")]
    pub message_type: String,
    /// Correlation token, unique per sender for in-flight requests.
    #[serde(default)]
    pub id: String,
    /// Sender-local milliseconds since epoch.
    #[serde(default)]
    pub timestamp: i64,
    #[serde(default)]
    pub payload: Value,
    /// Id of the request this message answers.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reply_to: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub target: Option<Target>,
    /// Sender metadata some peers attach next to the payload.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub source: Option<Value>,
}

impl Envelope {
    /// New envelope with a fresh correlation id and the current timestamp.
    pub fn new(message_type: impl Into<String>, payload: Value) -> Self {
        Self {
            message_type: message_type.into(),
            id: uuid::Uuid::new_v4().to_string(),
            timestamp: now_ms(),
            payload,
            reply_to: None,
            target: None,
            source: None,
        }
    }

    /// Reply to the request with id `reply_to`.
    pub fn reply(message_type: impl Into<String>, reply_to: impl Into<String>, payload: Value) -> Self {
        Self {
            reply_to: Some(reply_to.into()),
            ..Self::new(message_type, payload)
        }
    }

    /// Heartbeat acknowledgment echoing the ping's id. An empty id gets a
    /// fresh one so the ack is still well-formed.
    pub fn heartbeat_ack(id: &str) -> Self {
        let mut ack = Self::new(types::HEARTBEAT_ACK, Value::Object(Map::new()));
        if !id.is_empty() {
            ack.id = id.to_string();
        }
        ack
    }

    pub fn connection_ack(server_id: &str) -> Self {
        Self::new(
            types::CONNECTION_ACK,
            serde_json::json!({ "serverId": server_id }),
        )
    }

    pub fn with_target(mut self, target: Target) -> Self {
        self.target = Some(target);
        self
    }

    /// Whether this envelope answers an earlier request.
    pub fn is_reply(&self) -> bool {
        self.reply_to.is_some() || types::is_response(&self.message_type)
    }

    /// Payload field as a string, if present and a string.
    pub fn payload_str(&self, key: &str) -> Option<&str> {
        self.payload.get(key).and_then(Value::as_str)
    }

    pub fn encode(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string(self)
    }

    /// Parse one frame. A missing or `null` payload becomes `{}`; any other
    /// non-object payload is rejected.
    pub fn decode(raw: &str) -> Result<Self, ProtocolError> {
        let mut envelope: Envelope = serde_json::from_str(raw)?;
        match &envelope.payload {
            Value::Null => envelope.payload = Value::Object(Map::new()),
            Value::Object(_) => {},
            Value::Bool(_) => return Err(ProtocolError::PayloadShape("bool")),
            Value::Number(_) => return Err(ProtocolError::PayloadShape("number")),
            Value::String(_) => return Err(ProtocolError::PayloadShape("string")),
            Value::Array(_) => return Err(ProtocolError::PayloadShape("array")),
        }
        Ok(envelope)
    }
}

// ── Target ───────────────────────────────────────────────────────────────────

/// Routing hint inside a peer: everyone, or one player.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Target {
    Broadcast,
    Player {
        #[serde(rename = "playerUuid")]
        player_uuid: String,
        #[serde(default, rename = "playerName")]
        player_name: Option<String>,
    },
}

impl Target {
    pub fn player(player_uuid: impl Into<String>) -> Self {
        Self::Player {
            player_uuid: player_uuid.into(),
            player_name: None,
        }
    }
}

// ── Reply status ─────────────────────────────────────────────────────────────

/// Common shape of every response payload: a success flag, a message, and
/// whatever domain fields the peer adds.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ReplyStatus {
    #[serde(default)]
    pub success: bool,
    #[serde(default)]
    pub message: Option<String>,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

impl ReplyStatus {
    pub fn from_payload(payload: Value) -> Result<Self, ProtocolError> {
        Ok(serde_json::from_value(payload)?)
    }
}
