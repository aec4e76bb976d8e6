//! The message envelope: an open `type` tag plus a JSON payload.
//!
//! Inbound text frames are parsed into [`Envelope`] without committing to a
//! tag enum, so an unrecognized tag reaches the dispatch table intact and
//! can be rejected there (drop the message, keep the connection). Typed
//! payload structs give handlers a checked view of the fields they need.

use crate::version::ProtocolVersion;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use thiserror::Error;

/// The closed message vocabulary.
///
/// This module is the authoritative list of every tag the system speaks.
/// The coordinator's dispatch table and the player's inbound match are both
/// built from these constants; nothing else registers handlers at runtime.
pub mod tags {
    /// Device → coordinator: registration handshake.
    pub const REGISTER: &str = "REGISTER";
    /// Device → coordinator: periodic liveness signal.
    pub const HEARTBEAT: &str = "HEARTBEAT";
    /// Device → coordinator: application-level state report.
    pub const STATUS: &str = "STATUS";

    /// Coordinator → device: registration accepted.
    pub const REGISTER_ACK: &str = "REGISTER_ACK";
    /// Coordinator → device: registration refused.
    pub const REGISTER_REJECTED: &str = "REGISTER_REJECTED";
    /// Coordinator → device: named command with parameters.
    pub const COMMAND: &str = "COMMAND";
    /// Coordinator → device: new content assignment.
    pub const CONTENT_UPDATE: &str = "CONTENT_UPDATE";
    /// Coordinator → device: non-fatal error report.
    pub const ERROR: &str = "ERROR";
}

/// Maximum accepted size of a single serialized envelope (1 MB).
pub const MAX_ENVELOPE_BYTES: usize = 1_048_576;

// ============================================================================
// Envelope
// ============================================================================

/// One unit of application-level communication.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Envelope {
    /// Message tag. Open string on purpose; see module docs.
    #[serde(rename = "type")]
    pub tag: String,

    /// Type-specific fields, flattened on the wire.
    #[serde(flatten)]
    pub payload: Map<String, Value>,
}

impl Envelope {
    /// Builds an envelope from a tag and a payload value.
    ///
    /// Non-object payloads are wrapped under a `"payload"` key so the wire
    /// shape stays a flat object.
    pub fn new(tag: impl Into<String>, payload: Value) -> Self {
        let payload = match payload {
            Value::Object(map) => map,
            Value::Null => Map::new(),
            other => {
                let mut map = Map::new();
                map.insert("payload".to_string(), other);
                map
            }
        };
        Self {
            tag: tag.into(),
            payload,
        }
    }

    /// Parses an envelope from a raw text frame.
    ///
    /// Fails with [`EnvelopeError::Malformed`] when the frame is not a JSON
    /// object with a non-empty `type` string, and with
    /// [`EnvelopeError::TooLarge`] past the size bound.
    pub fn from_json(raw: &str) -> Result<Self, EnvelopeError> {
        if raw.len() > MAX_ENVELOPE_BYTES {
            return Err(EnvelopeError::TooLarge {
                size: raw.len(),
                max: MAX_ENVELOPE_BYTES,
            });
        }

        let envelope: Envelope =
            serde_json::from_str(raw).map_err(|e| EnvelopeError::Malformed(e.to_string()))?;

        if envelope.tag.is_empty() {
            return Err(EnvelopeError::Malformed("empty type tag".to_string()));
        }

        Ok(envelope)
    }

    /// Serializes the envelope to its wire form.
    pub fn to_json(&self) -> Result<String, EnvelopeError> {
        serde_json::to_string(self).map_err(|e| EnvelopeError::Serialize(e.to_string()))
    }

    /// Deserializes the payload into a typed struct.
    pub fn parse_payload<T: DeserializeOwned>(&self) -> Result<T, EnvelopeError> {
        serde_json::from_value(Value::Object(self.payload.clone()))
            .map_err(|e| EnvelopeError::Payload {
                tag: self.tag.clone(),
                reason: e.to_string(),
            })
    }

    /// Convenience accessor for a string payload field.
    pub fn payload_str(&self, key: &str) -> Option<&str> {
        self.payload.get(key).and_then(Value::as_str)
    }

    // ------------------------------------------------------------------------
    // Builders: device → coordinator
    // ------------------------------------------------------------------------

    /// REGISTER: opens the application-level handshake.
    pub fn register(
        device_id: impl Into<String>,
        display_name: impl Into<String>,
        credential: Option<String>,
    ) -> Self {
        let mut payload = Map::new();
        payload.insert(
            "protocol_version".to_string(),
            serde_json::to_value(ProtocolVersion::CURRENT).unwrap_or(Value::Null),
        );
        payload.insert("device_id".to_string(), Value::String(device_id.into()));
        payload.insert(
            "display_name".to_string(),
            Value::String(display_name.into()),
        );
        if let Some(credential) = credential {
            payload.insert("credential".to_string(), Value::String(credential));
        }
        Self {
            tag: tags::REGISTER.to_string(),
            payload,
        }
    }

    /// HEARTBEAT: periodic liveness signal with an optional state snapshot.
    pub fn heartbeat(device_id: impl Into<String>, state: Option<String>) -> Self {
        let mut payload = Map::new();
        payload.insert("device_id".to_string(), Value::String(device_id.into()));
        if let Some(state) = state {
            payload.insert("state".to_string(), Value::String(state));
        }
        Self {
            tag: tags::HEARTBEAT.to_string(),
            payload,
        }
    }

    /// STATUS: free-form application report forwarded to collaborators.
    pub fn status(device_id: impl Into<String>, data: Value) -> Self {
        let mut payload = Map::new();
        payload.insert("device_id".to_string(), Value::String(device_id.into()));
        payload.insert("data".to_string(), data);
        Self {
            tag: tags::STATUS.to_string(),
            payload,
        }
    }

    // ------------------------------------------------------------------------
    // Builders: coordinator → device
    // ------------------------------------------------------------------------

    /// REGISTER_ACK: registration accepted; carries the heartbeat cadence
    /// the coordinator expects.
    pub fn register_ack(device_id: impl Into<String>, heartbeat_interval_secs: u64) -> Self {
        let mut payload = Map::new();
        payload.insert("device_id".to_string(), Value::String(device_id.into()));
        payload.insert(
            "heartbeat_interval_secs".to_string(),
            Value::from(heartbeat_interval_secs),
        );
        Self {
            tag: tags::REGISTER_ACK.to_string(),
            payload,
        }
    }

    /// REGISTER_REJECTED: registration refused with a reason.
    pub fn register_rejected(reason: impl Into<String>) -> Self {
        let mut payload = Map::new();
        payload.insert("reason".to_string(), Value::String(reason.into()));
        Self {
            tag: tags::REGISTER_REJECTED.to_string(),
            payload,
        }
    }

    /// COMMAND: named command with opaque parameters.
    pub fn command(name: impl Into<String>, params: Value) -> Self {
        let mut payload = Map::new();
        payload.insert("name".to_string(), Value::String(name.into()));
        payload.insert("params".to_string(), params);
        Self {
            tag: tags::COMMAND.to_string(),
            payload,
        }
    }

    /// CONTENT_UPDATE: opaque content reference.
    pub fn content_update(content_ref: impl Into<String>) -> Self {
        let mut payload = Map::new();
        payload.insert("content_ref".to_string(), Value::String(content_ref.into()));
        Self {
            tag: tags::CONTENT_UPDATE.to_string(),
            payload,
        }
    }

    /// ERROR: non-fatal error report; the connection stays open.
    pub fn error(message: impl Into<String>, code: Option<String>) -> Self {
        let mut payload = Map::new();
        payload.insert("message".to_string(), Value::String(message.into()));
        if let Some(code) = code {
            payload.insert("code".to_string(), Value::String(code));
        }
        Self {
            tag: tags::ERROR.to_string(),
            payload,
        }
    }
}

// ============================================================================
// Typed Payloads
// ============================================================================

/// REGISTER payload.
#[derive(Debug, Clone, Deserialize)]
pub struct RegisterPayload {
    #[serde(default)]
    pub protocol_version: ProtocolVersion,
    pub device_id: String,
    #[serde(default)]
    pub display_name: Option<String>,
    #[serde(default)]
    pub credential: Option<String>,
}

/// HEARTBEAT payload.
#[derive(Debug, Clone, Deserialize)]
pub struct HeartbeatPayload {
    pub device_id: String,
    #[serde(default)]
    pub state: Option<String>,
}

/// STATUS payload.
#[derive(Debug, Clone, Deserialize)]
pub struct StatusPayload {
    pub device_id: String,
    #[serde(default)]
    pub data: Value,
}

/// REGISTER_ACK payload.
#[derive(Debug, Clone, Deserialize)]
pub struct RegisterAckPayload {
    pub device_id: String,
    pub heartbeat_interval_secs: u64,
}

/// REGISTER_REJECTED payload.
#[derive(Debug, Clone, Deserialize)]
pub struct RegisterRejectedPayload {
    pub reason: String,
}

/// COMMAND payload.
#[derive(Debug, Clone, Deserialize)]
pub struct CommandPayload {
    pub name: String,
    #[serde(default)]
    pub params: Value,
}

/// CONTENT_UPDATE payload.
#[derive(Debug, Clone, Deserialize)]
pub struct ContentUpdatePayload {
    pub content_ref: String,
}

/// ERROR payload.
#[derive(Debug, Clone, Deserialize)]
pub struct ErrorPayload {
    pub message: String,
    #[serde(default)]
    pub code: Option<String>,
}

// ============================================================================
// Errors
// ============================================================================

/// Errors produced while parsing or building envelopes.
#[derive(Debug, Clone, Error)]
pub enum EnvelopeError {
    /// Frame is not a JSON object with a non-empty `type` tag.
    #[error("malformed envelope: {0}")]
    Malformed(String),

    /// Frame exceeds the size bound.
    #[error("envelope too large: {size} bytes (max: {max})")]
    TooLarge { size: usize, max: usize },

    /// Payload does not match the typed shape for its tag.
    #[error("invalid {tag} payload: {reason}")]
    Payload { tag: String, reason: String },

    /// Serialization failure (should not occur for well-formed payloads).
    #[error("failed to serialize envelope: {0}")]
    Serialize(String),
}
