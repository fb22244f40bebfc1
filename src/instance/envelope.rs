//! Activation channel envelope: wire schema, builders, and the validator.
//!
//! Envelopes are the versioned outer object for every message on the
//! channel. Validation is strict and ordered: anything that may be noise or
//! adversarial is dropped without a response; only an unsupported protocol
//! version earns an error reply so the peer can report a clean failure.

use serde::{Deserialize, Serialize};
use serde_json::Value;
use time::OffsetDateTime;
use time::macros::format_description;

use crate::workspace::{self, WorkspaceKey};

pub const PROTOCOL_VERSION: &str = "1";

/// Max serialized envelope size in either direction.
pub const MAX_ENVELOPE_BYTES: usize = 64 * 1024;

/// Emit-side cap on `workspace_path` (truncated silently).
pub const MAX_WORKSPACE_PATH_BYTES: usize = 32 * 1024;

/// Emit-side cap on `args` entries (truncated silently).
pub const MAX_ARGS: usize = 100;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MessageType {
    ActivationRequest,
    ActivationResponse,
    Ping,
    Pong,
}

impl MessageType {
    fn parse(raw: &str) -> Option<Self> {
        match raw {
            "activation_request" => Some(MessageType::ActivationRequest),
            "activation_response" => Some(MessageType::ActivationResponse),
            "ping" => Some(MessageType::Ping),
            "pong" => Some(MessageType::Pong),
            _ => None,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            MessageType::ActivationRequest => "activation_request",
            MessageType::ActivationResponse => "activation_response",
            MessageType::Ping => "ping",
            MessageType::Pong => "pong",
        }
    }
}

/// A validated envelope. Only the validator and the builders below produce
/// these, so holding one implies the key binding already checked out.
#[derive(Debug, Clone, Serialize)]
pub struct MessageEnvelope {
    pub protocol_version: String,
    pub message_type: MessageType,
    pub workspace_key: String,
    pub payload: Value,
    /// ISO 8601 with milliseconds. Diagnostic only: never used for
    /// ordering, expiry, or replay prevention.
    pub timestamp: String,
}

impl MessageEnvelope {
    pub fn new(message_type: MessageType, key: &WorkspaceKey, payload: Value) -> Self {
        Self {
            protocol_version: PROTOCOL_VERSION.to_string(),
            message_type,
            workspace_key: key.as_str().to_string(),
            payload,
            timestamp: now_timestamp(),
        }
    }

    pub fn activation_request(key: &WorkspaceKey, payload: &ActivationRequestPayload) -> Self {
        let payload = payload.clone().truncated();
        Self::new(
            MessageType::ActivationRequest,
            key,
            serde_json::to_value(payload).unwrap_or(Value::Null),
        )
    }

    pub fn activation_response(key: &WorkspaceKey, payload: &ActivationResponsePayload) -> Self {
        Self::new(
            MessageType::ActivationResponse,
            key,
            serde_json::to_value(payload).unwrap_or(Value::Null),
        )
    }

    /// Error reply used when validation says `RespondWithError`.
    pub fn error_response(key: &WorkspaceKey, error: impl Into<String>) -> Self {
        Self::activation_response(
            key,
            &ActivationResponsePayload {
                status: ActivationStatus::Error,
                window_state: None,
                navigated_to: None,
                error: Some(error.into()),
            },
        )
    }

    pub fn ping(key: &WorkspaceKey) -> Self {
        Self::new(
            MessageType::Ping,
            key,
            serde_json::json!({ "pid": std::process::id() }),
        )
    }

    pub fn pong(key: &WorkspaceKey, pid: u32, uptime_ms: u64) -> Self {
        Self::new(
            MessageType::Pong,
            key,
            serde_json::json!({ "pid": pid, "uptime_ms": uptime_ms }),
        )
    }

    pub fn to_bytes(&self) -> Vec<u8> {
        serde_json::to_vec(self).unwrap_or_default()
    }
}

fn now_timestamp() -> String {
    let format = format_description!(
        "[year]-[month]-[day]T[hour]:[minute]:[second].[subsecond digits:3]Z"
    );
    OffsetDateTime::now_utc()
        .format(&format)
        .unwrap_or_else(|_| String::from("1970-01-01T00:00:00.000Z"))
}

// =============================================================================
// Payloads
// =============================================================================

/// Payload of an `activation_request`. Unknown fields are ignored for
/// forward compatibility.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ActivationRequestPayload {
    pub workspace_path: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub requested_view: Option<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub args: Vec<String>,
}

impl ActivationRequestPayload {
    pub fn new(workspace_path: impl Into<String>) -> Self {
        Self {
            workspace_path: workspace_path.into(),
            requested_view: None,
            args: Vec::new(),
        }
    }

    /// Apply the emit-side caps: `args` at most [`MAX_ARGS`] entries,
    /// `workspace_path` at most [`MAX_WORKSPACE_PATH_BYTES`] bytes.
    fn truncated(mut self) -> Self {
        self.args.truncate(MAX_ARGS);
        while self.workspace_path.len() > MAX_WORKSPACE_PATH_BYTES {
            self.workspace_path.pop();
        }
        self
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ActivationStatus {
    Activated,
    Error,
    Busy,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum WindowStateTag {
    Restored,
    AlreadyForeground,
    Minimized,
    Unknown,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ActivationResponsePayload {
    pub status: ActivationStatus,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub window_state: Option<WindowStateTag>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub navigated_to: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

// =============================================================================
// Validator
// =============================================================================

/// What the caller must do with an inbound message.
#[derive(Debug)]
pub enum ValidationAction {
    /// Hand the envelope to the message handler.
    Process(MessageEnvelope),
    /// Do not process and do not respond; the warning is already logged.
    Drop,
    /// Reply with a well-formed error envelope, then close.
    RespondWithError { error: String },
}

/// Untrusted inbound shape: every field optional so the ladder can report
/// precisely which rule failed instead of a blanket parse error.
#[derive(Debug, Deserialize)]
struct RawEnvelope {
    #[serde(default)]
    protocol_version: Option<String>,
    #[serde(default)]
    message_type: Option<String>,
    #[serde(default)]
    workspace_key: Option<String>,
    #[serde(default)]
    payload: Option<Value>,
    #[serde(default)]
    timestamp: Option<String>,
}

/// Validate inbound bytes against size, schema, and key-binding rules.
///
/// Rules run in order; the first match wins. Every `Drop` emits exactly one
/// warning log entry.
pub fn validate(bytes: &[u8], expected_key: &WorkspaceKey) -> ValidationAction {
    if bytes.len() > MAX_ENVELOPE_BYTES {
        tracing::warn!(
            size = bytes.len(),
            limit = MAX_ENVELOPE_BYTES,
            "Dropping oversized message"
        );
        return ValidationAction::Drop;
    }

    let raw: RawEnvelope = match serde_json::from_slice(bytes) {
        Ok(raw) => raw,
        Err(e) => {
            tracing::warn!("Dropping unparseable message: {e}");
            return ValidationAction::Drop;
        }
    };

    let Some(protocol_version) = non_empty(raw.protocol_version) else {
        return drop_missing("protocol_version");
    };
    let Some(message_type_raw) = non_empty(raw.message_type) else {
        return drop_missing("message_type");
    };
    let Some(workspace_key) = non_empty(raw.workspace_key) else {
        return drop_missing("workspace_key");
    };
    let Some(payload) = raw.payload.filter(|p| !payload_is_empty(p)) else {
        return drop_missing("payload");
    };
    let Some(timestamp) = non_empty(raw.timestamp) else {
        return drop_missing("timestamp");
    };

    if protocol_version != PROTOCOL_VERSION {
        return ValidationAction::RespondWithError {
            error: format!(
                "Unsupported protocol version {protocol_version}; this instance speaks {PROTOCOL_VERSION}"
            ),
        };
    }

    let Some(message_type) = MessageType::parse(&message_type_raw) else {
        tracing::warn!("Dropping message with unknown message_type: {message_type_raw}");
        return ValidationAction::Drop;
    };

    if !workspace::is_valid_key(&workspace_key) {
        tracing::warn!("Dropping message: Invalid workspace_key format");
        return ValidationAction::Drop;
    }

    if workspace_key != expected_key.as_str() {
        tracing::warn!("Dropping message: workspace_key does not match this instance");
        return ValidationAction::Drop;
    }

    ValidationAction::Process(MessageEnvelope {
        protocol_version,
        message_type,
        workspace_key,
        payload,
        timestamp,
    })
}

fn non_empty(field: Option<String>) -> Option<String> {
    field.filter(|s| !s.is_empty())
}

fn payload_is_empty(payload: &Value) -> bool {
    match payload {
        Value::Null => true,
        Value::Object(map) => map.is_empty(),
        _ => false,
    }
}

fn drop_missing(field: &str) -> ValidationAction {
    tracing::warn!("Dropping message with missing or empty envelope field: {field}");
    ValidationAction::Drop
}
