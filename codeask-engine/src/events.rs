//! Agent runtime event types.
//!
//! The runtime publishes one shared feed of `{"type": …, "properties": {…}}`
//! payloads for every session it hosts. This module decodes those payloads
//! into the closed [`RuntimeEvent`] sum type; anything the engine does not
//! act on becomes [`RuntimeEvent::Other`].

use serde::{Deserialize, Serialize};
use serde_json::Value;

// ============================================================================
// Decoded Events
// ============================================================================

/// Status of a tool invocation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ToolStatus {
    Pending,
    Running,
    Completed,
    Error,
    #[serde(other)]
    Unknown,
}

/// Author of a runtime message.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MessageRole {
    User,
    Assistant,
    #[serde(other)]
    Other,
}

/// An event from the runtime's live feed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RuntimeEvent {
    /// Full current text of a text part (each update replaces the previous one)
    TextUpdated {
        session_id: String,
        message_id: String,
        text: String,
    },
    /// A tool invocation changed state
    ToolUpdated {
        session_id: String,
        call_id: String,
        tool: String,
        status: ToolStatus,
    },
    /// The agent finished a step; reason `"stop"` means the turn is complete
    StepFinished { session_id: String, reason: String },
    /// The agent compacted its working memory
    Compacted { session_id: String },
    /// A message was created or updated
    MessageUpdated {
        session_id: String,
        message_id: String,
        role: MessageRole,
    },
    /// The session has nothing left to do
    SessionIdle { session_id: String },
    /// The runtime reported a failure
    SessionError {
        session_id: Option<String>,
        message: String,
    },
    /// Anything the engine does not act on
    Other,
}

impl RuntimeEvent {
    /// Session this event belongs to, if it names one.
    pub fn session_id(&self) -> Option<&str> {
        match self {
            Self::TextUpdated { session_id, .. }
            | Self::ToolUpdated { session_id, .. }
            | Self::StepFinished { session_id, .. }
            | Self::Compacted { session_id }
            | Self::MessageUpdated { session_id, .. }
            | Self::SessionIdle { session_id } => Some(session_id),
            Self::SessionError { session_id, .. } => session_id.as_deref(),
            Self::Other => None,
        }
    }

    /// Decode one SSE `data:` payload.
    ///
    /// Undecodable payloads are logged and mapped to [`RuntimeEvent::Other`].
    pub fn decode(data: &str) -> Self {
        match serde_json::from_str::<WireEvent>(data) {
            Ok(wire) => Self::from_wire(wire),
            Err(e) => {
                tracing::warn!(error = %e, data = %data, "Failed to parse runtime event");
                Self::Other
            }
        }
    }

    /// Convert a raw wire event into a decoded event.
    pub fn from_wire(wire: WireEvent) -> Self {
        let decoded = match wire.kind.as_str() {
            "message.part.updated" => serde_json::from_value::<PartUpdatedProps>(wire.properties)
                .map(|props| Self::from_part(props.part)),
            "message.updated" => {
                serde_json::from_value::<MessageUpdatedProps>(wire.properties).map(|props| {
                    Self::MessageUpdated {
                        session_id: props.info.session_id,
                        message_id: props.info.id,
                        role: props.info.role,
                    }
                })
            }
            "session.idle" => serde_json::from_value::<SessionProps>(wire.properties)
                .map(|props| Self::SessionIdle {
                    session_id: props.session_id,
                }),
            "session.compacted" => serde_json::from_value::<SessionProps>(wire.properties)
                .map(|props| Self::Compacted {
                    session_id: props.session_id,
                }),
            "session.error" => serde_json::from_value::<SessionErrorProps>(wire.properties)
                .map(|props| Self::SessionError {
                    message: props.describe(),
                    session_id: props.session_id,
                }),
            _ => return Self::Other,
        };

        decoded.unwrap_or_else(|e| {
            tracing::warn!(event_type = %wire.kind, error = %e, "Malformed runtime event properties");
            Self::Other
        })
    }

    fn from_part(part: WirePart) -> Self {
        match part.kind.as_str() {
            "text" => Self::TextUpdated {
                session_id: part.session_id,
                message_id: part.message_id,
                text: part.text.unwrap_or_default(),
            },
            "tool" => Self::ToolUpdated {
                session_id: part.session_id,
                call_id: part.call_id.unwrap_or(part.id),
                tool: part.tool.unwrap_or_default(),
                status: part.state.map_or(ToolStatus::Unknown, |s| s.status),
            },
            "step-finish" => Self::StepFinished {
                session_id: part.session_id,
                reason: part.reason.unwrap_or_default(),
            },
            "compaction" => Self::Compacted {
                session_id: part.session_id,
            },
            _ => Self::Other,
        }
    }
}

// ============================================================================
// Wire Types
// ============================================================================

/// Raw feed payload.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WireEvent {
    #[serde(rename = "type")]
    pub kind: String,
    #[serde(default)]
    pub properties: Value,
}

#[derive(Debug, Deserialize)]
struct PartUpdatedProps {
    part: WirePart,
}

#[derive(Debug, Deserialize)]
struct WirePart {
    #[serde(default)]
    id: String,
    #[serde(rename = "sessionID")]
    session_id: String,
    #[serde(rename = "messageID", default)]
    message_id: String,
    #[serde(rename = "type")]
    kind: String,
    #[serde(default)]
    text: Option<String>,
    #[serde(rename = "callID", default)]
    call_id: Option<String>,
    #[serde(default)]
    tool: Option<String>,
    #[serde(default)]
    state: Option<WireToolState>,
    #[serde(default)]
    reason: Option<String>,
}

#[derive(Debug, Deserialize)]
struct WireToolState {
    status: ToolStatus,
}

#[derive(Debug, Deserialize)]
struct MessageUpdatedProps {
    info: WireMessageInfo,
}

#[derive(Debug, Deserialize)]
struct WireMessageInfo {
    id: String,
    #[serde(rename = "sessionID")]
    session_id: String,
    role: MessageRole,
}

#[derive(Debug, Deserialize)]
struct SessionProps {
    #[serde(rename = "sessionID")]
    session_id: String,
}

#[derive(Debug, Deserialize)]
struct SessionErrorProps {
    #[serde(rename = "sessionID", default)]
    session_id: Option<String>,
    #[serde(default)]
    error: Option<Value>,
}

impl SessionErrorProps {
    fn describe(&self) -> String {
        let Some(error) = &self.error else {
            return "unknown runtime error".to_string();
        };
        error
            .pointer("/data/message")
            .or_else(|| error.get("message"))
            .and_then(Value::as_str)
            .or_else(|| error.get("name").and_then(Value::as_str))
            .map_or_else(|| error.to_string(), str::to_string)
    }
}

// ============================================================================
// Tests
// ============================================================================
