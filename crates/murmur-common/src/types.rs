//! Core data model: session state, messages, tool calls and results.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

/// The lifecycle state of a live session.
///
/// The state uniquely determines which operations are legal; see the
/// gating helpers below.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SessionState {
    Initializing,
    Connecting,
    Ready,
    Sending,
    AwaitingResponse,
    ToolApprovalPending,
    Error,
    Reconnecting,
    Quitting,
}

impl SessionState {
    /// Whether a user message may be sent in this state.
    pub fn can_send(&self) -> bool {
        matches!(self, Self::Ready | Self::AwaitingResponse)
    }

    /// Whether captured media may be streamed in this state.
    pub fn can_stream_media(&self) -> bool {
        matches!(self, Self::Ready | Self::Sending | Self::AwaitingResponse)
    }

    /// Terminal states never transition anywhere else.
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Quitting)
    }
}

impl fmt::Display for SessionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Initializing => "initializing",
            Self::Connecting => "connecting",
            Self::Ready => "ready",
            Self::Sending => "sending",
            Self::AwaitingResponse => "awaiting_response",
            Self::ToolApprovalPending => "tool_approval_pending",
            Self::Error => "error",
            Self::Reconnecting => "reconnecting",
            Self::Quitting => "quitting",
        };
        write!(f, "{name}")
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    User,
    Model,
    System,
}

/// A request from the remote model to invoke a named local capability.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ToolCall {
    pub id: String,
    pub name: String,
    pub args: serde_json::Value,
}

/// The outcome of one `ToolCall`. Exactly one result is produced per
/// call; `output` and `error` are mutually exclusive.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ToolResult {
    pub id: String,
    pub name: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub output: Option<serde_json::Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl ToolResult {
    pub fn ok(id: impl Into<String>, name: impl Into<String>, output: serde_json::Value) -> Self {
        Self {
            id: id.into(),
            name: name.into(),
            output: Some(output),
            error: None,
        }
    }

    pub fn err(id: impl Into<String>, name: impl Into<String>, error: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            name: name.into(),
            output: None,
            error: Some(error.into()),
        }
    }

    pub fn is_error(&self) -> bool {
        self.error.is_some()
    }
}

/// One turn or partial turn in the conversation history.
///
/// Immutable once appended; ordering is append order.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Message {
    pub role: Role,
    pub text: String,
    /// Raw audio bytes attached to this turn, if any.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub audio: Option<Vec<u8>>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub tool_calls: Vec<ToolCall>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub tool_results: Vec<ToolResult>,
    pub complete: bool,
    pub timestamp: DateTime<Utc>,
}

impl Message {
    pub fn user(text: impl Into<String>) -> Self {
        Self {
            role: Role::User,
            text: text.into(),
            audio: None,
            tool_calls: Vec::new(),
            tool_results: Vec::new(),
            complete: true,
            timestamp: Utc::now(),
        }
    }

    pub fn model(text: impl Into<String>, audio: Option<Vec<u8>>, complete: bool) -> Self {
        Self {
            role: Role::Model,
            text: text.into(),
            audio,
            tool_calls: Vec::new(),
            tool_results: Vec::new(),
            complete,
            timestamp: Utc::now(),
        }
    }

    /// A system-visible record of a tool invocation and its outcome.
    pub fn tool_record(call: ToolCall, result: ToolResult) -> Self {
        let text = match (&result.output, &result.error) {
            (_, Some(e)) => format!("[tool {} failed: {e}]", call.name),
            (Some(v), None) => format!("[tool {} -> {v}]", call.name),
            (None, None) => format!("[tool {}]", call.name),
        };
        Self {
            role: Role::System,
            text,
            audio: None,
            tool_calls: vec![call],
            tool_results: vec![result],
            complete: true,
            timestamp: Utc::now(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn state_gating() {
        assert!(SessionState::Ready.can_send());
        assert!(SessionState::AwaitingResponse.can_send());
        assert!(!SessionState::Connecting.can_send());
        assert!(!SessionState::Error.can_send());
        assert!(!SessionState::Quitting.can_send());

        assert!(SessionState::Ready.can_stream_media());
        assert!(SessionState::Sending.can_stream_media());
        assert!(!SessionState::Reconnecting.can_stream_media());
        assert!(!SessionState::ToolApprovalPending.can_send());

        assert!(SessionState::Quitting.is_terminal());
        assert!(!SessionState::Error.is_terminal());
    }

    #[test]
    fn state_display_is_snake_case() {
        assert_eq!(SessionState::AwaitingResponse.to_string(), "awaiting_response");
        assert_eq!(
            SessionState::ToolApprovalPending.to_string(),
            "tool_approval_pending"
        );
    }

    #[test]
    fn tool_result_constructors() {
        let ok = ToolResult::ok("a", "echo", serde_json::json!({"x": 1}));
        assert!(!ok.is_error());
        assert_eq!(ok.output.unwrap()["x"], 1);

        let err = ToolResult::err("b", "missing", "unknown tool");
        assert!(err.is_error());
        assert_eq!(err.error.as_deref(), Some("unknown tool"));
        assert!(err.output.is_none());
    }

    #[test]
    fn tool_result_serialization_omits_absent_fields() {
        let err = ToolResult::err("b", "missing", "unknown tool");
        let json = serde_json::to_value(&err).unwrap();
        assert!(json.get("output").is_none());
        assert_eq!(json["error"], "unknown tool");
    }

    #[test]
    fn tool_record_text_mentions_outcome() {
        let call = ToolCall {
            id: "1".into(),
            name: "echo".into(),
            args: serde_json::json!({}),
        };
        let rec = Message::tool_record(call.clone(), ToolResult::err("1", "echo", "boom"));
        assert_eq!(rec.role, Role::System);
        assert!(rec.text.contains("boom"));
        assert_eq!(rec.tool_calls[0].id, "1");
        assert_eq!(rec.tool_results[0].id, "1");
    }

    #[test]
    fn user_message_is_complete() {
        let msg = Message::user("hi");
        assert!(msg.complete);
        assert_eq!(msg.role, Role::User);
        assert!(msg.audio.is_none());
    }
}
