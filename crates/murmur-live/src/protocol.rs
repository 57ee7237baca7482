//! Wire events exchanged with the live service.
//!
//! Outbound events serialize to the exact JSON shapes the service
//! expects (`{"text": ...}`, `{"realtime_input": {...}}`,
//! `{"tool_results": [...]}`); inbound frames are classified into
//! `ServerEvent`s, with an `Unknown` fall-through so unexpected shapes
//! never crash the controller.

use serde::{Deserialize, Serialize};

use murmur_common::{ToolCall, ToolResult};

/// One base64-encoded media payload.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MediaChunk {
    pub data: String,
    pub mime_type: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RealtimeInput {
    pub media_chunks: Vec<MediaChunk>,
}

/// Sampling parameters sent during session setup.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GenerationConfig {
    pub temperature: f64,
    pub max_output_tokens: u32,
}

/// The session-establishment payload: model identity, system prompt,
/// sampling parameters and tool declarations.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SessionSetup {
    pub model: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub system_instruction: Option<String>,
    pub generation_config: GenerationConfig,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub tools: Vec<serde_json::Value>,
}

/// Outbound stream events.
///
/// External tagging gives each variant its own top-level key, which is
/// exactly the wire shape.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum ClientEvent {
    #[serde(rename = "setup")]
    Setup(SessionSetup),
    #[serde(rename = "text")]
    Text(String),
    #[serde(rename = "realtime_input")]
    RealtimeInput(RealtimeInput),
    #[serde(rename = "tool_results")]
    ToolResults(Vec<ToolResult>),
}

impl ClientEvent {
    /// Short type tag used for logging and session recordings.
    pub fn message_type(&self) -> &'static str {
        match self {
            Self::Setup(_) => "setup",
            Self::Text(_) => "text",
            Self::RealtimeInput(_) => "realtime_input",
            Self::ToolResults(_) => "tool_results",
        }
    }
}

/// Inbound stream events after classification.
#[derive(Debug, Clone, PartialEq)]
pub enum ServerEvent {
    SetupComplete,
    TextDelta(String),
    AudioDelta(Vec<u8>),
    ToolCallRequest(Vec<ToolCall>),
    TurnComplete,
    /// The service announced it is closing the stream.
    StreamClosed,
    /// Unrecognized shape; logged and dropped by the controller.
    Unknown(serde_json::Value),
}

impl ServerEvent {
    pub fn message_type(&self) -> &'static str {
        match self {
            Self::SetupComplete => "setup_complete",
            Self::TextDelta(_) => "text",
            Self::AudioDelta(_) => "audio",
            Self::ToolCallRequest(_) => "tool_call",
            Self::TurnComplete => "turn_complete",
            Self::StreamClosed => "stream_closed",
            Self::Unknown(_) => "unknown",
        }
    }

    /// The wire payload for this event, used by session recordings.
    pub fn to_payload(&self) -> serde_json::Value {
        use base64::Engine as _;
        match self {
            Self::SetupComplete => serde_json::json!({"setup_complete": true}),
            Self::TextDelta(t) => serde_json::json!({"text": t}),
            Self::AudioDelta(bytes) => serde_json::json!({
                "audio": base64::engine::general_purpose::STANDARD.encode(bytes)
            }),
            Self::ToolCallRequest(calls) => serde_json::json!({"tool_call": calls}),
            Self::TurnComplete => serde_json::json!({"turn_complete": true}),
            Self::StreamClosed => serde_json::json!({"stream_closed": true}),
            Self::Unknown(v) => v.clone(),
        }
    }
}

/// Classify a JSON frame into a `ServerEvent`.
///
/// Exactly one classification applies per frame; anything else becomes
/// `Unknown` for the controller to log and drop.
pub fn parse_server_event(value: &serde_json::Value) -> ServerEvent {
    use base64::Engine as _;

    if value.get("setup_complete").is_some() {
        return ServerEvent::SetupComplete;
    }
    if let Some(text) = value.get("text").and_then(|t| t.as_str()) {
        return ServerEvent::TextDelta(text.to_string());
    }
    if let Some(audio) = value.get("audio").and_then(|a| a.as_str()) {
        return match base64::engine::general_purpose::STANDARD.decode(audio) {
            Ok(bytes) => ServerEvent::AudioDelta(bytes),
            Err(_) => ServerEvent::Unknown(value.clone()),
        };
    }
    if let Some(calls) = value.get("tool_call") {
        return match serde_json::from_value::<Vec<ToolCall>>(calls.clone()) {
            Ok(calls) => ServerEvent::ToolCallRequest(calls),
            Err(_) => ServerEvent::Unknown(value.clone()),
        };
    }
    if value.get("turn_complete").is_some() {
        return ServerEvent::TurnComplete;
    }
    if value.get("stream_closed").is_some() {
        return ServerEvent::StreamClosed;
    }
    ServerEvent::Unknown(value.clone())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn text_event_wire_shape() {
        let json = serde_json::to_value(ClientEvent::Text("hello".into())).unwrap();
        assert_eq!(json, serde_json::json!({"text": "hello"}));
    }

    #[test]
    fn realtime_input_wire_shape() {
        let event = ClientEvent::RealtimeInput(RealtimeInput {
            media_chunks: vec![MediaChunk {
                data: "AAAA".into(),
                mime_type: "audio/pcm".into(),
            }],
        });
        let json = serde_json::to_value(&event).unwrap();
        assert_eq!(
            json,
            serde_json::json!({
                "realtime_input": {
                    "media_chunks": [{"data": "AAAA", "mime_type": "audio/pcm"}]
                }
            })
        );
    }

    #[test]
    fn tool_results_wire_shape() {
        let event = ClientEvent::ToolResults(vec![
            ToolResult::ok("a", "echo", serde_json::json!("hi")),
            ToolResult::err("b", "missing", "unknown tool"),
        ]);
        let json = serde_json::to_value(&event).unwrap();
        assert_eq!(json["tool_results"][0]["id"], "a");
        assert_eq!(json["tool_results"][0]["output"], "hi");
        assert_eq!(json["tool_results"][1]["error"], "unknown tool");
        assert!(json["tool_results"][1].get("output").is_none());
    }

    #[test]
    fn setup_omits_empty_optionals() {
        let event = ClientEvent::Setup(SessionSetup {
            model: "gemini-2.0-flash-exp".into(),
            system_instruction: None,
            generation_config: GenerationConfig {
                temperature: 0.7,
                max_output_tokens: 4096,
            },
            tools: Vec::new(),
        });
        let json = serde_json::to_value(&event).unwrap();
        assert!(json["setup"].get("system_instruction").is_none());
        assert!(json["setup"].get("tools").is_none());
        assert_eq!(json["setup"]["model"], "gemini-2.0-flash-exp");
    }

    #[test]
    fn client_event_round_trips() {
        let event = ClientEvent::Text("hi".into());
        let json = serde_json::to_string(&event).unwrap();
        let back: ClientEvent = serde_json::from_str(&json).unwrap();
        assert_eq!(back, event);
    }

    #[test]
    fn classify_text_delta() {
        let ev = parse_server_event(&serde_json::json!({"text": "partial"}));
        assert_eq!(ev, ServerEvent::TextDelta("partial".into()));
    }

    #[test]
    fn classify_audio_delta_decodes_base64() {
        use base64::Engine as _;
        let data = base64::engine::general_purpose::STANDARD.encode([1u8, 2, 3]);
        let ev = parse_server_event(&serde_json::json!({"audio": data}));
        assert_eq!(ev, ServerEvent::AudioDelta(vec![1, 2, 3]));
    }

    #[test]
    fn classify_tool_call_request() {
        let ev = parse_server_event(&serde_json::json!({
            "tool_call": [{"id": "a", "name": "echo", "args": {"text": "hi"}}]
        }));
        match ev {
            ServerEvent::ToolCallRequest(calls) => {
                assert_eq!(calls.len(), 1);
                assert_eq!(calls[0].name, "echo");
            }
            other => panic!("expected tool call request, got {other:?}"),
        }
    }

    #[test]
    fn classify_markers() {
        assert_eq!(
            parse_server_event(&serde_json::json!({"turn_complete": true})),
            ServerEvent::TurnComplete
        );
        assert_eq!(
            parse_server_event(&serde_json::json!({"stream_closed": true})),
            ServerEvent::StreamClosed
        );
        assert_eq!(
            parse_server_event(&serde_json::json!({"setup_complete": {}})),
            ServerEvent::SetupComplete
        );
    }

    #[test]
    fn unrecognized_shape_is_unknown() {
        let value = serde_json::json!({"surprise": {"nested": 1}});
        match parse_server_event(&value) {
            ServerEvent::Unknown(v) => assert_eq!(v, value),
            other => panic!("expected unknown, got {other:?}"),
        }
    }

    #[test]
    fn malformed_tool_call_is_unknown() {
        let value = serde_json::json!({"tool_call": "not an array"});
        assert!(matches!(parse_server_event(&value), ServerEvent::Unknown(_)));
    }

    #[test]
    fn audio_event_payload_round_trips() {
        let ev = ServerEvent::AudioDelta(vec![9, 8, 7]);
        let back = parse_server_event(&ev.to_payload());
        assert_eq!(back, ev);
    }
}
