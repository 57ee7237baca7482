//! Configuration schema with serde defaults.
//!
//! Every section and field has a default so a partial (or empty) TOML
//! file deserializes into a usable config.

use serde::{Deserialize, Serialize};

pub const CONFIG_SCHEMA_VERSION: u32 = 1;

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct MurmurConfig {
    pub session: SessionSection,
    pub transport: TransportSection,
    pub buffer: BufferSection,
    pub reconnect: ReconnectSection,
    pub tools: ToolsSection,
    pub recording: RecordingSection,
    pub logging: LoggingSection,
}

/// Model identity and sampling parameters.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SessionSection {
    pub model: String,
    pub system_prompt: String,
    pub temperature: f64,
    pub max_output_tokens: u32,
}

impl Default for SessionSection {
    fn default() -> Self {
        Self {
            model: "gemini-2.0-flash-exp".to_string(),
            system_prompt: String::new(),
            temperature: 0.7,
            max_output_tokens: 4096,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct TransportSection {
    /// WebSocket endpoint of the live API.
    pub url: String,
    /// Name of the environment variable holding the API key.
    pub api_key_env: String,
    pub connect_timeout_secs: u64,
    /// Whole-session timeout in seconds; 0 disables it.
    pub session_timeout_secs: u64,
}

impl Default for TransportSection {
    fn default() -> Self {
        Self {
            url: "wss://generativelanguage.googleapis.com/ws/google.ai.generativelanguage.v1alpha.GenerativeService.BidiGenerateContent".to_string(),
            api_key_env: "GEMINI_API_KEY".to_string(),
            connect_timeout_secs: 10,
            session_timeout_secs: 0,
        }
    }
}

/// Media buffering: capacities, flush cadence, payload ceiling.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct BufferSection {
    pub audio_capacity: usize,
    pub image_capacity: usize,
    pub audio_flush_ms: u64,
    pub image_flush_ms: u64,
    pub max_payload_kb: usize,
}

impl Default for BufferSection {
    fn default() -> Self {
        Self {
            audio_capacity: 64,
            image_capacity: 8,
            audio_flush_ms: 500,
            image_flush_ms: 2000,
            max_payload_kb: 1024,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ReconnectSection {
    pub max_attempts: u32,
    pub initial_backoff_ms: u64,
    pub max_backoff_ms: u64,
}

impl Default for ReconnectSection {
    fn default() -> Self {
        Self {
            max_attempts: 5,
            initial_backoff_ms: 1000,
            max_backoff_ms: 30_000,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ToolsSection {
    /// Gate tool calls behind interactive approval.
    pub approval_required: bool,
}

impl Default for ToolsSection {
    fn default() -> Self {
        Self {
            approval_required: false,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RecordingSection {
    pub enabled: bool,
    /// Target file for the recorded session; empty means a timestamped
    /// file in the working directory.
    pub path: String,
}

impl Default for RecordingSection {
    fn default() -> Self {
        Self {
            enabled: false,
            path: String::new(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingSection {
    /// Tracing filter directive, e.g. "murmur=info".
    pub level: String,
}

impl Default for LoggingSection {
    fn default() -> Self {
        Self {
            level: "murmur=info".to_string(),
        }
    }
}
