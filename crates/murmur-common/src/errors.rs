use std::path::PathBuf;

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("config file not found: {0}")]
    FileNotFound(PathBuf),

    #[error("config parse error: {0}")]
    ParseError(String),

    #[error("config validation error: {0}")]
    ValidationError(String),

    #[error("missing credential: environment variable {0} is not set")]
    MissingCredential(String),
}

/// Failures of the physical duplex stream.
///
/// The retryable/fatal split drives the controller's reconnect policy:
/// timeouts, resets and closed connections are worth retrying; auth and
/// handshake rejections are not.
#[derive(Debug, thiserror::Error)]
pub enum TransportError {
    #[error("connection closed")]
    ConnectionClosed,

    #[error("connection reset: {0}")]
    ConnectionReset(String),

    #[error("connect failed: {0}")]
    Connect(String),

    #[error("timeout")]
    Timeout,

    #[error("malformed payload: {0}")]
    MalformedPayload(String),

    #[error("handshake rejected: {0}")]
    Handshake(String),

    #[error("authentication failed: {0}")]
    Auth(String),
}

impl TransportError {
    /// Whether the controller should attempt reconnection after this error.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            Self::ConnectionClosed | Self::ConnectionReset(_) | Self::Connect(_) | Self::Timeout
        )
    }
}

/// Tool registration and execution failures.
///
/// Execution-side variants are converted into error-carrying
/// `ToolResult`s and never surface as session faults; registration-side
/// variants fail fast, before the session starts.
#[derive(Debug, thiserror::Error)]
pub enum ToolError {
    #[error("unknown tool: {0}")]
    UnknownTool(String),

    #[error("tool unavailable: {0}")]
    Unavailable(String),

    #[error("tool name must not be empty")]
    EmptyName,

    #[error("tool description must not be empty: {0}")]
    EmptyDescription(String),

    #[error("duplicate tool name: {0}")]
    DuplicateName(String),

    #[error("invalid tool schema for {name}: {reason}")]
    InvalidSchema { name: String, reason: String },

    #[error("no pending tool call at index {0}")]
    IndexOutOfRange(usize),

    #[error("tool call at index {0} already resolved")]
    AlreadyResolved(usize),
}

#[derive(Debug, thiserror::Error)]
pub enum SessionError {
    #[error("stream not initialized (state: {0})")]
    StreamNotInitialized(String),

    #[error("reconnect attempts exhausted after {0} tries")]
    ReconnectExhausted(u32),

    #[error("session is shutting down")]
    ShuttingDown,
}

#[derive(Debug, thiserror::Error)]
pub enum MurmurError {
    #[error(transparent)]
    Config(#[from] ConfigError),

    #[error(transparent)]
    Transport(#[from] TransportError),

    #[error(transparent)]
    Tool(#[from] ToolError),

    #[error(transparent)]
    Session(#[from] SessionError),

    #[error(transparent)]
    Io(#[from] std::io::Error),

    #[error("{0}")]
    Other(String),
}
