//! Live session engine for Murmur.
//!
//! Owns the stream lifecycle for one bidirectional, multimodal session
//! with a remote generative-AI service:
//! - `transport`: the duplex WebSocket seam (connector + split halves)
//! - `buffer`: bounded media queues with periodic coalescing flushes
//! - `registry` / `coordinator`: tool registration and the tool-call
//!   protocol, with optional human approval
//! - `controller`: the session state machine and its control loop
//! - `recording`: recorded-session files and deterministic replay
//! - `stats`: streaming counters

pub mod buffer;
pub mod controller;
pub mod coordinator;
pub mod protocol;
pub mod recording;
pub mod registry;
pub mod stats;
pub mod transport;

pub use buffer::{AudioChunk, ImageFrame, MultimodalBuffer, MultimodalBufferConfig};
pub use controller::{ReconnectPolicy, SessionCommand, SessionController, SessionOptions};
pub use coordinator::{SubmitOutcome, ToolCallCoordinator};
pub use protocol::{ClientEvent, MediaChunk, ServerEvent, SessionSetup};
pub use recording::{Direction, RecordedEntry, ReplayConnector, SessionRecorder};
pub use registry::{ParamKind, ParamSchema, RegisteredTool, ToolHandler, ToolRegistry};
pub use stats::StreamStats;
pub use transport::{Connector, TransportPair, TransportSink, TransportStream, WsConnector};
