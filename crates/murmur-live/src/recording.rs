//! Session recording and deterministic replay.
//!
//! A recording is an ordered array of wire payloads with direction and
//! timing metadata. `ReplayConnector` feeds a recording back through
//! the normal `Connector` seam, reproducing inter-message delays from
//! `elapsed_ms`, so a recorded session drives the engine exactly like a
//! live one.

use std::collections::VecDeque;
use std::path::Path;
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::debug;

use murmur_common::{MurmurError, TransportError};

use crate::protocol::{parse_server_event, ClientEvent, ServerEvent};
use crate::transport::{Connector, TransportPair, TransportSink, TransportStream};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Direction {
    Send,
    Receive,
}

/// One recorded wire message.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RecordedEntry {
    pub direction: Direction,
    pub payload: serde_json::Value,
    pub timestamp: DateTime<Utc>,
    /// Milliseconds since the start of the recording.
    pub elapsed_ms: u64,
    pub message_type: String,
}

/// Collects wire traffic for one session.
pub struct SessionRecorder {
    entries: Mutex<Vec<RecordedEntry>>,
    started: Instant,
}

impl SessionRecorder {
    pub fn new() -> Self {
        Self {
            entries: Mutex::new(Vec::new()),
            started: Instant::now(),
        }
    }

    pub fn record_send(&self, event: &ClientEvent) {
        let payload = match serde_json::to_value(event) {
            Ok(payload) => payload,
            Err(_) => return,
        };
        self.push(Direction::Send, payload, event.message_type());
    }

    pub fn record_receive(&self, event: &ServerEvent) {
        self.push(Direction::Receive, event.to_payload(), event.message_type());
    }

    fn push(&self, direction: Direction, payload: serde_json::Value, message_type: &str) {
        let entry = RecordedEntry {
            direction,
            payload,
            timestamp: Utc::now(),
            elapsed_ms: self.started.elapsed().as_millis() as u64,
            message_type: message_type.to_string(),
        };
        self.entries
            .lock()
            .expect("recorder poisoned")
            .push(entry);
    }

    pub fn entries(&self) -> Vec<RecordedEntry> {
        self.entries.lock().expect("recorder poisoned").clone()
    }

    pub fn len(&self) -> usize {
        self.entries.lock().expect("recorder poisoned").len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Write the recording as pretty-printed JSON.
    pub fn save(&self, path: &Path) -> Result<(), MurmurError> {
        let entries = self.entries();
        let json = serde_json::to_string_pretty(&entries)
            .map_err(|e| MurmurError::Other(format!("failed to serialize recording: {e}")))?;
        std::fs::write(path, json)?;
        debug!(path = %path.display(), entries = entries.len(), "session recording saved");
        Ok(())
    }
}

impl Default for SessionRecorder {
    fn default() -> Self {
        Self::new()
    }
}

/// Load a recording from disk.
pub fn load_recording(path: &Path) -> Result<Vec<RecordedEntry>, MurmurError> {
    let content = std::fs::read_to_string(path)?;
    serde_json::from_str(&content)
        .map_err(|e| MurmurError::Other(format!("failed to parse recording: {e}")))
}

/// Replays the receive side of a recording through the `Connector`
/// seam. Sends are captured for inspection instead of going anywhere.
pub struct ReplayConnector {
    entries: Vec<RecordedEntry>,
    honor_timing: bool,
    sent: Arc<Mutex<Vec<ClientEvent>>>,
}

impl ReplayConnector {
    pub fn new(entries: Vec<RecordedEntry>) -> Self {
        Self {
            entries,
            honor_timing: true,
            sent: Arc::new(Mutex::new(Vec::new())),
        }
    }

    /// Replay without reproducing inter-message delays. For tests.
    pub fn instant(entries: Vec<RecordedEntry>) -> Self {
        Self {
            honor_timing: false,
            ..Self::new(entries)
        }
    }

    pub fn from_file(path: &Path) -> Result<Self, MurmurError> {
        Ok(Self::new(load_recording(path)?))
    }

    /// Everything the engine sent into the replay so far.
    pub fn sent_events(&self) -> Vec<ClientEvent> {
        self.sent.lock().expect("replay sink poisoned").clone()
    }
}

#[async_trait]
impl Connector for ReplayConnector {
    async fn connect(&self) -> Result<TransportPair, TransportError> {
        let inbound: VecDeque<RecordedEntry> = self
            .entries
            .iter()
            .filter(|e| e.direction == Direction::Receive)
            .cloned()
            .collect();

        Ok(TransportPair {
            sink: Box::new(ReplaySink {
                sent: Arc::clone(&self.sent),
                closed: false,
            }),
            stream: Box::new(ReplayStream {
                inbound,
                honor_timing: self.honor_timing,
                last_elapsed_ms: 0,
            }),
        })
    }
}

struct ReplaySink {
    sent: Arc<Mutex<Vec<ClientEvent>>>,
    closed: bool,
}

#[async_trait]
impl TransportSink for ReplaySink {
    async fn send(&mut self, event: &ClientEvent) -> Result<(), TransportError> {
        if self.closed {
            return Err(TransportError::ConnectionClosed);
        }
        self.sent
            .lock()
            .expect("replay sink poisoned")
            .push(event.clone());
        Ok(())
    }

    async fn close(&mut self) -> Result<(), TransportError> {
        self.closed = true;
        Ok(())
    }
}

struct ReplayStream {
    inbound: VecDeque<RecordedEntry>,
    honor_timing: bool,
    last_elapsed_ms: u64,
}

#[async_trait]
impl TransportStream for ReplayStream {
    async fn next_event(&mut self) -> Option<Result<ServerEvent, TransportError>> {
        let entry = self.inbound.pop_front()?;

        if self.honor_timing {
            let delay = entry.elapsed_ms.saturating_sub(self.last_elapsed_ms);
            if delay > 0 {
                tokio::time::sleep(Duration::from_millis(delay)).await;
            }
        }
        self.last_elapsed_ms = entry.elapsed_ms;

        Some(Ok(parse_server_event(&entry.payload)))
    }
}
