//! Transport abstraction over the physical duplex stream.
//!
//! A `Connector` establishes one session (including the setup
//! handshake) and hands back split sink/stream halves, so the
//! inbound-drain task and the control loop can run independently.
//! `WsConnector` is the production implementation over
//! tokio-tungstenite; recordings provide a replay implementation of the
//! same seam (see `recording`).

use std::time::Duration;

use async_trait::async_trait;
use futures_util::stream::{SplitSink, SplitStream};
use futures_util::{SinkExt, StreamExt};
use tokio::net::TcpStream;
use tokio_tungstenite::tungstenite::{self, Message};
use tokio_tungstenite::{connect_async, MaybeTlsStream, WebSocketStream};
use tracing::{debug, trace, warn};

use murmur_common::TransportError;

use crate::protocol::{parse_server_event, ClientEvent, ServerEvent, SessionSetup};

/// Outbound half of a transport.
#[async_trait]
pub trait TransportSink: Send {
    /// Send one event. Fails fast with a typed error distinguishing
    /// a closed connection from a malformed payload.
    async fn send(&mut self, event: &ClientEvent) -> Result<(), TransportError>;

    /// Close the connection. Idempotent; always safe to call again.
    async fn close(&mut self) -> Result<(), TransportError>;
}

/// Inbound half of a transport.
#[async_trait]
pub trait TransportStream: Send {
    /// Next inbound event. `None` signals graceful end-of-stream;
    /// abnormal termination surfaces as `Some(Err(_))`.
    async fn next_event(&mut self) -> Option<Result<ServerEvent, TransportError>>;
}

/// The two halves of one established session.
pub struct TransportPair {
    pub sink: Box<dyn TransportSink>,
    pub stream: Box<dyn TransportStream>,
}

/// Establishes sessions. The controller calls this once at startup and
/// again on every reconnect attempt.
#[async_trait]
pub trait Connector: Send + Sync {
    async fn connect(&self) -> Result<TransportPair, TransportError>;
}

const SETUP_ACK_TIMEOUT: Duration = Duration::from_secs(10);

type WsSink = SplitSink<WebSocketStream<MaybeTlsStream<TcpStream>>, Message>;
type WsStreamHalf = SplitStream<WebSocketStream<MaybeTlsStream<TcpStream>>>;

/// WebSocket connector for the live service.
pub struct WsConnector {
    url: String,
    api_key: String,
    setup: SessionSetup,
    connect_timeout: Duration,
}

impl WsConnector {
    pub fn new(url: impl Into<String>, api_key: impl Into<String>, setup: SessionSetup) -> Self {
        Self {
            url: url.into(),
            api_key: api_key.into(),
            setup,
            connect_timeout: Duration::from_secs(10),
        }
    }

    pub fn with_connect_timeout(mut self, timeout: Duration) -> Self {
        self.connect_timeout = timeout;
        self
    }

    fn endpoint(&self) -> String {
        if self.api_key.is_empty() {
            self.url.clone()
        } else {
            format!("{}?key={}", self.url, self.api_key)
        }
    }
}

#[async_trait]
impl Connector for WsConnector {
    async fn connect(&self) -> Result<TransportPair, TransportError> {
        debug!(url = %self.url, "connecting to live service");

        let connect = connect_async(self.endpoint());
        let (ws, _response) = tokio::time::timeout(self.connect_timeout, connect)
            .await
            .map_err(|_| TransportError::Timeout)?
            .map_err(map_connect_error)?;

        let (sink, stream) = ws.split();
        let mut sink = WsTransportSink {
            sink,
            closed: false,
        };
        let mut stream = WsTransportStream { stream };

        // Setup handshake: send session parameters, await the ack.
        sink.send(&ClientEvent::Setup(self.setup.clone())).await?;
        await_setup_ack(&mut stream).await?;

        debug!("live session established");
        Ok(TransportPair {
            sink: Box::new(sink),
            stream: Box::new(stream),
        })
    }
}

/// Wait for the setup-complete ack. Anything else is a handshake
/// rejection, which is fatal (never retried).
async fn await_setup_ack(stream: &mut WsTransportStream) -> Result<(), TransportError> {
    let next = tokio::time::timeout(SETUP_ACK_TIMEOUT, stream.next_event())
        .await
        .map_err(|_| TransportError::Timeout)?;

    match next {
        Some(Ok(ServerEvent::SetupComplete)) => Ok(()),
        Some(Ok(other)) => Err(TransportError::Handshake(format!(
            "expected setup_complete, got {}",
            other.message_type()
        ))),
        Some(Err(e)) => Err(e),
        None => Err(TransportError::Handshake(
            "stream closed before setup_complete".into(),
        )),
    }
}

struct WsTransportSink {
    sink: WsSink,
    closed: bool,
}

#[async_trait]
impl TransportSink for WsTransportSink {
    async fn send(&mut self, event: &ClientEvent) -> Result<(), TransportError> {
        if self.closed {
            return Err(TransportError::ConnectionClosed);
        }
        let json = serde_json::to_string(event)
            .map_err(|e| TransportError::MalformedPayload(e.to_string()))?;
        self.sink
            .send(Message::Text(json.into()))
            .await
            .map_err(map_stream_error)
    }

    async fn close(&mut self) -> Result<(), TransportError> {
        if self.closed {
            return Ok(());
        }
        self.closed = true;
        if let Err(e) = self.sink.close().await {
            trace!(error = %e, "websocket close");
        }
        Ok(())
    }
}

struct WsTransportStream {
    stream: WsStreamHalf,
}

#[async_trait]
impl TransportStream for WsTransportStream {
    async fn next_event(&mut self) -> Option<Result<ServerEvent, TransportError>> {
        loop {
            match self.stream.next().await {
                Some(Ok(Message::Text(text))) => {
                    let value: serde_json::Value = match serde_json::from_str(&text) {
                        Ok(v) => v,
                        Err(e) => {
                            return Some(Err(TransportError::MalformedPayload(e.to_string())))
                        }
                    };
                    return Some(Ok(parse_server_event(&value)));
                }
                // Raw audio arrives as binary frames.
                Some(Ok(Message::Binary(bytes))) => {
                    return Some(Ok(ServerEvent::AudioDelta(bytes.to_vec())))
                }
                // tungstenite queues the pong reply internally.
                Some(Ok(Message::Ping(_))) | Some(Ok(Message::Pong(_))) => continue,
                Some(Ok(Message::Close(frame))) => {
                    debug!(?frame, "service closed the stream");
                    return None;
                }
                Some(Ok(Message::Frame(_))) => continue,
                Some(Err(e)) => return Some(Err(map_stream_error(e))),
                None => return None,
            }
        }
    }
}

fn map_connect_error(err: tungstenite::Error) -> TransportError {
    match err {
        tungstenite::Error::Http(response) => {
            let status = response.status();
            if status.as_u16() == 401 || status.as_u16() == 403 {
                TransportError::Auth(format!("HTTP {status}"))
            } else {
                TransportError::Connect(format!("HTTP {status}"))
            }
        }
        tungstenite::Error::Url(e) => TransportError::Handshake(format!("bad url: {e}")),
        tungstenite::Error::Io(e) => TransportError::Connect(e.to_string()),
        other => TransportError::Connect(other.to_string()),
    }
}

fn map_stream_error(err: tungstenite::Error) -> TransportError {
    match err {
        tungstenite::Error::ConnectionClosed | tungstenite::Error::AlreadyClosed => {
            TransportError::ConnectionClosed
        }
        tungstenite::Error::Io(e) => TransportError::ConnectionReset(e.to_string()),
        tungstenite::Error::Protocol(e) => TransportError::MalformedPayload(e.to_string()),
        tungstenite::Error::Capacity(e) => {
            warn!(error = %e, "frame exceeded capacity");
            TransportError::MalformedPayload(e.to_string())
        }
        other => TransportError::ConnectionReset(other.to_string()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn endpoint_appends_api_key() {
        let setup = SessionSetup {
            model: "m".into(),
            system_instruction: None,
            generation_config: crate::protocol::GenerationConfig {
                temperature: 0.7,
                max_output_tokens: 16,
            },
            tools: Vec::new(),
        };
        let connector = WsConnector::new("wss://example.com/live", "secret", setup.clone());
        assert_eq!(connector.endpoint(), "wss://example.com/live?key=secret");

        let connector = WsConnector::new("wss://example.com/live", "", setup);
        assert_eq!(connector.endpoint(), "wss://example.com/live");
    }

    #[test]
    fn connect_errors_classify_auth_as_fatal() {
        let err = TransportError::Auth("HTTP 401".into());
        assert!(!err.is_retryable());
        let err = TransportError::Connect("HTTP 503".into());
        assert!(err.is_retryable());
    }
}
