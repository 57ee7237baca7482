//! The session state machine and control loop.
//!
//! One control loop owns all state transitions. Inbound events are
//! drained by a dedicated task and classified here; outbound media
//! arrives from the buffer's flush tasks; user input and approval
//! decisions arrive over the command channel. Transport failures run
//! the reconnect policy: retryable errors get bounded backoff attempts,
//! fatal errors land in `Error` with zero retries.

use std::sync::{Arc, Mutex};
use std::time::Duration;

use tokio::sync::{broadcast, mpsc, watch};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, trace, warn};

use murmur_common::{
    EventBus, Message, SessionError, SessionEvent, SessionId, SessionState, ToolResult,
    TransportError,
};

use crate::buffer::{spawn_flush_tasks, MultimodalBuffer, MultimodalBufferConfig};
use crate::coordinator::{SubmitOutcome, ToolCallCoordinator};
use crate::protocol::{ClientEvent, ServerEvent};
use crate::recording::SessionRecorder;
use crate::registry::ToolRegistry;
use crate::stats::StreamStats;
use crate::transport::Connector;

/// Bounded reconnection with exponential backoff.
#[derive(Debug, Clone)]
pub struct ReconnectPolicy {
    pub max_attempts: u32,
    pub initial_backoff: Duration,
    pub max_backoff: Duration,
}

impl Default for ReconnectPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 5,
            initial_backoff: Duration::from_secs(1),
            max_backoff: Duration::from_secs(30),
        }
    }
}

impl ReconnectPolicy {
    /// Delay before the given 1-based attempt: doubles per attempt,
    /// capped at `max_backoff`.
    pub fn backoff_for(&self, attempt: u32) -> Duration {
        let exp = attempt.saturating_sub(1).min(16);
        self.initial_backoff
            .saturating_mul(1u32 << exp)
            .min(self.max_backoff)
    }
}

#[derive(Debug, Clone)]
pub struct SessionOptions {
    pub model: String,
    pub system_prompt: Option<String>,
    pub temperature: f64,
    pub max_output_tokens: u32,
    pub approval_required: bool,
    pub reconnect: ReconnectPolicy,
    pub buffer: MultimodalBufferConfig,
    /// Optional whole-session timeout; cancels everything when it fires.
    pub session_timeout: Option<Duration>,
}

impl Default for SessionOptions {
    fn default() -> Self {
        Self {
            model: "gemini-2.0-flash-exp".to_string(),
            system_prompt: None,
            temperature: 0.7,
            max_output_tokens: 4096,
            approval_required: false,
            reconnect: ReconnectPolicy::default(),
            buffer: MultimodalBufferConfig::default(),
            session_timeout: None,
        }
    }
}

/// The only way into a running session.
#[derive(Debug, Clone)]
pub enum SessionCommand {
    SendText(String),
    Approve(usize),
    Reject(usize),
    Quit,
}

/// Cheap handle for feeding commands into the control loop.
#[derive(Clone)]
pub struct SessionHandle {
    commands: mpsc::Sender<SessionCommand>,
    cancel: CancellationToken,
}

impl SessionHandle {
    pub async fn send(&self, command: SessionCommand) -> Result<(), SessionError> {
        self.commands
            .send(command)
            .await
            .map_err(|_| SessionError::ShuttingDown)
    }

    /// Cancel the whole session immediately.
    pub fn cancel(&self) {
        self.cancel.cancel();
    }
}

/// What the control loop should do after handling one item.
enum LoopAction {
    Continue,
    /// Retryable transport failure: run the reconnect policy.
    Reconnect(TransportError),
    /// Fatal transport failure: land in `Error`, keep serving commands.
    Fatal(TransportError),
    Stop,
}

type InboundReceiver = mpsc::Receiver<Result<ServerEvent, TransportError>>;

pub struct SessionController {
    id: SessionId,
    options: SessionOptions,
    state: SessionState,
    history: Arc<Mutex<Vec<Message>>>,
    partial_text: String,
    partial_audio: Vec<u8>,
    connector: Arc<dyn Connector>,
    sink: Option<Box<dyn crate::transport::TransportSink>>,
    coordinator: ToolCallCoordinator,
    buffer: Arc<MultimodalBuffer>,
    stats: Arc<StreamStats>,
    events: EventBus,
    recorder: Option<Arc<SessionRecorder>>,
    cancel: CancellationToken,
    last_error: Option<String>,
    state_tx: watch::Sender<SessionState>,
    cmd_tx: mpsc::Sender<SessionCommand>,
    cmd_rx: Option<mpsc::Receiver<SessionCommand>>,
    media_tx: mpsc::Sender<ClientEvent>,
    media_rx: Option<mpsc::Receiver<ClientEvent>>,
}

impl SessionController {
    pub fn new(
        options: SessionOptions,
        connector: Arc<dyn Connector>,
        registry: Arc<ToolRegistry>,
    ) -> Self {
        let (cmd_tx, cmd_rx) = mpsc::channel(32);
        let (media_tx, media_rx) = mpsc::channel(32);
        let stats = Arc::new(StreamStats::new());
        let buffer = Arc::new(MultimodalBuffer::new(
            options.buffer.clone(),
            Arc::clone(&stats),
        ));
        let coordinator = ToolCallCoordinator::new(registry, options.approval_required);
        let (state_tx, _) = watch::channel(SessionState::Initializing);

        Self {
            id: SessionId::new(),
            options,
            state: SessionState::Initializing,
            history: Arc::new(Mutex::new(Vec::new())),
            partial_text: String::new(),
            partial_audio: Vec::new(),
            connector,
            sink: None,
            coordinator,
            buffer,
            stats,
            events: EventBus::new(64),
            recorder: None,
            cancel: CancellationToken::new(),
            last_error: None,
            state_tx,
            cmd_tx,
            cmd_rx: Some(cmd_rx),
            media_tx,
            media_rx: Some(media_rx),
        }
    }

    pub fn with_recorder(mut self, recorder: Arc<SessionRecorder>) -> Self {
        self.recorder = Some(recorder);
        self
    }

    pub fn id(&self) -> &SessionId {
        &self.id
    }

    pub fn handle(&self) -> SessionHandle {
        SessionHandle {
            commands: self.cmd_tx.clone(),
            cancel: self.cancel.clone(),
        }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<SessionEvent> {
        self.events.subscribe()
    }

    /// Watch state transitions without subscribing to the full bus.
    pub fn state_watch(&self) -> watch::Receiver<SessionState> {
        self.state_tx.subscribe()
    }

    pub fn buffer(&self) -> Arc<MultimodalBuffer> {
        Arc::clone(&self.buffer)
    }

    pub fn stats(&self) -> Arc<StreamStats> {
        Arc::clone(&self.stats)
    }

    pub fn history(&self) -> Arc<Mutex<Vec<Message>>> {
        Arc::clone(&self.history)
    }

    pub fn last_error(&self) -> Option<&str> {
        self.last_error.as_deref()
    }

    /// Run the session to completion. Consumes the controller; all
    /// interaction happens through the handle and the event bus.
    pub async fn run(mut self) {
        let mut cmd_rx = self.cmd_rx.take().expect("controller already running");
        let mut media_rx = self.media_rx.take().expect("controller already running");

        let (audio_task, image_task) = spawn_flush_tasks(
            Arc::clone(&self.buffer),
            self.media_tx.clone(),
            self.cancel.child_token(),
        );

        if let Some(timeout) = self.options.session_timeout {
            let cancel = self.cancel.clone();
            tokio::spawn(async move {
                tokio::select! {
                    _ = cancel.cancelled() => {}
                    _ = tokio::time::sleep(timeout) => {
                        info!(?timeout, "session timeout reached");
                        cancel.cancel();
                    }
                }
            });
        }

        info!(session = %self.id, model = %self.options.model, "starting session");
        self.set_state(SessionState::Connecting);

        let mut inbound_rx: Option<InboundReceiver> = match self.establish().await {
            Ok(rx) => {
                self.set_state(SessionState::Ready);
                Some(rx)
            }
            Err(e) if e.is_retryable() => {
                self.enter_error(e.to_string());
                self.reconnect().await
            }
            Err(e) => {
                self.enter_error(e.to_string());
                None
            }
        };

        let cancel = self.cancel.clone();
        loop {
            let action = tokio::select! {
                _ = cancel.cancelled() => LoopAction::Stop,
                Some(command) = cmd_rx.recv() => self.handle_command(command).await,
                Some(event) = media_rx.recv() => self.send_media(event).await,
                inbound = recv_inbound(&mut inbound_rx), if inbound_rx.is_some() => {
                    match inbound {
                        Some(Ok(event)) => self.dispatch(event).await,
                        Some(Err(e)) if e.is_retryable() => LoopAction::Reconnect(e),
                        Some(Err(e)) => LoopAction::Fatal(e),
                        None => {
                            info!("service closed the stream");
                            LoopAction::Stop
                        }
                    }
                }
            };

            match action {
                LoopAction::Continue => {}
                LoopAction::Reconnect(e) => {
                    warn!(error = %e, "transport failure, attempting reconnect");
                    self.enter_error(e.to_string());
                    inbound_rx = self.reconnect().await;
                }
                LoopAction::Fatal(e) => {
                    warn!(error = %e, "fatal transport failure");
                    self.enter_error(e.to_string());
                    if let Some(mut sink) = self.sink.take() {
                        let _ = sink.close().await;
                    }
                    inbound_rx = None;
                }
                LoopAction::Stop => break,
            }
        }

        self.shutdown().await;
        let _ = audio_task.await;
        let _ = image_task.await;
        info!(session = %self.id, "session finished");
    }

    /// Open a fresh transport, discarding any previous sink, and spawn
    /// the inbound-drain task for the new stream.
    async fn establish(&mut self) -> Result<InboundReceiver, TransportError> {
        if let Some(mut sink) = self.sink.take() {
            let _ = sink.close().await;
        }

        let pair = self.connector.connect().await?;
        self.sink = Some(pair.sink);

        let (tx, rx) = mpsc::channel(64);
        let cancel = self.cancel.child_token();
        let mut stream = pair.stream;
        tokio::spawn(async move {
            loop {
                tokio::select! {
                    _ = cancel.cancelled() => break,
                    event = stream.next_event() => match event {
                        Some(item) => {
                            let failed = item.is_err();
                            if tx.send(item).await.is_err() || failed {
                                break;
                            }
                        }
                        None => break,
                    }
                }
            }
            trace!("inbound task stopped");
        });
        Ok(rx)
    }

    /// Bounded backoff loop. Returns the new inbound receiver on
    /// success; on exhaustion (or a fatal error mid-retry) the state
    /// remains `Error` and `None` is returned.
    async fn reconnect(&mut self) -> Option<InboundReceiver> {
        let policy = self.options.reconnect.clone();
        for attempt in 1..=policy.max_attempts {
            self.set_state(SessionState::Reconnecting);
            self.events.publish(SessionEvent::Reconnecting { attempt });

            let backoff = policy.backoff_for(attempt);
            debug!(attempt, ?backoff, "waiting before reconnect");
            tokio::select! {
                _ = self.cancel.cancelled() => return None,
                _ = tokio::time::sleep(backoff) => {}
            }

            self.set_state(SessionState::Connecting);
            match self.establish().await {
                Ok(rx) => {
                    self.stats.incr(&self.stats.reconnects);
                    self.last_error = None;
                    self.set_state(SessionState::Ready);
                    info!(attempt, "reconnected");
                    return Some(rx);
                }
                Err(e) if e.is_retryable() => {
                    warn!(attempt, error = %e, "reconnect attempt failed");
                }
                Err(e) => {
                    self.enter_error(e.to_string());
                    return None;
                }
            }
        }

        self.enter_error(SessionError::ReconnectExhausted(policy.max_attempts).to_string());
        None
    }

    async fn handle_command(&mut self, command: SessionCommand) -> LoopAction {
        match command {
            SessionCommand::SendText(text) => self.send_text(text).await,
            SessionCommand::Approve(index) => self.resolve_tool(index, true).await,
            SessionCommand::Reject(index) => self.resolve_tool(index, false).await,
            SessionCommand::Quit => LoopAction::Stop,
        }
    }

    /// Send a user message. Outside `Ready`/`AwaitingResponse` this
    /// fails with a "stream not initialized" error instead of blocking.
    async fn send_text(&mut self, text: String) -> LoopAction {
        if !self.state.can_send() {
            let err = SessionError::StreamNotInitialized(self.state.to_string());
            warn!(state = %self.state, "rejected send_text");
            self.events.publish(SessionEvent::SessionError(err.to_string()));
            return LoopAction::Continue;
        }

        let message = Message::user(text.clone());
        self.append_history(message.clone());
        self.events.publish(SessionEvent::MessageAppended(message));

        self.set_state(SessionState::Sending);
        let action = self.send_event(ClientEvent::Text(text)).await;
        if matches!(action, LoopAction::Continue) {
            // The turn is open; partial output keeps this state until
            // the turn-complete marker.
            self.set_state(SessionState::AwaitingResponse);
        }
        action
    }

    /// Forward one coalesced media payload from the flush tasks.
    async fn send_media(&mut self, event: ClientEvent) -> LoopAction {
        if self.sink.is_none() || !self.state.can_stream_media() {
            trace!(state = %self.state, "dropping media payload, not streaming");
            return LoopAction::Continue;
        }

        let was_ready = self.state == SessionState::Ready;
        if was_ready {
            self.set_state(SessionState::Sending);
        }
        let action = self.send_event(event).await;
        if was_ready && matches!(action, LoopAction::Continue) {
            self.set_state(SessionState::Ready);
        }
        action
    }

    /// Classify and handle one inbound event. Exactly one handler per
    /// event; unknown shapes are logged and dropped.
    async fn dispatch(&mut self, event: ServerEvent) -> LoopAction {
        if let Some(recorder) = &self.recorder {
            recorder.record_receive(&event);
        }

        match event {
            ServerEvent::SetupComplete => {
                debug!("setup acknowledged");
                LoopAction::Continue
            }
            ServerEvent::TextDelta(text) => {
                self.stats.incr(&self.stats.text_deltas);
                self.partial_text.push_str(&text);
                self.events.publish(SessionEvent::TextDelta(text));
                LoopAction::Continue
            }
            ServerEvent::AudioDelta(bytes) => {
                self.stats.add(&self.stats.audio_bytes_in, bytes.len() as u64);
                self.partial_audio.extend_from_slice(&bytes);
                self.events.publish(SessionEvent::AudioDelta(bytes));
                LoopAction::Continue
            }
            ServerEvent::ToolCallRequest(calls) => self.handle_tool_calls(calls).await,
            ServerEvent::TurnComplete => {
                self.finish_turn();
                LoopAction::Continue
            }
            ServerEvent::StreamClosed => {
                info!("service announced stream close");
                LoopAction::Stop
            }
            ServerEvent::Unknown(payload) => {
                warn!(%payload, "unknown inbound event, dropping");
                LoopAction::Continue
            }
        }
    }

    async fn handle_tool_calls(&mut self, calls: Vec<murmur_common::ToolCall>) -> LoopAction {
        self.stats.add(&self.stats.tool_calls, calls.len() as u64);
        self.events
            .publish(SessionEvent::ToolCallsRequested(calls.clone()));

        match self.coordinator.submit(calls.clone()) {
            SubmitOutcome::Executed(results) => {
                for (call, result) in calls.into_iter().zip(results.iter().cloned()) {
                    let record = Message::tool_record(call, result.clone());
                    self.append_history(record);
                    self.events.publish(SessionEvent::ToolResultReady(result));
                }
                self.send_tool_results(results).await
            }
            SubmitOutcome::AwaitingApproval(count) => {
                debug!(count, "entering tool approval");
                let pending: Vec<_> = self
                    .coordinator
                    .pending_calls()
                    .into_iter()
                    .cloned()
                    .collect();
                self.set_state(SessionState::ToolApprovalPending);
                self.events.publish(SessionEvent::ApprovalRequired(pending));
                LoopAction::Continue
            }
        }
    }

    /// Apply one approval decision. Once the whole batch is resolved,
    /// results are flushed in submission order and streaming resumes.
    async fn resolve_tool(&mut self, index: usize, approved: bool) -> LoopAction {
        if self.state != SessionState::ToolApprovalPending {
            self.events.publish(SessionEvent::SessionError(
                "no tool calls awaiting approval".to_string(),
            ));
            return LoopAction::Continue;
        }

        if let Err(e) = self.coordinator.resolve(index, approved) {
            self.events
                .publish(SessionEvent::SessionError(e.to_string()));
            return LoopAction::Continue;
        }

        if !self.coordinator.all_resolved() {
            return LoopAction::Continue;
        }

        let pairs = self.coordinator.flush();
        let results: Vec<ToolResult> = pairs.iter().map(|(_, r)| r.clone()).collect();
        for (call, result) in pairs {
            let record = Message::tool_record(call, result.clone());
            self.append_history(record);
            self.events.publish(SessionEvent::ToolResultReady(result));
        }

        self.set_state(SessionState::AwaitingResponse);
        self.send_tool_results(results).await
    }

    async fn send_tool_results(&mut self, results: Vec<ToolResult>) -> LoopAction {
        if results.is_empty() {
            return LoopAction::Continue;
        }
        self.send_event(ClientEvent::ToolResults(results)).await
    }

    async fn send_event(&mut self, event: ClientEvent) -> LoopAction {
        let Some(sink) = self.sink.as_mut() else {
            self.events.publish(SessionEvent::SessionError(
                SessionError::StreamNotInitialized(self.state.to_string()).to_string(),
            ));
            return LoopAction::Continue;
        };

        match sink.send(&event).await {
            Ok(()) => {
                if let ClientEvent::RealtimeInput(_) = &event {
                    trace!("media payload sent");
                }
                if let Some(recorder) = &self.recorder {
                    recorder.record_send(&event);
                }
                LoopAction::Continue
            }
            Err(e) if e.is_retryable() => LoopAction::Reconnect(e),
            Err(e) => LoopAction::Fatal(e),
        }
    }

    /// Close out the current model turn.
    fn finish_turn(&mut self) {
        let text = std::mem::take(&mut self.partial_text);
        let audio = std::mem::take(&mut self.partial_audio);
        if !text.is_empty() || !audio.is_empty() {
            let message = Message::model(text, (!audio.is_empty()).then_some(audio), true);
            self.append_history(message.clone());
            self.events.publish(SessionEvent::MessageAppended(message));
        }
        self.events.publish(SessionEvent::TurnComplete);
        self.set_state(SessionState::Ready);
    }

    fn append_history(&self, message: Message) {
        self.history
            .lock()
            .expect("history poisoned")
            .push(message);
    }

    fn enter_error(&mut self, message: String) {
        self.last_error = Some(message.clone());
        self.events.publish(SessionEvent::SessionError(message));
        self.set_state(SessionState::Error);
    }

    fn set_state(&mut self, state: SessionState) {
        if self.state == state {
            return;
        }
        debug!(from = %self.state, to = %state, "state transition");
        self.state = state;
        self.state_tx.send_replace(state);
        self.events.publish(SessionEvent::StateChanged(state));
    }

    async fn shutdown(&mut self) {
        self.set_state(SessionState::Quitting);
        self.cancel.cancel();
        if let Some(mut sink) = self.sink.take() {
            let _ = sink.close().await;
        }
        self.events.publish(SessionEvent::Closed);
    }
}

async fn recv_inbound(
    rx: &mut Option<InboundReceiver>,
) -> Option<Result<ServerEvent, TransportError>> {
    match rx {
        Some(rx) => rx.recv().await,
        // Unreachable: the select arm is guarded by `is_some`.
        None => std::future::pending().await,
    }
}
