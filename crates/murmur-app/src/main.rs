mod cli;
mod tools;

use std::collections::VecDeque;
use std::io::Write as _;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use tokio::io::AsyncBufReadExt;
use tokio::sync::broadcast;
use tracing::{debug, info, warn};
use tracing_subscriber::EnvFilter;

use murmur_common::{ConfigError, MurmurError, SessionEvent};
use murmur_config::MurmurConfig;
use murmur_live::protocol::GenerationConfig;
use murmur_live::{
    Connector, MultimodalBufferConfig, ReconnectPolicy, ReplayConnector, SessionCommand,
    SessionController, SessionOptions, SessionRecorder, SessionSetup, ToolRegistry, WsConnector,
};

/// Load environment variables from a .env file (KEY=VALUE lines).
fn load_dotenv() {
    let candidates = [
        std::path::PathBuf::from(".env"),
        std::path::PathBuf::from(env!("CARGO_MANIFEST_DIR"))
            .join("..")
            .join("..")
            .join(".env"),
    ];

    for path in &candidates {
        if let Ok(contents) = std::fs::read_to_string(path) {
            for line in contents.lines() {
                let line = line.trim();
                if line.is_empty() || line.starts_with('#') {
                    continue;
                }
                if let Some((key, value)) = line.split_once('=') {
                    let key = key.trim();
                    let value = value.trim().trim_matches('"').trim_matches('\'');
                    if std::env::var(key).is_err() {
                        std::env::set_var(key, value);
                    }
                }
            }
            return;
        }
    }
}

fn load_config(args: &cli::Args) -> Result<MurmurConfig, ConfigError> {
    match &args.config {
        Some(path) => murmur_config::load_from_path(path),
        None => murmur_config::load_config(),
    }
}

fn session_options(config: &MurmurConfig, args: &cli::Args) -> SessionOptions {
    let session_timeout = (config.transport.session_timeout_secs > 0)
        .then(|| Duration::from_secs(config.transport.session_timeout_secs));

    SessionOptions {
        model: args
            .model
            .clone()
            .unwrap_or_else(|| config.session.model.clone()),
        system_prompt: (!config.session.system_prompt.is_empty())
            .then(|| config.session.system_prompt.clone()),
        temperature: config.session.temperature,
        max_output_tokens: config.session.max_output_tokens,
        approval_required: args.approve_tools || config.tools.approval_required,
        reconnect: ReconnectPolicy {
            max_attempts: config.reconnect.max_attempts,
            initial_backoff: Duration::from_millis(config.reconnect.initial_backoff_ms),
            max_backoff: Duration::from_millis(config.reconnect.max_backoff_ms),
        },
        buffer: MultimodalBufferConfig {
            audio_capacity: config.buffer.audio_capacity,
            image_capacity: config.buffer.image_capacity,
            audio_flush_interval: Duration::from_millis(config.buffer.audio_flush_ms),
            image_flush_interval: Duration::from_millis(config.buffer.image_flush_ms),
            max_payload_bytes: config.buffer.max_payload_kb * 1024,
            ..Default::default()
        },
        session_timeout,
    }
}

fn build_connector(
    config: &MurmurConfig,
    args: &cli::Args,
    options: &SessionOptions,
    registry: &ToolRegistry,
) -> Result<Arc<dyn Connector>, MurmurError> {
    if let Some(path) = &args.replay {
        info!(path = %path.display(), "replaying recorded session");
        return Ok(Arc::new(ReplayConnector::from_file(path)?));
    }

    let api_key = std::env::var(&config.transport.api_key_env)
        .map_err(|_| ConfigError::MissingCredential(config.transport.api_key_env.clone()))?;

    let setup = SessionSetup {
        model: options.model.clone(),
        system_instruction: options.system_prompt.clone(),
        generation_config: GenerationConfig {
            temperature: options.temperature,
            max_output_tokens: options.max_output_tokens,
        },
        tools: registry.declarations(),
    };

    Ok(Arc::new(
        WsConnector::new(&config.transport.url, api_key, setup).with_connect_timeout(
            Duration::from_secs(config.transport.connect_timeout_secs),
        ),
    ))
}

/// Print session events as they arrive. Approval requests land in the
/// shared queue so the input loop can resolve them.
async fn print_events(
    mut events: broadcast::Receiver<SessionEvent>,
    pending: Arc<Mutex<VecDeque<usize>>>,
) {
    loop {
        match events.recv().await {
            Ok(SessionEvent::TextDelta(delta)) => {
                print!("{delta}");
                let _ = std::io::stdout().flush();
            }
            Ok(SessionEvent::TurnComplete) => {
                println!();
            }
            Ok(SessionEvent::ToolCallsRequested(calls)) => {
                for call in &calls {
                    println!("[tool call] {} {}", call.name, call.args);
                }
            }
            Ok(SessionEvent::ApprovalRequired(calls)) => {
                let mut pending = pending.lock().expect("approval queue poisoned");
                for (index, call) in calls.iter().enumerate() {
                    println!("[approval #{index}] {} {}", call.name, call.args);
                    pending.push_back(index);
                }
                println!("approve next call? [y/n]");
            }
            Ok(SessionEvent::ToolResultReady(result)) => {
                if let Some(error) = &result.error {
                    println!("[tool {} error] {error}", result.name);
                } else {
                    debug!(tool = %result.name, "tool result sent");
                }
            }
            Ok(SessionEvent::Reconnecting { attempt }) => {
                eprintln!("[reconnecting, attempt {attempt}]");
            }
            Ok(SessionEvent::SessionError(message)) => {
                eprintln!("[error] {message}");
            }
            Ok(SessionEvent::StateChanged(state)) => {
                debug!(%state, "session state");
            }
            Ok(SessionEvent::Closed) => break,
            Ok(_) => {}
            Err(broadcast::error::RecvError::Lagged(n)) => {
                warn!(skipped = n, "event printer lagged");
            }
            Err(broadcast::error::RecvError::Closed) => break,
        }
    }
}

async fn run() -> Result<(), MurmurError> {
    let args = cli::parse();
    let config = load_config(&args)?;

    let log_directive = args
        .log_level
        .clone()
        .unwrap_or_else(|| config.logging.level.clone());
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::from_default_env().add_directive(
                log_directive
                    .parse()
                    .unwrap_or_else(|_| "murmur=info".parse().unwrap()),
            ),
        )
        .init();

    let mut registry = ToolRegistry::new();
    tools::register_builtin_tools(&mut registry)?;
    let registry = Arc::new(registry);

    let options = session_options(&config, &args);
    let connector = build_connector(&config, &args, &options, &registry)?;

    let recorder = if args.record.is_some() || config.recording.enabled {
        Some(Arc::new(SessionRecorder::new()))
    } else {
        None
    };
    let record_path = args.record.clone().or_else(|| {
        config.recording.enabled.then(|| {
            if config.recording.path.is_empty() {
                let stamp = chrono::Local::now().format("%Y%m%d-%H%M%S");
                std::path::PathBuf::from(format!("murmur-{stamp}.json"))
            } else {
                std::path::PathBuf::from(&config.recording.path)
            }
        })
    });

    let mut controller = SessionController::new(options, connector, Arc::clone(&registry));
    if let Some(recorder) = &recorder {
        controller = controller.with_recorder(Arc::clone(recorder));
    }

    let session_id = controller.id().clone();
    let handle = controller.handle();
    let events = controller.subscribe();
    let stats = controller.stats();

    println!("murmur session {session_id} (Ctrl-D or /quit to exit)");

    let pending: Arc<Mutex<VecDeque<usize>>> = Arc::new(Mutex::new(VecDeque::new()));
    let printer = tokio::spawn(print_events(events, Arc::clone(&pending)));
    let mut session = tokio::spawn(controller.run());

    let mut lines = tokio::io::BufReader::new(tokio::io::stdin()).lines();
    let mut session_finished = false;
    loop {
        tokio::select! {
            _ = &mut session, if !session_finished => {
                session_finished = true;
                break;
            }
            line = lines.next_line() => {
                let line = match line {
                    Ok(Some(line)) => line,
                    // EOF or a read error: shut the session down.
                    _ => {
                        let _ = handle.send(SessionCommand::Quit).await;
                        break;
                    }
                };
                let line = line.trim();
                if line.is_empty() {
                    continue;
                }

                if line == "/quit" || line == "/exit" {
                    let _ = handle.send(SessionCommand::Quit).await;
                    continue;
                }

                let decision = {
                    let mut pending = pending.lock().expect("approval queue poisoned");
                    match line {
                        "y" | "yes" if !pending.is_empty() => pending.pop_front().map(|i| (i, true)),
                        "n" | "no" if !pending.is_empty() => pending.pop_front().map(|i| (i, false)),
                        _ => None,
                    }
                };

                if let Some((index, approved)) = decision {
                    let command = if approved {
                        SessionCommand::Approve(index)
                    } else {
                        SessionCommand::Reject(index)
                    };
                    let _ = handle.send(command).await;
                    if !pending.lock().expect("approval queue poisoned").is_empty() {
                        println!("approve next call? [y/n]");
                    }
                    continue;
                }

                let _ = handle.send(SessionCommand::SendText(line.to_string())).await;
            }
        }
    }

    if !session_finished {
        let _ = session.await;
    }
    let _ = printer.await;

    if let (Some(recorder), Some(path)) = (&recorder, &record_path) {
        recorder.save(path)?;
        println!("session recording saved to {}", path.display());
    }

    let snapshot = stats.snapshot();
    info!(
        text_deltas = snapshot.text_deltas,
        audio_seconds_in = %format!("{:.1}", stats.audio_seconds_in()),
        tool_calls = snapshot.tool_calls,
        reconnects = snapshot.reconnects,
        "session statistics"
    );

    Ok(())
}

#[tokio::main]
async fn main() {
    load_dotenv();

    if let Err(e) = run().await {
        eprintln!("murmur: {e}");
        std::process::exit(1);
    }
}
