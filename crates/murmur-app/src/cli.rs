use clap::Parser;
use std::path::PathBuf;

/// Murmur — a live multimodal AI session client for the terminal.
#[derive(Parser, Debug)]
#[command(name = "murmur", version, about)]
pub struct Args {
    /// Config file path override.
    #[arg(long)]
    pub config: Option<PathBuf>,

    /// Model name override.
    #[arg(long)]
    pub model: Option<String>,

    /// Log level override (e.g. "murmur=debug").
    #[arg(long)]
    pub log_level: Option<String>,

    /// Record the session to a JSON file.
    #[arg(long)]
    pub record: Option<PathBuf>,

    /// Replay a recorded session file instead of connecting.
    #[arg(long)]
    pub replay: Option<PathBuf>,

    /// Require interactive approval before tool calls run.
    #[arg(long)]
    pub approve_tools: bool,
}

pub fn parse() -> Args {
    Args::parse()
}
