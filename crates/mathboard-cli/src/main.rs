//! Mathboard CLI
//!
//! Terminal client for stepping through math explanations.

use std::net::SocketAddr;
use std::path::Path;
use std::process::ExitCode;
use std::sync::Arc;

use clap::Parser;
use mathboard_session::{
    create_router, spawn_ws_transport, ActionOutcome, AppState, BroadcastSink, Config,
    DecodingPlayer, IgnoredReason, MathboardError, RenderContent, SessionController,
    SessionHandle, TimedOutput, ViewBroadcaster, ViewEvent,
};
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::net::TcpListener;
use tokio::sync::{broadcast, mpsc};
use tracing_subscriber::EnvFilter;

/// Buffer between the transport adapter and the controller.
const TRANSPORT_EVENT_BUFFER: usize = 64;

/// Mathboard - step-by-step math explanations
///
/// Sends questions to the step service and plays the returned steps one at a
/// time, with narration, in the terminal and on the local view socket.
#[derive(Parser, Debug)]
#[command(name = "mathboard")]
#[command(version, about, long_about = None)]
struct Args {
    /// Path to configuration file (default: mathboard.json in current directory)
    #[arg(short, long, value_name = "FILE")]
    config: Option<String>,

    /// WebSocket URL of the step service
    #[arg(short, long, value_name = "URL")]
    server: Option<String>,

    /// Port for the local HTTP API and view socket
    #[arg(short, long)]
    port: Option<u16>,

    /// Enable verbose output (sets log level to debug)
    #[arg(short, long)]
    verbose: bool,

    /// Do not play narration
    #[arg(long)]
    no_audio: bool,
}

/// A line typed at the prompt.
#[derive(Debug, Clone, PartialEq, Eq)]
enum Command {
    Ask(String),
    Next,
    Back,
    Replay,
    Status,
    Help,
    Quit,
}

impl Command {
    /// Parses a prompt line; bare text is treated as a question.
    fn parse(line: &str) -> Option<Self> {
        let line = line.trim();
        if line.is_empty() {
            return None;
        }

        let (word, rest) = line
            .split_once(char::is_whitespace)
            .map_or((line, ""), |(word, rest)| (word, rest.trim()));

        let command = match word.to_ascii_lowercase().as_str() {
            "ask" | "?" => Self::Ask(rest.to_string()),
            "next" | "n" => Self::Next,
            "back" | "b" | "prev" => Self::Back,
            "replay" | "r" => Self::Replay,
            "status" | "s" => Self::Status,
            "help" | "h" => Self::Help,
            "quit" | "exit" | "q" => Self::Quit,
            _ => Self::Ask(line.to_string()),
        };
        Some(command)
    }
}

#[tokio::main]
async fn main() -> ExitCode {
    let args = Args::parse();

    // Priority: RUST_LOG env var > --verbose flag > default (info)
    let filter = if args.verbose {
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("debug"))
    } else {
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"))
    };

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();

    tracing::info!("Mathboard starting");
    tracing::debug!(config = ?args.config, "Config file");

    match run_session(args).await {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            eprintln!("Error: {e}");
            ExitCode::from(1)
        }
    }
}

/// Wires the transport, controller, API server, and terminal together and
/// reads commands until the user quits.
async fn run_session(args: Args) -> anyhow::Result<()> {
    let mut config = load_config(args.config.as_deref())?;

    if let Some(ref server) = args.server {
        config.server_url.clone_from(server);
    }
    if let Some(port) = args.port {
        config.api_port = port;
    }
    if args.no_audio {
        config.audio.enabled = false;
    }

    // Re-validate after overrides
    config.validate()?;

    print_config(&config);

    let broadcaster = ViewBroadcaster::new(config.view_event_capacity);
    let printer = tokio::spawn(print_view_events(broadcaster.subscribe()));

    let (events_tx, events_rx) = mpsc::channel(TRANSPORT_EVENT_BUFFER);
    let (transport, transport_task) = spawn_ws_transport(config.server_url.clone(), events_tx);

    let player = DecodingPlayer::with_enabled(
        TimedOutput::from_config(&config.audio),
        config.audio.enabled,
    );
    let controller = SessionController::new(
        transport,
        Arc::new(BroadcastSink::new(broadcaster.clone())),
        Arc::new(player),
    );
    let (session, controller_task) = controller.spawn(config.command_buffer, events_rx);

    let addr: SocketAddr = ([127, 0, 0, 1], config.api_port).into();
    let router = create_router(AppState::new(session.clone(), broadcaster));
    let listener = TcpListener::bind(addr).await.map_err(|e| {
        anyhow::anyhow!(
            "Failed to bind to {addr}: {e}\n\nSuggestion: Try a different port with --port"
        )
    })?;

    let server_handle = tokio::spawn(async move {
        if let Err(e) = axum::serve(listener, router).await {
            tracing::error!(error = %e, "HTTP server error");
        }
    });

    println!("View socket on ws://{addr}/ws");
    println!();
    print_help();
    println!();

    let result = read_commands(&session).await;

    println!();
    println!("Shutting down...");
    // Open view sockets hold session handles, so the tasks are stopped
    // rather than waited on
    drop(session);
    server_handle.abort();
    controller_task.abort();
    transport_task.abort();
    printer.abort();

    result
}

/// Reads prompt lines until `quit`, end of input, or Ctrl+C.
async fn read_commands(session: &SessionHandle) -> anyhow::Result<()> {
    let mut lines = BufReader::new(tokio::io::stdin()).lines();

    loop {
        tokio::select! {
            Ok(()) = tokio::signal::ctrl_c() => {
                tracing::info!("Received Ctrl+C, shutting down");
                return Ok(());
            }
            line = lines.next_line() => {
                let Some(line) = line? else {
                    tracing::debug!("End of input");
                    return Ok(());
                };
                let Some(command) = Command::parse(&line) else {
                    continue;
                };
                if command == Command::Quit {
                    return Ok(());
                }
                execute(session, command).await?;
            }
        }
    }
}

/// Runs one command against the session.
async fn execute(session: &SessionHandle, command: Command) -> anyhow::Result<()> {
    let outcome = match command {
        Command::Ask(prompt) => {
            return match session.ask(prompt).await {
                Ok(request_id) => {
                    tracing::debug!(request_id = %request_id, "Question sent");
                    Ok(())
                }
                Err(e) => keep_going_unless_fatal(e),
            };
        }
        Command::Next => session.next().await?,
        Command::Back => session.back().await?,
        Command::Replay => session.replay().await?,
        Command::Status => {
            let snapshot = session.snapshot().await?;
            println!("{}", serde_json::to_string_pretty(&snapshot)?);
            return Ok(());
        }
        Command::Help => {
            print_help();
            return Ok(());
        }
        Command::Quit => return Ok(()),
    };

    if let ActionOutcome::Ignored(reason) = outcome {
        println!("  ({})", describe_ignored(reason));
    }
    Ok(())
}

/// Recoverable errors have already reached the view events, so the prompt
/// continues; anything else ends the session.
fn keep_going_unless_fatal(error: MathboardError) -> anyhow::Result<()> {
    if error.is_recoverable() {
        tracing::debug!(error = %error, "Command not applied");
        Ok(())
    } else {
        Err(error.into())
    }
}

/// Loads configuration from the specified path or default location.
fn load_config(config_path: Option<&str>) -> anyhow::Result<Config> {
    match config_path {
        Some(path_str) => {
            let path = Path::new(path_str);
            if !path.exists() {
                anyhow::bail!(
                    "Config file not found: '{}'\n\nSuggestion: Check the path or remove the --config flag to use defaults",
                    path.display()
                );
            }
            Config::load_from_file(path).map_err(|e| anyhow::anyhow!("{e}"))
        }
        None => Config::load().map_err(|e| anyhow::anyhow!("{e}")),
    }
}

/// Prints configuration summary.
fn print_config(config: &Config) {
    println!("Configuration loaded:");
    println!("  Step service: {}", config.server_url);
    println!("  API port: {}", config.api_port);
    println!(
        "  Narration: {}",
        if config.audio.enabled { "on" } else { "off" }
    );
}

fn print_help() {
    println!("Type a question, or one of:");
    println!("  next (n)     show the next step");
    println!("  back (b)     show the previous step");
    println!("  replay (r)   replay the narration");
    println!("  status (s)   show the session state");
    println!("  quit (q)     exit");
}

/// Prints view events until the broadcaster goes away.
async fn print_view_events(mut events: broadcast::Receiver<ViewEvent>) {
    loop {
        match events.recv().await {
            Ok(event) => {
                if let Some(line) = describe_event(&event) {
                    println!("{line}");
                }
            }
            Err(broadcast::error::RecvError::Lagged(skipped)) => {
                tracing::warn!(skipped, "Terminal fell behind view events");
            }
            Err(broadcast::error::RecvError::Closed) => break,
        }
    }
}

/// Terminal rendering of a view event; `None` for events with nothing to show.
fn describe_event(event: &ViewEvent) -> Option<String> {
    match event {
        ViewEvent::Cleared => Some("----------------------------------------".to_string()),
        ViewEvent::Loading(payload) if payload.active => Some("Thinking...".to_string()),
        ViewEvent::Render(payload) => Some(match &payload.content {
            RenderContent::Latex(source) => format!("  {source}"),
            RenderContent::Mathml(source) => format!("  [MathML] {source}"),
        }),
        ViewEvent::Explanation(payload) => payload.text.as_ref().map(|text| format!("  {text}")),
        ViewEvent::Playback(payload) if payload.playing => Some("  (narrating...)".to_string()),
        ViewEvent::Error(payload) => Some(format!("! {}", payload.message)),
        _ => None,
    }
}

const fn describe_ignored(reason: IgnoredReason) -> &'static str {
    match reason {
        IgnoredReason::AudioPlaying => "wait for the narration to finish",
        IgnoredReason::NothingQueued => "no further step yet",
        IgnoredReason::AtFirstStep => "already at the first step",
        IgnoredReason::NoStep => "ask a question first",
        IgnoredReason::NoAudio => "this step has no narration",
    }
}
