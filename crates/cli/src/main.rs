// GridChat CLI - run the session server, chat with a sheet from the terminal

mod client;
mod exit_codes;

use std::io::{self, BufRead, Write};
use std::path::{Path, PathBuf};
use std::process::ExitCode;
use std::sync::Arc;
use std::time::Duration;

use clap::{Parser, Subcommand, ValueEnum};

use gridchat_config::{ConfigError, ResolvedAgentConfig, Settings};
use gridchat_core::MatchMode;
use gridchat_engine::SpreadsheetEngine;
use gridchat_protocol::{EventPayload, WireChange};
use gridchat_server::{OpenAiAgent, SessionRegistry, SessionServer, SessionServerConfig, SessionSettings};

use client::{ChatClient, ClientError};
use exit_codes::{
    client_exit_code, EXIT_AGENT_CONFIG, EXIT_AGENT_MISSING_KEY, EXIT_ERROR, EXIT_IO, EXIT_PARSE,
    EXIT_SESSION_BIND, EXIT_SUCCESS, EXIT_USAGE,
};

const DEFAULT_ADDR: &str = "127.0.0.1:7420";

#[derive(Parser)]
#[command(name = "gridchat")]
#[command(about = "Chat with a spreadsheet: an agent edits the sheet through tools, every observer sees the changes")]
#[command(version)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run the session server
    #[command(after_help = "\
Examples:
  gridchat serve
  gridchat serve --bind 0.0.0.0:7420 --max-iterations 6
  GRIDCHAT_LOG=debug gridchat serve --config ./settings.toml")]
    Serve {
        /// Listen address (overrides settings)
        #[arg(long)]
        bind: Option<String>,

        /// Settings file (default: <config dir>/gridchat/settings.toml)
        #[arg(long, env = "GRIDCHAT_CONFIG")]
        config: Option<PathBuf>,

        /// Agent round trips allowed per chat turn
        #[arg(long)]
        max_iterations: Option<u32>,

        /// How find_replace matches cells
        #[arg(long, value_enum)]
        match_mode: Option<MatchModeArg>,
    },

    /// Upload a file (or join a session) and chat with it from stdin
    #[command(after_help = "\
Examples:
  gridchat chat --file sales.csv
  echo 'add a total row under the data' | gridchat chat --file sales.xlsx
  gridchat chat --session 5f0c... --json")]
    Chat {
        /// Spreadsheet to upload (csv, tsv, xlsx, xls, ods)
        #[arg(long, short = 'f', conflicts_with = "session", required_unless_present = "session")]
        file: Option<PathBuf>,

        /// Join an existing session instead of uploading
        #[arg(long)]
        session: Option<String>,

        /// Server address
        #[arg(long, default_value = DEFAULT_ADDR, env = "GRIDCHAT_ADDR")]
        addr: String,

        /// Print every server event as JSON lines
        #[arg(long)]
        json: bool,

        /// Seconds to wait for each turn's reply
        #[arg(long, default_value_t = 600)]
        timeout: u64,

        /// Close the session when stdin ends
        #[arg(long)]
        close: bool,
    },

    /// Print the tool schemas offered to the agent
    Tools,

    /// Load a file offline and print what the agent would see
    Inspect {
        /// Spreadsheet file
        file: PathBuf,

        /// Sample rows
        #[arg(long, default_value_t = 10)]
        rows: usize,

        /// Sample columns
        #[arg(long, default_value_t = 12)]
        cols: usize,

        /// Output JSON
        #[arg(long)]
        json: bool,
    },

    /// Show how the reasoning agent is configured
    Doctor {
        /// Settings file
        #[arg(long, env = "GRIDCHAT_CONFIG")]
        config: Option<PathBuf>,

        /// Output JSON
        #[arg(long)]
        json: bool,
    },
}

#[derive(Clone, Copy, ValueEnum)]
enum MatchModeArg {
    Exact,
    Substring,
}

impl From<MatchModeArg> for MatchMode {
    fn from(arg: MatchModeArg) -> Self {
        match arg {
            MatchModeArg::Exact => MatchMode::Exact,
            MatchModeArg::Substring => MatchMode::Substring,
        }
    }
}

fn main() -> ExitCode {
    init_logging();
    let cli = Cli::parse();

    let result = match cli.command {
        Commands::Serve { bind, config, max_iterations, match_mode } => {
            cmd_serve(bind, config, max_iterations, match_mode)
        }
        Commands::Chat { file, session, addr, json, timeout, close } => {
            cmd_chat(file, session, addr, json, timeout, close)
        }
        Commands::Tools => cmd_tools(),
        Commands::Inspect { file, rows, cols, json } => cmd_inspect(file, rows, cols, json),
        Commands::Doctor { config, json } => cmd_doctor(config, json),
    };

    match result {
        Ok(()) => ExitCode::from(EXIT_SUCCESS),
        Err(CliError { code, message, hint }) => {
            if !message.is_empty() {
                eprintln!("error: {}", message);
            }
            if let Some(hint) = hint {
                eprintln!("hint:  {}", hint);
            }
            ExitCode::from(code)
        }
    }
}

/// Log to stderr, filtered by GRIDCHAT_LOG (or RUST_LOG). Defaults to info.
fn init_logging() {
    use tracing_subscriber::EnvFilter;

    let filter = EnvFilter::try_from_env("GRIDCHAT_LOG")
        .or_else(|_| EnvFilter::try_from_default_env())
        .unwrap_or_else(|_| EnvFilter::new("info"));
    let _ = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(io::stderr)
        .try_init();
}

#[derive(Debug)]
pub struct CliError {
    pub code: u8,
    pub message: String,
    pub hint: Option<String>,
}

impl CliError {
    pub fn new(code: u8, msg: impl Into<String>) -> Self {
        Self { code, message: msg.into(), hint: None }
    }

    pub fn usage(msg: impl Into<String>) -> Self {
        Self::new(EXIT_USAGE, msg)
    }

    pub fn io(msg: impl Into<String>) -> Self {
        Self::new(EXIT_IO, msg)
    }

    pub fn client(err: ClientError) -> Self {
        let hint = match &err {
            ClientError::ConnectionFailed(_) => Some("is `gridchat serve` running at that address?".to_string()),
            ClientError::Server { code, retry_after_ms: Some(ms), .. } if code == "rate_limited" => {
                Some(format!("retry in {}ms", ms))
            }
            ClientError::Server { code, .. } if code == "not_found" => {
                Some("the session is gone; upload the file again".to_string())
            }
            _ => None,
        };
        Self { code: client_exit_code(&err), message: err.to_string(), hint }
    }

    pub fn with_hint(mut self, hint: impl Into<String>) -> Self {
        self.hint = Some(hint.into());
        self
    }
}

impl From<ClientError> for CliError {
    fn from(err: ClientError) -> Self {
        CliError::client(err)
    }
}

fn load_settings(path: Option<&Path>) -> Result<Settings, CliError> {
    match path {
        Some(path) => Settings::load_from(path).map_err(|e| {
            let code = match e {
                ConfigError::Io { .. } => EXIT_IO,
                _ => EXIT_AGENT_CONFIG,
            };
            CliError::new(code, e.to_string())
        }),
        None => Ok(Settings::load()),
    }
}

// ============================================================================
// serve
// ============================================================================

fn cmd_serve(
    bind: Option<String>,
    config: Option<PathBuf>,
    max_iterations: Option<u32>,
    match_mode: Option<MatchModeArg>,
) -> Result<(), CliError> {
    let mut settings = load_settings(config.as_deref())?;
    if let Some(bind) = bind {
        settings.server.bind = bind;
    }
    if let Some(n) = max_iterations {
        if n == 0 {
            return Err(CliError::usage("--max-iterations must be at least 1"));
        }
        settings.agent.max_iterations = n;
    }
    if let Some(mode) = match_mode {
        settings.engine.match_mode = mode.into();
    }

    let agent_config = ResolvedAgentConfig::from_settings(&settings.agent);
    let agent = OpenAiAgent::new(&agent_config).map_err(|e| {
        CliError::new(EXIT_AGENT_MISSING_KEY, e.to_string())
            .with_hint("set GRIDCHAT_OPENAI_KEY, or use provider = \"local\" under [agent]")
    })?;
    log::info!(
        "Agent: {} via {} (key from {})",
        agent.model(),
        agent_config.endpoint,
        agent_config.key_source.as_str()
    );

    let registry = Arc::new(SessionRegistry::new(Arc::new(agent), SessionSettings::from(&settings)));
    let mut server = SessionServer::new(registry);
    let addr = server
        .start(SessionServerConfig::from(&settings))
        .map_err(|e| CliError::new(EXIT_SESSION_BIND, format!("cannot listen on {}: {}", settings.server.bind, e)))?;

    println!("gridchat {} listening on {}", env!("CARGO_PKG_VERSION"), addr);
    io::stdout().flush().map_err(|e| CliError::io(e.to_string()))?;

    // Runs until the process is killed
    loop {
        std::thread::park();
    }
}

// ============================================================================
// chat
// ============================================================================

fn cmd_chat(
    file: Option<PathBuf>,
    session: Option<String>,
    addr: String,
    json: bool,
    timeout: u64,
    close: bool,
) -> Result<(), CliError> {
    let mut client = ChatClient::connect(&addr, Duration::from_secs(timeout.max(1)))?;

    let session_id = match (file, session) {
        (Some(path), _) => {
            let bytes = std::fs::read(&path).map_err(|e| CliError::io(format!("{}: {}", path.display(), e)))?;
            let filename = path
                .file_name()
                .map(|f| f.to_string_lossy().into_owned())
                .unwrap_or_default();
            let created = client.upload(&filename, &bytes)?;
            eprintln!(
                "session {} ({}: {} rows x {} cols)",
                created.session_id, created.name, created.extent.rows, created.extent.cols
            );
            created.session_id
        }
        (None, Some(id)) => id,
        (None, None) => return Err(CliError::usage("either --file or --session is required")),
    };

    let snapshot = client.attach(&session_id)?;
    log::debug!("attached at sequence {}", snapshot.sequence);

    let stdin = io::stdin();
    let mut failed_turn: Option<String> = None;
    for line in stdin.lock().lines() {
        let line = line.map_err(|e| CliError::io(e.to_string()))?;
        let text = line.trim();
        if text.is_empty() {
            continue;
        }

        let accepted = client.chat(text)?;
        if accepted.queued_behind > 0 && !json {
            eprintln!("(queued behind {} turn(s))", accepted.queued_behind);
        }

        let reply = client.wait_for_reply(accepted.turn, |payload| print_event(payload, json))?;
        if !json {
            match &reply.error {
                Some(code) => println!("[{}] {}", code, reply.text),
                None => println!("{}", reply.text),
            }
        }
        failed_turn = reply.error;
    }

    if close {
        client.close_session()?;
    }

    match failed_turn {
        Some(code) => Err(CliError::client(ClientError::Server {
            code,
            message: "last chat turn failed".to_string(),
            retry_after_ms: None,
        })),
        None => Ok(()),
    }
}

fn print_event(payload: &EventPayload, json: bool) {
    if json {
        if let Ok(line) = serde_json::to_string(payload) {
            println!("{}", line);
        }
        return;
    }
    match payload {
        EventPayload::StateDelta { sequence, change, extent } => {
            eprintln!("  #{} {} (sheet now {}x{})", sequence, describe_change(change), extent.rows, extent.cols);
        }
        EventPayload::ResyncRequired { last_sequence } => {
            eprintln!("  fell behind after #{}, re-attaching", last_sequence);
        }
        EventPayload::SessionClosed { reason } => eprintln!("  session closed: {}", reason),
        EventPayload::ChatReply { .. } => {}
    }
}

fn describe_change(change: &WireChange) -> String {
    match change {
        WireChange::Cells { range, values } => {
            let cells: usize = values.iter().map(|r| r.len()).sum();
            format!("wrote {} cell(s) at r{}c{}", cells, range.r1, range.c1)
        }
        WireChange::Sparse { cells, ranges } => {
            format!("changed {} cell(s) in {} range(s)", cells.len(), ranges.len())
        }
        WireChange::RowsInserted { at, count } => format!("inserted {} row(s) at {}", count, at),
        WireChange::RowsDeleted { at, deleted, .. } => format!("deleted {} row(s) at {}", deleted, at),
        WireChange::ColumnsInserted { at, count } => format!("inserted {} column(s) at {}", count, at),
        WireChange::ColumnsDeleted { at, deleted, .. } => format!("deleted {} column(s) at {}", deleted, at),
    }
}

// ============================================================================
// tools
// ============================================================================

fn cmd_tools() -> Result<(), CliError> {
    let schemas = gridchat_server::tool_schemas();
    let text = serde_json::to_string_pretty(&schemas).map_err(|e| CliError::new(EXIT_ERROR, e.to_string()))?;
    println!("{}", text);
    Ok(())
}

// ============================================================================
// inspect
// ============================================================================

fn cmd_inspect(file: PathBuf, rows: usize, cols: usize, json: bool) -> Result<(), CliError> {
    let grid = gridchat_io::load_grid(&file).map_err(|e| match e {
        gridchat_io::LoadError::Io { .. } => CliError::io(e.to_string()),
        _ => CliError::new(EXIT_PARSE, e.to_string()),
    })?;

    let engine = SpreadsheetEngine::new("inspect", grid, MatchMode::Exact);
    let description = engine.describe(rows, cols);

    if json {
        let text = serde_json::to_string_pretty(&description)
            .map_err(|e| CliError::new(EXIT_ERROR, e.to_string()))?;
        println!("{}", text);
        return Ok(());
    }

    println!("{}", gridchat_server::ai::build_system_prompt(&description));
    Ok(())
}

// ============================================================================
// doctor
// ============================================================================

fn cmd_doctor(config: Option<PathBuf>, json: bool) -> Result<(), CliError> {
    let settings = load_settings(config.as_deref())?;
    let resolved = ResolvedAgentConfig::from_settings(&settings.agent);

    if json {
        let report = serde_json::json!({
            "status": resolved.status.as_str(),
            "blocking_reason": resolved.blocking_reason,
            "provider": resolved.provider.name(),
            "model": resolved.model,
            "endpoint": resolved.endpoint,
            "key": if resolved.api_key.is_some() { "present" } else { "missing" },
            "key_source": resolved.key_source.as_str(),
            "max_iterations": resolved.max_iterations,
            "timeout_secs": resolved.timeout.as_secs(),
            "bind": settings.server.bind,
        });
        let text = serde_json::to_string_pretty(&report).map_err(|e| CliError::new(EXIT_ERROR, e.to_string()))?;
        println!("{}", text);
    } else {
        println!("status:          {}", resolved.status.as_str());
        if let Some(reason) = &resolved.blocking_reason {
            println!("blocking:        {}", reason);
        }
        println!("provider:        {}", resolved.provider.name());
        println!("model:           {}", resolved.model);
        println!("endpoint:        {}", resolved.endpoint);
        println!(
            "key:             {} ({})",
            if resolved.api_key.is_some() { "present" } else { "missing" },
            resolved.key_source.as_str()
        );
        println!("max iterations:  {}", resolved.max_iterations);
        println!("bind:            {}", settings.server.bind);
    }

    if resolved.is_ready() {
        Ok(())
    } else {
        // Report already printed
        Err(CliError::new(EXIT_AGENT_MISSING_KEY, String::new()))
    }
}
