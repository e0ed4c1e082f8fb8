#![forbid(unsafe_code)]

//! `cellbridge` — console front-end for the notebook agent bridge.
//!
//! A line-oriented REPL that drives an [`AgentSession`] the way a
//! notebook magic would: each input line is one turn, progress events are
//! summarised as they stream in, and mid-turn approval requests are
//! answered interactively on stdin.

use std::future::Future;
use std::io::{BufRead, Write};
use std::path::PathBuf;
use std::pin::Pin;

use clap::{Parser, ValueEnum};
use serde_json::Value;
use tracing::{error, info};
use tracing_subscriber::{fmt, EnvFilter};

use cellbridge::agent::session::AgentSession;
use cellbridge::config::BridgeConfig;
use cellbridge::hooks::TurnHooks;
use cellbridge::models::turn::summarize_event;
use cellbridge::{AppError, Result};

#[derive(Debug, Copy, Clone, Eq, PartialEq, ValueEnum)]
enum LogFormat {
    Text,
    Json,
}

#[derive(Debug, Parser)]
#[command(name = "cellbridge", about = "Notebook agent bridge console", version, long_about = None)]
struct Cli {
    /// Path to the TOML configuration file.
    #[arg(long)]
    config: Option<PathBuf>,

    /// Explicit path to the agent executable (overrides config/lookup).
    #[arg(long)]
    binary: Option<PathBuf>,

    /// Resume a previous conversation by its session id.
    #[arg(long)]
    resume: Option<String>,

    /// Log output format (text or json).
    #[arg(long, value_enum, default_value_t = LogFormat::Text)]
    log_format: LogFormat,

    /// Print every raw event after each turn.
    #[arg(long)]
    show_events: bool,
}

fn main() -> Result<()> {
    let args = Cli::parse();
    init_tracing(args.log_format)?;
    info!("cellbridge console bootstrap");

    let runtime = tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()
        .map_err(|err| AppError::Config(format!("failed to build tokio runtime: {err}")))?;

    let mut config = match &args.config {
        Some(path) => {
            let text = std::fs::read_to_string(path)
                .map_err(|err| AppError::Config(format!("cannot read config: {err}")))?;
            BridgeConfig::from_toml_str(&text)?
        }
        None => BridgeConfig::default(),
    };
    if let Some(binary) = args.binary {
        config.agent.binary = Some(binary);
    }

    let session = AgentSession::from_config(&config)?;
    if let Some(session_id) = args.resume {
        runtime.block_on(session.seed_session_id(session_id));
    }

    let hooks = ConsoleHooks;
    let stdin = std::io::stdin();
    let mut input = String::new();

    loop {
        print!("cellbridge> ");
        let _ = std::io::stdout().flush();

        input.clear();
        match stdin.lock().read_line(&mut input) {
            Ok(0) => break,
            Ok(_) => {}
            Err(err) => {
                error!(%err, "stdin read failed");
                break;
            }
        }
        let line = input.trim();
        if line.is_empty() {
            continue;
        }

        match line.split_once(' ').map_or((line, ""), |(c, r)| (c, r)) {
            ("/quit" | "/exit", _) => break,
            ("/stop", _) => {
                let stop = runtime.block_on(session.stop());
                match stop.resume_command {
                    Some(cmd) => println!("session stopped; resume with: {cmd}"),
                    None => println!("session stopped."),
                }
            }
            ("/status", _) => {
                let alive = runtime.block_on(session.is_alive());
                println!("session: {}", if alive { "running" } else { "stopped" });
            }
            ("/new", rest) => {
                runtime.block_on(session.stop());
                if !rest.trim().is_empty() {
                    run_turn(&runtime, &session, &hooks, rest.trim(), args.show_events);
                }
            }
            _ => run_turn(&runtime, &session, &hooks, line, args.show_events),
        }
    }

    let stop = runtime.block_on(session.stop());
    if let Some(cmd) = stop.resume_command {
        println!("resume with: {cmd}");
    }
    info!("cellbridge console shut down");
    Ok(())
}

/// Run one turn synchronously and print its result.
fn run_turn(
    runtime: &tokio::runtime::Runtime,
    session: &AgentSession,
    hooks: &ConsoleHooks,
    prompt: &str,
    show_events: bool,
) {
    match runtime.block_on(session.send(prompt, hooks)) {
        Ok(outcome) => {
            println!(
                "{}",
                outcome.final_message.as_deref().unwrap_or("(no final message)")
            );
            if show_events {
                for (index, event) in outcome.events.iter().enumerate() {
                    println!("event {}: {event}", index + 1);
                }
            }
        }
        Err(err) => error!(%err, "turn failed"),
    }
}

/// Hooks rendering progress to the terminal and collecting approval
/// decisions from stdin.
struct ConsoleHooks;

impl TurnHooks for ConsoleHooks {
    fn on_event(&self, event: &Value) -> Result<()> {
        if let Some(label) = summarize_event(event) {
            eprintln!("· {label}");
        }
        Ok(())
    }

    fn on_approval(&self, request: &Value) -> Pin<Box<dyn Future<Output = Option<String>> + Send + '_>> {
        let request = request.clone();
        Box::pin(async move {
            // Blocking terminal interaction runs off the protocol task.
            tokio::task::spawn_blocking(move || prompt_approval(&request))
                .await
                .unwrap_or(None)
        })
    }
}

/// Blocking stdin prompt for a mid-turn approval request.
fn prompt_approval(request: &Value) -> Option<String> {
    let field = |key: &str| request.get(key).and_then(Value::as_str);

    eprintln!("approval request ({})", field("kind").unwrap_or("approval"));
    if let Some(command) = field("command") {
        eprintln!("  command: {command}");
    }
    if let Some(cwd) = field("cwd") {
        eprintln!("  cwd: {cwd}");
    }
    if let Some(reason) = field("reason") {
        eprintln!("  reason: {reason}");
    }
    eprintln!("  1. approve  2. approve for session  3. deny  4. abort");
    eprint!("select option (1-4) or Enter to skip: ");
    let _ = std::io::stderr().flush();

    let mut answer = String::new();
    if std::io::stdin().lock().read_line(&mut answer).is_err() {
        return None;
    }
    match answer.trim() {
        "" => None,
        "1" => Some("approve".to_owned()),
        "2" => Some("approve_session".to_owned()),
        "3" => Some("deny".to_owned()),
        "4" => Some("abort".to_owned()),
        other => Some(other.to_owned()),
    }
}

fn init_tracing(log_format: LogFormat) -> Result<()> {
    let env_filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let subscriber = fmt().with_env_filter(env_filter).with_writer(std::io::stderr);

    match log_format {
        LogFormat::Text => subscriber
            .try_init()
            .map_err(|err| AppError::Config(format!("failed to init tracing: {err}")))?,
        LogFormat::Json => subscriber
            .json()
            .try_init()
            .map_err(|err| AppError::Config(format!("failed to init tracing: {err}")))?,
    }

    Ok(())
}
