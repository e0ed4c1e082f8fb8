//! Error types shared across the crate.

use std::fmt::{Display, Formatter};

/// Shared crate result type.
pub type Result<T> = std::result::Result<T, AppError>;

/// Application error enumeration covering all domain failure modes.
#[derive(Debug)]
pub enum AppError {
    /// Configuration parsing or validation failure.
    Config(String),
    /// No agent executable could be resolved from any candidate location.
    BinaryNotFound(String),
    /// The agent process's stdin or stdout channel is not open.
    Pipe(String),
    /// The event stream ended without a terminal `turn.result` event.
    MissingTurnResult(String),
    /// Wire protocol failure (framing, serialisation) on the agent stream.
    Protocol(String),
    /// Turn scheduler failure (queue closed, worker gone).
    Scheduler(String),
    /// File-system or I/O operation failure.
    Io(String),
}

impl Display for AppError {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Config(msg) => write!(f, "config: {msg}"),
            Self::BinaryNotFound(msg) => write!(f, "binary not found: {msg}"),
            Self::Pipe(msg) => write!(f, "pipe unavailable: {msg}"),
            Self::MissingTurnResult(msg) => write!(f, "missing turn result: {msg}"),
            Self::Protocol(msg) => write!(f, "protocol: {msg}"),
            Self::Scheduler(msg) => write!(f, "scheduler: {msg}"),
            Self::Io(msg) => write!(f, "io: {msg}"),
        }
    }
}

impl std::error::Error for AppError {}

impl From<toml::de::Error> for AppError {
    fn from(err: toml::de::Error) -> Self {
        Self::Config(format!("invalid config: {err}"))
    }
}

impl From<std::io::Error> for AppError {
    fn from(err: std::io::Error) -> Self {
        Self::Io(err.to_string())
    }
}
