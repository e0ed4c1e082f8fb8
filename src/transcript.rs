//! JSONL transcript of the conversation with the agent.
//!
//! Appends one JSON object per line (prompts, raw events, context
//! blocks, and turn results) so a session can be audited or replayed
//! after the notebook is gone. Transcript failures are reported to the
//! caller but are always swallowed at the protocol layer: logging must
//! never break a turn.

use std::fs::{self, OpenOptions};
use std::io::{BufWriter, Write};
use std::path::PathBuf;
use std::sync::Mutex;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::{AppError, Result};

/// Classification of a transcript record.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum TranscriptKind {
    /// A prompt as composed and sent to the agent.
    Prompt,
    /// A raw protocol event from the agent.
    Event,
    /// A changed-cells context block included in a prompt.
    ContextBlock,
    /// The terminal result of a turn.
    Result,
}

/// One transcript line.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TranscriptEntry {
    /// ISO 8601 timestamp with timezone.
    pub timestamp: DateTime<Utc>,
    /// Record classification.
    pub kind: TranscriptKind,
    /// Kind-specific payload.
    pub payload: Value,
}

/// Append-only JSONL transcript writer.
pub struct TranscriptWriter {
    path: PathBuf,
    writer: Mutex<BufWriter<fs::File>>,
}

impl TranscriptWriter {
    /// Open (or create) the transcript file at `path` for appending.
    ///
    /// Parent directories are created as needed.
    ///
    /// # Errors
    ///
    /// Returns [`AppError::Config`] when the directory or file cannot be
    /// created.
    pub fn create(path: PathBuf) -> Result<Self> {
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent).map_err(|e| {
                AppError::Config(format!(
                    "failed to create transcript directory {}: {e}",
                    parent.display()
                ))
            })?;
        }
        let file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&path)
            .map_err(|e| {
                AppError::Config(format!("failed to open transcript {}: {e}", path.display()))
            })?;
        Ok(Self {
            path,
            writer: Mutex::new(BufWriter::new(file)),
        })
    }

    /// Path of the transcript file.
    #[must_use]
    pub fn path(&self) -> &PathBuf {
        &self.path
    }

    /// Append one record and flush it.
    ///
    /// # Errors
    ///
    /// Returns [`AppError::Io`] when serialisation or the write fails.
    pub fn record(&self, kind: TranscriptKind, payload: Value) -> Result<()> {
        let entry = TranscriptEntry {
            timestamp: Utc::now(),
            kind,
            payload,
        };
        let line = serde_json::to_string(&entry)
            .map_err(|e| AppError::Io(format!("failed to serialize transcript entry: {e}")))?;

        let mut guard = self
            .writer
            .lock()
            .map_err(|_| AppError::Io("transcript writer mutex poisoned".into()))?;
        writeln!(guard, "{line}").map_err(|e| AppError::Io(format!("transcript write failed: {e}")))?;
        guard
            .flush()
            .map_err(|e| AppError::Io(format!("transcript flush failed: {e}")))
    }
}
