//! The agent session object and its turn protocol loop.
//!
//! [`AgentSession`] is the long-lived holder of one conversation: it owns
//! the [`SessionProcess`], the [`SessionState`], and the turn lock that
//! serializes every [`AgentSession::send`] against the shared pipe pair.
//! The lock is a field on the session rather than a process-wide global,
//! so multiple independent sessions can coexist in one process.

use std::sync::Arc;
use std::time::Duration;

use serde_json::{json, Value};
use tokio::sync::Mutex;
use tokio::time::sleep;
use tracing::{debug, info, warn};

use crate::agent::process::SessionProcess;
use crate::agent::resolver;
use crate::config::BridgeConfig;
use crate::hooks::TurnHooks;
use crate::models::session::{SessionState, SessionStopInfo};
use crate::models::turn::TurnOutcome;
use crate::transcript::{TranscriptKind, TranscriptWriter};
use crate::{AppError, Result};

/// Visible separator substituted for embedded newlines in a prompt.
///
/// The wire protocol is strictly line-delimited: the agent reads one line
/// as one turn, so a multi-line prompt must travel as a single line.
pub const NEWLINE_TOKEN: &str = " ⏎ ";

/// Process handle plus protocol state, guarded together by the turn lock.
struct SessionInner {
    process: SessionProcess,
    state: SessionState,
}

/// One externally-resumable conversation backed by zero or one live
/// agent processes at a time.
pub struct AgentSession {
    inner: Mutex<SessionInner>,
    settle: Duration,
    transcript: Option<Arc<TranscriptWriter>>,
}

impl AgentSession {
    /// Wrap an already-constructed [`SessionProcess`].
    #[must_use]
    pub fn new(process: SessionProcess, settle: Duration) -> Self {
        Self {
            inner: Mutex::new(SessionInner {
                process,
                state: SessionState::new(),
            }),
            settle,
            transcript: None,
        }
    }

    /// Build a session from configuration: resolve the agent binary,
    /// apply timeouts, and open the transcript when one is configured.
    ///
    /// # Errors
    ///
    /// Returns [`AppError::BinaryNotFound`] when no agent executable
    /// resolves, or [`AppError::Config`] when the transcript directory
    /// cannot be created.
    pub fn from_config(config: &BridgeConfig) -> Result<Self> {
        let binary =
            resolver::resolve_binary(config.agent.binary.as_deref(), &config.agent.binary_name)?;
        let process = SessionProcess::new(
            binary,
            config.agent.env.clone(),
            Duration::from_secs(config.timeouts.stop_grace_seconds),
        );
        let mut session = Self::new(
            process,
            Duration::from_millis(config.timeouts.drain_settle_ms),
        );
        if let Some(dir) = &config.transcript.dir {
            session.transcript = Some(Arc::new(TranscriptWriter::create(
                dir.join("transcript.jsonl"),
            )?));
        }
        Ok(session)
    }

    /// Attach a transcript writer.
    #[must_use]
    pub fn with_transcript(mut self, transcript: Arc<TranscriptWriter>) -> Self {
        self.transcript = Some(transcript);
        self
    }

    /// Seed a session identifier so the first spawn resumes an earlier
    /// conversation via the agent's `--resume` flag.
    pub async fn seed_session_id(&self, session_id: impl Into<String>) {
        let mut inner = self.inner.lock().await;
        inner.state.metadata.session_id = Some(session_id.into());
    }

    /// Whether no prompt has been written to the current process yet.
    pub async fn first_turn(&self) -> bool {
        self.inner.lock().await.state.first_turn
    }

    /// Whether a live agent process is currently attached.
    pub async fn is_alive(&self) -> bool {
        self.inner.lock().await.process.is_alive()
    }

    /// Snapshot of the resumable identity learned so far.
    pub async fn metadata(&self) -> crate::agent::metadata::SessionMetadata {
        self.inner.lock().await.state.metadata.clone()
    }

    /// Execute one turn: write the prompt, stream events through `hooks`,
    /// and return the terminal result.
    ///
    /// Only one `send` runs at a time per session; concurrent callers
    /// queue on the turn lock, so two turns can never interleave their
    /// writes or reads on the same pipe pair.
    ///
    /// # Errors
    ///
    /// - [`AppError::Pipe`] when the process cannot be spawned or its
    ///   stdin is gone mid-turn.
    /// - [`AppError::MissingTurnResult`] when the event stream closes
    ///   before a terminal `turn.result` event carrying a `result` field.
    pub async fn send(&self, prompt: &str, hooks: &dyn TurnHooks) -> Result<TurnOutcome> {
        let mut guard = self.inner.lock().await;
        let SessionInner { process, state } = &mut *guard;

        let resume = state.metadata.session_id.clone();
        if process.ensure_started(resume.as_deref())? {
            state.first_turn = true;
            state.stopped = false;
        }

        // Clear any stale output from a previous turn before writing, still
        // harvesting resume metadata from whatever is recovered.
        {
            let metadata = &mut state.metadata;
            process
                .drain_pending(&mut |line| metadata.observe_line(line))
                .await;
        }

        let line = prompt.replace('\n', NEWLINE_TOKEN);
        process.write_line(&line).await?;
        state.first_turn = false;
        self.record(TranscriptKind::Prompt, json!({ "text": prompt }));

        let mut events: Vec<Value> = Vec::new();
        let mut final_payload: Option<Value> = None;

        while let Some(raw) = process.read_line().await {
            let Ok(parsed) = serde_json::from_str::<Value>(&raw) else {
                // Non-protocol diagnostic text; never fatal.
                debug!(line = %raw, "skipping unparsable agent line");
                continue;
            };

            state.metadata.observe(&parsed);
            self.record(TranscriptKind::Event, parsed.clone());
            events.push(parsed.clone());

            if parsed.get("type").and_then(Value::as_str) == Some("approval.request") {
                let decision = hooks.on_approval(&parsed).await;
                if let Some(decision) = decision.filter(|d| !d.is_empty()) {
                    // The decision is part of the same turn, not a new one.
                    process.write_line(&decision).await?;
                    continue;
                }
                // No decision: the request stays unresolved on the wire and
                // the event still reaches the observer below.
            }

            if let Err(err) = hooks.on_event(&parsed) {
                debug!(error = %err, "event hook failed; ignored");
            }

            if let Some(map) = parsed.as_object() {
                if map.get("type").and_then(Value::as_str) == Some("turn.result")
                    && map.contains_key("result")
                {
                    final_payload = map.get("result").cloned();
                    break;
                }
            }
        }

        // Catch late-flushing writers: drain immediately, let the process
        // settle, then drain once more.
        process.drain_pending(&mut |_| {}).await;
        sleep(self.settle).await;
        process.drain_pending(&mut |_| {}).await;

        let payload = final_payload.ok_or_else(|| {
            AppError::MissingTurnResult(
                "agent output ended without a turn.result payload".into(),
            )
        })?;

        let outcome = TurnOutcome::new(payload, events);
        self.record(
            TranscriptKind::Result,
            json!({
                "final_message": outcome.final_message,
                "events": outcome.events.len(),
            }),
        );
        Ok(outcome)
    }

    /// Stop the session's process and reset protocol state.
    ///
    /// Never fails; termination problems are logged and swallowed so
    /// shutdown is unconditional. Returns the resume information learned
    /// during the session so a front-end can tell the user how to pick
    /// the conversation back up.
    pub async fn stop(&self) -> SessionStopInfo {
        let mut guard = self.inner.lock().await;
        let SessionInner { process, state } = &mut *guard;

        {
            let metadata = &mut state.metadata;
            process
                .stop(&mut |line| metadata.observe_line(line))
                .await;
        }

        state.first_turn = true;
        state.stopped = true;

        let info = SessionStopInfo {
            session_id: state.metadata.session_id.clone(),
            resume_command: state.metadata.resume_command.clone(),
        };
        info!(
            session_id = info.session_id.as_deref().unwrap_or(""),
            "session stopped"
        );
        info
    }

    /// Append a transcript record, swallowing write failures.
    fn record(&self, kind: TranscriptKind, payload: Value) {
        if let Some(transcript) = &self.transcript {
            if let Err(err) = transcript.record(kind, payload) {
                warn!(error = %err, "transcript write failed; ignored");
            }
        }
    }
}
