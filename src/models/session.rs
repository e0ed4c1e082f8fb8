//! Session state and lifecycle records.

use crate::agent::metadata::SessionMetadata;

/// Mutable per-session protocol state, owned by the session object.
#[derive(Debug, Clone)]
pub struct SessionState {
    /// Whether no prompt has been written to the current process yet.
    ///
    /// Flips to `false` on the first successful prompt write and resets
    /// to `true` whenever the process is (re)started.
    pub first_turn: bool,
    /// Resumable identity learned from the event stream.
    pub metadata: SessionMetadata,
    /// Whether the session was explicitly stopped.
    pub stopped: bool,
}

impl SessionState {
    /// Fresh state for a newly created or restarted session.
    #[must_use]
    pub fn new() -> Self {
        Self {
            first_turn: true,
            metadata: SessionMetadata::default(),
            stopped: false,
        }
    }
}

impl Default for SessionState {
    fn default() -> Self {
        Self::new()
    }
}

/// Metadata reported to the caller when a session stops.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SessionStopInfo {
    /// Identifier of the stopped session, when one was learned.
    pub session_id: Option<String>,
    /// Command the user can run to resume the conversation.
    pub resume_command: Option<String>,
}
