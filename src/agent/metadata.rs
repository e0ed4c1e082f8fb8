//! Passive capture of session resumption metadata.
//!
//! Every parsed event flowing through the turn loop (and every line
//! recovered while draining) is offered to [`SessionMetadata::observe`].
//! The capture is strictly additive: a field that has been learned is
//! only ever replaced by a new non-empty value, so a later event lacking
//! the field can never erase what an earlier event established.

use serde_json::Value;

/// Resumable identity of an agent session, learned from the event stream.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SessionMetadata {
    /// Stable session identifier assigned by the agent.
    pub session_id: Option<String>,
    /// Shell command the agent suggests for resuming this session.
    pub resume_command: Option<String>,
    /// Path to the agent's rollout/transcript file for this session.
    pub rollout_path: Option<String>,
}

impl SessionMetadata {
    /// Inspect one parsed event and absorb any resumption fields it carries.
    ///
    /// Unexpected shapes are ignored; this never fails.
    pub fn observe(&mut self, event: &Value) {
        let Some(map) = event.as_object() else {
            return;
        };

        if map.get("type").and_then(Value::as_str) == Some("session.resume") {
            assign_non_empty(&mut self.session_id, map.get("session_id"));
            assign_non_empty(&mut self.resume_command, map.get("resume_command"));
            assign_non_empty(&mut self.rollout_path, map.get("rollout_path"));
        }

        if self.session_id.is_none() {
            let direct = map.get("session_id");
            let nested = map.get("msg").and_then(|m| m.get("session_id"));
            assign_non_empty(&mut self.session_id, direct.or(nested));
        }

        if self.rollout_path.is_none() {
            let direct = map.get("rollout_path");
            let nested = map.get("msg").and_then(|m| m.get("rollout_path"));
            assign_non_empty(&mut self.rollout_path, direct.or(nested));
        }
    }

    /// Offer a raw drained line: parsed as JSON when possible, else ignored.
    pub fn observe_line(&mut self, line: &str) {
        if let Ok(value) = serde_json::from_str::<Value>(line) {
            self.observe(&value);
        }
    }
}

/// Overwrite `slot` only when `value` is a non-empty JSON string.
fn assign_non_empty(slot: &mut Option<String>, value: Option<&Value>) {
    if let Some(text) = value.and_then(Value::as_str) {
        if !text.is_empty() {
            *slot = Some(text.to_owned());
        }
    }
}
