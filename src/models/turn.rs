//! Turn request/outcome models and result-payload helpers.

use serde::{Deserialize, Serialize};
use serde_json::Value;
use uuid::Uuid;

/// How a front-end should render the final message of a turn.
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum DisplayMode {
    /// Markdown when a final message exists, plain text otherwise.
    #[default]
    Auto,
    /// Always render as markdown.
    Markdown,
    /// Always render as plain text.
    Text,
    /// Suppress rendering entirely.
    None,
}

/// One queued turn submission.
///
/// Immutable once enqueued; consumed exactly once by the scheduler worker.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TurnRequest {
    /// The user's prompt text (may span multiple lines).
    pub prompt: String,
    /// Opaque display handle the front-end uses to update output in place.
    pub display_id: String,
    /// Context window: number of recent cells to include.
    pub context_cells: Option<usize>,
    /// Context window: per-entry character cap.
    pub context_chars: Option<usize>,
    /// Rendering mode for the final message.
    pub mode: DisplayMode,
    /// Whether raw events should be surfaced alongside the result.
    pub emit_events: bool,
}

impl TurnRequest {
    /// Build a request with a generated display handle and defaults.
    #[must_use]
    pub fn new(prompt: impl Into<String>) -> Self {
        Self {
            prompt: prompt.into(),
            display_id: format!("turn-{}", Uuid::new_v4().simple()),
            context_cells: None,
            context_chars: None,
            mode: DisplayMode::Auto,
            emit_events: false,
        }
    }

    /// Set the context window parameters.
    #[must_use]
    pub fn with_context(mut self, cells: Option<usize>, chars: Option<usize>) -> Self {
        self.context_cells = cells;
        self.context_chars = chars;
        self
    }

    /// Set the rendering mode.
    #[must_use]
    pub fn with_mode(mut self, mode: DisplayMode) -> Self {
        self.mode = mode;
        self
    }

    /// Request raw events alongside the rendered result.
    #[must_use]
    pub fn with_events(mut self) -> Self {
        self.emit_events = true;
        self
    }
}

/// The completed result of one turn.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct TurnOutcome {
    /// Best-effort final textual message extracted from the result payload.
    pub final_message: Option<String>,
    /// The raw `result` payload from the terminal event.
    pub result: Value,
    /// Every event observed during the turn, in arrival order.
    pub events: Vec<Value>,
}

impl TurnOutcome {
    /// Assemble an outcome from a terminal payload and the observed events.
    #[must_use]
    pub fn new(result: Value, events: Vec<Value>) -> Self {
        Self {
            final_message: extract_final_message(&result),
            result,
            events,
        }
    }
}

/// Locate the best final textual message inside a turn result payload.
///
/// Probes, in order: `final_message`, `summary`, the first `errors[]`
/// entry, `status`, then the text of an embedded `agent_message` event
/// item. A bare string payload is returned as-is. No interpretation of
/// agent semantics happens here; this only locates text.
#[must_use]
pub fn extract_final_message(result: &Value) -> Option<String> {
    if let Some(text) = result.as_str() {
        return Some(text.to_owned());
    }
    let map = result.as_object()?;

    for key in ["final_message", "summary"] {
        if let Some(text) = map.get(key).and_then(Value::as_str) {
            if !text.trim().is_empty() {
                return Some(text.to_owned());
            }
        }
    }

    if let Some(first) = map.get("errors").and_then(Value::as_array).and_then(|a| a.first()) {
        if let Some(text) = first.as_str() {
            return Some(format!("Error: {text}"));
        }
        if let Some(text) = first.get("message").and_then(Value::as_str) {
            return Some(format!("Error: {text}"));
        }
    }

    if let Some(status) = map.get("status").and_then(Value::as_str) {
        if !status.is_empty() {
            return Some(status.to_owned());
        }
    }

    if let Some(events) = map.get("events").and_then(Value::as_array) {
        for event in events {
            let Some(item) = event.get("item") else { continue };
            if item.get("type").and_then(Value::as_str) == Some("agent_message") {
                if let Some(text) = item.get("text").and_then(Value::as_str) {
                    if !text.trim().is_empty() {
                        return Some(text.to_owned());
                    }
                }
            }
        }
    }

    None
}

/// Produce a one-line progress label for an in-flight event.
///
/// Returns `None` for events with no recognisable shape; front-ends keep
/// showing the previous label in that case.
#[must_use]
pub fn summarize_event(event: &Value) -> Option<String> {
    let map = event.as_object()?;
    let event_type = map.get("type").and_then(Value::as_str);

    match event_type {
        Some("token") => {
            let token = str_field(map, "text").or_else(|| str_field(map, "data")).unwrap_or("");
            Some(format!("token: {}", clip(token, 40)))
        }
        Some("reasoning") => Some(format!(
            "reasoning: {}",
            clip(str_field(map, "text").unwrap_or(""), 80)
        )),
        Some("command_execution") => Some(format!(
            "command ({}): {}",
            str_field(map, "status").unwrap_or("running"),
            clip(str_field(map, "command").unwrap_or(""), 80)
        )),
        Some("user_input.request" | "ask_user_input" | "ask.approval" | "approval.request") => {
            let prompt = str_field(map, "prompt")
                .or_else(|| str_field(map, "question"))
                .unwrap_or("…");
            Some(format!("awaiting input: {}", clip(prompt, 80)))
        }
        Some("turn.result") if map.contains_key("result") => Some("finalizing...".to_owned()),
        _ => summarize_item(map).or_else(|| event_type.map(str::to_owned)),
    }
}

/// Summaries for item-wrapped event payloads.
fn summarize_item(map: &serde_json::Map<String, Value>) -> Option<String> {
    let item = map.get("item")?.as_object()?;
    match item.get("type").and_then(Value::as_str) {
        Some("reasoning") => Some(format!(
            "reasoning: {}",
            clip(str_field(item, "text").unwrap_or(""), 80)
        )),
        Some("command_execution") => Some(format!(
            "command ({}): {}",
            str_field(item, "status").unwrap_or("running"),
            clip(str_field(item, "command").unwrap_or(""), 80)
        )),
        Some("agent_message") => Some(format!(
            "agent: {}",
            clip(str_field(item, "text").unwrap_or(""), 80)
        )),
        _ => None,
    }
}

/// Fetch a string field from a JSON object.
fn str_field<'a>(map: &'a serde_json::Map<String, Value>, key: &str) -> Option<&'a str> {
    map.get(key).and_then(Value::as_str)
}

/// Clip `text` to at most `max` characters on a character boundary.
fn clip(text: &str, max: usize) -> String {
    text.chars().take(max).collect()
}
