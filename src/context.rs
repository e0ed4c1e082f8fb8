//! Notebook context tracking and prompt composition.
//!
//! The bridge consumes the notebook through the read-only
//! [`NotebookHistory`] seam: an append-only log of executed cell sources
//! with a parallel map of captured outputs. [`ContextTracker`] keeps a
//! cursor into that log and renders a bounded "changed cells" block for
//! inclusion in the next prompt.
//!
//! Two selection modes exist. With a positive `max_cells` the tracker is
//! a sliding window over the most recent cells, so the agent always sees
//! recent context even on back-to-back turns. Without one it is purely
//! incremental: only cells executed since the cursor are included.
//! Incremental-only tracking would silently drop context on repeated
//! turns once everything new had been consumed; the window trades some
//! redundancy for guaranteed recency.

use std::collections::HashMap;
use std::path::Path;
use std::sync::RwLock;

/// Marker appended when a cell's source or output is cut at the cap.
const TRUNCATION_MARKER: &str = "\n... [truncated]";

/// Read-only view of the notebook's executed-cell history.
///
/// Indices are positions in the append-only execution log; the log only
/// ever grows while a kernel is alive.
pub trait NotebookHistory: Send + Sync {
    /// Number of executed entries in the log.
    fn cell_count(&self) -> usize;

    /// Source text of the cell at `index`, when present.
    fn cell_source(&self, index: usize) -> Option<String>;

    /// Captured output of the cell at `index`, when any was recorded.
    fn cell_output(&self, index: usize) -> Option<String>;
}

/// In-memory [`NotebookHistory`] for front-ends and tests.
#[derive(Debug, Default)]
pub struct RecordedHistory {
    sources: Vec<String>,
    outputs: HashMap<usize, String>,
}

impl RecordedHistory {
    /// Create an empty history.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Append an executed cell's source; returns its log index.
    pub fn push_cell(&mut self, source: impl Into<String>) -> usize {
        self.sources.push(source.into());
        self.sources.len() - 1
    }

    /// Record the captured output of the cell at `index`.
    pub fn set_output(&mut self, index: usize, output: impl Into<String>) {
        self.outputs.insert(index, output.into());
    }
}

impl NotebookHistory for RecordedHistory {
    fn cell_count(&self) -> usize {
        self.sources.len()
    }

    fn cell_source(&self, index: usize) -> Option<String> {
        self.sources.get(index).cloned()
    }

    fn cell_output(&self, index: usize) -> Option<String> {
        self.outputs.get(&index).cloned()
    }
}

// A front-end that keeps appending cells shares the history behind a lock.
impl NotebookHistory for RwLock<RecordedHistory> {
    fn cell_count(&self) -> usize {
        self.read().map(|h| h.cell_count()).unwrap_or(0)
    }

    fn cell_source(&self, index: usize) -> Option<String> {
        self.read().ok().and_then(|h| h.cell_source(index))
    }

    fn cell_output(&self, index: usize) -> Option<String> {
        self.read().ok().and_then(|h| h.cell_output(index))
    }
}

/// Cursor into the notebook history plus the block-rendering rules.
#[derive(Debug, Clone)]
pub struct ContextTracker {
    consumed: usize,
    magic_names: Vec<String>,
}

impl ContextTracker {
    /// Create a tracker that filters out invocations of the given cell
    /// magics (e.g. `["codex", "history"]`).
    #[must_use]
    pub fn new(magic_names: Vec<String>) -> Self {
        Self {
            consumed: 0,
            magic_names,
        }
    }

    /// Number of log entries already consumed by non-peek builds.
    #[must_use]
    pub fn consumed(&self) -> usize {
        self.consumed
    }

    /// Move the cursor to the current end of the log so pre-existing
    /// cells are never replayed to the agent.
    pub fn catch_up(&mut self, history: &dyn NotebookHistory) {
        self.consumed = history.cell_count();
    }

    /// Rewind the cursor to the beginning of the log.
    pub fn reset(&mut self) {
        self.consumed = 0;
    }

    /// Render the bounded "changed cells" block.
    ///
    /// A positive `max_cells` selects the sliding window; otherwise only
    /// entries after the cursor are considered. Each entry's source and
    /// output are truncated independently to `max_chars`. The cursor
    /// advances to the end of the log unless `peek` is set, in which case
    /// the call is a non-destructive preview. Returns an empty string
    /// when no qualifying entries exist.
    pub fn build_block(
        &mut self,
        history: &dyn NotebookHistory,
        max_cells: Option<usize>,
        max_chars: Option<usize>,
        peek: bool,
    ) -> String {
        let count = history.cell_count();
        let window = max_cells.filter(|k| *k > 0);

        let start = match window {
            Some(k) => count.saturating_sub(k),
            None => self.consumed.min(count),
        };

        let mut cells: Vec<(usize, String, Option<String>)> = Vec::new();
        for index in start..count {
            let Some(source) = history.cell_source(index) else {
                continue;
            };
            let text = source.trim();
            if text.is_empty() || self.is_own_invocation(text) {
                continue;
            }
            let code = truncate(text, max_chars);
            let output = history
                .cell_output(index)
                .filter(|out| !out.is_empty())
                .map(|out| truncate(&out, max_chars));
            cells.push((index, code, output));
        }

        // Filtering may have removed entries from inside the window; keep
        // only the most recent ones after the fact.
        if let Some(k) = window {
            if cells.len() > k {
                cells.drain(..cells.len() - k);
            }
        }

        if !peek {
            self.consumed = count;
        }

        if cells.is_empty() {
            return String::new();
        }

        let mut parts: Vec<String> = Vec::with_capacity(cells.len());
        for (index, code, output) in cells {
            let mut segment = format!("[cell {index}]\ncode:\n{code}");
            if let Some(out) = output {
                segment.push_str("\noutput:\n");
                segment.push_str(&out);
            }
            parts.push(segment);
        }
        parts.join("\n\n")
    }

    /// Whether a cell is an invocation of this system's own commands.
    ///
    /// Covers the magic form (`%%name`, any `%` line magic) and the
    /// kernel-internal rewritten forms, so the agent never sees its own
    /// invocation syntax as notebook content.
    fn is_own_invocation(&self, text: &str) -> bool {
        if text.starts_with('%') || text.contains("run_line_magic(") {
            return true;
        }
        self.magic_names.iter().any(|name| {
            text.contains(&format!("run_cell_magic('{name}'"))
                || text.contains(&format!("run_cell_magic(\"{name}\""))
        })
    }
}

/// Truncate `text` to `max_chars` characters, marking the cut.
fn truncate(text: &str, max_chars: Option<usize>) -> String {
    match max_chars {
        Some(max) if text.chars().count() > max => {
            let mut cut: String = text.chars().take(max).collect();
            cut.push_str(TRUNCATION_MARKER);
            cut
        }
        _ => text.to_owned(),
    }
}

/// Compose the full prompt for one turn.
///
/// Order: first-turn template, then the changed-cells context block, then
/// the user prompt. When neither template nor context applies the prompt
/// passes through untouched (no `User prompt:` framing).
#[must_use]
pub fn compose_prompt(
    template: Option<&str>,
    context_block: Option<&str>,
    prompt: &str,
) -> String {
    let mut parts: Vec<String> = Vec::new();
    if let Some(template) = template.filter(|t| !t.trim().is_empty()) {
        parts.push(template.to_owned());
    }
    if let Some(block) = context_block.filter(|b| !b.is_empty()) {
        parts.push(format!("Context (changed cells):\n{block}"));
    }
    if parts.is_empty() {
        return prompt.to_owned();
    }
    parts.push(format!("User prompt:\n{prompt}"));
    parts.join("\n\n")
}

/// Load the first-turn template from `template.md` in `dir`, if present.
#[must_use]
pub fn load_template(dir: &Path) -> Option<String> {
    let path = dir.join("template.md");
    if path.is_file() {
        std::fs::read_to_string(path).ok()
    } else {
        None
    }
}
