//! Bridge configuration parsing and validation.

use std::collections::HashMap;
use std::path::PathBuf;

use serde::Deserialize;

use crate::{AppError, Result};

/// Agent process settings.
#[derive(Debug, Clone, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub struct AgentConfig {
    /// Explicit path to the agent executable; overrides all other lookups.
    #[serde(default)]
    pub binary: Option<PathBuf>,
    /// Executable name used for PATH and build-output lookups.
    #[serde(default = "default_binary_name")]
    pub binary_name: String,
    /// Extra environment variables injected into the agent process.
    #[serde(default)]
    pub env: HashMap<String, String>,
}

fn default_binary_name() -> String {
    "cellagent".into()
}

impl Default for AgentConfig {
    fn default() -> Self {
        Self {
            binary: None,
            binary_name: default_binary_name(),
            env: HashMap::new(),
        }
    }
}

/// Notebook context window settings.
#[derive(Debug, Clone, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub struct ContextConfig {
    /// Whether changed-cell context is prepended to prompts.
    #[serde(default)]
    pub enabled: bool,
    /// Sliding window size; `0` switches to incremental tracking.
    #[serde(default = "default_max_cells")]
    pub max_cells: usize,
    /// Per-entry character cap for cell sources and outputs.
    #[serde(default = "default_max_chars")]
    pub max_chars: usize,
}

fn default_max_cells() -> usize {
    5
}

fn default_max_chars() -> usize {
    2000
}

impl Default for ContextConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            max_cells: default_max_cells(),
            max_chars: default_max_chars(),
        }
    }
}

/// Configurable timeout values for process shutdown and stream draining.
#[derive(Debug, Clone, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub struct TimeoutConfig {
    /// Grace window for a voluntary agent exit before escalating.
    #[serde(default = "default_stop_grace_seconds")]
    pub stop_grace_seconds: u64,
    /// Settle delay between the two trailing drains after a turn.
    #[serde(default = "default_drain_settle_ms")]
    pub drain_settle_ms: u64,
}

fn default_stop_grace_seconds() -> u64 {
    5
}

fn default_drain_settle_ms() -> u64 {
    100
}

impl Default for TimeoutConfig {
    fn default() -> Self {
        Self {
            stop_grace_seconds: default_stop_grace_seconds(),
            drain_settle_ms: default_drain_settle_ms(),
        }
    }
}

/// Transcript logging settings.
#[derive(Debug, Clone, Default, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub struct TranscriptConfig {
    /// Directory for JSONL transcript files; absent disables transcripts.
    #[serde(default)]
    pub dir: Option<PathBuf>,
}

/// Global configuration parsed from `cellbridge.toml`.
#[derive(Debug, Clone, Default, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub struct BridgeConfig {
    /// Agent process settings.
    #[serde(default)]
    pub agent: AgentConfig,
    /// Notebook context window settings.
    #[serde(default)]
    pub context: ContextConfig,
    /// Shutdown and drain timing.
    #[serde(default)]
    pub timeouts: TimeoutConfig,
    /// Transcript logging settings.
    #[serde(default)]
    pub transcript: TranscriptConfig,
}

impl BridgeConfig {
    /// Parse a configuration from TOML text and validate it.
    ///
    /// # Errors
    ///
    /// Returns [`AppError::Config`] when the TOML is malformed or a value
    /// fails validation.
    pub fn from_toml_str(text: &str) -> Result<Self> {
        let config: Self = toml::from_str(text)?;
        config.validate()?;
        Ok(config)
    }

    /// Validate cross-field constraints.
    ///
    /// # Errors
    ///
    /// Returns [`AppError::Config`] when a value is out of range.
    pub fn validate(&self) -> Result<()> {
        if self.agent.binary_name.trim().is_empty() {
            return Err(AppError::Config(
                "agent.binary_name must not be empty".into(),
            ));
        }
        if self.timeouts.stop_grace_seconds == 0 {
            return Err(AppError::Config(
                "timeouts.stop_grace_seconds must be at least 1".into(),
            ));
        }
        Ok(())
    }
}
