//! Agent executable resolution.
//!
//! The agent binary is looked up through a fixed candidate chain, first
//! existing file wins:
//!
//! 1. an explicit override (configuration or API argument),
//! 2. the `CELLBRIDGE_BIN` environment variable,
//! 3. the packaged location `~/.cellbridge/bin/<name>`,
//! 4. a PATH lookup,
//! 5. `target/{release,debug}/<name>` in ancestor directories of the
//!    current working directory (developer builds).

use std::env;
use std::path::{Path, PathBuf};

use tracing::debug;

use crate::{AppError, Result};

/// Environment variable naming the resolved agent executable.
///
/// Set on the bridge process once resolution succeeds and propagated into
/// every spawned agent so child tooling can find the same binary.
pub const BINARY_ENV_VAR: &str = "CELLBRIDGE_BIN";

/// Resolve the agent executable path.
///
/// `explicit` takes precedence over every other source. On success the
/// resolved path is also exported as [`BINARY_ENV_VAR`] in the bridge
/// process environment.
///
/// # Errors
///
/// Returns [`AppError::BinaryNotFound`] when no candidate resolves to an
/// existing file.
pub fn resolve_binary(explicit: Option<&Path>, binary_name: &str) -> Result<PathBuf> {
    let mut candidates: Vec<PathBuf> = Vec::new();

    if let Some(path) = explicit {
        candidates.push(path.to_path_buf());
    }

    if let Ok(value) = env::var(BINARY_ENV_VAR) {
        if !value.is_empty() {
            candidates.push(PathBuf::from(value));
        }
    }

    if let Some(home) = home_dir() {
        candidates.push(home.join(".cellbridge").join("bin").join(binary_name));
    }

    candidates.extend(path_lookup(binary_name));
    candidates.extend(build_output_lookup(binary_name));

    let mut seen: Vec<PathBuf> = Vec::new();
    for candidate in candidates {
        if seen.contains(&candidate) {
            continue;
        }
        seen.push(candidate.clone());
        if candidate.is_file() {
            debug!(path = %candidate.display(), "agent binary resolved");
            env::set_var(BINARY_ENV_VAR, &candidate);
            return Ok(candidate);
        }
    }

    Err(AppError::BinaryNotFound(format!(
        "could not find the '{binary_name}' CLI; put it on PATH, set ${BINARY_ENV_VAR}, \
         or configure agent.binary"
    )))
}

/// Candidates from a PATH scan for `binary_name`.
fn path_lookup(binary_name: &str) -> Vec<PathBuf> {
    let Some(path_os) = env::var_os("PATH") else {
        return Vec::new();
    };
    env::split_paths(&path_os)
        .map(|dir| dir.join(binary_name))
        .collect()
}

/// Candidates from `target/{release,debug}` in ancestors of the cwd.
fn build_output_lookup(binary_name: &str) -> Vec<PathBuf> {
    let Ok(cwd) = env::current_dir() else {
        return Vec::new();
    };
    let mut found = Vec::new();
    for ancestor in cwd.ancestors() {
        let target_dir = ancestor.join("target");
        if !target_dir.is_dir() {
            continue;
        }
        for profile in ["release", "debug"] {
            found.push(target_dir.join(profile).join(binary_name));
        }
    }
    found
}

/// Best-effort home directory lookup without extra dependencies.
fn home_dir() -> Option<PathBuf> {
    #[cfg(windows)]
    let var = env::var_os("USERPROFILE");
    #[cfg(not(windows))]
    let var = env::var_os("HOME");
    var.map(PathBuf::from)
}
