//! Agent process supervision and wire protocol handling.
//!
//! This module owns everything between a prompt string and a parsed turn
//! result: resolving the agent executable, spawning and supervising the
//! child process, framing its newline-delimited JSON output, capturing
//! session resumption metadata, and driving the per-turn protocol loop.
//!
//! Submodules:
//! - `codec`: [`LinesCodec`](tokio_util::codec::LinesCodec)-based framing
//!   for the agent's NDJSON event stream.
//! - `resolver`: agent executable lookup across the candidate chain.
//! - `process`: one owned OS process with line I/O and escalating stop.
//! - `metadata`: passive capture of `session_id` / resume information.
//! - `session`: the session object and the turn protocol loop.

pub mod codec;
pub mod metadata;
pub mod process;
pub mod resolver;
pub mod session;

pub use metadata::SessionMetadata;
pub use process::SessionProcess;
pub use session::AgentSession;
