#![forbid(unsafe_code)]

//! cellbridge — a session/process bridge between interactive notebook cells
//! and a long-lived CLI coding agent.
//!
//! The crate supervises one external agent process per [`AgentSession`],
//! speaks its newline-delimited JSON event protocol, captures session
//! resumption metadata from the stream, tracks which notebook cells have
//! already been shown to the agent, and serializes concurrent turn
//! submissions through a single-worker [`scheduler::TurnScheduler`].

pub mod agent;
pub mod config;
pub mod context;
pub mod errors;
pub mod hooks;
pub mod models;
pub mod scheduler;
pub mod transcript;

pub use agent::session::AgentSession;
pub use config::BridgeConfig;
pub use errors::{AppError, Result};
