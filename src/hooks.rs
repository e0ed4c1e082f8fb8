//! Turn observation hooks.
//!
//! The [`TurnHooks`] capability interface is passed into every turn and
//! decouples the protocol loop from whatever front-end is rendering the
//! conversation. Implementations may be synchronous closures
//! ([`FnHooks`]) or channel-backed adapters owned by an async caller.
//!
//! Hook failures never abort a turn: an `Err` from [`TurnHooks::on_event`]
//! is logged and swallowed by the protocol loop, and an approval hook that
//! cannot produce a decision returns `None`, leaving the request
//! unresolved on the wire (the agent decides how to proceed).

use std::future::Future;
use std::pin::Pin;

use serde_json::Value;

use crate::Result;

/// Observer capabilities consulted during a turn.
pub trait TurnHooks: Send + Sync {
    /// Called for every parsed event reaching the observer. An approval
    /// request answered with a decision is consumed by [`Self::on_approval`]
    /// and does not arrive here; an unanswered one still does.
    ///
    /// # Errors
    ///
    /// May fail freely; the protocol loop logs and swallows the error so
    /// a broken display handler cannot stall the conversation.
    fn on_event(&self, event: &Value) -> Result<()>;

    /// Called when the agent asks for a mid-turn approval decision.
    ///
    /// A returned non-empty string is written back to the agent verbatim
    /// as the next input line. `None` (or an empty string) skips the
    /// request without answering it.
    fn on_approval(&self, request: &Value) -> Pin<Box<dyn Future<Output = Option<String>> + Send + '_>>;
}

/// Hooks that observe nothing and approve nothing.
#[derive(Debug, Clone, Copy, Default)]
pub struct NullHooks;

impl TurnHooks for NullHooks {
    fn on_event(&self, _event: &Value) -> Result<()> {
        Ok(())
    }

    fn on_approval(&self, _request: &Value) -> Pin<Box<dyn Future<Output = Option<String>> + Send + '_>> {
        Box::pin(async { None })
    }
}

/// Closure-backed hooks for synchronous callers.
///
/// The approval closure runs inline on the protocol task; keep it short
/// or hand the request off to a channel and await the answer elsewhere.
pub struct FnHooks<E, A>
where
    E: Fn(&Value) -> Result<()> + Send + Sync,
    A: Fn(&Value) -> Option<String> + Send + Sync,
{
    event: E,
    approval: A,
}

impl<E, A> FnHooks<E, A>
where
    E: Fn(&Value) -> Result<()> + Send + Sync,
    A: Fn(&Value) -> Option<String> + Send + Sync,
{
    /// Wrap an event closure and an approval closure as [`TurnHooks`].
    pub fn new(event: E, approval: A) -> Self {
        Self { event, approval }
    }
}

impl<E, A> TurnHooks for FnHooks<E, A>
where
    E: Fn(&Value) -> Result<()> + Send + Sync,
    A: Fn(&Value) -> Option<String> + Send + Sync,
{
    fn on_event(&self, event: &Value) -> Result<()> {
        (self.event)(event)
    }

    fn on_approval(&self, request: &Value) -> Pin<Box<dyn Future<Output = Option<String>> + Send + '_>> {
        let decision = (self.approval)(request);
        Box::pin(async move { decision })
    }
}
