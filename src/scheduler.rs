//! Asynchronous turn scheduling.
//!
//! [`TurnScheduler`] decouples turn submission from execution: callers
//! enqueue a [`TurnRequest`] and immediately receive a [`TurnTicket`],
//! while a single background worker drains the queue strictly in FIFO
//! order and runs each request against the shared [`AgentSession`].
//! Shutdown is a poison pill: a sentinel command makes the worker exit
//! its loop after finishing the in-flight request.

use std::sync::Arc;
use std::sync::Mutex as StdMutex;

use tokio::sync::{mpsc, oneshot, Mutex};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::agent::session::AgentSession;
use crate::context::{compose_prompt, ContextTracker, NotebookHistory};
use crate::hooks::TurnHooks;
use crate::models::turn::{TurnOutcome, TurnRequest};
use crate::{AppError, Result};

/// Depth of the bounded submission queue.
const QUEUE_CAPACITY: usize = 64;

/// Notebook context wiring consulted by the worker before each send.
pub struct WorkerContext {
    /// Template prepended to the first prompt of a process lifetime.
    pub template: Option<String>,
    /// Cursor into the notebook history.
    pub tracker: StdMutex<ContextTracker>,
    /// The notebook collaborator (read-only).
    pub history: Arc<dyn NotebookHistory>,
}

/// Caller-visible handle for a queued turn.
#[derive(Debug)]
pub struct TurnTicket {
    id: String,
    rx: oneshot::Receiver<Result<TurnOutcome>>,
}

impl TurnTicket {
    /// The display handle of the underlying request.
    #[must_use]
    pub fn id(&self) -> &str {
        &self.id
    }

    /// Wait for the worker to publish this turn's result.
    ///
    /// # Errors
    ///
    /// Propagates the turn's own failure, or [`AppError::Scheduler`]
    /// when the worker went away before publishing a result.
    pub async fn wait(self) -> Result<TurnOutcome> {
        self.rx
            .await
            .map_err(|_| AppError::Scheduler("worker exited before publishing a result".into()))?
    }
}

/// A queued request paired with its result channel.
struct QueuedTurn {
    request: TurnRequest,
    reply: oneshot::Sender<Result<TurnOutcome>>,
}

/// Worker commands; `Shutdown` is the poison pill.
enum WorkerCommand {
    Run(Box<QueuedTurn>),
    Shutdown,
}

/// Single-worker FIFO executor for turns against one shared session.
pub struct TurnScheduler {
    tx: mpsc::Sender<WorkerCommand>,
    worker: Mutex<Option<JoinHandle<()>>>,
}

impl TurnScheduler {
    /// Spawn the worker task and return the scheduler handle.
    ///
    /// `hooks` is shared by every queued turn; `context` enables the
    /// template/changed-cells prompt composition when provided.
    #[must_use]
    pub fn start(
        session: Arc<AgentSession>,
        hooks: Arc<dyn TurnHooks>,
        context: Option<WorkerContext>,
    ) -> Self {
        let (tx, mut rx) = mpsc::channel::<WorkerCommand>(QUEUE_CAPACITY);

        let worker = tokio::spawn(async move {
            while let Some(command) = rx.recv().await {
                match command {
                    WorkerCommand::Shutdown => {
                        debug!("turn worker received shutdown sentinel");
                        break;
                    }
                    WorkerCommand::Run(turn) => {
                        let QueuedTurn { request, reply } = *turn;
                        let display_id = request.display_id.clone();
                        let outcome =
                            run_turn(&session, hooks.as_ref(), context.as_ref(), request).await;
                        if let Err(err) = &outcome {
                            warn!(display_id, error = %err, "turn failed");
                        }
                        // A dropped ticket must not kill the worker; the
                        // next queued request still runs.
                        if reply.send(outcome).is_err() {
                            debug!(display_id, "turn result dropped: ticket no longer awaited");
                        }
                    }
                }
            }
            info!("turn worker exited");
        });

        Self {
            tx,
            worker: Mutex::new(Some(worker)),
        }
    }

    /// Enqueue a turn; returns immediately with its ticket.
    ///
    /// # Errors
    ///
    /// Returns [`AppError::Scheduler`] when the queue is closed (the
    /// scheduler has been shut down).
    pub async fn submit(&self, request: TurnRequest) -> Result<TurnTicket> {
        let (reply, rx) = oneshot::channel();
        let id = request.display_id.clone();
        self.tx
            .send(WorkerCommand::Run(Box::new(QueuedTurn { request, reply })))
            .await
            .map_err(|_| AppError::Scheduler("turn queue is closed".into()))?;
        Ok(TurnTicket { id, rx })
    }

    /// Approximate number of submissions waiting in the queue.
    ///
    /// Useful for "queued (position N)" front-end feedback; the value is
    /// a snapshot and may be stale by the time it is displayed.
    #[must_use]
    pub fn pending(&self) -> usize {
        self.tx.max_capacity() - self.tx.capacity()
    }

    /// Stop the worker after the in-flight and already-queued turns.
    ///
    /// Sends the shutdown sentinel and joins the worker task. Idempotent;
    /// later calls are no-ops.
    pub async fn shutdown(&self) {
        if self.tx.send(WorkerCommand::Shutdown).await.is_err() {
            debug!("turn queue already closed at shutdown");
        }
        if let Some(handle) = self.worker.lock().await.take() {
            if let Err(err) = handle.await {
                warn!(error = %err, "turn worker join failed");
            }
        }
    }
}

/// Compose the full prompt for a request and execute it on the session.
async fn run_turn(
    session: &AgentSession,
    hooks: &dyn TurnHooks,
    context: Option<&WorkerContext>,
    request: TurnRequest,
) -> Result<TurnOutcome> {
    let template = if session.first_turn().await {
        context.and_then(|ctx| ctx.template.clone())
    } else {
        None
    };

    let context_block = context.and_then(|ctx| {
        let mut tracker = match ctx.tracker.lock() {
            Ok(guard) => guard,
            Err(_) => {
                warn!("context tracker mutex poisoned; skipping context block");
                return None;
            }
        };
        let block = tracker.build_block(
            ctx.history.as_ref(),
            request.context_cells,
            request.context_chars,
            false,
        );
        (!block.is_empty()).then_some(block)
    });

    let prompt = compose_prompt(
        template.as_deref(),
        context_block.as_deref(),
        &request.prompt,
    );
    session.send(&prompt, hooks).await
}
