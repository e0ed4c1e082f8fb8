//! Integration tests for the single-worker turn scheduler.

#![cfg(unix)]

use std::collections::HashMap;
use std::sync::{Arc, Mutex as StdMutex};

use tokio::time::timeout;

use cellbridge::context::{ContextTracker, RecordedHistory};
use cellbridge::hooks::{NullHooks, TurnHooks};
use cellbridge::models::turn::TurnRequest;
use cellbridge::scheduler::{TurnScheduler, WorkerContext};
use cellbridge::AppError;

use super::test_helpers::{stub_session, stub_session_with_env, write_stub, ECHO_TURNS, TEST_TIMEOUT};

fn null_hooks() -> Arc<dyn TurnHooks> {
    Arc::new(NullHooks)
}

// ── FIFO ordering ────────────────────────────────────────────────────────────

/// Queued requests execute strictly in submission order and each ticket
/// receives its own turn's result.
#[tokio::test]
async fn requests_run_in_submission_order() {
    let (dir, stub) = write_stub(
        r#"while read line; do
  printf '%s\n' "$line" >> "$RECV_LOG"
  printf '{"type":"turn.result","result":{"final_message":"%s"}}\n' "$line"
done"#,
    );
    let recv_log = dir.path().join("received.log");
    let mut env = HashMap::new();
    env.insert(
        "RECV_LOG".to_owned(),
        recv_log.to_string_lossy().into_owned(),
    );
    let session = Arc::new(stub_session_with_env(stub, env));
    let scheduler = TurnScheduler::start(Arc::clone(&session), null_hooks(), None);

    assert_eq!(scheduler.pending(), 0);

    let mut tickets = Vec::new();
    for prompt in ["first", "second", "third"] {
        tickets.push(
            scheduler
                .submit(TurnRequest::new(prompt))
                .await
                .expect("submit must succeed"),
        );
    }

    for (ticket, prompt) in tickets.into_iter().zip(["first", "second", "third"]) {
        let outcome = timeout(TEST_TIMEOUT, ticket.wait())
            .await
            .expect("ticket must resolve")
            .expect("turn must succeed");
        assert_eq!(outcome.final_message.as_deref(), Some(prompt));
    }

    let received = std::fs::read_to_string(&recv_log).expect("stub log");
    let lines: Vec<&str> = received.lines().collect();
    assert_eq!(lines, vec!["first", "second", "third"]);

    scheduler.shutdown().await;
    session.stop().await;
}

// ── Failure isolation ────────────────────────────────────────────────────────

/// A failing turn surfaces on its own ticket; the worker proceeds to the
/// next request unharmed.
#[tokio::test]
async fn one_failed_turn_does_not_kill_the_worker() {
    // First run: swallow the prompt and exit without a result.
    // Later runs (marker present): answer normally.
    let (dir, stub) = write_stub(
        r#"if [ -f "$MARKER" ]; then
  read line
  printf '%s\n' '{"type":"turn.result","result":{"final_message":"recovered"}}'
else
  : > "$MARKER"
  read line
  exit 0
fi"#,
    );
    let marker = dir.path().join("first-run-marker");
    let mut env = HashMap::new();
    env.insert("MARKER".to_owned(), marker.to_string_lossy().into_owned());
    let session = Arc::new(stub_session_with_env(stub, env));
    let scheduler = TurnScheduler::start(Arc::clone(&session), null_hooks(), None);

    let doomed = scheduler
        .submit(TurnRequest::new("will fail"))
        .await
        .expect("submit must succeed");
    let follow_up = scheduler
        .submit(TurnRequest::new("will recover"))
        .await
        .expect("submit must succeed");

    let failure = timeout(TEST_TIMEOUT, doomed.wait())
        .await
        .expect("ticket must resolve");
    assert!(
        matches!(failure, Err(AppError::MissingTurnResult(_))),
        "expected MissingTurnResult, got: {failure:?}"
    );

    let recovery = timeout(TEST_TIMEOUT, follow_up.wait())
        .await
        .expect("ticket must resolve")
        .expect("worker must survive the earlier failure");
    assert_eq!(recovery.final_message.as_deref(), Some("recovered"));

    scheduler.shutdown().await;
    session.stop().await;
}

/// A dropped ticket never blocks the worker.
#[tokio::test]
async fn dropped_ticket_does_not_block_the_worker() {
    let (_dir, stub) = write_stub(ECHO_TURNS);
    let session = Arc::new(stub_session(stub));
    let scheduler = TurnScheduler::start(Arc::clone(&session), null_hooks(), None);

    let dropped = scheduler
        .submit(TurnRequest::new("nobody waits"))
        .await
        .expect("submit must succeed");
    drop(dropped);

    let awaited = scheduler
        .submit(TurnRequest::new("somebody waits"))
        .await
        .expect("submit must succeed");
    let outcome = timeout(TEST_TIMEOUT, awaited.wait())
        .await
        .expect("ticket must resolve")
        .expect("turn must succeed");
    assert_eq!(outcome.final_message.as_deref(), Some("somebody waits"));

    scheduler.shutdown().await;
    session.stop().await;
}

// ── Shutdown ─────────────────────────────────────────────────────────────────

/// Requests queued before the shutdown sentinel still run; submissions
/// after shutdown fail with a scheduler error.
#[tokio::test]
async fn shutdown_drains_queued_requests_then_closes() {
    let (_dir, stub) = write_stub(ECHO_TURNS);
    let session = Arc::new(stub_session(stub));
    let scheduler = TurnScheduler::start(Arc::clone(&session), null_hooks(), None);

    let first = scheduler
        .submit(TurnRequest::new("queued-1"))
        .await
        .expect("submit must succeed");
    let second = scheduler
        .submit(TurnRequest::new("queued-2"))
        .await
        .expect("submit must succeed");

    timeout(TEST_TIMEOUT, scheduler.shutdown())
        .await
        .expect("shutdown must join the worker");

    let one = timeout(TEST_TIMEOUT, first.wait())
        .await
        .expect("ticket must resolve")
        .expect("queued turn must have run before the sentinel");
    assert_eq!(one.final_message.as_deref(), Some("queued-1"));
    let two = timeout(TEST_TIMEOUT, second.wait())
        .await
        .expect("ticket must resolve")
        .expect("queued turn must have run before the sentinel");
    assert_eq!(two.final_message.as_deref(), Some("queued-2"));

    let late = scheduler.submit(TurnRequest::new("too late")).await;
    assert!(
        matches!(late, Err(AppError::Scheduler(_))),
        "post-shutdown submit must fail, got: {late:?}"
    );

    // Idempotent: a second shutdown is a no-op.
    timeout(TEST_TIMEOUT, scheduler.shutdown())
        .await
        .expect("second shutdown must return");

    session.stop().await;
}

// ── Prompt composition ───────────────────────────────────────────────────────

/// The worker composes template, changed-cells context, and user prompt;
/// the template applies only to the first turn of a process lifetime.
#[tokio::test]
async fn worker_composes_template_and_context() {
    let (_dir, stub) = write_stub(ECHO_TURNS);
    let session = Arc::new(stub_session(stub));

    let mut history = RecordedHistory::new();
    history.push_cell("x = 1");
    let context = WorkerContext {
        template: Some("Be brief.".to_owned()),
        tracker: StdMutex::new(ContextTracker::new(vec!["codex".to_owned()])),
        history: Arc::new(history),
    };
    let scheduler = TurnScheduler::start(Arc::clone(&session), null_hooks(), Some(context));

    let first = scheduler
        .submit(TurnRequest::new("why?").with_context(Some(5), None))
        .await
        .expect("submit must succeed");
    let composed = timeout(TEST_TIMEOUT, first.wait())
        .await
        .expect("ticket must resolve")
        .expect("turn must succeed");
    let wire_line = composed.final_message.expect("echoed prompt");

    assert!(wire_line.contains("Be brief."), "template on first turn");
    assert!(wire_line.contains("Context (changed cells):"));
    assert!(wire_line.contains("[cell 0]"));
    assert!(wire_line.contains("User prompt:"));
    assert!(
        wire_line.contains(" ⏎ "),
        "multi-line prompt must travel as one line with the separator token"
    );

    let second = scheduler
        .submit(TurnRequest::new("again?").with_context(Some(5), None))
        .await
        .expect("submit must succeed");
    let composed = timeout(TEST_TIMEOUT, second.wait())
        .await
        .expect("ticket must resolve")
        .expect("turn must succeed");
    let wire_line = composed.final_message.expect("echoed prompt");

    assert!(
        !wire_line.contains("Be brief."),
        "template must not repeat after the first turn"
    );
    assert!(
        wire_line.contains("[cell 0]"),
        "sliding window keeps recent cells available"
    );

    scheduler.shutdown().await;
    session.stop().await;
}
