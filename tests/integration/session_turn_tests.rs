//! Integration tests for the turn protocol loop against stub agents.

#![cfg(unix)]

use std::collections::HashMap;

use tokio::time::timeout;

use cellbridge::hooks::NullHooks;
use cellbridge::AppError;

use super::test_helpers::{
    stub_session, stub_session_with_env, write_stub, ECHO_TURNS, OK_TURN, TEST_TIMEOUT,
};

// ── Basic round-trip ─────────────────────────────────────────────────────────

/// A stub that answers one `turn.result` yields `final_message == "ok"`
/// and an event list of length one.
#[tokio::test]
async fn turn_returns_final_message_and_events() {
    let (_dir, stub) = write_stub(OK_TURN);
    let session = stub_session(stub);

    let outcome = timeout(TEST_TIMEOUT, session.send("hello", &NullHooks))
        .await
        .expect("turn must not hang")
        .expect("turn must succeed");

    assert_eq!(outcome.final_message.as_deref(), Some("ok"));
    assert_eq!(outcome.events.len(), 1);
    assert_eq!(outcome.events[0]["type"], "turn.result");

    session.stop().await;
}

// ── Non-protocol output ──────────────────────────────────────────────────────

/// Diagnostic lines that are not JSON are skipped without aborting the
/// turn and never reach the event list.
#[tokio::test]
async fn non_protocol_lines_are_skipped() {
    let (_dir, stub) = write_stub(
        r#"read line
printf '%s\n' 'warning: model cache is cold'
printf '%s\n' 'not-json {{{'
printf '%s\n' '{"type":"turn.result","result":{"final_message":"ok"}}'"#,
    );
    let session = stub_session(stub);

    let outcome = timeout(TEST_TIMEOUT, session.send("hello", &NullHooks))
        .await
        .expect("turn must not hang")
        .expect("noise must not fail the turn");

    assert_eq!(outcome.final_message.as_deref(), Some("ok"));
    assert_eq!(
        outcome.events.len(),
        1,
        "only parsed events may be recorded"
    );

    session.stop().await;
}

// ── Missing terminal event ───────────────────────────────────────────────────

/// A stream that closes without `turn.result` fails the turn with
/// `MissingTurnResult`, and the session survives for the next turn.
#[tokio::test]
async fn missing_turn_result_fails_that_turn_only() {
    let (_dir, stub) = write_stub(
        r#"read line
printf '%s\n' '{"type":"status","message":"working"}'"#,
    );
    let session = stub_session(stub);

    let first = timeout(TEST_TIMEOUT, session.send("one", &NullHooks))
        .await
        .expect("turn must not hang");
    assert!(
        matches!(first, Err(AppError::MissingTurnResult(_))),
        "expected MissingTurnResult, got: {first:?}"
    );

    // The session is not poisoned: a fresh process is spawned and the
    // protocol loop runs to the same defined failure.
    let second = timeout(TEST_TIMEOUT, session.send("two", &NullHooks))
        .await
        .expect("second turn must not hang");
    assert!(matches!(second, Err(AppError::MissingTurnResult(_))));

    session.stop().await;
}

// ── Drain between turns ──────────────────────────────────────────────────────

/// Output flushed after a turn's terminal event must not bleed into the
/// next turn's event list.
#[tokio::test]
async fn trailing_output_is_drained_between_turns() {
    let (_dir, stub) = write_stub(
        r#"read p1
printf '%s\n' '{"type":"turn.result","result":{"final_message":"ok1"}}'
printf '%s\n' '{"type":"status","message":"stale"}'
printf '%s\n' 'late-flush noise'
read p2
printf '%s\n' '{"type":"turn.result","result":{"final_message":"ok2"}}'"#,
    );
    let session = stub_session(stub);

    let first = timeout(TEST_TIMEOUT, session.send("one", &NullHooks))
        .await
        .expect("turn must not hang")
        .expect("first turn must succeed");
    assert_eq!(first.final_message.as_deref(), Some("ok1"));
    assert_eq!(first.events.len(), 1);

    let second = timeout(TEST_TIMEOUT, session.send("two", &NullHooks))
        .await
        .expect("turn must not hang")
        .expect("second turn must succeed");
    assert_eq!(second.final_message.as_deref(), Some("ok2"));
    assert_eq!(
        second.events.len(),
        1,
        "stale output from the previous turn must not appear: {:?}",
        second.events
    );

    session.stop().await;
}

// ── Concurrency ──────────────────────────────────────────────────────────────

/// Two concurrent sends are serialized by the turn lock: the stub
/// receives two complete, non-interleaved prompt lines.
#[tokio::test]
async fn concurrent_sends_never_interleave() {
    let (dir, stub) = write_stub(
        r#"while read line; do
  printf '%s\n' "$line" >> "$RECV_LOG"
  printf '%s\n' '{"type":"turn.result","result":{"final_message":"ok"}}'
done"#,
    );
    let recv_log = dir.path().join("received.log");
    let mut env = HashMap::new();
    env.insert(
        "RECV_LOG".to_owned(),
        recv_log.to_string_lossy().into_owned(),
    );
    let session = stub_session_with_env(stub, env);

    let p1 = format!("first-{}", "a".repeat(512));
    let p2 = format!("second-{}", "b".repeat(512));

    let (r1, r2) = tokio::join!(
        timeout(TEST_TIMEOUT, session.send(&p1, &NullHooks)),
        timeout(TEST_TIMEOUT, session.send(&p2, &NullHooks)),
    );
    r1.expect("must not hang").expect("first send must succeed");
    r2.expect("must not hang").expect("second send must succeed");

    let received = std::fs::read_to_string(&recv_log).expect("stub must have logged lines");
    let lines: Vec<&str> = received.lines().collect();
    assert_eq!(lines.len(), 2, "exactly two complete lines: {lines:?}");
    assert!(lines.contains(&p1.as_str()), "first prompt must be intact");
    assert!(lines.contains(&p2.as_str()), "second prompt must be intact");

    session.stop().await;
}

// ── first_turn lifecycle ─────────────────────────────────────────────────────

/// `first_turn` is true before any prompt, false after one, and resets
/// on stop.
#[tokio::test]
async fn first_turn_flips_and_resets() {
    let (_dir, stub) = write_stub(
        r#"while read line; do
  if [ "$line" = "__CELLBRIDGE_STOP__" ]; then exit 0; fi
  printf '%s\n' '{"type":"turn.result","result":{"final_message":"ok"}}'
done"#,
    );
    let session = stub_session(stub);

    assert!(session.first_turn().await, "fresh session starts at first turn");

    timeout(TEST_TIMEOUT, session.send("hello", &NullHooks))
        .await
        .expect("turn must not hang")
        .expect("turn must succeed");
    assert!(!session.first_turn().await, "first_turn flips after a prompt");

    session.stop().await;
    assert!(session.first_turn().await, "stop resets first_turn");
}

// ── Metadata capture ─────────────────────────────────────────────────────────

/// Resume metadata flowing through the event stream is learned by the
/// session and visible in its snapshot.
#[tokio::test]
async fn metadata_is_captured_from_the_stream() {
    let (_dir, stub) = write_stub(
        r#"read line
printf '%s\n' '{"type":"session.resume","session_id":"sess-77","resume_command":"cellagent --resume sess-77","rollout_path":"/tmp/sess-77.jsonl"}'
printf '%s\n' '{"type":"turn.result","result":{"final_message":"ok"}}'"#,
    );
    let session = stub_session(stub);

    let outcome = timeout(TEST_TIMEOUT, session.send("hello", &NullHooks))
        .await
        .expect("turn must not hang")
        .expect("turn must succeed");
    assert_eq!(outcome.events.len(), 2, "both events must be observed");

    let metadata = session.metadata().await;
    assert_eq!(metadata.session_id.as_deref(), Some("sess-77"));
    assert_eq!(
        metadata.resume_command.as_deref(),
        Some("cellagent --resume sess-77")
    );
    assert_eq!(metadata.rollout_path.as_deref(), Some("/tmp/sess-77.jsonl"));

    session.stop().await;
}

/// The session echoes multi-turn conversations against one process.
#[tokio::test]
async fn multi_turn_conversation_reuses_the_process() {
    let (_dir, stub) = write_stub(ECHO_TURNS);
    let session = stub_session(stub);

    for prompt in ["alpha", "beta", "gamma"] {
        let outcome = timeout(TEST_TIMEOUT, session.send(prompt, &NullHooks))
            .await
            .expect("turn must not hang")
            .expect("turn must succeed");
        assert_eq!(outcome.final_message.as_deref(), Some(prompt));
    }

    session.stop().await;
}
