//! Tests for retry orchestration across real `sh` attempts.

use std::path::Path;
use std::time::{Duration, Instant};

use claude_relay::cli::AgentLauncher;
use claude_relay::session::SessionStore;
use claude_relay::supervisor::{
    AttemptError, NullSink, ProcessSupervisor, RelayError, RetryOrchestrator, RetryPolicy,
    RunContext, TimeoutPolicy,
};
use tokio_util::sync::CancellationToken;

/// Launcher running `body` under `sh`, with `$LOG` pointing at `log`.
///
/// Every attempt appends its argument vector to `$LOG`, so line count equals
/// attempt count.
fn launcher(body: &str, log: &Path) -> AgentLauncher {
    let script = format!("echo \"$*\" >> \"$LOG\"; {body}");
    AgentLauncher::new("sh")
        .leading_args(["-c".to_string(), script, "sh".to_string()])
        .envs([("LOG".to_string(), log.display().to_string())])
}

fn orchestrator(
    launcher: AgentLauncher,
    policy: RetryPolicy,
    store: SessionStore,
) -> RetryOrchestrator {
    let supervisor = ProcessSupervisor::new(TimeoutPolicy {
        inactivity: Duration::from_secs(5),
        grace_period: Duration::from_millis(500),
    });
    RetryOrchestrator::new(launcher, supervisor, policy, store)
}

fn orchestrator_with_timeout(
    launcher: AgentLauncher,
    policy: RetryPolicy,
    store: SessionStore,
    inactivity: Duration,
) -> RetryOrchestrator {
    let supervisor = ProcessSupervisor::new(TimeoutPolicy {
        inactivity,
        grace_period: Duration::from_millis(500),
    });
    RetryOrchestrator::new(launcher, supervisor, policy, store)
}

fn fast_policy(max_retries: u32) -> RetryPolicy {
    RetryPolicy::new(max_retries, vec![Duration::from_millis(10)])
}

fn attempts(log: &Path) -> Vec<String> {
    std::fs::read_to_string(log)
        .unwrap_or_default()
        .lines()
        .map(str::to_string)
        .collect()
}

#[tokio::test]
async fn always_failing_makes_max_retries_plus_one_attempts() {
    let dir = tempfile::tempdir().unwrap();
    let log = dir.path().join("attempts.log");
    let store = SessionStore::new(dir.path().join("session.json"));

    let relay = orchestrator(launcher("exit 1", &log), fast_policy(2), store);
    let mut ctx = RunContext::default();
    let err = relay.execute("hello", &mut ctx, &mut NullSink).await.unwrap_err();

    match err {
        RelayError::RetriesExhausted {
            attempts: made,
            max_retries,
            last,
        } => {
            assert_eq!(made, 3);
            assert_eq!(max_retries, 2);
            assert!(matches!(last, AttemptError::Exit { code: Some(1) }));
        }
        other => panic!("Expected RetriesExhausted, got {other:?}"),
    }
    assert_eq!(attempts(&log).len(), 3);
}

#[tokio::test]
async fn zero_retries_means_single_attempt() {
    let dir = tempfile::tempdir().unwrap();
    let log = dir.path().join("attempts.log");
    let store = SessionStore::new(dir.path().join("session.json"));

    let relay = orchestrator(launcher("exit 2", &log), fast_policy(0), store);
    let err = relay
        .execute("hello", &mut RunContext::default(), &mut NullSink)
        .await
        .unwrap_err();

    assert!(matches!(err, RelayError::RetriesExhausted { attempts: 1, .. }));
    assert_eq!(attempts(&log).len(), 1);
}

#[tokio::test]
async fn success_stops_retrying_and_saves_session() {
    let dir = tempfile::tempdir().unwrap();
    let log = dir.path().join("attempts.log");
    let session_path = dir.path().join("session.json");
    let body = r#"n=$(wc -l < "$LOG"); if [ "$n" -lt 2 ]; then exit 1; fi
printf '%s\n' '{"type":"system","subtype":"init","session_id":"s-ok"}'
printf '%s\n' '{"type":"assistant","message":{"content":[{"type":"text","text":"done"}]}}'
printf '%s\n' '{"type":"result","subtype":"success","session_id":"s-ok"}'"#;

    let relay = orchestrator(
        launcher(body, &log),
        fast_policy(3),
        SessionStore::new(&session_path),
    );
    let summary = relay
        .execute("hello", &mut RunContext::default(), &mut NullSink)
        .await
        .unwrap();

    assert_eq!(summary.attempts, 2);
    assert_eq!(summary.session_id.as_deref(), Some("s-ok"));
    assert_eq!(summary.response, "done");
    assert_eq!(attempts(&log).len(), 2);
    assert_eq!(
        SessionStore::new(&session_path).load().await.as_deref(),
        Some("s-ok")
    );
}

#[tokio::test]
async fn retries_resume_latest_observed_session() {
    let dir = tempfile::tempdir().unwrap();
    let log = dir.path().join("attempts.log");
    let body =
        r#"printf '%s\n' '{"type":"system","subtype":"init","session_id":"s-first"}'; exit 1"#;

    let relay = orchestrator(
        launcher(body, &log),
        fast_policy(1),
        SessionStore::new(dir.path().join("session.json")),
    );
    let mut ctx = RunContext::default();
    let _ = relay.execute("hello", &mut ctx, &mut NullSink).await;

    let lines = attempts(&log);
    assert_eq!(lines.len(), 2);
    assert!(!lines[0].contains("--resume"));
    assert!(lines[1].ends_with("--resume s-first"));
    assert_eq!(ctx.session_id(), Some("s-first"));
}

#[tokio::test]
async fn initial_session_is_resumed_on_first_attempt() {
    let dir = tempfile::tempdir().unwrap();
    let log = dir.path().join("attempts.log");

    let relay = orchestrator(
        launcher("exit 1", &log),
        fast_policy(0),
        SessionStore::new(dir.path().join("session.json")),
    );
    let mut ctx = RunContext::new(Some("prior".to_string()), CancellationToken::new());
    let _ = relay.execute("hello", &mut ctx, &mut NullSink).await;

    assert!(attempts(&log)[0].ends_with("--resume prior"));
}

#[tokio::test]
async fn exhaustion_discards_stored_session() {
    let dir = tempfile::tempdir().unwrap();
    let log = dir.path().join("attempts.log");
    let session_path = dir.path().join("session.json");
    let store = SessionStore::new(&session_path);
    store.save("stale").await.unwrap();

    let relay = orchestrator(launcher("exit 1", &log), fast_policy(1), store);
    let mut ctx = RunContext::new(Some("stale".to_string()), CancellationToken::new());
    let err = relay.execute("hello", &mut ctx, &mut NullSink).await;

    assert!(err.is_err());
    assert!(!session_path.exists());
}

#[tokio::test]
async fn backoff_schedule_is_observed() {
    let dir = tempfile::tempdir().unwrap();
    let log = dir.path().join("attempts.log");
    let policy = RetryPolicy::new(
        3,
        vec![
            Duration::from_millis(100),
            Duration::from_millis(200),
            Duration::from_millis(300),
        ],
    );

    let relay = orchestrator(
        launcher("exit 1", &log),
        policy,
        SessionStore::new(dir.path().join("session.json")),
    );
    let started = Instant::now();
    let _ = relay
        .execute("hello", &mut RunContext::default(), &mut NullSink)
        .await;

    assert_eq!(attempts(&log).len(), 4);
    assert!(started.elapsed() >= Duration::from_millis(600));
}

#[tokio::test]
async fn cancellation_during_backoff_stops_run() {
    let dir = tempfile::tempdir().unwrap();
    let log = dir.path().join("attempts.log");
    let policy = RetryPolicy::new(3, vec![Duration::from_secs(30)]);

    let relay = orchestrator(
        launcher("exit 1", &log),
        policy,
        SessionStore::new(dir.path().join("session.json")),
    );
    let cancel = CancellationToken::new();
    let trigger = cancel.clone();
    tokio::spawn(async move {
        tokio::time::sleep(Duration::from_millis(300)).await;
        trigger.cancel();
    });

    let started = Instant::now();
    let mut ctx = RunContext::new(None, cancel);
    let err = relay.execute("hello", &mut ctx, &mut NullSink).await.unwrap_err();

    assert!(matches!(err, RelayError::Interrupted));
    assert_eq!(attempts(&log).len(), 1);
    assert!(started.elapsed() < Duration::from_secs(5));
}

#[tokio::test]
async fn cancellation_during_attempt_is_not_retried() {
    let dir = tempfile::tempdir().unwrap();
    let log = dir.path().join("attempts.log");

    let relay = orchestrator(
        launcher("exec sleep 30", &log),
        fast_policy(3),
        SessionStore::new(dir.path().join("session.json")),
    );
    let cancel = CancellationToken::new();
    let trigger = cancel.clone();
    tokio::spawn(async move {
        tokio::time::sleep(Duration::from_millis(300)).await;
        trigger.cancel();
    });

    let mut ctx = RunContext::new(None, cancel);
    let err = relay.execute("hello", &mut ctx, &mut NullSink).await.unwrap_err();

    assert!(matches!(err, RelayError::Interrupted));
    assert_eq!(attempts(&log).len(), 1);
}

#[tokio::test]
async fn timed_out_attempt_is_retried_and_resumed() {
    let dir = tempfile::tempdir().unwrap();
    let log = dir.path().join("attempts.log");
    let session_path = dir.path().join("session.json");
    // First attempt announces a session, then goes silent; the second succeeds.
    let body = r#"printf '%s\n' '{"type":"system","subtype":"init","session_id":"s-slow"}'
n=$(wc -l < "$LOG"); if [ "$n" -lt 2 ]; then exec sleep 30; fi
printf '%s\n' '{"type":"assistant","message":{"content":[{"type":"text","text":"recovered"}]}}'
printf '%s\n' '{"type":"result","subtype":"success","session_id":"s-slow"}'"#;

    let relay = orchestrator_with_timeout(
        launcher(body, &log),
        RetryPolicy::new(3, vec![Duration::from_millis(200)]),
        SessionStore::new(&session_path),
        Duration::from_millis(300),
    );
    let started = Instant::now();
    let summary = relay
        .execute("hello", &mut RunContext::default(), &mut NullSink)
        .await
        .unwrap();
    let elapsed = started.elapsed();

    assert_eq!(summary.attempts, 2);
    assert_eq!(summary.response, "recovered");
    let lines = attempts(&log);
    assert_eq!(lines.len(), 2);
    assert!(lines[1].ends_with("--resume s-slow"));
    // Inactivity window plus backoff, well short of the 30s sleep.
    assert!(elapsed >= Duration::from_millis(500), "elapsed {elapsed:?}");
    assert!(elapsed < Duration::from_secs(10), "elapsed {elapsed:?}");
    assert_eq!(
        SessionStore::new(&session_path).load().await.as_deref(),
        Some("s-slow")
    );
}
