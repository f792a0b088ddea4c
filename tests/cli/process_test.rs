//! Tests for the command builder and process handle.

use std::time::Duration;

use claude_relay::cli::{
    AgentCommand, AgentCommandBuilder, AgentLauncher, AgentProcess, EmptyPromptError,
    ShutdownReport, SpawnError,
};
use tokio::io::AsyncReadExt;

#[test]
fn builder_fresh_invocation() {
    let args = AgentCommandBuilder::new("Fix the bug").build_args().unwrap();
    assert_eq!(
        args,
        vec!["-p", "Fix the bug", "--output-format", "stream-json", "--verbose"]
    );
}

#[test]
fn builder_resume_appends_session() {
    let args = AgentCommandBuilder::new("continue")
        .resume("session_abc123")
        .build_args()
        .unwrap();
    assert_eq!(&args[args.len() - 2..], ["--resume", "session_abc123"]);
}

#[test]
fn builder_prompt_is_one_argument() {
    let prompt = "rm -rf / && echo \"$HOME\" ; `whoami`";
    let args = AgentCommandBuilder::new(prompt).build_args().unwrap();
    assert_eq!(args[1], prompt);
    assert_eq!(args.len(), 5);
}

#[test]
fn builder_rejects_blank_prompt() {
    assert_eq!(AgentCommandBuilder::new("").build_args(), Err(EmptyPromptError));
    assert_eq!(
        AgentCommandBuilder::new(" \t\n").build_args(),
        Err(EmptyPromptError)
    );
}

#[test]
fn builder_leading_args_come_first() {
    let args = AgentCommandBuilder::new("hi")
        .leading_args(["mock-agent"])
        .resume_opt(Some("s1"))
        .build_args()
        .unwrap();
    assert_eq!(args[0], "mock-agent");
    assert_eq!(args[1], "-p");
    assert_eq!(args.last().map(String::as_str), Some("s1"));
}

#[test]
fn launcher_applies_environment() {
    let command = AgentLauncher::new("claude")
        .envs([("NODE_ENV".to_string(), "development".to_string())])
        .env_remove(["CLAUDECODE"])
        .working_dir("/tmp")
        .command("hello", None)
        .unwrap();

    assert_eq!(command.program.to_string_lossy(), "claude");
    assert_eq!(
        command.env,
        vec![("NODE_ENV".to_string(), "development".to_string())]
    );
    assert_eq!(command.env_remove, vec!["CLAUDECODE"]);
    assert_eq!(
        command.working_dir.as_deref(),
        Some(std::path::Path::new("/tmp"))
    );
}

#[test]
fn display_quotes_for_logs() {
    let command = AgentCommandBuilder::new("two words").build("claude").unwrap();
    assert_eq!(
        command.display(),
        "claude -p 'two words' --output-format stream-json --verbose"
    );
}

#[tokio::test]
async fn spawn_missing_binary_is_not_found() {
    let command = AgentCommand::new("/nonexistent/claude-relay-test-binary", ["-p", "x"]);
    let err = AgentProcess::spawn(&command).unwrap_err();
    assert!(matches!(err, SpawnError::NotFound(_)));
}

#[tokio::test]
async fn spawn_passes_arguments_verbatim() {
    let command = AgentCommand::new("sh", ["-c", "printf '%s' \"$1\"", "sh", "a \"b\" $c"]);
    let mut process = AgentProcess::spawn(&command).unwrap();
    let mut stdout = process.take_stdout().unwrap();
    let mut out = String::new();
    stdout.read_to_string(&mut out).await.unwrap();
    assert_eq!(out, "a \"b\" $c");
    assert!(process.wait().await.unwrap().success());
}

#[tokio::test]
async fn env_is_set_and_stripped() {
    std::env::set_var("CLAUDE_RELAY_STRIP_ME", "1");
    let command = AgentCommand::new(
        "sh",
        ["-c", "printf '%s/%s' \"${CLAUDE_RELAY_STRIP_ME:-unset}\" \"$REDIS_PORT\""],
    )
    .env("REDIS_PORT", "6398")
    .env_remove("CLAUDE_RELAY_STRIP_ME");

    let mut process = AgentProcess::spawn(&command).unwrap();
    let mut stdout = process.take_stdout().unwrap();
    let mut out = String::new();
    stdout.read_to_string(&mut out).await.unwrap();
    assert_eq!(out, "unset/6398");
}

#[tokio::test]
async fn shutdown_terminates_cooperative_process() {
    let command = AgentCommand::new("sh", ["-c", "exec sleep 30"]);
    let mut process = AgentProcess::spawn(&command).unwrap();

    let report = process.shutdown(Duration::from_secs(5)).await.unwrap();
    assert!(matches!(report, ShutdownReport::Terminated(_)));
    assert!(process.is_shutting_down());
}

#[tokio::test]
async fn shutdown_kills_process_ignoring_sigterm() {
    let command = AgentCommand::new("sh", ["-c", "trap '' TERM; while true; do sleep 1; done"]);
    let mut process = AgentProcess::spawn(&command).unwrap();
    // Let the shell install its trap before signalling.
    tokio::time::sleep(Duration::from_millis(200)).await;

    let report = process.shutdown(Duration::from_millis(300)).await.unwrap();
    assert_eq!(report, ShutdownReport::Killed);
}

#[tokio::test]
async fn shutdown_is_idempotent() {
    let command = AgentCommand::new("sh", ["-c", "exec sleep 30"]);
    let mut process = AgentProcess::spawn(&command).unwrap();

    process.shutdown(Duration::from_secs(5)).await.unwrap();
    let again = process.shutdown(Duration::from_secs(5)).await.unwrap();
    assert_eq!(again, ShutdownReport::AlreadyRequested);
}

#[tokio::test]
async fn shutdown_after_exit_sends_nothing() {
    let command = AgentCommand::new("sh", ["-c", "exit 0"]);
    let mut process = AgentProcess::spawn(&command).unwrap();
    process.wait().await.unwrap();

    let report = process.shutdown(Duration::from_secs(5)).await.unwrap();
    assert_eq!(report, ShutdownReport::AlreadyExited);
}
