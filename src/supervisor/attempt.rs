//! Process supervisor for a single attempt.
//!
//! One coordinating loop multiplexes stdout, stderr, the inactivity timer,
//! process exit and the run's cancellation token. Any byte on either output
//! channel re-arms the timer. Timeout, cancellation and a panic inside the
//! loop all resolve to the same two-phase shutdown of the child.

use std::panic::AssertUnwindSafe;
use std::time::Duration;

use futures_util::FutureExt;
use tokio::io::AsyncReadExt;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;

use crate::cli::{
    AgentCommand, AgentProcess, ContentItem, ShutdownReport, SpawnError, StreamEvent,
    StreamParser, READ_CHUNK_BYTES,
};
use crate::supervisor::{AttemptState, AttemptStateMachine};

/// Inactivity timeout and shutdown grace period.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TimeoutPolicy {
    /// Maximum silence on both output channels before the attempt times out.
    pub inactivity: Duration,
    /// Delay between SIGTERM and SIGKILL.
    pub grace_period: Duration,
}

impl Default for TimeoutPolicy {
    fn default() -> Self {
        Self {
            inactivity: Duration::from_millis(600_000),
            grace_period: crate::cli::DEFAULT_GRACE_PERIOD,
        }
    }
}

/// Why an attempt failed.
#[derive(thiserror::Error, Debug)]
pub enum AttemptError {
    /// The process could not be started.
    #[error("Failed to spawn agent: {0}")]
    Spawn(#[from] SpawnError),
    /// The process exited with a nonzero code (or was killed by a signal).
    #[error("Agent exited with {}", exit_label(.code))]
    Exit {
        /// Exit code, if the process exited normally.
        code: Option<i32>,
    },
    /// The agent emitted an error result.
    #[error("Agent reported error: {message}")]
    Protocol {
        /// Primary error message.
        message: String,
        /// Additional error details.
        errors: Vec<String>,
    },
    /// No output on either channel within the inactivity window.
    #[error("No activity for {}ms", .after.as_millis())]
    Timeout {
        /// The configured inactivity window.
        after: Duration,
    },
    /// The process exited cleanly without a result event.
    #[error("Agent exited without a result event")]
    MissingResult,
    /// Supervising the process failed.
    #[error("I/O error supervising agent: {0}")]
    Io(#[from] std::io::Error),
    /// The run was cancelled by a signal or fault.
    #[error("Interrupted")]
    Interrupted,
}

#[allow(clippy::ref_option)]
fn exit_label(code: &Option<i32>) -> String {
    code.map_or_else(|| "signal".to_string(), |c| format!("code {c}"))
}

impl AttemptError {
    /// Whether another attempt may follow this failure.
    #[must_use]
    pub fn is_retryable(&self) -> bool {
        !matches!(self, Self::Interrupted)
    }
}

/// Terminal outcome of an attempt.
#[derive(Debug)]
pub enum AttemptOutcome {
    /// A successful result event was received.
    Success,
    /// The attempt failed.
    Failed(AttemptError),
}

/// Everything an attempt produced.
#[derive(Debug)]
pub struct AttemptReport {
    /// Terminal outcome.
    pub outcome: AttemptOutcome,
    /// Session id observed during the attempt.
    pub session_id: Option<String>,
    /// Accumulated response text.
    pub response: String,
    /// Final state.
    pub state: AttemptState,
    /// Number of times the attempt timed out (0 or 1).
    pub timeouts: usize,
    /// What shutdown did, if it ran.
    pub shutdown: Option<ShutdownReport>,
}

impl AttemptReport {
    /// Whether the attempt succeeded.
    #[must_use]
    pub fn is_success(&self) -> bool {
        matches!(self.outcome, AttemptOutcome::Success)
    }
}

/// Receiver for incrementally forwarded agent output.
pub trait OutputSink: Send {
    /// A text fragment from an assistant message, in arrival order.
    fn text(&mut self, text: &str);

    /// A tool invocation announced by the agent.
    fn tool_use(&mut self, name: &str, input: &serde_json::Value) {
        let _ = (name, input);
    }

    /// A tool result reported by the agent.
    fn tool_result(&mut self, tool_use_id: &str, is_error: bool) {
        let _ = (tool_use_id, is_error);
    }

    /// Unstructured output from the secondary channel.
    fn diagnostic(&mut self, chunk: &str) {
        let _ = chunk;
    }
}

/// Sink that discards everything.
#[derive(Debug, Default, Clone, Copy)]
pub struct NullSink;

impl OutputSink for NullSink {
    fn text(&mut self, _text: &str) {}
}

/// Per-attempt bookkeeping.
struct Attempt {
    state: AttemptStateMachine,
    session_id: Option<String>,
    response: String,
    shutdown: Option<ShutdownReport>,
}

impl Attempt {
    fn new() -> Self {
        Self {
            state: AttemptStateMachine::new(),
            session_id: None,
            response: String::new(),
            shutdown: None,
        }
    }

    /// Apply one event. Returns the terminal result once a result event arrives.
    fn handle_event(
        &mut self,
        event: StreamEvent,
        sink: &mut dyn OutputSink,
    ) -> Option<Result<(), AttemptError>> {
        match event {
            StreamEvent::System(system) if system.is_init() => {
                if let Some(id) = system.session_id {
                    tracing::info!(session_id = %id, "Session started");
                    self.session_id = Some(id);
                }
                None
            }
            StreamEvent::Assistant { message } => {
                for item in message.items() {
                    match item {
                        ContentItem::Text { text } => {
                            self.response.push_str(&text);
                            sink.text(&text);
                        }
                        ContentItem::ToolUse { name, input, .. } => sink.tool_use(&name, &input),
                        ContentItem::ToolResult {
                            tool_use_id,
                            is_error,
                            ..
                        } => sink.tool_result(&tool_use_id, is_error),
                        ContentItem::Unknown => {}
                    }
                }
                None
            }
            StreamEvent::Result(result) => {
                if result.is_success() {
                    if self.session_id.is_none() {
                        self.session_id = result.session_id;
                    }
                    Some(Ok(()))
                } else {
                    let message = result.error_message();
                    tracing::warn!(subtype = %result.subtype, %message, details = ?result.errors, "Agent reported error");
                    Some(Err(AttemptError::Protocol {
                        message,
                        errors: result.errors,
                    }))
                }
            }
            StreamEvent::System(_) | StreamEvent::Unknown => None,
        }
    }

    fn finish(mut self, result: Result<(), AttemptError>) -> AttemptReport {
        let outcome = match result {
            Ok(()) => {
                self.state.transition(AttemptState::Success);
                AttemptOutcome::Success
            }
            Err(e) => {
                self.state.transition(AttemptState::Failed);
                AttemptOutcome::Failed(e)
            }
        };
        AttemptReport {
            outcome,
            session_id: self.session_id,
            response: self.response,
            state: self.state.state(),
            timeouts: self.state.timeouts(),
            shutdown: self.shutdown,
        }
    }
}

/// Supervises one agent process at a time.
#[derive(Debug, Clone, Copy, Default)]
pub struct ProcessSupervisor {
    timeout: TimeoutPolicy,
}

impl ProcessSupervisor {
    /// Create a supervisor with the given timeout policy.
    #[must_use]
    pub fn new(timeout: TimeoutPolicy) -> Self {
        Self { timeout }
    }

    /// The timeout policy in effect.
    #[must_use]
    pub fn timeout_policy(&self) -> TimeoutPolicy {
        self.timeout
    }

    /// Run one attempt of `command` to a terminal outcome.
    pub async fn run(
        &self,
        command: &AgentCommand,
        cancel: &CancellationToken,
        sink: &mut dyn OutputSink,
    ) -> AttemptReport {
        let mut attempt = Attempt::new();

        let mut process = match AgentProcess::spawn(command) {
            Ok(process) => process,
            Err(e) => {
                tracing::error!(error = %e, program = %command.program.display(), "Failed to spawn agent");
                return attempt.finish(Err(e.into()));
            }
        };
        attempt.state.transition(AttemptState::Running);

        let supervised = AssertUnwindSafe(self.supervise(&mut process, &mut attempt, cancel, sink))
            .catch_unwind()
            .await;
        let result = match supervised {
            Ok(result) => result,
            Err(_) => self.recover_from_fault(&mut process, &mut attempt, cancel).await,
        };
        attempt.finish(result)
    }

    /// A panic unwound out of the supervision loop while the process may still run.
    ///
    /// The process handle lives outside the unwound future, so it is shut down
    /// gracefully instead of being killed on drop.
    async fn recover_from_fault(
        &self,
        process: &mut AgentProcess,
        attempt: &mut Attempt,
        cancel: &CancellationToken,
    ) -> Result<(), AttemptError> {
        tracing::error!("Fault while supervising agent, shutting down");
        cancel.cancel();
        attempt.state.transition(AttemptState::ShuttingDown);
        match process.shutdown(self.timeout.grace_period).await {
            Ok(report) => attempt.shutdown = Some(report),
            Err(e) => tracing::warn!(error = %e, "Failed to shut down agent"),
        }
        Err(AttemptError::Interrupted)
    }

    async fn supervise(
        &self,
        process: &mut AgentProcess,
        attempt: &mut Attempt,
        cancel: &CancellationToken,
        sink: &mut dyn OutputSink,
    ) -> Result<(), AttemptError> {
        let (Some(mut stdout), Some(mut stderr)) = (process.take_stdout(), process.take_stderr())
        else {
            return Err(std::io::Error::other("agent output channels not captured").into());
        };

        let inactivity = self.timeout.inactivity;
        let mut parser = StreamParser::new();
        let mut out_chunk = vec![0u8; READ_CHUNK_BYTES];
        let mut err_chunk = vec![0u8; READ_CHUNK_BYTES];
        let mut stdout_open = true;
        let mut stderr_open = true;
        let mut timer = Box::pin(tokio::time::sleep(inactivity));

        let terminal = 'attempt: loop {
            tokio::select! {
                biased;

                () = cancel.cancelled() => {
                    tracing::info!("Attempt cancelled, shutting down agent");
                    attempt.state.transition(AttemptState::ShuttingDown);
                    attempt.shutdown = Some(process.shutdown(self.timeout.grace_period).await?);
                    return Err(AttemptError::Interrupted);
                }
                () = &mut timer => {
                    attempt.state.transition(AttemptState::TimedOut);
                    tracing::warn!(timeout_ms = inactivity.as_millis(), "Agent timed out with no activity");
                    attempt.state.transition(AttemptState::ShuttingDown);
                    attempt.shutdown = Some(process.shutdown(self.timeout.grace_period).await?);
                    return Err(AttemptError::Timeout { after: inactivity });
                }
                read = stdout.read(&mut out_chunk), if stdout_open => {
                    let events = match read {
                        Ok(0) => {
                            stdout_open = false;
                            parser.finish()
                        }
                        Ok(n) => {
                            timer.as_mut().reset(Instant::now() + inactivity);
                            parser.feed(&out_chunk[..n])
                        }
                        Err(e) => {
                            tracing::warn!(error = %e, "Failed reading agent stdout");
                            stdout_open = false;
                            parser.finish()
                        }
                    };
                    for event in events {
                        if let Some(terminal) = attempt.handle_event(event, sink) {
                            break 'attempt terminal;
                        }
                    }
                }
                read = stderr.read(&mut err_chunk), if stderr_open => {
                    match read {
                        Ok(0) => stderr_open = false,
                        Ok(n) => {
                            timer.as_mut().reset(Instant::now() + inactivity);
                            let text = String::from_utf8_lossy(&err_chunk[..n]);
                            tracing::debug!(bytes = n, "Agent stderr activity");
                            sink.diagnostic(&text);
                        }
                        Err(e) => {
                            tracing::warn!(error = %e, "Failed reading agent stderr");
                            stderr_open = false;
                        }
                    }
                }
                status = process.wait(), if !stdout_open && !stderr_open => {
                    let status = status?;
                    break 'attempt match status.code() {
                        Some(0) => {
                            tracing::warn!("Agent exited cleanly without a result event");
                            Err(AttemptError::MissingResult)
                        }
                        code => {
                            tracing::warn!(code = ?code, "Agent exited with failure");
                            Err(AttemptError::Exit { code })
                        }
                    };
                }
            }
        };
        drop(timer);
        drop(stdout);
        drop(stderr);

        if process.try_wait()?.is_none() {
            self.reap(process, attempt).await;
        }
        terminal
    }

    /// Give a process that already produced its result time to exit, then shut it down.
    async fn reap(&self, process: &mut AgentProcess, attempt: &mut Attempt) {
        let grace = self.timeout.grace_period;
        match tokio::time::timeout(grace, process.wait()).await {
            Ok(Ok(status)) if !status.success() => {
                tracing::warn!(code = ?status.code(), "Agent exited with failure after its result");
            }
            Ok(Ok(_)) => {}
            Ok(Err(e)) => tracing::warn!(error = %e, "Failed waiting for agent exit"),
            Err(_) => {
                tracing::warn!("Agent still running after its result, shutting down");
                match process.shutdown(grace).await {
                    Ok(report) => attempt.shutdown = Some(report),
                    Err(e) => tracing::warn!(error = %e, "Failed to shut down agent"),
                }
            }
        }
    }
}
