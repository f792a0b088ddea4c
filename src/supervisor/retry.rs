//! Retry orchestration across supervised attempts.
//!
//! The orchestrator owns a [`RunContext`] for the whole run: the most
//! recently known session id and the cancellation token every attempt
//! observes. Failed attempts are retried after a backoff delay with the
//! latest session id; the session is persisted only after a successful
//! result and discarded once the retry budget is spent.

use std::time::Duration;

use tokio_util::sync::CancellationToken;

use crate::cli::{AgentLauncher, EmptyPromptError};
use crate::session::SessionStore;
use crate::supervisor::{AttemptError, AttemptOutcome, OutputSink, ProcessSupervisor};

/// Retry budget and backoff schedule.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RetryPolicy {
    max_retries: u32,
    backoff: Vec<Duration>,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_retries: 3,
            backoff: vec![
                Duration::from_millis(1000),
                Duration::from_millis(2000),
                Duration::from_millis(5000),
            ],
        }
    }
}

impl RetryPolicy {
    /// Create a policy with `max_retries` retries after the first attempt.
    #[must_use]
    pub fn new(max_retries: u32, backoff: Vec<Duration>) -> Self {
        Self {
            max_retries,
            backoff,
        }
    }

    /// Retries allowed after the first attempt.
    #[must_use]
    pub fn max_retries(&self) -> u32 {
        self.max_retries
    }

    /// Delay before retry number `retry` (1-based), clamped to the last entry.
    #[must_use]
    pub fn delay_for(&self, retry: u32) -> Duration {
        let Some(last) = self.backoff.len().checked_sub(1) else {
            return Duration::ZERO;
        };
        let index = usize::try_from(retry.saturating_sub(1)).unwrap_or(usize::MAX);
        self.backoff[index.min(last)]
    }
}

/// State shared by every attempt of one run.
#[derive(Debug, Clone, Default)]
pub struct RunContext {
    session_id: Option<String>,
    cancel: CancellationToken,
}

impl RunContext {
    /// Create a context starting from `session_id`.
    #[must_use]
    pub fn new(session_id: Option<String>, cancel: CancellationToken) -> Self {
        Self { session_id, cancel }
    }

    /// Most recently known session id.
    #[must_use]
    pub fn session_id(&self) -> Option<&str> {
        self.session_id.as_deref()
    }

    /// Token that interrupts the run.
    #[must_use]
    pub fn cancel_token(&self) -> &CancellationToken {
        &self.cancel
    }
}

/// A successful run.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RunSummary {
    /// Session id reported by the successful attempt.
    pub session_id: Option<String>,
    /// Response text of the successful attempt.
    pub response: String,
    /// Attempts made, including the successful one.
    pub attempts: u32,
}

/// Fatal run failures.
#[derive(thiserror::Error, Debug)]
pub enum RelayError {
    /// The prompt was empty; nothing was spawned.
    #[error(transparent)]
    EmptyPrompt(#[from] EmptyPromptError),
    /// Every attempt failed.
    #[error("Max retries ({max_retries}) exceeded after {attempts} attempts: {last}")]
    RetriesExhausted {
        /// Attempts made.
        attempts: u32,
        /// Configured retry budget.
        max_retries: u32,
        /// Failure of the final attempt.
        last: AttemptError,
    },
    /// A termination signal or fault stopped the run.
    #[error("Interrupted")]
    Interrupted,
}

/// Drives supervised attempts until success or exhaustion.
#[derive(Debug, Clone)]
pub struct RetryOrchestrator {
    launcher: AgentLauncher,
    supervisor: ProcessSupervisor,
    policy: RetryPolicy,
    store: SessionStore,
}

impl RetryOrchestrator {
    /// Create an orchestrator.
    #[must_use]
    pub fn new(
        launcher: AgentLauncher,
        supervisor: ProcessSupervisor,
        policy: RetryPolicy,
        store: SessionStore,
    ) -> Self {
        Self {
            launcher,
            supervisor,
            policy,
            store,
        }
    }

    /// Run `prompt` to completion, retrying failures per the policy.
    ///
    /// # Errors
    ///
    /// Returns `RelayError::EmptyPrompt` before spawning anything if the
    /// prompt is empty, `RelayError::Interrupted` if the context is
    /// cancelled, and `RelayError::RetriesExhausted` once every attempt
    /// has failed.
    pub async fn execute(
        &self,
        prompt: &str,
        ctx: &mut RunContext,
        sink: &mut dyn OutputSink,
    ) -> Result<RunSummary, RelayError> {
        self.launcher.command(prompt, None)?;

        let max_retries = self.policy.max_retries();
        let mut retry: u32 = 0;

        loop {
            let command = self.launcher.command(prompt, ctx.session_id())?;
            tracing::info!(
                attempt = retry + 1,
                max_attempts = max_retries.saturating_add(1),
                resume = ?ctx.session_id(),
                command = %command.display(),
                "Starting attempt"
            );

            let report = self.supervisor.run(&command, &ctx.cancel, sink).await;
            if let Some(id) = &report.session_id {
                ctx.session_id = Some(id.clone());
            }

            let error = match report.outcome {
                AttemptOutcome::Success => {
                    if let Some(id) = &report.session_id {
                        if let Err(e) = self.store.save(id).await {
                            tracing::warn!(error = %e, "Failed to save session, continuity will be lost");
                        }
                    }
                    return Ok(RunSummary {
                        session_id: report.session_id,
                        response: report.response,
                        attempts: retry + 1,
                    });
                }
                AttemptOutcome::Failed(error) => error,
            };

            if !error.is_retryable() {
                return Err(RelayError::Interrupted);
            }

            if retry >= max_retries {
                tracing::error!(max_retries, error = %error, "Max retries exceeded");
                if let Err(e) = self.store.reset().await {
                    tracing::warn!(error = %e, "Failed to discard session");
                }
                return Err(RelayError::RetriesExhausted {
                    attempts: retry + 1,
                    max_retries,
                    last: error,
                });
            }

            retry += 1;
            let delay = self.policy.delay_for(retry);
            tracing::warn!(
                retry,
                max_retries,
                delay_ms = delay.as_millis(),
                error = %error,
                "Attempt failed, retrying"
            );

            tokio::select! {
                () = tokio::time::sleep(delay) => {}
                () = ctx.cancel.cancelled() => return Err(RelayError::Interrupted),
            }
        }
    }
}
