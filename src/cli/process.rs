//! Claude Code process spawning and control.
//!
//! [`AgentCommandBuilder`] assembles the invocation as a discrete argument
//! vector; nothing is ever routed through a shell. [`AgentProcess`] owns the
//! spawned child and implements the two-phase (SIGTERM, grace period,
//! SIGKILL) shutdown.

use std::ffi::OsString;
use std::path::PathBuf;
use std::process::{ExitStatus, Stdio};
use std::time::Duration;

use tokio::process::{Child, ChildStderr, ChildStdout, Command};

/// Default binary name for the Claude Code CLI.
pub const DEFAULT_BINARY: &str = "claude";

/// Default grace period between SIGTERM and SIGKILL.
pub const DEFAULT_GRACE_PERIOD: Duration = Duration::from_secs(5);

/// Error type for process spawning operations.
#[derive(thiserror::Error, Debug)]
pub enum SpawnError {
    /// The binary was not found.
    #[error("Agent binary not found: {0}")]
    NotFound(String),
    /// Permission denied when spawning.
    #[error("Permission denied spawning {0}")]
    PermissionDenied(String),
    /// Other I/O error.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl SpawnError {
    /// Create a `SpawnError` from an I/O error, classifying common cases.
    fn from_io(program: &str, err: std::io::Error) -> Self {
        match err.kind() {
            std::io::ErrorKind::NotFound => Self::NotFound(program.to_string()),
            std::io::ErrorKind::PermissionDenied => Self::PermissionDenied(program.to_string()),
            _ => Self::Io(err),
        }
    }
}

/// The prompt was empty after trimming.
#[derive(thiserror::Error, Debug, Clone, PartialEq, Eq)]
#[error("Prompt must not be empty")]
pub struct EmptyPromptError;

/// Builder for the agent's argument vector.
#[derive(Debug, Clone, Default)]
pub struct AgentCommandBuilder {
    prompt: String,
    resume_session: Option<String>,
    extra_args: Vec<String>,
}

impl AgentCommandBuilder {
    /// Create a new builder with the given prompt.
    #[must_use]
    pub fn new(prompt: impl Into<String>) -> Self {
        Self {
            prompt: prompt.into(),
            ..Default::default()
        }
    }

    /// Resume an existing session.
    #[must_use]
    pub fn resume(mut self, session_id: impl Into<String>) -> Self {
        self.resume_session = Some(session_id.into());
        self
    }

    /// Resume a session if one is known.
    #[must_use]
    pub fn resume_opt(mut self, session_id: Option<&str>) -> Self {
        self.resume_session = session_id.map(str::to_string);
        self
    }

    /// Append arguments placed before the agent flags (e.g. a subcommand).
    #[must_use]
    pub fn leading_args<I, S>(mut self, args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.extra_args.extend(args.into_iter().map(Into::into));
        self
    }

    /// Get the prompt.
    #[must_use]
    pub fn prompt(&self) -> &str {
        &self.prompt
    }

    /// Get the resume session, if set.
    #[must_use]
    pub fn resume_session(&self) -> Option<&str> {
        self.resume_session.as_deref()
    }

    /// Build the command-line arguments.
    ///
    /// # Errors
    ///
    /// Returns `EmptyPromptError` if the prompt is empty or whitespace.
    pub fn build_args(&self) -> Result<Vec<String>, EmptyPromptError> {
        if self.prompt.trim().is_empty() {
            return Err(EmptyPromptError);
        }

        let mut args = self.extra_args.clone();
        args.extend([
            "-p".to_string(),
            self.prompt.clone(),
            "--output-format".to_string(),
            "stream-json".to_string(),
            "--verbose".to_string(),
        ]);

        if let Some(session_id) = &self.resume_session {
            args.push("--resume".to_string());
            args.push(session_id.clone());
        }

        Ok(args)
    }

    /// Build a full command for the given program.
    ///
    /// # Errors
    ///
    /// Returns `EmptyPromptError` if the prompt is empty or whitespace.
    pub fn build(&self, program: impl Into<PathBuf>) -> Result<AgentCommand, EmptyPromptError> {
        Ok(AgentCommand {
            program: program.into(),
            args: self.build_args()?,
            env: Vec::new(),
            env_remove: Vec::new(),
            working_dir: None,
        })
    }
}

/// A fully assembled invocation: program, argument vector and environment.
#[derive(Debug, Clone)]
pub struct AgentCommand {
    /// Program to execute.
    pub program: PathBuf,
    /// Discrete arguments, passed without shell interpretation.
    pub args: Vec<String>,
    /// Environment variables to set.
    pub env: Vec<(String, String)>,
    /// Environment variables to remove from the inherited environment.
    pub env_remove: Vec<String>,
    /// Working directory, if not the current one.
    pub working_dir: Option<PathBuf>,
}

impl AgentCommand {
    /// Create a command from a program and raw arguments.
    #[must_use]
    pub fn new<I, S>(program: impl Into<PathBuf>, args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            program: program.into(),
            args: args.into_iter().map(Into::into).collect(),
            env: Vec::new(),
            env_remove: Vec::new(),
            working_dir: None,
        }
    }

    /// Set an environment variable for the child.
    #[must_use]
    pub fn env(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.env.push((key.into(), value.into()));
        self
    }

    /// Remove an inherited environment variable.
    #[must_use]
    pub fn env_remove(mut self, key: impl Into<String>) -> Self {
        self.env_remove.push(key.into());
        self
    }

    /// Set the working directory.
    #[must_use]
    pub fn working_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.working_dir = Some(dir.into());
        self
    }

    /// Shell-quoted rendering for logs only; never executed.
    #[must_use]
    pub fn display(&self) -> String {
        let mut parts = vec![shell_escape::escape(self.program.to_string_lossy()).into_owned()];
        parts.extend(
            self.args
                .iter()
                .map(|a| shell_escape::escape(a.as_str().into()).into_owned()),
        );
        parts.join(" ")
    }

    fn to_command(&self) -> Command {
        let mut cmd = Command::new(&self.program);
        cmd.args(self.args.iter().map(OsString::from))
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);

        for key in &self.env_remove {
            cmd.env_remove(key);
        }
        for (key, value) in &self.env {
            cmd.env(key, value);
        }
        if let Some(ref dir) = self.working_dir {
            cmd.current_dir(dir);
        }
        cmd
    }
}

/// Produces one [`AgentCommand`] per attempt for a fixed program and environment.
#[derive(Debug, Clone)]
pub struct AgentLauncher {
    program: PathBuf,
    leading_args: Vec<String>,
    env: Vec<(String, String)>,
    env_remove: Vec<String>,
    working_dir: Option<PathBuf>,
}

impl AgentLauncher {
    /// Create a launcher for `program`.
    #[must_use]
    pub fn new(program: impl Into<PathBuf>) -> Self {
        Self {
            program: program.into(),
            leading_args: Vec::new(),
            env: Vec::new(),
            env_remove: Vec::new(),
            working_dir: None,
        }
    }

    /// Arguments inserted before the agent flags.
    #[must_use]
    pub fn leading_args<I, S>(mut self, args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.leading_args.extend(args.into_iter().map(Into::into));
        self
    }

    /// Variables set on every spawned process.
    #[must_use]
    pub fn envs<I>(mut self, vars: I) -> Self
    where
        I: IntoIterator<Item = (String, String)>,
    {
        self.env.extend(vars);
        self
    }

    /// Variables removed from the inherited environment.
    #[must_use]
    pub fn env_remove<I, S>(mut self, keys: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.env_remove.extend(keys.into_iter().map(Into::into));
        self
    }

    /// Working directory for spawned processes.
    #[must_use]
    pub fn working_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.working_dir = Some(dir.into());
        self
    }

    /// Program this launcher runs.
    #[must_use]
    pub fn program(&self) -> &std::path::Path {
        &self.program
    }

    /// Build the command for one attempt.
    ///
    /// # Errors
    ///
    /// Returns `EmptyPromptError` if the prompt is empty or whitespace.
    pub fn command(
        &self,
        prompt: &str,
        resume: Option<&str>,
    ) -> Result<AgentCommand, EmptyPromptError> {
        let mut command = AgentCommandBuilder::new(prompt)
            .leading_args(self.leading_args.iter().cloned())
            .resume_opt(resume)
            .build(self.program.clone())?;
        command.env.clone_from(&self.env);
        command.env_remove.clone_from(&self.env_remove);
        command.working_dir.clone_from(&self.working_dir);
        Ok(command)
    }
}

/// What a shutdown request actually did.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ShutdownReport {
    /// The process exited within the grace period after SIGTERM.
    Terminated(Option<i32>),
    /// The grace period elapsed and the process was killed.
    Killed,
    /// The process had already exited; no signal was sent.
    AlreadyExited,
    /// Shutdown was already requested; no signal was sent.
    AlreadyRequested,
}

/// A running agent process.
#[derive(Debug)]
pub struct AgentProcess {
    child: Child,
    shutting_down: bool,
}

impl AgentProcess {
    /// Spawn the command with stdin closed and both output channels piped.
    ///
    /// # Errors
    ///
    /// Returns `SpawnError` if the process fails to spawn.
    pub fn spawn(command: &AgentCommand) -> Result<Self, SpawnError> {
        let program = command.program.to_string_lossy().into_owned();
        let child = command
            .to_command()
            .spawn()
            .map_err(|e| SpawnError::from_io(&program, e))?;

        tracing::debug!(pid = ?child.id(), command = %command.display(), "Spawned agent process");
        Ok(Self {
            child,
            shutting_down: false,
        })
    }

    /// Take ownership of the stdout handle.
    ///
    /// This can only be called once; subsequent calls return `None`.
    pub fn take_stdout(&mut self) -> Option<ChildStdout> {
        self.child.stdout.take()
    }

    /// Take ownership of the stderr handle.
    ///
    /// This can only be called once; subsequent calls return `None`.
    pub fn take_stderr(&mut self) -> Option<ChildStderr> {
        self.child.stderr.take()
    }

    /// Get the process ID, if still running.
    #[must_use]
    pub fn id(&self) -> Option<u32> {
        self.child.id()
    }

    /// Whether a shutdown has been requested.
    #[must_use]
    pub fn is_shutting_down(&self) -> bool {
        self.shutting_down
    }

    /// Check if the process has exited without blocking.
    ///
    /// # Errors
    ///
    /// Returns an error if the process state cannot be queried.
    pub fn try_wait(&mut self) -> std::io::Result<Option<ExitStatus>> {
        self.child.try_wait()
    }

    /// Wait for the process to exit.
    ///
    /// # Errors
    ///
    /// Returns an error if waiting fails.
    pub async fn wait(&mut self) -> std::io::Result<ExitStatus> {
        self.child.wait().await
    }

    /// Two-phase shutdown: SIGTERM, wait `grace`, then SIGKILL.
    ///
    /// Only the first call sends signals; later calls return
    /// [`ShutdownReport::AlreadyRequested`].
    ///
    /// # Errors
    ///
    /// Returns an error if waiting on or killing the process fails.
    pub async fn shutdown(&mut self, grace: Duration) -> std::io::Result<ShutdownReport> {
        if self.shutting_down {
            tracing::debug!("Shutdown already requested, ignoring");
            return Ok(ShutdownReport::AlreadyRequested);
        }
        self.shutting_down = true;

        if self.child.try_wait()?.is_some() {
            return Ok(ShutdownReport::AlreadyExited);
        }

        self.terminate(grace).await
    }

    #[cfg(unix)]
    async fn terminate(&mut self, grace: Duration) -> std::io::Result<ShutdownReport> {
        use nix::sys::signal::{kill, Signal};
        use nix::unistd::Pid;

        let Some(pid) = self.id() else {
            return Ok(ShutdownReport::AlreadyExited);
        };

        tracing::info!(pid, "Sending SIGTERM to agent process");
        let nix_pid = Pid::from_raw(i32::try_from(pid).unwrap_or(i32::MAX));
        if let Err(e) = kill(nix_pid, Signal::SIGTERM) {
            tracing::debug!(pid, error = %e, "SIGTERM failed");
        }

        match tokio::time::timeout(grace, self.child.wait()).await {
            Ok(Ok(status)) => Ok(ShutdownReport::Terminated(status.code())),
            Ok(Err(e)) => Err(e),
            Err(_) => {
                tracing::warn!(pid, grace_ms = grace.as_millis(), "Grace period elapsed, sending SIGKILL");
                self.child.kill().await?;
                Ok(ShutdownReport::Killed)
            }
        }
    }

    #[cfg(not(unix))]
    async fn terminate(&mut self, grace: Duration) -> std::io::Result<ShutdownReport> {
        let _ = grace;
        self.child.kill().await?;
        Ok(ShutdownReport::Killed)
    }
}
