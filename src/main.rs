//! Claude Relay - supervised Claude Code invocation with session continuity.

use std::path::PathBuf;
use std::process::ExitCode;

use clap::{Parser, Subcommand};
use tokio_util::sync::CancellationToken;
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

use claude_relay::callback::CallbackClient;
use claude_relay::cli::AgentLauncher;
use claude_relay::config::{ConfigLoader, RelayConfig};
use claude_relay::display::{self, ConsoleSink};
use claude_relay::mock::{emit_mock_conversation, MOCK_EVENT_INTERVAL};
use claude_relay::session::SessionStore;
use claude_relay::signals;
use claude_relay::supervisor::{ProcessSupervisor, RelayError, RetryOrchestrator, RunContext};

const RUN_USAGE: &str = "Usage: claude-relay run [--mock] [--reset] <PROMPT>...";

#[derive(Parser)]
#[command(
    name = "claude-relay",
    about = "Supervised Claude Code invocation with session continuity",
    version
)]
struct Cli {
    /// Increase verbosity (-v, -vv, -vvv)
    #[arg(short = 'v', long, action = clap::ArgAction::Count)]
    verbose: u8,

    /// Path to a config file.
    #[arg(long)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run a prompt through Claude Code with supervision.
    ///
    /// Environment: CLAUDE_TIMEOUT_MS (default 600000), CLAUDE_MAX_RETRIES
    /// (default 3), NODE_ENV, REDIS_PORT, CALLBACK_API_URL,
    /// CALLBACK_INVOCATION_ID, CALLBACK_TOKEN.
    Run {
        /// The prompt; multiple words are joined with spaces.
        prompt: Vec<String>,
        /// Use a built-in mock agent instead of the claude CLI.
        #[arg(long)]
        mock: bool,
        /// Discard the stored session and start a new conversation.
        #[arg(long)]
        reset: bool,
    },
    /// Inspect or clear the stored session.
    Session {
        #[command(subcommand)]
        action: SessionAction,
    },
    /// Talk to the callback endpoint with the configured credentials.
    Callback {
        #[command(subcommand)]
        action: CallbackAction,
    },
    /// Mock agent speaking the stream-json protocol.
    #[command(name = "mock-agent", hide = true)]
    MockAgent {
        #[arg(short = 'p', long = "print", allow_hyphen_values = true)]
        prompt: String,
        #[arg(long = "output-format", default_value = "stream-json")]
        output_format: String,
        #[arg(long)]
        verbose: bool,
        #[arg(long)]
        resume: Option<String>,
    },
}

#[derive(Subcommand)]
enum SessionAction {
    /// Print the stored session id.
    Show,
    /// Delete the stored session.
    Reset,
}

#[derive(Subcommand)]
enum CallbackAction {
    /// Post a message to the conversation.
    Post {
        /// Message words, joined with spaces.
        #[arg(required = true)]
        message: Vec<String>,
    },
    /// Print the conversation context.
    Context,
}

fn init_tracing(verbosity: u8) {
    let level = match verbosity {
        0 => "warn",
        1 => "info",
        2 => "debug",
        _ => "trace",
    };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level));
    tracing_subscriber::registry()
        .with(fmt::layer().with_writer(std::io::stderr))
        .with(filter)
        .init();
}

fn load_config(path: Option<PathBuf>) -> Option<RelayConfig> {
    let loader = path.map_or_else(ConfigLoader::new, ConfigLoader::with_path);
    match loader.load_with_env() {
        Ok(config) => Some(config),
        Err(e) => {
            display::print_error(&e.to_string());
            None
        }
    }
}

fn build_launcher(config: &RelayConfig, mock: bool) -> std::io::Result<AgentLauncher> {
    let launcher = if mock {
        AgentLauncher::new(std::env::current_exe()?).leading_args(["mock-agent"])
    } else {
        AgentLauncher::new(&config.binary)
    };
    Ok(launcher
        .envs(config.agent_env())
        .env_remove(config.isolation.strip_vars.iter().cloned()))
}

async fn run(config: &RelayConfig, prompt: &str, mock: bool, reset: bool) -> ExitCode {
    if prompt.trim().is_empty() {
        display::print_error(RUN_USAGE);
        return ExitCode::FAILURE;
    }

    let database_url = std::env::var("DATABASE_URL").ok();
    for warning in config
        .isolation
        .cross_environment_warnings(database_url.as_deref())
    {
        tracing::warn!("{warning}");
    }

    let store = SessionStore::new(&config.session_file);
    let initial_session = if reset {
        if let Err(e) = store.reset().await {
            tracing::warn!(error = %e, "Failed to reset session");
        }
        None
    } else {
        store.load().await
    };

    let launcher = match build_launcher(config, mock) {
        Ok(launcher) => launcher,
        Err(e) => {
            display::print_error(&format!("Cannot locate mock agent: {e}"));
            return ExitCode::FAILURE;
        }
    };

    let cancel = CancellationToken::new();
    signals::install_fault_hook(cancel.clone());
    let listener = signals::spawn_signal_listener(cancel.clone());

    tracing::info!(
        timeout_ms = config.timeout_ms,
        max_retries = config.max_retries,
        mock,
        "Starting claude relay"
    );
    let orchestrator = RetryOrchestrator::new(
        launcher,
        ProcessSupervisor::new(config.timeout_policy()),
        config.retry_policy(),
        store,
    );
    let mut ctx = RunContext::new(initial_session, cancel.clone());
    display::print_run_start(prompt, ctx.session_id());

    // The run gets its own task so a fault surfaces here as a join error.
    let task_prompt = prompt.to_string();
    let task = tokio::spawn(async move {
        orchestrator
            .execute(&task_prompt, &mut ctx, &mut ConsoleSink)
            .await
    });
    let result = match task.await {
        Ok(result) => result,
        Err(e) => {
            tracing::error!(error = %e, "Relay task failed");
            Err(RelayError::Interrupted)
        }
    };
    cancel.cancel();
    let _ = listener.await;

    match result {
        Ok(summary) => {
            display::print_run_complete(summary.session_id.as_deref(), summary.attempts);
            ExitCode::SUCCESS
        }
        Err(e) => {
            display::print_error(&format!("Execution failed: {e}"));
            ExitCode::FAILURE
        }
    }
}

async fn session_command(config: &RelayConfig, action: SessionAction) -> ExitCode {
    let store = SessionStore::new(&config.session_file);
    match action {
        SessionAction::Show => match store.try_load().await {
            Ok(Some(id)) => {
                println!("{id}");
                ExitCode::SUCCESS
            }
            Ok(None) => {
                println!("No stored session");
                ExitCode::SUCCESS
            }
            Err(e) => {
                display::print_error(&e.to_string());
                ExitCode::FAILURE
            }
        },
        SessionAction::Reset => match store.reset().await {
            Ok(removed) => {
                println!("{}", if removed { "Session reset" } else { "No stored session" });
                ExitCode::SUCCESS
            }
            Err(e) => {
                display::print_error(&e.to_string());
                ExitCode::FAILURE
            }
        },
    }
}

async fn callback_command(config: &RelayConfig, action: CallbackAction) -> ExitCode {
    let client = match CallbackClient::from_config(&config.callback) {
        Ok(client) => client,
        Err(e) => {
            display::print_error(&e.to_string());
            return ExitCode::FAILURE;
        }
    };

    let result = match action {
        CallbackAction::Post { message } => client.post_message(&message.join(" ")).await,
        CallbackAction::Context => client.thread_context().await.map(|context| {
            for message in &context.messages {
                println!("[{}] {}", message.role, message.content);
            }
        }),
    };
    match result {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            display::print_error(&e.to_string());
            ExitCode::FAILURE
        }
    }
}

async fn mock_agent(
    prompt: &str,
    output_format: &str,
    verbose: bool,
    resume: Option<&str>,
) -> ExitCode {
    if prompt.trim().is_empty() {
        eprintln!("Error: Input must be provided either through stdin or as a prompt argument");
        return ExitCode::FAILURE;
    }
    if output_format != "stream-json" {
        eprintln!("Error: mock agent only supports --output-format=stream-json");
        return ExitCode::FAILURE;
    }
    if !verbose {
        eprintln!("Error: --output-format=stream-json requires --verbose");
        return ExitCode::FAILURE;
    }

    let mut stdout = tokio::io::stdout();
    match emit_mock_conversation(&mut stdout, resume, MOCK_EVENT_INTERVAL).await {
        Ok(_) => ExitCode::SUCCESS,
        Err(_) => ExitCode::FAILURE,
    }
}

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();

    if let Commands::MockAgent {
        prompt,
        output_format,
        verbose,
        resume,
    } = &cli.command
    {
        return mock_agent(prompt, output_format, *verbose, resume.as_deref()).await;
    }

    init_tracing(cli.verbose);
    let Some(config) = load_config(cli.config) else {
        return ExitCode::FAILURE;
    };

    match cli.command {
        Commands::Run {
            prompt,
            mock,
            reset,
        } => run(&config, &prompt.join(" "), mock, reset).await,
        Commands::Session { action } => session_command(&config, action).await,
        Commands::Callback { action } => callback_command(&config, action).await,
        Commands::MockAgent { .. } => ExitCode::SUCCESS,
    }
}
