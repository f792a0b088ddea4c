//! Configuration types.

use std::path::PathBuf;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::cli::DEFAULT_BINARY;
use crate::session::DEFAULT_SESSION_FILE;
use crate::supervisor::{RetryPolicy, TimeoutPolicy};

/// Redis port used by the development profile.
pub const DEV_REDIS_PORT: &str = "6398";

/// Redis port used by the production profile.
pub const PROD_REDIS_PORT: &str = "6399";

/// Environment name used when none is configured.
pub const DEFAULT_ENVIRONMENT: &str = "development";

/// Environment isolation for the agent subprocess.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct IsolationConfig {
    /// Environment name passed to the agent as `NODE_ENV`; development if unset.
    pub environment: Option<String>,
    /// Redis port passed to the agent; derived from `environment` if unset.
    pub redis_port: Option<String>,
    /// Variables removed from the inherited environment.
    pub strip_vars: Vec<String>,
}

impl Default for IsolationConfig {
    fn default() -> Self {
        Self {
            environment: None,
            redis_port: None,
            strip_vars: vec!["CLAUDECODE".to_string()],
        }
    }
}

impl IsolationConfig {
    /// Effective environment name.
    #[must_use]
    pub fn environment(&self) -> &str {
        self.environment.as_deref().unwrap_or(DEFAULT_ENVIRONMENT)
    }

    /// Whether the production profile is selected.
    #[must_use]
    pub fn is_production(&self) -> bool {
        self.environment() == "production"
    }

    /// Effective Redis port.
    #[must_use]
    pub fn redis_port(&self) -> &str {
        match self.redis_port.as_deref() {
            Some(port) => port,
            None if self.is_production() => PROD_REDIS_PORT,
            None => DEV_REDIS_PORT,
        }
    }

    /// Variables to set on the agent process.
    #[must_use]
    pub fn env_vars(&self) -> Vec<(String, String)> {
        vec![
            ("NODE_ENV".to_string(), self.environment().to_string()),
            ("REDIS_PORT".to_string(), self.redis_port().to_string()),
        ]
    }

    /// Warnings for an explicitly selected development profile that points
    /// at production resources. The implicit default is not checked.
    #[must_use]
    pub fn cross_environment_warnings(&self, database_url: Option<&str>) -> Vec<String> {
        let mut warnings = Vec::new();
        if self.environment.as_deref() != Some(DEFAULT_ENVIRONMENT) {
            return warnings;
        }
        if self.redis_port() == PROD_REDIS_PORT {
            warnings.push(format!(
                "Development environment connecting to production Redis (port {PROD_REDIS_PORT}); use REDIS_PORT={DEV_REDIS_PORT}"
            ));
        }
        if database_url.is_some_and(|url| url.contains("production")) {
            warnings.push(
                "Development environment connecting to production database; DATABASE_URL should point to a dev instance"
                    .to_string(),
            );
        }
        warnings
    }
}

/// Credentials for the callback endpoint, forwarded to the agent.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CallbackConfig {
    /// Base URL of the callback server.
    pub api_url: Option<String>,
    /// Invocation identifier.
    pub invocation_id: Option<String>,
    /// Opaque callback token.
    pub token: Option<String>,
}

impl CallbackConfig {
    /// Variables to set on the agent process for whatever fields are present.
    #[must_use]
    pub fn env_vars(&self) -> Vec<(String, String)> {
        [
            ("CALLBACK_API_URL", &self.api_url),
            ("CALLBACK_INVOCATION_ID", &self.invocation_id),
            ("CALLBACK_TOKEN", &self.token),
        ]
        .into_iter()
        .filter_map(|(key, value)| value.as_ref().map(|v| (key.to_string(), v.clone())))
        .collect()
    }
}

/// Configuration for the relay.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RelayConfig {
    /// Inactivity timeout in milliseconds.
    pub timeout_ms: u64,
    /// Retries after the first attempt.
    pub max_retries: u32,
    /// Delay before each retry, in milliseconds.
    pub backoff_ms: Vec<u64>,
    /// Delay between SIGTERM and SIGKILL, in milliseconds.
    pub grace_period_ms: u64,
    /// Agent binary.
    pub binary: String,
    /// Session document path.
    pub session_file: PathBuf,
    /// Environment isolation.
    pub isolation: IsolationConfig,
    /// Callback credentials.
    pub callback: CallbackConfig,
}

impl Default for RelayConfig {
    fn default() -> Self {
        Self {
            timeout_ms: 600_000,
            max_retries: 3,
            backoff_ms: vec![1000, 2000, 5000],
            grace_period_ms: 5000,
            binary: DEFAULT_BINARY.to_string(),
            session_file: PathBuf::from(DEFAULT_SESSION_FILE),
            isolation: IsolationConfig::default(),
            callback: CallbackConfig::default(),
        }
    }
}

impl RelayConfig {
    /// Retry policy derived from this configuration.
    #[must_use]
    pub fn retry_policy(&self) -> RetryPolicy {
        RetryPolicy::new(
            self.max_retries,
            self.backoff_ms.iter().copied().map(Duration::from_millis).collect(),
        )
    }

    /// Timeout policy derived from this configuration.
    #[must_use]
    pub fn timeout_policy(&self) -> TimeoutPolicy {
        TimeoutPolicy {
            inactivity: Duration::from_millis(self.timeout_ms),
            grace_period: Duration::from_millis(self.grace_period_ms),
        }
    }

    /// Every variable the agent process receives on top of the inherited environment.
    #[must_use]
    pub fn agent_env(&self) -> Vec<(String, String)> {
        let mut vars = self.isolation.env_vars();
        vars.extend(self.callback.env_vars());
        vars
    }
}
