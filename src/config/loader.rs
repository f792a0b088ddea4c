//! Configuration file loader and environment overrides.

use std::path::{Path, PathBuf};

use super::RelayConfig;

/// Configuration loader that searches multiple locations.
#[derive(Debug)]
pub struct ConfigLoader {
    /// Search paths in order of priority.
    search_paths: Vec<PathBuf>,
}

impl ConfigLoader {
    /// Create a new config loader with default search paths.
    #[must_use]
    pub fn new() -> Self {
        let mut search_paths = Vec::new();

        // 1. Current directory: .claude-relay.toml
        search_paths.push(PathBuf::from(".claude-relay.toml"));

        // 2. User config directory: ~/.config/claude-relay/config.toml
        if let Some(config_dir) = dirs::config_dir() {
            search_paths.push(config_dir.join("claude-relay").join("config.toml"));
        }

        Self { search_paths }
    }

    /// Create a config loader with a specific config file path.
    #[must_use]
    pub fn with_path(path: PathBuf) -> Self {
        Self {
            search_paths: vec![path],
        }
    }

    /// Load configuration from the first available file, or return defaults.
    ///
    /// # Errors
    ///
    /// Returns an error if a config file exists but cannot be parsed.
    pub fn load(&self) -> Result<RelayConfig, ConfigError> {
        for path in &self.search_paths {
            if path.exists() {
                tracing::debug!(path = %path.display(), "Loading config file");
                return Self::load_from_path(path);
            }
        }

        tracing::debug!("No config file found, using defaults");
        Ok(RelayConfig::default())
    }

    /// Load configuration and apply overrides from the process environment.
    ///
    /// # Errors
    ///
    /// Returns an error if a config file exists but cannot be parsed.
    pub fn load_with_env(&self) -> Result<RelayConfig, ConfigError> {
        let mut config = self.load()?;
        apply_env_overrides(&mut config, |key| std::env::var(key).ok());
        Ok(config)
    }

    fn load_from_path(path: &Path) -> Result<RelayConfig, ConfigError> {
        let content = std::fs::read_to_string(path).map_err(|e| ConfigError::ReadError {
            path: path.to_path_buf(),
            source: e,
        })?;

        toml::from_str(&content).map_err(|e| ConfigError::ParseError {
            path: path.to_path_buf(),
            source: e,
        })
    }

    /// Get the search paths for debugging.
    #[must_use]
    pub fn search_paths(&self) -> &[PathBuf] {
        &self.search_paths
    }
}

impl Default for ConfigLoader {
    fn default() -> Self {
        Self::new()
    }
}

/// Apply environment overrides using `lookup` to read variables.
///
/// Numeric values that fail to parse are ignored with a warning.
pub fn apply_env_overrides<F>(config: &mut RelayConfig, lookup: F)
where
    F: Fn(&str) -> Option<String>,
{
    if let Some(value) = lookup("CLAUDE_TIMEOUT_MS") {
        match value.trim().parse::<u64>() {
            Ok(ms) if ms > 0 => config.timeout_ms = ms,
            _ => tracing::warn!(%value, "Ignoring invalid CLAUDE_TIMEOUT_MS"),
        }
    }
    if let Some(value) = lookup("CLAUDE_MAX_RETRIES") {
        match value.trim().parse::<u32>() {
            Ok(n) => config.max_retries = n,
            Err(_) => tracing::warn!(%value, "Ignoring invalid CLAUDE_MAX_RETRIES"),
        }
    }
    if let Some(binary) = lookup("CLAUDE_BINARY").filter(|b| !b.is_empty()) {
        config.binary = binary;
    }
    if let Some(env) = lookup("RELAY_ENV").or_else(|| lookup("NODE_ENV")) {
        config.isolation.environment = Some(env);
    }
    if let Some(port) = lookup("REDIS_PORT") {
        config.isolation.redis_port = Some(port);
    }
    if let Some(url) = lookup("CALLBACK_API_URL") {
        config.callback.api_url = Some(url);
    }
    if let Some(id) = lookup("CALLBACK_INVOCATION_ID") {
        config.callback.invocation_id = Some(id);
    }
    if let Some(token) = lookup("CALLBACK_TOKEN") {
        config.callback.token = Some(token);
    }
}

/// Errors that can occur during configuration loading.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Failed to read config file {path}: {source}")]
    ReadError {
        path: PathBuf,
        source: std::io::Error,
    },

    #[error("Failed to parse config file {path}: {source}")]
    ParseError {
        path: PathBuf,
        source: toml::de::Error,
    },
}
