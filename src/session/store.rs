//! Single-slot session persistence.
//!
//! The store holds one document, `{"sessionId": "..."}`, at a fixed path.
//! Missing or corrupt documents read as "no session". Writes go through a
//! temp file that is synced and renamed over the target.
//!
//! The store assumes a single writer. Two relays sharing one path may
//! overwrite each other's session id.

use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use tokio::io::AsyncWriteExt;

/// Default session file name, relative to the working directory.
pub const DEFAULT_SESSION_FILE: &str = ".claude-session.json";

/// Errors from session persistence.
#[derive(thiserror::Error, Debug)]
pub enum SessionError {
    /// The session file could not be read.
    #[error("Failed to read session file {path}: {source}")]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    /// The session file is not a valid session document.
    #[error("Failed to parse session file {path}: {source}")]
    Parse {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },
    /// The session file could not be written or removed.
    #[error("Failed to write session file {path}: {source}")]
    Write {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

/// On-disk session document.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SessionRecord {
    /// Opaque continuation token.
    pub session_id: String,
}

/// File-backed session store.
#[derive(Debug, Clone)]
pub struct SessionStore {
    path: PathBuf,
}

impl SessionStore {
    /// Create a store backed by `path`.
    #[must_use]
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    /// Path of the backing file.
    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Load the stored session id, or `None` if absent or unreadable.
    ///
    /// Read and parse failures are logged as warnings.
    pub async fn load(&self) -> Option<String> {
        match self.try_load().await {
            Ok(session) => session,
            Err(e) => {
                tracing::warn!(error = %e, "Failed to read session file, starting new session");
                None
            }
        }
    }

    /// Load the stored session id, surfacing read and parse errors.
    ///
    /// # Errors
    ///
    /// Returns `SessionError` if the file exists but cannot be read or parsed.
    pub async fn try_load(&self) -> Result<Option<String>, SessionError> {
        let content = match tokio::fs::read_to_string(&self.path).await {
            Ok(content) => content,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                tracing::info!(path = %self.path.display(), "No stored session, starting new session");
                return Ok(None);
            }
            Err(source) => {
                return Err(SessionError::Read {
                    path: self.path.clone(),
                    source,
                })
            }
        };

        let record: SessionRecord =
            serde_json::from_str(&content).map_err(|source| SessionError::Parse {
                path: self.path.clone(),
                source,
            })?;

        if record.session_id.trim().is_empty() {
            return Ok(None);
        }
        tracing::info!(session_id = %record.session_id, "Resuming session");
        Ok(Some(record.session_id))
    }

    /// Persist `session_id`, replacing any previous value.
    ///
    /// # Errors
    ///
    /// Returns `SessionError::Write` if any file operation fails.
    pub async fn save(&self, session_id: &str) -> Result<(), SessionError> {
        let write_err = |source| SessionError::Write {
            path: self.path.clone(),
            source,
        };

        if let Some(parent) = self.path.parent().filter(|p| !p.as_os_str().is_empty()) {
            tokio::fs::create_dir_all(parent).await.map_err(write_err)?;
        }

        let record = SessionRecord {
            session_id: session_id.to_string(),
        };
        let json = serde_json::to_string_pretty(&record).map_err(|e| write_err(e.into()))?;

        let temp_path = self.path.with_extension("json.tmp");
        if let Err(e) = Self::replace_with(&temp_path, &self.path, json.as_bytes()).await {
            if let Err(cleanup) = tokio::fs::remove_file(&temp_path).await {
                if cleanup.kind() != std::io::ErrorKind::NotFound {
                    tracing::warn!(path = %temp_path.display(), error = %cleanup, "Failed to remove temp session file");
                }
            }
            return Err(write_err(e));
        }
        tracing::info!(path = %self.path.display(), %session_id, "Session saved");
        Ok(())
    }

    /// Write `contents` to `temp`, sync it, and rename it over `target`.
    async fn replace_with(temp: &Path, target: &Path, contents: &[u8]) -> std::io::Result<()> {
        let mut file = tokio::fs::File::create(temp).await?;
        file.write_all(contents).await?;
        file.sync_data().await?;
        drop(file);
        tokio::fs::rename(temp, target).await
    }

    /// Remove the session file. Returns whether a file was removed.
    ///
    /// # Errors
    ///
    /// Returns `SessionError::Write` if the file exists but cannot be removed.
    pub async fn reset(&self) -> Result<bool, SessionError> {
        match tokio::fs::remove_file(&self.path).await {
            Ok(()) => {
                tracing::info!(path = %self.path.display(), "Session reset");
                Ok(true)
            }
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(false),
            Err(source) => Err(SessionError::Write {
                path: self.path.clone(),
                source,
            }),
        }
    }
}

impl Default for SessionStore {
    fn default() -> Self {
        Self::new(DEFAULT_SESSION_FILE)
    }
}
