//! Stand-in agent for mock mode.
//!
//! `claude-relay mock-agent` accepts the same argument vector as the real
//! CLI and writes a short stream-json conversation, so mock runs go through
//! the exact same supervision path as real ones.

use std::time::Duration;

use tokio::io::{AsyncWrite, AsyncWriteExt};

use crate::cli::StreamEvent;

/// Delay between mock events.
pub const MOCK_EVENT_INTERVAL: Duration = Duration::from_millis(100);

/// Generate a fresh mock session id.
#[must_use]
pub fn new_mock_session_id() -> String {
    format!("mock-session-{}", uuid::Uuid::new_v4())
}

/// The three events of a mock conversation: init, one text reply, success.
#[must_use]
pub fn mock_conversation(session_id: &str) -> Vec<StreamEvent> {
    vec![
        StreamEvent::init(session_id),
        StreamEvent::assistant_text(format!(
            "Hello! I'm Claude. The current session ID is {session_id}."
        )),
        StreamEvent::success(session_id),
    ]
}

/// Write the mock conversation as NDJSON, pausing `interval` before each event.
///
/// Resumes `resume` if given, otherwise starts a new session. Returns the
/// session id used.
///
/// # Errors
///
/// Returns an error if writing fails.
pub async fn emit_mock_conversation<W>(
    writer: &mut W,
    resume: Option<&str>,
    interval: Duration,
) -> std::io::Result<String>
where
    W: AsyncWrite + Unpin,
{
    let session_id = resume.map_or_else(new_mock_session_id, str::to_string);

    for event in mock_conversation(&session_id) {
        tokio::time::sleep(interval).await;
        let mut line = serde_json::to_string(&event)?;
        line.push('\n');
        writer.write_all(line.as_bytes()).await?;
        writer.flush().await?;
    }
    Ok(session_id)
}
