//! Event types from Claude Code stream-json output.
//!
//! Claude Code emits one JSON object per line when invoked with
//! `--output-format stream-json --verbose`. Only the events that drive an
//! attempt's lifecycle are modelled in detail; everything else decodes to
//! [`StreamEvent::Unknown`].

use serde::{Deserialize, Serialize};

/// Subtype carried by the initialization event.
pub const INIT_SUBTYPE: &str = "init";

/// Subtype carried by a successful result event.
pub const SUCCESS_SUBTYPE: &str = "success";

/// System event data (initialization and other housekeeping).
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SystemEvent {
    /// Event subtype (e.g., "init").
    #[serde(default)]
    pub subtype: String,
    /// Session identifier assigned by the agent.
    #[serde(default)]
    pub session_id: Option<String>,
    /// Working directory reported by the agent.
    #[serde(default)]
    pub cwd: Option<String>,
    /// Model in use, if reported.
    #[serde(default)]
    pub model: Option<String>,
}

impl SystemEvent {
    /// Returns true for the `system/init` event.
    #[must_use]
    pub fn is_init(&self) -> bool {
        self.subtype == INIT_SUBTYPE
    }
}

/// One item of an assistant message.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ContentItem {
    /// Response text.
    Text {
        /// The text fragment.
        #[serde(default)]
        text: String,
    },
    /// A tool invocation requested by the agent.
    ToolUse {
        /// Tool use identifier.
        #[serde(default)]
        id: String,
        /// Name of the tool.
        name: String,
        /// Tool input parameters.
        #[serde(default)]
        input: serde_json::Value,
    },
    /// The result of a tool invocation.
    ToolResult {
        /// Identifier of the originating tool use.
        #[serde(default)]
        tool_use_id: String,
        /// Result payload (string or structured blocks).
        #[serde(default)]
        content: serde_json::Value,
        /// Whether the tool reported failure.
        #[serde(default, alias = "isError")]
        is_error: bool,
    },
    /// Catch-all for item kinds this crate does not act on.
    #[serde(other)]
    Unknown,
}

/// Message content: either a bare string or a list of typed items.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum MessageContent {
    /// Plain string content.
    Text(String),
    /// Ordered content items.
    Items(Vec<ContentItem>),
}

impl Default for MessageContent {
    fn default() -> Self {
        Self::Items(Vec::new())
    }
}

/// Assistant message body.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct AssistantMessage {
    /// Ordered content of the message.
    #[serde(default)]
    pub content: MessageContent,
}

impl AssistantMessage {
    /// Content items in arrival order. A bare string becomes one text item.
    #[must_use]
    pub fn items(&self) -> Vec<ContentItem> {
        match &self.content {
            MessageContent::Text(text) => vec![ContentItem::Text { text: text.clone() }],
            MessageContent::Items(items) => items.clone(),
        }
    }
}

/// Error detail attached to a failed result.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ErrorDetail {
    /// Human-readable message.
    #[serde(default)]
    pub message: Option<String>,
}

/// Final result event data.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ResultEvent {
    /// Result subtype ("success", or an error kind).
    #[serde(default)]
    pub subtype: String,
    /// Session identifier, if repeated on the result.
    #[serde(default)]
    pub session_id: Option<String>,
    /// Whether the agent flagged the result as an error.
    #[serde(default)]
    pub is_error: bool,
    /// Final response text, if included.
    #[serde(default)]
    pub result: Option<String>,
    /// Structured error, if any.
    #[serde(default)]
    pub error: Option<ErrorDetail>,
    /// Additional error messages. Structured entries are flattened to text.
    #[serde(default, deserialize_with = "deserialize_errors")]
    pub errors: Vec<String>,
    /// Total cost in USD.
    #[serde(default, alias = "total_cost_usd")]
    pub cost_usd: Option<f64>,
    /// Total duration in milliseconds.
    #[serde(default)]
    pub duration_ms: Option<u64>,
}

/// Accept `null`, strings, or objects in the `errors` list.
fn deserialize_errors<'de, D>(deserializer: D) -> Result<Vec<String>, D::Error>
where
    D: serde::Deserializer<'de>,
{
    let raw = Option::<Vec<serde_json::Value>>::deserialize(deserializer)?;
    Ok(raw
        .unwrap_or_default()
        .into_iter()
        .filter_map(|entry| match entry {
            serde_json::Value::Null => None,
            serde_json::Value::String(text) => Some(text),
            serde_json::Value::Object(ref map) => match map.get("message") {
                Some(serde_json::Value::String(message)) => Some(message.clone()),
                _ => Some(entry.to_string()),
            },
            other => Some(other.to_string()),
        })
        .collect())
}

impl ResultEvent {
    /// Returns true when the result reports success.
    #[must_use]
    pub fn is_success(&self) -> bool {
        self.subtype == SUCCESS_SUBTYPE && !self.is_error
    }

    /// Best available error message for a failed result.
    #[must_use]
    pub fn error_message(&self) -> String {
        self.error
            .as_ref()
            .and_then(|e| e.message.clone())
            .or_else(|| self.result.clone().filter(|r| !r.is_empty()))
            .unwrap_or_else(|| "Unknown error".to_string())
    }
}

/// Events emitted by Claude Code in stream-json format.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum StreamEvent {
    /// System event (`init` carries the session id).
    System(SystemEvent),
    /// Assistant message with ordered content items.
    Assistant {
        /// Message body.
        #[serde(default)]
        message: AssistantMessage,
    },
    /// Terminal result event.
    Result(ResultEvent),
    /// Catch-all for event types this crate ignores.
    #[serde(other)]
    Unknown,
}

impl StreamEvent {
    /// Returns true if this is a terminal event (Result).
    #[must_use]
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Result(_))
    }

    /// Returns the session ID if the event carries one.
    #[must_use]
    pub fn session_id(&self) -> Option<&str> {
        match self {
            Self::System(system) => system.session_id.as_deref(),
            Self::Result(result) => result.session_id.as_deref(),
            _ => None,
        }
    }

    /// Build a `system/init` event.
    #[must_use]
    pub fn init(session_id: impl Into<String>) -> Self {
        Self::System(SystemEvent {
            subtype: INIT_SUBTYPE.to_string(),
            session_id: Some(session_id.into()),
            ..Default::default()
        })
    }

    /// Build an assistant event with a single text item.
    #[must_use]
    pub fn assistant_text(text: impl Into<String>) -> Self {
        Self::Assistant {
            message: AssistantMessage {
                content: MessageContent::Items(vec![ContentItem::Text { text: text.into() }]),
            },
        }
    }

    /// Build a `result/success` event.
    #[must_use]
    pub fn success(session_id: impl Into<String>) -> Self {
        Self::Result(ResultEvent {
            subtype: SUCCESS_SUBTYPE.to_string(),
            session_id: Some(session_id.into()),
            ..Default::default()
        })
    }
}
