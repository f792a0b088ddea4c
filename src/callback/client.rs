//! Client for the callback endpoint the agent's tool bridge talks to.
//!
//! The server authenticates every call with an invocation id and an opaque
//! callback token; this client only passes them through.

use std::time::Duration;

use reqwest::{Client, StatusCode};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use url::Url;

use crate::config::CallbackConfig;

/// Connection timeout for HTTP requests.
const CONNECT_TIMEOUT: Duration = Duration::from_secs(10);

/// Overall request timeout for HTTP requests.
const REQUEST_TIMEOUT: Duration = Duration::from_secs(30);

/// Default callback server address.
pub const DEFAULT_API_URL: &str = "http://localhost:3200";

const POST_MESSAGE_PATH: &str = "/api/callbacks/post-message";
const THREAD_CONTEXT_PATH: &str = "/api/callbacks/thread-context";

/// Errors from callback operations.
#[derive(Error, Debug)]
pub enum CallbackError {
    #[error("Callback credentials not configured: {0}")]
    MissingCredentials(&'static str),
    #[error("Invalid callback URL: {0}")]
    InvalidUrl(#[from] url::ParseError),
    #[error("Callback request failed: {0}")]
    Request(#[from] reqwest::Error),
    #[error("Callback server returned {status}: {body}")]
    Status { status: StatusCode, body: String },
}

/// One message of the conversation thread.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ThreadMessage {
    pub role: String,
    pub content: String,
}

/// Conversation context served by the callback endpoint.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ThreadContext {
    #[serde(default)]
    pub messages: Vec<ThreadMessage>,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct PostMessageBody<'a> {
    invocation_id: &'a str,
    callback_token: &'a str,
    content: &'a str,
}

/// Token-authenticated client for the callback endpoint.
#[derive(Debug, Clone)]
pub struct CallbackClient {
    client: Client,
    base_url: Url,
    invocation_id: String,
    token: String,
}

impl CallbackClient {
    /// Create a client.
    ///
    /// # Errors
    ///
    /// Returns an error if the URL is invalid or the HTTP client cannot be built.
    pub fn new(
        api_url: &str,
        invocation_id: impl Into<String>,
        token: impl Into<String>,
    ) -> Result<Self, CallbackError> {
        let client = Client::builder()
            .connect_timeout(CONNECT_TIMEOUT)
            .timeout(REQUEST_TIMEOUT)
            .build()?;
        Ok(Self {
            client,
            base_url: Url::parse(api_url)?,
            invocation_id: invocation_id.into(),
            token: token.into(),
        })
    }

    /// Create a client from configured credentials.
    ///
    /// # Errors
    ///
    /// Returns `CallbackError::MissingCredentials` if the invocation id or token is unset.
    pub fn from_config(config: &CallbackConfig) -> Result<Self, CallbackError> {
        let invocation_id = config
            .invocation_id
            .as_deref()
            .ok_or(CallbackError::MissingCredentials("invocation id"))?;
        let token = config
            .token
            .as_deref()
            .ok_or(CallbackError::MissingCredentials("callback token"))?;
        let api_url = config.api_url.as_deref().unwrap_or(DEFAULT_API_URL);
        Self::new(api_url, invocation_id, token)
    }

    /// Post a message to the conversation.
    ///
    /// # Errors
    ///
    /// Returns an error if the request fails or the server rejects it.
    pub async fn post_message(&self, content: &str) -> Result<(), CallbackError> {
        let url = self.base_url.join(POST_MESSAGE_PATH)?;
        let body = PostMessageBody {
            invocation_id: &self.invocation_id,
            callback_token: &self.token,
            content,
        };
        let response = self.client.post(url).json(&body).send().await?;
        Self::check(response).await?;
        tracing::debug!(len = content.len(), "Posted callback message");
        Ok(())
    }

    /// Fetch the conversation context.
    ///
    /// # Errors
    ///
    /// Returns an error if the request fails, the server rejects it, or the
    /// body is not a thread context.
    pub async fn thread_context(&self) -> Result<ThreadContext, CallbackError> {
        let mut url = self.base_url.join(THREAD_CONTEXT_PATH)?;
        url.query_pairs_mut()
            .append_pair("invocationId", &self.invocation_id)
            .append_pair("callbackToken", &self.token);

        let response = self.client.get(url).send().await?;
        let response = Self::check(response).await?;
        Ok(response.json().await?)
    }

    async fn check(response: reqwest::Response) -> Result<reqwest::Response, CallbackError> {
        let status = response.status();
        if status.is_success() {
            return Ok(response);
        }
        let body = response.text().await.unwrap_or_default();
        tracing::warn!(%status, "Callback server rejected request");
        Err(CallbackError::Status { status, body })
    }
}
