/// LLM client layer
///
/// The engine consumes language models through the `ChatClient` trait so
/// node executors and the dispatcher never depend on a concrete provider.
/// The shipped implementation talks to the GigaChat API.

pub mod gigachat;

use anyhow::Result;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};

pub use gigachat::GigaChatClient;

/// One message of a chat exchange
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChatMessage {
    pub role: String,
    pub content: String,
}

impl ChatMessage {
    pub fn new(role: &str, content: impl Into<String>) -> Self {
        Self {
            role: role.to_string(),
            content: content.into(),
        }
    }
}

/// Outcome of a chat completion call
///
/// API-level failures are carried as `success = false` rather than an `Err`
/// so callers can fall back (the router dispatcher falls back to its
/// `default` route); transport setup errors still surface as `Err`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChatResponse {
    pub success: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub response: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    #[serde(default)]
    pub conversation_length: usize,
}

impl ChatResponse {
    pub fn failure(error: impl Into<String>) -> Self {
        Self {
            success: false,
            response: None,
            error: Some(error.into()),
            conversation_length: 0,
        }
    }

    /// Response text, or empty string when the call failed
    pub fn text(&self) -> &str {
        self.response.as_deref().unwrap_or("")
    }
}

/// Provider-agnostic chat client used by the execution engine
///
/// Implementations are explicitly stateful: they keep a per-instance
/// conversation history and an access token subject to refresh. The engine
/// owns a single shared instance; nodes that need a fresh conversation set
/// `clearHistory`.
#[async_trait]
pub trait ChatClient: Send + Sync {
    /// Exchange the configured credential for an access token.
    /// Returns false when the provider rejects the credential.
    async fn get_token(&self, auth_token: &str) -> Result<bool>;

    /// Run one chat completion with the given system and user messages.
    async fn chat_completion(&self, system_message: &str, user_message: &str) -> Result<ChatResponse>;

    /// Compute an embedding vector for the given text.
    async fn embedding(&self, text: &str) -> Result<Vec<f32>>;

    /// Drop the accumulated conversation history.
    fn clear_history(&self);
}
