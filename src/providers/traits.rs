use async_trait::async_trait;
use futures_util::Stream;
use serde::{Deserialize, Serialize};
use std::pin::Pin;
use thiserror::Error;

// ── Error type ──────────────────────────────────────────────────────

/// Failure of a single generation request. The client never retries internally.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum GenerationError {
    /// Connection, DNS, timeout, non-success status or a server-reported error.
    #[error("transport error: {0}")]
    Transport(String),
    /// A stream line that is not a well-formed fragment.
    #[error("protocol error: {0}")]
    Protocol(String),
}

// ── Data types ──────────────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChatMessage {
    pub role: String,
    pub content: String,
}

impl ChatMessage {
    pub fn system(content: impl Into<String>) -> Self {
        Self {
            role: "system".into(),
            content: content.into(),
        }
    }

    pub fn user(content: impl Into<String>) -> Self {
        Self {
            role: "user".into(),
            content: content.into(),
        }
    }

    pub fn assistant(content: impl Into<String>) -> Self {
        Self {
            role: "assistant".into(),
            content: content.into(),
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct ChatRequest {
    pub model: String,
    pub messages: Vec<ChatMessage>,
    pub temperature: Option<f64>,
}

/// One decoded unit of a generation stream.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Fragment {
    Token { role: String, content: String },
    Done,
}

/// Lazy, finite, non-restartable sequence of fragments.
pub type FragmentStream = Pin<Box<dyn Stream<Item = Result<Fragment, GenerationError>> + Send>>;

#[async_trait]
pub trait Provider: Send + Sync {
    /// Human-readable provider name
    fn name(&self) -> &str;

    /// Open a streaming chat request. Fragments are delivered as they are decoded.
    async fn stream_chat(&self, request: ChatRequest) -> Result<FragmentStream, GenerationError>;

    /// Models installed on the inference server.
    async fn list_models(&self) -> Result<Vec<String>, GenerationError>;

    /// Check if the inference server is reachable
    async fn health_check(&self) -> bool {
        self.list_models().await.is_ok()
    }
}
