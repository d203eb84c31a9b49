use async_trait::async_trait;
use futures::Stream;
use greenhouse_common::Result;
use serde::{Deserialize, Serialize};
use std::pin::Pin;

/// Trait for streamed chat completion backends.
#[async_trait]
pub trait LlmProvider: Send + Sync {
    /// Provider identifier (e.g. "openai").
    fn provider_id(&self) -> &str;

    /// Open a streaming completion. Fails with [`greenhouse_common::Error::UpstreamOpen`]
    /// when the stream cannot be established; items of the returned stream fail
    /// with [`greenhouse_common::Error::UpstreamStream`].
    async fn complete_stream(&self, request: &LlmRequest) -> Result<LlmStream>;
}

/// Stream of text deltas. Ends (`None`) once the provider signalled completion.
pub type LlmStream = Pin<Box<dyn Stream<Item = Result<LlmStreamResponse>> + Send>>;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LlmRequest {
    pub model: String,
    pub messages: Vec<ChatMessage>,
    pub system: Option<String>,
    pub max_tokens: Option<u32>,
    pub temperature: Option<f64>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChatMessage {
    pub role: ChatRole,
    pub content: String,
}

impl ChatMessage {
    pub fn user(content: impl Into<String>) -> Self {
        Self {
            role: ChatRole::User,
            content: content.into(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ChatRole {
    System,
    User,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LlmStreamResponse {
    /// Incremental text; may be empty on bookkeeping frames.
    pub delta: String,
    pub stop_reason: Option<String>,
}
