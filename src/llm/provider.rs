use async_trait::async_trait;

use crate::errors::OperatorResult;
use crate::llm::types::{CallConfig, ChatMessage, LlmResponse};

/// Unified vision model client. All providers implement this trait.
/// New providers only need to implement this trait and register in config.toml.
#[async_trait]
pub trait LlmProvider: Send + Sync {
    /// Returns the provider's identifier (matches config.toml key).
    fn name(&self) -> &str;

    /// Sends the transcript (at least one message carries an image) and
    /// returns the model's unstructured reply.
    async fn chat(&self, messages: Vec<ChatMessage>, cfg: &CallConfig) -> OperatorResult<LlmResponse>;
}
