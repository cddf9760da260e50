//! LLM client module.
//!
//! Trait-based abstraction over chat-completion providers, with an
//! OpenAI-compatible HTTP implementation as the default. The reasoning
//! engine only ever talks to `LlmClient` and `Embedder`, so tests can
//! substitute scripted collaborators.

mod error;
pub mod mock;
mod openrouter;

pub use error::{LlmError, RetryConfig};
pub use openrouter::OpenRouterClient;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

/// Role in a chat conversation.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    System,
    User,
    Assistant,
}

/// A single chat message.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChatMessage {
    pub role: Role,
    pub content: String,
}

impl ChatMessage {
    pub fn system(content: impl Into<String>) -> Self {
        Self {
            role: Role::System,
            content: content.into(),
        }
    }

    pub fn user(content: impl Into<String>) -> Self {
        Self {
            role: Role::User,
            content: content.into(),
        }
    }

    pub fn assistant(content: impl Into<String>) -> Self {
        Self {
            role: Role::Assistant,
            content: content.into(),
        }
    }
}

/// Per-call sampling options.
///
/// `None` fields fall through to the provider's defaults. Callers that
/// vary temperature per trace (self-consistency, persona turns) build a
/// fresh `ChatOptions` for every call.
#[derive(Debug, Clone, Default)]
pub struct ChatOptions {
    pub temperature: Option<f64>,
    pub top_p: Option<f64>,
    pub max_tokens: Option<u64>,
    /// Stop sequences; generation halts before emitting any of these.
    pub stop: Option<Vec<String>>,
}

impl ChatOptions {
    pub fn with_temperature(mut self, temperature: f64) -> Self {
        self.temperature = Some(temperature);
        self
    }

    pub fn with_top_p(mut self, top_p: f64) -> Self {
        self.top_p = Some(top_p);
        self
    }

    pub fn with_max_tokens(mut self, max_tokens: u64) -> Self {
        self.max_tokens = Some(max_tokens);
        self
    }

    pub fn with_stop(mut self, stop: Vec<String>) -> Self {
        self.stop = Some(stop);
        self
    }
}

/// Schema for a structured (JSON-constrained) completion.
///
/// The schema body is a JSON Schema object; providers that support
/// `response_format: json_schema` enforce it server-side, and the call
/// site deserializes the returned value into its own type.
#[derive(Debug, Clone)]
pub struct StructuredSpec {
    pub name: &'static str,
    pub schema: serde_json::Value,
}

impl StructuredSpec {
    pub fn new(name: &'static str, schema: serde_json::Value) -> Self {
        Self { name, schema }
    }
}

/// Token usage accounting for a single call.
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize)]
pub struct TokenUsage {
    pub prompt_tokens: u64,
    pub completion_tokens: u64,
    pub total_tokens: u64,
}

impl TokenUsage {
    pub fn new(prompt_tokens: u64, completion_tokens: u64) -> Self {
        Self {
            prompt_tokens,
            completion_tokens,
            total_tokens: prompt_tokens.saturating_add(completion_tokens),
        }
    }

    /// Accumulate usage across calls without overflow.
    pub fn add(&mut self, other: &TokenUsage) {
        self.prompt_tokens = self.prompt_tokens.saturating_add(other.prompt_tokens);
        self.completion_tokens = self
            .completion_tokens
            .saturating_add(other.completion_tokens);
        self.total_tokens = self.total_tokens.saturating_add(other.total_tokens);
    }
}

/// Response from a chat completion call.
#[derive(Debug, Clone, Default)]
pub struct ChatResponse {
    pub content: Option<String>,
    pub finish_reason: Option<String>,
    pub usage: Option<TokenUsage>,
    pub model: Option<String>,
}

impl ChatResponse {
    /// The completion text, or an empty string when the provider
    /// returned nothing.
    pub fn text(&self) -> &str {
        self.content.as_deref().unwrap_or("")
    }
}

/// Trait for chat-completion providers.
#[async_trait]
pub trait LlmClient: Send + Sync {
    /// Send a chat completion request with default options.
    async fn chat(&self, model: &str, messages: &[ChatMessage]) -> anyhow::Result<ChatResponse> {
        self.chat_with_options(model, messages, ChatOptions::default())
            .await
    }

    /// Send a chat completion request with explicit sampling options.
    async fn chat_with_options(
        &self,
        model: &str,
        messages: &[ChatMessage],
        options: ChatOptions,
    ) -> anyhow::Result<ChatResponse>;

    /// Send a schema-constrained request and return the raw JSON value.
    async fn chat_structured(
        &self,
        model: &str,
        messages: &[ChatMessage],
        spec: StructuredSpec,
        options: ChatOptions,
    ) -> anyhow::Result<serde_json::Value>;
}

/// Trait for embedding providers.
#[async_trait]
pub trait Embedder: Send + Sync {
    async fn embed(&self, text: &str) -> anyhow::Result<Vec<f32>>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn chat_message_roles_serialize_lowercase() {
        let msg = ChatMessage::system("be brief");
        let json = serde_json::to_value(&msg).unwrap();
        assert_eq!(json["role"], "system");
        assert_eq!(json["content"], "be brief");
    }

    #[test]
    fn token_usage_saturates() {
        let mut usage = TokenUsage::new(u64::MAX, 1);
        assert_eq!(usage.total_tokens, u64::MAX);
        usage.add(&TokenUsage::new(10, 10));
        assert_eq!(usage.prompt_tokens, u64::MAX);
    }

    #[test]
    fn chat_options_builder_chains() {
        let opts = ChatOptions::default()
            .with_temperature(0.4)
            .with_stop(vec!["</answer>".to_string()]);
        assert_eq!(opts.temperature, Some(0.4));
        assert_eq!(opts.stop.as_ref().unwrap().len(), 1);
        assert!(opts.top_p.is_none());
    }
}
