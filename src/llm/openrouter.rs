//! OpenAI-compatible HTTP client (OpenRouter by default).
//!
//! Implements [`LlmClient`] for chat and schema-constrained completions,
//! and [`Embedder`] for embedding lookups, with transparent retry of
//! transient failures.

use std::time::{Duration, Instant};

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use super::{
    ChatMessage, ChatOptions, ChatResponse, Embedder, LlmClient, LlmError, RetryConfig,
    StructuredSpec, TokenUsage,
};

const DEFAULT_BASE_URL: &str = "https://openrouter.ai/api/v1";

/// HTTP client for OpenAI-compatible chat and embedding endpoints.
pub struct OpenRouterClient {
    client: reqwest::Client,
    base_url: String,
    api_key: String,
    embedding_model: String,
    retry_config: RetryConfig,
}

impl OpenRouterClient {
    pub fn new(api_key: impl Into<String>) -> Self {
        Self {
            client: reqwest::Client::new(),
            base_url: DEFAULT_BASE_URL.to_string(),
            api_key: api_key.into(),
            embedding_model: "text-embedding-3-small".to_string(),
            retry_config: RetryConfig::default(),
        }
    }

    /// Point at a different OpenAI-compatible endpoint.
    pub fn with_base_url(mut self, base_url: impl Into<String>) -> Self {
        self.base_url = base_url.into();
        self
    }

    pub fn with_embedding_model(mut self, model: impl Into<String>) -> Self {
        self.embedding_model = model.into();
        self
    }

    pub fn with_retry_config(mut self, retry_config: RetryConfig) -> Self {
        self.retry_config = retry_config;
        self
    }

    pub fn retry_config(&self) -> &RetryConfig {
        &self.retry_config
    }

    async fn post_json<B: Serialize>(
        &self,
        path: &str,
        body: &B,
    ) -> Result<serde_json::Value, LlmError> {
        let url = format!("{}{}", self.base_url, path);
        let response = self
            .client
            .post(&url)
            .bearer_auth(&self.api_key)
            .json(body)
            .send()
            .await
            .map_err(|e| {
                let message = if e.is_timeout() || e.is_connect() {
                    format!("request to {url} failed: {e}")
                } else {
                    e.to_string()
                };
                LlmError::Network { message }
            })?;

        let status = response.status().as_u16();
        if !(200..300).contains(&status) {
            let retry_after = response
                .headers()
                .get("retry-after")
                .and_then(|v| v.to_str().ok())
                .and_then(|v| v.parse::<u64>().ok())
                .map(Duration::from_secs);
            let body = response.text().await.unwrap_or_default();
            return Err(LlmError::from_status(status, body, retry_after));
        }

        response
            .json::<serde_json::Value>()
            .await
            .map_err(|e| LlmError::Malformed {
                message: format!("invalid JSON response: {e}"),
            })
    }

    /// Execute a request, retrying transient failures under the
    /// configured policy and wall-clock cap.
    async fn execute_with_retry<B: Serialize>(
        &self,
        path: &str,
        body: &B,
    ) -> Result<serde_json::Value, LlmError> {
        let started = Instant::now();
        let mut attempt: u32 = 0;

        loop {
            match self.post_json(path, body).await {
                Ok(value) => return Ok(value),
                Err(err) => {
                    let out_of_time = started.elapsed() >= self.retry_config.max_elapsed;
                    if out_of_time || !self.retry_config.should_retry(&err, attempt) {
                        return Err(err);
                    }
                    let delay = err.backoff(attempt);
                    warn!(
                        attempt = attempt + 1,
                        max = self.retry_config.max_retries,
                        delay_secs = delay.as_secs(),
                        "LLM request failed, retrying: {err}"
                    );
                    tokio::time::sleep(delay).await;
                    attempt += 1;
                }
            }
        }
    }

    fn parse_chat_response(value: serde_json::Value) -> Result<ChatResponse, LlmError> {
        let parsed: ApiChatResponse =
            serde_json::from_value(value).map_err(|e| LlmError::Malformed {
                message: format!("unexpected response shape: {e}"),
            })?;
        let choice = parsed.choices.into_iter().next();
        Ok(ChatResponse {
            content: choice.as_ref().and_then(|c| c.message.content.clone()),
            finish_reason: choice.and_then(|c| c.finish_reason),
            usage: parsed
                .usage
                .map(|u| TokenUsage::new(u.prompt_tokens, u.completion_tokens)),
            model: parsed.model,
        })
    }
}

#[async_trait]
impl LlmClient for OpenRouterClient {
    async fn chat_with_options(
        &self,
        model: &str,
        messages: &[ChatMessage],
        options: ChatOptions,
    ) -> anyhow::Result<ChatResponse> {
        let request = ApiChatRequest {
            model,
            messages,
            temperature: options.temperature,
            top_p: options.top_p,
            max_tokens: options.max_tokens,
            stop: options.stop,
            response_format: None,
        };
        debug!(model, messages = messages.len(), "chat completion request");
        let value = self.execute_with_retry("/chat/completions", &request).await?;
        Ok(Self::parse_chat_response(value)?)
    }

    async fn chat_structured(
        &self,
        model: &str,
        messages: &[ChatMessage],
        spec: StructuredSpec,
        options: ChatOptions,
    ) -> anyhow::Result<serde_json::Value> {
        let request = ApiChatRequest {
            model,
            messages,
            temperature: options.temperature,
            top_p: options.top_p,
            max_tokens: options.max_tokens,
            stop: options.stop,
            response_format: Some(ResponseFormat {
                format_type: "json_schema",
                json_schema: JsonSchemaFormat {
                    name: spec.name,
                    strict: true,
                    schema: spec.schema,
                },
            }),
        };
        debug!(model, schema = spec.name, "structured completion request");
        let value = self.execute_with_retry("/chat/completions", &request).await?;
        let response = Self::parse_chat_response(value)?;
        let content = response.content.ok_or_else(|| LlmError::Malformed {
            message: "structured completion returned no content".to_string(),
        })?;
        let parsed = serde_json::from_str(&content).map_err(|e| LlmError::Malformed {
            message: format!("structured completion is not valid JSON: {e}"),
        })?;
        Ok(parsed)
    }
}

#[async_trait]
impl Embedder for OpenRouterClient {
    async fn embed(&self, text: &str) -> anyhow::Result<Vec<f32>> {
        let request = ApiEmbeddingRequest {
            model: &self.embedding_model,
            input: text,
        };
        let value = self.execute_with_retry("/embeddings", &request).await?;
        let parsed: ApiEmbeddingResponse =
            serde_json::from_value(value).map_err(|e| LlmError::Malformed {
                message: format!("unexpected embedding shape: {e}"),
            })?;
        let first = parsed.data.into_iter().next().ok_or_else(|| LlmError::Malformed {
            message: "empty embedding response".to_string(),
        })?;
        Ok(first.embedding)
    }
}

#[derive(Serialize)]
struct ApiChatRequest<'a> {
    model: &'a str,
    messages: &'a [ChatMessage],
    #[serde(skip_serializing_if = "Option::is_none")]
    temperature: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    top_p: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    max_tokens: Option<u64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    stop: Option<Vec<String>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    response_format: Option<ResponseFormat>,
}

#[derive(Serialize)]
struct ResponseFormat {
    #[serde(rename = "type")]
    format_type: &'static str,
    json_schema: JsonSchemaFormat,
}

#[derive(Serialize)]
struct JsonSchemaFormat {
    name: &'static str,
    strict: bool,
    schema: serde_json::Value,
}

#[derive(Deserialize)]
struct ApiChatResponse {
    choices: Vec<ApiChoice>,
    #[serde(default)]
    usage: Option<ApiUsage>,
    #[serde(default)]
    model: Option<String>,
}

#[derive(Deserialize)]
struct ApiChoice {
    message: ApiMessage,
    #[serde(default)]
    finish_reason: Option<String>,
}

#[derive(Deserialize)]
struct ApiMessage {
    #[serde(default)]
    content: Option<String>,
}

#[derive(Deserialize)]
struct ApiUsage {
    #[serde(default)]
    prompt_tokens: u64,
    #[serde(default)]
    completion_tokens: u64,
}

#[derive(Serialize)]
struct ApiEmbeddingRequest<'a> {
    model: &'a str,
    input: &'a str,
}

#[derive(Deserialize)]
struct ApiEmbeddingResponse {
    data: Vec<ApiEmbeddingDatum>,
}

#[derive(Deserialize)]
struct ApiEmbeddingDatum {
    embedding: Vec<f32>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn chat_request_omits_unset_options() {
        let messages = vec![ChatMessage::user("hello")];
        let request = ApiChatRequest {
            model: "test-model",
            messages: &messages,
            temperature: Some(0.7),
            top_p: None,
            max_tokens: None,
            stop: None,
            response_format: None,
        };
        let value = serde_json::to_value(&request).unwrap();
        assert_eq!(value["temperature"], 0.7);
        assert!(value.get("top_p").is_none());
        assert!(value.get("stop").is_none());
    }

    #[test]
    fn parses_chat_response_with_usage() {
        let value = json!({
            "choices": [{
                "message": {"content": "<answer>42</answer>"},
                "finish_reason": "stop"
            }],
            "usage": {"prompt_tokens": 10, "completion_tokens": 5},
            "model": "test-model"
        });
        let response = OpenRouterClient::parse_chat_response(value).unwrap();
        assert_eq!(response.text(), "<answer>42</answer>");
        assert_eq!(response.finish_reason.as_deref(), Some("stop"));
        assert_eq!(response.usage.unwrap().total_tokens, 15);
    }

    #[test]
    fn retry_policy_is_configurable() {
        let client = OpenRouterClient::new("key")
            .with_retry_config(RetryConfig::default().with_max_retries(5));
        assert_eq!(client.retry_config().max_retries, 5);
    }

    #[test]
    fn empty_choices_yield_empty_text() {
        let value = json!({"choices": []});
        let response = OpenRouterClient::parse_chat_response(value).unwrap();
        assert_eq!(response.text(), "");
    }
}
