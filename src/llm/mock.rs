//! Scripted collaborators for tests.
//!
//! `MockLlm` replays a queue of canned replies; `MockEmbedder` produces
//! deterministic vectors and counts lookups so caching behavior can be
//! asserted.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Mutex;

use async_trait::async_trait;

use super::{ChatMessage, ChatOptions, ChatResponse, Embedder, LlmClient, StructuredSpec};

/// One scripted reply from [`MockLlm`].
#[derive(Debug, Clone)]
pub enum ScriptedReply {
    Text(String),
    Structured(serde_json::Value),
    Error(String),
}

/// Queue-backed mock client. Replies are popped in push order; an empty
/// queue yields an empty completion so loops terminate quietly.
#[derive(Default)]
pub struct MockLlm {
    replies: Mutex<VecDeque<ScriptedReply>>,
    recorded_options: Mutex<Vec<ChatOptions>>,
    recorded_prompts: Mutex<Vec<String>>,
}

impl MockLlm {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push_text(&self, text: impl Into<String>) {
        self.replies
            .lock()
            .unwrap()
            .push_back(ScriptedReply::Text(text.into()));
    }

    pub fn push_structured(&self, value: serde_json::Value) {
        self.replies
            .lock()
            .unwrap()
            .push_back(ScriptedReply::Structured(value));
    }

    pub fn push_error(&self, message: impl Into<String>) {
        self.replies
            .lock()
            .unwrap()
            .push_back(ScriptedReply::Error(message.into()));
    }

    /// Options recorded for every chat call, in call order.
    pub fn options_log(&self) -> Vec<ChatOptions> {
        self.recorded_options.lock().unwrap().clone()
    }

    /// Last message content of every call, in call order.
    pub fn prompts_log(&self) -> Vec<String> {
        self.recorded_prompts.lock().unwrap().clone()
    }

    pub fn remaining(&self) -> usize {
        self.replies.lock().unwrap().len()
    }

    fn record(&self, messages: &[ChatMessage], options: &ChatOptions) {
        self.recorded_options.lock().unwrap().push(options.clone());
        self.recorded_prompts
            .lock()
            .unwrap()
            .push(messages.last().map(|m| m.content.clone()).unwrap_or_default());
    }

    fn pop(&self) -> Option<ScriptedReply> {
        self.replies.lock().unwrap().pop_front()
    }
}

#[async_trait]
impl LlmClient for MockLlm {
    async fn chat_with_options(
        &self,
        _model: &str,
        messages: &[ChatMessage],
        options: ChatOptions,
    ) -> anyhow::Result<ChatResponse> {
        self.record(messages, &options);
        match self.pop() {
            Some(ScriptedReply::Text(text)) => Ok(ChatResponse {
                content: Some(text),
                ..Default::default()
            }),
            Some(ScriptedReply::Structured(value)) => Ok(ChatResponse {
                content: Some(value.to_string()),
                ..Default::default()
            }),
            Some(ScriptedReply::Error(message)) => Err(anyhow::anyhow!(message)),
            None => Ok(ChatResponse::default()),
        }
    }

    async fn chat_structured(
        &self,
        _model: &str,
        messages: &[ChatMessage],
        _spec: StructuredSpec,
        options: ChatOptions,
    ) -> anyhow::Result<serde_json::Value> {
        self.record(messages, &options);
        match self.pop() {
            Some(ScriptedReply::Structured(value)) => Ok(value),
            Some(ScriptedReply::Text(text)) => Ok(serde_json::from_str(&text)?),
            Some(ScriptedReply::Error(message)) => Err(anyhow::anyhow!(message)),
            None => Err(anyhow::anyhow!("mock reply queue is empty")),
        }
    }
}

/// Deterministic embedder: a small dense vector derived from byte
/// histograms, stable across calls, distinct for distinct texts.
#[derive(Default)]
pub struct MockEmbedder {
    calls: AtomicUsize,
}

impl MockEmbedder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of embed calls served (cache misses, when wrapped).
    pub fn call_count(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl Embedder for MockEmbedder {
    async fn embed(&self, text: &str) -> anyhow::Result<Vec<f32>> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        let mut vector = vec![0.0f32; 16];
        for (i, byte) in text.bytes().enumerate() {
            vector[i % 16] += byte as f32 / 255.0;
        }
        let norm = vector.iter().map(|v| v * v).sum::<f32>().sqrt();
        if norm > 0.0 {
            for v in &mut vector {
                *v /= norm;
            }
        }
        Ok(vector)
    }
}
