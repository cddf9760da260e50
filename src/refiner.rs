//! Task refinement.
//!
//! Rewrites a raw task into an unambiguous, active-voice restatement
//! and decides what kind of artifact the answer should be. Both calls
//! fail soft: a refiner that cannot reach the model hands back the raw
//! task and plain text.

use std::sync::Arc;

use regex::Regex;
use serde_json::json;
use std::sync::OnceLock;
use tracing::{debug, warn};

use crate::llm::{ChatMessage, ChatOptions, LlmClient, StructuredSpec};
use crate::task::{OutputKind, Task};

/// Cap on the rewrite completion.
const REFINE_MAX_TOKENS: u64 = 200;

const REFINE_SYSTEM: &str = "Rewrite the task as one unambiguous instruction in \
the active voice. Keep every requirement, drop every filler word, and wrap the \
rewrite in <prompt> tags.\n\n\
Example 1:\n\
Task: maybe you could, if it's not too much trouble, sort of summarize this article?\n\
<prompt>Summarize the article in three sentences.</prompt>\n\n\
Example 2:\n\
Task: we were wondering whether a report could be put together about Q3 sales\n\
<prompt>Write a report analyzing Q3 sales.</prompt>\n\n\
Example 3:\n\
Task: code that does fizzbuzz but in rust and fast please\n\
<prompt>Write an efficient Rust program that prints the FizzBuzz sequence.</prompt>";

fn prompt_tag_regex() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"(?s)<prompt>(.*?)</prompt>").expect("static regex"))
}

fn output_kind_schema() -> StructuredSpec {
    StructuredSpec::new(
        "output_kind",
        json!({
            "type": "object",
            "properties": {
                "output_type": {
                    "type": "string",
                    "enum": ["simple_text", "code", "json", "csv", "html", "pdf", "text_file", "script"]
                },
                "file_extension": {"type": "string"}
            },
            "required": ["output_type", "file_extension"],
            "additionalProperties": false
        }),
    )
}

/// Rewrites tasks and classifies their expected output.
pub struct Refiner {
    client: Arc<dyn LlmClient>,
    model: String,
}

impl Refiner {
    pub fn new(client: Arc<dyn LlmClient>, model: impl Into<String>) -> Self {
        Self {
            client,
            model: model.into(),
        }
    }

    /// Refine a task in place: restated description plus output kind.
    pub async fn refine(&self, mut task: Task) -> Task {
        task.refined_description = self.rewrite(&task.description).await;
        let (kind, extension) = self.detect_output_kind(&task.refined_description).await;
        task.output_kind = kind;
        task.file_extension = extension;
        task
    }

    /// Rewrite the raw text; on any failure the raw text stands.
    async fn rewrite(&self, raw: &str) -> String {
        let messages = [
            ChatMessage::system(REFINE_SYSTEM),
            ChatMessage::user(format!("Task: {raw}")),
        ];
        let response = match self
            .client
            .chat_with_options(
                &self.model,
                &messages,
                ChatOptions::default()
                    .with_temperature(0.2)
                    .with_max_tokens(REFINE_MAX_TOKENS),
            )
            .await
        {
            Ok(response) => response,
            Err(err) => {
                warn!("task rewrite failed, keeping raw task: {err:#}");
                return raw.to_string();
            }
        };
        let text = response.text();
        let extracted: Vec<&str> = prompt_tag_regex()
            .captures_iter(text)
            .filter_map(|c| c.get(1))
            .map(|m| m.as_str().trim())
            .filter(|s| !s.is_empty())
            .collect();
        let refined = if extracted.is_empty() {
            // No tag pair; fall back to the completion with tag scraps removed.
            text.replace("<prompt>", "").replace("</prompt>", "").trim().to_string()
        } else {
            extracted.join(" ")
        };
        if refined.is_empty() {
            raw.to_string()
        } else {
            debug!(refined = refined.as_str(), "task rewritten");
            refined
        }
    }

    /// Classify the expected artifact; failures mean plain text.
    pub async fn detect_output_kind(&self, task: &str) -> (OutputKind, String) {
        let messages = [
            ChatMessage::system(
                "Classify what kind of artifact the task's answer should be and \
                 give a matching file extension without the dot.",
            ),
            ChatMessage::user(task.to_string()),
        ];
        let value = match self
            .client
            .chat_structured(
                &self.model,
                &messages,
                output_kind_schema(),
                ChatOptions::default().with_temperature(0.0),
            )
            .await
        {
            Ok(value) => value,
            Err(err) => {
                warn!("output kind detection failed, assuming plain text: {err:#}");
                return (OutputKind::SimpleText, "txt".to_string());
            }
        };
        let kind = value
            .get("output_type")
            .and_then(|v| v.as_str())
            .map(OutputKind::parse_lenient)
            .unwrap_or_default();
        let extension = value
            .get("file_extension")
            .and_then(|v| v.as_str())
            .map(|s| s.trim_start_matches('.').to_string())
            .filter(|s| !s.is_empty())
            .unwrap_or_else(|| kind.default_extension().to_string());
        (kind, extension)
    }
}
