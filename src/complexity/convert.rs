//! Free-form plan text to structured [`Plan`] conversion.
//!
//! The converter asks the model for a schema-constrained `Plan`, checks
//! how much of the input the returned steps actually cover, and recurses
//! on the uncovered remainder so long outlines are not silently
//! truncated. Steps that arrive with an already-used number are either
//! merged (when the texts say the same thing) or concatenated (when they
//! do not).

use std::sync::Arc;

use async_recursion::async_recursion;
use serde_json::json;
use tracing::{debug, warn};

use crate::complexity::embed::{jaccard_similarity, CachedEmbedder};
use crate::complexity::plan::{Plan, PlanStep, Subtask};
use crate::complexity::signals::flesch_reading_ease;
use crate::llm::{ChatMessage, ChatOptions, LlmClient, StructuredSpec};

/// Duplicate-number steps with both similarities below this are treated
/// as genuinely different and concatenated.
const STEP_MERGE_CUTOFF: f64 = 0.6;
/// Subtasks merge at a stricter bar than steps.
const SUBTASK_MERGE_CUTOFF: f64 = 0.7;
/// Recursion cap for remainder re-conversion.
const MAX_DEPTH: u32 = 5;
/// Remainder fragments shorter than this many words are dropped.
const RESIDUE_MIN_WORDS: usize = 5;
/// Useful remainder longer than this many tokens is re-converted;
/// shorter remainder is attached to the last step verbatim.
const RESIDUE_RECONVERT_TOKENS: usize = 20;
/// Reading-ease floor for remainder worth keeping.
const RESIDUE_MIN_READING_EASE: f64 = 10.0;

/// Whitespace token count; relative coverage is all that matters here.
pub fn count_tokens(text: &str) -> usize {
    text.split_whitespace().count()
}

fn normalize_for_matching(text: &str) -> Vec<String> {
    text.split_whitespace()
        .map(|w| {
            w.chars()
                .filter(|c| c.is_alphanumeric())
                .collect::<String>()
                .to_lowercase()
        })
        .filter(|w| !w.is_empty())
        .collect()
}

/// Remove each converted fragment from `input`, case-insensitively and
/// ignoring punctuation, preserving the order of what remains.
pub fn remove_converted_text(input: &str, converted: &[&str]) -> String {
    let input_words: Vec<&str> = input.split_whitespace().collect();
    let normalized_input = normalize_for_matching(input);
    let mut removed = vec![false; input_words.len()];

    for fragment in converted {
        let needle = normalize_for_matching(fragment);
        if needle.is_empty() {
            continue;
        }
        let mut i = 0;
        while i + needle.len() <= normalized_input.len() {
            let window = &normalized_input[i..i + needle.len()];
            let already = removed[i..i + needle.len()].iter().any(|r| *r);
            if !already && window == needle.as_slice() {
                for r in removed.iter_mut().skip(i).take(needle.len()) {
                    *r = true;
                }
                i += needle.len();
            } else {
                i += 1;
            }
        }
    }

    input_words
        .iter()
        .zip(removed.iter())
        .filter(|(_, r)| !**r)
        .map(|(w, _)| *w)
        .collect::<Vec<_>>()
        .join(" ")
}

fn subtask_schema() -> serde_json::Value {
    json!({
        "type": "object",
        "properties": {
            "number": {"type": "integer"},
            "name": {"type": "string"},
            "description": {"type": "string"},
            "explanation": {"type": "string"},
            "output": {"type": "string"},
            "full_text": {"type": "string"},
            "subtasks": {"type": "array", "items": {"$ref": "#/$defs/subtask"}}
        },
        "required": ["number", "name", "description", "explanation", "output", "full_text", "subtasks"],
        "additionalProperties": false
    })
}

fn plan_schema() -> StructuredSpec {
    StructuredSpec::new(
        "structured_plan",
        json!({
            "type": "object",
            "$defs": {"subtask": subtask_schema()},
            "properties": {
                "name": {"type": "string"},
                "description": {"type": "string"},
                "steps": {
                    "type": "array",
                    "items": {
                        "type": "object",
                        "properties": {
                            "number": {"type": "integer"},
                            "name": {"type": "string"},
                            "description": {"type": "string"},
                            "explanation": {"type": "string"},
                            "output": {"type": "string"},
                            "full_text": {"type": "string"},
                            "subtasks": {"type": "array", "items": {"$ref": "#/$defs/subtask"}}
                        },
                        "required": ["number", "name", "description", "explanation", "output", "full_text", "subtasks"],
                        "additionalProperties": false
                    }
                }
            },
            "required": ["name", "description", "steps"],
            "additionalProperties": false
        }),
    )
}

fn usefulness_schema() -> StructuredSpec {
    StructuredSpec::new(
        "text_classification",
        json!({
            "type": "object",
            "properties": {"is_useful": {"type": "boolean"}},
            "required": ["is_useful"],
            "additionalProperties": false
        }),
    )
}

/// Converts free-form plan text into a structured [`Plan`].
pub struct PlanConverter {
    client: Arc<dyn LlmClient>,
    embedder: Arc<CachedEmbedder>,
    model: String,
}

impl PlanConverter {
    pub fn new(
        client: Arc<dyn LlmClient>,
        embedder: Arc<CachedEmbedder>,
        model: impl Into<String>,
    ) -> Self {
        Self {
            client,
            embedder,
            model: model.into(),
        }
    }

    /// Ask the model for a free-form, numbered outline of the task.
    pub async fn generate_outline(&self, task: &str) -> anyhow::Result<String> {
        let messages = [
            ChatMessage::system(
                "You are a planning assistant. Produce a numbered plan for the task. \
                 Each step gets one line starting with its number; nest subtasks with \
                 indentation. Be concrete and complete; do not solve the task.",
            ),
            ChatMessage::user(task.to_string()),
        ];
        let response = self
            .client
            .chat_with_options(
                &self.model,
                &messages,
                ChatOptions::default().with_temperature(0.2),
            )
            .await?;
        Ok(response.text().to_string())
    }

    /// Convert outline text to a structured plan, merging into
    /// `existing` and recursing on uncovered remainder. The returned
    /// plan is renumbered densely from 1 whatever the model sent back.
    #[async_recursion]
    pub async fn convert(
        &self,
        input: &str,
        existing: Option<Plan>,
        depth: u32,
    ) -> anyhow::Result<Plan> {
        if depth >= MAX_DEPTH {
            warn!(depth, "plan conversion recursion cap reached");
            let mut plan = existing.unwrap_or_default();
            plan.renumber();
            return Ok(plan);
        }

        let messages = [
            ChatMessage::system(
                "Convert the plan text into the structured schema. Copy each step's \
                 source text into full_text verbatim. Preserve step numbering.",
            ),
            ChatMessage::user(input.to_string()),
        ];
        let value = self
            .client
            .chat_structured(
                &self.model,
                &messages,
                plan_schema(),
                ChatOptions::default().with_temperature(0.0),
            )
            .await?;
        let candidate: Plan = serde_json::from_value(value)?;

        let mut merged = match existing {
            Some(mut plan) => {
                if plan.name.is_empty() {
                    plan.name = candidate.name.clone();
                }
                if plan.description.is_empty() {
                    plan.description = candidate.description.clone();
                }
                for step in candidate.steps {
                    self.insert_step(&mut plan, step).await?;
                }
                plan
            }
            None => {
                let mut plan = Plan {
                    name: candidate.name,
                    description: candidate.description,
                    steps: Vec::new(),
                };
                for step in candidate.steps {
                    self.insert_step(&mut plan, step).await?;
                }
                plan
            }
        };

        // Coverage accounting: recurse when the returned steps describe
        // less text than they were given.
        let converted: Vec<&str> = merged.steps.iter().map(|s| s.full_text.as_str()).collect();
        let converted_tokens: usize = converted.iter().map(|t| count_tokens(t)).sum();
        let input_tokens = count_tokens(input);
        if converted_tokens >= input_tokens {
            merged.renumber();
            return Ok(merged);
        }

        let remainder = remove_converted_text(input, &converted);
        debug!(
            input_tokens,
            converted_tokens,
            remainder_tokens = count_tokens(&remainder),
            depth,
            "plan conversion left uncovered text"
        );

        if remainder.split_whitespace().count() < RESIDUE_MIN_WORDS {
            merged.renumber();
            return Ok(merged);
        }
        if !self.remainder_is_useful(&remainder).await? {
            debug!("uncovered text classified as junk, dropping");
            merged.renumber();
            return Ok(merged);
        }
        if flesch_reading_ease(&remainder) < RESIDUE_MIN_READING_EASE {
            debug!("uncovered text failed the readability gate, dropping");
            merged.renumber();
            return Ok(merged);
        }

        if count_tokens(&remainder) > RESIDUE_RECONVERT_TOKENS {
            return self.convert(&remainder, Some(merged), depth + 1).await;
        }
        if let Some(last) = merged.steps.last_mut() {
            last.full_text = format!("{} {}", last.full_text, remainder).trim().to_string();
        }
        merged.renumber();
        Ok(merged)
    }

    async fn remainder_is_useful(&self, remainder: &str) -> anyhow::Result<bool> {
        let messages = [
            ChatMessage::system(
                "Decide whether the text fragment carries task-relevant planning \
                 content (is_useful: true) or is filler such as greetings, markup \
                 scraps, or repetition (is_useful: false).",
            ),
            ChatMessage::user(remainder.to_string()),
        ];
        let value = self
            .client
            .chat_structured(
                &self.model,
                &messages,
                usefulness_schema(),
                ChatOptions::default().with_temperature(0.0),
            )
            .await?;
        Ok(value
            .get("is_useful")
            .and_then(|v| v.as_bool())
            .unwrap_or(false))
    }

    /// Add a step to the plan, resolving number collisions.
    async fn insert_step(&self, plan: &mut Plan, incoming: PlanStep) -> anyhow::Result<()> {
        let Some(existing) = plan.step_by_number_mut(incoming.number) else {
            plan.steps.push(incoming);
            plan.steps.sort_by_key(|s| s.number);
            return Ok(());
        };

        let cosine = self
            .embedder
            .text_similarity(&existing.full_text, &incoming.full_text)
            .await
            .unwrap_or(0.0);
        let jaccard = jaccard_similarity(&existing.full_text, &incoming.full_text);

        if cosine < STEP_MERGE_CUTOFF && jaccard < STEP_MERGE_CUTOFF {
            // Same number, different content: keep both texts.
            existing.full_text =
                format!("{} {}", existing.full_text, incoming.full_text).trim().to_string();
            for subtask in incoming.subtasks {
                Self::insert_subtask_or_merge(self, existing, subtask).await?;
            }
            return Ok(());
        }

        debug!(
            number = incoming.number,
            cosine, jaccard, "merging duplicate plan step via model"
        );
        let merged_text = self
            .merge_texts("PlanStep", &existing.full_text, &incoming.full_text)
            .await?;
        existing.full_text = merged_text;
        if existing.description.is_empty() {
            existing.description = incoming.description;
        }
        for subtask in incoming.subtasks {
            Self::insert_subtask_or_merge(self, existing, subtask).await?;
        }
        Ok(())
    }

    async fn insert_subtask_or_merge(
        &self,
        step: &mut PlanStep,
        incoming: Subtask,
    ) -> anyhow::Result<()> {
        let Some(existing) = step.subtasks.iter_mut().find(|s| s.number == incoming.number)
        else {
            step.subtasks.push(incoming);
            step.subtasks.sort_by_key(|s| s.number);
            return Ok(());
        };

        let cosine = self
            .embedder
            .text_similarity(&existing.full_text, &incoming.full_text)
            .await
            .unwrap_or(0.0);
        let jaccard = jaccard_similarity(&existing.full_text, &incoming.full_text);

        if cosine < SUBTASK_MERGE_CUTOFF && jaccard < SUBTASK_MERGE_CUTOFF {
            existing.full_text =
                format!("{} {}", existing.full_text, incoming.full_text).trim().to_string();
        } else {
            existing.full_text = self
                .merge_texts("Subtask", &existing.full_text, &incoming.full_text)
                .await?;
        }
        Ok(())
    }

    /// Ask the model to fuse two renderings of the same unit of work.
    async fn merge_texts(&self, kind: &str, a: &str, b: &str) -> anyhow::Result<String> {
        let marker = format!("Merged {kind}:");
        let prompt = format!(
            "Two descriptions of the same {kind} follow. Merge them into one \
             complete description that loses no detail. Respond with a single \
             line starting with \"{marker}\".\n\nFirst:\n{a}\n\nSecond:\n{b}"
        );
        let messages = [ChatMessage::user(prompt)];
        let response = self
            .client
            .chat_with_options(
                &self.model,
                &messages,
                ChatOptions::default().with_temperature(0.0),
            )
            .await?;
        let text = response.text();
        let merged = match text.find(&marker) {
            Some(idx) => text[idx + marker.len()..].trim().to_string(),
            None => text.trim().to_string(),
        };
        if merged.is_empty() {
            // Model gave nothing usable; concatenation is the safe floor.
            Ok(format!("{a} {b}").trim().to_string())
        } else {
            Ok(merged)
        }
    }
}
