//! Task complexity analysis.
//!
//! A weighted vote over independent signals decides whether a task gets
//! the full plan-driven treatment or the short path. Signals that carry
//! zero weight are still computed and logged so a report reads as a
//! complete diagnostic.

pub mod classifier;
pub mod convert;
pub mod embed;
pub mod plan;
pub mod signals;

use std::sync::Arc;

use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use crate::llm::{ChatMessage, ChatOptions, LlmClient};
use classifier::ComplexityClassifier;
use convert::PlanConverter;
use embed::CachedEmbedder;
use plan::Plan;
use signals::sigmoid_ratio;

/// Verdict cutoff for the weighted vote.
const COMPLEX_THRESHOLD: f64 = 0.5;

// Plan-analysis score internals.
const SUBSTEP_THRESHOLD: f64 = 4.0;
const DEPTH_THRESHOLD: f64 = 1.0;
const STEP_LENGTH_THRESHOLD: f64 = 12.0;
const UNIQUE_SUBTASK_THRESHOLD: f64 = 3.0;
const SIGMOID_STEEPNESS: f64 = 1.0;

/// Expected follow-up questions for a fully specified task.
const QUESTION_THRESHOLD: f64 = 5.0;

/// Per-signal weights. Zero-weight entries are diagnostic only.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SignalWeights {
    pub dependency_depth: f64,
    pub predicate_argument: f64,
    pub classifier: f64,
    pub plan_analysis: f64,
    pub task_graph: f64,
    pub syntax_shape: f64,
    pub entropy: f64,
    pub query_expansion: f64,
    pub recursive_decomposition: f64,
    pub concept_depth: f64,
    pub cognitive_load: f64,
    pub statistical_similarity: f64,
    pub readability: f64,
    pub sentiment: f64,
    pub theorem_steps: f64,
    pub temporal_ordering: f64,
}

impl Default for SignalWeights {
    fn default() -> Self {
        Self {
            dependency_depth: 0.10,
            predicate_argument: 0.05,
            classifier: 0.10,
            plan_analysis: 0.40,
            task_graph: 0.10,
            syntax_shape: 0.10,
            entropy: 0.10,
            query_expansion: 0.05,
            recursive_decomposition: 0.0,
            concept_depth: 0.0,
            cognitive_load: 0.0,
            statistical_similarity: 0.0,
            readability: 0.0,
            sentiment: 0.0,
            theorem_steps: 0.0,
            temporal_ordering: 0.0,
        }
    }
}

/// One signal's contribution to the vote.
#[derive(Debug, Clone, Serialize)]
pub struct SignalReading {
    pub name: &'static str,
    pub weight: f64,
    pub score: f64,
}

/// Outcome of a complexity assessment.
#[derive(Debug, Clone, Default, Serialize)]
pub struct ComplexityReport {
    /// Weighted vote in [0,1].
    pub score: f64,
    pub complex: bool,
    /// Structured plan, when plan analysis succeeded.
    pub plan: Option<Plan>,
    pub readings: Vec<SignalReading>,
}

/// Weighted multi-signal complexity analyzer.
pub struct ComplexityAnalyzer {
    client: Arc<dyn LlmClient>,
    model: String,
    classifier: Arc<ComplexityClassifier>,
    converter: PlanConverter,
    weights: SignalWeights,
}

impl ComplexityAnalyzer {
    pub fn new(
        client: Arc<dyn LlmClient>,
        embedder: Arc<CachedEmbedder>,
        classifier: Arc<ComplexityClassifier>,
        model: impl Into<String>,
    ) -> Self {
        let model = model.into();
        Self {
            converter: PlanConverter::new(client.clone(), embedder, model.clone()),
            client,
            model,
            classifier,
            weights: SignalWeights::default(),
        }
    }

    pub fn with_weights(mut self, weights: SignalWeights) -> Self {
        self.weights = weights;
        self
    }

    /// Assess a task. Never fails: LLM-backed signals that error simply
    /// contribute zero to the vote.
    pub async fn assess(&self, task: &str) -> ComplexityReport {
        let w = &self.weights;
        let mut readings = vec![
            SignalReading {
                name: "dependency_depth",
                weight: w.dependency_depth,
                score: signals::dependency_depth(task),
            },
            SignalReading {
                name: "predicate_argument",
                weight: w.predicate_argument,
                score: signals::predicate_argument_density(task),
            },
            SignalReading {
                name: "classifier",
                weight: w.classifier,
                score: self.classifier.predict_proba(task),
            },
            SignalReading {
                name: "task_graph",
                weight: w.task_graph,
                score: signals::task_graph_depth(task),
            },
            SignalReading {
                name: "syntax_shape",
                weight: w.syntax_shape,
                score: signals::syntax_shape(task),
            },
            SignalReading {
                name: "entropy",
                weight: w.entropy,
                score: signals::token_entropy(task),
            },
            SignalReading {
                name: "recursive_decomposition",
                weight: w.recursive_decomposition,
                score: signals::recursive_decomposition(task),
            },
            SignalReading {
                name: "concept_depth",
                weight: w.concept_depth,
                score: signals::concept_depth(task),
            },
            SignalReading {
                name: "cognitive_load",
                weight: w.cognitive_load,
                score: signals::cognitive_load(task),
            },
            SignalReading {
                name: "statistical_similarity",
                weight: w.statistical_similarity,
                score: self.classifier.similarity_score(task),
            },
            SignalReading {
                name: "readability",
                weight: w.readability,
                score: signals::readability_grade(task),
            },
            SignalReading {
                name: "sentiment",
                weight: w.sentiment,
                score: signals::sentiment_neutrality(task),
            },
            SignalReading {
                name: "theorem_steps",
                weight: w.theorem_steps,
                score: signals::theorem_steps(task),
            },
            SignalReading {
                name: "temporal_ordering",
                weight: w.temporal_ordering,
                score: signals::temporal_ordering(task),
            },
        ];

        let (plan_score, plan) = match self.plan_analysis(task).await {
            Ok((score, plan)) => (score, Some(plan)),
            Err(err) => {
                warn!("plan analysis failed, signal contributes zero: {err:#}");
                (0.0, None)
            }
        };
        readings.push(SignalReading {
            name: "plan_analysis",
            weight: w.plan_analysis,
            score: plan_score,
        });

        let expansion_score = match self.query_expansion(task).await {
            Ok(score) => score,
            Err(err) => {
                warn!("query expansion failed, signal contributes zero: {err:#}");
                0.0
            }
        };
        readings.push(SignalReading {
            name: "query_expansion",
            weight: w.query_expansion,
            score: expansion_score,
        });

        let weight_sum: f64 = readings.iter().map(|r| r.weight).sum();
        let score = if weight_sum > 0.0 {
            readings.iter().map(|r| r.weight * r.score).sum::<f64>() / weight_sum
        } else {
            0.0
        };
        for reading in &readings {
            debug!(
                signal = reading.name,
                weight = reading.weight,
                score = reading.score,
                "complexity signal"
            );
        }
        let complex = score > COMPLEX_THRESHOLD;
        info!(score, complex, "complexity verdict");

        ComplexityReport {
            score,
            complex,
            plan,
            readings,
        }
    }

    /// Generate a plan, convert it, and score its shape.
    async fn plan_analysis(&self, task: &str) -> anyhow::Result<(f64, Plan)> {
        let outline = self.converter.generate_outline(task).await?;
        let plan = self.converter.convert(&outline, None, 0).await?;

        let substeps = sigmoid_ratio(
            plan.total_subtasks() as f64,
            SIGMOID_STEEPNESS,
            SUBSTEP_THRESHOLD,
        );
        let depth = sigmoid_ratio(plan.max_depth() as f64, SIGMOID_STEEPNESS, DEPTH_THRESHOLD);
        let step_len = sigmoid_ratio(
            plan.average_step_words(),
            SIGMOID_STEEPNESS,
            STEP_LENGTH_THRESHOLD,
        );
        let unique = sigmoid_ratio(
            plan.unique_subtask_names() as f64,
            SIGMOID_STEEPNESS,
            UNIQUE_SUBTASK_THRESHOLD,
        );
        let score = 0.6 * substeps + 0.2 * depth + 0.1 * step_len + 0.1 * unique;
        debug!(substeps, depth, step_len, unique, score, "plan analysis");
        Ok((score, plan))
    }

    /// How many follow-up questions the task leaves open.
    async fn query_expansion(&self, task: &str) -> anyhow::Result<f64> {
        let messages = [
            ChatMessage::system(
                "List the follow-up questions someone would need answered before \
                 they could complete the task, one question per line. If the task \
                 is fully specified, respond with nothing.",
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
        let questions = response
            .text()
            .lines()
            .filter(|line| line.contains('?'))
            .count();
        Ok((questions as f64 / QUESTION_THRESHOLD).min(1.0))
    }
}
