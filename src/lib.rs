//! stepwise - a budgeted chain-of-thought reasoning engine.
//!
//! The crate turns one raw task into one judged answer by running a
//! tag-structured reasoning loop against an LLM:
//!
//! ```text
//!   task text
//!      |
//!      v
//!   +----------+     +------------+     +--------+
//!   | refiner  | --> | complexity | --> | budget |
//!   +----------+     |  analyzer  |     +--------+
//!                    +------------+         |
//!                          |  plan          v
//!                          +---------> +------------+
//!                                      | controller |<--> aggregator
//!                                      +------------+      (traces,
//!                                            |              personas)
//!                                            v
//!                                      answer + reward
//! ```
//!
//! - [`refiner`]: rewrite the task, decide the output artifact.
//! - [`complexity`]: weighted signal vote plus a structured plan.
//! - [`budget`]: plan-derived step budget and the plan cursor.
//! - [`engine`]: single reasoning turns under the tag protocol.
//! - [`aggregate`]: self-consistency fan-out and persona collaboration.
//! - [`controller`]: the confidence-driven solve loop.
//! - [`llm`]: provider traits, HTTP client, retry policy.
//!
//! The public surface is deliberately small: build a [`Solver`] with a
//! client, an embedder, and an [`EngineConfig`], then call
//! [`Solver::solve`]. It never returns an error; the worst outcome is
//! an empty answer with a zero reward.

pub mod aggregate;
pub mod budget;
pub mod complexity;
pub mod config;
pub mod controller;
pub mod engine;
pub mod llm;
pub mod refiner;
pub mod task;

pub use aggregate::Aggregator;
pub use budget::{Budget, PlanPointer};
pub use complexity::{ComplexityAnalyzer, ComplexityReport, SignalWeights};
pub use config::EngineConfig;
pub use controller::Solver;
pub use engine::ReasoningEngine;
pub use llm::{ChatMessage, ChatOptions, Embedder, LlmClient, OpenRouterClient};
pub use refiner::Refiner;
pub use task::{Interaction, OutputKind, Reflection, Step, Task};
