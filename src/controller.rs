//! Confidence-driven solve loop.
//!
//! The controller strings the phases together: refine the task, assess
//! its complexity, derive a budget, then iterate reasoning turns under
//! a confidence policy until an answer survives final judgment or the
//! budget runs out. Budget exhaustion is an outcome, not an error, and
//! `solve` never fails: the worst case is an empty answer with a zero
//! reward.

use std::sync::Arc;

use serde_json::json;
use tracing::{debug, info, warn};

use crate::aggregate::{select_best, Aggregator};
use crate::budget::{Budget, PlanPointer};
use crate::complexity::classifier::ComplexityClassifier;
use crate::complexity::embed::CachedEmbedder;
use crate::complexity::ComplexityAnalyzer;
use crate::config::EngineConfig;
use crate::engine::{prompts, ReasoningEngine};
use crate::llm::{
    ChatMessage, ChatOptions, Embedder, LlmClient, OpenRouterClient, RetryConfig, StructuredSpec,
};
use crate::refiner::Refiner;
use crate::task::{Interaction, Task};

fn completion_schema() -> StructuredSpec {
    StructuredSpec::new(
        "completion_check",
        json!({
            "type": "object",
            "properties": {"completion": {"type": "boolean"}},
            "required": ["completion"],
            "additionalProperties": false
        }),
    )
}

fn final_review_schema() -> StructuredSpec {
    StructuredSpec::new(
        "final_review",
        json!({
            "type": "object",
            "properties": {"score": {"type": "number"}},
            "required": ["score"],
            "additionalProperties": false
        }),
    )
}

/// End-to-end budgeted reasoning over a single task.
pub struct Solver {
    client: Arc<dyn LlmClient>,
    config: EngineConfig,
    refiner: Refiner,
    analyzer: ComplexityAnalyzer,
    engine: Arc<ReasoningEngine>,
    aggregator: Aggregator,
}

impl Solver {
    pub fn new(
        client: Arc<dyn LlmClient>,
        embedder: Arc<dyn Embedder>,
        config: EngineConfig,
    ) -> Self {
        let cached = Arc::new(CachedEmbedder::new(embedder));
        let classifier = Arc::new(ComplexityClassifier::new());
        Self::with_components(client, cached, classifier, config)
    }

    /// Build a solver on the default HTTP client, which also serves as
    /// the embedder. The config's retry cap becomes the client's.
    pub fn openrouter(api_key: impl Into<String>, config: EngineConfig) -> Self {
        let client = Arc::new(
            OpenRouterClient::new(api_key)
                .with_retry_config(RetryConfig::default().with_max_retries(config.max_retries)),
        );
        Self::new(client.clone(), client, config)
    }

    /// Build with explicit shared components, for callers that reuse a
    /// classifier or embeddings cache across solvers.
    pub fn with_components(
        client: Arc<dyn LlmClient>,
        embedder: Arc<CachedEmbedder>,
        classifier: Arc<ComplexityClassifier>,
        config: EngineConfig,
    ) -> Self {
        let engine = Arc::new(ReasoningEngine::new(client.clone(), config.clone()));
        Self {
            refiner: Refiner::new(client.clone(), config.model.clone()),
            analyzer: ComplexityAnalyzer::new(
                client.clone(),
                embedder,
                classifier,
                config.model.clone(),
            ),
            aggregator: Aggregator::new(engine.clone()),
            engine,
            client,
            config,
        }
    }

    /// Solve a task. Infallible by policy: every failure downgrades to
    /// a weaker result rather than an error.
    pub async fn solve(&self, description: &str) -> Interaction {
        self.solve_task(description).await.1
    }

    /// Like [`solve`](Self::solve), also returning the annotated task.
    pub async fn solve_task(&self, description: &str) -> (Task, Interaction) {
        let mut task = self.refiner.refine(Task::new(description)).await;
        info!(task = task.effective_description(), "task refined");

        let report = self.analyzer.assess(task.effective_description()).await;
        task.complexity = Some(report.score);
        task.plan = report.plan;

        let budget = Budget::derive(task.plan.as_ref(), report.score, &self.config);
        let (interaction, pointer) = self.run_loop(&task, report.score, budget).await;
        if let Some(plan) = task.plan.as_mut() {
            pointer.mark_progress(plan);
        }
        (task, interaction)
    }

    async fn run_loop(
        &self,
        task: &Task,
        complexity: f64,
        budget: Budget,
    ) -> (Interaction, PlanPointer) {
        let system = ChatMessage::system(prompts::system_prompt(task, budget.adjusted));
        let mut pointer = PlanPointer::new();
        let mut running = Interaction::default();
        let iterations = budget.adjusted.min(self.config.max_steps);

        for iteration in 0..iterations {
            let remaining = budget.adjusted as i64 - running.steps.len() as i64;
            let messages = self.build_messages(task, &system, &running, &pointer, remaining);

            let mut candidate = if self.config.agents > 0 {
                let collab = self
                    .aggregator
                    .collaborate(&messages, &running, budget.adjusted as i64)
                    .await;
                let consistent = self
                    .aggregator
                    .self_consistency(&messages, &running, budget.adjusted as i64)
                    .await;
                select_best(vec![collab, consistent])
            } else {
                self.aggregator
                    .self_consistency(&messages, &running, budget.adjusted as i64)
                    .await
            };
            self.engine.ensure_reflection(&mut candidate).await;

            if candidate.final_reward < self.config.medium_threshold() && self.config.backtrack {
                let hotter = (self.config.temperature * 2.0).min(1.0);
                debug!(
                    reward = candidate.final_reward,
                    temperature = hotter,
                    "confidence dipped, re-approaching"
                );
                let retry = self
                    .engine
                    .generate(
                        &messages,
                        hotter,
                        &running,
                        budget.adjusted as i64,
                        None,
                    )
                    .await;
                candidate = select_best(vec![candidate, retry]);
            }

            if candidate.final_reward < self.config.low_threshold() {
                let refined_budget = budget.refinement(complexity, candidate.final_reward);
                info!(refined_budget, "confidence collapsed, refining the prompt");
                let refined_messages = vec![
                    system.clone(),
                    ChatMessage::user(format!(
                        "{}\n{}",
                        prompts::refined_prompt(task, &candidate, refined_budget),
                        prompts::continuation_suffix(refined_budget as i64),
                    )),
                ];
                let refined = self
                    .aggregator
                    .self_consistency(&refined_messages, &running, refined_budget as i64)
                    .await;
                candidate = select_best(vec![refined, candidate]);
            }

            running.merge_from(candidate);
            info!(
                iteration,
                steps = running.steps.len(),
                reward = running.final_reward,
                "iteration merged"
            );

            if let Some(plan) = &task.plan {
                self.advance_pointer(plan, &mut pointer, &running).await;
            }

            if running.has_answer() {
                running.final_reward = self.judge_final(task, &running).await;
                info!(final_reward = running.final_reward, "answer accepted");
                return (running, pointer);
            }
        }

        info!(
            steps = running.steps.len(),
            "budget exhausted, returning best accumulated trace"
        );
        (running, pointer)
    }

    fn build_messages(
        &self,
        task: &Task,
        system: &ChatMessage,
        running: &Interaction,
        pointer: &PlanPointer,
        remaining: i64,
    ) -> Vec<ChatMessage> {
        let mut body = prompts::user_prompt(task);
        if let Some(plan) = &task.plan {
            if let Some(step) = pointer.current_step(plan) {
                body.push_str("\n\n");
                body.push_str(&prompts::focus_block(
                    plan,
                    step,
                    pointer.current_subtask(plan),
                ));
            }
        }
        if !running.steps.is_empty() {
            body.push_str("\n\nProgress so far:\n");
            body.push_str(&transcript_digest(running));
        }
        body.push('\n');
        body.push_str(&prompts::continuation_suffix(remaining));
        vec![system.clone(), ChatMessage::user(body)]
    }

    /// Walk the plan cursor forward past every unit the trace has
    /// completed, one judgment per iteration.
    async fn advance_pointer(
        &self,
        plan: &crate::complexity::plan::Plan,
        pointer: &mut PlanPointer,
        running: &Interaction,
    ) {
        if pointer.exhausted(plan) {
            return;
        }
        if let Some(subtask) = pointer.current_subtask(plan) {
            let subtask_text = subtask.full_text.clone();
            let subtask_name = subtask.name.clone();
            if !self.judge_completion("subtask", &subtask_name, &subtask_text, running).await {
                return;
            }
            if pointer.advance_subtask(plan) {
                return;
            }
        }
        if let Some(step) = pointer.current_step(plan) {
            let step_text = step.full_text.clone();
            let step_name = step.name.clone();
            if self.judge_completion("step", &step_name, &step_text, running).await {
                pointer.advance_step(plan);
            }
        }
    }

    /// Structured yes/no: has this plan unit been completed by the
    /// reasoning so far? Fails closed (not complete).
    async fn judge_completion(
        &self,
        kind: &str,
        name: &str,
        full_text: &str,
        running: &Interaction,
    ) -> bool {
        let messages = [
            ChatMessage::system(format!(
                "Judge whether the plan {kind} below has been fully completed by \
                 the reasoning steps shown. Answer with the completion flag only."
            )),
            ChatMessage::user(format!(
                "{kind} \"{name}\":\n{full_text}\n\nReasoning so far:\n{}",
                transcript_digest(running)
            )),
        ];
        match self
            .client
            .chat_structured(
                &self.config.model,
                &messages,
                completion_schema(),
                ChatOptions::default().with_temperature(0.0),
            )
            .await
        {
            Ok(value) => {
                let complete = value
                    .get("completion")
                    .and_then(|v| v.as_bool())
                    .unwrap_or(false);
                debug!(kind, name, complete, "completion judgment");
                complete
            }
            Err(err) => {
                warn!("completion judgment failed, holding position: {err:#}");
                false
            }
        }
    }

    /// Structured final score for the answer; replaces the trace's own
    /// final reward. On failure the self-assessed reward stands.
    async fn judge_final(&self, task: &Task, running: &Interaction) -> f64 {
        let messages = [
            ChatMessage::system(
                "Score how well the answer solves the task, from 0.0 (useless) \
                 to 1.0 (complete and correct).",
            ),
            ChatMessage::user(format!(
                "Task:\n{}\n\nReasoning:\n{}\nAnswer:\n{}",
                task.effective_description(),
                transcript_digest(running),
                running.answer
            )),
        ];
        match self
            .client
            .chat_structured(
                &self.config.model,
                &messages,
                final_review_schema(),
                ChatOptions::default().with_temperature(0.0),
            )
            .await
        {
            Ok(value) => value
                .get("score")
                .and_then(|v| v.as_f64())
                .map(|s| s.clamp(0.0, 1.0))
                .unwrap_or(running.final_reward),
            Err(err) => {
                warn!("final judgment failed, keeping self-assessed reward: {err:#}");
                running.final_reward
            }
        }
    }
}

/// Compact rendering of a trace for judgment prompts.
fn transcript_digest(interaction: &Interaction) -> String {
    let mut digest = String::new();
    for step in &interaction.steps {
        digest.push_str(&format!("Step {}: {}\n", step.step_number, step.description));
        if let Some(reflection) = &step.reflection {
            digest.push_str(&format!(
                "  (reflection, reward {:.1}: {})\n",
                reflection.reward, reflection.content
            ));
        }
    }
    digest
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::llm::mock::{MockEmbedder, MockLlm};
    use serde_json::json;

    fn solver(mock: Arc<MockLlm>, config: EngineConfig) -> Solver {
        Solver::new(mock, Arc::new(MockEmbedder::new()), config.with_model("test-model"))
    }

    /// Refinement + complexity both fail; they must not break the run.
    fn script_degraded_preamble(mock: &MockLlm) {
        mock.push_error("refine offline");
        mock.push_error("kind offline");
        mock.push_error("outline offline");
        mock.push_error("expansion offline");
    }

    const GOOD_TRACE: &str = "<step>Add the numbers.</step><count>19</count>\
        <reflection>Simple arithmetic.</reflection><reward>0.9</reward>\
        <answer>4</answer><final_reward>0.9</final_reward>";

    #[tokio::test]
    async fn confident_answer_ends_the_loop_with_final_judgment() {
        let mock = Arc::new(MockLlm::new());
        script_degraded_preamble(&mock);
        for _ in 0..5 {
            mock.push_text(GOOD_TRACE);
        }
        mock.push_structured(json!({"score": 0.95}));

        let solver = solver(
            mock.clone(),
            EngineConfig::default().with_agents(0).with_backtrack(false),
        );
        let (task, interaction) = solver.solve_task("What is 2 plus 2?").await;

        assert_eq!(interaction.answer, "4");
        assert_eq!(interaction.final_reward, 0.95);
        assert_eq!(interaction.steps.len(), 1);
        assert!(task.complexity.is_some());
        assert!(task.plan.is_none());
        assert_eq!(mock.remaining(), 0);
    }

    #[tokio::test]
    async fn budget_exhaustion_returns_best_accumulated_trace() {
        let mock = Arc::new(MockLlm::new());
        script_degraded_preamble(&mock);
        for _ in 0..5 {
            mock.push_text("<step>still thinking</step><count>19</count>");
        }
        // The answerless trace is missing a reflection for its step.
        mock.push_text("<reflection>inconclusive</reflection><reward>0.3</reward>");

        let solver = solver(
            mock.clone(),
            EngineConfig::default()
                .with_agents(0)
                .with_backtrack(false)
                .with_max_steps(1),
        );
        let interaction = solver.solve("impossible ask").await;

        assert_eq!(interaction.answer, "");
        assert_eq!(interaction.final_reward, 0.0);
        assert_eq!(interaction.steps.len(), 1);
        assert_eq!(interaction.reflections.len(), 1);
    }

    #[tokio::test]
    async fn everything_failing_yields_the_empty_interaction() {
        let mock = Arc::new(MockLlm::new());
        // No scripted replies at all: chats return empty, structured
        // calls error, and the loop spins down to nothing.
        let solver = solver(
            mock,
            EngineConfig::default()
                .with_agents(0)
                .with_backtrack(false)
                .with_max_steps(2),
        );
        let interaction = solver.solve("anything").await;
        assert_eq!(interaction.answer, "");
        assert_eq!(interaction.final_reward, 0.0);
        assert!(interaction.steps.is_empty());
    }

    #[tokio::test]
    async fn low_confidence_triggers_hotter_retry() {
        let mock = Arc::new(MockLlm::new());
        script_degraded_preamble(&mock);
        for _ in 0..5 {
            mock.push_text(
                "<step>meh</step><count>19</count>\
                 <reflection>weak</reflection><reward>0.2</reward>\
                 <final_reward>0.3</final_reward>",
            );
        }
        // The doubled-temperature retry lands the answer.
        mock.push_text(
            "<step>better</step><count>19</count>\
             <reflection>good</reflection><reward>0.9</reward>\
             <answer>yes</answer><final_reward>0.8</final_reward>",
        );
        mock.push_structured(json!({"score": 0.85}));

        let solver = solver(mock.clone(), EngineConfig::default().with_agents(0));
        let interaction = solver.solve("hard question").await;

        assert_eq!(interaction.answer, "yes");
        assert_eq!(interaction.final_reward, 0.85);
        let temperatures: Vec<Option<f64>> =
            mock.options_log().iter().map(|o| o.temperature).collect();
        // Default temperature 0.7 doubled and capped at 1.0.
        assert!(temperatures.contains(&Some(1.0)));
    }

    #[tokio::test]
    async fn plan_pointer_advances_through_judged_units() {
        let mock = Arc::new(MockLlm::new());
        mock.push_error("refine offline");
        mock.push_error("kind offline");
        let outline = "gather the data and summarize it";
        mock.push_text(outline);
        mock.push_structured(json!({
            "name": "Little plan",
            "description": "Gather and summarize",
            "steps": [{
                "number": 1, "name": "Gather", "description": "Gather the data",
                "explanation": "", "output": "", "full_text": outline,
                "subtasks": [{
                    "number": 1, "name": "Find sources", "description": "",
                    "explanation": "", "output": "", "full_text": "find the sources",
                    "subtasks": []
                }]
            }]
        }));
        mock.push_text(""); // query expansion: nothing open
        for _ in 0..5 {
            mock.push_text(GOOD_TRACE);
        }
        mock.push_structured(json!({"completion": true})); // subtask done
        mock.push_structured(json!({"completion": true})); // step done
        mock.push_structured(json!({"score": 0.9}));

        let solver = solver(
            mock.clone(),
            EngineConfig::default().with_agents(0).with_backtrack(false),
        );
        let (task, interaction) = solver.solve_task("gather and summarize").await;

        assert_eq!(interaction.final_reward, 0.9);
        assert_eq!(mock.remaining(), 0);
        // The completed units are visible on the returned plan.
        let plan = task.plan.as_ref().expect("plan should survive");
        assert!(plan.steps[0].completed);
        assert!(plan.steps[0].subtasks[0].completed);
        // The reasoning prompt carried the plan focus block.
        let prompts = mock.prompts_log();
        assert!(prompts.iter().any(|p| p.contains("Plan Summary:")
            && p.contains("Current subtask:")
            && p.contains("Find sources")));
    }
}
