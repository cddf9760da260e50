//! Trace aggregation: self-consistency and persona collaboration.
//!
//! Self-consistency fans out sibling traces at varied temperatures and
//! keeps the best-scored one. Collaboration runs a roster of personas
//! over a shared transcript, each turn fenced by a stop tag, and keeps
//! the strongest contribution. Tie-breaks are deterministic: earlier
//! traces win unless a later one is strictly better.

use std::sync::Arc;

use futures::stream::{FuturesUnordered, StreamExt};
use rand::Rng;
use tracing::{debug, info};

use crate::engine::prompts::{PERSONAS, PERSONA_CLOSE_TAG};
use crate::engine::ReasoningEngine;
use crate::llm::ChatMessage;
use crate::task::Interaction;

/// Floor on sibling traces regardless of the configured `n`.
const MIN_TRACES: u32 = 5;

/// Runs multi-trace strategies on top of the single-trace engine.
pub struct Aggregator {
    engine: Arc<ReasoningEngine>,
}

impl Aggregator {
    pub fn new(engine: Arc<ReasoningEngine>) -> Self {
        Self { engine }
    }

    /// Upper bound of the per-trace temperature range.
    fn temperature_cap(n: u32) -> f64 {
        0.5 + (0.1 * n as f64).min(1.2)
    }

    /// Fan out `max(n, 5)` sibling traces at uniformly sampled
    /// temperatures and keep the best one.
    pub async fn self_consistency(
        &self,
        messages: &[ChatMessage],
        state: &Interaction,
        initial_budget: i64,
    ) -> Interaction {
        let config = self.engine.config();
        let n = config.n.max(MIN_TRACES);
        let cap = Self::temperature_cap(n);
        let temperatures: Vec<f64> = {
            let mut rng = rand::thread_rng();
            (0..n).map(|_| rng.gen_range(0.0..=cap)).collect()
        };
        debug!(n, cap, "sampling sibling traces");

        let mut pending: FuturesUnordered<_> = temperatures
            .iter()
            .enumerate()
            .map(|(i, &temperature)| {
                let engine = self.engine.clone();
                async move {
                    let trace = engine
                        .generate(messages, temperature, state, initial_budget, None)
                        .await;
                    (i, trace)
                }
            })
            .collect();

        let mut traces: Vec<(usize, Interaction)> = Vec::new();
        while let Some((i, trace)) = pending.next().await {
            let confident = trace.final_reward >= config.high_threshold();
            traces.push((i, trace));
            if config.early_stop && confident {
                info!("abandoning sibling traces after a high-confidence result");
                break;
            }
        }
        // Restore spawn order so tie-breaks stay deterministic.
        traces.sort_by_key(|(i, _)| *i);
        select_best(traces.into_iter().map(|(_, t)| t))
    }

    /// Run the first `agents` personas over a shared transcript and
    /// return the strongest contribution.
    pub async fn collaborate(
        &self,
        base_messages: &[ChatMessage],
        state: &Interaction,
        initial_budget: i64,
    ) -> Interaction {
        let config = self.engine.config();
        let count = (config.agents as usize).min(PERSONAS.len());
        let mut transcript: Vec<ChatMessage> = base_messages.to_vec();
        let mut best = Interaction::default();
        let mut has_best = false;

        for persona in PERSONAS.iter().take(count) {
            let mut messages = transcript.clone();
            messages.push(ChatMessage::user(format!(
                "{intro}\n\nContinue the reasoning in your own voice. Respond \
                 inside a <persona_response> tag using the step protocol, and \
                 close the tag when you are done.{opening}",
                intro = persona.intro,
                opening = persona.opening(),
            )));
            let (text, trace) = self
                .engine
                .generate_raw(
                    &messages,
                    persona.temperature,
                    state,
                    initial_budget,
                    Some(vec![PERSONA_CLOSE_TAG.to_string()]),
                )
                .await;
            debug!(
                persona = persona.name,
                reward = trace.final_reward,
                steps = trace.steps.len(),
                "persona turn complete"
            );
            if !text.is_empty() {
                transcript.push(ChatMessage::assistant(format!(
                    "{}{text}{PERSONA_CLOSE_TAG}",
                    persona.opening()
                )));
            }
            if !has_best || is_better(&trace, &best) {
                best = trace;
                has_best = true;
            }
        }
        best
    }
}

/// Strictly-better comparison: final reward first, then more steps,
/// then more reflections.
fn is_better(candidate: &Interaction, incumbent: &Interaction) -> bool {
    if candidate.final_reward != incumbent.final_reward {
        return candidate.final_reward > incumbent.final_reward;
    }
    if candidate.steps.len() != incumbent.steps.len() {
        return candidate.steps.len() > incumbent.steps.len();
    }
    candidate.reflections.len() > incumbent.reflections.len()
}

/// Earliest-wins selection under [`is_better`].
pub fn select_best(traces: impl IntoIterator<Item = Interaction>) -> Interaction {
    let mut best: Option<Interaction> = None;
    for trace in traces {
        match &best {
            Some(incumbent) if !is_better(&trace, incumbent) => {}
            _ => best = Some(trace),
        }
    }
    best.unwrap_or_default()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::EngineConfig;
    use crate::llm::mock::MockLlm;
    use crate::task::{Reflection, Step};

    fn engine_with(mock: Arc<MockLlm>, config: EngineConfig) -> Arc<ReasoningEngine> {
        Arc::new(ReasoningEngine::new(mock, config.with_model("test-model")))
    }

    fn trace(reward: f64, steps: usize, reflections: usize) -> Interaction {
        Interaction {
            steps: (1..=steps as i64)
                .map(|n| Step {
                    description: format!("s{n}"),
                    step_number: n,
                    remaining_budget: 20 - n,
                    reflection: None,
                })
                .collect(),
            reflections: (1..=reflections as i64)
                .map(|n| Reflection {
                    content: format!("r{n}"),
                    reward: 0.5,
                    step_number: n,
                })
                .collect(),
            answer: String::new(),
            final_reward: reward,
        }
    }

    #[test]
    fn best_trace_wins_on_reward_then_length() {
        let best = select_best(vec![trace(0.5, 3, 3), trace(0.9, 1, 0), trace(0.5, 5, 0)]);
        assert_eq!(best.final_reward, 0.9);

        let best = select_best(vec![trace(0.5, 3, 1), trace(0.5, 5, 0), trace(0.5, 5, 2)]);
        assert_eq!(best.steps.len(), 5);
        assert_eq!(best.reflections.len(), 2);
    }

    #[test]
    fn ties_keep_the_earliest_trace() {
        let mut a = trace(0.5, 2, 1);
        a.answer = "first".to_string();
        let mut b = trace(0.5, 2, 1);
        b.answer = "second".to_string();
        assert_eq!(select_best(vec![a, b]).answer, "first");
    }

    #[test]
    fn temperature_cap_saturates() {
        assert!((Aggregator::temperature_cap(5) - 1.0).abs() < 1e-9);
        assert!((Aggregator::temperature_cap(20) - 1.7).abs() < 1e-9);
        assert!((Aggregator::temperature_cap(100) - 1.7).abs() < 1e-9);
    }

    #[tokio::test]
    async fn self_consistency_floors_trace_count_and_bounds_temperature() {
        let mock = Arc::new(MockLlm::new());
        for i in 0..5 {
            mock.push_text(format!(
                "<step>s</step><count>19</count><answer>a{i}</answer><final_reward>0.{i}</final_reward>"
            ));
        }
        let aggregator = Aggregator::new(engine_with(
            mock.clone(),
            EngineConfig::default().with_n(2),
        ));
        let state = Interaction::default();
        let best = aggregator
            .self_consistency(&[ChatMessage::user("task")], &state, 20)
            .await;
        assert_eq!(mock.options_log().len(), 5);
        assert!(best.final_reward > 0.0);
        let cap = Aggregator::temperature_cap(5);
        for options in mock.options_log() {
            let t = options.temperature.unwrap();
            assert!((0.0..=cap).contains(&t));
        }
    }

    #[tokio::test]
    async fn collaboration_runs_personas_in_roster_order() {
        let mock = Arc::new(MockLlm::new());
        mock.push_text("<step>scout idea</step><count>19</count><final_reward>0.4</final_reward>");
        mock.push_text(
            "<step>audited</step><count>19</count><answer>checked</answer><final_reward>0.8</final_reward>",
        );
        mock.push_text("<step>clerk pass</step><count>19</count><final_reward>0.6</final_reward>");
        let aggregator = Aggregator::new(engine_with(
            mock.clone(),
            EngineConfig::default().with_agents(3),
        ));
        let best = aggregator
            .collaborate(&[ChatMessage::user("task")], &Interaction::default(), 20)
            .await;
        assert_eq!(best.answer, "checked");
        assert_eq!(best.final_reward, 0.8);

        let options = mock.options_log();
        assert_eq!(options.len(), 3);
        // Roster temperatures in order: Scout, Auditor, Clerk.
        assert_eq!(options[0].temperature, Some(0.7));
        assert_eq!(options[1].temperature, Some(0.2));
        assert_eq!(options[2].temperature, Some(0.0));
        // Every persona turn is fenced by the stop tag.
        for o in options {
            assert_eq!(o.stop.as_deref(), Some(&[PERSONA_CLOSE_TAG.to_string()][..]));
        }
        // Later personas see earlier contributions in the transcript.
        let prompts = mock.prompts_log();
        assert!(prompts[1].contains("Auditor") || prompts[1].contains("skeptic"));
    }

    #[tokio::test]
    async fn early_stop_abandons_remaining_siblings() {
        let mock = Arc::new(MockLlm::new());
        for _ in 0..5 {
            mock.push_text("<answer>sure</answer><final_reward>0.95</final_reward>");
        }
        let aggregator = Aggregator::new(engine_with(
            mock.clone(),
            EngineConfig::default().with_n(5).with_early_stop(true),
        ));
        let best = aggregator
            .self_consistency(&[ChatMessage::user("task")], &Interaction::default(), 20)
            .await;
        assert!(best.final_reward >= 0.9);
    }
}
