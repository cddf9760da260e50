//! Single-trace reasoning engine.
//!
//! One call into the model under the tag protocol, parsed against the
//! state accumulated in earlier turns. Failures never escape: a failed
//! call parses as an empty trace and costs the caller one budget unit.

pub mod parser;
pub mod prompts;

use std::sync::Arc;

use tracing::{debug, warn};

use crate::config::EngineConfig;
use crate::llm::{ChatMessage, ChatOptions, LlmClient};
use crate::task::{Interaction, Reflection};

/// Runs individual reasoning turns against the model.
pub struct ReasoningEngine {
    client: Arc<dyn LlmClient>,
    config: EngineConfig,
}

impl ReasoningEngine {
    pub fn new(client: Arc<dyn LlmClient>, config: EngineConfig) -> Self {
        Self { client, config }
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    /// One reasoning turn: call the model and parse the result against
    /// the accumulated trace. A failed call yields an empty trace.
    pub async fn generate(
        &self,
        messages: &[ChatMessage],
        temperature: f64,
        state: &Interaction,
        initial_budget: i64,
        stop: Option<Vec<String>>,
    ) -> Interaction {
        self.generate_raw(messages, temperature, state, initial_budget, stop)
            .await
            .1
    }

    /// Like [`generate`](Self::generate), but also returns the raw
    /// completion text for callers that extend a shared transcript.
    pub async fn generate_raw(
        &self,
        messages: &[ChatMessage],
        temperature: f64,
        state: &Interaction,
        initial_budget: i64,
        stop: Option<Vec<String>>,
    ) -> (String, Interaction) {
        let mut options = ChatOptions::default()
            .with_temperature(temperature)
            .with_top_p(self.config.top_p);
        if let Some(stop) = stop {
            options = options.with_stop(stop);
        }
        match self
            .client
            .chat_with_options(&self.config.model, messages, options)
            .await
        {
            Ok(response) => {
                let parsed = parser::parse_response(
                    response.text(),
                    initial_budget,
                    &state.steps,
                    &state.reflections,
                );
                (response.text().to_string(), parsed)
            }
            Err(err) => {
                warn!("reasoning turn failed, treating as empty trace: {err:#}");
                (String::new(), Interaction::default())
            }
        }
    }

    /// Make sure the latest step carries a reflection: traces that end
    /// without one get a low-temperature follow-up request, and if even
    /// that fails the step is marked unreviewed with a zero reward.
    pub async fn ensure_reflection(&self, interaction: &mut Interaction) {
        let Some(last) = interaction.steps.last() else {
            return;
        };
        if last.reflection.is_some() {
            return;
        }
        let step_number = last.step_number;
        let prompt = prompts::reflection_request(&last.description);
        let messages = [ChatMessage::user(prompt)];
        let (content, reward) = match self
            .client
            .chat_with_options(
                &self.config.model,
                &messages,
                ChatOptions::default().with_temperature(0.2),
            )
            .await
        {
            Ok(response) => parser::parse_reflection(response.text()),
            Err(err) => {
                warn!("reflection request failed: {err:#}");
                ("No reflection provided.".to_string(), 0.0)
            }
        };
        debug!(step_number, reward, "generated missing reflection");
        let reflection = Reflection {
            content,
            reward,
            step_number,
        };
        if let Some(last) = interaction.steps.last_mut() {
            last.reflection = Some(reflection.clone());
        }
        if !interaction
            .reflections
            .iter()
            .any(|r| r.step_number == step_number)
        {
            interaction.reflections.push(reflection);
            interaction.reflections.sort_by_key(|r| r.step_number);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::llm::mock::MockLlm;
    use crate::task::Step;

    fn engine(mock: Arc<MockLlm>) -> ReasoningEngine {
        ReasoningEngine::new(mock, EngineConfig::default().with_model("test-model"))
    }

    #[tokio::test]
    async fn generate_parses_model_output() {
        let mock = Arc::new(MockLlm::new());
        mock.push_text(
            "<step>work</step><count>19</count><answer>done</answer><final_reward>0.9</final_reward>",
        );
        let state = Interaction::default();
        let parsed = engine(mock.clone())
            .generate(&[ChatMessage::user("task")], 0.7, &state, 20, None)
            .await;
        assert_eq!(parsed.steps.len(), 1);
        assert_eq!(parsed.answer, "done");
        let options = mock.options_log();
        assert_eq!(options[0].temperature, Some(0.7));
        assert_eq!(options[0].top_p, Some(0.9));
    }

    #[tokio::test]
    async fn failed_call_yields_empty_trace() {
        let mock = Arc::new(MockLlm::new());
        mock.push_error("provider down");
        let parsed = engine(mock)
            .generate(
                &[ChatMessage::user("task")],
                0.7,
                &Interaction::default(),
                20,
                None,
            )
            .await;
        assert!(parsed.is_empty());
        assert_eq!(parsed.final_reward, 0.0);
    }

    #[tokio::test]
    async fn ensure_reflection_fills_missing_review() {
        let mock = Arc::new(MockLlm::new());
        mock.push_text("<reflection>looks right</reflection><reward>0.7</reward>");
        let mut interaction = Interaction {
            steps: vec![Step {
                description: "compute".to_string(),
                step_number: 1,
                remaining_budget: 19,
                reflection: None,
            }],
            ..Default::default()
        };
        let engine = engine(mock.clone());
        engine.ensure_reflection(&mut interaction).await;
        assert_eq!(interaction.reflections.len(), 1);
        assert_eq!(interaction.reflections[0].reward, 0.7);
        assert!(interaction.steps[0].reflection.is_some());
        // Low-temperature request.
        assert_eq!(mock.options_log()[0].temperature, Some(0.2));
    }

    #[tokio::test]
    async fn ensure_reflection_is_a_no_op_when_present() {
        let mock = Arc::new(MockLlm::new());
        let mut interaction = Interaction {
            steps: vec![Step {
                description: "compute".to_string(),
                step_number: 1,
                remaining_budget: 19,
                reflection: Some(Reflection {
                    content: "fine".to_string(),
                    reward: 0.9,
                    step_number: 1,
                }),
            }],
            ..Default::default()
        };
        engine(mock.clone()).ensure_reflection(&mut interaction).await;
        assert_eq!(mock.options_log().len(), 0);
    }
}
