//! Engine configuration.

use serde::{Deserialize, Serialize};

/// Confidence thresholds `(high, medium, low)`.
///
/// At or above `high` the answer is accepted outright; below `medium`
/// the controller re-approaches at a higher temperature; below `low`
/// the prompt itself is refined. The triple must be non-increasing.
pub type ConfidenceThresholds = (f64, f64, f64);

/// Tunables for a reasoning run.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EngineConfig {
    /// Model identifier passed to the LLM client.
    pub model: String,
    /// Hard cap on outer-loop iterations.
    pub max_steps: u32,
    /// Step budget used when no plan is available.
    pub initial_budget: u32,
    pub confidence_thresholds: ConfidenceThresholds,
    /// Base sampling temperature.
    pub temperature: f64,
    pub top_p: f64,
    /// Requested sibling traces for self-consistency (floored at 5).
    pub n: u32,
    /// Per-call retry cap for the default HTTP client.
    pub max_retries: u32,
    /// Re-approach at doubled temperature when confidence dips.
    pub backtrack: bool,
    /// Number of collaborating personas (0 disables collaboration).
    pub agents: u32,
    /// Budget multiplier used when the plan gives no subtask/step ratio.
    pub complexity_factor: f64,
    /// Abandon sibling traces once one reaches high confidence.
    pub early_stop: bool,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            model: "openai/gpt-4o-mini".to_string(),
            max_steps: 20,
            initial_budget: 20,
            confidence_thresholds: (0.8, 0.5, 0.0),
            temperature: 0.7,
            top_p: 0.9,
            n: 3,
            max_retries: 3,
            backtrack: true,
            agents: 3,
            complexity_factor: 5.0,
            early_stop: false,
        }
    }
}

impl EngineConfig {
    pub fn with_model(mut self, model: impl Into<String>) -> Self {
        self.model = model.into();
        self
    }

    pub fn with_max_steps(mut self, max_steps: u32) -> Self {
        self.max_steps = max_steps;
        self
    }

    pub fn with_initial_budget(mut self, initial_budget: u32) -> Self {
        self.initial_budget = initial_budget;
        self
    }

    pub fn with_confidence_thresholds(mut self, thresholds: ConfidenceThresholds) -> Self {
        self.confidence_thresholds = thresholds;
        self
    }

    pub fn with_temperature(mut self, temperature: f64) -> Self {
        self.temperature = temperature;
        self
    }

    pub fn with_top_p(mut self, top_p: f64) -> Self {
        self.top_p = top_p;
        self
    }

    pub fn with_n(mut self, n: u32) -> Self {
        self.n = n;
        self
    }

    pub fn with_max_retries(mut self, max_retries: u32) -> Self {
        self.max_retries = max_retries;
        self
    }

    pub fn with_backtrack(mut self, backtrack: bool) -> Self {
        self.backtrack = backtrack;
        self
    }

    pub fn with_agents(mut self, agents: u32) -> Self {
        self.agents = agents;
        self
    }

    pub fn with_complexity_factor(mut self, complexity_factor: f64) -> Self {
        self.complexity_factor = complexity_factor;
        self
    }

    pub fn with_early_stop(mut self, early_stop: bool) -> Self {
        self.early_stop = early_stop;
        self
    }

    pub fn high_threshold(&self) -> f64 {
        self.confidence_thresholds.0
    }

    pub fn medium_threshold(&self) -> f64 {
        self.confidence_thresholds.1
    }

    pub fn low_threshold(&self) -> f64 {
        self.confidence_thresholds.2
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_match_documented_values() {
        let config = EngineConfig::default();
        assert_eq!(config.max_steps, 20);
        assert_eq!(config.initial_budget, 20);
        assert_eq!(config.confidence_thresholds, (0.8, 0.5, 0.0));
        assert_eq!(config.n, 3);
        assert_eq!(config.agents, 3);
        assert!(config.backtrack);
        assert!(!config.early_stop);
    }

    #[test]
    fn builder_overrides_compose() {
        let config = EngineConfig::default()
            .with_model("test-model")
            .with_n(7)
            .with_agents(0)
            .with_max_retries(1)
            .with_early_stop(true);
        assert_eq!(config.model, "test-model");
        assert_eq!(config.n, 7);
        assert_eq!(config.agents, 0);
        assert_eq!(config.max_retries, 1);
        assert!(config.early_stop);
    }

    #[test]
    fn config_round_trips_through_serde() {
        let config = EngineConfig::default().with_temperature(0.3);
        let json = serde_json::to_string(&config).unwrap();
        let back: EngineConfig = serde_json::from_str(&json).unwrap();
        assert_eq!(back.temperature, 0.3);
        assert_eq!(back.confidence_thresholds, config.confidence_thresholds);
    }
}
