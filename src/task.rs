//! Core data model for a reasoning run.
//!
//! A [`Task`] is the mutable solve state (raw and refined description,
//! complexity verdict, structured plan, output kind). An [`Interaction`]
//! is one parsed reasoning trace: numbered steps, their reflections, and
//! the final answer with its reward.

use serde::{Deserialize, Serialize};

use crate::complexity::plan::Plan;

/// What kind of artifact the answer should be.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum OutputKind {
    #[default]
    SimpleText,
    Code,
    Json,
    Csv,
    Html,
    Pdf,
    TextFile,
    Script,
}

impl OutputKind {
    /// Default file extension for this kind.
    pub fn default_extension(&self) -> &'static str {
        match self {
            OutputKind::SimpleText | OutputKind::TextFile => "txt",
            OutputKind::Code => "rs",
            OutputKind::Json => "json",
            OutputKind::Csv => "csv",
            OutputKind::Html => "html",
            OutputKind::Pdf => "pdf",
            OutputKind::Script => "sh",
        }
    }

    /// Parse a loosely formatted kind name; unknown names map to
    /// `SimpleText`.
    pub fn parse_lenient(s: &str) -> Self {
        match s.trim().to_lowercase().replace([' ', '-'], "_").as_str() {
            "code" => OutputKind::Code,
            "json" => OutputKind::Json,
            "csv" => OutputKind::Csv,
            "html" => OutputKind::Html,
            "pdf" => OutputKind::Pdf,
            "text_file" => OutputKind::TextFile,
            "script" => OutputKind::Script,
            _ => OutputKind::SimpleText,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            OutputKind::SimpleText => "simple_text",
            OutputKind::Code => "code",
            OutputKind::Json => "json",
            OutputKind::Csv => "csv",
            OutputKind::Html => "html",
            OutputKind::Pdf => "pdf",
            OutputKind::TextFile => "text_file",
            OutputKind::Script => "script",
        }
    }
}

/// The task being solved, as it accumulates solve-time annotations.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Task {
    /// Raw task text as submitted.
    pub description: String,
    /// Unambiguous restatement produced by the refiner.
    pub refined_description: String,
    /// Complexity score in [0,1], once assessed.
    pub complexity: Option<f64>,
    /// Structured plan, when complexity analysis produced one.
    pub plan: Option<Plan>,
    pub output_kind: OutputKind,
    pub file_extension: String,
}

impl Task {
    pub fn new(description: impl Into<String>) -> Self {
        let description = description.into();
        Self {
            refined_description: description.clone(),
            description,
            complexity: None,
            plan: None,
            output_kind: OutputKind::SimpleText,
            file_extension: "txt".to_string(),
        }
    }

    /// The text downstream phases should reason about.
    pub fn effective_description(&self) -> &str {
        if self.refined_description.is_empty() {
            &self.description
        } else {
            &self.refined_description
        }
    }
}

/// A self-evaluation attached to a step.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Reflection {
    pub content: String,
    /// Quality score in [0,1]; 0.0 when absent or malformed.
    pub reward: f64,
    pub step_number: i64,
}

/// One reasoning step inside the budgeted loop.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Step {
    pub description: String,
    /// `initial_budget - remaining_budget` at the time of the step.
    pub step_number: i64,
    pub remaining_budget: i64,
    pub reflection: Option<Reflection>,
}

/// A parsed reasoning trace.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Interaction {
    pub steps: Vec<Step>,
    pub reflections: Vec<Reflection>,
    pub answer: String,
    pub final_reward: f64,
}

impl Interaction {
    pub fn is_empty(&self) -> bool {
        self.steps.is_empty() && self.reflections.is_empty() && self.answer.is_empty()
    }

    pub fn has_answer(&self) -> bool {
        !self.answer.trim().is_empty()
    }

    /// Fold an aggregated trace into this one.
    ///
    /// Whichever side has more steps wins; entries missing from the
    /// longer side are matched in by step number. The answer always
    /// follows the aggregated trace; its final reward is kept only when
    /// positive, otherwise the merged reward resets to zero so a later
    /// iteration must re-earn confidence.
    pub fn merge_from(&mut self, other: Interaction) {
        if other.steps.len() > self.steps.len() {
            for step in other.steps {
                if !self.steps.iter().any(|s| s.step_number == step.step_number) {
                    self.steps.push(step);
                }
            }
            self.steps.sort_by_key(|s| s.step_number);
        }
        if other.reflections.len() > self.reflections.len() {
            for reflection in other.reflections {
                if !self
                    .reflections
                    .iter()
                    .any(|r| r.step_number == reflection.step_number)
                {
                    self.reflections.push(reflection);
                }
            }
            self.reflections.sort_by_key(|r| r.step_number);
        }
        self.answer = other.answer;
        self.final_reward = if other.final_reward > 0.0 {
            other.final_reward
        } else {
            0.0
        };
    }

    /// Reflections whose reward falls below the given bar.
    pub fn weak_reflections(&self, bar: f64) -> impl Iterator<Item = &Reflection> {
        self.reflections.iter().filter(move |r| r.reward < bar)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn step(n: i64, text: &str) -> Step {
        Step {
            description: text.to_string(),
            step_number: n,
            remaining_budget: 20 - n,
            reflection: None,
        }
    }

    fn reflection(n: i64, reward: f64) -> Reflection {
        Reflection {
            content: format!("reflection {n}"),
            reward,
            step_number: n,
        }
    }

    #[test]
    fn output_kind_parses_leniently() {
        assert_eq!(OutputKind::parse_lenient("Code"), OutputKind::Code);
        assert_eq!(OutputKind::parse_lenient("text file"), OutputKind::TextFile);
        assert_eq!(OutputKind::parse_lenient("poem"), OutputKind::SimpleText);
        assert_eq!(OutputKind::Script.default_extension(), "sh");
    }

    #[test]
    fn merge_keeps_longer_step_list() {
        let mut current = Interaction {
            steps: vec![step(1, "a")],
            ..Default::default()
        };
        let other = Interaction {
            steps: vec![step(1, "a'"), step(2, "b"), step(3, "c")],
            answer: "done".to_string(),
            final_reward: 0.9,
            ..Default::default()
        };
        current.merge_from(other);
        assert_eq!(current.steps.len(), 3);
        // Existing entry for step 1 is kept, not replaced.
        assert_eq!(current.steps[0].description, "a");
        assert_eq!(current.answer, "done");
        assert_eq!(current.final_reward, 0.9);
    }

    #[test]
    fn merge_resets_nonpositive_reward() {
        let mut current = Interaction {
            final_reward: 0.7,
            ..Default::default()
        };
        current.merge_from(Interaction::default());
        assert_eq!(current.final_reward, 0.0);
        assert_eq!(current.answer, "");
    }

    #[test]
    fn merge_fills_missing_reflections_by_number() {
        let mut current = Interaction {
            reflections: vec![reflection(1, 0.8)],
            ..Default::default()
        };
        let other = Interaction {
            reflections: vec![reflection(1, 0.2), reflection(2, 0.6)],
            ..Default::default()
        };
        current.merge_from(other);
        assert_eq!(current.reflections.len(), 2);
        assert_eq!(current.reflections[0].reward, 0.8);
    }

    #[test]
    fn weak_reflections_filter() {
        let interaction = Interaction {
            reflections: vec![reflection(1, 0.3), reflection(2, 0.9)],
            ..Default::default()
        };
        let weak: Vec<_> = interaction.weak_reflections(0.5).collect();
        assert_eq!(weak.len(), 1);
        assert_eq!(weak[0].step_number, 1);
    }
}
