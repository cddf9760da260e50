//! Structured plan model.
//!
//! A [`Plan`] is a numbered outline of the work a task implies. Steps
//! carry six text fields so that prompt assembly can show the model the
//! whole of what the current step means, and subtasks nest recursively.

use serde::{Deserialize, Serialize};

/// A nested unit of work under a plan step.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Subtask {
    pub number: i64,
    pub name: String,
    pub description: String,
    pub explanation: String,
    pub output: String,
    /// The source text this subtask was carved from.
    pub full_text: String,
    #[serde(default)]
    pub subtasks: Vec<Subtask>,
    /// Set once the solve loop judges this subtask done.
    #[serde(default)]
    pub completed: bool,
}

impl Subtask {
    /// Mark this subtask and everything nested under it complete.
    pub fn mark_completed(&mut self) {
        self.completed = true;
        for sub in &mut self.subtasks {
            sub.mark_completed();
        }
    }

    /// This subtask plus all nested subtasks.
    pub fn count_recursive(&self) -> usize {
        1 + self
            .subtasks
            .iter()
            .map(Subtask::count_recursive)
            .sum::<usize>()
    }

    fn depth(&self) -> usize {
        1 + self
            .subtasks
            .iter()
            .map(Subtask::depth)
            .max()
            .unwrap_or(0)
    }

    fn collect_names<'a>(&'a self, names: &mut Vec<&'a str>) {
        names.push(self.name.as_str());
        for sub in &self.subtasks {
            sub.collect_names(names);
        }
    }
}

/// A top-level plan step.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct PlanStep {
    pub number: i64,
    pub name: String,
    pub description: String,
    pub explanation: String,
    pub output: String,
    pub full_text: String,
    #[serde(default)]
    pub subtasks: Vec<Subtask>,
    /// Set once the solve loop judges this step done.
    #[serde(default)]
    pub completed: bool,
}

impl PlanStep {
    pub fn subtask_count(&self) -> usize {
        self.subtasks.iter().map(Subtask::count_recursive).sum()
    }

    /// Nesting depth below this step (0 when it has no subtasks).
    pub fn subtask_depth(&self) -> usize {
        self.subtasks.iter().map(Subtask::depth).max().unwrap_or(0)
    }
}

/// A structured outline of the task.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Plan {
    pub name: String,
    pub description: String,
    #[serde(default)]
    pub steps: Vec<PlanStep>,
}

impl Plan {
    /// Total subtasks across all steps, nested levels included.
    pub fn total_subtasks(&self) -> usize {
        self.steps.iter().map(PlanStep::subtask_count).sum()
    }

    /// Maximum subtask nesting depth across the plan.
    pub fn max_depth(&self) -> usize {
        self.steps
            .iter()
            .map(PlanStep::subtask_depth)
            .max()
            .unwrap_or(0)
    }

    /// Distinct subtask names (case-insensitive), across all levels.
    pub fn unique_subtask_names(&self) -> usize {
        let mut names: Vec<&str> = Vec::new();
        for step in &self.steps {
            for sub in &step.subtasks {
                sub.collect_names(&mut names);
            }
        }
        let mut lowered: Vec<String> = names.iter().map(|n| n.to_lowercase()).collect();
        lowered.sort();
        lowered.dedup();
        lowered.len()
    }

    /// Mean word count of the steps' source text.
    pub fn average_step_words(&self) -> f64 {
        if self.steps.is_empty() {
            return 0.0;
        }
        let total: usize = self
            .steps
            .iter()
            .map(|s| s.full_text.split_whitespace().count())
            .sum();
        total as f64 / self.steps.len() as f64
    }

    pub fn step_by_number(&self, number: i64) -> Option<&PlanStep> {
        self.steps.iter().find(|s| s.number == number)
    }

    pub fn step_by_number_mut(&mut self, number: i64) -> Option<&mut PlanStep> {
        self.steps.iter_mut().find(|s| s.number == number)
    }

    /// Renumber steps and their subtasks densely from 1, keeping their
    /// order. Conversion can hand back sparse numbering (a model that
    /// skips numbers, or remainder passes that merge around gaps).
    pub fn renumber(&mut self) {
        for (i, step) in self.steps.iter_mut().enumerate() {
            step.number = i as i64 + 1;
            renumber_subtasks(&mut step.subtasks);
        }
    }

    /// Short rendering used in per-iteration focus blocks.
    pub fn condensed(&self) -> String {
        let mut out = format!("Plan Summary:\n\n{}\n\nSteps:\n", self.description);
        for step in &self.steps {
            out.push_str(&format!("- Step {}: {}\n", step.number, step.name));
        }
        out
    }
}

fn renumber_subtasks(subtasks: &mut [Subtask]) {
    for (i, subtask) in subtasks.iter_mut().enumerate() {
        subtask.number = i as i64 + 1;
        renumber_subtasks(&mut subtask.subtasks);
    }
}
