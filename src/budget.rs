//! Step budgeting and plan traversal.
//!
//! The budget couples how much reasoning a task gets to how much
//! structure its plan revealed: every plan step and subtask buys one
//! step of budget, and the complexity score scales it further through
//! the subtask/step ratio.

use tracing::info;

use crate::complexity::plan::{Plan, PlanStep, Subtask};
use crate::config::EngineConfig;

/// Derived step budget for one solve.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Budget {
    /// Plan-derived base (or the configured default without a plan).
    pub initial: u32,
    /// Base plus the complexity adjustment.
    pub adjusted: u32,
    /// Subtask/step ratio used for adjustments.
    pub factor: f64,
}

impl Budget {
    /// Derive the budget from an optional plan and the complexity score.
    pub fn derive(plan: Option<&Plan>, complexity: f64, config: &EngineConfig) -> Self {
        let (initial, factor) = match plan {
            Some(plan) if !plan.steps.is_empty() => {
                let steps = plan.steps.len();
                let subtasks = plan.total_subtasks();
                (
                    (steps + subtasks) as u32,
                    subtasks as f64 / steps as f64,
                )
            }
            _ => (config.initial_budget, config.complexity_factor),
        };
        let adjusted = initial + (complexity * factor).round() as u32;
        info!(initial, adjusted, factor, "derived step budget");
        Self {
            initial,
            adjusted,
            factor,
        }
    }

    /// Recomputed budget for a refinement pass: low confidence buys the
    /// retry extra room in proportion to how far the reward fell.
    pub fn refinement(&self, complexity: f64, final_reward: f64) -> u32 {
        self.initial + ((complexity + (1.0 - final_reward) * 10.0) * self.factor).round() as u32
    }
}

/// Cursor over a plan's steps and their top-level subtasks.
///
/// Nested subtasks contribute to the budget but are not walked
/// individually; the focus block shows them through their parent.
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct PlanPointer {
    step: usize,
    subtask: usize,
}

impl PlanPointer {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn current_step<'a>(&self, plan: &'a Plan) -> Option<&'a PlanStep> {
        plan.steps.get(self.step)
    }

    pub fn current_subtask<'a>(&self, plan: &'a Plan) -> Option<&'a Subtask> {
        self.current_step(plan)?.subtasks.get(self.subtask)
    }

    /// All steps consumed.
    pub fn exhausted(&self, plan: &Plan) -> bool {
        self.step >= plan.steps.len()
    }

    /// Move to the next subtask of the current step. Returns false when
    /// the current step has no further subtasks.
    pub fn advance_subtask(&mut self, plan: &Plan) -> bool {
        let Some(step) = self.current_step(plan) else {
            return false;
        };
        if self.subtask + 1 < step.subtasks.len() {
            self.subtask += 1;
            true
        } else {
            false
        }
    }

    /// Move to the next step, resetting the subtask cursor.
    pub fn advance_step(&mut self, plan: &Plan) {
        if self.step < plan.steps.len() {
            self.step += 1;
            self.subtask = 0;
        }
    }

    /// Write completion state back onto the plan: every unit the cursor
    /// has moved past is marked completed, nested subtasks included.
    pub fn mark_progress(&self, plan: &mut Plan) {
        for (i, step) in plan.steps.iter_mut().enumerate() {
            if i < self.step {
                step.completed = true;
                for subtask in &mut step.subtasks {
                    subtask.mark_completed();
                }
            } else if i == self.step {
                for subtask in step.subtasks.iter_mut().take(self.subtask) {
                    subtask.mark_completed();
                }
            }
        }
    }
}
