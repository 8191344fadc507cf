//! Planner agent: decomposes the root task, assigns subtasks, and reviews feedback.

use anyhow::Result;
use serde_json::Value;
use tracing::{info, instrument};

use crate::core::state::{InputKey, OutputKey, SharedState};
use crate::core::types::{Feedback, Operation, Phases, ReviewDecision, TaskPlan};
use crate::error::CoactError;
use crate::io::prompt::PromptInputs;
use crate::io::step_executor::StepExecutor;

use super::Delegation;

/// High-level planning side of the hierarchy.
///
/// Every operation records its argument, counts one `iteration`, delegates,
/// and stores the raw answer under its output key before decoding it.
#[derive(Debug)]
pub struct Planner<'a, E: ?Sized> {
    delegation: Delegation<'a, E>,
}

impl<'a, E: StepExecutor + ?Sized> Planner<'a, E> {
    pub fn new(delegation: Delegation<'a, E>) -> Self {
        Self { delegation }
    }

    /// Break `task` into ordered phases.
    #[instrument(skip_all)]
    pub fn decompose(&self, state: &mut SharedState, task: &str) -> Result<Phases> {
        if task.trim().is_empty() {
            return Err(CoactError::EmptyInput { what: "task" }.into());
        }
        state.record_input(InputKey::Task, task);
        let inputs = PromptInputs::from_state(state, Value::from(task));
        let value = self
            .delegation
            .delegate(state, Operation::Decompose, &inputs)?;
        state.outputs.set(OutputKey::Phases, value.clone());

        let phases = Phases::from_value(Operation::Decompose, &value)?;
        if phases.is_empty() {
            return Err(CoactError::EmptyPlan {
                reason: "decompose returned no phases".to_string(),
            }
            .into());
        }
        info!(phases = phases.len(), "task decomposed");
        Ok(phases)
    }

    /// Map each phase to its ordered subtasks.
    #[instrument(skip_all, fields(phases = phases.len()))]
    pub fn assign(&self, state: &mut SharedState, phases: &Phases) -> Result<TaskPlan> {
        if phases.is_empty() {
            return Err(CoactError::EmptyPlan {
                reason: "no phases to assign".to_string(),
            }
            .into());
        }
        state.record_input(InputKey::Phases, phases.to_value());
        let inputs = PromptInputs::from_state(state, phases.to_value());
        let value = self.delegation.delegate(state, Operation::Assign, &inputs)?;
        state.outputs.set(OutputKey::Tasks, value.clone());

        let plan = TaskPlan::from_value(Operation::Assign, &value)?;
        info!(subtasks = plan.subtask_count(), "subtasks assigned");
        Ok(plan)
    }

    /// Review failing feedback; the decision may name new phases.
    #[instrument(skip_all)]
    pub fn review(&self, state: &mut SharedState, feedback: &Feedback) -> Result<ReviewDecision> {
        state.record_input(InputKey::Feedback, feedback.value().clone());
        let inputs = PromptInputs::from_state(state, feedback.value().clone());
        let value = self.delegation.delegate(state, Operation::Review, &inputs)?;
        state.outputs.set(OutputKey::ReviewDecision, value.clone());
        Ok(ReviewDecision::new(value))
    }

    /// Produce guidance for the executor. Guidance is opaque.
    #[instrument(skip_all)]
    pub fn guide(&self, state: &mut SharedState, feedback: &Feedback) -> Result<Value> {
        state.record_input(InputKey::GuidanceFeedback, feedback.value().clone());
        let inputs = PromptInputs::from_state(state, feedback.value().clone());
        let value = self.delegation.delegate(state, Operation::Guide, &inputs)?;
        state.outputs.set(OutputKey::Guidance, value.clone());
        Ok(value)
    }
}
