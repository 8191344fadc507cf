//! Executor agent: runs subtasks, collects feedback, and decides on replans.

use anyhow::Result;
use serde_json::Value;
use tracing::{debug, info, instrument};

use crate::core::signal::{FeedbackSignal, classify_feedback};
use crate::core::state::{InputKey, OutputKey, SharedState};
use crate::core::types::{Feedback, Operation, TaskPlan};
use crate::error::CoactError;
use crate::io::config::ReplanConfig;
use crate::io::prompt::{PromptInputs, PromptKind};
use crate::io::step_executor::StepExecutor;

use super::Delegation;
use super::planner::Planner;

/// Low-level execution side of the hierarchy.
///
/// `execute` and `collect_feedback` each count one `local_iteration`.
/// `maybe_replan` only records its inputs and consults the planner.
#[derive(Debug)]
pub struct Executor<'a, E: ?Sized> {
    delegation: Delegation<'a, E>,
    replan: &'a ReplanConfig,
}

impl<'a, E: StepExecutor + ?Sized> Executor<'a, E> {
    pub fn new(delegation: Delegation<'a, E>, replan: &'a ReplanConfig) -> Self {
        Self { delegation, replan }
    }

    #[instrument(skip_all, fields(subtask = %subtask))]
    pub fn execute(&self, state: &mut SharedState, subtask: &str) -> Result<Value> {
        if subtask.trim().is_empty() {
            return Err(CoactError::EmptyInput { what: "subtask" }.into());
        }
        state.record_input(InputKey::Subtask, subtask);
        let inputs = PromptInputs::from_state(state, Value::from(subtask));
        let value = self.delegation.delegate(state, Operation::Execute, &inputs)?;
        state.outputs.set(OutputKey::Result, value.clone());
        Ok(value)
    }

    #[instrument(skip_all)]
    pub fn collect_feedback(&self, state: &mut SharedState, result: &Value) -> Result<Feedback> {
        state.record_input(InputKey::Result, result.clone());
        let inputs = PromptInputs::from_state(state, result.clone());
        let value = self
            .delegation
            .delegate(state, Operation::CollectFeedback, &inputs)?;
        state.outputs.set(OutputKey::Feedback, value.clone());
        Ok(Feedback::new(value))
    }

    /// Ask the planner for a new plan when `feedback` signals failure.
    ///
    /// Returns `Some(plan)` only when the review names at least one phase; the
    /// assigned plan itself may be empty.
    #[instrument(skip_all)]
    pub fn maybe_replan(
        &self,
        state: &mut SharedState,
        feedback: &Feedback,
        guidance: &Value,
        planner: &Planner<'_, E>,
    ) -> Result<Option<TaskPlan>> {
        state.record_input(InputKey::ReplanFeedback, feedback.value().clone());
        state.record_input(InputKey::Guidance, guidance.clone());
        let inputs =
            PromptInputs::from_state(state, feedback.value().clone()).with_context(guidance.clone());
        let prompt = self.delegation.render(PromptKind::Replan, &inputs)?;
        state.record_input(InputKey::Prompt, prompt);

        let signal = classify_feedback(feedback, self.replan.trigger, &self.replan.sentinel);
        if signal == FeedbackSignal::Success {
            debug!("feedback does not signal failure");
            return Ok(None);
        }

        info!("feedback signals failure, requesting review");
        let decision = planner.review(state, feedback)?;
        let phases = decision.new_phases();
        if phases.is_empty() {
            info!("review kept the current plan");
            return Ok(None);
        }
        let plan = planner.assign(state, &phases)?;
        state.outputs.set(OutputKey::ReplanTasks, plan.to_value());
        info!(subtasks = plan.subtask_count(), "replanned");
        Ok(Some(plan))
    }
}
