//! Planner and executor agents.
//!
//! Both sides delegate through the same [`Delegation`]: render the prompt,
//! record it, count the step, and hand the state to the step executor.

use anyhow::{Context, Result};
use serde_json::Value;
use tracing::{debug, instrument};

use crate::core::budget::Budget;
use crate::core::state::{InputKey, SharedState};
use crate::core::types::{AgentRole, Operation};
use crate::io::prompt::{PromptBuilder, PromptInputs, PromptKind};
use crate::io::step_executor::{StepExecutor, StepRequest};

pub mod executor;
pub mod planner;

/// Everything an agent needs to delegate one operation.
#[derive(Debug)]
pub struct Delegation<'a, E: ?Sized> {
    step: &'a E,
    prompts: &'a PromptBuilder,
    budget: &'a Budget,
}

impl<E: ?Sized> Clone for Delegation<'_, E> {
    fn clone(&self) -> Self {
        *self
    }
}

impl<E: ?Sized> Copy for Delegation<'_, E> {}

impl<'a, E: StepExecutor + ?Sized> Delegation<'a, E> {
    pub fn new(step: &'a E, prompts: &'a PromptBuilder, budget: &'a Budget) -> Self {
        Self {
            step,
            prompts,
            budget,
        }
    }

    /// Render a prompt without delegating it.
    pub(crate) fn render(&self, kind: PromptKind, inputs: &PromptInputs) -> Result<String> {
        let pack = self
            .prompts
            .build(kind, inputs)
            .with_context(|| format!("render {} prompt", kind_name(kind)))?;
        Ok(pack.into_string())
    }

    /// Record the prompt, count the step, and delegate `operation`.
    ///
    /// Budget exhaustion is checked first, so an interrupted step leaves the
    /// counters untouched.
    #[instrument(skip_all, fields(operation = %operation))]
    pub(crate) fn delegate(
        &self,
        state: &mut SharedState,
        operation: Operation,
        inputs: &PromptInputs,
    ) -> Result<Value> {
        let timeout = self.budget.next_step_timeout(operation)?;
        let prompt = self.render(PromptKind::Step(operation), inputs)?;
        state.record_input(InputKey::Prompt, prompt);
        let count = match operation.role() {
            AgentRole::Planner => state.bump_iteration(),
            AgentRole::Executor => state.bump_local_iteration(),
        };
        debug!(count, timeout_secs = timeout.as_secs(), "delegating");

        let request = StepRequest::new(operation, state, timeout);
        self.step
            .step(&request)
            .with_context(|| format!("delegate {operation}"))
    }
}

fn kind_name(kind: PromptKind) -> &'static str {
    match kind {
        PromptKind::Step(operation) => operation.as_str(),
        PromptKind::Replan => "replan",
    }
}
