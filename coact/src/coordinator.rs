//! Workflow coordinator: decompose, assign, then run every subtask through
//! execute, feedback, guidance, and an optional replan.

use anyhow::Result;
use serde::Serialize;
use tracing::{info, instrument, warn};

use crate::agents::Delegation;
use crate::agents::executor::Executor;
use crate::agents::planner::Planner;
use crate::core::budget::{Budget, CancelToken};
use crate::core::signal::{FeedbackSignal, classify_feedback};
use crate::core::state::{AgentState, SharedState};
use crate::error::CoactError;
use crate::io::config::CoactConfig;
use crate::io::prompt::PromptBuilder;
use crate::io::step_executor::StepExecutor;

/// Progress notifications emitted while a workflow runs.
#[derive(Debug, Clone, PartialEq)]
pub enum WorkflowEvent<'a> {
    PlanReady {
        phases: usize,
        subtasks: usize,
    },
    SubtaskStarted {
        phase: &'a str,
        subtask: &'a str,
        depth: u32,
    },
    SubtaskFinished {
        phase: &'a str,
        subtask: &'a str,
        depth: u32,
        signal: FeedbackSignal,
    },
    Replanned {
        after: &'a str,
        subtasks: usize,
        depth: u32,
    },
    Finished {
        executions: u64,
        replans: u64,
    },
}

/// Summary of a finished run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct RunReport {
    /// Subtask executions, replanned ones included.
    pub executions: u64,
    pub replans: u64,
    pub iteration: u64,
    pub local_iteration: u64,
    pub agent_state: AgentState,
}

/// Owns the shared state for one run and drives the planner and executor.
#[derive(Debug)]
pub struct Coordinator<E> {
    step: E,
    config: CoactConfig,
    prompts: PromptBuilder,
    budget: Option<Budget>,
    cancel: CancelToken,
    state: SharedState,
}

impl<E: StepExecutor> Coordinator<E> {
    pub fn new(step: E, config: CoactConfig) -> Self {
        let prompts = PromptBuilder::new(config.prompt_budget_bytes);
        Self {
            step,
            config,
            prompts,
            budget: None,
            cancel: CancelToken::new(),
            state: SharedState::new(),
        }
    }

    /// Use an explicit budget instead of one derived from the config at start.
    pub fn with_budget(mut self, budget: Budget) -> Self {
        self.cancel = budget.cancel_token().clone();
        self.budget = Some(budget);
        self
    }

    /// Token that stops the run before its next delegation.
    pub fn cancel_token(&self) -> CancelToken {
        self.cancel.clone()
    }

    pub fn state(&self) -> &SharedState {
        &self.state
    }

    pub fn into_state(self) -> SharedState {
        self.state
    }

    pub fn step_executor(&self) -> &E {
        &self.step
    }

    pub fn execute_workflow(&mut self, main_task: &str) -> Result<RunReport> {
        self.execute_workflow_with(main_task, |_| {})
    }

    /// Run the whole workflow for `main_task`, reporting progress to `on_event`.
    ///
    /// Any error leaves `agent_state` at `Running`.
    #[instrument(skip_all)]
    pub fn execute_workflow_with<F>(&mut self, main_task: &str, mut on_event: F) -> Result<RunReport>
    where
        F: FnMut(&WorkflowEvent<'_>),
    {
        let outcome = self.run(main_task, &mut on_event);
        if let Err(err) = &outcome {
            warn!(
                error = %format!("{err:#}"),
                iteration = self.state.iteration(),
                local_iteration = self.state.local_iteration(),
                "workflow stopped"
            );
        }
        outcome
    }

    fn run<F>(&mut self, main_task: &str, on_event: &mut F) -> Result<RunReport>
    where
        F: FnMut(&WorkflowEvent<'_>),
    {
        if main_task.trim().is_empty() {
            return Err(CoactError::EmptyInput { what: "task" }.into());
        }
        self.state.set_root_task(main_task)?;
        info!(task = main_task, "workflow started");

        let budget = self.budget.clone().unwrap_or_else(|| {
            Budget::starting_now(
                self.config.workflow_timeout(),
                self.config.step_timeout(),
                self.cancel.clone(),
            )
        });
        let delegation = Delegation::new(&self.step, &self.prompts, &budget);
        let mut pass = Pass {
            planner: Planner::new(delegation),
            executor: Executor::new(delegation, &self.config.replan),
            config: &self.config,
            state: &mut self.state,
            on_event,
            executions: 0,
            replans: 0,
        };

        let phases = pass.planner.decompose(pass.state, main_task)?;
        let plan = pass.planner.assign(pass.state, &phases)?;
        if plan.subtask_count() == 0 {
            return Err(CoactError::EmptyPlan {
                reason: "initial plan has no subtasks".to_string(),
            }
            .into());
        }
        (pass.on_event)(&WorkflowEvent::PlanReady {
            phases: plan.phases().len(),
            subtasks: plan.subtask_count(),
        });

        for (phase, subtask) in plan.subtasks() {
            pass.run_subtask(phase, subtask, 0)?;
        }

        let (executions, replans) = (pass.executions, pass.replans);
        pass.state.finish()?;
        (pass.on_event)(&WorkflowEvent::Finished {
            executions,
            replans,
        });
        info!(executions, replans, "workflow finished");
        Ok(RunReport {
            executions,
            replans,
            iteration: pass.state.iteration(),
            local_iteration: pass.state.local_iteration(),
            agent_state: pass.state.agent_state(),
        })
    }
}

/// One walk over a plan, borrowing everything the agents need.
struct Pass<'a, E, F> {
    planner: Planner<'a, E>,
    executor: Executor<'a, E>,
    config: &'a CoactConfig,
    state: &'a mut SharedState,
    on_event: &'a mut F,
    executions: u64,
    replans: u64,
}

impl<E, F> Pass<'_, E, F>
where
    E: StepExecutor,
    F: FnMut(&WorkflowEvent<'_>),
{
    /// Execute one subtask. Below `replan.max_depth` the subtask also gets
    /// guidance and a replan decision; a replanned pass runs one level deeper.
    fn run_subtask(&mut self, phase: &str, subtask: &str, depth: u32) -> Result<()> {
        (self.on_event)(&WorkflowEvent::SubtaskStarted {
            phase,
            subtask,
            depth,
        });
        let result = self.executor.execute(self.state, subtask)?;
        self.state.outputs.record_result(subtask, result.clone());
        let feedback = self.executor.collect_feedback(self.state, &result)?;
        self.state.metrics.merge(&feedback);
        self.executions += 1;

        let signal = classify_feedback(
            &feedback,
            self.config.replan.trigger,
            &self.config.replan.sentinel,
        );
        (self.on_event)(&WorkflowEvent::SubtaskFinished {
            phase,
            subtask,
            depth,
            signal,
        });

        if depth >= self.config.replan.max_depth {
            return Ok(());
        }

        let guidance = self.planner.guide(self.state, &feedback)?;
        let Some(replan) =
            self.executor
                .maybe_replan(self.state, &feedback, &guidance, &self.planner)?
        else {
            return Ok(());
        };

        self.replans += 1;
        (self.on_event)(&WorkflowEvent::Replanned {
            after: subtask,
            subtasks: replan.subtask_count(),
            depth,
        });
        info!(
            after = subtask,
            subtasks = replan.subtask_count(),
            depth,
            "running replanned subtasks"
        );
        self.state.set_replanning(true);
        for (replan_phase, replan_subtask) in replan.subtasks() {
            self.run_subtask(replan_phase, replan_subtask, depth + 1)?;
        }
        self.state.set_replanning(depth > 0);
        Ok(())
    }
}
