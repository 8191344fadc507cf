//! The shared mutable record threaded through a workflow run.
//!
//! The coordinator owns one [`SharedState`] per run and lends it to the
//! planner and executor by `&mut` for the duration of each operation. There is
//! no other path to it.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::core::types::Feedback;
use crate::error::CoactError;

/// Scratch inputs an operation records before it delegates.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum InputKey {
    Task,
    Prompt,
    Phases,
    Feedback,
    GuidanceFeedback,
    ReplanFeedback,
    Guidance,
    Subtask,
    Result,
}

/// Named outputs written by planner and executor operations.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OutputKey {
    Phases,
    Tasks,
    Result,
    Feedback,
    Guidance,
    ReviewDecision,
    ReplanTasks,
}

/// Overall run status. Moves from `Running` to `Finished` once.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AgentState {
    #[default]
    Running,
    Finished,
}

/// Where the coordinator is in the workflow state machine.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum WorkflowStage {
    #[default]
    Pending,
    Running,
    Replanning,
    Finished,
}

/// Operation outputs plus per-subtask results.
///
/// Entries may be overwritten by later operations but are never removed.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Outputs {
    #[serde(flatten)]
    named: BTreeMap<OutputKey, Value>,
    /// Results keyed by subtask text, in first-execution order.
    results: Map<String, Value>,
}

impl Outputs {
    pub fn get(&self, key: OutputKey) -> Option<&Value> {
        self.named.get(&key)
    }

    pub fn set(&mut self, key: OutputKey, value: Value) {
        self.named.insert(key, value);
    }

    pub fn result_for(&self, subtask: &str) -> Option<&Value> {
        self.results.get(subtask)
    }

    pub fn record_result(&mut self, subtask: &str, result: Value) {
        self.results.insert(subtask.to_string(), result);
    }

    pub fn results(&self) -> &Map<String, Value> {
        &self.results
    }
}

/// Accumulated feedback entries. Later values win; keys are never deleted.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Metrics(Map<String, Value>);

impl Metrics {
    pub fn merge(&mut self, feedback: &Feedback) {
        for (key, value) in feedback.metric_entries() {
            self.0.insert(key, value);
        }
    }

    pub fn get(&self, key: &str) -> Option<&Value> {
        self.0.get(key)
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn keys(&self) -> impl Iterator<Item = &str> {
        self.0.keys().map(String::as_str)
    }
}

/// Single mutable record for one workflow run.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SharedState {
    root_task: Option<String>,
    pub inputs: BTreeMap<InputKey, Value>,
    pub outputs: Outputs,
    iteration: u64,
    local_iteration: u64,
    pub metrics: Metrics,
    agent_state: AgentState,
    stage: WorkflowStage,
}

impl SharedState {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn root_task(&self) -> Option<&str> {
        self.root_task.as_deref()
    }

    /// Set the root task. Write-once.
    pub fn set_root_task(&mut self, task: &str) -> Result<(), CoactError> {
        if self.root_task.is_some() {
            return Err(CoactError::RootTaskAlreadySet);
        }
        self.root_task = Some(task.to_string());
        self.stage = WorkflowStage::Running;
        Ok(())
    }

    pub fn record_input(&mut self, key: InputKey, value: impl Into<Value>) {
        self.inputs.insert(key, value.into());
    }

    pub fn input(&self, key: InputKey) -> Option<&Value> {
        self.inputs.get(&key)
    }

    /// The prompt of the most recent delegation, if any.
    pub fn prompt(&self) -> Option<&str> {
        self.input(InputKey::Prompt).and_then(Value::as_str)
    }

    pub fn iteration(&self) -> u64 {
        self.iteration
    }

    pub fn local_iteration(&self) -> u64 {
        self.local_iteration
    }

    /// Count one planner delegation.
    pub fn bump_iteration(&mut self) -> u64 {
        self.iteration += 1;
        self.iteration
    }

    /// Count one executor delegation.
    pub fn bump_local_iteration(&mut self) -> u64 {
        self.local_iteration += 1;
        self.local_iteration
    }

    pub fn agent_state(&self) -> AgentState {
        self.agent_state
    }

    pub fn stage(&self) -> WorkflowStage {
        self.stage
    }

    /// Enter or leave the transient replanning stage.
    pub fn set_replanning(&mut self, replanning: bool) {
        if self.stage == WorkflowStage::Finished {
            return;
        }
        self.stage = if replanning {
            WorkflowStage::Replanning
        } else {
            WorkflowStage::Running
        };
    }

    /// Mark the run finished. Allowed exactly once.
    pub fn finish(&mut self) -> Result<(), CoactError> {
        if self.agent_state == AgentState::Finished {
            return Err(CoactError::AlreadyFinished);
        }
        self.agent_state = AgentState::Finished;
        self.stage = WorkflowStage::Finished;
        Ok(())
    }
}
