//! Scripted step executor: replays queued answers per operation.
//!
//! Used by tests and by `coact run --script` for dry runs of a plan without
//! any agent behind it.

use std::cell::RefCell;
use std::collections::{BTreeMap, VecDeque};
use std::fs;
use std::path::Path;

use anyhow::{Context, Result, anyhow, bail};
use serde_json::Value;
use tracing::debug;

use crate::core::types::Operation;
use crate::io::step_executor::{StepExecutor, StepRequest};

/// Key that marks a scripted answer as a delegation failure: `{"$error": "msg"}`.
pub const ERROR_KEY: &str = "$error";

/// One queued answer.
#[derive(Debug, Clone, PartialEq)]
pub enum ScriptedStep {
    Respond(Value),
    Fail(String),
}

impl From<Value> for ScriptedStep {
    fn from(value: Value) -> Self {
        if let Value::Object(map) = &value
            && map.len() == 1
            && let Some(message) = map.get(ERROR_KEY)
        {
            return ScriptedStep::Fail(
                message
                    .as_str()
                    .map(str::to_string)
                    .unwrap_or_else(|| message.to_string()),
            );
        }
        ScriptedStep::Respond(value)
    }
}

/// What the scripted executor saw for one delegation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RecordedStep {
    pub operation: Operation,
    pub prompt: String,
    pub iteration: u64,
    pub local_iteration: u64,
}

/// Step executor that answers from per-operation FIFO queues.
#[derive(Debug, Default)]
pub struct ScriptedStepExecutor {
    queues: RefCell<BTreeMap<Operation, VecDeque<ScriptedStep>>>,
    seen: RefCell<Vec<RecordedStep>>,
}

impl ScriptedStepExecutor {
    pub fn new() -> Self {
        Self::default()
    }

    /// Queue an answer for `operation`.
    pub fn push(&self, operation: Operation, step: impl Into<ScriptedStep>) -> &Self {
        self.queues
            .borrow_mut()
            .entry(operation)
            .or_default()
            .push_back(step.into());
        self
    }

    /// Builder form of [`ScriptedStepExecutor::push`].
    pub fn with(self, operation: Operation, step: impl Into<ScriptedStep>) -> Self {
        self.push(operation, step);
        self
    }

    /// Load a script file: `{"decompose": [...], "assign": [...], ...}`.
    pub fn from_file(path: &Path) -> Result<Self> {
        let contents =
            fs::read_to_string(path).with_context(|| format!("read script {}", path.display()))?;
        let value: Value = serde_json::from_str(&contents)
            .with_context(|| format!("parse script {}", path.display()))?;
        Self::from_value(&value).with_context(|| format!("load script {}", path.display()))
    }

    pub fn from_value(value: &Value) -> Result<Self> {
        let Value::Object(map) = value else {
            bail!("script must be an object keyed by operation");
        };
        let script = Self::new();
        for (name, answers) in map {
            let operation =
                Operation::parse(name).ok_or_else(|| anyhow!("unknown operation '{name}'"))?;
            let Value::Array(answers) = answers else {
                bail!("answers for '{name}' must be an array");
            };
            for answer in answers {
                script.push(operation, answer.clone());
            }
        }
        Ok(script)
    }

    /// Every delegation seen so far, in order.
    pub fn seen(&self) -> Vec<RecordedStep> {
        self.seen.borrow().clone()
    }

    /// Operations seen so far, in order.
    pub fn operations(&self) -> Vec<Operation> {
        self.seen.borrow().iter().map(|step| step.operation).collect()
    }

    /// Answers still queued for `operation`.
    pub fn remaining(&self, operation: Operation) -> usize {
        self.queues
            .borrow()
            .get(&operation)
            .map_or(0, VecDeque::len)
    }
}

impl StepExecutor for ScriptedStepExecutor {
    fn step(&self, request: &StepRequest<'_>) -> Result<Value> {
        self.seen.borrow_mut().push(RecordedStep {
            operation: request.operation,
            prompt: request.prompt().to_string(),
            iteration: request.state.iteration(),
            local_iteration: request.state.local_iteration(),
        });
        let next = self
            .queues
            .borrow_mut()
            .get_mut(&request.operation)
            .and_then(VecDeque::pop_front);
        debug!(operation = %request.operation, found = next.is_some(), "scripted step");
        match next {
            Some(ScriptedStep::Respond(value)) => Ok(value),
            Some(ScriptedStep::Fail(message)) => Err(anyhow!(message)),
            None => Err(anyhow!(
                "script has no answer left for {}",
                request.operation
            )),
        }
    }
}
