//! Typed values exchanged between the planner, executor, and coordinator.
//!
//! The step executor answers with raw JSON. These types decode those answers
//! into the shapes the coordination loop depends on (ordered phases, an
//! ordered phase-to-subtasks plan) while keeping the raw value around for
//! `SharedState::outputs`.

use std::fmt;

use serde::de::{self, MapAccess, SeqAccess, Visitor};
use serde::{Deserialize, Deserializer, Serialize};
use serde_json::Value;
use tracing::warn;

use crate::error::CoactError;

/// Which side of the hierarchy a delegation belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AgentRole {
    Planner,
    Executor,
}

/// A single delegated operation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Operation {
    Decompose,
    Assign,
    Review,
    Guide,
    Execute,
    CollectFeedback,
}

impl Operation {
    pub const ALL: [Operation; 6] = [
        Operation::Decompose,
        Operation::Assign,
        Operation::Review,
        Operation::Guide,
        Operation::Execute,
        Operation::CollectFeedback,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            Operation::Decompose => "decompose",
            Operation::Assign => "assign",
            Operation::Review => "review",
            Operation::Guide => "guide",
            Operation::Execute => "execute",
            Operation::CollectFeedback => "collect_feedback",
        }
    }

    pub fn role(self) -> AgentRole {
        match self {
            Operation::Decompose | Operation::Assign | Operation::Review | Operation::Guide => {
                AgentRole::Planner
            }
            Operation::Execute | Operation::CollectFeedback => AgentRole::Executor,
        }
    }

    pub fn parse(name: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|op| op.as_str() == name)
    }
}

impl fmt::Display for Operation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Ordered phases produced by decomposition (or by a review that calls for a new plan).
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
#[serde(transparent)]
pub struct Phases(Vec<String>);

impl Phases {
    pub fn new<I, S>(phases: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self(phases.into_iter().map(Into::into).collect())
    }

    /// Decode phases from a collaborator value.
    ///
    /// Accepts an array (of strings or named objects) or an object with a
    /// `phases` array.
    pub fn from_value(operation: Operation, value: &Value) -> Result<Self, CoactError> {
        let items = match value {
            Value::Array(items) => items,
            Value::Object(map) => match map.get("phases") {
                Some(Value::Array(items)) => items,
                _ => return Err(malformed(operation, "expected a `phases` array")),
            },
            other => {
                return Err(malformed(
                    operation,
                    format!("expected an array of phases, got {}", kind(other)),
                ));
            }
        };
        items
            .iter()
            .map(|item| {
                item_text(item).ok_or_else(|| {
                    malformed(operation, format!("phase must be text, got {}", kind(item)))
                })
            })
            .collect::<Result<Vec<_>, _>>()
            .map(Self)
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn iter(&self) -> std::slice::Iter<'_, String> {
        self.0.iter()
    }

    pub fn to_value(&self) -> Value {
        Value::from(self.0.clone())
    }
}

impl<'a> IntoIterator for &'a Phases {
    type Item = &'a String;
    type IntoIter = std::slice::Iter<'a, String>;

    fn into_iter(self) -> Self::IntoIter {
        self.0.iter()
    }
}

/// Subtasks assigned to one phase.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PhaseTasks {
    pub phase: String,
    pub subtasks: Vec<String>,
}

/// Ordered mapping from phase to its ordered subtasks.
///
/// Order is the order the phases appear in the collaborator's JSON object;
/// subtasks execute in exactly this order.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TaskPlan(Vec<PhaseTasks>);

impl TaskPlan {
    pub fn new(phases: Vec<PhaseTasks>) -> Self {
        Self(phases)
    }

    /// Decode a task plan from a collaborator value.
    ///
    /// Accepts `{phase: [subtask, ...], ...}` or `{"tasks": {...}}`.
    pub fn from_value(operation: Operation, value: &Value) -> Result<Self, CoactError> {
        let target = match value {
            Value::Object(map) if map.len() == 1 => match map.get("tasks") {
                Some(inner @ Value::Object(_)) => inner,
                _ => value,
            },
            other => other,
        };
        TaskPlan::deserialize(target).map_err(|err| malformed(operation, err.to_string()))
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// Number of subtasks across all phases.
    pub fn subtask_count(&self) -> usize {
        self.0.iter().map(|phase| phase.subtasks.len()).sum()
    }

    pub fn phases(&self) -> &[PhaseTasks] {
        &self.0
    }

    /// Iterate `(phase, subtask)` pairs in execution order.
    pub fn subtasks(&self) -> impl Iterator<Item = (&str, &str)> {
        self.0.iter().flat_map(|phase| {
            phase
                .subtasks
                .iter()
                .map(move |subtask| (phase.phase.as_str(), subtask.as_str()))
        })
    }

    pub fn to_value(&self) -> Value {
        let mut map = serde_json::Map::new();
        for phase in &self.0 {
            map.insert(phase.phase.clone(), Value::from(phase.subtasks.clone()));
        }
        Value::Object(map)
    }
}

impl<'de> Deserialize<'de> for TaskPlan {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        struct PlanVisitor;

        impl<'de> Visitor<'de> for PlanVisitor {
            type Value = TaskPlan;

            fn expecting(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                f.write_str("an object mapping phase to a list of subtasks")
            }

            fn visit_map<A: MapAccess<'de>>(self, mut access: A) -> Result<TaskPlan, A::Error> {
                let mut phases = Vec::new();
                while let Some((phase, subtasks)) = access.next_entry::<String, SubtaskList>()? {
                    phases.push(PhaseTasks {
                        phase,
                        subtasks: subtasks.0,
                    });
                }
                Ok(TaskPlan(phases))
            }
        }

        deserializer.deserialize_map(PlanVisitor)
    }
}

struct SubtaskList(Vec<String>);

impl<'de> Deserialize<'de> for SubtaskList {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        struct ListVisitor;

        impl<'de> Visitor<'de> for ListVisitor {
            type Value = SubtaskList;

            fn expecting(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                f.write_str("a list of subtasks")
            }

            fn visit_seq<A: SeqAccess<'de>>(self, mut seq: A) -> Result<SubtaskList, A::Error> {
                let mut subtasks = Vec::new();
                while let Some(item) = seq.next_element::<Value>()? {
                    let text = item_text(&item).ok_or_else(|| {
                        de::Error::custom(format!("subtask must be text, got {}", kind(&item)))
                    })?;
                    subtasks.push(text);
                }
                Ok(SubtaskList(subtasks))
            }
        }

        deserializer.deserialize_seq(ListVisitor)
    }
}

/// Feedback collected for one subtask result.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Feedback(Value);

impl Feedback {
    /// Key used when non-object feedback is merged into metrics.
    pub const SCALAR_KEY: &'static str = "feedback";

    pub fn new(value: Value) -> Self {
        Self(value)
    }

    pub fn value(&self) -> &Value {
        &self.0
    }

    /// Key/value pairs this feedback contributes to the metrics record.
    pub fn metric_entries(&self) -> Vec<(String, Value)> {
        match &self.0 {
            Value::Object(map) => map.iter().map(|(k, v)| (k.clone(), v.clone())).collect(),
            other => vec![(Self::SCALAR_KEY.to_string(), other.clone())],
        }
    }
}

impl From<Value> for Feedback {
    fn from(value: Value) -> Self {
        Self(value)
    }
}

/// A planner review of failing feedback.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ReviewDecision(Value);

impl ReviewDecision {
    pub fn new(value: Value) -> Self {
        Self(value)
    }

    pub fn value(&self) -> &Value {
        &self.0
    }

    /// Phases the review asks to plan next; empty means "keep the current plan".
    ///
    /// A decision with no readable phases (`true`, `{"replan": true}`, a list
    /// of numbers) keeps the plan as well.
    pub fn new_phases(&self) -> Phases {
        match &self.0 {
            Value::Null | Value::Bool(_) => Phases::default(),
            Value::String(text) if text.trim().is_empty() => Phases::default(),
            Value::String(text) => Phases::new([text.trim()]),
            Value::Object(map) if !map.contains_key("phases") => {
                if map.get("replan").is_some_and(|flag| flag != &Value::Bool(false)) {
                    warn!(decision = %self.0, "review asked to replan without naming phases");
                }
                Phases::default()
            }
            other => Phases::from_value(Operation::Review, other).unwrap_or_else(|err| {
                warn!(error = %err, "unreadable review decision, keeping the current plan");
                Phases::default()
            }),
        }
    }
}

fn item_text(item: &Value) -> Option<String> {
    match item {
        Value::String(text) => Some(text.clone()),
        Value::Object(map) => ["name", "title", "phase", "description"]
            .iter()
            .find_map(|key| map.get(*key).and_then(Value::as_str))
            .map(str::to_string),
        _ => None,
    }
}

fn kind(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "a boolean",
        Value::Number(_) => "a number",
        Value::String(_) => "a string",
        Value::Array(_) => "an array",
        Value::Object(_) => "an object",
    }
}

fn malformed(operation: Operation, reason: impl Into<String>) -> CoactError {
    CoactError::MalformedOutput {
        operation,
        reason: reason.into(),
    }
}
