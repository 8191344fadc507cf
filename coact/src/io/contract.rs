//! Output contracts (JSON Schema) for delegated steps.
//!
//! The schema for an operation is handed to the external agent and checked
//! against its answer before the answer reaches the planner or executor.

use anyhow::{Context, Result, bail};
use jsonschema::Draft;
use serde_json::Value;

use crate::core::types::Operation;

const DECOMPOSE_SCHEMA: &str = include_str!("../../schemas/decompose.schema.json");
const ASSIGN_SCHEMA: &str = include_str!("../../schemas/assign.schema.json");
const REVIEW_SCHEMA: &str = include_str!("../../schemas/review.schema.json");
const GUIDE_SCHEMA: &str = include_str!("../../schemas/guide.schema.json");
const EXECUTE_SCHEMA: &str = include_str!("../../schemas/execute.schema.json");
const COLLECT_FEEDBACK_SCHEMA: &str = include_str!("../../schemas/collect_feedback.schema.json");

/// Raw schema text for `operation`.
pub fn output_schema(operation: Operation) -> &'static str {
    match operation {
        Operation::Decompose => DECOMPOSE_SCHEMA,
        Operation::Assign => ASSIGN_SCHEMA,
        Operation::Review => REVIEW_SCHEMA,
        Operation::Guide => GUIDE_SCHEMA,
        Operation::Execute => EXECUTE_SCHEMA,
        Operation::CollectFeedback => COLLECT_FEEDBACK_SCHEMA,
    }
}

/// Validate an operation's output against its schema (Draft 2020-12).
pub fn validate_output(operation: Operation, instance: &Value) -> Result<()> {
    let schema: Value = serde_json::from_str(output_schema(operation))
        .with_context(|| format!("parse {operation} output schema"))?;
    validate_schema(instance, &schema)
        .with_context(|| format!("{operation} output violates its contract"))
}

fn validate_schema(instance: &Value, schema: &Value) -> Result<()> {
    let compiled = jsonschema::options()
        .with_draft(Draft::Draft202012)
        .build(schema)
        .context("compile json schema")?;
    let messages: Vec<String> = compiled
        .iter_errors(instance)
        .map(|err| err.to_string())
        .collect();
    if !messages.is_empty() {
        bail!("schema validation failed:\n- {}", messages.join("\n- "));
    }
    Ok(())
}
