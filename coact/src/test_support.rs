//! Test-only helpers: scripted executors for the snake game workflow.

use serde_json::{Value, json};

use crate::core::types::Operation;
use crate::io::config::CoactConfig;
pub use crate::io::script::{RecordedStep, ScriptedStep, ScriptedStepExecutor};

/// Root task used by the fixtures.
pub const SNAKE_TASK: &str = "Build a snake game";

/// Config with generous timeouts and default replan settings.
pub fn test_config() -> CoactConfig {
    CoactConfig {
        workflow_timeout_secs: 600,
        step_timeout_secs: 60,
        ..CoactConfig::default()
    }
}

/// The three-phase snake game plan, in document order.
pub fn snake_plan() -> Value {
    serde_json::from_str(
        r#"{"design": ["spec doc"], "implement": ["game loop", "collision"], "test": ["unit tests"]}"#,
    )
    .expect("plan json")
}

/// Script for a snake game run whose feedback never signals failure.
pub fn snake_game_script() -> ScriptedStepExecutor {
    ScriptedStepExecutor::new()
        .with(Operation::Decompose, json!(["design", "implement", "test"]))
        .with(Operation::Assign, snake_plan())
        .with(Operation::Execute, json!({"doc": "GAME.md"}))
        .with(Operation::CollectFeedback, json!({"doc": "complete"}))
        .with(Operation::Guide, json!("move on to the game loop"))
        .with(Operation::Execute, json!({"files": ["game_loop.rs"]}))
        .with(Operation::CollectFeedback, json!({"fps": 60}))
        .with(Operation::Guide, json!("handle walls next"))
        .with(Operation::Execute, json!({"files": ["collision.rs"]}))
        .with(Operation::CollectFeedback, json!({"collisions": "detected"}))
        .with(Operation::Guide, json!("cover it with tests"))
        .with(Operation::Execute, json!({"tests": 12}))
        .with(Operation::CollectFeedback, json!({"tests": "pass"}))
        .with(Operation::Guide, json!("done"))
}

/// Snake game run where `collision` reports an out-of-bounds error and the
/// planner replans with a single `bounds patch` subtask.
pub fn collision_fails_script() -> ScriptedStepExecutor {
    collision_fails_with(json!({"bounds": "clamped"}))
}

/// Like [`collision_fails_script`], with custom feedback for `bounds patch`.
pub fn collision_fails_with(patch_feedback: Value) -> ScriptedStepExecutor {
    ScriptedStepExecutor::new()
        .with(Operation::Decompose, json!(["design", "implement", "test"]))
        .with(Operation::Assign, snake_plan())
        .with(Operation::Execute, json!({"doc": "GAME.md"}))
        .with(Operation::CollectFeedback, json!({"doc": "complete"}))
        .with(Operation::Guide, json!("move on to the game loop"))
        .with(Operation::Execute, json!({"files": ["game_loop.rs"]}))
        .with(Operation::CollectFeedback, json!({"fps": 60}))
        .with(Operation::Guide, json!("handle walls next"))
        .with(Operation::Execute, json!({"files": ["collision.rs"]}))
        .with(Operation::CollectFeedback, json!("Error: out of bounds"))
        .with(Operation::Guide, json!({"hint": "clamp the head position"}))
        .with(Operation::Review, json!(["fix-bounds"]))
        .with(Operation::Assign, json!({"fix-bounds": ["bounds patch"]}))
        .with(Operation::Execute, json!({"patched": "bounds"}))
        .with(Operation::CollectFeedback, patch_feedback)
        .with(Operation::Execute, json!({"tests": 12}))
        .with(Operation::CollectFeedback, json!({"tests": "pass"}))
        .with(Operation::Guide, json!("done"))
}

/// Serialize a script in the `coact run --script` file format.
pub fn script_file_contents(operations: &[(Operation, Value)]) -> String {
    let mut map = serde_json::Map::new();
    for (operation, value) in operations {
        map.entry(operation.as_str())
            .or_insert_with(|| Value::Array(Vec::new()))
            .as_array_mut()
            .expect("answers array")
            .push(value.clone());
    }
    serde_json::to_string_pretty(&Value::Object(map)).expect("script json")
}
