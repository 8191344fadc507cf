//! CLI tests for `coact init` and `coact run`.
//!
//! Spawns the coact binary against a scripted step executor and verifies
//! printed progress, snapshots, and exit codes.

use std::fs;
use std::path::Path;
use std::process::{Command, Output};

use coact::core::state::AgentState;
use coact::core::types::Operation;
use coact::exit_codes;
use coact::io::config::load_config;
use coact::io::snapshot::load_state;
use coact::test_support::{SNAKE_TASK, script_file_contents, snake_plan};
use serde_json::json;

fn coact(dir: &Path, args: &[&str]) -> Output {
    Command::new(env!("CARGO_BIN_EXE_coact"))
        .current_dir(dir)
        .args(args)
        .output()
        .expect("spawn coact")
}

fn write_script(dir: &Path, operations: &[(Operation, serde_json::Value)]) {
    fs::write(dir.join("script.json"), script_file_contents(operations)).expect("write script");
}

#[test]
fn init_writes_default_config_once() {
    let temp = tempfile::tempdir().expect("tempdir");

    let output = coact(temp.path(), &["init"]);
    assert_eq!(output.status.code(), Some(exit_codes::OK));
    let cfg = load_config(&temp.path().join(".coact/config.toml")).expect("config");
    assert_eq!(cfg.replan.max_depth, 1);

    let output = coact(temp.path(), &["init"]);
    assert_eq!(output.status.code(), Some(exit_codes::INVALID));
    let output = coact(temp.path(), &["init", "--force"]);
    assert_eq!(output.status.code(), Some(exit_codes::OK));
}

#[test]
fn scripted_run_finishes_and_writes_state() {
    let temp = tempfile::tempdir().expect("tempdir");
    write_script(
        temp.path(),
        &[
            (Operation::Decompose, json!(["design", "implement", "test"])),
            (Operation::Assign, snake_plan()),
            (Operation::Execute, json!("doc")),
            (Operation::Execute, json!("loop")),
            (Operation::Execute, json!("collision")),
            (Operation::Execute, json!("tests")),
            (Operation::CollectFeedback, json!({"doc": "ok"})),
            (Operation::CollectFeedback, json!({"fps": 60})),
            (Operation::CollectFeedback, json!({"walls": "solid"})),
            (Operation::CollectFeedback, json!({"tests": "pass"})),
            (Operation::Guide, json!("next")),
            (Operation::Guide, json!("next")),
            (Operation::Guide, json!("next")),
            (Operation::Guide, json!("done")),
        ],
    );

    let output = coact(
        temp.path(),
        &[
            "run",
            SNAKE_TASK,
            "--script",
            "script.json",
            "--state-out",
            "out/state.json",
        ],
    );
    let stdout = String::from_utf8_lossy(&output.stdout);
    assert_eq!(output.status.code(), Some(exit_codes::OK), "stdout: {stdout}");
    assert!(stdout.contains("plan: 3 phases, 4 subtasks"));
    assert!(stdout.contains("[implement] collision"));
    assert!(stdout.contains("finished: 4 executions, 0 replans"));

    let state = load_state(&temp.path().join("out/state.json")).expect("state");
    assert_eq!(state.agent_state(), AgentState::Finished);
    assert_eq!(state.local_iteration(), 8);
}

#[test]
fn delegation_failure_exits_incomplete_and_keeps_state() {
    let temp = tempfile::tempdir().expect("tempdir");
    write_script(
        temp.path(),
        &[
            (Operation::Decompose, json!(["design"])),
            (Operation::Assign, json!({"design": ["spec doc"]})),
            (Operation::Execute, json!({"$error": "model unavailable"})),
        ],
    );

    let output = coact(
        temp.path(),
        &[
            "run",
            SNAKE_TASK,
            "--script",
            "script.json",
            "--state-out",
            "state.json",
        ],
    );
    assert_eq!(output.status.code(), Some(exit_codes::INCOMPLETE));
    assert!(String::from_utf8_lossy(&output.stderr).contains("model unavailable"));

    let state = load_state(&temp.path().join("state.json")).expect("state");
    assert_eq!(state.agent_state(), AgentState::Running);
    assert_eq!(state.iteration(), 2);
}

#[test]
fn empty_plan_exits_invalid() {
    let temp = tempfile::tempdir().expect("tempdir");
    write_script(temp.path(), &[(Operation::Decompose, json!([]))]);

    let output = coact(temp.path(), &["run", SNAKE_TASK, "--script", "script.json"]);
    assert_eq!(output.status.code(), Some(exit_codes::INVALID));
    assert!(String::from_utf8_lossy(&output.stderr).contains("empty plan"));
}

#[test]
fn invalid_config_exits_invalid() {
    let temp = tempfile::tempdir().expect("tempdir");
    fs::create_dir_all(temp.path().join(".coact")).expect("mkdir");
    fs::write(
        temp.path().join(".coact/config.toml"),
        "[replan]\nmax_depth = 0\n",
    )
    .expect("write config");
    write_script(temp.path(), &[]);

    let output = coact(temp.path(), &["run", SNAKE_TASK, "--script", "script.json"]);
    assert_eq!(output.status.code(), Some(exit_codes::INVALID));
}
