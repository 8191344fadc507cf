//! Step-executor abstraction for delegated planner and executor steps.
//!
//! The [`StepExecutor`] trait is the only boundary between the coordination
//! loop and whatever actually reasons about a prompt. [`CommandStepExecutor`]
//! runs an external agent CLI (`codex exec` by default); tests use scripted
//! executors that return predetermined values without spawning processes.

use std::cell::Cell;
use std::fs;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use std::process::Command;
use std::time::Duration;

use anyhow::{Context, Result, anyhow};
use serde::Serialize;
use serde_json::Value;
use tracing::{debug, info, instrument, warn};

use crate::core::state::SharedState;
use crate::core::types::{AgentRole, Operation};
use crate::io::config::CommandConfig;
use crate::io::contract::{output_schema, validate_output};
use crate::io::process::run_command_with_timeout;

/// One delegation: the operation being asked for and the state it sees.
///
/// The prompt for the step is `state.prompt()`.
#[derive(Debug, Clone, Copy)]
pub struct StepRequest<'a> {
    pub role: AgentRole,
    pub operation: Operation,
    pub state: &'a SharedState,
    /// Time the step may take before it must be abandoned.
    pub timeout: Duration,
}

impl<'a> StepRequest<'a> {
    pub fn new(operation: Operation, state: &'a SharedState, timeout: Duration) -> Self {
        Self {
            role: operation.role(),
            operation,
            state,
            timeout,
        }
    }

    pub fn prompt(&self) -> &'a str {
        self.state.prompt().unwrap_or_default()
    }
}

/// Abstraction over whatever turns a prompt into an action/result.
pub trait StepExecutor {
    /// Produce the collaborator's value for `request`. Errors abort the workflow.
    fn step(&self, request: &StepRequest<'_>) -> Result<Value>;
}

impl<T: StepExecutor + ?Sized> StepExecutor for &T {
    fn step(&self, request: &StepRequest<'_>) -> Result<Value> {
        (**self).step(request)
    }
}

impl<T: StepExecutor + ?Sized> StepExecutor for Box<T> {
    fn step(&self, request: &StepRequest<'_>) -> Result<Value> {
        (**self).step(request)
    }
}

/// Request file handed to the external command.
#[derive(Debug, Serialize)]
struct RequestFile<'a> {
    role: AgentRole,
    operation: Operation,
    prompt: &'a str,
    timeout_secs: u64,
    state: &'a SharedState,
}

/// Files written for one delegated step under the artifacts directory.
#[derive(Debug, Clone)]
pub struct StepPaths {
    pub dir: PathBuf,
    pub request_path: PathBuf,
    pub schema_path: PathBuf,
    pub output_path: PathBuf,
    pub log_path: PathBuf,
}

impl StepPaths {
    pub fn new(artifacts_dir: &Path, seq: u32, operation: Operation) -> Self {
        let dir = artifacts_dir.join(format!("{seq:04}-{operation}"));
        Self {
            request_path: dir.join("request.json"),
            schema_path: dir.join("output.schema.json"),
            output_path: dir.join("output.json"),
            log_path: dir.join("executor.log"),
            dir,
        }
    }
}

/// Step executor that spawns a configured agent command per delegation.
#[derive(Debug)]
pub struct CommandStepExecutor {
    workdir: PathBuf,
    config: CommandConfig,
    seq: Cell<u32>,
}

impl CommandStepExecutor {
    pub fn new(workdir: impl Into<PathBuf>, config: CommandConfig) -> Self {
        Self {
            workdir: workdir.into(),
            config,
            seq: Cell::new(0),
        }
    }

    fn artifacts_dir(&self) -> PathBuf {
        if self.config.artifacts_dir.is_absolute() {
            self.config.artifacts_dir.clone()
        } else {
            self.workdir.join(&self.config.artifacts_dir)
        }
    }

    fn next_paths(&self, operation: Operation) -> StepPaths {
        let seq = self.seq.get() + 1;
        self.seq.set(seq);
        StepPaths::new(&self.artifacts_dir(), seq, operation)
    }

    fn build_command(&self, paths: &StepPaths) -> Result<Command> {
        let args: Vec<String> = self
            .config
            .command
            .iter()
            .map(|arg| substitute(arg, paths, &self.workdir))
            .collect();
        let (program, rest) = args
            .split_first()
            .ok_or_else(|| anyhow!("executor.command is empty"))?;
        let mut cmd = Command::new(program);
        cmd.args(rest).current_dir(&self.workdir);
        Ok(cmd)
    }

    fn reads_output_file(&self) -> bool {
        self.config.command.iter().any(|arg| arg.contains("{output}"))
    }
}

impl StepExecutor for CommandStepExecutor {
    #[instrument(skip_all, fields(operation = %request.operation, timeout_secs = request.timeout.as_secs()))]
    fn step(&self, request: &StepRequest<'_>) -> Result<Value> {
        let paths = self.next_paths(request.operation);
        info!(dir = %paths.dir.display(), "starting agent command");
        fs::create_dir_all(&paths.dir)
            .with_context(|| format!("create step dir {}", paths.dir.display()))?;

        let request_file = RequestFile {
            role: request.role,
            operation: request.operation,
            prompt: request.prompt(),
            timeout_secs: request.timeout.as_secs(),
            state: request.state,
        };
        write_json(&paths.request_path, &request_file)?;
        fs::write(&paths.schema_path, output_schema(request.operation))
            .with_context(|| format!("write schema {}", paths.schema_path.display()))?;
        remove_stale_output(&paths.output_path)?;

        let cmd = self.build_command(&paths)?;
        let output = run_command_with_timeout(
            cmd,
            Some(request.prompt().as_bytes()),
            request.timeout,
            self.config.output_limit_bytes,
        )
        .with_context(|| format!("run agent command for {}", request.operation))?;

        fs::write(&paths.log_path, output.render_log())
            .with_context(|| format!("write executor log {}", paths.log_path.display()))?;

        if output.timed_out {
            warn!("agent command timed out");
            return Err(anyhow!(
                "agent command for {} timed out after {:?}",
                request.operation,
                request.timeout
            ));
        }
        if !output.status.success() {
            warn!(exit_code = ?output.status.code(), "agent command failed");
            return Err(anyhow!(
                "agent command for {} failed with status {:?} (see {})",
                request.operation,
                output.status.code(),
                paths.log_path.display()
            ));
        }

        let raw = if self.reads_output_file() {
            fs::read_to_string(&paths.output_path).with_context(|| {
                format!("missing agent output {}", paths.output_path.display())
            })?
        } else {
            let text = output.stdout.text();
            fs::write(&paths.output_path, &text)
                .with_context(|| format!("write {}", paths.output_path.display()))?;
            text
        };

        let value = parse_output(&raw);
        validate_output(request.operation, &value)?;
        debug!("agent command completed successfully");
        Ok(value)
    }
}

/// Parse agent output as JSON, falling back to a JSON string for plain text.
///
/// Output wrapped in a markdown `json` fence is unwrapped first.
pub fn parse_output(raw: &str) -> Value {
    let trimmed = raw.trim();
    let body = trimmed
        .strip_prefix("```json")
        .or_else(|| trimmed.strip_prefix("```"))
        .and_then(|rest| rest.strip_suffix("```"))
        .map(str::trim)
        .unwrap_or(trimmed);
    serde_json::from_str(body).unwrap_or_else(|_| Value::String(body.to_string()))
}

fn substitute(arg: &str, paths: &StepPaths, workdir: &Path) -> String {
    arg.replace("{output}", &paths.output_path.display().to_string())
        .replace("{request}", &paths.request_path.display().to_string())
        .replace("{schema}", &paths.schema_path.display().to_string())
        .replace("{workdir}", &workdir.display().to_string())
}

/// Step dirs are numbered per process, so an earlier run may have left an
/// answer at the same path.
fn remove_stale_output(path: &Path) -> Result<()> {
    match fs::remove_file(path) {
        Ok(()) => {
            debug!(path = %path.display(), "removed stale agent output");
            Ok(())
        }
        Err(err) if err.kind() == ErrorKind::NotFound => Ok(()),
        Err(err) => Err(err).with_context(|| format!("remove stale output {}", path.display())),
    }
}

fn write_json<T: Serialize>(path: &Path, value: &T) -> Result<()> {
    let mut buf = serde_json::to_string_pretty(value).context("serialize json")?;
    buf.push('\n');
    fs::write(path, buf).with_context(|| format!("write {}", path.display()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn parse_output_handles_json_text_and_fences() {
        assert_eq!(parse_output("[\"a\", \"b\"]\n"), json!(["a", "b"]));
        assert_eq!(parse_output("```json\n{\"ok\": true}\n```"), json!({"ok": true}));
        assert_eq!(parse_output("  just words "), json!("just words"));
    }

    #[test]
    fn step_paths_are_numbered_per_operation() {
        let paths = StepPaths::new(Path::new("/tmp/steps"), 7, Operation::CollectFeedback);
        assert!(paths.dir.ends_with("0007-collect_feedback"));
        assert!(paths.output_path.ends_with("0007-collect_feedback/output.json"));
    }

    #[cfg(unix)]
    mod command {
        use super::*;
        use crate::core::state::InputKey;

        fn config(script: &str) -> CommandConfig {
            CommandConfig {
                command: vec!["sh".to_string(), "-c".to_string(), script.to_string()],
                artifacts_dir: PathBuf::from("steps"),
                output_limit_bytes: 10_000,
            }
        }

        fn state_with_prompt(prompt: &str) -> SharedState {
            let mut state = SharedState::new();
            state.record_input(InputKey::Prompt, prompt);
            state
        }

        #[test]
        fn reads_stdout_and_writes_artifacts() {
            let temp = tempfile::tempdir().expect("tempdir");
            let executor = CommandStepExecutor::new(
                temp.path(),
                config("cat > prompt.txt; echo '[\"design\", \"test\"]'"),
            );
            let state = state_with_prompt("Decompose the task");

            let value = executor
                .step(&StepRequest::new(
                    Operation::Decompose,
                    &state,
                    Duration::from_secs(10),
                ))
                .expect("step");

            assert_eq!(value, json!(["design", "test"]));
            let dir = temp.path().join("steps/0001-decompose");
            assert!(dir.join("request.json").exists());
            assert!(dir.join("output.schema.json").exists());
            assert!(dir.join("executor.log").exists());
            let prompt = fs::read_to_string(temp.path().join("prompt.txt")).expect("prompt");
            assert_eq!(prompt, "Decompose the task");

            let request: Value = serde_json::from_str(
                &fs::read_to_string(dir.join("request.json")).expect("request"),
            )
            .expect("request json");
            assert_eq!(request["operation"], json!("decompose"));
            assert_eq!(request["role"], json!("planner"));
        }

        #[test]
        fn reads_output_placeholder_file() {
            let temp = tempfile::tempdir().expect("tempdir");
            let mut cfg = config("cat >/dev/null; printf '%s' '{\"status\": \"ok\"}' > \"$0\"");
            cfg.command.push("{output}".to_string());
            let executor = CommandStepExecutor::new(temp.path(), cfg);
            let state = state_with_prompt("Collect feedback");

            let value = executor
                .step(&StepRequest::new(
                    Operation::CollectFeedback,
                    &state,
                    Duration::from_secs(10),
                ))
                .expect("step");
            assert_eq!(value, json!({"status": "ok"}));
        }

        #[test]
        fn non_zero_exit_is_a_delegation_failure() {
            let temp = tempfile::tempdir().expect("tempdir");
            let executor = CommandStepExecutor::new(temp.path(), config("cat >/dev/null; exit 3"));
            let state = state_with_prompt("Execute");

            let err = executor
                .step(&StepRequest::new(
                    Operation::Execute,
                    &state,
                    Duration::from_secs(10),
                ))
                .unwrap_err();
            assert!(err.to_string().contains("failed with status Some(3)"));
        }

        #[test]
        fn contract_violation_is_a_delegation_failure() {
            let temp = tempfile::tempdir().expect("tempdir");
            let executor =
                CommandStepExecutor::new(temp.path(), config("cat >/dev/null; echo '{\"design\": 1}'"));
            let state = state_with_prompt("Assign");

            let err = executor
                .step(&StepRequest::new(
                    Operation::Assign,
                    &state,
                    Duration::from_secs(10),
                ))
                .unwrap_err();
            assert!(format!("{err:#}").contains("assign output violates its contract"));
        }

        #[test]
        fn earlier_run_output_is_not_reused() {
            let temp = tempfile::tempdir().expect("tempdir");
            let state = state_with_prompt("Decompose the task");
            let request = StepRequest::new(Operation::Decompose, &state, Duration::from_secs(10));

            let mut first = config("cat >/dev/null; printf '%s' '[\"old\"]' > \"$0\"");
            first.command.push("{output}".to_string());
            let value = CommandStepExecutor::new(temp.path(), first)
                .step(&request)
                .expect("first run");
            assert_eq!(value, json!(["old"]));

            let mut second = config("cat >/dev/null; exit 0");
            second.command.push("{output}".to_string());
            let err = CommandStepExecutor::new(temp.path(), second)
                .step(&request)
                .unwrap_err();
            assert!(format!("{err:#}").contains("missing agent output"));
            assert!(!temp.path().join("steps/0001-decompose/output.json").exists());
        }

        #[test]
        fn sequence_numbers_advance_per_step() {
            let temp = tempfile::tempdir().expect("tempdir");
            let executor =
                CommandStepExecutor::new(temp.path(), config("cat >/dev/null; echo '\"ok\"'"));
            let state = state_with_prompt("Guide");
            for _ in 0..2 {
                executor
                    .step(&StepRequest::new(
                        Operation::Guide,
                        &state,
                        Duration::from_secs(10),
                    ))
                    .expect("step");
            }
            assert!(temp.path().join("steps/0001-guide").exists());
            assert!(temp.path().join("steps/0002-guide").exists());
        }
    }
}
