//! Planner/executor coordination loop CLI.
//!
//! `coact init` writes `.coact/config.toml`; `coact run <TASK>` drives one
//! workflow through the configured agent command (or a script file).

use std::env;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result, bail};
use clap::{Parser, Subcommand};
use coact::coordinator::{Coordinator, RunReport, WorkflowEvent};
use coact::core::signal::FeedbackSignal;
use coact::error::find_coact_error;
use coact::exit_codes;
use coact::io::config::{CoactConfig, DEFAULT_CONFIG_PATH, load_config, write_config};
use coact::io::script::ScriptedStepExecutor;
use coact::io::snapshot::write_state;
use coact::io::step_executor::{CommandStepExecutor, StepExecutor};
use coact::logging;
use tracing::info;

#[derive(Parser)]
#[command(
    name = "coact",
    version,
    about = "Two-level planner/executor coordination loop"
)]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Create `.coact/config.toml` with defaults if missing.
    Init {
        /// Overwrite an existing config.
        #[arg(short, long)]
        force: bool,
    },
    /// Run the workflow for a root task.
    Run {
        /// Root task to decompose and execute.
        task: String,
        /// Config file to load.
        #[arg(long, default_value = DEFAULT_CONFIG_PATH)]
        config: PathBuf,
        /// Answer every step from a JSON script instead of the agent command.
        #[arg(long)]
        script: Option<PathBuf>,
        /// Write the final shared state to this path.
        #[arg(long)]
        state_out: Option<PathBuf>,
    },
}

fn main() {
    logging::init();
    let cli = Cli::parse();
    let code = match cli.command {
        Command::Init { force } => match cmd_init(Path::new(DEFAULT_CONFIG_PATH), force) {
            Ok(()) => exit_codes::OK,
            Err(err) => {
                eprintln!("{err:#}");
                exit_codes::INVALID
            }
        },
        Command::Run {
            task,
            config,
            script,
            state_out,
        } => cmd_run(&task, &config, script.as_deref(), state_out.as_deref()),
    };
    std::process::exit(code);
}

fn cmd_init(path: &Path, force: bool) -> Result<()> {
    if path.exists() && !force {
        bail!("{} already exists (use --force to overwrite)", path.display());
    }
    write_config(path, &CoactConfig::default())?;
    println!("wrote {}", path.display());
    Ok(())
}

fn cmd_run(
    task: &str,
    config_path: &Path,
    script: Option<&Path>,
    state_out: Option<&Path>,
) -> i32 {
    let setup = load_config(config_path).and_then(|config| {
        let step = step_executor(&config, script)?;
        Ok(Coordinator::new(step, config))
    });
    let mut coordinator = match setup {
        Ok(coordinator) => coordinator,
        Err(err) => {
            eprintln!("{err:#}");
            return exit_codes::INVALID;
        }
    };

    let outcome =
        coordinator.execute_workflow_with(task, |event| println!("{}", describe(event)));

    if let Some(path) = state_out
        && let Err(err) = write_state(path, coordinator.state())
    {
        eprintln!("{err:#}");
        if outcome.is_ok() {
            return exit_codes::INVALID;
        }
    }

    match outcome {
        Ok(report) => {
            info!(?report, "run complete");
            println!("{}", summarize(&report));
            exit_codes::OK
        }
        Err(err) => {
            eprintln!("{err:#}");
            exit_code_for(&err)
        }
    }
}

fn step_executor(config: &CoactConfig, script: Option<&Path>) -> Result<Box<dyn StepExecutor>> {
    if let Some(path) = script {
        return Ok(Box::new(ScriptedStepExecutor::from_file(path)?));
    }
    let workdir = env::current_dir().context("resolve working directory")?;
    Ok(Box::new(CommandStepExecutor::new(
        workdir,
        config.executor.clone(),
    )))
}

/// Exit code for a failed workflow run.
fn exit_code_for(err: &anyhow::Error) -> i32 {
    match find_coact_error(err) {
        Some(kind) if kind.is_interruption() => exit_codes::INTERRUPTED,
        Some(coact::error::CoactError::MalformedOutput { .. }) | None => exit_codes::INCOMPLETE,
        Some(_) => exit_codes::INVALID,
    }
}

fn describe(event: &WorkflowEvent<'_>) -> String {
    match event {
        WorkflowEvent::PlanReady { phases, subtasks } => {
            format!("plan: {phases} phases, {subtasks} subtasks")
        }
        WorkflowEvent::SubtaskStarted {
            phase,
            subtask,
            depth,
        } => format!("{}[{phase}] {subtask}", indent(*depth)),
        WorkflowEvent::SubtaskFinished { depth, signal, .. } => {
            let outcome = match signal {
                FeedbackSignal::Success => "ok",
                FeedbackSignal::Failure => "failed",
            };
            format!("{}  -> {outcome}", indent(*depth))
        }
        WorkflowEvent::Replanned {
            after,
            subtasks,
            depth,
        } => format!(
            "{}replanned after '{after}': {subtasks} subtasks",
            indent(*depth)
        ),
        WorkflowEvent::Finished {
            executions,
            replans,
        } => format!("finished: {executions} executions, {replans} replans"),
    }
}

fn summarize(report: &RunReport) -> String {
    format!(
        "iteration={} local_iteration={} agent_state={:?}",
        report.iteration, report.local_iteration, report.agent_state
    )
}

fn indent(depth: u32) -> String {
    "  ".repeat(depth as usize)
}

#[cfg(test)]
mod tests {
    use super::*;
    use coact::core::types::Operation;
    use coact::error::CoactError;

    #[test]
    fn parse_init_force() {
        let cli = Cli::parse_from(["coact", "init", "--force"]);
        assert!(matches!(cli.command, Command::Init { force: true }));
    }

    #[test]
    fn parse_run_with_defaults() {
        let cli = Cli::parse_from(["coact", "run", "Build a snake game"]);
        let Command::Run {
            task,
            config,
            script,
            state_out,
        } = cli.command
        else {
            panic!("expected run");
        };
        assert_eq!(task, "Build a snake game");
        assert_eq!(config, PathBuf::from(DEFAULT_CONFIG_PATH));
        assert!(script.is_none());
        assert!(state_out.is_none());
    }

    #[test]
    fn parse_run_with_script_and_state_out() {
        let cli = Cli::parse_from([
            "coact",
            "run",
            "task",
            "--script",
            "plan.json",
            "--state-out",
            "state.json",
        ]);
        assert!(matches!(
            cli.command,
            Command::Run { script: Some(_), state_out: Some(_), .. }
        ));
    }

    #[test]
    fn init_refuses_to_overwrite_without_force() {
        let temp = tempfile::tempdir().expect("tempdir");
        let path = temp.path().join(".coact/config.toml");
        cmd_init(&path, false).expect("first init");
        assert!(cmd_init(&path, false).is_err());
        cmd_init(&path, true).expect("forced init");
    }

    #[test]
    fn exit_codes_follow_failure_kind() {
        let interrupted = anyhow::Error::new(CoactError::TimedOut {
            operation: Operation::Execute,
        })
        .context("run workflow");
        assert_eq!(exit_code_for(&interrupted), exit_codes::INTERRUPTED);

        let delegation = anyhow::anyhow!("model unavailable").context("delegate execute");
        assert_eq!(exit_code_for(&delegation), exit_codes::INCOMPLETE);

        let invalid = anyhow::Error::new(CoactError::EmptyInput { what: "task" });
        assert_eq!(exit_code_for(&invalid), exit_codes::INVALID);
    }

    #[test]
    fn events_render_with_depth_indent() {
        let line = describe(&WorkflowEvent::SubtaskStarted {
            phase: "fix-bounds",
            subtask: "bounds patch",
            depth: 1,
        });
        assert_eq!(line, "  [fix-bounds] bounds patch");
        let line = describe(&WorkflowEvent::SubtaskFinished {
            phase: "implement",
            subtask: "collision",
            depth: 0,
            signal: FeedbackSignal::Failure,
        });
        assert_eq!(line, "  -> failed");
    }
}
