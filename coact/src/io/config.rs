//! Coordinator configuration stored under `.coact/config.toml`.

use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::{Context, Result, anyhow};
use serde::{Deserialize, Serialize};

use crate::core::signal::{DEFAULT_SENTINEL, ReplanTrigger};

/// Default location of the config file, relative to the working directory.
pub const DEFAULT_CONFIG_PATH: &str = ".coact/config.toml";

/// Coordinator configuration (TOML).
///
/// Missing fields default to the values in [`CoactConfig::default`].
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct CoactConfig {
    /// Wall-clock budget for a whole workflow run, in seconds.
    pub workflow_timeout_secs: u64,

    /// Upper bound for a single delegated step, in seconds.
    pub step_timeout_secs: u64,

    /// Maximum bytes for a rendered prompt before sections are dropped.
    pub prompt_budget_bytes: usize,

    pub replan: ReplanConfig,

    pub executor: CommandConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct ReplanConfig {
    /// How failing feedback is recognized.
    pub trigger: ReplanTrigger,

    /// Token searched for by the `sentinel` trigger.
    pub sentinel: String,

    /// How many nested replans a single subtask may cause. `1` replans once and
    /// runs the replanned subtasks without checking their feedback again.
    pub max_depth: u32,
}

impl Default for ReplanConfig {
    fn default() -> Self {
        Self {
            trigger: ReplanTrigger::Any,
            sentinel: DEFAULT_SENTINEL.to_string(),
            max_depth: 1,
        }
    }
}

/// Settings for the command-backed step executor.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct CommandConfig {
    /// Program and arguments. Supports `{output}`, `{request}`, `{schema}` and
    /// `{workdir}` placeholders.
    pub command: Vec<String>,

    /// Where per-step request/response artifacts are written.
    pub artifacts_dir: PathBuf,

    /// Truncate captured stdout/stderr beyond this many bytes.
    pub output_limit_bytes: usize,
}

impl Default for CommandConfig {
    fn default() -> Self {
        Self {
            command: [
                "codex",
                "exec",
                "--skip-git-repo-check",
                "--output-schema",
                "{schema}",
                "--output-last-message",
                "{output}",
                "-",
            ]
            .into_iter()
            .map(str::to_string)
            .collect(),
            artifacts_dir: PathBuf::from(".coact/steps"),
            output_limit_bytes: 100_000,
        }
    }
}

impl Default for CoactConfig {
    fn default() -> Self {
        Self {
            workflow_timeout_secs: 60 * 60,
            step_timeout_secs: 15 * 60,
            prompt_budget_bytes: 40_000,
            replan: ReplanConfig::default(),
            executor: CommandConfig::default(),
        }
    }
}

impl CoactConfig {
    pub fn validate(&self) -> Result<()> {
        if self.workflow_timeout_secs == 0 {
            return Err(anyhow!("workflow_timeout_secs must be > 0"));
        }
        if self.step_timeout_secs == 0 {
            return Err(anyhow!("step_timeout_secs must be > 0"));
        }
        if self.prompt_budget_bytes == 0 {
            return Err(anyhow!("prompt_budget_bytes must be > 0"));
        }
        if self.replan.max_depth == 0 {
            return Err(anyhow!("replan.max_depth must be > 0"));
        }
        if self.replan.trigger != ReplanTrigger::Structured && self.replan.sentinel.is_empty() {
            return Err(anyhow!(
                "replan.sentinel must be non-empty unless replan.trigger = \"structured\""
            ));
        }
        if self.executor.command.is_empty() || self.executor.command[0].trim().is_empty() {
            return Err(anyhow!("executor.command must be a non-empty array"));
        }
        if self.executor.output_limit_bytes == 0 {
            return Err(anyhow!("executor.output_limit_bytes must be > 0"));
        }
        Ok(())
    }

    pub fn workflow_timeout(&self) -> Duration {
        Duration::from_secs(self.workflow_timeout_secs)
    }

    pub fn step_timeout(&self) -> Duration {
        Duration::from_secs(self.step_timeout_secs)
    }
}

/// Load config from a TOML file.
///
/// If the file is missing, returns `CoactConfig::default()`.
pub fn load_config(path: &Path) -> Result<CoactConfig> {
    if !path.exists() {
        let cfg = CoactConfig::default();
        cfg.validate()?;
        return Ok(cfg);
    }
    let contents = fs::read_to_string(path).with_context(|| format!("read {}", path.display()))?;
    let cfg: CoactConfig =
        toml::from_str(&contents).with_context(|| format!("parse {}", path.display()))?;
    cfg.validate()
        .with_context(|| format!("validate {}", path.display()))?;
    Ok(cfg)
}

/// Atomically write config to disk (temp file + rename).
pub fn write_config(path: &Path, cfg: &CoactConfig) -> Result<()> {
    cfg.validate()?;
    let mut buf = toml::to_string_pretty(cfg).context("serialize config toml")?;
    buf.push('\n');
    super::write_atomic(path, &buf)
}
