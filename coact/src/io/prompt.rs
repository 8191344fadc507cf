//! Prompt builder for delegated planner and executor steps.
//!
//! Each operation has a minijinja template extending `prompts/layout.md`.
//! Rendered output is split into marked sections so a byte budget can drop
//! the less critical ones first.

use std::sync::LazyLock;

use anyhow::Result;
use minijinja::{Environment, context};
use regex::Regex;
use serde_json::Value;
use tracing::debug;

use crate::core::state::SharedState;
use crate::core::types::Operation;

const LAYOUT_TEMPLATE: &str = include_str!("prompts/layout.md");
const DECOMPOSE_TEMPLATE: &str = include_str!("prompts/decompose.md");
const ASSIGN_TEMPLATE: &str = include_str!("prompts/assign.md");
const REVIEW_TEMPLATE: &str = include_str!("prompts/review.md");
const GUIDE_TEMPLATE: &str = include_str!("prompts/guide.md");
const EXECUTE_TEMPLATE: &str = include_str!("prompts/execute.md");
const COLLECT_FEEDBACK_TEMPLATE: &str = include_str!("prompts/collect_feedback.md");
const REPLAN_TEMPLATE: &str = include_str!("prompts/replan.md");

/// Longest inline rendering of an argument inside the directive sentence.
const INLINE_LIMIT: usize = 240;

/// Which prompt to build.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PromptKind {
    Step(Operation),
    /// The executor's replan decision. Recorded, never delegated.
    Replan,
}

impl PromptKind {
    fn template_name(self) -> &'static str {
        match self {
            PromptKind::Step(op) => op.as_str(),
            PromptKind::Replan => "replan",
        }
    }

    fn argument_title(self) -> &'static str {
        match self {
            PromptKind::Step(Operation::Decompose) => "Task",
            PromptKind::Step(Operation::Assign) => "Phases",
            PromptKind::Step(Operation::Review | Operation::Guide) | PromptKind::Replan => {
                "Feedback"
            }
            PromptKind::Step(Operation::Execute) => "Subtask",
            PromptKind::Step(Operation::CollectFeedback) => "Result",
        }
    }
}

/// Values a prompt is rendered from.
#[derive(Debug, Clone)]
pub struct PromptInputs {
    /// The operation's argument (task, phases, feedback, subtask, or result).
    pub argument: Value,
    /// Secondary material (guidance for a replan decision).
    pub context: Option<Value>,
    /// Root task of the run, if set.
    pub root_task: Option<String>,
    /// One-line counters and metrics summary.
    pub progress: Option<String>,
}

impl PromptInputs {
    /// Inputs for `argument`, filling root task and progress from `state`.
    pub fn from_state(state: &SharedState, argument: Value) -> Self {
        let progress = format!(
            "iteration={} local_iteration={} metrics_keys={}",
            state.iteration(),
            state.local_iteration(),
            state.metrics.keys().collect::<Vec<_>>().join(",")
        );
        Self {
            argument,
            context: None,
            root_task: state.root_task().map(str::to_string),
            progress: Some(progress),
        }
    }

    pub fn with_context(mut self, context: Value) -> Self {
        self.context = Some(context);
        self
    }
}

/// Template name and source for every prompt, layout first.
const TEMPLATES: [(&str, &str); 8] = [
    ("layout.md", LAYOUT_TEMPLATE),
    ("decompose", DECOMPOSE_TEMPLATE),
    ("assign", ASSIGN_TEMPLATE),
    ("review", REVIEW_TEMPLATE),
    ("guide", GUIDE_TEMPLATE),
    ("execute", EXECUTE_TEMPLATE),
    ("collect_feedback", COLLECT_FEEDBACK_TEMPLATE),
    ("replan", REPLAN_TEMPLATE),
];

/// Sections removed, in this order, while a prompt is over budget.
const DROP_ORDER: [&str; 3] = ["progress", "context", "root"];

const TRUNCATION_NOTE: &str = "\n[truncated]";

const SECTION_SEPARATOR: &str = "\n\n";

static TEMPLATE_ENV: LazyLock<Environment<'static>> = LazyLock::new(|| {
    let mut env = Environment::new();
    for (name, source) in TEMPLATES {
        env.add_template(name, source)
            .expect("prompt templates should be valid");
    }
    env
});

fn render_template(kind: PromptKind, input: &PromptInputs) -> Result<String> {
    let template = TEMPLATE_ENV.get_template(kind.template_name())?;
    let context_text = input.context.as_ref().map(render_block);
    let rendered = template.render(context! {
        argument => render_block(&input.argument),
        argument_inline => render_inline(&input.argument),
        argument_title => kind.argument_title(),
        context => non_blank(context_text.as_deref()),
        context_inline => input.context.as_ref().map(render_inline),
        context_title => "Guidance",
        root_task => non_blank(input.root_task.as_deref()),
        progress => non_blank(input.progress.as_deref()),
    })?;
    Ok(rendered)
}

fn non_blank(text: Option<&str>) -> Option<&str> {
    text.map(str::trim).filter(|text| !text.is_empty())
}

/// Text values render as-is; anything else as pretty JSON.
fn render_block(value: &Value) -> String {
    match value {
        Value::String(text) => text.clone(),
        other => serde_json::to_string_pretty(other).unwrap_or_else(|_| other.to_string()),
    }
}

fn render_inline(value: &Value) -> String {
    let flat = match value {
        Value::String(text) => text.split_whitespace().collect::<Vec<_>>().join(" "),
        other => other.to_string(),
    };
    match flat.char_indices().nth(INLINE_LIMIT) {
        Some((idx, _)) => format!("{}...", &flat[..idx]),
        None => flat,
    }
}

/// One marked block of a rendered prompt.
#[derive(Debug, Clone)]
struct Section {
    key: String,
    required: bool,
    /// Header and body, without the marker.
    text: String,
}

/// Split rendered output on `<!-- section:KEY required|droppable -->` markers.
///
/// Empty droppable sections are skipped.
fn split_sections(rendered: &str) -> Vec<Section> {
    static MARKER: LazyLock<Regex> = LazyLock::new(|| {
        Regex::new(r"<!--\s*section:(\w+)\s+(required|droppable)\s*-->")
            .expect("section marker regex should compile")
    });

    let marks: Vec<(usize, usize, &str, bool)> = MARKER
        .captures_iter(rendered)
        .filter_map(|caps| {
            let whole = caps.get(0)?;
            let key = caps.get(1)?.as_str();
            let required = caps.get(2)?.as_str() == "required";
            Some((whole.start(), whole.end(), key, required))
        })
        .collect();

    marks
        .iter()
        .enumerate()
        .filter_map(|(i, &(_, body_start, key, required))| {
            let body_end = marks.get(i + 1).map_or(rendered.len(), |next| next.0);
            let text = rendered[body_start..body_end].trim();
            (required || !text.is_empty()).then(|| Section {
                key: key.to_string(),
                required,
                text: text.to_string(),
            })
        })
        .collect()
}

/// Length of the sections once joined with [`SECTION_SEPARATOR`].
fn total_bytes(sections: &[Section]) -> usize {
    let separators = sections.len().saturating_sub(1) * SECTION_SEPARATOR.len();
    sections.iter().map(|section| section.text.len()).sum::<usize>() + separators
}

/// Drop optional sections in [`DROP_ORDER`], then cut the final (argument)
/// section down to whatever budget remains.
fn fit_to_budget(sections: &mut Vec<Section>, budget: usize) {
    for key in DROP_ORDER {
        if total_bytes(sections) <= budget {
            return;
        }
        if let Some(pos) = sections.iter().position(|s| s.key == key && !s.required) {
            let dropped = sections.remove(pos);
            debug!(section = key, bytes = dropped.text.len(), "prompt section dropped");
        }
    }

    let excess = total_bytes(sections).saturating_sub(budget);
    if excess == 0 {
        return;
    }
    let Some(last) = sections.last_mut() else {
        return;
    };
    let from = last.text.len();
    clamp_with_note(&mut last.text, from.saturating_sub(excess));
    debug!(
        section = %last.key,
        from,
        to = last.text.len(),
        "prompt section truncated"
    );
}

/// Cut `text` to at most `limit` bytes, ending in [`TRUNCATION_NOTE`] when
/// the note fits.
fn clamp_with_note(text: &mut String, limit: usize) {
    if text.len() <= limit {
        return;
    }
    match limit.checked_sub(TRUNCATION_NOTE.len()) {
        Some(keep) => {
            text.truncate(floor_char_boundary(text, keep));
            text.push_str(TRUNCATION_NOTE);
        }
        None => text.truncate(floor_char_boundary(text, limit)),
    }
}

fn floor_char_boundary(text: &str, mut idx: usize) -> usize {
    idx = idx.min(text.len());
    while !text.is_char_boundary(idx) {
        idx -= 1;
    }
    idx
}

/// Renders operation prompts within a byte budget.
#[derive(Debug, Clone)]
pub struct PromptBuilder {
    budget_bytes: usize,
}

impl PromptBuilder {
    pub fn new(budget_bytes: usize) -> Self {
        Self { budget_bytes }
    }

    pub fn build(&self, kind: PromptKind, input: &PromptInputs) -> Result<PromptPack> {
        let mut sections = split_sections(&render_template(kind, input)?);
        fit_to_budget(&mut sections, self.budget_bytes);
        let mut content = sections
            .iter()
            .map(|section| section.text.as_str())
            .collect::<Vec<_>>()
            .join(SECTION_SEPARATOR);
        // Required sections alone can still exceed a very small budget.
        clamp_with_note(&mut content, self.budget_bytes);
        Ok(PromptPack { content })
    }
}

/// A rendered prompt ready to record and delegate.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PromptPack {
    content: String,
}

impl PromptPack {
    pub fn as_str(&self) -> &str {
        &self.content
    }

    pub fn into_string(self) -> String {
        self.content
    }
}
