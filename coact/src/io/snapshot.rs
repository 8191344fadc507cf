//! SharedState snapshots written after a run.

use std::fs;
use std::path::Path;

use anyhow::{Context, Result};
use tracing::debug;

use crate::core::state::SharedState;

/// Load a state snapshot from disk.
pub fn load_state(path: &Path) -> Result<SharedState> {
    debug!(path = %path.display(), "loading state snapshot");
    let contents =
        fs::read_to_string(path).with_context(|| format!("read snapshot {}", path.display()))?;
    let state: SharedState = serde_json::from_str(&contents)
        .with_context(|| format!("parse snapshot {}", path.display()))?;
    debug!(
        iteration = state.iteration(),
        local_iteration = state.local_iteration(),
        "state snapshot loaded"
    );
    Ok(state)
}

/// Atomically write a state snapshot (temp file + rename).
pub fn write_state(path: &Path, state: &SharedState) -> Result<()> {
    debug!(path = %path.display(), stage = ?state.stage(), "writing state snapshot");
    let mut buf = serde_json::to_string_pretty(state).context("serialize state snapshot")?;
    buf.push('\n');
    super::write_atomic(path, &buf)
}
