//! Stable exit codes for coact CLI commands.

/// Command succeeded; for `coact run` the workflow reached `Finished`.
pub const OK: i32 = 0;
/// Invalid arguments, config, or plan, or any other error.
pub const INVALID: i32 = 1;
/// A delegated step failed and the run stopped before finishing.
pub const INCOMPLETE: i32 = 2;
/// The run timed out or was cancelled.
pub const INTERRUPTED: i32 = 3;
