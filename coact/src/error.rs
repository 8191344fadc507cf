//! Domain error kinds for the coordination loop.
//!
//! Operations return `anyhow::Result`; these variants are raised where callers
//! need to branch on the failure kind (recover them with
//! `anyhow::Error::downcast_ref::<CoactError>()`). Failures raised by a step
//! executor are not wrapped in this type and propagate as-is.

use thiserror::Error;

use crate::core::types::Operation;

/// Error kinds raised by the planner, executor, and coordinator themselves.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum CoactError {
    /// A task or subtask was empty or whitespace only.
    #[error("{what} must not be empty")]
    EmptyInput { what: &'static str },

    /// There is nothing to plan or nothing to execute.
    #[error("empty plan: {reason}")]
    EmptyPlan { reason: String },

    /// The step executor returned a value that cannot be decoded.
    #[error("malformed {operation} output: {reason}")]
    MalformedOutput {
        operation: Operation,
        reason: String,
    },

    /// `root_task` is write-once.
    #[error("root task already set")]
    RootTaskAlreadySet,

    /// `agent_state` reaches `finished` exactly once.
    #[error("workflow already finished")]
    AlreadyFinished,

    /// The cancel token fired before the next delegation.
    #[error("workflow cancelled before {operation}")]
    Cancelled { operation: Operation },

    /// The workflow deadline passed before the next delegation.
    #[error("workflow timed out before {operation}")]
    TimedOut { operation: Operation },
}

impl CoactError {
    /// True for budget exhaustion (`Cancelled` or `TimedOut`).
    pub fn is_interruption(&self) -> bool {
        matches!(self, Self::Cancelled { .. } | Self::TimedOut { .. })
    }
}

/// Find a [`CoactError`] anywhere in an error chain.
pub fn find_coact_error(err: &anyhow::Error) -> Option<&CoactError> {
    err.chain()
        .find_map(|cause| cause.downcast_ref::<CoactError>())
}

#[cfg(test)]
mod tests {
    use super::*;
    use anyhow::Context;

    #[test]
    fn finds_error_through_context_layers() {
        let err = Err::<(), _>(CoactError::TimedOut {
            operation: Operation::Execute,
        })
        .context("delegate execute")
        .context("run workflow")
        .unwrap_err();

        let found = find_coact_error(&err).expect("coact error");
        assert!(found.is_interruption());
        assert_eq!(
            err.root_cause().to_string(),
            "workflow timed out before execute"
        );
    }

    #[test]
    fn plain_errors_have_no_coact_kind() {
        let err = anyhow::anyhow!("model unavailable");
        assert!(find_coact_error(&err).is_none());
    }
}
