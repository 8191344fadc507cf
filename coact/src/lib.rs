//! Two-level planner/executor coordination loop.
//!
//! A planner decomposes a root task into phases and assigns subtasks per
//! phase; an executor runs each subtask, collects feedback, and asks the
//! planner for a new plan when the feedback signals failure. Every model call
//! is delegated to a [`io::step_executor::StepExecutor`], so the loop itself is
//! deterministic given the executor's answers.
//!
//! - **[`core`]**: Pure logic and data (shared state, plan values, failure
//!   classification, budgets). No I/O.
//! - **[`io`]**: The step-executor boundary, prompts, output contracts, config
//!   and snapshots.
//! - **[`agents`]**: Planner and executor roles built on top of a step executor.
//!
//! [`coordinator`] owns the [`core::state::SharedState`] and drives the
//! workflow end to end.

pub mod agents;
pub mod coordinator;
pub mod core;
pub mod error;
pub mod exit_codes;
pub mod io;
pub mod logging;
#[cfg(any(test, feature = "test-support"))]
pub mod test_support;
