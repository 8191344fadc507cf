//! Diagnostic tracing on stderr, filtered by `RUST_LOG`.
//!
//! This is separate from the workflow's progress output: the CLI prints
//! [`crate::coordinator::WorkflowEvent`]s to stdout no matter what the
//! filter says.

use tracing_subscriber::fmt::format::FmtSpan;
use tracing_subscriber::{EnvFilter, fmt, layer::SubscriberExt, util::SubscriberInitExt};

/// Filter used when `RUST_LOG` is unset or unparsable.
const DEFAULT_DIRECTIVE: &str = "warn";

/// Install the global subscriber.
///
/// With `RUST_LOG=coact=debug` every delegation span is logged when it
/// closes, along with its duration:
///
/// ```bash
/// RUST_LOG=coact=debug coact run "Build a snake game" --script plan.json
/// ```
pub fn init() {
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(DEFAULT_DIRECTIVE));
    let layer = fmt::layer()
        .with_writer(std::io::stderr)
        .with_span_events(FmtSpan::CLOSE)
        .compact();

    // A subscriber installed earlier (tests, embedding callers) stays in place.
    tracing_subscriber::registry()
        .with(filter)
        .with(layer)
        .try_init()
        .ok();
}
