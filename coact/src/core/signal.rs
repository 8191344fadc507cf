//! Deterministic classification of subtask feedback.
//!
//! Feedback is domain data, never an error. A failure signal in it is what
//! drives `maybe_replan`; everything else is treated as success.

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::core::types::Feedback;

/// Default sentinel token that marks feedback as a failure.
pub const DEFAULT_SENTINEL: &str = "Error";

/// How feedback is recognized as a failure signal.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ReplanTrigger {
    /// Substring match of the sentinel against any key or string in the feedback.
    Sentinel,
    /// A typed status field: `status`/`outcome` of `error|failure|failed`,
    /// or `success`/`ok` set to `false`.
    Structured,
    /// Either of the above.
    #[default]
    Any,
}

/// Outcome of classifying one feedback value.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FeedbackSignal {
    Success,
    Failure,
}

/// Classify feedback using `trigger` and the sentinel token.
///
/// - `Sentinel` looks for `sentinel` anywhere in the textual content.
/// - `Structured` only trusts explicit status fields on object feedback.
/// - An empty sentinel never matches.
pub fn classify_feedback(
    feedback: &Feedback,
    trigger: ReplanTrigger,
    sentinel: &str,
) -> FeedbackSignal {
    let failed = match trigger {
        ReplanTrigger::Sentinel => contains_sentinel(feedback.value(), sentinel),
        ReplanTrigger::Structured => has_failure_status(feedback.value()),
        ReplanTrigger::Any => {
            has_failure_status(feedback.value()) || contains_sentinel(feedback.value(), sentinel)
        }
    };
    if failed {
        FeedbackSignal::Failure
    } else {
        FeedbackSignal::Success
    }
}

fn contains_sentinel(value: &Value, sentinel: &str) -> bool {
    if sentinel.is_empty() {
        return false;
    }
    match value {
        Value::String(text) => text.contains(sentinel),
        Value::Array(items) => items.iter().any(|item| contains_sentinel(item, sentinel)),
        Value::Object(map) => map
            .iter()
            .any(|(key, item)| key.contains(sentinel) || contains_sentinel(item, sentinel)),
        Value::Null | Value::Bool(_) | Value::Number(_) => false,
    }
}

fn has_failure_status(value: &Value) -> bool {
    let Value::Object(map) = value else {
        return false;
    };
    let status_failed = ["status", "outcome"].iter().any(|key| {
        map.get(*key)
            .and_then(Value::as_str)
            .is_some_and(|status| {
                matches!(
                    status.trim().to_ascii_lowercase().as_str(),
                    "error" | "failure" | "failed"
                )
            })
    });
    let flag_failed = ["success", "ok"]
        .iter()
        .any(|key| map.get(*key) == Some(&Value::Bool(false)));
    status_failed || flag_failed
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn classify(value: Value, trigger: ReplanTrigger) -> FeedbackSignal {
        classify_feedback(&Feedback::new(value), trigger, DEFAULT_SENTINEL)
    }

    #[test]
    fn sentinel_matches_plain_text() {
        assert_eq!(
            classify(json!("Error: out of bounds"), ReplanTrigger::Sentinel),
            FeedbackSignal::Failure
        );
        assert_eq!(
            classify(json!("all good"), ReplanTrigger::Sentinel),
            FeedbackSignal::Success
        );
    }

    #[test]
    fn sentinel_is_case_sensitive() {
        assert_eq!(
            classify(json!("error: lowercase"), ReplanTrigger::Sentinel),
            FeedbackSignal::Success
        );
    }

    #[test]
    fn sentinel_searches_nested_keys_and_values() {
        assert_eq!(
            classify(json!({"Error": 1}), ReplanTrigger::Sentinel),
            FeedbackSignal::Failure
        );
        assert_eq!(
            classify(
                json!({"checks": [{"log": "TypeError in renderer"}]}),
                ReplanTrigger::Sentinel
            ),
            FeedbackSignal::Failure
        );
        assert_eq!(
            classify(json!({"errors": 0}), ReplanTrigger::Sentinel),
            FeedbackSignal::Success
        );
    }

    #[test]
    fn structured_ignores_free_text() {
        assert_eq!(
            classify(json!("Error: out of bounds"), ReplanTrigger::Structured),
            FeedbackSignal::Success
        );
        assert_eq!(
            classify(json!({"status": "Failed"}), ReplanTrigger::Structured),
            FeedbackSignal::Failure
        );
        assert_eq!(
            classify(json!({"ok": false}), ReplanTrigger::Structured),
            FeedbackSignal::Failure
        );
        assert_eq!(
            classify(json!({"status": "done", "ok": true}), ReplanTrigger::Structured),
            FeedbackSignal::Success
        );
    }

    #[test]
    fn any_accepts_either_signal() {
        assert_eq!(
            classify(json!({"outcome": "error"}), ReplanTrigger::Any),
            FeedbackSignal::Failure
        );
        assert_eq!(
            classify(json!({"note": "Error seen"}), ReplanTrigger::Any),
            FeedbackSignal::Failure
        );
        assert_eq!(
            classify(json!({"score": 0.9}), ReplanTrigger::Any),
            FeedbackSignal::Success
        );
    }

    #[test]
    fn empty_sentinel_never_matches() {
        let feedback = Feedback::new(json!("anything"));
        assert_eq!(
            classify_feedback(&feedback, ReplanTrigger::Sentinel, ""),
            FeedbackSignal::Success
        );
    }
}
