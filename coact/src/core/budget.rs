//! Time budget and cancellation shared by every delegation in a run.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::{Duration, Instant};

use crate::core::types::Operation;
use crate::error::CoactError;

/// Cooperative cancellation flag. Clones share the same flag.
#[derive(Debug, Clone, Default)]
pub struct CancelToken(Arc<AtomicBool>);

impl CancelToken {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }
}

/// Deadline, per-step cap, and cancel token for one workflow run.
#[derive(Debug, Clone)]
pub struct Budget {
    deadline: Option<Instant>,
    step_timeout: Duration,
    cancel: CancelToken,
}

impl Budget {
    pub fn new(deadline: Option<Instant>, step_timeout: Duration, cancel: CancelToken) -> Self {
        Self {
            deadline,
            step_timeout,
            cancel,
        }
    }

    /// Budget with no workflow deadline.
    pub fn unbounded(step_timeout: Duration) -> Self {
        Self::new(None, step_timeout, CancelToken::new())
    }

    /// Budget whose deadline is `total` from now.
    ///
    /// A `total` too large to add to the clock means no deadline at all.
    pub fn starting_now(total: Duration, step_timeout: Duration, cancel: CancelToken) -> Self {
        Self::new(Instant::now().checked_add(total), step_timeout, cancel)
    }

    pub fn cancel_token(&self) -> &CancelToken {
        &self.cancel
    }

    /// Timeout to grant the next delegation of `operation`.
    ///
    /// Fails with `Cancelled` if the token fired and `TimedOut` once the
    /// deadline has passed; otherwise the smaller of the per-step cap and the
    /// time left.
    pub fn next_step_timeout(&self, operation: Operation) -> Result<Duration, CoactError> {
        if self.cancel.is_cancelled() {
            return Err(CoactError::Cancelled { operation });
        }
        let Some(deadline) = self.deadline else {
            return Ok(self.step_timeout);
        };
        let remaining = deadline
            .checked_duration_since(Instant::now())
            .unwrap_or(Duration::from_secs(0));
        if remaining.is_zero() {
            return Err(CoactError::TimedOut { operation });
        }
        Ok(remaining.min(self.step_timeout))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn unbounded_budget_grants_step_cap() {
        let budget = Budget::unbounded(Duration::from_secs(30));
        assert_eq!(
            budget.next_step_timeout(Operation::Execute),
            Ok(Duration::from_secs(30))
        );
    }

    #[test]
    fn deadline_caps_step_timeout() {
        let budget = Budget::starting_now(
            Duration::from_secs(5),
            Duration::from_secs(600),
            CancelToken::new(),
        );
        let timeout = budget.next_step_timeout(Operation::Guide).expect("timeout");
        assert!(timeout <= Duration::from_secs(5));
        assert!(timeout > Duration::from_secs(0));
    }

    #[test]
    fn unrepresentable_deadline_is_unbounded() {
        let budget = Budget::starting_now(
            Duration::from_secs(u64::MAX),
            Duration::from_secs(45),
            CancelToken::new(),
        );
        assert_eq!(
            budget.next_step_timeout(Operation::Execute),
            Ok(Duration::from_secs(45))
        );
    }

    #[test]
    fn expired_deadline_times_out() {
        let budget = Budget::new(
            Some(Instant::now()),
            Duration::from_secs(600),
            CancelToken::new(),
        );
        assert_eq!(
            budget.next_step_timeout(Operation::Assign),
            Err(CoactError::TimedOut {
                operation: Operation::Assign
            })
        );
    }

    #[test]
    fn cancellation_is_shared_between_clones() {
        let token = CancelToken::new();
        let budget = Budget::new(None, Duration::from_secs(1), token.clone());
        token.cancel();
        assert_eq!(
            budget.next_step_timeout(Operation::Decompose),
            Err(CoactError::Cancelled {
                operation: Operation::Decompose
            })
        );
        assert!(budget.cancel_token().is_cancelled());
    }
}
