//! Wall-clock budgets.

use std::time::{Duration, Instant};

use crate::{Error, Result};

/// A wall-clock budget checked at iteration boundaries.
///
/// Work is never interrupted asynchronously: loops call
/// [`check`](Self::check) or [`expired`](Self::expired) between steps and
/// abandon the remaining work when the budget is spent.
#[derive(Debug, Clone, Copy)]
pub struct Deadline {
    operation: &'static str,
    started: Instant,
    budget: Duration,
}

impl Deadline {
    /// Starts a budget now.
    #[must_use]
    pub fn start(operation: &'static str, budget: Duration) -> Self {
        Self {
            operation,
            started: Instant::now(),
            budget,
        }
    }

    /// The configured budget.
    #[must_use]
    pub const fn budget(&self) -> Duration {
        self.budget
    }

    /// Time spent so far.
    #[must_use]
    pub fn elapsed(&self) -> Duration {
        self.started.elapsed()
    }

    /// Time left, zero once expired.
    #[must_use]
    pub fn remaining(&self) -> Duration {
        self.budget.saturating_sub(self.elapsed())
    }

    /// Whether the budget is spent.
    #[must_use]
    pub fn expired(&self) -> bool {
        self.elapsed() >= self.budget
    }

    /// Checkpoint.
    ///
    /// # Errors
    ///
    /// Returns [`Error::DeadlineExceeded`] once the budget is spent.
    pub fn check(&self) -> Result<()> {
        if self.expired() {
            return Err(Error::DeadlineExceeded {
                operation: self.operation.to_string(),
                budget: self.budget,
            });
        }
        Ok(())
    }
}
