//! Attempt and wall-clock allowance for one resolution run.

use std::time::Duration;

use serde::{Deserialize, Serialize};
use tokio::time::Instant;

/// Remaining attempts and remaining wall-clock time.
///
/// Both only ever decrease. The run is exhausted when either reaches zero.
#[derive(Debug, Clone)]
pub struct Budget {
    max_attempts: u32,
    remaining_attempts: u32,
    deadline: Instant,
}

impl Budget {
    pub fn new(max_attempts: u32, wall_clock: Duration) -> Self {
        Self {
            max_attempts,
            remaining_attempts: max_attempts,
            deadline: Instant::now() + wall_clock,
        }
    }

    pub fn max_attempts(&self) -> u32 {
        self.max_attempts
    }

    pub fn remaining_attempts(&self) -> u32 {
        self.remaining_attempts
    }

    pub fn remaining_time(&self) -> Duration {
        self.deadline.saturating_duration_since(Instant::now())
    }

    pub fn attempts_exhausted(&self) -> bool {
        self.remaining_attempts == 0
    }

    pub fn deadline_passed(&self) -> bool {
        self.remaining_time().is_zero()
    }

    pub fn is_exhausted(&self) -> bool {
        self.attempts_exhausted() || self.deadline_passed()
    }

    /// Spend one attempt.
    pub fn consume_attempt(&mut self) {
        self.remaining_attempts = self.remaining_attempts.saturating_sub(1);
    }

    /// Clamp a per-command timeout to the time left in the run.
    pub fn clamp_timeout(&self, per_command: Duration) -> Duration {
        per_command.min(self.remaining_time())
    }

    pub fn snapshot(&self) -> BudgetSnapshot {
        BudgetSnapshot {
            max_attempts: self.max_attempts,
            remaining_attempts: self.remaining_attempts,
            remaining_ms: self.remaining_time().as_millis() as u64,
        }
    }
}

/// Serializable view of a [`Budget`], passed to policy oracles.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct BudgetSnapshot {
    pub max_attempts: u32,
    pub remaining_attempts: u32,
    pub remaining_ms: u64,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test(start_paused = true)]
    async fn test_budget_decreases_monotonically() {
        let mut budget = Budget::new(2, Duration::from_secs(60));
        assert!(!budget.is_exhausted());
        budget.consume_attempt();
        assert_eq!(budget.remaining_attempts(), 1);
        budget.consume_attempt();
        budget.consume_attempt();
        assert_eq!(budget.remaining_attempts(), 0);
        assert!(budget.attempts_exhausted());
    }

    #[tokio::test(start_paused = true)]
    async fn test_deadline_clamps_timeout() {
        let budget = Budget::new(5, Duration::from_secs(10));
        tokio::time::advance(Duration::from_secs(7)).await;
        assert_eq!(
            budget.clamp_timeout(Duration::from_secs(60)),
            Duration::from_secs(3)
        );
        tokio::time::advance(Duration::from_secs(5)).await;
        assert!(budget.deadline_passed());
        assert!(budget.is_exhausted());
        assert_eq!(budget.snapshot().remaining_ms, 0);
    }
}
