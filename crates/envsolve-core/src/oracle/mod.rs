//! Policy oracles: pluggable decision functions for the next action.
//!
//! The controller depends only on [`PolicyOracle`]. Every call carries the
//! full context in an [`OracleQuery`]; oracles keep no state between calls
//! that the controller relies on.
//!
//! - [`heuristic`] — `HeuristicOracle`: deterministic default rules
//! - [`http`]      — `HttpPolicyOracle`: delegates to an external decision service

pub mod heuristic;
pub mod http;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

pub use heuristic::HeuristicOracle;
pub use http::{HttpOracleConfig, HttpPolicyOracle};

use crate::domain::{Action, BudgetSnapshot, Candidate, Result, RunAttempt, StructuredFailure};

/// Everything an oracle may look at when proposing an action.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OracleQuery {
    pub failure: StructuredFailure,
    /// Attempt log so far; the last entry produced `failure`.
    pub history: Vec<RunAttempt>,
    pub budget: BudgetSnapshot,
    /// Candidates whose ranges are empty. Non-empty after a narrow that
    /// left nothing to try, in which case only `Substitute`, `Skip` or
    /// `GiveUp` are useful.
    pub unsatisfiable: Vec<Candidate>,
    /// Candidates still waiting to be installed.
    pub waiting: Vec<Candidate>,
}

impl OracleQuery {
    pub fn last_attempt(&self) -> Option<&RunAttempt> {
        self.history.last()
    }

    /// Find a candidate by normalised key in the last attempt or the waiting list.
    pub fn candidate(&self, key: &str) -> Option<&Candidate> {
        self.last_attempt()
            .and_then(|a| a.candidates.get(key))
            .or_else(|| self.waiting.iter().find(|c| c.key() == key))
    }

    pub fn is_unsatisfiable(&self, key: &str) -> bool {
        self.unsatisfiable.iter().any(|c| c.key() == key)
    }
}

/// Proposes the next resolution step after a learning failure.
#[async_trait]
pub trait PolicyOracle: Send + Sync {
    async fn propose(&self, query: &OracleQuery) -> Result<Action>;
}

#[async_trait]
impl<T: PolicyOracle + ?Sized> PolicyOracle for Box<T> {
    async fn propose(&self, query: &OracleQuery) -> Result<Action> {
        (**self).propose(query).await
    }
}

#[async_trait]
impl<T: PolicyOracle + ?Sized> PolicyOracle for std::sync::Arc<T> {
    async fn propose(&self, query: &OracleQuery) -> Result<Action> {
        (**self).propose(query).await
    }
}
