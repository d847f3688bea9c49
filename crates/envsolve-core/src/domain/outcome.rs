//! Terminal states of a resolution run.

use std::fmt;

use serde::{Deserialize, Serialize};

/// How a run ended.
///
/// `Unsatisfiable` is proof that a candidate cannot be installed;
/// `Exhausted` is inconclusive. Callers must not treat them alike.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FinalState {
    Succeeded,
    Unsatisfiable,
    Exhausted,
    InfrastructureFailed,
}

impl FinalState {
    pub fn is_success(self) -> bool {
        self == Self::Succeeded
    }
}

impl fmt::Display for FinalState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Succeeded => "succeeded",
            Self::Unsatisfiable => "unsatisfiable",
            Self::Exhausted => "exhausted",
            Self::InfrastructureFailed => "infrastructure_failed",
        })
    }
}

/// Why a run reached its final state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TerminationReason {
    AllInstalled,
    CandidateUnsatisfiable,
    BudgetExhausted,
    DeadlineExceeded,
    TransientRetriesExhausted,
    /// No untried candidate set or action remained.
    Stalled,
    OracleGaveUp,
    OracleFailed,
    InfrastructureRetriesExhausted,
    /// The sandbox could not be created.
    SandboxUnavailable,
    /// The supervisor's wall-clock backstop cancelled the run.
    RunTimedOut,
}

impl fmt::Display for TerminationReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::AllInstalled => "all_installed",
            Self::CandidateUnsatisfiable => "candidate_unsatisfiable",
            Self::BudgetExhausted => "budget_exhausted",
            Self::DeadlineExceeded => "deadline_exceeded",
            Self::TransientRetriesExhausted => "transient_retries_exhausted",
            Self::Stalled => "stalled",
            Self::OracleGaveUp => "oracle_gave_up",
            Self::OracleFailed => "oracle_failed",
            Self::InfrastructureRetriesExhausted => "infrastructure_retries_exhausted",
            Self::SandboxUnavailable => "sandbox_unavailable",
            Self::RunTimedOut => "run_timed_out",
        })
    }
}
