//! Domain models for envsolve.
//!
//! - `Candidate` / `VersionRange`: a package and its acceptable versions
//! - `StructuredFailure`: classified command failure
//! - `CandidateSet` / `RunAttempt` / `AttemptLog`: what was tried and what happened
//! - `EnvironmentState`: what has been installed so far
//! - `Budget`: remaining attempts and wall-clock time
//! - `Action`: a policy oracle's proposal
//! - `FinalState` / `TerminationReason`: how a run ended

pub mod action;
pub mod attempt;
pub mod budget;
pub mod candidate;
pub mod environment;
pub mod error;
pub mod failure;
pub mod outcome;
pub mod version;

pub use action::{Action, Decision};
pub use attempt::{AttemptLog, CandidateSet, RunAttempt};
pub use budget::{Budget, BudgetSnapshot};
pub use candidate::{normalize_name, Candidate};
pub use environment::EnvironmentState;
pub use error::{EnvsolveError, Result, SpecError};
pub use failure::{Confidence, Evidence, FailureKind, StructuredFailure};
pub use outcome::{FinalState, TerminationReason};
pub use version::{Bound, Version, VersionRange};
