//! envsolve core library
//!
//! Resolves a list of candidate packages into a working environment by
//! trial installation in disposable sandboxes, learning from each failure.
//!
//! # Modules
//!
//! - [`domain`]     — candidates, versions, attempts, failures, budget, actions
//! - [`classifier`] — raw command output to `StructuredFailure`
//! - [`constraint`] — waiting list and learned conflicts
//! - [`command`]    — candidate sets rendered as install commands
//! - [`sandbox`]    — `Sandbox` trait with local and Docker backends
//! - [`oracle`]     — `PolicyOracle` trait with heuristic and HTTP implementations
//! - [`controller`] — the resolution state machine
//! - [`supervisor`] — bounded concurrent batch runs
//! - [`report`]     — terminal reports, artifacts and Dockerfile rendering

pub mod classifier;
pub mod command;
pub mod config;
pub mod constraint;
pub mod controller;
pub mod domain;
pub mod fakes;
pub mod metrics;
pub mod obs;
pub mod oracle;
pub mod report;
pub mod sandbox;
pub mod supervisor;
pub mod telemetry;

pub use domain::{
    Action, AttemptLog, Budget, Candidate, CandidateSet, Confidence, Decision, EnvironmentState,
    EnvsolveError, Evidence, FailureKind, FinalState, Result, RunAttempt, SpecError,
    StructuredFailure, TerminationReason, Version, VersionRange,
};

pub use classifier::classify;
pub use command::{CommandTemplates, InstallPlan};
pub use config::{EngineConfig, SandboxBackend};
pub use constraint::{ConflictRecord, ConflictSet, ConstraintStore, NarrowOutcome, WaitingList};
pub use controller::ResolutionController;
pub use oracle::{HeuristicOracle, HttpOracleConfig, HttpPolicyOracle, OracleQuery, PolicyOracle};
pub use report::{read_report, render_dockerfile, write_report, ResolutionReport};
pub use sandbox::{
    DockerConfig, DockerSandbox, ExecOutput, LocalConfig, LocalSandbox, Sandbox, SandboxError,
};
pub use supervisor::{BatchJob, BatchOutcome, BatchSupervisor};

pub use metrics::METRICS;
pub use obs::{
    emit_action_applied, emit_attempt_finished, emit_failure_classified,
    emit_resolution_finished, emit_resolution_started, emit_sandbox_recreated,
    emit_teardown_error, run_span,
};
pub use telemetry::init_tracing;

/// envsolve version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
