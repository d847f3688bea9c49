//! Resolution controller: the explicit state machine driving one run.
//!
//! ```text
//! Idle -> Probing -> Attempting -> Evaluating -> Succeeded
//!            ^                         |
//!            +------- Retrying <-------+--> Unsatisfiable | Exhausted | InfrastructureFailed
//! ```
//!
//! One controller owns one constraint store and one budget per run. A
//! failed attempt's sandbox is thrown away, never reused. Every transition
//! is a plain match arm; there is no recursion and no error-driven control
//! flow.

use std::collections::HashSet;
use std::time::Duration;

use chrono::{DateTime, Utc};
use tokio::time::timeout;
use tracing::{debug, warn, Instrument};
use uuid::Uuid;

use crate::classifier::classify;
use crate::command::InstallPlan;
use crate::config::EngineConfig;
use crate::constraint::{ConflictRecord, ConstraintStore, NarrowOutcome};
use crate::domain::{
    normalize_name, Action, AttemptLog, Budget, Candidate, CandidateSet, Decision, EnvironmentState,
    FailureKind, FinalState, Result, RunAttempt, StructuredFailure,
    TerminationReason, Version,
};
use crate::metrics::METRICS;
use crate::obs;
use crate::oracle::{OracleQuery, PolicyOracle};
use crate::report::ResolutionReport;
use crate::sandbox::{truncate_output, ExecOutput, Sandbox, SandboxError};

/// Slack on top of the per-command timeout before the controller stops
/// waiting on a sandbox that ignores its own timeout.
const EXEC_GRACE: Duration = Duration::from_secs(5);

/// What an `exec` call returned.
#[derive(Debug)]
struct Execution {
    command: String,
    started_at: DateTime<Utc>,
    outcome: std::result::Result<ExecOutput, SandboxError>,
}

#[derive(Debug)]
enum Phase {
    Idle,
    Probing,
    Attempting(CandidateSet),
    Evaluating(CandidateSet, Execution),
    Retrying(CandidateSet, StructuredFailure),
    Done(FinalState, TerminationReason),
}

/// Result of applying one oracle action to the store.
enum Applied {
    Changed,
    Unchanged,
    /// The action emptied this candidate's range.
    Emptied(Candidate),
    GaveUp,
}

/// Mutable state of one run. Never shared between runs.
struct RunState<H> {
    run_id: String,
    base_image: String,
    store: ConstraintStore,
    env: EnvironmentState,
    budget: Budget,
    attempts: Vec<RunAttempt>,
    /// Mirror of `attempts` for an observer that may cancel the run.
    log: Option<AttemptLog>,
    decisions: Vec<Decision>,
    /// Fingerprints of candidate sets that produced a learning failure.
    failed_sets: HashSet<String>,
    /// (fingerprint, action) pairs already proposed.
    tried: HashSet<(String, Action)>,
    handle: Option<H>,
    infra_failures: u32,
    network_failures: u32,
    detail: Option<String>,
    started_at: DateTime<Utc>,
    clock: tokio::time::Instant,
}

impl<H> RunState<H> {
    fn exhausted_reason(&self) -> TerminationReason {
        if self.budget.attempts_exhausted() {
            TerminationReason::BudgetExhausted
        } else {
            TerminationReason::DeadlineExceeded
        }
    }
}

/// Drives candidates through a sandbox until a terminal state.
pub struct ResolutionController<S, O> {
    sandbox: S,
    oracle: O,
    config: EngineConfig,
}

impl<S, O> ResolutionController<S, O>
where
    S: Sandbox,
    O: PolicyOracle,
{
    pub fn new(sandbox: S, oracle: O, config: EngineConfig) -> Self {
        Self {
            sandbox,
            oracle,
            config,
        }
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    pub fn sandbox(&self) -> &S {
        &self.sandbox
    }

    /// Resolve `candidates` under a fresh run id.
    pub async fn run(&self, candidates: Vec<Candidate>) -> ResolutionReport {
        self.run_with_id(Uuid::new_v4().to_string(), candidates).await
    }

    /// Resolve `candidates`. Always returns a report; failures are terminal
    /// states, not errors.
    pub async fn run_with_id(&self, run_id: String, candidates: Vec<Candidate>) -> ResolutionReport {
        let span = obs::run_span(&run_id);
        self.drive(run_id, candidates, None).instrument(span).await
    }

    /// Like [`run_with_id`](Self::run_with_id), also appending each attempt
    /// to `log` as soon as it is evaluated.
    pub async fn run_with_log(
        &self,
        run_id: String,
        candidates: Vec<Candidate>,
        log: AttemptLog,
    ) -> ResolutionReport {
        let span = obs::run_span(&run_id);
        self.drive(run_id, candidates, Some(log)).instrument(span).await
    }

    /// Re-run a report's reproduction command in a fresh sandbox.
    pub async fn replay(&self, report: &ResolutionReport) -> Result<ExecOutput> {
        let limit = self.config.command_timeout();
        let handle = match timeout(limit, self.sandbox.create(&report.base_image)).await {
            Ok(handle) => handle?,
            Err(_) => {
                return Err(SandboxError::CreateFailed {
                    image: report.base_image.clone(),
                    reason: format!("timed out after {}s", limit.as_secs()),
                }
                .into())
            }
        };
        let output = self
            .sandbox
            .exec(&handle, &report.reproduction_command, limit)
            .await;
        let destroyed = self.sandbox.destroy(handle).await;
        let output = output?;
        destroyed?;
        Ok(output)
    }

    async fn drive(
        &self,
        run_id: String,
        candidates: Vec<Candidate>,
        log: Option<AttemptLog>,
    ) -> ResolutionReport {
        let mut run = RunState {
            run_id,
            base_image: self.config.base_image.clone(),
            store: ConstraintStore::with_candidates(candidates),
            env: EnvironmentState::new(),
            budget: Budget::new(self.config.max_attempts, self.config.run_timeout()),
            attempts: Vec::new(),
            log,
            decisions: Vec::new(),
            failed_sets: HashSet::new(),
            tried: HashSet::new(),
            handle: None,
            infra_failures: 0,
            network_failures: 0,
            detail: None,
            started_at: Utc::now(),
            clock: tokio::time::Instant::now(),
        };

        let mut phase = Phase::Idle;
        let (final_state, reason) = loop {
            phase = match phase {
                Phase::Idle => {
                    obs::emit_resolution_started(
                        &run.run_id,
                        &run.base_image,
                        run.store.waiting().len(),
                    );
                    Phase::Probing
                }
                Phase::Probing => self.probe(&mut run).await,
                Phase::Attempting(set) => self.attempt(&mut run, set).await,
                Phase::Evaluating(set, execution) => self.evaluate(&mut run, set, execution),
                Phase::Retrying(set, failure) => self.retry(&mut run, set, failure).await,
                Phase::Done(state, reason) => break (state, reason),
            };
        };

        self.finish(run, final_state, reason).await
    }

    async fn probe(&self, run: &mut RunState<S::Handle>) -> Phase {
        if run.budget.is_exhausted() {
            return Phase::Done(FinalState::Exhausted, run.exhausted_reason());
        }

        if run.handle.is_none() {
            let image = &run.base_image;
            let created = match timeout(run.budget.remaining_time(), self.sandbox.create(image)).await {
                Ok(Ok(handle)) => Ok(handle),
                Ok(Err(e)) => Err(e.to_string()),
                Err(_) => Err(format!("sandbox creation for {image} timed out")),
            };
            match created {
                Ok(handle) => run.handle = Some(handle),
                Err(reason) => {
                    warn!(run_id = %run.run_id, error = %reason, "sandbox creation failed");
                    run.detail = Some(reason);
                    return Phase::Done(
                        FinalState::InfrastructureFailed,
                        TerminationReason::SandboxUnavailable,
                    );
                }
            }
        }

        let set = run.store.snapshot(&run.env);
        if set.pending.is_empty() && !run.store.waiting().is_empty() {
            debug!(run_id = %run.run_id, "every waiting candidate conflicts with recorded failures");
            return Phase::Done(FinalState::Exhausted, TerminationReason::Stalled);
        }
        if run.failed_sets.contains(&set.fingerprint) {
            debug!(run_id = %run.run_id, fingerprint = %set.fingerprint, "candidate set already failed");
            return Phase::Done(FinalState::Exhausted, TerminationReason::Stalled);
        }
        if let Some(record) = run.store.would_conflict(&set) {
            debug!(run_id = %run.run_id, conflict = %record, "candidate set reproduces a recorded conflict");
            return Phase::Done(FinalState::Exhausted, TerminationReason::Stalled);
        }

        Phase::Attempting(set)
    }

    async fn attempt(&self, run: &mut RunState<S::Handle>, set: CandidateSet) -> Phase {
        let Some(handle) = run.handle.as_ref() else {
            return Phase::Probing;
        };
        let command = InstallPlan::render(&set, &self.config.commands).command();
        let limit = run.budget.clamp_timeout(self.config.command_timeout());

        run.budget.consume_attempt();
        METRICS.inc_attempts();

        let started_at = Utc::now();
        let outcome = match timeout(limit + EXEC_GRACE, self.sandbox.exec(handle, &command, limit)).await {
            Ok(outcome) => outcome,
            Err(_) => Ok(ExecOutput::timed_out(limit, (limit + EXEC_GRACE).as_millis() as u64)),
        };

        Phase::Evaluating(
            set,
            Execution {
                command,
                started_at,
                outcome,
            },
        )
    }

    fn evaluate(&self, run: &mut RunState<S::Handle>, set: CandidateSet, execution: Execution) -> Phase {
        let (output, failure) = match execution.outcome {
            Ok(output) if output.timed_out => {
                let failure = StructuredFailure::infrastructure(output.stderr.clone());
                (output, Some(failure))
            }
            Ok(output) => {
                let failure = classify(output.exit_code, &output.stdout, &output.stderr);
                (output, failure)
            }
            Err(e) => {
                let output = ExecOutput::failure(-1, e.to_string());
                (output, Some(StructuredFailure::infrastructure(e.to_string())))
            }
        };

        let seq = run.attempts.len() as u32 + 1;
        obs::emit_attempt_finished(
            &run.run_id,
            seq,
            output.exit_code,
            output.duration_ms,
            output.timed_out,
        );

        let limit = self.config.max_output_bytes;
        let attempt = RunAttempt {
            seq,
            command: execution.command,
            candidates: set.clone(),
            exit_code: output.exit_code,
            stdout: truncate_output(&output.stdout, limit),
            stderr: truncate_output(&output.stderr, limit),
            duration_ms: output.duration_ms,
            timed_out: output.timed_out,
            failure: failure.clone(),
            started_at: execution.started_at,
        };
        if let Some(log) = &run.log {
            log.push(attempt.clone());
        }
        run.attempts.push(attempt);

        match failure {
            Some(failure) => {
                METRICS.inc_failure(failure.kind);
                obs::emit_failure_classified(
                    &run.run_id,
                    seq,
                    &failure.kind,
                    failure.evidence.package.as_deref(),
                );
                Phase::Retrying(set, failure)
            }
            None => {
                run.env.apply(&set);
                run.store.mark_installed(&set);
                run.infra_failures = 0;
                run.network_failures = 0;
                if run.store.next().is_none() {
                    Phase::Done(FinalState::Succeeded, TerminationReason::AllInstalled)
                } else {
                    Phase::Probing
                }
            }
        }
    }

    async fn retry(&self, run: &mut RunState<S::Handle>, set: CandidateSet, failure: StructuredFailure) -> Phase {
        self.discard_sandbox(run, failure.kind).await;
        match failure.kind {
            FailureKind::InfrastructureFailure => {
                run.infra_failures += 1;
                if run.infra_failures > self.config.infra_retry_limit {
                    run.detail = Some(failure.evidence.span);
                    return Phase::Done(
                        FinalState::InfrastructureFailed,
                        TerminationReason::InfrastructureRetriesExhausted,
                    );
                }
                Phase::Probing
            }
            FailureKind::NetworkFailure => {
                run.network_failures += 1;
                if run.network_failures > self.config.network_retry_limit {
                    run.detail = Some(failure.evidence.span);
                    return Phase::Done(
                        FinalState::Exhausted,
                        TerminationReason::TransientRetriesExhausted,
                    );
                }
                if let Some(package) = &failure.evidence.package {
                    run.store.deprioritize(&normalize_name(package));
                }
                Phase::Probing
            }
            _ => self.learn(run, set, failure).await,
        }
    }

    /// Tear down the handle a failed attempt ran in. The next probe creates
    /// a fresh one, so every attempt starts from the base image.
    async fn discard_sandbox(&self, run: &mut RunState<S::Handle>, cause: FailureKind) {
        let Some(handle) = run.handle.take() else {
            return;
        };
        if let Err(e) = self.sandbox.destroy(handle).await {
            obs::emit_teardown_error(&run.run_id, &e);
        }
        obs::emit_sandbox_recreated(&run.run_id, run.attempts.len() as u32, &cause);
    }

    /// Learning failures: record what failed, ask the oracle, apply its action.
    async fn learn(&self, run: &mut RunState<S::Handle>, set: CandidateSet, failure: StructuredFailure) -> Phase {
        run.failed_sets.insert(set.fingerprint.clone());
        if let Some(record) = ConflictRecord::from_evidence(failure.kind, &failure.evidence) {
            if run.store.record_conflict(record.clone()) {
                debug!(run_id = %run.run_id, conflict = %record, "conflict recorded");
            }
        }

        if run.budget.is_exhausted() {
            return Phase::Done(FinalState::Exhausted, run.exhausted_reason());
        }

        let action = match self.consult(run, &failure).await {
            Ok(action) => action,
            Err(phase) => return phase,
        };

        if !run.tried.insert((set.fingerprint.clone(), action.clone())) {
            debug!(run_id = %run.run_id, action = %action, "action already tried for this candidate set");
            return Phase::Done(FinalState::Exhausted, TerminationReason::Stalled);
        }

        let applied = self.apply(run, &action);
        self.record_decision(run, action, !matches!(applied, Applied::Unchanged));

        match applied {
            Applied::Changed | Applied::Unchanged => Phase::Probing,
            Applied::GaveUp => {
                if run.store.unsatisfiable().is_empty() {
                    Phase::Done(FinalState::Exhausted, TerminationReason::OracleGaveUp)
                } else {
                    Phase::Done(FinalState::Unsatisfiable, TerminationReason::CandidateUnsatisfiable)
                }
            }
            Applied::Emptied(candidate) => {
                self.resolve_emptied(run, &set, &failure, candidate).await
            }
        }
    }

    /// A candidate's range is empty. The oracle may still replace or drop
    /// it; anything else proves the run unsatisfiable.
    async fn resolve_emptied(
        &self,
        run: &mut RunState<S::Handle>,
        set: &CandidateSet,
        failure: &StructuredFailure,
        candidate: Candidate,
    ) -> Phase {
        let key = candidate.key();
        let unsatisfiable =
            Phase::Done(FinalState::Unsatisfiable, TerminationReason::CandidateUnsatisfiable);
        let action = match self.consult(run, failure).await {
            Ok(action) => action,
            Err(_) => return unsatisfiable,
        };
        if !run.tried.insert((set.fingerprint.clone(), action.clone())) {
            return unsatisfiable;
        }

        let applied = match &action {
            Action::Substitute {
                package,
                alternative,
            } if normalize_name(package) == key => run
                .store
                .substitute_unsatisfiable(&key, alternative)
                .is_some(),
            Action::Skip { package } if normalize_name(package) == key => {
                run.store.skip_unsatisfiable(&key).is_some()
            }
            _ => false,
        };
        self.record_decision(run, action, applied);

        if applied {
            Phase::Probing
        } else {
            unsatisfiable
        }
    }

    /// Ask the oracle for the next action within the remaining wall-clock time.
    async fn consult(
        &self,
        run: &mut RunState<S::Handle>,
        failure: &StructuredFailure,
    ) -> std::result::Result<Action, Phase> {
        let query = OracleQuery {
            failure: failure.clone(),
            history: run.attempts.clone(),
            budget: run.budget.snapshot(),
            unsatisfiable: run.store.unsatisfiable().to_vec(),
            waiting: run.store.waiting().iter().cloned().collect(),
        };

        match timeout(run.budget.remaining_time(), self.oracle.propose(&query)).await {
            Ok(Ok(action)) => Ok(action),
            Ok(Err(e)) => {
                warn!(run_id = %run.run_id, error = %e, "policy oracle failed");
                run.detail = Some(e.to_string());
                Err(Phase::Done(FinalState::Exhausted, TerminationReason::OracleFailed))
            }
            Err(_) => Err(Phase::Done(
                FinalState::Exhausted,
                TerminationReason::DeadlineExceeded,
            )),
        }
    }

    fn apply(&self, run: &mut RunState<S::Handle>, action: &Action) -> Applied {
        match action {
            Action::Narrow {
                package,
                excluded_version,
            } => {
                let key = normalize_name(package);
                let version = match Version::parse(excluded_version) {
                    Ok(v) => v,
                    Err(e) => {
                        warn!(run_id = %run.run_id, error = %e, "oracle proposed an unparseable version");
                        return Applied::Unchanged;
                    }
                };
                reopen_installed(run, &key);
                match run.store.narrow(&key, &version) {
                    NarrowOutcome::Narrowed(_) => Applied::Changed,
                    NarrowOutcome::Unsatisfiable(candidate) => Applied::Emptied(candidate),
                    NarrowOutcome::Unchanged | NarrowOutcome::NotFound => Applied::Unchanged,
                }
            }
            Action::Substitute {
                package,
                alternative,
            } => {
                let key = normalize_name(package);
                reopen_installed(run, &key);
                match run.store.substitute(&key, alternative) {
                    Some(_) => Applied::Changed,
                    None => Applied::Unchanged,
                }
            }
            Action::AddSystemDependency { name } => {
                let known = run.env.has_system_package(name);
                if !known && run.store.add_system_dependency(name) {
                    Applied::Changed
                } else {
                    Applied::Unchanged
                }
            }
            Action::Skip { package } => {
                let key = normalize_name(package);
                reopen_installed(run, &key);
                match run.store.skip(&key) {
                    Some(_) => Applied::Changed,
                    None => Applied::Unchanged,
                }
            }
            Action::GiveUp => Applied::GaveUp,
        }
    }

    fn record_decision(&self, run: &mut RunState<S::Handle>, action: Action, applied: bool) {
        if applied {
            obs::emit_action_applied(&run.run_id, &action);
        }
        run.decisions.push(Decision {
            after_attempt: run.attempts.len() as u32,
            action,
            applied,
        });
    }

    async fn finish(
        &self,
        mut run: RunState<S::Handle>,
        final_state: FinalState,
        reason: TerminationReason,
    ) -> ResolutionReport {
        if let Some(handle) = run.handle.take() {
            if let Err(e) = self.sandbox.destroy(handle).await {
                obs::emit_teardown_error(&run.run_id, &e);
            }
        }

        let duration_ms = run.clock.elapsed().as_millis() as u64;
        METRICS.inc_runs_completed();
        obs::emit_resolution_finished(
            &run.run_id,
            &final_state,
            &reason,
            run.attempts.len(),
            duration_ms,
        );
        METRICS.flush();

        let reproduction_command =
            InstallPlan::render(&run.env.as_candidate_set(), &self.config.commands).command();

        ResolutionReport {
            run_id: run.run_id,
            final_state,
            reason,
            detail: run.detail,
            base_image: run.base_image,
            unresolved: run.store.unresolved(),
            conflicts: run.store.conflicts().iter().cloned().collect(),
            environment: run.env,
            attempts: run.attempts,
            decisions: run.decisions,
            reproduction_command,
            started_at: run.started_at,
            finished_at: Utc::now(),
        }
    }
}

/// Put an installed package back on the waiting list so an action can
/// change it.
fn reopen_installed<H>(run: &mut RunState<H>, key: &str) {
    if run.store.waiting().contains(key) {
        return;
    }
    if let Some(installed) = run.env.get(key) {
        run.store.reopen(installed.clone());
    }
}
