//! Bounded worker pool running independent resolution jobs.
//!
//! Each job gets its own controller (sandbox, oracle, store) from a
//! factory. Nothing mutable is shared between jobs. A semaphore caps how
//! many run at once and a hard wall-clock timeout backs up the
//! cooperative deadline inside each run.

use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use serde::{Deserialize, Serialize};
use tokio::sync::Semaphore;
use tracing::{error, info, warn};
use uuid::Uuid;

use crate::config::EngineConfig;
use crate::controller::ResolutionController;
use crate::domain::{AttemptLog, Candidate, FinalState, Result, TerminationReason};
use crate::oracle::PolicyOracle;
use crate::report::ResolutionReport;
use crate::sandbox::Sandbox;

/// Extra time granted past the run timeout before a job is cancelled, so
/// the cooperative deadline normally wins.
const CANCEL_GRACE: Duration = Duration::from_secs(30);

/// One unit of batch work: typically one repository.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BatchJob {
    pub id: String,
    pub candidates: Vec<Candidate>,
}

enum Pending {
    Ready(ResolutionReport),
    Running(tokio::task::JoinHandle<ResolutionReport>),
}

/// Report for one job, tagged with the job id.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BatchOutcome {
    pub job_id: String,
    pub report: ResolutionReport,
}

#[derive(Debug, Clone)]
pub struct BatchSupervisor {
    max_concurrent: usize,
    run_timeout: Duration,
    grace: Duration,
}

impl BatchSupervisor {
    pub fn new(max_concurrent: usize, run_timeout: Duration) -> Self {
        Self {
            max_concurrent: max_concurrent.max(1),
            run_timeout,
            grace: CANCEL_GRACE,
        }
    }

    pub fn from_config(config: &EngineConfig) -> Self {
        Self::new(config.max_concurrent, config.run_timeout())
    }

    /// Override the cancellation grace period.
    pub fn with_grace(mut self, grace: Duration) -> Self {
        self.grace = grace;
        self
    }

    pub fn max_concurrent(&self) -> usize {
        self.max_concurrent
    }

    /// Run every job and return outcomes in job order.
    ///
    /// `factory` builds a fresh controller per job. A factory error or a
    /// panicking job yields an `InfrastructureFailed` report for that job
    /// only; a job that outlives the hard timeout is cancelled (dropping
    /// its sandbox handle) and reported as `Exhausted` with the attempts it
    /// finished before cancellation.
    pub async fn run<S, O, F>(&self, jobs: Vec<BatchJob>, factory: F) -> Vec<BatchOutcome>
    where
        S: Sandbox + 'static,
        O: PolicyOracle + 'static,
        F: Fn(&BatchJob) -> Result<ResolutionController<S, O>>,
    {
        let semaphore = Arc::new(Semaphore::new(self.max_concurrent));
        let hard_limit = self.run_timeout + self.grace;
        info!(jobs = jobs.len(), max_concurrent = self.max_concurrent, "batch started");

        let mut pending = Vec::with_capacity(jobs.len());
        for job in jobs {
            let controller = match factory(&job) {
                Ok(controller) => controller,
                Err(e) => {
                    error!(job_id = %job.id, error = %e, "could not build controller");
                    let mut report = aborted(
                        &job,
                        "",
                        FinalState::InfrastructureFailed,
                        TerminationReason::SandboxUnavailable,
                    );
                    report.detail = Some(e.to_string());
                    pending.push((job, Pending::Ready(report)));
                    continue;
                }
            };

            let semaphore = Arc::clone(&semaphore);
            let job_for_task = job.clone();
            let handle = tokio::spawn(async move {
                let _permit = semaphore.acquire_owned().await.ok();
                let base_image = controller.config().base_image.clone();
                let run_id = Uuid::new_v4().to_string();
                let log = AttemptLog::new();
                let started_at = Utc::now();
                match tokio::time::timeout(
                    hard_limit,
                    controller.run_with_log(
                        run_id.clone(),
                        job_for_task.candidates.clone(),
                        log.clone(),
                    ),
                )
                .await
                {
                    Ok(report) => report,
                    Err(_) => {
                        warn!(job_id = %job_for_task.id, run_id = %run_id, "run cancelled by wall-clock timeout");
                        let mut report = aborted(
                            &job_for_task,
                            &base_image,
                            FinalState::Exhausted,
                            TerminationReason::RunTimedOut,
                        );
                        report.run_id = run_id;
                        report.attempts = log.snapshot();
                        report.started_at = started_at;
                        report
                    }
                }
            });
            pending.push((job, Pending::Running(handle)));
        }

        let mut outcomes = Vec::with_capacity(pending.len());
        for (job, state) in pending {
            let report = match state {
                Pending::Ready(report) => report,
                Pending::Running(handle) => match handle.await {
                    Ok(report) => report,
                    Err(e) => {
                        error!(job_id = %job.id, error = %e, "job task failed");
                        let mut report = aborted(
                            &job,
                            "",
                            FinalState::InfrastructureFailed,
                            TerminationReason::SandboxUnavailable,
                        );
                        report.detail = Some(e.to_string());
                        report
                    }
                },
            };
            outcomes.push(BatchOutcome {
                job_id: job.id,
                report,
            });
        }

        info!(
            jobs = outcomes.len(),
            succeeded = outcomes.iter().filter(|o| o.report.is_success()).count(),
            "batch finished"
        );
        outcomes
    }
}

fn aborted(job: &BatchJob, base_image: &str, state: FinalState, reason: TerminationReason) -> ResolutionReport {
    ResolutionReport::aborted(
        Uuid::new_v4().to_string(),
        base_image,
        job.candidates.clone(),
        state,
        reason,
        Utc::now(),
    )
}
