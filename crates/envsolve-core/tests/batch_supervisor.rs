//! Concurrent batch runs: isolation, bounded parallelism, hard timeouts.

use std::sync::Arc;
use std::time::Duration;

use envsolve_core::fakes::{ScriptedOracle, ScriptedSandbox};
use envsolve_core::{
    BatchJob, BatchSupervisor, Candidate, EngineConfig, EnvsolveError, ExecOutput, FailureKind,
    FinalState, ResolutionController, TerminationReason,
};

fn job(id: &str, packages: &[&str]) -> BatchJob {
    BatchJob {
        id: id.to_string(),
        candidates: packages.iter().map(|p| Candidate::parse(p).unwrap()).collect(),
    }
}

#[tokio::test(start_paused = true)]
async fn test_batch_never_exceeds_max_concurrent() {
    let sandbox = Arc::new(ScriptedSandbox::new().with_delay(Duration::from_secs(10)));
    let supervisor = BatchSupervisor::new(2, Duration::from_secs(3600));
    let jobs: Vec<BatchJob> = (0..6).map(|i| job(&format!("repo-{i}"), &["requests"])).collect();

    let outcomes = supervisor
        .run(jobs, |_| {
            Ok(ResolutionController::new(
                Arc::clone(&sandbox),
                ScriptedOracle::default(),
                EngineConfig::default(),
            ))
        })
        .await;

    assert_eq!(outcomes.len(), 6);
    assert!(outcomes.iter().all(|o| o.report.is_success()));
    assert!(sandbox.max_active() <= 2);
    assert_eq!(sandbox.created(), 6);
    assert_eq!(sandbox.destroyed(), 6);
}

#[tokio::test]
async fn test_batch_outcomes_keep_job_order_and_isolation() {
    let supervisor = BatchSupervisor::new(3, Duration::from_secs(3600));
    let jobs = vec![
        job("ok", &["flask"]),
        job("broken", &["pkg-a"]),
        job("also-ok", &["numpy"]),
    ];

    let outcomes = supervisor
        .run(jobs, |job| {
            let sandbox = if job.id == "broken" {
                ScriptedSandbox::with_responder(|_| ExecOutput::failure(2, "boom"))
            } else {
                ScriptedSandbox::new()
            };
            Ok(ResolutionController::new(
                sandbox,
                ScriptedOracle::default(),
                EngineConfig::default(),
            ))
        })
        .await;

    let ids: Vec<&str> = outcomes.iter().map(|o| o.job_id.as_str()).collect();
    assert_eq!(ids, ["ok", "broken", "also-ok"]);
    assert!(outcomes[0].report.is_success());
    assert_eq!(outcomes[1].report.final_state, FinalState::Exhausted);
    assert!(outcomes[2].report.is_success());
    assert!(outcomes[0].report.environment.contains("flask"));
    assert!(!outcomes[0].report.environment.contains("numpy"));
    assert_ne!(outcomes[0].report.run_id, outcomes[2].report.run_id);
}

#[tokio::test]
async fn test_factory_error_only_fails_that_job() {
    let supervisor = BatchSupervisor::new(2, Duration::from_secs(3600));
    let jobs = vec![job("good", &["flask"]), job("bad", &["requests"])];

    let outcomes = supervisor
        .run(jobs, |job| {
            if job.id == "bad" {
                return Err(EnvsolveError::InvalidConfig("no docker".into()));
            }
            Ok(ResolutionController::new(
                ScriptedSandbox::new(),
                ScriptedOracle::default(),
                EngineConfig::default(),
            ))
        })
        .await;

    assert!(outcomes[0].report.is_success());
    let bad = &outcomes[1].report;
    assert_eq!(bad.final_state, FinalState::InfrastructureFailed);
    assert_eq!(bad.reason, TerminationReason::SandboxUnavailable);
    assert!(bad.detail.as_deref().unwrap_or_default().contains("no docker"));
    assert_eq!(bad.unresolved.len(), 1);
}

#[tokio::test(start_paused = true)]
async fn test_hard_timeout_cancels_run_and_releases_sandbox() {
    // The sandbox ignores cancellation until the hard limit fires.
    let sandbox = Arc::new(ScriptedSandbox::new().with_delay(Duration::from_secs(600)));
    let supervisor =
        BatchSupervisor::new(1, Duration::from_secs(60)).with_grace(Duration::from_secs(1));
    let config = EngineConfig {
        command_timeout_secs: 900,
        run_timeout_secs: 3600,
        ..EngineConfig::default()
    };

    let outcomes = supervisor
        .run(vec![job("slow", &["tensorflow"])], |_| {
            Ok(ResolutionController::new(
                Arc::clone(&sandbox),
                ScriptedOracle::default(),
                config.clone(),
            ))
        })
        .await;

    let report = &outcomes[0].report;
    assert_eq!(report.final_state, FinalState::Exhausted);
    assert_eq!(report.reason, TerminationReason::RunTimedOut);
    assert!(report.attempts.is_empty());
    assert_eq!(sandbox.created(), 1);
}

#[tokio::test(start_paused = true)]
async fn test_hard_timeout_keeps_attempts_finished_before_cancel() {
    // Each exec takes 40s: the first one returns a network failure, the
    // retry is still running when the 61s hard limit fires.
    let sandbox = Arc::new(
        ScriptedSandbox::with_responder(|_| {
            ExecOutput::failure(1, "Could not resolve host: pypi.org\n")
        })
        .with_delay(Duration::from_secs(40)),
    );
    let supervisor =
        BatchSupervisor::new(1, Duration::from_secs(60)).with_grace(Duration::from_secs(1));
    let config = EngineConfig {
        command_timeout_secs: 900,
        run_timeout_secs: 3600,
        ..EngineConfig::default()
    };

    let outcomes = supervisor
        .run(vec![job("flaky", &["requests"])], |_| {
            Ok(ResolutionController::new(
                Arc::clone(&sandbox),
                ScriptedOracle::default(),
                config.clone(),
            ))
        })
        .await;

    let report = &outcomes[0].report;
    assert_eq!(report.reason, TerminationReason::RunTimedOut);
    assert_eq!(report.attempts.len(), 1);
    assert_eq!(report.attempts[0].seq, 1);
    assert_eq!(
        report.attempts[0].failure.as_ref().map(|f| f.kind),
        Some(FailureKind::NetworkFailure)
    );
    assert_eq!(sandbox.created(), 2);
}
