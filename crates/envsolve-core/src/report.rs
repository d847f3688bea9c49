//! Resolution reports and their on-disk artifacts.
//!
//! This module provides:
//! - the terminal [`ResolutionReport`] emitted by every run
//! - digest-verified persistence under `<dir>/<run_id>/`
//! - a Dockerfile rendering of the resolved environment

use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

use crate::command::shell_quote;
use crate::constraint::ConflictRecord;
use crate::domain::{
    Candidate, Decision, EnvironmentState, EnvsolveError, FinalState, Result, RunAttempt,
    TerminationReason,
};

/// Everything a run produced, for external persistence.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ResolutionReport {
    pub run_id: String,
    pub final_state: FinalState,
    pub reason: TerminationReason,
    /// Free-form context for the reason, e.g. the oracle or sandbox error.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub detail: Option<String>,
    pub base_image: String,
    pub environment: EnvironmentState,
    pub attempts: Vec<RunAttempt>,
    pub decisions: Vec<Decision>,
    /// Candidates that are not part of the environment.
    pub unresolved: Vec<Candidate>,
    pub conflicts: Vec<ConflictRecord>,
    /// One shell command that rebuilds the environment from the base image.
    pub reproduction_command: String,
    pub started_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,
}

impl ResolutionReport {
    pub fn is_success(&self) -> bool {
        self.final_state.is_success()
    }

    /// A report for a run that never produced one of its own, e.g. one
    /// cancelled by the supervisor.
    pub fn aborted(
        run_id: impl Into<String>,
        base_image: impl Into<String>,
        candidates: Vec<Candidate>,
        final_state: FinalState,
        reason: TerminationReason,
        started_at: DateTime<Utc>,
    ) -> Self {
        Self {
            run_id: run_id.into(),
            final_state,
            reason,
            detail: None,
            base_image: base_image.into(),
            environment: EnvironmentState::new(),
            attempts: Vec::new(),
            decisions: Vec::new(),
            unresolved: candidates,
            conflicts: Vec::new(),
            reproduction_command: String::new(),
            started_at,
            finished_at: Utc::now(),
        }
    }

    pub fn duration_ms(&self) -> u64 {
        (self.finished_at - self.started_at)
            .num_milliseconds()
            .max(0) as u64
    }
}

fn sha256_hex(bytes: &[u8]) -> String {
    hex::encode(Sha256::digest(bytes))
}

/// Persist `<dir>/<run_id>/resolution.json` and `<dir>/<run_id>/resolution.digest`.
pub fn write_report(report: &ResolutionReport, dir: &Path) -> Result<PathBuf> {
    let run_dir = dir.join(&report.run_id);
    std::fs::create_dir_all(&run_dir)?;

    let report_path = run_dir.join("resolution.json");
    let digest_path = run_dir.join("resolution.digest");
    let json = serde_json::to_vec_pretty(report)?;
    let digest = sha256_hex(&json);

    std::fs::write(&report_path, &json)?;
    std::fs::write(&digest_path, digest.as_bytes())?;

    Ok(report_path)
}

/// Read and verify `<dir>/<run_id>/resolution.json` integrity.
pub fn read_report(run_id: &str, dir: &Path) -> Result<ResolutionReport> {
    let run_dir = dir.join(run_id);
    let json = std::fs::read(run_dir.join("resolution.json"))?;
    let digest = std::fs::read_to_string(run_dir.join("resolution.digest"))?;
    let actual = sha256_hex(&json);
    if digest.trim() != actual {
        return Err(EnvsolveError::DigestMismatch {
            expected: digest.trim().to_string(),
            actual,
        });
    }

    Ok(serde_json::from_slice(&json)?)
}

/// Dockerfile that rebuilds `env` on top of `base_image`.
pub fn render_dockerfile(base_image: &str, env: &EnvironmentState) -> String {
    let mut out = format!("FROM {base_image}\n");

    let system: Vec<String> = env.system_packages().map(|s| shell_quote(s)).collect();
    if !system.is_empty() {
        out.push_str(&format!(
            "RUN apt-get update -qq \\\n    && DEBIAN_FRONTEND=noninteractive apt-get install -y -qq --no-install-recommends {} \\\n    && rm -rf /var/lib/apt/lists/*\n",
            system.join(" ")
        ));
    }

    let packages: Vec<String> = env.candidates().map(|c| shell_quote(&c.to_string())).collect();
    if !packages.is_empty() {
        out.push_str(&format!(
            "RUN python -m pip install --no-cache-dir --no-input {}\n",
            packages.join(" ")
        ));
    }

    out
}
