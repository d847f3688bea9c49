//! Candidate sets and the immutable attempt log entries built from them.

use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

use super::candidate::Candidate;
use super::failure::StructuredFailure;

/// A complete, concrete set of packages submitted to the sandbox in one attempt.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CandidateSet {
    /// Every package in the attempt: installed ones plus pending ones.
    pub packages: Vec<Candidate>,
    pub system_packages: Vec<String>,
    /// Keys of the waiting-list entries this attempt tries to install.
    pub pending: Vec<String>,
    /// True when every outstanding waiting-list entry is part of the attempt.
    pub covers_waiting_list: bool,
    /// SHA-256 over the canonical rendering of the set.
    pub fingerprint: String,
}

impl CandidateSet {
    pub fn new(
        packages: Vec<Candidate>,
        system_packages: Vec<String>,
        pending: Vec<String>,
        covers_waiting_list: bool,
    ) -> Self {
        let fingerprint = fingerprint(&packages, &system_packages, covers_waiting_list);
        Self {
            packages,
            system_packages,
            pending,
            covers_waiting_list,
            fingerprint,
        }
    }

    pub fn get(&self, key: &str) -> Option<&Candidate> {
        self.packages.iter().find(|c| c.key() == key)
    }

    pub fn is_empty(&self) -> bool {
        self.packages.is_empty() && self.system_packages.is_empty()
    }
}

/// Order-independent digest of a candidate set.
fn fingerprint(packages: &[Candidate], system_packages: &[String], verify: bool) -> String {
    let mut lines: Vec<String> = packages
        .iter()
        .map(|c| format!("pkg:{}{}", c.key(), c.range()))
        .chain(system_packages.iter().map(|s| format!("sys:{s}")))
        .collect();
    lines.sort();
    lines.dedup();
    if verify {
        lines.push("verify".to_string());
    }

    let mut hasher = Sha256::new();
    for line in &lines {
        hasher.update(line.as_bytes());
        hasher.update(b"\n");
    }
    hex::encode(hasher.finalize())
}

/// One sandbox execution. Appended to the attempt log and never rewritten.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RunAttempt {
    /// 1-based position in the attempt log.
    pub seq: u32,
    pub command: String,
    pub candidates: CandidateSet,
    /// `-1` when the command did not exit normally.
    pub exit_code: i32,
    pub stdout: String,
    pub stderr: String,
    pub duration_ms: u64,
    pub timed_out: bool,
    pub failure: Option<StructuredFailure>,
    pub started_at: DateTime<Utc>,
}

impl RunAttempt {
    pub fn succeeded(&self) -> bool {
        self.failure.is_none()
    }
}

/// Append-only copy of a run's attempts, readable from outside the run.
///
/// Survives cancellation of the run future, so a caller that aborts a run
/// can still report what it executed.
#[derive(Debug, Clone, Default)]
pub struct AttemptLog(Arc<Mutex<Vec<RunAttempt>>>);

impl AttemptLog {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&self, attempt: RunAttempt) {
        self.entries().push(attempt);
    }

    pub fn snapshot(&self) -> Vec<RunAttempt> {
        self.entries().clone()
    }

    pub fn len(&self) -> usize {
        self.entries().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn entries(&self) -> MutexGuard<'_, Vec<RunAttempt>> {
        // Entries are only ever appended whole, so a poisoned lock still
        // holds a consistent log.
        self.0.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn c(spec: &str) -> Candidate {
        Candidate::parse(spec).unwrap()
    }

    #[test]
    fn test_fingerprint_ignores_order() {
        let a = CandidateSet::new(vec![c("a==1"), c("b>=2")], vec!["libpq-dev".into()], vec![], false);
        let b = CandidateSet::new(vec![c("b>=2"), c("a==1")], vec!["libpq-dev".into()], vec![], false);
        assert_eq!(a.fingerprint, b.fingerprint);
        assert_eq!(a.fingerprint.len(), 64);
    }

    #[test]
    fn test_fingerprint_tracks_ranges_and_verification() {
        let pinned = CandidateSet::new(vec![c("a==2.0")], vec![], vec![], true);
        let narrowed = CandidateSet::new(vec![c("a<2.0")], vec![], vec![], true);
        let unverified = CandidateSet::new(vec![c("a==2.0")], vec![], vec![], false);
        assert_ne!(pinned.fingerprint, narrowed.fingerprint);
        assert_ne!(pinned.fingerprint, unverified.fingerprint);
    }

    #[test]
    fn test_attempt_log_clones_share_entries() {
        let log = AttemptLog::new();
        let observer = log.clone();
        assert!(observer.is_empty());

        log.push(RunAttempt {
            seq: 1,
            command: "true".into(),
            candidates: CandidateSet::new(vec![c("a")], vec![], vec!["a".into()], true),
            exit_code: 0,
            stdout: String::new(),
            stderr: String::new(),
            duration_ms: 3,
            timed_out: false,
            failure: None,
            started_at: Utc::now(),
        });

        assert_eq!(observer.len(), 1);
        assert!(observer.snapshot()[0].succeeded());
    }

    #[test]
    fn test_get_uses_normalised_key() {
        let set = CandidateSet::new(vec![c("Zope.Interface>=5")], vec![], vec![], false);
        assert!(set.get("zope-interface").is_some());
        assert!(set.get("zope").is_none());
    }
}
