//! Global atomic counters for envsolve observability.
//!
//! Counters are incremented silently at the call site. Call
//! [`Metrics::flush`] to emit current values as a single
//! `tracing::info!` event (e.g. at the end of a run).

use std::sync::atomic::{AtomicU64, Ordering};

use crate::domain::FailureKind;

const FAILURE_KINDS: usize = 7;

/// Global metrics singleton.
pub static METRICS: Metrics = Metrics::new();

/// Relaxed atomic counters, one per tracked event.
pub struct Metrics {
    attempts_executed: AtomicU64,
    runs_completed: AtomicU64,
    sandboxes_created: AtomicU64,
    sandboxes_destroyed: AtomicU64,
    failures: [AtomicU64; FAILURE_KINDS],
}

impl Default for Metrics {
    fn default() -> Self {
        Self::new()
    }
}

impl Metrics {
    pub const fn new() -> Self {
        Self {
            attempts_executed: AtomicU64::new(0),
            runs_completed: AtomicU64::new(0),
            sandboxes_created: AtomicU64::new(0),
            sandboxes_destroyed: AtomicU64::new(0),
            failures: [const { AtomicU64::new(0) }; FAILURE_KINDS],
        }
    }

    /// Increment the attempts-executed counter by one.
    pub fn inc_attempts(&self) {
        self.attempts_executed.fetch_add(1, Ordering::Relaxed);
        tracing::trace!(metric = "attempts_executed", "counter incremented");
    }

    pub fn inc_runs_completed(&self) {
        self.runs_completed.fetch_add(1, Ordering::Relaxed);
        tracing::trace!(metric = "runs_completed", "counter incremented");
    }

    pub fn inc_sandboxes_created(&self) {
        self.sandboxes_created.fetch_add(1, Ordering::Relaxed);
        tracing::trace!(metric = "sandboxes_created", "counter incremented");
    }

    pub fn inc_sandboxes_destroyed(&self) {
        self.sandboxes_destroyed.fetch_add(1, Ordering::Relaxed);
        tracing::trace!(metric = "sandboxes_destroyed", "counter incremented");
    }

    /// Count one classified failure of `kind`.
    pub fn inc_failure(&self, kind: FailureKind) {
        self.failures[kind as usize].fetch_add(1, Ordering::Relaxed);
        tracing::trace!(metric = "failures", kind = %kind, "counter incremented");
    }

    /// Emit all current counter values as a single `info!` event.
    ///
    /// Call this at natural boundaries (end of a run, end of a batch)
    /// rather than on every increment.
    pub fn flush(&self) {
        tracing::info!(
            metric = "flush",
            attempts_executed = self.attempts_executed(),
            runs_completed = self.runs_completed(),
            sandboxes_created = self.sandboxes_created(),
            sandboxes_destroyed = self.sandboxes_destroyed(),
            version_conflicts = self.failures(FailureKind::VersionConflict),
            missing_system_libraries = self.failures(FailureKind::MissingSystemLibrary),
            network_failures = self.failures(FailureKind::NetworkFailure),
            infrastructure_failures = self.failures(FailureKind::InfrastructureFailure),
            build_failures = self.failures(FailureKind::BuildOrCompileFailure),
            test_failures = self.failures(FailureKind::TestFailure),
            unrecognized_failures = self.failures(FailureKind::Unrecognized),
        );
    }

    pub fn attempts_executed(&self) -> u64 {
        self.attempts_executed.load(Ordering::Relaxed)
    }

    pub fn runs_completed(&self) -> u64 {
        self.runs_completed.load(Ordering::Relaxed)
    }

    pub fn sandboxes_created(&self) -> u64 {
        self.sandboxes_created.load(Ordering::Relaxed)
    }

    pub fn sandboxes_destroyed(&self) -> u64 {
        self.sandboxes_destroyed.load(Ordering::Relaxed)
    }

    /// Read the failure count for one kind.
    pub fn failures(&self, kind: FailureKind) -> u64 {
        self.failures[kind as usize].load(Ordering::Relaxed)
    }

    /// Reset all counters to zero (useful in tests).
    pub fn reset(&self) {
        self.attempts_executed.store(0, Ordering::Relaxed);
        self.runs_completed.store(0, Ordering::Relaxed);
        self.sandboxes_created.store(0, Ordering::Relaxed);
        self.sandboxes_destroyed.store(0, Ordering::Relaxed);
        for counter in &self.failures {
            counter.store(0, Ordering::Relaxed);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn counters_increment() {
        let m = Metrics::new();
        assert_eq!(m.attempts_executed(), 0);
        m.inc_attempts();
        m.inc_attempts();
        assert_eq!(m.attempts_executed(), 2);

        m.inc_sandboxes_created();
        m.inc_sandboxes_destroyed();
        assert_eq!(m.sandboxes_created(), 1);
        assert_eq!(m.sandboxes_destroyed(), 1);
    }

    #[test]
    fn failures_are_counted_per_kind() {
        let m = Metrics::new();
        m.inc_failure(FailureKind::NetworkFailure);
        m.inc_failure(FailureKind::NetworkFailure);
        m.inc_failure(FailureKind::Unrecognized);
        assert_eq!(m.failures(FailureKind::NetworkFailure), 2);
        assert_eq!(m.failures(FailureKind::Unrecognized), 1);
        assert_eq!(m.failures(FailureKind::VersionConflict), 0);
    }

    #[test]
    fn reset_zeroes_all() {
        let m = Metrics::new();
        m.inc_attempts();
        m.inc_runs_completed();
        m.inc_failure(FailureKind::TestFailure);
        m.reset();
        assert_eq!(m.attempts_executed(), 0);
        assert_eq!(m.runs_completed(), 0);
        assert_eq!(m.failures(FailureKind::TestFailure), 0);
    }
}
