//! Structured observability hooks for the resolution lifecycle.
//!
//! This module provides:
//! - Run-scoped tracing spans via [`run_span`]
//! - Emission functions for key lifecycle events: start, attempt, failure,
//!   action, sandbox recreation, finish
//!
//! Events are emitted at `info!` level; filter with `RUST_LOG`.

use std::fmt::Display;

use tracing::{info, warn};

/// A run-scoped span tagged with the run_id.
///
/// Attach it to the run future with `tracing::Instrument` rather than
/// entering it, so the future stays `Send` across sandbox awaits.
///
/// # Example
///
/// ```ignore
/// controller.run(candidates).instrument(run_span(&run_id)).await;
/// ```
pub fn run_span(run_id: &str) -> tracing::Span {
    tracing::info_span!("envsolve.run", run_id = %run_id)
}

/// Emit event: resolution started with the initial waiting list size.
pub fn emit_resolution_started(run_id: &str, base_image: &str, candidates: usize) {
    info!(
        event = "resolution.started",
        run_id = %run_id,
        base_image = %base_image,
        candidates = candidates,
    );
}

/// Emit event: one sandbox attempt returned.
pub fn emit_attempt_finished(run_id: &str, seq: u32, exit_code: i32, duration_ms: u64, timed_out: bool) {
    info!(
        event = "attempt.finished",
        run_id = %run_id,
        seq = seq,
        exit_code = exit_code,
        duration_ms = duration_ms,
        timed_out = timed_out,
    );
}

/// Emit event: an attempt's output was classified as a failure.
pub fn emit_failure_classified(run_id: &str, seq: u32, kind: &dyn Display, package: Option<&str>) {
    info!(
        event = "failure.classified",
        run_id = %run_id,
        seq = seq,
        kind = %kind,
        package = package.unwrap_or("-"),
    );
}

/// Emit event: an oracle action was applied to the constraint store.
pub fn emit_action_applied(run_id: &str, action: &dyn Display) {
    info!(event = "action.applied", run_id = %run_id, action = %action);
}

/// Emit event: the sandbox was torn down after a failed attempt and will be
/// recreated from the base image.
pub fn emit_sandbox_recreated(run_id: &str, after_attempt: u32, cause: &dyn Display) {
    warn!(
        event = "sandbox.recreated",
        run_id = %run_id,
        after_attempt = after_attempt,
        cause = %cause,
    );
}

/// Emit event: resolution reached a terminal state.
pub fn emit_resolution_finished(
    run_id: &str,
    final_state: &dyn Display,
    reason: &dyn Display,
    attempts: usize,
    duration_ms: u64,
) {
    info!(
        event = "resolution.finished",
        run_id = %run_id,
        final_state = %final_state,
        reason = %reason,
        attempts = attempts,
        duration_ms = duration_ms,
    );
}

/// Emit event: sandbox teardown failed at the end of a run (warning level).
pub fn emit_teardown_error(run_id: &str, error: &dyn Display) {
    warn!(event = "sandbox.teardown_error", run_id = %run_id, error = %error);
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_run_span_create() {
        let span = run_span("test-run-id");
        let _entered = span.enter();
    }
}
