//! Child-process execution shared by the sandbox backends.

use std::process::Stdio;
use std::time::{Duration, Instant};

use tokio::process::Command;

use super::error::{SandboxError, SandboxResult};
use super::ExecOutput;

/// Run `command` to completion or until `timeout` elapses.
///
/// The child is spawned with `kill_on_drop`, so when the timeout fires the
/// in-flight process is killed rather than awaited.
pub(crate) async fn run_with_timeout(
    mut command: Command,
    timeout: Duration,
) -> SandboxResult<ExecOutput> {
    command
        .stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .kill_on_drop(true);

    let start = Instant::now();
    let child = command.spawn().map_err(|e| SandboxError::ExecFailed {
        reason: format!("spawn failed: {e}"),
    })?;

    match tokio::time::timeout(timeout, child.wait_with_output()).await {
        Ok(Ok(output)) => Ok(ExecOutput {
            exit_code: output.status.code().unwrap_or(-1),
            stdout: String::from_utf8_lossy(&output.stdout).to_string(),
            stderr: String::from_utf8_lossy(&output.stderr).to_string(),
            duration_ms: start.elapsed().as_millis() as u64,
            timed_out: false,
        }),
        Ok(Err(e)) => Err(SandboxError::ExecFailed {
            reason: format!("wait failed: {e}"),
        }),
        Err(_elapsed) => Ok(ExecOutput::timed_out(
            timeout,
            start.elapsed().as_millis() as u64,
        )),
    }
}
