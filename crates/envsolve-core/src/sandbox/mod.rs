//! Sandbox: disposable, isolated execution environments.
//!
//! A [`Sandbox`] creates a handle from a base image, runs shell commands
//! inside it under a hard timeout, and tears it down again. Side effects
//! stay inside the handle.
//!
//! # Modules
//!
//! - [`local`]   — `LocalSandbox`: one temporary workspace directory per handle
//! - [`docker`]  — `DockerSandbox`: one keep-alive container per handle
//! - [`error`]   — `SandboxError` / `SandboxResult`

pub mod docker;
pub mod error;
pub mod local;
mod process;

use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

pub use docker::{DockerConfig, DockerHandle, DockerSandbox};
pub use error::{SandboxError, SandboxResult};
pub use local::{LocalConfig, LocalHandle, LocalSandbox};

/// Captured result of one command.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExecOutput {
    /// Process exit code, `-1` if it was killed or did not exit normally.
    pub exit_code: i32,
    pub stdout: String,
    pub stderr: String,
    pub duration_ms: u64,
    /// The hard timeout fired and the process was terminated.
    pub timed_out: bool,
}

impl ExecOutput {
    pub fn success(stdout: impl Into<String>) -> Self {
        Self {
            exit_code: 0,
            stdout: stdout.into(),
            stderr: String::new(),
            duration_ms: 0,
            timed_out: false,
        }
    }

    pub fn failure(exit_code: i32, stderr: impl Into<String>) -> Self {
        Self {
            exit_code,
            stdout: String::new(),
            stderr: stderr.into(),
            duration_ms: 0,
            timed_out: false,
        }
    }

    pub fn timed_out(limit: Duration, duration_ms: u64) -> Self {
        Self {
            exit_code: -1,
            stdout: String::new(),
            stderr: format!("command timed out after {}ms", limit.as_millis()),
            duration_ms,
            timed_out: true,
        }
    }
}

/// Disposable execution environment.
///
/// `exec` never blocks past its timeout: on expiry the command is killed
/// and an [`ExecOutput`] with `timed_out = true` is returned. `destroy`
/// releases every resource held by the handle, including after a failed
/// `exec`.
#[async_trait]
pub trait Sandbox: Send + Sync {
    type Handle: Send + Sync;

    async fn create(&self, base_image: &str) -> SandboxResult<Self::Handle>;

    async fn exec(
        &self,
        handle: &Self::Handle,
        command: &str,
        timeout: Duration,
    ) -> SandboxResult<ExecOutput>;

    async fn destroy(&self, handle: Self::Handle) -> SandboxResult<()>;
}

#[async_trait]
impl<T: Sandbox> Sandbox for std::sync::Arc<T> {
    type Handle = T::Handle;

    async fn create(&self, base_image: &str) -> SandboxResult<Self::Handle> {
        (**self).create(base_image).await
    }

    async fn exec(
        &self,
        handle: &Self::Handle,
        command: &str,
        timeout: Duration,
    ) -> SandboxResult<ExecOutput> {
        (**self).exec(handle, command, timeout).await
    }

    async fn destroy(&self, handle: Self::Handle) -> SandboxResult<()> {
        (**self).destroy(handle).await
    }
}

/// Keep the head and tail of long output, dropping the middle.
pub fn truncate_output(text: &str, limit: usize) -> String {
    if text.len() <= limit {
        return text.to_string();
    }
    let half = limit / 2;
    let mut head_end = half;
    while !text.is_char_boundary(head_end) {
        head_end -= 1;
    }
    let mut tail_start = text.len() - half;
    while !text.is_char_boundary(tail_start) {
        tail_start += 1;
    }
    format!(
        "{}\n... [{} bytes truncated] ...\n{}",
        &text[..head_end],
        tail_start - head_end,
        &text[tail_start..]
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_truncate_keeps_short_output() {
        assert_eq!(truncate_output("hello", 10), "hello");
    }

    #[test]
    fn test_truncate_keeps_head_and_tail() {
        let text = format!("{}{}{}", "a".repeat(100), "b".repeat(1000), "c".repeat(100));
        let out = truncate_output(&text, 200);
        assert!(out.starts_with(&"a".repeat(100)));
        assert!(out.ends_with(&"c".repeat(100)));
        assert!(out.contains("[1000 bytes truncated]"));
    }

    #[test]
    fn test_truncate_respects_char_boundaries() {
        let text = "é".repeat(100);
        let out = truncate_output(&text, 51);
        assert!(out.contains("bytes truncated"));
    }

    #[test]
    fn test_timed_out_output() {
        let out = ExecOutput::timed_out(Duration::from_secs(2), 2001);
        assert!(out.timed_out);
        assert_eq!(out.exit_code, -1);
        assert!(out.stderr.contains("2000ms"));
    }
}
