//! Container sandbox driven through the `docker` CLI.

use std::path::PathBuf;
use std::process::Stdio;
use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tokio::process::Command;
use tracing::{debug, warn};
use uuid::Uuid;

use super::error::{SandboxError, SandboxResult};
use super::process::run_with_timeout;
use super::{ExecOutput, Sandbox};
use crate::metrics::METRICS;

/// Configuration for [`DockerSandbox`].
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct DockerConfig {
    /// Container runtime binary.
    pub binary: String,
    /// Container name prefix; one namespace per worker unit.
    pub namespace: String,
    /// Host cache directory mounted at `/root/.cache/pip`.
    pub cache_dir: Option<PathBuf>,
    /// Host directory mounted at `/workspace` and used as working directory.
    pub workspace_dir: Option<PathBuf>,
    /// Limit for `docker run` and `docker rm`, image pulls included.
    pub control_timeout_secs: u64,
}

impl Default for DockerConfig {
    fn default() -> Self {
        Self {
            binary: "docker".to_string(),
            namespace: "envsolve".to_string(),
            cache_dir: None,
            workspace_dir: None,
            control_timeout_secs: 600,
        }
    }
}

/// A running container.
///
/// A handle dropped without [`Sandbox::destroy`] removes its container on
/// a best-effort basis.
#[derive(Debug)]
pub struct DockerHandle {
    container: String,
    binary: String,
    released: bool,
}

impl DockerHandle {
    pub fn container(&self) -> &str {
        &self.container
    }
}

impl Drop for DockerHandle {
    fn drop(&mut self) {
        if self.released {
            return;
        }
        let binary = std::mem::take(&mut self.binary);
        let container = std::mem::take(&mut self.container);
        // Inside a runtime the removal must not block a worker thread.
        match tokio::runtime::Handle::try_current() {
            Ok(runtime) => {
                runtime.spawn_blocking(move || force_remove(&binary, &container));
            }
            Err(_) => force_remove(&binary, &container),
        }
    }
}

fn force_remove(binary: &str, container: &str) {
    let status = std::process::Command::new(binary)
        .args(["rm", "-f", container])
        .stdout(Stdio::null())
        .stderr(Stdio::null())
        .status();
    if let Err(e) = status {
        warn!(container = %container, error = %e, "could not remove abandoned container");
    }
}

/// One keep-alive container per handle; commands run via `docker exec`.
#[derive(Debug, Clone, Default)]
pub struct DockerSandbox {
    config: DockerConfig,
}

impl DockerSandbox {
    pub fn new(config: DockerConfig) -> Self {
        Self { config }
    }

    fn control_timeout(&self) -> Duration {
        Duration::from_secs(self.config.control_timeout_secs)
    }

    /// Arguments for `docker run` that start a detached keep-alive container.
    pub fn run_args(&self, container: &str, image: &str) -> Vec<String> {
        let mut args = vec![
            "run".to_string(),
            "-d".to_string(),
            "--name".to_string(),
            container.to_string(),
        ];
        if let Some(cache) = &self.config.cache_dir {
            args.push("-v".to_string());
            args.push(format!("{}:/root/.cache/pip", cache.display()));
        }
        if let Some(workspace) = &self.config.workspace_dir {
            args.push("-v".to_string());
            args.push(format!("{}:/workspace", workspace.display()));
            args.push("-w".to_string());
            args.push("/workspace".to_string());
        }
        args.push(image.to_string());
        args.push("sleep".to_string());
        args.push("infinity".to_string());
        args
    }

    async fn docker(&self, args: &[&str], timeout: Duration) -> SandboxResult<ExecOutput> {
        let mut cmd = Command::new(&self.config.binary);
        cmd.args(args);
        run_with_timeout(cmd, timeout).await
    }
}

#[async_trait]
impl Sandbox for DockerSandbox {
    type Handle = DockerHandle;

    async fn create(&self, base_image: &str) -> SandboxResult<DockerHandle> {
        let container = format!("{}-{}", self.config.namespace, Uuid::new_v4().simple());
        let args = self.run_args(&container, base_image);
        let arg_refs: Vec<&str> = args.iter().map(String::as_str).collect();

        let out = self
            .docker(&arg_refs, self.control_timeout())
            .await
            .map_err(|e| SandboxError::CreateFailed {
                image: base_image.to_string(),
                reason: e.to_string(),
            })?;

        // From here on the handle owns the container, even if start failed.
        let handle = DockerHandle {
            container,
            binary: self.config.binary.clone(),
            released: false,
        };

        if out.timed_out || out.exit_code != 0 {
            let reason = if out.stderr.trim().is_empty() {
                format!("docker run exited with {}", out.exit_code)
            } else {
                out.stderr.trim().to_string()
            };
            return Err(SandboxError::CreateFailed {
                image: base_image.to_string(),
                reason,
            });
        }

        METRICS.inc_sandboxes_created();
        debug!(container = %handle.container, image = base_image, "container started");
        Ok(handle)
    }

    async fn exec(
        &self,
        handle: &DockerHandle,
        command: &str,
        timeout: Duration,
    ) -> SandboxResult<ExecOutput> {
        let out = self
            .docker(&["exec", handle.container.as_str(), "sh", "-c", command], timeout)
            .await?;
        if out.timed_out {
            // Killing the client leaves the process running in the container.
            if let Err(e) = self
                .docker(&["kill", handle.container.as_str()], self.control_timeout())
                .await
            {
                warn!(container = %handle.container, error = %e, "docker kill failed");
            }
        }
        Ok(out)
    }

    async fn destroy(&self, mut handle: DockerHandle) -> SandboxResult<()> {
        let out = self
            .docker(&["rm", "-f", handle.container.as_str()], self.control_timeout())
            .await?;
        if out.exit_code != 0 {
            return Err(SandboxError::DestroyFailed {
                id: handle.container.clone(),
                reason: out.stderr.trim().to_string(),
            });
        }
        handle.released = true;
        METRICS.inc_sandboxes_destroyed();
        debug!(container = %handle.container, "container removed");
        Ok(())
    }
}
