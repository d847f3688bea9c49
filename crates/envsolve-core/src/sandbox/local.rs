//! Host-process sandbox: each handle owns a temporary workspace directory.

use std::path::PathBuf;
use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tempfile::TempDir;
use tokio::process::Command;
use tracing::debug;

use super::error::{SandboxError, SandboxResult};
use super::process::run_with_timeout;
use super::{ExecOutput, Sandbox};
use crate::metrics::METRICS;

/// Configuration for [`LocalSandbox`].
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct LocalConfig {
    /// Directory under which per-handle workspaces are created.
    pub workspace_root: PathBuf,
    /// Prefix for workspace directory names.
    pub namespace: String,
    /// Package download cache, exported as `PIP_CACHE_DIR`.
    pub cache_dir: Option<PathBuf>,
}

impl Default for LocalConfig {
    fn default() -> Self {
        Self {
            workspace_root: std::env::temp_dir(),
            namespace: "envsolve".to_string(),
            cache_dir: None,
        }
    }
}

/// A live local workspace. Dropping it removes the directory.
#[derive(Debug)]
pub struct LocalHandle {
    id: String,
    image: String,
    dir: TempDir,
}

impl LocalHandle {
    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn image(&self) -> &str {
        &self.image
    }

    pub fn path(&self) -> &std::path::Path {
        self.dir.path()
    }
}

/// Runs commands with `sh -c` inside a per-handle temporary directory.
///
/// The base image is recorded on the handle but not pulled; use
/// [`DockerSandbox`](super::DockerSandbox) for real isolation.
#[derive(Debug, Clone, Default)]
pub struct LocalSandbox {
    config: LocalConfig,
}

impl LocalSandbox {
    pub fn new(config: LocalConfig) -> Self {
        Self { config }
    }

    pub fn config(&self) -> &LocalConfig {
        &self.config
    }
}

#[async_trait]
impl Sandbox for LocalSandbox {
    type Handle = LocalHandle;

    async fn create(&self, base_image: &str) -> SandboxResult<LocalHandle> {
        std::fs::create_dir_all(&self.config.workspace_root).map_err(|e| {
            SandboxError::CreateFailed {
                image: base_image.to_string(),
                reason: format!(
                    "cannot create workspace root {}: {e}",
                    self.config.workspace_root.display()
                ),
            }
        })?;
        let dir = tempfile::Builder::new()
            .prefix(&format!("{}-", self.config.namespace))
            .tempdir_in(&self.config.workspace_root)
            .map_err(|e| SandboxError::CreateFailed {
                image: base_image.to_string(),
                reason: e.to_string(),
            })?;

        let id = dir
            .path()
            .file_name()
            .map(|n| n.to_string_lossy().to_string())
            .unwrap_or_else(|| self.config.namespace.clone());

        METRICS.inc_sandboxes_created();
        debug!(sandbox = %id, path = %dir.path().display(), "local sandbox created");
        Ok(LocalHandle {
            id,
            image: base_image.to_string(),
            dir,
        })
    }

    async fn exec(
        &self,
        handle: &LocalHandle,
        command: &str,
        timeout: Duration,
    ) -> SandboxResult<ExecOutput> {
        let mut cmd = Command::new("sh");
        cmd.arg("-c")
            .arg(command)
            .current_dir(handle.path())
            .env("ENVSOLVE_WORKSPACE", handle.path());
        if let Some(cache) = &self.config.cache_dir {
            cmd.env("PIP_CACHE_DIR", cache);
        }
        run_with_timeout(cmd, timeout).await
    }

    async fn destroy(&self, handle: LocalHandle) -> SandboxResult<()> {
        let id = handle.id.clone();
        handle
            .dir
            .close()
            .map_err(|e| SandboxError::DestroyFailed {
                id: id.clone(),
                reason: e.to_string(),
            })?;
        METRICS.inc_sandboxes_destroyed();
        debug!(sandbox = %id, "local sandbox destroyed");
        Ok(())
    }
}
