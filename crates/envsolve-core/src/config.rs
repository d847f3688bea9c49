//! Engine configuration.
//!
//! Loaded from TOML; every field has a default so a partial file (or none)
//! is valid. The CLI layers flags and `ENVSOLVE_*` variables on top.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::command::CommandTemplates;
use crate::domain::{EnvsolveError, Result};
use crate::oracle::heuristic::default_substitutions;
use crate::sandbox::{DockerConfig, LocalConfig};

/// Which sandbox implementation to drive.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SandboxBackend {
    Local,
    Docker,
}

impl std::str::FromStr for SandboxBackend {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "local" => Ok(Self::Local),
            "docker" => Ok(Self::Docker),
            other => Err(format!("unknown sandbox backend: {other}")),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct EngineConfig {
    pub base_image: String,
    pub backend: SandboxBackend,
    /// Container name / workspace prefix.
    pub namespace: String,
    /// Per-unit workspace directories are created under this root.
    pub workspace_root: PathBuf,
    /// Package download cache. Passed explicitly to each sandbox.
    pub cache_dir: Option<PathBuf>,
    /// Hard limit for one sandbox command.
    pub command_timeout_secs: u64,
    /// Wall-clock limit for one whole run.
    pub run_timeout_secs: u64,
    pub max_attempts: u32,
    /// Consecutive infrastructure failures tolerated before giving up.
    pub infra_retry_limit: u32,
    /// Consecutive network failures tolerated before giving up.
    pub network_retry_limit: u32,
    /// Stored stdout/stderr are truncated to this many bytes.
    pub max_output_bytes: usize,
    /// Concurrent units in batch mode.
    pub max_concurrent: usize,
    pub commands: CommandTemplates,
    /// Drop-in replacements used by the heuristic oracle.
    pub substitutions: BTreeMap<String, String>,
    /// When set, decisions come from this HTTP endpoint instead of the heuristic.
    pub oracle_endpoint: Option<String>,
    pub oracle_timeout_secs: u64,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            base_image: "python:3.11-slim".to_string(),
            backend: SandboxBackend::Docker,
            namespace: "envsolve".to_string(),
            workspace_root: std::env::temp_dir().join("envsolve"),
            cache_dir: None,
            command_timeout_secs: 900,
            run_timeout_secs: 3600,
            max_attempts: 30,
            infra_retry_limit: 2,
            network_retry_limit: 3,
            max_output_bytes: 16 * 1024,
            max_concurrent: 3,
            commands: CommandTemplates::default(),
            substitutions: default_substitutions(),
            oracle_endpoint: None,
            oracle_timeout_secs: 120,
        }
    }
}

impl EngineConfig {
    pub fn from_toml_str(input: &str) -> Result<Self> {
        let config: Self = toml::from_str(input)?;
        config.validate()?;
        Ok(config)
    }

    /// Load from a TOML file.
    pub fn load(path: &Path) -> Result<Self> {
        let input = std::fs::read_to_string(path)?;
        Self::from_toml_str(&input)
    }

    pub fn validate(&self) -> Result<()> {
        let invalid = |msg: &str| Err(EnvsolveError::InvalidConfig(msg.to_string()));
        if self.base_image.trim().is_empty() {
            return invalid("base_image must not be empty");
        }
        if self.namespace.is_empty()
            || !self
                .namespace
                .chars()
                .all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '_')
        {
            return invalid("namespace must be non-empty and contain only [A-Za-z0-9_-]");
        }
        if self.max_attempts == 0 {
            return invalid("max_attempts must be at least 1");
        }
        if self.command_timeout_secs == 0 || self.run_timeout_secs == 0 {
            return invalid("timeouts must be positive");
        }
        if self.max_concurrent == 0 {
            return invalid("max_concurrent must be at least 1");
        }
        if self.max_output_bytes < 256 {
            return invalid("max_output_bytes must be at least 256");
        }
        self.commands
            .validate()
            .map_err(EnvsolveError::InvalidConfig)?;
        Ok(())
    }

    pub fn command_timeout(&self) -> Duration {
        Duration::from_secs(self.command_timeout_secs)
    }

    pub fn run_timeout(&self) -> Duration {
        Duration::from_secs(self.run_timeout_secs)
    }

    /// Configuration for one worker unit: its own namespace, workspace
    /// directory and cache directory, so concurrent units never share
    /// mutable state.
    pub fn for_unit(&self, unit: &str) -> Self {
        let slug: String = unit
            .chars()
            .map(|c| if c.is_ascii_alphanumeric() { c.to_ascii_lowercase() } else { '-' })
            .collect();
        let mut config = self.clone();
        config.namespace = format!("{}-{}", self.namespace, slug);
        config.workspace_root = self.workspace_root.join(&slug);
        config.cache_dir = self.cache_dir.as_ref().map(|c| c.join(&slug));
        config
    }

    pub fn local_config(&self) -> LocalConfig {
        LocalConfig {
            workspace_root: self.workspace_root.clone(),
            namespace: self.namespace.clone(),
            cache_dir: self.cache_dir.clone(),
        }
    }

    pub fn docker_config(&self, workspace_dir: Option<PathBuf>) -> DockerConfig {
        DockerConfig {
            namespace: self.namespace.clone(),
            cache_dir: self.cache_dir.clone(),
            workspace_dir,
            ..DockerConfig::default()
        }
    }
}
