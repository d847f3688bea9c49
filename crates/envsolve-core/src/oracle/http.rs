//! Remote policy oracle over HTTP.
//!
//! POSTs the [`OracleQuery`] as JSON and expects an [`Action`] back, e.g.
//! `{"action": "narrow", "package": "pkg-a", "excluded_version": "2.0"}`.
//! This is the seam where a language-model-backed policy plugs in.

use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tracing::debug;

use super::{OracleQuery, PolicyOracle};
use crate::domain::{Action, EnvsolveError, Result};

/// Remote oracle configuration.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct HttpOracleConfig {
    /// Decision endpoint URL.
    pub endpoint: String,
    /// Bearer token (optional).
    pub token: Option<String>,
    pub timeout_secs: u64,
}

impl Default for HttpOracleConfig {
    fn default() -> Self {
        HttpOracleConfig {
            endpoint: std::env::var("ENVSOLVE_ORACLE_URL")
                .unwrap_or_else(|_| "http://127.0.0.1:8080/propose".to_string()),
            token: std::env::var("ENVSOLVE_ORACLE_TOKEN").ok(),
            timeout_secs: 120,
        }
    }
}

impl HttpOracleConfig {
    /// Create a new config from environment variables
    pub fn from_env() -> Self {
        Self::default()
    }

    pub fn new(endpoint: &str) -> Self {
        HttpOracleConfig {
            endpoint: endpoint.to_string(),
            token: None,
            timeout_secs: 120,
        }
    }

    /// Set authentication token
    pub fn with_token(mut self, token: &str) -> Self {
        self.token = Some(token.to_string());
        self
    }
}

/// Oracle that delegates every decision to an external service.
pub struct HttpPolicyOracle {
    config: HttpOracleConfig,
    http_client: reqwest::Client,
}

impl HttpPolicyOracle {
    pub fn new(config: HttpOracleConfig) -> Result<Self> {
        let http_client = reqwest::Client::builder()
            .user_agent(concat!("envsolve/", env!("CARGO_PKG_VERSION")))
            .timeout(Duration::from_secs(config.timeout_secs))
            .build()
            .map_err(|e| EnvsolveError::Oracle(format!("failed to create HTTP client: {e}")))?;

        Ok(HttpPolicyOracle {
            config,
            http_client,
        })
    }

    pub fn from_env() -> Result<Self> {
        Self::new(HttpOracleConfig::from_env())
    }

    pub fn endpoint(&self) -> &str {
        &self.config.endpoint
    }
}

#[async_trait]
impl PolicyOracle for HttpPolicyOracle {
    async fn propose(&self, query: &OracleQuery) -> Result<Action> {
        let mut request = self.http_client.post(&self.config.endpoint).json(query);
        if let Some(token) = &self.config.token {
            request = request.bearer_auth(token);
        }

        let response = request
            .send()
            .await
            .map_err(|e| EnvsolveError::Oracle(format!("request failed: {e}")))?;
        let status = response.status();
        if !status.is_success() {
            return Err(EnvsolveError::Oracle(format!(
                "{} returned {status}",
                self.config.endpoint
            )));
        }

        let action = response
            .json::<Action>()
            .await
            .map_err(|e| EnvsolveError::Oracle(format!("invalid action payload: {e}")))?;
        debug!(endpoint = %self.config.endpoint, action = %action, "remote oracle proposed");
        Ok(action)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::{BudgetSnapshot, Evidence, FailureKind, StructuredFailure, Confidence};

    #[test]
    fn test_config_builder() {
        let config = HttpOracleConfig::new("https://policy.internal/propose").with_token("secret");
        assert_eq!(config.endpoint, "https://policy.internal/propose");
        assert_eq!(config.token.as_deref(), Some("secret"));
    }

    #[tokio::test]
    async fn test_unreachable_endpoint_is_oracle_error() {
        let mut config = HttpOracleConfig::new("http://127.0.0.1:9/propose");
        config.timeout_secs = 2;
        let oracle = HttpPolicyOracle::new(config).unwrap();
        let query = OracleQuery {
            failure: StructuredFailure::new(
                FailureKind::Unrecognized,
                Evidence::default(),
                Confidence::Ambiguous,
            ),
            history: vec![],
            budget: BudgetSnapshot {
                max_attempts: 1,
                remaining_attempts: 1,
                remaining_ms: 1_000,
            },
            unsatisfiable: vec![],
            waiting: vec![],
        };
        let err = oracle.propose(&query).await.unwrap_err();
        assert!(matches!(err, EnvsolveError::Oracle(_)));
    }
}
