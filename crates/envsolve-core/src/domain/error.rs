//! Domain-level error taxonomy for envsolve.

use crate::sandbox::SandboxError;

/// Errors produced while parsing requirement specifiers.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum SpecError {
    #[error("empty requirement specifier")]
    Empty,

    #[error("invalid package name: {0:?}")]
    InvalidName(String),

    #[error("invalid version: {0:?}")]
    InvalidVersion(String),

    #[error("unsupported version operator in {0:?}")]
    UnsupportedOperator(String),
}

/// envsolve domain errors.
#[derive(Debug, thiserror::Error)]
pub enum EnvsolveError {
    #[error("invalid candidate spec: {0}")]
    InvalidSpec(#[from] SpecError),

    #[error("invalid configuration: {0}")]
    InvalidConfig(String),

    #[error("policy oracle failed: {0}")]
    Oracle(String),

    #[error("sandbox error: {0}")]
    Sandbox(#[from] SandboxError),

    #[error("digest mismatch: expected {expected}, got {actual}")]
    DigestMismatch { expected: String, actual: String },

    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("config parse error: {0}")]
    ConfigParse(#[from] toml::de::Error),

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}

/// Result type for envsolve domain operations.
pub type Result<T> = std::result::Result<T, EnvsolveError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_spec_error_converts_into_domain_error() {
        let err: EnvsolveError = SpecError::InvalidVersion("1..2".to_string()).into();
        assert!(err.to_string().contains("invalid candidate spec"));
        assert!(err.to_string().contains("1..2"));
    }

    #[test]
    fn test_digest_mismatch_error() {
        let err = EnvsolveError::DigestMismatch {
            expected: "abc123".to_string(),
            actual: "def456".to_string(),
        };
        let msg = err.to_string();
        assert!(msg.contains("abc123"));
        assert!(msg.contains("def456"));
    }

    #[test]
    fn test_oracle_error() {
        let err = EnvsolveError::Oracle("endpoint returned 503".to_string());
        assert!(err.to_string().contains("policy oracle failed"));
        assert!(err.to_string().contains("503"));
    }
}
