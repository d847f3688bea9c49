//! Structured failure signals produced by the classifier.

use std::fmt;

use serde::{Deserialize, Serialize};

/// Closed taxonomy of failure kinds.
///
/// Declaration order is classification priority: when several markers
/// appear in one output, the earliest kind wins.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FailureKind {
    VersionConflict,
    MissingSystemLibrary,
    NetworkFailure,
    InfrastructureFailure,
    BuildOrCompileFailure,
    TestFailure,
    Unrecognized,
}

impl FailureKind {
    /// Transient kinds are retried without learning.
    pub fn is_transient(self) -> bool {
        matches!(self, Self::NetworkFailure | Self::InfrastructureFailure)
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Self::VersionConflict => "version_conflict",
            Self::MissingSystemLibrary => "missing_system_library",
            Self::NetworkFailure => "network_failure",
            Self::InfrastructureFailure => "infrastructure_failure",
            Self::BuildOrCompileFailure => "build_or_compile_failure",
            Self::TestFailure => "test_failure",
            Self::Unrecognized => "unrecognized",
        }
    }
}

impl fmt::Display for FailureKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// How sure the classifier is about the offending package.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Confidence {
    /// The package (and usually its version) was named by the tool.
    Exact,
    /// Only a span of text was matched.
    Ambiguous,
}

/// What the classifier extracted from the raw output.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Evidence {
    /// Offending package name, as printed by the tool.
    pub package: Option<String>,
    pub version: Option<String>,
    /// The other side of a version conflict.
    pub peer: Option<String>,
    pub peer_version: Option<String>,
    /// System package that would satisfy a missing library or header.
    pub system_dependency: Option<String>,
    /// The matched line(s) from the output.
    pub span: String,
}

/// A classified, machine-readable command failure.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StructuredFailure {
    pub kind: FailureKind,
    pub evidence: Evidence,
    pub confidence: Confidence,
}

impl StructuredFailure {
    pub fn new(kind: FailureKind, evidence: Evidence, confidence: Confidence) -> Self {
        Self {
            kind,
            evidence,
            confidence,
        }
    }

    /// An infrastructure failure that never reached the classifier,
    /// e.g. an exec timeout or a sandbox that could not be created.
    pub fn infrastructure(span: impl Into<String>) -> Self {
        Self {
            kind: FailureKind::InfrastructureFailure,
            evidence: Evidence {
                span: span.into(),
                ..Evidence::default()
            },
            confidence: Confidence::Ambiguous,
        }
    }
}

impl fmt::Display for StructuredFailure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.kind)?;
        if let Some(pkg) = &self.evidence.package {
            write!(f, " ({pkg}")?;
            if let Some(v) = &self.evidence.version {
                write!(f, "=={v}")?;
            }
            f.write_str(")")?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_priority_follows_declaration_order() {
        assert!(FailureKind::VersionConflict < FailureKind::MissingSystemLibrary);
        assert!(FailureKind::MissingSystemLibrary < FailureKind::NetworkFailure);
        assert!(FailureKind::BuildOrCompileFailure < FailureKind::Unrecognized);
    }

    #[test]
    fn test_transient_kinds() {
        assert!(FailureKind::NetworkFailure.is_transient());
        assert!(FailureKind::InfrastructureFailure.is_transient());
        assert!(!FailureKind::VersionConflict.is_transient());
        assert!(!FailureKind::Unrecognized.is_transient());
    }

    #[test]
    fn test_kind_serializes_snake_case() {
        let json = serde_json::to_string(&FailureKind::MissingSystemLibrary).unwrap();
        assert_eq!(json, "\"missing_system_library\"");
    }

    #[test]
    fn test_display_includes_evidence() {
        let failure = StructuredFailure::new(
            FailureKind::VersionConflict,
            Evidence {
                package: Some("pkg-a".into()),
                version: Some("2.0".into()),
                ..Evidence::default()
            },
            Confidence::Exact,
        );
        assert_eq!(failure.to_string(), "version_conflict (pkg-a==2.0)");
        assert_eq!(
            StructuredFailure::infrastructure("timed out").to_string(),
            "infrastructure_failure"
        );
    }
}
