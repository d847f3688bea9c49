//! Deterministic default policy.

use std::collections::BTreeMap;

use async_trait::async_trait;

use super::{OracleQuery, PolicyOracle};
use crate::domain::{normalize_name, Action, Confidence, FailureKind, Result, Version};

/// Known drop-in replacements, keyed by normalised package name.
pub fn default_substitutions() -> BTreeMap<String, String> {
    [
        ("psycopg2", "psycopg2-binary"),
        ("mysqlclient", "pymysql"),
        ("mysql-python", "pymysql"),
        ("opencv-python", "opencv-python-headless"),
        ("tensorflow-gpu", "tensorflow"),
        ("sklearn", "scikit-learn"),
        ("pycrypto", "pycryptodome"),
    ]
    .into_iter()
    .map(|(from, to)| (from.to_string(), to.to_string()))
    .collect()
}

/// Rule-based oracle:
///
/// - version conflicts narrow the offending pin, or its peer when the
///   offending package is not ours or already excludes that version
/// - missing system libraries add the mapped system package once, then
///   fall back to a substitution or skipping the package
/// - build failures substitute, step back from a pin, or skip
/// - test and unrecognized failures give up
#[derive(Debug, Clone)]
pub struct HeuristicOracle {
    substitutions: BTreeMap<String, String>,
}

impl Default for HeuristicOracle {
    fn default() -> Self {
        Self::new(default_substitutions())
    }
}

impl HeuristicOracle {
    pub fn new(substitutions: BTreeMap<String, String>) -> Self {
        let substitutions = substitutions
            .into_iter()
            .map(|(k, v)| (normalize_name(&k), v))
            .collect();
        Self { substitutions }
    }

    fn substitute(&self, package: &str) -> Option<Action> {
        self.substitutions
            .get(&normalize_name(package))
            .map(|alt| Action::Substitute {
                package: package.to_string(),
                alternative: alt.clone(),
            })
    }

    /// Narrow `package` away from `version` if that still changes something.
    fn narrow(query: &OracleQuery, package: &str, version: &str) -> Option<Action> {
        let candidate = query.candidate(&normalize_name(package))?;
        let parsed = Version::parse(version).ok()?;
        if !candidate.range().admits(&parsed) && candidate.range().pinned() != Some(&parsed) {
            return None;
        }
        Some(Action::Narrow {
            package: package.to_string(),
            excluded_version: version.to_string(),
        })
    }

    fn decide(&self, query: &OracleQuery) -> Action {
        let evidence = &query.failure.evidence;
        let package = evidence.package.as_deref();

        if let Some(pkg) = package.filter(|p| query.is_unsatisfiable(&normalize_name(p))) {
            return self.substitute(pkg).unwrap_or(Action::GiveUp);
        }

        match query.failure.kind {
            FailureKind::VersionConflict => {
                let own = package
                    .zip(evidence.version.as_deref())
                    .and_then(|(p, v)| Self::narrow(query, p, v));
                let peer = || {
                    evidence
                        .peer
                        .as_deref()
                        .zip(evidence.peer_version.as_deref())
                        .and_then(|(p, v)| Self::narrow(query, p, v))
                };
                own.or_else(peer).unwrap_or(Action::GiveUp)
            }
            FailureKind::MissingSystemLibrary => {
                let installed = |name: &str| {
                    query
                        .last_attempt()
                        .is_some_and(|a| a.candidates.system_packages.iter().any(|s| s == name))
                };
                if let Some(dep) = evidence
                    .system_dependency
                    .as_deref()
                    .filter(|d| !installed(d))
                {
                    return Action::AddSystemDependency {
                        name: dep.to_string(),
                    };
                }
                match package {
                    Some(pkg) => self.substitute(pkg).unwrap_or(Action::Skip {
                        package: pkg.to_string(),
                    }),
                    None => Action::GiveUp,
                }
            }
            FailureKind::BuildOrCompileFailure => {
                let Some(pkg) = package.filter(|_| query.failure.confidence == Confidence::Exact)
                else {
                    return Action::GiveUp;
                };
                if let Some(action) = self.substitute(pkg) {
                    return action;
                }
                let pinned = query
                    .candidate(&normalize_name(pkg))
                    .and_then(|c| c.range().pinned())
                    .map(|v| v.to_string());
                match pinned {
                    Some(v) => Action::Narrow {
                        package: pkg.to_string(),
                        excluded_version: v,
                    },
                    None => Action::Skip {
                        package: pkg.to_string(),
                    },
                }
            }
            FailureKind::TestFailure
            | FailureKind::Unrecognized
            | FailureKind::NetworkFailure
            | FailureKind::InfrastructureFailure => Action::GiveUp,
        }
    }
}

#[async_trait]
impl PolicyOracle for HeuristicOracle {
    async fn propose(&self, query: &OracleQuery) -> Result<Action> {
        Ok(self.decide(query))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::{
        BudgetSnapshot, Candidate, CandidateSet, Evidence, RunAttempt, StructuredFailure,
    };
    use chrono::Utc;

    fn attempt(specs: &[&str], system: &[&str]) -> RunAttempt {
        RunAttempt {
            seq: 1,
            command: "install".into(),
            candidates: CandidateSet::new(
                specs.iter().map(|s| Candidate::parse(s).unwrap()).collect(),
                system.iter().map(|s| s.to_string()).collect(),
                vec![],
                true,
            ),
            exit_code: 1,
            stdout: String::new(),
            stderr: String::new(),
            duration_ms: 10,
            timed_out: false,
            failure: None,
            started_at: Utc::now(),
        }
    }

    fn query(kind: FailureKind, evidence: Evidence, attempt: RunAttempt) -> OracleQuery {
        OracleQuery {
            failure: StructuredFailure::new(kind, evidence, Confidence::Exact),
            history: vec![attempt],
            budget: BudgetSnapshot {
                max_attempts: 10,
                remaining_attempts: 9,
                remaining_ms: 60_000,
            },
            unsatisfiable: vec![],
            waiting: vec![],
        }
    }

    fn conflict(pkg: &str, ver: &str, peer: &str, peer_ver: &str) -> Evidence {
        Evidence {
            package: Some(pkg.into()),
            version: Some(ver.into()),
            peer: Some(peer.into()),
            peer_version: Some(peer_ver.into()),
            ..Evidence::default()
        }
    }

    #[tokio::test]
    async fn test_version_conflict_narrows_offending_pin() {
        let oracle = HeuristicOracle::default();
        let q = query(
            FailureKind::VersionConflict,
            conflict("pkg-a", "2.0", "pkg-b", "1.5"),
            attempt(&["pkg-a==2.0", "pkg-b==1.5"], &[]),
        );
        assert_eq!(
            oracle.propose(&q).await.unwrap(),
            Action::Narrow {
                package: "pkg-a".into(),
                excluded_version: "2.0".into()
            }
        );
    }

    #[tokio::test]
    async fn test_version_conflict_falls_back_to_peer() {
        let oracle = HeuristicOracle::default();
        let q = query(
            FailureKind::VersionConflict,
            conflict("transitive-dep", "2.0", "pkg-b", "1.5"),
            attempt(&["pkg-b==1.5"], &[]),
        );
        assert_eq!(
            oracle.propose(&q).await.unwrap(),
            Action::Narrow {
                package: "pkg-b".into(),
                excluded_version: "1.5".into()
            }
        );
    }

    #[tokio::test]
    async fn test_unsatisfiable_package_substitutes_or_gives_up() {
        let oracle = HeuristicOracle::default();
        let mut q = query(
            FailureKind::VersionConflict,
            conflict("psycopg2", "2.9", "x", "1"),
            attempt(&["psycopg2==2.9"], &[]),
        );
        q.unsatisfiable = vec![Candidate::parse("psycopg2>=2.9,<2.9").unwrap()];
        assert_eq!(
            oracle.propose(&q).await.unwrap(),
            Action::Substitute {
                package: "psycopg2".into(),
                alternative: "psycopg2-binary".into()
            }
        );

        q.failure.evidence = conflict("pkg-a", "2.0", "pkg-b", "1.5");
        q.unsatisfiable = vec![Candidate::parse("pkg-a>=2.0,<2.0").unwrap()];
        assert_eq!(oracle.propose(&q).await.unwrap(), Action::GiveUp);
    }

    #[tokio::test]
    async fn test_missing_library_adds_then_substitutes() {
        let oracle = HeuristicOracle::default();
        let evidence = Evidence {
            package: Some("psycopg2".into()),
            system_dependency: Some("libpq-dev".into()),
            ..Evidence::default()
        };
        let first = query(
            FailureKind::MissingSystemLibrary,
            evidence.clone(),
            attempt(&["psycopg2"], &[]),
        );
        assert_eq!(
            oracle.propose(&first).await.unwrap(),
            Action::AddSystemDependency {
                name: "libpq-dev".into()
            }
        );

        let second = query(
            FailureKind::MissingSystemLibrary,
            evidence,
            attempt(&["psycopg2"], &["libpq-dev"]),
        );
        assert!(matches!(
            oracle.propose(&second).await.unwrap(),
            Action::Substitute { .. }
        ));
    }

    #[tokio::test]
    async fn test_build_failure_steps_back_from_pin_or_skips() {
        let oracle = HeuristicOracle::new(BTreeMap::new());
        let evidence = Evidence {
            package: Some("cryptography".into()),
            ..Evidence::default()
        };
        let pinned = query(
            FailureKind::BuildOrCompileFailure,
            evidence.clone(),
            attempt(&["cryptography==42.0.0"], &[]),
        );
        assert_eq!(
            oracle.propose(&pinned).await.unwrap(),
            Action::Narrow {
                package: "cryptography".into(),
                excluded_version: "42.0.0".into()
            }
        );

        let loose = query(
            FailureKind::BuildOrCompileFailure,
            evidence,
            attempt(&["cryptography"], &[]),
        );
        assert_eq!(
            oracle.propose(&loose).await.unwrap(),
            Action::Skip {
                package: "cryptography".into()
            }
        );
    }

    #[tokio::test]
    async fn test_test_failures_give_up() {
        let oracle = HeuristicOracle::default();
        let q = query(FailureKind::TestFailure, Evidence::default(), attempt(&[], &[]));
        assert_eq!(oracle.propose(&q).await.unwrap(), Action::GiveUp);
    }
}
