//! Learned incompatibilities.

use std::fmt;

use serde::{Deserialize, Serialize};

use crate::domain::{normalize_name, CandidateSet, Evidence, FailureKind, Version};

/// A package, optionally at one exact version.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PackagePin {
    /// Normalised package key.
    pub name: String,
    pub version: Option<Version>,
}

impl PackagePin {
    pub fn new(name: &str, version: Option<Version>) -> Self {
        Self {
            name: normalize_name(name),
            version,
        }
    }

    /// The set contains this package, and pins it when a version is given.
    fn is_in(&self, set: &CandidateSet) -> bool {
        match (set.get(&self.name), &self.version) {
            (None, _) => false,
            (Some(_), None) => true,
            (Some(candidate), Some(version)) => candidate.range().selects(version),
        }
    }
}

impl fmt::Display for PackagePin {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.version {
            Some(v) => write!(f, "{}=={v}", self.name),
            None => f.write_str(&self.name),
        }
    }
}

/// The other half of a conflict.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ConflictPeer {
    /// Another package pin.
    Package(PackagePin),
    /// The package fails while this system package is absent.
    MissingSystemDependency { name: String },
}

/// Constraints known to produce `kind` together.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConflictRecord {
    pub package: PackagePin,
    pub peer: ConflictPeer,
    pub kind: FailureKind,
}

impl ConflictRecord {
    /// Build a record from classifier evidence.
    ///
    /// Package pairs need both versions, since an unversioned pair would
    /// forbid every future combination of the two packages. System
    /// dependency triples need only the package name.
    pub fn from_evidence(kind: FailureKind, evidence: &Evidence) -> Option<Self> {
        let package = evidence.package.as_deref()?;
        let version = evidence
            .version
            .as_deref()
            .and_then(|v| Version::parse(v).ok());

        if let Some(dep) = &evidence.system_dependency {
            return Some(Self {
                package: PackagePin::new(package, version),
                peer: ConflictPeer::MissingSystemDependency { name: dep.clone() },
                kind,
            });
        }

        let peer = evidence.peer.as_deref()?;
        let peer_version = evidence
            .peer_version
            .as_deref()
            .and_then(|v| Version::parse(v).ok())?;
        Some(Self {
            package: PackagePin::new(package, Some(version?)),
            peer: ConflictPeer::Package(PackagePin::new(peer, Some(peer_version))),
            kind,
        })
    }

    /// True when `set` contains both halves of this record.
    pub fn matches(&self, set: &CandidateSet) -> bool {
        if !self.package.is_in(set) {
            return false;
        }
        match &self.peer {
            ConflictPeer::Package(pin) => pin.is_in(set),
            ConflictPeer::MissingSystemDependency { name } => {
                !set.system_packages.iter().any(|s| s == name)
            }
        }
    }
}

impl fmt::Display for ConflictRecord {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.peer {
            ConflictPeer::Package(pin) => write!(f, "{} x {} ({})", self.package, pin, self.kind),
            ConflictPeer::MissingSystemDependency { name } => {
                write!(f, "{} without {} ({})", self.package, name, self.kind)
            }
        }
    }
}

/// All conflicts learned during one run.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConflictSet {
    records: Vec<ConflictRecord>,
}

impl ConflictSet {
    pub fn new() -> Self {
        Self::default()
    }

    /// Store a record. Returns `false` if it was already known.
    pub fn record(&mut self, record: ConflictRecord) -> bool {
        if self.records.contains(&record) {
            return false;
        }
        self.records.push(record);
        true
    }

    /// The first recorded conflict that `set` would reproduce.
    pub fn would_conflict(&self, set: &CandidateSet) -> Option<&ConflictRecord> {
        self.records.iter().find(|r| r.matches(set))
    }

    pub fn iter(&self) -> impl Iterator<Item = &ConflictRecord> {
        self.records.iter()
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::Candidate;

    fn set(specs: &[&str], system: &[&str]) -> CandidateSet {
        CandidateSet::new(
            specs.iter().map(|s| Candidate::parse(s).unwrap()).collect(),
            system.iter().map(|s| s.to_string()).collect(),
            Vec::new(),
            true,
        )
    }

    fn conflict_evidence() -> Evidence {
        Evidence {
            package: Some("pkg-a".into()),
            version: Some("2.0".into()),
            peer: Some("pkg-b".into()),
            peer_version: Some("1.5".into()),
            ..Evidence::default()
        }
    }

    #[test]
    fn test_package_pair_requires_both_versions() {
        let record = ConflictRecord::from_evidence(FailureKind::VersionConflict, &conflict_evidence());
        assert!(record.is_some());

        let mut partial = conflict_evidence();
        partial.peer_version = None;
        assert!(ConflictRecord::from_evidence(FailureKind::VersionConflict, &partial).is_none());

        let mut no_peer = conflict_evidence();
        no_peer.peer = None;
        assert!(ConflictRecord::from_evidence(FailureKind::VersionConflict, &no_peer).is_none());
    }

    #[test]
    fn test_matches_exact_pair_only() {
        let record =
            ConflictRecord::from_evidence(FailureKind::VersionConflict, &conflict_evidence()).unwrap();
        assert!(record.matches(&set(&["pkg-a==2.0", "pkg-b==1.5"], &[])));
        assert!(record.matches(&set(&["pkg_a>=2.0,<=2.0", "pkg-b==1.5"], &[])));
        assert!(!record.matches(&set(&["pkg-a<2.0", "pkg-b==1.5"], &[])));
        assert!(!record.matches(&set(&["pkg-a==2.0"], &[])));
        assert!(!record.matches(&set(&["pkg-a", "pkg-b"], &[])));
    }

    #[test]
    fn test_system_dependency_triple() {
        let evidence = Evidence {
            package: Some("psycopg2".into()),
            system_dependency: Some("libpq-dev".into()),
            ..Evidence::default()
        };
        let record =
            ConflictRecord::from_evidence(FailureKind::MissingSystemLibrary, &evidence).unwrap();
        assert!(record.matches(&set(&["psycopg2"], &[])));
        assert!(!record.matches(&set(&["psycopg2"], &["libpq-dev"])));
        assert_eq!(record.to_string(), "psycopg2 without libpq-dev (missing_system_library)");
    }

    #[test]
    fn test_conflict_set_dedups() {
        let mut conflicts = ConflictSet::new();
        let record =
            ConflictRecord::from_evidence(FailureKind::VersionConflict, &conflict_evidence()).unwrap();
        assert!(conflicts.record(record.clone()));
        assert!(!conflicts.record(record));
        assert_eq!(conflicts.len(), 1);
        assert!(conflicts
            .would_conflict(&set(&["pkg-a==2.0", "pkg-b==1.5", "flask"], &[]))
            .is_some());
    }
}
