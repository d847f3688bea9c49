//! Cumulative state of a successfully configured environment.

use std::collections::{BTreeMap, BTreeSet};

use serde::{Deserialize, Serialize};

use super::attempt::CandidateSet;
use super::candidate::Candidate;

/// Installed candidates plus applied system-level fixes.
///
/// Only the controller mutates this, and only after a successful attempt.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct EnvironmentState {
    installed: BTreeMap<String, Candidate>,
    system_packages: BTreeSet<String>,
}

impl EnvironmentState {
    pub fn new() -> Self {
        Self::default()
    }

    /// Adopt a successfully installed set.
    ///
    /// Attempt sets always carry the whole environment, so the set replaces
    /// the previous state. Packages dropped from the set (skipped or
    /// substituted) leave the environment here.
    pub(crate) fn apply(&mut self, set: &CandidateSet) {
        self.installed = set
            .packages
            .iter()
            .map(|c| (c.key(), c.clone()))
            .collect();
        self.system_packages = set.system_packages.iter().cloned().collect();
    }

    pub fn candidates(&self) -> impl Iterator<Item = &Candidate> {
        self.installed.values()
    }

    pub fn system_packages(&self) -> impl Iterator<Item = &String> {
        self.system_packages.iter()
    }

    pub fn get(&self, key: &str) -> Option<&Candidate> {
        self.installed.get(key)
    }

    pub fn contains(&self, key: &str) -> bool {
        self.installed.contains_key(key)
    }

    pub fn has_system_package(&self, name: &str) -> bool {
        self.system_packages.contains(name)
    }

    pub fn len(&self) -> usize {
        self.installed.len()
    }

    pub fn is_empty(&self) -> bool {
        self.installed.is_empty() && self.system_packages.is_empty()
    }

    /// The environment as a candidate set, for reproduction runs.
    pub fn as_candidate_set(&self) -> CandidateSet {
        CandidateSet::new(
            self.installed.values().cloned().collect(),
            self.system_packages.iter().cloned().collect(),
            Vec::new(),
            true,
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_apply_replaces_by_key() {
        let mut env = EnvironmentState::new();
        let first = CandidateSet::new(
            vec![Candidate::parse("pkg_a==2.0").unwrap()],
            vec!["libpq-dev".into()],
            vec!["pkg-a".into()],
            true,
        );
        env.apply(&first);
        let second = CandidateSet::new(
            vec![Candidate::parse("pkg-a<2.0").unwrap()],
            vec!["libpq-dev".into()],
            vec!["pkg-a".into()],
            true,
        );
        env.apply(&second);

        assert_eq!(env.len(), 1);
        assert_eq!(env.get("pkg-a").unwrap().to_string(), "pkg-a<2.0");
        assert!(env.has_system_package("libpq-dev"));
    }

    #[test]
    fn test_apply_drops_packages_missing_from_set() {
        let mut env = EnvironmentState::new();
        env.apply(&CandidateSet::new(
            vec![Candidate::any("psycopg2"), Candidate::any("flask")],
            vec![],
            vec![],
            true,
        ));
        env.apply(&CandidateSet::new(
            vec![Candidate::any("psycopg2-binary"), Candidate::any("flask")],
            vec![],
            vec![],
            true,
        ));
        assert!(!env.contains("psycopg2"));
        assert!(env.contains("psycopg2-binary"));
        assert_eq!(env.len(), 2);
    }

    #[test]
    fn test_as_candidate_set_is_verifying() {
        let mut env = EnvironmentState::new();
        env.apply(&CandidateSet::new(
            vec![Candidate::any("requests")],
            vec![],
            vec![],
            false,
        ));
        let set = env.as_candidate_set();
        assert!(set.covers_waiting_list);
        assert!(set.pending.is_empty());
        assert_eq!(set.packages.len(), 1);
    }
}
