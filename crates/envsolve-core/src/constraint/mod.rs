//! Constraint store: the waiting list plus everything learned from failures.
//!
//! # Modules
//!
//! - [`waiting_list`] — `WaitingList`: ordered candidates still to install
//! - [`conflict`]     — `ConflictRecord` / `ConflictSet`: learned incompatibilities

pub mod conflict;
pub mod waiting_list;

use std::collections::BTreeSet;

use serde::{Deserialize, Serialize};

pub use conflict::{ConflictPeer, ConflictRecord, ConflictSet, PackagePin};
pub use waiting_list::{EnqueueOutcome, WaitingList};

use crate::domain::{Candidate, CandidateSet, EnvironmentState, Version, VersionRange};

/// Result of [`ConstraintStore::narrow`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum NarrowOutcome {
    /// The candidate was replaced by a strictly narrower one.
    Narrowed(Candidate),
    /// The version was not admitted anyway; nothing changed.
    Unchanged,
    /// Nothing is left; the candidate was removed and marked unsatisfiable.
    Unsatisfiable(Candidate),
    NotFound,
}

/// Mutable resolution state for one run.
///
/// Owned by a single controller; no internal locking.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ConstraintStore {
    waiting: WaitingList,
    conflicts: ConflictSet,
    /// System packages requested but not yet part of a successful attempt.
    system_dependencies: Vec<String>,
    unsatisfiable: Vec<Candidate>,
    skipped: Vec<Candidate>,
    /// Keys that must no longer be carried over from the environment.
    retracted: BTreeSet<String>,
}

impl ConstraintStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Seed a store from an initial discovery list.
    pub fn with_candidates(candidates: impl IntoIterator<Item = Candidate>) -> Self {
        let mut store = Self::new();
        for candidate in candidates {
            store.enqueue(candidate);
        }
        store
    }

    pub fn enqueue(&mut self, candidate: Candidate) -> EnqueueOutcome {
        self.retracted.remove(&candidate.key());
        self.waiting.enqueue(candidate)
    }

    /// Put an installed candidate back on the waiting list so it can be
    /// narrowed, substituted or skipped.
    pub fn reopen(&mut self, candidate: Candidate) {
        if !self.waiting.contains(&candidate.key()) {
            self.waiting.put(candidate);
        }
    }

    /// Exclude one failing version from a waiting candidate.
    pub fn narrow(&mut self, key: &str, excluded: &Version) -> NarrowOutcome {
        let Some(current) = self.waiting.get(key) else {
            return NarrowOutcome::NotFound;
        };
        let range = current.range().exclude(excluded);
        if &range == current.range() {
            return NarrowOutcome::Unchanged;
        }
        let narrowed = current.with_range(range);

        if narrowed.range().is_empty() {
            self.waiting.remove(key);
            self.retracted.insert(key.to_string());
            self.unsatisfiable.push(narrowed.clone());
            return NarrowOutcome::Unsatisfiable(narrowed);
        }
        self.waiting.put(narrowed.clone());
        NarrowOutcome::Narrowed(narrowed)
    }

    /// Replace a waiting candidate with an alternative package.
    pub fn substitute(&mut self, key: &str, alternative: &str) -> Option<Candidate> {
        let current = self.waiting.get(key)?;
        let replacement = current.renamed(alternative);
        if replacement.key() == key {
            return None;
        }
        self.waiting.swap(key, replacement.clone());
        self.retracted.insert(key.to_string());
        self.retracted.remove(&replacement.key());
        Some(replacement)
    }

    /// Give up on a waiting candidate and continue without it.
    pub fn skip(&mut self, key: &str) -> Option<Candidate> {
        let removed = self.waiting.remove(key)?;
        self.retracted.insert(key.to_string());
        self.skipped.push(removed.clone());
        Some(removed)
    }

    /// Continue without a candidate previously marked unsatisfiable.
    pub fn skip_unsatisfiable(&mut self, key: &str) -> Option<Candidate> {
        let i = self.unsatisfiable.iter().position(|c| c.key() == key)?;
        let removed = self.unsatisfiable.remove(i);
        self.skipped.push(removed.clone());
        Some(removed)
    }

    /// Replace a candidate previously marked unsatisfiable with an
    /// unconstrained alternative package.
    pub fn substitute_unsatisfiable(&mut self, key: &str, alternative: &str) -> Option<Candidate> {
        let i = self.unsatisfiable.iter().position(|c| c.key() == key)?;
        let replacement = self.unsatisfiable[i]
            .renamed(alternative)
            .with_range(VersionRange::any());
        if replacement.key() == key {
            return None;
        }
        self.unsatisfiable.remove(i);
        self.enqueue(replacement.clone());
        Some(replacement)
    }

    /// Request a system package. Returns `false` if already requested.
    pub fn add_system_dependency(&mut self, name: &str) -> bool {
        if self.system_dependencies.iter().any(|s| s == name) {
            return false;
        }
        self.system_dependencies.push(name.to_string());
        true
    }

    pub fn deprioritize(&mut self, key: &str) -> bool {
        self.waiting.deprioritize(key)
    }

    pub fn record_conflict(&mut self, record: ConflictRecord) -> bool {
        self.conflicts.record(record)
    }

    pub fn would_conflict(&self, set: &CandidateSet) -> Option<&ConflictRecord> {
        self.conflicts.would_conflict(set)
    }

    /// The next candidate to attempt, or `None` when nothing is outstanding.
    pub fn next(&self) -> Option<&Candidate> {
        self.waiting.front()
    }

    /// Build the next attempt: the environment plus as many waiting
    /// candidates as can be added, in order, without reproducing a
    /// recorded conflict. Deferred candidates stay on the waiting list.
    pub fn snapshot(&self, env: &EnvironmentState) -> CandidateSet {
        let pending_keys: BTreeSet<String> = self.waiting.iter().map(|c| c.key()).collect();
        let mut packages: Vec<Candidate> = env
            .candidates()
            .filter(|c| {
                let key = c.key();
                !pending_keys.contains(&key) && !self.retracted.contains(&key)
            })
            .cloned()
            .collect();

        let mut system_packages: Vec<String> = env.system_packages().cloned().collect();
        for dep in &self.system_dependencies {
            if !system_packages.contains(dep) {
                system_packages.push(dep.clone());
            }
        }

        let mut pending = Vec::new();
        let mut deferred = false;
        for candidate in self.waiting.iter() {
            packages.push(candidate.clone());
            let trial = CandidateSet::new(packages.clone(), system_packages.clone(), Vec::new(), false);
            if self.conflicts.would_conflict(&trial).is_some() {
                packages.pop();
                deferred = true;
            } else {
                pending.push(candidate.key());
            }
        }

        CandidateSet::new(packages, system_packages, pending, !deferred)
    }

    /// Drop everything a successful attempt installed from the outstanding state.
    pub fn mark_installed(&mut self, set: &CandidateSet) {
        for key in &set.pending {
            self.waiting.remove(key);
        }
        self.system_dependencies
            .retain(|dep| !set.system_packages.contains(dep));
    }

    pub fn waiting(&self) -> &WaitingList {
        &self.waiting
    }

    pub fn conflicts(&self) -> &ConflictSet {
        &self.conflicts
    }

    pub fn system_dependencies(&self) -> &[String] {
        &self.system_dependencies
    }

    pub fn unsatisfiable(&self) -> &[Candidate] {
        &self.unsatisfiable
    }

    pub fn skipped(&self) -> &[Candidate] {
        &self.skipped
    }

    /// Everything that did not make it into the environment.
    pub fn unresolved(&self) -> Vec<Candidate> {
        self.unsatisfiable
            .iter()
            .chain(self.skipped.iter())
            .chain(self.waiting.iter())
            .cloned()
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::{Evidence, FailureKind};

    fn c(spec: &str) -> Candidate {
        Candidate::parse(spec).unwrap()
    }

    fn v(s: &str) -> Version {
        Version::parse(s).unwrap()
    }

    #[test]
    fn test_narrow_replaces_candidate() {
        let mut store = ConstraintStore::with_candidates([c("pkg-a==2.0")]);
        match store.narrow("pkg-a", &v("2.0")) {
            NarrowOutcome::Narrowed(n) => assert_eq!(n.to_string(), "pkg-a<2.0"),
            other => panic!("unexpected: {other:?}"),
        }
        assert_eq!(store.narrow("pkg-a", &v("3.0")), NarrowOutcome::Unchanged);
        assert_eq!(store.narrow("missing", &v("1.0")), NarrowOutcome::NotFound);
    }

    #[test]
    fn test_narrow_to_empty_marks_unsatisfiable() {
        let mut store = ConstraintStore::with_candidates([c("pkg-a>=2.0,<=2.0"), c("flask")]);
        let outcome = store.narrow("pkg-a", &v("2.0"));
        assert!(matches!(outcome, NarrowOutcome::Unsatisfiable(_)));
        assert!(!store.waiting().contains("pkg-a"));
        assert_eq!(store.unsatisfiable().len(), 1);
        let unresolved: Vec<String> = store.unresolved().iter().map(|c| c.key()).collect();
        assert_eq!(unresolved, ["pkg-a", "flask"]);
    }

    #[test]
    fn test_unsatisfiable_candidate_can_be_replaced_or_skipped() {
        let mut store =
            ConstraintStore::with_candidates([c("pkg-a>=2.0,<=2.0"), c("pkg-c>=1.0,<=1.0")]);
        store.narrow("pkg-a", &v("2.0"));
        store.narrow("pkg-c", &v("1.0"));
        assert_eq!(store.unsatisfiable().len(), 2);

        let alt = store.substitute_unsatisfiable("pkg-a", "pkg-a-ng").unwrap();
        assert!(alt.range().is_unconstrained());
        assert_eq!(store.next().map(|c| c.key()), Some("pkg-a-ng".to_string()));

        assert!(store.skip_unsatisfiable("pkg-c").is_some());
        assert!(store.unsatisfiable().is_empty());
        assert_eq!(store.skipped().len(), 1);
    }

    #[test]
    fn test_snapshot_merges_environment_and_pending() {
        let mut env = EnvironmentState::new();
        env.apply(&CandidateSet::new(vec![c("requests"), c("numpy==1.26")], vec![], vec![], true));

        let mut store = ConstraintStore::with_candidates([c("flask")]);
        store.reopen(c("numpy==1.26"));
        store.narrow("numpy", &v("1.26"));
        store.add_system_dependency("libpq-dev");

        let set = store.snapshot(&env);
        let rendered: Vec<String> = set.packages.iter().map(|c| c.to_string()).collect();
        assert_eq!(rendered, ["requests", "flask", "numpy<1.26"]);
        assert_eq!(set.pending, ["flask", "numpy"]);
        assert_eq!(set.system_packages, ["libpq-dev"]);
        assert!(set.covers_waiting_list);
    }

    #[test]
    fn test_snapshot_defers_known_conflicts() {
        let mut store = ConstraintStore::with_candidates([c("pkg-b==1.5"), c("pkg-a==2.0")]);
        let record = ConflictRecord::from_evidence(
            FailureKind::VersionConflict,
            &Evidence {
                package: Some("pkg-a".into()),
                version: Some("2.0".into()),
                peer: Some("pkg-b".into()),
                peer_version: Some("1.5".into()),
                ..Evidence::default()
            },
        )
        .unwrap();
        assert!(store.record_conflict(record));

        let set = store.snapshot(&EnvironmentState::new());
        assert!(store.would_conflict(&set).is_none());
        assert_eq!(set.pending, ["pkg-b"]);
        assert!(!set.covers_waiting_list);
    }

    #[test]
    fn test_skip_and_substitute_retract_installed_packages() {
        let mut env = EnvironmentState::new();
        env.apply(&CandidateSet::new(vec![c("psycopg2"), c("lxml")], vec![], vec![], true));

        let mut store = ConstraintStore::new();
        store.reopen(c("psycopg2"));
        let replacement = store.substitute("psycopg2", "psycopg2-binary").unwrap();
        assert_eq!(replacement.key(), "psycopg2-binary");
        store.reopen(c("lxml"));
        assert!(store.skip("lxml").is_some());

        let set = store.snapshot(&env);
        let keys: Vec<String> = set.packages.iter().map(|c| c.key()).collect();
        assert_eq!(keys, ["psycopg2-binary"]);
        assert_eq!(store.skipped().len(), 1);
    }

    #[test]
    fn test_mark_installed_clears_pending_state() {
        let mut store = ConstraintStore::with_candidates([c("a"), c("b")]);
        store.add_system_dependency("libffi-dev");
        let set = store.snapshot(&EnvironmentState::new());
        store.mark_installed(&set);
        assert!(store.next().is_none());
        assert!(store.system_dependencies().is_empty());
        assert!(store.add_system_dependency("libssl-dev"));
        assert!(!store.add_system_dependency("libssl-dev"));
    }
}
