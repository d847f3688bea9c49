//! Ordered queue of candidates not yet installed.

use serde::{Deserialize, Serialize};

use crate::domain::Candidate;

/// Result of [`WaitingList::enqueue`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EnqueueOutcome {
    Added,
    /// An entry with the same key was replaced in place.
    Replaced,
    /// The existing entry already admits everything the new one does.
    Redundant,
}

/// Candidates in discovery order, at most one per normalised package key.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct WaitingList {
    entries: Vec<Candidate>,
}

impl WaitingList {
    pub fn new() -> Self {
        Self::default()
    }

    fn position(&self, key: &str) -> Option<usize> {
        self.entries.iter().position(|c| c.key() == key)
    }

    /// Add a discovered candidate, or replace an existing entry for the same
    /// package unless that entry is already at least as wide.
    pub fn enqueue(&mut self, candidate: Candidate) -> EnqueueOutcome {
        match self.position(&candidate.key()) {
            Some(i) if self.entries[i].range().covers(candidate.range()) => {
                EnqueueOutcome::Redundant
            }
            Some(i) => {
                self.entries[i] = candidate;
                EnqueueOutcome::Replaced
            }
            None => {
                self.entries.push(candidate);
                EnqueueOutcome::Added
            }
        }
    }

    /// Replace the entry for the candidate's package unconditionally,
    /// appending if absent.
    pub fn put(&mut self, candidate: Candidate) {
        match self.position(&candidate.key()) {
            Some(i) => self.entries[i] = candidate,
            None => self.entries.push(candidate),
        }
    }

    /// Swap the entry for `key` with `replacement`, keeping its position.
    /// Any other entry already holding the replacement's package is dropped.
    pub fn swap(&mut self, key: &str, replacement: Candidate) -> Option<Candidate> {
        let i = self.position(key)?;
        let new_key = replacement.key();
        let old = std::mem::replace(&mut self.entries[i], replacement);
        let mut index = 0;
        self.entries.retain(|c| {
            let keep = index == i || c.key() != new_key;
            index += 1;
            keep
        });
        Some(old)
    }

    pub fn remove(&mut self, key: &str) -> Option<Candidate> {
        let i = self.position(key)?;
        Some(self.entries.remove(i))
    }

    /// Move a previously failed entry to the end of the queue.
    pub fn deprioritize(&mut self, key: &str) -> bool {
        match self.position(key) {
            Some(i) => {
                let entry = self.entries.remove(i);
                self.entries.push(entry);
                true
            }
            None => false,
        }
    }

    pub fn get(&self, key: &str) -> Option<&Candidate> {
        self.entries.iter().find(|c| c.key() == key)
    }

    pub fn contains(&self, key: &str) -> bool {
        self.position(key).is_some()
    }

    pub fn front(&self) -> Option<&Candidate> {
        self.entries.first()
    }

    pub fn iter(&self) -> impl Iterator<Item = &Candidate> {
        self.entries.iter()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn c(spec: &str) -> Candidate {
        Candidate::parse(spec).unwrap()
    }

    fn names(list: &WaitingList) -> Vec<String> {
        list.iter().map(|c| c.to_string()).collect()
    }

    #[test]
    fn test_enqueue_keeps_one_entry_per_key() {
        let mut list = WaitingList::new();
        assert_eq!(list.enqueue(c("numpy>=1.20")), EnqueueOutcome::Added);
        assert_eq!(list.enqueue(c("requests")), EnqueueOutcome::Added);
        assert_eq!(list.enqueue(c("NumPy==1.19")), EnqueueOutcome::Replaced);
        assert_eq!(names(&list), ["NumPy==1.19", "requests"]);
    }

    #[test]
    fn test_enqueue_narrower_constraint_is_redundant() {
        let mut list = WaitingList::new();
        list.enqueue(c("requests"));
        assert_eq!(list.enqueue(c("requests>=2.0")), EnqueueOutcome::Redundant);
        assert_eq!(list.enqueue(c("requests")), EnqueueOutcome::Redundant);
        assert_eq!(names(&list), ["requests"]);
    }

    #[test]
    fn test_deprioritize_moves_to_end() {
        let mut list = WaitingList::new();
        list.enqueue(c("a"));
        list.enqueue(c("b"));
        list.enqueue(c("c"));
        assert!(list.deprioritize("a"));
        assert!(!list.deprioritize("zzz"));
        assert_eq!(names(&list), ["b", "c", "a"]);
        assert_eq!(list.front().map(|c| c.name()), Some("b"));
    }

    #[test]
    fn test_swap_keeps_position_and_dedups() {
        let mut list = WaitingList::new();
        list.enqueue(c("psycopg2==2.9"));
        list.enqueue(c("flask"));
        list.enqueue(c("psycopg2-binary"));
        let old = list.swap("psycopg2", c("psycopg2-binary==2.9")).unwrap();
        assert_eq!(old.to_string(), "psycopg2==2.9");
        assert_eq!(names(&list), ["psycopg2-binary==2.9", "flask"]);
        assert!(list.swap("missing", c("x")).is_none());
    }

    #[test]
    fn test_put_and_remove() {
        let mut list = WaitingList::new();
        list.put(c("a==1"));
        list.put(c("a<1"));
        assert_eq!(names(&list), ["a<1"]);
        assert!(list.remove("a").is_some());
        assert!(list.is_empty());
        assert!(list.remove("a").is_none());
    }
}
