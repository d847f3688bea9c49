//! Version numbers and version ranges.
//!
//! Versions are dotted numeric releases with an optional suffix
//! (`2.0`, `0.26b1`, `3.7.4.3`, `1.0.post1`). Ranges are built from
//! requirement specifiers (`==`, `!=`, `>=`, `>`, `<=`, `<`, `~=`, `==1.4.*`)
//! and are never mutated in place: narrowing returns a new range.

use std::cmp::Ordering;
use std::collections::BTreeSet;
use std::fmt;
use std::sync::LazyLock;

use regex::Regex;
use serde::{Deserialize, Serialize};

use super::error::SpecError;

static SPECIFIER_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(===|==|!=|~=|>=|<=|>|<)\s*([^\s,<>=!~;]+)").expect("SPECIFIER_RE should compile")
});

/// A parsed package version.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct Version {
    raw: String,
    release: Vec<u64>,
    suffix: Option<String>,
}

impl Version {
    pub fn parse(input: &str) -> Result<Self, SpecError> {
        let raw = input.trim();
        let body = raw.strip_prefix('v').unwrap_or(raw);
        let split_at = body
            .find(|c: char| !(c.is_ascii_digit() || c == '.'))
            .unwrap_or(body.len());
        let (release_part, suffix_part) = body.split_at(split_at);

        // "1.0.post1" leaves a trailing dot on the release part.
        let release_part = release_part.strip_suffix('.').unwrap_or(release_part);
        if release_part.is_empty() {
            return Err(SpecError::InvalidVersion(raw.to_string()));
        }

        let release = release_part
            .split('.')
            .map(|c| c.parse::<u64>())
            .collect::<Result<Vec<_>, _>>()
            .map_err(|_| SpecError::InvalidVersion(raw.to_string()))?;

        let suffix = suffix_part
            .trim_start_matches(['.', '-', '_'])
            .to_ascii_lowercase();
        if suffix.chars().any(|c| c.is_whitespace()) {
            return Err(SpecError::InvalidVersion(raw.to_string()));
        }

        Ok(Self {
            raw: raw.to_string(),
            release,
            suffix: (!suffix.is_empty()).then_some(suffix),
        })
    }

    pub fn release(&self) -> &[u64] {
        &self.release
    }

    pub fn is_prerelease(&self) -> bool {
        self.suffix.as_deref().map(suffix_key).is_some_and(|k| k.0 < 0)
    }

    /// Smallest version strictly above every release sharing `prefix_len` components.
    fn bump_prefix(&self, prefix_len: usize) -> Result<Version, SpecError> {
        let mut release: Vec<u64> = self.release.iter().copied().take(prefix_len).collect();
        while release.len() < prefix_len {
            release.push(0);
        }
        if let Some(last) = release.last_mut() {
            *last = last
                .checked_add(1)
                .ok_or_else(|| SpecError::InvalidVersion(self.raw.clone()))?;
        }
        let raw = release
            .iter()
            .map(u64::to_string)
            .collect::<Vec<_>>()
            .join(".");
        Ok(Version {
            raw,
            release,
            suffix: None,
        })
    }
}

/// Ordering key for a suffix: pre-releases rank below the bare release,
/// post and local releases above it.
fn suffix_key(suffix: &str) -> (i8, String, u64) {
    let letters: String = suffix
        .chars()
        .take_while(|c| c.is_ascii_alphabetic())
        .collect();
    let number = suffix[letters.len()..]
        .trim_start_matches(['.', '-', '_'])
        .chars()
        .take_while(|c| c.is_ascii_digit())
        .collect::<String>()
        .parse::<u64>()
        .unwrap_or(0);
    let rank = match letters.as_str() {
        "dev" => -2,
        "a" | "alpha" | "b" | "beta" | "c" | "rc" | "pre" | "preview" => -1,
        _ => 1,
    };
    let letters = match letters.as_str() {
        "alpha" => "a".to_string(),
        "beta" => "b".to_string(),
        "c" | "pre" | "preview" => "rc".to_string(),
        _ => letters,
    };
    (rank, letters, number)
}

impl Ord for Version {
    fn cmp(&self, other: &Self) -> Ordering {
        let len = self.release.len().max(other.release.len());
        for i in 0..len {
            let a = self.release.get(i).copied().unwrap_or(0);
            let b = other.release.get(i).copied().unwrap_or(0);
            match a.cmp(&b) {
                Ordering::Equal => continue,
                ord => return ord,
            }
        }
        let a = self.suffix.as_deref().map(suffix_key).unwrap_or((0, String::new(), 0));
        let b = other.suffix.as_deref().map(suffix_key).unwrap_or((0, String::new(), 0));
        a.cmp(&b)
    }
}

impl PartialOrd for Version {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl PartialEq for Version {
    fn eq(&self, other: &Self) -> bool {
        self.cmp(other) == Ordering::Equal
    }
}

impl Eq for Version {}

impl fmt::Display for Version {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.raw)
    }
}

impl std::str::FromStr for Version {
    type Err = SpecError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s)
    }
}

impl TryFrom<String> for Version {
    type Error = SpecError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        Self::parse(&value)
    }
}

impl From<Version> for String {
    fn from(value: Version) -> Self {
        value.raw
    }
}

fn is_separator(text: &str) -> bool {
    text.chars().all(|c| c.is_whitespace() || c == ',')
}

/// One side of a version interval.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Bound {
    Unbounded,
    Inclusive(Version),
    Exclusive(Version),
}

impl Bound {
    fn version(&self) -> Option<&Version> {
        match self {
            Bound::Unbounded => None,
            Bound::Inclusive(v) | Bound::Exclusive(v) => Some(v),
        }
    }
}

fn compare_bounds(a: &Bound, b: &Bound) -> Option<Ordering> {
    a.version().zip(b.version()).map(|(x, y)| x.cmp(y))
}

/// Pick the stricter of two lower bounds.
fn stricter_lower(a: Bound, b: Bound) -> Bound {
    match compare_bounds(&a, &b) {
        None if a == Bound::Unbounded => b,
        None => a,
        Some(Ordering::Greater) => a,
        Some(Ordering::Less) => b,
        Some(Ordering::Equal) if matches!(a, Bound::Exclusive(_)) => a,
        Some(Ordering::Equal) => b,
    }
}

/// Pick the stricter of two upper bounds.
fn stricter_upper(a: Bound, b: Bound) -> Bound {
    match compare_bounds(&a, &b) {
        None if a == Bound::Unbounded => b,
        None => a,
        Some(Ordering::Less) => a,
        Some(Ordering::Greater) => b,
        Some(Ordering::Equal) if matches!(a, Bound::Exclusive(_)) => a,
        Some(Ordering::Equal) => b,
    }
}

/// An acceptable set of versions for one package.
///
/// `pinned` records a preferred exact release (`==`). Excluding the pinned
/// release relaxes the range to "anything older" inside the hard bounds,
/// which is how a failing pin falls back to earlier releases.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct VersionRange {
    lower: Bound,
    upper: Bound,
    pinned: Option<Version>,
    excluded: BTreeSet<Version>,
}

impl Default for VersionRange {
    fn default() -> Self {
        Self::any()
    }
}

impl VersionRange {
    /// The unconstrained range.
    pub fn any() -> Self {
        Self {
            lower: Bound::Unbounded,
            upper: Bound::Unbounded,
            pinned: None,
            excluded: BTreeSet::new(),
        }
    }

    /// A range pinned to exactly `version`.
    pub fn exact(version: Version) -> Self {
        Self {
            pinned: Some(version),
            ..Self::any()
        }
    }

    /// Parse a comma- or space-separated list of specifiers.
    pub fn parse(input: &str) -> Result<Self, SpecError> {
        let input = input.trim();
        let mut range = Self::any();
        let mut last_end = 0usize;

        for caps in SPECIFIER_RE.captures_iter(input) {
            let Some(whole) = caps.get(0) else { continue };
            if !is_separator(&input[last_end..whole.start()]) {
                return Err(SpecError::UnsupportedOperator(input.to_string()));
            }
            last_end = whole.end();
            range = range.with_specifier(&caps[1], &caps[2])?;
        }

        if !is_separator(&input[last_end..]) {
            return Err(SpecError::UnsupportedOperator(input.to_string()));
        }
        Ok(range)
    }

    fn with_specifier(mut self, op: &str, value: &str) -> Result<Self, SpecError> {
        if let Some(prefix) = value.strip_suffix(".*") {
            let base = Version::parse(prefix)?;
            return match op {
                "==" => {
                    let next = base.bump_prefix(base.release.len())?;
                    self.lower = stricter_lower(self.lower, Bound::Inclusive(base));
                    self.upper = stricter_upper(self.upper, Bound::Exclusive(next));
                    Ok(self)
                }
                _ => Err(SpecError::UnsupportedOperator(format!("{op}{value}"))),
            };
        }

        let version = Version::parse(value)?;
        match op {
            "==" | "===" => match self.pinned.take() {
                Some(existing) if existing != version => {
                    let top = existing.max(version);
                    self.lower = stricter_lower(self.lower, Bound::Inclusive(top.clone()));
                    self.upper = stricter_upper(self.upper, Bound::Exclusive(top));
                }
                _ => self.pinned = Some(version),
            },
            "!=" => {
                self.excluded.insert(version);
            }
            ">=" => self.lower = stricter_lower(self.lower, Bound::Inclusive(version)),
            ">" => self.lower = stricter_lower(self.lower, Bound::Exclusive(version)),
            "<=" => self.upper = stricter_upper(self.upper, Bound::Inclusive(version)),
            "<" => self.upper = stricter_upper(self.upper, Bound::Exclusive(version)),
            "~=" => {
                if version.release.len() < 2 {
                    return Err(SpecError::UnsupportedOperator(format!("~={value}")));
                }
                let next = version.bump_prefix(version.release.len() - 1)?;
                self.lower = stricter_lower(self.lower, Bound::Inclusive(version));
                self.upper = stricter_upper(self.upper, Bound::Exclusive(next));
            }
            other => return Err(SpecError::UnsupportedOperator(other.to_string())),
        }
        Ok(self.normalized())
    }

    /// Bounds sitting on an excluded version become exclusive.
    fn normalized(mut self) -> Self {
        if let Bound::Inclusive(v) = &self.lower {
            if self.excluded.contains(v) {
                self.lower = Bound::Exclusive(v.clone());
            }
        }
        if let Bound::Inclusive(v) = &self.upper {
            if self.excluded.contains(v) {
                self.upper = Bound::Exclusive(v.clone());
            }
        }
        self
    }

    pub fn pinned(&self) -> Option<&Version> {
        self.pinned.as_ref()
    }

    pub fn is_unconstrained(&self) -> bool {
        *self == Self::any()
    }

    fn within_bounds(&self, version: &Version) -> bool {
        let above = match &self.lower {
            Bound::Unbounded => true,
            Bound::Inclusive(l) => version >= l,
            Bound::Exclusive(l) => version > l,
        };
        let below = match &self.upper {
            Bound::Unbounded => true,
            Bound::Inclusive(u) => version <= u,
            Bound::Exclusive(u) => version < u,
        };
        above && below
    }

    /// Whether `version` is acceptable under this range.
    pub fn admits(&self, version: &Version) -> bool {
        if self.excluded.contains(version) || !self.within_bounds(version) {
            return false;
        }
        match &self.pinned {
            Some(pin) => pin == version,
            None => true,
        }
    }

    /// Whether the range admits exactly `version` and nothing else.
    pub fn selects(&self, version: &Version) -> bool {
        if let Some(pin) = &self.pinned {
            return pin == version && self.admits(version);
        }
        matches!(
            (&self.lower, &self.upper),
            (Bound::Inclusive(l), Bound::Inclusive(u)) if l == version && u == version
        ) && !self.excluded.contains(version)
    }

    /// True when no version can satisfy the range.
    pub fn is_empty(&self) -> bool {
        if let Some(pin) = &self.pinned {
            return !self.within_bounds(pin) || self.excluded.contains(pin);
        }
        match (&self.lower, &self.upper) {
            (Bound::Unbounded, _) | (_, Bound::Unbounded) => false,
            (lower, upper) => {
                let (l, u) = match (lower.version(), upper.version()) {
                    (Some(l), Some(u)) => (l, u),
                    _ => return false,
                };
                match l.cmp(u) {
                    Ordering::Greater => true,
                    Ordering::Less => false,
                    Ordering::Equal => {
                        !(matches!(lower, Bound::Inclusive(_))
                            && matches!(upper, Bound::Inclusive(_)))
                            || self.excluded.contains(l)
                    }
                }
            }
        }
    }

    /// Return a new range that no longer admits `version`.
    pub fn exclude(&self, version: &Version) -> VersionRange {
        let mut next = self.clone();
        if next.pinned.as_ref() == Some(version) {
            next.pinned = None;
            next.upper = stricter_upper(next.upper, Bound::Exclusive(version.clone()));
            return next.normalized();
        }
        if !next.admits(version) {
            return next;
        }
        next.excluded.insert(version.clone());
        next.normalized()
    }

    fn lower_covers(&self, other: &VersionRange) -> bool {
        match (&self.lower, &other.lower) {
            (Bound::Unbounded, _) => true,
            (_, Bound::Unbounded) => false,
            (Bound::Inclusive(a), Bound::Inclusive(b) | Bound::Exclusive(b)) => b >= a,
            (Bound::Exclusive(a), Bound::Inclusive(b)) => b > a,
            (Bound::Exclusive(a), Bound::Exclusive(b)) => b >= a,
        }
    }

    fn upper_covers(&self, other: &VersionRange) -> bool {
        match (&self.upper, &other.upper) {
            (Bound::Unbounded, _) => true,
            (_, Bound::Unbounded) => false,
            (Bound::Inclusive(a), Bound::Inclusive(b) | Bound::Exclusive(b)) => b <= a,
            (Bound::Exclusive(a), Bound::Inclusive(b)) => b < a,
            (Bound::Exclusive(a), Bound::Exclusive(b)) => b <= a,
        }
    }

    /// Conservative containment: true only when every version admitted by
    /// `other` is provably admitted by `self`.
    pub fn covers(&self, other: &VersionRange) -> bool {
        if self.is_unconstrained() || self == other {
            return true;
        }
        if let Some(pin) = &other.pinned {
            return other.admits(pin) && self.admits(pin);
        }
        if self.pinned.is_some() {
            return false;
        }
        self.lower_covers(other)
            && self.upper_covers(other)
            && self.excluded.iter().all(|v| !other.admits(v))
    }
}

impl fmt::Display for VersionRange {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut parts = Vec::new();
        if let Some(pin) = &self.pinned {
            parts.push(format!("=={pin}"));
        }
        match &self.lower {
            Bound::Unbounded => {}
            Bound::Inclusive(v) => parts.push(format!(">={v}")),
            Bound::Exclusive(v) => parts.push(format!(">{v}")),
        }
        match &self.upper {
            Bound::Unbounded => {}
            Bound::Inclusive(v) => parts.push(format!("<={v}")),
            Bound::Exclusive(v) => parts.push(format!("<{v}")),
        }
        for v in &self.excluded {
            // Bounds already rendered exclusive need no separate exclusion.
            if self.lower.version() == Some(v) || self.upper.version() == Some(v) {
                continue;
            }
            parts.push(format!("!={v}"));
        }
        f.write_str(&parts.join(","))
    }
}

impl TryFrom<String> for VersionRange {
    type Error = SpecError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        Self::parse(&value)
    }
}

impl From<VersionRange> for String {
    fn from(value: VersionRange) -> Self {
        value.to_string()
    }
}
