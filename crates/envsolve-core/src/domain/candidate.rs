//! Candidate packages awaiting installation.

use std::fmt;
use std::sync::LazyLock;

use regex::Regex;
use serde::{Deserialize, Serialize};

use super::error::SpecError;
use super::version::VersionRange;

static REQUIREMENT_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^([A-Za-z0-9][A-Za-z0-9._-]*)\s*(?:\[([^\]]*)\])?\s*(.*)$")
        .expect("REQUIREMENT_RE should compile")
});

/// Normalise a package name for identity: lowercase, `_` and `.` become `-`.
pub fn normalize_name(name: &str) -> String {
    name.trim()
        .chars()
        .map(|c| match c {
            '_' | '.' => '-',
            other => other.to_ascii_lowercase(),
        })
        .collect()
}

/// A package identifier plus an acceptable version range.
///
/// Candidates are immutable. Narrowing produces a new candidate via
/// [`Candidate::with_range`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Candidate {
    name: String,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    extras: Vec<String>,
    #[serde(default)]
    range: VersionRange,
}

impl Candidate {
    pub fn new(name: impl Into<String>, range: VersionRange) -> Self {
        Self {
            name: name.into(),
            extras: Vec::new(),
            range,
        }
    }

    /// A candidate that accepts any version.
    pub fn any(name: impl Into<String>) -> Self {
        Self::new(name, VersionRange::any())
    }

    /// Parse a single requirement line such as `numpy>=1.2,<2` or
    /// `requests[socks]==2.31.0  # pinned`.
    pub fn parse(spec: &str) -> Result<Self, SpecError> {
        let line = spec.split('#').next().unwrap_or_default();
        let line = line.split(';').next().unwrap_or_default().trim();
        if line.is_empty() {
            return Err(SpecError::Empty);
        }

        let caps = REQUIREMENT_RE
            .captures(line)
            .ok_or_else(|| SpecError::InvalidName(line.to_string()))?;

        let extras = caps
            .get(2)
            .map(|m| {
                m.as_str()
                    .split(',')
                    .map(str::trim)
                    .filter(|e| !e.is_empty())
                    .map(str::to_string)
                    .collect()
            })
            .unwrap_or_default();

        let range = VersionRange::parse(&caps[3])?;

        Ok(Self {
            name: caps[1].to_string(),
            extras,
            range,
        })
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn extras(&self) -> &[String] {
        &self.extras
    }

    pub fn range(&self) -> &VersionRange {
        &self.range
    }

    /// Normalised identity used for de-duplication.
    pub fn key(&self) -> String {
        normalize_name(&self.name)
    }

    /// Same package, different acceptable range.
    pub fn with_range(&self, range: VersionRange) -> Self {
        Self {
            name: self.name.clone(),
            extras: self.extras.clone(),
            range,
        }
    }

    /// Replace the package while keeping the acceptable range.
    pub fn renamed(&self, name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            extras: self.extras.clone(),
            range: self.range.clone(),
        }
    }
}

impl fmt::Display for Candidate {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.name)?;
        if !self.extras.is_empty() {
            write!(f, "[{}]", self.extras.join(","))?;
        }
        write!(f, "{}", self.range)
    }
}

impl std::str::FromStr for Candidate {
    type Err = SpecError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s)
    }
}
