//! Solution versions.
//!
//! Versions are written as `major.minor[.build[.revision]]`. Only the
//! `major.minor` pair takes part in comparisons: an element introduced in
//! `9.0.2` is available as soon as `9.0` of its solution is installed.

use contentmap_config::parse_version;
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;

use super::SchemaError;

/// A `major.minor` solution version.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct SolutionVersion {
    pub major: u32,
    pub minor: u32,
}

impl SolutionVersion {
    pub const fn new(major: u32, minor: u32) -> Self {
        Self { major, minor }
    }

    /// Whether an element introduced in `self` is available when `installed` is present.
    pub fn is_available_in(&self, installed: SolutionVersion) -> bool {
        *self <= installed
    }
}

impl fmt::Display for SolutionVersion {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.{}", self.major, self.minor)
    }
}

impl FromStr for SolutionVersion {
    type Err = SchemaError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let (major, minor) =
            parse_version(s).ok_or_else(|| SchemaError::invalid_version(s.trim()))?;
        Ok(Self { major, minor })
    }
}

impl Serialize for SolutionVersion {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        serializer.collect_str(self)
    }
}

impl<'de> Deserialize<'de> for SolutionVersion {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: Deserializer<'de>,
    {
        let s = String::deserialize(deserializer)?;
        s.parse().map_err(serde::de::Error::custom)
    }
}

/// Installed solution names and their versions.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct InstalledSolutions {
    solutions: BTreeMap<String, SolutionVersion>,
}

impl InstalledSolutions {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a solution, replacing any previously recorded version.
    pub fn with(mut self, name: impl Into<String>, version: SolutionVersion) -> Self {
        self.insert(name, version);
        self
    }

    pub fn insert(&mut self, name: impl Into<String>, version: SolutionVersion) {
        self.solutions.insert(name.into(), version);
    }

    /// Parse a `name -> "major.minor"` table, as found in configuration files.
    pub fn parse<'a>(
        entries: impl IntoIterator<Item = (&'a String, &'a String)>,
    ) -> Result<Self, SchemaError> {
        let mut installed = Self::new();
        for (name, version) in entries {
            installed.insert(name.clone(), version.parse()?);
        }
        Ok(installed)
    }

    pub fn version_of(&self, solution: &str) -> Option<SolutionVersion> {
        self.solutions.get(solution).copied()
    }

    pub fn contains(&self, solution: &str) -> bool {
        self.solutions.contains_key(solution)
    }

    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.solutions.keys().map(|s| s.as_str())
    }

    pub fn is_empty(&self) -> bool {
        self.solutions.is_empty()
    }

    /// Whether an element owned by `solution` and introduced in `introduced` survives filtering.
    ///
    /// Unversioned elements are always included. Versioned elements of a
    /// solution that is not installed are excluded.
    pub fn includes(&self, solution: &str, introduced: Option<SolutionVersion>) -> bool {
        match introduced {
            None => true,
            Some(introduced) => self
                .version_of(solution)
                .is_some_and(|installed| introduced.is_available_in(installed)),
        }
    }
}
