//! Semantic version parsing and ordering (spec §3/§4.B), grounded on
//! `semver_resolver.py::SemVer`.

use crate::error::{Error, Result};
use regex::Regex;
use std::cmp::Ordering;
use std::fmt;
use std::str::FromStr;
use std::sync::OnceLock;

fn semver_pattern() -> &'static Regex {
    static PATTERN: OnceLock<Regex> = OnceLock::new();
    PATTERN.get_or_init(|| {
        Regex::new(
            r"^(?P<major>0|[1-9]\d*)\.(?P<minor>0|[1-9]\d*)\.(?P<patch>0|[1-9]\d*)(?:-(?P<prerelease>(?:0|[1-9]\d*|\d*[a-zA-Z-][0-9a-zA-Z-]*)(?:\.(?:0|[1-9]\d*|\d*[a-zA-Z-][0-9a-zA-Z-]*))*))?(?:\+(?P<build>[0-9a-zA-Z-]+(?:\.[0-9a-zA-Z-]+)*))?$",
        )
        .expect("static semver pattern is valid")
    })
}

/// Risk classification for moving from one version to another.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BreakingChangeRisk {
    None,
    Low,
    Medium,
    High,
}

impl fmt::Display for BreakingChangeRisk {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            BreakingChangeRisk::None => "none",
            BreakingChangeRisk::Low => "low",
            BreakingChangeRisk::Medium => "medium",
            BreakingChangeRisk::High => "high",
        };
        write!(f, "{s}")
    }
}

/// A parsed semantic version.
///
/// Equality and ordering ignore `build`, matching the semver spec: build
/// metadata is informational only. A version with a non-empty `prerelease`
/// always orders before the same `major.minor.patch` without one.
#[derive(Debug, Clone)]
pub struct Version {
    pub major: u64,
    pub minor: u64,
    pub patch: u64,
    pub prerelease: String,
    pub build: String,
}

impl Version {
    pub fn new(major: u64, minor: u64, patch: u64) -> Self {
        Self {
            major,
            minor,
            patch,
            prerelease: String::new(),
            build: String::new(),
        }
    }

    /// Same major version as `other`.
    pub fn is_compatible_with(&self, other: &Version) -> bool {
        self.major == other.major
    }

    /// Risk of moving from `other` to `self`.
    pub fn breaking_change_from(&self, other: &Version) -> BreakingChangeRisk {
        if self.major > other.major {
            BreakingChangeRisk::High
        } else if self.major < other.major {
            BreakingChangeRisk::Medium
        } else if self.minor != other.minor {
            BreakingChangeRisk::Low
        } else {
            BreakingChangeRisk::None
        }
    }
}

impl fmt::Display for Version {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.{}.{}", self.major, self.minor, self.patch)?;
        if !self.prerelease.is_empty() {
            write!(f, "-{}", self.prerelease)?;
        }
        if !self.build.is_empty() {
            write!(f, "+{}", self.build)?;
        }
        Ok(())
    }
}

impl PartialEq for Version {
    fn eq(&self, other: &Self) -> bool {
        self.major == other.major
            && self.minor == other.minor
            && self.patch == other.patch
            && self.prerelease == other.prerelease
    }
}

impl Eq for Version {}

impl PartialOrd for Version {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for Version {
    fn cmp(&self, other: &Self) -> Ordering {
        self.major
            .cmp(&other.major)
            .then(self.minor.cmp(&other.minor))
            .then(self.patch.cmp(&other.patch))
            .then_with(|| match (self.prerelease.is_empty(), other.prerelease.is_empty()) {
                (false, true) => Ordering::Less,
                (true, false) => Ordering::Greater,
                _ => self.prerelease.cmp(&other.prerelease),
            })
    }
}

impl FromStr for Version {
    type Err = Error;

    fn from_str(raw: &str) -> Result<Self> {
        let trimmed = raw.trim();
        let captures = semver_pattern()
            .captures(trimmed)
            .ok_or_else(|| Error::InputValidation(format!("not a valid semantic version: {raw}")))?;

        let get = |name: &str| -> Result<u64> {
            captures[name]
                .parse()
                .map_err(|_| Error::InputValidation(format!("version component overflow: {raw}")))
        };

        Ok(Version {
            major: get("major")?,
            minor: get("minor")?,
            patch: get("patch")?,
            prerelease: captures.name("prerelease").map(|m| m.as_str().to_string()).unwrap_or_default(),
            build: captures.name("build").map(|m| m.as_str().to_string()).unwrap_or_default(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_plain_version() {
        let v: Version = "1.2.3".parse().unwrap();
        assert_eq!((v.major, v.minor, v.patch), (1, 2, 3));
        assert!(v.prerelease.is_empty());
    }

    #[test]
    fn parses_prerelease_and_build() {
        let v: Version = "1.2.3-beta.1+build.7".parse().unwrap();
        assert_eq!(v.prerelease, "beta.1");
        assert_eq!(v.build, "build.7");
    }

    #[test]
    fn rejects_malformed_version() {
        assert!("1.2".parse::<Version>().is_err());
        assert!("v1.2.3".parse::<Version>().is_err());
    }

    #[test]
    fn prerelease_sorts_before_release() {
        let pre: Version = "1.0.0-alpha".parse().unwrap();
        let rel: Version = "1.0.0".parse().unwrap();
        assert!(pre < rel);
    }

    #[test]
    fn ordering_is_numeric_not_lexicographic() {
        let a: Version = "1.9.0".parse().unwrap();
        let b: Version = "1.10.0".parse().unwrap();
        assert!(a < b);
    }

    #[test]
    fn build_metadata_does_not_affect_equality() {
        let a: Version = "1.0.0+001".parse().unwrap();
        let b: Version = "1.0.0+002".parse().unwrap();
        assert_eq!(a, b);
    }

    #[test]
    fn breaking_change_classification() {
        let v1: Version = "1.2.0".parse().unwrap();
        let v2: Version = "2.0.0".parse().unwrap();
        let v3: Version = "1.3.0".parse().unwrap();
        let v4: Version = "1.2.1".parse().unwrap();

        assert_eq!(v2.breaking_change_from(&v1), BreakingChangeRisk::High);
        assert_eq!(v1.breaking_change_from(&v2), BreakingChangeRisk::Medium);
        assert_eq!(v3.breaking_change_from(&v1), BreakingChangeRisk::Low);
        assert_eq!(v4.breaking_change_from(&v1), BreakingChangeRisk::None);
    }
}
