//! Version constraint parsing and satisfaction (spec §4.B), grounded on
//! `semver_resolver.py::VersionConstraint`/`parse_constraint`.

use super::version::Version;
use crate::error::{Error, Result};
use std::str::FromStr;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConstraintType {
    Exact,
    Caret,
    Tilde,
    Greater,
    GreaterEq,
    Less,
    LessEq,
    Range,
    Any,
}

impl ConstraintType {
    pub fn as_str(&self) -> &'static str {
        match self {
            ConstraintType::Exact => "exact",
            ConstraintType::Caret => "caret",
            ConstraintType::Tilde => "tilde",
            ConstraintType::Greater => "greater",
            ConstraintType::GreaterEq => "greater_eq",
            ConstraintType::Less => "less",
            ConstraintType::LessEq => "less_eq",
            ConstraintType::Range => "range",
            ConstraintType::Any => "any",
        }
    }
}

/// A version constraint, e.g. `^1.2.3`, `~1.0.0`, or `>=1.0.0 <2.0.0`.
#[derive(Debug, Clone)]
pub struct Constraint {
    pub raw: String,
    pub constraint_type: ConstraintType,
    pub version: Option<Version>,
    pub max_version: Option<Version>,
}

impl Constraint {
    pub fn any() -> Self {
        Constraint {
            raw: "*".to_string(),
            constraint_type: ConstraintType::Any,
            version: None,
            max_version: None,
        }
    }

    /// Whether `version` satisfies this constraint.
    pub fn satisfies(&self, version: &Version) -> bool {
        let Some(ref bound) = self.version else {
            return matches!(self.constraint_type, ConstraintType::Any);
        };

        match self.constraint_type {
            ConstraintType::Any => true,
            ConstraintType::Exact => version == bound,
            ConstraintType::Caret => {
                if version < bound {
                    return false;
                }
                if bound.major == 0 {
                    version.major == 0 && version.minor == bound.minor
                } else {
                    version.major == bound.major
                }
            }
            ConstraintType::Tilde => {
                if version < bound {
                    return false;
                }
                version.major == bound.major && version.minor == bound.minor
            }
            ConstraintType::Greater => version > bound,
            ConstraintType::GreaterEq => version >= bound,
            ConstraintType::Less => version < bound,
            ConstraintType::LessEq => version <= bound,
            ConstraintType::Range => match &self.max_version {
                Some(max) => version >= bound && version < max,
                None => version >= bound,
            },
        }
    }
}

impl FromStr for Constraint {
    type Err = Error;

    fn from_str(raw: &str) -> Result<Self> {
        let trimmed = raw.trim();

        if trimmed.is_empty() || trimmed == "*" {
            return Ok(Constraint {
                raw: trimmed.to_string(),
                constraint_type: ConstraintType::Any,
                version: None,
                max_version: None,
            });
        }

        if let Some((min_part, max_part)) = trimmed.split_once(' ') {
            if !max_part.contains(' ') {
                let min_version = if let Some(rest) = min_part.strip_prefix(">=") {
                    rest.parse::<Version>().ok()
                } else {
                    min_part.strip_prefix('>').and_then(|rest| rest.parse::<Version>().ok())
                };
                let max_version = max_part.strip_prefix('<').and_then(|rest| rest.parse::<Version>().ok());

                if let Some(min_version) = min_version {
                    return Ok(Constraint {
                        raw: trimmed.to_string(),
                        constraint_type: ConstraintType::Range,
                        version: Some(min_version),
                        max_version,
                    });
                }
            }
        }

        if let Some(rest) = trimmed.strip_prefix('^') {
            return Ok(Constraint {
                raw: trimmed.to_string(),
                constraint_type: ConstraintType::Caret,
                version: Some(rest.parse()?),
                max_version: None,
            });
        }

        if let Some(rest) = trimmed.strip_prefix('~') {
            return Ok(Constraint {
                raw: trimmed.to_string(),
                constraint_type: ConstraintType::Tilde,
                version: Some(rest.parse()?),
                max_version: None,
            });
        }

        if let Some(rest) = trimmed.strip_prefix(">=") {
            return Ok(Constraint {
                raw: trimmed.to_string(),
                constraint_type: ConstraintType::GreaterEq,
                version: Some(rest.parse()?),
                max_version: None,
            });
        }

        if let Some(rest) = trimmed.strip_prefix('>') {
            return Ok(Constraint {
                raw: trimmed.to_string(),
                constraint_type: ConstraintType::Greater,
                version: Some(rest.parse()?),
                max_version: None,
            });
        }

        if let Some(rest) = trimmed.strip_prefix("<=") {
            return Ok(Constraint {
                raw: trimmed.to_string(),
                constraint_type: ConstraintType::LessEq,
                version: Some(rest.parse()?),
                max_version: None,
            });
        }

        if let Some(rest) = trimmed.strip_prefix('<') {
            return Ok(Constraint {
                raw: trimmed.to_string(),
                constraint_type: ConstraintType::Less,
                version: Some(rest.parse()?),
                max_version: None,
            });
        }

        if let Some(rest) = trimmed.strip_prefix('=') {
            return Ok(Constraint {
                raw: trimmed.to_string(),
                constraint_type: ConstraintType::Exact,
                version: Some(rest.parse()?),
                max_version: None,
            });
        }

        // Bare version string means exact match.
        Ok(Constraint {
            raw: trimmed.to_string(),
            constraint_type: ConstraintType::Exact,
            version: Some(trimmed.parse()?),
            max_version: None,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn any_matches_everything() {
        let c: Constraint = "*".parse().unwrap();
        assert!(c.satisfies(&"0.0.1".parse().unwrap()));
        assert!(c.satisfies(&"99.0.0".parse().unwrap()));
    }

    #[test]
    fn caret_allows_minor_patch_bumps_but_not_major() {
        let c: Constraint = "^1.2.3".parse().unwrap();
        assert!(c.satisfies(&"1.2.3".parse().unwrap()));
        assert!(c.satisfies(&"1.9.0".parse().unwrap()));
        assert!(!c.satisfies(&"2.0.0".parse().unwrap()));
        assert!(!c.satisfies(&"1.2.2".parse().unwrap()));
    }

    #[test]
    fn caret_zero_major_is_minor_locked() {
        let c: Constraint = "^0.2.3".parse().unwrap();
        assert!(c.satisfies(&"0.2.9".parse().unwrap()));
        assert!(!c.satisfies(&"0.3.0".parse().unwrap()));
    }

    #[test]
    fn tilde_locks_minor() {
        let c: Constraint = "~1.2.3".parse().unwrap();
        assert!(c.satisfies(&"1.2.9".parse().unwrap()));
        assert!(!c.satisfies(&"1.3.0".parse().unwrap()));
    }

    #[test]
    fn range_constraint_is_half_open() {
        let c: Constraint = ">=1.0.0 <2.0.0".parse().unwrap();
        assert!(c.satisfies(&"1.9.9".parse().unwrap()));
        assert!(!c.satisfies(&"2.0.0".parse().unwrap()));
    }

    #[test]
    fn bare_version_is_exact() {
        let c: Constraint = "1.2.3".parse().unwrap();
        assert_eq!(c.constraint_type, ConstraintType::Exact);
        assert!(c.satisfies(&"1.2.3".parse().unwrap()));
        assert!(!c.satisfies(&"1.2.4".parse().unwrap()));
    }
}
