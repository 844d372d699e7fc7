//! Semantic version conflict resolution (spec §3/§4.B).
//!
//! Grounded on `original_source/cortex/semver_resolver.py`: parses version
//! strings and constraints, tracks per-package dependency lists, detects
//! conflicting constraints, and synthesizes resolution strategies.

mod conflict;
mod constraint;
mod resolution;
mod version;

pub use conflict::{Dependency, VersionConflict};
pub use constraint::{Constraint, ConstraintType};
pub use resolution::{suggest_resolutions, ResolutionStrategy};
pub use version::{BreakingChangeRisk, Version};

use crate::error::Result;
use std::collections::HashMap;

/// Accumulates dependency constraints across packages and reports conflicts.
#[derive(Debug, Default)]
pub struct SemverResolver {
    dependencies: HashMap<String, Vec<Dependency>>,
}

impl SemverResolver {
    pub fn new() -> Self {
        Self::default()
    }

    /// Parses `constraint_str` and records it against `package`.
    pub fn add_dependency(&mut self, package: &str, constraint_str: &str, source: &str) -> Result<()> {
        let constraint: Constraint = constraint_str.parse()?;
        self.dependencies
            .entry(package.to_string())
            .or_default()
            .push(Dependency {
                name: package.to_string(),
                constraint,
                source: source.to_string(),
            });
        Ok(())
    }

    /// Every package with two or more constraints that cannot all be
    /// satisfied by a single version.
    pub fn detect_conflicts(&self) -> Vec<VersionConflict> {
        self.dependencies
            .iter()
            .filter(|(_, deps)| deps.len() >= 2)
            .filter_map(|(package, deps)| {
                let conflict = VersionConflict::new(package.clone(), deps.clone());
                conflict.is_conflicting().then_some(conflict)
            })
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn resolver_reports_no_conflicts_for_compatible_constraints() {
        let mut resolver = SemverResolver::new();
        resolver.add_dependency("lib-x", "^1.2.0", "pkg-a").unwrap();
        resolver.add_dependency("lib-x", "^1.5.0", "pkg-b").unwrap();
        assert!(resolver.detect_conflicts().is_empty());
    }

    #[test]
    fn resolver_reports_conflict_for_incompatible_majors() {
        let mut resolver = SemverResolver::new();
        resolver.add_dependency("lib-x", "^1.0.0", "pkg-a").unwrap();
        resolver.add_dependency("lib-x", "^2.0.0", "pkg-b").unwrap();
        let conflicts = resolver.detect_conflicts();
        assert_eq!(conflicts.len(), 1);
        assert_eq!(conflicts[0].package, "lib-x");
    }

    #[test]
    fn rejects_malformed_constraint() {
        let mut resolver = SemverResolver::new();
        assert!(resolver.add_dependency("lib-x", "not-a-version", "pkg-a").is_err());
    }
}
