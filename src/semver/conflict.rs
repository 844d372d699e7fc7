//! Dependency conflict detection (spec §4.B), grounded on
//! `semver_resolver.py::Dependency`/`VersionConflict`.

use super::constraint::{Constraint, ConstraintType};
use super::version::Version;

/// A package dependency with a source package that requires it.
#[derive(Debug, Clone)]
pub struct Dependency {
    pub name: String,
    pub constraint: Constraint,
    pub source: String,
}

/// Multiple, possibly conflicting, constraints on a single package.
#[derive(Debug, Clone)]
pub struct VersionConflict {
    pub package: String,
    pub dependencies: Vec<Dependency>,
    pub resolved_version: Option<Version>,
}

impl VersionConflict {
    pub fn new(package: impl Into<String>, dependencies: Vec<Dependency>) -> Self {
        Self {
            package: package.into(),
            dependencies,
            resolved_version: None,
        }
    }

    /// True if no single version can satisfy every constraint, per the
    /// pairwise compatibility table below. This is a conservative heuristic,
    /// not full version-set enumeration.
    pub fn is_conflicting(&self) -> bool {
        if self.dependencies.len() < 2 {
            return false;
        }

        let constraints: Vec<&Constraint> =
            self.dependencies.iter().map(|d| &d.constraint).collect();

        for i in 0..constraints.len() {
            for j in (i + 1)..constraints.len() {
                if !constraints_compatible(constraints[i], constraints[j]) {
                    return true;
                }
            }
        }
        false
    }
}

fn constraints_compatible(c1: &Constraint, c2: &Constraint) -> bool {
    if c1.constraint_type == ConstraintType::Any || c2.constraint_type == ConstraintType::Any {
        return true;
    }

    let (Some(v1), Some(v2)) = (&c1.version, &c2.version) else {
        return true;
    };

    if c1.constraint_type == ConstraintType::Caret && c2.constraint_type == ConstraintType::Tilde {
        if v1.major != v2.major {
            return false;
        }
        if v2.minor < v1.minor {
            return false;
        }
    }

    if c1.constraint_type == ConstraintType::Caret && c2.constraint_type == ConstraintType::Caret {
        if v1.major != v2.major && v1.major > 0 && v2.major > 0 {
            return false;
        }
    }

    true
}

#[cfg(test)]
mod tests {
    use super::*;

    fn dep(name: &str, constraint: &str, source: &str) -> Dependency {
        Dependency {
            name: name.to_string(),
            constraint: constraint.parse().unwrap(),
            source: source.to_string(),
        }
    }

    #[test]
    fn single_dependency_never_conflicts() {
        let conflict = VersionConflict::new("lib-x", vec![dep("lib-x", "^1.0.0", "pkg-a")]);
        assert!(!conflict.is_conflicting());
    }

    #[test]
    fn caret_constraints_on_different_majors_conflict() {
        let conflict = VersionConflict::new(
            "lib-x",
            vec![dep("lib-x", "^1.0.0", "pkg-a"), dep("lib-x", "^2.0.0", "pkg-b")],
        );
        assert!(conflict.is_conflicting());
    }

    #[test]
    fn caret_and_tilde_same_major_compatible_minor_do_not_conflict() {
        let conflict = VersionConflict::new(
            "lib-x",
            vec![dep("lib-x", "^1.2.0", "pkg-a"), dep("lib-x", "~1.5.0", "pkg-b")],
        );
        assert!(!conflict.is_conflicting());
    }

    #[test]
    fn caret_constraints_compatible_when_only_one_major_is_nonzero() {
        let forward = VersionConflict::new(
            "lib-x",
            vec![dep("lib-x", "^3.0.0", "pkg-a"), dep("lib-x", "^0.5.0", "pkg-b")],
        );
        assert!(!forward.is_conflicting());

        let reversed = VersionConflict::new(
            "lib-x",
            vec![dep("lib-x", "^0.5.0", "pkg-b"), dep("lib-x", "^3.0.0", "pkg-a")],
        );
        assert!(!reversed.is_conflicting());
    }

    #[test]
    fn caret_and_tilde_with_tilde_minor_below_caret_conflict() {
        let conflict = VersionConflict::new(
            "lib-x",
            vec![dep("lib-x", "^1.5.0", "pkg-a"), dep("lib-x", "~1.2.0", "pkg-b")],
        );
        assert!(conflict.is_conflicting());
    }
}
