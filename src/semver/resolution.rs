//! Resolution strategy synthesis (spec §4.B), grounded on
//! `semver_resolver.py::suggest_resolutions`.

use super::conflict::VersionConflict;
use super::constraint::ConstraintType;
use super::version::BreakingChangeRisk;
use std::collections::HashSet;

/// One candidate way of resolving a [`VersionConflict`].
#[derive(Debug, Clone)]
pub struct ResolutionStrategy {
    pub name: String,
    pub description: String,
    pub risk: BreakingChangeRisk,
    pub changes: Vec<String>,
    pub recommended: bool,
}

/// Produces, in order: a common-version strategy (if one exists), one
/// update-dependency strategy per caret/tilde-constrained dependency, a
/// pin-versions strategy, and a version-override strategy. The first
/// strategy produced is marked recommended.
pub fn suggest_resolutions(conflict: &VersionConflict) -> Vec<ResolutionStrategy> {
    let mut strategies = Vec::new();

    if conflict.dependencies.len() < 2 {
        return strategies;
    }

    if let Some(common) = find_common_version_strategy(conflict) {
        strategies.push(common);
    }

    for dep in &conflict.dependencies {
        if matches!(
            dep.constraint.constraint_type,
            ConstraintType::Caret | ConstraintType::Tilde
        ) {
            strategies.push(ResolutionStrategy {
                name: format!("Update {}", dep.source),
                description: format!(
                    "Update {} to a version compatible with other constraints",
                    dep.source
                ),
                risk: BreakingChangeRisk::Low,
                changes: vec![format!("Update {} to latest compatible version", dep.source)],
                recommended: false,
            });
        }
    }

    strategies.push(ResolutionStrategy {
        name: "Pin versions".to_string(),
        description: "Pin all packages to specific compatible versions".to_string(),
        risk: BreakingChangeRisk::Medium,
        changes: vec![
            format!("Pin {} to a specific version", conflict.package),
            "May require manual testing for compatibility".to_string(),
        ],
        recommended: false,
    });

    strategies.push(ResolutionStrategy {
        name: "Use version override".to_string(),
        description: "Force a specific version using package manager overrides".to_string(),
        risk: BreakingChangeRisk::High,
        changes: vec![
            format!("Add resolution override for {}", conflict.package),
            "May cause runtime issues if incompatible".to_string(),
        ],
        recommended: false,
    });

    if let Some(first) = strategies.first_mut() {
        first.recommended = true;
    }

    strategies
}

fn find_common_version_strategy(conflict: &VersionConflict) -> Option<ResolutionStrategy> {
    let mut all_compatible = true;
    let mut majors = HashSet::new();

    for dep in &conflict.dependencies {
        if let Some(ref version) = dep.constraint.version {
            majors.insert(version.major);
        }
        if !matches!(
            dep.constraint.constraint_type,
            ConstraintType::Caret | ConstraintType::Tilde | ConstraintType::GreaterEq
        ) {
            all_compatible = false;
        }
    }

    if all_compatible && majors.len() == 1 {
        let major = *majors.iter().next().unwrap();
        return Some(ResolutionStrategy {
            name: "Use latest compatible".to_string(),
            description: format!("Use the latest {major}.x.x version"),
            risk: BreakingChangeRisk::None,
            changes: vec![
                format!("All constraints are compatible within {major}.x range"),
                "Install the latest version that satisfies all constraints".to_string(),
            ],
            recommended: true,
        });
    }

    None
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::semver::conflict::Dependency;

    fn dep(name: &str, constraint: &str, source: &str) -> Dependency {
        Dependency {
            name: name.to_string(),
            constraint: constraint.parse().unwrap(),
            source: source.to_string(),
        }
    }

    #[test]
    fn common_version_strategy_when_all_caret_same_major() {
        let conflict = VersionConflict::new(
            "lib-x",
            vec![dep("lib-x", "^1.2.0", "pkg-a"), dep("lib-x", "^1.5.0", "pkg-b")],
        );
        let strategies = suggest_resolutions(&conflict);
        assert_eq!(strategies[0].name, "Use latest compatible");
        assert!(strategies[0].recommended);
    }

    #[test]
    fn always_offers_pin_and_override_as_fallback() {
        let conflict = VersionConflict::new(
            "lib-x",
            vec![dep("lib-x", "^1.0.0", "pkg-a"), dep("lib-x", "^2.0.0", "pkg-b")],
        );
        let strategies = suggest_resolutions(&conflict);
        let names: Vec<&str> = strategies.iter().map(|s| s.name.as_str()).collect();
        assert!(names.contains(&"Pin versions"));
        assert!(names.contains(&"Use version override"));
    }

    #[test]
    fn exactly_one_strategy_is_recommended() {
        let conflict = VersionConflict::new(
            "lib-x",
            vec![dep("lib-x", "^1.0.0", "pkg-a"), dep("lib-x", "~1.1.0", "pkg-b")],
        );
        let strategies = suggest_resolutions(&conflict);
        assert_eq!(strategies.iter().filter(|s| s.recommended).count(), 1);
    }
}
