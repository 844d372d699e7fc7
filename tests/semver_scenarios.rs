//! End-to-end semver conflict & resolution scenario (spec §8.1).

use cortex_core::semver::{suggest_resolutions, SemverResolver};

#[test]
fn conflicting_caret_and_tilde_constraints_produce_a_recommended_non_latest_strategy() {
    let mut resolver = SemverResolver::new();
    resolver.add_dependency("lib-x", "^2.0.0", "pkg-a").unwrap();
    resolver.add_dependency("lib-x", "~1.9.0", "pkg-b").unwrap();

    let conflicts = resolver.detect_conflicts();
    assert_eq!(conflicts.len(), 1);
    assert_eq!(conflicts[0].package, "lib-x");

    let strategies = suggest_resolutions(&conflicts[0]);
    assert!(!strategies.is_empty());
    assert!(strategies.iter().all(|s| s.name != "Use latest compatible"));
    assert!(strategies
        .iter()
        .any(|s| matches!(s.risk, cortex_core::semver::BreakingChangeRisk::Low
            | cortex_core::semver::BreakingChangeRisk::Medium
            | cortex_core::semver::BreakingChangeRisk::High)));
    assert!(strategies[0].recommended);
}
