//! API health probe, fallback-mode state machine, and tiered fallback query
//! processing (spec §4.E), grounded on
//! `original_source/cortex/graceful_degradation.py::GracefulDegradation`.

mod pattern_matcher;
mod response_cache;
mod state_machine;

pub use pattern_matcher::{match_query, PatternKind, PatternMatch};
pub use response_cache::{CachedResponse, ResponseCache, ResponseCacheStats};
pub use state_machine::{ApiStatus, DegradationState, FallbackMode, HealthCheckResult};

use crate::error::Result;
use std::path::Path;

const SIMILAR_LOOKUP_LIMIT: usize = 1;

/// Outcome of [`GracefulDegradation::process_query`].
#[derive(Debug, Clone)]
pub struct ProcessResult {
    pub response: Option<String>,
    pub command: Option<String>,
    pub source: &'static str,
    pub confidence: f64,
    pub mode: FallbackMode,
    pub cached: bool,
    pub similar_query: Option<String>,
}

/// Ties the response cache, pattern matcher, and mode state machine into the
/// five-tier fallback ladder described in spec §4.E.
pub struct GracefulDegradation {
    cache: ResponseCache,
    state: DegradationState,
}

impl GracefulDegradation {
    pub fn open(db_path: &Path) -> Result<Self> {
        Ok(Self {
            cache: ResponseCache::open(db_path)?,
            state: DegradationState::default(),
        })
    }

    pub fn mode(&self) -> FallbackMode {
        self.state.mode()
    }

    /// Runs `llm_fn` when the API health is `FullAi`, falling through the
    /// cache, similarity, and pattern-matching tiers on failure or absence.
    pub fn process_query(
        &mut self,
        query: &str,
        llm_fn: Option<impl FnOnce(&str) -> Result<String>>,
    ) -> ProcessResult {
        if self.state.mode() == FallbackMode::FullAi {
            if let Some(llm_fn) = llm_fn {
                match llm_fn(query) {
                    Ok(response) => {
                        self.state.record_success();
                        self.cache.put(query, &response);
                        return ProcessResult {
                            response: Some(response),
                            command: None,
                            source: "llm",
                            confidence: 1.0,
                            mode: self.state.mode(),
                            cached: false,
                            similar_query: None,
                        };
                    }
                    Err(err) => {
                        tracing::warn!(error = %err, "llm call failed, falling back");
                        let cache_non_empty = self.cache.get_stats().total_entries > 0;
                        self.state.record_failure(cache_non_empty);
                    }
                }
            }
        }

        if let Some(cached) = self.cache.get(query) {
            return ProcessResult {
                response: Some(cached.response),
                command: None,
                source: "cache",
                confidence: 0.9,
                mode: self.state.mode(),
                cached: true,
                similar_query: None,
            };
        }

        let similar = self.cache.get_similar(query, SIMILAR_LOOKUP_LIMIT);
        if let Some(best) = similar.into_iter().next() {
            return ProcessResult {
                response: Some(best.response),
                command: None,
                source: "cache_similar",
                confidence: 0.7,
                mode: self.state.mode(),
                cached: true,
                similar_query: Some(best.query),
            };
        }

        if let Some(matched) = match_query(query) {
            return ProcessResult {
                response: Some(format!("Suggested command: {}", matched.command)),
                command: Some(matched.command),
                source: "pattern_matching",
                confidence: matched.confidence,
                mode: self.state.mode(),
                cached: false,
                similar_query: None,
            };
        }

        ProcessResult {
            response: Some(
                "I couldn't process this request automatically. \
                 Please use apt commands directly:\n\
                 \x20 - apt search <package>  - Search for packages\n\
                 \x20 - apt show <package>    - Show package details\n\
                 \x20 - sudo apt install <package> - Install a package"
                    .to_string(),
            ),
            command: None,
            source: "manual_mode",
            confidence: 0.0,
            mode: self.state.mode(),
            cached: false,
            similar_query: None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn successful_llm_call_returns_high_confidence_and_caches() {
        let dir = tempdir().unwrap();
        let mut degradation = GracefulDegradation::open(&dir.path().join("r.db")).unwrap();

        let result = degradation.process_query(
            "install nginx",
            Some(|_: &str| Ok("apt install -y nginx".to_string())),
        );

        assert_eq!(result.source, "llm");
        assert_eq!(result.confidence, 1.0);
        assert!(degradation.cache.get("install nginx").is_some());
    }

    #[test]
    fn failed_llm_call_falls_through_to_pattern_match() {
        let dir = tempdir().unwrap();
        let mut degradation = GracefulDegradation::open(&dir.path().join("r.db")).unwrap();

        let result: ProcessResult = degradation.process_query(
            "install docker",
            Some(|_: &str| Err(crate::error::Error::ProviderUnavailable)),
        );

        assert_eq!(result.source, "pattern_matching");
        assert!(result.command.unwrap().contains("docker"));
    }

    #[test]
    fn no_llm_fn_and_no_cache_falls_to_manual_mode_for_unmatched_query() {
        let dir = tempdir().unwrap();
        let mut degradation = GracefulDegradation::open(&dir.path().join("r.db")).unwrap();

        let result = degradation.process_query("what time is it", None::<fn(&str) -> Result<String>>);
        assert_eq!(result.source, "manual_mode");
        assert_eq!(result.confidence, 0.0);
    }

    #[test]
    fn cache_hit_takes_priority_over_pattern_matching() {
        let dir = tempdir().unwrap();
        let mut degradation = GracefulDegradation::open(&dir.path().join("r.db")).unwrap();
        degradation.cache.put("install docker", "custom cached answer");

        let result = degradation.process_query("install docker", None::<fn(&str) -> Result<String>>);
        assert_eq!(result.source, "cache");
        assert_eq!(result.response.unwrap(), "custom cached answer");
    }
}
