//! Health/mode state machine (spec §4.E, §3), grounded on
//! `graceful_degradation.py::GracefulDegradation`'s mode tracking.

const MAX_FAILURES_BEFORE_FALLBACK: u32 = 3;

/// Current reachability of the live LLM provider.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ApiStatus {
    Available,
    Degraded,
    Unavailable,
    Unknown,
}

/// Result of one health probe.
#[derive(Debug, Clone)]
pub struct HealthCheckResult {
    pub status: ApiStatus,
    pub latency_ms: Option<f64>,
    pub error: Option<String>,
}

impl HealthCheckResult {
    pub fn is_healthy(&self) -> bool {
        self.status == ApiStatus::Available
    }
}

/// Which tier of the fallback ladder is currently active.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FallbackMode {
    FullAi,
    CachedOnly,
    PatternMatching,
    ManualMode,
}

impl FallbackMode {
    pub fn as_str(&self) -> &'static str {
        match self {
            FallbackMode::FullAi => "full_ai",
            FallbackMode::CachedOnly => "cached_only",
            FallbackMode::PatternMatching => "pattern_matching",
            FallbackMode::ManualMode => "manual_mode",
        }
    }
}

/// Tracks consecutive API failures and derives the current [`FallbackMode`].
///
/// `FullAi → {CachedOnly, PatternMatching}` on repeated failure;
/// `{CachedOnly, PatternMatching} → FullAi` on the next success.
#[derive(Debug)]
pub struct DegradationState {
    mode: FallbackMode,
    failures: u32,
}

impl Default for DegradationState {
    fn default() -> Self {
        Self {
            mode: FallbackMode::FullAi,
            failures: 0,
        }
    }
}

impl DegradationState {
    pub fn mode(&self) -> FallbackMode {
        self.mode
    }

    pub fn failures(&self) -> u32 {
        self.failures
    }

    /// A successful API call always returns the state to `FullAi`.
    pub fn record_success(&mut self) {
        self.failures = 0;
        self.mode = FallbackMode::FullAi;
    }

    /// A failed API call increments the counter and, once the mode isn't
    /// already `FullAi`-healthy, degrades further: `cache_non_empty`
    /// decides between `CachedOnly` and `PatternMatching` once the
    /// threshold is crossed.
    pub fn record_failure(&mut self, cache_non_empty: bool) {
        self.failures += 1;
        if self.failures >= MAX_FAILURES_BEFORE_FALLBACK {
            self.mode = if cache_non_empty {
                FallbackMode::CachedOnly
            } else {
                FallbackMode::PatternMatching
            };
        } else {
            self.mode = FallbackMode::CachedOnly;
        }
    }

    #[cfg(test)]
    pub fn force_mode(&mut self, mode: FallbackMode) {
        self.mode = mode;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn starts_in_full_ai() {
        let state = DegradationState::default();
        assert_eq!(state.mode(), FallbackMode::FullAi);
    }

    #[test]
    fn single_failure_drops_to_cached_only() {
        let mut state = DegradationState::default();
        state.record_failure(true);
        assert_eq!(state.mode(), FallbackMode::CachedOnly);
    }

    #[test]
    fn three_failures_with_empty_cache_reach_pattern_matching() {
        let mut state = DegradationState::default();
        state.record_failure(false);
        state.record_failure(false);
        state.record_failure(false);
        assert_eq!(state.mode(), FallbackMode::PatternMatching);
    }

    #[test]
    fn three_failures_with_nonempty_cache_reach_cached_only() {
        let mut state = DegradationState::default();
        state.record_failure(true);
        state.record_failure(true);
        state.record_failure(true);
        assert_eq!(state.mode(), FallbackMode::CachedOnly);
    }

    #[test]
    fn success_from_either_fallback_mode_returns_to_full_ai() {
        let mut state = DegradationState::default();
        state.record_failure(false);
        state.record_failure(false);
        state.record_failure(false);
        assert_eq!(state.mode(), FallbackMode::PatternMatching);

        state.record_success();
        assert_eq!(state.mode(), FallbackMode::FullAi);
        assert_eq!(state.failures(), 0);
    }
}
