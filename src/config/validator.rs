//! Rejects out-of-range configuration values (spec §4.N), grounded on
//! the per-section `validate()` methods chained in
//! `aetherlight-core::config::loader::AetherlightConfig::validate`.

use crate::config::loader::CortexConfig;
use crate::error::{Error, Result};

const KNOWN_PROVIDERS: [&str; 4] = ["ollama", "claude", "kimi_k2", "openai"];

pub fn validate(config: &CortexConfig) -> Result<()> {
    if !KNOWN_PROVIDERS.contains(&config.provider.as_str()) {
        return Err(Error::Configuration(format!(
            "unknown provider '{}', expected one of {:?}",
            config.provider, KNOWN_PROVIDERS
        )));
    }

    if config.cache_max_entries == 0 {
        return Err(Error::Configuration("cache_max_entries must be positive".to_string()));
    }

    if !(0.0..=1.0).contains(&config.cache_similarity_threshold) {
        return Err(Error::Configuration(format!(
            "cache_similarity_threshold must be within [0.0, 1.0], got {}",
            config.cache_similarity_threshold
        )));
    }

    if config.ollama_host.is_empty() {
        return Err(Error::Configuration("ollama_host must not be empty".to_string()));
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_config_is_valid() {
        assert!(validate(&CortexConfig::default()).is_ok());
    }

    #[test]
    fn rejects_unknown_provider() {
        let mut config = CortexConfig::default();
        config.provider = "not-a-provider".to_string();
        assert!(validate(&config).is_err());
    }

    #[test]
    fn rejects_zero_cache_capacity() {
        let mut config = CortexConfig::default();
        config.cache_max_entries = 0;
        assert!(validate(&config).is_err());
    }

    #[test]
    fn rejects_similarity_threshold_above_one() {
        let mut config = CortexConfig::default();
        config.cache_similarity_threshold = 1.2;
        assert!(validate(&config).is_err());
    }
}
