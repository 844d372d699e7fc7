//! Merges compiled-in defaults, `~/.cortex/config.toml`, and environment
//! variables, in that priority order (spec §6), grounded on
//! `aetherlight-core::config::loader::ConfigLoader::load`.

use crate::config::validator;
use crate::error::{Error, Result};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

const DEFAULT_CACHE_MAX_ENTRIES: u64 = 500;
const DEFAULT_CACHE_SIMILARITY_THRESHOLD: f64 = 0.86;

/// Merged configuration for the engine (spec §6's environment variable
/// list, plus the on-disk TOML equivalents of each).
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct CortexConfig {
    pub provider: String,
    pub anthropic_api_key: Option<String>,
    pub openai_api_key: Option<String>,
    pub moonshot_api_key: Option<String>,
    pub ollama_host: String,
    pub ollama_model: String,
    pub cache_max_entries: u64,
    pub cache_similarity_threshold: f64,
    pub sense_history: bool,
    pub fake_response: Option<String>,
    pub fake_commands: Option<String>,
    pub skip_ollama_setup: bool,
}

impl Default for CortexConfig {
    fn default() -> Self {
        Self {
            provider: "ollama".to_string(),
            anthropic_api_key: None,
            openai_api_key: None,
            moonshot_api_key: None,
            ollama_host: "http://localhost:11434".to_string(),
            ollama_model: "llama3.1".to_string(),
            cache_max_entries: DEFAULT_CACHE_MAX_ENTRIES,
            cache_similarity_threshold: DEFAULT_CACHE_SIMILARITY_THRESHOLD,
            sense_history: true,
            fake_response: None,
            fake_commands: None,
            skip_ollama_setup: false,
        }
    }
}

impl CortexConfig {
    /// Field-by-field override: `other`'s `Some`/non-default values win.
    /// Mirrors `AetherlightConfig::merge`, minus the level bookkeeping this
    /// engine has no use for.
    fn merge_from_file(&mut self, other: FileConfig) {
        if let Some(v) = other.provider {
            self.provider = v;
        }
        if other.anthropic_api_key.is_some() {
            self.anthropic_api_key = other.anthropic_api_key;
        }
        if other.openai_api_key.is_some() {
            self.openai_api_key = other.openai_api_key;
        }
        if other.moonshot_api_key.is_some() {
            self.moonshot_api_key = other.moonshot_api_key;
        }
        if let Some(v) = other.ollama_host {
            self.ollama_host = v;
        }
        if let Some(v) = other.ollama_model {
            self.ollama_model = v;
        }
        if let Some(v) = other.cache_max_entries {
            self.cache_max_entries = v;
        }
        if let Some(v) = other.cache_similarity_threshold {
            self.cache_similarity_threshold = v;
        }
        if let Some(v) = other.sense_history {
            self.sense_history = v;
        }
        if let Some(v) = other.skip_ollama_setup {
            self.skip_ollama_setup = v;
        }
    }

    fn merge_from_env(&mut self) {
        if let Ok(v) = std::env::var("CORTEX_PROVIDER") {
            self.provider = v;
        }
        if let Ok(v) = std::env::var("ANTHROPIC_API_KEY") {
            self.anthropic_api_key = Some(v);
        }
        if let Ok(v) = std::env::var("OPENAI_API_KEY") {
            self.openai_api_key = Some(v);
        }
        if let Ok(v) = std::env::var("MOONSHOT_API_KEY") {
            self.moonshot_api_key = Some(v);
        }
        if let Ok(v) = std::env::var("OLLAMA_HOST") {
            self.ollama_host = v;
        }
        if let Ok(v) = std::env::var("OLLAMA_MODEL") {
            self.ollama_model = v;
        }
        if let Some(v) = std::env::var("CORTEX_CACHE_MAX_ENTRIES").ok().and_then(|v| v.parse().ok()) {
            self.cache_max_entries = v;
        }
        if let Some(v) = std::env::var("CORTEX_CACHE_SIMILARITY_THRESHOLD").ok().and_then(|v| v.parse().ok()) {
            self.cache_similarity_threshold = v;
        }
        if let Ok(v) = std::env::var("CORTEX_SENSE_HISTORY") {
            self.sense_history = parse_bool(&v, self.sense_history);
        }
        if let Ok(v) = std::env::var("CORTEX_FAKE_RESPONSE") {
            self.fake_response = Some(v);
        }
        if let Ok(v) = std::env::var("CORTEX_FAKE_COMMANDS") {
            self.fake_commands = Some(v);
        }
        if let Ok(v) = std::env::var("CORTEX_SKIP_OLLAMA_SETUP") {
            self.skip_ollama_setup = parse_bool(&v, self.skip_ollama_setup);
        }
    }
}

fn parse_bool(raw: &str, default: bool) -> bool {
    match raw.trim().to_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => true,
        "0" | "false" | "no" | "off" => false,
        _ => default,
    }
}

/// On-disk shape of `~/.cortex/config.toml`: every field optional so an
/// absent key falls through to whatever the lower tier already set.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
struct FileConfig {
    provider: Option<String>,
    anthropic_api_key: Option<String>,
    openai_api_key: Option<String>,
    moonshot_api_key: Option<String>,
    ollama_host: Option<String>,
    ollama_model: Option<String>,
    cache_max_entries: Option<u64>,
    cache_similarity_threshold: Option<f64>,
    sense_history: Option<bool>,
    skip_ollama_setup: Option<bool>,
}

pub struct ConfigLoader {
    config_path: PathBuf,
}

impl ConfigLoader {
    pub fn new() -> Result<Self> {
        let home = dirs::home_dir().ok_or_else(|| Error::Configuration("no home directory".to_string()))?;
        Ok(Self { config_path: home.join(".cortex").join("config.toml") })
    }

    pub fn with_config_path(config_path: PathBuf) -> Self {
        Self { config_path }
    }

    /// Defaults, then the TOML file if present, then environment
    /// variables; validates the merged result before returning it.
    pub fn load(&self) -> Result<CortexConfig> {
        let mut config = CortexConfig::default();

        if let Some(file_config) = self.load_file(&self.config_path)? {
            config.merge_from_file(file_config);
        }
        config.merge_from_env();

        validator::validate(&config)?;
        Ok(config)
    }

    fn load_file(&self, path: &Path) -> Result<Option<FileConfig>> {
        if !path.exists() {
            return Ok(None);
        }
        let content = std::fs::read_to_string(path)?;
        let parsed: FileConfig = toml::from_str(&content)?;
        Ok(Some(parsed))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn defaults_when_no_file_and_no_env() {
        let dir = tempdir().unwrap();
        std::env::remove_var("CORTEX_PROVIDER");
        let loader = ConfigLoader::with_config_path(dir.path().join("missing.toml"));
        let config = loader.load().unwrap();
        assert_eq!(config.provider, "ollama");
        assert_eq!(config.cache_max_entries, DEFAULT_CACHE_MAX_ENTRIES);
    }

    #[test]
    fn file_values_override_defaults() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("config.toml");
        std::fs::write(&path, "ollama_model = \"mixtral\"\ncache_max_entries = 1000\n").unwrap();

        let loader = ConfigLoader::with_config_path(path);
        let config = loader.load().unwrap();
        assert_eq!(config.ollama_model, "mixtral");
        assert_eq!(config.cache_max_entries, 1000);
    }

    #[test]
    fn env_vars_override_file() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("config.toml");
        std::fs::write(&path, "ollama_model = \"mixtral\"\n").unwrap();
        std::env::set_var("OLLAMA_MODEL", "llama3.1");

        let loader = ConfigLoader::with_config_path(path);
        let config = loader.load().unwrap();
        assert_eq!(config.ollama_model, "llama3.1");

        std::env::remove_var("OLLAMA_MODEL");
    }

    #[test]
    fn cache_similarity_threshold_out_of_range_is_rejected() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("config.toml");
        std::fs::write(&path, "cache_similarity_threshold = 1.5\n").unwrap();

        let loader = ConfigLoader::with_config_path(path);
        assert!(loader.load().is_err());
    }
}
