//! Shared types for the LLM router (spec §4.D), grounded on
//! `llm_router.py`'s `TaskType`/`LLMProvider`/`LLMResponse`.

use serde::{Deserialize, Serialize};

/// Determines which provider a request is routed to by default.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TaskType {
    UserChat,
    RequirementParsing,
    SystemOperation,
    ErrorDebugging,
    CodeGeneration,
    DependencyResolution,
    Configuration,
    ToolExecution,
}

/// Every routing rule in spec §4.D currently points at `Ollama`; kept as a
/// lookup rather than a constant so a future rule change is one line.
pub fn default_provider_for(_task: TaskType) -> Provider {
    Provider::Ollama
}

/// A supported LLM backend. The source occasionally spells Claude as
/// `"anthropic"`; this crate uses `Claude` as the one canonical name and
/// maps provider strings at the edges (spec §9).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Provider {
    Ollama,
    Claude,
    Kimi,
}

impl Provider {
    pub fn as_str(&self) -> &'static str {
        match self {
            Provider::Ollama => "ollama",
            Provider::Claude => "claude",
            Provider::Kimi => "kimi_k2",
        }
    }

    /// USD per 1e6 tokens, `(input, output)` (spec glossary).
    pub fn cost_rates(&self) -> (f64, f64) {
        match self {
            Provider::Ollama => (0.0, 0.0),
            Provider::Claude => (3.0, 15.0),
            Provider::Kimi => (1.0, 5.0),
        }
    }

    /// The order a fallback search proceeds in, starting after the failed
    /// provider (spec §4.D).
    pub fn fallback_order() -> [Provider; 3] {
        [Provider::Ollama, Provider::Claude, Provider::Kimi]
    }
}

/// One chat turn in provider-agnostic form.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Message {
    pub role: String,
    pub content: String,
}

impl Message {
    pub fn system(content: impl Into<String>) -> Self {
        Self { role: "system".to_string(), content: content.into() }
    }

    pub fn user(content: impl Into<String>) -> Self {
        Self { role: "user".to_string(), content: content.into() }
    }
}

/// Standardized response from any provider.
#[derive(Debug, Clone)]
pub struct CompletionResponse {
    pub content: String,
    pub provider: Provider,
    pub model: String,
    pub input_tokens: u64,
    pub output_tokens: u64,
    pub cost_usd: f64,
}

impl CompletionResponse {
    pub fn tokens_used(&self) -> u64 {
        self.input_tokens + self.output_tokens
    }
}

pub fn calculate_cost(provider: Provider, input_tokens: u64, output_tokens: u64) -> f64 {
    let (input_rate, output_rate) = provider.cost_rates();
    (input_tokens as f64 * input_rate + output_tokens as f64 * output_rate) / 1_000_000.0
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn ollama_is_always_free() {
        assert_eq!(calculate_cost(Provider::Ollama, 10_000, 5_000), 0.0);
    }

    #[test]
    fn claude_cost_matches_published_rates() {
        let cost = calculate_cost(Provider::Claude, 1_000_000, 1_000_000);
        assert!((cost - 18.0).abs() < 1e-9);
    }

    #[test]
    fn fallback_order_starts_with_ollama() {
        assert_eq!(Provider::fallback_order()[0], Provider::Ollama);
    }
}
