//! Cloud HTTP providers: Anthropic Claude and Moonshot Kimi K2 (spec §4.D).
//! Availability is simply "an API key is configured"; request shaping
//! differs per vendor (system prompt extracted for Claude; Kimi's
//! temperature is scaled down per the original router's calibration).

use crate::error::{Error, Result};
use crate::llm::provider::LlmProvider;
use crate::llm::types::{CompletionResponse, Message, Provider};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::time::Duration;

const REQUEST_TIMEOUT: Duration = Duration::from_secs(120);
const KIMI_TEMPERATURE_SCALE: f64 = 0.6;

const CLAUDE_API_URL: &str = "https://api.anthropic.com/v1/messages";
const CLAUDE_API_VERSION: &str = "2023-06-01";
const DEFAULT_CLAUDE_MODEL: &str = "claude-sonnet-4-5";

const KIMI_API_URL: &str = "https://api.moonshot.cn/v1/chat/completions";
const DEFAULT_KIMI_MODEL: &str = "kimi-k2-0711-preview";

pub struct ClaudeProvider {
    client: reqwest::Client,
    api_key: Option<String>,
    model: String,
}

impl ClaudeProvider {
    pub fn from_env() -> Self {
        Self {
            client: http_client(),
            api_key: std::env::var("ANTHROPIC_API_KEY").ok(),
            model: DEFAULT_CLAUDE_MODEL.to_string(),
        }
    }
}

#[derive(Serialize)]
struct ClaudeRequest<'a> {
    model: &'a str,
    system: &'a str,
    messages: Vec<&'a Message>,
    temperature: f64,
    max_tokens: u32,
}

#[derive(Deserialize)]
struct ClaudeResponse {
    content: Vec<ClaudeContentBlock>,
    usage: ClaudeUsage,
}

#[derive(Deserialize)]
struct ClaudeContentBlock {
    #[serde(default)]
    text: String,
}

#[derive(Deserialize)]
struct ClaudeUsage {
    input_tokens: u64,
    output_tokens: u64,
}

#[async_trait]
impl LlmProvider for ClaudeProvider {
    async fn complete(
        &self,
        messages: &[Message],
        temperature: f64,
        max_tokens: u32,
    ) -> Result<CompletionResponse> {
        let api_key = self.api_key.as_deref().ok_or(Error::ProviderUnavailable)?;

        let system = messages
            .iter()
            .find(|m| m.role == "system")
            .map(|m| m.content.as_str())
            .unwrap_or("");
        let conversation: Vec<&Message> = messages.iter().filter(|m| m.role != "system").collect();

        let request = ClaudeRequest { model: &self.model, system, messages: conversation, temperature, max_tokens };

        let response = self
            .client
            .post(CLAUDE_API_URL)
            .header("x-api-key", api_key)
            .header("anthropic-version", CLAUDE_API_VERSION)
            .json(&request)
            .send()
            .await
            .map_err(|err| Error::ProviderRateLimited(err.to_string()))?;

        if !response.status().is_success() {
            return Err(Error::ProviderRateLimited(format!("claude returned status {}", response.status())));
        }

        let parsed: ClaudeResponse = response.json().await.map_err(|err| Error::ModelOutputInvalid(err.to_string()))?;
        let content = parsed.content.into_iter().map(|b| b.text).collect::<Vec<_>>().join("");

        Ok(CompletionResponse {
            content,
            provider: Provider::Claude,
            model: self.model.clone(),
            input_tokens: parsed.usage.input_tokens,
            output_tokens: parsed.usage.output_tokens,
            cost_usd: crate::llm::types::calculate_cost(
                Provider::Claude,
                parsed.usage.input_tokens,
                parsed.usage.output_tokens,
            ),
        })
    }

    fn is_available(&self) -> bool {
        self.api_key.is_some()
    }
}

pub struct KimiProvider {
    client: reqwest::Client,
    api_key: Option<String>,
    model: String,
}

impl KimiProvider {
    pub fn from_env() -> Self {
        Self {
            client: http_client(),
            api_key: std::env::var("MOONSHOT_API_KEY").ok(),
            model: DEFAULT_KIMI_MODEL.to_string(),
        }
    }
}

#[derive(Serialize)]
struct KimiRequest<'a> {
    model: &'a str,
    messages: &'a [Message],
    temperature: f64,
    max_tokens: u32,
}

#[derive(Deserialize)]
struct KimiResponse {
    choices: Vec<KimiChoice>,
    usage: KimiUsage,
}

#[derive(Deserialize)]
struct KimiChoice {
    message: KimiMessage,
}

#[derive(Deserialize)]
struct KimiMessage {
    content: String,
}

#[derive(Deserialize)]
struct KimiUsage {
    prompt_tokens: u64,
    completion_tokens: u64,
}

#[async_trait]
impl LlmProvider for KimiProvider {
    async fn complete(
        &self,
        messages: &[Message],
        temperature: f64,
        max_tokens: u32,
    ) -> Result<CompletionResponse> {
        let api_key = self.api_key.as_deref().ok_or(Error::ProviderUnavailable)?;

        let request = KimiRequest {
            model: &self.model,
            messages,
            temperature: temperature * KIMI_TEMPERATURE_SCALE,
            max_tokens,
        };

        let response = self
            .client
            .post(KIMI_API_URL)
            .bearer_auth(api_key)
            .json(&request)
            .send()
            .await
            .map_err(|err| Error::ProviderRateLimited(err.to_string()))?;

        if !response.status().is_success() {
            return Err(Error::ProviderRateLimited(format!("kimi returned status {}", response.status())));
        }

        let mut parsed: KimiResponse = response.json().await.map_err(|err| Error::ModelOutputInvalid(err.to_string()))?;
        let content = parsed
            .choices
            .drain(..)
            .next()
            .map(|c| c.message.content)
            .ok_or_else(|| Error::ModelOutputInvalid("kimi returned no choices".to_string()))?;

        Ok(CompletionResponse {
            content,
            provider: Provider::Kimi,
            model: self.model.clone(),
            input_tokens: parsed.usage.prompt_tokens,
            output_tokens: parsed.usage.completion_tokens,
            cost_usd: crate::llm::types::calculate_cost(
                Provider::Kimi,
                parsed.usage.prompt_tokens,
                parsed.usage.completion_tokens,
            ),
        })
    }

    fn is_available(&self) -> bool {
        self.api_key.is_some()
    }
}

fn http_client() -> reqwest::Client {
    reqwest::Client::builder()
        .timeout(REQUEST_TIMEOUT)
        .build()
        .unwrap_or_else(|_| reqwest::Client::new())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn claude_unavailable_without_api_key() {
        std::env::remove_var("ANTHROPIC_API_KEY");
        let provider = ClaudeProvider::from_env();
        assert!(!provider.is_available());
    }

    #[test]
    fn kimi_temperature_is_scaled_down() {
        assert!((KIMI_TEMPERATURE_SCALE - 0.6).abs() < 1e-9);
    }
}
