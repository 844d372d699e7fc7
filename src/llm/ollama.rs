//! Local Ollama provider (spec §4.D): always-zero cost, availability
//! established by probing the tags endpoint, grounded on the reqwest
//! client-construction style of `dashflow-chains::llm_requests`.

use crate::error::{Error, Result};
use crate::llm::provider::LlmProvider;
use crate::llm::types::{CompletionResponse, Message, Provider};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::time::Duration;

const DEFAULT_HOST: &str = "http://localhost:11434";
const DEFAULT_MODEL: &str = "llama3.1";
const HEALTH_CHECK_TIMEOUT: Duration = Duration::from_secs(2);
const REQUEST_TIMEOUT: Duration = Duration::from_secs(120);

#[derive(Serialize)]
struct ChatRequest<'a> {
    model: &'a str,
    messages: &'a [Message],
    stream: bool,
    options: ChatOptions,
}

#[derive(Serialize)]
struct ChatOptions {
    temperature: f64,
    num_predict: u32,
}

#[derive(Deserialize)]
struct ChatResponse {
    message: ChatResponseMessage,
    #[serde(default)]
    prompt_eval_count: u64,
    #[serde(default)]
    eval_count: u64,
}

#[derive(Deserialize)]
struct ChatResponseMessage {
    content: String,
}

pub struct OllamaProvider {
    client: reqwest::Client,
    host: String,
    model: String,
    available: bool,
}

impl OllamaProvider {
    /// Builds the provider and probes `/api/tags` once, per spec §4.D's
    /// "established at construction" rule. `host`/`model` default to
    /// `OLLAMA_HOST`/`OLLAMA_MODEL`.
    pub async fn connect(host: Option<String>, model: Option<String>) -> Self {
        let host = host
            .or_else(|| std::env::var("OLLAMA_HOST").ok())
            .unwrap_or_else(|| DEFAULT_HOST.to_string());
        let model = model
            .or_else(|| std::env::var("OLLAMA_MODEL").ok())
            .unwrap_or_else(|| DEFAULT_MODEL.to_string());

        let client = reqwest::Client::builder()
            .timeout(REQUEST_TIMEOUT)
            .build()
            .unwrap_or_else(|_| reqwest::Client::new());

        let available = Self::probe(&client, &host).await;

        Self { client, host, model, available }
    }

    async fn probe(client: &reqwest::Client, host: &str) -> bool {
        let probe = client.get(format!("{host}/api/tags")).timeout(HEALTH_CHECK_TIMEOUT).send();
        match tokio::time::timeout(HEALTH_CHECK_TIMEOUT, probe).await {
            Ok(Ok(resp)) => resp.status().is_success(),
            _ => false,
        }
    }
}

#[async_trait]
impl LlmProvider for OllamaProvider {
    async fn complete(
        &self,
        messages: &[Message],
        temperature: f64,
        max_tokens: u32,
    ) -> Result<CompletionResponse> {
        let request = ChatRequest {
            model: &self.model,
            messages,
            stream: false,
            options: ChatOptions { temperature, num_predict: max_tokens },
        };

        let response = self
            .client
            .post(format!("{}/api/chat", self.host))
            .json(&request)
            .send()
            .await
            .map_err(|err| Error::ProviderRateLimited(err.to_string()))?;

        if !response.status().is_success() {
            return Err(Error::ProviderRateLimited(format!(
                "ollama returned status {}",
                response.status()
            )));
        }

        let parsed: ChatResponse = response
            .json()
            .await
            .map_err(|err| Error::ModelOutputInvalid(err.to_string()))?;

        Ok(CompletionResponse {
            content: parsed.message.content,
            provider: Provider::Ollama,
            model: self.model.clone(),
            input_tokens: parsed.prompt_eval_count,
            output_tokens: parsed.eval_count,
            cost_usd: 0.0,
        })
    }

    fn is_available(&self) -> bool {
        self.available
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn unreachable_host_is_not_available() {
        let provider = OllamaProvider::connect(Some("http://127.0.0.1:1".to_string()), None).await;
        assert!(!provider.is_available());
    }

    #[tokio::test]
    async fn defaults_come_from_constants_when_unset() {
        std::env::remove_var("OLLAMA_HOST");
        std::env::remove_var("OLLAMA_MODEL");
        let provider = OllamaProvider::connect(None, None).await;
        assert_eq!(provider.host, DEFAULT_HOST);
        assert_eq!(provider.model, DEFAULT_MODEL);
    }
}
