//! Routes a task to a provider, falls back on failure, and tracks
//! usage/cost (spec §4.D), grounded on `llm_router.py::LLMRouter`.

use crate::error::{Error, Result};
use crate::llm::provider::LlmProvider;
use crate::llm::types::{calculate_cost, default_provider_for, CompletionResponse, Message, Provider, TaskType};
use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use tokio::sync::Semaphore;

const DEFAULT_MAX_CONCURRENT: usize = 10;

/// One request in a [`LLMRouter::complete_batch`] call.
#[derive(Debug, Clone)]
pub struct CompletionRequest {
    pub task: TaskType,
    pub messages: Vec<Message>,
    pub temperature: f64,
    pub max_tokens: u32,
    pub force_provider: Option<Provider>,
}

/// Thread-safe running totals, mirroring the Python router's `stats` dict.
#[derive(Debug, Default, Clone, Copy)]
pub struct ProviderStats {
    pub requests: u64,
    pub tokens: u64,
    pub cost_usd: f64,
}

#[derive(Debug, Default)]
struct RouterStatsInner {
    total_requests: u64,
    total_cost_usd: f64,
    per_provider: HashMap<&'static str, ProviderStats>,
}

pub struct LLMRouter {
    providers: HashMap<Provider, Arc<dyn LlmProvider>>,
    enable_fallback: bool,
    stats: Mutex<RouterStatsInner>,
    batch_semaphore: Arc<Semaphore>,
}

impl LLMRouter {
    pub fn new(providers: HashMap<Provider, Arc<dyn LlmProvider>>, enable_fallback: bool) -> Self {
        Self {
            providers,
            enable_fallback,
            stats: Mutex::new(RouterStatsInner::default()),
            batch_semaphore: Arc::new(Semaphore::new(DEFAULT_MAX_CONCURRENT)),
        }
    }

    /// Picks the provider for `task`/`force_provider`, respecting
    /// availability and the fallback chain (spec §4.D).
    fn route_task(&self, task: TaskType, force_provider: Option<Provider>) -> Result<Provider> {
        let preferred = force_provider.unwrap_or_else(|| default_provider_for(task));

        if self.is_available(preferred) {
            return Ok(preferred);
        }

        if !self.enable_fallback {
            return Err(Error::ProviderUnavailable);
        }

        let order = Provider::fallback_order();
        let start = order.iter().position(|p| *p == preferred).map(|i| i + 1).unwrap_or(0);
        for provider in order.iter().cycle().skip(start).take(order.len()) {
            if self.is_available(*provider) {
                return Ok(*provider);
            }
        }

        Err(Error::ProviderUnavailable)
    }

    fn is_available(&self, provider: Provider) -> bool {
        self.providers.get(&provider).map(|p| p.is_available()).unwrap_or(false)
    }

    /// Routes and completes a single request, recursing into the next
    /// fallback provider on failure when `enable_fallback` is set.
    pub async fn complete(&self, request: &CompletionRequest) -> Result<CompletionResponse> {
        let provider_key = self.route_task(request.task, request.force_provider)?;
        self.complete_with(provider_key, request, &mut Vec::new()).await
    }

    fn complete_with<'a>(
        &'a self,
        provider_key: Provider,
        request: &'a CompletionRequest,
        tried: &'a mut Vec<Provider>,
    ) -> std::pin::Pin<Box<dyn std::future::Future<Output = Result<CompletionResponse>> + Send + 'a>> {
        Box::pin(async move {
            tried.push(provider_key);
            let provider = self.providers.get(&provider_key).ok_or(Error::ProviderUnavailable)?;

            match provider.complete(&request.messages, request.temperature, request.max_tokens).await {
                Ok(response) => {
                    self.record_stats(provider_key, &response);
                    Ok(response)
                }
                Err(err) => {
                    tracing::warn!(provider = provider_key.as_str(), error = %err, "provider call failed");
                    if !self.enable_fallback {
                        return Err(err);
                    }
                    let order = Provider::fallback_order();
                    let start = order.iter().position(|p| *p == provider_key).map(|i| i + 1).unwrap_or(0);
                    for candidate in order.iter().cycle().skip(start).take(order.len()) {
                        if !tried.contains(candidate) && self.is_available(*candidate) {
                            return self.complete_with(*candidate, request, tried).await;
                        }
                    }
                    Err(Error::ProviderUnavailable)
                }
            }
        })
    }

    fn record_stats(&self, provider: Provider, response: &CompletionResponse) {
        let cost = calculate_cost(provider, response.input_tokens, response.output_tokens);
        let mut stats = self.stats.lock().unwrap();
        stats.total_requests += 1;
        stats.total_cost_usd += cost;
        let entry = stats.per_provider.entry(provider.as_str()).or_default();
        entry.requests += 1;
        entry.tokens += response.tokens_used();
        entry.cost_usd += cost;
    }

    pub fn total_requests(&self) -> u64 {
        self.stats.lock().unwrap().total_requests
    }

    pub fn total_cost_usd(&self) -> f64 {
        self.stats.lock().unwrap().total_cost_usd
    }

    pub fn provider_stats(&self, provider: Provider) -> ProviderStats {
        self.stats.lock().unwrap().per_provider.get(provider.as_str()).copied().unwrap_or_default()
    }

    /// Runs `requests` concurrently behind a semaphore, preserving order
    /// and emitting an empty-content error response in-position for any
    /// request that fails rather than dropping it (spec §4.D). Requires
    /// `self` behind an `Arc` so each concurrent task can hold its own
    /// owned handle to the router.
    pub async fn complete_batch(self: &Arc<Self>, requests: Vec<CompletionRequest>) -> Vec<CompletionResponse> {
        let mut handles = Vec::with_capacity(requests.len());

        for request in requests {
            let router = Arc::clone(self);
            let semaphore = Arc::clone(&self.batch_semaphore);
            handles.push(tokio::spawn(async move {
                let _permit = semaphore.acquire_owned().await;
                let fallback_provider = request.force_provider.unwrap_or_else(|| default_provider_for(request.task));
                match router.complete(&request).await {
                    Ok(response) => response,
                    Err(err) => {
                        tracing::error!(error = %err, "batch request failed, emitting error-shaped response in-position");
                        CompletionResponse {
                            content: String::new(),
                            provider: fallback_provider,
                            model: String::new(),
                            input_tokens: 0,
                            output_tokens: 0,
                            cost_usd: 0.0,
                        }
                    }
                }
            }));
        }

        let mut results = Vec::with_capacity(handles.len());
        for handle in handles {
            results.push(handle.await.unwrap_or_else(|_| CompletionResponse {
                content: String::new(),
                provider: Provider::Ollama,
                model: String::new(),
                input_tokens: 0,
                output_tokens: 0,
                cost_usd: 0.0,
            }));
        }
        results
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::llm::provider::test_support::StubProvider;
    use crate::llm::types::Message;

    fn router_with(available: &[(Provider, bool)]) -> LLMRouter {
        let mut providers: HashMap<Provider, Arc<dyn LlmProvider>> = HashMap::new();
        for (provider, avail) in available {
            providers.insert(
                *provider,
                Arc::new(StubProvider { provider: *provider, available: *avail, result: Mutex::new(None) }),
            );
        }
        LLMRouter::new(providers, true)
    }

    #[tokio::test]
    async fn routes_to_ollama_by_default() {
        let router = router_with(&[(Provider::Ollama, true), (Provider::Claude, true)]);
        let response = router
            .complete(&CompletionRequest {
                task: TaskType::UserChat,
                messages: vec![Message::user("hi")],
                temperature: 0.7,
                max_tokens: 100,
                force_provider: None,
            })
            .await
            .unwrap();
        assert_eq!(response.provider, Provider::Ollama);
        assert_eq!(router.total_requests(), 1);
    }

    #[tokio::test]
    async fn falls_back_when_preferred_provider_unavailable() {
        let router = router_with(&[(Provider::Ollama, false), (Provider::Claude, true)]);
        let response = router
            .complete(&CompletionRequest {
                task: TaskType::UserChat,
                messages: vec![Message::user("hi")],
                temperature: 0.7,
                max_tokens: 100,
                force_provider: None,
            })
            .await
            .unwrap();
        assert_eq!(response.provider, Provider::Claude);
    }

    #[tokio::test]
    async fn no_provider_available_fails_with_provider_unavailable() {
        let router = router_with(&[(Provider::Ollama, false)]);
        let result = router
            .complete(&CompletionRequest {
                task: TaskType::UserChat,
                messages: vec![Message::user("hi")],
                temperature: 0.7,
                max_tokens: 100,
                force_provider: None,
            })
            .await;
        assert!(matches!(result, Err(Error::ProviderUnavailable)));
    }

    #[tokio::test]
    async fn batch_preserves_order_and_length() {
        let router = Arc::new(router_with(&[(Provider::Ollama, true)]));
        let requests = vec![
            CompletionRequest {
                task: TaskType::UserChat,
                messages: vec![Message::user("a")],
                temperature: 0.5,
                max_tokens: 50,
                force_provider: None,
            },
            CompletionRequest {
                task: TaskType::UserChat,
                messages: vec![Message::user("b")],
                temperature: 0.5,
                max_tokens: 50,
                force_provider: None,
            },
        ];
        let results = router.complete_batch(requests).await;
        assert_eq!(results.len(), 2);
    }
}
