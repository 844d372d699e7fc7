//! LLM provider abstraction and routing (spec §4.D), grounded on
//! `original_source/cortex/llm_router.py`.

mod cloud;
mod ollama;
mod provider;
mod router;
mod types;

pub use cloud::{ClaudeProvider, KimiProvider};
pub use ollama::OllamaProvider;
pub use provider::LlmProvider;
pub use router::{CompletionRequest, LLMRouter, ProviderStats};
pub use types::{calculate_cost, CompletionResponse, Message, Provider, TaskType};

use std::collections::HashMap;
use std::sync::Arc;

/// Builds a router with all three providers wired from environment
/// configuration, matching `LLMRouter.__init__`'s provider discovery.
pub async fn router_from_env(enable_fallback: bool) -> LLMRouter {
    let mut providers: HashMap<Provider, Arc<dyn LlmProvider>> = HashMap::new();
    providers.insert(Provider::Ollama, Arc::new(OllamaProvider::connect(None, None).await));
    providers.insert(Provider::Claude, Arc::new(ClaudeProvider::from_env()));
    providers.insert(Provider::Kimi, Arc::new(KimiProvider::from_env()));
    LLMRouter::new(providers, enable_fallback)
}
