//! Provider abstraction (spec §4.D), grounded on the request/response shape
//! of `llm_router.py`'s per-provider `_complete_*` methods.

use crate::error::Result;
use crate::llm::types::{CompletionResponse, Message};
use async_trait::async_trait;

/// One concrete LLM backend able to produce a completion from a message
/// history. `Ollama`, `Claude`, and `Kimi` each implement this with their
/// own wire format; the router only ever talks through this trait.
#[async_trait]
pub trait LlmProvider: Send + Sync {
    async fn complete(
        &self,
        messages: &[Message],
        temperature: f64,
        max_tokens: u32,
    ) -> Result<CompletionResponse>;

    /// True once this provider has been confirmed reachable: a local HTTP
    /// health probe for `Ollama`, or a configured API key for the others.
    fn is_available(&self) -> bool;
}

#[cfg(test)]
pub(crate) mod test_support {
    use super::*;
    use crate::llm::types::Provider;

    /// A provider double for router tests: always available, returns a
    /// fixed response, or returns a configured error.
    pub struct StubProvider {
        pub provider: Provider,
        pub available: bool,
        pub result: std::sync::Mutex<Option<Result<CompletionResponse>>>,
    }

    #[async_trait]
    impl LlmProvider for StubProvider {
        async fn complete(
            &self,
            _messages: &[Message],
            _temperature: f64,
            _max_tokens: u32,
        ) -> Result<CompletionResponse> {
            let mut guard = self.result.lock().unwrap();
            guard.take().unwrap_or_else(|| {
                Ok(CompletionResponse {
                    content: "stub response".to_string(),
                    provider: self.provider,
                    model: "stub-model".to_string(),
                    input_tokens: 10,
                    output_tokens: 10,
                    cost_usd: 0.0,
                })
            })
        }

        fn is_available(&self) -> bool {
            self.available
        }
    }
}
