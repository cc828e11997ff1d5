//! LLM Router: a provider-id -> adapter registry in front of a flat
//! completion contract, plus two test-double adapters used by the
//! executor's own test suite and by callers wiring up deterministic runs.

use crate::error::{Error, Result};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use tracing::{debug, instrument};

/// One completion request against an adapter.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CompletionRequest {
    pub model: String,
    pub system_prompt: String,
    pub user_prompt: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub max_tokens: Option<u32>,
}

/// One completion response from an adapter.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CompletionResponse {
    pub content: String,
    pub input_tokens: u64,
    pub output_tokens: u64,
    pub cost: f64,
}

/// The flat contract every LLM provider adapter implements.
#[async_trait]
pub trait LLMAdapter: Send + Sync {
    /// The provider id this adapter registers under (e.g. "anthropic").
    fn provider_id(&self) -> &str;

    async fn complete(&self, request: CompletionRequest) -> Result<CompletionResponse>;
}

/// A provider-id -> adapter registry. `complete` dispatches by provider id
/// and surfaces [`Error::UnknownProvider`] for anything unregistered.
#[derive(Default)]
pub struct LLMRouter {
    adapters: HashMap<String, Arc<dyn LLMAdapter>>,
}

impl LLMRouter {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register an adapter under its own `provider_id()`.
    pub fn register(&mut self, adapter: Arc<dyn LLMAdapter>) {
        self.adapters.insert(adapter.provider_id().to_string(), adapter);
    }

    pub fn get_adapter(&self, provider: &str) -> Option<Arc<dyn LLMAdapter>> {
        self.adapters.get(provider).cloned()
    }

    #[instrument(skip(self, request), fields(provider = %provider, model = %request.model))]
    pub async fn complete(&self, provider: &str, request: CompletionRequest) -> Result<CompletionResponse> {
        let adapter = self
            .get_adapter(provider)
            .ok_or_else(|| Error::UnknownProvider(provider.to_string()))?;
        debug!(chars = request.user_prompt.len(), "dispatching completion");
        adapter.complete(request).await
    }
}

/// A scripted adapter for deterministic tests: replays a fixed queue of
/// responses (or a repeating single response) regardless of the request.
pub struct MockAdapter {
    provider_id: String,
    responses: Mutex<Vec<CompletionResponse>>,
    fallback: CompletionResponse,
}

impl MockAdapter {
    /// Build a mock that always returns `response`.
    pub fn constant(provider_id: impl Into<String>, response: CompletionResponse) -> Self {
        Self {
            provider_id: provider_id.into(),
            responses: Mutex::new(Vec::new()),
            fallback: response,
        }
    }

    /// Build a mock that replays `responses` in order, then repeats the
    /// last one once exhausted.
    pub fn scripted(provider_id: impl Into<String>, mut responses: Vec<CompletionResponse>) -> Self {
        responses.reverse();
        let fallback = responses
            .first()
            .cloned()
            .unwrap_or(CompletionResponse {
                content: String::new(),
                input_tokens: 0,
                output_tokens: 0,
                cost: 0.0,
            });
        Self {
            provider_id: provider_id.into(),
            responses: Mutex::new(responses),
            fallback,
        }
    }
}

#[async_trait]
impl LLMAdapter for MockAdapter {
    fn provider_id(&self) -> &str {
        &self.provider_id
    }

    async fn complete(&self, _request: CompletionRequest) -> Result<CompletionResponse> {
        let mut queue = self.responses.lock().unwrap();
        Ok(queue.pop().unwrap_or_else(|| self.fallback.clone()))
    }
}

/// Wraps another adapter and emits a tracing event per completion,
/// recording token counts and cost without altering behavior.
pub struct LoggingAdapter {
    inner: Arc<dyn LLMAdapter>,
}

impl LoggingAdapter {
    pub fn new(inner: Arc<dyn LLMAdapter>) -> Self {
        Self { inner }
    }
}

#[async_trait]
impl LLMAdapter for LoggingAdapter {
    fn provider_id(&self) -> &str {
        self.inner.provider_id()
    }

    async fn complete(&self, request: CompletionRequest) -> Result<CompletionResponse> {
        let model = request.model.clone();
        let response = self.inner.complete(request).await?;
        tracing::info!(
            provider = self.inner.provider_id(),
            model = %model,
            input_tokens = response.input_tokens,
            output_tokens = response.output_tokens,
            cost = response.cost,
            "llm completion"
        );
        Ok(response)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn resp(content: &str) -> CompletionResponse {
        CompletionResponse {
            content: content.to_string(),
            input_tokens: 10,
            output_tokens: 5,
            cost: 0.01,
        }
    }

    fn req() -> CompletionRequest {
        CompletionRequest {
            model: "mock-model".to_string(),
            system_prompt: "sys".to_string(),
            user_prompt: "hi".to_string(),
            max_tokens: None,
        }
    }

    #[tokio::test]
    async fn unknown_provider_errors() {
        let router = LLMRouter::new();
        let err = router.complete("nonexistent", req()).await.unwrap_err();
        assert!(matches!(err, Error::UnknownProvider(_)));
    }

    #[tokio::test]
    async fn registered_provider_dispatches() {
        let mut router = LLMRouter::new();
        router.register(Arc::new(MockAdapter::constant("mock", resp("hello"))));
        let out = router.complete("mock", req()).await.unwrap();
        assert_eq!(out.content, "hello");
    }

    #[tokio::test]
    async fn scripted_adapter_replays_in_order_then_repeats_last() {
        let adapter = MockAdapter::scripted("mock", vec![resp("first"), resp("second")]);
        assert_eq!(adapter.complete(req()).await.unwrap().content, "first");
        assert_eq!(adapter.complete(req()).await.unwrap().content, "second");
        assert_eq!(adapter.complete(req()).await.unwrap().content, "second");
    }

    #[tokio::test]
    async fn logging_adapter_preserves_response() {
        let inner = Arc::new(MockAdapter::constant("mock", resp("wrapped")));
        let logging = LoggingAdapter::new(inner);
        let out = logging.complete(req()).await.unwrap();
        assert_eq!(out.content, "wrapped");
        assert_eq!(logging.provider_id(), "mock");
    }
}
