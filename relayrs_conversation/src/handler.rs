//! The upstream call executed for each dispatched request.

use async_trait::async_trait;
use relayrs_core::{CompletionRequest, LLMProvider};
use relayrs_dispatch::{PendingRequest, RequestHandler};
use relayrs_memory::SemanticAugmenter;
use relayrs_providers::{RetryError, RetryExecutor};
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use tracing::{debug, info};

use crate::history::ContextBuilder;

/// Model and sampling parameters for every completion call.
#[derive(Debug, Clone)]
pub struct CompletionParams {
    pub model: String,
    pub max_tokens: usize,
    pub temperature: f32,
    pub frequency_penalty: f32,
    pub presence_penalty: f32,
}

impl Default for CompletionParams {
    fn default() -> Self {
        Self {
            model: "gpt-3.5-turbo".to_string(),
            max_tokens: 1024,
            temperature: 0.7,
            frequency_penalty: 0.0,
            presence_penalty: 0.0,
        }
    }
}

impl CompletionParams {
    #[must_use]
    pub fn with_model(mut self, model: impl Into<String>) -> Self {
        self.model = model.into();
        self
    }

    #[must_use]
    pub const fn with_max_tokens(mut self, max_tokens: usize) -> Self {
        self.max_tokens = max_tokens;
        self
    }
}

/// Augments a request's history, then performs the completion call under
/// the retry executor.
pub struct CompletionHandler {
    provider: Arc<dyn LLMProvider>,
    augmenter: Option<Arc<SemanticAugmenter>>,
    retry: RetryExecutor,
    params: CompletionParams,
    context: ContextBuilder,
    tokens_used: AtomicU64,
}

impl CompletionHandler {
    pub fn new(provider: Arc<dyn LLMProvider>, retry: RetryExecutor) -> Self {
        let params = CompletionParams::default().with_model(provider.get_default_model());
        Self {
            provider,
            augmenter: None,
            retry,
            params,
            context: ContextBuilder::new(),
            tokens_used: AtomicU64::new(0),
        }
    }

    #[must_use]
    pub fn with_augmenter(mut self, augmenter: Arc<SemanticAugmenter>) -> Self {
        self.augmenter = Some(augmenter);
        self
    }

    #[must_use]
    pub fn with_params(mut self, params: CompletionParams) -> Self {
        self.params = params;
        self
    }

    #[must_use]
    pub fn with_context(mut self, context: ContextBuilder) -> Self {
        self.context = context;
        self
    }

    /// Total tokens reported by the provider across all completions.
    #[must_use]
    pub fn tokens_used(&self) -> u64 {
        self.tokens_used.load(Ordering::Relaxed)
    }

    /// The completion request `request` turns into.
    pub async fn build_request(&self, request: &PendingRequest) -> CompletionRequest {
        let history = match &self.augmenter {
            Some(augmenter) => {
                augmenter
                    .augment(&request.owner_id, &request.history, &request.content)
                    .await
            }
            None => request.history.clone(),
        };

        CompletionRequest {
            model: self.params.model.clone(),
            messages: self.context.build(&history, &request.content),
            max_tokens: self.params.max_tokens,
            temperature: self.params.temperature,
            frequency_penalty: self.params.frequency_penalty,
            presence_penalty: self.params.presence_penalty,
        }
    }
}

#[async_trait]
impl RequestHandler for CompletionHandler {
    async fn handle(&self, request: &PendingRequest) -> Result<String, RetryError> {
        let completion = self.build_request(request).await;
        debug!(
            "Completion for {}: {} context messages",
            request.owner_id,
            completion.messages.len()
        );

        let provider = &self.provider;
        let completion = &completion;
        let response = self
            .retry
            .execute(|| provider.chat(completion))
            .await?;

        if let Some(usage) = &response.usage {
            let total = self
                .tokens_used
                .fetch_add(u64::from(usage.total_tokens), Ordering::Relaxed)
                + u64::from(usage.total_tokens);
            info!(
                "Completion for {} used {} tokens ({} prompt, {} completion), {total} total",
                request.owner_id, usage.total_tokens, usage.prompt_tokens, usage.completion_tokens
            );
        }

        Ok(response.content)
    }
}
