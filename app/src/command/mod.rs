//! Static strategy pattern for CLI commands.
//!
//! Each command is a separate strategy with its own input type. The helpers
//! below wire the shared runtime: provider, store, long-term memory,
//! dispatcher and session manager.

use relayrs_config::{BackoffKind, Config, IndexConfig};
use relayrs_conversation::{
    CompletionHandler, CompletionParams, ContextBuilder, ConversationManager, SessionConfig,
};
use relayrs_core::{ChatPlatform, VectorIndex, util::DEFAULT_SYSTEM_PROMPT};
use relayrs_dispatch::{Dispatcher, DispatcherConfig};
use relayrs_memory::{
    ChatLogStore, InMemoryVectorIndex, PineconeIndex, SemanticAugmenter, SemanticIndex,
    StoreConfig,
};
use relayrs_providers::{
    BackoffStrategy, ExponentialBackoff, FixedBackoff, LinearBackoff, OpenAiProvider,
    RetryExecutor,
};
use std::sync::Arc;
use std::time::Duration;
use tracing::info;

mod chat;
mod history;
mod init;
mod telegram;
mod version;

pub use chat::{ChatInput, ChatStrategy};
pub use history::{HistoryInput, HistoryStrategy};
pub use init::InitStrategy;
pub use telegram::{TelegramInput, TelegramStrategy};
pub use version::VersionStrategy;

/// Core trait defining the contract for all command strategies.
///
/// Each strategy defines its own input type via the associated type, and
/// calls are statically dispatched.
pub trait CommandStrategy: Send + Sync + 'static {
    /// The input type this strategy accepts.
    type Input;

    /// Execute the command with the given input.
    async fn execute(&self, input: Self::Input) -> anyhow::Result<()>;
}

/// Backoff delays never exceed this.
const MAX_BACKOFF: Duration = Duration::from_secs(30);

fn build_backoff(config: &Config) -> Arc<dyn BackoffStrategy> {
    let delay = config.dispatch.retry_delay();
    match config.dispatch.backoff {
        BackoffKind::Fixed => Arc::new(FixedBackoff::new(delay)),
        BackoffKind::Linear => Arc::new(LinearBackoff::new(delay, MAX_BACKOFF)),
        BackoffKind::Exponential => Arc::new(ExponentialBackoff::new(delay, MAX_BACKOFF)),
    }
}

fn build_provider(config: &Config) -> OpenAiProvider {
    let openai = &config.providers.openai;
    let mut provider = OpenAiProvider::new(openai.api_key.clone());
    if let Some(base_url) = &openai.base_url {
        provider = provider.with_base_url(base_url.clone());
    }
    if let Some(model) = &openai.embedding_model {
        provider = provider.with_embedding_model(model.clone());
    }
    provider
}

fn build_vector_index(config: &Config) -> Arc<dyn VectorIndex> {
    match &config.memory.index {
        IndexConfig::InMemory => {
            info!("Using in-process vector index");
            Arc::new(InMemoryVectorIndex::new())
        }
        IndexConfig::Pinecone { host, api_key } => {
            info!("Using Pinecone index at {host}");
            Arc::new(PineconeIndex::new(host.clone(), api_key.clone()))
        }
    }
}

fn store_config(config: &Config) -> anyhow::Result<StoreConfig> {
    let mut store = StoreConfig::new(config.storage.root_dir()?);
    store.segment_size = config.storage.segment_size;
    store.recent_segments = config.storage.recent_segments;
    store.history_limit = config.session.history_limit;
    Ok(store)
}

/// Chat log store without indexing, for read-only commands.
pub(crate) fn open_store(config: &Config) -> anyhow::Result<ChatLogStore> {
    Ok(ChatLogStore::new(store_config(config)?))
}

/// Provider, memory, dispatcher and session manager wired from `config`,
/// replying through `platform`.
pub(crate) fn build_manager(
    config: &Config,
    platform: Arc<dyn ChatPlatform>,
    capacity: Option<usize>,
) -> anyhow::Result<ConversationManager> {
    let provider = Arc::new(build_provider(config));
    let defaults = &config.agents.defaults;

    let mut store = ChatLogStore::new(store_config(config)?);
    let semantic = if config.memory.enabled {
        let semantic = Arc::new(SemanticIndex::new(provider.clone(), build_vector_index(config)));
        store = store.with_indexer(semantic.clone());
        Some(semantic)
    } else {
        info!("Long-term memory disabled");
        None
    };
    let store = Arc::new(store);

    let retry = RetryExecutor::new(config.dispatch.max_retries).with_backoff(build_backoff(config));
    let context = ContextBuilder::new().with_system_prompt(
        defaults
            .system_prompt
            .clone()
            .unwrap_or_else(|| DEFAULT_SYSTEM_PROMPT.to_string()),
    );
    let params = CompletionParams {
        model: defaults.model.clone(),
        max_tokens: defaults.max_tokens,
        temperature: defaults.temperature,
        frequency_penalty: defaults.frequency_penalty,
        presence_penalty: defaults.presence_penalty,
    };

    let mut handler = CompletionHandler::new(provider, retry)
        .with_params(params)
        .with_context(context);
    if let Some(semantic) = semantic {
        let augmenter =
            SemanticAugmenter::new(semantic, store.clone()).with_top_k(config.memory.top_k);
        handler = handler.with_augmenter(Arc::new(augmenter));
    }

    let dispatcher_config = DispatcherConfig {
        capacity: capacity.unwrap_or(config.dispatch.capacity),
        queue_capacity: config.dispatch.queue_capacity,
        idle_wait: config.dispatch.idle_wait(),
    };
    let (dispatcher, _task) = Dispatcher::start(dispatcher_config, Arc::new(handler));

    let session = SessionConfig::default()
        .with_history_limit(config.session.history_limit)
        .with_inactivity_timeout(config.session.inactivity_timeout());

    Ok(ConversationManager::new(session, dispatcher, store, platform))
}
