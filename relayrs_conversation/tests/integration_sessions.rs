//! End-to-end tests through the session manager, dispatcher, retry executor
//! and chat log store, with in-process fakes for the model, the embedder and
//! the chat platform.

use async_trait::async_trait;
use relayrs_conversation::{
    ALREADY_ACTIVE_TEXT, CompletionHandler, ContextBuilder, ConversationError,
    ConversationManager, SessionConfig,
};
use relayrs_core::{
    ChatPlatform, CompletionRequest, EmbeddingProvider, LLMProvider, LLMResponse, OwnerId,
    PlatformError, Role,
};
use relayrs_dispatch::{Dispatcher, DispatcherConfig};
use relayrs_memory::{
    ChatLogStore, InMemoryVectorIndex, SemanticAugmenter, SemanticIndex, StoreConfig,
};
use relayrs_providers::{BackoffStrategy, RetryExecutor};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

#[derive(Default)]
struct FakePlatform {
    delivered: Mutex<Vec<(OwnerId, String)>>,
    notices: Mutex<Vec<(OwnerId, String)>>,
    errors: AtomicUsize,
    closed: AtomicUsize,
}

#[async_trait]
impl ChatPlatform for FakePlatform {
    async fn deliver(&self, owner: &OwnerId, text: &str) -> Result<(), PlatformError> {
        self.delivered
            .lock()
            .unwrap()
            .push((owner.clone(), text.to_string()));
        Ok(())
    }

    async fn notify(&self, owner: &OwnerId, text: &str) -> Result<(), PlatformError> {
        self.notices
            .lock()
            .unwrap()
            .push((owner.clone(), text.to_string()));
        Ok(())
    }

    async fn notify_error(&self, _owner: &OwnerId) -> Result<(), PlatformError> {
        self.errors.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    async fn close_session_channel(&self, _owner: &OwnerId) -> Result<(), PlatformError> {
        self.closed.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }
}

/// Fails the first `failures` calls, then answers with the context size.
struct FakeModel {
    failures: usize,
    calls: AtomicUsize,
    requests: Mutex<Vec<CompletionRequest>>,
}

impl FakeModel {
    fn new(failures: usize) -> Self {
        Self {
            failures,
            calls: AtomicUsize::new(0),
            requests: Mutex::new(Vec::new()),
        }
    }
}

#[async_trait]
impl LLMProvider for FakeModel {
    async fn chat(&self, request: &CompletionRequest) -> anyhow::Result<LLMResponse> {
        self.requests.lock().unwrap().push(request.clone());
        if self.calls.fetch_add(1, Ordering::SeqCst) < self.failures {
            anyhow::bail!("connection reset");
        }
        Ok(LLMResponse {
            content: format!("ok ({} messages)", request.messages.len()),
            usage: None,
        })
    }

    fn get_default_model(&self) -> &str {
        "fake"
    }
}

/// Counts words from a tiny vocabulary.
struct VocabularyEmbedder;

#[async_trait]
impl EmbeddingProvider for VocabularyEmbedder {
    async fn embed(&self, text: &str) -> anyhow::Result<Vec<f32>> {
        let lower = text.to_lowercase();
        Ok(["garden", "piano", "taxes"]
            .iter()
            .map(|w| lower.matches(w).count() as f32)
            .chain(std::iter::once(0.01))
            .collect())
    }
}

#[derive(Default)]
struct CountingBackoff {
    sleeps: AtomicUsize,
}

impl BackoffStrategy for CountingBackoff {
    fn delay(&self, _attempt: usize) -> Duration {
        self.sleeps.fetch_add(1, Ordering::SeqCst);
        Duration::ZERO
    }
}

struct Harness {
    manager: ConversationManager,
    platform: Arc<FakePlatform>,
    model: Arc<FakeModel>,
    store: Arc<ChatLogStore>,
    backoff: Arc<CountingBackoff>,
    dir: tempfile::TempDir,
}

fn harness(failures: usize, max_retries: usize, timeout: Duration, with_memory: bool) -> Harness {
    let dir = tempfile::tempdir().unwrap();
    let model = Arc::new(FakeModel::new(failures));
    let platform = Arc::new(FakePlatform::default());
    let backoff = Arc::new(CountingBackoff::default());

    let semantic = Arc::new(SemanticIndex::new(
        Arc::new(VocabularyEmbedder),
        Arc::new(InMemoryVectorIndex::new()),
    ));
    let mut store = ChatLogStore::new(StoreConfig::new(dir.path()));
    if with_memory {
        store = store.with_indexer(semantic.clone());
    }
    let store = Arc::new(store);

    let retry = RetryExecutor::new(max_retries).with_backoff(backoff.clone());
    let mut handler = CompletionHandler::new(model.clone(), retry)
        .with_context(ContextBuilder::new().with_system_prompt("You are terse."));
    if with_memory {
        handler = handler
            .with_augmenter(Arc::new(SemanticAugmenter::new(semantic, store.clone()).with_top_k(1)));
    }

    let (dispatcher, _task) = Dispatcher::start(
        DispatcherConfig {
            capacity: 2,
            queue_capacity: 16,
            idle_wait: Duration::from_millis(10),
        },
        Arc::new(handler),
    );

    let manager = ConversationManager::new(
        SessionConfig::default().with_inactivity_timeout(timeout),
        dispatcher,
        store.clone(),
        platform.clone(),
    );

    Harness {
        manager,
        platform,
        model,
        store,
        backoff,
        dir,
    }
}

#[tokio::test]
async fn idle_session_is_flushed_as_one_segment() {
    let h = harness(0, 3, Duration::from_millis(100), false);
    let alice = OwnerId::from("alice");

    h.manager.start_session(&alice).await.unwrap();
    h.manager.handle_message(&alice, "hello").await.unwrap();

    tokio::time::sleep(Duration::from_millis(300)).await;
    assert!(h.manager.session_snapshot(&alice).await.is_none());
    h.manager.wait_for_flushes().await;

    let files: Vec<_> = std::fs::read_dir(h.dir.path().join("alice"))
        .unwrap()
        .collect();
    assert_eq!(files.len(), 1);

    let restored = h.store.load(&alice, None).await.unwrap();
    let user_messages: Vec<_> = restored.iter().filter(|m| m.role == Role::User).collect();
    assert_eq!(user_messages.len(), 1);
    assert_eq!(user_messages[0].content, "hello");
    assert_eq!(h.platform.closed.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn second_start_is_a_notice_not_a_new_session() {
    let h = harness(0, 3, Duration::from_secs(60), false);
    let alice = OwnerId::from("alice");

    let first = h.manager.start_session(&alice).await.unwrap();
    let second = h.manager.start_session(&alice).await;

    assert!(matches!(
        second,
        Err(ConversationError::SessionAlreadyActive(_))
    ));
    assert_eq!(h.manager.active_sessions().await, vec![alice.clone()]);
    assert_eq!(h.manager.session_snapshot(&alice).await.unwrap().id, first);

    let notices = h.platform.notices.lock().unwrap();
    assert_eq!(notices.last().unwrap().1, ALREADY_ACTIVE_TEXT);
}

#[tokio::test]
async fn two_failures_then_success_sleeps_twice() {
    let h = harness(2, 5, Duration::from_secs(60), false);
    let alice = OwnerId::from("alice");

    h.manager.start_session(&alice).await.unwrap();
    h.manager.handle_message(&alice, "hi").await.unwrap();

    assert_eq!(h.model.calls.load(Ordering::SeqCst), 3);
    assert_eq!(h.backoff.sleeps.load(Ordering::SeqCst), 2);
    let delivered = h.platform.delivered.lock().unwrap();
    assert_eq!(delivered[0].1, "ok (2 messages)");
}

#[tokio::test]
async fn exhausted_retries_become_an_apology() {
    let h = harness(usize::MAX, 3, Duration::from_secs(60), false);
    let alice = OwnerId::from("alice");

    h.manager.start_session(&alice).await.unwrap();
    let err = h.manager.handle_message(&alice, "hi").await.unwrap_err();

    assert!(matches!(err, ConversationError::Dispatch(_)));
    assert_eq!(h.model.calls.load(Ordering::SeqCst), 3);
    assert_eq!(h.platform.errors.load(Ordering::SeqCst), 1);
    assert!(h.platform.delivered.lock().unwrap().is_empty());

    // The user message stays in history; no reply was recorded.
    let session = h.manager.session_snapshot(&alice).await.unwrap();
    assert_eq!(session.history().len(), 1);
}

#[tokio::test]
async fn concurrent_owners_all_get_replies() {
    let h = harness(0, 3, Duration::from_secs(60), false);
    let owners: Vec<OwnerId> = (0..5).map(|i| OwnerId::from(format!("user{i}"))).collect();
    for owner in &owners {
        h.manager.start_session(owner).await.unwrap();
    }

    let mut tasks = Vec::new();
    for owner in owners.clone() {
        let manager = h.manager.clone();
        tasks.push(tokio::spawn(async move {
            manager.handle_message(&owner, "ping").await
        }));
    }
    for task in tasks {
        task.await.unwrap().unwrap();
    }

    assert_eq!(h.platform.delivered.lock().unwrap().len(), 5);
    assert_eq!(h.manager.dispatcher().stats().completed, 5);
    assert_eq!(h.manager.dispatcher().available_permits(), 2);
}

#[tokio::test]
async fn flushed_history_round_trips_modulo_limit() {
    let h = harness(0, 3, Duration::from_secs(60), false);
    let alice = OwnerId::from("alice");

    h.manager.start_session(&alice).await.unwrap();
    for i in 0..15 {
        h.manager
            .handle_message(&alice, &format!("message {i}"))
            .await
            .unwrap();
    }
    let live = h.manager.session_snapshot(&alice).await.unwrap();
    assert_eq!(live.history().len(), 20);

    h.manager.end_session(&alice).await.unwrap();
    h.manager.wait_for_flushes().await;

    let restored = h.store.load(&alice, None).await.unwrap();
    let original: Vec<&str> = live.history().iter().map(|m| m.content.as_str()).collect();
    let reloaded: Vec<&str> = restored.iter().map(|m| m.content.as_str()).collect();
    assert_eq!(reloaded, original);
}

#[tokio::test]
async fn earlier_session_is_recalled_into_context() {
    let h = harness(0, 3, Duration::from_secs(60), true);
    let alice = OwnerId::from("alice");

    h.manager.start_session(&alice).await.unwrap();
    h.manager
        .handle_message(&alice, "my garden has tomatoes")
        .await
        .unwrap();
    h.manager.end_session(&alice).await.unwrap();
    h.manager.wait_for_flushes().await;

    h.manager.start_session(&alice).await.unwrap();
    h.manager
        .handle_message(&alice, "what grows in my garden?")
        .await
        .unwrap();

    let requests = h.model.requests.lock().unwrap();
    let last = requests.last().unwrap();
    let contents: Vec<&str> = last.messages.iter().map(|m| m.content.as_str()).collect();
    assert_eq!(
        contents,
        vec![
            "You are terse.",
            "my garden has tomatoes",
            "ok (2 messages)",
            "what grows in my garden?",
        ]
    );
}
