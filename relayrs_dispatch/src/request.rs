use chrono::{DateTime, Utc};
use relayrs_core::{Message, OwnerId};
use relayrs_providers::RetryError;
use std::future::Future;
use std::pin::Pin;
use std::task::{Context, Poll};
use thiserror::Error;
use tokio::sync::oneshot;

#[derive(Debug, Error)]
pub enum DispatchError {
    #[error("admission queue is full")]
    QueueFull,

    #[error("dispatcher is not running")]
    Closed,

    #[error(transparent)]
    Upstream(#[from] RetryError),

    #[error("request execution aborted: {0}")]
    Aborted(String),
}

/// A unit of work waiting for a completion.
#[derive(Debug, Clone)]
pub struct PendingRequest {
    pub owner_id: OwnerId,
    pub content: String,
    /// Session history as it was when the request was enqueued, without
    /// `content` itself.
    pub history: Vec<Message>,
    pub submitted_at: DateTime<Utc>,
}

impl PendingRequest {
    #[must_use]
    pub fn new(owner_id: OwnerId, content: impl Into<String>) -> Self {
        Self {
            owner_id,
            content: content.into(),
            history: Vec::new(),
            submitted_at: Utc::now(),
        }
    }

    #[must_use]
    pub fn with_history(mut self, history: Vec<Message>) -> Self {
        self.history = history;
        self
    }
}

pub(crate) type Outcome = Result<String, DispatchError>;

/// Resolves exactly once with the reply or the reason there is none.
#[derive(Debug)]
pub struct ResultHandle {
    rx: oneshot::Receiver<Outcome>,
}

impl ResultHandle {
    pub(crate) const fn new(rx: oneshot::Receiver<Outcome>) -> Self {
        Self { rx }
    }
}

impl Future for ResultHandle {
    type Output = Outcome;

    fn poll(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        Pin::new(&mut self.rx)
            .poll(cx)
            .map(|received| received.unwrap_or(Err(DispatchError::Closed)))
    }
}

/// Owns the reply side of a handle. If it is dropped without a result (the
/// execution task panicked or was cancelled) the handle is rejected.
pub(crate) struct Reply {
    tx: Option<oneshot::Sender<Outcome>>,
}

impl Reply {
    pub(crate) const fn new(tx: oneshot::Sender<Outcome>) -> Self {
        Self { tx: Some(tx) }
    }

    pub(crate) fn resolve(mut self, outcome: Outcome) {
        if let Some(tx) = self.tx.take() {
            // The requester may have stopped waiting.
            let _ = tx.send(outcome);
        }
    }
}

impl Drop for Reply {
    fn drop(&mut self) {
        if let Some(tx) = self.tx.take() {
            let _ = tx.send(Err(DispatchError::Aborted(
                "execution ended without a result".to_string(),
            )));
        }
    }
}
