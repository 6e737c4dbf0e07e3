//! A single owner's live conversation.

use chrono::{DateTime, Utc};
use relayrs_core::{Message, OwnerId};
use tokio::time::Instant;
use uuid::Uuid;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    /// Accepting messages
    Active,
    /// Removed from the registry, history handed to the store
    Ending,
    /// Platform channel torn down
    Closed,
}

/// In-memory history of one session, bounded to the last `history_limit`
/// messages.
#[derive(Debug, Clone)]
pub struct ConversationSession {
    pub id: Uuid,
    pub owner_id: OwnerId,
    pub created_at: DateTime<Utc>,
    pub last_activity_at: DateTime<Utc>,
    pub state: SessionState,
    messages: Vec<Message>,
    history_limit: usize,
    last_activity: Instant,
}

impl ConversationSession {
    #[must_use]
    pub fn new(owner_id: OwnerId, history_limit: usize) -> Self {
        let now = Utc::now();
        Self {
            id: Uuid::now_v7(),
            owner_id,
            created_at: now,
            last_activity_at: now,
            state: SessionState::Active,
            messages: Vec::new(),
            history_limit: history_limit.max(1),
            last_activity: Instant::now(),
        }
    }

    /// Append a message, dropping the oldest ones beyond the limit.
    pub fn push(&mut self, message: Message) {
        self.messages.push(message);
        if self.messages.len() > self.history_limit {
            let excess = self.messages.len() - self.history_limit;
            self.messages.drain(..excess);
        }
        self.touch();
    }

    pub fn touch(&mut self) {
        self.last_activity_at = Utc::now();
        self.last_activity = Instant::now();
    }

    #[must_use]
    pub fn history(&self) -> &[Message] {
        &self.messages
    }

    #[must_use]
    pub const fn last_activity(&self) -> Instant {
        self.last_activity
    }

    #[must_use]
    pub const fn is_active(&self) -> bool {
        matches!(self.state, SessionState::Active)
    }
}
