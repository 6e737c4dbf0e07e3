//! Owner-keyed table of live sessions.

use relayrs_core::{Message, OwnerId};
use std::collections::HashMap;
use std::time::Duration;
use tokio::sync::Mutex;
use tokio::time::Instant;
use uuid::Uuid;

use crate::session::{ConversationSession, SessionState};

/// Result of recording an inbound message.
#[derive(Debug, Clone)]
pub struct Appended {
    pub session_id: Uuid,
    /// History as it was before the message was appended
    pub prior: Vec<Message>,
}

/// Holds at most one session per owner. Every operation is a single locked
/// step.
#[derive(Debug, Default)]
pub struct SessionRegistry {
    sessions: Mutex<HashMap<OwnerId, ConversationSession>>,
}

impl SessionRegistry {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Create a session for `owner`, or return `None` if one is already live.
    pub async fn open(&self, owner: &OwnerId, history_limit: usize) -> Option<ConversationSession> {
        let mut sessions = self.sessions.lock().await;
        if sessions.contains_key(owner) {
            return None;
        }
        let session = ConversationSession::new(owner.clone(), history_limit);
        sessions.insert(owner.clone(), session.clone());
        Some(session)
    }

    pub async fn append(&self, owner: &OwnerId, message: Message) -> Option<Appended> {
        let mut sessions = self.sessions.lock().await;
        let session = sessions.get_mut(owner)?;
        let prior = session.history().to_vec();
        session.push(message);
        Some(Appended {
            session_id: session.id,
            prior,
        })
    }

    /// Append only if `owner`'s live session is still `session_id`.
    pub async fn append_to(&self, owner: &OwnerId, session_id: Uuid, message: Message) -> bool {
        let mut sessions = self.sessions.lock().await;
        match sessions.get_mut(owner) {
            Some(session) if session.id == session_id => {
                session.push(message);
                true
            }
            _ => false,
        }
    }

    /// Remove `owner`'s session, optionally only if it is `session_id`.
    /// The returned session is marked [`SessionState::Ending`].
    pub async fn take(
        &self,
        owner: &OwnerId,
        session_id: Option<Uuid>,
    ) -> Option<ConversationSession> {
        let mut sessions = self.sessions.lock().await;
        if let Some(expected) = session_id {
            if sessions.get(owner).is_none_or(|s| s.id != expected) {
                return None;
            }
        }
        let mut session = sessions.remove(owner)?;
        session.state = SessionState::Ending;
        Some(session)
    }

    /// When `session_id` expires given `timeout`, or `None` if it is no
    /// longer live.
    pub async fn deadline(
        &self,
        owner: &OwnerId,
        session_id: Uuid,
        timeout: Duration,
    ) -> Option<Instant> {
        let sessions = self.sessions.lock().await;
        sessions
            .get(owner)
            .filter(|s| s.id == session_id)
            .map(|s| s.last_activity() + timeout)
    }

    pub async fn snapshot(&self, owner: &OwnerId) -> Option<ConversationSession> {
        self.sessions.lock().await.get(owner).cloned()
    }

    pub async fn owners(&self) -> Vec<OwnerId> {
        let mut owners: Vec<OwnerId> = self.sessions.lock().await.keys().cloned().collect();
        owners.sort();
        owners
    }

    pub async fn len(&self) -> usize {
        self.sessions.lock().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.sessions.lock().await.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn one_session_per_owner() {
        let registry = SessionRegistry::new();
        let alice = OwnerId::from("alice");

        assert!(registry.open(&alice, 20).await.is_some());
        assert!(registry.open(&alice, 20).await.is_none());
        assert!(registry.open(&OwnerId::from("bob"), 20).await.is_some());
        assert_eq!(registry.len().await, 2);
    }

    #[tokio::test]
    async fn append_returns_prior_history() {
        let registry = SessionRegistry::new();
        let alice = OwnerId::from("alice");
        registry.open(&alice, 20).await.unwrap();

        let first = registry.append(&alice, Message::user("one")).await.unwrap();
        assert!(first.prior.is_empty());
        let second = registry.append(&alice, Message::user("two")).await.unwrap();
        assert_eq!(second.prior.len(), 1);
        assert_eq!(second.prior[0].content, "one");
        assert_eq!(first.session_id, second.session_id);

        assert!(registry.append(&OwnerId::from("bob"), Message::user("x")).await.is_none());
    }

    #[tokio::test]
    async fn stale_session_id_is_ignored() {
        let registry = SessionRegistry::new();
        let alice = OwnerId::from("alice");
        let old = registry.open(&alice, 20).await.unwrap();
        registry.take(&alice, None).await.unwrap();
        let new = registry.open(&alice, 20).await.unwrap();

        assert!(!registry.append_to(&alice, old.id, Message::assistant("late")).await);
        assert!(registry.take(&alice, Some(old.id)).await.is_none());
        assert!(registry.deadline(&alice, old.id, Duration::from_secs(1)).await.is_none());

        let taken = registry.take(&alice, Some(new.id)).await.unwrap();
        assert_eq!(taken.state, SessionState::Ending);
        assert!(taken.history().is_empty());
        assert!(registry.is_empty().await);
    }

    #[tokio::test]
    async fn owners_are_sorted() {
        let registry = SessionRegistry::new();
        registry.open(&OwnerId::from("carol"), 20).await;
        registry.open(&OwnerId::from("alice"), 20).await;
        assert_eq!(
            registry.owners().await,
            vec![OwnerId::from("alice"), OwnerId::from("carol")]
        );
    }
}
