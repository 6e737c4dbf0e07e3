//! Session lifecycle: start, message, end and inactivity expiry.
//!
//! The manager sits between platform ingress and the dispatcher. Inbound
//! messages are appended to the owner's session before they are enqueued,
//! replies are appended once they arrive, and a closed session's history is
//! handed to the chat log store in the background.

use relayrs_core::{ChatPlatform, HISTORY_LIMIT, Message, OwnerId, PlatformError};
use relayrs_dispatch::{DispatchError, Dispatcher, PendingRequest};
use relayrs_memory::ChatLogStore;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tokio::sync::Mutex;
use tokio::task::JoinSet;
use tokio::time::{Instant, sleep_until};
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use crate::registry::SessionRegistry;
use crate::session::{ConversationSession, SessionState};

pub const SESSION_STARTED_TEXT: &str = "Session started. Send messages to chat.";
pub const SESSION_ENDED_TEXT: &str = "Session ended.";
pub const SESSION_EXPIRED_TEXT: &str = "Session closed after a period of inactivity.";
pub const ALREADY_ACTIVE_TEXT: &str =
    "A session is already active. End it before starting a new one.";
pub const NO_SESSION_TEXT: &str = "No active session. Start one first.";

#[derive(Debug, Error)]
pub enum ConversationError {
    #[error("a session is already active for {0}")]
    SessionAlreadyActive(OwnerId),

    #[error("no active session for {0}")]
    NoActiveSession(OwnerId),

    #[error(transparent)]
    Dispatch(#[from] DispatchError),
}

#[derive(Debug, Clone)]
pub struct SessionConfig {
    /// Maximum messages kept per session
    pub history_limit: usize,
    /// Idle time after which a session is closed
    pub inactivity_timeout: Duration,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            history_limit: HISTORY_LIMIT,
            inactivity_timeout: Duration::from_secs(15 * 60),
        }
    }
}

impl SessionConfig {
    #[must_use]
    pub const fn with_history_limit(mut self, limit: usize) -> Self {
        self.history_limit = limit;
        self
    }

    #[must_use]
    pub const fn with_inactivity_timeout(mut self, timeout: Duration) -> Self {
        self.inactivity_timeout = timeout;
        self
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum CloseReason {
    Ended,
    Expired,
    Shutdown,
}

/// Cheap to clone; clones share the same sessions.
#[derive(Clone)]
pub struct ConversationManager {
    config: SessionConfig,
    registry: Arc<SessionRegistry>,
    dispatcher: Dispatcher,
    store: Arc<ChatLogStore>,
    platform: Arc<dyn ChatPlatform>,
    flushes: Arc<Mutex<JoinSet<()>>>,
}

impl ConversationManager {
    pub fn new(
        config: SessionConfig,
        dispatcher: Dispatcher,
        store: Arc<ChatLogStore>,
        platform: Arc<dyn ChatPlatform>,
    ) -> Self {
        info!(
            "Creating conversation manager: history_limit={}, inactivity_timeout={}s",
            config.history_limit,
            config.inactivity_timeout.as_secs()
        );
        Self {
            config,
            registry: Arc::new(SessionRegistry::new()),
            dispatcher,
            store,
            platform,
            flushes: Arc::new(Mutex::new(JoinSet::new())),
        }
    }

    #[must_use]
    pub const fn config(&self) -> &SessionConfig {
        &self.config
    }

    #[must_use]
    pub const fn dispatcher(&self) -> &Dispatcher {
        &self.dispatcher
    }

    /// Open a session for `owner` and arm its inactivity watchdog.
    ///
    /// A second start while a session is live leaves the existing one alone
    /// and sends the owner a notice.
    pub async fn start_session(&self, owner: &OwnerId) -> Result<Uuid, ConversationError> {
        let Some(session) = self.registry.open(owner, self.config.history_limit).await else {
            info!("Rejected session start for {owner}: already active");
            egress(owner, "notify", self.platform.notify(owner, ALREADY_ACTIVE_TEXT).await);
            return Err(ConversationError::SessionAlreadyActive(owner.clone()));
        };

        info!("Session {} started for {owner}", session.id);
        self.spawn_watchdog(owner.clone(), session.id);
        egress(owner, "notify", self.platform.notify(owner, SESSION_STARTED_TEXT).await);
        Ok(session.id)
    }

    /// Close `owner`'s session on request.
    pub async fn end_session(&self, owner: &OwnerId) -> Result<(), ConversationError> {
        let Some(session) = self.registry.take(owner, None).await else {
            egress(owner, "notify", self.platform.notify(owner, NO_SESSION_TEXT).await);
            return Err(ConversationError::NoActiveSession(owner.clone()));
        };

        self.close(session, CloseReason::Ended).await;
        Ok(())
    }

    /// Record `text`, run it through the dispatcher and deliver the reply.
    ///
    /// Upstream failures are reported to the owner as an apology and returned.
    pub async fn handle_message(&self, owner: &OwnerId, text: &str) -> Result<(), ConversationError> {
        let Some(appended) = self.registry.append(owner, Message::user(text)).await else {
            debug!("Message from {owner} without an active session");
            egress(owner, "notify", self.platform.notify(owner, NO_SESSION_TEXT).await);
            return Err(ConversationError::NoActiveSession(owner.clone()));
        };

        let request = PendingRequest::new(owner.clone(), text).with_history(appended.prior);
        match self.dispatcher.submit(request).await {
            Ok(reply) => {
                if !self
                    .registry
                    .append_to(owner, appended.session_id, Message::assistant(reply.clone()))
                    .await
                {
                    debug!("Session {} closed before its reply arrived", appended.session_id);
                }
                egress(owner, "deliver", self.platform.deliver(owner, &reply).await);
                Ok(())
            }
            Err(e) => {
                error!("Request from {owner} failed: {e}");
                egress(owner, "notify_error", self.platform.notify_error(owner).await);
                Err(e.into())
            }
        }
    }

    pub async fn session_snapshot(&self, owner: &OwnerId) -> Option<ConversationSession> {
        self.registry.snapshot(owner).await
    }

    pub async fn active_sessions(&self) -> Vec<OwnerId> {
        self.registry.owners().await
    }

    /// Close every live session and wait for all pending flushes.
    pub async fn shutdown(&self) {
        for owner in self.registry.owners().await {
            if let Some(session) = self.registry.take(&owner, None).await {
                self.close(session, CloseReason::Shutdown).await;
            }
        }
        self.wait_for_flushes().await;
    }

    /// Wait for every background flush started so far.
    pub async fn wait_for_flushes(&self) {
        let mut pending = std::mem::take(&mut *self.flushes.lock().await);
        while let Some(joined) = pending.join_next().await {
            if let Err(e) = joined {
                error!("Flush task aborted: {e}");
            }
        }
    }

    fn spawn_watchdog(&self, owner: OwnerId, session_id: Uuid) {
        let manager = self.clone();
        tokio::spawn(async move {
            manager.watch(owner, session_id).await;
        });
    }

    /// Sleeps until the session's idle deadline. Activity pushes the
    /// deadline out; a closed or replaced session ends the watch.
    async fn watch(&self, owner: OwnerId, session_id: Uuid) {
        let timeout = self.config.inactivity_timeout;
        let mut wake_at = Instant::now() + timeout;
        loop {
            sleep_until(wake_at).await;

            let Some(deadline) = self.registry.deadline(&owner, session_id, timeout).await else {
                debug!("Watchdog for session {session_id} stopping: session closed");
                return;
            };

            if deadline > Instant::now() {
                wake_at = deadline;
                continue;
            }

            if let Some(session) = self.registry.take(&owner, Some(session_id)).await {
                info!("Session {session_id} for {owner} expired after inactivity");
                self.close(session, CloseReason::Expired).await;
            }
            return;
        }
    }

    /// Hand history to the store, then tear down the platform channel.
    async fn close(&self, mut session: ConversationSession, reason: CloseReason) {
        let owner = session.owner_id.clone();
        let session_id = session.id;
        debug_assert_eq!(session.state, SessionState::Ending);

        let history = session.history().to_vec();
        if history.is_empty() {
            debug!("Session {session_id} closed with no history");
        } else {
            let store = self.store.clone();
            let owner = owner.clone();
            let mut flushes = self.flushes.lock().await;
            reap_finished(&mut flushes);
            flushes.spawn(async move {
                match store.flush(&owner, &history).await {
                    Ok(ids) => info!(
                        "Flushed session {session_id} for {owner}: {} messages in {} segments",
                        history.len(),
                        ids.len()
                    ),
                    Err(e) => error!("Failed to flush session {session_id} for {owner}: {e}"),
                }
            });
        }

        let notice = match reason {
            CloseReason::Ended => Some(SESSION_ENDED_TEXT),
            CloseReason::Expired => Some(SESSION_EXPIRED_TEXT),
            CloseReason::Shutdown => None,
        };
        if let Some(text) = notice {
            egress(&owner, "notify", self.platform.notify(&owner, text).await);
        }
        egress(
            &owner,
            "close_session_channel",
            self.platform.close_session_channel(&owner).await,
        );

        session.state = SessionState::Closed;
        info!("Session {session_id} for {owner} closed ({reason:?})");
    }
}

/// Drop flush tasks that have already completed.
fn reap_finished(flushes: &mut JoinSet<()>) {
    while let Some(joined) = flushes.try_join_next() {
        if let Err(e) = joined {
            error!("Flush task aborted: {e}");
        }
    }
}

/// Platform egress failures never propagate.
fn egress(owner: &OwnerId, operation: &str, result: Result<(), PlatformError>) {
    match result {
        Ok(()) => {}
        Err(PlatformError::ChannelGone(_)) => {
            warn!("Channel for {owner} is gone, dropping {operation}");
        }
        Err(e) => error!("Platform {operation} for {owner} failed: {e}"),
    }
}
