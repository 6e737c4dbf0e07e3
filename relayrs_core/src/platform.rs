//! Egress towards the chat platform.

use async_trait::async_trait;
use thiserror::Error;

use crate::OwnerId;

#[derive(Debug, Error)]
pub enum PlatformError {
    /// The chat, thread or channel the message was meant for no longer exists.
    #[error("channel for {0} is gone")]
    ChannelGone(crate::OwnerId),

    #[error("platform error: {0}")]
    Other(#[from] anyhow::Error),
}

/// Outbound operations the conversation layer performs on the platform.
#[async_trait]
pub trait ChatPlatform: Send + Sync {
    /// Deliver an assistant reply.
    async fn deliver(&self, owner: &OwnerId, text: &str) -> Result<(), PlatformError>;

    /// Show an informational notice (not a reply).
    async fn notify(&self, owner: &OwnerId, text: &str) -> Result<(), PlatformError>;

    /// Tell the user their request failed.
    async fn notify_error(&self, owner: &OwnerId) -> Result<(), PlatformError>;

    /// Tear down the thread or channel that hosted the session.
    async fn close_session_channel(&self, owner: &OwnerId) -> Result<(), PlatformError>;
}
