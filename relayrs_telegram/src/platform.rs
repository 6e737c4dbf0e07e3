//! Session egress over the Bot API. Owners are Telegram chat ids.

use async_trait::async_trait;
use relayrs_core::{ChatPlatform, OwnerId, PlatformError, util::APOLOGY_TEXT};
use teloxide::prelude::*;
use teloxide::{ApiError, RequestError};
use tracing::debug;

#[derive(Clone)]
pub struct TelegramPlatform {
    bot: Bot,
}

impl TelegramPlatform {
    #[must_use]
    pub const fn new(bot: Bot) -> Self {
        Self { bot }
    }

    async fn send(&self, owner: &OwnerId, text: &str) -> Result<(), PlatformError> {
        let chat_id = chat_id(owner)?;
        self.bot
            .send_message(chat_id, text)
            .await
            .map(|_| ())
            .map_err(|e| classify(owner, e))
    }
}

/// Chat id encoded in `owner`. Anything unparseable cannot be reached.
fn chat_id(owner: &OwnerId) -> Result<ChatId, PlatformError> {
    owner
        .as_str()
        .parse::<i64>()
        .map(ChatId)
        .map_err(|_| PlatformError::ChannelGone(owner.clone()))
}

fn classify(owner: &OwnerId, error: RequestError) -> PlatformError {
    match error {
        RequestError::Api(
            ApiError::BotBlocked
            | ApiError::ChatNotFound
            | ApiError::UserDeactivated
            | ApiError::BotKicked,
        ) => PlatformError::ChannelGone(owner.clone()),
        other => PlatformError::Other(other.into()),
    }
}

#[async_trait]
impl ChatPlatform for TelegramPlatform {
    async fn deliver(&self, owner: &OwnerId, text: &str) -> Result<(), PlatformError> {
        self.send(owner, text).await
    }

    async fn notify(&self, owner: &OwnerId, text: &str) -> Result<(), PlatformError> {
        self.send(owner, text).await
    }

    async fn notify_error(&self, owner: &OwnerId) -> Result<(), PlatformError> {
        self.send(owner, APOLOGY_TEXT).await
    }

    /// Telegram chats outlive sessions; there is nothing to tear down beyond
    /// checking that the chat id is still addressable.
    async fn close_session_channel(&self, owner: &OwnerId) -> Result<(), PlatformError> {
        chat_id(owner)?;
        debug!("Session channel for {owner} released");
        Ok(())
    }
}
