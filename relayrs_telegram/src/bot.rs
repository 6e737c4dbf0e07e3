use relayrs_conversation::ConversationManager;
use std::time::Duration;
use teloxide::prelude::*;
use tokio::time::sleep;
use tracing::{info, warn};

use crate::{Command, Result};

/// Telegram ingress bound to a conversation manager.
#[derive(Clone)]
pub struct TelegramBot {
    /// Teloxide bot instance
    pub bot: Bot,
    /// Session manager receiving every chat event
    pub manager: ConversationManager,
    /// Allowed chat IDs; empty allows everyone
    allowed_chats: Vec<i64>,
}

impl TelegramBot {
    /// Entries of `allow_from` that are not chat ids are ignored.
    #[must_use]
    pub fn new(bot: Bot, manager: ConversationManager, allow_from: &[String]) -> Self {
        let allowed_chats = parse_allowed_chats(allow_from);
        if allowed_chats.len() < allow_from.len() {
            warn!(
                "Ignoring {} allow_from entries that are not chat ids",
                allow_from.len() - allowed_chats.len()
            );
        }

        Self {
            bot,
            manager,
            allowed_chats,
        }
    }

    /// Check if a chat is allowed
    #[must_use]
    pub fn is_allowed(&self, chat_id: i64) -> bool {
        chat_allowed(&self.allowed_chats, chat_id)
    }

    /// Test connection to Telegram API, retrying with a growing delay.
    /// Starts at 2s, increases by 2s each attempt, max 10s delay.
    async fn test_connection(&self) -> Result<()> {
        const INITIAL_DELAY_SECS: u64 = 2;
        const MAX_DELAY_SECS: u64 = 10;

        let mut attempt = 1u64;
        loop {
            match self.bot.get_me().await {
                Ok(bot_user) => {
                    info!(
                        "Connected to Telegram API: @{} (id: {})",
                        bot_user
                            .user
                            .username
                            .unwrap_or_else(|| "no username".to_string()),
                        bot_user.user.id
                    );
                    return Ok(());
                }
                Err(e) => {
                    let delay_secs = (INITIAL_DELAY_SECS * attempt).min(MAX_DELAY_SECS);

                    warn!("Connection attempt {attempt} failed: {e}. Retrying in {delay_secs}s...");

                    if attempt == 1 {
                        warn!("This may be due to:");
                        warn!("  - Network connectivity issues");
                        warn!("  - Firewall blocking api.telegram.org");
                        warn!("  - Invalid bot token");
                        warn!("  - Proxy or VPN configuration required");
                    }

                    sleep(Duration::from_secs(delay_secs)).await;
                    attempt += 1;
                }
            }
        }
    }

    /// Serve updates until Ctrl-C, then close every open session.
    pub async fn run(self) -> Result<()> {
        use teloxide::dispatching::{Dispatcher, UpdateFilterExt};
        use teloxide::dptree;
        use teloxide::types::Update;

        self.test_connection().await?;

        if let Err(e) = self.bot.set_my_commands(Command::bot_commands()).await {
            warn!("Failed to register bot commands: {e}");
        }

        let bot = self.bot.clone();
        let manager = self.manager.clone();

        let schema = dptree::entry().branch(Update::filter_message().endpoint({
            let bot_clone = self.clone();
            move |_bot: Bot, msg: teloxide::types::Message| {
                let bot_clone = bot_clone.clone();
                async move { crate::handler::handle_message(bot_clone, msg).await }
            }
        }));

        Dispatcher::builder(bot, schema)
            .enable_ctrlc_handler()
            .build()
            .dispatch()
            .await;

        info!("Telegram dispatcher stopped, closing sessions");
        manager.shutdown().await;

        Ok(())
    }
}

fn parse_allowed_chats(allow_from: &[String]) -> Vec<i64> {
    allow_from
        .iter()
        .filter_map(|s| s.trim().parse::<i64>().ok())
        .collect()
}

fn chat_allowed(allowed_chats: &[i64], chat_id: i64) -> bool {
    allowed_chats.is_empty() || allowed_chats.contains(&chat_id)
}
