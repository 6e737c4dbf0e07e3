use crate::command::{CommandStrategy, build_manager};
use relayrs_config::Config;
use relayrs_telegram::{TelegramBot, TelegramPlatform};
use std::sync::Arc;
use teloxide::Bot;
use tracing::info;

/// Input for Telegram bot command.
pub struct TelegramInput {
    /// Optional bot token (overrides config)
    pub token: Option<String>,
    /// Optional allowed chat IDs (overrides config)
    pub allow_from: Option<Vec<String>>,
    /// Optional permit pool size override
    pub capacity: Option<usize>,
}

/// Strategy for running Telegram bot.
pub struct TelegramStrategy;

impl CommandStrategy for TelegramStrategy {
    type Input = TelegramInput;

    async fn execute(&self, input: Self::Input) -> anyhow::Result<()> {
        let config = Config::load()?;

        if !config.telegram.enabled && input.token.is_none() {
            anyhow::bail!("Telegram is not enabled in config. Set \"telegram.enabled\": true");
        }

        // Get token from input or config
        let token = match input.token.or_else(|| config.telegram.token.clone()) {
            Some(t) if !t.trim().is_empty() => t,
            _ => anyhow::bail!(
                "Telegram bot token not configured. Set \"telegram.token\" in config"
            ),
        };

        // Get allowed chats from input or config
        let allow_from = input
            .allow_from
            .unwrap_or_else(|| config.telegram.allow_from.clone());

        info!("Starting Telegram bot...");

        let bot = Bot::new(token);
        let platform = Arc::new(TelegramPlatform::new(bot.clone()));
        let manager = build_manager(&config, platform, input.capacity)?;

        let bot = TelegramBot::new(bot, manager, &allow_from);

        info!("Telegram bot is running. Press Ctrl+C to stop.");
        bot.run().await?;

        Ok(())
    }
}
