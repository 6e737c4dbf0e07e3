//! Interactive console session.
//!
//! The terminal acts as the chat platform: replies and notices are printed,
//! and `/start`, `/end` and `/quit` drive the session lifecycle.

use async_trait::async_trait;
use relayrs_config::Config;
use relayrs_core::{ChatPlatform, OwnerId, PlatformError, util::APOLOGY_TEXT};
use std::io::Write;
use std::sync::Arc;
use tokio::io::{AsyncBufReadExt, BufReader};
use tracing::{debug, info};

use super::build_manager;

/// Prints session egress to stdout.
#[derive(Debug, Clone, Copy, Default)]
pub struct ConsolePlatform;

#[async_trait]
impl ChatPlatform for ConsolePlatform {
    async fn deliver(&self, _owner: &OwnerId, text: &str) -> Result<(), PlatformError> {
        println!("🤖 {text}");
        Ok(())
    }

    async fn notify(&self, _owner: &OwnerId, text: &str) -> Result<(), PlatformError> {
        println!("ℹ️  {text}");
        Ok(())
    }

    async fn notify_error(&self, _owner: &OwnerId) -> Result<(), PlatformError> {
        println!("⚠️  {APOLOGY_TEXT}");
        Ok(())
    }

    async fn close_session_channel(&self, owner: &OwnerId) -> Result<(), PlatformError> {
        debug!("Console session for {owner} closed");
        Ok(())
    }
}

/// Input parameters for the Chat command strategy.
#[derive(Debug, Clone)]
pub struct ChatInput {
    /// Owner the session belongs to
    pub owner: String,
    /// Optional single message to send (non-interactive mode)
    pub message: Option<String>,
    /// Optional permit pool size override
    pub capacity: Option<usize>,
}

#[derive(Debug, Clone, Copy)]
pub struct ChatStrategy;

impl super::CommandStrategy for ChatStrategy {
    type Input = ChatInput;

    async fn execute(&self, input: Self::Input) -> anyhow::Result<()> {
        let config = Config::load()?;
        let manager = build_manager(&config, Arc::new(ConsolePlatform), input.capacity)?;
        let owner = OwnerId::new(input.owner);

        info!("Starting console session for {owner}");
        let _ = manager.start_session(&owner).await;

        if let Some(message) = input.message {
            let _ = manager.handle_message(&owner, &message).await;
            manager.shutdown().await;
            return Ok(());
        }

        println!("Type a message, /end to close the session, /start to open a new one, /quit to exit.");
        let mut lines = BufReader::new(tokio::io::stdin()).lines();
        loop {
            print!("> ");
            std::io::stdout().flush()?;

            let Some(line) = lines.next_line().await? else {
                break;
            };
            let line = line.trim();
            match line {
                "" => {}
                "/quit" | "/exit" => break,
                "/start" => {
                    let _ = manager.start_session(&owner).await;
                }
                "/end" => {
                    let _ = manager.end_session(&owner).await;
                }
                text => {
                    // Failures have already been reported through the platform.
                    let _ = manager.handle_message(&owner, text).await;
                }
            }
        }

        manager.shutdown().await;
        info!("Console session finished");
        Ok(())
    }
}
