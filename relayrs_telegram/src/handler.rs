use crate::{Command, Error, Result, TelegramBot};
use relayrs_conversation::ConversationError;
use relayrs_core::OwnerId;
use teloxide::{requests::Requester, types::Message};
use tracing::{debug, info, warn};

/// Handle bot commands
pub async fn handle_command(bot: TelegramBot, msg: Message, cmd: Command) -> Result<()> {
    let owner = OwnerId::from(msg.chat.id.0);
    let username = username(&msg);

    let outcome = match cmd {
        Command::Start => {
            info!("[@{username}] Command: /start");
            bot.manager.start_session(&owner).await.map(|_| ())
        }
        Command::End => {
            info!("[@{username}] Command: /end");
            bot.manager.end_session(&owner).await
        }
        Command::Help => {
            info!("[@{username}] Command: /help");
            bot.bot
                .send_message(msg.chat.id, Command::help_text())
                .await?;
            Ok(())
        }
    };

    settle(&owner, outcome)
}

/// Handle any message (commands or regular text)
pub async fn handle_message(bot: TelegramBot, msg: Message) -> Result<()> {
    let chat_id = msg.chat.id.0;
    if !bot.is_allowed(chat_id) {
        warn!("Ignoring message from unauthorized chat {chat_id}");
        return Err(Error::Unauthorized(chat_id));
    }

    let Some(text) = msg.text() else {
        debug!("Ignoring non-text message in chat {chat_id}");
        return Ok(());
    };

    if let Some(cmd) = Command::parse_from_text(text) {
        return handle_command(bot, msg, cmd).await;
    }

    let username = username(&msg);
    info!("[@{username}] Message: {text}");

    bot.bot
        .send_chat_action(msg.chat.id, teloxide::types::ChatAction::Typing)
        .await?;

    let owner = OwnerId::from(chat_id);
    let outcome = bot.manager.handle_message(&owner, text).await;
    settle(&owner, outcome)
}

fn username(msg: &Message) -> &str {
    msg.from
        .as_ref()
        .and_then(|u| u.username.as_deref())
        .unwrap_or("unknown")
}

/// The manager has already told the user about these; only log them.
fn settle(owner: &OwnerId, outcome: std::result::Result<(), ConversationError>) -> Result<()> {
    match outcome {
        Ok(()) => Ok(()),
        Err(
            e @ (ConversationError::SessionAlreadyActive(_)
            | ConversationError::NoActiveSession(_)),
        ) => {
            debug!("{e}");
            Ok(())
        }
        Err(ConversationError::Dispatch(e)) => {
            warn!("Request for {owner} ended without a reply: {e}");
            Ok(())
        }
    }
}
