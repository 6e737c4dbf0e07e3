use teloxide::types::BotCommand;

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Command {
    Start,
    End,
    Help,
}

impl Command {
    fn all() -> Vec<BotCommand> {
        vec![
            BotCommand {
                command: "start".to_string(),
                description: "Start a new session".to_string(),
            },
            BotCommand {
                command: "end".to_string(),
                description: "End the current session".to_string(),
            },
            BotCommand {
                command: "help".to_string(),
                description: "Show help".to_string(),
            },
        ]
    }

    #[must_use]
    pub fn bot_commands() -> Vec<BotCommand> {
        Self::all()
    }

    #[must_use]
    pub fn parse_from_text(text: &str) -> Option<Self> {
        let text = text.trim().to_lowercase();

        // Remove bot mention if present (e.g., "/start@my_bot")
        let command = text.split('@').next().unwrap_or(&text);

        match command {
            "/start" => Some(Self::Start),
            "/end" => Some(Self::End),
            "/help" => Some(Self::Help),
            _ => None,
        }
    }

    #[must_use]
    pub const fn help_text() -> &'static str {
        r"
🤖 relayrs

Commands:
/start - Start a new session
/end   - End the current session
/help  - Show this help

Sessions close on their own after a period of inactivity.
Earlier sessions are remembered and recalled when relevant.
"
    }
}
