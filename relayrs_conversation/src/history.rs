//! Assembling the message list sent upstream.

use relayrs_core::{ChatMessage, Message, Role};

/// Builds `system prompt + history + new user message` contexts.
#[derive(Debug, Clone, Default)]
pub struct ContextBuilder {
    system_prompt: Option<String>,
}

impl ContextBuilder {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// An empty or whitespace-only prompt is ignored.
    #[must_use]
    pub fn with_system_prompt(mut self, prompt: impl Into<String>) -> Self {
        let prompt = prompt.into();
        self.system_prompt = (!prompt.trim().is_empty()).then_some(prompt);
        self
    }

    #[must_use]
    pub fn system_prompt(&self) -> Option<&str> {
        self.system_prompt.as_deref()
    }

    #[must_use]
    pub fn build(&self, history: &[Message], user_input: &str) -> Vec<ChatMessage> {
        let mut messages = Vec::with_capacity(history.len() + 2);

        if let Some(prompt) = &self.system_prompt {
            messages.push(ChatMessage {
                role: Role::System,
                content: prompt.clone(),
            });
        }

        messages.extend(history.iter().map(ChatMessage::from));

        messages.push(ChatMessage {
            role: Role::User,
            content: user_input.to_string(),
        });

        messages
    }
}
