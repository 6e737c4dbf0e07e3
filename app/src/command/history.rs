use relayrs_config::Config;
use relayrs_core::OwnerId;
use uuid::Uuid;

use super::open_store;

/// Input parameters for the History command strategy.
#[derive(Debug, Clone)]
pub struct HistoryInput {
    /// Owner whose chat logs are read
    pub owner: String,
    /// Specific segments to read; the most recent ones when empty
    pub segments: Vec<Uuid>,
}

/// Prints an owner's reconstructed history from the chat log store.
#[derive(Debug, Clone, Copy)]
pub struct HistoryStrategy;

impl super::CommandStrategy for HistoryStrategy {
    type Input = HistoryInput;

    async fn execute(&self, input: Self::Input) -> anyhow::Result<()> {
        let config = Config::load()?;
        let store = open_store(&config)?;
        let owner = OwnerId::new(input.owner);

        let selection = (!input.segments.is_empty()).then_some(input.segments.as_slice());
        let messages = store.load(&owner, selection).await?;

        if messages.is_empty() {
            println!("No stored history for {owner}");
            return Ok(());
        }

        for message in &messages {
            println!(
                "[{}] {}: {}",
                message.timestamp.format("%Y-%m-%d %H:%M:%S"),
                message.role,
                message.content
            );
        }
        println!();
        println!("{} messages", messages.len());
        Ok(())
    }
}
