#![deny(
    clippy::all,
    clippy::nursery,
    clippy::pedantic,
    clippy::style,
    clippy::complexity,
    clippy::perf,
    clippy::correctness,
    clippy::suspicious,
    clippy::unwrap_used,
    clippy::expect_used
)]
#![allow(
    clippy::similar_names,
    clippy::missing_safety_doc,
    clippy::missing_panics_doc,
    clippy::missing_errors_doc
)]

mod command;

use clap::{Parser, Subcommand};
use command::{
    ChatInput, ChatStrategy, CommandStrategy, HistoryInput, HistoryStrategy, InitStrategy,
    TelegramInput, TelegramStrategy, VersionStrategy,
};
use tracing_subscriber::EnvFilter;
use uuid::Uuid;

#[derive(Parser)]
#[command(name = "relayrs")]
#[command(about = "Chat relay to a hosted language model with long-term memory", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Serve a Telegram bot
    Telegram {
        /// Bot token (overrides config)
        #[arg(short, long)]
        token: Option<String>,

        /// Allowed chat IDs, comma separated (overrides config)
        #[arg(short, long, value_delimiter = ',')]
        allow_from: Option<Vec<String>>,

        /// Maximum upstream calls in flight (overrides config)
        #[arg(short, long)]
        capacity: Option<usize>,
    },
    /// Chat in the terminal
    Chat {
        /// Session owner
        #[arg(short, long, default_value = "console")]
        owner: String,

        /// Single message to send
        #[arg(short, long)]
        message: Option<String>,

        /// Maximum upstream calls in flight (overrides config)
        #[arg(short, long)]
        capacity: Option<usize>,
    },
    /// Print an owner's stored history
    History {
        /// Session owner
        #[arg(short, long, default_value = "console")]
        owner: String,

        /// Segment ids to read (defaults to the most recent)
        #[arg(short, long, value_delimiter = ',')]
        segments: Vec<Uuid>,
    },
    /// Initialize configuration
    Init,
    /// Show version
    Version,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let cli = Cli::parse();

    match cli.command {
        Commands::Telegram {
            token,
            allow_from,
            capacity,
        } => {
            TelegramStrategy
                .execute(TelegramInput {
                    token,
                    allow_from,
                    capacity,
                })
                .await
        }
        Commands::Chat {
            owner,
            message,
            capacity,
        } => {
            ChatStrategy
                .execute(ChatInput {
                    owner,
                    message,
                    capacity,
                })
                .await
        }
        Commands::History { owner, segments } => {
            HistoryStrategy
                .execute(HistoryInput { owner, segments })
                .await
        }
        Commands::Init => InitStrategy.execute(()).await,
        Commands::Version => VersionStrategy.execute(()).await,
    }
}
