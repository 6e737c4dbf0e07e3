#![warn(
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

//! Per-owner conversation sessions.
//!
//! # Key Features
//! - One live session per owner, history bounded to the last K messages
//! - Inactivity watchdog per session, re-armed by activity
//! - History flushed to the chat log store when a session closes
//! - Completion handler that augments context from long-term memory

mod handler;
mod history;
mod manager;
mod registry;
mod session;

pub use handler::{CompletionHandler, CompletionParams};
pub use history::ContextBuilder;
pub use manager::{
    ALREADY_ACTIVE_TEXT, ConversationError, ConversationManager, NO_SESSION_TEXT,
    SESSION_ENDED_TEXT, SESSION_EXPIRED_TEXT, SESSION_STARTED_TEXT, SessionConfig,
};
pub use registry::{Appended, SessionRegistry};
pub use session::{ConversationSession, SessionState};
