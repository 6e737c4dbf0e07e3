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

//! Admission-controlled request dispatch.
//!
//! Requests enter a bounded FIFO queue and are executed in batches. Each
//! batch takes at most as many requests as there are free permits, runs them
//! concurrently, and waits for all of them before the next batch starts.
//! Completion order inside a batch is not guaranteed.

mod dispatcher;
mod request;
mod stats;

pub use dispatcher::{DispatchLoop, Dispatcher, DispatcherConfig, RequestHandler};
pub use request::{DispatchError, PendingRequest, ResultHandle};
pub use stats::{DispatchStats, DispatchStatsSnapshot};
