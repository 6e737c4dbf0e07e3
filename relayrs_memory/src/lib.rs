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
    clippy::missing_errors_doc,
    clippy::cast_precision_loss,
    clippy::cast_possible_truncation
)]

//! Long-term memory for conversations.
//!
//! Finished sessions are cut into fixed-size segments and written to disk,
//! one JSON record per segment. Each segment is also embedded and upserted
//! into a vector index so later requests can pull in related history.

mod augment;
pub mod index;
mod scoring;
mod segment;
mod store;

pub use augment::{SemanticAugmenter, SemanticIndex};
pub use index::{InMemoryVectorIndex, PineconeIndex};
pub use scoring::cosine_similarity;
pub use segment::{ChatLogSegment, partition};
pub use store::{ChatLogStore, SegmentIndexer, StoreConfig, StoreError};
