use chrono::{DateTime, Utc};
use relayrs_core::{Message, OwnerId};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// An immutable slice of a session's history, persisted as one record.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ChatLogSegment {
    pub segment_id: Uuid,
    pub owner_id: OwnerId,
    /// Capture time of the flush that produced this segment.
    pub timestamp: DateTime<Utc>,
    /// Position of the segment within its flush.
    #[serde(default)]
    pub sequence: usize,
    pub messages: Vec<Message>,
}

impl ChatLogSegment {
    /// Plain-text rendering used as embedding input.
    #[must_use]
    pub fn transcript(&self) -> String {
        self.messages
            .iter()
            .map(|m| format!("{}: {}", m.role, m.content))
            .collect::<Vec<_>>()
            .join("\n")
    }

    /// Ordering key: capture time first, then position within the flush.
    #[must_use]
    pub const fn order_key(&self) -> (DateTime<Utc>, usize) {
        (self.timestamp, self.sequence)
    }
}

/// Cut `history` into consecutive segments of at most `size` messages.
///
/// All segments share one capture timestamp and get fresh identifiers.
/// A `size` of zero is treated as one.
#[must_use]
pub fn partition(owner: &OwnerId, history: &[Message], size: usize) -> Vec<ChatLogSegment> {
    let timestamp = Utc::now();
    history
        .chunks(size.max(1))
        .enumerate()
        .map(|(sequence, chunk)| ChatLogSegment {
            segment_id: Uuid::now_v7(),
            owner_id: owner.clone(),
            timestamp,
            sequence,
            messages: chunk.to_vec(),
        })
        .collect()
}
