//! Semantic retrieval over flushed chat log segments.

use async_trait::async_trait;
use relayrs_core::{
    EmbeddingProvider, Message, OwnerId, RETRIEVAL_TOP_K, ScoredId, VectorIndex, sanitize_text,
};
use std::sync::Arc;
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::segment::ChatLogSegment;
use crate::store::{ChatLogStore, SegmentIndexer};

/// Embedding plus vector index, namespaced per owner.
pub struct SemanticIndex {
    embedder: Arc<dyn EmbeddingProvider>,
    index: Arc<dyn VectorIndex>,
}

impl SemanticIndex {
    pub fn new(embedder: Arc<dyn EmbeddingProvider>, index: Arc<dyn VectorIndex>) -> Self {
        Self { embedder, index }
    }

    /// Embed `text` after stripping non-portable characters.
    pub async fn embed(&self, text: &str) -> anyhow::Result<Vec<f32>> {
        self.embedder.embed(&sanitize_text(text)).await
    }

    /// Upsert a segment vector. Repeating the call with the same id is a no-op.
    pub async fn index(
        &self,
        owner: &OwnerId,
        segment_id: &Uuid,
        vector: &[f32],
    ) -> anyhow::Result<()> {
        self.index
            .upsert(&segment_id.to_string(), vector, owner.as_str())
            .await
    }

    /// Segment ids most similar to `query`, best first.
    pub async fn retrieve(
        &self,
        owner: &OwnerId,
        query: &str,
        top_k: usize,
    ) -> anyhow::Result<Vec<ScoredId>> {
        let vector = self.embed(query).await?;
        self.index.query(&vector, top_k, owner.as_str()).await
    }
}

#[async_trait]
impl SegmentIndexer for SemanticIndex {
    async fn index_segment(&self, segment: &ChatLogSegment) -> anyhow::Result<()> {
        let vector = self.embed(&segment.transcript()).await?;
        self.index(&segment.owner_id, &segment.segment_id, &vector)
            .await?;
        debug!("Indexed segment {}", segment.segment_id);
        Ok(())
    }
}

/// Pulls related segments out of long-term memory and merges them with the
/// recent history of a session.
pub struct SemanticAugmenter {
    index: Arc<SemanticIndex>,
    store: Arc<ChatLogStore>,
    top_k: usize,
}

impl SemanticAugmenter {
    pub fn new(index: Arc<SemanticIndex>, store: Arc<ChatLogStore>) -> Self {
        Self {
            index,
            store,
            top_k: RETRIEVAL_TOP_K,
        }
    }

    #[must_use]
    pub const fn with_top_k(mut self, top_k: usize) -> Self {
        self.top_k = top_k;
        self
    }

    pub async fn retrieve(&self, owner: &OwnerId, query: &str) -> anyhow::Result<Vec<ScoredId>> {
        self.index.retrieve(owner, query, self.top_k).await
    }

    /// Retrieved messages followed by `recent`.
    ///
    /// Retrieval is best-effort: on any failure the recent history is
    /// returned unchanged.
    pub async fn augment(&self, owner: &OwnerId, recent: &[Message], query: &str) -> Vec<Message> {
        let matches = match self.retrieve(owner, query).await {
            Ok(matches) => matches,
            Err(e) => {
                warn!("Retrieval failed for {owner}, using recent history only: {e}");
                return recent.to_vec();
            }
        };

        let ids: Vec<Uuid> = matches
            .iter()
            .filter_map(|m| Uuid::parse_str(&m.id).ok())
            .collect();
        if ids.is_empty() {
            return recent.to_vec();
        }

        // Best match first; a segment that cannot be read is skipped.
        let mut retrieved = Vec::new();
        for id in &ids {
            match self.store.read_segment(owner, id).await {
                Ok(segment) => retrieved.extend(segment.messages),
                Err(e) => warn!("Skipping retrieved segment {id} for {owner}: {e}"),
            }
        }

        info!(
            "Augmenting context for {owner}: {} retrieved messages from {} segments",
            retrieved.len(),
            ids.len()
        );

        let mut context = retrieved;
        context.extend_from_slice(recent);
        context
    }
}
