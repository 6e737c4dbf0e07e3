use async_trait::async_trait;
use serde::{Deserialize, Serialize};

/// One nearest-neighbour match returned by a [`VectorIndex`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ScoredId {
    pub id: String,
    pub score: f64,
}

/// A namespaced nearest-neighbour store.
///
/// `upsert` must be idempotent per id: writing the same id twice leaves the
/// index in the same queryable state as writing it once.
#[async_trait]
pub trait VectorIndex: Send + Sync {
    async fn upsert(&self, id: &str, vector: &[f32], namespace: &str) -> anyhow::Result<()>;

    /// Return up to `top_k` matches ordered by descending score.
    async fn query(
        &self,
        vector: &[f32],
        top_k: usize,
        namespace: &str,
    ) -> anyhow::Result<Vec<ScoredId>>;
}
