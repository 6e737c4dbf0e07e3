//! Vector index backends.

mod pinecone;

use async_trait::async_trait;
use relayrs_core::{ScoredId, VectorIndex};
use std::collections::HashMap;
use tokio::sync::RwLock;

use crate::scoring::cosine_similarity;

pub use pinecone::PineconeIndex;

/// Process-local index with brute-force cosine search.
///
/// Ties are broken by ascending id.
#[derive(Default)]
pub struct InMemoryVectorIndex {
    namespaces: RwLock<HashMap<String, HashMap<String, Vec<f32>>>>,
}

impl InMemoryVectorIndex {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of vectors stored under `namespace`.
    pub async fn len(&self, namespace: &str) -> usize {
        self.namespaces
            .read()
            .await
            .get(namespace)
            .map_or(0, HashMap::len)
    }
}

#[async_trait]
impl VectorIndex for InMemoryVectorIndex {
    async fn upsert(&self, id: &str, vector: &[f32], namespace: &str) -> anyhow::Result<()> {
        self.namespaces
            .write()
            .await
            .entry(namespace.to_string())
            .or_default()
            .insert(id.to_string(), vector.to_vec());
        Ok(())
    }

    async fn query(
        &self,
        vector: &[f32],
        top_k: usize,
        namespace: &str,
    ) -> anyhow::Result<Vec<ScoredId>> {
        let namespaces = self.namespaces.read().await;
        let Some(entries) = namespaces.get(namespace) else {
            return Ok(Vec::new());
        };

        let mut matches: Vec<ScoredId> = entries
            .iter()
            .map(|(id, stored)| ScoredId {
                id: id.clone(),
                score: cosine_similarity(vector, stored),
            })
            .collect();

        matches.sort_by(|a, b| b.score.total_cmp(&a.score).then_with(|| a.id.cmp(&b.id)));
        matches.truncate(top_k);
        Ok(matches)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn query_ranks_by_descending_similarity() {
        let index = InMemoryVectorIndex::new();
        index.upsert("far", &[0.0, 1.0], "alice").await.unwrap();
        index.upsert("near", &[1.0, 0.1], "alice").await.unwrap();
        index.upsert("exact", &[1.0, 0.0], "alice").await.unwrap();

        let matches = index.query(&[1.0, 0.0], 2, "alice").await.unwrap();
        let ids: Vec<&str> = matches.iter().map(|m| m.id.as_str()).collect();
        assert_eq!(ids, vec!["exact", "near"]);
        assert!(matches[0].score >= matches[1].score);
    }

    #[tokio::test]
    async fn namespaces_are_isolated() {
        let index = InMemoryVectorIndex::new();
        index.upsert("a", &[1.0, 0.0], "alice").await.unwrap();
        index.upsert("b", &[1.0, 0.0], "bob").await.unwrap();

        let matches = index.query(&[1.0, 0.0], 8, "alice").await.unwrap();
        assert_eq!(matches.len(), 1);
        assert_eq!(matches[0].id, "a");
        assert!(index.query(&[1.0, 0.0], 8, "carol").await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn upsert_is_idempotent() {
        let once = InMemoryVectorIndex::new();
        once.upsert("seg", &[0.3, 0.7], "alice").await.unwrap();
        once.upsert("other", &[0.9, 0.1], "alice").await.unwrap();

        let twice = InMemoryVectorIndex::new();
        twice.upsert("seg", &[0.3, 0.7], "alice").await.unwrap();
        twice.upsert("seg", &[0.3, 0.7], "alice").await.unwrap();
        twice.upsert("other", &[0.9, 0.1], "alice").await.unwrap();

        assert_eq!(once.len("alice").await, twice.len("alice").await);
        let query = [0.5, 0.5];
        assert_eq!(
            once.query(&query, 8, "alice").await.unwrap(),
            twice.query(&query, 8, "alice").await.unwrap()
        );
    }

    #[tokio::test]
    async fn ties_break_by_id() {
        let index = InMemoryVectorIndex::new();
        index.upsert("b", &[1.0, 0.0], "alice").await.unwrap();
        index.upsert("a", &[2.0, 0.0], "alice").await.unwrap();

        let matches = index.query(&[1.0, 0.0], 8, "alice").await.unwrap();
        let ids: Vec<&str> = matches.iter().map(|m| m.id.as_str()).collect();
        assert_eq!(ids, vec!["a", "b"]);
    }
}
