use async_trait::async_trait;
use relayrs_core::{ScoredId, VectorIndex};
use reqwest::Client;
use serde::Deserialize;
use serde_json::json;
use tracing::debug;

/// Client for a Pinecone-compatible REST index.
#[derive(Clone)]
pub struct PineconeIndex {
    client: Client,
    host: String,
    api_key: String,
}

#[derive(Debug, Deserialize)]
struct QueryResponse {
    #[serde(default)]
    matches: Vec<QueryMatch>,
}

#[derive(Debug, Deserialize)]
struct QueryMatch {
    id: String,
    #[serde(default)]
    score: f64,
}

impl PineconeIndex {
    pub fn new(host: String, api_key: String) -> Self {
        Self {
            client: Client::new(),
            host: host.trim_end_matches('/').to_string(),
            api_key,
        }
    }
}

#[async_trait]
impl VectorIndex for PineconeIndex {
    async fn upsert(&self, id: &str, vector: &[f32], namespace: &str) -> anyhow::Result<()> {
        self.client
            .post(format!("{}/vectors/upsert", self.host))
            .header("Api-Key", &self.api_key)
            .json(&json!({
                "vectors": [{ "id": id, "values": vector }],
                "namespace": namespace,
            }))
            .send()
            .await?
            .error_for_status()?;

        debug!("Upserted vector {id} into namespace {namespace}");
        Ok(())
    }

    async fn query(
        &self,
        vector: &[f32],
        top_k: usize,
        namespace: &str,
    ) -> anyhow::Result<Vec<ScoredId>> {
        let response = self
            .client
            .post(format!("{}/query", self.host))
            .header("Api-Key", &self.api_key)
            .json(&json!({
                "vector": vector,
                "topK": top_k,
                "namespace": namespace,
                "includeValues": false,
                "includeMetadata": false,
            }))
            .send()
            .await?
            .error_for_status()?
            .json::<QueryResponse>()
            .await?;

        let mut matches: Vec<ScoredId> = response
            .matches
            .into_iter()
            .map(|m| ScoredId {
                id: m.id,
                score: m.score,
            })
            .collect();
        // Stable sort keeps the service's order among equal scores.
        matches.sort_by(|a, b| b.score.total_cmp(&a.score));
        matches.truncate(top_k);
        Ok(matches)
    }
}
