//! Vector index abstraction.
//!
//! The [`VectorStore`] trait covers the two operations the service needs:
//! a batch insert (ingestion) and a top-K nearest-neighbour query (chat).
//!
//! | Provider | Type | Use |
//! |----------|------|-----|
//! | `vectorize` | [`VectorizeStore`] | Cloudflare Vectorize v2 index |
//! | `memory` | [`memory::InMemoryVectorStore`] | Local runs and tests |

pub mod memory;

use anyhow::{bail, Context, Result};
use async_trait::async_trait;
use serde::Deserialize;
use serde_json::json;
use std::sync::Arc;

use crate::cloudflare::CloudflareClient;
use crate::config::Config;
use crate::models::{QueryMatch, VectorRecord};

/// Abstract vector index.
///
/// Query results are ordered by descending relevance and hold at most
/// `top_k` matches. Callers treat that order as authoritative.
#[async_trait]
pub trait VectorStore: Send + Sync {
    /// Insert a batch of records in one call.
    async fn insert(&self, records: &[VectorRecord]) -> Result<()>;

    /// Return the `top_k` nearest records to `vector`.
    async fn query(
        &self,
        vector: &[f32],
        top_k: usize,
        include_metadata: bool,
    ) -> Result<Vec<QueryMatch>>;
}

/// Vectorize v2 index accessed over the REST API.
pub struct VectorizeStore {
    client: CloudflareClient,
    index: String,
}

#[derive(Deserialize)]
struct QueryResult {
    #[serde(default)]
    matches: Vec<QueryMatch>,
}

impl VectorizeStore {
    pub fn new(client: CloudflareClient, index: impl Into<String>) -> Self {
        Self {
            client,
            index: index.into(),
        }
    }

    fn index_path(&self, op: &str) -> String {
        format!("vectorize/v2/indexes/{}/{}", self.index, op)
    }
}

/// Encode records as newline-delimited JSON, one record per line.
pub fn records_to_ndjson(records: &[VectorRecord]) -> Result<String> {
    let mut body = String::new();
    for record in records {
        body.push_str(&serde_json::to_string(record)?);
        body.push('\n');
    }
    Ok(body)
}

#[async_trait]
impl VectorStore for VectorizeStore {
    async fn insert(&self, records: &[VectorRecord]) -> Result<()> {
        let body = records_to_ndjson(records)?;
        let result = self
            .client
            .post_ndjson(&self.index_path("insert"), body)
            .await?;
        tracing::debug!(index = %self.index, ?result, "vectorize insert accepted");
        Ok(())
    }

    async fn query(
        &self,
        vector: &[f32],
        top_k: usize,
        include_metadata: bool,
    ) -> Result<Vec<QueryMatch>> {
        let body = json!({
            "vector": vector,
            "topK": top_k,
            "returnValues": false,
            "returnMetadata": if include_metadata { "all" } else { "none" },
        });
        let result = self.client.post_json(&self.index_path("query"), &body).await?;
        let parsed: QueryResult =
            serde_json::from_value(result).context("Invalid Vectorize query response")?;

        let mut matches = parsed.matches;
        matches.truncate(top_k);
        Ok(matches)
    }
}

/// Create the configured vector store.
pub fn create_vector_store(config: &Config, client: CloudflareClient) -> Result<Arc<dyn VectorStore>> {
    match config.vector_store.provider.as_str() {
        "memory" => Ok(Arc::new(memory::InMemoryVectorStore::new(
            config.vector_store.dims,
        ))),
        "vectorize" => {
            let index = config
                .vector_store
                .index
                .clone()
                .ok_or_else(|| anyhow::anyhow!("vector_store.index required for Vectorize"))?;
            Ok(Arc::new(VectorizeStore::new(client, index)))
        }
        other => bail!("Unknown vector store provider: {}", other),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::VectorMetadata;

    #[test]
    fn test_ndjson_one_line_per_record() {
        let records = vec![
            VectorRecord {
                id: "p1".into(),
                values: vec![0.5, 1.0],
                metadata: VectorMetadata {
                    text: Some("first".into()),
                },
            },
            VectorRecord {
                id: "p2".into(),
                values: vec![-1.0, 0.0],
                metadata: VectorMetadata {
                    text: Some("second\nline".into()),
                },
            },
        ];
        let body = records_to_ndjson(&records).unwrap();
        let lines: Vec<&str> = body.lines().collect();
        assert_eq!(lines.len(), 2);

        let first: serde_json::Value = serde_json::from_str(lines[0]).unwrap();
        assert_eq!(
            first,
            json!({"id": "p1", "values": [0.5, 1.0], "metadata": {"text": "first"}})
        );
        let second: VectorRecord = serde_json::from_str(lines[1]).unwrap();
        assert_eq!(second, records[1]);
    }

    #[test]
    fn test_query_result_tolerates_missing_metadata() {
        let parsed: QueryResult = serde_json::from_value(json!({
            "count": 2,
            "matches": [
                {"id": "p3", "score": 0.91, "metadata": {"text": "The main LLM is Llama 3.3..."}},
                {"id": "p9", "score": 0.40}
            ]
        }))
        .unwrap();
        assert_eq!(parsed.matches.len(), 2);
        assert_eq!(parsed.matches[0].text(), Some("The main LLM is Llama 3.3..."));
        assert!(parsed.matches[1].metadata.is_none());
    }

    #[test]
    fn test_create_memory_store() {
        let cfg = Config::minimal();
        let client = CloudflareClient::with_token(&cfg.cloudflare, "t").unwrap();
        assert!(create_vector_store(&cfg, client).is_ok());
    }
}
