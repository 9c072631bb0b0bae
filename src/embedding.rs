//! Embedding provider abstraction and the Workers AI implementation.
//!
//! Every provider returns one vector per input text, in input order, and
//! every vector must have exactly [`Embedder::dims`] components. A response
//! that breaks either rule is an error rather than something to patch up,
//! since a mis-sized vector would corrupt the index.

use anyhow::{bail, Result};
use async_trait::async_trait;
use serde_json::{json, Value};
use std::sync::Arc;

use crate::cloudflare::CloudflareClient;
use crate::config::Config;

/// Trait for embedding providers.
#[async_trait]
pub trait Embedder: Send + Sync {
    /// Returns the model identifier (e.g. `"@cf/baai/bge-large-en-v1.5"`).
    fn model_name(&self) -> &str;
    /// Returns the embedding vector dimensionality (e.g. `1024`).
    fn dims(&self) -> usize;
    /// Embed a batch of texts. The output is aligned with `texts` by index.
    async fn embed(&self, texts: &[String]) -> Result<Vec<Vec<f32>>>;
}

/// Embed a single query text.
///
/// Convenience wrapper around [`Embedder::embed`] with a one-element batch.
pub async fn embed_query(embedder: &dyn Embedder, text: &str) -> Result<Vec<f32>> {
    let results = embedder.embed(&[text.to_string()]).await?;
    results
        .into_iter()
        .next()
        .ok_or_else(|| anyhow::anyhow!("Empty embedding response"))
}

/// Embedding provider backed by a Workers AI text-embedding model.
///
/// Calls `POST /accounts/{id}/ai/run/{model}` with `{"text": [...]}`.
pub struct WorkersAiEmbedder {
    client: CloudflareClient,
    model: String,
    dims: usize,
}

impl WorkersAiEmbedder {
    pub fn new(client: CloudflareClient, model: impl Into<String>, dims: usize) -> Self {
        Self {
            client,
            model: model.into(),
            dims,
        }
    }
}

#[async_trait]
impl Embedder for WorkersAiEmbedder {
    fn model_name(&self) -> &str {
        &self.model
    }

    fn dims(&self) -> usize {
        self.dims
    }

    async fn embed(&self, texts: &[String]) -> Result<Vec<Vec<f32>>> {
        let result = self
            .client
            .run_model(&self.model, &json!({ "text": texts }))
            .await?;
        let vectors = parse_embedding_result(&result)?;

        if vectors.len() != texts.len() {
            bail!(
                "embedding count mismatch: sent {} texts, got {} vectors",
                texts.len(),
                vectors.len()
            );
        }
        check_dimensions(&vectors, self.dims)?;

        Ok(vectors)
    }
}

/// Parse the `result` of a Workers AI embedding call.
///
/// Expects `{"shape": [n, d], "data": [[...], ...]}`; `data` rows are in
/// input order.
pub fn parse_embedding_result(result: &Value) -> Result<Vec<Vec<f32>>> {
    let data = result
        .get("data")
        .and_then(Value::as_array)
        .ok_or_else(|| anyhow::anyhow!("Invalid embedding response: missing data array"))?;

    let mut embeddings = Vec::with_capacity(data.len());

    for row in data {
        let row = row
            .as_array()
            .ok_or_else(|| anyhow::anyhow!("Invalid embedding response: row is not an array"))?;

        let vec = row
            .iter()
            .map(|v| {
                v.as_f64()
                    .map(|f| f as f32)
                    .ok_or_else(|| anyhow::anyhow!("Invalid embedding response: non-numeric value"))
            })
            .collect::<Result<Vec<f32>>>()?;

        embeddings.push(vec);
    }

    Ok(embeddings)
}

/// Fail if any vector does not have exactly `dims` components.
pub fn check_dimensions(vectors: &[Vec<f32>], dims: usize) -> Result<()> {
    for (i, v) in vectors.iter().enumerate() {
        if v.len() != dims {
            bail!(
                "dimension mismatch: expected {}, got {} (vector {})",
                dims,
                v.len(),
                i
            );
        }
    }
    Ok(())
}

/// Create the configured embedder.
pub fn create_embedder(config: &Config, client: CloudflareClient) -> Arc<dyn Embedder> {
    Arc::new(WorkersAiEmbedder::new(
        client,
        config.models.embedding.clone(),
        config.vector_store.dims,
    ))
}

/// Compute cosine similarity between two embedding vectors.
///
/// Returns a value in `[-1.0, 1.0]`:
/// - `1.0` = identical direction
/// - `0.0` = orthogonal (unrelated)
/// - `-1.0` = opposite direction
///
/// Returns `0.0` for empty vectors or vectors of different lengths.
pub fn cosine_similarity(a: &[f32], b: &[f32]) -> f32 {
    if a.len() != b.len() || a.is_empty() {
        return 0.0;
    }

    let mut dot = 0.0f32;
    let mut norm_a = 0.0f32;
    let mut norm_b = 0.0f32;

    for (x, y) in a.iter().zip(b.iter()) {
        dot += x * y;
        norm_a += x * x;
        norm_b += y * y;
    }

    let denom = norm_a.sqrt() * norm_b.sqrt();
    if denom < f32::EPSILON {
        return 0.0;
    }

    dot / denom
}
