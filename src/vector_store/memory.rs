//! In-memory [`VectorStore`] for local runs and tests.
//!
//! Records live in a `Vec` behind `std::sync::RwLock`. Queries are
//! brute-force cosine similarity over every stored vector. Inserting an id
//! that already exists replaces the earlier record.

use anyhow::{bail, Result};
use async_trait::async_trait;
use std::sync::RwLock;

use crate::embedding::cosine_similarity;
use crate::models::{QueryMatch, VectorRecord};

use super::VectorStore;

pub struct InMemoryVectorStore {
    dims: usize,
    records: RwLock<Vec<VectorRecord>>,
}

impl InMemoryVectorStore {
    pub fn new(dims: usize) -> Self {
        Self {
            dims,
            records: RwLock::new(Vec::new()),
        }
    }

    pub fn len(&self) -> usize {
        self.records.read().map(|r| r.len()).unwrap_or(0)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Snapshot of the stored records, in insertion order.
    pub fn records(&self) -> Vec<VectorRecord> {
        self.records.read().map(|r| r.clone()).unwrap_or_default()
    }
}

#[async_trait]
impl VectorStore for InMemoryVectorStore {
    async fn insert(&self, records: &[VectorRecord]) -> Result<()> {
        // Validate the whole batch before touching the index.
        for record in records {
            if record.values.len() != self.dims {
                bail!(
                    "dimension mismatch for '{}': expected {}, got {}",
                    record.id,
                    self.dims,
                    record.values.len()
                );
            }
        }

        let mut stored = self
            .records
            .write()
            .map_err(|_| anyhow::anyhow!("vector store lock poisoned"))?;
        for record in records {
            stored.retain(|r| r.id != record.id);
            stored.push(record.clone());
        }
        Ok(())
    }

    async fn query(
        &self,
        vector: &[f32],
        top_k: usize,
        include_metadata: bool,
    ) -> Result<Vec<QueryMatch>> {
        if vector.len() != self.dims {
            bail!(
                "query dimension mismatch: expected {}, got {}",
                self.dims,
                vector.len()
            );
        }

        let stored = self
            .records
            .read()
            .map_err(|_| anyhow::anyhow!("vector store lock poisoned"))?;
        let mut matches: Vec<QueryMatch> = stored
            .iter()
            .map(|r| QueryMatch {
                id: r.id.clone(),
                score: cosine_similarity(vector, &r.values),
                metadata: include_metadata.then(|| r.metadata.clone()),
            })
            .collect();
        matches.sort_by(|a, b| {
            b.score
                .partial_cmp(&a.score)
                .unwrap_or(std::cmp::Ordering::Equal)
        });
        matches.truncate(top_k);
        Ok(matches)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::VectorMetadata;

    fn record(id: &str, values: Vec<f32>) -> VectorRecord {
        VectorRecord {
            id: id.to_string(),
            values,
            metadata: VectorMetadata {
                text: Some(format!("text of {}", id)),
            },
        }
    }

    #[tokio::test]
    async fn test_query_ranks_by_similarity() {
        let store = InMemoryVectorStore::new(2);
        store
            .insert(&[
                record("east", vec![1.0, 0.0]),
                record("north", vec![0.0, 1.0]),
                record("northeast", vec![1.0, 1.0]),
            ])
            .await
            .unwrap();

        let matches = store.query(&[1.0, 0.1], 2, true).await.unwrap();
        let ids: Vec<&str> = matches.iter().map(|m| m.id.as_str()).collect();
        assert_eq!(ids, ["east", "northeast"]);
        assert_eq!(matches[0].text(), Some("text of east"));
    }

    #[tokio::test]
    async fn test_query_without_metadata() {
        let store = InMemoryVectorStore::new(2);
        store.insert(&[record("a", vec![1.0, 0.0])]).await.unwrap();
        let matches = store.query(&[1.0, 0.0], 3, false).await.unwrap();
        assert_eq!(matches.len(), 1);
        assert!(matches[0].metadata.is_none());
    }

    #[tokio::test]
    async fn test_bad_dimension_rejects_whole_batch() {
        let store = InMemoryVectorStore::new(3);
        let err = store
            .insert(&[record("ok", vec![1.0, 0.0, 0.0]), record("bad", vec![1.0])])
            .await
            .unwrap_err();
        assert!(err.to_string().contains("bad"));
        assert!(store.is_empty());
    }

    #[tokio::test]
    async fn test_reinsert_replaces_by_id() {
        let store = InMemoryVectorStore::new(2);
        store.insert(&[record("a", vec![1.0, 0.0])]).await.unwrap();
        store.insert(&[record("a", vec![0.0, 1.0])]).await.unwrap();
        assert_eq!(store.len(), 1);
        assert_eq!(store.records()[0].values, vec![0.0, 1.0]);
    }

    #[tokio::test]
    async fn test_query_dimension_checked() {
        let store = InMemoryVectorStore::new(2);
        assert!(store.query(&[1.0, 0.0, 0.0], 3, true).await.is_err());
    }

    #[tokio::test]
    async fn test_empty_store_returns_no_matches() {
        let store = InMemoryVectorStore::new(2);
        assert!(store.query(&[1.0, 0.0], 3, true).await.unwrap().is_empty());
    }
}
