//! Ingestion: embed the seed documents and write them to the vector index.
//!
//! ```text
//! documents ──▶ one batched embed call ──▶ zip by index ──▶ one batch insert
//! ```
//!
//! The run is all-or-nothing from the caller's point of view: any failure
//! is reported as an [`IngestError`] and no count is returned. Nothing is
//! retried.

use anyhow::Result;
use serde::Serialize;

use crate::config::Config;
use crate::embedding::Embedder;
use crate::error::IngestError;
use crate::models::{Document, VectorMetadata, VectorRecord};
use crate::services::Services;
use crate::vector_store::VectorStore;

/// Outcome of a successful ingestion.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct IngestReport {
    pub count: usize,
}

impl IngestReport {
    pub fn message(&self) -> String {
        format!("Successfully ingested {} documents.", self.count)
    }
}

/// Embed `documents` and insert them into `store`.
pub async fn ingest(
    documents: &[Document],
    embedder: &dyn Embedder,
    store: &dyn VectorStore,
) -> Result<IngestReport, IngestError> {
    if documents.is_empty() {
        return Ok(IngestReport { count: 0 });
    }

    let texts: Vec<String> = documents.iter().map(|d| d.text.clone()).collect();
    let vectors = embedder.embed(&texts).await.map_err(IngestError::Embedding)?;

    let records = build_records(documents, vectors, embedder.dims())?;
    store.insert(&records).await.map_err(IngestError::Insert)?;

    tracing::info!(
        count = records.len(),
        model = embedder.model_name(),
        "ingested documents"
    );
    Ok(IngestReport {
        count: records.len(),
    })
}

/// Pair each document with the vector at the same index.
///
/// Fails if the counts differ or any vector has the wrong dimension.
pub fn build_records(
    documents: &[Document],
    vectors: Vec<Vec<f32>>,
    dims: usize,
) -> Result<Vec<VectorRecord>, IngestError> {
    if vectors.len() != documents.len() {
        return Err(IngestError::CountMismatch {
            expected: documents.len(),
            got: vectors.len(),
        });
    }

    documents
        .iter()
        .zip(vectors)
        .map(|(doc, values)| {
            if values.len() != dims {
                return Err(IngestError::Dimension {
                    id: doc.id.clone(),
                    expected: dims,
                    got: values.len(),
                });
            }
            Ok(VectorRecord {
                id: doc.id.clone(),
                values,
                metadata: VectorMetadata {
                    text: Some(doc.text.clone()),
                },
            })
        })
        .collect()
}

/// CLI entry point for `ragbot ingest`.
pub async fn run_ingest(config: &Config) -> Result<()> {
    let services = Services::from_config(config)?;

    if config.vector_store.provider == "memory" {
        println!("note: vector_store.provider = \"memory\"; records are lost when this command exits");
    }

    let report = ingest(
        &services.documents,
        services.embedder.as_ref(),
        services.store.as_ref(),
    )
    .await?;

    println!("ingest");
    println!("  model: {}", config.models.embedding);
    println!("  documents: {}", report.count);
    println!("{}", report.message());
    Ok(())
}
