//! Seed document set for ingestion.
//!
//! The built-in sample describes this project itself. A TOML file with
//! `[[documents]]` entries replaces it when `documents.path` is set:
//!
//! ```toml
//! [[documents]]
//! id = "p1"
//! text = "..."
//! ```

use anyhow::{bail, Context, Result};
use serde::Deserialize;
use std::collections::HashSet;
use std::path::Path;
use std::sync::Arc;

use crate::config::Config;
use crate::models::Document;

/// The four built-in sample documents.
pub fn sample_documents() -> Vec<Document> {
    vec![
        Document::new(
            "p1",
            "This project is an AI-powered application built for a Cloudflare assignment.",
        ),
        Document::new(
            "p2",
            "The application uses Cloudflare Agents, Workers AI, Durable Objects, and Vectorize.",
        ),
        Document::new(
            "p3",
            "The main LLM is Llama 3.3 and the embedding model is 'bge-large-en-v1.5'.",
        ),
        Document::new(
            "p4",
            "The repository for this project is 'cf_ai_rag_chatbot' and includes a README.md and PROMPTS.md.",
        ),
    ]
}

#[derive(Deserialize)]
struct DocumentFile {
    #[serde(default)]
    documents: Vec<Document>,
}

/// Load the configured document set, falling back to [`sample_documents`].
pub fn load_documents(config: &Config) -> Result<Arc<[Document]>> {
    let docs = match &config.documents.path {
        Some(path) => read_document_file(path)?,
        None => sample_documents(),
    };
    check_unique_ids(&docs)?;
    Ok(docs.into())
}

fn read_document_file(path: &Path) -> Result<Vec<Document>> {
    let content = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read documents file: {}", path.display()))?;
    let file: DocumentFile = toml::from_str(&content)
        .with_context(|| format!("Failed to parse documents file: {}", path.display()))?;
    Ok(file.documents)
}

fn check_unique_ids(docs: &[Document]) -> Result<()> {
    let mut seen = HashSet::new();
    for doc in docs {
        if doc.id.is_empty() {
            bail!("document ids must not be empty");
        }
        if !seen.insert(doc.id.as_str()) {
            bail!("duplicate document id: {}", doc.id);
        }
    }
    Ok(())
}
