//! Wiring of the external collaborators from configuration.

use anyhow::Result;
use std::sync::Arc;

use crate::agent::ChatAgent;
use crate::cloudflare::CloudflareClient;
use crate::config::Config;
use crate::documents::load_documents;
use crate::embedding::{create_embedder, Embedder};
use crate::llm::{ChatModel, WorkersAiChat};
use crate::models::Document;
use crate::vector_store::{create_vector_store, VectorStore};

/// Everything a request handler or CLI command needs.
#[derive(Clone)]
pub struct Services {
    pub documents: Arc<[Document]>,
    pub embedder: Arc<dyn Embedder>,
    pub store: Arc<dyn VectorStore>,
    pub chat: Arc<dyn ChatModel>,
    /// Small model used by the diagnostic prompt.
    pub diagnostic: Arc<dyn ChatModel>,
    pub top_k: usize,
}

impl Services {
    pub fn from_config(config: &Config) -> Result<Self> {
        let client = CloudflareClient::new(&config.cloudflare)?;
        Self::with_client(config, client)
    }

    /// Like [`from_config`](Self::from_config) with an already-built client.
    pub fn with_client(config: &Config, client: CloudflareClient) -> Result<Self> {
        Ok(Self {
            documents: load_documents(config)?,
            embedder: create_embedder(config, client.clone()),
            store: create_vector_store(config, client.clone())?,
            chat: Arc::new(WorkersAiChat::new(client.clone(), config.models.chat.clone())),
            diagnostic: Arc::new(WorkersAiChat::new(client, config.models.diagnostic.clone())),
            top_k: config.retrieval.top_k,
        })
    }

    pub fn agent(&self) -> ChatAgent {
        ChatAgent::new(
            self.embedder.clone(),
            self.store.clone(),
            self.chat.clone(),
            self.top_k,
        )
    }
}
