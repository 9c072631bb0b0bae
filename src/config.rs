//! TOML configuration parsing and validation.
//!
//! Every section except `[cloudflare]` has defaults, so a minimal config
//! only needs an account id:
//!
//! ```toml
//! [cloudflare]
//! account_id = "0123456789abcdef"
//! ```

use anyhow::{bail, Context, Result};
use serde::Deserialize;
use std::path::{Path, PathBuf};

#[derive(Debug, Deserialize, Clone)]
pub struct Config {
    #[serde(default)]
    pub server: ServerConfig,
    pub cloudflare: CloudflareConfig,
    #[serde(default)]
    pub models: ModelsConfig,
    #[serde(default)]
    pub vector_store: VectorStoreConfig,
    #[serde(default)]
    pub retrieval: RetrievalConfig,
    #[serde(default)]
    pub documents: DocumentsConfig,
}

#[derive(Debug, Deserialize, Clone)]
pub struct ServerConfig {
    #[serde(default = "default_bind")]
    pub bind: String,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind: default_bind(),
        }
    }
}

fn default_bind() -> String {
    "127.0.0.1:8787".to_string()
}

/// Account binding for Workers AI and Vectorize.
#[derive(Debug, Deserialize, Clone)]
pub struct CloudflareConfig {
    pub account_id: String,
    /// Inline API token. Takes precedence over `api_token_env` unless empty.
    #[serde(default)]
    pub api_token: Option<String>,
    #[serde(default = "default_api_token_env")]
    pub api_token_env: String,
    #[serde(default = "default_base_url")]
    pub base_url: String,
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,
}

fn default_api_token_env() -> String {
    "CLOUDFLARE_API_TOKEN".to_string()
}
fn default_base_url() -> String {
    "https://api.cloudflare.com/client/v4".to_string()
}
fn default_timeout_secs() -> u64 {
    60
}

impl CloudflareConfig {
    /// Resolve the API token from config or the environment.
    pub fn resolve_token(&self) -> Result<String> {
        if let Some(token) = self.api_token.as_deref().filter(|t| !t.is_empty()) {
            return Ok(token.to_string());
        }
        std::env::var(&self.api_token_env).with_context(|| {
            format!(
                "{} environment variable not set and cloudflare.api_token is empty",
                self.api_token_env
            )
        })
    }
}

#[derive(Debug, Deserialize, Clone)]
pub struct ModelsConfig {
    #[serde(default = "default_embedding_model")]
    pub embedding: String,
    #[serde(default = "default_chat_model")]
    pub chat: String,
    #[serde(default = "default_diagnostic_model")]
    pub diagnostic: String,
}

impl Default for ModelsConfig {
    fn default() -> Self {
        Self {
            embedding: default_embedding_model(),
            chat: default_chat_model(),
            diagnostic: default_diagnostic_model(),
        }
    }
}

fn default_embedding_model() -> String {
    "@cf/baai/bge-large-en-v1.5".to_string()
}
fn default_chat_model() -> String {
    "@cf/meta/llama-3.3-70b-instruct-fp8-fast".to_string()
}
fn default_diagnostic_model() -> String {
    "@cf/meta/llama-3.1-8b-instruct".to_string()
}

#[derive(Debug, Deserialize, Clone)]
pub struct VectorStoreConfig {
    /// `"vectorize"` or `"memory"`.
    #[serde(default = "default_store_provider")]
    pub provider: String,
    #[serde(default = "default_index")]
    pub index: Option<String>,
    #[serde(default = "default_dims")]
    pub dims: usize,
}

impl Default for VectorStoreConfig {
    fn default() -> Self {
        Self {
            provider: default_store_provider(),
            index: default_index(),
            dims: default_dims(),
        }
    }
}

fn default_store_provider() -> String {
    "vectorize".to_string()
}
fn default_index() -> Option<String> {
    Some("rag-chatbot".to_string())
}
fn default_dims() -> usize {
    1024
}

#[derive(Debug, Deserialize, Clone)]
pub struct RetrievalConfig {
    #[serde(default = "default_top_k")]
    pub top_k: usize,
}

impl Default for RetrievalConfig {
    fn default() -> Self {
        Self {
            top_k: default_top_k(),
        }
    }
}

fn default_top_k() -> usize {
    3
}

/// Seed document source. Without a path the built-in sample set is used.
#[derive(Debug, Deserialize, Clone, Default)]
pub struct DocumentsConfig {
    #[serde(default)]
    pub path: Option<PathBuf>,
}

impl Config {
    /// Local-only configuration: in-memory vector store and default models.
    pub fn minimal() -> Self {
        Self {
            server: ServerConfig::default(),
            cloudflare: CloudflareConfig {
                account_id: "local".to_string(),
                api_token: None,
                api_token_env: default_api_token_env(),
                base_url: default_base_url(),
                timeout_secs: default_timeout_secs(),
            },
            models: ModelsConfig::default(),
            vector_store: VectorStoreConfig {
                provider: "memory".to_string(),
                index: None,
                dims: default_dims(),
            },
            retrieval: RetrievalConfig::default(),
            documents: DocumentsConfig::default(),
        }
    }

    pub fn validate(&self) -> Result<()> {
        if self.cloudflare.account_id.trim().is_empty() {
            bail!("cloudflare.account_id must not be empty");
        }

        if self.vector_store.dims == 0 {
            bail!("vector_store.dims must be > 0");
        }

        if self.retrieval.top_k < 1 {
            bail!("retrieval.top_k must be >= 1");
        }

        match self.vector_store.provider.as_str() {
            "memory" => {}
            "vectorize" => {
                if self.vector_store.index.as_deref().map_or(true, str::is_empty) {
                    bail!("vector_store.index must be specified when provider is 'vectorize'");
                }
            }
            other => bail!(
                "Unknown vector store provider: '{}'. Must be vectorize or memory.",
                other
            ),
        }

        Ok(())
    }
}

pub fn load_config(path: &Path) -> Result<Config> {
    let content = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read config file: {}", path.display()))?;

    let config: Config = toml::from_str(&content).with_context(|| "Failed to parse config file")?;
    config.validate()?;

    Ok(config)
}
