//! Error taxonomy for the chat and ingestion paths.
//!
//! Only [`RetrievalError`] is ever absorbed (the agent substitutes a
//! placeholder context); everything else reaches the caller.

use thiserror::Error;

/// Embedding or vector-query failure during a chat turn.
#[derive(Debug, Error)]
pub enum RetrievalError {
    #[error("query embedding failed: {0:#}")]
    Embedding(anyhow::Error),
    #[error("vector query failed: {0:#}")]
    Query(anyhow::Error),
}

/// Failure of a chat turn.
#[derive(Debug, Error)]
pub enum ChatError {
    /// The chat model call failed before any output was produced.
    #[error("generation failed: {0:#}")]
    Generation(anyhow::Error),
    /// The stream broke after output had started.
    #[error("stream interrupted: {0}")]
    Stream(String),
    #[error("request cancelled")]
    Cancelled,
    /// The conversation store could not be read or written.
    #[error("conversation store failed: {0:#}")]
    History(anyhow::Error),
}

/// Failure of an ingestion run. No partial success is reported.
#[derive(Debug, Error)]
pub enum IngestError {
    #[error("embedding documents failed: {0:#}")]
    Embedding(anyhow::Error),
    #[error("vector insert failed: {0:#}")]
    Insert(anyhow::Error),
    #[error("embedding service returned {got} vectors for {expected} documents")]
    CountMismatch { expected: usize, got: usize },
    #[error("document '{id}' has dimension {got}, index expects {expected}")]
    Dimension {
        id: String,
        expected: usize,
        got: usize,
    },
}

/// Request did not resolve to a chat session.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum RoutingError {
    #[error("unknown agent: {0}")]
    UnknownAgent(String),
    #[error("invalid session name: {0:?}")]
    InvalidName(String),
}
