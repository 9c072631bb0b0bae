//! # ragbot
//!
//! A retrieval-augmented chat service built from three hosted
//! collaborators: an embedding model, a vector index, and a chat model.
//!
//! ## Architecture
//!
//! ```text
//!   ingest:  documents ──▶ embed (batch) ──▶ vector insert
//!
//!   chat:    user text ──▶ embed ──▶ vector query ──▶ system prompt
//!                                                        │
//!            caller ◀── SSE ◀── chat model (stream) ◀────┘
//! ```
//!
//! ## Quick Start
//!
//! ```bash
//! ragbot ingest                              # embed and index the seed documents
//! ragbot ask "What LLM does this use?"       # one-shot question
//! ragbot serve                               # start the HTTP server
//! ```
//!
//! ## Modules
//!
//! | Module | Purpose |
//! |--------|---------|
//! | [`config`] | TOML configuration parsing |
//! | [`models`] | Core data types |
//! | [`documents`] | Seed document set |
//! | [`cloudflare`] | REST client for Workers AI and Vectorize |
//! | [`embedding`] | Embedding provider abstraction |
//! | [`vector_store`] | Vector index abstraction |
//! | [`llm`] | Chat model abstraction and streaming |
//! | [`ingest`] | Ingestion handler |
//! | [`agent`] | Retrieval-augmented chat agent |
//! | [`session`] | Conversation sessions |
//! | [`router`] | Session routing |
//! | [`server`] | HTTP server |

pub mod agent;
pub mod cloudflare;
pub mod config;
pub mod documents;
pub mod embedding;
pub mod error;
pub mod ingest;
pub mod llm;
pub mod models;
pub mod router;
pub mod server;
pub mod services;
pub mod session;
pub mod vector_store;
