//! # Brain Core
//!
//! Runtime-agnostic logic for Personal Brain: data models, the recursive
//! text chunker, storage / vector index / embedding / session traits,
//! in-memory implementations of those traits, the ingest pipeline and
//! semantic search.
//!
//! This crate contains no tokio, sqlx or HTTP code. Concrete backends
//! (SQLite, Pinecone, OpenAI-compatible embeddings, Supabase sessions)
//! live in the `personal-brain` app crate.

pub mod chunk;
pub mod embedding;
pub mod index;
pub mod ingest;
pub mod models;
pub mod search;
pub mod session;
pub mod store;
