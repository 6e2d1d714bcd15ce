//! # Personal Brain
//!
//! A personal knowledge backend. Notes ("memories") are always persisted to
//! SQLite; when vector credentials are configured they are also chunked,
//! embedded and upserted into the owner's namespace of a Pinecone index so
//! they can be found by semantic search.
//!
//! ## Architecture
//!
//! ```text
//! ┌──────────┐   ┌───────────┐   ┌──────────┐
//! │  Cookie  │──▶│  Ingest   │──▶│  SQLite  │   (always)
//! │  auth    │   │ pipeline  │   └──────────┘
//! └──────────┘   │           │   ┌──────────┐   ┌──────────┐
//!                │           │──▶│ Embedder │──▶│ Pinecone │   (best effort)
//!                └───────────┘   └──────────┘   └──────────┘
//! ```
//!
//! The pipeline, chunker and traits live in `brain-core`; this crate holds
//! the concrete SQLite, HTTP and auth implementations plus the server and CLI.
//!
//! ## Modules
//!
//! | Module | Purpose |
//! |--------|---------|
//! | [`config`] | TOML settings and environment secrets |
//! | [`auth`] | Supabase and signed-cookie session verifiers |
//! | [`sqlite_store`] | SQLite `MemoryStore` |
//! | [`embedding`] | OpenAI-compatible embedding client |
//! | [`pinecone`] | Pinecone `VectorIndex` client |
//! | [`server`] | axum HTTP API |
//! | [`db`] | Database connection |
//! | [`migrate`] | Schema migrations |
//! | [`logging`] | tracing subscriber setup |

pub mod auth;
pub mod chunk_cmd;
pub mod config;
pub mod db;
pub mod embedding;
pub mod logging;
pub mod memories;
pub mod migrate;
pub mod pinecone;
pub mod server;
pub mod sqlite_store;
