//! Core data models shared by the ingest and retrieval flows.
//!
//! [`MemoryRecord`] is the authoritative copy of a note and lives in the
//! relational store. [`Chunk`] and [`VectorEntry`] are derived from it
//! during ingest and only ever reference it by id.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// Free-form JSON object attached to records, chunks and vectors.
pub type Metadata = Map<String, Value>;

/// Metadata key holding the parent record id on chunks and vectors.
pub const NOTE_ID_KEY: &str = "noteId";
/// Metadata key holding the owner id on chunks and vectors.
pub const USER_ID_KEY: &str = "userId";
/// Metadata key holding the chunk text on vectors.
pub const TEXT_KEY: &str = "text";

/// A note as stored in the relational store.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MemoryRecord {
    pub id: String,
    pub user_id: String,
    pub content: String,
    pub metadata: Metadata,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl MemoryRecord {
    /// The `title` metadata entry, when it is a string.
    pub fn title(&self) -> Option<&str> {
        self.metadata.get("title").and_then(Value::as_str)
    }
}

/// Input to [`MemoryStore::insert`](crate::store::MemoryStore::insert).
#[derive(Debug, Clone)]
pub struct NewMemory {
    pub user_id: String,
    pub content: String,
    pub metadata: Metadata,
}

/// An authenticated user, as resolved from a session.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Identity {
    pub user_id: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub email: Option<String>,
}

impl Identity {
    pub fn new(user_id: impl Into<String>) -> Self {
        Self {
            user_id: user_id.into(),
            email: None,
        }
    }
}

/// A bounded slice of a record's content, ready for embedding.
///
/// `metadata` is the parent record's metadata plus [`NOTE_ID_KEY`],
/// [`USER_ID_KEY`] and a `loc.lines` span.
#[derive(Debug, Clone, PartialEq)]
pub struct Chunk {
    pub index: usize,
    pub text: String,
    /// SHA-256 of `text`, hex encoded.
    pub hash: String,
    pub metadata: Metadata,
}

/// An embedded chunk as written to the vector index.
#[derive(Debug, Clone, PartialEq)]
pub struct VectorEntry {
    pub id: String,
    pub values: Vec<f32>,
    pub metadata: Metadata,
}

/// A vector index match.
#[derive(Debug, Clone, PartialEq)]
pub struct ScoredVector {
    pub id: String,
    pub score: f32,
    pub metadata: Metadata,
}

/// A semantic search result, hydrated from the relational store.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SearchHit {
    pub note_id: String,
    pub score: f32,
    pub snippet: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub title: Option<String>,
    pub metadata: Metadata,
    pub updated_at: DateTime<Utc>,
}
