//! Vector index abstraction and the chunk indexer.
//!
//! A [`VectorIndex`] stores embeddings partitioned by namespace. The ingest
//! pipeline always uses the owner's user id as the namespace, so one user's
//! vectors are never queried on behalf of another.
//!
//! [`Indexer`] bundles an [`Embedder`] with a [`VectorIndex`]. It only
//! exists when every external credential is configured; the pipeline treats
//! a missing indexer as "not configured" rather than as a failure.

pub mod memory;

use std::sync::Arc;

use async_trait::async_trait;
use serde_json::Value;
use thiserror::Error;

use crate::embedding::Embedder;
use crate::models::{Chunk, Metadata, ScoredVector, VectorEntry, TEXT_KEY};

/// Errors from the embedding provider or the vector index.
#[derive(Debug, Error)]
pub enum IndexError {
    #[error("embedding request failed: {0}")]
    Embedding(String),

    #[error("vector index request failed: {0}")]
    Index(String),

    #[error("embedding count mismatch: expected {expected}, got {actual}")]
    CountMismatch { expected: usize, actual: usize },
}

/// Namespaced vector storage.
#[async_trait]
pub trait VectorIndex: Send + Sync {
    /// Insert or overwrite entries (by id) inside `namespace`.
    async fn upsert(&self, namespace: &str, entries: &[VectorEntry]) -> Result<(), IndexError>;

    /// Return the `top_k` closest entries inside `namespace`, best first.
    async fn query(
        &self,
        namespace: &str,
        vector: &[f32],
        top_k: usize,
    ) -> Result<Vec<ScoredVector>, IndexError>;
}

/// Embeds chunks and writes them to a [`VectorIndex`].
#[derive(Clone)]
pub struct Indexer {
    embedder: Arc<dyn Embedder>,
    index: Arc<dyn VectorIndex>,
}

impl Indexer {
    pub fn new(embedder: Arc<dyn Embedder>, index: Arc<dyn VectorIndex>) -> Self {
        Self { embedder, index }
    }

    pub fn embedder(&self) -> &dyn Embedder {
        self.embedder.as_ref()
    }

    /// Embed `chunks` and upsert them into `namespace`.
    ///
    /// Vector ids are `<note_id>-<chunk index>`, so re-indexing a record
    /// overwrites its previous vectors. Returns the number of vectors
    /// written.
    pub async fn index_chunks(
        &self,
        namespace: &str,
        note_id: &str,
        chunks: &[Chunk],
    ) -> Result<usize, IndexError> {
        if chunks.is_empty() {
            return Ok(0);
        }

        let texts: Vec<String> = chunks.iter().map(|c| c.text.clone()).collect();
        let vectors = self.embedder.embed_documents(&texts).await?;
        if vectors.len() != chunks.len() {
            return Err(IndexError::CountMismatch {
                expected: chunks.len(),
                actual: vectors.len(),
            });
        }

        let entries: Vec<VectorEntry> = chunks
            .iter()
            .zip(vectors)
            .map(|(chunk, values)| {
                let mut metadata = flatten_metadata(&chunk.metadata);
                metadata.insert(TEXT_KEY.to_string(), Value::String(chunk.text.clone()));
                VectorEntry {
                    id: vector_id(note_id, chunk.index),
                    values,
                    metadata,
                }
            })
            .collect();

        tracing::debug!(
            namespace,
            note_id,
            chunk_count = entries.len(),
            model = self.embedder.model_name(),
            "upserting chunk vectors"
        );
        self.index.upsert(namespace, &entries).await?;
        Ok(entries.len())
    }

    /// Embed `query` and search `namespace`.
    pub async fn query(
        &self,
        namespace: &str,
        query: &str,
        top_k: usize,
    ) -> Result<Vec<ScoredVector>, IndexError> {
        let vector = self.embedder.embed_query(query).await?;
        self.index.query(namespace, &vector, top_k).await
    }
}

/// Id of the vector holding chunk `index` of record `note_id`.
pub fn vector_id(note_id: &str, index: usize) -> String {
    format!("{}-{}", note_id, index)
}

/// Flatten metadata into index-compatible scalar values.
///
/// Nested objects become dotted keys (`loc.lines.from`), arrays of strings
/// are kept as-is, other arrays are flattened by position (`tags.0`), and
/// nulls are dropped.
pub fn flatten_metadata(metadata: &Metadata) -> Metadata {
    let mut flat = Metadata::new();
    for (key, value) in metadata {
        flatten_into(&mut flat, key.clone(), value);
    }
    flat
}

fn flatten_into(flat: &mut Metadata, key: String, value: &Value) {
    match value {
        Value::Null => {}
        Value::Object(map) => {
            for (k, v) in map {
                flatten_into(flat, format!("{}.{}", key, k), v);
            }
        }
        Value::Array(items) if items.iter().all(Value::is_string) => {
            flat.insert(key, value.clone());
        }
        Value::Array(items) => {
            for (i, v) in items.iter().enumerate() {
                flatten_into(flat, format!("{}.{}", key, i), v);
            }
        }
        scalar => {
            flat.insert(key, scalar.clone());
        }
    }
}
