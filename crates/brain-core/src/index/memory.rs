//! In-memory [`VectorIndex`] for tests and local development.
//!
//! Namespaces map to `HashMap`s behind a `std::sync::RwLock`. Queries are
//! brute-force cosine similarity. A failing variant is available to
//! exercise the degraded-success path.

use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::RwLock;

use async_trait::async_trait;

use crate::embedding::cosine_similarity;
use crate::models::{ScoredVector, VectorEntry};

use super::{IndexError, VectorIndex};

pub struct InMemoryVectorIndex {
    namespaces: RwLock<HashMap<String, HashMap<String, VectorEntry>>>,
    upsert_calls: AtomicUsize,
    query_calls: AtomicUsize,
    fail_with: Option<String>,
}

impl InMemoryVectorIndex {
    pub fn new() -> Self {
        Self {
            namespaces: RwLock::new(HashMap::new()),
            upsert_calls: AtomicUsize::new(0),
            query_calls: AtomicUsize::new(0),
            fail_with: None,
        }
    }

    /// An index whose every operation fails with `message`.
    pub fn failing(message: impl Into<String>) -> Self {
        Self {
            fail_with: Some(message.into()),
            ..Self::new()
        }
    }

    /// Number of `upsert` calls received, including failed ones.
    pub fn upsert_calls(&self) -> usize {
        self.upsert_calls.load(Ordering::SeqCst)
    }

    /// Number of `query` calls received, including failed ones.
    pub fn query_calls(&self) -> usize {
        self.query_calls.load(Ordering::SeqCst)
    }

    /// All entries of `namespace`, sorted by id.
    pub fn entries(&self, namespace: &str) -> Vec<VectorEntry> {
        let namespaces = self.namespaces.read().unwrap_or_else(|e| e.into_inner());
        let mut entries: Vec<VectorEntry> = namespaces
            .get(namespace)
            .map(|ns| ns.values().cloned().collect())
            .unwrap_or_default();
        entries.sort_by(|a, b| a.id.cmp(&b.id));
        entries
    }
}

impl Default for InMemoryVectorIndex {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl VectorIndex for InMemoryVectorIndex {
    async fn upsert(&self, namespace: &str, entries: &[VectorEntry]) -> Result<(), IndexError> {
        self.upsert_calls.fetch_add(1, Ordering::SeqCst);
        if let Some(message) = &self.fail_with {
            return Err(IndexError::Index(message.clone()));
        }

        let mut namespaces = self.namespaces.write().unwrap_or_else(|e| e.into_inner());
        let ns = namespaces.entry(namespace.to_string()).or_default();
        for entry in entries {
            ns.insert(entry.id.clone(), entry.clone());
        }
        Ok(())
    }

    async fn query(
        &self,
        namespace: &str,
        vector: &[f32],
        top_k: usize,
    ) -> Result<Vec<ScoredVector>, IndexError> {
        self.query_calls.fetch_add(1, Ordering::SeqCst);
        if let Some(message) = &self.fail_with {
            return Err(IndexError::Index(message.clone()));
        }

        let namespaces = self.namespaces.read().unwrap_or_else(|e| e.into_inner());
        let mut matches: Vec<ScoredVector> = namespaces
            .get(namespace)
            .map(|ns| {
                ns.values()
                    .map(|entry| ScoredVector {
                        id: entry.id.clone(),
                        score: cosine_similarity(vector, &entry.values),
                        metadata: entry.metadata.clone(),
                    })
                    .collect()
            })
            .unwrap_or_default();

        matches.sort_by(|a, b| {
            b.score
                .partial_cmp(&a.score)
                .unwrap_or(std::cmp::Ordering::Equal)
                .then_with(|| a.id.cmp(&b.id))
        });
        matches.truncate(top_k);
        Ok(matches)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::Metadata;

    fn entry(id: &str, values: Vec<f32>) -> VectorEntry {
        VectorEntry {
            id: id.to_string(),
            values,
            metadata: Metadata::new(),
        }
    }

    #[tokio::test]
    async fn test_upsert_overwrites_by_id() {
        let index = InMemoryVectorIndex::new();
        index.upsert("u1", &[entry("a", vec![1.0, 0.0])]).await.unwrap();
        index.upsert("u1", &[entry("a", vec![0.0, 1.0])]).await.unwrap();

        let entries = index.entries("u1");
        assert_eq!(entries.len(), 1);
        assert_eq!(entries[0].values, vec![0.0, 1.0]);
        assert_eq!(index.upsert_calls(), 2);
    }

    #[tokio::test]
    async fn test_query_is_namespaced_and_ranked() {
        let index = InMemoryVectorIndex::new();
        index
            .upsert(
                "u1",
                &[entry("near", vec![1.0, 0.1]), entry("far", vec![0.0, 1.0])],
            )
            .await
            .unwrap();
        index.upsert("u2", &[entry("other", vec![1.0, 0.0])]).await.unwrap();

        let hits = index.query("u1", &[1.0, 0.0], 5).await.unwrap();
        let ids: Vec<&str> = hits.iter().map(|h| h.id.as_str()).collect();
        assert_eq!(ids, vec!["near", "far"]);

        let hits = index.query("u1", &[1.0, 0.0], 1).await.unwrap();
        assert_eq!(hits.len(), 1);
    }

    #[tokio::test]
    async fn test_failing_index() {
        let index = InMemoryVectorIndex::failing("connection refused");
        let err = index.upsert("u1", &[entry("a", vec![1.0])]).await.unwrap_err();
        assert!(err.to_string().contains("connection refused"));
        assert!(index.entries("u1").is_empty());
    }
}
