//! Pinecone REST client implementing [`VectorIndex`].
//!
//! The data-plane host is resolved once through the control plane
//! (`GET <controller>/indexes/<name>`) unless `[vector].host` is set, then
//! cached for the life of the process.

use async_trait::async_trait;
use secrecy::{ExposeSecret, SecretString};
use serde::{Deserialize, Serialize};
use std::time::Duration;
use tokio::sync::OnceCell;

use brain_core::index::{IndexError, VectorIndex};
use brain_core::models::{Metadata, ScoredVector, VectorEntry};

use crate::config::VectorConfig;

const API_VERSION: &str = "2024-07";

pub struct PineconeIndex {
    client: reqwest::Client,
    api_key: SecretString,
    index_name: String,
    controller_url: String,
    host: OnceCell<String>,
    upsert_batch_size: usize,
}

impl PineconeIndex {
    pub fn new(
        config: &VectorConfig,
        api_key: SecretString,
        index_name: impl Into<String>,
    ) -> Result<Self, IndexError> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .build()
            .map_err(|e| IndexError::Index(e.to_string()))?;

        let host = match &config.host {
            Some(host) => OnceCell::new_with(Some(normalize_host(host))),
            None => OnceCell::new(),
        };

        Ok(Self {
            client,
            api_key,
            index_name: index_name.into(),
            controller_url: config.controller_url.trim_end_matches('/').to_string(),
            host,
            upsert_batch_size: config.upsert_batch_size.max(1),
        })
    }

    /// Data-plane base URL, resolving it on first use.
    async fn host(&self) -> Result<&str, IndexError> {
        self.host
            .get_or_try_init(|| self.describe_index_host())
            .await
            .map(String::as_str)
    }

    async fn describe_index_host(&self) -> Result<String, IndexError> {
        let url = format!("{}/indexes/{}", self.controller_url, self.index_name);
        let response = self
            .client
            .get(&url)
            .header("Api-Key", self.api_key.expose_secret())
            .header("X-Pinecone-API-Version", API_VERSION)
            .send()
            .await
            .map_err(|e| IndexError::Index(e.to_string()))?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(IndexError::Index(format!(
                "describe index '{}' failed: {} {}",
                self.index_name, status, body
            )));
        }

        let described: DescribeIndexResponse = response
            .json()
            .await
            .map_err(|e| IndexError::Index(format!("invalid describe response: {}", e)))?;
        let host = normalize_host(&described.host);
        tracing::info!(index = %self.index_name, host = %host, "resolved vector index host");
        Ok(host)
    }

    async fn post<B: Serialize + ?Sized, R: for<'de> Deserialize<'de>>(
        &self,
        path: &str,
        body: &B,
    ) -> Result<R, IndexError> {
        let url = format!("{}{}", self.host().await?, path);
        let response = self
            .client
            .post(&url)
            .header("Api-Key", self.api_key.expose_secret())
            .header("X-Pinecone-API-Version", API_VERSION)
            .json(body)
            .send()
            .await
            .map_err(|e| IndexError::Index(e.to_string()))?;

        let status = response.status();
        if !status.is_success() {
            let text = response.text().await.unwrap_or_default();
            return Err(IndexError::Index(format!("{} {}: {}", path, status, text)));
        }

        response
            .json()
            .await
            .map_err(|e| IndexError::Index(format!("invalid {} response: {}", path, e)))
    }
}

/// Accept bare hosts (`idx-abc.svc.pinecone.io`) or full URLs.
fn normalize_host(host: &str) -> String {
    let host = host.trim_end_matches('/');
    if host.starts_with("http://") || host.starts_with("https://") {
        host.to_string()
    } else {
        format!("https://{}", host)
    }
}

#[derive(Deserialize)]
struct DescribeIndexResponse {
    host: String,
}

#[derive(Serialize)]
struct UpsertVector<'a> {
    id: &'a str,
    values: &'a [f32],
    metadata: &'a Metadata,
}

#[derive(Serialize)]
struct UpsertRequest<'a> {
    vectors: Vec<UpsertVector<'a>>,
    namespace: &'a str,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct UpsertResponse {
    #[serde(default)]
    upserted_count: usize,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct QueryRequest<'a> {
    vector: &'a [f32],
    top_k: usize,
    namespace: &'a str,
    include_metadata: bool,
    include_values: bool,
}

#[derive(Deserialize)]
struct QueryResponse {
    #[serde(default)]
    matches: Vec<QueryMatch>,
}

#[derive(Deserialize)]
struct QueryMatch {
    id: String,
    #[serde(default)]
    score: f32,
    #[serde(default)]
    metadata: Option<Metadata>,
}

#[async_trait]
impl VectorIndex for PineconeIndex {
    async fn upsert(&self, namespace: &str, entries: &[VectorEntry]) -> Result<(), IndexError> {
        for batch in entries.chunks(self.upsert_batch_size) {
            let request = UpsertRequest {
                vectors: batch
                    .iter()
                    .map(|e| UpsertVector {
                        id: &e.id,
                        values: &e.values,
                        metadata: &e.metadata,
                    })
                    .collect(),
                namespace,
            };
            let response: UpsertResponse = self.post("/vectors/upsert", &request).await?;
            tracing::debug!(
                namespace,
                sent = batch.len(),
                upserted = response.upserted_count,
                "vector upsert batch"
            );
        }
        Ok(())
    }

    async fn query(
        &self,
        namespace: &str,
        vector: &[f32],
        top_k: usize,
    ) -> Result<Vec<ScoredVector>, IndexError> {
        let request = QueryRequest {
            vector,
            top_k,
            namespace,
            include_metadata: true,
            include_values: false,
        };
        let response: QueryResponse = self.post("/query", &request).await?;
        Ok(response
            .matches
            .into_iter()
            .map(|m| ScoredVector {
                id: m.id,
                score: m.score,
                metadata: m.metadata.unwrap_or_default(),
            })
            .collect())
    }
}
