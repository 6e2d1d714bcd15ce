//! OpenAI-compatible embedding client.
//!
//! Calls `POST <base_url>/embeddings` (OpenRouter by default) with batching,
//! retry, and backoff. One client is built at startup and shared by every
//! request; the underlying `reqwest::Client` pools connections.
//!
//! # Retry Strategy
//!
//! - HTTP 429 (rate limited) and 5xx (server error) → retry
//! - HTTP 4xx (client error, not 429) → fail immediately
//! - Network errors → retry
//! - Backoff: 1s, 2s, 4s, 8s, 16s, 32s (capped at 2^5)

use async_trait::async_trait;
use secrecy::{ExposeSecret, SecretString};
use serde::{Deserialize, Serialize};
use std::time::Duration;

use brain_core::embedding::Embedder;
use brain_core::index::IndexError;

use crate::config::EmbeddingConfig;

pub struct OpenAiCompatEmbedder {
    client: reqwest::Client,
    api_key: SecretString,
    endpoint: String,
    model: String,
    batch_size: usize,
    max_retries: u32,
    strip_new_lines: bool,
    backoff_base: Duration,
}

fn normalize_base_url(url: &str) -> String {
    url.trim_end_matches('/').to_string()
}

fn has_version_suffix(base_url: &str) -> bool {
    let Some(last_segment) = base_url.rsplit('/').next() else {
        return false;
    };
    let Some(rest) = last_segment.strip_prefix('v') else {
        return false;
    };
    !rest.is_empty() && rest.chars().all(|c| c.is_ascii_digit())
}

/// Resolve the embeddings URL from a base URL.
///
/// `https://openrouter.ai/api/v1` → `https://openrouter.ai/api/v1/embeddings`;
/// a bare host gets `/v1/embeddings`; an explicit `/embeddings` URL is kept.
pub fn embeddings_endpoint(base_url: &str) -> String {
    let normalized = normalize_base_url(base_url);
    if normalized.ends_with("/embeddings") {
        return normalized;
    }
    if has_version_suffix(&normalized) {
        return format!("{normalized}/embeddings");
    }
    format!("{normalized}/v1/embeddings")
}

impl OpenAiCompatEmbedder {
    pub fn new(config: &EmbeddingConfig, api_key: SecretString) -> Result<Self, IndexError> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .build()
            .map_err(|e| IndexError::Embedding(e.to_string()))?;

        Ok(Self {
            client,
            api_key,
            endpoint: embeddings_endpoint(&config.base_url),
            model: config.model.clone(),
            batch_size: config.batch_size.max(1),
            max_retries: config.max_retries,
            strip_new_lines: config.strip_new_lines,
            backoff_base: Duration::from_secs(1),
        })
    }

    /// Override the first retry delay. Later delays double from it.
    pub fn with_backoff_base(mut self, base: Duration) -> Self {
        self.backoff_base = base;
        self
    }

    pub fn endpoint(&self) -> &str {
        &self.endpoint
    }

    /// Embed one batch with retry/backoff.
    async fn embed_batch(&self, texts: Vec<String>) -> Result<Vec<Vec<f32>>, IndexError> {
        let body = EmbeddingRequest {
            model: &self.model,
            input: texts,
        };
        let expected = body.input.len();

        let mut last_err = None;

        for attempt in 0..=self.max_retries {
            if attempt > 0 {
                // Exponential backoff: 1s, 2s, 4s, 8s, ...
                let delay = self.backoff_base * (1u32 << (attempt - 1).min(5));
                tracing::debug!(attempt, delay_ms = delay.as_millis() as u64, "retrying embedding request");
                tokio::time::sleep(delay).await;
            }

            let resp = self
                .client
                .post(&self.endpoint)
                .bearer_auth(self.api_key.expose_secret())
                .json(&body)
                .send()
                .await;

            match resp {
                Ok(response) => {
                    let status = response.status();

                    if status.is_success() {
                        let parsed: EmbeddingResponse = response
                            .json()
                            .await
                            .map_err(|e| IndexError::Embedding(format!("invalid response: {}", e)))?;
                        return into_ordered_vectors(parsed, expected);
                    }

                    // Rate limited or server error — retry
                    if status.as_u16() == 429 || status.is_server_error() {
                        let body_text = response.text().await.unwrap_or_default();
                        tracing::warn!(%status, attempt, "embedding request failed, will retry");
                        last_err = Some(IndexError::Embedding(format!(
                            "{} {}: {}",
                            self.endpoint, status, body_text
                        )));
                        continue;
                    }

                    // Client error (not 429) — don't retry
                    let body_text = response.text().await.unwrap_or_default();
                    return Err(IndexError::Embedding(format!(
                        "{} {}: {}",
                        self.endpoint, status, body_text
                    )));
                }
                Err(e) => {
                    tracing::warn!(error = %e, attempt, "embedding request error, will retry");
                    last_err = Some(IndexError::Embedding(e.to_string()));
                    continue;
                }
            }
        }

        Err(last_err
            .unwrap_or_else(|| IndexError::Embedding("embedding failed after retries".to_string())))
    }
}

#[derive(Serialize)]
struct EmbeddingRequest<'a> {
    model: &'a str,
    input: Vec<String>,
}

#[derive(Deserialize)]
struct EmbeddingResponse {
    data: Vec<EmbeddingData>,
}

#[derive(Deserialize)]
struct EmbeddingData {
    #[serde(default)]
    index: Option<usize>,
    embedding: Vec<f32>,
}

/// Order vectors by the response `index` so they match the input order.
fn into_ordered_vectors(
    response: EmbeddingResponse,
    expected: usize,
) -> Result<Vec<Vec<f32>>, IndexError> {
    let mut data = response.data;
    if data.len() != expected {
        return Err(IndexError::CountMismatch {
            expected,
            actual: data.len(),
        });
    }
    if data.iter().all(|d| d.index.is_some()) {
        data.sort_by_key(|d| d.index);
    }
    Ok(data.into_iter().map(|d| d.embedding).collect())
}

#[async_trait]
impl Embedder for OpenAiCompatEmbedder {
    fn model_name(&self) -> &str {
        &self.model
    }

    async fn embed_documents(&self, texts: &[String]) -> Result<Vec<Vec<f32>>, IndexError> {
        let mut vectors = Vec::with_capacity(texts.len());
        for batch in texts.chunks(self.batch_size) {
            let input: Vec<String> = if self.strip_new_lines {
                batch.iter().map(|t| t.replace('\n', " ")).collect()
            } else {
                batch.to_vec()
            };
            vectors.extend(self.embed_batch(input).await?);
        }
        Ok(vectors)
    }
}
