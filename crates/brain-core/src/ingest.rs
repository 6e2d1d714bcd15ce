//! Ingest orchestration.
//!
//! [`IngestPipeline`] sequences the auth gate, the relational write and the
//! optional chunk/embed/upsert step:
//!
//! ```text
//! AuthPending ─▶ Authenticated ─▶ Persisted ─┬─▶ SkippedTooShort
//!      │               │                     ├─▶ NotConfigured    (warning)
//!      ▼               ▼                     ├─▶ Indexed
//! Unauthorized   BadInput | Storage          └─▶ IndexFailed      (warning)
//! ```
//!
//! Only the left-hand failures abort a request. Once a record is persisted
//! the outcome is always a success, possibly carrying a warning, and the
//! record is never rolled back because indexing failed.

use std::fmt;
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use serde_json::Value;
use thiserror::Error;

use crate::chunk::{chunk_memory, ChunkParams};
use crate::index::Indexer;
use crate::models::{Identity, MemoryRecord, Metadata, NewMemory};
use crate::session::{AuthError, RequestCookies, SessionVerifier};
use crate::store::{MemoryStore, StoreError};

/// Trimmed content shorter than this is persisted but not indexed.
pub const MIN_INDEX_CHARS: usize = 3;

pub const EMPTY_CONTENT_MESSAGE: &str = "Content cannot be empty";
pub const INVALID_METADATA_MESSAGE: &str = "Metadata must be a JSON object";
pub const TOO_SHORT_MESSAGE: &str = "Note too short for AI memory, saved to DB only";
pub const INDEXED_MESSAGE: &str = "Note saved to database and AI memory";
pub const NOT_CONFIGURED_MESSAGE: &str = "Note saved to database. Vector storage not configured - add PINECONE_API_KEY, PINECONE_INDEX_NAME, and OPENROUTER_API_KEY to enable AI search.";
pub const NOT_CONFIGURED_WARNING: &str = "Pinecone not configured";
pub const INDEX_FAILED_MESSAGE: &str =
    "Note saved to database. Vector storage failed - check Pinecone configuration.";

/// Body of an ingest or re-save request.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct IngestRequest {
    #[serde(default)]
    pub content: Option<String>,
    #[serde(default)]
    pub metadata: Option<Value>,
}

impl IngestRequest {
    pub fn new(content: impl Into<String>) -> Self {
        Self {
            content: Some(content.into()),
            metadata: None,
        }
    }

    pub fn with_metadata(mut self, metadata: Value) -> Self {
        self.metadata = Some(metadata);
        self
    }
}

/// States of one ingest invocation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum IngestState {
    AuthPending,
    Authenticated,
    Persisted,
    SkippedTooShort,
    NotConfigured,
    Indexed { chunks: usize },
    IndexFailed { error: String },
}

impl IngestState {
    fn as_str(&self) -> &'static str {
        match self {
            IngestState::AuthPending => "auth_pending",
            IngestState::Authenticated => "authenticated",
            IngestState::Persisted => "persisted",
            IngestState::SkippedTooShort => "skipped_too_short",
            IngestState::NotConfigured => "not_configured",
            IngestState::Indexed { .. } => "indexed",
            IngestState::IndexFailed { .. } => "index_failed",
        }
    }
}

impl fmt::Display for IngestState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Failures that abort an ingest before or during the relational write.
#[derive(Debug, Error)]
pub enum IngestError {
    #[error("Unauthorized")]
    Unauthorized { details: String },

    #[error("{0}")]
    BadInput(String),

    #[error("Database error")]
    Storage {
        message: String,
        code: Option<String>,
    },

    #[error("Not found")]
    NotFound(String),
}

impl IngestError {
    pub fn status_code(&self) -> u16 {
        match self {
            IngestError::Unauthorized { .. } => 401,
            IngestError::BadInput(_) => 400,
            IngestError::Storage { .. } => 500,
            IngestError::NotFound(_) => 404,
        }
    }

    pub fn details(&self) -> Option<String> {
        match self {
            IngestError::Unauthorized { details } => Some(details.clone()),
            IngestError::BadInput(_) => None,
            IngestError::Storage { message, .. } => Some(message.clone()),
            IngestError::NotFound(id) => Some(format!("memory {} not found", id)),
        }
    }

    pub fn code(&self) -> Option<&str> {
        match self {
            IngestError::Storage { code, .. } => code.as_deref(),
            _ => None,
        }
    }
}

impl From<AuthError> for IngestError {
    fn from(err: AuthError) -> Self {
        IngestError::Unauthorized {
            details: err.to_string(),
        }
    }
}

impl From<StoreError> for IngestError {
    fn from(err: StoreError) -> Self {
        match err {
            StoreError::NotFound(id) => IngestError::NotFound(id),
            StoreError::Backend { message, code } => IngestError::Storage { message, code },
        }
    }
}

/// Result of one ingest invocation.
///
/// A degraded outcome is a success: the record was saved even though it
/// did not become searchable.
#[derive(Debug)]
pub enum IngestOutcome {
    Success {
        note_id: String,
        state: IngestState,
        message: String,
    },
    SuccessWithWarning {
        note_id: String,
        state: IngestState,
        message: String,
        reason: String,
    },
    Failure(IngestError),
}

impl IngestOutcome {
    pub fn is_success(&self) -> bool {
        !matches!(self, IngestOutcome::Failure(_))
    }

    pub fn note_id(&self) -> Option<&str> {
        match self {
            IngestOutcome::Success { note_id, .. }
            | IngestOutcome::SuccessWithWarning { note_id, .. } => Some(note_id),
            IngestOutcome::Failure(_) => None,
        }
    }

    /// Terminal state reached, or `None` for failures.
    pub fn state(&self) -> Option<&IngestState> {
        match self {
            IngestOutcome::Success { state, .. }
            | IngestOutcome::SuccessWithWarning { state, .. } => Some(state),
            IngestOutcome::Failure(_) => None,
        }
    }

    pub fn warning(&self) -> Option<&str> {
        match self {
            IngestOutcome::SuccessWithWarning { reason, .. } => Some(reason),
            _ => None,
        }
    }

    /// HTTP status for this outcome. Degraded successes are 200.
    pub fn status_code(&self) -> u16 {
        match self {
            IngestOutcome::Failure(err) => err.status_code(),
            _ => 200,
        }
    }
}

/// JSON body returned by the ingest and re-save endpoints.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct IngestResponse {
    pub success: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub note_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub warning: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub details: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub code: Option<String>,
}

impl From<&IngestOutcome> for IngestResponse {
    fn from(outcome: &IngestOutcome) -> Self {
        match outcome {
            IngestOutcome::Success {
                note_id, message, ..
            } => IngestResponse {
                success: true,
                note_id: Some(note_id.clone()),
                message: Some(message.clone()),
                warning: None,
                error: None,
                details: None,
                code: None,
            },
            IngestOutcome::SuccessWithWarning {
                note_id,
                message,
                reason,
                ..
            } => IngestResponse {
                success: true,
                note_id: Some(note_id.clone()),
                message: Some(message.clone()),
                warning: Some(reason.clone()),
                error: None,
                details: None,
                code: None,
            },
            IngestOutcome::Failure(err) => IngestResponse {
                success: false,
                note_id: None,
                message: None,
                warning: None,
                error: Some(err.to_string()),
                details: err.details(),
                code: err.code().map(str::to_string),
            },
        }
    }
}

/// Orchestrates auth, persistence and best-effort indexing.
///
/// Built once at startup and shared; all collaborators are pooled behind
/// `Arc`s. When `indexer` is `None` every persisted record ends in
/// [`IngestState::NotConfigured`].
#[derive(Clone)]
pub struct IngestPipeline {
    store: Arc<dyn MemoryStore>,
    sessions: Arc<dyn SessionVerifier>,
    indexer: Option<Indexer>,
    params: ChunkParams,
    min_index_chars: usize,
}

impl IngestPipeline {
    pub fn new(store: Arc<dyn MemoryStore>, sessions: Arc<dyn SessionVerifier>) -> Self {
        Self {
            store,
            sessions,
            indexer: None,
            params: ChunkParams::default(),
            min_index_chars: MIN_INDEX_CHARS,
        }
    }

    pub fn with_indexer(mut self, indexer: Option<Indexer>) -> Self {
        self.indexer = indexer;
        self
    }

    pub fn with_chunk_params(mut self, params: ChunkParams) -> Self {
        self.params = params;
        self
    }

    pub fn with_min_index_chars(mut self, min_index_chars: usize) -> Self {
        self.min_index_chars = min_index_chars;
        self
    }

    pub fn indexing_enabled(&self) -> bool {
        self.indexer.is_some()
    }

    pub fn store(&self) -> &Arc<dyn MemoryStore> {
        &self.store
    }

    pub fn indexer(&self) -> Option<&Indexer> {
        self.indexer.as_ref()
    }

    pub fn chunk_params(&self) -> ChunkParams {
        self.params
    }

    /// `AuthPending → Authenticated`.
    pub async fn authenticate(&self, cookies: &RequestCookies) -> Result<Identity, IngestError> {
        trace_state(None, &IngestState::AuthPending);
        match self.sessions.verify(cookies).await {
            Ok(identity) => {
                trace_state(Some(&identity.user_id), &IngestState::Authenticated);
                Ok(identity)
            }
            Err(err) => {
                tracing::info!(error = %err, "ingest rejected: unauthorized");
                Err(err.into())
            }
        }
    }

    /// Authenticate, then save a new record.
    pub async fn ingest(&self, cookies: &RequestCookies, request: IngestRequest) -> IngestOutcome {
        match self.authenticate(cookies).await {
            Ok(identity) => self.ingest_as(&identity, request).await,
            Err(err) => IngestOutcome::Failure(err),
        }
    }

    /// Save a new record for an already authenticated user.
    pub async fn ingest_as(&self, identity: &Identity, request: IngestRequest) -> IngestOutcome {
        let (content, metadata) = match validate(request) {
            Ok(valid) => valid,
            Err(err) => return IngestOutcome::Failure(err),
        };

        let record = match self
            .store
            .insert(NewMemory {
                user_id: identity.user_id.clone(),
                content,
                metadata,
            })
            .await
        {
            Ok(record) => record,
            Err(err) => return self.storage_failure(identity, err),
        };

        self.index_record(&record).await
    }

    /// Authenticate, then overwrite record `id`.
    pub async fn resave(
        &self,
        cookies: &RequestCookies,
        id: &str,
        request: IngestRequest,
    ) -> IngestOutcome {
        match self.authenticate(cookies).await {
            Ok(identity) => self.resave_as(&identity, id, request).await,
            Err(err) => IngestOutcome::Failure(err),
        }
    }

    /// Overwrite record `id` owned by `identity` and re-index it in full.
    ///
    /// Vector ids are derived from the record id and chunk index, so the
    /// new chunks overwrite the previous ones in place.
    pub async fn resave_as(
        &self,
        identity: &Identity,
        id: &str,
        request: IngestRequest,
    ) -> IngestOutcome {
        let (content, metadata) = match validate(request) {
            Ok(valid) => valid,
            Err(err) => return IngestOutcome::Failure(err),
        };

        let record = match self
            .store
            .update(&identity.user_id, id, &content, &metadata)
            .await
        {
            Ok(record) => record,
            Err(err) => return self.storage_failure(identity, err),
        };

        self.index_record(&record).await
    }

    fn storage_failure(&self, identity: &Identity, err: StoreError) -> IngestOutcome {
        match &err {
            StoreError::NotFound(id) => {
                tracing::info!(user_id = %identity.user_id, note_id = %id, "memory not found");
            }
            StoreError::Backend { message, code } => {
                tracing::error!(
                    user_id = %identity.user_id,
                    error = %message,
                    code = code.as_deref().unwrap_or(""),
                    "failed to persist memory"
                );
            }
        }
        IngestOutcome::Failure(err.into())
    }

    /// `Persisted → {SkippedTooShort | NotConfigured | Indexed | IndexFailed}`.
    async fn index_record(&self, record: &MemoryRecord) -> IngestOutcome {
        trace_state(Some(&record.user_id), &IngestState::Persisted);
        let note_id = record.id.clone();

        if record.content.trim().chars().count() < self.min_index_chars {
            let state = IngestState::SkippedTooShort;
            trace_state(Some(&record.user_id), &state);
            return IngestOutcome::Success {
                note_id,
                state,
                message: TOO_SHORT_MESSAGE.to_string(),
            };
        }

        let Some(indexer) = &self.indexer else {
            let state = IngestState::NotConfigured;
            trace_state(Some(&record.user_id), &state);
            return IngestOutcome::SuccessWithWarning {
                note_id,
                state,
                message: NOT_CONFIGURED_MESSAGE.to_string(),
                reason: NOT_CONFIGURED_WARNING.to_string(),
            };
        };

        let chunks = chunk_memory(record, self.params);
        match indexer
            .index_chunks(&record.user_id, &record.id, &chunks)
            .await
        {
            Ok(count) => {
                let state = IngestState::Indexed { chunks: count };
                tracing::info!(
                    user_id = %record.user_id,
                    note_id = %record.id,
                    chunks = count,
                    "memory indexed"
                );
                trace_state(Some(&record.user_id), &state);
                IngestOutcome::Success {
                    note_id,
                    state,
                    message: INDEXED_MESSAGE.to_string(),
                }
            }
            Err(err) => {
                let error = err.to_string();
                tracing::warn!(
                    user_id = %record.user_id,
                    note_id = %record.id,
                    error = %error,
                    "vector indexing failed; record kept"
                );
                let state = IngestState::IndexFailed {
                    error: error.clone(),
                };
                trace_state(Some(&record.user_id), &state);
                IngestOutcome::SuccessWithWarning {
                    note_id,
                    state,
                    message: INDEX_FAILED_MESSAGE.to_string(),
                    reason: error,
                }
            }
        }
    }
}

fn trace_state(user_id: Option<&str>, state: &IngestState) {
    tracing::debug!(user_id = user_id.unwrap_or("-"), state = %state, "ingest state");
}

/// Reject empty content and non-object metadata before any write.
fn validate(request: IngestRequest) -> Result<(String, Metadata), IngestError> {
    let content = match request.content {
        Some(content) if !content.trim().is_empty() => content,
        _ => return Err(IngestError::BadInput(EMPTY_CONTENT_MESSAGE.to_string())),
    };

    let metadata = match request.metadata {
        None | Some(Value::Null) => Metadata::new(),
        Some(Value::Object(map)) => map,
        Some(_) => return Err(IngestError::BadInput(INVALID_METADATA_MESSAGE.to_string())),
    };

    Ok((content, metadata))
}
