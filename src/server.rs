//! HTTP API server.
//!
//! # Endpoints
//!
//! | Method | Path | Description |
//! |--------|------|-------------|
//! | `POST` | `/api/ingest` | Save a new memory and index it when configured |
//! | `GET`  | `/api/memories` | List the caller's memories, newest update first |
//! | `GET`  | `/api/memories/{id}` | Fetch one memory |
//! | `PUT`  | `/api/memories/{id}` | Re-save a memory and re-index it |
//! | `POST` | `/api/search` | Semantic search over the caller's memories |
//! | `GET`  | `/health` | Health check (version, whether indexing is enabled) |
//!
//! Every `/api` route authenticates from the session cookie before reading
//! the request body, so an unauthenticated request is always a 401.
//!
//! # Error Contract
//!
//! ```json
//! { "success": false, "error": "Database error", "details": "...", "code": "5" }
//! ```
//!
//! # CORS
//!
//! All origins, methods, and headers are permitted.

use anyhow::Context;
use axum::{
    body::Bytes,
    extract::{Path, Query, State},
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};
use axum_extra::extract::CookieJar;
use serde::{de::DeserializeOwned, Deserialize, Serialize};
use std::sync::Arc;
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;

use brain_core::embedding::Embedder;
use brain_core::index::{Indexer, VectorIndex};
use brain_core::ingest::{IngestError, IngestPipeline, IngestRequest, IngestResponse};
use brain_core::models::{Identity, MemoryRecord, SearchHit};
use brain_core::search::{clamp_top_k, semantic_search, SearchError};
use brain_core::session::{RequestCookies, SessionVerifier};

use crate::auth::build_verifier;
use crate::config::{Config, Secrets};
use crate::db;
use crate::embedding::OpenAiCompatEmbedder;
use crate::migrate::run_migrations;
use crate::pinecone::PineconeIndex;
use crate::sqlite_store::SqliteMemoryStore;

const DEFAULT_LIST_LIMIT: usize = 50;
const MAX_LIST_LIMIT: usize = 200;

/// Shared application state passed to all route handlers via Axum's `State` extractor.
#[derive(Clone)]
pub struct AppState {
    pipeline: IngestPipeline,
}

impl AppState {
    pub fn new(pipeline: IngestPipeline) -> Self {
        Self { pipeline }
    }

    pub fn pipeline(&self) -> &IngestPipeline {
        &self.pipeline
    }
}

/// Build the vector indexer when all three credentials are present.
pub fn build_indexer(config: &Config, secrets: &Secrets) -> anyhow::Result<Option<Indexer>> {
    let Some(creds) = secrets.vector_credentials() else {
        tracing::warn!(
            "vector indexing disabled: PINECONE_API_KEY, PINECONE_INDEX_NAME and OPENROUTER_API_KEY are required"
        );
        return Ok(None);
    };

    let embedder = OpenAiCompatEmbedder::new(&config.embedding, creds.openrouter_api_key)
        .context("Failed to build embedding client")?;
    tracing::info!(
        endpoint = embedder.endpoint(),
        index = %creds.pinecone_index_name,
        "vector indexing enabled"
    );

    let embedder: Arc<dyn Embedder> = Arc::new(embedder);
    let index: Arc<dyn VectorIndex> = Arc::new(
        PineconeIndex::new(&config.vector, creds.pinecone_api_key, creds.pinecone_index_name)
            .context("Failed to build vector index client")?,
    );
    Ok(Some(Indexer::new(embedder, index)))
}

/// Open the database, run migrations and wire every collaborator once.
pub async fn build_state(config: &Config, secrets: &Secrets) -> anyhow::Result<AppState> {
    let pool = db::connect(&config.db).await?;
    run_migrations(&pool).await?;

    let sessions: Arc<dyn SessionVerifier> = build_verifier(&config.auth, secrets)?;
    let pipeline = IngestPipeline::new(Arc::new(SqliteMemoryStore::new(pool)), sessions)
        .with_indexer(build_indexer(config, secrets)?)
        .with_chunk_params(config.chunking.params()?)
        .with_min_index_chars(config.chunking.min_index_chars);

    Ok(AppState::new(pipeline))
}

pub fn router(state: AppState) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    Router::new()
        .route("/api/ingest", post(handle_ingest))
        .route("/api/memories", get(handle_list_memories))
        .route(
            "/api/memories/{id}",
            get(handle_get_memory).put(handle_resave_memory),
        )
        .route("/api/search", post(handle_search))
        .route("/health", get(handle_health))
        .layer(TraceLayer::new_for_http())
        .layer(cors)
        .with_state(state)
}

/// Starts the HTTP server on `[server].bind` and runs until Ctrl-C.
pub async fn run_server(config: &Config) -> anyhow::Result<()> {
    let secrets = Secrets::from_env();
    let state = build_state(config, &secrets).await?;
    let embedding_model = state
        .pipeline
        .indexer()
        .map(|indexer| indexer.embedder().model_name().to_string());

    let listener = tokio::net::TcpListener::bind(&config.server.bind)
        .await
        .with_context(|| format!("Failed to bind {}", config.server.bind))?;

    tracing::info!(
        bind = %config.server.bind,
        auth = ?config.auth.provider,
        embedding_model = embedding_model.as_deref().unwrap_or("-"),
        "server listening"
    );

    axum::serve(listener, router(state))
        .with_graceful_shutdown(async {
            let _ = tokio::signal::ctrl_c().await;
            tracing::info!("shutdown signal received");
        })
        .await?;

    Ok(())
}

// ============ Error response ============

#[derive(Serialize)]
struct ErrorBody {
    success: bool,
    error: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    details: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    code: Option<String>,
}

/// Internal error type that converts into an Axum HTTP response.
#[derive(Debug)]
pub struct AppError {
    status: StatusCode,
    error: String,
    details: Option<String>,
    code: Option<String>,
}

impl AppError {
    fn new(status: StatusCode, error: impl Into<String>, details: Option<String>) -> Self {
        Self {
            status,
            error: error.into(),
            details,
            code: None,
        }
    }
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let body = ErrorBody {
            success: false,
            error: self.error,
            details: self.details,
            code: self.code,
        };
        (self.status, Json(body)).into_response()
    }
}

impl From<IngestError> for AppError {
    fn from(err: IngestError) -> Self {
        AppError {
            status: StatusCode::from_u16(err.status_code())
                .unwrap_or(StatusCode::INTERNAL_SERVER_ERROR),
            error: err.to_string(),
            details: err.details(),
            code: err.code().map(str::to_string),
        }
    }
}

impl From<SearchError> for AppError {
    fn from(err: SearchError) -> Self {
        match err {
            SearchError::EmptyQuery => {
                AppError::new(StatusCode::BAD_REQUEST, "Query cannot be empty", None)
            }
            SearchError::NotConfigured => AppError::new(
                StatusCode::SERVICE_UNAVAILABLE,
                "Vector search not configured",
                Some(
                    "add PINECONE_API_KEY, PINECONE_INDEX_NAME, and OPENROUTER_API_KEY to enable AI search"
                        .to_string(),
                ),
            ),
            SearchError::Index(e) => {
                tracing::warn!(error = %e, "semantic search failed");
                AppError::new(StatusCode::BAD_GATEWAY, "Vector search failed", Some(e.to_string()))
            }
            SearchError::Store(e) => IngestError::from(e).into(),
        }
    }
}

fn cookies_from_jar(jar: &CookieJar) -> RequestCookies {
    jar.iter()
        .map(|c| (c.name().to_string(), c.value().to_string()))
        .collect()
}

async fn require_identity(state: &AppState, jar: &CookieJar) -> Result<Identity, AppError> {
    Ok(state.pipeline.authenticate(&cookies_from_jar(jar)).await?)
}

/// Parse a JSON body after authentication has succeeded.
fn parse_body<T: DeserializeOwned>(body: &Bytes) -> Result<T, AppError> {
    serde_json::from_slice(body).map_err(|e| {
        AppError::new(
            StatusCode::BAD_REQUEST,
            "Invalid JSON body",
            Some(e.to_string()),
        )
    })
}

fn outcome_response(outcome: brain_core::ingest::IngestOutcome) -> Response {
    let status =
        StatusCode::from_u16(outcome.status_code()).unwrap_or(StatusCode::INTERNAL_SERVER_ERROR);
    (status, Json(IngestResponse::from(&outcome))).into_response()
}

// ============ GET /health ============

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct HealthResponse {
    status: String,
    version: String,
    vector_indexing: bool,
}

async fn handle_health(State(state): State<AppState>) -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "ok".to_string(),
        version: env!("CARGO_PKG_VERSION").to_string(),
        vector_indexing: state.pipeline.indexing_enabled(),
    })
}

// ============ POST /api/ingest ============

async fn handle_ingest(
    State(state): State<AppState>,
    jar: CookieJar,
    body: Bytes,
) -> Result<Response, AppError> {
    let identity = require_identity(&state, &jar).await?;
    let request: IngestRequest = parse_body(&body)?;
    let outcome = state.pipeline.ingest_as(&identity, request).await;
    Ok(outcome_response(outcome))
}

// ============ PUT /api/memories/{id} ============

async fn handle_resave_memory(
    State(state): State<AppState>,
    jar: CookieJar,
    Path(id): Path<String>,
    body: Bytes,
) -> Result<Response, AppError> {
    let identity = require_identity(&state, &jar).await?;
    let request: IngestRequest = parse_body(&body)?;
    let outcome = state.pipeline.resave_as(&identity, &id, request).await;
    Ok(outcome_response(outcome))
}

// ============ GET /api/memories ============

#[derive(Deserialize)]
struct ListParams {
    limit: Option<usize>,
}

#[derive(Serialize)]
struct MemoryListResponse {
    memories: Vec<MemoryRecord>,
}

async fn handle_list_memories(
    State(state): State<AppState>,
    jar: CookieJar,
    Query(params): Query<ListParams>,
) -> Result<Json<MemoryListResponse>, AppError> {
    let identity = require_identity(&state, &jar).await?;
    let limit = params
        .limit
        .unwrap_or(DEFAULT_LIST_LIMIT)
        .clamp(1, MAX_LIST_LIMIT);

    let memories = state
        .pipeline
        .store()
        .list(&identity.user_id, limit)
        .await
        .map_err(IngestError::from)?;

    Ok(Json(MemoryListResponse { memories }))
}

// ============ GET /api/memories/{id} ============

async fn handle_get_memory(
    State(state): State<AppState>,
    jar: CookieJar,
    Path(id): Path<String>,
) -> Result<Json<MemoryRecord>, AppError> {
    let identity = require_identity(&state, &jar).await?;
    let record = state
        .pipeline
        .store()
        .get(&identity.user_id, &id)
        .await
        .map_err(IngestError::from)?
        .ok_or_else(|| IngestError::NotFound(id.clone()))?;
    Ok(Json(record))
}

// ============ POST /api/search ============

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct SearchBody {
    #[serde(default)]
    query: String,
    #[serde(default)]
    top_k: Option<usize>,
}

#[derive(Serialize)]
struct SearchResponse {
    results: Vec<SearchHit>,
}

async fn handle_search(
    State(state): State<AppState>,
    jar: CookieJar,
    body: Bytes,
) -> Result<Json<SearchResponse>, AppError> {
    let identity = require_identity(&state, &jar).await?;
    let request: SearchBody = parse_body(&body)?;

    let results = semantic_search(
        state.pipeline.store().as_ref(),
        state.pipeline.indexer(),
        &identity,
        &request.query,
        clamp_top_k(request.top_k),
    )
    .await?;

    Ok(Json(SearchResponse { results }))
}
