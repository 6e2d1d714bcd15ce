//! End-to-end tests for the HTTP API against in-process mock embedding and
//! vector index services.

use axum::extract::State;
use axum::http::StatusCode;
use axum::routing::post;
use axum::{Json, Router};
use secrecy::SecretString;
use serde_json::{json, Value};
use std::collections::HashMap;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use brain_core::embedding::{cosine_similarity, Embedder, HashingEmbedder};
use brain_core::index::Indexer;
use brain_core::ingest::{
    IngestPipeline, INDEXED_MESSAGE, INDEX_FAILED_MESSAGE, NOT_CONFIGURED_MESSAGE,
    NOT_CONFIGURED_WARNING, TOO_SHORT_MESSAGE,
};
use personal_brain::auth::{issue_session_token, SignedSessionVerifier};
use personal_brain::config::{EmbeddingConfig, VectorConfig};
use personal_brain::db::connect_in_memory;
use personal_brain::embedding::OpenAiCompatEmbedder;
use personal_brain::migrate::run_migrations;
use personal_brain::pinecone::PineconeIndex;
use personal_brain::server::{router, AppState};
use personal_brain::sqlite_store::SqliteMemoryStore;

const SECRET: &str = "server-test-secret";

// ============ Mock services ============

type StoredVector = (Vec<f32>, Value);

#[derive(Clone, Default)]
struct MockServices {
    embed_calls: Arc<AtomicUsize>,
    upsert_calls: Arc<AtomicUsize>,
    fail_upserts: Arc<AtomicBool>,
    vectors: Arc<Mutex<HashMap<String, HashMap<String, StoredVector>>>>,
}

impl MockServices {
    fn namespace(&self, ns: &str) -> HashMap<String, StoredVector> {
        self.vectors
            .lock()
            .unwrap()
            .get(ns)
            .cloned()
            .unwrap_or_default()
    }
}

fn embed(text: &str) -> Vec<f32> {
    HashingEmbedder::new(64).embed(text)
}

fn embedding_response(body: &Value) -> Value {
    let data: Vec<Value> = body["input"]
        .as_array()
        .unwrap()
        .iter()
        .enumerate()
        .map(|(i, text)| json!({ "index": i, "embedding": embed(text.as_str().unwrap()) }))
        .collect();
    json!({ "data": data })
}

async fn mock_embeddings(
    State(mock): State<MockServices>,
    Json(body): Json<Value>,
) -> Json<Value> {
    mock.embed_calls.fetch_add(1, Ordering::SeqCst);
    Json(embedding_response(&body))
}

async fn mock_upsert(
    State(mock): State<MockServices>,
    Json(body): Json<Value>,
) -> (StatusCode, Json<Value>) {
    mock.upsert_calls.fetch_add(1, Ordering::SeqCst);
    if mock.fail_upserts.load(Ordering::SeqCst) {
        return (
            StatusCode::INTERNAL_SERVER_ERROR,
            Json(json!({ "message": "index unavailable" })),
        );
    }

    let namespace = body["namespace"].as_str().unwrap().to_string();
    let vectors = body["vectors"].as_array().unwrap();
    let mut store = mock.vectors.lock().unwrap();
    let ns = store.entry(namespace).or_default();
    for v in vectors {
        let values: Vec<f32> = serde_json::from_value(v["values"].clone()).unwrap();
        ns.insert(
            v["id"].as_str().unwrap().to_string(),
            (values, v["metadata"].clone()),
        );
    }
    (StatusCode::OK, Json(json!({ "upsertedCount": vectors.len() })))
}

async fn mock_query(State(mock): State<MockServices>, Json(body): Json<Value>) -> Json<Value> {
    let vector: Vec<f32> = serde_json::from_value(body["vector"].clone()).unwrap();
    let top_k = body["topK"].as_u64().unwrap() as usize;
    let ns = mock.namespace(body["namespace"].as_str().unwrap());

    let mut matches: Vec<(String, f32, Value)> = ns
        .into_iter()
        .map(|(id, (values, metadata))| (id, cosine_similarity(&vector, &values), metadata))
        .collect();
    matches.sort_by(|a, b| b.1.total_cmp(&a.1));
    matches.truncate(top_k);

    let matches: Vec<Value> = matches
        .into_iter()
        .map(|(id, score, metadata)| json!({ "id": id, "score": score, "metadata": metadata }))
        .collect();
    Json(json!({ "matches": matches }))
}

async fn spawn(app: Router) -> SocketAddr {
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        axum::serve(listener, app).await.unwrap();
    });
    addr
}

async fn spawn_mocks(mock: MockServices) -> SocketAddr {
    let app = Router::new()
        .route("/v1/embeddings", post(mock_embeddings))
        .route("/vectors/upsert", post(mock_upsert))
        .route("/query", post(mock_query))
        .with_state(mock);
    spawn(app).await
}

// ============ Harness ============

struct TestApp {
    base: String,
    client: reqwest::Client,
    mock: MockServices,
}

impl TestApp {
    async fn start(with_indexer: bool) -> Self {
        let mock = MockServices::default();
        let mock_addr = spawn_mocks(mock.clone()).await;

        let pool = connect_in_memory().await.unwrap();
        run_migrations(&pool).await.unwrap();

        let sessions = Arc::new(SignedSessionVerifier::new(SecretString::from(SECRET), None));
        let mut pipeline = IngestPipeline::new(Arc::new(SqliteMemoryStore::new(pool)), sessions);

        if with_indexer {
            let embedding = EmbeddingConfig {
                base_url: format!("http://{}/v1", mock_addr),
                max_retries: 0,
                ..EmbeddingConfig::default()
            };
            let vector = VectorConfig {
                host: Some(format!("http://{}", mock_addr)),
                ..VectorConfig::default()
            };
            let embedder =
                OpenAiCompatEmbedder::new(&embedding, SecretString::from("or-key")).unwrap();
            let index =
                PineconeIndex::new(&vector, SecretString::from("pc-key"), "brain").unwrap();
            pipeline = pipeline.with_indexer(Some(Indexer::new(Arc::new(embedder), Arc::new(index))));
        }

        let addr = spawn(router(AppState::new(pipeline))).await;
        Self {
            base: format!("http://{}", addr),
            client: reqwest::Client::new(),
            mock,
        }
    }

    fn cookie(user: &str) -> String {
        let expires = chrono::Utc::now().timestamp() + 3600;
        let token = issue_session_token(&SecretString::from(SECRET), user, expires).unwrap();
        format!("brain-session={}", token)
    }

    async fn send(
        &self,
        method: reqwest::Method,
        path: &str,
        user: Option<&str>,
        body: Option<&str>,
    ) -> (StatusCode, Value) {
        let mut request = self.client.request(method, format!("{}{}", self.base, path));
        if let Some(user) = user {
            request = request.header("Cookie", Self::cookie(user));
        }
        if let Some(body) = body {
            request = request
                .header("Content-Type", "application/json")
                .body(body.to_string());
        }
        let response = request.send().await.unwrap();
        let status = StatusCode::from_u16(response.status().as_u16()).unwrap();
        let json = response.json().await.unwrap_or(Value::Null);
        (status, json)
    }

    async fn ingest(&self, user: &str, body: Value) -> (StatusCode, Value) {
        self.send(
            reqwest::Method::POST,
            "/api/ingest",
            Some(user),
            Some(&body.to_string()),
        )
        .await
    }
}

fn long_note() -> String {
    "My sourdough starter lives on the counter and needs flour and water twice a day. "
        .repeat(20)
}

// ============ Auth gate ============

#[tokio::test]
async fn test_unauthenticated_ingest_is_401() {
    let app = TestApp::start(true).await;
    let (status, body) = app
        .send(
            reqwest::Method::POST,
            "/api/ingest",
            None,
            Some(r#"{"content":"hello world"}"#),
        )
        .await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);
    assert_eq!(body["success"], false);
    assert_eq!(body["error"], "Unauthorized");
    assert_eq!(body["details"], "No user found");
}

#[tokio::test]
async fn test_auth_is_checked_before_body() {
    let app = TestApp::start(true).await;
    let (status, _) = app
        .send(reqwest::Method::POST, "/api/ingest", None, Some("not json"))
        .await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);

    let (status, _) = app
        .send(reqwest::Method::POST, "/api/ingest", None, Some(r#"{"content":""}"#))
        .await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);
}

#[tokio::test]
async fn test_tampered_cookie_is_401() {
    let app = TestApp::start(true).await;
    let cookie = TestApp::cookie("alice").replace("alice", "mallory");
    let response = app
        .client
        .post(format!("{}/api/ingest", app.base))
        .header("Cookie", cookie)
        .json(&json!({ "content": "hello world" }))
        .send()
        .await
        .unwrap();
    assert_eq!(response.status().as_u16(), 401);
}

// ============ Validation ============

#[tokio::test]
async fn test_empty_content_is_400() {
    let app = TestApp::start(true).await;
    for body in [json!({ "content": "" }), json!({ "content": "   \n" }), json!({})] {
        let (status, json) = app.ingest("alice", body).await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert_eq!(json["error"], "Content cannot be empty");
    }
    assert_eq!(app.mock.embed_calls.load(Ordering::SeqCst), 0);
}

#[tokio::test]
async fn test_invalid_json_after_auth_is_400() {
    let app = TestApp::start(true).await;
    let (status, json) = app
        .send(reqwest::Method::POST, "/api/ingest", Some("alice"), Some("{oops"))
        .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(json["error"], "Invalid JSON body");
}

#[tokio::test]
async fn test_non_object_metadata_is_400() {
    let app = TestApp::start(true).await;
    let (status, _) = app
        .ingest("alice", json!({ "content": "hello world", "metadata": [1, 2] }))
        .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
}

// ============ Ingest outcomes ============

#[tokio::test]
async fn test_ingest_indexes_into_user_namespace() {
    let app = TestApp::start(true).await;
    let (status, body) = app
        .ingest(
            "alice",
            json!({ "content": long_note(), "metadata": { "title": "Bread", "tags": ["baking"] } }),
        )
        .await;

    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["success"], true);
    assert_eq!(body["message"], INDEXED_MESSAGE);
    assert!(body.get("warning").is_none());
    let note_id = body["noteId"].as_str().unwrap().to_string();

    let vectors = app.mock.namespace("alice");
    assert!(vectors.len() >= 2, "long note should produce several chunks");
    assert!(app.mock.namespace("bob").is_empty());

    let (_, first_meta) = &vectors[&format!("{}-0", note_id)];
    assert_eq!(first_meta["noteId"], note_id.as_str());
    assert_eq!(first_meta["userId"], "alice");
    assert_eq!(first_meta["title"], "Bread");
    assert_eq!(first_meta["tags"], json!(["baking"]));
    assert_eq!(first_meta["loc.lines.from"], 1);
    assert!(first_meta["text"].as_str().unwrap().starts_with("My sourdough"));
}

#[tokio::test]
async fn test_short_note_is_saved_but_not_indexed() {
    let app = TestApp::start(true).await;
    let (status, body) = app.ingest("alice", json!({ "content": " hi " })).await;

    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["success"], true);
    assert_eq!(body["message"], TOO_SHORT_MESSAGE);
    assert_eq!(app.mock.embed_calls.load(Ordering::SeqCst), 0);
    assert_eq!(app.mock.upsert_calls.load(Ordering::SeqCst), 0);

    let id = body["noteId"].as_str().unwrap();
    let (status, record) = app
        .send(reqwest::Method::GET, &format!("/api/memories/{}", id), Some("alice"), None)
        .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(record["content"], " hi ");
}

#[tokio::test]
async fn test_without_vector_credentials_warns_not_configured() {
    let app = TestApp::start(false).await;
    let (status, body) = app.ingest("alice", json!({ "content": long_note() })).await;

    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["success"], true);
    assert_eq!(body["message"], NOT_CONFIGURED_MESSAGE);
    assert_eq!(body["warning"], NOT_CONFIGURED_WARNING);
    assert!(body["noteId"].is_string());
}

#[tokio::test]
async fn test_index_failure_keeps_record() {
    let app = TestApp::start(true).await;
    app.mock.fail_upserts.store(true, Ordering::SeqCst);

    let (status, body) = app.ingest("alice", json!({ "content": long_note() })).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["success"], true);
    assert_eq!(body["message"], INDEX_FAILED_MESSAGE);
    assert!(!body["warning"].as_str().unwrap().is_empty());

    let (_, list) = app
        .send(reqwest::Method::GET, "/api/memories", Some("alice"), None)
        .await;
    assert_eq!(list["memories"].as_array().unwrap().len(), 1);
}

// ============ Memories ============

#[tokio::test]
async fn test_memories_are_scoped_to_owner() {
    let app = TestApp::start(false).await;
    let (_, body) = app.ingest("alice", json!({ "content": "alice's secret" })).await;
    let id = body["noteId"].as_str().unwrap().to_string();
    // timestamps are millisecond precision
    tokio::time::sleep(Duration::from_millis(5)).await;
    app.ingest("alice", json!({ "content": "another note" })).await;

    let (_, list) = app
        .send(reqwest::Method::GET, "/api/memories?limit=10", Some("alice"), None)
        .await;
    let memories = list["memories"].as_array().unwrap();
    assert_eq!(memories.len(), 2);
    assert_eq!(memories[0]["content"], "another note");

    let (_, list) = app
        .send(reqwest::Method::GET, "/api/memories", Some("bob"), None)
        .await;
    assert!(list["memories"].as_array().unwrap().is_empty());

    let (status, body) = app
        .send(reqwest::Method::GET, &format!("/api/memories/{}", id), Some("bob"), None)
        .await;
    assert_eq!(status, StatusCode::NOT_FOUND);
    assert_eq!(body["error"], "Not found");
}

#[tokio::test]
async fn test_resave_overwrites_vectors_in_place() {
    let app = TestApp::start(true).await;
    let (_, body) = app.ingest("alice", json!({ "content": long_note() })).await;
    let id = body["noteId"].as_str().unwrap().to_string();
    let before = app.mock.namespace("alice").len();

    let updated = long_note().replace("sourdough", "rye-dough");
    let (status, body) = app
        .send(
            reqwest::Method::PUT,
            &format!("/api/memories/{}", id),
            Some("alice"),
            Some(&json!({ "content": updated, "metadata": { "title": "Rye" } }).to_string()),
        )
        .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["noteId"], id.as_str());
    assert_eq!(body["message"], INDEXED_MESSAGE);

    let vectors = app.mock.namespace("alice");
    assert_eq!(vectors.len(), before);
    let (_, meta) = &vectors[&format!("{}-0", id)];
    assert_eq!(meta["title"], "Rye");
    assert!(meta["text"].as_str().unwrap().contains("rye-dough"));
}

#[tokio::test]
async fn test_resave_unknown_memory_is_404() {
    let app = TestApp::start(true).await;
    let (status, body) = app
        .send(
            reqwest::Method::PUT,
            "/api/memories/does-not-exist",
            Some("alice"),
            Some(r#"{"content":"hello world"}"#),
        )
        .await;
    assert_eq!(status, StatusCode::NOT_FOUND);
    assert_eq!(body["success"], false);
    assert_eq!(app.mock.upsert_calls.load(Ordering::SeqCst), 0);
}

// ============ Search ============

#[tokio::test]
async fn test_search_returns_owner_hits() {
    let app = TestApp::start(true).await;
    app.ingest(
        "alice",
        json!({ "content": "Quarterly tax deadline is in April, file the forms early.", "metadata": { "title": "Taxes" } }),
    )
    .await;
    app.ingest("alice", json!({ "content": long_note() })).await;
    app.ingest("bob", json!({ "content": "Quarterly tax deadline for bob." }))
        .await;

    let (status, body) = app
        .send(
            reqwest::Method::POST,
            "/api/search",
            Some("alice"),
            Some(r#"{"query":"Quarterly tax deadline is in April, file the forms early.","topK":1}"#),
        )
        .await;
    assert_eq!(status, StatusCode::OK);
    let results = body["results"].as_array().unwrap();
    assert_eq!(results.len(), 1);
    assert_eq!(results[0]["title"], "Taxes");
    assert!(results[0]["snippet"].as_str().unwrap().contains("tax deadline"));
}

#[tokio::test]
async fn test_search_without_index_is_503() {
    let app = TestApp::start(false).await;
    let (status, body) = app
        .send(
            reqwest::Method::POST,
            "/api/search",
            Some("alice"),
            Some(r#"{"query":"anything"}"#),
        )
        .await;
    assert_eq!(status, StatusCode::SERVICE_UNAVAILABLE);
    assert_eq!(body["success"], false);
}

#[tokio::test]
async fn test_search_empty_query_is_400() {
    let app = TestApp::start(true).await;
    let (status, _) = app
        .send(
            reqwest::Method::POST,
            "/api/search",
            Some("alice"),
            Some(r#"{"query":"  "}"#),
        )
        .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
}

// ============ Health ============

#[tokio::test]
async fn test_health_reports_indexing() {
    let app = TestApp::start(true).await;
    let (status, body) = app.send(reqwest::Method::GET, "/health", None, None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["status"], "ok");
    assert_eq!(body["vectorIndexing"], true);

    let app = TestApp::start(false).await;
    let (_, body) = app.send(reqwest::Method::GET, "/health", None, None).await;
    assert_eq!(body["vectorIndexing"], false);
}

#[tokio::test]
async fn test_search_after_shrinking_resave_shows_current_text() {
    let app = TestApp::start(true).await;
    let mut long = String::new();
    for i in 0..40 {
        long.push_str(&format!("Grocery list item number {} is apples. ", i));
        long.push_str("Bank account password hint is zebra giraffe. ");
    }
    let (_, body) = app.ingest("alice", json!({ "content": long })).await;
    let id = body["noteId"].as_str().unwrap().to_string();

    let (status, _) = app
        .send(
            reqwest::Method::PUT,
            &format!("/api/memories/{}", id),
            Some("alice"),
            Some(r#"{"content":"Just a short note now."}"#),
        )
        .await;
    assert_eq!(status, StatusCode::OK);

    let (status, body) = app
        .send(
            reqwest::Method::POST,
            "/api/search",
            Some("alice"),
            Some(r#"{"query":"password hint zebra giraffe"}"#),
        )
        .await;
    assert_eq!(status, StatusCode::OK);
    for hit in body["results"].as_array().unwrap() {
        assert_eq!(hit["snippet"], "Just a short note now.");
    }
}

// ============ Embedding retries ============

/// Embedding endpoint that answers `status` for the first `failures` calls.
#[derive(Clone)]
struct FlakyEmbeddings {
    calls: Arc<AtomicUsize>,
    status: StatusCode,
    failures: usize,
}

async fn flaky_embeddings(
    State(flaky): State<FlakyEmbeddings>,
    Json(body): Json<Value>,
) -> (StatusCode, Json<Value>) {
    let call = flaky.calls.fetch_add(1, Ordering::SeqCst);
    if call < flaky.failures {
        return (flaky.status, Json(json!({ "error": { "message": "try again" } })));
    }
    (StatusCode::OK, Json(embedding_response(&body)))
}

async fn flaky_embedder(
    status: StatusCode,
    failures: usize,
) -> (OpenAiCompatEmbedder, Arc<AtomicUsize>) {
    let calls = Arc::new(AtomicUsize::new(0));
    let app = Router::new()
        .route("/v1/embeddings", post(flaky_embeddings))
        .with_state(FlakyEmbeddings {
            calls: calls.clone(),
            status,
            failures,
        });
    let addr = spawn(app).await;

    let config = EmbeddingConfig {
        base_url: format!("http://{}/v1", addr),
        max_retries: 3,
        ..EmbeddingConfig::default()
    };
    let embedder = OpenAiCompatEmbedder::new(&config, SecretString::from("or-key"))
        .unwrap()
        .with_backoff_base(Duration::from_millis(1));
    assert_eq!(embedder.endpoint(), format!("http://{}/v1/embeddings", addr));
    (embedder, calls)
}

fn texts(items: &[&str]) -> Vec<String> {
    items.iter().map(|s| s.to_string()).collect()
}

#[tokio::test]
async fn test_embedding_retries_after_rate_limit() {
    let (embedder, calls) = flaky_embedder(StatusCode::TOO_MANY_REQUESTS, 1).await;
    let vectors = embedder
        .embed_documents(&texts(&["first", "second"]))
        .await
        .unwrap();
    assert_eq!(vectors.len(), 2);
    assert_eq!(vectors[0], embed("first"));
    assert_eq!(calls.load(Ordering::SeqCst), 2);
}

#[tokio::test]
async fn test_embedding_retries_server_errors() {
    let (embedder, calls) = flaky_embedder(StatusCode::SERVICE_UNAVAILABLE, 2).await;
    let vector = embedder.embed_query("hello").await.unwrap();
    assert_eq!(vector, embed("hello"));
    assert_eq!(calls.load(Ordering::SeqCst), 3);
}

#[tokio::test]
async fn test_embedding_client_error_is_not_retried() {
    let (embedder, calls) = flaky_embedder(StatusCode::UNAUTHORIZED, usize::MAX).await;
    let err = embedder
        .embed_documents(&texts(&["hello"]))
        .await
        .unwrap_err();
    assert!(err.to_string().contains("401"));
    assert_eq!(calls.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn test_embedding_gives_up_after_max_retries() {
    let (embedder, calls) = flaky_embedder(StatusCode::TOO_MANY_REQUESTS, usize::MAX).await;
    let err = embedder
        .embed_documents(&texts(&["hello"]))
        .await
        .unwrap_err();
    assert!(err.to_string().contains("429"));
    assert_eq!(calls.load(Ordering::SeqCst), 4);
}

#[tokio::test]
async fn test_embedding_retries_network_errors() {
    // Bind then drop to get a port nothing listens on.
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    drop(listener);

    let config = EmbeddingConfig {
        base_url: format!("http://{}/v1", addr),
        max_retries: 2,
        ..EmbeddingConfig::default()
    };
    let started = std::time::Instant::now();
    let err = OpenAiCompatEmbedder::new(&config, SecretString::from("or-key"))
        .unwrap()
        .with_backoff_base(Duration::from_millis(20))
        .embed_documents(&texts(&["hello"]))
        .await
        .unwrap_err();
    assert!(err.to_string().starts_with("embedding request failed"));
    // two backoff sleeps: 20ms + 40ms
    assert!(started.elapsed() >= Duration::from_millis(60));
}
