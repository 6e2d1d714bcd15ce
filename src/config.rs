//! Configuration: a TOML file for settings, the environment for secrets.
//!
//! Settings are parsed with `serde` + `toml` and validated in
//! [`load_config`]. Credentials never live in the TOML file; they are read
//! from the environment (after `.env` is loaded) by [`Secrets::from_env`]
//! and held as [`SecretString`] so they cannot leak through `Debug` output.

use anyhow::{bail, Context, Result};
use brain_core::chunk::{ChunkParams, DEFAULT_CHUNK_OVERLAP, DEFAULT_CHUNK_SIZE};
use brain_core::ingest::MIN_INDEX_CHARS;
use secrecy::SecretString;
use serde::Deserialize;
use std::path::{Path, PathBuf};

#[derive(Debug, Deserialize, Clone)]
pub struct Config {
    pub db: DbConfig,
    pub server: ServerConfig,
    #[serde(default)]
    pub chunking: ChunkingConfig,
    #[serde(default)]
    pub auth: AuthConfig,
    #[serde(default)]
    pub embedding: EmbeddingConfig,
    #[serde(default)]
    pub vector: VectorConfig,
}

#[derive(Debug, Deserialize, Clone)]
pub struct DbConfig {
    pub path: PathBuf,
}

#[derive(Debug, Deserialize, Clone)]
pub struct ServerConfig {
    pub bind: String,
}

#[derive(Debug, Deserialize, Clone)]
pub struct ChunkingConfig {
    #[serde(default = "default_chunk_size")]
    pub chunk_size: usize,
    #[serde(default = "default_chunk_overlap")]
    pub chunk_overlap: usize,
    /// Trimmed content shorter than this is stored but not indexed.
    #[serde(default = "default_min_index_chars")]
    pub min_index_chars: usize,
}

impl Default for ChunkingConfig {
    fn default() -> Self {
        Self {
            chunk_size: DEFAULT_CHUNK_SIZE,
            chunk_overlap: DEFAULT_CHUNK_OVERLAP,
            min_index_chars: MIN_INDEX_CHARS,
        }
    }
}

impl ChunkingConfig {
    pub fn params(&self) -> Result<ChunkParams> {
        ChunkParams::new(self.chunk_size, self.chunk_overlap)
            .with_context(|| "invalid [chunking] settings")
    }
}

fn default_chunk_size() -> usize {
    DEFAULT_CHUNK_SIZE
}
fn default_chunk_overlap() -> usize {
    DEFAULT_CHUNK_OVERLAP
}
fn default_min_index_chars() -> usize {
    MIN_INDEX_CHARS
}

#[derive(Debug, Deserialize, Clone, Copy, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum AuthProvider {
    /// Validate the Supabase SSR session cookie against the Supabase auth API.
    Supabase,
    /// Verify a locally signed HMAC session cookie.
    Signed,
}

#[derive(Debug, Deserialize, Clone)]
pub struct AuthConfig {
    #[serde(default = "default_auth_provider")]
    pub provider: AuthProvider,
    /// Session cookie name. Defaults to `sb-<project-ref>-auth-token` for
    /// Supabase and `brain-session` for signed cookies.
    #[serde(default)]
    pub cookie_name: Option<String>,
    /// Lifetime of cookies minted by `brain session`.
    #[serde(default = "default_session_ttl_secs")]
    pub session_ttl_secs: u64,
    #[serde(default = "default_auth_timeout_secs")]
    pub timeout_secs: u64,
}

impl Default for AuthConfig {
    fn default() -> Self {
        Self {
            provider: default_auth_provider(),
            cookie_name: None,
            session_ttl_secs: default_session_ttl_secs(),
            timeout_secs: default_auth_timeout_secs(),
        }
    }
}

fn default_auth_provider() -> AuthProvider {
    AuthProvider::Supabase
}
fn default_session_ttl_secs() -> u64 {
    7 * 24 * 60 * 60
}
fn default_auth_timeout_secs() -> u64 {
    10
}

#[derive(Debug, Deserialize, Clone)]
pub struct EmbeddingConfig {
    /// OpenAI-compatible API base. `/embeddings` is appended.
    #[serde(default = "default_embedding_base_url")]
    pub base_url: String,
    #[serde(default = "default_embedding_model")]
    pub model: String,
    #[serde(default = "default_batch_size")]
    pub batch_size: usize,
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,
    /// Replace newlines with spaces before embedding.
    #[serde(default = "default_true")]
    pub strip_new_lines: bool,
}

impl Default for EmbeddingConfig {
    fn default() -> Self {
        Self {
            base_url: default_embedding_base_url(),
            model: default_embedding_model(),
            batch_size: default_batch_size(),
            max_retries: default_max_retries(),
            timeout_secs: default_timeout_secs(),
            strip_new_lines: true,
        }
    }
}

fn default_embedding_base_url() -> String {
    "https://openrouter.ai/api/v1".to_string()
}
fn default_embedding_model() -> String {
    "text-embedding-ada-002".to_string()
}
fn default_batch_size() -> usize {
    512
}
fn default_max_retries() -> u32 {
    5
}
fn default_timeout_secs() -> u64 {
    30
}
fn default_true() -> bool {
    true
}

#[derive(Debug, Deserialize, Clone)]
pub struct VectorConfig {
    /// Control-plane URL used to resolve the index host.
    #[serde(default = "default_controller_url")]
    pub controller_url: String,
    /// Data-plane host. Skips control-plane resolution when set.
    #[serde(default)]
    pub host: Option<String>,
    #[serde(default = "default_upsert_batch_size")]
    pub upsert_batch_size: usize,
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,
}

impl Default for VectorConfig {
    fn default() -> Self {
        Self {
            controller_url: default_controller_url(),
            host: None,
            upsert_batch_size: default_upsert_batch_size(),
            timeout_secs: default_timeout_secs(),
        }
    }
}

fn default_controller_url() -> String {
    "https://api.pinecone.io".to_string()
}
fn default_upsert_batch_size() -> usize {
    100
}

/// Credentials read from the environment.
#[derive(Debug, Default, Clone)]
pub struct Secrets {
    pub pinecone_api_key: Option<SecretString>,
    pub pinecone_index_name: Option<String>,
    pub openrouter_api_key: Option<SecretString>,
    pub supabase_url: Option<String>,
    pub supabase_anon_key: Option<SecretString>,
    pub session_secret: Option<SecretString>,
}

/// The three values required to enable vector indexing.
pub struct VectorCredentials {
    pub pinecone_api_key: SecretString,
    pub pinecone_index_name: String,
    pub openrouter_api_key: SecretString,
}

impl Secrets {
    /// Read secrets from the process environment. Empty values count as
    /// absent. Call `dotenvy::dotenv().ok()` first to honor `.env`.
    pub fn from_env() -> Self {
        Self {
            pinecone_api_key: optional_var(&["PINECONE_API_KEY"]).map(SecretString::from),
            pinecone_index_name: optional_var(&["PINECONE_INDEX_NAME"]),
            openrouter_api_key: optional_var(&["OPENROUTER_API_KEY"]).map(SecretString::from),
            supabase_url: optional_var(&["SUPABASE_URL", "NEXT_PUBLIC_SUPABASE_URL"]),
            supabase_anon_key: optional_var(&["SUPABASE_ANON_KEY", "NEXT_PUBLIC_SUPABASE_ANON_KEY"])
                .map(SecretString::from),
            session_secret: optional_var(&["BRAIN_SESSION_SECRET"]).map(SecretString::from),
        }
    }

    /// `Some` only when all three vector credentials are present.
    pub fn vector_credentials(&self) -> Option<VectorCredentials> {
        Some(VectorCredentials {
            pinecone_api_key: self.pinecone_api_key.clone()?,
            pinecone_index_name: self.pinecone_index_name.clone()?,
            openrouter_api_key: self.openrouter_api_key.clone()?,
        })
    }
}

fn optional_var(names: &[&str]) -> Option<String> {
    names
        .iter()
        .filter_map(|name| std::env::var(name).ok())
        .map(|v| v.trim().to_string())
        .find(|v| !v.is_empty())
}

pub fn load_config(path: &Path) -> Result<Config> {
    let content = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read config file: {}", path.display()))?;

    let config: Config = toml::from_str(&content).with_context(|| "Failed to parse config file")?;

    // Validate chunking
    config.chunking.params()?;

    // Validate embedding
    if config.embedding.batch_size == 0 {
        bail!("embedding.batch_size must be > 0");
    }
    if config.embedding.model.trim().is_empty() {
        bail!("embedding.model must not be empty");
    }
    if !config.embedding.base_url.starts_with("http") {
        bail!(
            "embedding.base_url must be an http(s) URL, got '{}'",
            config.embedding.base_url
        );
    }

    // Validate vector index
    if config.vector.upsert_batch_size == 0 {
        bail!("vector.upsert_batch_size must be > 0");
    }
    if config.vector.upsert_batch_size > 1000 {
        bail!("vector.upsert_batch_size must be <= 1000");
    }

    if matches!(config.auth.cookie_name.as_deref(), Some(name) if name.trim().is_empty()) {
        bail!("auth.cookie_name must not be empty when set");
    }

    Ok(config)
}
