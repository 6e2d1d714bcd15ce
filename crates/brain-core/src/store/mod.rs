//! Storage abstraction for memory records.
//!
//! The [`MemoryStore`] trait is the authoritative persistence layer of the
//! ingest flow. The SQLite backend lives in the app crate; an in-memory
//! backend is provided here for tests.
//!
//! Every operation is scoped to a user id. A record owned by another user is
//! reported as [`StoreError::NotFound`], never returned.

pub mod memory;

use async_trait::async_trait;
use thiserror::Error;

use crate::models::{MemoryRecord, Metadata, NewMemory};

/// Errors reported by a [`MemoryStore`].
#[derive(Debug, Error)]
pub enum StoreError {
    /// The backend rejected or failed the operation. `code` carries the
    /// backend's own error code when it exposes one.
    #[error("{message}")]
    Backend {
        message: String,
        code: Option<String>,
    },

    #[error("memory not found: {0}")]
    NotFound(String),
}

impl StoreError {
    pub fn backend(message: impl Into<String>) -> Self {
        StoreError::Backend {
            message: message.into(),
            code: None,
        }
    }

    pub fn code(&self) -> Option<&str> {
        match self {
            StoreError::Backend { code, .. } => code.as_deref(),
            StoreError::NotFound(_) => None,
        }
    }
}

/// Abstract storage backend for memory records.
///
/// | Method | Purpose |
/// |--------|---------|
/// | [`insert`](MemoryStore::insert) | Persist a new record and assign its id |
/// | [`update`](MemoryStore::update) | Replace content and metadata of an owned record |
/// | [`get`](MemoryStore::get) | Fetch one owned record |
/// | [`list`](MemoryStore::list) | Most recently updated records of a user |
#[async_trait]
pub trait MemoryStore: Send + Sync {
    /// Insert a new record. The store assigns `id`, `created_at` and
    /// `updated_at`.
    async fn insert(&self, memory: NewMemory) -> Result<MemoryRecord, StoreError>;

    /// Replace the content and metadata of record `id` owned by `user_id`.
    async fn update(
        &self,
        user_id: &str,
        id: &str,
        content: &str,
        metadata: &Metadata,
    ) -> Result<MemoryRecord, StoreError>;

    /// Fetch record `id` if it is owned by `user_id`.
    async fn get(&self, user_id: &str, id: &str) -> Result<Option<MemoryRecord>, StoreError>;

    /// Up to `limit` records of `user_id`, newest `updated_at` first.
    async fn list(&self, user_id: &str, limit: usize) -> Result<Vec<MemoryRecord>, StoreError>;
}
