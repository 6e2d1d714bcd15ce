//! SQLite-backed [`MemoryStore`] implementation.
//!
//! Records live in the `memories` table created by
//! [`run_migrations`](crate::migrate::run_migrations). Timestamps are stored
//! as Unix milliseconds; metadata as a JSON object string.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::sqlite::SqliteRow;
use sqlx::{Row, SqlitePool};

use brain_core::models::{MemoryRecord, Metadata, NewMemory};
use brain_core::store::{MemoryStore, StoreError};

const SELECT_COLUMNS: &str = "id, user_id, content, metadata_json, created_at, updated_at";

/// SQLite implementation of the [`MemoryStore`] trait. Cheap to clone;
/// clones share the pool.
#[derive(Clone)]
pub struct SqliteMemoryStore {
    pool: SqlitePool,
}

impl SqliteMemoryStore {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }
}

/// Convert a driver error, keeping the SQLite result code when there is one.
fn store_error(err: sqlx::Error) -> StoreError {
    let code = err
        .as_database_error()
        .and_then(|db| db.code())
        .map(|c| c.into_owned());
    StoreError::Backend {
        message: err.to_string(),
        code,
    }
}

fn millis_to_datetime(ms: i64) -> DateTime<Utc> {
    DateTime::from_timestamp_millis(ms).unwrap_or_default()
}

fn row_to_record(row: &SqliteRow) -> Result<MemoryRecord, StoreError> {
    let metadata_json: String = row.try_get("metadata_json").map_err(store_error)?;
    let metadata: Metadata = serde_json::from_str(&metadata_json)
        .map_err(|e| StoreError::backend(format!("corrupt metadata_json: {}", e)))?;
    Ok(MemoryRecord {
        id: row.try_get("id").map_err(store_error)?,
        user_id: row.try_get("user_id").map_err(store_error)?,
        content: row.try_get("content").map_err(store_error)?,
        metadata,
        created_at: millis_to_datetime(row.try_get("created_at").map_err(store_error)?),
        updated_at: millis_to_datetime(row.try_get("updated_at").map_err(store_error)?),
    })
}

fn metadata_to_json(metadata: &Metadata) -> Result<String, StoreError> {
    serde_json::to_string(metadata).map_err(|e| StoreError::backend(e.to_string()))
}

#[async_trait]
impl MemoryStore for SqliteMemoryStore {
    async fn insert(&self, memory: NewMemory) -> Result<MemoryRecord, StoreError> {
        let id = uuid::Uuid::new_v4().to_string();
        let now = Utc::now().timestamp_millis();
        let metadata_json = metadata_to_json(&memory.metadata)?;

        sqlx::query(
            r#"
            INSERT INTO memories (id, user_id, content, metadata_json, created_at, updated_at)
            VALUES (?, ?, ?, ?, ?, ?)
            "#,
        )
        .bind(&id)
        .bind(&memory.user_id)
        .bind(&memory.content)
        .bind(&metadata_json)
        .bind(now)
        .bind(now)
        .execute(&self.pool)
        .await
        .map_err(store_error)?;

        Ok(MemoryRecord {
            id,
            user_id: memory.user_id,
            content: memory.content,
            metadata: memory.metadata,
            created_at: millis_to_datetime(now),
            updated_at: millis_to_datetime(now),
        })
    }

    async fn update(
        &self,
        user_id: &str,
        id: &str,
        content: &str,
        metadata: &Metadata,
    ) -> Result<MemoryRecord, StoreError> {
        let now = Utc::now().timestamp_millis();
        let metadata_json = metadata_to_json(metadata)?;

        let row = sqlx::query(&format!(
            r#"
            UPDATE memories
            SET content = ?, metadata_json = ?, updated_at = ?
            WHERE id = ? AND user_id = ?
            RETURNING {}
            "#,
            SELECT_COLUMNS
        ))
        .bind(content)
        .bind(&metadata_json)
        .bind(now)
        .bind(id)
        .bind(user_id)
        .fetch_optional(&self.pool)
        .await
        .map_err(store_error)?;

        match row {
            Some(row) => row_to_record(&row),
            None => Err(StoreError::NotFound(id.to_string())),
        }
    }

    async fn get(&self, user_id: &str, id: &str) -> Result<Option<MemoryRecord>, StoreError> {
        let row = sqlx::query(&format!(
            "SELECT {} FROM memories WHERE id = ? AND user_id = ?",
            SELECT_COLUMNS
        ))
        .bind(id)
        .bind(user_id)
        .fetch_optional(&self.pool)
        .await
        .map_err(store_error)?;

        row.as_ref().map(row_to_record).transpose()
    }

    async fn list(&self, user_id: &str, limit: usize) -> Result<Vec<MemoryRecord>, StoreError> {
        let rows = sqlx::query(&format!(
            r#"
            SELECT {} FROM memories
            WHERE user_id = ?
            ORDER BY updated_at DESC, created_at DESC, id ASC
            LIMIT ?
            "#,
            SELECT_COLUMNS
        ))
        .bind(user_id)
        .bind(limit.min(i64::MAX as usize) as i64)
        .fetch_all(&self.pool)
        .await
        .map_err(store_error)?;

        rows.iter().map(row_to_record).collect()
    }
}
