//! In-memory [`MemoryStore`] implementation for tests.
//!
//! Uses a `HashMap` behind `std::sync::RwLock`. A failing variant rejects
//! every operation with a fixed backend error.

use std::collections::HashMap;
use std::sync::RwLock;

use async_trait::async_trait;
use chrono::Utc;

use crate::models::{MemoryRecord, Metadata, NewMemory};

use super::{MemoryStore, StoreError};

pub struct InMemoryMemoryStore {
    records: RwLock<HashMap<String, MemoryRecord>>,
    fail_with: Option<(String, Option<String>)>,
}

impl InMemoryMemoryStore {
    pub fn new() -> Self {
        Self {
            records: RwLock::new(HashMap::new()),
            fail_with: None,
        }
    }

    /// A store whose every operation fails with the given message and code.
    pub fn failing(message: impl Into<String>, code: Option<&str>) -> Self {
        Self {
            records: RwLock::new(HashMap::new()),
            fail_with: Some((message.into(), code.map(str::to_string))),
        }
    }

    /// Total number of records across all users.
    pub fn count(&self) -> usize {
        self.records.read().unwrap_or_else(|e| e.into_inner()).len()
    }

    fn check(&self) -> Result<(), StoreError> {
        match &self.fail_with {
            Some((message, code)) => Err(StoreError::Backend {
                message: message.clone(),
                code: code.clone(),
            }),
            None => Ok(()),
        }
    }
}

impl Default for InMemoryMemoryStore {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl MemoryStore for InMemoryMemoryStore {
    async fn insert(&self, memory: NewMemory) -> Result<MemoryRecord, StoreError> {
        self.check()?;
        let now = Utc::now();
        let record = MemoryRecord {
            id: uuid::Uuid::new_v4().to_string(),
            user_id: memory.user_id,
            content: memory.content,
            metadata: memory.metadata,
            created_at: now,
            updated_at: now,
        };
        self.records
            .write()
            .unwrap_or_else(|e| e.into_inner())
            .insert(record.id.clone(), record.clone());
        Ok(record)
    }

    async fn update(
        &self,
        user_id: &str,
        id: &str,
        content: &str,
        metadata: &Metadata,
    ) -> Result<MemoryRecord, StoreError> {
        self.check()?;
        let mut records = self.records.write().unwrap_or_else(|e| e.into_inner());
        match records.get_mut(id) {
            Some(record) if record.user_id == user_id => {
                record.content = content.to_string();
                record.metadata = metadata.clone();
                record.updated_at = Utc::now();
                Ok(record.clone())
            }
            _ => Err(StoreError::NotFound(id.to_string())),
        }
    }

    async fn get(&self, user_id: &str, id: &str) -> Result<Option<MemoryRecord>, StoreError> {
        self.check()?;
        let records = self.records.read().unwrap_or_else(|e| e.into_inner());
        Ok(records
            .get(id)
            .filter(|record| record.user_id == user_id)
            .cloned())
    }

    async fn list(&self, user_id: &str, limit: usize) -> Result<Vec<MemoryRecord>, StoreError> {
        self.check()?;
        let records = self.records.read().unwrap_or_else(|e| e.into_inner());
        let mut owned: Vec<MemoryRecord> = records
            .values()
            .filter(|record| record.user_id == user_id)
            .cloned()
            .collect();
        owned.sort_by(|a, b| {
            b.updated_at
                .cmp(&a.updated_at)
                .then_with(|| b.created_at.cmp(&a.created_at))
        });
        owned.truncate(limit);
        Ok(owned)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn new_memory(user: &str, content: &str) -> NewMemory {
        NewMemory {
            user_id: user.to_string(),
            content: content.to_string(),
            metadata: Metadata::new(),
        }
    }

    #[tokio::test]
    async fn test_insert_assigns_unique_ids() {
        let store = InMemoryMemoryStore::new();
        let a = store.insert(new_memory("u1", "first")).await.unwrap();
        let b = store.insert(new_memory("u1", "second")).await.unwrap();
        assert_ne!(a.id, b.id);
        assert_eq!(a.created_at, a.updated_at);
        assert_eq!(store.count(), 2);
    }

    #[tokio::test]
    async fn test_records_are_scoped_to_owner() {
        let store = InMemoryMemoryStore::new();
        let rec = store.insert(new_memory("u1", "private")).await.unwrap();

        assert!(store.get("u2", &rec.id).await.unwrap().is_none());
        assert!(store.list("u2", 10).await.unwrap().is_empty());
        let err = store
            .update("u2", &rec.id, "hijack", &Metadata::new())
            .await
            .unwrap_err();
        assert!(matches!(err, StoreError::NotFound(_)));
        assert_eq!(
            store.get("u1", &rec.id).await.unwrap().unwrap().content,
            "private"
        );
    }

    #[tokio::test]
    async fn test_update_replaces_content() {
        let store = InMemoryMemoryStore::new();
        let rec = store.insert(new_memory("u1", "draft")).await.unwrap();
        let updated = store
            .update("u1", &rec.id, "final", &Metadata::new())
            .await
            .unwrap();
        assert_eq!(updated.id, rec.id);
        assert_eq!(updated.content, "final");
        assert!(updated.updated_at >= rec.updated_at);
    }

    #[tokio::test]
    async fn test_failing_store_reports_code() {
        let store = InMemoryMemoryStore::failing("relation does not exist", Some("42P01"));
        let err = store.insert(new_memory("u1", "x")).await.unwrap_err();
        assert_eq!(err.to_string(), "relation does not exist");
        assert_eq!(err.code(), Some("42P01"));
        assert_eq!(store.count(), 0);
    }
}
