//! SQLite long-term memory store.
//!
//! Implements `LongTermBackend` from `steward-core`. Values are stored as JSON
//! text. Insertion order is the autoincrement row id, which is what eviction
//! and "newest first" ordering use.

use serde_json::Value;
use sqlx::Row;
use steward_core::memory::LongTermBackend;
use steward_types::error::RepositoryError;
use steward_types::memory::LongTermEntry;

use super::pool::DatabasePool;
use super::{format_datetime, parse_datetime};

/// SQLite-backed implementation of `LongTermBackend`.
#[derive(Debug, Clone)]
pub struct SqliteLongTermStore {
    pool: DatabasePool,
}

impl SqliteLongTermStore {
    pub fn new(pool: DatabasePool) -> Self {
        Self { pool }
    }
}

// ---------------------------------------------------------------------------
// Private Row types for SQLite-to-domain mapping
// ---------------------------------------------------------------------------

struct MemoryRow {
    namespace: String,
    memory_type: String,
    key: String,
    storage_key: String,
    fingerprint: String,
    value: String,
    source_analysis: Option<String>,
    created_at: String,
    updated_at: String,
}

impl MemoryRow {
    fn from_row(row: &sqlx::sqlite::SqliteRow) -> Result<Self, sqlx::Error> {
        Ok(Self {
            namespace: row.try_get("namespace")?,
            memory_type: row.try_get("memory_type")?,
            key: row.try_get("key")?,
            storage_key: row.try_get("storage_key")?,
            fingerprint: row.try_get("fingerprint")?,
            value: row.try_get("value")?,
            source_analysis: row.try_get("source_analysis")?,
            created_at: row.try_get("created_at")?,
            updated_at: row.try_get("updated_at")?,
        })
    }

    fn into_entry(self) -> Result<LongTermEntry, RepositoryError> {
        let value: Value = serde_json::from_str(&self.value)
            .map_err(|e| RepositoryError::Query(format!("invalid JSON value: {e}")))?;

        Ok(LongTermEntry {
            namespace: self.namespace,
            memory_type: self.memory_type,
            key: self.key,
            storage_key: self.storage_key,
            fingerprint: self.fingerprint,
            value,
            source_analysis: self.source_analysis,
            created_at: parse_datetime(&self.created_at)?,
            updated_at: parse_datetime(&self.updated_at)?,
        })
    }
}

const SELECT_COLUMNS: &str = "SELECT namespace, memory_type, key, storage_key, fingerprint, value, \
     source_analysis, created_at, updated_at FROM long_term_memories";

// ---------------------------------------------------------------------------
// LongTermBackend implementation
// ---------------------------------------------------------------------------

impl LongTermBackend for SqliteLongTermStore {
    async fn fingerprint_exists(
        &self,
        namespace: &str,
        fingerprint: &str,
    ) -> Result<bool, RepositoryError> {
        let row = sqlx::query(
            "SELECT 1 FROM long_term_memories WHERE namespace = ? AND fingerprint = ? LIMIT 1",
        )
        .bind(namespace)
        .bind(fingerprint)
        .fetch_optional(&self.pool.reader)
        .await
        .map_err(|e| RepositoryError::Query(e.to_string()))?;

        Ok(row.is_some())
    }

    async fn count(&self, namespace: &str) -> Result<u64, RepositoryError> {
        let row = sqlx::query("SELECT COUNT(*) as cnt FROM long_term_memories WHERE namespace = ?")
            .bind(namespace)
            .fetch_one(&self.pool.reader)
            .await
            .map_err(|e| RepositoryError::Query(e.to_string()))?;

        let count: i64 = row
            .try_get("cnt")
            .map_err(|e| RepositoryError::Query(e.to_string()))?;
        Ok(count.max(0) as u64)
    }

    async fn evict_oldest(&self, namespace: &str, count: u64) -> Result<u64, RepositoryError> {
        if count == 0 {
            return Ok(0);
        }
        let limit = i64::try_from(count).unwrap_or(i64::MAX);

        let result = sqlx::query(
            "DELETE FROM long_term_memories WHERE id IN (
                SELECT id FROM long_term_memories WHERE namespace = ? ORDER BY id ASC LIMIT ?
            )",
        )
        .bind(namespace)
        .bind(limit)
        .execute(&self.pool.writer)
        .await
        .map_err(|e| RepositoryError::Query(e.to_string()))?;

        Ok(result.rows_affected())
    }

    async fn upsert(&self, entry: &LongTermEntry) -> Result<(), RepositoryError> {
        let value = serde_json::to_string(&entry.value)
            .map_err(|e| RepositoryError::Query(format!("failed to serialize value: {e}")))?;

        sqlx::query(
            "INSERT INTO long_term_memories
                (namespace, memory_type, key, storage_key, fingerprint, value, source_analysis, created_at, updated_at)
             VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?)
             ON CONFLICT(namespace, memory_type, storage_key) DO UPDATE SET
                fingerprint = excluded.fingerprint,
                value = excluded.value,
                source_analysis = excluded.source_analysis,
                updated_at = excluded.updated_at",
        )
        .bind(&entry.namespace)
        .bind(&entry.memory_type)
        .bind(&entry.key)
        .bind(&entry.storage_key)
        .bind(&entry.fingerprint)
        .bind(&value)
        .bind(&entry.source_analysis)
        .bind(format_datetime(&entry.created_at))
        .bind(format_datetime(&entry.updated_at))
        .execute(&self.pool.writer)
        .await
        .map_err(|e| RepositoryError::Query(e.to_string()))?;

        Ok(())
    }

    async fn latest_by_key(
        &self,
        namespace: &str,
        key: &str,
    ) -> Result<Option<LongTermEntry>, RepositoryError> {
        let row = sqlx::query(&format!(
            "{SELECT_COLUMNS} WHERE namespace = ? AND key = ? ORDER BY id DESC LIMIT 1"
        ))
        .bind(namespace)
        .bind(key)
        .fetch_optional(&self.pool.reader)
        .await
        .map_err(|e| RepositoryError::Query(e.to_string()))?;

        match row {
            Some(row) => {
                let memory_row =
                    MemoryRow::from_row(&row).map_err(|e| RepositoryError::Query(e.to_string()))?;
                Ok(Some(memory_row.into_entry()?))
            }
            None => Ok(None),
        }
    }

    async fn search(
        &self,
        namespace: &str,
        memory_type: &str,
        limit: u32,
    ) -> Result<Vec<LongTermEntry>, RepositoryError> {
        let rows = sqlx::query(&format!(
            "{SELECT_COLUMNS} WHERE namespace = ? AND memory_type = ? ORDER BY id DESC LIMIT ?"
        ))
        .bind(namespace)
        .bind(memory_type)
        .bind(i64::from(limit))
        .fetch_all(&self.pool.reader)
        .await
        .map_err(|e| RepositoryError::Query(e.to_string()))?;

        rows.iter()
            .map(|row| {
                MemoryRow::from_row(row)
                    .map_err(|e| RepositoryError::Query(e.to_string()))?
                    .into_entry()
            })
            .collect()
    }

    async fn ping(&self) -> Result<(), RepositoryError> {
        sqlx::query("SELECT 1")
            .execute(&self.pool.reader)
            .await
            .map_err(|_| RepositoryError::Connection)?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sqlite::test_pool;
    use chrono::Utc;
    use serde_json::json;
    use steward_types::memory::INSIGHT_MEMORY_TYPE;

    fn entry(namespace: &str, key: &str, fingerprint: &str, value: Value) -> LongTermEntry {
        let now = Utc::now();
        LongTermEntry {
            namespace: namespace.to_string(),
            memory_type: INSIGHT_MEMORY_TYPE.to_string(),
            key: key.to_string(),
            storage_key: format!("{key}_{fingerprint}"),
            fingerprint: format!("v1:{fingerprint}"),
            value,
            source_analysis: Some("weekly-report".to_string()),
            created_at: now,
            updated_at: now,
        }
    }

    #[tokio::test]
    async fn test_upsert_and_latest_by_key() {
        let store = SqliteLongTermStore::new(test_pool().await);

        store
            .upsert(&entry("acme", "pricing", "aaa", json!({"trend": "flat"})))
            .await
            .unwrap();
        store
            .upsert(&entry("acme", "pricing", "bbb", json!({"trend": "up"})))
            .await
            .unwrap();

        let latest = store.latest_by_key("acme", "pricing").await.unwrap().unwrap();
        assert_eq!(latest.value, json!({"trend": "up"}));
        assert_eq!(latest.source_analysis.as_deref(), Some("weekly-report"));
        assert_eq!(store.count("acme").await.unwrap(), 2);

        assert!(store.latest_by_key("acme", "missing").await.unwrap().is_none());
        assert!(store.latest_by_key("other", "pricing").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_upsert_same_storage_key_updates_in_place() {
        let store = SqliteLongTermStore::new(test_pool().await);

        store
            .upsert(&entry("acme", "pricing", "aaa", json!({"v": 1})))
            .await
            .unwrap();
        store
            .upsert(&entry("acme", "pricing", "aaa", json!({"v": 2})))
            .await
            .unwrap();

        assert_eq!(store.count("acme").await.unwrap(), 1);
        let latest = store.latest_by_key("acme", "pricing").await.unwrap().unwrap();
        assert_eq!(latest.value, json!({"v": 2}));
    }

    #[tokio::test]
    async fn test_fingerprint_exists_is_namespace_scoped() {
        let store = SqliteLongTermStore::new(test_pool().await);
        store
            .upsert(&entry("acme", "pricing", "aaa", json!({})))
            .await
            .unwrap();

        assert!(store.fingerprint_exists("acme", "v1:aaa").await.unwrap());
        assert!(!store.fingerprint_exists("acme", "v1:bbb").await.unwrap());
        assert!(!store.fingerprint_exists("globex", "v1:aaa").await.unwrap());
    }

    #[tokio::test]
    async fn test_evict_oldest_removes_in_insertion_order() {
        let store = SqliteLongTermStore::new(test_pool().await);
        for i in 0..4 {
            store
                .upsert(&entry("acme", &format!("k{i}"), &format!("f{i}"), json!({"i": i})))
                .await
                .unwrap();
        }
        store
            .upsert(&entry("globex", "k0", "f0", json!({})))
            .await
            .unwrap();

        let deleted = store.evict_oldest("acme", 2).await.unwrap();
        assert_eq!(deleted, 2);
        assert_eq!(store.count("acme").await.unwrap(), 2);
        assert_eq!(store.count("globex").await.unwrap(), 1);
        assert!(store.latest_by_key("acme", "k0").await.unwrap().is_none());
        assert!(store.latest_by_key("acme", "k1").await.unwrap().is_none());
        assert!(store.latest_by_key("acme", "k2").await.unwrap().is_some());

        assert_eq!(store.evict_oldest("acme", 0).await.unwrap(), 0);
    }

    #[tokio::test]
    async fn test_search_newest_first_with_limit() {
        let store = SqliteLongTermStore::new(test_pool().await);
        for i in 0..3 {
            store
                .upsert(&entry("acme", &format!("k{i}"), &format!("f{i}"), json!({"i": i})))
                .await
                .unwrap();
        }
        let mut other = entry("acme", "note", "zz", json!({}));
        other.memory_type = "note".to_string();
        store.upsert(&other).await.unwrap();

        let found = store.search("acme", INSIGHT_MEMORY_TYPE, 2).await.unwrap();
        let keys: Vec<&str> = found.iter().map(|e| e.key.as_str()).collect();
        assert_eq!(keys, vec!["k2", "k1"]);

        let notes = store.search("acme", "note", 10).await.unwrap();
        assert_eq!(notes.len(), 1);
    }

    #[tokio::test]
    async fn test_ping() {
        let store = SqliteLongTermStore::new(test_pool().await);
        store.ping().await.unwrap();
    }

    #[tokio::test]
    async fn test_memory_manager_over_sqlite_dedups_and_caps() {
        use crate::cache::InProcessCache;
        use crate::crypto::hash::Sha256ContentHasher;
        use std::sync::Arc;
        use steward_core::memory::MemoryManager;
        use steward_types::config::MemoryConfig;
        use steward_types::memory::LongTermWrite;

        let store = SqliteLongTermStore::new(test_pool().await);
        let config = MemoryConfig {
            max_long_term_per_namespace: 3,
            ..MemoryConfig::default()
        };
        let manager = MemoryManager::new(
            config,
            Some(InProcessCache::new()),
            Some(store.clone()),
            Arc::new(Sha256ContentHasher::new()),
        );

        let value = json!({"trend": "up"});
        assert_eq!(
            manager.store_long_term("acme", "pricing", &value, None).await,
            LongTermWrite::Stored
        );
        assert_eq!(
            manager.store_long_term("acme", "pricing", &value, None).await,
            LongTermWrite::Duplicate
        );

        for i in 0..3 {
            manager
                .store_long_term("acme", &format!("k{i}"), &json!({"i": i}), None)
                .await;
        }
        assert_eq!(store.count("acme").await.unwrap(), 3);
        assert!(manager.retrieve_long_term("acme", "pricing").await.is_none());
        assert!(manager.retrieve_long_term("acme", "k2").await.is_some());

        let stored = store.latest_by_key("acme", "k2").await.unwrap().unwrap();
        assert!(stored.fingerprint.starts_with("v1:"));
    }
}
